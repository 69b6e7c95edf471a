//! Entry point for `abstract-tcp`.
//!
//! Runs a bulk transfer between two simulated nodes over the in-memory
//! network and prints both nodes' statistics.  All protocol work is
//! delegated to the library; `main.rs` owns only process setup (logging,
//! argument parsing) and the transfer loop.

use std::time::Duration;

use anyhow::{bail, ensure, Context};
use clap::Parser;

use abstract_tcp::simulator::{bulk_pattern, BulkTransfer, Simulator, SimulatorConfig};
use abstract_tcp::{AppEvent, AppType, Endpoint, OpenRequest, TcpConfig};

const CLIENT_ADDR: u32 = 0x0a00_0001;
const SERVER_ADDR: u32 = 0x0a00_0002;
const SERVER_PORT: u16 = 21;
const CLIENT_PORT: u16 = 1024;
const FTP: AppType = AppType(21);

/// Bulk transfer over the abstract TCP engine.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Number of payloads to send.
    #[arg(long, default_value_t = 64)]
    packets: usize,
    /// Bytes per payload (at most the MSS).
    #[arg(long, default_value_t = 1024)]
    size: usize,
    #[arg(long, default_value_t = 1024)]
    mss: usize,
    #[arg(long, default_value_t = 16384)]
    send_buffer: usize,
    #[arg(long, default_value_t = 16384)]
    recv_buffer: usize,
    /// One-way link delay in milliseconds.
    #[arg(long, default_value_t = 10)]
    delay_ms: u64,
    /// Percentage of data segments the receiver drops at random.
    #[arg(long, default_value_t = 0.0)]
    drop_percent: f64,
    /// Acknowledge only every other full segment.
    #[arg(long)]
    delayed_ack: bool,
    /// Log a tcpdump-style line per segment (target `abstract_tcp::trace`).
    #[arg(long)]
    trace: bool,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Give up after this much virtual time.
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    ensure!(
        cli.size > 0 && cli.size <= cli.mss,
        "--size must be between 1 and the MSS ({})",
        cli.mss
    );

    let base = TcpConfig {
        delayed_ack: cli.delayed_ack,
        send_buffer: cli.send_buffer,
        recv_buffer: cli.recv_buffer,
        mss: cli.mss,
        statistics: true,
        trace: cli.trace,
        ..TcpConfig::default()
    };
    let mut sim = Simulator::new(SimulatorConfig {
        delay: Duration::from_millis(cli.delay_ms),
        loss_rate: 0.0,
        seed: cli.seed,
    });
    let client = sim
        .add_node(
            CLIENT_ADDR,
            TcpConfig {
                seed: cli.seed,
                ..base.clone()
            },
        )
        .context("client configuration")?;
    let server = sim
        .add_node(
            SERVER_ADDR,
            TcpConfig {
                seed: cli.seed.wrapping_add(1),
                random_drop_percent: cli.drop_percent,
                ..base
            },
        )
        .context("server configuration")?;

    let server_ep = Endpoint::new(SERVER_ADDR, SERVER_PORT);
    sim.with_node(server, |t, host| t.listen(host, server_ep, FTP, 0))?;
    let conn = sim.with_node(client, |t, host| {
        t.open(
            host,
            OpenRequest {
                local: Endpoint::new(CLIENT_ADDR, CLIENT_PORT),
                remote: server_ep,
                app_type: FTP,
                priority: 0,
                unique_id: 1,
                interface: None,
            },
        )
    })?;
    log::info!("transferring {} x {} bytes on {conn}", cli.packets, cli.size);

    let mut transfer = BulkTransfer::new(client, conn, cli.packets, cli.size);
    let mut received = Vec::with_capacity(cli.packets * cli.size);
    let mut peer_closed = false;
    let deadline = Duration::from_secs(cli.timeout_secs);

    while !(transfer.is_closed() && peer_closed) {
        transfer.pump(&mut sim)?;
        for event in sim.take_events(server) {
            match event {
                AppEvent::DataReceived { payload, .. } => received.extend_from_slice(&payload),
                AppEvent::CloseResult { .. } => peer_closed = true,
                _ => {}
            }
        }
        sim.take_events(client);
        if sim.now() > deadline {
            bail!(
                "transfer incomplete after {:?}: {} of {} bytes delivered",
                sim.now(),
                received.len(),
                cli.packets * cli.size
            );
        }
        if !sim.step() {
            bail!("simulation ran dry");
        }
    }

    ensure!(
        received == bulk_pattern(cli.packets, cli.size),
        "delivered stream does not match what was sent"
    );
    println!(
        "delivered {} bytes in {:.3}s of virtual time",
        received.len(),
        sim.now().as_secs_f64()
    );
    for (name, id) in [("client", client), ("server", server)] {
        let transport = &sim.node(id).transport;
        if !transport.config().statistics {
            continue;
        }
        println!("\n{name}:");
        for line in transport.stats().summary() {
            println!("  {line}");
        }
    }
    Ok(())
}
