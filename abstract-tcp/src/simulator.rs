//! Deterministic in-memory network for driving [`Transport`] instances.
//!
//! The engine never touches a clock or a socket, so something has to play
//! scheduler and network layer.  [`Simulator`] does both with a virtual clock
//! and a single event heap:
//!
//! | Event     | Effect                                                 |
//! |-----------|--------------------------------------------------------|
//! | `Tick`    | calls [`Transport::tick`] on the node                  |
//! | `Deliver` | hands encoded bytes to [`Transport::input`] on the node |
//!
//! Every segment a node sends is routed by destination address to another
//! node and delivered after `delay`, unless the seeded loss model drops it.
//! Same inputs and seed give the same run, event for event.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ccb::ConnectionId;
use crate::config::{ConfigError, TcpConfig};
use crate::transport::{AppEvent, Host, OutboundSegment, TcpError, Transport};

/// Link model shared by every pair of nodes.
///
/// `loss_rate` is a probability in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// One-way propagation delay.
    pub delay: Duration,
    /// Probability that any given segment is silently dropped in transit.
    pub loss_rate: f64,
    /// Seed of the loss model.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Lossless 10 ms links.
        Self {
            delay: Duration::from_millis(10),
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

/// Index of a node inside its [`Simulator`].
pub type NodeId = usize;

/// One simulated host: a transport instance plus everything it told the
/// application.
pub struct Node {
    pub addr: u32,
    pub transport: Transport,
    pub events: Vec<AppEvent>,
}

#[derive(Debug)]
enum EventKind {
    Tick,
    Deliver { bytes: Vec<u8>, priority: u8 },
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    /// Insertion order, so simultaneous events run first-scheduled first.
    order: u64,
    node: NodeId,
    kind: EventKind,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.order) == (other.at, other.order)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

/// [`Host`] handed to a node's transport for the duration of one call.
/// Outgoing segments and tick requests are buffered and scheduled afterwards.
struct NodeHost<'a> {
    now: Duration,
    events: &'a mut Vec<AppEvent>,
    outbox: Vec<OutboundSegment>,
    ticks: Vec<Duration>,
}

impl Host for NodeHost<'_> {
    fn now(&self) -> Duration {
        self.now
    }

    fn send_segment(&mut self, segment: OutboundSegment) {
        self.outbox.push(segment);
    }

    fn notify(&mut self, event: AppEvent) {
        self.events.push(event);
    }

    fn schedule_tick(&mut self, delay: Duration) {
        self.ticks.push(delay);
    }
}

pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    now: Duration,
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_order: u64,
    nodes: Vec<Node>,
    by_addr: HashMap<u32, NodeId>,
    lost: u64,
    delivered: u64,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            now: Duration::ZERO,
            queue: BinaryHeap::new(),
            next_order: 0,
            nodes: Vec::new(),
            by_addr: HashMap::new(),
            lost: 0,
            delivered: 0,
        }
    }

    /// Add a node reachable at `addr`.
    pub fn add_node(&mut self, addr: u32, config: TcpConfig) -> Result<NodeId, ConfigError> {
        let transport = Transport::new(config)?;
        let id = self.nodes.len();
        self.nodes.push(Node {
            addr,
            transport,
            events: Vec::new(),
        });
        self.by_addr.insert(addr, id);
        Ok(id)
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Segments lost in transit so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Segments handed to a destination node so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Drain the application events node `id` has accumulated.
    pub fn take_events(&mut self, id: NodeId) -> Vec<AppEvent> {
        std::mem::take(&mut self.nodes[id].events)
    }

    /// Run an application action against node `id` at the current time.
    pub fn with_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut Transport, &mut dyn Host) -> R,
    ) -> R {
        let Node {
            transport, events, ..
        } = &mut self.nodes[id];
        let mut host = NodeHost {
            now: self.now,
            events,
            outbox: Vec::new(),
            ticks: Vec::new(),
        };
        let out = f(transport, &mut host);
        let NodeHost { outbox, ticks, .. } = host;
        self.flush(id, outbox, ticks);
        out
    }

    /// Process the next event.  Returns `false` once nothing is scheduled.
    pub fn step(&mut self) -> bool {
        let Some(Reverse(ev)) = self.queue.pop() else {
            return false;
        };
        self.now = ev.at;
        match ev.kind {
            EventKind::Tick => self.with_node(ev.node, |t, host| t.tick(host)),
            EventKind::Deliver { bytes, priority } => {
                self.delivered += 1;
                let addr = self.nodes[ev.node].addr;
                if let Err(err) = self.with_node(ev.node, |t, host| t.input(host, &bytes, priority)) {
                    log::warn!("[sim] node {} ignored segment: {err}", std::net::Ipv4Addr::from(addr));
                }
            }
        }
        true
    }

    /// Step until `done` holds or virtual time would pass `deadline`.
    /// Returns whether `done` was reached.
    pub fn run_until(&mut self, deadline: Duration, mut done: impl FnMut(&Simulator) -> bool) -> bool {
        loop {
            if done(self) {
                return true;
            }
            match self.queue.peek().map(|Reverse(next)| next.at) {
                Some(at) if at <= deadline => {
                    self.step();
                }
                _ => return false,
            }
        }
    }

    /// Step through everything scheduled up to `now + span`.
    pub fn run_for(&mut self, span: Duration) {
        let deadline = self.now + span;
        self.run_until(deadline, |_| false);
        self.now = self.now.max(deadline);
    }

    fn schedule(&mut self, at: Duration, node: NodeId, kind: EventKind) {
        self.next_order += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            order: self.next_order,
            node,
            kind,
        }));
    }

    fn flush(&mut self, from: NodeId, outbox: Vec<OutboundSegment>, ticks: Vec<Duration>) {
        for delay in ticks {
            self.schedule(self.now + delay, from, EventKind::Tick);
        }
        for seg in outbox {
            let Some(&to) = self.by_addr.get(&seg.dst) else {
                log::warn!(
                    "[sim] no route to {}; segment discarded",
                    std::net::Ipv4Addr::from(seg.dst)
                );
                continue;
            };
            if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
                self.lost += 1;
                log::debug!("[sim] lost {}-byte segment to node {to}", seg.bytes.len());
                continue;
            }
            self.schedule(
                self.now + self.config.delay,
                to,
                EventKind::Deliver {
                    bytes: seg.bytes,
                    priority: seg.priority,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk transfer
// ---------------------------------------------------------------------------

/// Application driver that pushes `packets` payloads of `size` bytes down one
/// connection as fast as the send buffer accepts them, then closes it.
#[derive(Debug)]
pub struct BulkTransfer {
    pub node: NodeId,
    pub conn: ConnectionId,
    size: usize,
    remaining: usize,
    next_byte: u8,
    closed: bool,
}

impl BulkTransfer {
    pub fn new(node: NodeId, conn: ConnectionId, packets: usize, size: usize) -> Self {
        Self {
            node,
            conn,
            size,
            remaining: packets,
            next_byte: 0,
            closed: false,
        }
    }

    /// Payloads not yet handed to the transport.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Enqueue as much as fits, and close once everything is enqueued.
    pub fn pump(&mut self, sim: &mut Simulator) -> Result<(), TcpError> {
        let conn = self.conn;
        while self.remaining > 0 {
            let fits = sim
                .node(self.node)
                .transport
                .connection(conn)
                .is_some_and(|ccb| ccb.send.has_room_for(self.size));
            if !fits {
                return Ok(());
            }
            let payload = self.payload();
            sim.with_node(self.node, |t, host| t.send(host, conn, payload))?;
            self.remaining -= 1;
        }
        if !self.closed {
            sim.with_node(self.node, |t, host| t.close(host, conn))?;
            self.closed = true;
        }
        Ok(())
    }

    /// Payload bytes count up across the whole transfer, so a receiver can
    /// check ordering by content alone.
    fn payload(&mut self) -> Vec<u8> {
        (0..self.size)
            .map(|_| {
                let b = self.next_byte;
                self.next_byte = self.next_byte.wrapping_add(1);
                b
            })
            .collect()
    }
}

/// Expected concatenated payload of a [`BulkTransfer`].
pub fn bulk_pattern(packets: usize, size: usize) -> Vec<u8> {
    (0..packets * size).map(|i| i as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_then_insertion_order() {
        let mut heap = BinaryHeap::new();
        for (at, order) in [(5, 1), (1, 2), (5, 0), (3, 3)] {
            heap.push(Reverse(Scheduled {
                at: Duration::from_millis(at),
                order,
                node: 0,
                kind: EventKind::Tick,
            }));
        }
        let popped: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(s)| (s.at.as_millis(), s.order))
            .collect();
        assert_eq!(popped, vec![(1, 2), (3, 3), (5, 0), (5, 1)]);
    }

    #[test]
    fn unroutable_segments_are_discarded() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let a = sim.add_node(1, TcpConfig::default()).unwrap();
        sim.flush(
            a,
            vec![OutboundSegment {
                src: 1,
                dst: 99,
                interface: None,
                priority: 0,
                bytes: vec![0; 24],
            }],
            Vec::new(),
        );
        assert!(!sim.step());
    }

    #[test]
    fn run_for_advances_clock_past_idle_queue() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        sim.run_for(Duration::from_secs(2));
        assert_eq!(sim.now(), Duration::from_secs(2));
    }

    #[test]
    fn bulk_pattern_counts_up() {
        assert_eq!(bulk_pattern(2, 3), vec![0, 1, 2, 3, 4, 5]);
    }
}
