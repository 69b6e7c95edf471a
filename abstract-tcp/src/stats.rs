//! Per-instance protocol counters.
//!
//! Counters are always collected; whether they are printed at teardown is
//! decided by [`crate::config::TcpConfig::statistics`].

use std::fmt;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct TcpStats {
    pub snd_total: u64,         // segments handed to the network layer
    pub snd_pack: u64,          // data segments sent for the first time
    pub snd_rexmit_pack: u64,   // data segments sent again
    pub snd_fast_rexmit: u64,   // of which triggered by duplicate ACKs
    pub snd_acks: u64,          // ACK-only segments
    pub rcv_total: u64,         // segments received from the network layer
    pub rcv_pack: u64,          // segments carrying data
    pub rcv_ack_pack: u64,      // ACKs that advanced snd_una
    pub rcv_dup_ack: u64,       // duplicate ACKs
    pub rcv_short: u64,         // too short to hold a header
    pub rcv_bad: u64,           // well-sized but malformed
    pub rcv_dup_pack: u64,      // duplicate data segments
    pub rcv_dropped: u64,       // discarded by a diagnostic drop
    pub rcv_no_listener: u64,   // first packets nobody was listening for
}

impl TcpStats {
    /// The lines printed at teardown, in print order.
    pub fn summary(&self) -> Vec<String> {
        vec![
            format!("Packets Sent to Network Layer = {}", self.snd_total),
            format!("Data Packets Sent = {}", self.snd_pack + self.snd_rexmit_pack),
            format!("Data Packets in Sequence = {}", self.snd_pack),
            format!("Data Packets Retransmitted = {}", self.snd_rexmit_pack),
            format!("Data Packets Fast Retransmitted = {}", self.snd_fast_rexmit),
            format!("ACK-only Packets Sent = {}", self.snd_acks),
            format!("Total Packets Received From Network Layer = {}", self.rcv_total),
            format!("Data Packets Received = {}", self.rcv_pack),
            format!("In Sequence ACK Packets Received = {}", self.rcv_ack_pack),
            format!("Duplicate ACK Packets Received = {}", self.rcv_dup_ack),
            format!("Packets Received that are Too Short = {}", self.rcv_short),
        ]
    }
}

impl fmt::Display for TcpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.summary() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packets_sent_includes_retransmissions() {
        let stats = TcpStats {
            snd_pack: 10,
            snd_rexmit_pack: 3,
            ..Default::default()
        };
        let lines = stats.summary();
        assert_eq!(lines[1], "Data Packets Sent = 13");
        assert_eq!(lines[2], "Data Packets in Sequence = 10");
        assert_eq!(lines[3], "Data Packets Retransmitted = 3");
    }

    #[test]
    fn display_prints_every_line() {
        let text = TcpStats::default().to_string();
        assert_eq!(text.lines().count(), 11);
        assert!(text.starts_with("Packets Sent to Network Layer = 0"));
    }
}
