/// Counters describing what a [`Transport`](crate::Transport) has done since it was created.
///
/// The counters are updated by the worker thread; [`Transport::stats`](crate::Transport::stats)
/// returns a snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "TransportStats should be inspected or used after being queried"]
pub struct TransportStats {
    /// Datagrams handed to the socket successfully.
    pub datagrams_sent: u64,
    /// Payload bytes of all successfully sent datagrams.
    pub bytes_sent: u64,
    /// Datagrams received.
    pub datagrams_received: u64,
    /// Payload bytes of all received datagrams.
    pub bytes_received: u64,
    /// Sends that failed (each one raised `TxFailed`).
    pub send_failures: u64,
    /// Receives that failed with something other than a timeout (each one raised `RxFailed`).
    pub receive_failures: u64,
    /// Datagrams rejected because the mailbox was occupied (each one raised `TxFlood`).
    pub floods: u64,
}

impl TransportStats {
    /// Creates an all-zero snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.datagrams_sent = self.datagrams_sent.saturating_add(1);
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.datagrams_received = self.datagrams_received.saturating_add(1);
        self.bytes_received = self.bytes_received.saturating_add(bytes as u64);
    }

    pub(crate) fn record_send_failure(&mut self) {
        self.send_failures = self.send_failures.saturating_add(1);
    }

    pub(crate) fn record_receive_failure(&mut self) {
        self.receive_failures = self.receive_failures.saturating_add(1);
    }

    pub(crate) fn record_flood(&mut self) {
        self.floods = self.floods.saturating_add(1);
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            datagrams_sent,
            bytes_sent,
            datagrams_received,
            bytes_received,
            send_failures,
            receive_failures,
            floods,
        } = self;

        write!(
            f,
            "TransportStats {{ sent: {datagrams_sent} ({bytes_sent} B), received: {datagrams_received} ({bytes_received} B)"
        )?;
        if *send_failures > 0 || *receive_failures > 0 || *floods > 0 {
            write!(
                f,
                ", send_failures: {send_failures}, receive_failures: {receive_failures}, floods: {floods}"
            )?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        let stats = TransportStats::default();
        assert_eq!(stats, TransportStats::new());
        assert_eq!(stats.datagrams_sent, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.floods, 0);
    }

    #[test]
    fn record_accumulates() {
        let mut stats = TransportStats::new();
        stats.record_sent(37);
        stats.record_sent(106);
        stats.record_received(37);
        stats.record_flood();
        stats.record_send_failure();
        stats.record_receive_failure();
        stats.record_receive_failure();

        assert_eq!(stats.datagrams_sent, 2);
        assert_eq!(stats.bytes_sent, 143);
        assert_eq!(stats.datagrams_received, 1);
        assert_eq!(stats.bytes_received, 37);
        assert_eq!(stats.floods, 1);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.receive_failures, 2);
    }

    #[test]
    fn counters_saturate() {
        let mut stats = TransportStats {
            floods: u64::MAX,
            ..TransportStats::default()
        };
        stats.record_flood();
        assert_eq!(stats.floods, u64::MAX);
    }

    #[test]
    fn display_omits_failures_when_clean() {
        let mut stats = TransportStats::new();
        stats.record_sent(10);
        let text = stats.to_string();
        assert_eq!(text, "TransportStats { sent: 1 (10 B), received: 0 (0 B) }");

        stats.record_flood();
        assert!(stats.to_string().contains("floods: 1"));
    }
}
