use crate::segment::MAX_DATA_SIZE;
use log::debug;

const INITIAL_CWND: u64 = 1;
const INITIAL_SSTHRESH: u64 = 128;
// On leaving slow start the controller restarts from a fixed small window.
const SLOW_START_EXIT_CWND: u64 = 1;
const SLOW_START_EXIT_SSTHRESH: u64 = 64;
const DUP_ACK_THRESHOLD: u32 = 3;

/// Congestion controller phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongAvoid,
    FastRecovery,
}

/// Bookkeeping for one transmitted-but-not-fully-acknowledged segment.
/// Slots are appended in send order and addressed by index.
#[derive(Debug, Clone)]
pub struct SendSlot {
    /// File offset of the segment's first payload byte.
    pub first_byte: u64,
    pub data_length: u16,
    pub seq_num: u32,
    /// Microseconds since session start; refreshed on every retransmission.
    /// Zero means the stamp is unusable for RTT sampling.
    pub time_sent: u64,
}

impl SendSlot {
    fn cumulative_end(&self) -> u32 {
        self.seq_num + self.data_length as u32
    }
}

#[derive(Debug, Default, Clone)]
pub struct PacketStatistics {
    /// Fresh segments sent while in slow start.
    pub slow_start_sent: u64,
    /// Fresh segments sent while in congestion avoidance.
    pub cong_avoid_sent: u64,
    pub retransmits: u64,
}

/// Outcome of feeding one acknowledgment into the window.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Below `send_base`, or no segment was ever sent. Absorbed.
    Stale,
    Duplicate,
    /// Third duplicate: the caller must resend the segment starting at
    /// `first_byte`.
    FastRetransmit { first_byte: u64 },
    /// New cumulative acknowledgment; `rtt_sample` is the microsecond
    /// round-trip measured off the newest acknowledged slot, when usable.
    Advanced { rtt_sample: Option<u64> },
}

/// Sender-side sliding window and congestion state machine. Pure state, no
/// I/O: the transfer loop in `sender.rs` records sends, feeds ACKs and
/// timeouts through it, and acts on the outcomes.
pub struct SendWindow {
    initial_seq: u32,
    rwnd: u64,
    cwnd: u64,
    ssthresh: u64,
    phase: Phase,
    /// Highest cumulative acknowledgment observed.
    send_base: u32,
    dup_ack_count: u32,
    slots: Vec<SendSlot>,
    last_sent: Option<usize>,
    last_acked: Option<usize>,
    stats: PacketStatistics,
}

impl SendWindow {
    pub fn new(initial_seq: u32, rwnd: u64) -> Self {
        Self {
            initial_seq,
            rwnd: rwnd.max(1),
            cwnd: INITIAL_CWND,
            ssthresh: INITIAL_SSTHRESH,
            phase: Phase::SlowStart,
            send_base: initial_seq,
            dup_ack_count: 0,
            slots: Vec::new(),
            last_sent: None,
            last_acked: None,
            stats: PacketStatistics::default(),
        }
    }

    pub fn initial_seq(&self) -> u32 {
        self.initial_seq
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn stats(&self) -> &PacketStatistics {
        &self.stats
    }

    pub fn last_sent_index(&self) -> Option<usize> {
        self.last_sent
    }

    pub fn last_acked_index(&self) -> Option<usize> {
        self.last_acked
    }

    /// Segments sent but not yet cumulatively acknowledged.
    pub fn in_flight(&self) -> u64 {
        let sent = self.last_sent.map(|i| i as u64 + 1).unwrap_or(0);
        let acked = self.last_acked.map(|i| i as u64 + 1).unwrap_or(0);
        sent - acked
    }

    /// Effective window: the flow-control and congestion bounds combined.
    pub fn window_limit(&self) -> u64 {
        self.rwnd.min(self.cwnd)
    }

    /// True once every sent segment is acknowledged and the acknowledged tip
    /// is the segment that closed the file.
    pub fn fully_acknowledged(&self, file_length: u64) -> bool {
        match (self.last_acked, self.last_sent) {
            (Some(acked), Some(sent)) if acked == sent => {
                let slot = &self.slots[acked];
                slot.first_byte + slot.data_length as u64 == file_length
                    && slot.first_byte + MAX_DATA_SIZE as u64 > file_length
            }
            _ => false,
        }
    }

    /// Appends a slot for a freshly sent segment and returns its sequence
    /// number. Statistics are attributed to the current phase.
    pub fn record_send(&mut self, first_byte: u64, data_length: u16, now_micros: u64) -> u32 {
        let seq_num = self.initial_seq + first_byte as u32;
        self.slots.push(SendSlot {
            first_byte,
            data_length,
            seq_num,
            time_sent: now_micros,
        });
        self.last_sent = Some(self.slots.len() - 1);
        match self.phase {
            Phase::SlowStart => self.stats.slow_start_sent += 1,
            Phase::CongAvoid => self.stats.cong_avoid_sent += 1,
            Phase::FastRecovery => {}
        }
        seq_num
    }

    /// Whether the next unacknowledged slot is covered by `ack`. A plain
    /// duplicate never covers one, since every non-empty slot ends above
    /// `send_base`; only a zero-length closing slot can be caught here.
    fn covers_next_unacked(&self, ack: u32) -> bool {
        let next = self.last_acked.map(|i| i + 1).unwrap_or(0);
        match self.last_sent {
            Some(tip) if next <= tip => self.slots[next].cumulative_end() <= ack,
            _ => false,
        }
    }

    pub fn on_ack(&mut self, ack: u32, now_micros: u64) -> AckOutcome {
        if self.slots.is_empty() || ack < self.send_base {
            return AckOutcome::Stale;
        }

        if ack == self.send_base && !self.covers_next_unacked(ack) {
            self.dup_ack_count += 1;
            if self.dup_ack_count == DUP_ACK_THRESHOLD {
                self.dup_ack_count = 0;
                if self.cwnd > 1 {
                    self.cwnd /= 2;
                }
                self.ssthresh = self.cwnd;
                self.phase = Phase::FastRecovery;
                debug!(
                    "triple duplicate ack={}, entering fast recovery (cwnd={}, ssthresh={})",
                    ack, self.cwnd, self.ssthresh
                );
                return AckOutcome::FastRetransmit {
                    first_byte: (ack - self.initial_seq) as u64,
                };
            }
            return AckOutcome::Duplicate;
        }

        // New cumulative acknowledgment.
        if self.phase == Phase::FastRecovery {
            self.cwnd += 1;
            self.phase = Phase::CongAvoid;
            debug!("leaving fast recovery, cwnd={}", self.cwnd);
        }
        self.dup_ack_count = 0;
        self.send_base = ack;

        if self.last_acked.is_none() {
            self.last_acked = Some(0);
        }
        let tip = self.last_sent.unwrap_or(0);
        let mut idx = self.last_acked.unwrap_or(0);
        while idx < tip && self.slots[idx + 1].cumulative_end() <= ack {
            idx += 1;
        }
        self.last_acked = Some(idx);

        let slot = &self.slots[idx];
        let rtt_sample = if slot.time_sent == 0 {
            None
        } else {
            Some(now_micros.saturating_sub(slot.time_sent))
        };
        AckOutcome::Advanced { rtt_sample }
    }

    /// Post-event congestion bookkeeping, run once per received datagram:
    /// the slow-start exit check, then window growth when the acknowledgment
    /// drained every outstanding segment. Returns whether it drained.
    pub fn after_ack_event(&mut self) -> bool {
        if self.phase == Phase::SlowStart && self.cwnd >= self.ssthresh {
            self.phase = Phase::CongAvoid;
            self.cwnd = SLOW_START_EXIT_CWND;
            self.ssthresh = SLOW_START_EXIT_SSTHRESH;
            debug!(
                "slow start threshold reached, switching to congestion avoidance (cwnd={}, ssthresh={})",
                self.cwnd, self.ssthresh
            );
        }

        let drained = self.last_sent.is_some() && self.last_acked == self.last_sent;
        if drained {
            match self.phase {
                Phase::SlowStart => self.cwnd *= 2,
                _ => self.cwnd += 1,
            }
        }
        drained
    }

    /// Retransmission timeout: collapse the window and restart slow start.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = 1;
        self.phase = Phase::SlowStart;
        debug!(
            "timeout, restarting slow start (cwnd={}, ssthresh={})",
            self.cwnd, self.ssthresh
        );
    }

    /// Slots awaiting acknowledgment, oldest first.
    pub fn unacked_slots(&self) -> impl Iterator<Item = &SendSlot> {
        let start = self.last_acked.map(|i| i + 1).unwrap_or(0);
        let end = self.last_sent.map(|i| i + 1).unwrap_or(0);
        self.slots[start.min(end)..end].iter()
    }

    /// Refreshes the send stamp of the unacknowledged slot starting at
    /// `first_byte` and counts the retransmission.
    pub fn mark_retransmitted(&mut self, first_byte: u64, now_micros: u64) {
        let start = self.last_acked.map(|i| i + 1).unwrap_or(0);
        let end = self.last_sent.map(|i| i + 1).unwrap_or(0);
        for slot in &mut self.slots[start.min(end)..end] {
            if slot.first_byte == first_byte {
                slot.time_sent = now_micros;
                break;
            }
        }
        self.stats.retransmits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = MAX_DATA_SIZE as u64;
    const INIT: u32 = 1000;

    /// Window with `n` full segments recorded as sent.
    fn window_with_sent(n: u64) -> SendWindow {
        let mut window = SendWindow::new(INIT, 100);
        for i in 0..n {
            window.record_send(i * MAX, MAX_DATA_SIZE as u16, 50 + i);
        }
        window
    }

    fn ack_after(n: u64) -> u32 {
        INIT + (n * MAX) as u32
    }

    #[test]
    fn starts_in_slow_start_with_unit_window() {
        let window = SendWindow::new(INIT, 100);
        assert_eq!(window.phase(), Phase::SlowStart);
        assert_eq!(window.cwnd(), 1);
        assert_eq!(window.ssthresh(), 128);
        assert_eq!(window.send_base(), INIT);
        assert_eq!(window.in_flight(), 0);
    }

    #[test]
    fn first_ack_bootstraps_the_acked_index() {
        let mut window = window_with_sent(3);
        assert_eq!(window.last_acked_index(), None);

        let outcome = window.on_ack(ack_after(1), 500);
        assert!(matches!(outcome, AckOutcome::Advanced { .. }));
        assert_eq!(window.last_acked_index(), Some(0));
        assert_eq!(window.send_base(), ack_after(1));
        assert_eq!(window.in_flight(), 2);
    }

    #[test]
    fn cumulative_ack_advances_over_multiple_slots() {
        let mut window = window_with_sent(3);
        let outcome = window.on_ack(ack_after(3), 500);
        match outcome {
            AckOutcome::Advanced { rtt_sample } => {
                // Sampled off the newest acknowledged slot (sent at t=52).
                assert_eq!(rtt_sample, Some(448));
            }
            other => panic!("expected Advanced, got {:?}", other),
        }
        assert_eq!(window.last_acked_index(), Some(2));
        assert_eq!(window.in_flight(), 0);
    }

    #[test]
    fn stale_ack_is_absorbed() {
        let mut window = window_with_sent(3);
        window.on_ack(ack_after(2), 500);
        assert_eq!(window.on_ack(ack_after(1), 600), AckOutcome::Stale);
        assert_eq!(window.send_base(), ack_after(2));
    }

    #[test]
    fn monotonic_indices_and_send_base() {
        let mut window = window_with_sent(5);
        let mut base = window.send_base();
        let mut acked = -1i64;
        for ack in [ack_after(2), ack_after(1), ack_after(2), ack_after(4)] {
            window.on_ack(ack, 500);
            assert!(window.send_base() >= base);
            let now_acked = window.last_acked_index().map(|i| i as i64).unwrap_or(-1);
            assert!(now_acked >= acked);
            base = window.send_base();
            acked = now_acked;
        }
    }

    /// First segment sent and drained alone, growing cwnd to 2, then `extra`
    /// further segments left outstanding.
    fn window_after_first_drain(extra: u64) -> SendWindow {
        let mut window = SendWindow::new(INIT, 100);
        window.record_send(0, MAX_DATA_SIZE as u16, 10);
        window.on_ack(ack_after(1), 20);
        window.after_ack_event();
        assert_eq!(window.cwnd(), 2);
        for i in 1..=extra {
            window.record_send(i * MAX, MAX_DATA_SIZE as u16, 30 + i);
        }
        window
    }

    #[test]
    fn third_duplicate_triggers_fast_retransmit_and_halves_cwnd() {
        let mut window = window_after_first_drain(4);
        let cwnd_before = window.cwnd();

        assert_eq!(window.on_ack(ack_after(1), 600), AckOutcome::Duplicate);
        assert_eq!(window.on_ack(ack_after(1), 610), AckOutcome::Duplicate);
        let outcome = window.on_ack(ack_after(1), 620);
        assert_eq!(outcome, AckOutcome::FastRetransmit { first_byte: MAX });
        assert_eq!(window.cwnd(), cwnd_before / 2);
        assert_eq!(window.ssthresh(), window.cwnd());
        assert_eq!(window.phase(), Phase::FastRecovery);

        // Counter was reset: three more duplicates are needed to re-trigger.
        assert_eq!(window.on_ack(ack_after(1), 630), AckOutcome::Duplicate);
        assert_eq!(window.on_ack(ack_after(1), 640), AckOutcome::Duplicate);
        assert!(matches!(
            window.on_ack(ack_after(1), 650),
            AckOutcome::FastRetransmit { .. }
        ));
    }

    #[test]
    fn new_ack_exits_fast_recovery_into_congestion_avoidance() {
        let mut window = window_after_first_drain(4);
        for t in [600, 610, 620] {
            window.on_ack(ack_after(1), t);
        }
        assert_eq!(window.phase(), Phase::FastRecovery);
        let cwnd = window.cwnd();

        window.on_ack(ack_after(3), 700);
        assert_eq!(window.phase(), Phase::CongAvoid);
        assert_eq!(window.cwnd(), cwnd + 1);
        assert_eq!(window.last_acked_index(), Some(2));
    }

    #[test]
    fn timeout_restarts_slow_start() {
        let mut window = window_with_sent(5);
        window.on_ack(ack_after(1), 500);
        for _ in 0..3 {
            window.after_ack_event();
        }
        let cwnd = window.cwnd();

        window.on_timeout();
        assert_eq!(window.phase(), Phase::SlowStart);
        assert_eq!(window.cwnd(), 1);
        assert_eq!(window.ssthresh(), (cwnd / 2).max(1));

        // Every outstanding slot is offered for retransmission, newest
        // included.
        let unacked: Vec<u64> = window.unacked_slots().map(|s| s.first_byte).collect();
        assert_eq!(unacked, vec![MAX, 2 * MAX, 3 * MAX, 4 * MAX]);
    }

    #[test]
    fn drained_window_doubles_in_slow_start_and_increments_after() {
        let mut window = window_with_sent(1);
        window.on_ack(ack_after(1), 500);
        assert!(window.after_ack_event());
        assert_eq!(window.cwnd(), 2);

        window.record_send(MAX, MAX_DATA_SIZE as u16, 600);
        window.record_send(2 * MAX, MAX_DATA_SIZE as u16, 601);
        window.on_ack(ack_after(3), 700);
        assert!(window.after_ack_event());
        assert_eq!(window.cwnd(), 4);
    }

    #[test]
    fn reaching_ssthresh_resets_into_congestion_avoidance() {
        let mut window = SendWindow::new(INIT, 200);
        let mut offset = 0u64;
        // Drain one-segment windows until cwnd crosses the threshold.
        while window.phase() == Phase::SlowStart {
            window.record_send(offset, MAX_DATA_SIZE as u16, 10);
            window.on_ack(INIT + (offset + MAX) as u32, 20);
            window.after_ack_event();
            offset += MAX;
        }
        assert_eq!(window.phase(), Phase::CongAvoid);
        // The exit resets cwnd to 1; the drained window that triggered the
        // check then grows it by one.
        assert_eq!(window.cwnd(), 2);
        assert_eq!(window.ssthresh(), 64);
    }

    #[test]
    fn window_limit_is_min_of_rwnd_and_cwnd() {
        let mut window = SendWindow::new(INIT, 2);
        assert_eq!(window.window_limit(), 1);
        window.record_send(0, MAX_DATA_SIZE as u16, 10);
        window.on_ack(ack_after(1), 20);
        window.after_ack_event();
        window.after_ack_event();
        assert!(window.cwnd() > 2);
        assert_eq!(window.window_limit(), 2);
    }

    #[test]
    fn zero_length_closing_slot_is_acknowledged_at_send_base() {
        // A file of exactly one full segment: data slot, then the empty
        // closing slot whose cumulative end equals the data ack.
        let file_length = MAX;
        let mut window = window_with_sent(1);
        window.on_ack(ack_after(1), 500);
        assert!(!window.fully_acknowledged(file_length));

        window.record_send(MAX, 0, 600);
        let outcome = window.on_ack(ack_after(1), 700);
        assert!(matches!(outcome, AckOutcome::Advanced { .. }));
        assert_eq!(window.last_acked_index(), Some(1));
        assert!(window.fully_acknowledged(file_length));
    }

    #[test]
    fn empty_file_session_is_a_single_empty_slot() {
        let mut window = SendWindow::new(INIT, 100);
        window.record_send(0, 0, 10);
        assert!(!window.fully_acknowledged(0));
        let outcome = window.on_ack(INIT, 20);
        assert!(matches!(outcome, AckOutcome::Advanced { .. }));
        assert!(window.fully_acknowledged(0));
    }

    #[test]
    fn retransmission_refreshes_the_slot_stamp() {
        let mut window = window_with_sent(3);
        window.on_ack(ack_after(1), 500);
        window.mark_retransmitted(MAX, 900);
        let slot = window.unacked_slots().next().unwrap();
        assert_eq!(slot.first_byte, MAX);
        assert_eq!(slot.time_sent, 900);
        assert_eq!(window.stats().retransmits, 1);
    }

    #[test]
    fn statistics_attribute_fresh_sends_to_the_phase() {
        let mut window = SendWindow::new(INIT, 100);
        window.record_send(0, MAX_DATA_SIZE as u16, 10);
        assert_eq!(window.stats().slow_start_sent, 1);

        window.on_ack(ack_after(1), 20);
        // Force congestion avoidance.
        while window.phase() == Phase::SlowStart {
            window.after_ack_event();
        }
        window.record_send(MAX, MAX_DATA_SIZE as u16, 30);
        assert_eq!(window.stats().cong_avoid_sent, 1);
        assert_eq!(window.stats().slow_start_sent, 1);
    }
}
