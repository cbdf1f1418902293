use crate::segment::{Segment, MAX_DATA_SIZE};
use bytes::Bytes;
use log::debug;

/// Fallback advertised window when the CLI passes zero.
pub const DEFAULT_RECV_WINDOW: u64 = 100;

/// Outcome of offering one data segment to the reassembly window.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly {
    /// Already covered by the in-order prefix. Re-acknowledge so the sender
    /// can move past it.
    Stale { ack: u32 },
    /// Further ahead than the window allows. Dropped silently.
    OutOfWindow,
    /// Buffered. `drained` holds the payloads that became contiguous, in
    /// file order; `ack` is the next expected sequence number; `complete`
    /// is set once FIN has arrived and nothing is missing below it.
    Stored {
        drained: Vec<Bytes>,
        ack: u32,
        complete: bool,
    },
}

/// Receiver-side reassembly buffer: segments are placed by their offset
/// within the window, out-of-order arrivals pad the gap with empty slots,
/// and the contiguous prefix is drained to the caller for writing.
pub struct ReceiveWindow {
    initial_seq: Option<u32>,
    rwnd: u64,
    slots: Vec<Option<Segment>>,
    last_in_order: Option<usize>,
    last_received: Option<usize>,
    fin_received: bool,
}

impl ReceiveWindow {
    /// Window that learns the initial sequence number from the first
    /// segment to arrive. Sound because the sender opens with a one-segment
    /// congestion window, so nothing else can arrive first.
    pub fn new(rwnd: u64) -> Self {
        Self {
            initial_seq: None,
            rwnd: if rwnd == 0 { DEFAULT_RECV_WINDOW } else { rwnd },
            slots: Vec::new(),
            last_in_order: None,
            last_received: None,
            fin_received: false,
        }
    }

    /// Window with the initial sequence number agreed out of band, for
    /// harnesses that deliver traffic in adversarial orders.
    pub fn with_initial_seq(rwnd: u64, initial_seq: u32) -> Self {
        let mut window = Self::new(rwnd);
        window.initial_seq = Some(initial_seq);
        window
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    pub fn last_in_order_index(&self) -> Option<usize> {
        self.last_in_order
    }

    pub fn last_received_index(&self) -> Option<usize> {
        self.last_received
    }

    /// The sequence number of the next byte the in-order prefix is waiting
    /// for; doubles as the cumulative acknowledgment value.
    pub fn next_expected(&self) -> u32 {
        match self.last_in_order {
            None => self.initial_seq.unwrap_or(0),
            Some(i) => {
                let slot = self.slots[i].as_ref().expect("in-order slot occupied");
                slot.seq + slot.payload.len() as u32
            }
        }
    }

    pub fn accept(&mut self, segment: Segment) -> Reassembly {
        if self.initial_seq.is_none() {
            self.initial_seq = Some(segment.seq);
        }
        let next_expected = self.next_expected();

        // A segment strictly below the expected sequence was already
        // delivered; one at exactly `next_expected` is new. FIN segments
        // fall through so the flag is never lost to a retransmission race.
        if segment.seq < next_expected && !segment.fin_flag {
            return Reassembly::Stale {
                ack: next_expected,
            };
        }

        let gap = (segment.seq as i64 - next_expected as i64) / MAX_DATA_SIZE as i64;
        let base = self.last_in_order.map(|i| i as i64).unwrap_or(-1);
        let target = base + gap + 1;
        if target <= base {
            // A FIN replay landing inside the drained prefix.
            return Reassembly::Stale {
                ack: next_expected,
            };
        }
        if (target - base) as u64 > self.rwnd {
            debug!(
                "segment seq={} lands {} slots ahead, outside the receive window",
                segment.seq,
                target - base
            );
            return Reassembly::OutOfWindow;
        }

        if segment.fin_flag {
            self.fin_received = true;
        }
        self.insert(target as usize, segment);
        let drained = self.drain();

        let complete = self.fin_received && self.last_in_order == self.last_received;
        Reassembly::Stored {
            drained,
            ack: self.next_expected(),
            complete,
        }
    }

    /// Places the segment at its window position, padding any skipped
    /// positions with empty slots.
    fn insert(&mut self, target: usize, segment: Segment) {
        if target >= self.slots.len() {
            self.slots.resize_with(target + 1, || None);
        }
        self.slots[target] = Some(segment);
        if self.last_received.is_none_or(|lr| target > lr) {
            self.last_received = Some(target);
        }
    }

    /// Advances the in-order prefix over every occupied slot, returning the
    /// payloads in file order.
    fn drain(&mut self) -> Vec<Bytes> {
        let mut drained = Vec::new();
        let mut idx = self.last_in_order.map(|i| i + 1).unwrap_or(0);
        while idx < self.slots.len() {
            match &self.slots[idx] {
                Some(segment) => {
                    drained.push(segment.payload.clone());
                    self.last_in_order = Some(idx);
                    idx += 1;
                }
                None => break,
            }
        }
        drained
    }
}
