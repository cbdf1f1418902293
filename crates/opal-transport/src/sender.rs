use crate::channel::DatagramChannel;
use crate::error::Result;
use crate::rtt::RttEstimator;
use crate::segment::{Segment, MAX_DATA_SIZE, MAX_PACKET_SIZE};
use crate::send_window::{AckOutcome, PacketStatistics, SendWindow};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, Instant};
use tokio::time::{timeout_at, Instant as TokioInstant};

/// Summary of a completed transfer, for the caller's statistics report.
#[derive(Debug)]
pub struct TransferReport {
    pub stats: PacketStatistics,
    pub elapsed: Duration,
    pub file_length: u64,
}

/// Serves one file over the channel until every byte is acknowledged.
///
/// Single-threaded and event-driven: each turn fills the sliding window
/// with fresh segments, then waits up to the current retransmission timeout
/// for acknowledgments. A drained window grows it; a timeout collapses it
/// and retransmits everything outstanding.
pub struct FileSender<C, F> {
    channel: C,
    file: F,
    file_length: u64,
    window: SendWindow,
    rtt: RttEstimator,
    /// Next unsent file offset.
    start_byte: u64,
    epoch: Instant,
    recv_buf: Vec<u8>,
    read_buf: Vec<u8>,
}

impl<C, F> FileSender<C, F>
where
    C: DatagramChannel,
    F: Read + Seek,
{
    pub fn new(channel: C, mut file: F, initial_seq: u32, rwnd: u64) -> Result<Self> {
        let file_length = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            channel,
            file,
            file_length,
            window: SendWindow::new(initial_seq, rwnd),
            rtt: RttEstimator::new(),
            start_byte: 0,
            epoch: Instant::now(),
            recv_buf: vec![0u8; MAX_PACKET_SIZE],
            read_buf: vec![0u8; MAX_DATA_SIZE],
        })
    }

    pub async fn serve(mut self) -> Result<TransferReport> {
        let started = Instant::now();
        info!(
            "starting transfer of {} bytes, initial_seq={}",
            self.file_length,
            self.window.initial_seq()
        );

        while !self.window.fully_acknowledged(self.file_length) {
            self.fill_window().await?;
            self.wait_for_events().await?;
        }

        let report = TransferReport {
            stats: self.window.stats().clone(),
            elapsed: started.elapsed(),
            file_length: self.file_length,
        };
        info!(
            "transfer acknowledged in {:.3}s ({} retransmissions)",
            report.elapsed.as_secs_f64(),
            report.stats.retransmits
        );
        Ok(report)
    }

    /// Sends fresh segments while the window and the per-turn budget allow.
    /// `start_byte` advances by the full segment stride, so an exact
    /// multiple of the segment size ends with a zero-length FIN.
    async fn fill_window(&mut self) -> Result<()> {
        let limit = self.window.window_limit();
        let mut sent_count = 1;
        while self.window.in_flight() < limit
            && sent_count <= limit
            && self.start_byte <= self.file_length
        {
            let first_byte = self.start_byte;
            let (length, fin) = self.segment_bounds(first_byte);
            let seq = self
                .window
                .record_send(first_byte, length as u16, self.now_micros());
            let payload = self.read_range(first_byte, length)?;
            let segment = Segment::data(seq, fin, payload);
            trace!(
                "sending segment seq={} len={} fin={} (cwnd={}, in_flight={})",
                seq,
                length,
                fin,
                self.window.cwnd(),
                self.window.in_flight()
            );
            self.transmit(&segment).await;

            self.start_byte += MAX_DATA_SIZE as u64;
            sent_count += 1;
        }
        Ok(())
    }

    /// Blocks on the channel for up to one RTO, processing one datagram per
    /// wakeup, until the window drains, the transfer completes, or the
    /// timeout fires.
    async fn wait_for_events(&mut self) -> Result<()> {
        let deadline = TokioInstant::now() + self.rtt.rto();
        loop {
            match timeout_at(deadline, self.channel.recv(&mut self.recv_buf)).await {
                Ok(Ok(n)) => {
                    let drained = self.handle_datagram(n).await?;
                    if drained || self.window.fully_acknowledged(self.file_length) {
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    error!("receive error while waiting for acknowledgments: {}", e);
                }
                Err(_) => {
                    self.handle_timeout().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Returns whether this datagram drained the window.
    async fn handle_datagram(&mut self, n: usize) -> Result<bool> {
        match Segment::decode(&self.recv_buf[..n]) {
            Ok(segment) if segment.ack_flag => {
                match self.window.on_ack(segment.ack, self.now_micros()) {
                    AckOutcome::Stale => trace!("stale ack {}", segment.ack),
                    AckOutcome::Duplicate => {
                        debug!("duplicate ack {}", segment.ack);
                    }
                    AckOutcome::FastRetransmit { first_byte } => {
                        info!("fast retransmit at offset {}", first_byte);
                        self.retransmit(first_byte).await?;
                    }
                    AckOutcome::Advanced { rtt_sample } => {
                        trace!("ack {} advanced the window", segment.ack);
                        if let Some(sample) = rtt_sample {
                            self.rtt.record_sample(sample);
                        }
                    }
                }
            }
            Ok(segment) => {
                trace!("ignoring non-ack segment seq={}", segment.seq);
            }
            Err(e) => {
                warn!("discarding malformed datagram: {}", e);
                return Ok(false);
            }
        }
        Ok(self.window.after_ack_event())
    }

    async fn handle_timeout(&mut self) -> Result<()> {
        debug!(
            "retransmission timeout after {:?}, {} segments outstanding",
            self.rtt.rto(),
            self.window.in_flight()
        );
        self.window.on_timeout();
        let outstanding: Vec<u64> = self.window.unacked_slots().map(|s| s.first_byte).collect();
        for first_byte in outstanding {
            self.retransmit(first_byte).await?;
        }
        Ok(())
    }

    /// Resends the segment starting at `first_byte`, re-reading its range
    /// from the file and refreshing the slot's send stamp.
    async fn retransmit(&mut self, first_byte: u64) -> Result<()> {
        self.window.mark_retransmitted(first_byte, self.now_micros());
        let (length, fin) = self.segment_bounds(first_byte);
        let seq = self.window.initial_seq() + first_byte as u32;
        let payload = self.read_range(first_byte, length)?;
        let segment = Segment::data(seq, fin, payload);
        debug!("retransmitting seq={} len={} fin={}", seq, length, fin);
        self.transmit(&segment).await;
        Ok(())
    }

    /// Payload length and FIN placement for the segment at `first_byte`.
    fn segment_bounds(&self, first_byte: u64) -> (usize, bool) {
        let remaining = self.file_length.saturating_sub(first_byte);
        let length = remaining.min(MAX_DATA_SIZE as u64) as usize;
        let fin = first_byte + MAX_DATA_SIZE as u64 > self.file_length;
        (length, fin)
    }

    fn read_range(&mut self, first_byte: u64, length: usize) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(first_byte))?;
        self.file.read_exact(&mut self.read_buf[..length])?;
        Ok(Bytes::copy_from_slice(&self.read_buf[..length]))
    }

    /// Send failures are logged and absorbed; the retransmission machinery
    /// recovers whatever the channel loses.
    async fn transmit(&mut self, segment: &Segment) {
        match segment.encode() {
            Ok(wire) => {
                if let Err(e) = self.channel.send(&wire).await {
                    error!("failed to send segment seq={}: {}", segment.seq, e);
                }
            }
            Err(e) => error!("failed to encode segment seq={}: {}", segment.seq, e),
        }
    }

    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}
