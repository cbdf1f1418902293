use crate::channel::{DatagramChannel, LinkConditioner};
use crate::error::{Result, TransportError};
use crate::receive_window::{Reassembly, ReceiveWindow};
use crate::segment::{Segment, FILE_NOT_FOUND, MAX_PACKET_SIZE};
use log::{debug, error, info, trace, warn};
use std::io::Write;
use tokio::time::sleep;

/// Requests one file and reassembles it into the output writer.
///
/// The loop is single-threaded: receive a datagram, optionally impair it
/// through the link conditioner, feed it to the reassembly window, write
/// whatever became contiguous, acknowledge, and stop once FIN arrives with
/// nothing missing below it.
pub struct FileReceiver<C, W> {
    channel: C,
    output: W,
    window: ReceiveWindow,
    conditioner: LinkConditioner,
}

impl<C, W> FileReceiver<C, W>
where
    C: DatagramChannel,
    W: Write,
{
    pub fn new(channel: C, output: W, rwnd: u64, conditioner: LinkConditioner) -> Self {
        Self {
            channel,
            output,
            window: ReceiveWindow::new(rwnd),
            conditioner,
        }
    }

    /// Harness constructor: the initial sequence number is agreed out of
    /// band instead of learned from the first arrival.
    pub fn with_initial_seq(
        channel: C,
        output: W,
        rwnd: u64,
        conditioner: LinkConditioner,
        initial_seq: u32,
    ) -> Self {
        Self {
            channel,
            output,
            window: ReceiveWindow::with_initial_seq(rwnd, initial_seq),
            conditioner,
        }
    }

    pub async fn fetch(&mut self, file_name: &str) -> Result<()> {
        if file_name.len() > MAX_PACKET_SIZE {
            return Err(TransportError::RequestTooLong);
        }
        info!("requesting {}", file_name);
        self.channel.send(file_name.as_bytes()).await?;

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let n = match self.channel.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("receive error: {}, retrying", e);
                    continue;
                }
            };
            let datagram = &buf[..n];

            if datagram.starts_with(FILE_NOT_FOUND) {
                error!("server has no file named {}", file_name);
                return Err(TransportError::FileNotFound);
            }

            let segment = match Segment::decode(datagram) {
                Ok(segment) => segment,
                Err(e) => {
                    warn!("discarding malformed datagram: {}", e);
                    continue;
                }
            };
            trace!(
                "segment seq={} len={} fin={}",
                segment.seq,
                segment.payload.len(),
                segment.fin_flag
            );

            // Simulated channel policy: both predicates roll independently.
            if self.conditioner.should_drop() {
                debug!("conditioner dropping segment seq={}", segment.seq);
                continue;
            }
            if let Some(delay) = self.conditioner.delay() {
                debug!(
                    "conditioner delaying segment seq={} by {:?}",
                    segment.seq, delay
                );
                sleep(delay).await;
            }

            match self.window.accept(segment) {
                Reassembly::Stale { ack } => {
                    trace!("stale segment, re-acknowledging {}", ack);
                    self.send_ack(ack).await;
                }
                Reassembly::OutOfWindow => {
                    // Dropped without acknowledgment; the sender's timeout
                    // will bring it back once the window has moved.
                }
                Reassembly::Stored {
                    drained,
                    ack,
                    complete,
                } => {
                    let mut written = true;
                    for payload in &drained {
                        if let Err(e) = self.output.write_all(payload) {
                            error!("failed to write to the output file: {}", e);
                            written = false;
                            break;
                        }
                    }
                    // A failed write skips this acknowledgment round; the
                    // sender retransmits and the next round retries nothing,
                    // since the window has already advanced.
                    if written {
                        self.send_ack(ack).await;
                    }
                    if complete {
                        info!("final segment received, transfer complete");
                        break;
                    }
                }
            }
        }

        self.output.flush()?;
        Ok(())
    }

    /// Acknowledgments are fire-and-forget: a lost one is recovered by the
    /// next data arrival or the sender's timeout.
    async fn send_ack(&mut self, ack: u32) {
        let segment = Segment::ack(ack);
        match segment.encode() {
            Ok(wire) => {
                trace!("acknowledging {}", ack);
                if let Err(e) = self.channel.send(&wire).await {
                    warn!("failed to send ack {}: {}", ack, e);
                }
            }
            Err(e) => warn!("failed to encode ack {}: {}", ack, e),
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}
