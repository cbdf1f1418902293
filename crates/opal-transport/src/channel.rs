use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// An unreliable bidirectional datagram channel with a fixed peer. The
/// protocol core only ever talks to this trait, so tests can substitute
/// in-memory transports and the production adapter stays a thin shim.
pub trait DatagramChannel {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Production adapter over a bound UDP socket.
pub struct UdpChannel {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpChannel {
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl DatagramChannel for UdpChannel {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, self.peer).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Zero-length reads are retried until a byte arrives.
        loop {
            let (n, from) = self.socket.recv_from(buf).await?;
            if n == 0 {
                warn!("empty datagram from {}, retrying receive", from);
                continue;
            }
            return Ok(n);
        }
    }
}

/// Inbound impairment mode for experiments on the receiving endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    None,
    Drop,
    Delay,
    DropAndDelay,
}

impl LinkMode {
    /// Maps the CLI control parameter (0..=3).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Drop),
            2 => Some(Self::Delay),
            3 => Some(Self::DropAndDelay),
            _ => None,
        }
    }

    fn drops(self) -> bool {
        matches!(self, Self::Drop | Self::DropAndDelay)
    }

    fn delays(self) -> bool {
        matches!(self, Self::Delay | Self::DropAndDelay)
    }
}

/// Applies the configured drop/delay policy to received segments. The two
/// predicates are evaluated independently, so a segment may be dropped,
/// delayed, both, or neither. In production the mode is `None` and the
/// conditioner is inert.
pub struct LinkConditioner {
    mode: LinkMode,
    prob_percent: u8,
    rng: StdRng,
}

impl LinkConditioner {
    pub fn new(mode: LinkMode, prob_percent: u8) -> Self {
        Self {
            mode,
            prob_percent,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic variant for tests.
    pub fn seeded(mode: LinkMode, prob_percent: u8, seed: u64) -> Self {
        Self {
            mode,
            prob_percent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn should_drop(&mut self) -> bool {
        self.mode.drops() && self.roll()
    }

    /// Sleep to impose before processing, when the delay predicate fires.
    pub fn delay(&mut self) -> Option<Duration> {
        if self.mode.delays() && self.roll() {
            let millis = self.rng.random_range(0..10u64);
            Some(Duration::from_micros(millis * 1000))
        } else {
            None
        }
    }

    fn roll(&mut self) -> bool {
        self.rng.random_range(0..100u32) < self.prob_percent as u32
    }
}
