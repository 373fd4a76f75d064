//! Byte transport and readiness notification
//!
//! The feed handler is generic over both seams so tests can drive it with
//! in-memory doubles:
//!
//! - [`Transport`]: a non-blocking byte stream (`TcpTransport` in production)
//! - [`Readiness`]: edge-triggered readiness notification (`EpollPoller`)
//!
//! Under edge-triggered delivery a notification only says "something
//! changed"; the consumer must call `recv` until it reports
//! [`RecvOutcome::WouldBlock`] or it may never be woken again.

pub mod poller;
pub mod tcp;

use crate::core::TransportError;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub use poller::EpollPoller;
pub use tcp::TcpTransport;

/// Result of one non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// `n > 0` bytes were written to the front of the buffer
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// The peer closed the stream
    Closed,
}

/// A non-blocking byte stream
pub trait Transport {
    /// Establish a connection to `endpoint` (`host:port`)
    ///
    /// Leaves the transport in non-blocking mode on success.
    fn connect(&mut self, endpoint: &str, timeout: Duration) -> Result<(), TransportError>;

    /// Disable send coalescing and widen the kernel receive buffer
    fn tune_for_latency(&mut self, recv_buffer: usize) -> Result<(), TransportError>;

    /// Read what is available into `buf`
    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, TransportError>;

    /// Write all of `bytes`
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Descriptor to register for readiness, if connected
    fn raw_fd(&self) -> Option<RawFd>;

    /// Release the connection; a no-op when already closed
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Edge-triggered readiness notification over registered descriptors
pub trait Readiness {
    /// Watch `fd` for readability and peer hang-up, edge-triggered
    fn register(&mut self, fd: RawFd) -> io::Result<()>;

    /// Stop watching `fd`; unknown descriptors are not an error
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Block up to `timeout`; returns the number of ready descriptors
    ///
    /// Interruption by a signal counts as a timeout.
    fn wait(&mut self, timeout: Duration) -> io::Result<usize>;

    /// Release the notification handle; a no-op when already closed
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
