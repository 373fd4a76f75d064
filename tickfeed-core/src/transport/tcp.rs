//! TCP transport over `std::net::TcpStream`

use super::{RecvOutcome, Transport};
use crate::core::TransportError;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pause between write retries while the peer's window is full
const SEND_RETRY_PAUSE: Duration = Duration::from_micros(200);

/// Non-blocking TCP client connection
///
/// `send` retries a full socket buffer for at most the connect timeout.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    send_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Receive buffer size the kernel actually granted
    pub fn recv_buffer_size(&self) -> Option<usize> {
        let fd = self.stream.as_ref()?.as_raw_fd();
        let mut actual: libc::c_int = 0;
        let mut len = std::mem::size_of_val(&actual) as libc::socklen_t;

        // SAFETY: fd is a live socket owned by `self.stream`; out-params are sized correctly
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &mut actual as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        (rc == 0).then_some(actual as usize)
    }

    fn set_recv_buffer(fd: RawFd, bytes: usize) -> io::Result<()> {
        let val = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);

        // SAFETY: fd is a live socket; `val` outlives the call
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &val as *const _ as *const libc::c_void,
                std::mem::size_of_val(&val) as libc::socklen_t,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &str, timeout: Duration) -> Result<(), TransportError> {
        self.close();

        let addrs = endpoint
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    debug!(%addr, "TCP connection established");
                    self.stream = Some(stream);
                    self.send_timeout = timeout;
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(source) => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }),
            None => Err(TransportError::NoAddress(endpoint.to_string())),
        }
    }

    fn tune_for_latency(&mut self, recv_buffer: usize) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream
            .set_nodelay(true)
            .map_err(|source| TransportError::SocketOption {
                option: "TCP_NODELAY",
                source,
            })?;

        let fd = stream.as_raw_fd();
        Self::set_recv_buffer(fd, recv_buffer).map_err(|source| TransportError::SocketOption {
            option: "SO_RCVBUF",
            source,
        })?;

        match self.recv_buffer_size() {
            // Linux reports twice the requested size
            Some(actual) if actual < recv_buffer => {
                warn!(requested = recv_buffer, actual, "Kernel capped SO_RCVBUF");
            }
            actual => debug!(requested = recv_buffer, ?actual, "Socket tuned for latency"),
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, TransportError> {
        let stream = self.stream()?;
        loop {
            return match stream.read(buf) {
                Ok(0) => Ok(RecvOutcome::Closed),
                Ok(n) => Ok(RecvOutcome::Data(n)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Err(e.into()),
            };
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let timeout = self.send_timeout;
        let stream = self.stream()?;
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::SendTimeout {
                            timeout,
                            written,
                            total: bytes.len(),
                        });
                    }
                    std::thread::sleep(SEND_RETRY_PAUSE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("TCP connection closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
