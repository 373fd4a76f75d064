//! epoll-backed readiness notification (Linux)

#![cfg(target_os = "linux")]

use super::Readiness;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::debug;

const MAX_EVENTS: usize = 8;

const READ_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLRDHUP) as u32;
const READY_MASK: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Edge-triggered epoll instance
pub struct EpollPoller {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl EpollPoller {
    pub fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        })
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "epoll instance is closed")
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: u32) -> io::Result<()> {
        if self.epfd < 0 {
            return Err(Self::closed_error());
        }
        let mut event = libc::epoll_event {
            events: interest,
            u64: fd as u64,
        };
        // SAFETY: epfd is open; `event` outlives the call
        cvt(unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) }).map(drop)
    }
}

impl Readiness for EpollPoller {
    fn register(&mut self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, READ_INTEREST) {
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                self.ctl(libc::EPOLL_CTL_MOD, fd, READ_INTEREST)
            }
            other => other,
        }
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, 0) {
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => Ok(()),
            other => other,
        }
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        if self.epfd < 0 {
            return Err(Self::closed_error());
        }
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: `events` holds MAX_EVENTS initialized entries
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };

        match cvt(rc) {
            Ok(n) => Ok(self.events[..n as usize]
                .iter()
                .filter(|ev| ev.events & READY_MASK != 0)
                .count()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        if self.epfd >= 0 {
            // SAFETY: epfd is owned and closed exactly once
            unsafe { libc::close(self.epfd) };
            self.epfd = -1;
            debug!("epoll instance closed");
        }
    }

    fn is_open(&self) -> bool {
        self.epfd >= 0
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        self.close();
    }
}
