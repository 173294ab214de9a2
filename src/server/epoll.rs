use clap::ValueEnum;
use libc::{EPOLLET, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_event};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Readiness notification style for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerMode {
    /// Level-triggered: re-notified while data remains.
    #[value(name = "lt")]
    Level,
    /// Edge-triggered: notified once per arrival, must drain to would-block.
    #[value(name = "et")]
    Edge,
}

/// Interest to arm on a client descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Owned epoll instance.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Registers `fd` for reads. Client sockets are registered one-shot so
    /// that at most one thread is woken per readiness.
    pub fn add(&self, fd: RawFd, one_shot: bool, mode: TriggerMode) -> io::Result<()> {
        let mut flags = EPOLLIN | EPOLLRDHUP;
        if one_shot {
            flags |= EPOLLONESHOT;
        }
        self.ctl(libc::EPOLL_CTL_ADD, fd, flags | mode_flags(mode))
    }

    /// Re-arms a one-shot client descriptor.
    pub fn modify(&self, fd: RawFd, interest: Interest, mode: TriggerMode) -> io::Result<()> {
        let event = match interest {
            Interest::Read => EPOLLIN,
            Interest::Write => EPOLLOUT,
        };
        let flags = event | EPOLLONESHOT | EPOLLRDHUP | mode_flags(mode);
        self.ctl(libc::EPOLL_CTL_MOD, fd, flags)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(
                self.fd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits for events; the descriptor of each ready socket is in `u64`.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> io::Result<usize> {
        let max = i32::try_from(events.len()).unwrap_or(i32::MAX);
        let ready = unsafe {
            libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), max, timeout_ms)
        };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ready as usize)
    }

    fn ctl(&self, op: i32, fd: RawFd, flags: i32) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn mode_flags(mode: TriggerMode) -> i32 {
    match mode {
        TriggerMode::Level => 0,
        TriggerMode::Edge => EPOLLET,
    }
}

/// Empty event buffer for [`Epoll::wait`].
pub fn event_buffer(len: usize) -> Vec<epoll_event> {
    vec![epoll_event { events: 0, u64: 0 }; len]
}

/// Enables SO_LINGER with a one second timeout so that close flushes
/// pending data.
pub fn set_linger(fd: RawFd) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 1,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
