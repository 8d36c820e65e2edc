//! Thin non-blocking syscall façade.
//!
//! Every function here expects (and produces) non-blocking descriptors and
//! maps OS results onto the crate's error taxonomy: would-block is reported
//! as zero bytes rather than as a failure, a zero-byte read and `EPIPE` both
//! become [`Error::Eof`], and anything else surfaces as [`Error::Sys`] with
//! the name of the failing call.

use std::ffi::CString;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{Error, Result};

/// Bytes read, `Ok(0)` on would-block, [`Error::Eof`] once the stream ends.
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    match n {
        -1 => match Errno::last() {
            Errno::EAGAIN => Ok(0),
            errno => Err(Error::Sys { call: "read()", errno }),
        },
        0 => Err(Error::Eof),
        n => Ok(n as usize),
    }
}

/// Bytes written, `Ok(0)` on would-block, [`Error::Eof`] on a broken pipe.
pub(crate) fn write(fd: RawFd, data: &[u8]) -> Result<usize> {
    let n = unsafe { libc::write(fd, data.as_ptr() as *const _, data.len()) };
    if n == -1 {
        match Errno::last() {
            Errno::EAGAIN => Ok(0),
            Errno::EPIPE => Err(Error::Eof),
            errno => Err(Error::Sys { call: "write()", errno }),
        }
    } else {
        Ok(n as usize)
    }
}

/// Bytes queued on the descriptor's read side (`FIONREAD`).
pub(crate) fn available_bytes(fd: RawFd) -> Result<usize> {
    let mut n: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n) } == -1 {
        return Err(Error::last_sys("ioctl()"));
    }
    Ok(n as usize)
}

/// Zero-timeout readiness probe on a single descriptor.
pub(crate) fn poll_probe(fd: RawFd, events: PollFlags) -> Result<bool> {
    // SAFETY: the descriptor is owned by the calling frame for the duration
    // of the probe.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, events)];
    loop {
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) => return Ok(n > 0),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(Error::Sys { call: "poll()", errno }),
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(Error::last_sys("fcntl()"));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(Error::last_sys("fcntl()"));
    }
    Ok(())
}

/// A fresh non-blocking `AF_INET` socket.
pub(crate) fn socket(ty: libc::c_int, protocol: libc::c_int) -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, ty | libc::SOCK_NONBLOCK, protocol) };
    if fd == -1 {
        return Err(Error::last_sys("socket()"));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// A fresh non-blocking descriptor for `path`.
pub(crate) fn open(path: &str, flags: libc::c_int) -> Result<OwnedFd> {
    let path = CString::new(path)
        .map_err(|_| Error::Usage(format!("path contains a NUL byte: {path:?}")))?;
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_NONBLOCK, 0o666) };
    if fd == -1 {
        return Err(Error::last_sys("open()"));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn sockaddr_v4(ip: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = u32::from(ip).to_be();
    addr
}

/// Start connecting. `Ok(true)` means connected already, `Ok(false)` means
/// the connection is in progress and the socket will become writable when
/// it resolves.
pub(crate) fn connect(fd: RawFd, ip: Ipv4Addr, port: u16) -> Result<bool> {
    let addr = sockaddr_v4(ip, port);
    let res = unsafe {
        libc::connect(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if res == 0 {
        return Ok(true);
    }
    match Errno::last() {
        Errno::EINPROGRESS => Ok(false),
        errno => Err(Error::Sys { call: "connect()", errno }),
    }
}

/// The pending error on a socket (`SO_ERROR`), 0 when none.
pub(crate) fn so_error(fd: RawFd) -> Result<i32> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };
    if res == -1 {
        return Err(Error::last_sys("getsockopt()"));
    }
    Ok(err)
}

/// Toggle `TCP_CORK` on a connected TCP socket.
pub(crate) fn set_cork(fd: RawFd, corked: bool) -> Result<()> {
    let val: libc::c_int = corked.into();
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CORK,
            &val as *const _ as *const _,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(Error::last_sys("setsockopt()"));
    }
    Ok(())
}

/// A non-blocking listening TCP socket bound to `INADDR_ANY:port`.
pub(crate) fn bind_listen(port: u16) -> Result<OwnedFd> {
    let fd = socket(libc::SOCK_STREAM, libc::IPPROTO_TCP)?;
    let addr = sockaddr_v4(Ipv4Addr::UNSPECIFIED, port);
    let res = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(Error::last_sys("bind()"));
    }
    if unsafe { libc::listen(fd.as_raw_fd(), 256) } == -1 {
        return Err(Error::last_sys("listen()"));
    }
    Ok(fd)
}

/// Accept one pending connection; `Ok(None)` when none is queued.
pub(crate) fn accept(fd: RawFd) -> Result<Option<OwnedFd>> {
    let client = unsafe { libc::accept(fd, ptr::null_mut(), ptr::null_mut()) };
    if client == -1 {
        return match Errno::last() {
            Errno::EAGAIN => Ok(None),
            errno => Err(Error::Sys { call: "accept()", errno }),
        };
    }
    let client = unsafe { OwnedFd::from_raw_fd(client) };
    set_nonblocking(client.as_raw_fd())?;
    Ok(Some(client))
}

/// The port a bound socket ended up on.
pub(crate) fn local_port(fd: RawFd) -> Result<u16> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let res = unsafe { libc::getsockname(fd, &mut addr as *mut _ as *mut _, &mut len) };
    if res == -1 {
        return Err(Error::last_sys("getsockname()"));
    }
    Ok(u16::from_be(addr.sin_port))
}

/// A one-shot non-blocking timer descriptor armed `d` from now.
pub(crate) fn timerfd(d: Duration) -> Result<OwnedFd> {
    let fd = unsafe {
        libc::timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
        )
    };
    if fd == -1 {
        return Err(Error::last_sys("timerfd_create()"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let mut tspec: libc::itimerspec = unsafe { mem::zeroed() };
    tspec.it_value.tv_sec = d.as_secs() as _;
    tspec.it_value.tv_nsec = d.subsec_nanos() as _;
    let res =
        unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &tspec, ptr::null_mut()) };
    if res == -1 {
        return Err(Error::last_sys("timerfd_settime()"));
    }
    Ok(fd)
}
