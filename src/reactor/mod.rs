//! The readiness reactor.
//!
//! A thread-local multiplexer over non-blocking file descriptors built on
//! `poll(2)`. Futures that need a descriptor to become readable or writable
//! park themselves here via [`Reactor::wait_read`] / [`Reactor::wait_write`];
//! the driver loop calls [`Reactor::think`], which blocks in one `poll(2)`
//! call and wakes exactly the wakers whose descriptors reported events.
//!
//! The reactor never owns a descriptor: the owning handles live inside the
//! suspended frames, which stay alive for as long as their suspension
//! records are parked (a dropped wait future deregisters itself first).

use std::cell::RefCell;
use std::future::Future;
use std::os::fd::{BorrowedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use log::trace;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use slab::Slab;

use crate::error::Result;
use crate::sys;

struct Suspension {
    fd: RawFd,
    events: PollFlags,
    waker: Waker,
    /// Distinguishes this registration from a later occupant of a reused
    /// slab slot.
    token: u64,
}

pub(crate) struct Reactor {
    parked: Slab<Suspension>,
    next_token: u64,
}

thread_local! {
    static REACTOR: RefCell<Reactor> = RefCell::new(Reactor {
        parked: Slab::new(),
        next_token: 0,
    });
}

impl Reactor {
    fn with<R>(f: impl FnOnce(&mut Reactor) -> R) -> R {
        REACTOR.with(|r| f(&mut r.borrow_mut()))
    }

    /// A future that completes when `fd` is readable.
    pub(crate) fn wait_read(fd: RawFd) -> WaitReadiness {
        WaitReadiness::new(fd, PollFlags::POLLIN)
    }

    /// A future that completes when `fd` is writable.
    pub(crate) fn wait_write(fd: RawFd) -> WaitReadiness {
        WaitReadiness::new(fd, PollFlags::POLLOUT)
    }

    /// Whether any suspension records are parked.
    pub(crate) fn has_tasks() -> bool {
        Self::with(|r| !r.parked.is_empty())
    }

    /// Block until at least one parked descriptor fires, then wake the
    /// wakers of every fired entry and drop their suspension records.
    pub(crate) fn think() {
        let ready = Self::with(|r| {
            if r.parked.is_empty() {
                return Vec::new();
            }

            let mut keys = Vec::with_capacity(r.parked.len());
            let mut pfds = Vec::with_capacity(r.parked.len());
            for (key, s) in &r.parked {
                keys.push(key);
                // SAFETY: every parked descriptor is owned by a suspended
                // frame that cannot be dropped without deregistering first.
                let fd = unsafe { BorrowedFd::borrow_raw(s.fd) };
                pfds.push(PollFd::new(fd, s.events));
            }

            loop {
                match poll(&mut pfds, PollTimeout::NONE) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(errno) => panic!("poll() failed: {errno}"),
                }
            }

            let mut woken = Vec::new();
            for (i, pfd) in pfds.iter().enumerate() {
                if pfd.revents().is_some_and(|ev| !ev.is_empty()) {
                    if let Some(s) = r.parked.try_remove(keys[i]) {
                        woken.push(s.waker);
                    }
                }
            }
            trace!(
                "reactor: {} fired, {} still parked",
                woken.len(),
                r.parked.len()
            );
            woken
        });

        for waker in ready {
            waker.wake();
        }
    }

    fn register(&mut self, fd: RawFd, events: PollFlags, waker: Waker) -> (usize, u64) {
        let token = self.next_token;
        self.next_token += 1;
        let key = self.parked.insert(Suspension { fd, events, waker, token });
        trace!("reactor: parked fd {fd} for {events:?}");
        (key, token)
    }

    /// Refresh the waker of a still-parked registration. Returns false if
    /// the slot no longer holds this registration (it fired, or the slot
    /// was reused).
    fn update_waker(&mut self, key: usize, token: u64, waker: &Waker) -> bool {
        match self.parked.get_mut(key) {
            Some(s) if s.token == token => {
                if !s.waker.will_wake(waker) {
                    s.waker = waker.clone();
                }
                true
            }
            _ => false,
        }
    }

    fn deregister(&mut self, key: usize, token: u64) {
        if self.parked.get(key).is_some_and(|s| s.token == token) {
            self.parked.remove(key);
        }
    }
}

/// A single suspension point: readiness of one descriptor for one event
/// mask. Probes with a zero timeout before parking, so an already-ready
/// descriptor never suspends.
pub(crate) struct WaitReadiness {
    fd: RawFd,
    events: PollFlags,
    slot: Option<(usize, u64)>,
}

impl WaitReadiness {
    fn new(fd: RawFd, events: PollFlags) -> Self {
        Self { fd, events, slot: None }
    }
}

impl Future for WaitReadiness {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match sys::poll_probe(this.fd, this.events) {
            Ok(true) => {
                if let Some((key, token)) = this.slot.take() {
                    Reactor::with(|r| r.deregister(key, token));
                }
                Poll::Ready(Ok(()))
            }
            Ok(false) => {
                let registered = match this.slot {
                    Some((key, token)) => {
                        Reactor::with(|r| r.update_waker(key, token, cx.waker()))
                    }
                    None => false,
                };
                if !registered {
                    this.slot = Some(Reactor::with(|r| {
                        r.register(this.fd, this.events, cx.waker().clone())
                    }));
                }
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for WaitReadiness {
    fn drop(&mut self) {
        if let Some((key, token)) = self.slot.take() {
            Reactor::with(|r| r.deregister(key, token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Executor;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        let res = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) };
        assert_eq!(res, 0, "pipe2() failed");
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn ready_descriptor_completes_without_parking() {
        let (r, w) = pipe();
        crate::sys::write(w.as_raw_fd(), b"x").unwrap();
        Executor::block_on(async move {
            Reactor::wait_read(r.as_raw_fd()).await.unwrap();
        });
        assert!(!Reactor::has_tasks());
    }

    #[test]
    fn parked_reader_wakes_when_peer_writes() {
        let (r, w) = pipe();
        let read = Executor::block_on(async move {
            let (_, read) = crate::task::zip(
                async {
                    crate::timer::sleep(std::time::Duration::from_millis(20)).await?;
                    crate::sys::write(w.as_raw_fd(), b"ping")
                },
                async {
                    Reactor::wait_read(r.as_raw_fd()).await?;
                    let mut buf = [0u8; 8];
                    crate::sys::read(r.as_raw_fd(), &mut buf)
                },
            )
            .await;
            read.unwrap()
        });
        assert_eq!(read, 4);
        assert!(!Reactor::has_tasks());
    }

    #[test]
    fn dropped_wait_future_deregisters() {
        let (r, _w) = pipe();
        Executor::block_on(async move {
            let mut wait = Box::pin(Reactor::wait_read(r.as_raw_fd()));
            // Park it once, then drop it before it can ever fire.
            std::future::poll_fn(|cx| {
                assert!(wait.as_mut().poll(cx).is_pending());
                std::task::Poll::Ready(())
            })
            .await;
            assert!(Reactor::has_tasks());
            drop(wait);
            assert!(!Reactor::has_tasks());
        });
    }
}
