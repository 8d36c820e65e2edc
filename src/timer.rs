//! Timer futures backed by
//! [timerfd](https://man7.org/linux/man-pages/man2/timerfd_create.2.html).
//!
//! There are no timeouts anywhere else in this crate; a timer competes for
//! readiness like any other descriptor, so user code composes deadlines by
//! gathering a [`sleep`] next to the operation it bounds.
//!
//! # Example
//!
//! ```
//! use rivulet::task::Executor;
//! use std::time::{Duration, Instant};
//!
//! let before = Instant::now();
//! Executor::block_on(rivulet::sleep(Duration::from_millis(50))).unwrap();
//! assert!(before.elapsed() >= Duration::from_millis(50));
//! ```

use std::os::fd::AsRawFd;
use std::time::Duration;

use crate::error::Result;
use crate::reactor::Reactor;
use crate::sys;

/// Suspend the current task for at least `d`.
///
/// A zero duration completes immediately without touching the reactor.
pub async fn sleep(d: Duration) -> Result<()> {
    if d.is_zero() {
        return Ok(());
    }
    let fd = sys::timerfd(d)?;
    Reactor::wait_read(fd.as_raw_fd()).await
}
