//! Task execution and combinators.
//!
//! All asynchronous work in this crate runs on one OS thread: the driver
//! [`Executor::block_on`] polls a single root future, and whenever the root
//! suspends it hands control to the reactor until some parked descriptor
//! fires. Concurrency between independent operations comes from [`zip`] and
//! the [`gather!`]/[`gather_void!`] macros, which drive several sub-futures
//! through their suspension points at once.
//!
//! There is no cancellation: `zip` never abandons a side, so every
//! sub-future runs to completion even when a sibling has already failed.
//!
//! # Example
//!
//! ```
//! use rivulet::task::Executor;
//! use rivulet::sleep;
//! use std::time::Duration;
//!
//! let (a, b) = Executor::block_on(async {
//!     rivulet::gather!(
//!         async {
//!             sleep(Duration::from_millis(10)).await?;
//!             Ok::<_, rivulet::Error>(1)
//!         },
//!         async { Ok::<_, rivulet::Error>(2) },
//!     )
//!     .await
//! })
//! .unwrap();
//! assert_eq!((a, b), (1, 2));
//! ```

use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll, Wake, Waker};

use log::trace;

use crate::reactor::Reactor;

/// Wakes the driver loop by flagging the root task runnable again.
struct RootWaker(AtomicBool);

impl Wake for RootWaker {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }
}

pub struct Executor;

impl Executor {
    /// Drive `fut` to completion on the current thread.
    ///
    /// The root future is polled once up front; afterwards the loop blocks
    /// in the reactor until a parked descriptor fires, then re-polls.
    ///
    /// # Panics
    ///
    /// Panics if the root future suspends while nothing is parked in the
    /// reactor: such a task could never be resumed again, which is a
    /// programming error in the caller.
    pub fn block_on<T>(fut: impl Future<Output = T>) -> T {
        // Write failures must surface as Eof through the transport layer,
        // not kill the process.
        static SIGPIPE: Once = Once::new();
        SIGPIPE.call_once(|| unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        });

        let mut fut = pin!(fut);
        let flag = Arc::new(RootWaker(AtomicBool::new(false)));
        let waker = Waker::from(flag.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(value) => return value,
                Poll::Pending => {
                    trace!("executor: root suspended");
                    while !flag.0.swap(false, Ordering::Acquire) {
                        assert!(
                            Reactor::has_tasks(),
                            "block_on: root task is suspended but no descriptor is parked"
                        );
                        Reactor::think();
                    }
                }
            }
        }
    }
}

/// Run two futures concurrently and yield both outputs.
///
/// Both sides start on the first poll and interleave at suspension points.
/// Neither side is ever cancelled: if one completes (or its output carries
/// a failure) the other still runs to the end.
pub fn zip<A: Future, B: Future>(a: A, b: B) -> Zip<A, B> {
    Zip {
        a: Box::pin(a),
        a_out: None,
        b: Box::pin(b),
        b_out: None,
    }
}

pub struct Zip<A: Future, B: Future> {
    a: Pin<Box<A>>,
    a_out: Option<A::Output>,
    b: Pin<Box<B>>,
    b_out: Option<B::Output>,
}

impl<A: Future, B: Future> Future for Zip<A, B> {
    type Output = (A::Output, B::Output);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: the sub-futures stay in their boxes; nothing pinned is
        // moved out of `this`.
        let this = unsafe { self.get_unchecked_mut() };

        if this.a_out.is_none() {
            if let Poll::Ready(v) = this.a.as_mut().poll(cx) {
                this.a_out = Some(v);
            }
        }
        if this.b_out.is_none() {
            if let Poll::Ready(v) = this.b.as_mut().poll(cx) {
                this.b_out = Some(v);
            }
        }

        if this.a_out.is_some() && this.b_out.is_some() {
            let a = this.a_out.take().expect("zip polled after completion");
            let b = this.b_out.take().expect("zip polled after completion");
            Poll::Ready((a, b))
        } else {
            Poll::Pending
        }
    }
}

#[doc(hidden)]
pub trait TupleJoin<H> {
    type Out;
    fn prepend(head: H, tail: Self) -> Self::Out;
}

macro_rules! impl_tuple_join {
    ($($t:ident $v:ident),+) => {
        impl<H, $($t),+> TupleJoin<H> for ($($t,)+) {
            type Out = (H, $($t),+);
            fn prepend(head: H, tail: Self) -> Self::Out {
                let ($($v,)+) = tail;
                (head, $($v),+)
            }
        }
    };
}

impl_tuple_join!(A a);
impl_tuple_join!(A a, B b);
impl_tuple_join!(A a, B b, C c);
impl_tuple_join!(A a, B b, C c, D d);
impl_tuple_join!(A a, B b, C c, D d, E e);
impl_tuple_join!(A a, B b, C c, D d, E e, F f);
impl_tuple_join!(A a, B b, C c, D d, E e, F f, G g);

/// Await several fallible futures concurrently, yielding a tuple of their
/// values, or the failure of the lowest-indexed sub-future that failed.
///
/// Every sub-future runs to completion before the result is produced, even
/// when one of them has already failed.
#[macro_export]
macro_rules! gather {
    ($only:expr $(,)?) => {
        async {
            ::core::result::Result::<_, $crate::Error>::Ok(($only.await?,))
        }
    };
    ($first:expr, $($rest:expr),+ $(,)?) => {
        async {
            let (first, rest) =
                $crate::task::zip($first, $crate::gather!($($rest),+)).await;
            let first = first?;
            let rest = rest?;
            ::core::result::Result::<_, $crate::Error>::Ok(
                $crate::task::TupleJoin::prepend(first, rest),
            )
        }
    };
}

/// Like [`gather!`], discarding the values.
#[macro_export]
macro_rules! gather_void {
    ($($task:expr),+ $(,)?) => {
        async {
            let _ = $crate::gather!($($task),+).await?;
            ::core::result::Result::<_, $crate::Error>::Ok(())
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::timer::sleep;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    #[test]
    fn block_on_returns_value() {
        assert_eq!(Executor::block_on(async { 41 + 1 }), 42);
    }

    #[test]
    #[should_panic(expected = "no descriptor is parked")]
    fn block_on_detects_lost_root() {
        Executor::block_on(std::future::pending::<()>());
    }

    #[test]
    fn gather_keeps_argument_order() {
        let out = Executor::block_on(async {
            crate::gather!(
                async {
                    sleep(Duration::from_millis(30)).await?;
                    Ok::<_, Error>("slow")
                },
                async { Ok::<_, Error>("fast") },
                async {
                    sleep(Duration::from_millis(10)).await?;
                    Ok::<_, Error>("mid")
                },
            )
            .await
        })
        .unwrap();
        assert_eq!(out, ("slow", "fast", "mid"));
    }

    #[test]
    fn gather_runs_subtasks_concurrently() {
        let before = Instant::now();
        Executor::block_on(async {
            crate::gather_void!(
                sleep(Duration::from_millis(100)),
                sleep(Duration::from_millis(100)),
                sleep(Duration::from_millis(100)),
            )
            .await
        })
        .unwrap();
        // Sequential awaiting would need 300ms.
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_millis(95), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    }

    #[test]
    fn gather_surfaces_first_failure_but_finishes_siblings() {
        let finished = Rc::new(Cell::new(false));
        let seen = finished.clone();
        let err = Executor::block_on(async {
            crate::gather!(
                async { Err::<u32, _>(Error::Usage("boom".into())) },
                async {
                    sleep(Duration::from_millis(20)).await?;
                    seen.set(true);
                    Ok::<_, Error>(7)
                },
            )
            .await
        })
        .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(finished.get(), "sibling task was not driven to completion");
    }

    #[test]
    fn gather_failure_order_is_by_index() {
        let err = Executor::block_on(async {
            crate::gather!(
                async {
                    sleep(Duration::from_millis(20)).await?;
                    Err::<u32, _>(Error::Usage("first".into()))
                },
                async { Err::<u32, _>(Error::Usage("second".into())) },
            )
            .await
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "first");
    }

    #[test]
    fn zip_yields_both_sides() {
        let (a, b) = Executor::block_on(zip(async { 1 }, async { "two" }));
        assert_eq!((a, b), (1, "two"));
    }
}
