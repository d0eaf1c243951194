#![forbid(unsafe_code)]

//! A future that suspends exactly once.
//!
//! Used to interleave two invocations on a single-threaded executor.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Return `Pending` once, then complete.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}
