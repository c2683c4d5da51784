//! Coordinate shutdown across every retry loop, receipt poll, and server in a process.

use futures::{channel::oneshot, future::Shared, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// A one-time broadcast that resolves once the process begins shutting down.
///
/// [Signal] is cheap to clone and every clone resolves together. Long-running
/// operations race their work against a clone so that shutdown aborts them
/// promptly.
///
/// # Example
///
/// ```rust
/// use anchor_ledger::signal::Signaler;
///
/// futures::executor::block_on(async {
///     let (signaler, signal) = Signaler::new();
///     assert!(!signal.is_stopped());
///
///     signaler.signal();
///     signal.clone().await;
///     assert!(signal.is_stopped());
/// });
/// ```
#[derive(Clone)]
pub struct Signal {
    inner: Shared<oneshot::Receiver<()>>,
}

impl Signal {
    /// Returns true if shutdown has already been signaled (or the [Signaler]
    /// was dropped).
    pub fn is_stopped(&self) -> bool {
        self.clone().now_or_never().is_some()
    }
}

impl Future for Signal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the owner of the process is gone, which is
        // treated the same as an explicit stop.
        Pin::new(&mut self.inner).poll(cx).map(|_| ())
    }
}

/// Resolves all [Signal]s created alongside it.
///
/// Dropping the [Signaler] also resolves every [Signal].
pub struct Signaler {
    tx: oneshot::Sender<()>,
}

impl Signaler {
    /// Create a new [Signaler] and the [Signal] it controls.
    pub fn new() -> (Self, Signal) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, Signal { inner: rx.shared() })
    }

    /// Resolve all [Signal]s associated with this [Signaler].
    pub fn signal(self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_macros::test_traced;
    use futures::executor::block_on;

    #[test_traced]
    fn test_signal_resolves_all_clones() {
        let (signaler, signal) = Signaler::new();
        let first = signal.clone();
        let second = signal.clone();
        assert!(!first.is_stopped());

        signaler.signal();
        block_on(async move {
            first.await;
            second.await;
        });
        assert!(signal.is_stopped());
    }

    #[test_traced]
    fn test_dropped_signaler_stops() {
        let (signaler, signal) = Signaler::new();
        drop(signaler);
        assert!(signal.is_stopped());
    }
}
