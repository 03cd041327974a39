//! Result handles
//!
//! Commands, attribute transactions, and GATT procedures finish some time after the call that
//! started them. The call returns a [`Pending`] which is a future of the operation's outcome. The
//! host keeps the matching [`Resolver`] and resolves it exactly once, when the response arrives,
//! the operation times out, or the connection closes.

use crate::Error;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::channel::oneshot;

/// The eventual outcome of an operation
///
/// `Pending` can be awaited or polled without a task through [`try_take`](Pending::try_take).
#[must_use = "the outcome of the operation is only available through the Pending"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<T, Error>>,
}

pub(crate) struct Resolver<T> {
    sender: oneshot::Sender<Result<T, Error>>,
}

pub(crate) fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();

    (Resolver { sender }, Pending { receiver })
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, outcome: Result<T, Error>) {
        // The caller is allowed to drop the Pending when it is not interested in the outcome
        if self.sender.send(outcome).is_err() {
            log::trace!("outcome dropped, the pending handle no longer exists");
        }
    }
}

impl<T> Pending<T> {
    /// Take the outcome if the operation has finished
    ///
    /// This returns `None` while the operation is still in progress.
    pub fn try_take(&mut self) -> Option<Result<T, Error>> {
        match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Some(Err(Error::Shutdown)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Shutdown)),
        }
    }
}

impl<T> core::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str("Pending")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_once() {
        let (resolver, mut pending) = pending::<u8>();

        assert!(pending.try_take().is_none());

        resolver.resolve(Ok(4));

        assert_eq!(Some(Ok(4)), pending.try_take());
    }

    #[test]
    fn dropped_resolver_is_shutdown() {
        let (resolver, pending) = pending::<()>();

        drop(resolver);

        assert_eq!(Err(Error::Shutdown), futures::executor::block_on(pending));
    }
}
