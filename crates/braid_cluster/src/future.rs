//! Single-assignment result handles.
//!
//! A [`ResultFuture`] settles exactly once, either with a value or with a
//! [`ClusterError`]. Handles created with [`ResultFuture::spawn`] or
//! [`ResultFuture::then`] are driven by the tokio runtime whether or not
//! anyone polls them, so work behind a handle starts as soon as the handle
//! exists. [`ResultFuture::map`] is the lazy counterpart and only runs when
//! the handle is awaited.

use crate::error::{ClusterError, ClusterResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Asynchronous handle to a result produced elsewhere
#[must_use = "a result future does nothing useful unless awaited or waited on"]
pub struct ResultFuture<T> {
    state: State<T>,
}

enum State<T> {
    /// Settled at construction, taken on first poll
    Ready(Option<ClusterResult<T>>),
    /// Settled by a `Promise` or a spawned task
    Pending(oneshot::Receiver<ClusterResult<T>>),
    /// Lazy continuation, runs when polled
    Deferred(BoxFuture<'static, ClusterResult<T>>),
}

// No field is ever pinned structurally.
impl<T> Unpin for ResultFuture<T> {}

impl<T: Send + 'static> ResultFuture<T> {
    /// Handle that is already fulfilled
    pub fn ready(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// Handle that has already failed
    pub fn failed(error: ClusterError) -> Self {
        Self::from_result(Err(error))
    }

    /// Handle that is already settled with `result`
    pub fn from_result(result: ClusterResult<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }

    /// Create an unsettled handle and the promise that settles it
    pub fn channel() -> (Promise<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            Promise { tx },
            Self {
                state: State::Pending(rx),
            },
        )
    }

    /// Run `future` on the current tokio runtime and return its handle
    ///
    /// Settles as [`ClusterError::NoRuntime`] when called outside a runtime,
    /// and as [`ClusterError::Abandoned`] if the task panics.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ClusterResult<T>> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Self::failed(ClusterError::NoRuntime);
        };
        let (promise, result) = Self::channel();
        handle.spawn(async move {
            promise.settle(future.await);
        });
        result
    }

    /// Wrap a future that runs only when the handle is polled
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = ClusterResult<T>> + Send + 'static,
    {
        Self {
            state: State::Deferred(Box::pin(future)),
        }
    }

    /// Attach a continuation that runs as soon as this handle settles
    pub fn then<U, F>(self, continuation: F) -> ResultFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(ClusterResult<T>) -> ClusterResult<U> + Send + 'static,
    {
        ResultFuture::spawn(async move { continuation(self.await) })
    }

    /// Transform the fulfilled value when the handle is awaited
    pub fn map<U, F>(self, f: F) -> ResultFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ClusterResult<U> + Send + 'static,
    {
        ResultFuture::deferred(async move { self.await.and_then(f) })
    }

    /// Whether the handle was settled at construction
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(Some(_)))
    }

    /// Block the current thread until the handle settles
    ///
    /// Only for top-level callers outside the runtime's worker threads;
    /// library code awaits instead.
    pub fn wait(self) -> ClusterResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for ResultFuture<T> {
    type Output = ClusterResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(slot) => Poll::Ready(slot.take().unwrap_or(Err(ClusterError::Abandoned))),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|settled| settled.unwrap_or(Err(ClusterError::Abandoned))),
            State::Deferred(future) => future.as_mut().poll(cx),
        }
    }
}

impl<T> std::fmt::Debug for ResultFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Ready(Some(Ok(_))) => "fulfilled",
            State::Ready(Some(Err(_))) => "failed",
            State::Ready(None) => "taken",
            State::Pending(_) => "pending",
            State::Deferred(_) => "deferred",
        };
        f.debug_struct("ResultFuture").field("state", &state).finish()
    }
}

/// Write side of a [`ResultFuture`]
///
/// Consumed on settlement, so a handle transitions at most once. Dropping
/// an unsettled promise fails the handle with [`ClusterError::Abandoned`].
pub struct Promise<T> {
    tx: oneshot::Sender<ClusterResult<T>>,
}

impl<T> Promise<T> {
    /// Settle the handle with `result`
    pub fn settle(self, result: ClusterResult<T>) {
        // The receiver may already be gone; nobody is interested then.
        let _ = self.tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_and_failed() {
        assert_eq!(ResultFuture::ready(7).await, Ok(7));
        let err = ResultFuture::<u32>::failed(ClusterError::Abandoned).await;
        assert_eq!(err, Err(ClusterError::Abandoned));
    }

    #[tokio::test]
    async fn test_promise_settles_once() {
        let (promise, handle) = ResultFuture::channel();
        assert!(!handle.is_ready());
        promise.settle(Ok("done"));
        assert_eq!(handle.await, Ok("done"));
    }

    #[tokio::test]
    async fn test_dropped_promise_abandons() {
        let (promise, handle) = ResultFuture::<u8>::channel();
        drop(promise);
        assert_eq!(handle.await, Err(ClusterError::Abandoned));
    }

    #[tokio::test]
    async fn test_spawn_runs_without_polling() {
        let (tx, rx) = oneshot::channel();
        let handle = ResultFuture::spawn(async move {
            let _ = tx.send(());
            Ok(1)
        });
        // The task signals before the handle is ever awaited.
        rx.await.unwrap();
        assert_eq!(handle.await, Ok(1));
    }

    #[tokio::test]
    async fn test_panicking_task_is_abandoned() {
        let handle: ResultFuture<u8> = ResultFuture::spawn(async {
            let value: Option<u8> = None;
            Ok(value.expect("action blew up"))
        });
        assert_eq!(handle.await, Err(ClusterError::Abandoned));
    }

    #[tokio::test]
    async fn test_then_sees_errors() {
        let handle = ResultFuture::<u32>::failed(ClusterError::NoRuntime)
            .then(|r| Ok(r.is_err()));
        assert_eq!(handle.await, Ok(true));
    }

    #[tokio::test]
    async fn test_map_short_circuits() {
        let ok = ResultFuture::ready(2).map(|v| Ok(v * 10));
        assert_eq!(ok.await, Ok(20));

        let err = ResultFuture::<u32>::failed(ClusterError::Abandoned).map(|v| Ok(v * 10));
        assert_eq!(err.await, Err(ClusterError::Abandoned));
    }

    #[test]
    fn test_spawn_outside_runtime() {
        let handle = ResultFuture::spawn(async { Ok(1) });
        assert_eq!(handle.wait(), Err(ClusterError::NoRuntime));
    }

    #[test]
    fn test_wait_at_top_level() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let handle = ResultFuture::spawn(async { Ok(41 + 1) });
        assert_eq!(handle.wait(), Ok(42));
    }
}
