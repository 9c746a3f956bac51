/**
 * Background Tasks of Channel Handlers
 *
 * A channel handler that listens on the bus owns a `BackgroundTask`. The
 * task gets a `CloseSignal` and must select on it together with whatever it
 * waits for, so closing the handler unblocks a task parked on an idle
 * topic.
 *
 * ```rust,ignore
 * let task = BackgroundTask::spawn("op relay", move |mut closed| async move {
 *     loop {
 *         tokio::select! {
 *             _ = closed.wait() => break,
 *             message = subscription.next() => { ... }
 *         }
 *     }
 * });
 * task.close().await;
 * ```
 */

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::realtime::Subscription;

/// Close notification observed by a background task
pub struct CloseSignal {
    receiver: watch::Receiver<bool>,
}

impl CloseSignal {
    /// Resolve once the owner closes, or is dropped
    pub async fn wait(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// A spawned task with a close signal
pub struct BackgroundTask {
    name: &'static str,
    close: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CloseSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (close, receiver) = watch::channel(false);
        let handle = tokio::spawn(body(CloseSignal { receiver }));
        Self {
            name,
            close,
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to finish; safe to call again
    pub async fn close(&mut self) {
        self.close.send_replace(true);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(err) = handle.await {
            if err.is_panic() {
                tracing::error!(task = self.name, "background task panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.close.send_replace(true);
    }
}

/// Forward every message of `subscription` to `deliver` until closed
///
/// `deliver` returns `false` to stop the relay, e.g. when the connection is
/// gone.
pub fn relay<F, Fut>(name: &'static str, mut subscription: Subscription, deliver: F) -> BackgroundTask
where
    F: Fn(Arc<str>) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    BackgroundTask::spawn(name, move |mut closed| async move {
        loop {
            tokio::select! {
                biased;
                _ = closed.wait() => break,
                message = subscription.next() => match message {
                    Some(payload) => {
                        if !deliver(payload).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(task = name, topic = %subscription.topic(), "relay stopped");
    })
}
