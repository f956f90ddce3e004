use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::abort::AbortSignal;
use crate::error::StreamError;

type ErrorEventFn<T> = dyn Fn(&StreamError) -> T + Send + Sync;
type Terminal<R> = Option<Result<R, StreamError>>;

struct EventStreamInner<T, R> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<T>>,
    /// First settlement, held until the buffer has been drained.
    pending: Mutex<Terminal<R>>,
    /// The settlement as observed by `result`.
    terminal: watch::Sender<Terminal<R>>,
    signal: Option<AbortSignal>,
    error_event: Box<ErrorEventFn<T>>,
}

/// Ordered, cancellable event channel ending in one terminal result.
///
/// Clones share the same buffer: whichever handle produces calls `emit` and
/// `complete`, consumers call `next` and `result`. The first settlement wins
/// (`complete`, `fail`, or the abort signal firing); everything after it is
/// ignored. A failed or cancelled stream delivers exactly one error event,
/// built by `error_event`, after the events already emitted. `result` resolves
/// only once a consumer has read the sequence to its end.
pub struct EventStream<T, R> {
    inner: Arc<EventStreamInner<T, R>>,
}

impl<T, R> Clone for EventStream<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> EventStream<T, R>
where
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new<F>(signal: Option<AbortSignal>, error_event: F) -> Self
    where
        F: Fn(&StreamError) -> T + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (terminal, _) = watch::channel(None);
        Self {
            inner: Arc::new(EventStreamInner {
                sender: Mutex::new(Some(sender)),
                receiver: AsyncMutex::new(receiver),
                pending: Mutex::new(None),
                terminal,
                signal,
                error_event: Box::new(error_event),
            }),
        }
    }

    /// Buffers one event. Never suspends.
    pub fn emit(&self, event: T) {
        if self.abort_requested() {
            self.fail(StreamError::Cancelled);
            return;
        }
        if let Some(sender) = self.lock_sender().as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Resolves the terminal result and ends the sequence.
    pub fn complete(&self, value: R) {
        if self.abort_requested() {
            self.fail(StreamError::Cancelled);
            return;
        }
        let Some(sender) = self.lock_sender().take() else {
            return;
        };
        // Settle before the sender drops so the end of the sequence always
        // finds a result to publish.
        self.settle(Ok(value));
        drop(sender);
    }

    /// Delivers one error event, ends the sequence, and rejects the result.
    pub fn fail(&self, error: StreamError) {
        let Some(sender) = self.lock_sender().take() else {
            return;
        };
        let _ = sender.send((self.inner.error_event)(&error));
        self.settle(Err(error));
        drop(sender);
    }

    /// True once `complete` or `fail` has taken effect, even if the result
    /// is not yet observable.
    pub fn is_settled(&self) -> bool {
        lock(&self.inner.pending).is_some()
    }

    /// Next event in emission order, or `None` once the sequence has ended.
    /// Reaching the end publishes the terminal result.
    pub async fn next(&self) -> Option<T> {
        let mut receiver = self.inner.receiver.lock().await;
        if self.abort_requested() {
            self.fail(StreamError::Cancelled);
        }

        let event = match self.inner.signal.as_ref() {
            None => receiver.recv().await,
            Some(signal) => {
                tokio::select! {
                    biased;
                    event = receiver.recv() => event,
                    _ = signal.cancelled() => {
                        self.fail(StreamError::Cancelled);
                        receiver.recv().await
                    }
                }
            }
        };
        if event.is_none() {
            self.publish();
        }
        event
    }

    /// Resolves after the stream has settled and every event before the
    /// settlement has been taken by `next`.
    pub async fn result(&self) -> Result<R, StreamError> {
        let mut terminal = self.inner.terminal.subscribe();
        if let Some(signal) = self.inner.signal.as_ref() {
            tokio::select! {
                published = wait_published(&mut terminal) => return published,
                _ = signal.cancelled() => self.fail(StreamError::Cancelled),
            }
        }
        wait_published(&mut terminal).await
    }

    fn abort_requested(&self) -> bool {
        self.inner
            .signal
            .as_ref()
            .is_some_and(AbortSignal::is_aborted)
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<T>>> {
        lock(&self.inner.sender)
    }

    fn settle(&self, result: Result<R, StreamError>) {
        let mut pending = lock(&self.inner.pending);
        if pending.is_none() {
            *pending = Some(result);
        }
    }

    fn publish(&self) {
        let Some(result) = lock(&self.inner.pending).clone() else {
            return;
        };
        self.inner.terminal.send_if_modified(|terminal| {
            if terminal.is_some() {
                return false;
            }
            *terminal = Some(result);
            true
        });
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_published<R: Clone>(
    terminal: &mut watch::Receiver<Terminal<R>>,
) -> Result<R, StreamError> {
    loop {
        let current = terminal.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if terminal.changed().await.is_err() {
            return Err(StreamError::Cancelled);
        }
    }
}
