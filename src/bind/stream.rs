use std::sync::Arc;

use alloy::rpc::types::Log;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::backend::{ContractFilterer, LogQuery, LogWatch};
use crate::error::{BindError, TransportError};

/// Default number of records buffered between the delivery task and the
/// consumer.
pub const DEFAULT_BUFFER: usize = 128;

/// Cancellation handle of one event stream. Clones share the same state.
#[derive(Clone, Debug)]
pub struct Subscription {
    closed: Arc<watch::Sender<bool>>,
}

impl Subscription {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }

    /// Stop delivery and release the transport subscription. Idempotent and
    /// non-blocking; returns true only for the call that actually closed it.
    pub fn unsubscribe(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            debug!("log subscription closed");
        }
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Resolves once the subscription is closed or every handle is gone.
pub(crate) async fn cancelled(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// What the consumer side of a stream observed next.
#[derive(Debug)]
pub(crate) enum Signal {
    Record(Log),
    BacklogExhausted,
    Ended,
    Closed,
    Failed(BindError),
}

/// Consumer side of an event stream: buffered records, the one-shot
/// backlog-exhaustion marker and the terminal error source.
#[derive(Debug)]
pub struct LogStream {
    logs: mpsc::Receiver<Log>,
    backlog: Option<oneshot::Receiver<()>>,
    errors: Option<oneshot::Receiver<BindError>>,
    closed: watch::Receiver<bool>,
    subscription: Subscription,
    held: Option<Signal>,
}

impl LogStream {
    /// Bounded historical query. The query itself runs on the delivery task
    /// so the caller gets the stream back immediately.
    ///
    /// The task is spawned onto the current tokio runtime; calling this
    /// outside one panics.
    pub fn historical(
        filterer: Arc<dyn ContractFilterer>,
        query: LogQuery,
        buffer: usize,
    ) -> Self {
        let (log_tx, log_rx) = mpsc::channel(buffer.max(1));
        let (backlog_tx, backlog_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        let subscription = Subscription::new();
        let mut closed = subscription.closed_signal();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled(&mut closed) => {}
                delivered = forward_backlog(filterer.as_ref(), &query, &log_tx) => match delivered {
                    Ok(count) => {
                        debug!(count, "historical log query delivered");
                        let _ = backlog_tx.send(());
                    }
                    Err(e) => {
                        let _ = err_tx.send(e);
                    }
                },
            }
        });

        Self::from_parts(log_rx, Some(backlog_rx), err_rx, subscription)
    }

    /// Live watch, optionally preceded by the backlog matching `backlog`.
    ///
    /// The live source is opened before the backlog query runs, so records
    /// emitted in between are buffered by the transport rather than lost.
    pub async fn live(
        filterer: Arc<dyn ContractFilterer>,
        live_query: LogQuery,
        backlog: Option<LogQuery>,
        buffer: usize,
    ) -> Result<Self, BindError> {
        let mut source = filterer
            .watch_logs(&live_query)
            .await
            .map_err(BindError::RemoteCall)?;

        let (log_tx, log_rx) = mpsc::channel(buffer.max(1));
        let (backlog_tx, backlog_rx) = match backlog {
            Some(_) => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let (err_tx, err_rx) = oneshot::channel();
        let subscription = Subscription::new();
        let mut closed = subscription.closed_signal();

        tokio::spawn(async move {
            if let (Some(query), Some(backlog_tx)) = (backlog, backlog_tx) {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut closed) => return,
                    delivered = forward_backlog(filterer.as_ref(), &query, &log_tx) => match delivered {
                        Ok(count) => {
                            debug!(count, "log backlog delivered, switching to live records");
                            let _ = backlog_tx.send(());
                        }
                        Err(e) => {
                            let _ = err_tx.send(e);
                            return;
                        }
                    },
                }
            }

            if let Err(e) = forward_live(&mut source, &log_tx, &mut closed).await {
                let _ = err_tx.send(e);
            }
            // Dropping `source` here releases the transport subscription.
        });

        Ok(Self::from_parts(log_rx, backlog_rx, err_rx, subscription))
    }

    pub(crate) fn from_parts(
        logs: mpsc::Receiver<Log>,
        backlog: Option<oneshot::Receiver<()>>,
        errors: oneshot::Receiver<BindError>,
        subscription: Subscription,
    ) -> Self {
        Self {
            logs,
            backlog,
            errors: Some(errors),
            closed: subscription.closed_signal(),
            subscription,
            held: None,
        }
    }

    pub fn has_backlog(&self) -> bool {
        self.backlog.is_some()
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription.clone()
    }

    pub fn close(&self) -> bool {
        self.subscription.unsubscribe()
    }

    /// Wait for the next thing that happens on the stream.
    ///
    /// Closing wins over everything, then buffered records, then the backlog
    /// marker, then errors. Records therefore never get overtaken by the
    /// signals that were sent after them.
    pub(crate) async fn next_signal(&mut self) -> Signal {
        if self.subscription.is_closed() {
            return Signal::Closed;
        }

        if let Some(signal) = self.held.take() {
            return self.records_first(signal);
        }

        let signal = self.select_signal().await;
        match signal {
            Signal::Record(_) | Signal::Closed => signal,
            other => self.records_first(other),
        }
    }

    /// `select!` may observe a marker or error after finding the record
    /// channel empty, while the delivery task filled it in between. Such a
    /// record was sent first, so it goes out first and the signal is held.
    fn records_first(&mut self, signal: Signal) -> Signal {
        match self.logs.try_recv() {
            Ok(log) => {
                self.held = Some(signal);
                Signal::Record(log)
            }
            Err(_) => signal,
        }
    }

    async fn select_signal(&mut self) -> Signal {
        let LogStream {
            logs,
            backlog,
            errors,
            closed,
            ..
        } = self;

        tokio::select! {
            biased;
            _ = cancelled(closed) => Signal::Closed,
            record = logs.recv() => match record {
                Some(log) => Signal::Record(log),
                None => drained(backlog, errors),
            },
            _ = wait_backlog(backlog) => Signal::BacklogExhausted,
            failure = wait_error(errors) => match failure {
                Some(e) => Signal::Failed(e),
                // Delivery task finished without an error.
                None => Signal::Ended,
            },
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// The delivery task is gone and every record was consumed: report the
/// signals it left behind, in the order it sent them.
fn drained(
    backlog: &mut Option<oneshot::Receiver<()>>,
    errors: &mut Option<oneshot::Receiver<BindError>>,
) -> Signal {
    if let Some(mut rx) = backlog.take() {
        if rx.try_recv().is_ok() {
            return Signal::BacklogExhausted;
        }
    }

    match errors.take().map(|mut rx| rx.try_recv()) {
        Some(Ok(e)) => Signal::Failed(e),
        _ => Signal::Ended,
    }
}

async fn wait_backlog(backlog: &mut Option<oneshot::Receiver<()>>) {
    match backlog {
        Some(rx) => {
            // A dropped sender also means no more backlog is coming.
            let _ = rx.await;
            *backlog = None;
        }
        None => std::future::pending().await,
    }
}

async fn wait_error(errors: &mut Option<oneshot::Receiver<BindError>>) -> Option<BindError> {
    match errors {
        Some(rx) => {
            let result = rx.await;
            *errors = None;
            result.ok()
        }
        None => std::future::pending().await,
    }
}

async fn forward_backlog(
    filterer: &dyn ContractFilterer,
    query: &LogQuery,
    log_tx: &mpsc::Sender<Log>,
) -> Result<usize, BindError> {
    let logs = filterer
        .filter_logs(query)
        .await
        .map_err(BindError::RemoteCall)?;

    let count = logs.len();
    for log in logs {
        if log_tx.send(log).await.is_err() {
            // Consumer went away; nothing left to deliver to.
            break;
        }
    }
    Ok(count)
}

async fn forward_live(
    source: &mut LogWatch,
    log_tx: &mpsc::Sender<Log>,
    closed: &mut watch::Receiver<bool>,
) -> Result<(), BindError> {
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancelled(closed) => return Ok(()),
            record = source.logs.recv() => match record {
                Some(log) => {
                    tokio::select! {
                        biased;
                        _ = cancelled(closed) => return Ok(()),
                        sent = log_tx.send(log) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                None => {
                    let reason = source
                        .errors
                        .try_recv()
                        .unwrap_or_else(|_| TransportError::new("live log source closed"));
                    return Err(BindError::Subscription(reason));
                }
            },
            failure = &mut source.errors, if errors_open => match failure {
                Ok(e) => return Err(BindError::Subscription(e)),
                Err(_) => errors_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::mock::{log_index_record, MockBackend};
    use std::time::Duration;

    #[tokio::test]
    async fn test_historical_stream_signals() {
        let backend = MockBackend::with_history(vec![
            log_index_record(1, 0x01),
            log_index_record(2, 0x02),
        ]);
        let mut stream = LogStream::historical(backend.clone(), backend.query(), 4);

        assert!(matches!(stream.next_signal().await, Signal::Record(_)));
        assert!(matches!(stream.next_signal().await, Signal::Record(_)));
        assert!(matches!(
            stream.next_signal().await,
            Signal::BacklogExhausted
        ));
        assert!(matches!(stream.next_signal().await, Signal::Ended));
    }

    #[tokio::test]
    async fn test_historical_query_failure() {
        let backend = MockBackend::failing_history("node unavailable");
        let mut stream = LogStream::historical(backend.clone(), backend.query(), 4);

        let mut saw_failure = false;
        for _ in 0..3 {
            if let Signal::Failed(BindError::RemoteCall(_)) = stream.next_signal().await {
                saw_failure = true;
                break;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_live_stream_releases_on_close() {
        let backend = MockBackend::new();
        let stream = LogStream::live(backend.clone(), backend.query(), None, 4)
            .await
            .unwrap();
        assert!(!stream.has_backlog());

        assert!(stream.close());
        assert!(!stream.close());

        tokio::time::timeout(Duration::from_secs(1), backend.wait_released(1))
            .await
            .unwrap();
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn test_dropped_live_source_fails_stream() {
        let backend = MockBackend::new();
        let mut stream = LogStream::live(backend.clone(), backend.query(), None, 4)
            .await
            .unwrap();

        backend.drop_live("connection reset");
        match stream.next_signal().await {
            Signal::Failed(BindError::Subscription(e)) => {
                assert!(e.to_string().contains("connection reset"))
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_records_sent_before_failure_are_delivered() {
        for round in 0..500 {
            let (log_tx, log_rx) = mpsc::channel(4);
            let (err_tx, err_rx) = oneshot::channel();
            let mut stream = LogStream::from_parts(log_rx, None, err_rx, Subscription::new());

            let producer = tokio::spawn(async move {
                for i in 0..3u8 {
                    log_tx.send(log_index_record(u64::from(i), i)).await.unwrap();
                }
                let _ = err_tx.send(BindError::Subscription(TransportError::new("dropped")));
            });

            let mut records = 0;
            loop {
                match stream.next_signal().await {
                    Signal::Record(_) => records += 1,
                    Signal::Failed(_) => break,
                    other => panic!("unexpected signal {:?} in round {}", other, round),
                }
            }
            assert_eq!(records, 3, "round {}", round);
            producer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_held_signal_follows_queued_records() {
        let (log_tx, log_rx) = mpsc::channel(4);
        let (_err_tx, err_rx) = oneshot::channel();
        let mut stream = LogStream::from_parts(log_rx, None, err_rx, Subscription::new());

        log_tx.send(log_index_record(1, 1)).await.unwrap();
        log_tx.send(log_index_record(2, 2)).await.unwrap();

        let failure = Signal::Failed(BindError::Subscription(TransportError::new("dropped")));
        assert!(matches!(stream.records_first(failure), Signal::Record(_)));
        assert!(matches!(stream.next_signal().await, Signal::Record(_)));
        assert!(matches!(
            stream.next_signal().await,
            Signal::Failed(BindError::Subscription(_))
        ));
    }
}
