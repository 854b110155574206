use alloy::rpc::types::Log;

use super::event::{LogDecoder, TypedEvent};
use super::stream::{LogStream, Signal, Subscription};
use crate::error::BindError;

/// Where an iterator stands.
#[derive(Debug)]
pub enum IterState {
    /// Backlog not yet confirmed exhausted.
    Draining,
    /// Backlog exhausted, waiting for new records.
    Live,
    Done,
    Failed(BindError),
}

impl IterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IterState::Done | IterState::Failed(_))
    }
}

/// Result of feeding one stream signal through the state machine.
enum Step {
    Yield,
    Exhausted,
    Again,
}

/// Pull-based cursor over an event stream.
///
/// Each successful [`advance`](Self::advance) decodes exactly one record;
/// records surface in the order the transport delivered them. Not meant for
/// concurrent use: `advance` takes `&mut self`.
pub struct EventIterator<T> {
    stream: LogStream,
    decoder: LogDecoder<T>,
    state: IterState,
    current: Option<TypedEvent<T>>,
}

impl<T> EventIterator<T> {
    pub fn new(stream: LogStream, decoder: LogDecoder<T>) -> Self {
        let state = if stream.has_backlog() {
            IterState::Draining
        } else {
            IterState::Live
        };

        Self {
            stream,
            decoder,
            state,
            current: None,
        }
    }

    /// Move to the next event. Returns false once the iterator has ended,
    /// failed or been closed; [`error`](Self::error) tells which.
    pub async fn advance(&mut self) -> bool {
        loop {
            if self.state.is_terminal() {
                return false;
            }

            let signal = self.stream.next_signal().await;
            match self.apply(signal) {
                Step::Yield => return true,
                Step::Exhausted => return false,
                Step::Again => continue,
            }
        }
    }

    fn apply(&mut self, signal: Signal) -> Step {
        match signal {
            Signal::Record(log) => self.decode(log),
            Signal::BacklogExhausted => {
                if let IterState::Draining = self.state {
                    self.state = IterState::Live;
                }
                Step::Again
            }
            Signal::Ended | Signal::Closed => {
                self.current = None;
                self.state = IterState::Done;
                Step::Exhausted
            }
            Signal::Failed(e) => self.fail(e),
        }
    }

    fn decode(&mut self, log: Log) -> Step {
        match (self.decoder)(&log) {
            Ok(data) => {
                self.current = Some(TypedEvent { data, raw: log });
                Step::Yield
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: BindError) -> Step {
        self.current = None;
        self.state = IterState::Failed(error);
        self.stream.close();
        Step::Exhausted
    }

    /// The event produced by the last successful `advance`.
    pub fn event(&self) -> Option<&TypedEvent<T>> {
        self.current.as_ref()
    }

    pub fn take_event(&mut self) -> Option<TypedEvent<T>> {
        self.current.take()
    }

    /// The decode or transport error that stopped iteration, if any.
    pub fn error(&self) -> Option<&BindError> {
        match &self.state {
            IterState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn take_error(&mut self) -> Option<BindError> {
        match std::mem::replace(&mut self.state, IterState::Done) {
            IterState::Failed(e) => Some(e),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn state(&self) -> &IterState {
        &self.state
    }

    /// Release the underlying subscription. Safe to call repeatedly; an
    /// error captured before closing stays available.
    pub fn close(&mut self) {
        self.stream.close();
        self.current = None;
        if !self.state.is_terminal() {
            self.state = IterState::Done;
        }
    }

    /// Handle that closes this iterator from another task, waking a pending
    /// `advance`.
    pub fn subscription(&self) -> Subscription {
        self.stream.subscription()
    }

    /// Pull the next event as a value: `None` at the end, `Some(Err)` once on
    /// failure.
    pub async fn next_event(&mut self) -> Option<Result<TypedEvent<T>, BindError>> {
        if self.advance().await {
            return self.take_event().map(Ok);
        }
        self.take_error().map(Err)
    }
}

impl<T> std::fmt::Debug for EventIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIterator")
            .field("state", &self.state)
            .field("has_event", &self.current.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::{
        abi::InterfaceTable,
        event::{dyn_decoder, DynEvent},
        mock::{log_index_record, log_index_selector, record, MockBackend, TEST_ABI},
    };
    use alloy::{dyn_abi::DynSolValue, primitives::B256};
    use std::time::Duration;

    fn decoder() -> LogDecoder<DynEvent> {
        let table = InterfaceTable::parse(TEST_ABI).unwrap();
        dyn_decoder(table.event("LogIndex").unwrap().clone())
    }

    fn index_of(iter: &EventIterator<DynEvent>) -> B256 {
        match iter.event().unwrap().data.field("index") {
            Some(DynSolValue::FixedBytes(word, 32)) => *word,
            other => panic!("unexpected field {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drains_backlog_in_order() {
        let backend = MockBackend::with_history(
            (1..=5).map(|i| log_index_record(i, i as u8)).collect(),
        );
        let stream = LogStream::historical(backend.clone(), backend.query(), 2);
        let mut iter = EventIterator::new(stream, decoder());
        assert!(matches!(iter.state(), IterState::Draining));

        for i in 1..=5u8 {
            assert!(iter.advance().await);
            assert_eq!(index_of(&iter), B256::repeat_byte(i));
            assert_eq!(iter.event().unwrap().raw.block_number, Some(i as u64));
        }

        assert!(!iter.advance().await);
        assert!(iter.error().is_none());
        assert!(matches!(iter.state(), IterState::Done));
        assert!(!iter.advance().await);
    }

    #[tokio::test]
    async fn test_backlog_then_live() {
        let backend = MockBackend::with_history(
            (1..=3).map(|i| log_index_record(i, i as u8)).collect(),
        );
        let stream = LogStream::live(
            backend.clone(),
            backend.query(),
            Some(backend.query().with_range(Some(0), None)),
            8,
        )
        .await
        .unwrap();
        let mut iter = EventIterator::new(stream, decoder());

        for i in 1..=3u8 {
            assert!(iter.advance().await);
            assert_eq!(index_of(&iter), B256::repeat_byte(i));
        }

        backend.push_live(log_index_record(10, 4)).await;
        assert!(iter.advance().await);
        assert_eq!(index_of(&iter), B256::repeat_byte(4));

        iter.close();
        assert!(!iter.advance().await);
        assert!(iter.error().is_none());
    }

    #[tokio::test]
    async fn test_decode_failure_is_terminal() {
        let bad = record(
            vec![log_index_selector(), B256::repeat_byte(1)],
            B256::ZERO.to_vec(),
            2,
        );
        let backend =
            MockBackend::with_history(vec![log_index_record(1, 1), bad, log_index_record(3, 3)]);
        let stream = LogStream::historical(backend.clone(), backend.query(), 4);
        let mut iter = EventIterator::new(stream, decoder());

        assert!(iter.advance().await);
        assert!(!iter.advance().await);
        assert!(iter.event().is_none());
        assert!(matches!(iter.error(), Some(BindError::Decoding(_))));

        assert!(!iter.advance().await);
        assert!(matches!(iter.error(), Some(BindError::Decoding(_))));
    }

    #[tokio::test]
    async fn test_dropped_subscription_fails_only_that_iterator() {
        let backend = MockBackend::new();
        let stream = LogStream::live(backend.clone(), backend.query(), None, 4)
            .await
            .unwrap();
        let mut iter = EventIterator::new(stream, decoder());

        backend.push_live(log_index_record(1, 1)).await;
        assert!(iter.advance().await);

        backend.drop_live("peer went away");
        assert!(!iter.advance().await);
        assert!(matches!(iter.error(), Some(BindError::Subscription(_))));
        assert!(!iter.advance().await);
    }

    #[tokio::test]
    async fn test_close_twice_releases_once() {
        let backend = MockBackend::new();
        let stream = LogStream::live(backend.clone(), backend.query(), None, 4)
            .await
            .unwrap();
        let mut iter = EventIterator::new(stream, decoder());

        iter.close();
        iter.close();
        assert!(!iter.advance().await);
        assert!(iter.error().is_none());

        tokio::time::timeout(Duration::from_secs(1), backend.wait_released(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.released(), 1);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_advance() {
        let backend = MockBackend::new();
        let stream = LogStream::live(backend.clone(), backend.query(), None, 4)
            .await
            .unwrap();
        let mut iter = EventIterator::new(stream, decoder());
        let handle = iter.subscription();

        let waiter = tokio::spawn(async move {
            let more = iter.advance().await;
            (more, iter)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.unsubscribe());

        let (more, mut iter) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!more);
        assert!(!iter.advance().await);
    }

    #[tokio::test]
    async fn test_next_event_reports_error_once() {
        let backend = MockBackend::failing_history("boom");
        let stream = LogStream::historical(backend.clone(), backend.query(), 4);
        let mut iter = EventIterator::new(stream, decoder());

        assert!(matches!(
            iter.next_event().await,
            Some(Err(BindError::RemoteCall(_)))
        ));
        assert!(iter.next_event().await.is_none());
    }
}
