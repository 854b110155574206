use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use super::event::TypedEvent;
use super::iterator::EventIterator;
use super::stream::{cancelled, Subscription};
use crate::error::{BindError, TransportError};

/// Handle of a push-style watch. Dropping it leaves the watch running;
/// call [`unsubscribe`](Self::unsubscribe) to stop it.
#[derive(Debug)]
pub struct EventSubscription {
    subscription: Subscription,
    task: JoinHandle<Option<BindError>>,
}

impl EventSubscription {
    pub fn unsubscribe(&self) -> bool {
        self.subscription.unsubscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Wait for delivery to stop. Returns the error that stopped it, or
    /// `Ok` after an end of stream or an unsubscribe.
    pub async fn wait(self) -> Result<(), BindError> {
        match self.task.await {
            Ok(Some(e)) => Err(e),
            Ok(None) => Ok(()),
            Err(e) => Err(BindError::Subscription(TransportError::from_source(
                "event delivery task failed",
                e,
            ))),
        }
    }
}

/// Forward every decoded event into `sink` until the stream ends, fails,
/// gets unsubscribed or the receiving side of `sink` is dropped.
pub fn forward<T>(iter: EventIterator<T>, sink: mpsc::Sender<TypedEvent<T>>) -> EventSubscription
where
    T: Send + 'static,
{
    spawn(iter, move |event| {
        let sink = sink.clone();
        async move { sink.send(event).await.is_ok() }
    })
}

/// Invoke `handler` once per decoded event. Returning false from the
/// handler stops the watch.
pub fn for_each<T, F>(iter: EventIterator<T>, mut handler: F) -> EventSubscription
where
    T: Send + 'static,
    F: FnMut(TypedEvent<T>) -> bool + Send + 'static,
{
    spawn(iter, move |event| std::future::ready(handler(event)))
}

fn spawn<T, F, Fut>(mut iter: EventIterator<T>, deliver: F) -> EventSubscription
where
    T: Send + 'static,
    F: FnMut(TypedEvent<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = bool> + Send,
{
    let subscription = iter.subscription();
    let task = tokio::spawn(async move { drive(&mut iter, deliver).await });
    EventSubscription { subscription, task }
}

async fn drive<T, F, Fut>(iter: &mut EventIterator<T>, mut deliver: F) -> Option<BindError>
where
    F: FnMut(TypedEvent<T>) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut closed = iter.subscription().closed_signal();

    while iter.advance().await {
        let Some(event) = iter.take_event() else {
            continue;
        };

        let keep_going = tokio::select! {
            biased;
            _ = cancelled(&mut closed) => false,
            accepted = deliver(event) => accepted,
        };
        if !keep_going {
            debug!("event consumer stopped the watch");
            break;
        }
    }

    iter.close();
    iter.take_error()
}
