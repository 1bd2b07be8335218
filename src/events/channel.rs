//! Event delivery from the coordinator thread to a listener.
//!
//! Two flavors: an unbounded channel that keeps every event, and a lossy
//! bounded one where progress snapshots are dropped instead of stalling the
//! run when the listener falls behind. Lifecycle events are never dropped.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use super::{CompareEvent, Event, SignatureEvent};

/// Sends events from the engine.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
    lossy: bool,
}

impl EventSender {
    /// Send an event.
    ///
    /// Events sent after the receiver is dropped are discarded.
    pub fn send(&self, event: Event) {
        if self.lossy && is_snapshot(&event) {
            match self.inner.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("listener behind, progress snapshot dropped");
                }
            }
            return;
        }
        let _ = self.inner.send(event);
    }
}

/// Progress snapshots supersede each other, so losing one is harmless
fn is_snapshot(event: &Event) -> bool {
    matches!(
        event,
        Event::Signature(SignatureEvent::Progress(_)) | Event::Compare(CompareEvent::Progress(_))
    )
}

/// Receives events from the engine.
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event, or `None` once every sender is gone
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Events until every sender is gone
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// Factory for connected sender/receiver pairs.
pub struct EventChannel;

impl EventChannel {
    /// Channel that keeps every event.
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender {
                inner: sender,
                lossy: false,
            },
            EventReceiver { inner: receiver },
        )
    }

    /// Channel holding at most `capacity` events, dropping progress
    /// snapshots while full.
    pub fn lossy(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            EventSender {
                inner: sender,
                lossy: true,
            },
            EventReceiver { inner: receiver },
        )
    }
}

/// A sender with no listener.
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RunEvent, SignatureProgress};
    use std::thread;

    fn snapshot(completed: usize) -> Event {
        Event::Signature(SignatureEvent::Progress(SignatureProgress {
            completed,
            total: 25,
            failed: 0,
        }))
    }

    #[test]
    fn events_cross_threads() {
        let (sender, receiver) = EventChannel::new();

        thread::spawn(move || sender.send(snapshot(5)))
            .join()
            .unwrap();

        match receiver.recv().unwrap() {
            Event::Signature(SignatureEvent::Progress(p)) => assert_eq!(p.completed, 5),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn null_sender_discards_events() {
        let sender = null_sender();
        sender.send(Event::Run(RunEvent::Interrupted { resumable: true }));
    }

    #[test]
    fn lossy_channel_drops_snapshots_when_full() {
        let (sender, receiver) = EventChannel::lossy(2);

        sender.send(snapshot(1));
        sender.send(snapshot(2));
        sender.send(snapshot(3));

        assert!(matches!(
            receiver.try_recv(),
            Some(Event::Signature(SignatureEvent::Progress(SignatureProgress { completed: 1, .. })))
        ));
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn lossy_channel_keeps_lifecycle_events() {
        let (sender, receiver) = EventChannel::lossy(1);

        sender.send(snapshot(1));
        let consumer = thread::spawn(move || receiver.iter().count());
        sender.send(Event::Run(RunEvent::Interrupted { resumable: true }));
        drop(sender);

        assert_eq!(consumer.join().unwrap(), 2);
    }
}
