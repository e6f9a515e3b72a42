//! Iterator over the session events drained by
//! [`NetplaySession::events`](crate::NetplaySession::events).

use std::collections::vec_deque::IntoIter;
use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::SessionEvent;

/// An opaque iterator over the events drained from a session.
///
/// The events are taken out of the session when the drain is created, so the session is
/// not locked while the caller iterates. It implements [`Iterator`],
/// [`DoubleEndedIterator`], [`ExactSizeIterator`], and [`FusedIterator`].
///
/// Obtain an `EventDrain` by calling [`NetplaySession::events()`].
///
/// # Examples
///
/// ```ignore
/// for event in session.events() {
///     match event {
///         SessionEvent::PeerJoined { player } => println!("{player} joined"),
///         _ => { /* handle other events */ }
///     }
/// }
/// ```
///
/// [`NetplaySession::events()`]: crate::NetplaySession::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain {
    inner: IntoIter<SessionEvent>,
}

impl EventDrain {
    pub(crate) fn from_queue(queue: VecDeque<SessionEvent>) -> Self {
        Self {
            inner: queue.into_iter(),
        }
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::from_queue(VecDeque::new())
    }
}

impl Iterator for EventDrain {
    type Item = SessionEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for EventDrain {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for EventDrain {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for EventDrain {}

impl std::fmt::Debug for EventDrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::PlayerId;

    fn queue() -> VecDeque<SessionEvent> {
        VecDeque::from(vec![
            SessionEvent::PeerJoined {
                player: PlayerId::Two,
            },
            SessionEvent::PeerStarted {
                player: PlayerId::Two,
            },
            SessionEvent::PreferencesAdopted,
        ])
    }

    #[test]
    fn drains_in_order() {
        let events: Vec<SessionEvent> = EventDrain::from_queue(queue()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            SessionEvent::PeerJoined {
                player: PlayerId::Two
            }
        );
        assert_eq!(events[2], SessionEvent::PreferencesAdopted);
    }

    #[test]
    fn exact_size_and_double_ended() {
        let mut drain = EventDrain::from_queue(queue());
        assert_eq!(drain.len(), 3);
        assert_eq!(drain.next_back(), Some(SessionEvent::PreferencesAdopted));
        assert_eq!(drain.len(), 2);
        assert_eq!(drain.size_hint(), (2, Some(2)));
    }

    #[test]
    fn empty_drain_is_fused() {
        let mut drain = EventDrain::empty();
        assert_eq!(drain.len(), 0);
        assert!(drain.next().is_none());
        assert!(drain.next().is_none());
        assert_eq!(format!("{drain:?}"), "EventDrain { remaining: 0 }");
    }
}
