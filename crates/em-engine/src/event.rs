//! Timed events
//!
//! An event is an ordered list of actions (play, stop, pause, resume,
//! wait) advanced once per frame. Triggering returns a canceler; a
//! cancelled event jumps straight to its final state on the next frame
//! and its cleanup stops whatever it started.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::sources::SourceRef;
use em_core::ObjectId;

/// What one event step does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventActionKind {
    Play,
    Stop,
    Pause,
    Resume,
    Wait,
}

/// One step of an event
#[derive(Debug, Clone)]
pub struct EventAction {
    pub kind: EventActionKind,
    /// Sources the action applies to; unused for Wait
    pub targets: Vec<SourceRef>,
    /// Wait time or fade duration in seconds
    pub duration: f32,
}

/// A registered event
#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub id: ObjectId,
    pub name: String,
    pub actions: Vec<EventAction>,
}

/// Progress of one triggered event
pub(crate) struct EventInstanceInner {
    pub definition: EventDefinition,
    pub entity: Option<ObjectId>,
    /// Next action to run
    pub cursor: usize,
    pub wait_remaining: f32,
    pub running: bool,
    pub cancelled: bool,
    /// Channels started by this event, stopped on cancel
    pub channels: Vec<Channel>,
}

/// A running event
#[derive(Clone)]
pub struct EventInstance {
    pub(crate) inner: Arc<Mutex<EventInstanceInner>>,
}

impl EventInstance {
    pub(crate) fn new(definition: EventDefinition, entity: Option<ObjectId>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventInstanceInner {
                definition,
                entity,
                cursor: 0,
                wait_remaining: 0.0,
                running: true,
                cancelled: false,
                channels: Vec::new(),
            })),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Handle used to cancel the event later
    pub fn canceler(&self) -> EventCanceler {
        EventCanceler { inner: self.inner.clone() }
    }
}

/// Cancels a running event
#[derive(Clone)]
pub struct EventCanceler {
    inner: Arc<Mutex<EventInstanceInner>>,
}

impl EventCanceler {
    /// Mark the event cancelled; the engine finalizes it on the next
    /// frame, stopping any channels it started.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> EventDefinition {
        EventDefinition {
            id: 1,
            name: "ambush".into(),
            actions: vec![
                EventAction { kind: EventActionKind::Wait, targets: vec![], duration: 0.5 },
                EventAction { kind: EventActionKind::Play, targets: vec![SourceRef::Sound(7)], duration: 0.0 },
            ],
        }
    }

    #[test]
    fn test_canceler_flags_instance() {
        let instance = EventInstance::new(definition(), None);
        let canceler = instance.canceler();
        assert!(canceler.is_running());

        canceler.cancel();
        assert!(instance.inner.lock().cancelled);
    }
}
