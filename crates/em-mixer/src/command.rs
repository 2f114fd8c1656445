//! Deferred mixer commands
//!
//! Lifecycle work discovered during mixing (a layer reaching its end, a
//! loop wrap) is queued here and executed only after the audio mutex is
//! released, so handlers may freely call back into the mixer.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Work deferred until after the mix loop releases the audio mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerCommand {
    /// A layer's cursor reached its end frame
    SourceEnded {
        id: u32,
        layer: u32,
        /// Whether the layer was in the looping state
        looping: bool,
    },
}

/// FIFO of deferred commands, drained in push order
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<MixerCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::with_capacity(64)) }
    }

    pub fn push(&self, command: MixerCommand) {
        self.queue.lock().push_back(command);
    }

    pub fn pop(&self) -> Option<MixerCommand> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        queue.push(MixerCommand::SourceEnded { id: 1, layer: 1, looping: false });
        queue.push(MixerCommand::SourceEnded { id: 2, layer: 2, looping: true });

        assert_eq!(queue.pop(), Some(MixerCommand::SourceEnded { id: 1, layer: 1, looping: false }));
        assert_eq!(queue.pop(), Some(MixerCommand::SourceEnded { id: 2, layer: 2, looping: true }));
        assert_eq!(queue.pop(), None);
    }
}
