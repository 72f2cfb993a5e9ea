//! Exactly-once completion of a logical operation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::oneshot;

use crate::error::{GridError, GridResult};

/// Terminal state machine of a logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompletionState {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl CompletionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CompletionState::Completed,
            2 => CompletionState::Failed,
            _ => CompletionState::Pending,
        }
    }
}

/// Single-assignment result slot.
///
/// The state moves out of `Pending` exactly once; whoever wins that
/// transition is the only one allowed to deliver a result.
pub struct Completion<T> {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<GridResult<T>>>>,
}

impl<T> Completion<T> {
    pub fn new() -> (Self, oneshot::Receiver<GridResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            state: AtomicU8::new(CompletionState::Pending as u8),
            sender: Mutex::new(Some(tx)),
        };
        (completion, rx)
    }

    pub fn state(&self) -> CompletionState {
        CompletionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_done(&self) -> bool {
        self.state() != CompletionState::Pending
    }

    /// Move from `Pending` to `terminal`. Returns `false` if already terminal.
    pub fn transition(&self, terminal: CompletionState) -> bool {
        debug_assert!(terminal != CompletionState::Pending);
        self.state
            .compare_exchange(
                CompletionState::Pending as u8,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Hand the result to the waiter. Call only after winning [`transition`](Self::transition).
    pub fn deliver(&self, result: GridResult<T>) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(sender) = sender {
            // The waiter may be gone; the operation still counts as complete.
            let _ = sender.send(result);
        }
    }

    pub fn complete(&self, value: T) -> bool {
        if self.transition(CompletionState::Completed) {
            self.deliver(Ok(value));
            true
        } else {
            false
        }
    }

    pub fn complete_exceptionally(&self, error: GridError) -> bool {
        if self.transition(CompletionState::Failed) {
            self.deliver(Err(error));
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (completion, rx) = Completion::<u32>::new();

        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert!(!completion.complete_exceptionally(GridError::Worker("late".into())));

        assert_eq!(completion.state(), CompletionState::Completed);
        assert_eq!(rx.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let (completion, rx) = Completion::<u32>::new();

        assert!(completion.complete_exceptionally(GridError::Transport("reset".into())));
        assert!(!completion.complete(5));

        assert_eq!(completion.state(), CompletionState::Failed);
        assert!(matches!(rx.await.unwrap(), Err(GridError::Transport(_))));
    }

    #[test]
    fn test_delivery_without_waiter_is_ignored() {
        let (completion, rx) = Completion::<u32>::new();
        drop(rx);
        assert!(completion.complete(3));
        assert!(completion.is_done());
    }
}
