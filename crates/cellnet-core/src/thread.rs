//! The designated mutation thread.
//!
//! All topology mutation happens on one thread chosen by the host (normally
//! its authoritative tick thread). Graph physics runs concurrently on pool
//! workers; structural changes are serialized by running them here only.

use std::thread::{self, ThreadId};

/// Remembers the mutation thread and checks callers against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationGuard {
    thread: ThreadId,
}

/// Returned when a mutation is attempted from any other thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("topology mutation from {actual:?}, designated mutation thread is {expected:?}")]
pub struct WrongThread {
    pub expected: ThreadId,
    pub actual: ThreadId,
}

impl MutationGuard {
    /// Designate the calling thread.
    pub fn current() -> Self {
        Self {
            thread: thread::current().id(),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn is_mutation_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    pub fn check(&self) -> Result<(), WrongThread> {
        let actual = thread::current().id();
        if actual == self.thread {
            Ok(())
        } else {
            Err(WrongThread {
                expected: self.thread,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_thread_passes() {
        let guard = MutationGuard::current();
        assert!(guard.check().is_ok());
        assert!(guard.is_mutation_thread());
    }

    #[test]
    fn other_thread_is_rejected() {
        let guard = MutationGuard::current();
        let result = thread::spawn(move || guard.check()).join().unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.expected, guard.thread());
        assert_ne!(err.actual, guard.thread());
    }
}
