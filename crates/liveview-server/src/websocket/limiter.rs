//! Cap on concurrently connected sessions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counts live sessions against a fixed maximum.
#[derive(Debug)]
pub struct SessionLimiter {
    /// One permit per allowed session.
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl SessionLimiter {
    /// Allow up to `max` concurrent sessions.
    pub fn new(max: usize) -> Self {
        let max = max.min(Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Claim a slot without waiting, or `None` if the limit is reached.
    ///
    /// The slot is released when the permit is dropped.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Sessions currently holding a permit.
    pub fn active(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Configured session limit.
    pub fn max(&self) -> usize {
        self.max
    }
}
