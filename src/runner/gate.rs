//! Concurrency gate
//!
//! Bounds how many shell commands run at the same time across all in-flight
//! tasks. Only command execution holds a slot; dependency resolution,
//! preconditions and fingerprinting never wait on the gate.

use crate::error::{ExecutionError, ExecutionResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Bounded pool of execution slots (`0` means unlimited)
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Option<Arc<Semaphore>>,
    size: usize,
}

/// A held slot, released when dropped
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(size: usize) -> Self {
        ConcurrencyGate {
            semaphore: (size > 0).then(|| Arc::new(Semaphore::new(size))),
            size,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Configured number of slots (`0` for unlimited)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        match &self.semaphore {
            Some(semaphore) => self.size - semaphore.available_permits(),
            None => 0,
        }
    }

    /// Wait for a free slot or for `ctx` to be cancelled
    pub async fn acquire(&self, ctx: &CancellationToken) -> ExecutionResult<GatePermit> {
        if ctx.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let Some(semaphore) = &self.semaphore else {
            return Ok(GatePermit { _permit: None });
        };

        tokio::select! {
            permit = Arc::clone(semaphore).acquire_owned() => {
                let permit = permit.map_err(|_| ExecutionError::Cancelled)?;
                Ok(GatePermit { _permit: Some(permit) })
            }
            _ = ctx.cancelled() => Err(ExecutionError::Cancelled),
        }
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::unlimited()
    }
}
