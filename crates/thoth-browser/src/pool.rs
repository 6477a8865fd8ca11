//! Bounded browser-context pool with guaranteed release
//!
//! A permit is held by an RAII guard; dropping the guard (normal return,
//! error, cancellation or panic unwind) returns the slot and closes the
//! page in the background. The pool slot must not leak.

use std::sync::Arc;

use chromiumoxide::Page;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;

pub struct ContextPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free; back to `capacity` once all guards drop.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot. Cancellation is the only error.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ContextGuard, DiscoveryError> {
        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| {
                    // Semaphore is never closed; treat as the bug it is.
                    DiscoveryError::PoolExhausted("browser pool semaphore closed".to_string())
                })?
            }
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
        };
        Ok(ContextGuard {
            page: None,
            _permit: permit,
        })
    }

    /// Non-blocking acquire, used only by tests.
    pub fn try_acquire(&self) -> Result<ContextGuard, DiscoveryError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(ContextGuard {
                page: None,
                _permit: permit,
            }),
            Err(TryAcquireError::NoPermits) => Err(DiscoveryError::PoolExhausted(
                "no free browser context".to_string(),
            )),
            Err(TryAcquireError::Closed) => Err(DiscoveryError::PoolExhausted(
                "browser pool semaphore closed".to_string(),
            )),
        }
    }
}

/// One pooled browser context. Holds the pool permit for its lifetime.
pub struct ContextGuard {
    page: Option<Page>,
    _permit: OwnedSemaphorePermit,
}

impl ContextGuard {
    /// Attach the browser page backing this context.
    pub fn attach(&mut self, page: Page) {
        self.page = Some(page);
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            // Close the page off-task; the permit releases regardless.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        log::debug!("browser page close failed: {e}");
                    }
                });
            }
        }
    }
}
