use asyncmeta_common::protocol::error::{AsyncMetaError, Result};
use asyncmeta_common::OperationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::OperationContext;

/// Table of operations in flight, bounded by `max_pending_ops`.
pub struct Admission {
    max_pending: usize,
    pending: Mutex<HashMap<u64, Arc<OperationContext>>>,
}

impl Admission {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Admits an operation.
    ///
    /// # Errors
    ///
    /// [`AsyncMetaError::Busy`] when the table is full.
    pub fn admit(&self, ctx: &Arc<OperationContext>) -> Result<()> {
        let mut pending = self.lock();
        if pending.len() >= self.max_pending {
            return Err(AsyncMetaError::Busy);
        }
        pending.insert(ctx.key(), Arc::clone(ctx));
        Ok(())
    }

    /// Removes an operation; returns false if it was not admitted.
    pub fn release(&self, key: u64) -> bool {
        self.lock().remove(&key).is_some()
    }

    /// The oldest admitted operation with this client ID.
    pub fn find(&self, id: OperationId) -> Option<Arc<OperationContext>> {
        self.lock()
            .values()
            .filter(|ctx| ctx.id() == id)
            .min_by_key(|ctx| ctx.key())
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<OperationContext>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<OperationContext>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
