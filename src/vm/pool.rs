//! Bounded counting pool of VM handles.
//!
//! `get` suspends until a slot frees up; VMs are built lazily up to the
//! bound. Leases return their handle on drop unless it was poisoned, in
//! which case the slot is freed and the next `get` builds a replacement.

use crate::error::Error;
use crate::vm::vm::VmHandle;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct VmPool {
    idle: Mutex<Vec<VmHandle>>,
    slots: Arc<Semaphore>,
}

impl VmPool {
    /// Creates a pool bounded to `max_vms`; 0 means the CPU count.
    #[must_use]
    pub fn new(max_vms: usize) -> Self {
        let bound = if max_vms == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            max_vms
        };
        Self {
            idle: Mutex::new(Vec::with_capacity(bound)),
            slots: Arc::new(Semaphore::new(bound)),
        }
    }

    /// Borrows a VM, suspending until one is available.
    ///
    /// # Errors
    ///
    /// Returns `Error::VmExecution` after `shutdown`, `Error::Io` when a
    /// replacement thread cannot be started.
    pub async fn get(&self) -> Result<VmLease<'_>, Error> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::vm_execution("pool", "vm pool is shut down"))?;

        let reused = self.idle.lock().expect("vm pool mutex poisoned").pop();
        let handle = match reused {
            Some(handle) => handle,
            None => VmHandle::spawn()?,
        };
        Ok(VmLease {
            pool: self,
            handle: Some(handle),
            _permit: permit,
        })
    }

    /// Stops accepting borrows and drops idle VMs; their threads exit once
    /// the job channels close.
    pub fn shutdown(&self) {
        self.slots.close();
        self.idle.lock().expect("vm pool mutex poisoned").clear();
    }

    fn put(&self, handle: VmHandle) {
        if handle.is_healthy() && !self.slots.is_closed() {
            self.idle.lock().expect("vm pool mutex poisoned").push(handle);
        }
    }
}

/// A borrowed VM; returned to the pool on drop.
pub struct VmLease<'a> {
    pool: &'a VmPool,
    handle: Option<VmHandle>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for VmLease<'_> {
    type Target = VmHandle;

    fn deref(&self) -> &VmHandle {
        self.handle.as_ref().expect("lease already released")
    }
}

impl DerefMut for VmLease<'_> {
    fn deref_mut(&mut self) -> &mut VmHandle {
        self.handle.as_mut().expect("lease already released")
    }
}

impl Drop for VmLease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.put(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::vm::VmContext;
    use std::time::Duration;

    #[tokio::test]
    async fn lease_returns_to_pool_and_is_reused() {
        let pool = VmPool::new(1);
        {
            let mut lease = pool.get().await.unwrap();
            lease.configure(VmContext::default()).await.unwrap();
        }
        assert_eq!(pool.idle.lock().unwrap().len(), 1);
        {
            let _lease = pool.get().await.unwrap();
            assert_eq!(pool.idle.lock().unwrap().len(), 0);
        }
    }

    #[tokio::test]
    async fn exhausted_pool_blocks_until_release() {
        let pool = Arc::new(VmPool::new(1));
        let first = pool.get().await.unwrap();

        let contender = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let _lease = pool.get().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn poisoned_handle_not_reused() {
        let pool = VmPool::new(1);
        {
            let mut lease = pool.get().await.unwrap();
            lease.configure(VmContext::default()).await.unwrap();
            let _ = lease
                .execute("spin.js", "for (;;) {}", Duration::from_millis(100))
                .await
                .unwrap_err();
        }
        assert!(pool.idle.lock().unwrap().is_empty());
        // The slot is free again and a fresh VM is built on demand.
        let mut lease = pool.get().await.unwrap();
        lease.configure(VmContext::default()).await.unwrap();
        lease
            .execute("ok.js", "setRender('ok');", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_borrows() {
        let pool = VmPool::new(1);
        pool.shutdown();
        assert!(pool.get().await.is_err());
    }
}
