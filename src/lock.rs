//! Institution-scoped advisory locks.
//!
//! An import reads a snapshot of persisted state during conflict detection
//! and then writes against it, so two imports for the same institution must
//! run one after the other.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

/// Registry of institutions that currently have an import in flight.
#[derive(Debug, Default)]
pub struct InstitutionLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl InstitutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other import holds `institution_id`, then takes it.
    pub fn acquire(&self, institution_id: &str) -> InstitutionGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(institution_id) {
            debug!(institution = institution_id, "institution_lock.waiting");
            self.released.wait(&mut held);
        }
        held.insert(institution_id.to_string());
        info!(institution = institution_id, "institution_lock.acquired");
        InstitutionGuard {
            locks: self,
            institution_id: institution_id.to_string(),
        }
    }

    /// Takes the lock only if it is free.
    pub fn try_acquire(&self, institution_id: &str) -> Option<InstitutionGuard<'_>> {
        let mut held = self.held.lock();
        if !held.insert(institution_id.to_string()) {
            return None;
        }
        Some(InstitutionGuard {
            locks: self,
            institution_id: institution_id.to_string(),
        })
    }

    pub fn is_held(&self, institution_id: &str) -> bool {
        self.held.lock().contains(institution_id)
    }
}

/// Releases the institution lock when dropped.
#[derive(Debug)]
pub struct InstitutionGuard<'a> {
    locks: &'a InstitutionLocks,
    institution_id: String,
}

impl Drop for InstitutionGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.institution_id);
        self.locks.released.notify_all();
        info!(institution = %self.institution_id, "institution_lock.released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_institution_is_exclusive() {
        let locks = InstitutionLocks::new();
        let guard = locks.acquire("MOCKU");
        assert!(locks.try_acquire("MOCKU").is_none());
        assert!(locks.try_acquire("OTHER").is_some());
        drop(guard);
        assert!(!locks.is_held("MOCKU"));
        assert!(locks.try_acquire("MOCKU").is_some());
    }

    #[test]
    fn waiters_run_one_at_a_time() {
        let locks = Arc::new(InstitutionLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _guard = locks.acquire("MOCKU");
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
