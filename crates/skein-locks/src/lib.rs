//! Per-browser-profile mutual exclusion for the orchestrator.
//!
//! Every profile-touching operation acquires a lease here first.
//! Acquisition is non-blocking and fails immediately when the profile is
//! already held — callers that need ordering go through the task queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use skein_contract::OrchestrationError;

/// Lease handle proving ownership of one profile's lock.
///
/// Releasing is lease-checked: a token whose profile has since been
/// re-acquired by someone else is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLockToken {
    profile_id: String,
    lease: u64,
}

impl ProfileLockToken {
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_lease: AtomicU64,
    held: Mutex<HashMap<String, u64>>,
}

/// In-memory registry of per-profile session locks.
#[derive(Debug, Clone, Default)]
pub struct ProfileLockRegistry {
    inner: Arc<RegistryInner>,
}

impl ProfileLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the profile's lock. Fails with `ResourceBusy` when
    /// it is already held; never blocks and never queues.
    pub fn acquire(&self, profile_id: &str) -> Result<ProfileLockToken, OrchestrationError> {
        let profile_id = profile_id.trim();
        if profile_id.is_empty() {
            return Err(OrchestrationError::fatal_configuration(
                "browser profile id must be non-empty",
            ));
        }
        let mut held = lock_unpoisoned(&self.inner.held);
        if held.contains_key(profile_id) {
            return Err(OrchestrationError::resource_busy(profile_id));
        }
        let lease = self.inner.next_lease.fetch_add(1, Ordering::Relaxed);
        held.insert(profile_id.to_string(), lease);
        Ok(ProfileLockToken {
            profile_id: profile_id.to_string(),
            lease,
        })
    }

    /// Releases a lease. Returns false for stale tokens, which are ignored.
    pub fn release(&self, token: ProfileLockToken) -> bool {
        let mut held = lock_unpoisoned(&self.inner.held);
        match held.get(token.profile_id.as_str()) {
            Some(lease) if *lease == token.lease => {
                held.remove(token.profile_id.as_str());
                true
            }
            _ => false,
        }
    }

    pub fn is_held(&self, profile_id: &str) -> bool {
        lock_unpoisoned(&self.inner.held).contains_key(profile_id)
    }

    /// Profiles currently locked, sorted for stable reporting.
    pub fn held_profiles(&self) -> Vec<String> {
        let held = lock_unpoisoned(&self.inner.held);
        let mut profiles = held.keys().cloned().collect::<Vec<_>>();
        profiles.sort();
        profiles
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
