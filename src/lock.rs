//! Advisory booking-flow leases.
//!
//! A lease is a row in the store's lease table keyed by `"{slot}:{user}"`.
//! Acquisition is a compare-and-swap inside one store unit: it succeeds only
//! when no live lease exists for the key. Because the row lives in the shared
//! store, every process using that store sees the same owner.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::context::Context;
use crate::model::{SlotId, UserId};
use crate::store::{Lease, Store, Txn};

/// Lease key for one user's booking flow on one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub slot: SlotId,
    pub user: UserId,
}

impl LockKey {
    pub fn new(slot: SlotId, user: UserId) -> Self {
        Self { slot, user }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.user)
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
        }
    }

    /// Take the lease for `duration`; `false` if someone holds a live one.
    pub fn try_acquire(&self, key: &LockKey, duration: Duration) -> bool {
        self.store
            .atomic(|txn| Ok::<_, ()>(self.acquire_in(txn, key, duration)))
            .unwrap_or(false)
    }

    pub fn release(&self, key: &LockKey) {
        let _ = self.store.atomic(|txn| {
            self.release_in(txn, key);
            Ok::<_, ()>(())
        });
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.store.read(|t| {
            t.lease(&key.to_string())
                .is_some_and(|l| l.is_live(self.clock.now()))
        })
    }

    /// [`try_acquire`](Self::try_acquire) within an enclosing unit; a rollback
    /// of that unit releases the lease again.
    pub fn acquire_in(&self, txn: &mut Txn<'_>, key: &LockKey, duration: Duration) -> bool {
        let now = self.clock.now();
        let name = key.to_string();
        if txn.lease(&name).is_some_and(|l| l.is_live(now)) {
            return false;
        }
        txn.put_lease(Lease {
            key: name,
            holder: key.user,
            expires_at: now + duration,
        });
        true
    }

    pub fn release_in(&self, txn: &mut Txn<'_>, key: &LockKey) -> bool {
        txn.remove_lease(&key.to_string()).is_some()
    }

    pub fn is_held_in(&self, txn: &Txn<'_>, key: &LockKey) -> bool {
        txn.lease(&key.to_string())
            .is_some_and(|l| l.is_live(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBed;

    #[test]
    fn key_format() {
        assert_eq!(LockKey::new(12, 7).to_string(), "12:7");
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let bed = TestBed::new();
        let locks = LockManager::new(&bed.ctx);
        let key = LockKey::new(1, 7);

        assert!(locks.try_acquire(&key, Duration::minutes(10)));
        assert!(locks.is_held(&key));
        assert!(!locks.try_acquire(&key, Duration::minutes(10)));

        // other keys are independent
        assert!(locks.try_acquire(&LockKey::new(1, 8), Duration::minutes(10)));
    }

    #[test]
    fn release_frees_the_key() {
        let bed = TestBed::new();
        let locks = LockManager::new(&bed.ctx);
        let key = LockKey::new(1, 7);

        assert!(locks.try_acquire(&key, Duration::minutes(10)));
        locks.release(&key);
        assert!(!locks.is_held(&key));
        assert!(locks.try_acquire(&key, Duration::minutes(10)));

        // releasing twice is harmless
        locks.release(&key);
        locks.release(&key);
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let bed = TestBed::new();
        let locks = LockManager::new(&bed.ctx);
        let key = LockKey::new(1, 7);

        assert!(locks.try_acquire(&key, Duration::minutes(10)));
        bed.advance(Duration::minutes(10));
        assert!(!locks.is_held(&key));
        assert!(locks.try_acquire(&key, Duration::minutes(10)));
    }

    #[test]
    fn rolled_back_unit_drops_the_lease() {
        let bed = TestBed::new();
        let locks = LockManager::new(&bed.ctx);
        let key = LockKey::new(1, 7);

        let result = bed.ctx.store.atomic(|txn| {
            assert!(locks.acquire_in(txn, &key, Duration::minutes(10)));
            assert!(locks.is_held_in(txn, &key));
            Err::<(), _>("slot not available")
        });
        assert!(result.is_err());
        assert!(!locks.is_held(&key));
    }

    #[test]
    fn concurrent_acquires_have_one_winner() {
        let bed = TestBed::new();
        let locks = LockManager::new(&bed.ctx);

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let locks = locks.clone();
                    scope.spawn(move || {
                        locks.try_acquire(&LockKey::new(1, 7), Duration::minutes(10)) as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }
}
