//! Slot booking state machine.
//!
//! ```text
//! Available --lock--> Locked --confirm/pay--> Booked --> Cancelled | Completed
//!     ^                  |
//!     +--release/expire--+
//! ```
//!
//! Every transition is a single store unit, so the status precondition and the
//! write cannot interleave with another caller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::context::Context;
use crate::demand::DemandTracker;
use crate::engine::{PaymentError, SlotError};
use crate::lock::{LockKey, LockManager};
use crate::model::{Slot, SlotFilter, SlotId, SlotStatus, TransactionKind, UserId};
use crate::payment::{PaymentReceipt, PaymentSettlement};
use crate::pricing::{PriceBreakdown, PricingEngine};
use crate::store::{Store, Tables};
use crate::wallet::WalletLedger;

/// A slot with its live price.
#[derive(Debug, Clone)]
pub struct SlotQuote {
    pub slot: Slot,
    pub price: PriceBreakdown,
    pub viewers: u32,
}

/// A slot whose price is frozen for the booking flow.
#[derive(Debug, Clone)]
pub struct LockedSlot {
    pub slot: Slot,
    pub price: PriceBreakdown,
    pub locked_until: DateTime<Utc>,
}

pub struct BookingEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    demand: DemandTracker,
    pricing: PricingEngine,
    locks: LockManager,
    settlement: PaymentSettlement,
    lock_duration: Duration,
    flow_lock_duration: Duration,
}

impl BookingEngine {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            demand: ctx.demand.clone(),
            pricing: PricingEngine::new(ctx),
            locks: LockManager::new(ctx),
            settlement: PaymentSettlement::new(ctx),
            lock_duration: ctx.config.booking.lock_duration,
            flow_lock_duration: ctx.config.booking.flow_lock_duration,
        }
    }

    /// Available future slots matching `filter`, ordered by start time.
    ///
    /// Each listed slot counts as one view for demand pricing.
    pub fn available_slots(&self, filter: &SlotFilter) -> Result<Vec<SlotQuote>, SlotError> {
        let now = self.clock.now();
        let mut slots: Vec<Slot> = self.store.read(|t| {
            t.slots()
                .filter(|s| s.status == SlotStatus::Available && s.start_time > now)
                .filter(|s| matches_filter(t, s, filter))
                .cloned()
                .collect()
        });
        slots.sort_by_key(|s| (s.start_time, s.id));

        let viewers: Vec<u32> = slots
            .iter()
            .map(|s| self.demand.increment_viewer(s.id))
            .collect();
        self.store.read(|t| {
            slots
                .into_iter()
                .zip(viewers)
                .map(|(slot, viewers)| {
                    let price = self.pricing.quote(t, &slot, now)?;
                    Ok(SlotQuote {
                        slot,
                        price,
                        viewers,
                    })
                })
                .collect()
        })
    }

    /// One slot with its live price; counts as a view.
    pub fn slot_details(&self, slot: SlotId) -> Result<SlotQuote, SlotError> {
        let now = self.clock.now();
        let current = self
            .store
            .read(|t| t.slot(slot).cloned())
            .ok_or(SlotError::NotFound(slot))?;
        let viewers = self.demand.increment_viewer(slot);
        let price = self.store.read(|t| self.pricing.quote(t, &current, now))?;
        Ok(SlotQuote {
            slot: current,
            price,
            viewers,
        })
    }

    /// Start the booking flow: take the flow lease, price the slot and lock it.
    ///
    /// Lease and slot change commit together; on any failure neither is kept.
    pub fn lock_slot(&self, slot: SlotId, user: UserId) -> Result<LockedSlot, SlotError> {
        let now = self.clock.now();
        let key = LockKey::new(slot, user);
        self.store.atomic(|txn| {
            if !self.locks.acquire_in(txn, &key, self.flow_lock_duration) {
                return Err(SlotError::FlowInProgress { slot, user });
            }
            let mut current = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if current.status != SlotStatus::Available {
                return Err(SlotError::NotAvailable {
                    slot,
                    status: current.status,
                });
            }
            if current.start_time <= now {
                return Err(SlotError::Started(slot));
            }

            let price = self.pricing.quote(txn, &current, now)?;
            let locked_until = now + self.lock_duration;
            current.lock(user, locked_until, price.final_price);
            txn.put_slot(current.clone());
            Ok(LockedSlot {
                slot: current,
                price,
                locked_until,
            })
        })
    }

    /// Pay for a slot locked by `user` within its price lock and book it.
    ///
    /// Requires the flow lease taken by [`lock_slot`](Self::lock_slot). Payment
    /// and the `Booked` transition commit together; an expired lock fails and
    /// leaves the slot `Locked` for the expiry job.
    pub fn confirm_booking(
        &self,
        slot: SlotId,
        user: UserId,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        let now = self.clock.now();
        let key = LockKey::new(slot, user);
        self.store.atomic(|txn| {
            let replayed =
                WalletLedger::replay(txn, reference, user, TransactionKind::Debit, Some(slot))?;
            if let Some(original) = replayed {
                return Ok(PaymentReceipt::from(&original));
            }
            if !self.locks.is_held_in(txn, &key) {
                return Err(SlotError::LockRequired { slot, user }.into());
            }
            let current = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if !current.is_locked_by(user) {
                return Err(SlotError::NotLockedBy { slot, user }.into());
            }
            if current.locked_until.is_none_or(|until| until <= now) {
                return Err(SlotError::LockExpired(slot).into());
            }
            self.settlement.settle_in(txn, current, user, reference)
        })
    }

    /// Abandon the booking flow. Returns whether anything was released.
    pub fn release_lock(&self, slot: SlotId, user: UserId) -> Result<bool, SlotError> {
        let key = LockKey::new(slot, user);
        self.store.atomic(|txn| {
            let current = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if !self.locks.is_held_in(txn, &key) || !current.is_locked_by(user) {
                return Ok(false);
            }
            let mut current = current;
            current.unlock();
            txn.put_slot(current);
            self.locks.release_in(txn, &key);
            Ok(true)
        })
    }

    /// Cancel a booking. No money moves; refunds are requested separately.
    pub fn cancel_booking(&self, slot: SlotId, user: UserId) -> Result<(), SlotError> {
        self.store.atomic(|txn| {
            let mut current = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if !current.is_booked_by(user) {
                return Err(SlotError::NotBookedBy { slot, user });
            }
            current.cancel();
            txn.put_slot(current);
            Ok(())
        })
    }

    /// Slots whose price lock has run out.
    pub fn expired_locks(&self) -> Vec<SlotId> {
        let now = self.clock.now();
        self.store.read(|t| {
            t.slots()
                .filter(|s| s.lock_expired(now))
                .map(|s| s.id)
                .collect()
        })
    }

    /// Return one expired slot to `Available` and drop its owner's flow lease.
    ///
    /// The owner is read before the slot is cleared so the right lease is released.
    pub fn expire_lock(&self, slot: SlotId) -> bool {
        let now = self.clock.now();
        self.store
            .atomic(|txn| {
                let Some(mut current) = txn.slot(slot).cloned() else {
                    return Err(());
                };
                if !current.lock_expired(now) {
                    return Err(());
                }
                let owner = current.locked_by;
                current.unlock();
                txn.put_slot(current);
                if let Some(user) = owner {
                    self.locks.release_in(txn, &LockKey::new(slot, user));
                }
                Ok(())
            })
            .is_ok()
    }

    pub fn expire_locks(&self) -> usize {
        self.expire_locks_until(|| false)
    }

    /// [`expire_locks`](Self::expire_locks), checking `stopped` before each slot.
    pub fn expire_locks_until(&self, stopped: impl Fn() -> bool) -> usize {
        self.expired_locks()
            .into_iter()
            .take_while(|_| !stopped())
            .filter(|slot| {
                let expired = self.expire_lock(*slot);
                if expired {
                    debug!(slot, "released expired lock");
                }
                expired
            })
            .count()
    }
}

fn matches_filter(tables: &Tables, slot: &Slot, filter: &SlotFilter) -> bool {
    if filter.court_id.is_some_and(|c| c != slot.court_id) {
        return false;
    }
    if let Some(venue) = filter.venue_id {
        let court_venue = tables.court(slot.court_id).map(|c| c.venue_id);
        if court_venue != Some(venue) {
            return false;
        }
    }
    if filter.from.is_some_and(|from| slot.start_time < from) {
        return false;
    }
    if filter.to.is_some_and(|to| slot.start_time > to) {
        return false;
    }
    true
}
