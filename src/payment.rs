//! Payment settlement: debit the wallet and book the slot as one unit.

use std::sync::Arc;

use crate::Amount;
use crate::context::Context;
use crate::engine::{PaymentError, SlotError};
use crate::lock::{LockKey, LockManager};
use crate::model::{
    Slot, SlotId, Transaction, TransactionId, TransactionKind, TransactionStatus, UserId,
};
use crate::store::{Store, Txn};
use crate::wallet::WalletLedger;

/// Outcome of a settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub balance_after: Amount,
    pub status: TransactionStatus,
}

impl From<&Transaction> for PaymentReceipt {
    fn from(t: &Transaction) -> Self {
        Self {
            transaction_id: t.id,
            amount: t.amount,
            balance_after: t.balance_after,
            status: t.status,
        }
    }
}

pub struct PaymentSettlement {
    store: Arc<Store>,
    ledger: WalletLedger,
    locks: LockManager,
}

impl PaymentSettlement {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            ledger: WalletLedger::new(ctx),
            locks: LockManager::new(ctx),
        }
    }

    /// Pay the frozen price of a slot locked by `user` and book it.
    ///
    /// A retry by the same user for the same slot with the same `reference`
    /// returns the original receipt; any other reuse of the reference is a
    /// conflict. If the debit fails the slot stays locked and untouched.
    pub fn pay(
        &self,
        user: UserId,
        slot: SlotId,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        self.store.atomic(|txn| {
            let replayed =
                WalletLedger::replay(txn, reference, user, TransactionKind::Debit, Some(slot))?;
            if let Some(original) = replayed {
                return Ok(PaymentReceipt::from(&original));
            }
            let slot = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if !slot.is_locked_by(user) {
                return Err(PaymentError::NotLocked {
                    slot: slot.id,
                    user,
                });
            }
            self.settle_in(txn, slot, user, reference)
        })
    }

    /// Debit `slot.price`, book the slot and drop the flow lease, inside `txn`.
    pub fn settle_in(
        &self,
        txn: &mut Txn<'_>,
        mut slot: Slot,
        user: UserId,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        let entry = self
            .ledger
            .debit_in(txn, user, slot.price, reference, Some(slot.id))?;
        let key = LockKey::new(slot.id, user);
        slot.book();
        txn.put_slot(slot);
        self.locks.release_in(txn, &key);
        Ok(PaymentReceipt::from(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingEngine;
    use crate::engine::WalletError;
    use crate::model::SlotStatus;
    use crate::testing::TestBed;
    use chrono::Duration;

    fn locked_slot(bed: &TestBed, user: UserId) -> SlotId {
        let slot = bed.add_slot(1, Duration::days(2));
        BookingEngine::new(&bed.ctx).lock_slot(slot, user).unwrap();
        slot
    }

    #[test]
    fn pay_debits_price_and_books_slot() {
        let bed = TestBed::new();
        let slot = locked_slot(&bed, 7);

        let receipt = PaymentSettlement::new(&bed.ctx)
            .pay(7, slot, Some("pay-1"))
            .unwrap();
        assert_eq!(receipt.amount, Amount::from_float(100.0));
        assert_eq!(receipt.balance_after, Amount::from_float(900.0));
        assert_eq!(receipt.status, TransactionStatus::Completed);

        let slot = bed.slot(slot);
        assert!(slot.is_booked_by(7));
        assert_eq!(slot.locked_until, None);
        assert!(!LockManager::new(&bed.ctx).is_held(&LockKey::new(slot.id, 7)));
    }

    #[test]
    fn pay_twice_with_same_reference_charges_once() {
        let bed = TestBed::new();
        let slot = locked_slot(&bed, 7);
        let settlement = PaymentSettlement::new(&bed.ctx);

        let first = settlement.pay(7, slot, Some("pay-1")).unwrap();
        let second = settlement.pay(7, slot, Some("pay-1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(bed.balance(7), Amount::from_float(900.0));
        assert_eq!(WalletLedger::new(&bed.ctx).history(7).len(), 1);
    }

    #[test]
    fn reference_of_another_user_is_not_replayed() {
        let bed = TestBed::new();
        let first = locked_slot(&bed, 7);
        let second = bed.add_slot(1, Duration::days(3));
        BookingEngine::new(&bed.ctx).lock_slot(second, 8).unwrap();
        let settlement = PaymentSettlement::new(&bed.ctx);

        settlement.pay(7, first, Some("k")).unwrap();
        let result = settlement.pay(8, second, Some("k"));
        assert!(matches!(
            result,
            Err(PaymentError::Wallet(WalletError::ReferenceConflict(_)))
        ));
        assert_eq!(result.unwrap_err().kind(), crate::engine::ErrorKind::Conflict);

        assert_eq!(bed.slot(second).status, SlotStatus::Locked);
        assert!(bed.slot(first).is_booked_by(7));
        assert!(WalletLedger::new(&bed.ctx).history(8).is_empty());
    }

    #[test]
    fn pay_requires_lock_by_payer() {
        let bed = TestBed::new();
        let slot = bed.add_slot(1, Duration::days(2));
        let settlement = PaymentSettlement::new(&bed.ctx);

        let result = settlement.pay(7, slot, None);
        assert!(matches!(result, Err(PaymentError::NotLocked { user: 7, .. })));

        BookingEngine::new(&bed.ctx).lock_slot(slot, 8).unwrap();
        let result = settlement.pay(7, slot, None);
        assert!(matches!(result, Err(PaymentError::NotLocked { user: 7, .. })));
        assert!(bed.wallet(7).is_none());
    }

    #[test]
    fn insufficient_balance_leaves_slot_locked() {
        let mut config = crate::config::Config::default();
        config.wallet.starting_balance = Amount::from_float(20.0);
        let bed = TestBed::with_config(config);
        let slot = locked_slot(&bed, 7);
        let before = bed.slot(slot);

        let result = PaymentSettlement::new(&bed.ctx).pay(7, slot, Some("pay-1"));
        assert!(matches!(
            result,
            Err(PaymentError::Wallet(WalletError::InsufficientBalance { .. }))
        ));

        let after = bed.slot(slot);
        assert_eq!(after.status, SlotStatus::Locked);
        assert_eq!(after.locked_until, before.locked_until);
        assert_eq!(after.price, before.price);
        assert!(WalletLedger::new(&bed.ctx).history(7).is_empty());
    }

    #[test]
    fn unknown_slot_is_not_found() {
        let bed = TestBed::new();
        let result = PaymentSettlement::new(&bed.ctx).pay(7, 42, None);
        assert!(matches!(
            result,
            Err(PaymentError::Slot(SlotError::NotFound(42)))
        ));
    }
}
