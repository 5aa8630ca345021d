//! Refund requests and their asynchronous settlement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::Amount;
use crate::clock::Clock;
use crate::context::Context;
use crate::engine::{RefundError, SlotError, WalletError};
use crate::model::{
    Refund, RefundId, RefundStatus, SlotId, SlotStatus, TransactionKind, TransactionStatus,
    UserId,
};
use crate::store::{Sequence, Store};
use crate::wallet::WalletLedger;

/// Refund as a function of hours left before the slot starts.
///
/// A reason mentioning venue unavailability always refunds in full.
pub fn calculate_refund_amount(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    original: Amount,
    reason: Option<&str>,
) -> (Amount, u8) {
    let venue_unavailable = reason.is_some_and(|r| r.to_lowercase().contains("unavailable"));
    let hours = (start - now).num_seconds() as f64 / 3600.0;
    let percent = if venue_unavailable || hours > 24.0 {
        100
    } else if hours >= 6.0 {
        50
    } else {
        0
    };
    (original.percent(percent), percent)
}

/// Outcome counts of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub completed: usize,
    pub failed: usize,
}

impl ProcessReport {
    pub fn record(&mut self, status: Option<RefundStatus>) {
        match status {
            Some(RefundStatus::Completed) => self.completed += 1,
            Some(RefundStatus::Failed) => self.failed += 1,
            _ => {}
        }
    }
}

pub struct RefundEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    ledger: WalletLedger,
}

impl RefundEngine {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            ledger: WalletLedger::new(ctx),
        }
    }

    /// Open a refund for the user's payment on a booked slot.
    ///
    /// Keyed by the payment: a second request returns the first refund.
    pub fn request_refund(
        &self,
        user: UserId,
        slot: SlotId,
        reason: Option<&str>,
    ) -> Result<Refund, RefundError> {
        let now = self.clock.now();
        self.store.atomic(|txn| {
            let booked = txn.slot(slot).cloned().ok_or(SlotError::NotFound(slot))?;
            if !booked.is_booked_by(user) {
                return Err(SlotError::NotBookedBy { slot, user }.into());
            }
            let payment = txn
                .wallet(user)
                .and_then(|wallet| {
                    txn.transactions_for_wallet(wallet.id)
                        .filter(|t| t.kind == TransactionKind::Debit)
                        .filter(|t| t.status == TransactionStatus::Completed)
                        .filter(|t| t.related_slot_id == Some(slot))
                        .max_by_key(|t| t.id)
                })
                .cloned()
                .ok_or(RefundError::PaymentNotFound { slot, user })?;

            let reference = payment.id.to_string();
            if let Some(existing) = txn.refund_by_reference(&reference) {
                return Ok(existing.clone());
            }

            let (refund_amount, refund_percentage) =
                calculate_refund_amount(booked.start_time, now, payment.amount, reason);
            let refund = Refund {
                id: txn.allocate(Sequence::Refund),
                transaction_id: payment.id,
                slot_id: slot,
                user_id: user,
                original_amount: payment.amount,
                refund_amount,
                refund_percentage,
                status: RefundStatus::Pending,
                reason: reason.map(str::to_string),
                reference_id: reference,
                failure_reason: None,
                created_at: now,
                processed_at: None,
            };
            txn.put_refund(refund.clone());
            Ok(refund)
        })
    }

    /// Refunds waiting for settlement, oldest first.
    pub fn pending_refunds(&self) -> Vec<RefundId> {
        self.store.read(|t| {
            t.refunds()
                .filter(|r| matches!(r.status, RefundStatus::Pending | RefundStatus::Processing))
                .map(|r| r.id)
                .collect()
        })
    }

    /// Settle one refund. Returns its final status, or `None` if it was not
    /// waiting for settlement.
    ///
    /// Failures are stored on the refund rather than returned.
    pub fn process_refund(&self, id: RefundId) -> Option<RefundStatus> {
        let refund = self
            .store
            .atomic(|txn| {
                let mut refund = txn.refund(id).cloned().ok_or(RefundError::NotFound(id))?;
                if !matches!(refund.status, RefundStatus::Pending | RefundStatus::Processing) {
                    return Err(RefundError::NotFound(id));
                }
                refund.status = RefundStatus::Processing;
                txn.put_refund(refund.clone());
                Ok(refund)
            })
            .ok()?;

        if let Err(e) = self.validate(&refund) {
            warn!(refund = id, error = %e, "refund failed validation");
            self.fail(id, e.to_string());
            return Some(RefundStatus::Failed);
        }

        match self.settle(&refund) {
            Ok(status) => {
                debug!(refund = id, amount = %refund.refund_amount, ?status, "refund settled");
                Some(status)
            }
            Err(e) => {
                warn!(refund = id, error = %e, "refund settlement failed");
                self.fail(id, e.to_string());
                Some(RefundStatus::Failed)
            }
        }
    }

    pub fn process_pending_refunds(&self) -> ProcessReport {
        self.process_pending_refunds_until(|| false)
    }

    /// Settle pending refunds until `stopped` turns true between two refunds.
    pub fn process_pending_refunds_until(&self, stopped: impl Fn() -> bool) -> ProcessReport {
        let mut report = ProcessReport::default();
        for id in self.pending_refunds() {
            if stopped() {
                break;
            }
            report.record(self.process_refund(id));
        }
        report
    }

    fn validate(&self, refund: &Refund) -> Result<(), RefundError> {
        self.store.read(|t| -> Result<(), RefundError> {
            let payment = t
                .transaction(refund.transaction_id)
                .filter(|p| p.status == TransactionStatus::Completed)
                .ok_or(RefundError::PaymentNotCompleted(refund.transaction_id))?;
            t.wallet_by_id(payment.wallet_id)
                .filter(|w| w.user_id == refund.user_id)
                .map(|_| ())
                .ok_or_else(|| WalletError::NotFound(refund.user_id).into())
        })
    }

    /// Credit the wallet, complete the refund and cancel the slot in one unit.
    ///
    /// Only a refund still `Processing` is settled; the status check and the
    /// credit share the unit, so a refund is credited at most once.
    fn settle(&self, refund: &Refund) -> Result<RefundStatus, RefundError> {
        let now = self.clock.now();
        self.store.atomic(|txn| {
            let mut current = txn
                .refund(refund.id)
                .cloned()
                .ok_or(RefundError::NotFound(refund.id))?;
            if current.status != RefundStatus::Processing {
                return Ok(current.status);
            }

            if !current.refund_amount.is_zero() {
                self.ledger.credit_in(
                    txn,
                    current.user_id,
                    current.refund_amount,
                    None,
                    Some(current.slot_id),
                )?;
            }

            current.status = RefundStatus::Completed;
            current.processed_at = Some(now);
            current.failure_reason = None;
            txn.put_refund(current.clone());

            if let Some(mut slot) = txn.slot(current.slot_id).cloned() {
                if slot.status == SlotStatus::Booked {
                    slot.cancel();
                    txn.put_slot(slot);
                }
            }
            Ok(RefundStatus::Completed)
        })
    }

    fn fail(&self, id: RefundId, reason: String) {
        let now = self.clock.now();
        let _ = self.store.atomic(|txn| {
            let mut refund = txn.refund(id).cloned().ok_or(())?;
            refund.status = RefundStatus::Failed;
            refund.failure_reason = Some(reason);
            refund.processed_at = Some(now);
            txn.put_refund(refund);
            Ok::<_, ()>(())
        });
    }
}
