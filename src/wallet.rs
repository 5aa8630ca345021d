//! Wallet ledger.
//!
//! Every balance change writes the new balance and a `Completed` ledger entry in
//! the same store unit. A write carrying a `reference_id` that already has a
//! completed entry for the same wallet, kind and slot returns that entry and
//! changes nothing; any other reuse of the reference is a conflict.

use std::sync::Arc;

use crate::Amount;
use crate::clock::Clock;
use crate::context::Context;
use crate::engine::WalletError;
use crate::model::{
    SlotId, Transaction, TransactionKind, TransactionStatus, UserId, Wallet,
};
use crate::store::{Sequence, Store, Txn};

pub struct WalletLedger {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    starting_balance: Amount,
}

impl WalletLedger {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            starting_balance: ctx.config.wallet.starting_balance,
        }
    }

    pub fn debit(
        &self,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        related_slot: Option<SlotId>,
    ) -> Result<Transaction, WalletError> {
        self.store
            .atomic(|txn| self.debit_in(txn, user, amount, reference, related_slot))
    }

    pub fn credit(
        &self,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        related_slot: Option<SlotId>,
    ) -> Result<Transaction, WalletError> {
        self.store
            .atomic(|txn| self.credit_in(txn, user, amount, reference, related_slot))
    }

    /// Current balance, creating the wallet on first access.
    pub fn balance(&self, user: UserId) -> Amount {
        self.store
            .atomic(|txn| Ok::<_, WalletError>(self.ensure_wallet(txn, user).balance))
            .unwrap_or(self.starting_balance)
    }

    /// Ledger entries of a user, oldest first.
    pub fn history(&self, user: UserId) -> Vec<Transaction> {
        self.store.read(|t| match t.wallet(user) {
            Some(wallet) => t.transactions_for_wallet(wallet.id).cloned().collect(),
            None => Vec::new(),
        })
    }

    pub fn debit_in(
        &self,
        txn: &mut Txn<'_>,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        related_slot: Option<SlotId>,
    ) -> Result<Transaction, WalletError> {
        self.apply_in(txn, TransactionKind::Debit, user, amount, reference, related_slot)
    }

    pub fn credit_in(
        &self,
        txn: &mut Txn<'_>,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        related_slot: Option<SlotId>,
    ) -> Result<Transaction, WalletError> {
        self.apply_in(txn, TransactionKind::Credit, user, amount, reference, related_slot)
    }

    /// The user's wallet, created with the starting balance if missing.
    pub fn ensure_wallet(&self, txn: &mut Txn<'_>, user: UserId) -> Wallet {
        if let Some(wallet) = txn.wallet(user) {
            return wallet.clone();
        }
        let wallet = Wallet {
            id: txn.allocate(Sequence::Wallet),
            user_id: user,
            balance: self.starting_balance,
        };
        txn.put_wallet(wallet.clone());
        wallet
    }

    /// A completed entry already written under `reference` for this write.
    ///
    /// Fails with [`WalletError::ReferenceConflict`] when the entry belongs to
    /// another wallet, kind or slot.
    pub fn replay(
        txn: &Txn<'_>,
        reference: Option<&str>,
        user: UserId,
        kind: TransactionKind,
        related_slot: Option<SlotId>,
    ) -> Result<Option<Transaction>, WalletError> {
        let Some(reference) = reference else {
            return Ok(None);
        };
        let Some(original) = txn
            .transaction_by_reference(reference)
            .filter(|t| t.status == TransactionStatus::Completed)
        else {
            return Ok(None);
        };
        let same_wallet = txn.wallet(user).is_some_and(|w| w.id == original.wallet_id);
        if !same_wallet || original.kind != kind || original.related_slot_id != related_slot {
            return Err(WalletError::ReferenceConflict(reference.to_string()));
        }
        Ok(Some(original.clone()))
    }

    fn apply_in(
        &self,
        txn: &mut Txn<'_>,
        kind: TransactionKind,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        related_slot: Option<SlotId>,
    ) -> Result<Transaction, WalletError> {
        if let Some(original) = Self::replay(txn, reference, user, kind, related_slot)? {
            return Ok(original);
        }
        if amount.is_negative() {
            return Err(WalletError::NegativeAmount(amount));
        }

        let mut wallet = self.ensure_wallet(txn, user);
        let balance_before = wallet.balance;
        let balance_after = match kind {
            TransactionKind::Debit => {
                if amount > balance_before {
                    return Err(WalletError::InsufficientBalance {
                        user,
                        balance: balance_before,
                        requested: amount,
                    });
                }
                balance_before
                    .checked_sub(amount)
                    .ok_or(WalletError::Overflow { user })?
            }
            TransactionKind::Credit => balance_before
                .checked_add(amount)
                .ok_or(WalletError::Overflow { user })?,
        };

        wallet.balance = balance_after;
        let entry = Transaction {
            id: txn.allocate(Sequence::Transaction),
            wallet_id: wallet.id,
            kind,
            amount,
            balance_before,
            balance_after,
            status: TransactionStatus::Completed,
            reference_id: reference.map(str::to_string),
            related_slot_id: related_slot,
            created_at: self.clock.now(),
        };
        txn.put_wallet(wallet);
        txn.put_transaction(entry.clone());
        Ok(entry)
    }
}
