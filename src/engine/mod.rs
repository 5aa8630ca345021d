//! Booking engine facade.
//!
//! The engine exposes every booking, payment, refund, game and waitlist
//! operation over one shared [`Context`], applies [`Command`]s with structured
//! logging, and replays a timestamped input stream on a manual clock.

use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::booking::{BookingEngine, LockedSlot, SlotQuote};
use crate::clock::ManualClock;
use crate::context::Context;
use crate::game::GameLifecycle;
use crate::model::{
    Command, Fixture, Game, GameId, Input, Refund, Scheduled, Slot, SlotFilter, SlotId,
    Transaction, UserId, WaitlistEntry, Wallet,
};
use crate::payment::{PaymentReceipt, PaymentSettlement};
use crate::reconcile;
use crate::refund::RefundEngine;
use crate::waitlist::WaitlistQueue;
use crate::wallet::WalletLedger;

mod state;

mod error;
pub use error::{
    EngineError, ErrorKind, GameError, PaymentError, RefundError, SlotError, WalletError,
};

/// The booking engine.
pub struct Engine {
    ctx: Context,
    booking: BookingEngine,
    settlement: PaymentSettlement,
    ledger: WalletLedger,
    refunds: RefundEngine,
    games: GameLifecycle,
    waitlist: WaitlistQueue,
}

/// Public API
impl Engine {
    pub fn new(ctx: Context) -> Self {
        Self {
            booking: BookingEngine::new(&ctx),
            settlement: PaymentSettlement::new(&ctx),
            ledger: WalletLedger::new(&ctx),
            refunds: RefundEngine::new(&ctx),
            games: GameLifecycle::new(&ctx),
            waitlist: WaitlistQueue::new(&ctx),
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn load(&self, fixture: Fixture) {
        self.ctx.store.load(fixture);
    }

    /// Replay a timestamped input stream, moving `clock` to each row's time
    /// before applying it. Failed commands are logged and skipped.
    pub async fn run(
        &self,
        clock: &ManualClock,
        mut stream: impl Stream<Item = Scheduled> + Unpin,
    ) {
        while let Some(row) = stream.next().await {
            if row.at < self.ctx.now() {
                warn!(at = %row.at, now = %self.ctx.now(), "row out of order, applied at current time");
            } else {
                clock.set(row.at);
            }
            match row.input {
                Input::Fixture(fixture) => self.load(fixture),
                // any error should not stop the replay, so the result is only logged
                Input::Command(command) => {
                    let _ = self.apply(command);
                }
            }
        }
    }

    /// Apply a single command on top of the current state.
    pub fn apply(&self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::ViewSlots(filter) => {
                let result = self.available_slots(&filter);
                match &result {
                    Ok(quotes) => info!(listed = quotes.len(), "view applied"),
                    Err(e) => info!(reason = %e, "view skipped"),
                }
                result?;
            }
            Command::Lock { user, slot } => {
                let result = self.lock_slot(slot, user);
                let price = result.as_ref().ok().map(|l| l.price.final_price);
                Self::log_result("lock", user, slot, price, &result);
                result?;
            }
            Command::Confirm {
                user,
                slot,
                reference,
            } => {
                let result = self.confirm_booking(slot, user, reference.as_deref());
                let amount = result.as_ref().ok().map(|r| r.amount);
                Self::log_result("confirm", user, slot, amount, &result);
                result?;
            }
            Command::Release { user, slot } => {
                let result = self.release_lock(slot, user);
                Self::log_result("release", user, slot, None, &result);
                result?;
            }
            Command::Cancel { user, slot } => {
                let result = self.cancel_booking(slot, user);
                Self::log_result("cancel", user, slot, None, &result);
                result?;
            }
            Command::Pay {
                user,
                slot,
                reference,
            } => {
                let result = self.pay(user, slot, reference.as_deref());
                let amount = result.as_ref().ok().map(|r| r.amount);
                Self::log_result("payment", user, slot, amount, &result);
                result?;
            }
            Command::Refund { user, slot, reason } => {
                let result = self.request_refund(user, slot, reason.as_deref());
                let amount = result.as_ref().ok().map(|r| r.refund_amount);
                Self::log_result("refund", user, slot, amount, &result);
                result?;
            }
            Command::CreateGame {
                user,
                slot,
                kind,
                min_players,
                max_players,
            } => {
                let result = self.create_game(user, slot, &kind, min_players, max_players);
                Self::log_result("create game", user, slot, None, &result);
                result?;
            }
            Command::JoinGame { user, game } => {
                let result = self.join_game(game, user);
                Self::log_result("join game", user, game, None, &result);
                result?;
            }
            Command::LeaveGame { user, game } => {
                let result = self.leave_game(game, user);
                Self::log_result("leave game", user, game, None, &result);
                result?;
            }
            Command::CancelGame { user, game } => {
                let result = self.cancel_game(game, user);
                Self::log_result("cancel game", user, game, None, &result);
                result?;
            }
            Command::JoinWaitlist { user, game } => {
                let result = self.join_waitlist(game, user);
                Self::log_result("join waitlist", user, game, None, &result);
                result?;
            }
            Command::LeaveWaitlist { user, game } => {
                let result = self.leave_waitlist(game, user);
                Self::log_result("leave waitlist", user, game, None, &result);
                result?;
            }
            Command::Invite {
                inviter,
                invited,
                game,
            } => {
                let result = self.invite(game, inviter, invited);
                Self::log_result("invite", inviter, game, None, &result);
                result?;
            }
            Command::Reconcile => {
                let changed = self.reconcile();
                info!(changed, "reconcile applied");
            }
        }
        Ok(())
    }

    // Slots and payments

    pub fn available_slots(&self, filter: &SlotFilter) -> Result<Vec<SlotQuote>, SlotError> {
        self.booking.available_slots(filter)
    }

    pub fn slot_details(&self, slot: SlotId) -> Result<SlotQuote, SlotError> {
        self.booking.slot_details(slot)
    }

    pub fn lock_slot(&self, slot: SlotId, user: UserId) -> Result<LockedSlot, SlotError> {
        self.booking.lock_slot(slot, user)
    }

    pub fn confirm_booking(
        &self,
        slot: SlotId,
        user: UserId,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        self.booking.confirm_booking(slot, user, reference)
    }

    pub fn release_lock(&self, slot: SlotId, user: UserId) -> Result<bool, SlotError> {
        self.booking.release_lock(slot, user)
    }

    pub fn cancel_booking(&self, slot: SlotId, user: UserId) -> Result<(), SlotError> {
        self.booking.cancel_booking(slot, user)
    }

    pub fn pay(
        &self,
        user: UserId,
        slot: SlotId,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        self.settlement.pay(user, slot, reference)
    }

    pub fn balance(&self, user: UserId) -> Amount {
        self.ledger.balance(user)
    }

    pub fn history(&self, user: UserId) -> Vec<Transaction> {
        self.ledger.history(user)
    }

    // Refunds

    pub fn request_refund(
        &self,
        user: UserId,
        slot: SlotId,
        reason: Option<&str>,
    ) -> Result<Refund, RefundError> {
        self.refunds.request_refund(user, slot, reason)
    }

    // Games and waitlists

    pub fn create_game(
        &self,
        user: UserId,
        slot: SlotId,
        kind: &str,
        min_players: u32,
        max_players: u32,
    ) -> Result<Game, GameError> {
        self.games
            .create_game(user, slot, kind, min_players, max_players)
    }

    pub fn join_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        self.games.join_game(game, user)
    }

    pub fn leave_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        self.games.leave_game(game, user)
    }

    pub fn cancel_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        self.games.cancel_game(game, user)
    }

    pub fn join_waitlist(&self, game: GameId, user: UserId) -> Result<WaitlistEntry, GameError> {
        self.waitlist.join(game, user)
    }

    pub fn leave_waitlist(&self, game: GameId, user: UserId) -> Result<(), GameError> {
        self.waitlist.leave(game, user)
    }

    pub fn waitlist(&self, game: GameId) -> Vec<WaitlistEntry> {
        self.waitlist.ordered(game)
    }

    pub fn invite(
        &self,
        game: GameId,
        inviter: UserId,
        invited: UserId,
    ) -> Result<Game, GameError> {
        self.waitlist.invite(game, inviter, invited)
    }

    /// Run every reconciliation job once. Returns how many records changed.
    pub fn reconcile(&self) -> usize {
        reconcile::run_all(&self.ctx)
    }

    // Reports

    /// Wallets ordered by owner.
    pub fn wallets(&self) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self.ctx.store.read(|t| t.wallets().cloned().collect());
        wallets.sort_by_key(|w| w.user_id);
        wallets
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.ctx.store.read(|t| t.slots().cloned().collect())
    }

    pub fn refunds(&self) -> Vec<Refund> {
        self.ctx.store.read(|t| t.refunds().cloned().collect())
    }

    pub fn games(&self) -> Vec<Game> {
        self.ctx.store.read(|t| t.games().cloned().collect())
    }
}

/// Private API
impl Engine {
    /// Small helper to log `apply` results
    fn log_result<T, E: std::fmt::Display>(
        command: &str,
        user: UserId,
        target: u64,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => {
                info!(
                    user = %user,
                    target = %target,
                    amount = %amt,
                    "{command} applied"
                );
            }
            (Ok(_), None) => {
                info!(
                    user = %user,
                    target = %target,
                    "{command} applied"
                );
            }
            (Err(e), _) => {
                info!(
                    user = %user,
                    target = %target,
                    reason = %e,
                    "{command} skipped"
                );
            }
        }
    }
}
