//! Core domain types for the booking engine.
//!
//! Entities refer to each other by id only; relations are resolved through
//! the [`Store`](crate::store::Store) at read time.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::amount::{Amount, Factor};

pub type VenueId = u64;
pub type CourtId = u64;
pub type SlotId = u64;
pub type UserId = u64;
pub type WalletId = u64;
pub type TransactionId = u64;
pub type RefundId = u64;
pub type GameId = u64;
pub type WaitlistId = u64;
pub type DiscountId = u64;

#[derive(Debug, Clone)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Court {
    pub id: CourtId,
    pub venue_id: VenueId,
    pub name: String,
    /// Price of one slot before any multiplier.
    pub base_price: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountScope {
    Venue(VenueId),
    Court(CourtId),
}

#[derive(Debug, Clone)]
pub struct Discount {
    pub id: DiscountId,
    pub scope: DiscountScope,
    /// Fraction taken off the price, `0.2` for 20%.
    pub rate: Factor,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Discount {
    /// Whether the discount window covers `at`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Player,
    Admin,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Aggregated player rating, `None` until the user has been rated.
    pub rating: Option<f64>,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Locked,
    Booked,
    Cancelled,
    Completed,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotStatus::Available => "available",
            SlotStatus::Locked => "locked",
            SlotStatus::Booked => "booked",
            SlotStatus::Cancelled => "cancelled",
            SlotStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A bookable time slot on a court.
///
/// `price` is the base court price while the slot is available and the frozen
/// final price once it is locked. `locked_until` is set iff the slot is
/// `Locked`; `locked_by` is set iff the slot is `Locked` or `Booked`.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: SlotId,
    pub court_id: CourtId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: Amount,
    pub status: SlotStatus,
    pub locked_by: Option<UserId>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Slot {
    /// A fresh slot in the `Available` state.
    pub fn new(
        id: SlotId,
        court_id: CourtId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        price: Amount,
    ) -> Self {
        Self {
            id,
            court_id,
            start_time,
            end_time,
            price,
            status: SlotStatus::Available,
            locked_by: None,
            locked_until: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Append-only wallet ledger entry.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub status: TransactionStatus,
    /// Idempotency key supplied by the caller.
    pub reference_id: Option<String>,
    pub related_slot_id: Option<SlotId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub id: RefundId,
    /// The original payment being refunded.
    pub transaction_id: TransactionId,
    pub slot_id: SlotId,
    pub user_id: UserId,
    pub original_amount: Amount,
    pub refund_amount: Amount,
    pub refund_percentage: u8,
    pub status: RefundStatus,
    pub reason: Option<String>,
    /// Id of the original payment transaction; one refund per payment.
    pub reference_id: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WaitlistEntry {
    pub id: WaitlistId,
    pub game_id: GameId,
    pub user_id: UserId,
    pub player_rating: f64,
    pub priority: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl GameStatus {
    /// Pending and confirmed games still accept roster changes.
    pub fn is_open(self) -> bool {
        matches!(self, GameStatus::Pending | GameStatus::Confirmed)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameStatus::Pending => "pending",
            GameStatus::Confirmed => "confirmed",
            GameStatus::Cancelled => "cancelled",
            GameStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Game {
    pub id: GameId,
    pub slot_id: SlotId,
    pub kind: String,
    pub min_players: u32,
    pub max_players: u32,
    pub status: GameStatus,
    pub created_by: UserId,
    /// Roster in join order; the creator is always first.
    pub players: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Game {
    pub fn has_player(&self, user: UserId) -> bool {
        self.players.contains(&user)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() as u32 >= self.max_players
    }
}

/// Catalog rows loaded into the store before any command runs.
#[derive(Debug, Clone)]
pub enum Fixture {
    Venue(Venue),
    Court(Court),
    Slot(Slot),
    Discount(Discount),
    User(User),
}

/// Filter for available-slot listings.
#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub court_id: Option<CourtId>,
    pub venue_id: Option<VenueId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// A command representing the possible inputs of the engine.
#[derive(Debug, Clone)]
pub enum Command {
    /// List available slots, bumping their viewer counts.
    ViewSlots(SlotFilter),
    /// Start the booking flow and freeze the slot price.
    Lock { user: UserId, slot: SlotId },
    /// Pay for a locked slot and book it, requiring the flow lease.
    Confirm {
        user: UserId,
        slot: SlotId,
        reference: Option<String>,
    },
    /// Abandon the booking flow.
    Release { user: UserId, slot: SlotId },
    /// Cancel a booking without refund.
    Cancel { user: UserId, slot: SlotId },
    /// Pay for a locked slot and book it.
    Pay {
        user: UserId,
        slot: SlotId,
        reference: Option<String>,
    },
    /// Request a refund for a booked slot.
    Refund {
        user: UserId,
        slot: SlotId,
        reason: Option<String>,
    },
    CreateGame {
        user: UserId,
        slot: SlotId,
        kind: String,
        min_players: u32,
        max_players: u32,
    },
    JoinGame { user: UserId, game: GameId },
    LeaveGame { user: UserId, game: GameId },
    CancelGame { user: UserId, game: GameId },
    JoinWaitlist { user: UserId, game: GameId },
    LeaveWaitlist { user: UserId, game: GameId },
    Invite {
        inviter: UserId,
        invited: UserId,
        game: GameId,
    },
    /// Run every reconciliation job once.
    Reconcile,
}

/// One scenario row: catalog data or a command.
#[derive(Debug, Clone)]
pub enum Input {
    Fixture(Fixture),
    Command(Command),
}

/// An input stamped with the time it happens at.
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub at: DateTime<Utc>,
    pub input: Input,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn new_slot_is_available_and_unlocked() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap();
        let slot = Slot::new(1, 2, start, start + Duration::hours(1), Amount::ZERO);
        assert_eq!(slot.status, SlotStatus::Available);
        assert!(slot.locked_by.is_none());
        assert!(slot.locked_until.is_none());
    }

    #[test]
    fn discount_window_is_inclusive() {
        let from = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let until = from + Duration::days(7);
        let discount = Discount {
            id: 1,
            scope: DiscountScope::Venue(1),
            rate: Factor::from_percent(10.0),
            valid_from: from,
            valid_until: until,
        };
        assert!(discount.covers(from));
        assert!(discount.covers(until));
        assert!(!discount.covers(until + Duration::seconds(1)));
        assert!(!discount.covers(from - Duration::seconds(1)));
    }

    #[test]
    fn game_open_statuses() {
        assert!(GameStatus::Pending.is_open());
        assert!(GameStatus::Confirmed.is_open());
        assert!(!GameStatus::Cancelled.is_open());
        assert!(!GameStatus::Completed.is_open());
    }
}
