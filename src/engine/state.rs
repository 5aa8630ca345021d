use chrono::{DateTime, Utc};

use crate::Amount;
use crate::model::{Game, GameStatus, Slot, SlotStatus, UserId};

/// Slot state transitions. Callers check preconditions; these only keep the
/// lock/booking fields consistent with the status.
impl Slot {
    /// `Available -> Locked`, freezing `price`.
    pub fn lock(&mut self, user: UserId, until: DateTime<Utc>, price: Amount) {
        self.status = SlotStatus::Locked;
        self.locked_by = Some(user);
        self.locked_until = Some(until);
        self.price = price;
    }

    /// `Locked -> Booked`, keeping the owner and the frozen price.
    pub fn book(&mut self) {
        self.status = SlotStatus::Booked;
        self.locked_until = None;
    }

    /// `Locked -> Available`; the price goes back to the unpriced placeholder.
    pub fn unlock(&mut self) {
        self.status = SlotStatus::Available;
        self.locked_by = None;
        self.locked_until = None;
        self.price = Amount::ZERO;
    }

    /// `Booked -> Cancelled`.
    pub fn cancel(&mut self) {
        self.status = SlotStatus::Cancelled;
        self.locked_by = None;
        self.locked_until = None;
    }

    /// `Booked -> Completed`.
    pub fn complete(&mut self) {
        self.status = SlotStatus::Completed;
        self.locked_until = None;
    }

    pub fn is_locked_by(&self, user: UserId) -> bool {
        self.status == SlotStatus::Locked && self.locked_by == Some(user)
    }

    pub fn is_booked_by(&self, user: UserId) -> bool {
        self.status == SlotStatus::Booked && self.locked_by == Some(user)
    }

    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SlotStatus::Locked && self.locked_until.is_none_or(|until| until < now)
    }
}

impl Game {
    /// Move between `Pending` and `Confirmed` following the roster size.
    pub fn refresh_status(&mut self) {
        let enough = self.players.len() as u32 >= self.min_players;
        self.status = match self.status {
            GameStatus::Pending if enough => GameStatus::Confirmed,
            GameStatus::Confirmed if !enough => GameStatus::Pending,
            status => status,
        };
    }
}
