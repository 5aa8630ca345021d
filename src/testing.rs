//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::Amount;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::context::Context;
use crate::model::{
    Court, Fixture, Game, GameId, Role, Slot, SlotId, User, UserId, Venue, Wallet,
};
use crate::store::Store;

pub(crate) const VENUE: u64 = 1;
pub(crate) const COURT: u64 = 1;

/// 2026-05-01 12:00 UTC, a Friday.
pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

/// A store with one venue and one court (base price 100) and a manual clock at [`t0`].
pub(crate) struct TestBed {
    pub clock: Arc<ManualClock>,
    pub ctx: Context,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(Store::new());
        store.load(Fixture::Venue(Venue {
            id: VENUE,
            name: "Riverside".into(),
        }));
        store.load(Fixture::Court(Court {
            id: COURT,
            venue_id: VENUE,
            name: "Court 1".into(),
            base_price: Amount::from_float(100.0),
        }));
        let ctx = Context::new(store, clock.clone(), config);
        Self { clock, ctx }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Add a one-hour available slot on [`COURT`] starting `start_in` from now.
    pub fn add_slot(&self, id: SlotId, start_in: Duration) -> SlotId {
        let start = self.now() + start_in;
        self.ctx.store.load(Fixture::Slot(Slot::new(
            id,
            COURT,
            start,
            start + Duration::hours(1),
            Amount::from_float(100.0),
        )));
        id
    }

    pub fn add_user(&self, id: UserId, rating: Option<f64>, role: Role) {
        self.ctx.store.load(Fixture::User(User {
            id,
            name: format!("user-{id}"),
            rating,
            role,
        }));
    }

    pub fn slot(&self, id: SlotId) -> Slot {
        self.ctx.store.read(|t| t.slot(id).cloned()).unwrap()
    }

    pub fn game(&self, id: GameId) -> Game {
        self.ctx.store.read(|t| t.game(id).cloned()).unwrap()
    }

    pub fn wallet(&self, user: UserId) -> Option<Wallet> {
        self.ctx.store.read(|t| t.wallet(user).cloned())
    }

    pub fn balance(&self, user: UserId) -> Amount {
        self.wallet(user).map(|w| w.balance).unwrap()
    }
}
