pub mod amount;
pub mod booking;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod csv;
pub mod demand;
pub mod directory;
pub mod engine;
pub mod game;
pub mod lock;
pub mod model;
pub mod payment;
pub mod pricing;
pub mod reconcile;
pub mod refund;
pub mod store;
pub mod waitlist;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use amount::Amount;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::Context;
pub use engine::{Engine, EngineError, ErrorKind};
pub use model::{Command, Fixture, Input, Scheduled};
pub use store::Store;
