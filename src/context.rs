//! Explicit dependencies shared by the engines and the reconciliation jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::Config;
use crate::demand::DemandTracker;
use crate::directory::UserDirectory;
use crate::store::Store;

/// Everything an engine needs. Cloning is cheap; engines are built from a
/// context on demand and never reach for global state.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub demand: DemandTracker,
    pub directory: Arc<dyn UserDirectory>,
    pub config: Arc<Config>,
}

impl Context {
    /// A context whose user directory is the store itself.
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: Config) -> Self {
        let demand = DemandTracker::new(config.pricing.demand_ttl, clock.clone());
        Self {
            directory: store.clone(),
            store,
            clock,
            demand,
            config: Arc::new(config),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
