//! User lookups needed by the core.

use crate::model::{Role, UserId};
use crate::store::Store;

/// Read-only view of the user service.
pub trait UserDirectory: Send + Sync {
    /// Aggregated player rating; `None` for unknown or unrated users.
    fn rating(&self, user: UserId) -> Option<f64>;

    fn role(&self, user: UserId) -> Option<Role>;
}

impl UserDirectory for Store {
    fn rating(&self, user: UserId) -> Option<f64> {
        self.read(|t| t.user(user).and_then(|u| u.rating))
    }

    fn role(&self, user: UserId) -> Option<Role> {
        self.read(|t| t.user(user).map(|u| u.role))
    }
}
