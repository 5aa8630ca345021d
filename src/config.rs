//! Runtime configuration, read from `COURT_BOOKING_*` environment variables.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use crate::amount::Amount;

/// Upper bound for configured durations; keeps `now + duration` in range.
const MAX_DURATION_DAYS: i64 = 366;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub booking: BookingConfig,
    pub wallet: WalletConfig,
    pub waitlist: WaitlistConfig,
    pub pricing: PricingConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// How long a locked slot keeps its frozen price.
    pub lock_duration: Duration,
    /// Lifetime of the `{slot}:{user}` flow lease.
    pub flow_lock_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub starting_balance: Amount,
}

#[derive(Debug, Clone)]
pub struct WaitlistConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub demand_ttl: Duration,
}

/// Intervals of the reconciliation jobs.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub lock_expiry: StdDuration,
    pub refunds: StdDuration,
    pub auto_cancel: StdDuration,
    pub completion: StdDuration,
    pub waitlist_cleanup: StdDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            booking: BookingConfig {
                lock_duration: Duration::minutes(5),
                flow_lock_duration: Duration::minutes(10),
            },
            wallet: WalletConfig {
                starting_balance: Amount::from_float(1000.0),
            },
            waitlist: WaitlistConfig { max_size: 20 },
            pricing: PricingConfig {
                demand_ttl: Duration::hours(24),
            },
            schedule: ScheduleConfig {
                lock_expiry: StdDuration::from_secs(60),
                refunds: StdDuration::from_secs(5 * 60),
                auto_cancel: StdDuration::from_secs(15 * 60),
                completion: StdDuration::from_secs(10 * 60),
                waitlist_cleanup: StdDuration::from_secs(10 * 60),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env(&lookup);
        Ok(Self {
            booking: BookingConfig {
                lock_duration: env.seconds(
                    "COURT_BOOKING_LOCK_DURATION_SECS",
                    defaults.booking.lock_duration,
                )?,
                flow_lock_duration: env.seconds(
                    "COURT_BOOKING_FLOW_LOCK_DURATION_SECS",
                    defaults.booking.flow_lock_duration,
                )?,
            },
            wallet: WalletConfig {
                starting_balance: env.amount(
                    "COURT_BOOKING_STARTING_BALANCE",
                    defaults.wallet.starting_balance,
                )?,
            },
            waitlist: WaitlistConfig {
                max_size: env.parse("COURT_BOOKING_WAITLIST_MAX_SIZE", defaults.waitlist.max_size)?,
            },
            pricing: PricingConfig {
                demand_ttl: env.seconds("COURT_BOOKING_DEMAND_TTL_SECS", defaults.pricing.demand_ttl)?,
            },
            schedule: ScheduleConfig {
                lock_expiry: env.interval(
                    "COURT_BOOKING_LOCK_EXPIRY_INTERVAL_SECS",
                    defaults.schedule.lock_expiry,
                )?,
                refunds: env.interval(
                    "COURT_BOOKING_REFUND_INTERVAL_SECS",
                    defaults.schedule.refunds,
                )?,
                auto_cancel: env.interval(
                    "COURT_BOOKING_AUTO_CANCEL_INTERVAL_SECS",
                    defaults.schedule.auto_cancel,
                )?,
                completion: env.interval(
                    "COURT_BOOKING_COMPLETION_INTERVAL_SECS",
                    defaults.schedule.completion,
                )?,
                waitlist_cleanup: env.interval(
                    "COURT_BOOKING_WAITLIST_CLEANUP_INTERVAL_SECS",
                    defaults.schedule.waitlist_cleanup,
                )?,
            },
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match (self.0)(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs: i64 = self.parse(key, default.num_seconds())?;
        Duration::try_seconds(secs)
            .filter(|d| *d > Duration::zero() && *d <= Duration::days(MAX_DURATION_DAYS))
            .ok_or_else(|| ConfigError::Invalid {
                key: key.to_string(),
                value: secs.to_string(),
            })
    }

    fn interval(&self, key: &str, default: StdDuration) -> Result<StdDuration, ConfigError> {
        let secs: u64 = self.parse(key, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: secs.to_string(),
            });
        }
        Ok(StdDuration::from_secs(secs))
    }

    fn amount(&self, key: &str, default: Amount) -> Result<Amount, ConfigError> {
        match (self.0)(key) {
            None => Ok(default),
            Some(value) => match value.trim().parse::<f64>() {
                Ok(v) if v >= 0.0 => Ok(Amount::from_float(v)),
                _ => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                }),
            },
        }
    }
}
