//! Dynamic slot pricing.
//!
//! `final = round(base * demand * time * historical * discount, 2)`, where each
//! factor is looked up independently from live demand, time until start,
//! recent bookings on the same court and the best active discount.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::amount::{Amount, Factor};
use crate::context::Context;
use crate::demand::DemandTracker;
use crate::engine::SlotError;
use crate::model::{CourtId, DiscountScope, Slot, SlotId, SlotStatus, VenueId};
use crate::store::Tables;

/// Window of past bookings that feed the historical multiplier.
const HISTORY_WINDOW_DAYS: i64 = 30;

/// The price of a slot with every factor that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub base: Amount,
    pub demand: Factor,
    pub time: Factor,
    pub historical: Factor,
    pub discount: Factor,
    pub final_price: Amount,
}

impl PriceBreakdown {
    pub fn new(
        base: Amount,
        demand: Factor,
        time: Factor,
        historical: Factor,
        discount: Factor,
    ) -> Self {
        Self {
            base,
            demand,
            time,
            historical,
            discount,
            final_price: base.scale_to_cents(&[demand, time, historical, discount]),
        }
    }
}

/// Demand factor from the number of recent viewers.
///
/// A single viewer falls outside every surcharge band and prices like zero.
pub fn demand_multiplier(viewers: u32) -> Factor {
    match viewers {
        2..=5 => Factor::from_scaled(12_000),
        v if v > 5 => Factor::from_scaled(15_000),
        _ => Factor::ONE,
    }
}

/// Urgency factor from the time left until the slot starts.
pub fn time_multiplier(until_start: Duration) -> Factor {
    let hours = until_start.num_seconds() as f64 / 3600.0;
    if hours > 24.0 {
        Factor::ONE
    } else if hours >= 6.0 {
        Factor::from_scaled(12_000)
    } else {
        Factor::from_scaled(15_000)
    }
}

/// Popularity factor from comparable bookings in the trailing window.
pub fn historical_multiplier(bookings: usize) -> Factor {
    if bookings > 20 {
        Factor::from_scaled(15_000)
    } else if bookings > 10 {
        Factor::from_scaled(12_000)
    } else {
        Factor::ONE
    }
}

/// Booked or played slots on `court` in the last 30 days that fall on the same
/// weekday as `start` and within one hour of its hour.
pub fn comparable_bookings(
    tables: &Tables,
    court: CourtId,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> usize {
    let window_start = now - Duration::days(HISTORY_WINDOW_DAYS);
    tables
        .slots()
        .filter(|s| s.court_id == court)
        .filter(|s| matches!(s.status, SlotStatus::Booked | SlotStatus::Completed))
        .filter(|s| s.start_time >= window_start && s.start_time <= now)
        .filter(|s| s.start_time.weekday() == start.weekday())
        .filter(|s| s.start_time.hour().abs_diff(start.hour()) <= 1)
        .count()
}

/// Largest discount rate covering both `now` and `start` for the court or its venue.
pub fn best_discount_rate(
    tables: &Tables,
    court: Option<CourtId>,
    venue: Option<VenueId>,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Factor {
    tables
        .discounts()
        .filter(|d| match d.scope {
            DiscountScope::Court(id) => Some(id) == court,
            DiscountScope::Venue(id) => Some(id) == venue,
        })
        .filter(|d| d.covers(now) && d.covers(start))
        .map(|d| d.rate)
        .max()
        .unwrap_or(Factor::ZERO)
}

pub struct PricingEngine {
    demand: DemandTracker,
}

impl PricingEngine {
    pub fn new(ctx: &Context) -> Self {
        Self {
            demand: ctx.demand.clone(),
        }
    }

    /// Price a slot from explicit inputs.
    pub fn calculate(
        &self,
        tables: &Tables,
        slot: SlotId,
        base: Amount,
        start: DateTime<Utc>,
        court: Option<CourtId>,
        venue: Option<VenueId>,
        now: DateTime<Utc>,
    ) -> PriceBreakdown {
        let demand = demand_multiplier(self.demand.viewer_count(slot));
        let time = time_multiplier(start - now);
        let historical = match court {
            Some(court) => historical_multiplier(comparable_bookings(tables, court, start, now)),
            None => Factor::ONE,
        };
        let discount = best_discount_rate(tables, court, venue, start, now).complement();
        PriceBreakdown::new(base, demand, time, historical, discount)
    }

    /// Price a stored slot from its court's base price.
    pub fn quote(
        &self,
        tables: &Tables,
        slot: &Slot,
        now: DateTime<Utc>,
    ) -> Result<PriceBreakdown, SlotError> {
        let court = tables
            .court(slot.court_id)
            .ok_or(SlotError::CourtNotFound(slot.court_id))?;
        Ok(self.calculate(
            tables,
            slot.id,
            court.base_price,
            slot.start_time,
            Some(court.id),
            Some(court.venue_id),
            now,
        ))
    }
}
