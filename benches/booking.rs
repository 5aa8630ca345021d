use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use court_booking::model::{Court, Slot, SlotId, UserId, Venue};
use court_booking::{Amount, Command, Config, Context, Engine, Fixture, ManualClock, Store};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

/// An engine with one court and `slots` hourly slots starting two days out.
fn engine(slots: u64) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let ctx = Context::new(Arc::new(Store::new()), clock.clone(), Config::default());
    let engine = Engine::new(ctx);
    engine.load(Fixture::Venue(Venue {
        id: 1,
        name: "Riverside".into(),
    }));
    engine.load(Fixture::Court(Court {
        id: 1,
        venue_id: 1,
        name: "Court 1".into(),
        base_price: Amount::from_float(10.0),
    }));
    for id in 1..=slots {
        let start = t0() + Duration::days(2) + Duration::hours(id as i64);
        engine.load(Fixture::Slot(Slot::new(
            id,
            1,
            start,
            start + Duration::hours(1),
            Amount::from_float(10.0),
        )));
    }
    (engine, clock)
}

/// Lock and confirm every slot, rotating through `users` buyers.
///
/// Every buyer starts with 1000 and each slot costs 10, so payments only fail
/// once a buyer has booked 100 slots.
pub struct BookingFlow {
    slots: SlotId,
    users: UserId,
    next: SlotId,
    confirm: bool,
}

impl BookingFlow {
    pub fn new(slots: SlotId, users: UserId) -> Self {
        Self {
            slots,
            users,
            next: 1,
            confirm: false,
        }
    }
}

impl Iterator for BookingFlow {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.slots {
            return None;
        }
        let slot = self.next;
        let user = slot % self.users + 1;
        let command = if self.confirm {
            self.next += 1;
            Command::Confirm {
                user,
                slot,
                reference: Some(format!("c-{slot}")),
            }
        } else {
            Command::Lock { user, slot }
        };
        self.confirm = !self.confirm;
        Some(command)
    }
}

fn bench_lock_confirm(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_confirm");

    for (slots, users) in [(1_000u64, 10u64), (10_000, 100)] {
        let label = format!("{slots}s_{users}u");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(slots, users),
            |b, &(slots, users)| {
                b.iter(|| {
                    let (engine, _) = engine(slots);
                    for command in BookingFlow::new(slots, users) {
                        let _ = black_box(engine.apply(command));
                    }
                    engine
                });
            },
        );
    }

    group.finish();
}

fn bench_lock_expiry(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    group.bench_function("expire_10k_locks", |b| {
        b.iter(|| {
            let (engine, clock) = engine(10_000);
            for slot in 1..=10_000 {
                let _ = engine.apply(Command::Lock {
                    user: slot % 100 + 1,
                    slot,
                });
            }
            clock.advance(Duration::minutes(6));
            black_box(engine.reconcile())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lock_confirm, bench_lock_expiry);
criterion_main!(benches);
