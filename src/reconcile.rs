//! Periodic reconciliation jobs.
//!
//! Each job rebuilds its engines from the [`Context`] on every pass, works
//! through its records one unit at a time and checks the shutdown signal only
//! between records.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::booking::BookingEngine;
use crate::config::ScheduleConfig;
use crate::context::Context;
use crate::game::GameLifecycle;
use crate::refund::RefundEngine;
use crate::waitlist::WaitlistQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    LockExpiry,
    Refunds,
    AutoCancel,
    Completion,
    WaitlistCleanup,
}

impl Job {
    pub const ALL: [Job; 5] = [
        Job::LockExpiry,
        Job::Refunds,
        Job::AutoCancel,
        Job::Completion,
        Job::WaitlistCleanup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Job::LockExpiry => "lock_expiry",
            Job::Refunds => "refunds",
            Job::AutoCancel => "auto_cancel",
            Job::Completion => "completion",
            Job::WaitlistCleanup => "waitlist_cleanup",
        }
    }

    pub fn interval(self, schedule: &ScheduleConfig) -> Duration {
        match self {
            Job::LockExpiry => schedule.lock_expiry,
            Job::Refunds => schedule.refunds,
            Job::AutoCancel => schedule.auto_cancel,
            Job::Completion => schedule.completion,
            Job::WaitlistCleanup => schedule.waitlist_cleanup,
        }
    }

    /// One pass over the job's records. Returns how many records changed.
    pub fn run_once(self, ctx: &Context, shutdown: &watch::Receiver<bool>) -> usize {
        let stopped = || *shutdown.borrow();
        match self {
            Job::LockExpiry => BookingEngine::new(ctx).expire_locks_until(stopped),
            Job::Refunds => {
                let report = RefundEngine::new(ctx).process_pending_refunds_until(stopped);
                report.completed + report.failed
            }
            Job::AutoCancel => GameLifecycle::new(ctx).cancel_games_with_low_players_until(stopped),
            Job::Completion => GameLifecycle::new(ctx).complete_games_until(stopped),
            Job::WaitlistCleanup => WaitlistQueue::new(ctx).cleanup_started_games_until(stopped),
        }
    }
}

/// Run every job once, in declaration order.
pub fn run_all(ctx: &Context) -> usize {
    let (_keep, shutdown) = watch::channel(false);
    Job::ALL
        .into_iter()
        .map(|job| job.run_once(ctx, &shutdown))
        .sum()
}

/// Start one task per job. Tasks exit once `shutdown` turns `true` or its
/// sender is dropped.
pub fn spawn(ctx: Context, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    Job::ALL
        .into_iter()
        .map(|job| tokio::spawn(run(job, ctx.clone(), shutdown.clone())))
        .collect()
}

async fn run(job: Job, ctx: Context, mut shutdown: watch::Receiver<bool>) {
    let period = job.interval(&ctx.config.schedule);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let changed = job.run_once(&ctx, &shutdown);
                if changed > 0 {
                    info!(job = job.name(), changed, "reconciled");
                }
            }
            result = shutdown.changed() => {
                if result.is_err() {
                    break;
                }
            }
        }
    }
    debug!(job = job.name(), "stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SlotStatus;
    use crate::testing::TestBed;

    #[test]
    fn intervals_follow_schedule() {
        let schedule = crate::config::Config::default().schedule;
        let secs: Vec<_> = Job::ALL
            .iter()
            .map(|j| j.interval(&schedule).as_secs())
            .collect();
        assert_eq!(secs, vec![60, 300, 900, 600, 600]);
    }

    #[test]
    fn run_once_stops_between_records_on_shutdown() {
        let bed = TestBed::new();
        let booking = BookingEngine::new(&bed.ctx);
        for id in 1..=3 {
            bed.add_slot(id, chrono::Duration::days(2));
            booking.lock_slot(id, 7).unwrap();
        }
        bed.advance(chrono::Duration::minutes(6));

        let (tx, rx) = watch::channel(true);
        assert_eq!(Job::LockExpiry.run_once(&bed.ctx, &rx), 0);
        assert_eq!(bed.slot(1).status, SlotStatus::Locked);

        tx.send(false).unwrap();
        assert_eq!(Job::LockExpiry.run_once(&bed.ctx, &rx), 3);
        assert_eq!(Job::LockExpiry.run_once(&bed.ctx, &rx), 0);
    }

    #[test]
    fn run_all_converges_state() {
        let bed = TestBed::new();
        let booking = BookingEngine::new(&bed.ctx);
        bed.add_slot(1, chrono::Duration::days(2));
        booking.lock_slot(1, 7).unwrap();
        bed.add_slot(2, chrono::Duration::days(2));
        booking.lock_slot(2, 8).unwrap();
        booking.confirm_booking(2, 8, None).unwrap();
        RefundEngine::new(&bed.ctx).request_refund(8, 2, None).unwrap();
        bed.advance(chrono::Duration::minutes(6));

        assert_eq!(run_all(&bed.ctx), 2);
        assert_eq!(bed.slot(1).status, SlotStatus::Available);
        assert_eq!(bed.slot(2).status, SlotStatus::Cancelled);
        assert_eq!(run_all(&bed.ctx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_jobs_on_their_interval_until_shutdown() {
        let bed = TestBed::new();
        bed.add_slot(1, chrono::Duration::days(2));
        BookingEngine::new(&bed.ctx).lock_slot(1, 7).unwrap();
        bed.advance(chrono::Duration::minutes(6));

        let (tx, rx) = watch::channel(false);
        let handles = spawn(bed.ctx.clone(), rx);

        // nothing runs before the first period elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(bed.slot(1).status, SlotStatus::Locked);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(bed.slot(1).status, SlotStatus::Available);

        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
