//! Per-game waitlist.
//!
//! `priority = floor(rating * 1000) - waitlist size at join time`. Entries are
//! served by priority, highest first, then by join time.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::context::Context;
use crate::directory::UserDirectory;
use crate::engine::GameError;
use crate::model::{Game, GameId, GameStatus, UserId, WaitlistEntry};
use crate::store::{Sequence, Store};

pub fn priority(rating: f64, waitlist_size: usize) -> i64 {
    (rating * 1000.0).floor() as i64 - waitlist_size as i64
}

pub struct WaitlistQueue {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn UserDirectory>,
    max_size: usize,
}

impl WaitlistQueue {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            directory: ctx.directory.clone(),
            max_size: ctx.config.waitlist.max_size,
        }
    }

    /// Queue `user` for a pending game. Joining twice returns the first entry.
    pub fn join(&self, game: GameId, user: UserId) -> Result<WaitlistEntry, GameError> {
        let rating = self.directory.rating(user).unwrap_or(0.0);
        let now = self.clock.now();
        self.store.atomic(|txn| {
            let current = txn.game(game).ok_or(GameError::NotFound(game))?;
            if current.status != GameStatus::Pending {
                return Err(GameError::NotOpen {
                    game,
                    status: current.status,
                });
            }
            if current.has_player(user) {
                return Err(GameError::AlreadyPlayer { game, user });
            }
            if let Some(existing) = txn.waitlist_entry(game, user) {
                return Ok(existing.clone());
            }
            let size = txn.waitlist_for_game(game).count();
            if size >= self.max_size {
                return Err(GameError::WaitlistFull {
                    game,
                    max: self.max_size,
                });
            }

            let entry = WaitlistEntry {
                id: txn.allocate(Sequence::Waitlist),
                game_id: game,
                user_id: user,
                player_rating: rating,
                priority: priority(rating, size),
                joined_at: now,
            };
            txn.put_waitlist_entry(entry.clone());
            Ok(entry)
        })
    }

    pub fn leave(&self, game: GameId, user: UserId) -> Result<(), GameError> {
        self.store.atomic(|txn| {
            let entry = txn
                .waitlist_entry(game, user)
                .map(|e| e.id)
                .ok_or(GameError::NotWaitlisted { game, user })?;
            txn.remove_waitlist_entry(entry);
            Ok(())
        })
    }

    /// Entries in serving order.
    pub fn ordered(&self, game: GameId) -> Vec<WaitlistEntry> {
        let mut entries: Vec<WaitlistEntry> = self
            .store
            .read(|t| t.waitlist_for_game(game).cloned().collect());
        entries.sort_by_key(|e| (Reverse(e.priority), e.joined_at, e.id));
        entries
    }

    /// Move a waitlisted user into the roster. Only the creator may invite.
    pub fn invite(
        &self,
        game: GameId,
        inviter: UserId,
        invited: UserId,
    ) -> Result<Game, GameError> {
        self.store.atomic(|txn| {
            let mut current = txn.game(game).cloned().ok_or(GameError::NotFound(game))?;
            if current.created_by != inviter {
                return Err(GameError::NotCreator {
                    game,
                    user: inviter,
                });
            }
            if !current.status.is_open() {
                return Err(GameError::NotOpen {
                    game,
                    status: current.status,
                });
            }
            if current.is_full() {
                return Err(GameError::Full(game));
            }
            if current.has_player(invited) {
                return Err(GameError::AlreadyPlayer {
                    game,
                    user: invited,
                });
            }
            let entry = txn
                .waitlist_entry(game, invited)
                .map(|e| e.id)
                .ok_or(GameError::NotWaitlisted {
                    game,
                    user: invited,
                })?;

            current.players.push(invited);
            current.refresh_status();
            txn.put_game(current.clone());
            txn.remove_waitlist_entry(entry);
            Ok(current)
        })
    }

    /// Drop every entry of a game. Returns how many were removed.
    pub fn remove_all_for_game(&self, game: GameId) -> usize {
        self.store
            .atomic(|txn| {
                let ids: Vec<_> = txn.waitlist_for_game(game).map(|e| e.id).collect();
                for id in &ids {
                    txn.remove_waitlist_entry(*id);
                }
                Ok::<_, ()>(ids.len())
            })
            .unwrap_or(0)
    }

    /// Games whose slot has started but which still have waitlist entries.
    pub fn started_games_with_entries(&self) -> Vec<GameId> {
        let now = self.clock.now();
        self.store.read(|t| {
            t.games()
                .filter(|g| t.slot(g.slot_id).is_some_and(|s| s.start_time <= now))
                .filter(|g| t.waitlist_for_game(g.id).next().is_some())
                .map(|g| g.id)
                .collect()
        })
    }

    pub fn cleanup_started_games(&self) -> usize {
        self.cleanup_started_games_until(|| false)
    }

    pub fn cleanup_started_games_until(&self, stopped: impl Fn() -> bool) -> usize {
        self.started_games_with_entries()
            .into_iter()
            .take_while(|_| !stopped())
            .map(|game| {
                let removed = self.remove_all_for_game(game);
                debug!(game, removed, "cleared waitlist of started game");
                removed
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::GameLifecycle;
    use crate::model::{Role, SlotId};
    use crate::testing::TestBed;
    use chrono::Duration;

    /// A pending game for 4 on a booked slot, created by user 1.
    fn game_bed(config: Config) -> (TestBed, GameId) {
        let bed = TestBed::with_config(config);
        let slot = bed.add_slot(1, Duration::days(2));
        let game = booked_game(&bed, slot, 1, 4);
        (bed, game)
    }

    fn booked_game(bed: &TestBed, slot: SlotId, creator: UserId, max: u32) -> GameId {
        let booking = crate::booking::BookingEngine::new(&bed.ctx);
        booking.lock_slot(slot, creator).unwrap();
        booking.confirm_booking(slot, creator, None).unwrap();
        GameLifecycle::new(&bed.ctx)
            .create_game(creator, slot, "padel", max, max)
            .unwrap()
            .id
    }

    fn entry(id: u64, game: GameId, user: UserId, priority: i64, bed: &TestBed, joined: i64) {
        bed.ctx
            .store
            .atomic(|txn| {
                txn.put_waitlist_entry(WaitlistEntry {
                    id,
                    game_id: game,
                    user_id: user,
                    player_rating: 0.0,
                    priority,
                    joined_at: bed.now() + Duration::minutes(joined),
                });
                Ok::<_, ()>(())
            })
            .unwrap();
    }

    #[test]
    fn priority_formula() {
        assert_eq!(priority(4.5, 0), 4500);
        assert_eq!(priority(4.5, 3), 4497);
        assert_eq!(priority(0.0, 2), -2);
        assert_eq!(priority(3.9999, 0), 3999);
    }

    #[test]
    fn higher_priority_is_served_first() {
        let (bed, game) = game_bed(Config::default());
        entry(1, game, 10, 5, &bed, 0);
        entry(2, game, 11, 10, &bed, 5);

        let users: Vec<_> = WaitlistQueue::new(&bed.ctx)
            .ordered(game)
            .iter()
            .map(|e| e.user_id)
            .collect();
        assert_eq!(users, vec![11, 10]);
    }

    #[test]
    fn equal_priority_is_served_by_join_time_then_id() {
        let (bed, game) = game_bed(Config::default());
        entry(3, game, 12, 7, &bed, 10);
        entry(2, game, 11, 7, &bed, 0);
        entry(1, game, 10, 7, &bed, 10);

        let users: Vec<_> = WaitlistQueue::new(&bed.ctx)
            .ordered(game)
            .iter()
            .map(|e| e.user_id)
            .collect();
        assert_eq!(users, vec![11, 10, 12]);
    }

    #[test]
    fn join_uses_rating_and_queue_size() {
        let (bed, game) = game_bed(Config::default());
        bed.add_user(10, Some(3.0), Role::Player);
        bed.add_user(11, Some(4.5), Role::Player);
        let queue = WaitlistQueue::new(&bed.ctx);

        let first = queue.join(game, 10).unwrap();
        assert_eq!(first.priority, 3000);
        let second = queue.join(game, 11).unwrap();
        assert_eq!(second.priority, 4499);
        // unrated users count as zero
        let third = queue.join(game, 12).unwrap();
        assert_eq!(third.player_rating, 0.0);
        assert_eq!(third.priority, -2);

        // joining again is a no-op
        let again = queue.join(game, 10).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(queue.ordered(game).len(), 3);

        let users: Vec<_> = queue.ordered(game).iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![11, 10, 12]);
    }

    #[test]
    fn join_rejects_players_full_queues_and_closed_games() {
        let mut config = Config::default();
        config.waitlist.max_size = 2;
        let (bed, game) = game_bed(config);
        let queue = WaitlistQueue::new(&bed.ctx);

        assert!(matches!(
            queue.join(game, 1),
            Err(GameError::AlreadyPlayer { user: 1, .. })
        ));
        queue.join(game, 10).unwrap();
        queue.join(game, 11).unwrap();
        assert!(matches!(
            queue.join(game, 12),
            Err(GameError::WaitlistFull { max: 2, .. })
        ));
        assert!(matches!(queue.join(99, 12), Err(GameError::NotFound(99))));

        GameLifecycle::new(&bed.ctx).cancel_game(game, 1).unwrap();
        assert!(matches!(
            queue.join(game, 13),
            Err(GameError::NotOpen {
                status: GameStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn leave_removes_entry() {
        let (bed, game) = game_bed(Config::default());
        let queue = WaitlistQueue::new(&bed.ctx);
        queue.join(game, 10).unwrap();

        queue.leave(game, 10).unwrap();
        assert!(queue.ordered(game).is_empty());
        assert!(matches!(
            queue.leave(game, 10),
            Err(GameError::NotWaitlisted { user: 10, .. })
        ));
    }

    #[test]
    fn invite_moves_user_into_roster() {
        let (bed, game) = game_bed(Config::default());
        let queue = WaitlistQueue::new(&bed.ctx);
        queue.join(game, 10).unwrap();
        queue.join(game, 11).unwrap();

        assert!(matches!(
            queue.invite(game, 10, 11),
            Err(GameError::NotCreator { user: 10, .. })
        ));
        assert!(matches!(
            queue.invite(game, 1, 12),
            Err(GameError::NotWaitlisted { user: 12, .. })
        ));

        let updated = queue.invite(game, 1, 11).unwrap();
        assert_eq!(updated.players, vec![1, 11]);
        assert_eq!(bed.game(game).players, vec![1, 11]);
        let left: Vec<_> = queue.ordered(game).iter().map(|e| e.user_id).collect();
        assert_eq!(left, vec![10]);
    }

    #[test]
    fn invite_into_full_game_fails() {
        let bed = TestBed::new();
        let slot = bed.add_slot(1, Duration::days(2));
        let game = booked_game(&bed, slot, 1, 2);
        let queue = WaitlistQueue::new(&bed.ctx);
        queue.join(game, 10).unwrap();
        queue.join(game, 11).unwrap();

        let updated = queue.invite(game, 1, 10).unwrap();
        assert_eq!(updated.status, GameStatus::Confirmed);
        assert!(matches!(queue.invite(game, 1, 11), Err(GameError::Full(_))));
        assert_eq!(queue.ordered(game).len(), 1);
    }

    #[test]
    fn cleanup_clears_started_games_only() {
        let (bed, game) = game_bed(Config::default());
        let queue = WaitlistQueue::new(&bed.ctx);
        queue.join(game, 10).unwrap();
        queue.join(game, 11).unwrap();

        assert_eq!(queue.cleanup_started_games(), 0);
        bed.advance(Duration::days(2));
        assert_eq!(queue.started_games_with_entries(), vec![game]);
        assert_eq!(queue.cleanup_started_games(), 2);
        assert!(queue.ordered(game).is_empty());
        assert_eq!(queue.remove_all_for_game(game), 0);
    }
}
