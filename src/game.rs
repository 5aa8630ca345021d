//! Game lifecycle on top of booked slots.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::context::Context;
use crate::directory::UserDirectory;
use crate::engine::{GameError, SlotError};
use crate::model::{Game, GameId, GameStatus, Role, SlotId, SlotStatus, UserId};
use crate::store::{Sequence, Store, Txn};

/// Pending games short of players are cancelled this close to the start.
const AUTO_CANCEL_WINDOW_MINUTES: i64 = 60;

pub struct GameLifecycle {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn UserDirectory>,
}

impl GameLifecycle {
    pub fn new(ctx: &Context) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            directory: ctx.directory.clone(),
        }
    }

    /// Open a game on a slot the creator has booked.
    pub fn create_game(
        &self,
        user: UserId,
        slot: SlotId,
        kind: &str,
        min_players: u32,
        max_players: u32,
    ) -> Result<Game, GameError> {
        if min_players == 0 || min_players > max_players {
            return Err(GameError::InvalidPlayerBounds {
                min: min_players,
                max: max_players,
            });
        }
        let now = self.clock.now();
        self.store.atomic(|txn| {
            let booked = txn.slot(slot).ok_or(SlotError::NotFound(slot))?;
            if !booked.is_booked_by(user) {
                return Err(SlotError::NotBookedBy { slot, user }.into());
            }
            if txn.games().any(|g| g.slot_id == slot && g.status.is_open()) {
                return Err(GameError::AlreadyExists(slot));
            }

            let mut game = Game {
                id: txn.allocate(Sequence::Game),
                slot_id: slot,
                kind: kind.to_string(),
                min_players,
                max_players,
                status: GameStatus::Pending,
                created_by: user,
                players: vec![user],
                created_at: now,
            };
            game.refresh_status();
            txn.put_game(game.clone());
            Ok(game)
        })
    }

    /// Add a player. A waitlist entry of the same user is dropped.
    pub fn join_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        let now = self.clock.now();
        self.store.atomic(|txn| {
            let mut current = open_game(txn, game)?;
            if current.is_full() {
                return Err(GameError::Full(game));
            }
            if txn
                .slot(current.slot_id)
                .is_some_and(|s| s.start_time <= now)
            {
                return Err(GameError::Started(game));
            }
            if current.has_player(user) {
                return Err(GameError::AlreadyPlayer { game, user });
            }

            current.players.push(user);
            current.refresh_status();
            txn.put_game(current.clone());
            if let Some(entry) = txn.waitlist_entry(game, user).map(|e| e.id) {
                txn.remove_waitlist_entry(entry);
            }
            Ok(current)
        })
    }

    /// Remove a player. The creator may only leave alone, which cancels the game.
    pub fn leave_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        self.store.atomic(|txn| {
            let mut current = open_game(txn, game)?;
            if !current.has_player(user) {
                return Err(GameError::NotPlayer { game, user });
            }
            current.players.retain(|p| *p != user);
            if current.created_by == user {
                if !current.players.is_empty() {
                    return Err(GameError::CreatorCannotLeave(game));
                }
                current.status = GameStatus::Cancelled;
                clear_waitlist(txn, game);
            } else {
                current.refresh_status();
            }
            txn.put_game(current.clone());
            Ok(current)
        })
    }

    /// Cancel a game. Allowed for its creator and for admins.
    pub fn cancel_game(&self, game: GameId, user: UserId) -> Result<Game, GameError> {
        let admin = self.directory.role(user) == Some(Role::Admin);
        self.store.atomic(|txn| {
            let mut current = txn.game(game).cloned().ok_or(GameError::NotFound(game))?;
            if current.created_by != user && !admin {
                return Err(GameError::NotCreator { game, user });
            }
            if !current.status.is_open() {
                return Err(GameError::NotOpen {
                    game,
                    status: current.status,
                });
            }
            current.status = GameStatus::Cancelled;
            txn.put_game(current.clone());
            clear_waitlist(txn, game);
            Ok(current)
        })
    }

    /// Pending games short of players whose slot starts within the hour.
    pub fn games_below_minimum(&self) -> Vec<GameId> {
        let now = self.clock.now();
        self.store.read(|t| {
            t.games()
                .filter(|g| below_minimum(g, t.slot(g.slot_id).map(|s| s.start_time), now))
                .map(|g| g.id)
                .collect()
        })
    }

    pub fn cancel_low_player_game(&self, game: GameId) -> bool {
        let now = self.clock.now();
        self.store
            .atomic(|txn| {
                let mut current = txn.game(game).cloned().ok_or(())?;
                let start = txn.slot(current.slot_id).map(|s| s.start_time);
                if !below_minimum(&current, start, now) {
                    return Err(());
                }
                current.status = GameStatus::Cancelled;
                txn.put_game(current);
                clear_waitlist(txn, game);
                Ok(())
            })
            .is_ok()
    }

    pub fn cancel_games_with_low_players(&self) -> usize {
        self.cancel_games_with_low_players_until(|| false)
    }

    pub fn cancel_games_with_low_players_until(&self, stopped: impl Fn() -> bool) -> usize {
        self.games_below_minimum()
            .into_iter()
            .take_while(|_| !stopped())
            .filter(|game| {
                let cancelled = self.cancel_low_player_game(*game);
                if cancelled {
                    debug!(game, "cancelled game short of players");
                }
                cancelled
            })
            .count()
    }

    /// Open games whose slot has ended.
    pub fn finished_games(&self) -> Vec<GameId> {
        let now = self.clock.now();
        self.store.read(|t| {
            t.games()
                .filter(|g| g.status.is_open())
                .filter(|g| t.slot(g.slot_id).is_some_and(|s| s.end_time <= now))
                .map(|g| g.id)
                .collect()
        })
    }

    /// Mark a finished game and its booked slot completed.
    pub fn complete_game(&self, game: GameId) -> bool {
        let now = self.clock.now();
        self.store
            .atomic(|txn| {
                let mut current = txn.game(game).cloned().ok_or(())?;
                let mut slot = txn.slot(current.slot_id).cloned().ok_or(())?;
                if !current.status.is_open() || slot.end_time > now {
                    return Err(());
                }
                current.status = GameStatus::Completed;
                txn.put_game(current);
                if slot.status == SlotStatus::Booked {
                    slot.complete();
                    txn.put_slot(slot);
                }
                Ok(())
            })
            .is_ok()
    }

    pub fn complete_games(&self) -> usize {
        self.complete_games_until(|| false)
    }

    pub fn complete_games_until(&self, stopped: impl Fn() -> bool) -> usize {
        self.finished_games()
            .into_iter()
            .take_while(|_| !stopped())
            .filter(|game| {
                let completed = self.complete_game(*game);
                if completed {
                    debug!(game, "completed game");
                }
                completed
            })
            .count()
    }
}

fn open_game(txn: &Txn<'_>, game: GameId) -> Result<Game, GameError> {
    let current = txn.game(game).cloned().ok_or(GameError::NotFound(game))?;
    if !current.status.is_open() {
        return Err(GameError::NotOpen {
            game,
            status: current.status,
        });
    }
    Ok(current)
}

fn below_minimum(
    game: &Game,
    start: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    game.status == GameStatus::Pending
        && (game.players.len() as u32) < game.min_players
        && start.is_some_and(|s| s - now <= Duration::minutes(AUTO_CANCEL_WINDOW_MINUTES))
}

fn clear_waitlist(txn: &mut Txn<'_>, game: GameId) {
    let entries: Vec<_> = txn.waitlist_for_game(game).map(|e| e.id).collect();
    for id in entries {
        txn.remove_waitlist_entry(id);
    }
}
