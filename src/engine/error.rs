//! Error types for booking, settlement and game operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{CourtId, GameId, GameStatus, RefundId, SlotId, SlotStatus, TransactionId, UserId};

/// Broad error class, used by an API layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InsufficientBalance,
    Forbidden,
    Validation,
}

/// Top-level error returned by [`Engine`](super::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot: {0}")]
    Slot(#[from] SlotError),

    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    #[error("payment: {0}")]
    Payment(#[from] PaymentError),

    #[error("refund: {0}")]
    Refund(#[from] RefundError),

    #[error("game: {0}")]
    Game(#[from] GameError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Slot(e) => e.kind(),
            EngineError::Wallet(e) => e.kind(),
            EngineError::Payment(e) => e.kind(),
            EngineError::Refund(e) => e.kind(),
            EngineError::Game(e) => e.kind(),
        }
    }
}

/// Error during slot state transitions.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("slot {0} not found")]
    NotFound(SlotId),
    #[error("court {0} not found")]
    CourtNotFound(CourtId),
    #[error("another booking flow for slot {slot} and user {user} is already in progress")]
    FlowInProgress { slot: SlotId, user: UserId },
    #[error("slot {slot} is {status}, not available")]
    NotAvailable { slot: SlotId, status: SlotStatus },
    #[error("slot {0} has already started")]
    Started(SlotId),
    #[error("no booking flow for slot {slot} and user {user}, lock slot first")]
    LockRequired { slot: SlotId, user: UserId },
    #[error("slot {slot} is not locked by user {user}")]
    NotLockedBy { slot: SlotId, user: UserId },
    #[error("price lock on slot {0} has expired")]
    LockExpired(SlotId),
    #[error("slot {slot} is not booked by user {user}")]
    NotBookedBy { slot: SlotId, user: UserId },
}

impl SlotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlotError::NotFound(_) | SlotError::CourtNotFound(_) => ErrorKind::NotFound,
            SlotError::NotLockedBy { .. } | SlotError::NotBookedBy { .. } => ErrorKind::Forbidden,
            SlotError::FlowInProgress { .. }
            | SlotError::NotAvailable { .. }
            | SlotError::Started(_)
            | SlotError::LockRequired { .. }
            | SlotError::LockExpired(_) => ErrorKind::Conflict,
        }
    }
}

/// Error during wallet ledger writes.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient balance for user {user}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        balance: Amount,
        requested: Amount,
    },
    #[error("amount {0} must not be negative")]
    NegativeAmount(Amount),
    #[error("wallet for user {0} not found")]
    NotFound(UserId),
    #[error("reference '{0}' belongs to a different payment")]
    ReferenceConflict(String),
    #[error("balance of user {user} would leave the supported range")]
    Overflow { user: UserId },
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            WalletError::NegativeAmount(_) => ErrorKind::Validation,
            WalletError::NotFound(_) => ErrorKind::NotFound,
            WalletError::ReferenceConflict(_) => ErrorKind::Conflict,
            WalletError::Overflow { .. } => ErrorKind::Validation,
        }
    }
}

/// Error during payment settlement.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Slot(#[from] SlotError),
    #[error("{0}")]
    Wallet(#[from] WalletError),
    #[error("slot {slot} must be locked by user {user} before paying")]
    NotLocked { slot: SlotId, user: UserId },
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Slot(e) => e.kind(),
            PaymentError::Wallet(e) => e.kind(),
            PaymentError::NotLocked { .. } => ErrorKind::Conflict,
        }
    }
}

/// Error during refund requests and processing.
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("{0}")]
    Slot(#[from] SlotError),
    #[error("{0}")]
    Wallet(#[from] WalletError),
    #[error("no completed payment by user {user} for slot {slot}")]
    PaymentNotFound { slot: SlotId, user: UserId },
    #[error("refund {0} not found")]
    NotFound(RefundId),
    #[error("original transaction {0} is not completed")]
    PaymentNotCompleted(TransactionId),
}

impl RefundError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefundError::Slot(e) => e.kind(),
            RefundError::Wallet(e) => e.kind(),
            RefundError::PaymentNotFound { .. } | RefundError::NotFound(_) => ErrorKind::NotFound,
            RefundError::PaymentNotCompleted(_) => ErrorKind::Conflict,
        }
    }
}

/// Error during game and waitlist operations.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("{0}")]
    Slot(#[from] SlotError),
    #[error("game {0} not found")]
    NotFound(GameId),
    #[error("slot {0} already has a game")]
    AlreadyExists(SlotId),
    #[error("player bounds {min}..={max} are invalid")]
    InvalidPlayerBounds { min: u32, max: u32 },
    #[error("game {game} is {status}")]
    NotOpen { game: GameId, status: GameStatus },
    #[error("game {0} is full")]
    Full(GameId),
    #[error("slot of game {0} has already started")]
    Started(GameId),
    #[error("user {user} is already playing in game {game}")]
    AlreadyPlayer { game: GameId, user: UserId },
    #[error("user {user} is not playing in game {game}")]
    NotPlayer { game: GameId, user: UserId },
    #[error("user {user} is not the creator of game {game}")]
    NotCreator { game: GameId, user: UserId },
    #[error("creator cannot leave game {0} while other players have joined")]
    CreatorCannotLeave(GameId),
    #[error("waitlist of game {game} is full ({max} entries)")]
    WaitlistFull { game: GameId, max: usize },
    #[error("user {user} is not on the waitlist of game {game}")]
    NotWaitlisted { game: GameId, user: UserId },
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::Slot(e) => e.kind(),
            GameError::NotFound(_) | GameError::NotWaitlisted { .. } => ErrorKind::NotFound,
            GameError::InvalidPlayerBounds { .. } => ErrorKind::Validation,
            GameError::NotCreator { .. } => ErrorKind::Forbidden,
            GameError::AlreadyExists(_)
            | GameError::NotOpen { .. }
            | GameError::Full(_)
            | GameError::Started(_)
            | GameError::AlreadyPlayer { .. }
            | GameError::NotPlayer { .. }
            | GameError::CreatorCannotLeave(_)
            | GameError::WaitlistFull { .. } => ErrorKind::Conflict,
        }
    }
}
