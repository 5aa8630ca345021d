//! In-memory transactional store.
//!
//! All tables sit behind one mutex. [`Store::atomic`] runs a closure against a
//! [`Txn`] that records an undo entry for every write; if the closure returns
//! `Err` the undo log is replayed in reverse and no write is visible. Units are
//! therefore serializable, and a read-check-write inside one unit behaves like a
//! compare-and-swap on the rows it touches.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::model::{
    Court, CourtId, Discount, Fixture, Game, GameId, Refund, RefundId, Slot, SlotId, Transaction,
    TransactionId, User, UserId, Venue, VenueId, WaitlistEntry, WaitlistId, Wallet, WalletId,
};

/// A row of the lease table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub holder: UserId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Id sequences for rows created at runtime.
#[derive(Debug, Clone, Copy)]
pub enum Sequence {
    Wallet,
    Transaction,
    Refund,
    Game,
    Waitlist,
}

#[derive(Debug)]
struct Sequences {
    wallet: u64,
    transaction: u64,
    refund: u64,
    game: u64,
    waitlist: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            wallet: 1,
            transaction: 1,
            refund: 1,
            game: 1,
            waitlist: 1,
        }
    }
}

impl Sequences {
    fn next(&mut self, sequence: Sequence) -> u64 {
        let counter = match sequence {
            Sequence::Wallet => &mut self.wallet,
            Sequence::Transaction => &mut self.transaction,
            Sequence::Refund => &mut self.refund,
            Sequence::Game => &mut self.game,
            Sequence::Waitlist => &mut self.waitlist,
        };
        let id = *counter;
        *counter += 1;
        id
    }
}

/// Every table of the store. Read access only; writes go through [`Txn`].
#[derive(Debug, Default)]
pub struct Tables {
    venues: HashMap<VenueId, Venue>,
    courts: HashMap<CourtId, Court>,
    slots: BTreeMap<SlotId, Slot>,
    discounts: Vec<Discount>,
    users: HashMap<UserId, User>,
    /// Keyed by owning user; one wallet per user.
    wallets: HashMap<UserId, Wallet>,
    transactions: BTreeMap<TransactionId, Transaction>,
    /// `reference_id -> transaction id`
    references: HashMap<String, TransactionId>,
    refunds: BTreeMap<RefundId, Refund>,
    games: BTreeMap<GameId, Game>,
    waitlist: BTreeMap<WaitlistId, WaitlistEntry>,
    leases: HashMap<String, Lease>,
    sequences: Sequences,
}

impl Tables {
    pub fn venue(&self, id: VenueId) -> Option<&Venue> {
        self.venues.get(&id)
    }

    pub fn court(&self, id: CourtId) -> Option<&Court> {
        self.courts.get(&id)
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.slots.values()
    }

    pub fn discounts(&self) -> impl Iterator<Item = &Discount> + '_ {
        self.discounts.iter()
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn wallet(&self, user: UserId) -> Option<&Wallet> {
        self.wallets.get(&user)
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> + '_ {
        self.wallets.values()
    }

    pub fn wallet_by_id(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets.values().find(|w| w.id == id)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn transaction_by_reference(&self, reference: &str) -> Option<&Transaction> {
        self.references
            .get(reference)
            .and_then(|id| self.transactions.get(id))
    }

    pub fn transactions_for_wallet(
        &self,
        wallet: WalletId,
    ) -> impl Iterator<Item = &Transaction> + '_ {
        self.transactions
            .values()
            .filter(move |t| t.wallet_id == wallet)
    }

    pub fn refund(&self, id: RefundId) -> Option<&Refund> {
        self.refunds.get(&id)
    }

    pub fn refunds(&self) -> impl Iterator<Item = &Refund> + '_ {
        self.refunds.values()
    }

    pub fn refund_by_reference(&self, reference: &str) -> Option<&Refund> {
        self.refunds.values().find(|r| r.reference_id == reference)
    }

    pub fn game(&self, id: GameId) -> Option<&Game> {
        self.games.get(&id)
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> + '_ {
        self.games.values()
    }

    pub fn game_for_slot(&self, slot: SlotId) -> Option<&Game> {
        self.games.values().find(|g| g.slot_id == slot)
    }

    pub fn waitlist_for_game(&self, game: GameId) -> impl Iterator<Item = &WaitlistEntry> + '_ {
        self.waitlist.values().filter(move |e| e.game_id == game)
    }

    pub fn waitlist_entry(&self, game: GameId, user: UserId) -> Option<&WaitlistEntry> {
        self.waitlist
            .values()
            .find(|e| e.game_id == game && e.user_id == user)
    }

    pub fn lease(&self, key: &str) -> Option<&Lease> {
        self.leases.get(key)
    }
}

/// Previous value of a row, restored on rollback.
#[derive(Debug)]
enum Undo {
    Slot(SlotId, Option<Slot>),
    Wallet(UserId, Option<Wallet>),
    Transaction(TransactionId, Option<Transaction>),
    Refund(RefundId, Option<Refund>),
    Game(GameId, Option<Game>),
    Waitlist(WaitlistId, Option<WaitlistEntry>),
    Lease(String, Option<Lease>),
}

/// A unit of work over the store tables.
///
/// Reads go through `Deref<Target = Tables>`; every write records its undo entry.
/// A unit dropped without [`commit`](Txn::commit), including on unwind, is
/// rolled back.
pub struct Txn<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl Deref for Txn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &*self.tables
    }
}

impl<'a> Txn<'a> {
    fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            undo: Vec::new(),
        }
    }

    /// Allocate the next id of a sequence. Ids are not reused after rollback.
    pub fn allocate(&mut self, sequence: Sequence) -> u64 {
        self.tables.sequences.next(sequence)
    }

    pub fn put_slot(&mut self, slot: Slot) {
        let id = slot.id;
        let previous = self.tables.slots.insert(id, slot);
        self.undo.push(Undo::Slot(id, previous));
    }

    pub fn put_wallet(&mut self, wallet: Wallet) {
        let user = wallet.user_id;
        let previous = self.tables.wallets.insert(user, wallet);
        self.undo.push(Undo::Wallet(user, previous));
    }

    pub fn put_transaction(&mut self, transaction: Transaction) {
        let id = transaction.id;
        if let Some(reference) = &transaction.reference_id {
            self.tables.references.insert(reference.clone(), id);
        }
        let previous = self.tables.transactions.insert(id, transaction);
        self.undo.push(Undo::Transaction(id, previous));
    }

    pub fn put_refund(&mut self, refund: Refund) {
        let id = refund.id;
        let previous = self.tables.refunds.insert(id, refund);
        self.undo.push(Undo::Refund(id, previous));
    }

    pub fn put_game(&mut self, game: Game) {
        let id = game.id;
        let previous = self.tables.games.insert(id, game);
        self.undo.push(Undo::Game(id, previous));
    }

    pub fn put_waitlist_entry(&mut self, entry: WaitlistEntry) {
        let id = entry.id;
        let previous = self.tables.waitlist.insert(id, entry);
        self.undo.push(Undo::Waitlist(id, previous));
    }

    pub fn remove_waitlist_entry(&mut self, id: WaitlistId) -> Option<WaitlistEntry> {
        let previous = self.tables.waitlist.remove(&id);
        if previous.is_some() {
            self.undo.push(Undo::Waitlist(id, previous.clone()));
        }
        previous
    }

    pub fn put_lease(&mut self, lease: Lease) {
        let key = lease.key.clone();
        let previous = self.tables.leases.insert(key.clone(), lease);
        self.undo.push(Undo::Lease(key, previous));
    }

    pub fn remove_lease(&mut self, key: &str) -> Option<Lease> {
        let previous = self.tables.leases.remove(key);
        if previous.is_some() {
            self.undo.push(Undo::Lease(key.to_string(), previous.clone()));
        }
        previous
    }

    fn commit(mut self) {
        self.undo.clear();
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            let tables = &mut *self.tables;
            match entry {
                Undo::Slot(id, previous) => restore(&mut tables.slots, id, previous),
                Undo::Wallet(user, previous) => restore(&mut tables.wallets, user, previous),
                Undo::Transaction(id, previous) => {
                    if let Some(reference) = tables
                        .transactions
                        .get(&id)
                        .and_then(|t| t.reference_id.clone())
                    {
                        tables.references.remove(&reference);
                    }
                    if let Some(reference) = previous.as_ref().and_then(|t| t.reference_id.clone())
                    {
                        tables.references.insert(reference, id);
                    }
                    restore(&mut tables.transactions, id, previous);
                }
                Undo::Refund(id, previous) => restore(&mut tables.refunds, id, previous),
                Undo::Game(id, previous) => restore(&mut tables.games, id, previous),
                Undo::Waitlist(id, previous) => restore(&mut tables.waitlist, id, previous),
                Undo::Lease(key, previous) => match previous {
                    Some(lease) => {
                        tables.leases.insert(key, lease);
                    }
                    None => {
                        tables.leases.remove(&key);
                    }
                },
            }
        }
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

trait Table<K, V> {
    fn put(&mut self, key: K, value: V);
    fn delete(&mut self, key: &K);
}

impl<K: Ord, V> Table<K, V> for BTreeMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn delete(&mut self, key: &K) {
        self.remove(key);
    }
}

impl<K: std::hash::Hash + Eq, V> Table<K, V> for HashMap<K, V> {
    fn put(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn delete(&mut self, key: &K) {
        self.remove(key);
    }
}

fn restore<K, V>(table: &mut impl Table<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => table.put(key, value),
        None => table.delete(&key),
    }
}

/// The shared persistent store.
#[derive(Debug, Default)]
pub struct Store {
    tables: Mutex<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one atomic unit. On `Err` or a panic every write made by `f`
    /// is undone.
    pub fn atomic<T, E>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<T, E>) -> Result<T, E> {
        let mut tables = self.tables.lock();
        let mut txn = Txn::new(&mut tables);
        let result = f(&mut txn);
        if result.is_ok() {
            txn.commit();
        }
        result
    }

    /// Run a read-only closure against a consistent view of the tables.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.lock())
    }

    /// Insert or replace a catalog row.
    pub fn load(&self, fixture: Fixture) {
        let mut tables = self.tables.lock();
        match fixture {
            Fixture::Venue(venue) => {
                tables.venues.insert(venue.id, venue);
            }
            Fixture::Court(court) => {
                tables.courts.insert(court.id, court);
            }
            Fixture::Slot(slot) => {
                tables.slots.insert(slot.id, slot);
            }
            Fixture::Discount(discount) => {
                tables.discounts.retain(|d| d.id != discount.id);
                tables.discounts.push(discount);
            }
            Fixture::User(user) => {
                tables.users.insert(user.id, user);
            }
        }
    }
}
