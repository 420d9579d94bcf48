//! Sled-backed persistence for players, the transaction log, purchase requests,
//! scheduled payments and earned achievements.
//!
//! Every record family lives in its own tree keyed by big-endian `u64` ids, so a
//! forward scan yields records in creation order. Player mutations are serialized
//! through [`PlayerLocks`]; multi-record writes go through sled transactions so they
//! commit or roll back as a unit.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult, Transactional};
use sled::{IVec, Tree};

use crate::errors::StoreError;
use crate::types::{
    AchievementKind, EarnedAchievement, GlobalStats, HistoryFilter, PlayerRecord, PurchaseRequest,
    PurchaseStatus, ScheduledPayment, TransactionRecord, UserId, PLAYER_SCHEMA_VERSION,
    PURCHASE_SCHEMA_VERSION, SCHEDULE_SCHEMA_VERSION,
};

const TREE_PLAYERS: &str = "players";
const TREE_TRANSACTIONS: &str = "transactions";
const TREE_TX_INDEX: &str = "transactions_by_player";
const TREE_PURCHASES: &str = "purchase_requests";
const TREE_SCHEDULES: &str = "scheduled_payments";
const TREE_ACHIEVEMENTS: &str = "achievements";

/// Number of lock stripes guarding player rows.
const LOCK_STRIPES: usize = 64;

pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn index_key(user_id: UserId, tx_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(&tx_id.to_be_bytes());
    key
}

fn achievement_key(user_id: UserId, kind: AchievementKind) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8] = kind.code();
    key
}

fn key_u64(bytes: &[u8], tree: &'static str) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::CorruptKey { tree })?;
    Ok(u64::from_be_bytes(raw))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

pub(crate) fn decode_player(bytes: &[u8]) -> Result<PlayerRecord, StoreError> {
    let record: PlayerRecord = decode(bytes)?;
    if record.schema_version != PLAYER_SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            entity: "player",
            expected: PLAYER_SCHEMA_VERSION,
            found: record.schema_version,
        });
    }
    Ok(record)
}

fn storage_only(err: TransactionError<Infallible>) -> StoreError {
    match err {
        TransactionError::Abort(never) => match never {},
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

/// Striped exclusive locks over player rows.
///
/// Stripes are always taken in ascending index order, which gives every
/// multi-player operation the same global acquisition order.
pub struct PlayerLocks {
    stripes: Vec<Mutex<()>>,
}

/// Holds the stripes for a set of players until dropped.
pub struct PlayerGuard<'a> {
    _held: Vec<MutexGuard<'a, ()>>,
}

impl PlayerLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, user_ids: &[UserId]) -> PlayerGuard<'_> {
        let mut stripes: Vec<usize> = user_ids
            .iter()
            .map(|id| (*id % LOCK_STRIPES as u64) as usize)
            .collect();
        stripes.sort_unstable();
        stripes.dedup();
        let held = stripes
            .into_iter()
            .map(|idx| match self.stripes[idx].lock() {
                Ok(guard) => guard,
                // A panic while holding a stripe cannot leave a half-written
                // record behind (sled transactions), so the stripe stays usable.
                Err(poisoned) => poisoned.into_inner(),
            })
            .collect();
        PlayerGuard { _held: held }
    }
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct BotStoreBuilder {
    path: PathBuf,
}

impl BotStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open(self) -> Result<BotStore, StoreError> {
        BotStore::open(self.path)
    }
}

pub struct BotStore {
    db: sled::Db,
    pub(crate) players: Tree,
    pub(crate) transactions: Tree,
    pub(crate) tx_index: Tree,
    pub(crate) purchases: Tree,
    pub(crate) schedules: Tree,
    achievements: Tree,
    locks: PlayerLocks,
}

impl BotStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            players: db.open_tree(TREE_PLAYERS)?,
            transactions: db.open_tree(TREE_TRANSACTIONS)?,
            tx_index: db.open_tree(TREE_TX_INDEX)?,
            purchases: db.open_tree(TREE_PURCHASES)?,
            schedules: db.open_tree(TREE_SCHEDULES)?,
            achievements: db.open_tree(TREE_ACHIEVEMENTS)?,
            db,
            locks: PlayerLocks::new(),
        };
        debug!("opened store at {}", path_ref.display());
        Ok(store)
    }

    /// Exclusive access to the given player rows.
    pub fn lock_players(&self, user_ids: &[UserId]) -> PlayerGuard<'_> {
        self.locks.lock(user_ids)
    }

    /// Fresh monotonic id, never zero.
    pub fn next_id(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    pub fn get_player(&self, user_id: UserId) -> Result<Option<PlayerRecord>, StoreError> {
        match self.players.get(id_key(user_id))? {
            Some(bytes) => Ok(Some(decode_player(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert `record` unless a player with the same id exists.
    ///
    /// Returns the stored record and whether it was created by this call.
    pub fn insert_player_if_absent(
        &self,
        record: PlayerRecord,
    ) -> Result<(PlayerRecord, bool), StoreError> {
        let bytes = encode(&record)?;
        match self
            .players
            .compare_and_swap(id_key(record.user_id), None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.players.flush()?;
                info!(
                    "created player {} ({}) with balance {}",
                    record.user_id,
                    record.full_name(),
                    record.balance
                );
                Ok((record, true))
            }
            Err(conflict) => {
                let current = conflict
                    .current
                    .ok_or(StoreError::CorruptKey { tree: TREE_PLAYERS })?;
                Ok((decode_player(&current)?, false))
            }
        }
    }

    /// Read-modify-write a player row under its lock.
    ///
    /// Returns `None` when the player does not exist. Balance changes must go
    /// through the ledger instead so they stay paired with a transaction row.
    pub fn update_player<F>(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<Option<PlayerRecord>, StoreError>
    where
        F: FnOnce(&mut PlayerRecord),
    {
        let _guard = self.locks.lock(&[user_id]);
        let Some(mut player) = self.get_player(user_id)? else {
            return Ok(None);
        };
        let balance = player.balance;
        mutate(&mut player);
        player.balance = balance;
        player.updated_at = now;
        player.schema_version = PLAYER_SCHEMA_VERSION;
        self.players.insert(id_key(user_id), encode(&player)?)?;
        self.players.flush()?;
        Ok(Some(player))
    }

    pub fn list_players(&self) -> Result<Vec<PlayerRecord>, StoreError> {
        let mut players = Vec::new();
        for entry in self.players.iter() {
            let (_, value) = entry?;
            players.push(decode_player(&value)?);
        }
        Ok(players)
    }

    /// Players whose full name contains `query` (case-insensitive).
    pub fn find_players_by_name(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PlayerRecord>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .list_players()?
            .into_iter()
            .filter(|p| p.full_name().to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    /// Richest players first. Banned players never appear; hidden ones only on request.
    pub fn top_players(
        &self,
        limit: usize,
        include_hidden: bool,
    ) -> Result<Vec<PlayerRecord>, StoreError> {
        let mut players: Vec<PlayerRecord> = self
            .list_players()?
            .into_iter()
            .filter(|p| !p.banned && (include_hidden || !p.hide_balance))
            .collect();
        players.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.user_id.cmp(&b.user_id)));
        players.truncate(limit);
        Ok(players)
    }

    /// Remove a player and every record that depends on it.
    pub fn delete_player(&self, user_id: UserId) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(&[user_id]);
        let player_key = id_key(user_id);
        if self.players.get(player_key)?.is_none() {
            return Ok(false);
        }

        let history = self.player_transactions(user_id, HistoryFilter::All, None)?;
        let mut tx_keys = Vec::with_capacity(history.len());
        let mut index_keys = Vec::new();
        for tx in &history {
            tx_keys.push(id_key(tx.id));
            for party in [tx.from, tx.to].into_iter().flatten() {
                index_keys.push(index_key(party, tx.id));
            }
        }
        let purchase_keys: Vec<[u8; 8]> = self
            .purchases_for(user_id)?
            .iter()
            .map(|r| id_key(r.id))
            .collect();
        let schedule_keys: Vec<[u8; 8]> = self
            .list_payments()?
            .iter()
            .filter(|p| p.target == user_id)
            .map(|p| id_key(p.id))
            .collect();
        let mut achievement_keys = Vec::new();
        for entry in self.achievements.scan_prefix(user_id.to_be_bytes()) {
            let (key, _) = entry?;
            achievement_keys.push(key);
        }

        let result: TransactionResult<(), Infallible> = (
            &self.players,
            &self.transactions,
            &self.tx_index,
            &self.purchases,
            &self.schedules,
            &self.achievements,
        )
            .transaction(|(players, txs, index, purchases, schedules, achievements)| {
                players.remove(&player_key[..])?;
                for key in &tx_keys {
                    txs.remove(&key[..])?;
                }
                for key in &index_keys {
                    index.remove(&key[..])?;
                }
                for key in &purchase_keys {
                    purchases.remove(&key[..])?;
                }
                for key in &schedule_keys {
                    schedules.remove(&key[..])?;
                }
                for key in &achievement_keys {
                    achievements.remove(key.clone())?;
                }
                Ok(())
            });
        result.map_err(storage_only)?;
        self.flush()?;
        info!(
            "deleted player {} with {} transactions, {} requests, {} scheduled payments",
            user_id,
            tx_keys.len(),
            purchase_keys.len(),
            schedule_keys.len()
        );
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn get_transaction(&self, id: u64) -> Result<Option<TransactionRecord>, StoreError> {
        match self.transactions.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// A player's transactions, newest first.
    pub fn player_transactions(
        &self,
        user_id: UserId,
        filter: HistoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.tx_index.scan_prefix(user_id.to_be_bytes()).rev() {
            if limit.is_some_and(|max| out.len() >= max) {
                break;
            }
            let (key, _) = entry?;
            let tx_id = key_u64(&key[8..], TREE_TX_INDEX)?;
            let Some(tx) = self.get_transaction(tx_id)? else {
                continue;
            };
            if filter.matches(tx.kind) {
                out.push(tx);
            }
        }
        Ok(out)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    // ------------------------------------------------------------------
    // Purchase requests
    // ------------------------------------------------------------------

    pub fn create_purchase_request(
        &self,
        requester: UserId,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<PurchaseRequest, StoreError> {
        let request = PurchaseRequest::new(self.next_id()?, requester, description, now);
        self.put_purchase(&request)?;
        Ok(request)
    }

    pub fn get_purchase(&self, id: u64) -> Result<Option<PurchaseRequest>, StoreError> {
        let Some(bytes) = self.purchases.get(id_key(id))? else {
            return Ok(None);
        };
        let record: PurchaseRequest = decode(&bytes)?;
        if record.schema_version != PURCHASE_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "purchase_request",
                expected: PURCHASE_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    pub fn put_purchase(&self, request: &PurchaseRequest) -> Result<(), StoreError> {
        self.purchases.insert(id_key(request.id), encode(request)?)?;
        self.purchases.flush()?;
        Ok(())
    }

    /// Move a request from `expected` to a new status atomically.
    ///
    /// Returns `None` when the request is missing or no longer in `expected`.
    pub fn transition_purchase<F>(
        &self,
        id: u64,
        expected: PurchaseStatus,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<Option<PurchaseRequest>, StoreError>
    where
        F: FnOnce(&mut PurchaseRequest),
    {
        let key = id_key(id);
        let Some(current) = self.purchases.get(key)? else {
            return Ok(None);
        };
        let mut request: PurchaseRequest = decode(&current)?;
        if request.status != expected {
            return Ok(None);
        }
        mutate(&mut request);
        request.updated_at = now;
        let swapped = self
            .purchases
            .compare_and_swap(key, Some(&current[..]), Some(encode(&request)?))?;
        if swapped.is_err() {
            // Someone else moved it first.
            return Ok(None);
        }
        self.purchases.flush()?;
        Ok(Some(request))
    }

    fn all_purchases(&self) -> Result<Vec<PurchaseRequest>, StoreError> {
        let mut out = Vec::new();
        for entry in self.purchases.iter() {
            let (_, value) = entry?;
            out.push(decode::<PurchaseRequest>(&value)?);
        }
        Ok(out)
    }

    /// Pending requests, oldest first.
    pub fn pending_purchases(&self) -> Result<Vec<PurchaseRequest>, StoreError> {
        Ok(self
            .all_purchases()?
            .into_iter()
            .filter(|r| r.status == PurchaseStatus::Pending)
            .collect())
    }

    /// A player's requests, newest first.
    pub fn purchases_for(&self, user_id: UserId) -> Result<Vec<PurchaseRequest>, StoreError> {
        let mut requests: Vec<PurchaseRequest> = self
            .all_purchases()?
            .into_iter()
            .filter(|r| r.requester == user_id)
            .collect();
        requests.reverse();
        Ok(requests)
    }

    // ------------------------------------------------------------------
    // Scheduled payments
    // ------------------------------------------------------------------

    pub fn create_scheduled_payment(
        &self,
        target: UserId,
        admin_id: UserId,
        amount: u64,
        scheduled_for: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ScheduledPayment, StoreError> {
        let payment = ScheduledPayment {
            id: self.next_id()?,
            target,
            admin_id,
            amount,
            reason,
            scheduled_for,
            executed: false,
            executed_at: None,
            created_at: now,
            schema_version: SCHEDULE_SCHEMA_VERSION,
        };
        self.schedules.insert(id_key(payment.id), encode(&payment)?)?;
        self.schedules.flush()?;
        info!(
            "scheduled payment #{}: {} to {} at {} by admin {}",
            payment.id, amount, target, scheduled_for, admin_id
        );
        Ok(payment)
    }

    pub fn get_payment(&self, id: u64) -> Result<Option<ScheduledPayment>, StoreError> {
        match self.schedules.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_payments(&self) -> Result<Vec<ScheduledPayment>, StoreError> {
        let mut out = Vec::new();
        for entry in self.schedules.iter() {
            let (_, value) = entry?;
            out.push(decode::<ScheduledPayment>(&value)?);
        }
        Ok(out)
    }

    /// Unexecuted payments scheduled at or before `now`, oldest id first.
    pub fn due_payments(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPayment>, StoreError> {
        Ok(self
            .list_payments()?
            .into_iter()
            .filter(|p| p.is_due(now))
            .collect())
    }

    /// Flag a payment executed without crediting anyone.
    pub fn mark_payment_executed(&self, id: u64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(mut payment) = self.get_payment(id)? else {
            return Ok(false);
        };
        payment.executed = true;
        payment.executed_at = Some(now);
        self.schedules.insert(id_key(id), encode(&payment)?)?;
        self.schedules.flush()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Achievements
    // ------------------------------------------------------------------

    /// Record an achievement unless the player already holds it.
    pub fn award_achievement(
        &self,
        user_id: UserId,
        kind: AchievementKind,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let earned = EarnedAchievement {
            user_id,
            kind,
            earned_at: now,
        };
        let inserted = self
            .achievements
            .compare_and_swap(
                achievement_key(user_id, kind),
                None as Option<&[u8]>,
                Some(encode(&earned)?),
            )?
            .is_ok();
        if inserted {
            self.achievements.flush()?;
        }
        Ok(inserted)
    }

    pub fn achievements_for(&self, user_id: UserId) -> Result<Vec<EarnedAchievement>, StoreError> {
        let mut out = Vec::new();
        for entry in self.achievements.scan_prefix(user_id.to_be_bytes()) {
            let (_, value): (IVec, IVec) = entry?;
            out.push(decode::<EarnedAchievement>(&value)?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn global_stats(&self) -> Result<GlobalStats, StoreError> {
        let players = self.list_players()?;
        let total_emission: u64 = players.iter().map(|p| p.balance).sum();
        let average_balance = if players.is_empty() {
            0.0
        } else {
            total_emission as f64 / players.len() as f64
        };
        Ok(GlobalStats {
            total_players: players.len(),
            total_emission,
            average_balance,
            total_transactions: self.transaction_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, BotStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = BotStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    #[test]
    fn insert_if_absent_keeps_first_record() {
        let (_dir, store) = open();
        let now = Utc::now();
        let (first, created) = store
            .insert_player_if_absent(PlayerRecord::new(7, "Ann", "Lee", 100, now))
            .expect("insert");
        assert!(created);
        let (second, created) = store
            .insert_player_if_absent(PlayerRecord::new(7, "Other", "Name", 999, now))
            .expect("insert again");
        assert!(!created);
        assert_eq!(second, first);
    }

    #[test]
    fn update_player_cannot_touch_balance() {
        let (_dir, store) = open();
        let now = Utc::now();
        store
            .insert_player_if_absent(PlayerRecord::new(7, "Ann", "Lee", 100, now))
            .expect("insert");
        let updated = store
            .update_player(7, now, |p| {
                p.balance = 1_000_000;
                p.hide_balance = true;
            })
            .expect("update")
            .expect("present");
        assert_eq!(updated.balance, 100);
        assert!(updated.hide_balance);
        assert!(store.update_player(8, now, |_| {}).expect("update").is_none());
    }

    #[test]
    fn award_is_idempotent() {
        let (_dir, store) = open();
        let now = Utc::now();
        assert!(store
            .award_achievement(1, AchievementKind::Rich, now)
            .expect("award"));
        assert!(!store
            .award_achievement(1, AchievementKind::Rich, now)
            .expect("award again"));
        assert_eq!(store.achievements_for(1).expect("list").len(), 1);
        assert!(store.achievements_for(2).expect("list").is_empty());
    }

    #[test]
    fn purchase_transition_requires_expected_status() {
        let (_dir, store) = open();
        let now = Utc::now();
        let request = store
            .create_purchase_request(1, "огненный шар", now)
            .expect("create");
        let approved = store
            .transition_purchase(request.id, PurchaseStatus::Pending, now, |r| {
                r.status = PurchaseStatus::Approved;
                r.price = Some(10);
            })
            .expect("transition");
        assert!(approved.is_some());
        let again = store
            .transition_purchase(request.id, PurchaseStatus::Pending, now, |r| {
                r.status = PurchaseStatus::Rejected;
            })
            .expect("transition");
        assert!(again.is_none());
        let stored = store.get_purchase(request.id).expect("get").expect("present");
        assert_eq!(stored.status, PurchaseStatus::Approved);
    }

    #[test]
    fn top_players_hides_banned_and_hidden() {
        let (_dir, store) = open();
        let now = Utc::now();
        for (id, balance) in [(1, 300), (2, 500), (3, 400)] {
            store
                .insert_player_if_absent(PlayerRecord::new(id, "P", &id.to_string(), balance, now))
                .expect("insert");
        }
        store.update_player(2, now, |p| p.hide_balance = true).expect("hide");
        store.update_player(3, now, |p| p.banned = true).expect("ban");
        let public: Vec<UserId> = store
            .top_players(10, false)
            .expect("top")
            .iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(public, vec![1]);
        let admin: Vec<UserId> = store
            .top_players(10, true)
            .expect("top")
            .iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(admin, vec![2, 1]);
    }
}
