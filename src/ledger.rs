//! Atomic balance mutations.
//!
//! Every operation locks the player rows it touches, then writes the balance
//! change, the transaction row and its index entries in one sled transaction.
//! Either all of it commits or none of it does, so a visible transaction row
//! always has its balance effect applied.
//!
//! Results are two-layered: the outer `Result` carries storage failures, the
//! inner one carries expected business [`Rejection`]s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, Transactional,
};

use crate::clock::Clock;
use crate::errors::{Rejection, StoreError};
use crate::logutil::preview;
use crate::store::{decode, decode_player, encode, id_key, index_key, BotStore};
use crate::types::{
    PlayerRecord, PurchaseRequest, PurchaseStatus, ScheduledPayment, TransactionKind,
    TransactionRecord, UserId, TRANSACTION_SCHEMA_VERSION,
};

pub type LedgerResult<T> = Result<Result<T, Rejection>, StoreError>;

/// Outcome of an applied ledger operation.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub transaction: TransactionRecord,
    /// Debited player after the operation, if any.
    pub debited: Option<PlayerRecord>,
    /// Credited player after the operation, if any.
    pub credited: Option<PlayerRecord>,
}

/// Extra record that must change in the same unit of work as the posting.
#[derive(Debug, Clone, Copy)]
enum Settlement {
    None,
    /// Mark an approved purchase request completed.
    Purchase { request_id: u64 },
    /// Mark a scheduled payment executed.
    Scheduled { payment_id: u64 },
}

#[derive(Debug, Clone)]
struct Posting {
    from: Option<UserId>,
    to: Option<UserId>,
    amount: u64,
    kind: TransactionKind,
    reason: Option<String>,
    anonymous: bool,
    settlement: Settlement,
}

enum Abort {
    Rejected(Rejection),
    Store(StoreError),
}

type TxResult<T> = Result<T, ConflictableTransactionError<Abort>>;

fn reject<T>(rejection: Rejection) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(Abort::Rejected(rejection)))
}

fn fatal(err: StoreError) -> ConflictableTransactionError<Abort> {
    ConflictableTransactionError::Abort(Abort::Store(err))
}

fn load_player(tree: &TransactionalTree, user_id: UserId) -> TxResult<PlayerRecord> {
    match tree.get(&id_key(user_id)[..])? {
        Some(bytes) => decode_player(&bytes).map_err(fatal),
        None => reject(Rejection::PlayerNotFound(user_id)),
    }
}

fn save<T: serde::Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes = encode(value).map_err(fatal)?;
    tree.insert(key, bytes)?;
    Ok(())
}

pub struct Ledger {
    store: Arc<BotStore>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Arc<BotStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<BotStore> {
        &self.store
    }

    /// Move `amount` from `sender` to `receiver`.
    pub fn transfer(
        &self,
        sender: UserId,
        receiver: UserId,
        amount: u64,
        anonymous: bool,
    ) -> LedgerResult<Receipt> {
        if sender == receiver {
            return Ok(Err(Rejection::SelfTransfer));
        }
        self.post(Posting {
            from: Some(sender),
            to: Some(receiver),
            amount,
            kind: TransactionKind::Transfer,
            reason: None,
            anonymous,
            settlement: Settlement::None,
        })
    }

    /// Unconditional credit by an administrator.
    pub fn admin_grant(
        &self,
        admin: UserId,
        player: UserId,
        amount: u64,
        reason: Option<&str>,
    ) -> LedgerResult<Receipt> {
        debug!("admin {} grants {} to {}", admin, amount, player);
        self.post(Posting {
            from: None,
            to: Some(player),
            amount,
            kind: TransactionKind::AdminGive,
            reason: reason.map(str::to_string),
            anonymous: false,
            settlement: Settlement::None,
        })
    }

    /// Debit by an administrator; the player must cover it.
    pub fn admin_deduct(
        &self,
        admin: UserId,
        player: UserId,
        amount: u64,
        reason: Option<&str>,
    ) -> LedgerResult<Receipt> {
        debug!("admin {} deducts {} from {}", admin, amount, player);
        self.post(Posting {
            from: Some(player),
            to: None,
            amount,
            kind: TransactionKind::AdminTake,
            reason: reason.map(str::to_string),
            anonymous: false,
            settlement: Settlement::None,
        })
    }

    /// Debit `price` for `description` with no backing request.
    pub fn purchase(&self, player: UserId, description: &str, price: u64) -> LedgerResult<Receipt> {
        self.post(Posting {
            from: Some(player),
            to: None,
            amount: price,
            kind: TransactionKind::Purchase,
            reason: Some(description.to_string()),
            anonymous: false,
            settlement: Settlement::None,
        })
    }

    /// Charge an approved request to its requester and mark it completed.
    ///
    /// The request is re-read inside the unit of work; a request that is no
    /// longer `Approved`, belongs to someone else or has no price is rejected,
    /// so a stale or repeated confirmation can never charge twice.
    pub fn settle_purchase(
        &self,
        request_id: u64,
        player: UserId,
    ) -> LedgerResult<(Receipt, PurchaseRequest)> {
        let Some(request) = self.store.get_purchase(request_id)? else {
            return Ok(Err(Rejection::RequestNotFound(request_id)));
        };
        let Some(price) = request.price else {
            return Ok(Err(Rejection::RequestNotActionable(request_id)));
        };
        if request.requester != player || request.status != PurchaseStatus::Approved {
            return Ok(Err(Rejection::RequestNotActionable(request_id)));
        }
        let receipt = match self.post(Posting {
            from: Some(player),
            to: None,
            amount: price,
            kind: TransactionKind::Purchase,
            reason: Some(request.description.clone()),
            anonymous: false,
            settlement: Settlement::Purchase { request_id },
        })? {
            Ok(receipt) => receipt,
            Err(rejection) => return Ok(Err(rejection)),
        };
        let settled = self
            .store
            .get_purchase(request_id)?
            .ok_or(StoreError::CorruptKey { tree: "purchase_requests" })?;
        Ok(Ok((receipt, settled)))
    }

    /// Credit a due scheduled payment and mark it executed, exactly once.
    pub fn execute_scheduled(&self, payment_id: u64) -> LedgerResult<(Receipt, ScheduledPayment)> {
        let Some(payment) = self.store.get_payment(payment_id)? else {
            return Ok(Err(Rejection::PaymentNotFound(payment_id)));
        };
        if payment.executed {
            return Ok(Err(Rejection::PaymentAlreadyExecuted(payment_id)));
        }
        let receipt = match self.post(Posting {
            from: None,
            to: Some(payment.target),
            amount: payment.amount,
            kind: TransactionKind::ScheduledGive,
            reason: payment.reason.clone(),
            anonymous: false,
            settlement: Settlement::Scheduled { payment_id },
        })? {
            Ok(receipt) => receipt,
            Err(rejection) => return Ok(Err(rejection)),
        };
        let executed = self
            .store
            .get_payment(payment_id)?
            .ok_or(StoreError::CorruptKey { tree: "scheduled_payments" })?;
        Ok(Ok((receipt, executed)))
    }

    fn post(&self, posting: Posting) -> LedgerResult<Receipt> {
        if posting.amount == 0 {
            return Ok(Err(Rejection::ZeroAmount));
        }
        let parties: Vec<UserId> = [posting.from, posting.to].into_iter().flatten().collect();
        let tx_id = self.store.next_id()?;
        let now = self.clock.now();

        let _guard = self.store.lock_players(&parties);
        let result = (
            &self.store.players,
            &self.store.transactions,
            &self.store.tx_index,
            &self.store.purchases,
            &self.store.schedules,
        )
            .transaction(|(players, transactions, index, purchases, schedules)| {
                apply(
                    &posting, tx_id, now, players, transactions, index, purchases, schedules,
                )
            });

        match result {
            Ok(receipt) => {
                self.store.flush()?;
                info!(
                    "ledger #{} {} {} from {:?} to {:?}{}",
                    receipt.transaction.id,
                    receipt.transaction.kind.as_str(),
                    receipt.transaction.amount,
                    receipt.transaction.from,
                    receipt.transaction.to,
                    receipt
                        .transaction
                        .reason
                        .as_deref()
                        .map(|r| format!(" ({})", preview(r)))
                        .unwrap_or_default()
                );
                Ok(Ok(receipt))
            }
            Err(TransactionError::Abort(Abort::Rejected(rejection))) => {
                debug!(
                    "ledger {} of {} rejected: {}",
                    posting.kind.as_str(),
                    posting.amount,
                    rejection
                );
                Ok(Err(rejection))
            }
            Err(TransactionError::Abort(Abort::Store(err))) => Err(err),
            Err(TransactionError::Storage(err)) => Err(StoreError::Sled(err)),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply(
    posting: &Posting,
    tx_id: u64,
    now: DateTime<Utc>,
    players: &TransactionalTree,
    transactions: &TransactionalTree,
    index: &TransactionalTree,
    purchases: &TransactionalTree,
    schedules: &TransactionalTree,
) -> TxResult<Receipt> {
    // Reads and checks first; nothing is written before every check passed.
    let settled_request = match posting.settlement {
        Settlement::Purchase { request_id } => {
            let Some(bytes) = purchases.get(&id_key(request_id)[..])? else {
                return reject(Rejection::RequestNotFound(request_id));
            };
            let request: PurchaseRequest = decode(&bytes).map_err(fatal)?;
            if request.status != PurchaseStatus::Approved {
                return reject(Rejection::RequestNotActionable(request_id));
            }
            Some(request)
        }
        _ => None,
    };
    let executed_payment = match posting.settlement {
        Settlement::Scheduled { payment_id } => {
            let Some(bytes) = schedules.get(&id_key(payment_id)[..])? else {
                return reject(Rejection::PaymentNotFound(payment_id));
            };
            let payment: ScheduledPayment = decode(&bytes).map_err(fatal)?;
            if payment.executed {
                return reject(Rejection::PaymentAlreadyExecuted(payment_id));
            }
            Some(payment)
        }
        _ => None,
    };

    let mut debited = match posting.from {
        Some(id) => Some(load_player(players, id)?),
        None => None,
    };
    let mut credited = match posting.to {
        Some(id) => Some(load_player(players, id)?),
        None => None,
    };

    if let Some(player) = debited.as_mut() {
        if player.balance < posting.amount {
            return reject(Rejection::InsufficientFunds {
                user_id: player.user_id,
                balance: player.balance,
                required: posting.amount,
            });
        }
        player.balance -= posting.amount;
        player.updated_at = now;
    }
    if let Some(player) = credited.as_mut() {
        player.balance = player.balance.saturating_add(posting.amount);
        player.updated_at = now;
    }

    for player in debited.iter().chain(credited.iter()) {
        save(players, &id_key(player.user_id), player)?;
    }

    let record = TransactionRecord {
        id: tx_id,
        from: posting.from,
        to: posting.to,
        amount: posting.amount,
        kind: posting.kind,
        reason: posting.reason.clone(),
        anonymous: posting.anonymous,
        created_at: now,
        schema_version: TRANSACTION_SCHEMA_VERSION,
    };
    save(transactions, &id_key(tx_id), &record)?;
    for party in [posting.from, posting.to].into_iter().flatten() {
        index.insert(&index_key(party, tx_id)[..], &[] as &[u8])?;
    }

    if let Some(mut request) = settled_request {
        request.status = PurchaseStatus::Completed;
        request.updated_at = now;
        save(purchases, &id_key(request.id), &request)?;
    }
    if let Some(mut payment) = executed_payment {
        payment.executed = true;
        payment.executed_at = Some(now);
        save(schedules, &id_key(payment.id), &payment)?;
    }

    Ok(Receipt {
        transaction: record,
        debited,
        credited,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::BotStoreBuilder;
    use tempfile::TempDir;

    fn setup(balances: &[(UserId, u64)]) -> (TempDir, Ledger) {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(BotStoreBuilder::new(dir.path()).open().expect("store"));
        let now = Utc::now();
        for (id, balance) in balances {
            store
                .insert_player_if_absent(PlayerRecord::new(*id, "P", "", *balance, now))
                .expect("player");
        }
        (dir, Ledger::new(store, Arc::new(SystemClock)))
    }

    #[test]
    fn transfer_moves_balance_and_records_row() {
        let (_dir, ledger) = setup(&[(1, 100), (2, 100)]);
        let receipt = ledger.transfer(1, 2, 40, false).expect("store").expect("applied");
        assert_eq!(receipt.debited.as_ref().map(|p| p.balance), Some(60));
        assert_eq!(receipt.credited.as_ref().map(|p| p.balance), Some(140));
        let history = ledger
            .store()
            .player_transactions(2, crate::types::HistoryFilter::All, None)
            .expect("history");
        assert_eq!(history, vec![receipt.transaction]);
    }

    #[test]
    fn rejections_leave_no_trace() {
        let (_dir, ledger) = setup(&[(1, 30), (2, 100)]);
        assert_eq!(
            ledger.transfer(1, 2, 50, false).expect("store").unwrap_err(),
            Rejection::InsufficientFunds {
                user_id: 1,
                balance: 30,
                required: 50
            }
        );
        assert_eq!(
            ledger.transfer(1, 1, 5, false).expect("store").unwrap_err(),
            Rejection::SelfTransfer
        );
        assert_eq!(
            ledger.transfer(1, 3, 5, false).expect("store").unwrap_err(),
            Rejection::PlayerNotFound(3)
        );
        assert_eq!(
            ledger.admin_grant(9, 2, 0, None).expect("store").unwrap_err(),
            Rejection::ZeroAmount
        );
        assert_eq!(ledger.store().transaction_count(), 0);
        let sender = ledger.store().get_player(1).expect("get").expect("present");
        assert_eq!(sender.balance, 30);
    }

    #[test]
    fn deduct_requires_funds_and_grant_does_not() {
        let (_dir, ledger) = setup(&[(5, 10)]);
        assert!(ledger.admin_deduct(1, 5, 11, None).expect("store").is_err());
        let grant = ledger
            .admin_grant(1, 5, 500, Some("турнир"))
            .expect("store")
            .expect("applied");
        assert_eq!(grant.transaction.from, None);
        assert_eq!(grant.credited.map(|p| p.balance), Some(510));
        let take = ledger
            .admin_deduct(1, 5, 11, None)
            .expect("store")
            .expect("applied");
        assert_eq!(take.transaction.to, None);
        assert_eq!(take.debited.map(|p| p.balance), Some(499));
    }

    #[test]
    fn settle_purchase_only_once() {
        let (_dir, ledger) = setup(&[(1, 100)]);
        let now = Utc::now();
        let request = ledger
            .store()
            .create_purchase_request(1, "щит", now)
            .expect("create");
        ledger
            .store()
            .transition_purchase(request.id, PurchaseStatus::Pending, now, |r| {
                r.status = PurchaseStatus::Approved;
                r.price = Some(70);
            })
            .expect("approve")
            .expect("was pending");
        let (receipt, settled) = ledger
            .settle_purchase(request.id, 1)
            .expect("store")
            .expect("applied");
        assert_eq!(receipt.debited.map(|p| p.balance), Some(30));
        assert_eq!(settled.status, PurchaseStatus::Completed);
        assert_eq!(
            ledger.settle_purchase(request.id, 1).expect("store").unwrap_err(),
            Rejection::RequestNotActionable(request.id)
        );
        assert_eq!(ledger.store().transaction_count(), 1);
    }
}
