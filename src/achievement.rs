//! Achievement evaluation.
//!
//! Badges are derived from a player's full transaction history and current balance.
//! Evaluation is stateless: it recomputes [`PlayerStats`] and asks the store to award
//! every kind whose threshold is met. The store refuses duplicates, so running the
//! evaluation again on unchanged history awards nothing.

use chrono::{DateTime, Utc};
use log::info;

use crate::errors::StoreError;
use crate::store::BotStore;
use crate::types::{AchievementKind, HistoryFilter, TransactionKind, TransactionRecord, UserId};

pub const GENEROUS_THRESHOLD: u64 = 1_000;
pub const MEGA_GENEROUS_THRESHOLD: u64 = 5_000;
pub const ACCUMULATOR_THRESHOLD: u64 = 500;
pub const RICH_THRESHOLD: u64 = 1_000;
pub const ACTIVIST_THRESHOLD: usize = 100;

/// Aggregates over one player's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub balance: u64,
    /// Sum of amounts this player sent by transfer.
    pub transferred_out: u64,
    /// Sum of every credit to this player.
    pub received: u64,
    /// Sum of every debit from this player.
    pub spent: u64,
    /// Transfers this player sent.
    pub transfer_count: usize,
    pub purchase_count: usize,
    pub largest_purchase: u64,
    pub transaction_count: usize,
}

impl PlayerStats {
    pub fn from_history(user_id: UserId, balance: u64, history: &[TransactionRecord]) -> Self {
        let mut stats = PlayerStats {
            balance,
            transaction_count: history.len(),
            ..Default::default()
        };
        for tx in history {
            if tx.to == Some(user_id) {
                stats.received += tx.amount;
            }
            if tx.from == Some(user_id) {
                stats.spent += tx.amount;
            }
            match tx.kind {
                TransactionKind::Transfer if tx.from == Some(user_id) => {
                    stats.transfer_count += 1;
                    stats.transferred_out += tx.amount;
                }
                TransactionKind::Purchase => {
                    stats.purchase_count += 1;
                    stats.largest_purchase = stats.largest_purchase.max(tx.amount);
                }
                _ => {}
            }
        }
        stats
    }

    /// Every badge these statistics qualify for.
    pub fn qualifying(&self) -> Vec<AchievementKind> {
        AchievementKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                AchievementKind::FirstPurchase => self.purchase_count >= 1,
                AchievementKind::Generous => self.transferred_out >= GENEROUS_THRESHOLD,
                AchievementKind::MegaGenerous => self.transferred_out >= MEGA_GENEROUS_THRESHOLD,
                AchievementKind::Accumulator => self.balance >= ACCUMULATOR_THRESHOLD,
                AchievementKind::Rich => self.balance >= RICH_THRESHOLD,
                AchievementKind::Activist => self.transaction_count >= ACTIVIST_THRESHOLD,
            })
            .collect()
    }
}

/// Statistics for `user_id`, or `None` if the player does not exist.
pub fn player_stats(store: &BotStore, user_id: UserId) -> Result<Option<PlayerStats>, StoreError> {
    let Some(player) = store.get_player(user_id)? else {
        return Ok(None);
    };
    let history = store.player_transactions(user_id, HistoryFilter::All, None)?;
    Ok(Some(PlayerStats::from_history(
        user_id,
        player.balance,
        &history,
    )))
}

/// Award every newly earned achievement and return those kinds.
pub fn evaluate(
    store: &BotStore,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<AchievementKind>, StoreError> {
    let Some(stats) = player_stats(store, user_id)? else {
        return Ok(Vec::new());
    };
    let mut awarded = Vec::new();
    for kind in stats.qualifying() {
        if store.award_achievement(user_id, kind, now)? {
            info!("player {} earned achievement {:?}", user_id, kind);
            awarded.push(kind);
        }
    }
    Ok(awarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TRANSACTION_SCHEMA_VERSION;

    fn tx(id: u64, from: Option<UserId>, to: Option<UserId>, amount: u64, kind: TransactionKind) -> TransactionRecord {
        TransactionRecord {
            id,
            from,
            to,
            amount,
            kind,
            reason: None,
            anonymous: false,
            created_at: Utc::now(),
            schema_version: TRANSACTION_SCHEMA_VERSION,
        }
    }

    #[test]
    fn stats_split_directions() {
        let history = vec![
            tx(1, Some(1), Some(2), 600, TransactionKind::Transfer),
            tx(2, Some(2), Some(1), 50, TransactionKind::Transfer),
            tx(3, Some(1), None, 30, TransactionKind::Purchase),
            tx(4, Some(1), None, 80, TransactionKind::Purchase),
            tx(5, None, Some(1), 200, TransactionKind::AdminGive),
        ];
        let stats = PlayerStats::from_history(1, 40, &history);
        assert_eq!(stats.transferred_out, 600);
        assert_eq!(stats.received, 250);
        assert_eq!(stats.spent, 710);
        assert_eq!(stats.transfer_count, 1);
        assert_eq!(stats.purchase_count, 2);
        assert_eq!(stats.largest_purchase, 80);
        assert_eq!(stats.transaction_count, 5);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let stats = PlayerStats {
            balance: 1_000,
            transferred_out: 1_000,
            purchase_count: 1,
            transaction_count: 99,
            ..Default::default()
        };
        assert_eq!(
            stats.qualifying(),
            vec![
                AchievementKind::FirstPurchase,
                AchievementKind::Generous,
                AchievementKind::Accumulator,
                AchievementKind::Rich,
            ]
        );
    }
}
