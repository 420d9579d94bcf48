//! Persistent records of the ledger and the purchase/scheduling workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PLAYER_SCHEMA_VERSION: u8 = 1;
pub const TRANSACTION_SCHEMA_VERSION: u8 = 1;
pub const PURCHASE_SCHEMA_VERSION: u8 = 1;
pub const SCHEDULE_SCHEMA_VERSION: u8 = 1;

/// Experience granted for every tracked chat message.
pub const XP_PER_MESSAGE: u32 = 10;
/// Experience needed per level.
pub const XP_PER_LEVEL: u32 = 100;

/// Opaque external user id handed to us by the chat transport.
pub type UserId = u64;

/// Level derived from accumulated experience.
pub fn level_for(experience: u32) -> u32 {
    experience / XP_PER_LEVEL + 1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRecord {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub balance: u64,
    pub experience: u32,
    pub level: u32,
    pub messages_count: u32,
    pub notifications_enabled: bool,
    /// Hide this player from the public leaderboard.
    pub hide_balance: bool,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PlayerRecord {
    pub fn new(
        user_id: UserId,
        first_name: &str,
        last_name: &str,
        starting_balance: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            balance: starting_balance,
            experience: 0,
            level: 1,
            messages_count: 0,
            notifications_enabled: true,
            hide_balance: false,
            banned: false,
            ban_reason: None,
            created_at: now,
            updated_at: now,
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }

    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        name.trim().to_string()
    }

    /// Count one chat message. Returns the new level when it went up.
    pub fn record_message(&mut self) -> Option<u32> {
        self.messages_count = self.messages_count.saturating_add(1);
        self.experience = self.experience.saturating_add(XP_PER_MESSAGE);
        let level = level_for(self.experience);
        if level > self.level {
            self.level = level;
            Some(level)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Transfer,
    Purchase,
    AdminGive,
    AdminTake,
    ScheduledGive,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Purchase => "purchase",
            TransactionKind::AdminGive => "admin_give",
            TransactionKind::AdminTake => "admin_take",
            TransactionKind::ScheduledGive => "scheduled_give",
        }
    }
}

/// Immutable record of one balance movement.
///
/// `from == None` marks a system credit, `to == None` a system debit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: u64,
    pub from: Option<UserId>,
    pub to: Option<UserId>,
    pub amount: u64,
    pub kind: TransactionKind,
    pub reason: Option<String>,
    pub anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl TransactionRecord {
    /// Signed effect of this transaction on `user_id`'s balance.
    pub fn delta_for(&self, user_id: UserId) -> i128 {
        let mut delta = 0i128;
        if self.to == Some(user_id) {
            delta += self.amount as i128;
        }
        if self.from == Some(user_id) {
            delta -= self.amount as i128;
        }
        delta
    }
}

/// History filters offered to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFilter {
    All,
    Transfers,
    Purchases,
    Admin,
}

impl HistoryFilter {
    pub fn matches(&self, kind: TransactionKind) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::Transfers => kind == TransactionKind::Transfer,
            HistoryFilter::Purchases => kind == TransactionKind::Purchase,
            HistoryFilter::Admin => {
                matches!(kind, TransactionKind::AdminGive | TransactionKind::AdminTake)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PurchaseStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl PurchaseStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "ожидает ответа",
            PurchaseStatus::Approved => "одобрен",
            PurchaseStatus::Rejected => "отклонён",
            PurchaseStatus::Completed => "выполнен",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub id: u64,
    pub requester: UserId,
    pub description: String,
    pub price: Option<u64>,
    pub status: PurchaseStatus,
    pub admin_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PurchaseRequest {
    pub fn new(id: u64, requester: UserId, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            requester,
            description: description.to_string(),
            price: None,
            status: PurchaseStatus::Pending,
            admin_response: None,
            created_at: now,
            updated_at: now,
            schema_version: PURCHASE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledPayment {
    pub id: u64,
    pub target: UserId,
    pub admin_id: UserId,
    pub amount: u64,
    pub reason: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl ScheduledPayment {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.executed && self.scheduled_for <= now
    }
}

/// Achievement badges. Thresholds live in [`crate::achievement`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AchievementKind {
    FirstPurchase,
    Generous,
    MegaGenerous,
    Accumulator,
    Rich,
    Activist,
}

impl AchievementKind {
    pub const ALL: [AchievementKind; 6] = [
        AchievementKind::FirstPurchase,
        AchievementKind::Generous,
        AchievementKind::MegaGenerous,
        AchievementKind::Accumulator,
        AchievementKind::Rich,
        AchievementKind::Activist,
    ];

    /// Stable on-disk code; never reorder.
    pub fn code(&self) -> u8 {
        match self {
            AchievementKind::FirstPurchase => 1,
            AchievementKind::Generous => 2,
            AchievementKind::MegaGenerous => 3,
            AchievementKind::Accumulator => 4,
            AchievementKind::Rich => 5,
            AchievementKind::Activist => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn title(&self) -> &'static str {
        match self {
            AchievementKind::FirstPurchase => "Первая покупка",
            AchievementKind::Generous => "Щедрость",
            AchievementKind::MegaGenerous => "Мега-щедрость",
            AchievementKind::Accumulator => "Накопитель",
            AchievementKind::Rich => "Богач",
            AchievementKind::Activist => "Активист",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AchievementKind::FirstPurchase => "Совершили первую покупку",
            AchievementKind::Generous => "Перевели более 1000 чилликов",
            AchievementKind::MegaGenerous => "Перевели более 5000 чилликов",
            AchievementKind::Accumulator => "Достигли 500 чилликов на балансе",
            AchievementKind::Rich => "Достигли 1000 чилликов на балансе",
            AchievementKind::Activist => "Совершили 100 транзакций",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            AchievementKind::FirstPurchase => "🏆",
            AchievementKind::Generous => "💸",
            AchievementKind::MegaGenerous => "🌟",
            AchievementKind::Accumulator => "🔥",
            AchievementKind::Rich => "💎",
            AchievementKind::Activist => "⚡",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EarnedAchievement {
    pub user_id: UserId,
    pub kind: AchievementKind,
    pub earned_at: DateTime<Utc>,
}

/// Aggregate figures shown to administrators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStats {
    pub total_players: usize,
    pub total_emission: u64,
    pub average_balance: f64,
    pub total_transactions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_follows_experience() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(250), 3);
    }

    #[test]
    fn record_message_reports_level_up_once() {
        let mut player = PlayerRecord::new(1, "Ann", "Lee", 100, Utc::now());
        for _ in 0..9 {
            assert_eq!(player.record_message(), None);
        }
        assert_eq!(player.record_message(), Some(2));
        assert_eq!(player.record_message(), None);
        assert_eq!(player.messages_count, 11);
    }

    #[test]
    fn achievement_codes_round_trip() {
        for kind in AchievementKind::ALL {
            assert_eq!(AchievementKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(AchievementKind::from_code(0), None);
    }

    #[test]
    fn delta_reflects_direction() {
        let tx = TransactionRecord {
            id: 1,
            from: Some(1),
            to: Some(2),
            amount: 40,
            kind: TransactionKind::Transfer,
            reason: None,
            anonymous: false,
            created_at: Utc::now(),
            schema_version: TRANSACTION_SCHEMA_VERSION,
        };
        assert_eq!(tx.delta_for(1), -40);
        assert_eq!(tx.delta_for(2), 40);
        assert_eq!(tx.delta_for(3), 0);
    }

    #[test]
    fn admin_filter_excludes_scheduled_grants() {
        assert!(HistoryFilter::Admin.matches(TransactionKind::AdminGive));
        assert!(HistoryFilter::Admin.matches(TransactionKind::AdminTake));
        assert!(!HistoryFilter::Admin.matches(TransactionKind::ScheduledGive));
        assert!(HistoryFilter::All.matches(TransactionKind::ScheduledGive));
    }
}
