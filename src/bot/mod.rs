//! # Chat front-end
//!
//! [`ChillBot`] turns inbound chat messages into dialogue transitions and ledger
//! operations. Each message is resolved in order:
//!
//! 1. the sender's player record is created on first contact
//! 2. ordinary chat messages earn experience
//! 3. a cancel word aborts any flow
//! 4. an active flow receives the text at its current step
//! 5. otherwise the text is matched against commands, the `оплатить <id>` re-entry
//!    and, for administrators, purchase replies
//!
//! Guards from [`guards`] run before a handler touches any state. Storage failures
//! surface as errors from the handler; [`ChillBot::handle_event`] logs them, clears
//! the sender's flow and answers with a generic failure message.
//!
//! The bot also owns the background loop that applies scheduled payments and
//! sweeps expired dialogue entries and idle rate-limit state.

mod admin;
pub mod format;
pub mod guards;
mod player;
mod purchase;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::achievement;
use crate::clock::Clock;
use crate::config::Config;
use crate::dialogue::{is_cancel, AdjustOperation, DialogueState, DialogueStep, DialogueStore};
use crate::ledger::Ledger;
use crate::logutil::preview;
use crate::ratelimit::RateLimiter;
use crate::scheduler::{PaymentScheduler, TickReport};
use crate::store::BotStore;
use crate::transport::{labels, Keyboard, Messenger};
use crate::types::{PlayerRecord, UserId};
use crate::validate::looks_like_admin_reply;

use guards::Denial;

pub const GENERIC_FAILURE: &str = "❌ Произошла ошибка. Попробуйте позже.";
pub const UNKNOWN_COMMAND: &str = "❓ Команда не распознана. Используйте /help для справки";
pub const FLOW_EXPIRED: &str = "⌛ Время операции истекло. Начните заново.";

const DEFAULT_FIRST_NAME: &str = "Игрок";
const CONFIRM_WORDS: [&str; 3] = ["✅ подтвердить", "подтвердить", "да"];

/// Whether `text` confirms a pending operation.
pub fn is_confirm(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    CONFIRM_WORDS.contains(&lower.as_str())
}

/// One message received from the chat transport.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub text: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl InboundEvent {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    Balance,
    Transfer,
    History,
    Top,
    Stats,
    Settings,
    Buy,
    Requests,
    ToggleNotifications,
    HideBalance,
    ShowBalance,
    Back,
    AdminPanel,
    AdminExit,
    Grant,
    Deduct,
    AdminStats,
    Manage,
    Ban,
    Unban,
    Delete,
    Schedule,
    Broadcast,
    GiftAll,
    Find,
}

const COMMAND_WORDS: &[(Command, &[&str])] = &[
    (Command::Start, &["начать", "/start", "start"]),
    (Command::Help, &["помощь", "/help", "help", labels::HELP]),
    (Command::Balance, &["баланс", "/balance", labels::BALANCE]),
    (Command::Transfer, &["перевести", "/transfer", labels::TRANSFER]),
    (Command::History, &["история", "/history", labels::HISTORY]),
    (Command::Top, &["топ", "лидеры", "/leaderboard", "/top", labels::TOP]),
    (Command::Stats, &["статистика", "/stats", labels::STATS]),
    (Command::Settings, &["настройки", "/settings", labels::SETTINGS]),
    (Command::Buy, &["купить", "/buy", labels::BUY]),
    (Command::Requests, &["запросы", "/requests", labels::REQUESTS]),
    (
        Command::ToggleNotifications,
        &[labels::NOTIFICATIONS_OFF, labels::NOTIFICATIONS_ON, "/notifications"],
    ),
    (Command::HideBalance, &[labels::HIDE_BALANCE, "/hide"]),
    (Command::ShowBalance, &[labels::SHOW_BALANCE, "/show"]),
    (Command::Back, &["назад", "/menu", labels::BACK]),
    (Command::AdminPanel, &["админка", "/admin", labels::ADMIN_PANEL]),
    (Command::AdminExit, &[labels::ADMIN_EXIT]),
    (Command::Grant, &["начислить", "/give", labels::ADMIN_GRANT]),
    (Command::Deduct, &["списать", "/take", labels::ADMIN_DEDUCT]),
    (
        Command::AdminStats,
        &["админ статистика", "/admin_stats", labels::ADMIN_STATS],
    ),
    (Command::Manage, &["управление", "/management", labels::ADMIN_MANAGE]),
    (Command::Ban, &["забанить", "/ban", labels::ADMIN_BAN]),
    (Command::Unban, &["разбанить", "/unban", labels::ADMIN_UNBAN]),
    (Command::Delete, &["удалить", "/delete", labels::ADMIN_DELETE]),
    (Command::Schedule, &["запланировать", "/schedule", labels::ADMIN_SCHEDULE]),
    (Command::Broadcast, &["рассылка", "/broadcast", labels::ADMIN_BROADCAST]),
    (
        Command::GiftAll,
        &["начислить всем", "/gift_all", labels::ADMIN_GIFT_ALL],
    ),
    (Command::Find, &["найти", "/find", labels::ADMIN_FIND]),
];

impl Command {
    fn parse(text: &str) -> Option<Command> {
        let lower = text.trim().to_lowercase();
        COMMAND_WORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| w.to_lowercase() == lower))
            .map(|(command, _)| *command)
    }

    fn admin_only(&self) -> bool {
        matches!(
            self,
            Command::AdminPanel
                | Command::AdminExit
                | Command::Grant
                | Command::Deduct
                | Command::AdminStats
                | Command::Manage
                | Command::Ban
                | Command::Unban
                | Command::Delete
                | Command::Schedule
                | Command::Broadcast
                | Command::GiftAll
                | Command::Find
        )
    }

    /// Commands usable even by banned players.
    fn always_allowed(&self) -> bool {
        matches!(self, Command::Start | Command::Help | Command::Back)
    }

    fn rate_limited(&self) -> bool {
        matches!(
            self,
            Command::Balance
                | Command::Transfer
                | Command::History
                | Command::Top
                | Command::Stats
                | Command::Settings
                | Command::Buy
                | Command::Requests
                | Command::Grant
                | Command::Deduct
                | Command::AdminStats
                | Command::Manage
        )
    }
}

fn is_admin_step(step: DialogueStep) -> bool {
    matches!(
        step,
        DialogueStep::AdjustPlayer
            | DialogueStep::AdjustAmount
            | DialogueStep::AdjustReason
            | DialogueStep::SchedulePlayer
            | DialogueStep::ScheduleAmount
            | DialogueStep::ScheduleTime
            | DialogueStep::ScheduleReason
            | DialogueStep::BanPlayer
            | DialogueStep::BanReason
            | DialogueStep::UnbanPlayer
            | DialogueStep::DeletePlayer
            | DialogueStep::DeleteConfirm
            | DialogueStep::FindQuery
            | DialogueStep::BroadcastText
            | DialogueStep::GiftAllAmount
    )
}

pub struct ChillBot {
    name: String,
    admins: HashSet<UserId>,
    /// Admin ids in configured order, for notifications.
    admin_order: Vec<UserId>,
    starting_balance: u64,
    utc_offset_minutes: i32,
    scheduler_enabled: bool,
    store: Arc<BotStore>,
    ledger: Arc<Ledger>,
    dialogue: DialogueStore,
    limiter: RateLimiter,
    scheduler: PaymentScheduler,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
}

impl ChillBot {
    pub fn new(
        config: &Config,
        store: Arc<BotStore>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(store.clone(), clock.clone()));
        Self {
            name: config.bot.name.clone(),
            admins: config.admin_set(),
            admin_order: config.bot.admin_ids.clone(),
            starting_balance: config.bot.starting_balance,
            utc_offset_minutes: config.bot.utc_offset_minutes,
            scheduler_enabled: config.scheduler.enabled,
            dialogue: DialogueStore::new(
                Duration::minutes(config.bot.dialogue_timeout_minutes as i64),
                clock.clone(),
            ),
            limiter: RateLimiter::new(
                Duration::seconds(config.limits.command_cooldown_seconds as i64),
                config.limits.max_purchase_requests_per_hour,
                clock.clone(),
            ),
            scheduler: PaymentScheduler::new(ledger.clone(), clock.clone()),
            store,
            ledger,
            messenger,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<BotStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn dialogue(&self) -> &DialogueStore {
        &self.dialogue
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    /// Handle one inbound message. Never fails; problems are logged and reported
    /// to the sender.
    pub async fn handle_event(&self, event: InboundEvent) {
        let user_id = event.user_id;
        debug!("message from {}: {}", user_id, preview(&event.text));
        if let Err(e) = self.process(&event).await {
            error!("failed to handle message from {}: {:#}", user_id, e);
            self.dialogue.clear(user_id);
            self.send(user_id, GENERIC_FAILURE, None).await;
        }
    }

    async fn process(&self, event: &InboundEvent) -> Result<()> {
        let player = self.ensure_player(event)?;
        let text = event.text.trim();
        if !text.starts_with('/') && !text.starts_with('❌') && !player.banned {
            self.track_message(player.user_id).await?;
        }
        self.route(&player, text).await
    }

    /// Fetch the sender's record, creating it with the starting balance on first contact.
    fn ensure_player(&self, event: &InboundEvent) -> Result<PlayerRecord> {
        let now = self.clock.now();
        let first = event.first_name.as_deref().unwrap_or(DEFAULT_FIRST_NAME);
        let last = event.last_name.as_deref().unwrap_or("");
        let (player, created) = self.store.insert_player_if_absent(PlayerRecord::new(
            event.user_id,
            first,
            last,
            self.starting_balance,
            now,
        ))?;
        if created || event.first_name.is_none() {
            return Ok(player);
        }
        if player.first_name == first && player.last_name == last {
            return Ok(player);
        }
        let updated = self.store.update_player(event.user_id, now, |p| {
            p.first_name = first.to_string();
            p.last_name = last.to_string();
        })?;
        Ok(updated.unwrap_or(player))
    }

    async fn track_message(&self, user_id: UserId) -> Result<()> {
        let mut level_up = None;
        self.store
            .update_player(user_id, self.clock.now(), |p| level_up = p.record_message())?;
        if let Some(level) = level_up {
            info!("player {} reached level {}", user_id, level);
            self.send(user_id, &format::level_up(level), None).await;
        }
        Ok(())
    }

    async fn route(&self, player: &PlayerRecord, text: &str) -> Result<()> {
        let user_id = player.user_id;
        if is_cancel(text) {
            return self.cancel(user_id).await;
        }

        let state = self.dialogue.get(user_id);
        if !state.is_idle() {
            return self.continue_flow(player, state, text).await;
        }

        if let Some(command) = Command::parse(text) {
            return self.run_command(player, command).await;
        }
        if let Some(argument) = purchase::pay_argument(text) {
            if let Err(denial) = guards::require_not_banned(player) {
                return self.deny(user_id, denial).await;
            }
            return self.pay_request(player, argument).await;
        }
        if self.is_admin(user_id) && looks_like_admin_reply(text) {
            return self.admin_purchase_reply(user_id, text).await;
        }

        self.send(user_id, UNKNOWN_COMMAND, None).await;
        Ok(())
    }

    async fn run_command(&self, player: &PlayerRecord, command: Command) -> Result<()> {
        let user_id = player.user_id;
        let guard = if command.admin_only() {
            guards::require_admin(&self.admins, user_id)
        } else if command.always_allowed() {
            Ok(())
        } else {
            guards::require_not_banned(player)
        };
        let guard = guard.and_then(|()| {
            if command.rate_limited() {
                guards::require_cooldown(&self.limiter, user_id)
            } else {
                Ok(())
            }
        });
        if let Err(denial) = guard {
            return self.deny(user_id, denial).await;
        }

        match command {
            Command::Start => self.start(user_id).await,
            Command::Help => self.help(user_id).await,
            Command::Balance => self.balance(user_id).await,
            Command::Transfer => self.transfer_start(user_id).await,
            Command::History => self.history_start(user_id).await,
            Command::Top => self.leaderboard(user_id).await,
            Command::Stats => self.player_stats(user_id).await,
            Command::Settings => self.settings(user_id).await,
            Command::Buy => self.purchase_start(user_id).await,
            Command::Requests => self.list_requests(user_id).await,
            Command::ToggleNotifications => self.toggle_notifications(user_id).await,
            Command::HideBalance => self.set_hide_balance(user_id, true).await,
            Command::ShowBalance => self.set_hide_balance(user_id, false).await,
            Command::Back => {
                self.send(user_id, "🏠 Главное меню", Some(self.menu(user_id)))
                    .await;
                Ok(())
            }
            Command::AdminPanel => {
                self.send(user_id, "👑 Панель администратора", Some(Keyboard::AdminMenu))
                    .await;
                Ok(())
            }
            Command::AdminExit => {
                self.send(user_id, "🏠 Главное меню", Some(Keyboard::MainMenu))
                    .await;
                Ok(())
            }
            Command::Grant => self.adjust_start(user_id, AdjustOperation::Grant).await,
            Command::Deduct => self.adjust_start(user_id, AdjustOperation::Deduct).await,
            Command::AdminStats => self.admin_stats(user_id).await,
            Command::Manage => {
                self.send(
                    user_id,
                    "🔨 Управление игроками\n\nВыберите действие:",
                    Some(Keyboard::AdminManagement),
                )
                .await;
                Ok(())
            }
            Command::Ban => self.ban_start(user_id).await,
            Command::Unban => self.unban_start(user_id).await,
            Command::Delete => self.delete_start(user_id).await,
            Command::Schedule => self.schedule_start(user_id).await,
            Command::Broadcast => self.broadcast_start(user_id).await,
            Command::GiftAll => self.gift_all_start(user_id).await,
            Command::Find => self.find_start(user_id).await,
        }
    }

    async fn continue_flow(
        &self,
        player: &PlayerRecord,
        state: DialogueState,
        text: &str,
    ) -> Result<()> {
        let user_id = player.user_id;
        let guard = if is_admin_step(state.step) {
            guards::require_admin(&self.admins, user_id)
        } else {
            guards::require_not_banned(player)
        };
        if let Err(denial) = guard {
            return self.deny(user_id, denial).await;
        }

        let params = &state.params;
        match state.step {
            DialogueStep::Idle => Ok(()),
            DialogueStep::TransferReceiver => self.transfer_receiver(user_id, text).await,
            DialogueStep::TransferAmount => self.transfer_amount(user_id, params, text).await,
            DialogueStep::TransferConfirm => self.transfer_confirm(user_id, params, text).await,
            DialogueStep::PurchaseCategory => self.purchase_category(user_id, text).await,
            DialogueStep::PurchaseDescription => {
                self.purchase_description(user_id, params, text).await
            }
            DialogueStep::PurchaseConfirm => self.purchase_confirm(user_id, params, text).await,
            DialogueStep::HistoryFilter => self.history_filter(user_id, text).await,
            DialogueStep::AdjustPlayer => self.adjust_player(user_id, params, text).await,
            DialogueStep::AdjustAmount => self.adjust_amount(user_id, params, text).await,
            DialogueStep::AdjustReason => self.adjust_reason(user_id, params, text).await,
            DialogueStep::SchedulePlayer => self.schedule_player(user_id, text).await,
            DialogueStep::ScheduleAmount => self.schedule_amount(user_id, params, text).await,
            DialogueStep::ScheduleTime => self.schedule_time(user_id, params, text).await,
            DialogueStep::ScheduleReason => self.schedule_reason(user_id, params, text).await,
            DialogueStep::BanPlayer => self.ban_player(user_id, text).await,
            DialogueStep::BanReason => self.ban_reason(user_id, params, text).await,
            DialogueStep::UnbanPlayer => self.unban_player(user_id, text).await,
            DialogueStep::DeletePlayer => self.delete_player(user_id, text).await,
            DialogueStep::DeleteConfirm => self.delete_confirm(user_id, params, text).await,
            DialogueStep::FindQuery => self.find_query(user_id, text).await,
            DialogueStep::BroadcastText => self.broadcast_send(user_id, text).await,
            DialogueStep::GiftAllAmount => self.gift_all_amount(user_id, text).await,
        }
    }

    async fn cancel(&self, user_id: UserId) -> Result<()> {
        let state = self.dialogue.get(user_id);
        let text = if state.is_idle() {
            "❌ Нет активных операций для отмены"
        } else {
            self.dialogue.clear(user_id);
            "✅ Операция отменена"
        };
        self.send(user_id, text, Some(self.menu(user_id))).await;
        Ok(())
    }

    async fn deny(&self, user_id: UserId, denial: Denial) -> Result<()> {
        debug!("denied {}: {:?}", user_id, denial);
        self.send(user_id, &denial.message(), None).await;
        Ok(())
    }

    /// A flow lost required parameters (timeout race): drop it and start over.
    async fn flow_expired(&self, user_id: UserId) -> Result<()> {
        self.dialogue.clear(user_id);
        self.send(user_id, FLOW_EXPIRED, Some(self.menu(user_id))).await;
        Ok(())
    }

    fn menu(&self, user_id: UserId) -> Keyboard {
        if self.is_admin(user_id) {
            Keyboard::AdminMenu
        } else {
            Keyboard::MainMenu
        }
    }

    /// Deliver a message, logging instead of failing.
    async fn send(&self, user_id: UserId, text: &str, keyboard: Option<Keyboard>) -> bool {
        match self.messenger.send(user_id, text, keyboard).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to deliver message to {}: {}", user_id, e);
                false
            }
        }
    }

    /// Deliver a notification unless the player switched them off.
    async fn notify(&self, player: &PlayerRecord, text: &str) -> bool {
        if !player.notifications_enabled {
            debug!("notifications disabled for {}", player.user_id);
            return false;
        }
        self.send(player.user_id, text, None).await
    }

    async fn notify_admins(&self, text: &str) -> usize {
        let mut delivered = 0;
        for admin in &self.admin_order {
            if self.send(*admin, text, None).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Award and announce any newly earned achievements.
    ///
    /// Runs after a ledger operation has committed, so a failure here is logged
    /// and never reported to the user as a failed operation.
    async fn award_achievements(&self, user_id: UserId) {
        let earned = match achievement::evaluate(&self.store, user_id, self.clock.now()) {
            Ok(earned) => earned,
            Err(e) => {
                error!("achievement evaluation failed for {}: {}", user_id, e);
                return;
            }
        };
        for kind in earned {
            self.send(user_id, &format::achievement_earned(kind), None)
                .await;
        }
    }

    /// Apply due scheduled payments and notify their recipients.
    pub async fn process_scheduled_payments(&self) -> TickReport {
        let report = match self.scheduler.run_tick() {
            Ok(report) => report,
            Err(e) => {
                error!("scheduler tick failed: {}", e);
                return TickReport::default();
            }
        };
        for (payment, player) in &report.applied {
            let mut msg = format!(
                "⏰ Вам начислено {} чилликов!\n",
                format::balance(payment.amount)
            );
            if let Some(reason) = &payment.reason {
                msg += &format!("💬 {}\n", reason);
            }
            msg += &format!("💰 Ваш баланс: {} чил.", format::balance(player.balance));
            self.notify(player, &msg).await;
            self.award_achievements(player.user_id).await;
        }
        report
    }

    /// Periodic work: scheduled payments, dialogue and rate-limit sweeping, until `shutdown` flips.
    pub async fn run_background(
        self: Arc<Self>,
        period: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "{} background loop started (every {}s, payments {})",
            self.name,
            period.as_secs(),
            if self.scheduler_enabled { "on" } else { "off" }
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.scheduler_enabled {
                        let report = self.process_scheduled_payments().await;
                        if !report.is_empty() {
                            info!(
                                "scheduler: {} applied, {} orphaned, {} failed",
                                report.applied.len(),
                                report.orphaned.len(),
                                report.failed.len()
                            );
                        }
                    }
                    let swept = self.dialogue.sweep_expired();
                    if swept > 0 {
                        debug!("swept {} expired dialogues", swept);
                    }
                    let forgotten = self.limiter.sweep_expired();
                    if forgotten > 0 {
                        debug!("dropped {} idle rate-limit entries", forgotten);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("background loop stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::clock::ManualClock;
    use crate::store::{id_key, index_key, BotStoreBuilder};
    use crate::transport::TransportError;

    #[test]
    fn commands_match_words_and_buttons() {
        assert_eq!(Command::parse("Баланс"), Some(Command::Balance));
        assert_eq!(Command::parse(labels::BALANCE), Some(Command::Balance));
        assert_eq!(Command::parse("/give"), Some(Command::Grant));
        assert_eq!(Command::parse("начислить всем"), Some(Command::GiftAll));
        assert_eq!(Command::parse("привет"), None);
    }

    #[test]
    fn main_menu_buttons_are_player_commands() {
        let buttons: Vec<&str> = Keyboard::MainMenu.rows().into_iter().flatten().collect();
        assert!(buttons.contains(&labels::REQUESTS));
        assert_eq!(Command::parse(labels::REQUESTS), Some(Command::Requests));
        for button in buttons {
            let command = Command::parse(button).unwrap_or_else(|| panic!("{} unmatched", button));
            assert!(!command.admin_only(), "{}", button);
        }
    }

    #[test]
    fn admin_commands_are_flagged() {
        assert!(Command::Grant.admin_only());
        assert!(Command::Find.admin_only());
        assert!(!Command::Transfer.admin_only());
        assert!(Command::Start.always_allowed());
    }

    #[test]
    fn confirm_words() {
        assert!(is_confirm("✅ Подтвердить"));
        assert!(is_confirm("да"));
        assert!(!is_confirm("нет"));
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(UserId, String)>>);

    impl Outbox {
        fn texts_for(&self, user_id: UserId) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| *to == user_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for Outbox {
        async fn send(
            &self,
            user_id: UserId,
            text: &str,
            _keyboard: Option<Keyboard>,
        ) -> Result<(), TransportError> {
            self.0.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn committed_transfer_is_not_reported_as_failed() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = Arc::new(BotStoreBuilder::new(dir.path()).open().expect("store"));
        let outbox = Arc::new(Outbox::default());
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
        ));
        let mut config = Config::default();
        config.limits.command_cooldown_seconds = 0;
        let bot = ChillBot::new(&config, store.clone(), outbox.clone(), clock);

        for id in [10, 20] {
            bot.handle_event(InboundEvent::new(id, "/start")).await;
        }
        // An unreadable history row makes the receiver's achievement check fail.
        store
            .transactions
            .insert(id_key(u64::MAX), b"x".to_vec())
            .expect("insert");
        store
            .tx_index
            .insert(index_key(20, u64::MAX), &[] as &[u8])
            .expect("insert");

        for text in ["перевести", "20", "40", "да"] {
            bot.handle_event(InboundEvent::new(10, text)).await;
        }

        let sender = outbox.texts_for(10);
        assert!(sender.iter().any(|m| m.starts_with("✅ Перевод выполнен")));
        assert!(!sender.iter().any(|m| m == GENERIC_FAILURE));
        let balance = |id| store.get_player(id).expect("read").expect("player").balance;
        assert_eq!(balance(10), 60);
        assert_eq!(balance(20), 140);
    }
}
