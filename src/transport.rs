//! Outbound side of the chat transport.
//!
//! The bot only needs to send text, optionally with a button keyboard. The concrete
//! chat network lives behind [`Messenger`]; [`ConsoleMessenger`] writes to stdout and
//! is what `chillbot start` uses together with the stdin adapter.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::UserId;

/// Button captions. The router matches on these, so they double as command words.
pub mod labels {
    pub const BALANCE: &str = "💰 Баланс";
    pub const STATS: &str = "📊 Статистика";
    pub const TRANSFER: &str = "➡️ Перевести";
    pub const BUY: &str = "🛒 Купить";
    pub const HISTORY: &str = "📜 История";
    pub const TOP: &str = "🏆 Топ игроков";
    pub const SETTINGS: &str = "⚙️ Настройки";
    pub const HELP: &str = "❓ Помощь";
    pub const REQUESTS: &str = "📋 Мои запросы";

    pub const CONFIRM: &str = "✅ Подтвердить";
    pub const CANCEL: &str = "❌ Отменить";
    pub const BACK: &str = "🔙 Назад";

    pub const CATEGORY_COMBAT: &str = "🔥 Боевые";
    pub const CATEGORY_DEFENSE: &str = "🛡️ Защитные";
    pub const CATEGORY_UTILITY: &str = "⚡ Утилити";
    pub const CATEGORY_ITEMS: &str = "🎒 Предметы";
    pub const CATEGORY_CUSTOM: &str = "✏️ Свой запрос";

    pub const FILTER_TRANSFERS: &str = "➡️ Переводы";
    pub const FILTER_PURCHASES: &str = "🛒 Покупки";
    pub const FILTER_ADMIN: &str = "👑 Админ";
    pub const FILTER_ALL: &str = "📋 Все";

    pub const NOTIFICATIONS_OFF: &str = "🔔 Выключить уведомления";
    pub const NOTIFICATIONS_ON: &str = "🔕 Включить уведомления";
    pub const HIDE_BALANCE: &str = "👁️ Скрыть баланс в топе";
    pub const SHOW_BALANCE: &str = "👁️‍🗨️ Показать баланс в топе";

    pub const ADMIN_PANEL: &str = "👑 Админка";
    pub const ADMIN_GRANT: &str = "💸 Начислить";
    pub const ADMIN_DEDUCT: &str = "💳 Списать";
    pub const ADMIN_STATS: &str = "📈 Общая статистика";
    pub const ADMIN_MANAGE: &str = "🔨 Управление";
    pub const ADMIN_BROADCAST: &str = "📢 Рассылка";
    pub const ADMIN_EXIT: &str = "🔙 Выход из админки";

    pub const ADMIN_BAN: &str = "🚫 Забанить";
    pub const ADMIN_UNBAN: &str = "✅ Разбанить";
    pub const ADMIN_DELETE: &str = "🗑️ Удалить профиль";
    pub const ADMIN_FIND: &str = "🔍 Найти игрока";
    pub const ADMIN_SCHEDULE: &str = "⏰ Запланировать";
    pub const ADMIN_GIFT_ALL: &str = "🎁 Начислить всем";
}

/// Keyboard layouts attached to outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    MainMenu,
    AdminMenu,
    AdminManagement,
    Confirm,
    Amounts,
    Categories,
    HistoryFilters,
    Settings { notifications_on: bool },
    CancelOnly,
}

impl Keyboard {
    /// Button captions, row by row.
    pub fn rows(&self) -> Vec<Vec<&'static str>> {
        use labels::*;
        match self {
            Keyboard::MainMenu => vec![
                vec![BALANCE, STATS],
                vec![TRANSFER, BUY],
                vec![HISTORY, TOP],
                vec![REQUESTS, SETTINGS],
                vec![HELP],
            ],
            Keyboard::AdminMenu => vec![
                vec![ADMIN_GRANT, ADMIN_DEDUCT],
                vec![ADMIN_STATS, TOP],
                vec![ADMIN_MANAGE, ADMIN_BROADCAST],
                vec![ADMIN_EXIT],
            ],
            Keyboard::AdminManagement => vec![
                vec![ADMIN_BAN, ADMIN_UNBAN],
                vec![ADMIN_DELETE, ADMIN_FIND],
                vec![ADMIN_SCHEDULE, ADMIN_GIFT_ALL],
                vec![BACK],
            ],
            Keyboard::Confirm => vec![vec![CONFIRM, CANCEL]],
            Keyboard::Amounts => vec![
                vec!["10", "25", "50"],
                vec!["100", "250", "500"],
                vec![CANCEL],
            ],
            Keyboard::Categories => vec![
                vec![CATEGORY_COMBAT, CATEGORY_DEFENSE],
                vec![CATEGORY_UTILITY, CATEGORY_ITEMS],
                vec![CATEGORY_CUSTOM, CANCEL],
            ],
            Keyboard::HistoryFilters => vec![
                vec![FILTER_TRANSFERS, FILTER_PURCHASES],
                vec![FILTER_ADMIN, FILTER_ALL],
                vec![CANCEL],
            ],
            Keyboard::Settings { notifications_on } => vec![
                vec![if *notifications_on {
                    NOTIFICATIONS_OFF
                } else {
                    NOTIFICATIONS_ON
                }],
                vec![HIDE_BALANCE, SHOW_BALANCE],
                vec![BACK],
            ],
            Keyboard::CancelOnly => vec![vec![CANCEL]],
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("delivery to {user_id} failed: {reason}")]
    Delivery { user_id: UserId, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound message sink.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;
}

/// Writes every outgoing message to stdout, prefixed with the recipient id.
pub struct ConsoleMessenger {
    out: Mutex<tokio::io::Stdout>,
}

impl ConsoleMessenger {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let mut rendered = String::new();
        for line in text.lines() {
            rendered.push_str(&format!("[{}] {}\n", user_id, line));
        }
        if let Some(keyboard) = keyboard {
            for row in keyboard.rows() {
                let buttons: Vec<String> = row.iter().map(|b| format!("[ {} ]", b)).collect();
                rendered.push_str(&format!("[{}]   {}\n", user_id, buttons.join(" ")));
            }
        }
        let mut out = self.out.lock().await;
        out.write_all(rendered.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
