//! Test utilities & fixtures.
//! A recording messenger plus a bot wired to a throwaway sled store and a manual clock.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use chillbot::bot::{ChillBot, InboundEvent};
use chillbot::clock::ManualClock;
use chillbot::config::Config;
use chillbot::ledger::Ledger;
use chillbot::store::{BotStore, BotStoreBuilder};
use chillbot::transport::{Keyboard, Messenger, TransportError};
use chillbot::types::{PlayerRecord, UserId};

pub const ADMIN: UserId = 1;

#[derive(Debug, Clone)]
pub struct Sent {
    pub user_id: UserId,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

/// Records every outgoing message; deliveries to `failing` users error out.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    failing: HashSet<UserId>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[UserId]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: ids.iter().copied().collect(),
        }
    }

    pub fn messages_for(&self, user_id: UserId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn last_for(&self, user_id: UserId) -> Option<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.user_id == user_id)
            .cloned()
    }

    pub fn last_text(&self, user_id: UserId) -> String {
        self.last_for(user_id).map(|m| m.text).unwrap_or_default()
    }

    /// Whether any message to `user_id` contains `needle`.
    pub fn received(&self, user_id: UserId, needle: &str) -> bool {
        self.messages_for(user_id).iter().any(|m| m.contains(needle))
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        if self.failing.contains(&user_id) {
            return Err(TransportError::Delivery {
                user_id,
                reason: "blocked by recipient".to_string(),
            });
        }
        self.sent.lock().unwrap().push(Sent {
            user_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
}

/// Defaults with one admin, no cooldown and UTC wall clock.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.admin_ids = vec![ADMIN];
    config.bot.utc_offset_minutes = 0;
    config.limits.command_cooldown_seconds = 0;
    config
}

/// A bare store plus ledger for engine-level tests.
pub struct LedgerFixture {
    pub store: Arc<BotStore>,
    pub ledger: Ledger,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl LedgerFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(BotStoreBuilder::new(dir.path()).open().expect("open store"));
        let clock = Arc::new(ManualClock::new(start_time()));
        let ledger = Ledger::new(store.clone(), clock.clone());
        Self {
            store,
            ledger,
            clock,
            _dir: dir,
        }
    }

    pub fn add_player(&self, user_id: UserId, balance: u64) -> PlayerRecord {
        let (player, created) = self
            .store
            .insert_player_if_absent(PlayerRecord::new(
                user_id,
                "Игрок",
                &user_id.to_string(),
                balance,
                start_time(),
            ))
            .expect("insert player");
        assert!(created);
        player
    }

    pub fn balance(&self, user_id: UserId) -> u64 {
        self.store
            .get_player(user_id)
            .expect("read player")
            .expect("player exists")
            .balance
    }
}

/// A full bot over a temp store.
pub struct Harness {
    pub bot: Arc<ChillBot>,
    pub messenger: Arc<RecordingMessenger>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<BotStore>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), RecordingMessenger::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with(config, RecordingMessenger::new())
    }

    pub fn with(config: Config, messenger: RecordingMessenger) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(BotStoreBuilder::new(dir.path()).open().expect("open store"));
        let clock = Arc::new(ManualClock::new(start_time()));
        let messenger = Arc::new(messenger);
        let bot = Arc::new(ChillBot::new(
            &config,
            store.clone(),
            messenger.clone(),
            clock.clone(),
        ));
        Self {
            bot,
            messenger,
            clock,
            store,
            _dir: dir,
        }
    }

    pub async fn say(&self, user_id: UserId, text: &str) {
        self.bot.handle_event(InboundEvent::new(user_id, text)).await;
    }

    /// First contact with a display name.
    pub async fn join(&self, user_id: UserId, first_name: &str) {
        self.bot
            .handle_event(InboundEvent::new(user_id, "/start").with_name(first_name, ""))
            .await;
    }

    pub fn player(&self, user_id: UserId) -> PlayerRecord {
        self.store
            .get_player(user_id)
            .expect("read player")
            .expect("player exists")
    }

    pub fn balance(&self, user_id: UserId) -> u64 {
        self.player(user_id).balance
    }
}
