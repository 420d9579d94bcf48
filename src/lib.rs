//! # Chillbot - in-group currency bot
//!
//! Chillbot runs a small virtual economy inside a chat group. Players hold a balance
//! of "chilliks", send them to each other, ask administrators to price purchases and
//! collect achievements. Administrators grant, deduct, schedule and broadcast.
//!
//! ## Features
//!
//! - **Dialogue engine**: one in-flight multi-step flow per user, with inactivity timeout
//!   and a universal cancel.
//! - **Atomic ledger**: every balance change is written together with its transaction row
//!   in a single sled transaction; players are locked in ascending id order.
//! - **Purchase workflow**: requests carry an id that administrators reference in their
//!   replies; approved requests can be paid later.
//! - **Scheduled payments**: applied exactly once by a periodic tick.
//! - **Achievements**: derived from ledger history, awarded idempotently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chillbot::bot::{ChillBot, InboundEvent};
//! use chillbot::clock::SystemClock;
//! use chillbot::config::Config;
//! use chillbot::store::BotStoreBuilder;
//! use chillbot::transport::ConsoleMessenger;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Arc::new(BotStoreBuilder::new(config.store_path()).open()?);
//!     let bot = ChillBot::new(
//!         &config,
//!         store,
//!         Arc::new(ConsoleMessenger::new()),
//!         Arc::new(SystemClock),
//!     );
//!     bot.handle_event(InboundEvent::new(42, "баланс")).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bot`] - router, guards and chat handlers
//! - [`dialogue`] - per-user flow state
//! - [`ledger`] - balance mutations
//! - [`store`] - sled persistence
//! - [`scheduler`] - scheduled payment ticks
//! - [`achievement`] - badge evaluation
//! - [`validate`] - free-text parsing
//! - [`ratelimit`] - command cooldown and purchase quota
//! - [`transport`] - outbound messages and keyboards
//! - [`config`] - configuration management

pub mod achievement;
pub mod bot;
pub mod clock;
pub mod config;
pub mod dialogue;
pub mod errors;
pub mod ledger;
pub mod logutil;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod types;
pub mod validate;
