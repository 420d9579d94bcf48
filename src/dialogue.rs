//! Per-user dialogue state for multi-step chat flows.
//!
//! Each user has at most one in-flight flow. Entries expire after a fixed period of
//! inactivity; an expired entry reads as [`DialogueStep::Idle`] and is evicted on that
//! read. Handlers must re-check that the parameters they need are still present
//! before acting on them, because a flow can time out between two messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use log::trace;

use crate::clock::Clock;
use crate::types::UserId;

/// Words that abort any flow from any step.
const CANCEL_WORDS: [&str; 4] = ["отмена", "отменить", "❌ отменить", "cancel"];

pub fn is_cancel(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    CANCEL_WORDS.contains(&lower.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogueStep {
    Idle,

    TransferReceiver,
    TransferAmount,
    TransferConfirm,

    PurchaseCategory,
    PurchaseDescription,
    PurchaseConfirm,

    /// Admin grant/deduct; direction lives in [`DialogueParams::operation`].
    AdjustPlayer,
    AdjustAmount,
    AdjustReason,

    SchedulePlayer,
    ScheduleAmount,
    ScheduleTime,
    ScheduleReason,

    BanPlayer,
    BanReason,
    UnbanPlayer,

    DeletePlayer,
    DeleteConfirm,

    FindQuery,
    BroadcastText,
    GiftAllAmount,
    HistoryFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOperation {
    Grant,
    Deduct,
}

/// Parameters gathered so far by the current flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogueParams {
    pub receiver: Option<UserId>,
    pub target: Option<UserId>,
    pub amount: Option<u64>,
    pub operation: Option<AdjustOperation>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub request_id: Option<u64>,
}

impl DialogueParams {
    /// Overwrite the fields that are set in `partial`.
    pub fn merge(&mut self, partial: DialogueParams) {
        if partial.receiver.is_some() {
            self.receiver = partial.receiver;
        }
        if partial.target.is_some() {
            self.target = partial.target;
        }
        if partial.amount.is_some() {
            self.amount = partial.amount;
        }
        if partial.operation.is_some() {
            self.operation = partial.operation;
        }
        if partial.scheduled_for.is_some() {
            self.scheduled_for = partial.scheduled_for;
        }
        if partial.category.is_some() {
            self.category = partial.category;
        }
        if partial.request_id.is_some() {
            self.request_id = partial.request_id;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueState {
    pub step: DialogueStep,
    pub params: DialogueParams,
}

impl DialogueState {
    pub fn idle() -> Self {
        Self {
            step: DialogueStep::Idle,
            params: DialogueParams::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.step == DialogueStep::Idle
    }
}

struct Entry {
    state: DialogueState,
    touched: DateTime<Utc>,
}

pub struct DialogueStore {
    entries: Mutex<HashMap<UserId, Entry>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl DialogueStore {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<UserId, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now - entry.touched > self.timeout
    }

    /// Start (or replace) the user's flow.
    pub fn set(&self, user_id: UserId, step: DialogueStep, params: DialogueParams) {
        if step == DialogueStep::Idle {
            self.clear(user_id);
            return;
        }
        let now = self.clock.now();
        trace!("dialogue {}: -> {:?}", user_id, step);
        self.entries().insert(
            user_id,
            Entry {
                state: DialogueState { step, params },
                touched: now,
            },
        );
    }

    /// Current state; idle when absent or expired.
    pub fn get(&self, user_id: UserId) -> DialogueState {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(&user_id) {
            Some(entry) if self.expired(entry, now) => {
                trace!("dialogue {}: expired", user_id);
                entries.remove(&user_id);
                DialogueState::idle()
            }
            Some(entry) => entry.state.clone(),
            None => DialogueState::idle(),
        }
    }

    /// Merge `partial` into a live flow's parameters. Returns false when idle.
    pub fn update_params(&self, user_id: UserId, partial: DialogueParams) -> bool {
        self.advance(user_id, None, partial)
    }

    /// Move a live flow to `step`, merging `partial`. Returns false when idle.
    pub fn advance_to(&self, user_id: UserId, step: DialogueStep, partial: DialogueParams) -> bool {
        self.advance(user_id, Some(step), partial)
    }

    fn advance(&self, user_id: UserId, step: Option<DialogueStep>, partial: DialogueParams) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&user_id) else {
            return false;
        };
        if self.expired(entry, now) {
            entries.remove(&user_id);
            return false;
        }
        entry.state.params.merge(partial);
        if let Some(step) = step {
            trace!("dialogue {}: {:?} -> {:?}", user_id, entry.state.step, step);
            entry.state.step = step;
        }
        entry.touched = now;
        true
    }

    /// Drop the user's flow. Idempotent.
    pub fn clear(&self, user_id: UserId) {
        self.entries().remove(&user_id);
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.touched <= self.timeout);
        before - entries.len()
    }

    /// Number of live (possibly expired but not yet evicted) entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (Arc<ManualClock>, DialogueStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
        ));
        let store = DialogueStore::new(Duration::minutes(5), clock.clone());
        (clock, store)
    }

    #[test]
    fn absent_user_is_idle() {
        let (_clock, store) = store();
        assert!(store.get(1).is_idle());
    }

    #[test]
    fn expires_after_timeout_and_evicts() {
        let (clock, store) = store();
        let params = DialogueParams {
            receiver: Some(2),
            ..Default::default()
        };
        store.set(1, DialogueStep::TransferAmount, params.clone());
        clock.advance(Duration::minutes(5));
        assert_eq!(store.get(1).params, params);
        clock.advance(Duration::seconds(1));
        assert!(store.get(1).is_idle());
        assert!(store.is_empty());
    }

    #[test]
    fn advance_merges_and_refreshes() {
        let (clock, store) = store();
        store.set(
            1,
            DialogueStep::TransferAmount,
            DialogueParams {
                receiver: Some(2),
                ..Default::default()
            },
        );
        clock.advance(Duration::minutes(4));
        assert!(store.advance_to(
            1,
            DialogueStep::TransferConfirm,
            DialogueParams {
                amount: Some(40),
                ..Default::default()
            }
        ));
        clock.advance(Duration::minutes(4));
        let state = store.get(1);
        assert_eq!(state.step, DialogueStep::TransferConfirm);
        assert_eq!(state.params.receiver, Some(2));
        assert_eq!(state.params.amount, Some(40));
    }

    #[test]
    fn update_on_idle_user_is_rejected() {
        let (_clock, store) = store();
        assert!(!store.update_params(9, DialogueParams::default()));
        assert!(store.get(9).is_idle());
    }

    #[test]
    fn new_flow_discards_previous_params() {
        let (_clock, store) = store();
        store.set(
            1,
            DialogueStep::TransferConfirm,
            DialogueParams {
                receiver: Some(2),
                amount: Some(5),
                ..Default::default()
            },
        );
        store.set(1, DialogueStep::PurchaseCategory, DialogueParams::default());
        let state = store.get(1);
        assert_eq!(state.step, DialogueStep::PurchaseCategory);
        assert_eq!(state.params, DialogueParams::default());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (clock, store) = store();
        store.set(1, DialogueStep::FindQuery, DialogueParams::default());
        clock.advance(Duration::minutes(3));
        store.set(2, DialogueStep::FindQuery, DialogueParams::default());
        clock.advance(Duration::minutes(3));
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(2).step, DialogueStep::FindQuery);
    }

    #[test]
    fn cancel_words() {
        assert!(is_cancel("Отмена"));
        assert!(is_cancel("❌ Отменить"));
        assert!(is_cancel(" cancel "));
        assert!(!is_cancel("отменить перевод"));
    }
}
