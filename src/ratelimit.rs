//! Spam protection for flow-starting commands and purchase requests.
//!
//! Two independent limits per user:
//! - a short cooldown between commands that start a flow
//! - a rolling hourly quota of purchase requests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::types::UserId;

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitReason {
    /// The user must wait before issuing another command.
    Cooldown { seconds_remaining: i64 },
    /// The user already created `limit` purchase requests within the last hour.
    HourlyQuota { limit: usize },
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitReason::Cooldown { seconds_remaining } => {
                write!(f, "⏳ Подождите {} сек. перед следующей командой", seconds_remaining)
            }
            RateLimitReason::HourlyQuota { limit } => {
                write!(
                    f,
                    "⏰ Вы достигли лимита запросов ({}/час). Попробуйте позже.",
                    limit
                )
            }
        }
    }
}

pub struct RateLimiter {
    cooldown: Duration,
    hourly_quota: usize,
    last_command: RwLock<HashMap<UserId, DateTime<Utc>>>,
    purchase_requests: RwLock<HashMap<UserId, VecDeque<DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration, hourly_quota: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            hourly_quota,
            last_command: RwLock::new(HashMap::new()),
            purchase_requests: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Admit a flow-starting command, recording it when allowed.
    pub fn check_command(&self, user_id: UserId) -> Result<(), RateLimitReason> {
        let now = self.clock.now();
        let mut last = match self.last_command.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = last.get(&user_id) {
            let elapsed = now.signed_duration_since(*previous);
            if elapsed < self.cooldown {
                let remaining = (self.cooldown - elapsed).num_milliseconds();
                // Round up so "wait 0 seconds" is never shown.
                return Err(RateLimitReason::Cooldown {
                    seconds_remaining: (remaining + 999) / 1000,
                });
            }
        }
        last.insert(user_id, now);
        Ok(())
    }

    fn recent_requests(&self, user_id: UserId, now: DateTime<Utc>) -> usize {
        let mut requests = match self.purchase_requests.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window_start = now - Duration::hours(1);
        let Some(times) = requests.get_mut(&user_id) else {
            return 0;
        };
        while times.front().is_some_and(|t| *t <= window_start) {
            times.pop_front();
        }
        times.len()
    }

    /// Whether the user may start another purchase request. Does not consume quota.
    pub fn check_purchase_quota(&self, user_id: UserId) -> Result<(), RateLimitReason> {
        let now = self.clock.now();
        if self.recent_requests(user_id, now) >= self.hourly_quota {
            return Err(RateLimitReason::HourlyQuota {
                limit: self.hourly_quota,
            });
        }
        Ok(())
    }

    /// Consume one unit of the hourly quota.
    pub fn record_purchase_request(&self, user_id: UserId) -> Result<(), RateLimitReason> {
        self.check_purchase_quota(user_id)?;
        let now = self.clock.now();
        let mut requests = match self.purchase_requests.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        requests.entry(user_id).or_default().push_back(now);
        Ok(())
    }

    /// Requests still counted against the user's hourly quota.
    pub fn requests_in_window(&self, user_id: UserId) -> usize {
        self.recent_requests(user_id, self.clock.now())
    }

    /// Drop cooldown stamps that no longer block and quota windows with no
    /// request inside the last hour. Returns how many users were forgotten.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        {
            let mut last = match self.last_command.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let before = last.len();
            last.retain(|_, at| now.signed_duration_since(*at) < self.cooldown);
            removed += before - last.len();
        }
        let mut requests = match self.purchase_requests.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window_start = now - Duration::hours(1);
        let before = requests.len();
        requests.retain(|_, times| {
            while times.front().is_some_and(|t| *t <= window_start) {
                times.pop_front();
            }
            !times.is_empty()
        });
        removed += before - requests.len();
        removed
    }

    /// Users currently tracked by either limit.
    pub fn tracked_users(&self) -> usize {
        let commands = match self.last_command.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        let requests = match self.purchase_requests.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        commands + requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn limiter(quota: usize) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(Duration::seconds(2), quota, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn cooldown_blocks_rapid_commands() {
        let (clock, limiter) = limiter(10);
        assert!(limiter.check_command(1).is_ok());
        clock.advance(Duration::milliseconds(500));
        assert_eq!(
            limiter.check_command(1),
            Err(RateLimitReason::Cooldown {
                seconds_remaining: 2
            })
        );
        assert!(limiter.check_command(2).is_ok());
        clock.advance(Duration::milliseconds(1500));
        assert!(limiter.check_command(1).is_ok());
    }

    #[test]
    fn hourly_quota_rolls_over() {
        let (clock, limiter) = limiter(2);
        limiter.record_purchase_request(1).expect("first");
        clock.advance(Duration::minutes(10));
        limiter.record_purchase_request(1).expect("second");
        assert_eq!(
            limiter.check_purchase_quota(1),
            Err(RateLimitReason::HourlyQuota { limit: 2 })
        );
        assert!(limiter.record_purchase_request(1).is_err());
        clock.advance(Duration::minutes(51));
        assert_eq!(limiter.requests_in_window(1), 1);
        assert!(limiter.check_purchase_quota(1).is_ok());
    }

    #[test]
    fn sweep_forgets_idle_users() {
        let (clock, limiter) = limiter(5);
        limiter.check_command(1).expect("command");
        limiter.check_command(2).expect("command");
        limiter.record_purchase_request(1).expect("request");
        assert_eq!(limiter.tracked_users(), 3);

        // Cooldowns are gone, the purchase window is still open.
        clock.advance(Duration::seconds(3));
        limiter.check_command(2).expect("command");
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_users(), 2);
        assert_eq!(limiter.requests_in_window(1), 1);

        clock.advance(Duration::hours(1));
        assert_eq!(limiter.sweep_expired(), 2);
        assert_eq!(limiter.tracked_users(), 0);
        assert!(limiter.check_command(2).is_ok());
    }
}
