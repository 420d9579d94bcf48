//! Access checks applied by the router before a handler runs.
//!
//! A guard either admits the request or returns a [`Denial`]; the router sends the
//! denial text and stops. No dialogue state changes on a denial.

use std::collections::HashSet;

use crate::ratelimit::{RateLimitReason, RateLimiter};
use crate::types::{PlayerRecord, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NotAdmin,
    Banned { reason: Option<String> },
    RateLimited(RateLimitReason),
}

impl Denial {
    pub fn message(&self) -> String {
        match self {
            Denial::NotAdmin => "❌ У вас нет прав администратора!".to_string(),
            Denial::Banned { reason } => match reason {
                Some(reason) => format!("🚫 Вы заблокированы!\nПричина: {}", reason),
                None => "🚫 Вы заблокированы!".to_string(),
            },
            Denial::RateLimited(reason) => reason.to_string(),
        }
    }
}

pub fn require_admin(admins: &HashSet<UserId>, user_id: UserId) -> Result<(), Denial> {
    if admins.contains(&user_id) {
        Ok(())
    } else {
        Err(Denial::NotAdmin)
    }
}

pub fn require_not_banned(player: &PlayerRecord) -> Result<(), Denial> {
    if player.banned {
        Err(Denial::Banned {
            reason: player.ban_reason.clone(),
        })
    } else {
        Ok(())
    }
}

pub fn require_cooldown(limiter: &RateLimiter, user_id: UserId) -> Result<(), Denial> {
    limiter.check_command(user_id).map_err(Denial::RateLimited)
}

pub fn require_purchase_quota(limiter: &RateLimiter, user_id: UserId) -> Result<(), Denial> {
    limiter
        .check_purchase_quota(user_id)
        .map_err(Denial::RateLimited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn admin_guard_checks_membership() {
        let admins: HashSet<UserId> = [1, 2].into_iter().collect();
        assert!(require_admin(&admins, 1).is_ok());
        assert_eq!(require_admin(&admins, 3), Err(Denial::NotAdmin));
    }

    #[test]
    fn banned_player_sees_reason() {
        let mut player = PlayerRecord::new(5, "Ann", "", 100, Utc::now());
        assert!(require_not_banned(&player).is_ok());
        player.banned = true;
        player.ban_reason = Some("спам".to_string());
        let denial = require_not_banned(&player).unwrap_err();
        assert_eq!(denial.message(), "🚫 Вы заблокированы!\nПричина: спам");
    }
}
