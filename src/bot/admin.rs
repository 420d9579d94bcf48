//! Administrator handlers. The router has already checked the admin guard.

use anyhow::Result;
use log::{error, info, warn};

use super::{format, is_confirm, ChillBot};
use crate::dialogue::{AdjustOperation, DialogueParams, DialogueStep};
use crate::logutil::preview;
use crate::transport::Keyboard;
use crate::types::{PlayerRecord, UserId};
use crate::validate::{ensure_future, parse_amount, parse_datetime, parse_user_id};

const FIND_LIMIT: usize = 10;
const STATS_TOP: usize = 5;
const GIFT_ALL_REASON: &str = "Массовое начисление от администратора";
const DEFAULT_BAN_REASON: &str = "Не указана";
const PLAYER_PROMPT: &str = "Укажите ID игрока: @id123, id123 или просто число";

/// `-` or nothing means "no reason".
fn optional_reason(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ChillBot {
    /// Parse a player reference typed by an admin.
    ///
    /// On a malformed id the admin is re-prompted and the flow stays put; an unknown
    /// player ends the flow. `None` means the caller should stop.
    async fn admin_target(&self, admin: UserId, text: &str) -> Result<Option<PlayerRecord>> {
        let user_id = match parse_user_id(text) {
            Ok(id) => id,
            Err(e) => {
                self.send(admin, &format!("❌ {}", e), Some(Keyboard::CancelOnly))
                    .await;
                return Ok(None);
            }
        };
        match self.store.get_player(user_id)? {
            Some(player) => Ok(Some(player)),
            None => {
                self.dialogue.clear(admin);
                self.send(
                    admin,
                    &format!("❌ Игрок {} не найден", user_id),
                    Some(Keyboard::AdminMenu),
                )
                .await;
                Ok(None)
            }
        }
    }

    async fn admin_prompt(&self, admin: UserId, step: DialogueStep, params: DialogueParams, text: &str) {
        self.dialogue.set(admin, step, params);
        self.send(admin, text, Some(Keyboard::CancelOnly)).await;
    }

    // ------------------------------------------------------------------
    // Grant / deduct: player -> amount -> reason
    // ------------------------------------------------------------------

    pub(super) async fn adjust_start(&self, admin: UserId, operation: AdjustOperation) -> Result<()> {
        let title = match operation {
            AdjustOperation::Grant => "💸 Начисление чилликов",
            AdjustOperation::Deduct => "💳 Списание чилликов",
        };
        self.admin_prompt(
            admin,
            DialogueStep::AdjustPlayer,
            DialogueParams {
                operation: Some(operation),
                ..Default::default()
            },
            &format!("{}\n\n{}", title, PLAYER_PROMPT),
        )
        .await;
        Ok(())
    }

    pub(super) async fn adjust_player(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        if params.operation.is_none() {
            return self.flow_expired(admin).await;
        }
        let Some(player) = self.admin_target(admin, text).await? else {
            return Ok(());
        };
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::AdjustAmount,
            DialogueParams {
                target: Some(player.user_id),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            &format!(
                "👤 {} (баланс: {} чил.)\n\nВведите сумму:",
                player.full_name(),
                format::balance(player.balance)
            ),
            Some(Keyboard::Amounts),
        )
        .await;
        Ok(())
    }

    pub(super) async fn adjust_amount(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let (Some(target), Some(operation)) = (params.target, params.operation) else {
            return self.flow_expired(admin).await;
        };
        let amount = match parse_amount(text) {
            Ok(amount) => amount,
            Err(e) => {
                self.send(admin, &format!("❌ {}", e), Some(Keyboard::Amounts))
                    .await;
                return Ok(());
            }
        };
        if operation == AdjustOperation::Deduct {
            let balance = self.store.get_player(target)?.map(|p| p.balance);
            if let Some(balance) = balance.filter(|b| *b < amount) {
                self.dialogue.clear(admin);
                self.send(
                    admin,
                    &format!(
                        "❌ У игрока недостаточно средств (баланс: {} чил.)",
                        format::balance(balance)
                    ),
                    Some(Keyboard::AdminMenu),
                )
                .await;
                return Ok(());
            }
        }
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::AdjustReason,
            DialogueParams {
                amount: Some(amount),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            "💬 Укажите причину (или «-» без причины):",
            Some(Keyboard::CancelOnly),
        )
        .await;
        Ok(())
    }

    pub(super) async fn adjust_reason(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let (Some(target), Some(amount), Some(operation)) =
            (params.target, params.amount, params.operation)
        else {
            return self.flow_expired(admin).await;
        };
        self.dialogue.clear(admin);
        let reason = optional_reason(text);

        let outcome = match operation {
            AdjustOperation::Grant => {
                self.ledger
                    .admin_grant(admin, target, amount, reason.as_deref())?
            }
            AdjustOperation::Deduct => {
                self.ledger
                    .admin_deduct(admin, target, amount, reason.as_deref())?
            }
        };
        let receipt = match outcome {
            Ok(receipt) => receipt,
            Err(rejection) => {
                self.send(admin, &format::rejection(&rejection), Some(Keyboard::AdminMenu))
                    .await;
                return Ok(());
            }
        };
        let Some(player) = receipt.credited.as_ref().or(receipt.debited.as_ref()) else {
            return Ok(());
        };

        let (verb, sign) = match operation {
            AdjustOperation::Grant => ("начислено", "+"),
            AdjustOperation::Deduct => ("списано", "-"),
        };
        let mut admin_msg = format!(
            "✅ Игроку {} {} {} чил.\n💳 Новый баланс: {} чил.",
            player.full_name(),
            verb,
            format::balance(amount),
            format::balance(player.balance)
        );
        if let Some(reason) = &reason {
            admin_msg += &format!("\n💬 Причина: {}", reason);
        }
        self.send(admin, &admin_msg, Some(Keyboard::AdminMenu)).await;

        let mut player_msg = format!(
            "👑 Администратор: {}{} чил.\n💳 Ваш баланс: {} чил.",
            sign,
            format::balance(amount),
            format::balance(player.balance)
        );
        if let Some(reason) = &reason {
            player_msg += &format!("\n💬 Причина: {}", reason);
        }
        self.notify(player, &player_msg).await;
        self.award_achievements(target).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduled credit: player -> amount -> date/time -> reason
    // ------------------------------------------------------------------

    pub(super) async fn schedule_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::SchedulePlayer,
            DialogueParams::default(),
            &format!("⏰ Запланированное начисление\n\n{}", PLAYER_PROMPT),
        )
        .await;
        Ok(())
    }

    pub(super) async fn schedule_player(&self, admin: UserId, text: &str) -> Result<()> {
        let Some(player) = self.admin_target(admin, text).await? else {
            return Ok(());
        };
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::ScheduleAmount,
            DialogueParams {
                target: Some(player.user_id),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            &format!("👤 {}\n\nВведите сумму:", player.full_name()),
            Some(Keyboard::Amounts),
        )
        .await;
        Ok(())
    }

    pub(super) async fn schedule_amount(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        if params.target.is_none() {
            return self.flow_expired(admin).await;
        }
        let amount = match parse_amount(text) {
            Ok(amount) => amount,
            Err(e) => {
                self.send(admin, &format!("❌ {}", e), Some(Keyboard::Amounts))
                    .await;
                return Ok(());
            }
        };
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::ScheduleTime,
            DialogueParams {
                amount: Some(amount),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            "📅 Когда начислить?\nФормат: ГГГГ-ММ-ДД ЧЧ:ММ или ДД.ММ.ГГГГ ЧЧ:ММ (без времени - в 12:00)",
            Some(Keyboard::CancelOnly),
        )
        .await;
        Ok(())
    }

    pub(super) async fn schedule_time(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        if params.target.is_none() || params.amount.is_none() {
            return self.flow_expired(admin).await;
        }
        let now = self.clock.now();
        let at = match parse_datetime(text, self.utc_offset_minutes)
            .and_then(|at| ensure_future(at, now))
        {
            Ok(at) => at,
            Err(e) => {
                self.send(admin, &format!("❌ {}", e), Some(Keyboard::CancelOnly))
                    .await;
                return Ok(());
            }
        };
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::ScheduleReason,
            DialogueParams {
                scheduled_for: Some(at),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            "💬 Укажите причину (или «-» без причины):",
            Some(Keyboard::CancelOnly),
        )
        .await;
        Ok(())
    }

    pub(super) async fn schedule_reason(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let (Some(target), Some(amount), Some(at)) =
            (params.target, params.amount, params.scheduled_for)
        else {
            return self.flow_expired(admin).await;
        };
        self.dialogue.clear(admin);
        let payment = self.store.create_scheduled_payment(
            target,
            admin,
            amount,
            at,
            optional_reason(text),
            self.clock.now(),
        )?;
        self.send(
            admin,
            &format!(
                "✅ Начисление #{} запланировано\n👤 ID: {}\n💰 {} чил.\n📅 {}",
                payment.id,
                target,
                format::balance(amount),
                format::datetime(at, self.utc_offset_minutes)
            ),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ban / unban
    // ------------------------------------------------------------------

    pub(super) async fn ban_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::BanPlayer,
            DialogueParams::default(),
            &format!("🚫 Блокировка игрока\n\n{}", PLAYER_PROMPT),
        )
        .await;
        Ok(())
    }

    pub(super) async fn ban_player(&self, admin: UserId, text: &str) -> Result<()> {
        let Some(player) = self.admin_target(admin, text).await? else {
            return Ok(());
        };
        if self.is_admin(player.user_id) {
            self.dialogue.clear(admin);
            self.send(
                admin,
                "❌ Нельзя заблокировать администратора",
                Some(Keyboard::AdminMenu),
            )
            .await;
            return Ok(());
        }
        if player.banned {
            self.dialogue.clear(admin);
            self.send(
                admin,
                &format!("❌ {} уже заблокирован", player.full_name()),
                Some(Keyboard::AdminMenu),
            )
            .await;
            return Ok(());
        }
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::BanReason,
            DialogueParams {
                target: Some(player.user_id),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            &format!("👤 {}\n\n💬 Укажите причину блокировки:", player.full_name()),
            Some(Keyboard::CancelOnly),
        )
        .await;
        Ok(())
    }

    pub(super) async fn ban_reason(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let Some(target) = params.target else {
            return self.flow_expired(admin).await;
        };
        self.dialogue.clear(admin);
        let reason = optional_reason(text).unwrap_or_else(|| DEFAULT_BAN_REASON.to_string());
        let banned = self.store.update_player(target, self.clock.now(), |p| {
            p.banned = true;
            p.ban_reason = Some(reason.clone());
        })?;
        let Some(player) = banned else {
            self.send(admin, "❌ Игрок не найден", Some(Keyboard::AdminMenu))
                .await;
            return Ok(());
        };
        // A banned player's half-finished flow must not complete later.
        self.dialogue.clear(target);
        info!("admin {} banned {}: {}", admin, target, preview(&reason));

        self.send(
            target,
            &format!("🚫 Вы были заблокированы администратором.\nПричина: {}", reason),
            None,
        )
        .await;
        self.send(
            admin,
            &format!("✅ {} заблокирован\n💬 Причина: {}", player.full_name(), reason),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    pub(super) async fn unban_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::UnbanPlayer,
            DialogueParams::default(),
            &format!("✅ Разблокировка игрока\n\n{}", PLAYER_PROMPT),
        )
        .await;
        Ok(())
    }

    pub(super) async fn unban_player(&self, admin: UserId, text: &str) -> Result<()> {
        let Some(player) = self.admin_target(admin, text).await? else {
            return Ok(());
        };
        self.dialogue.clear(admin);
        if !player.banned {
            self.send(
                admin,
                &format!("❌ {} не заблокирован", player.full_name()),
                Some(Keyboard::AdminMenu),
            )
            .await;
            return Ok(());
        }
        self.store
            .update_player(player.user_id, self.clock.now(), |p| {
                p.banned = false;
                p.ban_reason = None;
            })?;
        info!("admin {} unbanned {}", admin, player.user_id);
        self.send(player.user_id, "✅ Вы были разблокированы администратором", None)
            .await;
        self.send(
            admin,
            &format!("✅ {} разблокирован", player.full_name()),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete: player -> confirm
    // ------------------------------------------------------------------

    pub(super) async fn delete_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::DeletePlayer,
            DialogueParams::default(),
            &format!("🗑️ Удаление профиля\n\n{}", PLAYER_PROMPT),
        )
        .await;
        Ok(())
    }

    pub(super) async fn delete_player(&self, admin: UserId, text: &str) -> Result<()> {
        let Some(player) = self.admin_target(admin, text).await? else {
            return Ok(());
        };
        let advanced = self.dialogue.advance_to(
            admin,
            DialogueStep::DeleteConfirm,
            DialogueParams {
                target: Some(player.user_id),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(admin).await;
        }
        self.send(
            admin,
            &format!(
                "⚠️ Удалить профиль {} (ID: {}, баланс: {} чил.)?\nВся история игрока будет удалена безвозвратно.",
                player.full_name(),
                player.user_id,
                format::balance(player.balance)
            ),
            Some(Keyboard::Confirm),
        )
        .await;
        Ok(())
    }

    pub(super) async fn delete_confirm(
        &self,
        admin: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let Some(target) = params.target else {
            return self.flow_expired(admin).await;
        };
        self.dialogue.clear(admin);
        if !is_confirm(text) {
            self.send(admin, "❌ Удаление отменено", Some(Keyboard::AdminMenu))
                .await;
            return Ok(());
        }
        if !self.store.delete_player(target)? {
            self.send(admin, "❌ Игрок не найден", Some(Keyboard::AdminMenu))
                .await;
            return Ok(());
        }
        self.dialogue.clear(target);
        info!("admin {} deleted player {}", admin, target);
        self.send(
            admin,
            &format!("🗑️ Профиль игрока {} удалён", target),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Find
    // ------------------------------------------------------------------

    pub(super) async fn find_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::FindQuery,
            DialogueParams::default(),
            "🔍 Введите ID или часть имени игрока:",
        )
        .await;
        Ok(())
    }

    pub(super) async fn find_query(&self, admin: UserId, text: &str) -> Result<()> {
        self.dialogue.clear(admin);
        let by_id = match parse_user_id(text) {
            Ok(user_id) => self.store.get_player(user_id)?,
            Err(_) => None,
        };
        let found = match by_id {
            Some(player) => vec![player],
            None => self.store.find_players_by_name(text, FIND_LIMIT)?,
        };

        let msg = match found.as_slice() {
            [] => "❌ Игроки не найдены".to_string(),
            [player] => {
                let earned = self.store.achievements_for(player.user_id)?;
                format::profile(player, Some(&earned), self.utc_offset_minutes)
            }
            players => {
                let mut msg = format!("🔍 Найдено игроков: {}\n\n", players.len());
                for player in players {
                    msg += &format!(
                        "👤 {} (ID: {}) — {} чил.{}\n",
                        player.full_name(),
                        player.user_id,
                        format::balance(player.balance),
                        if player.banned { " 🚫" } else { "" }
                    );
                }
                msg
            }
        };
        self.send(admin, &msg, Some(Keyboard::AdminMenu)).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Broadcast and gift-all
    // ------------------------------------------------------------------

    pub(super) async fn broadcast_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::BroadcastText,
            DialogueParams::default(),
            "📢 Введите текст рассылки:",
        )
        .await;
        Ok(())
    }

    pub(super) async fn broadcast_send(&self, admin: UserId, text: &str) -> Result<()> {
        let body = text.trim();
        if body.is_empty() {
            self.send(admin, "❌ Текст рассылки не может быть пустым", Some(Keyboard::CancelOnly))
                .await;
            return Ok(());
        }
        self.dialogue.clear(admin);

        let message = format!("📢 Сообщение от администрации:\n\n{}", body);
        let mut delivered = 0usize;
        let mut failed = 0usize;
        for player in self.store.list_players()? {
            if player.banned {
                continue;
            }
            if self.send(player.user_id, &message, None).await {
                delivered += 1;
            } else {
                failed += 1;
            }
        }
        info!(
            "broadcast by {}: {} delivered, {} failed: {}",
            admin,
            delivered,
            failed,
            preview(body)
        );
        self.send(
            admin,
            &format!(
                "📢 Рассылка завершена\n✅ Доставлено: {}\n❌ Ошибок: {}",
                delivered, failed
            ),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    pub(super) async fn gift_all_start(&self, admin: UserId) -> Result<()> {
        self.admin_prompt(
            admin,
            DialogueStep::GiftAllAmount,
            DialogueParams::default(),
            "🎁 Сколько чилликов начислить каждому игроку?",
        )
        .await;
        Ok(())
    }

    pub(super) async fn gift_all_amount(&self, admin: UserId, text: &str) -> Result<()> {
        let amount = match parse_amount(text) {
            Ok(amount) => amount,
            Err(e) => {
                self.send(admin, &format!("❌ {}", e), Some(Keyboard::Amounts))
                    .await;
                return Ok(());
            }
        };
        self.dialogue.clear(admin);

        let mut credited = 0usize;
        let mut failed = 0usize;
        let mut undelivered = 0usize;
        for player in self.store.list_players()? {
            let receipt = match self
                .ledger
                .admin_grant(admin, player.user_id, amount, Some(GIFT_ALL_REASON))
            {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(rejection)) => {
                    warn!("gift to {} rejected: {}", player.user_id, rejection);
                    failed += 1;
                    continue;
                }
                Err(e) => {
                    error!("gift to {} failed: {}", player.user_id, e);
                    failed += 1;
                    continue;
                }
            };
            credited += 1;
            if let Some(recipient) = &receipt.credited {
                let msg = format!(
                    "🎁 Вам начислено {} чил.!\n💬 {}\n💳 Ваш баланс: {} чил.",
                    format::balance(amount),
                    GIFT_ALL_REASON,
                    format::balance(recipient.balance)
                );
                if recipient.notifications_enabled && !self.notify(recipient, &msg).await {
                    undelivered += 1;
                }
            }
            self.award_achievements(player.user_id).await;
        }
        info!(
            "gift-all by {}: {} x {} credited, {} failed, {} notices undelivered",
            admin, credited, amount, failed, undelivered
        );
        self.send(
            admin,
            &format!(
                "🎁 Начисление завершено\n💰 По {} чил.\n✅ Игроков: {}\n❌ Ошибок: {}\n📭 Не доставлено: {}",
                format::balance(amount),
                credited,
                failed,
                undelivered
            ),
            Some(Keyboard::AdminMenu),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub(super) async fn admin_stats(&self, admin: UserId) -> Result<()> {
        let stats = self.store.global_stats()?;
        let top = self.store.top_players(STATS_TOP, true)?;
        self.send(admin, &format::global_stats(&stats, &top), Some(Keyboard::AdminMenu))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::optional_reason;

    #[test]
    fn dash_skips_reason() {
        assert_eq!(optional_reason(" - "), None);
        assert_eq!(optional_reason(""), None);
        assert_eq!(optional_reason(" бонус "), Some("бонус".to_string()));
    }
}
