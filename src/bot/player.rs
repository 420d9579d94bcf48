//! Handlers available to every non-banned player.

use anyhow::Result;
use log::{debug, info};

use super::{format, is_confirm, ChillBot};
use crate::achievement;
use crate::dialogue::{DialogueParams, DialogueStep};
use crate::transport::Keyboard;
use crate::types::{HistoryFilter, UserId};
use crate::validate::{parse_amount, parse_history_filter, parse_user_id};

const HISTORY_LIMIT: usize = 10;
const LEADERBOARD_LIMIT: usize = 10;

impl ChillBot {
    pub(super) async fn start(&self, user_id: UserId) -> Result<()> {
        let Some(player) = self.store.get_player(user_id)? else {
            return Ok(());
        };
        let mut msg = format!("👋 Привет, {}!\n\n", player.first_name);
        msg += &format!("Добро пожаловать в {}!\n", self.name);
        msg += &format!("💰 Ваш баланс: {} чилликов\n\n", format::balance(player.balance));
        msg += "Используйте кнопки меню или /help для списка команд.";
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }

    pub(super) async fn help(&self, user_id: UserId) -> Result<()> {
        let mut msg = String::from("📖 Команды:\n\n");
        msg += "💰 баланс - профиль и баланс\n";
        msg += "➡️ перевести - перевод другому игроку\n";
        msg += "🛒 купить - запрос на покупку способности или предмета\n";
        msg += "📋 запросы - ваши запросы на покупку\n";
        msg += "💳 оплатить <id> - оплатить одобренный запрос\n";
        msg += "📜 история - последние операции\n";
        msg += "🏆 топ - таблица лидеров\n";
        msg += "📊 статистика - личная статистика\n";
        msg += "⚙️ настройки - уведомления и видимость\n";
        msg += "❌ отмена - прервать текущую операцию\n";
        if self.is_admin(user_id) {
            msg += "\n👑 Администратор:\n";
            msg += "админка - панель администратора\n";
            msg += "начислить / списать - изменить баланс игрока\n";
            msg += "запланировать - отложенное начисление\n";
            msg += "забанить / разбанить / удалить / найти - управление игроками\n";
            msg += "рассылка / начислить всем - массовые операции\n";
            msg += "#<id> Стоимость: N или #<id> Отклонено: причина - ответ на запрос\n";
        }
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }

    pub(super) async fn balance(&self, user_id: UserId) -> Result<()> {
        let Some(player) = self.store.get_player(user_id)? else {
            return Ok(());
        };
        let earned = self.store.achievements_for(user_id)?;
        let msg = format::profile(&player, Some(&earned), self.utc_offset_minutes);
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }

    pub(super) async fn player_stats(&self, user_id: UserId) -> Result<()> {
        let Some(player) = self.store.get_player(user_id)? else {
            return Ok(());
        };
        let Some(stats) = achievement::player_stats(&self.store, user_id)? else {
            return Ok(());
        };
        let earned = self.store.achievements_for(user_id)?;
        let msg = format::player_stats(&player, &stats, earned.len());
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }

    pub(super) async fn leaderboard(&self, user_id: UserId) -> Result<()> {
        let top = self.store.top_players(LEADERBOARD_LIMIT, false)?;
        self.send(user_id, &format::leaderboard(&top), Some(self.menu(user_id)))
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub(super) async fn history_start(&self, user_id: UserId) -> Result<()> {
        self.dialogue
            .set(user_id, DialogueStep::HistoryFilter, DialogueParams::default());
        self.send(
            user_id,
            "📜 Какие операции показать?",
            Some(Keyboard::HistoryFilters),
        )
        .await;
        Ok(())
    }

    pub(super) async fn history_filter(&self, user_id: UserId, text: &str) -> Result<()> {
        let Some(filter) = parse_history_filter(text) else {
            self.send(
                user_id,
                "❌ Выберите фильтр: переводы, покупки, админ или все",
                Some(Keyboard::HistoryFilters),
            )
            .await;
            return Ok(());
        };
        self.dialogue.clear(user_id);
        self.send_history(user_id, filter).await
    }

    async fn send_history(&self, user_id: UserId, filter: HistoryFilter) -> Result<()> {
        let transactions = self
            .store
            .player_transactions(user_id, filter, Some(HISTORY_LIMIT))?;
        let msg = format::history(&transactions, user_id, self.utc_offset_minutes);
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub(super) async fn settings(&self, user_id: UserId) -> Result<()> {
        let Some(player) = self.store.get_player(user_id)? else {
            return Ok(());
        };
        let mut msg = String::from("⚙️ Настройки\n\n");
        msg += &format!(
            "🔔 Уведомления: {}\n",
            if player.notifications_enabled { "включены" } else { "выключены" }
        );
        msg += &format!(
            "👁️ Баланс в топе: {}",
            if player.hide_balance { "скрыт" } else { "виден" }
        );
        let keyboard = Keyboard::Settings {
            notifications_on: player.notifications_enabled,
        };
        self.send(user_id, &msg, Some(keyboard)).await;
        Ok(())
    }

    pub(super) async fn toggle_notifications(&self, user_id: UserId) -> Result<()> {
        let Some(player) = self.store.update_player(user_id, self.clock.now(), |p| {
            p.notifications_enabled = !p.notifications_enabled;
        })?
        else {
            return Ok(());
        };
        debug!(
            "player {} notifications -> {}",
            user_id, player.notifications_enabled
        );
        let msg = if player.notifications_enabled {
            "🔔 Уведомления включены"
        } else {
            "🔕 Уведомления выключены"
        };
        let keyboard = Keyboard::Settings {
            notifications_on: player.notifications_enabled,
        };
        self.send(user_id, msg, Some(keyboard)).await;
        Ok(())
    }

    pub(super) async fn set_hide_balance(&self, user_id: UserId, hide: bool) -> Result<()> {
        let Some(player) = self
            .store
            .update_player(user_id, self.clock.now(), |p| p.hide_balance = hide)?
        else {
            return Ok(());
        };
        let msg = if hide {
            "👁️ Ваш баланс скрыт из таблицы лидеров"
        } else {
            "👁️ Ваш баланс снова виден в таблице лидеров"
        };
        let keyboard = Keyboard::Settings {
            notifications_on: player.notifications_enabled,
        };
        self.send(user_id, msg, Some(keyboard)).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transfer flow: receiver -> amount -> confirm
    // ------------------------------------------------------------------

    pub(super) async fn transfer_start(&self, user_id: UserId) -> Result<()> {
        self.dialogue.set(
            user_id,
            DialogueStep::TransferReceiver,
            DialogueParams::default(),
        );
        self.send(
            user_id,
            "➡️ Кому перевести чиллики?\n\nУкажите ID игрока: @id123, id123 или просто число",
            Some(Keyboard::CancelOnly),
        )
        .await;
        Ok(())
    }

    pub(super) async fn transfer_receiver(&self, user_id: UserId, text: &str) -> Result<()> {
        let receiver = match parse_user_id(text) {
            Ok(id) => id,
            Err(e) => {
                self.send(user_id, &format!("❌ {}", e), Some(Keyboard::CancelOnly))
                    .await;
                return Ok(());
            }
        };
        if receiver == user_id {
            self.send(
                user_id,
                "❌ Нельзя переводить чиллики самому себе",
                Some(Keyboard::CancelOnly),
            )
            .await;
            return Ok(());
        }
        let Some(target) = self.store.get_player(receiver)? else {
            self.dialogue.clear(user_id);
            self.send(user_id, "❌ Игрок не найден", Some(self.menu(user_id)))
                .await;
            return Ok(());
        };

        let advanced = self.dialogue.advance_to(
            user_id,
            DialogueStep::TransferAmount,
            DialogueParams {
                receiver: Some(receiver),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(user_id).await;
        }
        self.send(
            user_id,
            &format!("💸 Сколько чилликов перевести игроку {}?", target.full_name()),
            Some(Keyboard::Amounts),
        )
        .await;
        Ok(())
    }

    pub(super) async fn transfer_amount(
        &self,
        user_id: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let Some(receiver) = params.receiver else {
            return self.flow_expired(user_id).await;
        };
        let amount = match parse_amount(text) {
            Ok(amount) => amount,
            Err(e) => {
                self.send(user_id, &format!("❌ {}", e), Some(Keyboard::Amounts))
                    .await;
                return Ok(());
            }
        };
        let Some(sender) = self.store.get_player(user_id)? else {
            return self.flow_expired(user_id).await;
        };
        if sender.balance < amount {
            self.dialogue.clear(user_id);
            self.send(
                user_id,
                &format!(
                    "❌ Недостаточно средств! Ваш баланс: {} чил.",
                    format::balance(sender.balance)
                ),
                Some(self.menu(user_id)),
            )
            .await;
            return Ok(());
        }
        let Some(target) = self.store.get_player(receiver)? else {
            self.dialogue.clear(user_id);
            self.send(user_id, "❌ Игрок не найден", Some(self.menu(user_id)))
                .await;
            return Ok(());
        };

        let advanced = self.dialogue.advance_to(
            user_id,
            DialogueStep::TransferConfirm,
            DialogueParams {
                amount: Some(amount),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(user_id).await;
        }
        let msg = format!(
            "📝 Подтвердите перевод\n\n👤 Получатель: {}\n💰 Сумма: {} чил.\n💳 Баланс после: {} чил.",
            target.full_name(),
            format::balance(amount),
            format::balance(sender.balance - amount)
        );
        self.send(user_id, &msg, Some(Keyboard::Confirm)).await;
        Ok(())
    }

    pub(super) async fn transfer_confirm(
        &self,
        user_id: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let (Some(receiver), Some(amount)) = (params.receiver, params.amount) else {
            return self.flow_expired(user_id).await;
        };
        self.dialogue.clear(user_id);
        if !is_confirm(text) {
            self.send(user_id, "❌ Перевод отменён", Some(self.menu(user_id)))
                .await;
            return Ok(());
        }

        let receipt = match self.ledger.transfer(user_id, receiver, amount, false)? {
            Ok(receipt) => receipt,
            Err(rejection) => {
                self.send(user_id, &format::rejection(&rejection), Some(self.menu(user_id)))
                    .await;
                return Ok(());
            }
        };
        info!(
            "transfer #{} confirmed by {}",
            receipt.transaction.id, user_id
        );

        if let Some(sender) = &receipt.debited {
            let recipient_name = receipt
                .credited
                .as_ref()
                .map(|p| p.full_name())
                .unwrap_or_default();
            let msg = format!(
                "✅ Перевод выполнен!\n\n👤 Получатель: {}\n💰 Сумма: {} чил.\n💳 Ваш баланс: {} чил.",
                recipient_name,
                format::balance(amount),
                format::balance(sender.balance)
            );
            self.send(user_id, &msg, Some(self.menu(user_id))).await;
        }
        if let Some(recipient) = &receipt.credited {
            let from = if receipt.transaction.anonymous {
                "Анонимный игрок".to_string()
            } else {
                receipt
                    .debited
                    .as_ref()
                    .map(|p| p.full_name())
                    .unwrap_or_default()
            };
            let msg = format!(
                "💰 Вы получили {} чил. от {}!\n💳 Ваш баланс: {} чил.",
                format::balance(amount),
                from,
                format::balance(recipient.balance)
            );
            self.notify(recipient, &msg).await;
        }

        self.award_achievements(user_id).await;
        self.award_achievements(receiver).await;
        Ok(())
    }
}
