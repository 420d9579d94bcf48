//! Purchase requests: player request, administrator pricing, player confirmation.
//!
//! A request is created `Pending` and announced to every administrator with its id.
//! An administrator answers with a price or a rejection, optionally prefixed with
//! `#<id>`. Without an id the answer only applies when exactly one request is
//! pending. An approved request the player cannot yet afford stays `Approved`
//! and can be paid later with `оплатить <id>`. Settlement re-checks the request
//! inside the ledger transaction, so a stale confirmation never charges twice.

use anyhow::Result;
use log::{debug, info};

use super::{format, guards, is_confirm, ChillBot};
use crate::dialogue::{DialogueParams, DialogueStep};
use crate::logutil::preview;
use crate::transport::{labels, Keyboard};
use crate::types::{PlayerRecord, PurchaseRequest, PurchaseStatus, UserId};
use crate::validate::{parse_admin_reply, AdminDecision, MAX_AMOUNT};

const PAY_PREFIXES: [&str; 2] = ["оплатить", "/pay"];
const MAX_DESCRIPTION_CHARS: usize = 500;
const REQUEST_LIST_LIMIT: usize = 10;

const CATEGORIES: [(&str, &str); 4] = [
    (labels::CATEGORY_COMBAT, "Боевая способность"),
    (labels::CATEGORY_DEFENSE, "Защитная способность"),
    (labels::CATEGORY_UTILITY, "Утилити способность"),
    (labels::CATEGORY_ITEMS, "Предмет"),
];

/// Text after a pay command, if `text` is one.
pub(super) fn pay_argument(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    PAY_PREFIXES.iter().find_map(|prefix| {
        let rest = lower.strip_prefix(prefix)?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            Some(rest.trim().to_string())
        } else {
            None
        }
    })
}

/// `#12` or `12`.
fn parse_request_id(text: &str) -> Option<u64> {
    text.trim().trim_start_matches('#').parse().ok()
}

fn category_for(text: &str) -> Option<&'static str> {
    let lower = text.trim().to_lowercase();
    CATEGORIES
        .iter()
        .find(|(label, _)| label.to_lowercase() == lower)
        .map(|(_, category)| *category)
}

fn is_custom_category(text: &str) -> bool {
    text.trim().to_lowercase() == labels::CATEGORY_CUSTOM.to_lowercase()
}

impl ChillBot {
    pub(super) async fn purchase_start(&self, user_id: UserId) -> Result<()> {
        if let Err(denial) = guards::require_purchase_quota(&self.limiter, user_id) {
            return self.deny(user_id, denial).await;
        }
        self.dialogue.set(
            user_id,
            DialogueStep::PurchaseCategory,
            DialogueParams::default(),
        );
        self.send(
            user_id,
            "🛒 Что вы хотите приобрести?\n\nВыберите категорию или сразу опишите запрос:",
            Some(Keyboard::Categories),
        )
        .await;
        Ok(())
    }

    pub(super) async fn purchase_category(&self, user_id: UserId, text: &str) -> Result<()> {
        let category = category_for(text);
        if category.is_none() && !is_custom_category(text) {
            // Free text straight away is the description itself.
            return self
                .purchase_description(user_id, &DialogueParams::default(), text)
                .await;
        }

        let advanced = self.dialogue.advance_to(
            user_id,
            DialogueStep::PurchaseDescription,
            DialogueParams {
                category: category.map(str::to_string),
                ..Default::default()
            },
        );
        if !advanced {
            return self.flow_expired(user_id).await;
        }
        let prompt = match category {
            Some(category) => format!("✏️ {}: опишите, что именно вам нужно", category),
            None => "✏️ Опишите ваш запрос".to_string(),
        };
        self.send(user_id, &prompt, Some(Keyboard::CancelOnly)).await;
        Ok(())
    }

    pub(super) async fn purchase_description(
        &self,
        user_id: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let description = text.trim();
        if description.is_empty() {
            self.send(user_id, "❌ Описание не может быть пустым", Some(Keyboard::CancelOnly))
                .await;
            return Ok(());
        }
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            self.send(
                user_id,
                &format!(
                    "❌ Слишком длинное описание (макс. {} символов)",
                    MAX_DESCRIPTION_CHARS
                ),
                Some(Keyboard::CancelOnly),
            )
            .await;
            return Ok(());
        }
        if let Err(reason) = self.limiter.record_purchase_request(user_id) {
            self.dialogue.clear(user_id);
            return self.deny(user_id, guards::Denial::RateLimited(reason)).await;
        }

        let description = match &params.category {
            Some(category) => format!("[{}] {}", category, description),
            None => description.to_string(),
        };
        let request = self
            .store
            .create_purchase_request(user_id, &description, self.clock.now())?;
        self.dialogue.clear(user_id);
        info!(
            "purchase request #{} from {}: {}",
            request.id,
            user_id,
            preview(&request.description)
        );

        self.send(
            user_id,
            &format!(
                "✅ Запрос #{} отправлен администраторам!\nОжидайте ответа с ценой.",
                request.id
            ),
            Some(self.menu(user_id)),
        )
        .await;

        let requester = self
            .store
            .get_player(user_id)?
            .map(|p| p.full_name())
            .unwrap_or_default();
        let msg = format!(
            "🛒 Новый запрос #{}\n\n👤 Игрок: {} (ID: {})\n💬 {}\n\nОтветьте:\n#{} Стоимость: N\nили\n#{} Отклонено: причина",
            request.id, requester, user_id, request.description, request.id, request.id
        );
        self.notify_admins(&msg).await;
        Ok(())
    }

    /// Resolve which pending request an administrator's reply addresses.
    async fn resolve_reply_target(
        &self,
        admin: UserId,
        request_id: Option<u64>,
    ) -> Result<Option<PurchaseRequest>> {
        if let Some(id) = request_id {
            let Some(request) = self.store.get_purchase(id)? else {
                self.send(admin, &format!("❌ Запрос #{} не найден", id), None)
                    .await;
                return Ok(None);
            };
            if request.status != PurchaseStatus::Pending {
                self.send(
                    admin,
                    &format!(
                        "❌ Запрос #{} уже обработан ({})",
                        id,
                        request.status.label()
                    ),
                    None,
                )
                .await;
                return Ok(None);
            }
            return Ok(Some(request));
        }

        let mut pending = self.store.pending_purchases()?;
        match pending.len() {
            0 => {
                self.send(admin, "❌ Нет запросов, ожидающих ответа", None)
                    .await;
                Ok(None)
            }
            1 => Ok(pending.pop()),
            n => {
                let ids: Vec<String> = pending.iter().map(|r| format!("#{}", r.id)).collect();
                self.send(
                    admin,
                    &format!(
                        "❓ Ответа ожидают {} запросов: {}\nУкажите номер, например: {} Стоимость: 100",
                        n,
                        ids.join(", "),
                        ids[0]
                    ),
                    None,
                )
                .await;
                Ok(None)
            }
        }
    }

    pub(super) async fn admin_purchase_reply(&self, admin: UserId, text: &str) -> Result<()> {
        let reply = parse_admin_reply(text);
        debug!("admin {} reply: {:?}", admin, reply);
        if reply.decision == AdminDecision::Unrecognized {
            self.send(
                admin,
                "❓ Не понял ответ. Формат: #id Стоимость: N или #id Отклонено: причина",
                None,
            )
            .await;
            return Ok(());
        }
        let Some(request) = self.resolve_reply_target(admin, reply.request_id).await? else {
            return Ok(());
        };
        let now = self.clock.now();

        match reply.decision {
            AdminDecision::Unrecognized => Ok(()),
            AdminDecision::Reject(reason) => {
                let updated = self.store.transition_purchase(
                    request.id,
                    PurchaseStatus::Pending,
                    now,
                    |r| {
                        r.status = PurchaseStatus::Rejected;
                        r.admin_response = Some(reason.clone());
                    },
                )?;
                let Some(updated) = updated else {
                    self.send(admin, &format!("❌ Запрос #{} уже обработан", request.id), None)
                        .await;
                    return Ok(());
                };
                info!("purchase request #{} rejected by {}", updated.id, admin);
                self.send(
                    updated.requester,
                    &format!(
                        "❌ Ваш запрос #{} отклонён\n💬 {}\n📝 Причина: {}",
                        updated.id, updated.description, reason
                    ),
                    None,
                )
                .await;
                self.send(admin, &format!("✅ Запрос #{} отклонён", updated.id), None)
                    .await;
                Ok(())
            }
            AdminDecision::SetPrice(price) => {
                if price == 0 {
                    self.send(admin, "❌ Стоимость должна быть положительной", None)
                        .await;
                    return Ok(());
                }
                if price > MAX_AMOUNT {
                    self.send(admin, "❌ Стоимость слишком большая (макс. 1,000,000)", None)
                        .await;
                    return Ok(());
                }
                let updated = self.store.transition_purchase(
                    request.id,
                    PurchaseStatus::Pending,
                    now,
                    |r| {
                        r.status = PurchaseStatus::Approved;
                        r.price = Some(price);
                        r.admin_response = Some(format!("Стоимость: {}", price));
                    },
                )?;
                let Some(updated) = updated else {
                    self.send(admin, &format!("❌ Запрос #{} уже обработан", request.id), None)
                        .await;
                    return Ok(());
                };
                info!(
                    "purchase request #{} priced at {} by {}",
                    updated.id, price, admin
                );
                self.offer_purchase(admin, &updated, price).await
            }
        }
    }

    /// Ask the requester to confirm a freshly priced request.
    async fn offer_purchase(
        &self,
        admin: UserId,
        request: &PurchaseRequest,
        price: u64,
    ) -> Result<()> {
        let Some(player) = self.store.get_player(request.requester)? else {
            self.send(
                admin,
                &format!("❌ Игрок {} не найден", request.requester),
                None,
            )
            .await;
            return Ok(());
        };

        if player.balance < price {
            self.send(
                player.user_id,
                &format!(
                    "💰 Стоимость запроса #{}: {} чил.\n💬 {}\n\n❌ Недостаточно средств! Ваш баланс: {} чил.\nКогда накопите, напишите: оплатить #{}",
                    request.id,
                    format::balance(price),
                    request.description,
                    format::balance(player.balance),
                    request.id
                ),
                None,
            )
            .await;
            self.send(
                admin,
                &format!(
                    "⚠️ У игрока {} недостаточно средств ({} из {} чил.). Запрос #{} одобрен и ждёт оплаты.",
                    player.full_name(),
                    format::balance(player.balance),
                    format::balance(price),
                    request.id
                ),
                None,
            )
            .await;
            return Ok(());
        }

        self.ask_purchase_confirmation(&player, request, price).await;
        self.send(
            admin,
            &format!(
                "✅ Стоимость запроса #{} назначена: {} чил. Ожидаем подтверждения игрока.",
                request.id,
                format::balance(price)
            ),
            None,
        )
        .await;
        Ok(())
    }

    async fn ask_purchase_confirmation(
        &self,
        player: &PlayerRecord,
        request: &PurchaseRequest,
        price: u64,
    ) {
        self.dialogue.set(
            player.user_id,
            DialogueStep::PurchaseConfirm,
            DialogueParams {
                request_id: Some(request.id),
                ..Default::default()
            },
        );
        self.send(
            player.user_id,
            &format!(
                "💰 Стоимость запроса #{}: {} чил.\n💬 {}\n\n💳 Баланс после покупки: {} чил.\nПодтвердить покупку?",
                request.id,
                format::balance(price),
                request.description,
                format::balance(player.balance - price)
            ),
            Some(Keyboard::Confirm),
        )
        .await;
    }

    /// `оплатить <id>`: re-enter confirmation for an approved, unpaid request.
    pub(super) async fn pay_request(&self, player: &PlayerRecord, argument: String) -> Result<()> {
        let user_id = player.user_id;
        let Some(request_id) = parse_request_id(&argument) else {
            self.send(user_id, "❌ Укажите номер запроса: оплатить #id", None)
                .await;
            return Ok(());
        };
        let request = self
            .store
            .get_purchase(request_id)?
            .filter(|r| r.requester == user_id);
        let Some(request) = request else {
            self.send(user_id, &format!("❌ Запрос #{} не найден", request_id), None)
                .await;
            return Ok(());
        };
        let price = match (request.status, request.price) {
            (PurchaseStatus::Approved, Some(price)) => price,
            (status, _) => {
                self.send(
                    user_id,
                    &format!(
                        "❌ Запрос #{} нельзя оплатить (статус: {})",
                        request.id,
                        status.label()
                    ),
                    None,
                )
                .await;
                return Ok(());
            }
        };
        // Re-read: the router's copy predates message tracking.
        let Some(player) = self.store.get_player(user_id)? else {
            return Ok(());
        };
        if player.balance < price {
            self.send(
                user_id,
                &format!(
                    "❌ Недостаточно средств! Стоимость: {} чил., ваш баланс: {} чил.",
                    format::balance(price),
                    format::balance(player.balance)
                ),
                None,
            )
            .await;
            return Ok(());
        }
        self.ask_purchase_confirmation(&player, &request, price).await;
        Ok(())
    }

    pub(super) async fn purchase_confirm(
        &self,
        user_id: UserId,
        params: &DialogueParams,
        text: &str,
    ) -> Result<()> {
        let Some(request_id) = params.request_id else {
            return self.flow_expired(user_id).await;
        };
        self.dialogue.clear(user_id);
        if !is_confirm(text) {
            self.send(
                user_id,
                &format!(
                    "❌ Покупка отменена. Запрос #{} остаётся одобренным, оплатить позже: оплатить #{}",
                    request_id, request_id
                ),
                Some(self.menu(user_id)),
            )
            .await;
            return Ok(());
        }

        let (receipt, request) = match self.ledger.settle_purchase(request_id, user_id)? {
            Ok(settled) => settled,
            Err(rejection) => {
                self.send(user_id, &format::rejection(&rejection), Some(self.menu(user_id)))
                    .await;
                return Ok(());
            }
        };
        let balance = receipt.debited.as_ref().map(|p| p.balance).unwrap_or(0);
        self.send(
            user_id,
            &format!(
                "✅ Покупка совершена!\n💬 {}\n💰 Списано: {} чил.\n💳 Ваш баланс: {} чил.",
                request.description,
                format::balance(receipt.transaction.amount),
                format::balance(balance)
            ),
            Some(self.menu(user_id)),
        )
        .await;
        self.award_achievements(user_id).await;

        let name = receipt
            .debited
            .as_ref()
            .map(|p| p.full_name())
            .unwrap_or_default();
        self.notify_admins(&format!(
            "✅ {} (ID: {}) оплатил запрос #{} на {} чил.\n💬 {}",
            name,
            user_id,
            request.id,
            format::balance(receipt.transaction.amount),
            request.description
        ))
        .await;
        Ok(())
    }

    pub(super) async fn list_requests(&self, user_id: UserId) -> Result<()> {
        let requests = self.store.purchases_for(user_id)?;
        if requests.is_empty() {
            self.send(user_id, "📋 У вас пока нет запросов", Some(self.menu(user_id)))
                .await;
            return Ok(());
        }
        let mut msg = String::from("📋 Ваши запросы:\n\n");
        let lines: Vec<String> = requests
            .iter()
            .take(REQUEST_LIST_LIMIT)
            .map(format::request_line)
            .collect();
        msg += &lines.join("\n\n");
        if requests
            .iter()
            .any(|r| r.status == PurchaseStatus::Approved)
        {
            msg += "\n\n💳 Оплатить одобренный запрос: оплатить #id";
        }
        self.send(user_id, &msg, Some(self.menu(user_id))).await;
        Ok(())
    }
}
