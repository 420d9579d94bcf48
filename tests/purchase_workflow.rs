//! Purchase requests from creation through admin pricing to settlement.
mod common;

use chillbot::dialogue::DialogueStep;
use chillbot::types::{AchievementKind, HistoryFilter, PurchaseStatus, UserId};
use common::{test_config, Harness, ADMIN};

async fn request_purchase(h: &Harness, user_id: UserId, description: &str) -> u64 {
    h.say(user_id, "купить").await;
    h.say(user_id, "✏️ Свой запрос").await;
    h.say(user_id, description).await;
    h.store
        .purchases_for(user_id)
        .expect("requests")
        .first()
        .map(|r| r.id)
        .expect("request created")
}

#[tokio::test]
async fn priced_request_is_confirmed_and_settled() {
    let h = Harness::new();
    h.join(ADMIN, "Админ").await;
    h.join(10, "Аня").await;

    h.say(10, "купить").await;
    h.say(10, "🔥 Боевые").await;
    h.say(10, "Огненный шар").await;
    let request = h.store.purchases_for(10).expect("requests").remove(0);
    assert_eq!(request.description, "[Боевая способность] Огненный шар");
    assert_eq!(request.status, PurchaseStatus::Pending);
    assert!(h
        .messenger
        .received(ADMIN, &format!("🛒 Новый запрос #{}", request.id)));

    h.say(ADMIN, &format!("#{} 60", request.id)).await;
    let approved = h.store.get_purchase(request.id).expect("read").expect("exists");
    assert_eq!(approved.status, PurchaseStatus::Approved);
    assert_eq!(approved.price, Some(60));
    assert_eq!(h.bot.dialogue().get(10).step, DialogueStep::PurchaseConfirm);

    h.say(10, "✅ Подтвердить").await;
    assert_eq!(h.balance(10), 40);
    let settled = h.store.get_purchase(request.id).expect("read").expect("exists");
    assert_eq!(settled.status, PurchaseStatus::Completed);
    assert!(h.messenger.received(10, "✅ Покупка совершена!"));
    assert!(h
        .messenger
        .received(ADMIN, &format!("оплатил запрос #{}", request.id)));

    let earned = h.store.achievements_for(10).expect("achievements");
    assert!(earned.iter().any(|a| a.kind == AchievementKind::FirstPurchase));

    // A repeated confirmation finds no flow and charges nothing.
    h.say(10, "да").await;
    assert_eq!(h.balance(10), 40);
    let purchases = h
        .store
        .player_transactions(10, HistoryFilter::Purchases, None)
        .expect("history");
    assert_eq!(purchases.len(), 1);
}

#[tokio::test]
async fn unaffordable_price_leaves_request_approved() {
    let mut config = test_config();
    config.bot.starting_balance = 50;
    let h = Harness::with_config(config);
    h.join(ADMIN, "Админ").await;
    h.join(10, "Вера").await;

    let id = request_purchase(&h, 10, "Телепорт").await;
    h.say(ADMIN, "Стоимость: 120").await;

    let request = h.store.get_purchase(id).expect("read").expect("exists");
    assert_eq!(request.status, PurchaseStatus::Approved);
    assert_eq!(request.price, Some(120));
    assert_eq!(h.balance(10), 50);
    assert_eq!(h.store.transaction_count(), 0);
    assert!(h.messenger.last_text(10).contains("Недостаточно средств"));
    assert!(h.messenger.last_text(ADMIN).contains("недостаточно средств"));
    assert!(h.bot.dialogue().get(10).is_idle());
}

#[tokio::test]
async fn approved_request_can_be_paid_later() {
    let mut config = test_config();
    config.bot.starting_balance = 50;
    let h = Harness::with_config(config);
    h.join(ADMIN, "Админ").await;
    h.join(10, "Вера").await;
    h.join(20, "Глеб").await;

    let id = request_purchase(&h, 10, "Телепорт").await;
    h.say(ADMIN, &format!("#{} Стоимость: 120", id)).await;

    // Someone else cannot pay it.
    h.say(20, &format!("оплатить #{}", id)).await;
    assert!(h.messenger.last_text(20).contains("не найден"));
    assert!(h.bot.dialogue().get(20).is_idle());

    // Still short.
    h.say(10, &format!("оплатить #{}", id)).await;
    assert!(h.messenger.last_text(10).contains("Недостаточно средств"));
    assert!(h.bot.dialogue().get(10).is_idle());

    h.bot
        .ledger()
        .admin_grant(ADMIN, 10, 100, None)
        .expect("store ok")
        .expect("grant");
    h.say(10, &format!("/pay {}", id)).await;
    assert_eq!(h.bot.dialogue().get(10).step, DialogueStep::PurchaseConfirm);
    h.say(10, "да").await;

    assert_eq!(h.balance(10), 30);
    let request = h.store.get_purchase(id).expect("read").expect("exists");
    assert_eq!(request.status, PurchaseStatus::Completed);

    // Completed requests cannot be paid again.
    h.say(10, &format!("оплатить {}", id)).await;
    assert!(h.messenger.last_text(10).contains("нельзя оплатить"));
    assert_eq!(h.balance(10), 30);
}

#[tokio::test]
async fn reply_without_id_is_refused_when_ambiguous() {
    let h = Harness::new();
    h.join(ADMIN, "Админ").await;
    h.join(10, "Аня").await;
    h.join(20, "Борис").await;

    let first = request_purchase(&h, 10, "Щит").await;
    let second = request_purchase(&h, 20, "Меч").await;

    h.say(ADMIN, "Стоимость: 50").await;
    assert!(h.messenger.last_text(ADMIN).contains("Укажите номер"));
    for id in [first, second] {
        let request = h.store.get_purchase(id).expect("read").expect("exists");
        assert_eq!(request.status, PurchaseStatus::Pending);
    }

    h.say(ADMIN, &format!("#{} Отклонено: слишком дорого", first))
        .await;
    let rejected = h.store.get_purchase(first).expect("read").expect("exists");
    assert_eq!(rejected.status, PurchaseStatus::Rejected);
    assert_eq!(rejected.admin_response.as_deref(), Some("слишком дорого"));
    assert!(h.messenger.last_text(10).contains("слишком дорого"));

    // Exactly one left pending: an id-less reply now applies to it.
    h.say(ADMIN, "Цена: 30").await;
    let priced = h.store.get_purchase(second).expect("read").expect("exists");
    assert_eq!(priced.status, PurchaseStatus::Approved);
    assert_eq!(priced.price, Some(30));

    // Replies to already handled requests change nothing.
    h.say(ADMIN, &format!("#{} 10", first)).await;
    assert!(h.messenger.last_text(ADMIN).contains("уже обработан"));
    let still = h.store.get_purchase(first).expect("read").expect("exists");
    assert_eq!(still.status, PurchaseStatus::Rejected);
}

#[tokio::test]
async fn declining_confirmation_keeps_request_payable() {
    let h = Harness::new();
    h.join(ADMIN, "Админ").await;
    h.join(10, "Аня").await;

    let id = request_purchase(&h, 10, "Плащ").await;
    h.say(ADMIN, &format!("#{} 20", id)).await;
    h.say(10, "нет").await;

    assert_eq!(h.balance(10), 100);
    let request = h.store.get_purchase(id).expect("read").expect("exists");
    assert_eq!(request.status, PurchaseStatus::Approved);
    assert!(h.messenger.last_text(10).contains(&format!("оплатить #{}", id)));
}

#[tokio::test]
async fn hourly_quota_limits_requests() {
    let mut config = test_config();
    config.limits.max_purchase_requests_per_hour = 1;
    let h = Harness::with_config(config);
    h.join(10, "Аня").await;

    request_purchase(&h, 10, "Кольцо").await;
    h.say(10, "купить").await;
    assert!(h.messenger.last_text(10).contains("лимита запросов"));
    assert!(h.bot.dialogue().get(10).is_idle());
    assert_eq!(h.store.purchases_for(10).expect("requests").len(), 1);
}

#[tokio::test]
async fn non_admin_price_reply_is_not_a_command() {
    let h = Harness::new();
    h.join(10, "Аня").await;
    h.join(20, "Борис").await;
    let id = request_purchase(&h, 10, "Лук").await;

    h.say(20, &format!("#{} Стоимость: 1", id)).await;
    let request = h.store.get_purchase(id).expect("read").expect("exists");
    assert_eq!(request.status, PurchaseStatus::Pending);
    assert!(h.messenger.last_text(20).contains("Команда не распознана"));
}
