//! Text rendering for chat replies.

use chrono::{DateTime, FixedOffset, Utc};

use crate::achievement::PlayerStats;
use crate::errors::Rejection;
use crate::types::{
    AchievementKind, EarnedAchievement, GlobalStats, PlayerRecord, PurchaseRequest,
    TransactionKind, TransactionRecord, UserId,
};

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

/// `1234567` -> `1 234 567`.
pub fn balance(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Render a UTC moment on the configured wall clock.
pub fn datetime(at: DateTime<Utc>, utc_offset_minutes: i32) -> String {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => at.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string(),
        None => at.format("%d.%m.%Y %H:%M").to_string(),
    }
}

pub fn transaction_kind(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Transfer => "➡️ Перевод",
        TransactionKind::Purchase => "🛒 Покупка",
        TransactionKind::AdminGive => "💰 Начисление админом",
        TransactionKind::AdminTake => "💳 Списание админом",
        TransactionKind::ScheduledGive => "⏰ Запланированное начисление",
    }
}

pub fn profile(
    player: &PlayerRecord,
    achievements: Option<&[EarnedAchievement]>,
    utc_offset_minutes: i32,
) -> String {
    let mut msg = format!("👤 Профиль: {}\n", player.full_name());
    msg += &format!("🆔 ID: {}\n", player.user_id);
    msg += &format!("💰 Баланс: {} чилликов\n", balance(player.balance));
    msg += &format!("⭐ Уровень: {}\n", player.level);
    msg += &format!("✨ Опыт: {} XP\n", balance(player.experience as u64));
    msg += &format!("💬 Сообщений: {}\n", balance(player.messages_count as u64));
    msg += &format!(
        "📅 Регистрация: {}\n",
        datetime(player.created_at, utc_offset_minutes)
    );
    if player.banned {
        msg += "🚫 Заблокирован";
        if let Some(reason) = &player.ban_reason {
            msg += &format!(": {}", reason);
        }
        msg += "\n";
    }

    if let Some(earned) = achievements.filter(|a| !a.is_empty()) {
        msg += &format!("\n🏆 Достижения ({}):\n", earned.len());
        for achievement in earned.iter().take(5) {
            msg += &format!("{} {}\n", achievement.kind.icon(), achievement.kind.title());
        }
        if earned.len() > 5 {
            msg += &format!("... и ещё {}\n", earned.len() - 5);
        }
    }
    msg
}

pub fn history(
    transactions: &[TransactionRecord],
    user_id: UserId,
    utc_offset_minutes: i32,
) -> String {
    if transactions.is_empty() {
        return "📋 История транзакций пуста".to_string();
    }
    let mut msg = String::from("📜 История последних операций:\n\n");
    for tx in transactions {
        let direction = if tx.from == Some(user_id) {
            format!("➖ -{}", balance(tx.amount))
        } else {
            format!("➕ +{}", balance(tx.amount))
        };
        msg += &format!("{}\n", transaction_kind(tx.kind));
        msg += &format!(
            "   {} чил. • {}\n",
            direction,
            datetime(tx.created_at, utc_offset_minutes)
        );
        if let Some(reason) = &tx.reason {
            msg += &format!("   💬 {}\n", reason);
        }
        msg += "\n";
    }
    msg.trim_end().to_string()
}

pub fn leaderboard(players: &[PlayerRecord]) -> String {
    if players.is_empty() {
        return "🏆 Таблица лидеров пуста".to_string();
    }
    let mut msg = String::from("🏆 Топ игроков по балансу:\n\n");
    for (i, player) in players.iter().enumerate() {
        let place = MEDALS
            .get(i)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("{}.", i + 1));
        msg += &format!(
            "{} {} — {} чил.\n",
            place,
            player.full_name(),
            balance(player.balance)
        );
    }
    msg
}

pub fn player_stats(player: &PlayerRecord, stats: &PlayerStats, achievement_count: usize) -> String {
    let mut msg = format!("📊 Статистика: {}\n\n", player.full_name());
    msg += &format!("💰 Текущий баланс: {} чил.\n", balance(player.balance));
    msg += &format!("⭐ Уровень: {}\n", player.level);
    msg += &format!("✨ Опыт: {} XP\n", balance(player.experience as u64));
    msg += &format!("💬 Сообщений: {}\n\n", balance(player.messages_count as u64));
    msg += &format!("📈 Всего получено: {} чил.\n", balance(stats.received));
    msg += &format!("📉 Всего потрачено: {} чил.\n", balance(stats.spent));
    msg += &format!("➡️ Переводов: {}\n", stats.transfer_count);
    msg += &format!("🛒 Покупок: {}\n", stats.purchase_count);
    if stats.purchase_count > 0 {
        msg += &format!(
            "💎 Крупнейшая покупка: {} чил.\n",
            balance(stats.largest_purchase)
        );
    }
    msg += &format!("\n🏆 Достижений: {}", achievement_count);
    msg
}

pub fn global_stats(stats: &GlobalStats, top: &[PlayerRecord]) -> String {
    let mut msg = String::from("📊 Глобальная статистика\n\n");
    msg += &format!("👥 Всего игроков: {}\n", balance(stats.total_players as u64));
    msg += &format!("💰 Общая эмиссия: {} чил.\n", balance(stats.total_emission));
    msg += &format!(
        "📊 Средний баланс: {} чил.\n",
        balance(stats.average_balance as u64)
    );
    msg += &format!(
        "📈 Всего транзакций: {}\n\n",
        balance(stats.total_transactions as u64)
    );
    msg += "🏆 Топ-5 игроков:\n";
    for (i, player) in top.iter().enumerate() {
        msg += &format!(
            "{}. {} — {} чил.\n",
            i + 1,
            player.full_name(),
            balance(player.balance)
        );
    }
    msg
}

/// Player-facing text for a ledger rejection.
pub fn rejection(rejection: &Rejection) -> String {
    match rejection {
        Rejection::PlayerNotFound(_) => "❌ Игрок не найден".to_string(),
        Rejection::SelfTransfer => "❌ Нельзя переводить чиллики самому себе".to_string(),
        Rejection::InsufficientFunds {
            balance: have,
            required,
            ..
        } => format!(
            "❌ Недостаточно средств!\nБаланс: {} чил., требуется: {} чил.",
            balance(*have),
            balance(*required)
        ),
        Rejection::ZeroAmount => "❌ Сумма должна быть положительной".to_string(),
        Rejection::RequestNotFound(_) | Rejection::RequestNotActionable(_) => {
            "❌ Запрос недействителен".to_string()
        }
        Rejection::PaymentNotFound(id) => format!("❌ Платёж #{} не найден", id),
        Rejection::PaymentAlreadyExecuted(id) => format!("❌ Платёж #{} уже выполнен", id),
    }
}

pub fn achievement_earned(kind: AchievementKind) -> String {
    format!(
        "🎉 Получено новое достижение!\n\n{} {}\n{}",
        kind.icon(),
        kind.title(),
        kind.description()
    )
}

pub fn level_up(level: u32) -> String {
    format!("🎊 Поздравляем! Вы достигли {} уровня!", level)
}

pub fn request_line(request: &PurchaseRequest) -> String {
    let price = request
        .price
        .map(|p| format!("{} чил.", balance(p)))
        .unwrap_or_else(|| "цена не назначена".to_string());
    format!(
        "#{} • {} • {}\n   💬 {}",
        request.id,
        request.status.label(),
        price,
        request.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn balance_groups_thousands() {
        assert_eq!(balance(0), "0");
        assert_eq!(balance(999), "999");
        assert_eq!(balance(1_000), "1 000");
        assert_eq!(balance(1_234_567), "1 234 567");
    }

    #[test]
    fn datetime_uses_wall_clock_offset() {
        let at = Utc.with_ymd_and_hms(2025, 3, 8, 9, 5, 0).unwrap();
        assert_eq!(datetime(at, 180), "08.03.2025 12:05");
        assert_eq!(datetime(at, 0), "08.03.2025 09:05");
    }

    #[test]
    fn insufficient_funds_shows_both_amounts() {
        let text = rejection(&Rejection::InsufficientFunds {
            user_id: 1,
            balance: 1_500,
            required: 2_000,
        });
        assert_eq!(
            text,
            "❌ Недостаточно средств!\nБаланс: 1 500 чил., требуется: 2 000 чил."
        );
    }

    #[test]
    fn leaderboard_medals_then_numbers() {
        let now = Utc::now();
        let players: Vec<PlayerRecord> = (1..=4)
            .map(|id| PlayerRecord::new(id, "Игрок", &id.to_string(), 100 * id, now))
            .collect();
        let text = leaderboard(&players);
        assert!(text.contains("🥇 Игрок 1 — 100 чил."));
        assert!(text.contains("4. Игрок 4 — 400 чил."));
    }
}
