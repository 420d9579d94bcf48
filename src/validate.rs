//! Free-text input validation.
//!
//! Every function here is pure: it turns raw chat text into a typed value or a
//! [`ValidationError`] whose message can be shown to the player as-is.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::types::{HistoryFilter, UserId};

/// Largest amount accepted in a single operation.
pub const MAX_AMOUNT: u64 = 1_000_000;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%d.%m.%Y %H:%M"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d.%m.%Y"];

const PRICE_KEYWORDS: [&str; 2] = ["стоимость:", "цена:"];
const REJECT_PREFIXES: [&str; 2] = ["отклонено:", "отклонить:"];
const DEFAULT_REJECT_REASON: &str = "Не указана";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Сумма должна быть положительной")]
    NonPositiveAmount,

    #[error("Сумма слишком большая (макс. 1,000,000)")]
    AmountTooLarge,

    #[error("Неверный формат суммы. Укажите целое число")]
    NotANumber,

    #[error("Неверный формат ID. Используйте: @id123 или id123 или просто число")]
    InvalidUserId,

    #[error("Неверный формат даты. Используйте: ГГГГ-ММ-ДД ЧЧ:ММ или ДД.ММ.ГГГГ ЧЧ:ММ")]
    InvalidDateTime,

    #[error("Дата должна быть в будущем")]
    NotInFuture,
}

/// Parse a positive amount no larger than [`MAX_AMOUNT`].
pub fn parse_amount(text: &str) -> Result<u64, ValidationError> {
    let trimmed = text.trim();
    match trimmed.parse::<i64>() {
        Ok(value) if value <= 0 => Err(ValidationError::NonPositiveAmount),
        Ok(value) if value as u64 > MAX_AMOUNT => Err(ValidationError::AmountTooLarge),
        Ok(value) => Ok(value as u64),
        Err(_) => {
            // Distinguish "huge but numeric" from garbage.
            let (negative, digits) = match trimmed.as_bytes().first() {
                Some(b'-') => (true, &trimmed[1..]),
                Some(b'+') => (false, &trimmed[1..]),
                _ => (false, trimmed),
            };
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if negative {
                    Err(ValidationError::NonPositiveAmount)
                } else {
                    Err(ValidationError::AmountTooLarge)
                }
            } else {
                Err(ValidationError::NotANumber)
            }
        }
    }
}

/// Digits immediately following the first occurrence of `marker` that has any.
fn digits_after(text: &str, marker: &str) -> Option<UserId> {
    for (idx, _) in text.match_indices(marker) {
        let rest = &text[idx + marker.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if end > 0 {
            return rest[..end].parse().ok();
        }
    }
    None
}

/// Extract a user id from a mention, profile link or bare number.
///
/// Patterns are tried in order: `@id<n>`, `id<n>` anywhere (which also covers
/// profile links such as `vk.com/id<n>`), then a bare number.
pub fn parse_user_id(text: &str) -> Result<UserId, ValidationError> {
    let trimmed = text.trim();
    if let Some(id) = digits_after(trimmed, "@id") {
        return Ok(id);
    }
    if let Some(id) = digits_after(trimmed, "id") {
        return Ok(id);
    }
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed.parse().map_err(|_| ValidationError::InvalidUserId);
    }
    Err(ValidationError::InvalidUserId)
}

/// Parse a wall-clock date/time entered at `utc_offset_minutes` from UTC.
///
/// Date-only input defaults to 12:00. Whether the moment lies in the future is
/// checked separately by [`ensure_future`].
pub fn parse_datetime(
    text: &str,
    utc_offset_minutes: i32,
) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = text.trim();
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|fmt| {
                NaiveDate::parse_from_str(trimmed, fmt)
                    .ok()
                    .and_then(|date| NaiveTime::from_hms_opt(12, 0, 0).map(|t| date.and_time(t)))
            })
        })
        .ok_or(ValidationError::InvalidDateTime)?;

    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .ok_or(ValidationError::InvalidDateTime)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or(ValidationError::InvalidDateTime)
}

pub fn ensure_future(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
    if at > now {
        Ok(at)
    } else {
        Err(ValidationError::NotInFuture)
    }
}

/// What an administrator's free-text reply to a purchase request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminDecision {
    SetPrice(u64),
    Reject(String),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReply {
    /// Request referenced with a leading `#<id>`, if any.
    pub request_id: Option<u64>,
    pub decision: AdminDecision,
}

/// Split off a leading `#<id>` token.
fn split_request_ref(text: &str) -> (Option<u64>, &str) {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix('#') else {
        return (None, trimmed);
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    match rest[..end].parse::<u64>() {
        Ok(id) => (Some(id), rest[end..].trim()),
        Err(_) => (None, trimmed),
    }
}

/// Parse an administrator's price or rejection reply.
pub fn parse_admin_reply(text: &str) -> AdminReply {
    let (request_id, body) = split_request_ref(text);
    let lower = body.to_lowercase();

    if REJECT_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        let reason = body
            .split_once(':')
            .map(|(_, rest)| rest.trim())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(DEFAULT_REJECT_REASON);
        return AdminReply {
            request_id,
            decision: AdminDecision::Reject(reason.to_string()),
        };
    }

    let keyword_price = PRICE_KEYWORDS.iter().find_map(|kw| {
        let idx = lower.find(kw)?;
        let rest = lower[idx + kw.len()..].trim_start();
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse::<u64>().ok()
    });
    let price = keyword_price.or_else(|| {
        let bare = lower.trim();
        if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) {
            bare.parse::<u64>().ok()
        } else {
            None
        }
    });

    AdminReply {
        request_id,
        decision: price.map_or(AdminDecision::Unrecognized, AdminDecision::SetPrice),
    }
}

/// Whether an idle administrator's message should be treated as a purchase reply.
///
/// A bare number only counts when it carries an explicit `#<id>`.
pub fn looks_like_admin_reply(text: &str) -> bool {
    let (request_id, body) = split_request_ref(text);
    if request_id.is_some() {
        return true;
    }
    let lower = body.to_lowercase();
    PRICE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        || REJECT_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Map a history filter button or word onto a [`HistoryFilter`].
pub fn parse_history_filter(text: &str) -> Option<HistoryFilter> {
    let lower = text.trim().to_lowercase();
    if lower.contains("перевод") {
        Some(HistoryFilter::Transfers)
    } else if lower.contains("покупк") {
        Some(HistoryFilter::Purchases)
    } else if lower.contains("админ") {
        Some(HistoryFilter::Admin)
    } else if lower.contains("все") {
        Some(HistoryFilter::All)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn amount_bounds() {
        assert_eq!(parse_amount("40"), Ok(40));
        assert_eq!(parse_amount(" +5 "), Ok(5));
        assert_eq!(parse_amount("1000000"), Ok(1_000_000));
        assert_eq!(parse_amount("0"), Err(ValidationError::NonPositiveAmount));
        assert_eq!(parse_amount("-3"), Err(ValidationError::NonPositiveAmount));
        assert_eq!(parse_amount("1000001"), Err(ValidationError::AmountTooLarge));
        assert_eq!(
            parse_amount("99999999999999999999999"),
            Err(ValidationError::AmountTooLarge)
        );
        assert_eq!(parse_amount("сорок"), Err(ValidationError::NotANumber));
        assert_eq!(parse_amount("12.5"), Err(ValidationError::NotANumber));
        assert_eq!(parse_amount(""), Err(ValidationError::NotANumber));
    }

    #[test]
    fn user_id_patterns_in_priority_order() {
        assert_eq!(parse_user_id("@id123"), Ok(123));
        assert_eq!(parse_user_id("id77"), Ok(77));
        assert_eq!(parse_user_id("https://vk.com/id42"), Ok(42));
        assert_eq!(parse_user_id(" 9001 "), Ok(9001));
        assert_eq!(parse_user_id("id5 и @id7"), Ok(7));
        assert_eq!(parse_user_id("[id12|Ann]"), Ok(12));
        assert_eq!(parse_user_id("vasya"), Err(ValidationError::InvalidUserId));
        assert_eq!(parse_user_id("12abc"), Err(ValidationError::InvalidUserId));
    }

    #[test]
    fn datetime_formats_convert_from_local_offset() {
        let at = parse_datetime("2030-05-01 15:30", 180).expect("iso");
        assert_eq!((at.hour(), at.minute()), (12, 30));
        let at = parse_datetime("01.05.2030 15:30", 180).expect("dotted");
        assert_eq!((at.hour(), at.minute()), (12, 30));
        let at = parse_datetime("2030-05-01", 0).expect("date only");
        assert_eq!((at.hour(), at.minute()), (12, 0));
        let at = parse_datetime("01.05.2030", 180).expect("dotted date only");
        assert_eq!(at.hour(), 9);
        assert_eq!(
            parse_datetime("завтра", 180),
            Err(ValidationError::InvalidDateTime)
        );
        assert_eq!(
            parse_datetime("2030-13-01 10:00", 180),
            Err(ValidationError::InvalidDateTime)
        );
    }

    #[test]
    fn future_check_is_strict() {
        let now = Utc::now();
        assert_eq!(ensure_future(now, now), Err(ValidationError::NotInFuture));
        assert!(ensure_future(now + chrono::Duration::seconds(1), now).is_ok());
    }

    #[test]
    fn admin_reply_shapes() {
        assert_eq!(
            parse_admin_reply("Стоимость: 120"),
            AdminReply {
                request_id: None,
                decision: AdminDecision::SetPrice(120)
            }
        );
        assert_eq!(
            parse_admin_reply("ЦЕНА:45").decision,
            AdminDecision::SetPrice(45)
        );
        assert_eq!(parse_admin_reply(" 300 ").decision, AdminDecision::SetPrice(300));
        assert_eq!(
            parse_admin_reply("Отклонено: слишком сильно").decision,
            AdminDecision::Reject("слишком сильно".to_string())
        );
        assert_eq!(
            parse_admin_reply("отклонить:").decision,
            AdminDecision::Reject("Не указана".to_string())
        );
        assert_eq!(parse_admin_reply("привет").decision, AdminDecision::Unrecognized);
    }

    #[test]
    fn admin_reply_with_request_reference() {
        let reply = parse_admin_reply("#12 Стоимость: 120");
        assert_eq!(reply.request_id, Some(12));
        assert_eq!(reply.decision, AdminDecision::SetPrice(120));

        let reply = parse_admin_reply("#7 отклонено: нет");
        assert_eq!(reply.request_id, Some(7));
        assert_eq!(reply.decision, AdminDecision::Reject("нет".to_string()));

        let reply = parse_admin_reply("#3 50");
        assert_eq!(reply.request_id, Some(3));
        assert_eq!(reply.decision, AdminDecision::SetPrice(50));
    }

    #[test]
    fn router_candidates() {
        assert!(looks_like_admin_reply("Стоимость: 10"));
        assert!(looks_like_admin_reply("Отклонено: нет"));
        assert!(looks_like_admin_reply("#4 10"));
        assert!(!looks_like_admin_reply("10"));
        assert!(!looks_like_admin_reply("баланс"));
    }

    #[test]
    fn history_filter_words() {
        assert_eq!(parse_history_filter("➡️ Переводы"), Some(HistoryFilter::Transfers));
        assert_eq!(parse_history_filter("покупки"), Some(HistoryFilter::Purchases));
        assert_eq!(parse_history_filter("👑 Админ"), Some(HistoryFilter::Admin));
        assert_eq!(parse_history_filter("📋 Все"), Some(HistoryFilter::All));
        assert_eq!(parse_history_filter("что-то"), None);
    }
}
