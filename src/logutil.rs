//! Helpers for putting untrusted chat text into log records.

/// Longest preview emitted for a single free-text field.
const PREVIEW_CHARS: usize = 120;

/// Collapse `text` into a bounded single-line preview.
///
/// Line breaks and tabs become spaces, other control characters are dropped, and the
/// result is cut at [`PREVIEW_CHARS`] characters with a trailing ellipsis.
pub fn preview(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(PREVIEW_CHARS) + 3);
    let mut taken = 0usize;
    for ch in text.chars() {
        if taken == PREVIEW_CHARS {
            out.push('…');
            return out;
        }
        match ch {
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => continue,
            c => out.push(c),
        }
        taken += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn flattens_line_breaks() {
        assert_eq!(preview("Стоимость:\n120\tчил."), "Стоимость: 120 чил.");
    }

    #[test]
    fn truncates_long_text() {
        let long = "я".repeat(500);
        let out = preview(&long);
        assert_eq!(out.chars().count(), 121);
        assert!(out.ends_with('…'));
    }
}
