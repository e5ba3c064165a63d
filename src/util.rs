use time::OffsetDateTime;
use time::macros::format_description;

pub fn format_timestamp(ts: Option<OffsetDateTime>) -> String {
    let Some(ts) = ts else {
        return "-".to_string();
    };
    let local = time::UtcOffset::current_local_offset()
        .map_or(ts, |offset| ts.to_offset(offset));
    local
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| "-".to_string())
}

/// Shorten to `max` characters, marking the cut with an ellipsis. Newlines
/// collapse to spaces so table rows stay on one line.
pub fn truncate(input: &str, max: usize) -> String {
    let flat: String = input
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    if flat.chars().count() <= max {
        flat
    } else {
        let mut out = flat.chars().take(max.saturating_sub(1)).collect::<String>();
        out.push('…');
        out
    }
}
