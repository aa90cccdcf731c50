/// iCalendar export
///
/// Builds the `.ics` invite attached to RSVP confirmations: one VCALENDAR
/// holding one VEVENT, CRLF line endings, text values escaped and content
/// lines folded at 75 octets as RFC 5545 requires.

use crate::dispatch::Attachment;
use chrono::{DateTime, Duration, Utc};
use rallypoint_shared::models::Event;

/// MIME type of the invite attachment
pub const CONTENT_TYPE: &str = "text/calendar";

/// Assumed length of an event, which carries no end time of its own
pub const DEFAULT_EVENT_LENGTH_HOURS: i64 = 2;

const MAX_LINE_OCTETS: usize = 75;

/// Invite for `event`, stamped now
pub fn event_invite(event: &Event, url: &str, organizer: &str) -> Attachment {
    event_invite_at(event, url, organizer, Utc::now())
}

/// Invite for `event` with an explicit DTSTAMP
pub fn event_invite_at(
    event: &Event,
    url: &str,
    organizer: &str,
    stamped_at: DateTime<Utc>,
) -> Attachment {
    let ends_at = event.starts_at + Duration::hours(DEFAULT_EVENT_LENGTH_HOURS);

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Rallypoint//Notifier//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}@rallypoint", event.id),
        format!("DTSTAMP:{}", format_utc(stamped_at)),
        format!("DTSTART:{}", format_utc(event.starts_at)),
        format!("DTEND:{}", format_utc(ends_at)),
        format!("SUMMARY:{}", escape_text(&event.text_title())),
    ];
    if !event.location.is_empty() {
        lines.push(format!("LOCATION:{}", escape_text(&event.location)));
    }
    lines.push(format!("URL:{}", url));
    lines.push(format!(
        "DESCRIPTION:{}",
        escape_text(&format!("More details: {}", url))
    ));
    if !organizer.is_empty() {
        lines.push(format!("ORGANIZER:mailto:{}", organizer));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut content = String::new();
    for line in &lines {
        content.push_str(&fold_line(line));
        content.push_str("\r\n");
    }

    Attachment {
        filename: format!("{}.ics", event.slug),
        content_type: CONTENT_TYPE.to_string(),
        content,
    }
}

fn format_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escapes a TEXT property value
pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Folds a content line so no physical line exceeds 75 octets
///
/// Continuation lines start with a single space. Splits never fall inside
/// a multi-byte character.
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut used = 0;
    // First line holds 75 octets; continuations hold 74 after the space.
    let mut limit = MAX_LINE_OCTETS;
    for c in line.chars() {
        let width = c.len_utf8();
        if used + width > limit {
            out.push_str("\r\n ");
            used = 0;
            limit = MAX_LINE_OCTETS - 1;
        }
        out.push(c);
        used += width;
    }
    out
}
