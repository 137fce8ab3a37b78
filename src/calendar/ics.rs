//! Just enough iCalendar to read workout events
//!
//! Handles line folding, text escaping and the three DTSTART shapes the
//! training calendars emit (date, UTC date-time, floating/TZID date-time).

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::utils::time::UserTimezone;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub summary: String,
    pub description: String,
    /// Start date in the calendar owner's timezone
    pub start_date: Option<NaiveDate>,
}

/// Parse every VEVENT in `body`
pub fn parse_events(body: &str, zone: &UserTimezone) -> Vec<Event> {
    let mut events = Vec::new();
    let mut current: Option<Event> = None;

    for line in unfold(body) {
        let Some((name, params, value)) = split_property(&line) else {
            continue;
        };

        if matches!(name.as_str(), "BEGIN" | "END") && value.trim().eq_ignore_ascii_case("VEVENT") {
            match name.as_str() {
                "BEGIN" => current = Some(Event::default()),
                "END" => events.extend(current.take()),
                _ => {}
            }
            continue;
        }

        match (name.as_str(), current.as_mut()) {
            ("SUMMARY", Some(event)) => event.summary = unescape(value),
            ("DESCRIPTION", Some(event)) => event.description = unescape(value),
            ("DTSTART", Some(event)) => event.start_date = parse_start(params, value, zone),
            _ => {}
        }
    }

    events
}

/// Join continuation lines (leading space or tab) onto the previous line
fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(last)) => last.push_str(rest),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

/// `NAME;PARAMS:VALUE` -> (upper-cased name, params, value)
fn split_property(line: &str) -> Option<(String, &str, &str)> {
    let colon = line.find(':')?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);
    let (name, params) = match head.find(';') {
        Some(semi) => (&head[..semi], &head[semi + 1..]),
        None => (head, ""),
    };
    Some((name.trim().to_ascii_uppercase(), params, value))
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_start(params: &str, value: &str, zone: &UserTimezone) -> Option<NaiveDate> {
    let value = value.trim();
    let date_only = params.to_ascii_uppercase().contains("VALUE=DATE") && !value.contains('T');

    if date_only || value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok();
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(zone.local_date(Utc.from_utc_datetime(&naive)));
    }

    // Floating or TZID-qualified: the date as written is already local
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> UserTimezone {
        UserTimezone::parse("UTC")
    }

    #[test]
    fn test_folded_and_escaped_fields() {
        let body = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nSUMMARY:1:00 - Pettit\r\nDESCRIPTION:Aerobic endurance\\, steady\\n\r\n  with cadence drills\r\nDTSTART;VALUE=DATE:20260310\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let events = parse_events(body, &utc());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "1:00 - Pettit");
        assert_eq!(events[0].description, "Aerobic endurance, steady\n with cadence drills");
        assert_eq!(events[0].start_date, NaiveDate::from_ymd_opt(2026, 3, 10));
    }

    #[test]
    fn test_utc_start_uses_owner_offset() {
        let body = "BEGIN:VEVENT\nSUMMARY:Late\nDTSTART:20260310T230000Z\nEND:VEVENT\n";

        let events = parse_events(body, &UserTimezone::parse("+02:00"));
        assert_eq!(events[0].start_date, NaiveDate::from_ymd_opt(2026, 3, 11));

        // Still the 10th in Denver
        let events = parse_events(body, &UserTimezone::parse("America/Denver"));
        assert_eq!(events[0].start_date, NaiveDate::from_ymd_opt(2026, 3, 10));

        let events = parse_events(body, &utc());
        assert_eq!(events[0].start_date, NaiveDate::from_ymd_opt(2026, 3, 10));
    }

    #[test]
    fn test_tzid_start_is_taken_as_local() {
        let body = "BEGIN:VEVENT\nDTSTART;TZID=America/Denver:20260310T060000\nEND:VEVENT\n";
        let events = parse_events(body, &utc());
        assert_eq!(events[0].start_date, NaiveDate::from_ymd_opt(2026, 3, 10));
    }

    #[test]
    fn test_properties_outside_events_are_ignored() {
        let body = "SUMMARY:Calendar name\nBEGIN:VEVENT\nEND:VEVENT\n";
        let events = parse_events(body, &utc());
        assert_eq!(events, vec![Event::default()]);
    }
}
