//! Registry date normalization.
//!
//! Registries print expiry dates in many shapes. [`parse_date`] tries the
//! [`LAYOUTS`] table top to bottom and returns the first successful parse.
//! Layouts are kept mutually exclusive, so table order only decides ties
//! that cannot occur in practice.
//!
//! Zone abbreviations such as `MST` carry no offset information on their
//! own; the wall-clock time is taken at face value as UTC. Nothing here
//! consults the host time zone.

use std::borrow::Cow;

use chrono::format::{parse, Parsed, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no known date layout matches {raw:?}")]
pub struct DateError {
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Calendar date at midnight UTC.
    Date,
    /// Wall-clock date and time read as UTC.
    Naive,
    /// Date and time with a numeric UTC offset.
    Offset,
    Rfc3339,
    /// Month, year and time without a day of month; the 1st is assumed.
    MonthYear,
}

/// One accepted date shape.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    /// A sample input this layout accepts.
    pub example: &'static str,
    format: &'static str,
    kind: Kind,
    weekday: bool,
    zone: Option<usize>,
}

const fn layout(
    example: &'static str,
    format: &'static str,
    kind: Kind,
    weekday: bool,
    zone: Option<usize>,
) -> Layout {
    Layout {
        example,
        format,
        kind,
        weekday,
        zone,
    }
}

/// Accepted layouts, most specific first.
pub static LAYOUTS: &[Layout] = &[
    layout("2006-01-02", "%Y-%m-%d", Kind::Date, false, None),
    layout("2006-01-02T15:04:05Z", "%Y-%m-%dT%H:%M:%SZ", Kind::Naive, false, None),
    layout("02-Jan-2006", "%d-%b-%Y", Kind::Date, false, None),
    layout("2006.01.02", "%Y.%m.%d", Kind::Date, false, None),
    layout("Mon Jan 2 15:04:05 MST 2006", "%b %d %H:%M:%S %Y", Kind::Naive, true, Some(3)),
    layout("02/01/2006", "%d/%m/%Y", Kind::Date, false, None),
    layout("2006-01-02 15:04:05 MST", "%Y-%m-%d %H:%M:%S", Kind::Naive, false, Some(2)),
    layout("2006/01/02", "%Y/%m/%d", Kind::Date, false, None),
    layout("Mon Jan 2006 15:04:05", "%b %Y %H:%M:%S", Kind::MonthYear, true, None),
    layout("2006-01-02 15:04:05-07", "%Y-%m-%d %H:%M:%S%#z", Kind::Offset, false, None),
    layout("2006-01-02 15:04:05", "%Y-%m-%d %H:%M:%S", Kind::Naive, false, None),
    // .fi
    layout("2.1.2006 15:04:05", "%d.%m.%Y %H:%M:%S", Kind::Naive, false, None),
    layout("02/01/2006 15:04:05", "%d/%m/%Y %H:%M:%S", Kind::Naive, false, None),
    // .ax, .cz
    layout("02.01.2006", "%d.%m.%Y", Kind::Date, false, None),
    layout("2006-01-02T15:04:05.000+01:00", "", Kind::Rfc3339, false, None),
    layout("2006-01-02T15:04:05", "%Y-%m-%dT%H:%M:%S%.f", Kind::Naive, false, None),
    // .uk
    layout("02 January 2006", "%d %B %Y", Kind::Date, false, None),
    // .br
    layout("20060102", "%Y%m%d", Kind::Date, false, None),
];

impl Layout {
    /// Attempts to read `text` with this layout.
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = self.prepare(text)?;
        let fmt = self.format;

        match self.kind {
            Kind::Date => NaiveDate::parse_from_str(&text, fmt)
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc()),
            Kind::Naive => NaiveDateTime::parse_from_str(&text, fmt)
                .ok()
                .map(|dt| dt.and_utc()),
            Kind::Offset => DateTime::parse_from_str(&text, fmt)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Kind::Rfc3339 => DateTime::parse_from_rfc3339(&text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Kind::MonthYear => {
                let mut parsed = Parsed::new();
                parse(&mut parsed, &text, StrftimeItems::new(fmt)).ok()?;
                parsed.set_day(1).ok()?;
                parsed
                    .to_naive_datetime_with_offset(0)
                    .ok()
                    .map(|dt| dt.and_utc())
            }
        }
    }

    /// Drops the leading weekday and the zone abbreviation, validating both.
    fn prepare<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        if !self.weekday && self.zone.is_none() {
            return Some(Cow::Borrowed(text));
        }

        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        if self.weekday {
            if tokens.is_empty() {
                return None;
            }
            tokens.remove(0).parse::<Weekday>().ok()?;
        }
        if let Some(position) = self.zone {
            if !is_zone_abbreviation(tokens.get(position)?) {
                return None;
            }
            tokens.remove(position);
        }
        Some(Cow::Owned(tokens.join(" ")))
    }
}

fn is_zone_abbreviation(token: &str) -> bool {
    (3..=5).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_uppercase())
}

/// Parses a raw registry date into a UTC timestamp.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, DateError> {
    let text = raw.trim();
    for layout in LAYOUTS {
        if let Some(date) = layout.parse(text) {
            trace!(raw = %text, layout = layout.example, "Parsed date");
            return Ok(date);
        }
    }
    Err(DateError {
        raw: raw.to_string(),
    })
}
