//! Labels for forecast points that continue the cadence of the input
//! timestamps.

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::types::Observation;

const DATE_FORMAT: &str = "%Y-%m-%d";
const MONTH_FORMAT: &str = "%Y-%m";

#[derive(Debug, Clone, PartialEq)]
enum Cadence {
    Integer { last: i64, step: i64 },
    Daily { last: NaiveDate, days: u64 },
    Monthly { last: NaiveDate, months: u32, month_end: bool, format: &'static str },
    Opaque(String),
}

/// Labels for the `steps` points following `observations`.
pub fn continue_labels(observations: &[Observation], steps: usize) -> Vec<String> {
    match observations {
        [] => (0..steps).map(|h| h.to_string()).collect(),
        [last] => next_labels(None, &last.timestamp, steps),
        [.., previous, last] => next_labels(Some(&previous.timestamp), &last.timestamp, steps),
    }
}

/// Labels for `steps` points after `last`, stepping like `previous -> last`.
///
/// Integer labels step arithmetically, `%Y-%m-%d` dates by whole months when
/// both fall on the same day of month (or both on a month end) and by days
/// otherwise, `%Y-%m` labels by months. Anything else becomes `"<last>+h"`.
pub fn next_labels(previous: Option<&str>, last: &str, steps: usize) -> Vec<String> {
    let cadence = detect(previous, last);
    (1..=steps).map(|h| render(&cadence, h)).collect()
}

fn detect(previous: Option<&str>, last: &str) -> Cadence {
    if let Ok(last_n) = last.trim().parse::<i64>() {
        let step = previous
            .and_then(|p| p.trim().parse::<i64>().ok())
            .and_then(|p| last_n.checked_sub(p))
            .filter(|&s| s > 0)
            .unwrap_or(1);
        return Cadence::Integer { last: last_n, step };
    }

    if let Ok(last_d) = NaiveDate::parse_from_str(last, DATE_FORMAT) {
        let prev_d = previous.and_then(|p| NaiveDate::parse_from_str(p, DATE_FORMAT).ok());
        return match prev_d {
            Some(prev_d) if prev_d < last_d => {
                let months = months_between(prev_d, last_d);
                let both_month_end = is_month_end(prev_d) && is_month_end(last_d);
                if months > 0 && (prev_d.day() == last_d.day() || both_month_end) {
                    Cadence::Monthly {
                        last: last_d,
                        months,
                        month_end: both_month_end,
                        format: DATE_FORMAT,
                    }
                } else {
                    let days = (last_d - prev_d).num_days().max(1) as u64;
                    Cadence::Daily { last: last_d, days }
                }
            }
            _ => Cadence::Daily { last: last_d, days: 1 },
        };
    }

    if let Some(last_m) = parse_month(last) {
        let months = previous
            .and_then(parse_month)
            .map(|prev_m| months_between(prev_m, last_m))
            .filter(|&m| m > 0)
            .unwrap_or(1);
        return Cadence::Monthly {
            last: last_m,
            months,
            month_end: false,
            format: MONTH_FORMAT,
        };
    }

    Cadence::Opaque(last.to_string())
}

fn render(cadence: &Cadence, h: usize) -> String {
    let fallback = |last: &dyn std::fmt::Display| format!("{last}+{h}");
    match cadence {
        Cadence::Integer { last, step } => i64::try_from(h)
            .ok()
            .and_then(|h| step.checked_mul(h))
            .and_then(|offset| last.checked_add(offset))
            .map(|n| n.to_string())
            .unwrap_or_else(|| fallback(last)),
        Cadence::Daily { last, days } => u64::try_from(h)
            .ok()
            .and_then(|h| days.checked_mul(h))
            .and_then(|n| last.checked_add_days(Days::new(n)))
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| fallback(last)),
        Cadence::Monthly {
            last,
            months,
            month_end,
            format,
        } => {
            let shift = u32::try_from(h)
                .ok()
                .and_then(|h| months.checked_mul(h))
                .map(Months::new);
            let next = shift.and_then(|shift| {
                if *month_end {
                    last.with_day(1)
                        .and_then(|first| first.checked_add_months(shift))
                        .and_then(end_of_month)
                } else {
                    last.checked_add_months(shift)
                }
            });
            next.map(|d| d.format(format).to_string())
                .unwrap_or_else(|| fallback(last))
        }
        Cadence::Opaque(last) => fallback(last),
    }
}

fn parse_month(label: &str) -> Option<NaiveDate> {
    if label.len() != 7 {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{label}-01"), DATE_FORMAT).ok()
}

fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let diff = (to.year() * 12 + to.month() as i32) - (from.year() * 12 + from.month() as i32);
    diff.max(0) as u32
}

fn end_of_month(first: NaiveDate) -> Option<NaiveDate> {
    first.checked_add_months(Months::new(1))?.pred_opt()
}

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().is_some_and(|next| next.day() == 1)
}
