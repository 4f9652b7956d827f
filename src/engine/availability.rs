use chrono::NaiveDate;

use crate::calendar::OperatingCalendar;
use crate::model::*;

// ── Availability ─────────────────────────────────────────────────

/// Whether the technician is free for `[start, start + duration)` on `date`.
/// A window running past midnight is never available.
pub fn available_at(schedule: &Schedule, date: NaiveDate, start: Min, duration: Min) -> bool {
    let Some(end) = start.checked_add(duration).filter(|&e| e <= END_OF_DAY) else {
        return false;
    };
    if duration == 0 {
        return false;
    }
    schedule.is_free(date, &Span::new(start, end))
}

/// Calendar slots at which the technician could start a `duration` session.
pub fn open_slots(
    calendar: &OperatingCalendar,
    schedule: &Schedule,
    date: NaiveDate,
    duration: Min,
) -> Vec<Min> {
    calendar
        .slots()
        .filter(|&t| available_at(schedule, date, t, duration))
        .collect()
}

/// `window` minus every occupied interval: what is left of the day.
pub fn free_windows(window: Span, occupied: &[Interval]) -> Vec<Span> {
    let mut taken: Vec<Span> = occupied
        .iter()
        .filter(|i| i.span.overlaps(&window))
        .map(|i| i.span)
        .collect();
    taken.sort_by_key(|s| s.start);
    subtract_intervals(&[window], &merge_overlapping(&taken))
}

/// Merge sorted spans so that none overlap or touch.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` from `base`. Both must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}
