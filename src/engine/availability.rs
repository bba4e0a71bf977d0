use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Free days of a doctor inside `query`: windows sorted, merged, and clamped.
pub fn availability(windows: &[AvailabilityWindow], query: &DateSpan) -> Vec<DateSpan> {
    let mut spans: Vec<DateSpan> = windows
        .iter()
        .map(|w| w.span)
        .filter(|s| s.overlaps(query))
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_windows(&spans)
        .into_iter()
        .map(|s| DateSpan::new(s.start.max(query.start), s.end.min(query.end)))
        .collect()
}

/// First day of `span` that no window covers, or `None` if fully covered.
pub fn first_uncovered_day(windows: &[AvailabilityWindow], span: &DateSpan) -> Option<NaiveDate> {
    let mut cover: Vec<DateSpan> = windows.iter().map(|w| w.span).collect();
    cover.sort_by_key(|s| s.start);
    uncovered(&[*span], &cover).first().map(|s| s.start)
}

/// Merge sorted date spans that overlap or touch (`end + 1 day == start`).
pub fn merge_windows(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().is_none_or(|next| span.start <= next) {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Days of `base` not covered by `cover`. `cover` must be sorted by start.
pub fn uncovered(base: &[DateSpan], cover: &[DateSpan]) -> Vec<DateSpan> {
    let mut result = Vec::new();

    for &b in base {
        let mut cursor = Some(b.start);
        for c in cover {
            let Some(cur) = cursor else { break };
            if c.end < cur {
                continue;
            }
            if c.start > b.end {
                break;
            }
            if c.start > cur {
                result.push(DateSpan::new(cur, c.start.pred_opt().unwrap_or(cur)));
            }
            cursor = c.end.succ_opt();
        }
        if let Some(cur) = cursor
            && cur <= b.end {
                result.push(DateSpan::new(cur, b.end));
            }
    }

    result
}
