use crate::clock::TimeWindow;
use crate::model::*;

/// Free time inside business hours for one (room, date) group, given that
/// group's reservations. Result is sorted and disjoint.
pub fn free_spans(window: &TimeWindow, booked: &[Span]) -> Vec<Span> {
    let mut taken = booked.to_vec();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_intervals(&[window.business_span()], &taken)
}

/// Cut free spans into bookable slots of `window.slot_minutes`.
pub fn slots_in(window: &TimeWindow, free: &[Span]) -> Vec<Span> {
    let step = window.slot_minutes;
    let mut slots = Vec::new();
    for span in free {
        let mut t = span.start.div_ceil(step) * step;
        while t + step <= span.end {
            slots.push(Span::new(t, t + step));
            t += step;
        }
    }
    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
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

/// `base` minus `to_remove`. Both inputs sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
