use crate::model::*;

// ── Availability Index ────────────────────────────────────────────

/// True iff at least one of the trainer's windows fully contains `span`.
/// A trainer without windows is never available.
pub fn is_available(trainer: &ScopeState, span: &Span) -> bool {
    trainer
        .overlapping(span)
        .any(|i| i.kind == IntervalKind::Window && i.span.contains(span))
}

/// Free time for a trainer inside `query`: windows (merged, clamped) minus
/// confirmed bookings.
pub fn open_slots(trainer: &ScopeState, query: &Span) -> Vec<Span> {
    let mut windows: Vec<Span> = Vec::new();
    let mut booked: Vec<Span> = Vec::new();

    for interval in trainer.overlapping(query) {
        match interval.kind {
            IntervalKind::Window => windows.push(Span::new(
                interval.span.start.max(query.start),
                interval.span.end.min(query.end),
            )),
            IntervalKind::Booking => booked.push(interval.span),
        }
    }

    windows.sort_by_key(|s| s.start);
    let free = merge_overlapping(&windows);
    if booked.is_empty() {
        return free;
    }
    booked.sort_by_key(|s| s.start);
    subtract_intervals(&free, &merge_overlapping(&booked))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted, disjoint) from `base` (sorted, disjoint).
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

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn trainer_with(intervals: &[(Ms, Ms, IntervalKind)]) -> ScopeState {
        let mut st = ScopeState::new(Scope::Trainer(Ulid::new()));
        for &(start, end, kind) in intervals {
            st.insert_interval(Interval {
                id: Ulid::new(),
                span: Span::new(start, end),
                kind,
            });
        }
        st
    }

    // ── is_available ─────────────────────────────────────

    #[test]
    fn no_windows_is_unavailable() {
        let t = trainer_with(&[]);
        assert!(!is_available(&t, &Span::new(9 * H, 10 * H)));
    }

    #[test]
    fn window_must_contain_whole_request() {
        let t = trainer_with(&[(9 * H, 12 * H, IntervalKind::Window)]);
        assert!(is_available(&t, &Span::new(9 * H, 10 * H)));
        assert!(is_available(&t, &Span::new(9 * H, 12 * H)));
        assert!(!is_available(&t, &Span::new(11 * H, 13 * H)));
        assert!(!is_available(&t, &Span::new(8 * H, 9 * H + 30 * M)));
    }

    #[test]
    fn overlapping_windows_are_not_merged_for_containment() {
        // [9,11) and [10,12) together cover [9,12) but neither contains it.
        let t = trainer_with(&[
            (9 * H, 11 * H, IntervalKind::Window),
            (10 * H, 12 * H, IntervalKind::Window),
        ]);
        assert!(is_available(&t, &Span::new(10 * H, 11 * H)));
        assert!(!is_available(&t, &Span::new(9 * H, 12 * H)));
    }

    #[test]
    fn bookings_do_not_open_availability() {
        let t = trainer_with(&[(9 * H, 10 * H, IntervalKind::Booking)]);
        assert!(!is_available(&t, &Span::new(9 * H, 10 * H)));
    }

    // ── open_slots ───────────────────────────────────────

    #[test]
    fn open_slots_punches_out_bookings() {
        let t = trainer_with(&[
            (9 * H, 12 * H, IntervalKind::Window),
            (10 * H, 10 * H + 30 * M, IntervalKind::Booking),
        ]);
        let free = open_slots(&t, &Span::new(0, 24 * H));
        assert_eq!(
            free,
            vec![Span::new(9 * H, 10 * H), Span::new(10 * H + 30 * M, 12 * H)]
        );
    }

    #[test]
    fn open_slots_clamped_to_query() {
        let t = trainer_with(&[(9 * H, 17 * H, IntervalKind::Window)]);
        let free = open_slots(&t, &Span::new(12 * H, 13 * H));
        assert_eq!(free, vec![Span::new(12 * H, 13 * H)]);
    }

    #[test]
    fn open_slots_merges_overlapping_windows() {
        let t = trainer_with(&[
            (9 * H, 11 * H, IntervalKind::Window),
            (10 * H, 12 * H, IntervalKind::Window),
        ]);
        assert_eq!(open_slots(&t, &Span::new(0, 24 * H)), vec![Span::new(9 * H, 12 * H)]);
    }

    #[test]
    fn open_slots_without_windows_is_empty() {
        let t = trainer_with(&[(9 * H, 10 * H, IntervalKind::Booking)]);
        assert!(open_slots(&t, &Span::new(0, 24 * H)).is_empty());
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }
}
