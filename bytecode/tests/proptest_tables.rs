//! Property-based tests for the line table and exception table.
//!
//! - line ranges tile `[0, final_offset)` without gaps or overlaps
//! - normalized exception entries nest or are disjoint
//! - normalization never changes which offsets are protected

use bytecode::{ExceptionEntry, ExceptionTable, LineTableBuilder, line_for};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Line marks at non-decreasing offsets, plus a final offset past them.
fn arb_marks() -> impl Strategy<Value = (Vec<(u32, u32)>, u32)> {
    (prop::collection::vec((0u32..8, 1u32..50), 0..20), 1u32..10).prop_map(
        |(steps, tail)| {
            let mut ip = 0;
            let marks = steps
                .into_iter()
                .map(|(step, line)| {
                    ip += step;
                    (ip, line)
                })
                .collect();
            (marks, ip + tail)
        },
    )
}

fn arb_region() -> impl Strategy<Value = ExceptionEntry> {
    (0u32..60, 1u32..30, 0u32..=100).prop_map(|(start, len, frac)| {
        let end = start + len;
        let handler = start + len * frac / 100;
        ExceptionEntry::new(start, handler, end)
    })
}

// =============================================================================
// Line table
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn line_ranges_cover_stream((marks, end) in arb_marks()) {
        let mut b = LineTableBuilder::new(1);
        for &(ip, line) in &marks {
            b.mark(ip, line);
        }
        let table = b.finish(end);
        let entries = table.entries();

        prop_assert!(!entries.is_empty());
        prop_assert_eq!(entries[0].start, 0);
        prop_assert_eq!(entries[entries.len() - 1].end, end);
        for w in entries.windows(2) {
            prop_assert_eq!(w[0].end, w[1].start);
        }
        for e in entries {
            prop_assert!(e.start < e.end);
        }

        let encoded = table.encode();
        for ip in 0..end {
            prop_assert!(table.line_at(ip).is_some());
            prop_assert_eq!(line_for(&encoded, ip), table.line_at(ip));
        }
    }

    /// The last mark at or before an offset decides its line.
    #[test]
    fn line_at_follows_marks((marks, end) in arb_marks()) {
        let mut b = LineTableBuilder::new(1);
        for &(ip, line) in &marks {
            b.mark(ip, line);
        }
        let table = b.finish(end);
        for ip in 0..end {
            let expected = marks
                .iter()
                .rev()
                .find(|(at, _)| *at <= ip)
                .map(|(_, line)| *line)
                .unwrap_or(1);
            prop_assert_eq!(table.line_at(ip), Some(expected));
        }
    }
}

// =============================================================================
// Exception table
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn entries_nest_or_are_disjoint(
        regions in prop::collection::vec(arb_region(), 0..6),
    ) {
        let table = ExceptionTable::normalize(&regions);
        let entries = table.entries();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                prop_assert!(
                    a.disjoint(b) || a.contains(b) || b.contains(a),
                    "{} and {} partially overlap", a, b
                );
            }
        }
        for w in entries.windows(2) {
            prop_assert!((w[0].start, w[0].end) <= (w[1].start, w[1].end));
        }
    }

    #[test]
    fn protection_is_preserved(
        regions in prop::collection::vec(arb_region(), 0..6),
    ) {
        let table = ExceptionTable::normalize(&regions);
        for ip in 0..100 {
            let protecting: Vec<u32> = regions
                .iter()
                .filter(|r| r.protects(ip))
                .map(|r| r.handler)
                .collect();
            match table.handler_for(ip) {
                Some(h) => prop_assert!(protecting.contains(&h)),
                None => prop_assert!(protecting.is_empty()),
            }
        }
    }

    /// With strictly nested regions the innermost handler is chosen.
    #[test]
    fn innermost_wins_for_nested(depth in 1usize..6, ip_pick in 0u32..100) {
        let regions: Vec<ExceptionEntry> = (0..depth as u32)
            .map(|d| ExceptionEntry::new(d * 2, 50 - d * 2, 100 - d * 2))
            .collect();
        let table = ExceptionTable::normalize(&regions);
        let innermost = regions.iter().rev().find(|r| r.protects(ip_pick));
        prop_assert_eq!(table.handler_for(ip_pick), innermost.map(|r| r.handler));
    }
}
