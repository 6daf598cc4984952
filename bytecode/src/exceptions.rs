//! Exception regions and the normalized exception table.
//!
//! While a method is emitted, every `rescue`/`ensure` opens a named
//! region, marks where its handler starts, and closes it after the
//! handler. The collected regions may nest and, when code is re-emitted
//! for ensure bodies, may partially overlap. [`ExceptionTable::normalize`]
//! turns them into a table in which any two entries either nest or are
//! disjoint, ordered so that a first-match scan finds the innermost
//! handler. Code emitted while a region is suspended (an ensure body
//! copied onto a jump out of its own region) is cut out of its protected
//! range.

use core::fmt;
use std::cmp::Reverse;

use log::trace;

use crate::error::AssembleError;

/// One row of the exception table.
///
/// The entry spans `[start, end)`. It protects the offsets in that span
/// that come before `handler`, so a handler never catches its own
/// exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionEntry {
    pub start: u32,
    pub handler: u32,
    pub end: u32,
}

impl ExceptionEntry {
    pub fn new(start: u32, handler: u32, end: u32) -> Self {
        Self {
            start,
            handler,
            end,
        }
    }

    pub fn spans(&self, ip: u32) -> bool {
        self.start <= ip && ip < self.end
    }

    pub fn protects(&self, ip: u32) -> bool {
        self.spans(ip) && ip < self.handler
    }

    /// `other`'s span lies inside ours (equal spans included).
    pub fn contains(&self, other: &ExceptionEntry) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn disjoint(&self, other: &ExceptionEntry) -> bool {
        self.end <= other.start || other.end <= self.start
    }

    /// `self` starts first and ends inside `other`, without nesting.
    fn partially_overlaps(&self, other: &ExceptionEntry) -> bool {
        self.start < other.start
            && other.start < self.end
            && self.end < other.end
    }
}

impl fmt::Display for ExceptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} -> {}", self.start, self.end, self.handler)
    }
}

#[derive(Debug, Clone)]
struct Region {
    name: String,
    start: u32,
    handler: Option<u32>,
    end: Option<u32>,
    /// Finished `[from, to)` stretches that are not protected.
    gaps: Vec<(u32, u32)>,
    suspended: Option<u32>,
}

impl Region {
    fn is_open(&self) -> bool {
        self.handler.is_none() && self.end.is_none()
    }
}

/// Regions handed back by [`RegionTracker::suspend`], to be resumed in
/// reverse order of suspension.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Suspension {
    regions: Vec<usize>,
}

/// What a [`RegionTracker`] collected, in the order regions were opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Regions {
    /// One entry per region, from where it was opened to where it closed.
    pub whole: Vec<ExceptionEntry>,
    /// The stretches actually protected, with suspended code cut out.
    pub protected: Vec<ExceptionEntry>,
}

/// Records region boundaries as code is emitted.
#[derive(Debug, Clone, Default)]
pub struct RegionTracker {
    regions: Vec<Region>,
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&mut self, name: &str) -> Result<&mut Region, AssembleError> {
        self.regions
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| AssembleError::layout(name, "no such region"))
    }

    pub fn open_region(
        &mut self,
        name: &str,
        ip: u32,
    ) -> Result<u32, AssembleError> {
        if self.regions.iter().any(|r| r.name == name) {
            return Err(AssembleError::layout(name, "opened twice"));
        }
        self.regions.push(Region {
            name: name.to_string(),
            start: ip,
            handler: None,
            end: None,
            gaps: Vec::new(),
            suspended: None,
        });
        Ok(ip)
    }

    pub fn mark_handler(
        &mut self,
        name: &str,
        ip: u32,
    ) -> Result<u32, AssembleError> {
        let region = self.find(name)?;
        if region.handler.is_some() {
            return Err(AssembleError::layout(name, "handler marked twice"));
        }
        if region.suspended.is_some() {
            return Err(AssembleError::layout(name, "handler marked while suspended"));
        }
        region.handler = Some(ip);
        Ok(ip)
    }

    pub fn close_region(
        &mut self,
        name: &str,
        ip: u32,
    ) -> Result<u32, AssembleError> {
        let region = self.find(name)?;
        if region.handler.is_none() {
            return Err(AssembleError::layout(
                name,
                "closed before its handler was marked",
            ));
        }
        if region.end.is_some() {
            return Err(AssembleError::layout(name, "closed twice"));
        }
        region.end = Some(ip);
        Ok(ip)
    }

    /// Stop protecting code from `ip` on, for `name` and for every
    /// region opened after it whose protected body is still being emitted.
    pub fn suspend(
        &mut self,
        name: &str,
        ip: u32,
    ) -> Result<Suspension, AssembleError> {
        let first = self
            .regions
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| AssembleError::layout(name, "no such region"))?;
        if !self.regions[first].is_open() {
            return Err(AssembleError::layout(name, "suspended after its handler"));
        }
        let mut regions = Vec::new();
        for (i, region) in self.regions.iter_mut().enumerate().skip(first) {
            if region.is_open() && region.suspended.is_none() {
                trace!("suspending region {} at {ip}", region.name);
                region.suspended = Some(ip);
                regions.push(i);
            }
        }
        Ok(Suspension { regions })
    }

    /// Protect code again from `ip` on.
    pub fn resume(&mut self, suspension: Suspension, ip: u32) -> Result<(), AssembleError> {
        for i in suspension.regions {
            let region = &mut self.regions[i];
            let Some(from) = region.suspended.take() else {
                return Err(AssembleError::layout(&region.name, "resumed twice"));
            };
            region.gaps.push((from, ip));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// All regions in the order they were opened. Fails if one was left
    /// unterminated or suspended.
    pub fn finish(self) -> Result<Regions, AssembleError> {
        let mut out = Regions::default();
        for r in self.regions {
            let (handler, end) = match (r.handler, r.end) {
                (Some(handler), Some(end)) => (handler, end),
                (None, _) => {
                    return Err(AssembleError::layout(&r.name, "handler never marked"));
                }
                (Some(_), None) => {
                    return Err(AssembleError::layout(&r.name, "never closed"));
                }
            };
            if r.suspended.is_some() {
                return Err(AssembleError::layout(&r.name, "never resumed"));
            }
            out.whole.push(ExceptionEntry::new(r.start, handler, end));
            let mut from = r.start;
            for (to, resume) in r.gaps {
                if from < to {
                    out.protected.push(ExceptionEntry::new(from, handler, to));
                }
                from = resume;
            }
            out.protected.push(ExceptionEntry::new(from, handler, end));
        }
        Ok(out)
    }
}

/// Normalized exception table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionTable {
    entries: Vec<ExceptionEntry>,
}

#[derive(Clone, Copy)]
struct Piece {
    entry: ExceptionEntry,
    order: usize,
}

impl ExceptionTable {
    /// Build a table from regions given in the order they were opened.
    pub fn normalize(regions: &[ExceptionEntry]) -> Self {
        let mut pieces: Vec<Piece> = regions
            .iter()
            .enumerate()
            .filter(|(_, e)| e.start < e.end)
            .map(|(order, &entry)| Piece { entry, order })
            .collect();

        split_partial_overlaps(&mut pieces);

        let depths: Vec<usize> = pieces
            .iter()
            .map(|p| {
                pieces
                    .iter()
                    .filter(|q| {
                        q.entry.contains(&p.entry)
                            && (q.entry.start != p.entry.start
                                || q.entry.end != p.entry.end
                                || q.order < p.order)
                    })
                    .count()
            })
            .collect();

        let mut split: Vec<(ExceptionEntry, usize)> = Vec::new();
        for (p, &depth) in pieces.iter().zip(&depths) {
            let outer = p.entry;
            let mut cuts: Vec<u32> = pieces
                .iter()
                .map(|q| q.entry.start)
                .filter(|&s| outer.start < s && s < outer.end)
                .collect();
            cuts.sort_unstable();
            cuts.dedup();
            if !cuts.is_empty() {
                trace!("splitting {outer} at {cuts:?}");
            }
            let mut from = outer.start;
            for to in cuts.into_iter().chain([outer.end]) {
                split.push((
                    ExceptionEntry::new(from, outer.handler, to),
                    depth,
                ));
                from = to;
            }
        }

        split.sort_by_key(|(e, depth)| (e.start, e.end, Reverse(*depth)));
        split.dedup_by_key(|(e, _)| *e);

        Self {
            entries: split.into_iter().map(|(e, _)| e).collect(),
        }
    }

    pub fn entries(&self) -> &[ExceptionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handler offset for an exception raised at `ip`.
    pub fn handler_for(&self, ip: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.protects(ip))
            .map(|e| e.handler)
    }
}

/// Split every region that starts inside another and ends past it at the
/// other's end, until only nesting or disjoint pairs remain.
fn split_partial_overlaps(pieces: &mut Vec<Piece>) {
    loop {
        let mut found = None;
        'scan: for (i, a) in pieces.iter().enumerate() {
            for (j, b) in pieces.iter().enumerate() {
                if a.entry.partially_overlaps(&b.entry) {
                    found = Some((i, j));
                    break 'scan;
                }
            }
        }
        let Some((i, j)) = found else {
            return;
        };
        let at = pieces[i].entry.end;
        let b = pieces[j];
        trace!("region {} overlaps {}, splitting at {at}", pieces[i].entry, b.entry);
        pieces[j].entry.end = at;
        pieces.push(Piece {
            entry: ExceptionEntry::new(at, b.entry.handler, b.entry.end),
            order: b.order,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(regions: &[(u32, u32, u32)]) -> Vec<(u32, u32, u32)> {
        let regions: Vec<_> = regions
            .iter()
            .map(|&(s, h, e)| ExceptionEntry::new(s, h, e))
            .collect();
        ExceptionTable::normalize(&regions)
            .entries()
            .iter()
            .map(|e| (e.start, e.handler, e.end))
            .collect()
    }

    #[test]
    fn tracker_lifecycle() {
        let mut t = RegionTracker::new();
        t.open_region("a", 0).unwrap();
        t.open_region("b", 2).unwrap();
        t.mark_handler("b", 6).unwrap();
        t.close_region("b", 9).unwrap();
        t.mark_handler("a", 12).unwrap();
        t.close_region("a", 20).unwrap();
        let regions = t.finish().unwrap();
        assert_eq!(regions.whole, vec![
            ExceptionEntry::new(0, 12, 20),
            ExceptionEntry::new(2, 6, 9),
        ]);
        assert_eq!(regions.protected, regions.whole);
    }

    #[test]
    fn suspended_code_is_not_protected() {
        let mut t = RegionTracker::new();
        t.open_region("outer", 0).unwrap();
        t.open_region("ensure", 2).unwrap();
        t.open_region("rescue", 4).unwrap();
        let s = t.suspend("ensure", 6).unwrap();
        t.resume(s, 10).unwrap();
        t.mark_handler("rescue", 12).unwrap();
        t.close_region("rescue", 14).unwrap();
        t.mark_handler("ensure", 16).unwrap();
        t.close_region("ensure", 20).unwrap();
        t.mark_handler("outer", 22).unwrap();
        t.close_region("outer", 24).unwrap();
        let regions = t.finish().unwrap();
        assert_eq!(regions.whole[1], ExceptionEntry::new(2, 16, 20));
        assert_eq!(regions.protected, vec![
            ExceptionEntry::new(0, 22, 24),
            ExceptionEntry::new(2, 16, 6),
            ExceptionEntry::new(10, 16, 20),
            ExceptionEntry::new(4, 12, 6),
            ExceptionEntry::new(10, 12, 14),
        ]);

        let table = ExceptionTable::normalize(&regions.protected);
        assert_eq!(table.handler_for(5), Some(12));
        assert_eq!(table.handler_for(7), Some(22));
        assert_eq!(table.handler_for(11), Some(12));
        assert_eq!(table.handler_for(13), Some(16));
    }

    #[test]
    fn nested_suspensions_resume_in_order() {
        let mut t = RegionTracker::new();
        t.open_region("a", 0).unwrap();
        t.open_region("b", 2).unwrap();
        let inner = t.suspend("b", 4).unwrap();
        let outer = t.suspend("a", 6).unwrap();
        t.resume(outer, 8).unwrap();
        t.resume(inner, 10).unwrap();
        t.mark_handler("b", 12).unwrap();
        t.close_region("b", 14).unwrap();
        t.mark_handler("a", 16).unwrap();
        t.close_region("a", 18).unwrap();
        let regions = t.finish().unwrap();
        assert_eq!(regions.protected, vec![
            ExceptionEntry::new(0, 16, 6),
            ExceptionEntry::new(8, 16, 18),
            ExceptionEntry::new(2, 12, 4),
            ExceptionEntry::new(10, 12, 14),
        ]);
    }

    #[test]
    fn suspension_errors() {
        let mut t = RegionTracker::new();
        assert!(t.suspend("x", 0).is_err());
        t.open_region("x", 0).unwrap();
        let s = t.suspend("x", 1).unwrap();
        assert!(t.mark_handler("x", 2).is_err());
        assert!(matches!(
            t.clone().finish(),
            Err(AssembleError::ExceptionLayout { .. })
        ));
        t.resume(s, 3).unwrap();
        t.mark_handler("x", 4).unwrap();
        assert!(t.suspend("x", 5).is_err());
    }

    #[test]
    fn tracker_errors() {
        let mut t = RegionTracker::new();
        assert!(t.mark_handler("x", 0).is_err());
        assert!(t.close_region("x", 0).is_err());
        t.open_region("x", 0).unwrap();
        assert!(t.open_region("x", 1).is_err());
        assert!(t.close_region("x", 3).is_err());
        t.mark_handler("x", 3).unwrap();
        assert!(t.mark_handler("x", 4).is_err());
        t.close_region("x", 5).unwrap();
        assert!(t.close_region("x", 6).is_err());

        let mut t = RegionTracker::new();
        t.open_region("y", 0).unwrap();
        t.mark_handler("y", 2).unwrap();
        assert!(matches!(
            t.finish(),
            Err(AssembleError::ExceptionLayout { .. })
        ));
    }

    #[test]
    fn nested_region_splits_outer() {
        let got = entries(&[(0, 10, 20), (5, 12, 15)]);
        assert_eq!(got, vec![(0, 10, 5), (5, 12, 15), (5, 10, 20)]);
    }

    #[test]
    fn innermost_handler_wins() {
        let regions = [
            ExceptionEntry::new(0, 30, 40),
            ExceptionEntry::new(4, 20, 25),
        ];
        let table = ExceptionTable::normalize(&regions);
        assert_eq!(table.handler_for(2), Some(30));
        assert_eq!(table.handler_for(10), Some(20));
        assert_eq!(table.handler_for(22), Some(30));
        assert_eq!(table.handler_for(35), None);
        assert_eq!(table.handler_for(40), None);
    }

    #[test]
    fn partial_overlap_is_split() {
        let got = entries(&[(0, 6, 10), (5, 12, 15)]);
        assert_eq!(got, vec![(0, 6, 5), (5, 12, 10), (5, 6, 10), (
            10, 12, 15
        )]);
        for (i, a) in got.iter().enumerate() {
            for b in &got[i + 1..] {
                let a = ExceptionEntry::new(a.0, a.1, a.2);
                let b = ExceptionEntry::new(b.0, b.1, b.2);
                assert!(a.disjoint(&b) || a.contains(&b) || b.contains(&a));
            }
        }
    }

    #[test]
    fn identical_spans_prefer_later_region() {
        let got = entries(&[(0, 8, 10), (0, 4, 10)]);
        assert_eq!(got, vec![(0, 4, 10), (0, 8, 10)]);
    }

    #[test]
    fn empty() {
        let table = ExceptionTable::normalize(&[]);
        assert!(table.is_empty());
        assert_eq!(table.handler_for(0), None);
    }
}
