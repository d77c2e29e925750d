//! Sparse voxel heightfield.
//!
//! The heightfield is the first data structure in the pipeline: a dense
//! `width x height` grid of columns, each holding a linked chain of solid
//! spans ordered by ascending height. Spans live in a pooled arena and are
//! addressed by 32-bit keys; freed spans go onto a free list and pools are
//! released in bulk when the heightfield is dropped.

use glam::Vec3;

use navgrid_common::{Error, Result};

/// Highest representable voxel index in a span (13-bit range).
pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

/// Area tag of unwalkable space.
pub const NULL_AREA: u8 = 0;

/// Default area tag of walkable space, the highest-priority tag.
pub const WALKABLE_AREA: u8 = 63;

/// Spans allocated per arena pool.
const SPANS_PER_POOL: usize = 2048;

/// Sentinel span key meaning "no span".
pub(crate) const SPAN_NIL: u32 = u32::MAX;

/// A contiguous range of solid voxels in one column.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    /// Lower voxel index of the solid range
    pub smin: u16,
    /// Upper voxel index of the solid range, `smin < smax <= SPAN_MAX_HEIGHT`
    pub smax: u16,
    /// Area tag, `NULL_AREA` or a walkable tag up to 63
    pub area: u8,
    /// Next span up the column, `SPAN_NIL` at the top
    pub(crate) next: u32,
}

/// Sparse heightfield of solid spans.
#[derive(Debug)]
pub struct Heightfield {
    /// Column count along the x-axis
    pub width: i32,
    /// Column count along the z-axis
    pub height: i32,
    /// Minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// Maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// XZ cell size
    pub cs: f32,
    /// Y voxel height
    pub ch: f32,

    /// Head span key per column, indexed `x + z * width`
    columns: Vec<u32>,
    /// Pool-backed span arena; grows in fixed-size chunks
    spans: Vec<Span>,
    /// Head of the intrusive free list threaded through `next`
    freelist: u32,
}

impl Heightfield {
    /// Creates an empty heightfield covering the given grid.
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![SPAN_NIL; (width.max(0) as usize) * (height.max(0) as usize)],
            spans: Vec::new(),
            freelist: SPAN_NIL,
        }
    }

    /// Pops a span off the free list, growing the arena by one pool when empty.
    fn alloc_span(&mut self) -> u32 {
        if self.freelist == SPAN_NIL {
            let base = self.spans.len();
            self.spans.reserve(SPANS_PER_POOL);
            for i in 0..SPANS_PER_POOL {
                let next = if i + 1 < SPANS_PER_POOL {
                    (base + i + 1) as u32
                } else {
                    SPAN_NIL
                };
                self.spans.push(Span {
                    smin: 0,
                    smax: 0,
                    area: NULL_AREA,
                    next,
                });
            }
            self.freelist = base as u32;
        }
        let key = self.freelist;
        self.freelist = self.spans[key as usize].next;
        key
    }

    /// Returns a span to the free list.
    fn free_span(&mut self, key: u32) {
        self.spans[key as usize].next = self.freelist;
        self.freelist = key;
    }

    pub(crate) fn head_key(&self, x: i32, z: i32) -> u32 {
        self.columns[(x + z * self.width) as usize]
    }

    pub(crate) fn span(&self, key: u32) -> Span {
        self.spans[key as usize]
    }

    pub(crate) fn span_mut(&mut self, key: u32) -> &mut Span {
        &mut self.spans[key as usize]
    }

    /// Iterates the spans of one column from bottom to top.
    pub fn spans_in_column(&self, x: i32, z: i32) -> ColumnSpans<'_> {
        ColumnSpans {
            heightfield: self,
            key: self.head_key(x, z),
        }
    }

    /// Inserts a span into column `(x, z)`, merging overlapping spans.
    ///
    /// Within a column spans stay ordered by ascending `smin` and pairwise
    /// non-overlapping; an insert absorbs every span it overlaps. When the
    /// merged top and an absorbed span's top are within
    /// `flag_merge_threshold` voxels, the larger area tag wins, so walkable
    /// tags survive near-coplanar overlaps.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Err(Error::InvalidMesh(format!(
                "span position ({}, {}) outside {}x{} grid",
                x, z, self.width, self.height
            )));
        }
        if smin > smax || smax > SPAN_MAX_HEIGHT {
            return Err(Error::InvalidMesh(format!(
                "invalid span range [{}, {}]",
                smin, smax
            )));
        }

        let column = (x + z * self.width) as usize;
        let mut new_smin = smin;
        let mut new_smax = smax;
        let mut new_area = area;

        let mut prev = SPAN_NIL;
        let mut cur = self.columns[column];
        while cur != SPAN_NIL {
            let cur_span = self.spans[cur as usize];

            if cur_span.smin > new_smax {
                // Current span starts above the new one; insert before it.
                break;
            }
            if cur_span.smax < new_smin {
                // Current span ends below the new one; keep walking.
                prev = cur;
                cur = cur_span.next;
                continue;
            }

            // Overlap: absorb the current span into the new interval.
            new_smin = new_smin.min(cur_span.smin);
            new_smax = new_smax.max(cur_span.smax);

            if (new_smax as i32 - cur_span.smax as i32).abs() <= flag_merge_threshold {
                new_area = new_area.max(cur_span.area);
            }

            // Unlink and free the absorbed span; the widened interval may
            // swallow further spans, so keep scanning from its successor.
            let next = cur_span.next;
            self.free_span(cur);
            if prev != SPAN_NIL {
                self.spans[prev as usize].next = next;
            } else {
                self.columns[column] = next;
            }
            cur = next;
        }

        // Splice the merged span between prev and the first non-overlapping
        // successor.
        let key = self.alloc_span();
        if prev != SPAN_NIL {
            let next = self.spans[prev as usize].next;
            self.spans[key as usize] = Span {
                smin: new_smin,
                smax: new_smax,
                area: new_area,
                next,
            };
            self.spans[prev as usize].next = key;
        } else {
            let next = self.columns[column];
            self.spans[key as usize] = Span {
                smin: new_smin,
                smax: new_smax,
                area: new_area,
                next,
            };
            self.columns[column] = key;
        }

        Ok(())
    }

    /// Counts walkable spans, the sizing input for compaction.
    pub fn span_count(&self) -> usize {
        let mut count = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                for span in self.spans_in_column(x, z) {
                    if span.area != NULL_AREA {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

/// Iterator over the spans of one column, bottom to top.
pub struct ColumnSpans<'a> {
    heightfield: &'a Heightfield,
    key: u32,
}

impl Iterator for ColumnSpans<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.key == SPAN_NIL {
            return None;
        }
        let span = self.heightfield.span(self.key);
        self.key = span.next;
        Some(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_field() -> Heightfield {
        Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 10.0, 4.0), 1.0, 0.5)
    }

    fn column(hf: &Heightfield, x: i32, z: i32) -> Vec<(u16, u16, u8)> {
        hf.spans_in_column(x, z)
            .map(|s| (s.smin, s.smax, s.area))
            .collect()
    }

    #[test]
    fn test_add_span_simple() {
        let mut hf = test_field();
        hf.add_span(1, 1, 10, 20, WALKABLE_AREA, 1).unwrap();
        assert_eq!(column(&hf, 1, 1), vec![(10, 20, WALKABLE_AREA)]);
        assert_eq!(column(&hf, 0, 0), vec![]);
    }

    #[test]
    fn test_add_span_keeps_order() {
        let mut hf = test_field();
        hf.add_span(0, 0, 30, 40, 1, 1).unwrap();
        hf.add_span(0, 0, 10, 20, 2, 1).unwrap();
        hf.add_span(0, 0, 50, 60, 3, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(10, 20, 2), (30, 40, 1), (50, 60, 3)]);
    }

    #[test]
    fn test_add_span_merges_overlap() {
        let mut hf = test_field();
        hf.add_span(0, 0, 10, 20, 2, 1).unwrap();
        // Tops end up within the merge threshold: the larger tag wins even
        // though the incoming span carries the smaller one.
        hf.add_span(0, 0, 15, 21, 1, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(10, 21, 2)]);
    }

    #[test]
    fn test_add_span_merge_area_threshold() {
        let mut hf = test_field();
        hf.add_span(0, 0, 0, 20, WALKABLE_AREA, 1).unwrap();
        // New span overlaps but ends far above the old top: the old tag
        // does not carry over.
        hf.add_span(0, 0, 15, 30, NULL_AREA, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(0, 30, NULL_AREA)]);
    }

    #[test]
    fn test_add_span_absorbs_multiple() {
        let mut hf = test_field();
        hf.add_span(0, 0, 0, 5, 1, 1).unwrap();
        hf.add_span(0, 0, 10, 15, 1, 1).unwrap();
        hf.add_span(0, 0, 20, 25, 1, 1).unwrap();
        // A wide span swallows all three.
        hf.add_span(0, 0, 3, 22, 1, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(0, 25, 1)]);
    }

    #[test]
    fn test_add_span_rejects_bad_input() {
        let mut hf = test_field();
        assert!(hf.add_span(4, 0, 0, 1, 1, 1).is_err());
        assert!(hf.add_span(0, -1, 0, 1, 1, 1).is_err());
        assert!(hf.add_span(0, 0, 5, 4, 1, 1).is_err());
        assert!(hf.add_span(0, 0, 0, SPAN_MAX_HEIGHT + 1, 1, 1).is_err());
    }

    #[test]
    fn test_freed_spans_are_reused() {
        let mut hf = test_field();
        hf.add_span(0, 0, 0, 5, 1, 1).unwrap();
        hf.add_span(0, 0, 10, 15, 1, 1).unwrap();
        let allocated = hf.spans.len();
        // Merging frees two spans and allocates one; the arena must not grow.
        hf.add_span(0, 0, 2, 12, 1, 1).unwrap();
        assert_eq!(hf.spans.len(), allocated);
        assert_eq!(column(&hf, 0, 0), vec![(0, 15, 1)]);
    }

    #[test]
    fn test_span_count_skips_null_area() {
        let mut hf = test_field();
        hf.add_span(0, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 0, 0, 1, NULL_AREA, 1).unwrap();
        hf.add_span(2, 0, 0, 1, 7, 1).unwrap();
        assert_eq!(hf.span_count(), 2);
    }

    #[test]
    fn test_minimum_height_span_survives() {
        let mut hf = test_field();
        hf.add_span(0, 0, 7, 8, WALKABLE_AREA, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(7, 8, WALKABLE_AREA)]);
    }
}
