//! Compact heightfield: open space above walkable surfaces.
//!
//! Compaction turns the sparse heightfield's per-column span chains into
//! dense arrays. Each compact span represents the open space above a
//! walkable solid surface, not the solid itself, and carries four-direction
//! neighbor links encoded as 6-bit layer indices.

use glam::Vec3;

use navgrid_common::Result;

use crate::context::{BuildContext, LogCategory, TimerLabel};
use crate::heightfield::{Heightfield, NULL_AREA};

/// Sentinel for an unconnected direction in the 6-bit link encoding.
pub const NOT_CONNECTED: u32 = 0x3f;

/// Highest encodable layer index inside a neighbor column.
pub const MAX_LAYERS: u32 = NOT_CONNECTED - 1;

/// Bit flagging a region id as a tile-border region.
pub const BORDER_REGION: u16 = 0x8000;

/// X offset of direction `dir` (0 = -X, 1 = +Z, 2 = +X, 3 = -Z).
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    [-1, 0, 1, 0][dir & 3]
}

/// Z offset of direction `dir`.
#[inline]
pub fn dir_offset_z(dir: usize) -> i32 {
    [0, 1, 0, -1][dir & 3]
}

/// A run of compact spans inside one column.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the column's first span in the flat span array
    pub index: u32,
    /// Number of spans in the column
    pub count: u8,
}

/// Open space above one walkable surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSpan {
    /// Floor height in voxels (top of the underlying solid)
    pub y: u16,
    /// Region label, 0 when unassigned
    pub reg: u16,
    /// Packed 4 x 6-bit neighbor layer indices
    con: u32,
    /// Open-space height above the floor, saturated at 255
    pub h: u8,
}

impl CompactSpan {
    /// Neighbor layer index in direction `dir`, or [`NOT_CONNECTED`].
    #[inline]
    pub fn con(&self, dir: usize) -> u32 {
        (self.con >> (dir * 6)) & 0x3f
    }

    /// Sets the neighbor link in direction `dir`.
    #[inline]
    pub fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }
}

/// Array-of-structs heightfield of open space, the pipeline's final product.
#[derive(Debug)]
pub struct CompactHeightfield {
    /// Column count along the x-axis
    pub width: i32,
    /// Column count along the z-axis
    pub height: i32,
    /// Agent clearance in voxels used to build the connections
    pub walkable_height: i32,
    /// Agent climb in voxels used to build the connections
    pub walkable_climb: i32,
    /// Border strip width painted by the partitioner, in cells
    pub border_size: i32,
    /// Maximum distance field value, set by the distance field builder
    pub max_distance: u16,
    /// Highest region id after partitioning
    pub max_regions: u16,
    /// Minimum bounds; `bmax.y` is extended upward by agent height
    pub bmin: Vec3,
    /// Maximum bounds
    pub bmax: Vec3,
    /// XZ cell size
    pub cs: f32,
    /// Y voxel height
    pub ch: f32,
    /// Per-column span runs, indexed `x + z * width`
    pub cells: Vec<CompactCell>,
    /// Flat span array
    pub spans: Vec<CompactSpan>,
    /// Per-span area tags, parallel to `spans`
    pub areas: Vec<u8>,
    /// Per-span boundary distances, present after the distance field pass
    pub dist: Option<Vec<u16>>,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from a filtered sparse heightfield.
    ///
    /// Walkable spans become compact spans; null-area spans are dropped.
    /// Neighbor links require a shared clearance of at least
    /// `walkable_height` and a floor delta within `walkable_climb`. A
    /// column with more than 63 spans cannot encode links to its upper
    /// layers; that condition is logged as an error and the affected
    /// directions stay unconnected.
    pub fn build_from_heightfield(
        ctx: &mut BuildContext,
        walkable_height: i32,
        walkable_climb: i32,
        heightfield: &Heightfield,
    ) -> Result<Self> {
        ctx.start_timer(TimerLabel::BuildCompactHeightfield);

        let w = heightfield.width;
        let h = heightfield.height;
        let span_count = heightfield.span_count();

        let mut chf = CompactHeightfield {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: heightfield.bmin,
            // The top open region is unbounded in the source field; extend
            // the bounds to cover the agent standing on the highest floor.
            bmax: heightfield.bmax + Vec3::new(0.0, walkable_height as f32 * heightfield.ch, 0.0),
            cs: heightfield.cs,
            ch: heightfield.ch,
            cells: vec![CompactCell::default(); (w * h) as usize],
            spans: vec![CompactSpan::default(); span_count],
            areas: vec![NULL_AREA; span_count],
            dist: None,
        };

        const MAX_HEIGHT: i32 = 0xffff;

        // Fill pass: emit one compact span per walkable solid span, with the
        // floor at the solid's top and the height up to the next solid.
        let mut cursor = 0usize;
        for z in 0..h {
            for x in 0..w {
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = cursor as u32;
                cell.count = 0;

                let mut spans = heightfield.spans_in_column(x, z).peekable();
                while let Some(span) = spans.next() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = spans.peek().map(|s| s.smin as i32).unwrap_or(MAX_HEIGHT);
                    chf.spans[cursor].y = bot.clamp(0, 0xffff) as u16;
                    chf.spans[cursor].h = (top - bot).clamp(0, 0xff) as u8;
                    chf.areas[cursor] = span.area;
                    cursor += 1;
                    cell.count += 1;
                }
            }
        }

        // Link pass: find the first traversable neighbor layer per direction.
        let mut max_layer_index = 0u32;
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                    for dir in 0..4 {
                        chf.spans[i].set_con(dir, NOT_CONNECTED);
                        let nx = x + dir_offset_x(dir);
                        let nz = z + dir_offset_z(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let ncell = chf.cells[(nx + nz * w) as usize];
                        for k in
                            ncell.index as usize..(ncell.index as usize + ncell.count as usize)
                        {
                            let span = chf.spans[i];
                            let nspan = chf.spans[k];
                            let bot = span.y.max(nspan.y) as i32;
                            let top =
                                (span.y as i32 + span.h as i32).min(nspan.y as i32 + nspan.h as i32);

                            if top - bot >= walkable_height
                                && (nspan.y as i32 - span.y as i32).abs() <= walkable_climb
                            {
                                let layer = (k - ncell.index as usize) as u32;
                                if layer > MAX_LAYERS {
                                    max_layer_index = max_layer_index.max(layer);
                                    continue;
                                }
                                chf.spans[i].set_con(dir, layer);
                                break;
                            }
                        }
                    }
                }
            }
        }

        if max_layer_index > MAX_LAYERS {
            ctx.log(
                LogCategory::Error,
                format!(
                    "heightfield has too many layers: {} (max {})",
                    max_layer_index, MAX_LAYERS
                ),
            );
        }

        ctx.stop_timer(TimerLabel::BuildCompactHeightfield);
        Ok(chf)
    }

    /// The total number of compact spans, for downstream sizing.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// The cell at column `(x, z)`.
    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Global index of the span connected to `span` (located at `(x, z)`)
    /// in direction `dir`, if any.
    ///
    /// The encoding guarantees the neighbor column is inside the grid.
    #[inline]
    pub fn neighbor_index(&self, x: i32, z: i32, span: &CompactSpan, dir: usize) -> Option<usize> {
        let con = span.con(dir);
        if con == NOT_CONNECTED {
            return None;
        }
        let nx = x + dir_offset_x(dir);
        let nz = z + dir_offset_z(dir);
        Some(self.cell(nx, nz).index as usize + con as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 20.0, h as f32), 1.0, 1.0)
    }

    #[test]
    fn test_compaction_drops_null_spans() {
        let mut hf = field(2, 1);
        let mut ctx = BuildContext::new();
        hf.add_span(0, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 5, 6, NULL_AREA, 1).unwrap();
        hf.add_span(1, 0, 0, 1, WALKABLE_AREA, 1).unwrap();

        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();

        assert_eq!(chf.span_count(), 2);
        assert_eq!(chf.cell(0, 0).count, 1);
        // The open space above the floor is bounded by the null solid above.
        let s = chf.spans[chf.cell(0, 0).index as usize];
        assert_eq!(s.y, 1);
        assert_eq!(s.h, 4);
    }

    #[test]
    fn test_top_space_extends_bounds() {
        let mut hf = field(1, 1);
        let mut ctx = BuildContext::new();
        hf.add_span(0, 0, 0, 1, WALKABLE_AREA, 1).unwrap();

        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 4, 1, &hf).unwrap();

        assert_eq!(chf.bmax.y, hf.bmax.y + 4.0 * hf.ch);
        assert_eq!(chf.spans[0].h, 0xff);
    }

    #[test]
    fn test_connections_are_symmetric() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }

        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();

        for z in 0..3 {
            for x in 0..3 {
                let cell = chf.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count as u32) as usize {
                    let span = chf.spans[i];
                    for dir in 0..4 {
                        if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                            // The reverse link in the opposite direction must
                            // point back at us.
                            let nx = x + dir_offset_x(dir);
                            let nz = z + dir_offset_z(dir);
                            let nspan = chf.spans[ni];
                            let back = chf.neighbor_index(nx, nz, &nspan, dir ^ 2);
                            assert_eq!(back, Some(i));
                        }
                    }
                }
            }
        }

        // The center span is fully connected, corners have two links.
        let center = chf.spans[chf.cell(1, 1).index as usize];
        assert!((0..4).all(|d| center.con(d) != NOT_CONNECTED));
        let corner = chf.spans[chf.cell(0, 0).index as usize];
        assert_eq!(
            (0..4).filter(|&d| corner.con(d) != NOT_CONNECTED).count(),
            2
        );
    }

    #[test]
    fn test_climb_limits_connections() {
        let mut hf = field(2, 1);
        let mut ctx = BuildContext::new();
        hf.add_span(0, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 0, 0, 4, WALKABLE_AREA, 1).unwrap();

        // Step of 3 voxels with climb 1: no link either way.
        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();
        assert_eq!(chf.spans[0].con(2), NOT_CONNECTED);
        assert_eq!(chf.spans[1].con(0), NOT_CONNECTED);

        // Climb 3 allows it.
        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 3, &hf).unwrap();
        assert_ne!(chf.spans[0].con(2), NOT_CONNECTED);
        assert_ne!(chf.spans[1].con(0), NOT_CONNECTED);
    }

    #[test]
    fn test_clearance_limits_connections() {
        let mut hf = field(2, 1);
        let mut ctx = BuildContext::new();
        // Neighbor has a ceiling 2 voxels above the shared floor.
        hf.add_span(0, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 0, 3, 6, WALKABLE_AREA, 1).unwrap();

        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 4, 1, &hf).unwrap();
        let first = chf.cell(0, 0).index as usize;
        assert_eq!(chf.spans[first].con(2), NOT_CONNECTED);

        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();
        let first = chf.cell(0, 0).index as usize;
        assert_ne!(chf.spans[first].con(2), NOT_CONNECTED);
    }

    #[test]
    fn test_minimum_height_span_survives_compaction() {
        let mut hf = field(1, 1);
        let mut ctx = BuildContext::new();
        hf.add_span(0, 0, 7, 8, WALKABLE_AREA, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();
        assert_eq!(chf.span_count(), 1);
        assert_eq!(chf.spans[0].y, 8);
    }
}
