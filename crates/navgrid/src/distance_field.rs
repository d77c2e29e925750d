//! Distance field over the compact heightfield.
//!
//! Measures each span's Chamfer distance to the nearest inter-area
//! boundary, then smooths the field with a 3x3 box blur. The watershed
//! partitioner floods this field from its maxima.

use navgrid_common::Result;

use crate::compact_heightfield::{dir_offset_x, dir_offset_z, CompactHeightfield};
use crate::context::{BuildContext, TimerLabel};

/// Computes the raw chamfer distance field into `src` and returns the
/// maximum distance.
///
/// Boundary seeds are spans with fewer than four connected same-area
/// neighbors; unlike erosion, the comparison is on the area *tag*, so
/// borders between differently tagged walkable surfaces seed too.
fn calculate_distance_field(chf: &CompactHeightfield, src: &mut [u16]) -> u16 {
    let w = chf.width;
    let h = chf.height;

    src.fill(0xffff);

    // Mark boundary spans.
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                let area = chf.areas[i];

                let mut same_area_neighbors = 0;
                for dir in 0..4 {
                    if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                        if area == chf.areas[ni] {
                            same_area_neighbors += 1;
                        }
                    }
                }
                if same_area_neighbors != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    // Forward sweep over (-X, -Z) neighbors and their diagonals.
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];

                if let Some(ai) = chf.neighbor_index(x, z, &span, 0) {
                    src[i] = src[i].min(src[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(0), z + dir_offset_z(0), &aspan, 3)
                    {
                        src[i] = src[i].min(src[bi].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.neighbor_index(x, z, &span, 3) {
                    src[i] = src[i].min(src[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(3), z + dir_offset_z(3), &aspan, 2)
                    {
                        src[i] = src[i].min(src[bi].saturating_add(3));
                    }
                }
            }
        }
    }

    // Backward sweep over (+X, +Z) neighbors and their diagonals.
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];

                if let Some(ai) = chf.neighbor_index(x, z, &span, 2) {
                    src[i] = src[i].min(src[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(2), z + dir_offset_z(2), &aspan, 1)
                    {
                        src[i] = src[i].min(src[bi].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.neighbor_index(x, z, &span, 1) {
                    src[i] = src[i].min(src[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(1), z + dir_offset_z(1), &aspan, 0)
                    {
                        src[i] = src[i].min(src[bi].saturating_add(3));
                    }
                }
            }
        }
    }

    src.iter().copied().max().unwrap_or(0)
}

/// 3x3 box blur over the distance field.
///
/// Spans at or below `threshold * 2` keep their raw value, protecting the
/// boundary seeds. Missing neighbors contribute the center value so the
/// average stays unbiased at edges.
fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16], dst: &mut [u16]) {
    let w = chf.width;
    let h = chf.height;
    let threshold = threshold * 2;

    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                let cd = src[i];
                if cd <= threshold {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as i32;
                for dir in 0..4 {
                    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                        d += src[ai] as i32;
                        let aspan = chf.spans[ai];
                        let dir2 = (dir + 1) & 3;
                        if let Some(bi) = chf.neighbor_index(
                            x + dir_offset_x(dir),
                            z + dir_offset_z(dir),
                            &aspan,
                            dir2,
                        ) {
                            d += src[bi] as i32;
                        } else {
                            d += cd as i32;
                        }
                    } else {
                        d += cd as i32 * 2;
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
}

/// Builds the distance field and stores it on the compact heightfield.
///
/// `chf.max_distance` is the pre-blur maximum; `chf.dist` holds the
/// smoothed field.
pub fn build_distance_field(ctx: &mut BuildContext, chf: &mut CompactHeightfield) -> Result<()> {
    ctx.start_timer(TimerLabel::BuildDistanceField);

    let span_count = chf.span_count();
    let mut src = vec![0u16; span_count];
    let mut dst = vec![0u16; span_count];

    ctx.start_timer(TimerLabel::DistanceFieldDist);
    let max_dist = calculate_distance_field(chf, &mut src);
    chf.max_distance = max_dist;
    ctx.stop_timer(TimerLabel::DistanceFieldDist);

    ctx.start_timer(TimerLabel::DistanceFieldBlur);
    box_blur(chf, 1, &src, &mut dst);
    chf.dist = Some(dst);
    ctx.stop_timer(TimerLabel::DistanceFieldBlur);

    ctx.stop_timer(TimerLabel::BuildDistanceField);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use glam::Vec3;

    fn flat_chf(w: i32, h: i32) -> (BuildContext, CompactHeightfield) {
        let mut ctx = BuildContext::new();
        let mut hf = Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, 10.0, h as f32),
            1.0,
            1.0,
        );
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let chf = CompactHeightfield::build_from_heightfield(&mut ctx, 2, 1, &hf).unwrap();
        (ctx, chf)
    }

    #[test]
    fn test_distance_field_peaks_at_center() {
        let (mut ctx, mut chf) = flat_chf(9, 9);
        build_distance_field(&mut ctx, &mut chf).unwrap();

        let dist = chf.dist.as_ref().unwrap();
        let center = chf.cell(4, 4).index as usize;
        let edge = chf.cell(0, 4).index as usize;

        assert_eq!(dist[edge], 0);
        assert!(dist[center] > 0);
        assert_eq!(dist.iter().copied().max().unwrap() as usize, dist[center] as usize);
        // Two orthogonal steps in from the edge, before blurring, is
        // distance 4; the recorded maximum is the raw peak.
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn test_distance_field_seeds_on_area_borders() {
        let (mut ctx, mut chf) = flat_chf(8, 8);
        // Tag the right half differently: the split line seeds the field
        // even though both halves are walkable.
        for z in 0..8 {
            for x in 4..8 {
                let i = chf.cell(x, z).index as usize;
                chf.areas[i] = 7;
            }
        }
        build_distance_field(&mut ctx, &mut chf).unwrap();

        let dist = chf.dist.as_ref().unwrap();
        for z in 0..8 {
            let left_of_seam = chf.cell(3, z).index as usize;
            let right_of_seam = chf.cell(4, z).index as usize;
            assert_eq!(dist[left_of_seam], 0);
            assert_eq!(dist[right_of_seam], 0);
        }
    }

    #[test]
    fn test_blur_preserves_boundary_seeds() {
        let (mut ctx, mut chf) = flat_chf(10, 10);
        build_distance_field(&mut ctx, &mut chf).unwrap();

        let dist = chf.dist.as_ref().unwrap();
        for z in 0..10 {
            for x in 0..10 {
                let i = chf.cell(x, z).index as usize;
                if x == 0 || z == 0 || x == 9 || z == 9 {
                    assert_eq!(dist[i], 0, "({x}, {z})");
                }
            }
        }
    }
}
