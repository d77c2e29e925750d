//! Triangle rasterization into the sparse heightfield.
//!
//! A Sutherland-Hodgman style scanline voxelizer: each triangle is clipped
//! row by row along Z, then cell by cell along X, and every surviving
//! fragment's Y range is quantized into a solid span.

use glam::Vec3;

use navgrid_common::{calc_bounds, overlap_bounds, triangle_normal, Error, Result};

use crate::context::{BuildContext, TimerLabel};
use crate::heightfield::{Heightfield, NULL_AREA, SPAN_MAX_HEIGHT, WALKABLE_AREA};

/// A triangle split along two axes produces at most 7 vertices.
const MAX_CLIP_VERTS: usize = 7;

/// Marks triangles whose slope permits walking.
///
/// Sets `tri_areas[i]` to [`WALKABLE_AREA`] iff the triangle's unit normal
/// satisfies `normal.y > cos(walkable_slope_angle)`. Triangles that fail the
/// test are left untouched, so the output buffer must be pre-initialized by
/// the caller.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    indices: &[u32],
    tri_areas: &mut [u8],
) {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    for (tri, area) in indices.chunks_exact(3).zip(tri_areas.iter_mut()) {
        let n = triangle_normal(
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
        );
        if n.y > walkable_thr {
            *area = WALKABLE_AREA;
        }
    }
}

/// Inverse of [`mark_walkable_triangles`]: nulls out triangles whose slope
/// forbids walking, leaving the rest untouched.
pub fn clear_unwalkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    indices: &[u32],
    tri_areas: &mut [u8],
) {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    for (tri, area) in indices.chunks_exact(3).zip(tri_areas.iter_mut()) {
        let n = triangle_normal(
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
        );
        if n.y <= walkable_thr {
            *area = NULL_AREA;
        }
    }
}

/// Splits a convex polygon by an axis-aligned plane `axis = offset`.
///
/// `out1` receives the part at or below the plane, `out2` the part above.
/// Vertices exactly on the plane are emitted to both sides; crossing points
/// are interpolated once and shared. Returns the two vertex counts.
fn divide_poly(
    input: &[Vec3],
    out1: &mut [Vec3; MAX_CLIP_VERTS],
    out2: &mut [Vec3; MAX_CLIP_VERTS],
    axis_offset: f32,
    axis: usize,
) -> (usize, usize) {
    debug_assert!(input.len() <= MAX_CLIP_VERTS);
    if input.is_empty() {
        return (0, 0);
    }

    // Signed distance of each vertex from the plane; >= 0 is the "below" side.
    let mut delta = [0.0f32; MAX_CLIP_VERTS];
    for (d, v) in delta.iter_mut().zip(input.iter()) {
        *d = axis_offset - v[axis];
    }

    let mut n1 = 0;
    let mut n2 = 0;
    let mut b = input.len() - 1;
    for a in 0..input.len() {
        let same_side = (delta[a] >= 0.0) == (delta[b] >= 0.0);
        if !same_side {
            let s = delta[b] / (delta[b] - delta[a]);
            let crossing = input[b] + (input[a] - input[b]) * s;
            out1[n1] = crossing;
            n1 += 1;
            out2[n2] = crossing;
            n2 += 1;

            // Add vertex a to the side it lies on; on-plane vertices were
            // already emitted through the crossing point.
            if delta[a] > 0.0 {
                out1[n1] = input[a];
                n1 += 1;
            } else if delta[a] < 0.0 {
                out2[n2] = input[a];
                n2 += 1;
            }
        } else {
            if delta[a] >= 0.0 {
                out1[n1] = input[a];
                n1 += 1;
                if delta[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            // On-plane vertices fall through and land on both sides.
            out2[n2] = input[a];
            n2 += 1;
        }
        b = a;
    }

    (n1, n2)
}

/// Rasterizes one triangle into the heightfield.
fn rasterize_tri(
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    let tri_bmin = v0.min(v1).min(v2);
    let tri_bmax = v0.max(v1).max(v2);

    // A triangle outside the heightfield AABB produces no spans.
    if !overlap_bounds(tri_bmin, tri_bmax, heightfield.bmin, heightfield.bmax) {
        return Ok(());
    }

    let w = heightfield.width;
    let h = heightfield.height;
    if w <= 0 || h <= 0 {
        return Ok(());
    }
    let by = heightfield.bmax.y - heightfield.bmin.y;
    let cs = heightfield.cs;
    let inverse_cs = 1.0 / heightfield.cs;
    let inverse_ch = 1.0 / heightfield.ch;

    // Row range covered by the triangle. -1 acts as a clip-only row that
    // cuts the polygon at the grid's lower-Z edge without emitting spans.
    let z0 = (((tri_bmin.z - heightfield.bmin.z) * inverse_cs) as i32).clamp(-1, h - 1);
    let z1 = (((tri_bmax.z - heightfield.bmin.z) * inverse_cs) as i32).clamp(0, h - 1);

    let mut buf_in = [Vec3::ZERO; MAX_CLIP_VERTS];
    let mut buf_row = [Vec3::ZERO; MAX_CLIP_VERTS];
    let mut buf_p1 = [Vec3::ZERO; MAX_CLIP_VERTS];
    let mut buf_p2 = [Vec3::ZERO; MAX_CLIP_VERTS];

    buf_in[0] = v0;
    buf_in[1] = v1;
    buf_in[2] = v2;
    let mut nv_in = 3;

    for z in z0..=z1 {
        // Split off this row's strip; the rest feeds the next iteration.
        let cell_z = heightfield.bmin.z + z as f32 * cs;
        let (nv_row, nv_rem) =
            divide_poly(&buf_in[..nv_in], &mut buf_row, &mut buf_p1, cell_z + cs, 2);
        std::mem::swap(&mut buf_in, &mut buf_p1);
        nv_in = nv_rem;

        if nv_row < 3 || z < 0 {
            continue;
        }

        // Column range covered by the strip.
        let mut min_x = buf_row[0].x;
        let mut max_x = buf_row[0].x;
        for v in &buf_row[1..nv_row] {
            min_x = min_x.min(v.x);
            max_x = max_x.max(v.x);
        }
        let x0 = ((min_x - heightfield.bmin.x) * inverse_cs) as i32;
        let x1 = ((max_x - heightfield.bmin.x) * inverse_cs) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        let mut nv2 = nv_row;
        for x in x0..=x1 {
            // Split off this cell's fragment; the rest moves right.
            let cell_x = heightfield.bmin.x + x as f32 * cs;
            let (nv, nv_rem) =
                divide_poly(&buf_row[..nv2], &mut buf_p1, &mut buf_p2, cell_x + cs, 0);
            std::mem::swap(&mut buf_row, &mut buf_p2);
            nv2 = nv_rem;

            if nv < 3 || x < 0 {
                continue;
            }

            // Y extent of the fragment, relative to the heightfield bottom.
            let mut span_min = buf_p1[0].y;
            let mut span_max = buf_p1[0].y;
            for v in &buf_p1[1..nv] {
                span_min = span_min.min(v.y);
                span_max = span_max.max(v.y);
            }
            span_min -= heightfield.bmin.y;
            span_max -= heightfield.bmin.y;

            if span_max < 0.0 || span_min > by {
                continue;
            }
            let span_min = span_min.max(0.0);
            let span_max = span_max.min(by);

            // Quantize with floor/ceil so thin slabs are not lost, and keep
            // every span at least one voxel tall.
            let smin = ((span_min * inverse_ch).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32);
            let smax =
                ((span_max * inverse_ch).ceil() as i32).clamp(smin + 1, SPAN_MAX_HEIGHT as i32);

            heightfield.add_span(x, z, smin as u16, smax as u16, area, flag_merge_threshold)?;
        }
    }

    Ok(())
}

/// Rasterizes a single triangle.
pub fn rasterize_triangle(
    ctx: &mut BuildContext,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    ctx.start_timer(TimerLabel::RasterizeTriangles);
    let result = rasterize_tri(v0, v1, v2, area, heightfield, flag_merge_threshold);
    ctx.stop_timer(TimerLabel::RasterizeTriangles);
    result
}

fn validate_triangles(verts: &[Vec3], tri_count: usize, tri_areas: &[u8]) -> Result<()> {
    if tri_areas.len() < tri_count {
        return Err(Error::InvalidMesh(format!(
            "{} triangles but only {} area tags",
            tri_count,
            tri_areas.len()
        )));
    }
    if verts.is_empty() && tri_count > 0 {
        return Err(Error::InvalidMesh("no vertices".to_string()));
    }
    Ok(())
}

/// Rasterizes an indexed triangle list.
pub fn rasterize_triangles(
    ctx: &mut BuildContext,
    verts: &[Vec3],
    indices: &[u32],
    tri_areas: &[u8],
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    if indices.len() % 3 != 0 {
        return Err(Error::InvalidMesh(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    let tri_count = indices.len() / 3;
    validate_triangles(verts, tri_count, tri_areas)?;
    for (i, tri) in indices.chunks_exact(3).enumerate() {
        for &idx in tri {
            if idx as usize >= verts.len() {
                return Err(Error::InvalidMesh(format!(
                    "triangle index {} out of bounds (max {})",
                    idx,
                    verts.len() - 1
                )));
            }
        }
        rasterize_triangle(
            ctx,
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
            tri_areas[i],
            heightfield,
            flag_merge_threshold,
        )?;
    }
    Ok(())
}

/// Rasterizes an indexed triangle list with 16-bit indices.
pub fn rasterize_triangles_u16(
    ctx: &mut BuildContext,
    verts: &[Vec3],
    indices: &[u16],
    tri_areas: &[u8],
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    let widened: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    rasterize_triangles(ctx, verts, &widened, tri_areas, heightfield, flag_merge_threshold)
}

/// Rasterizes an unindexed triangle soup: every three vertices form one
/// triangle.
pub fn rasterize_triangle_soup(
    ctx: &mut BuildContext,
    verts: &[Vec3],
    tri_areas: &[u8],
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    if verts.len() % 3 != 0 {
        return Err(Error::InvalidMesh(format!(
            "vertex count {} is not a multiple of 3",
            verts.len()
        )));
    }
    let tri_count = verts.len() / 3;
    validate_triangles(verts, tri_count, tri_areas)?;
    for (i, tri) in verts.chunks_exact(3).enumerate() {
        rasterize_triangle(
            ctx,
            tri[0],
            tri[1],
            tri[2],
            tri_areas[i],
            heightfield,
            flag_merge_threshold,
        )?;
    }
    Ok(())
}

/// Computes the bounds of a vertex soup; re-exported convenience for setting
/// up a heightfield around arbitrary input geometry.
pub fn calc_mesh_bounds(verts: &[Vec3]) -> (Vec3, Vec3) {
    calc_bounds(verts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_field() -> Heightfield {
        Heightfield::new(
            10,
            10,
            Vec3::ZERO,
            Vec3::new(10.0, 10.0, 10.0),
            1.0,
            0.5,
        )
    }

    #[test]
    fn test_divide_poly_splits_triangle() {
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        let mut out1 = [Vec3::ZERO; MAX_CLIP_VERTS];
        let mut out2 = [Vec3::ZERO; MAX_CLIP_VERTS];
        let (n1, n2) = divide_poly(&tri, &mut out1, &mut out2, 2.0, 0);

        // Left part is a quad, right part a triangle.
        assert_eq!(n1, 4);
        assert_eq!(n2, 3);
        for v in &out1[..n1] {
            assert!(v.x <= 2.0 + 1e-5);
        }
        for v in &out2[..n2] {
            assert!(v.x >= 2.0 - 1e-5);
        }
    }

    #[test]
    fn test_divide_poly_all_on_one_side() {
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let mut out1 = [Vec3::ZERO; MAX_CLIP_VERTS];
        let mut out2 = [Vec3::ZERO; MAX_CLIP_VERTS];
        let (n1, n2) = divide_poly(&tri, &mut out1, &mut out2, 5.0, 0);
        assert_eq!(n1, 3);
        assert_eq!(n2, 0);
    }

    #[test]
    fn test_rasterize_triangle_outside_bounds() {
        let mut hf = flat_field();
        let mut ctx = BuildContext::new();
        rasterize_triangle(
            &mut ctx,
            Vec3::new(20.0, 0.0, 20.0),
            Vec3::new(25.0, 0.0, 20.0),
            Vec3::new(20.0, 0.0, 25.0),
            WALKABLE_AREA,
            &mut hf,
            1,
        )
        .unwrap();
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn test_rasterize_flat_quad_fills_grid() {
        let mut hf = flat_field();
        let mut ctx = BuildContext::new();
        let verts = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(0.0, 0.0, 10.0),
        ];
        let indices = [0u32, 2, 1, 0, 3, 2];
        let areas = [WALKABLE_AREA; 2];
        rasterize_triangles(&mut ctx, &verts, &indices, &areas, &mut hf, 1).unwrap();

        // Every column carries exactly one single-voxel span at the bottom.
        assert_eq!(hf.span_count(), 100);
        for z in 0..10 {
            for x in 0..10 {
                let spans: Vec<_> = hf.spans_in_column(x, z).collect();
                assert_eq!(spans.len(), 1, "column ({x}, {z})");
                assert_eq!(spans[0].smin, 0);
                assert_eq!(spans[0].smax, 1);
                assert_eq!(spans[0].area, WALKABLE_AREA);
            }
        }
        assert!(ctx.accumulated_us(TimerLabel::RasterizeTriangles) > 0);
    }

    #[test]
    fn test_rasterize_quantizes_heights() {
        let mut hf = flat_field();
        let mut ctx = BuildContext::new();
        // A flat triangle at y = 1.7 with ch = 0.5 lands in voxels [3, 4].
        rasterize_triangle(
            &mut ctx,
            Vec3::new(0.2, 1.7, 0.2),
            Vec3::new(0.8, 1.7, 0.2),
            Vec3::new(0.2, 1.7, 0.8),
            WALKABLE_AREA,
            &mut hf,
            1,
        )
        .unwrap();
        let spans: Vec<_> = hf.spans_in_column(0, 0).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].smin, 3);
        assert_eq!(spans[0].smax, 4);
    }

    #[test]
    fn test_rasterize_rejects_mismatched_input() {
        let mut hf = flat_field();
        let mut ctx = BuildContext::new();
        let verts = [Vec3::ZERO, Vec3::X, Vec3::Z];
        assert!(rasterize_triangles(&mut ctx, &verts, &[0, 1], &[1], &mut hf, 1).is_err());
        assert!(rasterize_triangles(&mut ctx, &verts, &[0, 1, 5], &[1], &mut hf, 1).is_err());
        assert!(rasterize_triangles(&mut ctx, &verts, &[0, 1, 2], &[], &mut hf, 1).is_err());
    }

    #[test]
    fn test_mark_walkable_triangles() {
        let verts = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        // One flat triangle, one vertical wall.
        let indices = [0u32, 1, 2, 0, 3, 1];
        let mut areas = [NULL_AREA; 2];
        mark_walkable_triangles(45.0, &verts, &indices, &mut areas);
        assert_eq!(areas[0], WALKABLE_AREA);
        assert_eq!(areas[1], NULL_AREA);

        let mut areas = [WALKABLE_AREA; 2];
        clear_unwalkable_triangles(45.0, &verts, &indices, &mut areas);
        assert_eq!(areas[0], WALKABLE_AREA);
        assert_eq!(areas[1], NULL_AREA);
    }
}
