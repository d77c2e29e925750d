//! Area shaping over the compact heightfield.
//!
//! Erosion by agent radius, the 3x3 area median filter, and the volume
//! marking primitives (box, cylinder, convex prism). All of them preserve
//! null-area spans unchanged.

use glam::Vec3;

use navgrid_common::{point_in_poly_xz, Result};

use crate::compact_heightfield::{dir_offset_x, dir_offset_z, CompactHeightfield};
use crate::context::{BuildContext, TimerLabel};
use crate::heightfield::NULL_AREA;

/// Normalized miter length below which a corner is beveled in
/// [`offset_poly`].
const MITER_LIMIT: f32 = 1.20;

/// Shrinks the walkable area away from obstacles by `radius` cells.
///
/// A Chamfer distance transform (orthogonal cost 2, diagonal cost 3, two
/// sweeps) measures each span's distance to the nearest obstacle, where
/// obstacles are null-area spans and spans missing a walkable neighbor in
/// any of the four directions. Spans closer than `2 * radius` lose their
/// area; the factor matches the orthogonal step cost so the threshold is a
/// true radius in cells. A radius of zero is a no-op.
pub fn erode_walkable_area(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    radius: i32,
) -> Result<()> {
    ctx.start_timer(TimerLabel::ErodeArea);

    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![255u8; chf.span_count()];

    // Seed obstacles with distance 0.
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                if chf.areas[i] == NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let span = chf.spans[i];
                let mut walkable_neighbors = 0;
                for dir in 0..4 {
                    if let Some(ni) = chf.neighbor_index(x, z, &span, dir) {
                        if chf.areas[ni] != NULL_AREA {
                            walkable_neighbors += 1;
                        }
                    }
                }
                if walkable_neighbors != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    // Forward sweep: relax from the west and south neighbors and their
    // diagonals.
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];

                if let Some(ai) = chf.neighbor_index(x, z, &span, 0) {
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(0), z + dir_offset_z(0), &aspan, 3)
                    {
                        dist[i] = dist[i].min(dist[bi].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.neighbor_index(x, z, &span, 3) {
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(3), z + dir_offset_z(3), &aspan, 2)
                    {
                        dist[i] = dist[i].min(dist[bi].saturating_add(3));
                    }
                }
            }
        }
    }

    // Backward sweep: relax from the east and north neighbors and their
    // diagonals.
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];

                if let Some(ai) = chf.neighbor_index(x, z, &span, 2) {
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(2), z + dir_offset_z(2), &aspan, 1)
                    {
                        dist[i] = dist[i].min(dist[bi].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.neighbor_index(x, z, &span, 1) {
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    let aspan = chf.spans[ai];
                    if let Some(bi) =
                        chf.neighbor_index(x + dir_offset_x(1), z + dir_offset_z(1), &aspan, 0)
                    {
                        dist[i] = dist[i].min(dist[bi].saturating_add(3));
                    }
                }
            }
        }
    }

    let min_boundary_distance = (radius * 2).min(255) as u8;
    for (area, &d) in chf.areas.iter_mut().zip(dist.iter()) {
        if d < min_boundary_distance {
            *area = NULL_AREA;
        }
    }

    ctx.stop_timer(TimerLabel::ErodeArea);
    Ok(())
}

fn insertion_sort(data: &mut [u8]) {
    for i in 1..data.len() {
        let value = data[i];
        let mut j = i;
        while j > 0 && data[j - 1] > value {
            data[j] = data[j - 1];
            j -= 1;
        }
        data[j] = value;
    }
}

/// Replaces each walkable span's area with the median of its 3x3
/// neighborhood.
///
/// Sample slots are initialized with the span's own area so unconnected
/// directions default to it; diagonals are reached through the
/// orthogonal-then-rotated traversal. The filter reads from the original
/// areas and writes through a scratch buffer, so it is not applied in
/// place. Null-area spans pass through unchanged.
pub fn median_filter_walkable_area(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
) -> Result<()> {
    ctx.start_timer(TimerLabel::MedianArea);

    let w = chf.width;
    let h = chf.height;
    let mut filtered = vec![0u8; chf.span_count()];

    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                if chf.areas[i] == NULL_AREA {
                    filtered[i] = chf.areas[i];
                    continue;
                }

                let mut samples = [chf.areas[i]; 9];
                let span = chf.spans[i];
                for dir in 0..4 {
                    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                        if chf.areas[ai] != NULL_AREA {
                            samples[dir * 2] = chf.areas[ai];
                        }
                        let aspan = chf.spans[ai];
                        let dir2 = (dir + 1) & 3;
                        if let Some(bi) =
                            chf.neighbor_index(x + dir_offset_x(dir), z + dir_offset_z(dir), &aspan, dir2)
                        {
                            if chf.areas[bi] != NULL_AREA {
                                samples[dir * 2 + 1] = chf.areas[bi];
                            }
                        }
                    }
                }
                insertion_sort(&mut samples);
                filtered[i] = samples[4];
            }
        }
    }

    chf.areas.copy_from_slice(&filtered);

    ctx.stop_timer(TimerLabel::MedianArea);
    Ok(())
}

/// Overwrites the area of walkable spans inside a world-space box.
pub fn mark_box_area(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    bmin: Vec3,
    bmax: Vec3,
    area_id: u8,
) -> Result<()> {
    ctx.start_timer(TimerLabel::MarkAreas);

    let w = chf.width;
    let h = chf.height;

    let min_x = ((bmin.x - chf.bmin.x) / chf.cs) as i32;
    let min_y = ((bmin.y - chf.bmin.y) / chf.ch) as i32;
    let min_z = ((bmin.z - chf.bmin.z) / chf.cs) as i32;
    let max_x = ((bmax.x - chf.bmin.x) / chf.cs) as i32;
    let max_y = ((bmax.y - chf.bmin.y) / chf.ch) as i32;
    let max_z = ((bmax.z - chf.bmin.z) / chf.cs) as i32;

    if max_x < 0 || min_x >= w || max_z < 0 || min_z >= h {
        ctx.stop_timer(TimerLabel::MarkAreas);
        return Ok(());
    }
    let min_x = min_x.max(0);
    let max_x = max_x.min(w - 1);
    let min_z = min_z.max(0);
    let max_z = max_z.min(h - 1);

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                if (span.y as i32) < min_y || (span.y as i32) > max_y {
                    continue;
                }
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                chf.areas[i] = area_id;
            }
        }
    }

    ctx.stop_timer(TimerLabel::MarkAreas);
    Ok(())
}

/// Overwrites the area of walkable spans inside a vertical cylinder.
pub fn mark_cylinder_area(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    position: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) -> Result<()> {
    ctx.start_timer(TimerLabel::MarkAreas);

    let w = chf.width;
    let h = chf.height;

    let bb_min = position - Vec3::new(radius, 0.0, radius);
    let bb_max = position + Vec3::new(radius, height, radius);

    let min_x = ((bb_min.x - chf.bmin.x) / chf.cs) as i32;
    let min_y = ((bb_min.y - chf.bmin.y) / chf.ch) as i32;
    let min_z = ((bb_min.z - chf.bmin.z) / chf.cs) as i32;
    let max_x = ((bb_max.x - chf.bmin.x) / chf.cs) as i32;
    let max_y = ((bb_max.y - chf.bmin.y) / chf.ch) as i32;
    let max_z = ((bb_max.z - chf.bmin.z) / chf.cs) as i32;

    if max_x < 0 || min_x >= w || max_z < 0 || min_z >= h {
        ctx.stop_timer(TimerLabel::MarkAreas);
        return Ok(());
    }
    let min_x = min_x.max(0);
    let max_x = max_x.min(w - 1);
    let min_z = min_z.max(0);
    let max_z = max_z.min(h - 1);

    let radius_sq = radius * radius;

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            // Test the cell center against the disc.
            let cell_x = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let cell_z = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            let dx = cell_x - position.x;
            let dz = cell_z - position.z;
            if dx * dx + dz * dz >= radius_sq {
                continue;
            }

            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                if (span.y as i32) >= min_y && (span.y as i32) <= max_y {
                    chf.areas[i] = area_id;
                }
            }
        }
    }

    ctx.stop_timer(TimerLabel::MarkAreas);
    Ok(())
}

/// Overwrites the area of walkable spans inside a convex XZ polygon
/// extruded along Y over `[hmin, hmax]`.
pub fn mark_convex_poly_area(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    verts: &[Vec3],
    hmin: f32,
    hmax: f32,
    area_id: u8,
) -> Result<()> {
    if verts.len() < 3 {
        return Err(navgrid_common::Error::InvalidMesh(format!(
            "convex area polygon needs at least 3 vertices, got {}",
            verts.len()
        )));
    }

    ctx.start_timer(TimerLabel::MarkAreas);

    let w = chf.width;
    let h = chf.height;

    let mut bmin = verts[0];
    let mut bmax = verts[0];
    for v in &verts[1..] {
        bmin = bmin.min(*v);
        bmax = bmax.max(*v);
    }
    bmin.y = hmin;
    bmax.y = hmax;

    let min_x = ((bmin.x - chf.bmin.x) / chf.cs) as i32;
    let min_y = ((bmin.y - chf.bmin.y) / chf.ch) as i32;
    let min_z = ((bmin.z - chf.bmin.z) / chf.cs) as i32;
    let max_x = ((bmax.x - chf.bmin.x) / chf.cs) as i32;
    let max_y = ((bmax.y - chf.bmin.y) / chf.ch) as i32;
    let max_z = ((bmax.z - chf.bmin.z) / chf.cs) as i32;

    if max_x < 0 || min_x >= w || max_z < 0 || min_z >= h {
        ctx.stop_timer(TimerLabel::MarkAreas);
        return Ok(());
    }
    let min_x = min_x.max(0);
    let max_x = max_x.min(w - 1);
    let min_z = min_z.max(0);
    let max_z = max_z.min(h - 1);

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let point = Vec3::new(
                chf.bmin.x + (x as f32 + 0.5) * chf.cs,
                0.0,
                chf.bmin.z + (z as f32 + 0.5) * chf.cs,
            );
            if !point_in_poly_xz(point, verts) {
                continue;
            }

            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                if (span.y as i32) >= min_y && (span.y as i32) <= max_y {
                    chf.areas[i] = area_id;
                }
            }
        }
    }

    ctx.stop_timer(TimerLabel::MarkAreas);
    Ok(())
}

/// Expands a convex polygon outward by `offset` in the XZ plane.
///
/// Miter joins along the edge normals, falling back to a bevel when the
/// normalized miter magnitude drops below the limit at an acute corner.
/// Returns the number of vertices written, or 0 if `max_out_verts` would be
/// exceeded.
pub fn offset_poly(verts: &[Vec3], offset: f32, out_verts: &mut Vec<Vec3>, max_out_verts: usize) -> usize {
    out_verts.clear();
    let n = verts.len();

    for b in 0..n {
        let a = (b + n - 1) % n;
        let c = (b + 1) % n;
        let va = verts[a];
        let vb = verts[b];
        let vc = verts[c];

        let mut dir_prev = vb - va;
        dir_prev.y = 0.0;
        let dir_prev = dir_prev.normalize_or_zero();
        let mut dir_curr = vc - vb;
        dir_curr.y = 0.0;
        let dir_curr = dir_curr.normalize_or_zero();

        let cross = dir_curr.x * dir_prev.z - dir_prev.x * dir_curr.z;

        // CCW perpendiculars of both segments.
        let prev_norm_x = -dir_prev.z;
        let prev_norm_z = dir_prev.x;
        let curr_norm_x = -dir_curr.z;
        let curr_norm_z = dir_curr.x;

        let mut miter_x = (prev_norm_x + curr_norm_x) * 0.5;
        let mut miter_z = (prev_norm_z + curr_norm_z) * 0.5;
        let miter_sq = miter_x * miter_x + miter_z * miter_z;

        let bevel = miter_sq * MITER_LIMIT * MITER_LIMIT < 1.0;

        if miter_sq > 1e-6 {
            let scale = 1.0 / miter_sq;
            miter_x *= scale;
            miter_z *= scale;
        }

        if bevel && cross < 0.0 {
            if out_verts.len() + 2 > max_out_verts {
                return 0;
            }
            let d = (1.0 - (dir_prev.x * dir_curr.x + dir_prev.z * dir_curr.z)) * 0.5;
            out_verts.push(Vec3::new(
                vb.x + (-prev_norm_x + dir_prev.x * d) * offset,
                vb.y,
                vb.z + (-prev_norm_z + dir_prev.z * d) * offset,
            ));
            out_verts.push(Vec3::new(
                vb.x + (-curr_norm_x - dir_curr.x * d) * offset,
                vb.y,
                vb.z + (-curr_norm_z - dir_curr.z * d) * offset,
            ));
        } else {
            if out_verts.len() + 1 > max_out_verts {
                return 0;
            }
            out_verts.push(Vec3::new(
                vb.x - miter_x * offset,
                vb.y,
                vb.z - miter_z * offset,
            ));
        }
    }

    out_verts.len()
}

/// A tagging volume applied to the shaped compact heightfield.
#[derive(Debug, Clone)]
pub enum AreaVolume {
    /// Axis-aligned box in world coordinates
    Box {
        /// Minimum corner
        bmin: Vec3,
        /// Maximum corner
        bmax: Vec3,
        /// Area tag to apply
        area: u8,
    },
    /// Vertical cylinder
    Cylinder {
        /// Center of the base disc
        position: Vec3,
        /// Disc radius
        radius: f32,
        /// Extrusion height
        height: f32,
        /// Area tag to apply
        area: u8,
    },
    /// Convex XZ polygon extruded along Y
    ConvexPoly {
        /// Polygon vertices (XZ footprint)
        verts: Vec<Vec3>,
        /// Lower Y bound
        hmin: f32,
        /// Upper Y bound
        hmax: f32,
        /// Area tag to apply
        area: u8,
    },
}

/// Applies one tagging volume to the compact heightfield.
pub fn mark_volume(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    volume: &AreaVolume,
) -> Result<()> {
    match volume {
        AreaVolume::Box { bmin, bmax, area } => mark_box_area(ctx, chf, *bmin, *bmax, *area),
        AreaVolume::Cylinder {
            position,
            radius,
            height,
            area,
        } => mark_cylinder_area(ctx, chf, *position, *radius, *height, *area),
        AreaVolume::ConvexPoly {
            verts,
            hmin,
            hmax,
            area,
        } => mark_convex_poly_area(ctx, chf, verts, *hmin, *hmax, *area),
    }
}
