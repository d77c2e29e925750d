//! Region partitioning over the compact heightfield.
//!
//! Three interchangeable strategies label every walkable compact span with
//! a 16-bit region id: distance-field watershed, monotone row sweeps, and
//! the layered variant used for layer extraction. All of them share the
//! border-painting preamble and write their results into
//! `CompactSpan::reg`.

use std::collections::VecDeque;

use navgrid_common::{Error, Result};

use crate::compact_heightfield::{
    dir_offset_x, dir_offset_z, CompactHeightfield, BORDER_REGION,
};
use crate::context::{BuildContext, TimerLabel};
use crate::heightfield::NULL_AREA;

/// Sentinel row-sweep neighbor meaning "no consistent neighbor".
const NULL_NEI: u16 = 0xffff;

/// Safety cap on contour-walk iterations; hitting it means the region
/// topology is malformed.
const MAX_CONTOUR_ITERS: i32 = 40_000;

/// A span queued for watershed processing.
#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    /// Span index, or -1 once the entry has been handled
    index: i32,
}

/// Paints every walkable span in a cell rectangle with a region id.
fn paint_rect_region(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    reg_id: u16,
) {
    for z in min_z..max_z {
        for x in min_x..max_x {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

/// Seed-fills a new region from `(x, z, i)` at the given water level.
///
/// Expansion follows 4-neighbors of the seed's area whose distance is at or
/// above `level - 2` and which are still unassigned. Every expanded span is
/// checked against its 8-neighborhood: touching a different non-border
/// region unlabels the span again, keeping basins from leaking into each
/// other. Returns whether at least one span kept the new id.
#[allow(clippy::too_many_arguments)]
fn flood_region(
    chf: &CompactHeightfield,
    dist: &[u16],
    x: i32,
    z: i32,
    i: usize,
    level: u16,
    reg_id: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let area = chf.areas[i];

    stack.clear();
    stack.push(LevelStackEntry {
        x,
        z,
        index: i as i32,
    });
    src_reg[i] = reg_id;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(entry) = stack.pop() {
        let cx = entry.x;
        let cz = entry.z;
        let ci = entry.index as usize;
        let cspan = chf.spans[ci];

        // Conflict check over the 8-neighborhood.
        let mut conflict_reg = 0u16;
        'dirs: for dir in 0..4 {
            if let Some(ai) = chf.neighbor_index(cx, cz, &cspan, dir) {
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr & BORDER_REGION != 0 {
                    continue;
                }
                if nr != 0 && nr != reg_id {
                    conflict_reg = nr;
                    break 'dirs;
                }

                let aspan = chf.spans[ai];
                let dir2 = (dir + 1) & 3;
                if let Some(bi) = chf.neighbor_index(
                    cx + dir_offset_x(dir),
                    cz + dir_offset_z(dir),
                    &aspan,
                    dir2,
                ) {
                    if chf.areas[bi] != area {
                        continue;
                    }
                    let nr2 = src_reg[bi];
                    if nr2 != 0 && nr2 != reg_id {
                        conflict_reg = nr2;
                        break 'dirs;
                    }
                }
            }
        }
        if conflict_reg != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        // Expand to eligible 4-neighbors.
        for dir in 0..4 {
            if let Some(ai) = chf.neighbor_index(cx, cz, &cspan, dir) {
                if chf.areas[ai] != area {
                    continue;
                }
                if dist[ai] >= lev && src_reg[ai] == 0 {
                    src_reg[ai] = reg_id;
                    src_dist[ai] = 0;
                    stack.push(LevelStackEntry {
                        x: cx + dir_offset_x(dir),
                        z: cz + dir_offset_z(dir),
                        index: ai as i32,
                    });
                }
            }
        }
    }

    count > 0
}

/// A deferred region assignment produced during one expansion sweep.
struct DirtyEntry {
    index: usize,
    region: u16,
    distance: u16,
}

/// Grows existing regions into unassigned spans.
///
/// Each pass scans the stack, picking for every pending span the neighbor
/// region with the smallest propagated distance; assignments are batched
/// and applied together so a pass sees a consistent snapshot. With
/// `fill_stack`, the stack is rebuilt from every unassigned walkable span
/// at or above `level`. Iteration is capped by `max_iter` while `level > 0`.
#[allow(clippy::too_many_arguments)]
fn expand_regions(
    chf: &CompactHeightfield,
    dist: &[u16],
    max_iter: i32,
    level: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    let w = chf.width;
    let h = chf.height;

    if fill_stack {
        stack.clear();
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cell(x, z);
                for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                    if dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA {
                        stack.push(LevelStackEntry {
                            x,
                            z,
                            index: i as i32,
                        });
                    }
                }
            }
        }
    } else {
        // Mark entries that gained a region since the stack was built.
        for entry in stack.iter_mut() {
            if entry.index >= 0 && src_reg[entry.index as usize] != 0 {
                entry.index = -1;
            }
        }
    }

    let mut dirty = Vec::new();
    let mut iter = 0;
    loop {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            if entry.index < 0 {
                failed += 1;
                continue;
            }
            let i = entry.index as usize;

            let mut reg = src_reg[i];
            let mut min_dist = 0xffffu16;
            let area = chf.areas[i];
            let span = chf.spans[i];
            for dir in 0..4 {
                if let Some(ai) = chf.neighbor_index(entry.x, entry.z, &span, dir) {
                    if chf.areas[ai] != area {
                        continue;
                    }
                    if src_reg[ai] > 0 && src_reg[ai] & BORDER_REGION == 0 {
                        let d = src_dist[ai].saturating_add(2);
                        if (d as i32) < min_dist as i32 {
                            reg = src_reg[ai];
                            min_dist = d;
                        }
                    }
                }
            }
            if reg != 0 {
                entry.index = -1;
                dirty.push(DirtyEntry {
                    index: i,
                    region: reg,
                    distance: min_dist,
                });
            } else {
                failed += 1;
            }
        }

        for d in &dirty {
            src_reg[d.index] = d.region;
            src_dist[d.index] = d.distance;
        }

        if failed == stack.len() {
            break;
        }
        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Buckets unassigned spans into the level stacks by `dist >> shift`.
///
/// Stack `s` holds the spans of bucket `start_level - s`; spans below the
/// covered range are left for the next rebucketing.
fn sort_spans_by_level(
    chf: &CompactHeightfield,
    dist: &[u16],
    start_level: u16,
    src_reg: &[u16],
    stacks: &mut [Vec<LevelStackEntry>],
    shift: u16,
) {
    let w = chf.width;
    let h = chf.height;
    let start_level = (start_level >> shift) as i32;

    for stack in stacks.iter_mut() {
        stack.clear();
    }

    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                if chf.areas[i] == NULL_AREA || src_reg[i] != 0 {
                    continue;
                }
                let level = (dist[i] >> shift) as i32;
                let mut stack_id = start_level - level;
                if stack_id >= stacks.len() as i32 {
                    continue;
                }
                if stack_id < 0 {
                    stack_id = 0;
                }
                stacks[stack_id as usize].push(LevelStackEntry {
                    x,
                    z,
                    index: i as i32,
                });
            }
        }
    }
}

/// Carries the previous stack's unhandled entries into the next one.
fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[u16],
) {
    for entry in src_stack {
        if entry.index < 0 || src_reg[entry.index as usize] != 0 {
            continue;
        }
        dst_stack.push(*entry);
    }
}

/// Topology record for one region id during postprocessing.
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    ymin: u16,
    ymax: u16,
    /// Neighbor ids; ordered cyclic contour sequence in the standard
    /// postprocess, unordered unique set in the layered one.
    connections: Vec<i32>,
    /// Region ids co-occurring in the same column
    floors: Vec<i32>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            ymin: 0xffff,
            ymax: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }
}

/// Collapses adjacent duplicate ids in a cyclic connection sequence.
fn remove_adjacent_duplicates(reg: &mut Region) {
    let mut i = 0;
    while i < reg.connections.len() && reg.connections.len() > 1 {
        let ni = (i + 1) % reg.connections.len();
        if reg.connections[i] == reg.connections[ni] {
            reg.connections.remove(i);
        } else {
            i += 1;
        }
    }
}

fn replace_neighbor(reg: &mut Region, old_id: u16, new_id: u16) {
    let mut changed = false;
    for conn in reg.connections.iter_mut() {
        if *conn == old_id as i32 {
            *conn = new_id as i32;
            changed = true;
        }
    }
    for floor in reg.floors.iter_mut() {
        if *floor == old_id as i32 {
            *floor = new_id as i32;
        }
    }
    if changed {
        remove_adjacent_duplicates(reg);
    }
}

/// A merge is legal iff the regions share an area type, touch along exactly
/// one edge segment, and do not stack vertically.
fn can_merge_with_region(rega: &Region, regb: &Region) -> bool {
    if rega.area_type != regb.area_type {
        return false;
    }
    let shared_edges = rega
        .connections
        .iter()
        .filter(|&&c| c == regb.id as i32)
        .count();
    if shared_edges > 1 {
        return false;
    }
    if rega.floors.contains(&(regb.id as i32)) {
        return false;
    }
    true
}

fn add_unique_floor_region(reg: &mut Region, n: i32) {
    if !reg.floors.contains(&n) {
        reg.floors.push(n);
    }
}

/// Merges region `ib` into region `ia` by splicing their cyclic connection
/// sequences at the mutual references.
fn merge_regions(regions: &mut [Region], ia: usize, ib: usize) -> bool {
    let aid = regions[ia].id;
    let bid = regions[ib].id;

    let acon = regions[ia].connections.clone();
    let bcon = regions[ib].connections.clone();

    let insa = match acon.iter().position(|&c| c == bid as i32) {
        Some(p) => p,
        None => return false,
    };
    let insb = match bcon.iter().position(|&c| c == aid as i32) {
        Some(p) => p,
        None => return false,
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for i in 0..acon.len().saturating_sub(1) {
        merged.push(acon[(insa + 1 + i) % acon.len()]);
    }
    for i in 0..bcon.len().saturating_sub(1) {
        merged.push(bcon[(insb + 1 + i) % bcon.len()]);
    }
    regions[ia].connections = merged;
    remove_adjacent_duplicates(&mut regions[ia]);

    let bfloors = regions[ib].floors.clone();
    for floor in bfloors {
        add_unique_floor_region(&mut regions[ia], floor);
    }
    regions[ia].span_count += regions[ib].span_count;
    regions[ib].span_count = 0;
    regions[ib].connections.clear();

    true
}

fn is_region_connected_to_border(reg: &Region) -> bool {
    // A null neighbor id means the contour runs along unassigned space at
    // the grid edge.
    reg.connections.contains(&0)
}

/// A direction is a solid edge iff the neighbor through it belongs to a
/// different region.
fn is_solid_edge(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
) -> bool {
    let span = chf.spans[i];
    let mut reg = 0u16;
    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
        reg = src_reg[ai];
    }
    reg != src_reg[i]
}

/// Walks a region's contour with the right-hand rule, collecting the
/// ordered cyclic sequence of neighbor region ids.
///
/// On a solid edge the neighbor id is recorded (deduplicating adjacent
/// repeats) and the walker turns clockwise; otherwise it steps into the
/// neighbor and turns counter-clockwise, until the starting span and
/// direction recur.
fn walk_contour(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
    contour: &mut Vec<i32>,
) -> Result<()> {
    let start_dir = dir;
    let start_i = i;

    let span = chf.spans[i];
    let mut cur_reg = 0u16;
    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
        cur_reg = src_reg[ai];
    }
    contour.push(cur_reg as i32);

    let mut iter = 0;
    while iter < MAX_CONTOUR_ITERS {
        iter += 1;
        let span = chf.spans[i];

        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let mut r = 0u16;
            if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                r = src_reg[ai];
            }
            if r != cur_reg {
                cur_reg = r;
                contour.push(r as i32);
            }
            dir = (dir + 1) & 3;
        } else {
            let ni = chf.neighbor_index(x, z, &span, dir);
            match ni {
                Some(ni) => {
                    x += dir_offset_x(dir);
                    z += dir_offset_z(dir);
                    i = ni;
                }
                // Cannot happen: a non-solid edge has a connection.
                None => {
                    return Err(Error::Generation(
                        "contour walk stepped through an unconnected edge".to_string(),
                    ))
                }
            }
            dir = (dir + 3) & 3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }
    if iter >= MAX_CONTOUR_ITERS {
        return Err(Error::Generation(format!(
            "contour walk exceeded {} iterations, region topology is malformed",
            MAX_CONTOUR_ITERS
        )));
    }

    // Keep one representative per boundary segment.
    if contour.len() > 1 {
        let mut j = 0;
        while j < contour.len() {
            let nj = (j + 1) % contour.len();
            if contour[j] == contour[nj] {
                contour.remove(j);
            } else {
                j += 1;
            }
        }
    }

    Ok(())
}

/// Postprocessing shared by the watershed and monotone partitioners:
/// removes small connected components, merges small regions into their
/// neighbors, and compacts the surviving ids. Returns the ids of regions
/// that ended up vertically overlapping themselves.
fn merge_and_filter_regions(
    ctx: &mut BuildContext,
    chf: &CompactHeightfield,
    min_region_area: i32,
    merge_region_size: i32,
    max_region_id: &mut u16,
    src_reg: &mut [u16],
) -> Result<Vec<u16>> {
    let w = chf.width;
    let h = chf.height;
    let nreg = (*max_region_id as usize) + 1;

    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Build the region topology: sizes, floors and contour neighbors.
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            let cell_start = cell.index as usize;
            let cell_end = cell_start + cell.count as usize;
            for i in cell_start..cell_end {
                let r = src_reg[i];
                if r == 0 || r as usize >= nreg {
                    continue;
                }
                regions[r as usize].span_count += 1;

                // Every other region in this column is a floor; the same id
                // twice marks a self-overlap.
                for j in cell_start..cell_end {
                    if i == j {
                        continue;
                    }
                    let floor_id = src_reg[j];
                    if floor_id == 0 || floor_id as usize >= nreg {
                        continue;
                    }
                    if floor_id == r {
                        regions[r as usize].overlap = true;
                    }
                    add_unique_floor_region(&mut regions[r as usize], floor_id as i32);
                }

                if !regions[r as usize].connections.is_empty() {
                    continue;
                }
                regions[r as usize].area_type = chf.areas[i];

                // Walk the contour from the first solid edge found.
                if let Some(start_dir) =
                    (0..4).find(|&dir| is_solid_edge(chf, src_reg, x, z, i, dir))
                {
                    let mut contour = Vec::new();
                    if let Err(e) = walk_contour(chf, src_reg, x, z, i, start_dir, &mut contour) {
                        ctx.error(e.to_string());
                        return Err(e);
                    }
                    regions[r as usize].connections = contour;
                }
            }
        }
    }

    // Remove small connected components that do not reach a tile border.
    let mut stack: Vec<usize> = Vec::with_capacity(32);
    let mut trace: Vec<usize> = Vec::with_capacity(32);
    for i in 0..nreg {
        if regions[i].id == 0 || regions[i].id & BORDER_REGION != 0 {
            continue;
        }
        if regions[i].span_count == 0 || regions[i].visited {
            continue;
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();

        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);

            let connections = regions[ri].connections.clone();
            for conn in connections {
                if conn & BORDER_REGION as i32 != 0 {
                    connects_to_border = true;
                    continue;
                }
                let ni = conn as usize;
                if regions[ni].visited {
                    continue;
                }
                if regions[ni].id == 0 || regions[ni].id & BORDER_REGION != 0 {
                    continue;
                }
                stack.push(regions[ni].id as usize);
                regions[ni].visited = true;
            }
        }

        // Border-connecting components survive regardless of size: a
        // neighboring tile may extend them.
        if span_count < min_region_area && !connects_to_border {
            for &ri in &trace {
                regions[ri].span_count = 0;
                regions[ri].id = 0;
            }
        }
    }

    // Merge small regions into their smallest legal neighbor until a full
    // pass makes no progress.
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            {
                let reg = &regions[i];
                if reg.id == 0 || reg.id & BORDER_REGION != 0 {
                    continue;
                }
                if reg.overlap || reg.span_count == 0 {
                    continue;
                }
                if reg.span_count > merge_region_size && is_region_connected_to_border(reg) {
                    continue;
                }
            }

            let mut smallest = i32::MAX;
            let mut merge_id = regions[i].id;
            let connections = regions[i].connections.clone();
            for conn in connections {
                if conn & BORDER_REGION as i32 != 0 {
                    continue;
                }
                let mreg = &regions[conn as usize];
                if mreg.id == 0 || mreg.id & BORDER_REGION != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest
                    && can_merge_with_region(&regions[i], mreg)
                    && can_merge_with_region(mreg, &regions[i])
                {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            let old_id = regions[i].id;
            if merge_id != old_id && merge_regions(&mut regions, merge_id as usize, i) {
                // Everything that pointed at the absorbed id follows the
                // merge.
                for reg in regions.iter_mut() {
                    if reg.id == 0 || reg.id & BORDER_REGION != 0 {
                        continue;
                    }
                    if reg.id == old_id {
                        reg.id = merge_id;
                    }
                    replace_neighbor(reg, old_id, merge_id);
                }
                merge_count += 1;
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compact ids to 1..K, passing border-flagged ids through.
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && reg.id & BORDER_REGION == 0;
    }
    let mut reg_id_gen = 0u16;
    for i in 0..nreg {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        reg_id_gen += 1;
        let new_id = reg_id_gen;
        for reg in regions[i..].iter_mut() {
            if reg.id == old_id {
                reg.id = new_id;
                reg.remap = false;
            }
        }
    }
    *max_region_id = reg_id_gen;

    for reg in src_reg.iter_mut() {
        if *reg & BORDER_REGION == 0 {
            *reg = regions[*reg as usize].id;
        }
    }

    let overlaps: Vec<u16> = regions
        .iter()
        .filter(|r| r.overlap)
        .map(|r| r.id)
        .collect();

    Ok(overlaps)
}

fn add_unique_connection(reg: &mut Region, n: i32) {
    if !reg.connections.contains(&n) {
        reg.connections.push(n);
    }
}

/// Postprocessing for the layered partitioner: merges adjacent
/// non-overlapping row regions into 2D layers, removes small layers and
/// compacts ids.
fn merge_and_filter_layer_regions(
    chf: &CompactHeightfield,
    min_region_area: i32,
    max_region_id: &mut u16,
    src_reg: &mut [u16],
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let nreg = (*max_region_id as usize) + 1;

    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Build the topology: sizes, vertical extents, unordered neighbor sets
    // and per-column floor relations.
    let mut column_regions: Vec<i32> = Vec::with_capacity(32);
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            column_regions.clear();

            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                let ri = src_reg[i];
                if ri == 0 || ri as usize >= nreg {
                    continue;
                }

                {
                    let reg = &mut regions[ri as usize];
                    reg.span_count += 1;
                    reg.area_type = chf.areas[i];
                    reg.ymin = reg.ymin.min(span.y);
                    reg.ymax = reg.ymax.max(span.y);
                }
                column_regions.push(ri as i32);

                for dir in 0..4 {
                    if let Some(ai) = chf.neighbor_index(x, z, &span, dir) {
                        let rai = src_reg[ai];
                        if rai > 0 && (rai as usize) < nreg && rai != ri {
                            add_unique_connection(&mut regions[ri as usize], rai as i32);
                        }
                        if rai & BORDER_REGION != 0 {
                            regions[ri as usize].connects_to_border = true;
                        }
                    }
                }
            }

            // Regions stacked in the same column are floors of each other.
            for i in 0..column_regions.len() {
                for j in i + 1..column_regions.len() {
                    if column_regions[i] != column_regions[j] {
                        let (ri, rj) = (column_regions[i], column_regions[j]);
                        add_unique_floor_region(&mut regions[ri as usize], rj);
                        add_unique_floor_region(&mut regions[rj as usize], ri);
                    }
                }
            }
        }
    }

    // Assign layer ids: BFS over connected regions of matching area,
    // refusing candidates that would make the layer overlap itself.
    let mut layer_id = 1u16;
    for reg in regions.iter_mut() {
        reg.id = 0;
    }

    let mut queue: VecDeque<usize> = VecDeque::new();
    for i in 1..nreg {
        if regions[i].id != 0 {
            continue;
        }
        regions[i].id = layer_id;
        queue.clear();
        queue.push_back(i);

        while let Some(ri) = queue.pop_front() {
            let connections = regions[ri].connections.clone();
            for conn in connections {
                let ni = conn as usize;
                if regions[ni].id != 0 {
                    continue;
                }
                if regions[ri].area_type != regions[ni].area_type {
                    continue;
                }
                // The root's accumulated floors hold every column the layer
                // already occupies.
                if regions[i].floors.contains(&conn) {
                    continue;
                }

                queue.push_back(ni);
                regions[ni].id = layer_id;

                let floors = regions[ni].floors.clone();
                for floor in floors {
                    add_unique_floor_region(&mut regions[i], floor);
                }
                regions[i].ymin = regions[i].ymin.min(regions[ni].ymin);
                regions[i].ymax = regions[i].ymax.max(regions[ni].ymax);
                regions[i].span_count += regions[ni].span_count;
                regions[ni].span_count = 0;
                regions[i].connects_to_border =
                    regions[i].connects_to_border || regions[ni].connects_to_border;
            }
        }

        layer_id += 1;
    }

    // Remove small layers that do not touch a border.
    for i in 0..nreg {
        if regions[i].span_count > 0
            && regions[i].span_count < min_region_area
            && !regions[i].connects_to_border
        {
            let dead = regions[i].id;
            for reg in regions.iter_mut() {
                if reg.id == dead {
                    reg.id = 0;
                }
            }
        }
    }

    // Compact ids.
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && reg.id & BORDER_REGION == 0;
    }
    let mut reg_id_gen = 0u16;
    for i in 0..nreg {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        reg_id_gen += 1;
        let new_id = reg_id_gen;
        for reg in regions[i..].iter_mut() {
            if reg.id == old_id {
                reg.id = new_id;
                reg.remap = false;
            }
        }
    }
    *max_region_id = reg_id_gen;

    for reg in src_reg.iter_mut() {
        if *reg & BORDER_REGION == 0 {
            *reg = regions[*reg as usize].id;
        }
    }

    Ok(())
}

/// Paints the four border strips and returns the next free region id.
fn paint_borders(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    border_size: i32,
    mut reg_id: u16,
) -> u16 {
    if border_size > 0 {
        let w = chf.width;
        let h = chf.height;
        let bw = w.min(border_size);
        let bh = h.min(border_size);

        paint_rect_region(chf, src_reg, 0, bw, 0, h, reg_id | BORDER_REGION);
        reg_id += 1;
        paint_rect_region(chf, src_reg, w - bw, w, 0, h, reg_id | BORDER_REGION);
        reg_id += 1;
        paint_rect_region(chf, src_reg, 0, w, 0, bh, reg_id | BORDER_REGION);
        reg_id += 1;
        paint_rect_region(chf, src_reg, 0, w, h - bh, h, reg_id | BORDER_REGION);
        reg_id += 1;
    }
    reg_id
}

/// Watershed partitioning over the distance field.
///
/// Floods regions downward from the highest distance values, lowering the
/// water level two units at a time: existing regions first expand into the
/// newly exposed spans, then fresh regions are seeded in what remains.
/// The eight level stacks amortize rebucketing as the level descends.
/// Requires [`crate::build_distance_field`] to have run.
pub fn build_regions(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    ctx.start_timer(TimerLabel::BuildRegions);

    let dist = match chf.dist.clone() {
        Some(dist) => dist,
        None => {
            ctx.stop_timer(TimerLabel::BuildRegions);
            return Err(Error::Generation(
                "watershed partitioning requires the distance field".to_string(),
            ));
        }
    };

    const NB_STACKS: usize = 8;

    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];
    let mut src_dist = vec![0u16; span_count];
    let mut lvl_stacks: [Vec<LevelStackEntry>; NB_STACKS] = Default::default();
    let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

    let mut region_id = 1u16;
    let mut level = (chf.max_distance + 1) & !1;

    // Higher values make the basins spill further before new seeds appear,
    // simplifying region boundaries.
    let expand_iters = 8;

    region_id = paint_borders(chf, &mut src_reg, border_size, region_id);
    chf.border_size = border_size;

    ctx.start_timer(TimerLabel::RegionsWatershed);

    let mut stack_id: i32 = -1;
    while level > 0 {
        level = level.saturating_sub(2);
        stack_id = (stack_id + 1) & (NB_STACKS as i32 - 1);

        if stack_id == 0 {
            sort_spans_by_level(chf, &dist, level, &src_reg, &mut lvl_stacks, 1);
        } else {
            let (prev, cur) = lvl_stacks.split_at_mut(stack_id as usize);
            append_stacks(&prev[stack_id as usize - 1], &mut cur[0], &src_reg);
        }

        ctx.start_timer(TimerLabel::RegionsExpand);
        expand_regions(
            chf,
            &dist,
            expand_iters,
            level,
            &mut src_reg,
            &mut src_dist,
            &mut lvl_stacks[stack_id as usize],
            false,
        );
        ctx.stop_timer(TimerLabel::RegionsExpand);

        ctx.start_timer(TimerLabel::RegionsFlood);
        for j in 0..lvl_stacks[stack_id as usize].len() {
            let entry = lvl_stacks[stack_id as usize][j];
            if entry.index >= 0 && src_reg[entry.index as usize] == 0 {
                let seeded = flood_region(
                    chf,
                    &dist,
                    entry.x,
                    entry.z,
                    entry.index as usize,
                    level,
                    region_id,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                );
                if seeded {
                    if region_id == 0xffff {
                        ctx.error("region id overflow");
                        ctx.stop_timer(TimerLabel::RegionsFlood);
                        ctx.stop_timer(TimerLabel::RegionsWatershed);
                        ctx.stop_timer(TimerLabel::BuildRegions);
                        return Err(Error::Generation("region id overflow".to_string()));
                    }
                    region_id += 1;
                }
            }
        }
        ctx.stop_timer(TimerLabel::RegionsFlood);
    }

    // Final expansion absorbs whatever is left, boundary seeds included.
    expand_regions(
        chf,
        &dist,
        expand_iters * 8,
        0,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        true,
    );

    ctx.stop_timer(TimerLabel::RegionsWatershed);

    ctx.start_timer(TimerLabel::RegionsFilter);
    let mut max_region_id = region_id;
    let overlaps = merge_and_filter_regions(
        ctx,
        chf,
        min_region_area,
        merge_region_area,
        &mut max_region_id,
        &mut src_reg,
    )?;
    chf.max_regions = max_region_id;
    if !overlaps.is_empty() {
        // Watershed can double-label a few spans in one column; the result
        // is degraded but still usable downstream.
        ctx.warning(format!("{} overlapping regions", overlaps.len()));
    }
    ctx.stop_timer(TimerLabel::RegionsFilter);

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }

    ctx.stop_timer(TimerLabel::BuildRegions);
    Ok(())
}

/// Row-sweep temporaries for the monotone and layered partitioners.
#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Row-local id
    rid: u16,
    /// Resolved global id
    id: u16,
    /// Samples taken against the previous row
    ns: u16,
    /// Candidate previous-row neighbor, or [`NULL_NEI`]
    nei: u16,
}

/// Runs the shared monotone row sweep, labeling `src_reg` and returning the
/// next free region id.
fn sweep_rows(
    ctx: &mut BuildContext,
    chf: &CompactHeightfield,
    border_size: i32,
    src_reg: &mut [u16],
    mut id: u16,
) -> Result<u16> {
    let w = chf.width;
    let h = chf.height;

    let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(w.max(h) as usize);
    let mut prev: Vec<i32> = Vec::with_capacity(256);

    for z in border_size..h - border_size {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid = 1u16;
        sweeps.clear();
        sweeps.push(SweepSpan::default());

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                let span = chf.spans[i];
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                // Inherit the row-local id from a matching west neighbor.
                let mut previd = 0u16;
                if let Some(ai) = chf.neighbor_index(x, z, &span, 0) {
                    if src_reg[ai] & BORDER_REGION == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }

                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    sweeps.push(SweepSpan {
                        rid: previd,
                        id: 0,
                        ns: 0,
                        nei: 0,
                    });
                }

                // Sample the south neighbor's region.
                if let Some(ai) = chf.neighbor_index(x, z, &span, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && nr & BORDER_REGION == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // A row-local region inherits its southern neighbor only when every
        // sample of both agrees.
        for sweep in sweeps[1..rid as usize].iter_mut() {
            if sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev[sweep.nei as usize] == sweep.ns as i32
            {
                sweep.id = sweep.nei;
            } else {
                if id == 0xffff {
                    ctx.error("region id overflow");
                    return Err(Error::Generation("region id overflow".to_string()));
                }
                sweep.id = id;
                id += 1;
            }
        }

        // Remap this row from row-local to global ids.
        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index as usize + cell.count as usize) {
                if src_reg[i] > 0 && src_reg[i] < rid {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok(id)
}

/// Monotone partitioning: a two-pass row sweep producing non-overlapping
/// regions, no distance field required.
pub fn build_regions_monotone(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    ctx.start_timer(TimerLabel::BuildRegions);

    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];

    let id = paint_borders(chf, &mut src_reg, border_size, 1);
    chf.border_size = border_size;

    let id = match sweep_rows(ctx, chf, border_size, &mut src_reg, id) {
        Ok(id) => id,
        Err(e) => {
            ctx.stop_timer(TimerLabel::BuildRegions);
            return Err(e);
        }
    };

    ctx.start_timer(TimerLabel::RegionsFilter);
    let mut max_region_id = id;
    let result = merge_and_filter_regions(
        ctx,
        chf,
        min_region_area,
        merge_region_area,
        &mut max_region_id,
        &mut src_reg,
    );
    ctx.stop_timer(TimerLabel::RegionsFilter);
    // Monotone regions never overlap themselves.
    result?;
    chf.max_regions = max_region_id;

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }

    ctx.stop_timer(TimerLabel::BuildRegions);
    Ok(())
}

/// Layered partitioning: the monotone row sweep followed by a BFS that
/// merges adjacent non-overlapping regions into 2D layers. No distance
/// field required.
pub fn build_layer_regions(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    ctx.start_timer(TimerLabel::BuildRegions);

    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];

    let id = paint_borders(chf, &mut src_reg, border_size, 1);
    chf.border_size = border_size;

    let id = match sweep_rows(ctx, chf, border_size, &mut src_reg, id) {
        Ok(id) => id,
        Err(e) => {
            ctx.stop_timer(TimerLabel::BuildRegions);
            return Err(e);
        }
    };

    ctx.start_timer(TimerLabel::RegionsFilter);
    let mut max_region_id = id;
    let result =
        merge_and_filter_layer_regions(chf, min_region_area, &mut max_region_id, &mut src_reg);
    ctx.stop_timer(TimerLabel::RegionsFilter);
    result?;
    chf.max_regions = max_region_id;

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }

    ctx.stop_timer(TimerLabel::BuildRegions);
    Ok(())
}
