//! Span filters applied to the sparse heightfield after rasterization.
//!
//! Each filter is a single pass that downgrades span area tags according to
//! agent clearance, climb and ledge rules. They run between rasterization
//! and compaction.

use crate::compact_heightfield::{dir_offset_x, dir_offset_z};
use crate::context::{BuildContext, TimerLabel};
use crate::heightfield::{Heightfield, NULL_AREA, SPAN_NIL};

const MAX_HEIGHT: i32 = 0xffff;

/// Rescues low obstacles the agent can step over.
///
/// Walking each column bottom-up: a null-area span sitting directly on a
/// span that was walkable *before this pass*, with a top within
/// `walkable_climb` of that span's top, inherits the lower span's area.
/// Using the pre-pass walkability prevents the rescue from cascading up a
/// stack of null spans. Recovers curbs, thresholds and the stepped fill of
/// conservative rasterization.
pub fn filter_low_hanging_walkable_obstacles(
    ctx: &mut BuildContext,
    heightfield: &mut Heightfield,
    walkable_climb: i32,
) {
    ctx.start_timer(TimerLabel::FilterLowObstacles);

    for z in 0..heightfield.height {
        for x in 0..heightfield.width {
            let mut previous_smax = 0i32;
            let mut previous_was_walkable = false;
            let mut previous_area = NULL_AREA;

            let mut key = heightfield.head_key(x, z);
            while key != SPAN_NIL {
                let span = heightfield.span(key);
                let walkable = span.area != NULL_AREA;

                if !walkable
                    && previous_was_walkable
                    && span.smax as i32 - previous_smax <= walkable_climb
                {
                    heightfield.span_mut(key).area = previous_area;
                }

                // Remember the original walkability, but the (possibly
                // rescued) area tag.
                previous_was_walkable = walkable;
                previous_area = heightfield.span(key).area;
                previous_smax = span.smax as i32;
                key = span.next;
            }
        }
    }

    ctx.stop_timer(TimerLabel::FilterLowObstacles);
}

/// Marks spans adjacent to ledges as unwalkable.
///
/// A walkable span is a ledge when the drop to the lowest reachable
/// neighbor floor exceeds `walkable_climb`, or when the floors of the
/// neighbors within climbing range spread further apart than
/// `walkable_climb` (an abrupt slope change). Out-of-bounds neighbors count
/// as ledges.
pub fn filter_ledge_spans(
    ctx: &mut BuildContext,
    heightfield: &mut Heightfield,
    walkable_height: i32,
    walkable_climb: i32,
) {
    ctx.start_timer(TimerLabel::FilterLedgeSpans);

    let w = heightfield.width;
    let h = heightfield.height;

    for z in 0..h {
        for x in 0..w {
            let mut key = heightfield.head_key(x, z);
            while key != SPAN_NIL {
                let span = heightfield.span(key);
                if span.area == NULL_AREA {
                    key = span.next;
                    continue;
                }

                let floor = span.smax as i32;
                let ceiling = if span.next != SPAN_NIL {
                    heightfield.span(span.next).smin as i32
                } else {
                    MAX_HEIGHT
                };

                // Lowest floor delta over all reachable neighbors, and the
                // floor window of the neighbors within climbing range.
                let mut lowest_neighbor_floor_difference = MAX_HEIGHT;
                let mut lowest_traversable_neighbor_floor = floor;
                let mut highest_traversable_neighbor_floor = floor;

                for dir in 0..4 {
                    let nx = x + dir_offset_x(dir);
                    let nz = z + dir_offset_z(dir);

                    if nx < 0 || nz < 0 || nx >= w || nz >= h {
                        lowest_neighbor_floor_difference = -walkable_climb - 1;
                        break;
                    }

                    let mut neighbor_key = heightfield.head_key(nx, nz);

                    // The open space below the neighbor column's first span.
                    let mut neighbor_ceiling = if neighbor_key != SPAN_NIL {
                        heightfield.span(neighbor_key).smin as i32
                    } else {
                        MAX_HEIGHT
                    };

                    // A tall enough gap under the whole neighbor column is a
                    // drop into the void.
                    if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                        lowest_neighbor_floor_difference = -walkable_climb - 1;
                        break;
                    }

                    while neighbor_key != SPAN_NIL {
                        let neighbor = heightfield.span(neighbor_key);
                        let neighbor_floor = neighbor.smax as i32;
                        neighbor_ceiling = if neighbor.next != SPAN_NIL {
                            heightfield.span(neighbor.next).smin as i32
                        } else {
                            MAX_HEIGHT
                        };

                        // Skip neighbor floors without enough shared
                        // clearance to traverse to.
                        if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                            < walkable_height
                        {
                            neighbor_key = neighbor.next;
                            continue;
                        }

                        let neighbor_floor_difference = neighbor_floor - floor;
                        lowest_neighbor_floor_difference =
                            lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                        if neighbor_floor_difference.abs() <= walkable_climb {
                            lowest_traversable_neighbor_floor =
                                lowest_traversable_neighbor_floor.min(neighbor_floor);
                            highest_traversable_neighbor_floor =
                                highest_traversable_neighbor_floor.max(neighbor_floor);
                        } else if neighbor_floor_difference < -walkable_climb {
                            // Already a ledge in this direction.
                            break;
                        }

                        neighbor_key = neighbor.next;
                    }
                }

                if lowest_neighbor_floor_difference < -walkable_climb {
                    // The drop to a reachable neighbor is too deep.
                    heightfield.span_mut(key).area = NULL_AREA;
                } else if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                    > walkable_climb
                {
                    // The surrounding floors spread too far apart.
                    heightfield.span_mut(key).area = NULL_AREA;
                }

                key = span.next;
            }
        }
    }

    ctx.stop_timer(TimerLabel::FilterLedgeSpans);
}

/// Removes the walkable tag from spans without standing clearance.
///
/// A span's clearance is the gap between its top and the next span's
/// bottom (unbounded for the topmost span); anything under
/// `walkable_height` becomes null area.
pub fn filter_walkable_low_height_spans(
    ctx: &mut BuildContext,
    heightfield: &mut Heightfield,
    walkable_height: i32,
) {
    ctx.start_timer(TimerLabel::FilterLowHeightSpans);

    for z in 0..heightfield.height {
        for x in 0..heightfield.width {
            let mut key = heightfield.head_key(x, z);
            while key != SPAN_NIL {
                let span = heightfield.span(key);
                let floor = span.smax as i32;
                let ceiling = if span.next != SPAN_NIL {
                    heightfield.span(span.next).smin as i32
                } else {
                    MAX_HEIGHT
                };
                if ceiling - floor < walkable_height {
                    heightfield.span_mut(key).area = NULL_AREA;
                }
                key = span.next;
            }
        }
    }

    ctx.stop_timer(TimerLabel::FilterLowHeightSpans);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;
    use glam::Vec3;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 20.0, h as f32), 1.0, 1.0)
    }

    #[test]
    fn test_low_hanging_obstacle_is_rescued() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(1, 1, 0, 10, 7, 1).unwrap();
        hf.add_span(1, 1, 10, 12, NULL_AREA, 1).unwrap();

        filter_low_hanging_walkable_obstacles(&mut ctx, &mut hf, 2);

        let spans: Vec<_> = hf.spans_in_column(1, 1).collect();
        assert_eq!(spans[1].area, 7);
    }

    #[test]
    fn test_low_hanging_rescue_does_not_cascade() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(1, 1, 0, 10, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 10, 12, NULL_AREA, 1).unwrap();
        hf.add_span(1, 1, 12, 14, NULL_AREA, 1).unwrap();

        filter_low_hanging_walkable_obstacles(&mut ctx, &mut hf, 2);

        let spans: Vec<_> = hf.spans_in_column(1, 1).collect();
        // The first obstacle is stepped over, the one above it is not:
        // rescue only applies directly above an originally walkable span.
        assert_eq!(spans[1].area, WALKABLE_AREA);
        assert_eq!(spans[2].area, NULL_AREA);
    }

    #[test]
    fn test_low_hanging_obstacle_too_tall() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(1, 1, 0, 10, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 10, 15, NULL_AREA, 1).unwrap();

        filter_low_hanging_walkable_obstacles(&mut ctx, &mut hf, 2);

        let spans: Vec<_> = hf.spans_in_column(1, 1).collect();
        assert_eq!(spans[1].area, NULL_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_grid_edge() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }

        filter_ledge_spans(&mut ctx, &mut hf, 4, 1);

        // Border columns face out-of-bounds and become ledges; the center
        // survives because all its neighbor floors are level.
        for z in 0..3 {
            for x in 0..3 {
                let area = hf.spans_in_column(x, z).next().unwrap().area;
                if x == 1 && z == 1 {
                    assert_eq!(area, WALKABLE_AREA);
                } else {
                    assert_eq!(area, NULL_AREA);
                }
            }
        }
    }

    #[test]
    fn test_ledge_filter_marks_tall_step() {
        let mut hf = field(5, 5);
        let mut ctx = BuildContext::new();
        // Left half at floor 1, right half at floor 5: a 4-voxel cliff.
        for z in 0..5 {
            for x in 0..5 {
                let smax = if x < 2 { 1 } else { 5 };
                hf.add_span(x, z, 0, smax, WALKABLE_AREA, 1).unwrap();
            }
        }

        filter_ledge_spans(&mut ctx, &mut hf, 3, 2);

        // The upper rim of the cliff drops more than walkable_climb down to
        // its west neighbor, so it is a ledge.
        let rim = hf.spans_in_column(2, 2).next().unwrap();
        assert_eq!(rim.area, NULL_AREA);
        // The column one further in is surrounded by level floors and
        // in-bounds neighbors.
        let inner = hf.spans_in_column(3, 2).next().unwrap();
        assert_eq!(inner.area, WALKABLE_AREA);
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        // Floor with a ceiling 3 voxels above it.
        hf.add_span(1, 1, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 5, 8, WALKABLE_AREA, 1).unwrap();

        filter_walkable_low_height_spans(&mut ctx, &mut hf, 4);

        let spans: Vec<_> = hf.spans_in_column(1, 1).collect();
        assert_eq!(spans[0].area, NULL_AREA);
        // Topmost span has unbounded clearance.
        assert_eq!(spans[1].area, WALKABLE_AREA);
    }
}
