//! navgrid turns an arbitrary triangle soup into a region-labeled compact
//! heightfield: a set of walkable surfaces a character of known height,
//! radius and climb ability can stand on, partitioned into regions ready
//! for contour tracing and polygonization.
//!
//! The pipeline is strictly sequential: rasterization into a sparse voxel
//! heightfield, span filtering against the agent profile, compaction into
//! an open-space representation with neighbor links, area shaping
//! (erosion, volume tagging, median smoothing), and region partitioning by
//! watershed, monotone or layered strategy.

mod area;
mod compact_heightfield;
mod config;
mod context;
mod distance_field;
mod filter;
mod heightfield;
mod rasterization;
mod region;

pub use area::{
    erode_walkable_area, mark_box_area, mark_convex_poly_area, mark_cylinder_area, mark_volume,
    median_filter_walkable_area, offset_poly, AreaVolume,
};
pub use compact_heightfield::{
    dir_offset_x, dir_offset_z, CompactCell, CompactHeightfield, CompactSpan, BORDER_REGION,
    MAX_LAYERS, NOT_CONNECTED,
};
pub use config::{BuildConfig, Partitioning};
pub use context::{BuildContext, LogCategory, LogEntry, TimerLabel};
pub use distance_field::build_distance_field;
pub use filter::{
    filter_ledge_spans, filter_low_hanging_walkable_obstacles, filter_walkable_low_height_spans,
};
pub use heightfield::{ColumnSpans, Heightfield, Span, NULL_AREA, SPAN_MAX_HEIGHT, WALKABLE_AREA};
pub use rasterization::{
    calc_mesh_bounds, clear_unwalkable_triangles, mark_walkable_triangles, rasterize_triangle,
    rasterize_triangle_soup, rasterize_triangles, rasterize_triangles_u16,
};
pub use region::{build_layer_regions, build_regions, build_regions_monotone};

pub use navgrid_common::{
    calc_bounds, calc_grid_size, overlap_bounds, point_in_poly_xz, triangle_normal, Error, Result,
    Vec3,
};

/// Drives the full voxel pipeline for one rectangular build region.
///
/// The builder owns the configuration; the caller supplies the geometry,
/// per-triangle area tags and a [`BuildContext`] that collects diagnostics
/// and stage timings. Independent builders share no state, so callers may
/// run one per thread for separate regions.
#[derive(Debug)]
pub struct NavGridBuilder {
    config: BuildConfig,
    volumes: Vec<AreaVolume>,
    median_filter: bool,
}

impl NavGridBuilder {
    /// Creates a builder for the given configuration.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            volumes: Vec::new(),
            median_filter: false,
        }
    }

    /// The builder's configuration.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Adds an area tagging volume, applied after erosion.
    pub fn with_volume(mut self, volume: AreaVolume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Enables the 3x3 area median filter after volume tagging.
    pub fn median_filter(mut self, enabled: bool) -> Self {
        self.median_filter = enabled;
        self
    }

    /// Tags triangles walkable according to the configured slope angle.
    ///
    /// `tri_areas` must be pre-initialized; triangles that fail the slope
    /// test keep their existing tag.
    pub fn mark_walkable(&self, verts: &[Vec3], indices: &[u32], tri_areas: &mut [u8]) {
        mark_walkable_triangles(self.config.walkable_slope_angle, verts, indices, tri_areas);
    }

    /// Runs the whole pipeline and returns the region-tagged compact
    /// heightfield.
    ///
    /// Any stage failure short-circuits; the context then holds the
    /// diagnostics for it.
    pub fn build(
        &self,
        ctx: &mut BuildContext,
        verts: &[Vec3],
        indices: &[u32],
        tri_areas: &[u8],
    ) -> Result<CompactHeightfield> {
        self.config.validate()?;
        let cfg = &self.config;

        ctx.start_timer(TimerLabel::Total);
        ctx.progress(format!(
            "building navigation grid: {} x {} cells, {} triangles",
            cfg.width,
            cfg.height,
            indices.len() / 3
        ));

        let mut heightfield = Heightfield::new(
            cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch,
        );
        rasterize_triangles(
            ctx,
            verts,
            indices,
            tri_areas,
            &mut heightfield,
            cfg.walkable_climb,
        )?;

        filter_low_hanging_walkable_obstacles(ctx, &mut heightfield, cfg.walkable_climb);
        filter_ledge_spans(
            ctx,
            &mut heightfield,
            cfg.walkable_height,
            cfg.walkable_climb,
        );
        filter_walkable_low_height_spans(ctx, &mut heightfield, cfg.walkable_height);

        let mut chf = CompactHeightfield::build_from_heightfield(
            ctx,
            cfg.walkable_height,
            cfg.walkable_climb,
            &heightfield,
        )?;
        drop(heightfield);

        erode_walkable_area(ctx, &mut chf, cfg.walkable_radius)?;

        for volume in &self.volumes {
            mark_volume(ctx, &mut chf, volume)?;
        }
        if self.median_filter {
            median_filter_walkable_area(ctx, &mut chf)?;
        }

        match cfg.partitioning {
            Partitioning::Watershed => {
                build_distance_field(ctx, &mut chf)?;
                build_regions(
                    ctx,
                    &mut chf,
                    cfg.border_size,
                    cfg.min_region_area,
                    cfg.merge_region_area,
                )?;
            }
            Partitioning::Monotone => {
                build_regions_monotone(
                    ctx,
                    &mut chf,
                    cfg.border_size,
                    cfg.min_region_area,
                    cfg.merge_region_area,
                )?;
            }
            Partitioning::Layered => {
                build_layer_regions(ctx, &mut chf, cfg.border_size, cfg.min_region_area)?;
            }
        }

        ctx.progress(format!(
            "built {} spans in {} regions",
            chf.span_count(),
            chf.max_regions
        ));
        ctx.stop_timer(TimerLabel::Total);
        Ok(chf)
    }
}
