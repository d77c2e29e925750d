//! Configuration for the voxel pipeline.

use glam::Vec3;

use navgrid_common::{calc_grid_size, Error, Result};

/// Strategy used to partition the walkable surface into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partitioning {
    /// Distance-field watershed. Produces the best-shaped regions and
    /// requires the distance field to be built first.
    #[default]
    Watershed,
    /// Row-sweep partitioning into non-overlapping monotone regions.
    Monotone,
    /// Row-sweep partitioning merged into 2D layers, suitable for layer
    /// extraction over vertically stacked geometry.
    Layered,
}

/// Parameters for a pipeline run.
///
/// All vertical quantities are expressed in voxels (`ch` units), horizontal
/// ones in cells (`cs` units) unless stated otherwise.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// The width of the grid along the x-axis, in cells
    pub width: i32,
    /// The height (depth) of the grid along the z-axis, in cells
    pub height: i32,

    /// XZ cell size in world units
    pub cs: f32,
    /// Y voxel height in world units
    pub ch: f32,

    /// The minimum bounds of the build region's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the build region's AABB
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable, `[0, 90)`
    pub walkable_slope_angle: f32,
    /// Minimum floor-to-ceiling clearance in voxels for a floor to stay walkable
    pub walkable_height: i32,
    /// Maximum step height in voxels a span-to-span connection may encode
    pub walkable_climb: i32,
    /// Agent radius in cells to erode the walkable area by
    pub walkable_radius: i32,

    /// Width of the border strip painted with border-flagged region ids, in cells
    pub border_size: i32,
    /// Isolated region components below this span count are removed
    pub min_region_area: i32,
    /// Regions below this span count are merged into neighbors when possible
    pub merge_region_area: i32,

    /// Maximum contour edge length, consumed by downstream polygonization
    pub max_edge_len: i32,
    /// Maximum contour simplification error, consumed downstream
    pub max_simplification_error: f32,
    /// Maximum vertices per polygon, consumed downstream
    pub max_verts_per_poly: i32,
    /// Detail mesh sample spacing, consumed downstream
    pub detail_sample_dist: f32,
    /// Detail mesh max sample error, consumed downstream
    pub detail_sample_max_error: f32,

    /// Region partitioning strategy
    pub partitioning: Partitioning,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            border_size: 0,
            min_region_area: 64,
            merge_region_area: 400,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            max_verts_per_poly: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            partitioning: Partitioning::Watershed,
        }
    }
}

impl BuildConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the build bounds and derives `width`/`height` from them.
    pub fn set_bounds(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        let (width, height) = calc_grid_size(bmin, bmax, self.cs);
        self.width = width;
        self.height = height;
    }

    /// Validates the configuration.
    ///
    /// Out-of-range parameters are caller errors; the pipeline refuses to
    /// run with them rather than producing corrupt output.
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidConfig(format!(
                "grid size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "cell size and height must be positive, got cs={} ch={}",
                self.cs, self.ch
            )));
        }
        if !(0.0..90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidConfig(format!(
                "walkable slope angle must be in [0, 90), got {}",
                self.walkable_slope_angle
            )));
        }
        if self.walkable_height < 3 {
            return Err(Error::InvalidConfig(format!(
                "walkable height must be at least 3 voxels, got {}",
                self.walkable_height
            )));
        }
        if self.walkable_climb < 0 || self.walkable_radius < 0 || self.border_size < 0 {
            return Err(Error::InvalidConfig(
                "walkable climb, radius and border size must be non-negative".to_string(),
            ));
        }
        if self.max_verts_per_poly < 3 {
            return Err(Error::InvalidConfig(format!(
                "polygons need at least 3 vertices, got {}",
                self.max_verts_per_poly
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bounds_derives_grid_size() {
        let mut config = BuildConfig {
            cs: 1.0,
            ..Default::default()
        };
        config.set_bounds(Vec3::ZERO, Vec3::new(10.0, 2.0, 8.0));
        assert_eq!(config.width, 10);
        assert_eq!(config.height, 8);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let mut config = BuildConfig::default();
        config.set_bounds(Vec3::ZERO, Vec3::new(10.0, 2.0, 10.0));
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.cs = 0.0;
        bad.width = 10;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.walkable_slope_angle = 90.0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.walkable_height = 2;
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.walkable_climb = -1;
        assert!(bad.validate().is_err());
    }
}
