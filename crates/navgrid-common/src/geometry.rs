//! Small geometric helpers used throughout the voxel pipeline.

use glam::Vec3;

/// Checks whether two axis-aligned bounding boxes overlap.
pub fn overlap_bounds(a_min: Vec3, a_max: Vec3, b_min: Vec3, b_max: Vec3) -> bool {
    a_min.x <= b_max.x
        && a_max.x >= b_min.x
        && a_min.y <= b_max.y
        && a_max.y >= b_min.y
        && a_min.z <= b_max.z
        && a_max.z >= b_min.z
}

/// Computes the axis-aligned bounding box of a vertex soup.
///
/// Returns `(Vec3::MAX, Vec3::MIN)` for an empty slice, which is an empty
/// box for the purposes of [`overlap_bounds`].
pub fn calc_bounds(verts: &[Vec3]) -> (Vec3, Vec3) {
    let mut bmin = Vec3::MAX;
    let mut bmax = Vec3::MIN;
    for v in verts {
        bmin = bmin.min(*v);
        bmax = bmax.max(*v);
    }
    (bmin, bmax)
}

/// Derives the grid size in cells along X and Z covering the given bounds.
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cell_size: f32) -> (i32, i32) {
    let width = ((bmax.x - bmin.x) / cell_size + 0.5) as i32;
    let height = ((bmax.z - bmin.z) / cell_size + 0.5) as i32;
    (width, height)
}

/// Computes the unit normal of a triangle.
///
/// Degenerate triangles yield the zero vector.
pub fn triangle_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

/// Tests whether a point lies inside a polygon projected onto the XZ plane.
///
/// Classic horizontal ray crossing count. Points exactly on an edge may land
/// on either side depending on the edge direction.
pub fn point_in_poly_xz(point: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_bounds() {
        let a_min = Vec3::new(0.0, 0.0, 0.0);
        let a_max = Vec3::new(2.0, 2.0, 2.0);

        // Overlapping boxes
        assert!(overlap_bounds(
            a_min,
            a_max,
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(3.0, 3.0, 3.0)
        ));

        // Touching boxes count as overlapping
        assert!(overlap_bounds(
            a_min,
            a_max,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(4.0, 2.0, 2.0)
        ));

        // Separated along one axis
        assert!(!overlap_bounds(
            a_min,
            a_max,
            Vec3::new(2.5, 0.0, 0.0),
            Vec3::new(4.0, 2.0, 2.0)
        ));
    }

    #[test]
    fn test_calc_bounds() {
        let verts = [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 2.0, 1.0),
            Vec3::new(0.0, -1.0, 0.5),
        ];

        let (bmin, bmax) = calc_bounds(&verts);
        assert_eq!(bmin, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(bmax, Vec3::new(1.0, 2.0, 1.0));
    }

    #[test]
    fn test_calc_grid_size() {
        let bmin = Vec3::ZERO;
        let bmax = Vec3::new(10.0, 5.0, 10.0);

        let (w, h) = calc_grid_size(bmin, bmax, 0.5);
        assert_eq!(w, 20);
        assert_eq!(h, 20);

        let (w, h) = calc_grid_size(bmin, bmax, 0.3);
        assert_eq!(w, 33);
        assert_eq!(h, 33);
    }

    #[test]
    fn test_triangle_normal() {
        // Counter-clockwise winding in the XZ plane faces up
        let n = triangle_normal(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        );
        assert!((n - Vec3::Y).length() < 1e-5);

        // Degenerate triangle
        let n = triangle_normal(Vec3::ZERO, Vec3::ZERO, Vec3::X);
        assert_eq!(n, Vec3::ZERO);
    }

    #[test]
    fn test_point_in_poly_xz() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(0.0, 0.0, 5.0),
        ];

        assert!(point_in_poly_xz(Vec3::new(2.5, 0.0, 2.5), &square));
        assert!(!point_in_poly_xz(Vec3::new(6.0, 0.0, 3.0), &square));
        assert!(!point_in_poly_xz(Vec3::new(-0.5, 0.0, 2.5), &square));
    }
}
