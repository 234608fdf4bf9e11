//! Conversion between scene space (z up) and the y-up space the
//! navigation mesh is built in

use glam::{Mat4, Vec3};

/// Scene point to navigation space: `(x, y, z) -> (x, z, -y)`
#[inline]
pub fn to_nav(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

/// Navigation space point back to scene space: `(x, y, z) -> (x, -z, y)`
#[inline]
pub fn from_nav(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Transforms a scene-space point by `transform` and converts the result
/// to navigation space
#[inline]
pub fn transform_to_nav(transform: &Mat4, v: Vec3) -> Vec3 {
    to_nav(transform.transform_point3(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(to_nav(p), Vec3::new(1.0, 3.0, -2.0));
        assert_eq!(from_nav(to_nav(p)), p);
    }

    #[test]
    fn test_up_axis() {
        assert_eq!(to_nav(Vec3::Z), Vec3::Y);
    }
}
