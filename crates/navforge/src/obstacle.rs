//! Obstacle shapes attached to scene nodes
//!
//! A shape is described in the local space of its node. Under the node's
//! world transform it becomes an [`ObstacleData`] in navigation space,
//! which the tile cache carves out of the layers it overlaps.

use glam::{Mat4, Vec3};
use navforge_common::Result;
use navforge_tilecache::{ObstacleData, ObstacleRef, TileCache};

use crate::coords::{from_nav, transform_to_nav};

/// Obstacle volume in node-local scene space
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleShape {
    /// Upright cylinder whose base sits at the node origin
    Cylinder { radius: f32, height: f32 },
    /// Box centered on the node origin, kept axis aligned in the world
    Box { half_extents: Vec3 },
    /// Box centered on the node origin that follows the node's heading
    OrientedBox { half_extents: Vec3 },
}

impl ObstacleShape {
    /// Creates a cylinder shape
    pub fn cylinder(radius: f32, height: f32) -> Self {
        ObstacleShape::Cylinder { radius, height }
    }

    /// Describes the shape under `transform` in navigation space
    pub fn describe(&self, transform: &Mat4) -> ObstacleData {
        let (scale, _, _) = transform.to_scale_rotation_translation();
        match *self {
            ObstacleShape::Cylinder { radius, height } => ObstacleData::Cylinder {
                pos: transform_to_nav(transform, Vec3::ZERO),
                radius: radius * scale.x.abs().max(scale.y.abs()),
                height: height * scale.z.abs(),
            },
            ObstacleShape::Box { half_extents } => {
                let mut bmin = Vec3::splat(f32::MAX);
                let mut bmax = Vec3::splat(f32::MIN);
                for i in 0..8 {
                    let corner = Vec3::new(
                        if i & 1 == 0 { -half_extents.x } else { half_extents.x },
                        if i & 2 == 0 { -half_extents.y } else { half_extents.y },
                        if i & 4 == 0 { -half_extents.z } else { half_extents.z },
                    );
                    let p = transform_to_nav(transform, corner);
                    bmin = bmin.min(p);
                    bmax = bmax.max(p);
                }
                ObstacleData::Box { bmin, bmax }
            }
            ObstacleShape::OrientedBox { half_extents } => {
                let axis = transform.transform_vector3(Vec3::X);
                let heading = axis.y.atan2(axis.x);
                let h = half_extents * scale.abs();
                ObstacleData::OrientedBox {
                    center: transform_to_nav(transform, Vec3::ZERO),
                    half_extents: Vec3::new(h.x, h.z, h.y),
                    y_radians: -heading,
                }
            }
        }
    }

    /// Queues the shape for carving into `cache` and returns the
    /// cache-issued reference used to remove it again
    pub fn carve(&self, cache: &mut TileCache, transform: &Mat4) -> Result<ObstacleRef> {
        cache.add_obstacle(self.describe(transform))
    }
}

/// Outline of a carved obstacle in scene space, as line segments
pub fn obstacle_outline(data: &ObstacleData) -> Vec<[Vec3; 2]> {
    const SEGMENTS: usize = 16;
    let mut lines = Vec::new();
    let mut ring = |pts: &[Vec3], lines: &mut Vec<[Vec3; 2]>| {
        for i in 0..pts.len() {
            lines.push([from_nav(pts[i]), from_nav(pts[(i + 1) % pts.len()])]);
        }
    };

    match *data {
        ObstacleData::Cylinder {
            pos,
            radius,
            height,
        } => {
            let circle = |y: f32| -> Vec<Vec3> {
                (0..SEGMENTS)
                    .map(|i| {
                        let a = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
                        Vec3::new(pos.x + a.cos() * radius, y, pos.z + a.sin() * radius)
                    })
                    .collect()
            };
            let bottom = circle(pos.y);
            let top = circle(pos.y + height);
            ring(&bottom, &mut lines);
            ring(&top, &mut lines);
            for i in (0..SEGMENTS).step_by(SEGMENTS / 4) {
                lines.push([from_nav(bottom[i]), from_nav(top[i])]);
            }
        }
        ObstacleData::Box { bmin, bmax } => {
            let corners = |y: f32| {
                [
                    Vec3::new(bmin.x, y, bmin.z),
                    Vec3::new(bmax.x, y, bmin.z),
                    Vec3::new(bmax.x, y, bmax.z),
                    Vec3::new(bmin.x, y, bmax.z),
                ]
            };
            box_outline(&corners(bmin.y), &corners(bmax.y), &mut lines, &mut ring);
        }
        ObstacleData::OrientedBox {
            center,
            half_extents,
            y_radians,
        } => {
            let (s, c) = y_radians.sin_cos();
            let corners = |y: f32| {
                [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)].map(|(sx, sz)| {
                    let lx = sx * half_extents.x;
                    let lz = sz * half_extents.z;
                    Vec3::new(center.x + lx * c - lz * s, y, center.z + lx * s + lz * c)
                })
            };
            box_outline(
                &corners(center.y - half_extents.y),
                &corners(center.y + half_extents.y),
                &mut lines,
                &mut ring,
            );
        }
    }
    lines
}

fn box_outline(
    bottom: &[Vec3; 4],
    top: &[Vec3; 4],
    lines: &mut Vec<[Vec3; 2]>,
    ring: &mut impl FnMut(&[Vec3], &mut Vec<[Vec3; 2]>),
) {
    ring(bottom, lines);
    ring(top, lines);
    for i in 0..4 {
        lines.push([from_nav(bottom[i]), from_nav(top[i])]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_cylinder_describe() {
        let t = Mat4::from_translation(Vec3::new(5.0, 5.0, 0.0));
        let data = ObstacleShape::cylinder(1.0, 2.0).describe(&t);
        assert_eq!(
            data,
            ObstacleData::Cylinder {
                pos: Vec3::new(5.0, 0.0, -5.0),
                radius: 1.0,
                height: 2.0,
            }
        );
    }

    #[test]
    fn test_box_describe_is_axis_aligned() {
        let t = Mat4::from_translation(Vec3::new(1.0, 2.0, 0.0));
        let data = ObstacleShape::Box {
            half_extents: Vec3::new(1.0, 0.5, 2.0),
        }
        .describe(&t);
        let ObstacleData::Box { bmin, bmax } = data else {
            panic!("expected a box");
        };
        assert!((bmin - Vec3::new(0.0, -2.0, -2.5)).length() < 1e-5);
        assert!((bmax - Vec3::new(2.0, 2.0, -1.5)).length() < 1e-5);
    }

    #[test]
    fn test_oriented_box_heading() {
        let t = Mat4::from_rotation_z(FRAC_PI_2);
        let data = ObstacleShape::OrientedBox {
            half_extents: Vec3::new(2.0, 1.0, 0.5),
        }
        .describe(&t);
        let ObstacleData::OrientedBox {
            half_extents,
            y_radians,
            ..
        } = data
        else {
            panic!("expected an oriented box");
        };
        assert!((y_radians + FRAC_PI_2).abs() < 1e-5);
        assert!((half_extents - Vec3::new(2.0, 0.5, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_equal_transforms_describe_equal() {
        let shape = ObstacleShape::cylinder(0.5, 1.0);
        let t = Mat4::from_translation(Vec3::new(3.0, -1.0, 0.0));
        assert_eq!(shape.describe(&t), shape.describe(&t));
        let moved = Mat4::from_translation(Vec3::new(3.5, -1.0, 0.0));
        assert_ne!(shape.describe(&t), shape.describe(&moved));
    }

    #[test]
    fn test_outline_segment_counts() {
        let cyl = ObstacleShape::cylinder(1.0, 2.0).describe(&Mat4::IDENTITY);
        assert_eq!(obstacle_outline(&cyl).len(), 16 * 2 + 4);
        let bx = ObstacleData::Box {
            bmin: Vec3::ZERO,
            bmax: Vec3::ONE,
        };
        assert_eq!(obstacle_outline(&bx).len(), 12);
    }
}
