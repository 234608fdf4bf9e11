//! Renderer-agnostic debug geometry of a navigation mesh
//!
//! Everything is produced in scene space: polygon outlines as lines,
//! polygon surfaces as coloured triangle fans and carved obstacles as
//! wireframes.

use glam::Vec3;

use crate::nav_mesh::NavMesh;
use crate::obstacle::obstacle_outline;

/// Linear RGBA colour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub const fn from_rgba_bytes(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const ORANGE: Color = Color::rgb(1.0, 0.5, 0.0);

    /// Default fill of a walkable polygon
    pub const WALKABLE_POLY: Color = Color::new(0.0, 0.75, 1.0, 0.25);
    /// Default fill of a disabled polygon
    pub const DISABLED_POLY: Color = Color::new(1.0, 0.0, 0.0, 0.25);
    /// Polygon edges on the mesh boundary
    pub const BOUNDARY_EDGE: Color = Color::new(0.0, 0.19, 0.25, 0.86);
    /// Edges shared by two polygons
    pub const INNER_EDGE: Color = Color::new(0.0, 0.19, 0.25, 0.25);
    pub const OBSTACLE: Color = Color::ORANGE;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugTriangle {
    pub verts: [Vec3; 3],
    pub color: Color,
}

/// Collected debug primitives
#[derive(Debug, Clone, Default)]
pub struct DebugGeometry {
    pub lines: Vec<DebugLine>,
    pub triangles: Vec<DebugTriangle>,
}

impl DebugGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.triangles.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.triangles.is_empty()
    }

    pub fn line(&mut self, start: Vec3, end: Vec3, color: Color) {
        self.lines.push(DebugLine { start, end, color });
    }

    pub fn triangle(&mut self, a: Vec3, b: Vec3, c: Vec3, color: Color) {
        self.triangles.push(DebugTriangle {
            verts: [a, b, c],
            color,
        });
    }
}

impl NavMesh {
    /// Appends the outline of every polygon. Edges without a neighbour are
    /// drawn in [`Color::BOUNDARY_EDGE`].
    pub fn draw_poly_outlines(&self, out: &mut DebugGeometry) {
        for poly in self.polys() {
            let verts = poly.vertices();
            let Ok((_, p)) = self.tile_mesh().tile_and_poly_by_ref(poly.reference()) else {
                continue;
            };
            let n = verts.len();
            for i in 0..n {
                let open = p.neis.get(i).is_some_and(|&nei| nei != 0);
                let color = if open {
                    Color::INNER_EDGE
                } else {
                    Color::BOUNDARY_EDGE
                };
                out.line(verts[i], verts[(i + 1) % n], color);
            }
        }
    }

    /// Appends every polygon as a triangle fan in its debug colour
    pub fn draw_polys(&self, out: &mut DebugGeometry) {
        for poly in self.polys() {
            let verts = poly.vertices();
            let color = poly.debug_color();
            for i in 1..verts.len().saturating_sub(1) {
                out.triangle(verts[0], verts[i], verts[i + 1], color);
            }
        }
    }

    /// Appends the wireframe of every carved obstacle
    pub fn draw_obstacles(&self, out: &mut DebugGeometry) {
        for (_, data) in self.carved_obstacles() {
            for [a, b] in obstacle_outline(&data) {
                out.line(a, b, Color::OBSTACLE);
            }
        }
    }

    /// Polygon fans, polygon outlines and obstacle wireframes
    pub fn debug_geometry(&self) -> DebugGeometry {
        let mut out = DebugGeometry::new();
        self.draw_polys(&mut out);
        self.draw_poly_outlines(&mut out);
        self.draw_obstacles(&mut out);
        out
    }
}
