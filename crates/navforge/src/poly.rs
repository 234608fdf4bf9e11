//! Borrowed views of single polygons

use glam::Vec3;
use navforge_common::{poly_center, Result};
use navforge_detour::{PolyFlags, PolyRef};

use crate::debug::Color;
use crate::nav_mesh::NavMesh;

/// Read-only view of a polygon. Vertices are in scene space.
#[derive(Debug, Clone, Copy)]
pub struct NavMeshPoly<'a> {
    nav: &'a NavMesh,
    reference: PolyRef,
}

impl<'a> NavMeshPoly<'a> {
    pub fn reference(&self) -> PolyRef {
        self.reference
    }

    pub fn flags(&self) -> PolyFlags {
        self.nav
            .tile_mesh()
            .poly_flags(self.reference)
            .unwrap_or_default()
    }

    pub fn area(&self) -> u8 {
        self.nav
            .tile_mesh()
            .poly_area(self.reference)
            .unwrap_or_default()
    }

    pub fn vertices(&self) -> Vec<Vec3> {
        self.nav.poly_outline(self.reference)
    }

    pub fn centroid(&self) -> Vec3 {
        poly_center(&self.vertices())
    }

    pub fn debug_color(&self) -> Color {
        self.nav.debug_color(self.reference)
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav
    }
}

/// Mutable view of a polygon for flag and colour edits
#[derive(Debug)]
pub struct NavMeshPolyMut<'a> {
    nav: &'a mut NavMesh,
    reference: PolyRef,
}

impl NavMeshPolyMut<'_> {
    pub fn reference(&self) -> PolyRef {
        self.reference
    }

    pub fn as_poly(&self) -> NavMeshPoly<'_> {
        NavMeshPoly {
            nav: &*self.nav,
            reference: self.reference,
        }
    }

    pub fn flags(&self) -> PolyFlags {
        self.as_poly().flags()
    }

    /// Replaces the user flags matched by query filters
    pub fn set_flags(&mut self, flags: PolyFlags) -> Result<()> {
        self.nav.set_poly_flags(self.reference, flags)
    }

    /// Overrides the colour used for this polygon in debug geometry until
    /// its tile is rebuilt
    pub fn set_debug_color(&mut self, color: Color) {
        self.nav.set_debug_color(self.reference, color);
    }
}

impl NavMesh {
    /// View of polygon `reference`, `None` for a stale reference
    pub fn poly(&self, reference: PolyRef) -> Option<NavMeshPoly<'_>> {
        self.tile_mesh()
            .is_valid_poly_ref(reference)
            .then_some(NavMeshPoly {
                nav: self,
                reference,
            })
    }

    pub fn poly_mut(&mut self, reference: PolyRef) -> Option<NavMeshPolyMut<'_>> {
        if !self.tile_mesh().is_valid_poly_ref(reference) {
            return None;
        }
        Some(NavMeshPolyMut {
            nav: self,
            reference,
        })
    }

    /// Every polygon of the mesh
    pub fn polys(&self) -> impl Iterator<Item = NavMeshPoly<'_>> + '_ {
        self.tile_mesh().poly_refs().map(move |reference| NavMeshPoly {
            nav: self,
            reference,
        })
    }
}
