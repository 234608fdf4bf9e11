//! Compact heightfield representation
//!
//! The compact heightfield stores only the open space above walkable spans
//! and precomputes the connection from every span to its 4 neighbours.

use glam::Vec3;
use navforge_common::{Error, Result};

use crate::heightfield::Heightfield;
use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y, NULL_AREA};

/// Connection value meaning "no neighbour in this direction"
pub const NOT_CONNECTED: u32 = 0x3f;

/// Largest neighbour layer index a connection can encode
const MAX_LAYERS: usize = NOT_CONNECTED as usize - 1;

/// Region id flag for regions painted along the field border
pub const BORDER_REG: u16 = 0x8000;

/// Contour vertex flag for vertices on the region border
pub const BORDER_VERTEX: u32 = 0x10000;

/// Contour vertex flag for vertices where the area changes
pub const AREA_BORDER: u32 = 0x20000;

/// Mask extracting the region id from contour vertex data
pub const CONTOUR_REG_MASK: u32 = 0xffff;

/// A compact cell in the heightfield
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// Open space above a walkable surface
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSpan {
    /// Floor height of the span
    pub y: u16,
    /// Region id (0 = not in region)
    pub reg: u16,
    /// Packed neighbour connections, 6 bits per direction
    pub con: u32,
    /// Clearance above the floor
    pub h: u8,
}

impl CompactSpan {
    /// Neighbour layer index in `dir`, or `NOT_CONNECTED`
    #[inline]
    pub fn get_con(&self, dir: usize) -> u32 {
        let shift = (dir as u32) * 6;
        (self.con >> shift) & 0x3f
    }

    /// Sets the neighbour layer index in `dir`
    #[inline]
    pub fn set_con(&mut self, dir: usize, i: u32) {
        let shift = (dir as u32) * 6;
        self.con = (self.con & !(0x3f << shift)) | ((i & 0x3f) << shift);
    }

    /// Returns true if the span has a neighbour in `dir`
    #[inline]
    pub fn is_connected(&self, dir: usize) -> bool {
        self.get_con(dir) != NOT_CONNECTED
    }
}

/// Compact heightfield structure
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// Walkable height used during the build
    pub walkable_height: i32,
    /// Walkable climb used during the build
    pub walkable_climb: i32,
    /// Border size in cells
    pub border_size: i32,
    /// Maximum value in the distance field
    pub max_distance: u16,
    /// Number of regions after partitioning (exclusive upper bound)
    pub max_regions: u16,

    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    /// Grid of compact cells
    pub cells: Vec<CompactCell>,
    /// Array of compact spans
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest border per span
    pub dist: Vec<u16>,
    /// Area id per span
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from the walkable spans of `hf`
    pub fn build_from_heightfield(
        walkable_height: i32,
        walkable_climb: i32,
        hf: &Heightfield,
    ) -> Result<Self> {
        const MAX_HEIGHT: i32 = 0xffff;

        let walkable_spans = hf.walkable_span_count();
        let cell_count = (hf.width * hf.height) as usize;

        let mut cells = vec![CompactCell::default(); cell_count];
        let mut spans = Vec::with_capacity(walkable_spans);
        let mut areas = Vec::with_capacity(walkable_spans);

        for z in 0..hf.height {
            for x in 0..hf.width {
                let column = hf.column(x, z);
                let cell = &mut cells[(x + z * hf.width) as usize];
                cell.index = spans.len() as u32;
                for (i, s) in column.iter().enumerate() {
                    if s.area == NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = column
                        .get(i + 1)
                        .map(|n| n.smin as i32)
                        .unwrap_or(MAX_HEIGHT);
                    spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: 0,
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    areas.push(s.area);
                    cell.count += 1;
                }
            }
        }

        if spans.len() != walkable_spans {
            return Err(Error::NavMeshGeneration(
                "compact span count mismatch".to_string(),
            ));
        }

        let mut chf = CompactHeightfield {
            width: hf.width,
            height: hf.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax: hf.bmax + Vec3::new(0.0, walkable_height as f32 * hf.ch, 0.0),
            cs: hf.cs,
            ch: hf.ch,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };

        chf.build_connections();
        Ok(chf)
    }

    fn build_connections(&mut self) {
        let mut too_high_neighbour = 0;

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    let s = self.spans[i];
                    let mut con = s;
                    for dir in 0..4 {
                        con.set_con(dir, NOT_CONNECTED);
                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_y(dir);
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }
                        let nc = self.cells[(nx + nz * self.width) as usize];
                        for k in nc.index..nc.index + nc.count {
                            let ns = &self.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            if top - bot >= self.walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= self.walkable_climb
                            {
                                let layer = (k - nc.index) as usize;
                                if layer > MAX_LAYERS {
                                    too_high_neighbour = too_high_neighbour.max(layer);
                                    continue;
                                }
                                con.set_con(dir, layer as u32);
                                break;
                            }
                        }
                    }
                    self.spans[i].con = con.con;
                }
            }
        }

        if too_high_neighbour > MAX_LAYERS {
            log::warn!(
                "heightfield has too many layers {too_high_neighbour} (max: {MAX_LAYERS})"
            );
        }
    }

    /// Number of spans
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Cell at (x, z)
    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Absolute span indices of the cell at (x, z)
    #[inline]
    pub fn cell_spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let c = self.cell(x, z);
        c.index as usize..(c.index + c.count) as usize
    }

    /// Absolute index of the neighbour of span `i` at (x, z) in `dir`
    #[inline]
    pub fn neighbor(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let s = &self.spans[i];
        if !s.is_connected(dir) {
            return None;
        }
        let nx = x + get_dir_offset_x(dir);
        let nz = z + get_dir_offset_y(dir);
        Some(self.cell(nx, nz).index as usize + s.get_con(dir) as usize)
    }

    /// Iterates over `(x, z, span_index)` for every span
    pub fn iter_spans(&self) -> impl Iterator<Item = (i32, i32, usize)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).flat_map(move |x| self.cell_spans(x, z).map(move |i| (x, z, i)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle_utils::WALKABLE_AREA;

    fn flat_field(size: i32) -> Heightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        hf
    }

    #[test]
    fn test_con_packing() {
        let mut s = CompactSpan::default();
        for dir in 0..4 {
            s.set_con(dir, NOT_CONNECTED);
        }
        s.set_con(2, 5);
        assert_eq!(s.get_con(2), 5);
        assert!(!s.is_connected(0));
        assert!(s.is_connected(2));
        s.set_con(2, NOT_CONNECTED);
        assert!(!s.is_connected(2));
    }

    #[test]
    fn test_compact_flat_connectivity() {
        let hf = flat_field(4);
        let chf = CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap();
        assert_eq!(chf.span_count(), 16);

        let i = chf.cell_spans(1, 1).start;
        for dir in 0..4 {
            assert!(chf.neighbor(1, 1, i, dir).is_some());
        }

        let corner = chf.cell_spans(0, 0).start;
        assert!(chf.neighbor(0, 0, corner, 0).is_none());
        assert!(chf.neighbor(0, 0, corner, 3).is_none());
        let right = chf.neighbor(0, 0, corner, 2).unwrap();
        assert_eq!(right, chf.cell_spans(1, 0).start);
    }

    #[test]
    fn test_step_too_high_is_not_connected() {
        let mut hf = flat_field(2);
        hf.add_span(1, 0, 2, 6, WALKABLE_AREA, 1);
        let chf = CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap();
        let i = chf.cell_spans(0, 0).start;
        assert!(chf.neighbor(0, 0, i, 2).is_none());
        assert!(chf.neighbor(0, 0, i, 1).is_some());
        assert_eq!(chf.iter_spans().count(), 4);
    }
}
