//! Heightfield representation
//!
//! The heightfield is the first data structure in the pipeline. It's a 2D
//! grid of columns, each holding the solid spans rasterized into it sorted
//! from bottom to top.

use glam::Vec3;

use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y, NULL_AREA};

/// Largest span height a heightfield can store
pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

/// Height used for open space above the topmost span
const MAX_HEIGHT: i32 = 0xffff;

/// A solid vertical segment in a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// The lower limit of the span, in cell heights
    pub smin: u16,
    /// The upper limit of the span, in cell heights
    pub smax: u16,
    /// Area ID (0 = not walkable)
    pub area: u8,
}

impl Span {
    /// Creates a new span
    pub fn new(smin: u16, smax: u16, area: u8) -> Self {
        Self { smin, smax, area }
    }
}

/// Heightfield structure holding a grid of span columns
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,

    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,

    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates a new empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); cells],
        }
    }

    /// Spans of the column at (x, z), bottom to top
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return &[];
        }
        &self.columns[(x + z * self.width) as usize]
    }

    /// Mutable spans of the column at (x, z)
    pub fn column_mut(&mut self, x: i32, z: i32) -> &mut [Span] {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return &mut [];
        }
        let idx = (x + z * self.width) as usize;
        &mut self.columns[idx]
    }

    /// Total number of spans
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Number of spans with a walkable area
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != NULL_AREA)
            .count()
    }

    /// Inserts a span, merging it with every span it overlaps.
    ///
    /// When the merged top is within `flag_merge_threshold` of an existing
    /// span's top the higher area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return;
        }
        let column = &mut self.columns[(x + z * self.width) as usize];
        let mut new_span = Span::new(smin, smax, area);

        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > new_span.smax {
                break;
            }
            if cur.smax < new_span.smin {
                i += 1;
                continue;
            }

            new_span.smin = new_span.smin.min(cur.smin);
            new_span.smax = new_span.smax.max(cur.smax);
            if (new_span.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(cur.area);
            }
            column.remove(i);
        }
        column.insert(i, new_span);
    }

    /// Marks non-walkable spans as walkable when their top is within
    /// `walkable_climb` of the walkable span directly below.
    ///
    /// Lets the agent step onto curbs and stair steps.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous: Option<(u16, u8, bool)> = None;
            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if let Some((prev_smax, prev_area, prev_walkable)) = previous {
                    if !walkable
                        && prev_walkable
                        && (span.smax as i32 - prev_smax as i32).abs() <= walkable_climb
                    {
                        span.area = prev_area;
                    }
                }
                previous = Some((span.smax, span.area, walkable));
            }
        }
    }

    /// Removes walkable spans next to a drop larger than `walkable_climb`,
    /// or whose accessible neighbours differ too much in height.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let mut ledges = Vec::new();

        for z in 0..self.height {
            for x in 0..self.width {
                let column = self.column(x, z);
                for (i, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = column
                        .get(i + 1)
                        .map(|n| n.smin as i32)
                        .unwrap_or(MAX_HEIGHT);

                    let mut min_neighbor_height = MAX_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let dx = x + get_dir_offset_x(dir);
                        let dz = z + get_dir_offset_y(dir);
                        if dx < 0 || dz < 0 || dx >= self.width || dz >= self.height {
                            min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbor = self.column(dx, dz);
                        let neighbor_bot = -walkable_climb;
                        let neighbor_top = neighbor
                            .first()
                            .map(|n| n.smin as i32)
                            .unwrap_or(MAX_HEIGHT);
                        if top.min(neighbor_top) - bot.max(neighbor_bot) > walkable_height {
                            min_neighbor_height = min_neighbor_height.min(neighbor_bot - bot);
                        }

                        for (j, ns) in neighbor.iter().enumerate() {
                            let neighbor_bot = ns.smax as i32;
                            let neighbor_top = neighbor
                                .get(j + 1)
                                .map(|n| n.smin as i32)
                                .unwrap_or(MAX_HEIGHT);
                            if top.min(neighbor_top) - bot.max(neighbor_bot) > walkable_height {
                                min_neighbor_height = min_neighbor_height.min(neighbor_bot - bot);
                                if (neighbor_bot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(neighbor_bot);
                                    accessible_max = accessible_max.max(neighbor_bot);
                                }
                            }
                        }
                    }

                    if min_neighbor_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        ledges.push((x, z, i));
                    }
                }
            }
        }

        for (x, z, i) in ledges {
            self.column_mut(x, z)[i].area = NULL_AREA;
        }
    }

    /// Removes walkable spans without enough clearance above them
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for i in 0..column.len() {
                let bot = column[i].smax as i32;
                let top = column
                    .get(i + 1)
                    .map(|n| n.smin as i32)
                    .unwrap_or(MAX_HEIGHT);
                if top - bot < walkable_height {
                    column[i].area = NULL_AREA;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle_utils::WALKABLE_AREA;

    fn field(width: i32, height: i32) -> Heightfield {
        Heightfield::new(
            width,
            height,
            Vec3::ZERO,
            Vec3::new(width as f32, 10.0, height as f32),
            1.0,
            0.5,
        )
    }

    #[test]
    fn test_add_span_merges_overlaps() {
        let mut hf = field(2, 2);
        hf.add_span(0, 0, 0, 4, NULL_AREA, 1);
        hf.add_span(0, 0, 10, 12, WALKABLE_AREA, 1);
        hf.add_span(0, 0, 3, 11, WALKABLE_AREA, 1);

        let column = hf.column(0, 0);
        assert_eq!(column.len(), 1);
        assert_eq!(column[0].smin, 0);
        assert_eq!(column[0].smax, 12);
        assert_eq!(column[0].area, WALKABLE_AREA);
    }

    #[test]
    fn test_add_span_keeps_sorted_gaps() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 20, 22, WALKABLE_AREA, 1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(0, 0, 10, 12, WALKABLE_AREA, 1);
        let mins: Vec<u16> = hf.column(0, 0).iter().map(|s| s.smin).collect();
        assert_eq!(mins, vec![0, 10, 20]);
        assert_eq!(hf.span_count(), 3);

        hf.add_span(5, 5, 0, 1, WALKABLE_AREA, 1);
        assert_eq!(hf.span_count(), 3);
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(0, 0, 4, 6, WALKABLE_AREA, 1);
        hf.filter_walkable_low_height_spans(3);
        let column = hf.column(0, 0);
        assert_eq!(column[0].area, NULL_AREA);
        assert_eq!(column[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_low_hanging_obstacle_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1);
        hf.add_span(0, 0, 3, 3, NULL_AREA, 1);
        hf.filter_low_hanging_walkable_obstacles(1);
        assert_eq!(hf.column(0, 0)[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_field_edge() {
        let mut hf = field(3, 3);
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        hf.filter_ledge_spans(4, 1);
        assert_eq!(hf.column(1, 1)[0].area, WALKABLE_AREA);
        assert_eq!(hf.column(0, 1)[0].area, NULL_AREA);
    }
}
