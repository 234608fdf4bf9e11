//! Region bookkeeping shared by all partitioning strategies, plus the
//! sweep based monotone and layer partitions.

use navforge_common::{Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y, NULL_AREA};

const NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone)]
struct Region {
    span_count: usize,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    ymin: u16,
    ymax: u16,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            ymin: 0xffff,
            ymax: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in &mut self.connections {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in &mut self.floors {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared = self.connections.iter().filter(|&&c| c == other.id).count();
        shared <= 1 && !self.floors.contains(&other.id)
    }

    fn add_unique_floor(&mut self, n: u16) {
        if !self.floors.contains(&n) {
            self.floors.push(n);
        }
    }

    fn add_unique_connection(&mut self, n: u16) {
        if !self.connections.contains(&n) {
            self.connections.push(n);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }
}

/// Merges region `b` into region `a`, splicing their contour connections
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;
    let acon = regions[a].connections.clone();
    let bcon = regions[b].connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for i in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + i) % acon.len()]);
    }
    for i in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + i) % bcon.len()]);
    }

    let floors = std::mem::take(&mut regions[b].floors);
    let span_count = regions[b].span_count;
    regions[b].span_count = 0;
    regions[b].connections.clear();

    let ra = &mut regions[a];
    ra.connections = merged;
    ra.remove_adjacent_neighbours();
    for f in floors {
        ra.add_unique_floor(f);
    }
    ra.span_count += span_count;
    true
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, z: i32, i: usize, dir: usize) -> bool {
    let r = chf
        .neighbor(x, z, i, dir)
        .map(|ai| src_reg[ai])
        .unwrap_or(0);
    r != src_reg[i]
}

/// Walks the region border clockwise collecting neighbouring region ids
fn walk_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let start_i = i;

    let mut cur_reg = chf
        .neighbor(x, z, i, dir)
        .map(|ai| src_reg[ai])
        .unwrap_or(0);
    cont.push(cur_reg);

    for _ in 0..40000 {
        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let r = chf
                .neighbor(x, z, i, dir)
                .map(|ai| src_reg[ai])
                .unwrap_or(0);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
            dir = (dir + 1) & 0x3;
        } else {
            let Some(ni) = chf.neighbor(x, z, i, dir) else {
                return;
            };
            x += get_dir_offset_x(dir);
            z += get_dir_offset_y(dir);
            i = ni;
            dir = (dir + 3) & 0x3;
        }
        if start_i == i && start_dir == dir {
            break;
        }
    }

    let mut j = 0;
    while cont.len() > 1 && j < cont.len() {
        let nj = (j + 1) % cont.len();
        if cont[j] == cont[nj] {
            cont.remove(j);
        } else {
            j += 1;
        }
    }
}

/// Assigns consecutive ids to the surviving regions and rewrites `src_reg`.
/// An id survives when at least one region carrying it still owns spans.
fn compress_region_ids(regions: &mut [Region], src_reg: &mut [u16]) -> u16 {
    let mut live = vec![false; regions.len()];
    for reg in regions.iter() {
        if reg.span_count > 0 && reg.id != 0 && (reg.id & BORDER_REG) == 0 {
            if let Some(l) = live.get_mut(reg.id as usize) {
                *l = true;
            }
        }
    }

    for reg in regions.iter_mut() {
        if (reg.id & BORDER_REG) == 0 && !live.get(reg.id as usize).copied().unwrap_or(false) {
            reg.id = 0;
        }
        reg.remap = reg.id != 0 && (reg.id & BORDER_REG) == 0;
    }

    let mut id_gen = 0u16;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        id_gen += 1;
        for reg in regions[i..].iter_mut() {
            if reg.id == old_id {
                reg.id = id_gen;
                reg.remap = false;
            }
        }
    }

    for r in src_reg.iter_mut() {
        if (*r & BORDER_REG) == 0 {
            *r = regions[*r as usize].id;
        }
    }
    id_gen
}

/// Removes isolated small regions and merges small regions into their
/// neighbours. Returns the new region count; overlapping region ids are
/// appended to `overlaps`.
pub(crate) fn merge_and_filter_regions(
    min_region_area: usize,
    merge_region_size: usize,
    max_region_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    overlaps: &mut Vec<u16>,
) -> u16 {
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Find the edge of each region and the connections around its contour
    for z in 0..chf.height {
        for x in 0..chf.width {
            let range = chf.cell_spans(x, z);
            for i in range.clone() {
                let r = src_reg[i] as usize;
                if r == 0 || r >= nreg {
                    continue;
                }
                regions[r].span_count += 1;

                for j in range.clone() {
                    if i == j {
                        continue;
                    }
                    let floor_id = src_reg[j];
                    if floor_id == 0 || floor_id as usize >= nreg {
                        continue;
                    }
                    if floor_id as usize == r {
                        regions[r].overlap = true;
                    }
                    regions[r].add_unique_floor(floor_id);
                }

                if !regions[r].connections.is_empty() {
                    continue;
                }
                regions[r].area_type = chf.areas[i];

                if let Some(ndir) = (0..4).find(|&dir| is_solid_edge(chf, src_reg, x, z, i, dir)) {
                    let mut cont = Vec::new();
                    walk_contour(x, z, i, ndir, chf, src_reg, &mut cont);
                    regions[r].connections = cont;
                }
            }
        }
    }

    // Remove too small regions
    let mut stack = Vec::new();
    let mut trace = Vec::new();
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.id == 0 || (reg.id & BORDER_REG) != 0 || reg.span_count == 0 || reg.visited {
            continue;
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();

        regions[i].visited = true;
        stack.push(i);
        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);
            for j in 0..regions[ri].connections.len() {
                let c = regions[ri].connections[j];
                if (c & BORDER_REG) != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[c as usize];
                if nei.visited || nei.id == 0 || (nei.id & BORDER_REG) != 0 {
                    continue;
                }
                nei.visited = true;
                stack.push(nei.id as usize);
            }
        }

        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge too small regions to neighbour regions
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == 0 || (reg.id & BORDER_REG) != 0 || reg.overlap || reg.span_count == 0 {
                continue;
            }
            if reg.span_count > merge_region_size && reg.is_connected_to_border() {
                continue;
            }

            let mut smallest = usize::MAX;
            let mut merge_id = reg.id;
            for &c in &reg.connections {
                if (c & BORDER_REG) != 0 {
                    continue;
                }
                let mreg = &regions[c as usize];
                if mreg.id == 0 || (mreg.id & BORDER_REG) != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg)
                {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id != reg.id {
                let old_id = reg.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    for other in regions.iter_mut() {
                        if other.id == 0 || (other.id & BORDER_REG) != 0 {
                            continue;
                        }
                        if other.id == old_id {
                            other.id = merge_id;
                        }
                        other.replace_neighbour(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    let max_regions = compress_region_ids(&mut regions, src_reg);
    overlaps.extend(regions.iter().filter(|r| r.overlap).map(|r| r.id));
    max_regions
}

/// Groups sweep regions into non-overlapping layers and removes small ones.
/// Returns the new region count.
pub(crate) fn merge_and_filter_layer_regions(
    min_region_area: usize,
    max_region_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) -> u16 {
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    let mut lregs = Vec::with_capacity(32);
    for z in 0..chf.height {
        for x in 0..chf.width {
            lregs.clear();
            for i in chf.cell_spans(x, z) {
                let ri = src_reg[i];
                if ri == 0 || ri as usize >= nreg {
                    continue;
                }
                let y = chf.spans[i].y;
                let reg = &mut regions[ri as usize];
                reg.span_count += 1;
                reg.area_type = chf.areas[i];
                reg.ymin = reg.ymin.min(y);
                reg.ymax = reg.ymax.max(y);
                lregs.push(ri);

                for dir in 0..4 {
                    let Some(ai) = chf.neighbor(x, z, i, dir) else {
                        continue;
                    };
                    let rai = src_reg[ai];
                    let reg = &mut regions[ri as usize];
                    if rai > 0 && (rai as usize) < nreg && rai != ri {
                        reg.add_unique_connection(rai);
                    }
                    if (rai & BORDER_REG) != 0 {
                        reg.connects_to_border = true;
                    }
                }
            }

            for a in 0..lregs.len() {
                for b in a + 1..lregs.len() {
                    if lregs[a] != lregs[b] {
                        regions[lregs[a] as usize].add_unique_floor(lregs[b]);
                        regions[lregs[b] as usize].add_unique_floor(lregs[a]);
                    }
                }
            }
        }
    }

    // Create 2D layers from regions
    for reg in regions.iter_mut() {
        reg.id = 0;
    }

    let mut layer_id = 1u16;
    let mut queue = std::collections::VecDeque::new();
    for i in 1..nreg {
        if regions[i].id != 0 {
            continue;
        }
        regions[i].id = layer_id;
        queue.clear();
        queue.push_back(i);

        while let Some(ri) = queue.pop_front() {
            for j in 0..regions[ri].connections.len() {
                let nei = regions[ri].connections[j] as usize;
                if regions[nei].id != 0
                    || regions[ri].area_type != regions[nei].area_type
                    || regions[i].floors.contains(&(nei as u16))
                {
                    continue;
                }
                queue.push_back(nei);
                regions[nei].id = layer_id;

                let floors = regions[nei].floors.clone();
                let (ymin, ymax, span_count, border) = {
                    let n = &regions[nei];
                    (n.ymin, n.ymax, n.span_count, n.connects_to_border)
                };
                regions[nei].span_count = 0;
                let root = &mut regions[i];
                for f in floors {
                    root.add_unique_floor(f);
                }
                root.ymin = root.ymin.min(ymin);
                root.ymax = root.ymax.max(ymax);
                root.span_count += span_count;
                root.connects_to_border |= border;
            }
        }
        layer_id += 1;
    }

    // Remove small regions
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.span_count > 0 && reg.span_count < min_region_area && !reg.connects_to_border {
            let id = reg.id;
            for other in regions.iter_mut() {
                if other.id == id {
                    other.id = 0;
                }
            }
        }
    }

    compress_region_ids(&mut regions, src_reg)
}

/// Paints every walkable span inside the rectangle with `reg_id`
pub(crate) fn paint_rect_region(
    minx: i32,
    maxx: i32,
    minz: i32,
    maxz: i32,
    reg_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) {
    for z in minz..maxz {
        for x in minx..maxx {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

/// Paints the four border strips with their own border regions.
/// Returns the next free region id.
pub(crate) fn paint_border_regions(
    border_size: i32,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) -> u16 {
    let mut id = 1u16;
    if border_size > 0 {
        let (w, h) = (chf.width, chf.height);
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect_region(0, bw, 0, h, id | BORDER_REG, chf, src_reg);
        id += 1;
        paint_rect_region(w - bw, w, 0, h, id | BORDER_REG, chf, src_reg);
        id += 1;
        paint_rect_region(0, w, 0, bh, id | BORDER_REG, chf, src_reg);
        id += 1;
        paint_rect_region(0, w, h - bh, h, id | BORDER_REG, chf, src_reg);
        id += 1;
    }
    id
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    id: u16,
    ns: u16,
    nei: u16,
}

/// Row by row sweep shared by the monotone and layer partitions.
/// Returns the region id upper bound.
fn sweep_regions(border_size: i32, chf: &CompactHeightfield, src_reg: &mut [u16]) -> Result<u16> {
    let (w, h) = (chf.width, chf.height);
    let mut id = paint_border_regions(border_size, chf, src_reg);

    let mut sweeps: Vec<SweepSpan> = vec![SweepSpan::default(); (w.max(h) + 1) as usize];
    let mut prev: Vec<u16> = Vec::new();

    for z in border_size..h - border_size {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid = 1u16;

        for x in border_size..w - border_size {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut previd = 0u16;
                if let Some(ai) = chf.neighbor(x, z, i, 0) {
                    if (src_reg[ai] & BORDER_REG) == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }

                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    if previd as usize >= sweeps.len() {
                        sweeps.resize(previd as usize + 1, SweepSpan::default());
                    }
                    sweeps[previd as usize] = SweepSpan::default();
                }

                if let Some(ai) = chf.neighbor(x, z, i, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && (nr & BORDER_REG) == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // Create unique ids
        for sweep in sweeps.iter_mut().take(rid as usize).skip(1) {
            if sweep.nei != NULL_NEI && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if id == u16::MAX {
                    return Err(Error::NavMeshGeneration(
                        "region id overflow during sweep".to_string(),
                    ));
                }
                sweep.id = id;
                id += 1;
            }
        }

        // Remap local sweep ids to region ids
        for x in border_size..w - border_size {
            for i in chf.cell_spans(x, z) {
                if src_reg[i] > 0 && src_reg[i] < rid {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok(id)
}

/// Partitions the walkable surface with a monotone row sweep
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let mut src_reg = vec![0u16; chf.span_count()];
    chf.border_size = border_size;
    let max_id = sweep_regions(border_size, chf, &mut src_reg)?;

    let mut overlaps = Vec::new();
    chf.max_regions = merge_and_filter_regions(
        min_region_area.max(0) as usize,
        merge_region_area.max(0) as usize,
        max_id,
        chf,
        &mut src_reg,
        &mut overlaps,
    );

    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }
    log::debug!("monotone partition produced {} regions", chf.max_regions);
    Ok(())
}

/// Partitions the walkable surface into overlap free layers of sweep regions
pub fn build_layer_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    let mut src_reg = vec![0u16; chf.span_count()];
    chf.border_size = border_size;
    let max_id = sweep_regions(border_size, chf, &mut src_reg)?;

    chf.max_regions = merge_and_filter_layer_regions(
        min_region_area.max(0) as usize,
        max_id,
        chf,
        &mut src_reg,
    );

    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }
    log::debug!("layer partition produced {} regions", chf.max_regions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::triangle_utils::WALKABLE_AREA;
    use glam::Vec3;

    fn plane_chf(width: i32, height: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            width,
            height,
            Vec3::ZERO,
            Vec3::new(width as f32, 10.0, height as f32),
            1.0,
            0.5,
        );
        for z in 0..height {
            for x in 0..width {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap()
    }

    fn region_at(chf: &CompactHeightfield, x: i32, z: i32) -> u16 {
        chf.spans[chf.cell_spans(x, z).start].reg
    }

    #[test]
    fn test_monotone_single_region_on_plane() {
        let mut chf = plane_chf(12, 12);
        build_regions_monotone(&mut chf, 0, 4, 20).unwrap();
        assert_eq!(chf.max_regions, 1);
        assert!(chf.spans.iter().all(|s| s.reg == 1));
    }

    #[test]
    fn test_border_strips_get_border_regions() {
        let mut chf = plane_chf(12, 12);
        build_regions_monotone(&mut chf, 2, 4, 20).unwrap();
        assert_ne!(region_at(&chf, 0, 5) & BORDER_REG, 0);
        assert_eq!(region_at(&chf, 5, 5) & BORDER_REG, 0);
        assert_ne!(region_at(&chf, 5, 5), 0);
    }

    #[test]
    fn test_separate_islands_keep_separate_regions() {
        let mut chf = plane_chf(12, 5);
        for z in 0..5 {
            let i = chf.cell_spans(6, z).start;
            chf.areas[i] = NULL_AREA;
        }
        build_layer_regions(&mut chf, 0, 4).unwrap();
        assert_eq!(chf.max_regions, 2);
        assert_ne!(region_at(&chf, 2, 2), region_at(&chf, 9, 2));
        assert_eq!(region_at(&chf, 6, 2), 0);
    }

    #[test]
    fn test_small_island_removed() {
        let mut chf = plane_chf(12, 5);
        for z in 0..5 {
            let i = chf.cell_spans(9, z).start;
            chf.areas[i] = NULL_AREA;
        }
        build_regions_monotone(&mut chf, 0, 16, 20).unwrap();
        assert_eq!(chf.max_regions, 1);
        assert_eq!(region_at(&chf, 11, 2), 0);
        assert_ne!(region_at(&chf, 2, 2), 0);
    }

    #[test]
    fn test_region_merge_splices_connections() {
        let mut regions = vec![Region::new(0), Region::new(1), Region::new(2)];
        regions[1].connections = vec![0, 2];
        regions[1].span_count = 5;
        regions[2].connections = vec![1, 0];
        regions[2].span_count = 3;
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[1].span_count, 8);
        assert_eq!(regions[2].span_count, 0);
        assert_eq!(regions[1].connections, vec![0]);
    }
}
