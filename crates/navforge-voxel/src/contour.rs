//! Contour generation
//!
//! Traces the outline of every region in the compact heightfield and
//! simplifies it into a polygon whose edges stay within the configured
//! error of the raw voxel border.

use glam::Vec3;
use navforge_common::Result;

use crate::compact_heightfield::{
    CompactHeightfield, AREA_BORDER, BORDER_REG, BORDER_VERTEX, CONTOUR_REG_MASK,
};
use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y};

/// A vertex in a contour, in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContourVertex {
    /// X-coordinate (cell units)
    pub x: i32,
    /// Y-coordinate (height units)
    pub y: i32,
    /// Z-coordinate (cell units)
    pub z: i32,
    /// Neighbour region id in the low 16 bits plus `BORDER_VERTEX`/`AREA_BORDER`
    pub flags: u32,
}

impl ContourVertex {
    /// Creates a new contour vertex
    pub fn new(x: i32, y: i32, z: i32, flags: u32) -> Self {
        Self { x, y, z, flags }
    }

    /// Region on the other side of the edge starting at this vertex
    pub fn neighbor_region(&self) -> u16 {
        (self.flags & CONTOUR_REG_MASK) as u16
    }

    #[inline]
    pub(crate) fn xz(&self) -> [i32; 2] {
        [self.x, self.z]
    }
}

/// A simplified region outline
#[derive(Debug, Clone)]
pub struct Contour {
    /// Simplified vertices
    pub verts: Vec<ContourVertex>,
    /// Raw vertices before simplification
    pub rverts: Vec<ContourVertex>,
    /// Region id of the contour
    pub reg: u16,
    /// Area id of the contour
    pub area: u8,
}

/// Build flags for contour generation
#[derive(Debug, Clone, Copy)]
pub struct BuildContoursFlags {
    /// Whether to tessellate solid (impassable) edges during simplification
    pub tess_wall_edges: bool,
    /// Whether to tessellate edges between areas during simplification
    pub tess_area_edges: bool,
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self {
            tess_wall_edges: true,
            tess_area_edges: false,
        }
    }
}

/// A set of contours
#[derive(Debug, Clone)]
pub struct ContourSet {
    /// Contours in the set
    pub contours: Vec<Contour>,
    /// The minimum bounds, border excluded
    pub bmin: Vec3,
    /// The maximum bounds, border excluded
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Width of the set, border excluded
    pub width: i32,
    /// Height of the set, border excluded
    pub height: i32,
    /// Border size used during generation
    pub border_size: i32,
    /// Maximum edge error during simplification
    pub max_error: f32,
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

#[inline]
pub(crate) fn area2(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> i32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
}

#[inline]
pub(crate) fn left(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments share a point interior to both
pub(crate) fn intersect_prop(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true if `c` lies on the closed segment `ab`
pub(crate) fn between(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[1] <= c[1] && c[1] <= b[1]) || (a[1] >= c[1] && c[1] >= b[1])
    }
}

/// Returns true if the segments `ab` and `cd` intersect properly or improperly
pub(crate) fn intersect(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Height of the contour corner at the start of edge `dir`, flagging
/// vertices that sit between two border regions.
fn get_corner_height(
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
    chf: &CompactHeightfield,
    is_border_vertex: &mut bool,
) -> i32 {
    let s = &chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 0x3;

    let mut regs = [0u32; 4];
    regs[0] = s.reg as u32 | ((chf.areas[i] as u32) << 16);

    if let Some(ai) = chf.neighbor(x, z, i, dir) {
        let ax = x + get_dir_offset_x(dir);
        let az = z + get_dir_offset_y(dir);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[1] = chf.spans[ai].reg as u32 | ((chf.areas[ai] as u32) << 16);
        if let Some(ai2) = chf.neighbor(ax, az, ai, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = chf.spans[ai2].reg as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }
    if let Some(ai) = chf.neighbor(x, z, i, dirp) {
        let ax = x + get_dir_offset_x(dirp);
        let az = z + get_dir_offset_y(dirp);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[3] = chf.spans[ai].reg as u32 | ((chf.areas[ai] as u32) << 16);
        if let Some(ai2) = chf.neighbor(ax, az, ai, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = chf.spans[ai2].reg as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }

    let border = BORDER_REG as u32;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;

        // Two same exterior cells in a row followed by two interior cells
        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            *is_border_vertex = true;
            break;
        }
    }

    ch
}

fn walk_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    chf: &CompactHeightfield,
    flags: &mut [u8],
    points: &mut Vec<ContourVertex>,
) {
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..40000 {
        if flags[i] & (1 << dir) != 0 {
            let mut is_border_vertex = false;
            let mut is_area_border = false;
            let mut px = x;
            let py = get_corner_height(x, z, i, dir, chf, &mut is_border_vertex);
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0u32;
            if let Some(ai) = chf.neighbor(x, z, i, dir) {
                r = chf.spans[ai].reg as u32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= BORDER_VERTEX;
            }
            if is_area_border {
                r |= AREA_BORDER;
            }
            points.push(ContourVertex::new(px, py, pz, r));

            flags[i] &= !(1 << dir);
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
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Simplified vertex plus the index of the raw vertex it came from
#[derive(Debug, Clone, Copy)]
struct SimplifiedVertex {
    x: i32,
    y: i32,
    z: i32,
    raw: usize,
}

fn simplify_contour(
    points: &[ContourVertex],
    max_error: f32,
    max_edge_len: i32,
    build_flags: BuildContoursFlags,
) -> Vec<ContourVertex> {
    let pn = points.len();
    let mut simplified: Vec<SimplifiedVertex> = Vec::new();
    let sv = |i: usize| SimplifiedVertex {
        x: points[i].x,
        y: points[i].y,
        z: points[i].z,
        raw: i,
    };

    let has_connections = points.iter().any(|p| (p.flags & CONTOUR_REG_MASK) != 0);
    if has_connections {
        // Add a point wherever the neighbouring region or area changes
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs =
                (points[i].flags & CONTOUR_REG_MASK) != (points[ii].flags & CONTOUR_REG_MASK);
            let area_borders =
                (points[i].flags & AREA_BORDER) != (points[ii].flags & AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(sv(i));
            }
        }
    }

    if simplified.is_empty() {
        // No connections at all, seed with the lower-left and upper-right vertices
        let mut ll = 0;
        let mut ur = 0;
        for (i, p) in points.iter().enumerate() {
            let (lx, lz) = (points[ll].x, points[ll].z);
            if p.x < lx || (p.x == lx && p.z < lz) {
                ll = i;
            }
            let (ux, uz) = (points[ur].x, points[ur].z);
            if p.x > ux || (p.x == ux && p.z > uz) {
                ur = i;
            }
        }
        simplified.push(sv(ll));
        simplified.push(sv(ur));
    }

    // Add points until all raw points are within error tolerance
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut ax, mut az, ai) = (simplified[i].x, simplified[i].z, simplified[i].raw);
        let (mut bx, mut bz, bi) = (simplified[ii].x, simplified[ii].z, simplified[ii].raw);

        let mut maxd = 0.0;
        let mut maxi = None;

        // Traverse in lexicographic order so opposite segments agree
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        // Tessellate only outer edges or edges between areas
        if (points[ci].flags & CONTOUR_REG_MASK) == 0 || (points[ci].flags & AREA_BORDER) != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci].x, points[ci].z, ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(m) if maxd > max_error_sqr => simplified.insert(i + 1, sv(m)),
            _ => i += 1,
        }
    }

    // Split too long edges
    if max_edge_len > 0 && (build_flags.tess_wall_edges || build_flags.tess_area_edges) {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (ax, az, ai) = (simplified[i].x, simplified[i].z, simplified[i].raw);
            let (bx, bz, bi) = (simplified[ii].x, simplified[ii].z, simplified[ii].raw);

            let mut maxi = None;
            let ci = (ai + 1) % pn;

            let tess = (build_flags.tess_wall_edges && (points[ci].flags & CONTOUR_REG_MASK) == 0)
                || (build_flags.tess_area_edges && (points[ci].flags & AREA_BORDER) != 0);

            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(m) => simplified.insert(i + 1, sv(m)),
                None => i += 1,
            }
        }
    }

    // The edge vertex flag comes from the current raw point, the neighbour
    // region from the next raw point
    simplified
        .iter()
        .map(|s| {
            let ai = (s.raw + 1) % pn;
            let bi = s.raw;
            let flags = (points[ai].flags & (CONTOUR_REG_MASK | AREA_BORDER))
                | (points[bi].flags & BORDER_VERTEX);
            ContourVertex::new(s.x, s.y, s.z, flags)
        })
        .collect()
}

fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if simplified.len() > 1 && simplified[i].xz() == simplified[ni].xz() {
            simplified.remove(i);
        }
        i += 1;
    }
}

/// Twice the signed area of a contour on the xz-plane
pub(crate) fn calc_area_of_polygon_2d(verts: &[ContourVertex]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        area += vi.x * vj.z - vj.x * vi.z;
        j = i;
    }
    (area + 1) / 2
}

fn in_cone(i: usize, verts: &[ContourVertex], pj: [i32; 2]) -> bool {
    let n = verts.len();
    let pi = verts[i].xz();
    let pi1 = verts[next(i, n)].xz();
    let pin1 = verts[prev(i, n)].xz();

    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn intersect_seg_contour(
    d0: [i32; 2],
    d1: [i32; 2],
    skip: Option<usize>,
    verts: &[ContourVertex],
) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = next(k, n);
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = verts[k].xz();
        let p1 = verts[k1].xz();
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn merge_contours(ca: &mut Contour, cb: &mut Contour, ia: usize, ib: usize) {
    let na = ca.verts.len();
    let nb = cb.verts.len();
    let mut verts = Vec::with_capacity(na + nb + 2);
    for i in 0..=na {
        verts.push(ca.verts[(ia + i) % na]);
    }
    for i in 0..=nb {
        verts.push(cb.verts[(ib + i) % nb]);
    }
    ca.verts = verts;
    cb.verts.clear();
}

fn find_left_most_vertex(contour: &Contour) -> (i32, i32, usize) {
    let mut best = (contour.verts[0].x, contour.verts[0].z, 0);
    for (i, v) in contour.verts.iter().enumerate().skip(1) {
        if v.x < best.0 || (v.x == best.0 && v.z < best.1) {
            best = (v.x, v.z, i);
        }
    }
    best
}

/// Merges hole contours into their region outline through diagonals that
/// cross neither the outline nor another hole.
fn merge_region_holes(outline: &mut Contour, mut holes: Vec<Contour>) {
    let mut ordered: Vec<(i32, i32, usize, usize)> = holes
        .iter()
        .enumerate()
        .map(|(h, c)| {
            let (minx, minz, leftmost) = find_left_most_vertex(c);
            (minx, minz, leftmost, h)
        })
        .collect();
    ordered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    for oi in 0..ordered.len() {
        let (_, _, leftmost, h) = ordered[oi];
        let hole_len = holes[h].verts.len();
        let mut best_vertex = leftmost;
        let mut index = None;

        for _ in 0..hole_len {
            let corner = holes[h].verts[best_vertex].xz();
            let mut diags: Vec<(usize, i32)> = (0..outline.verts.len())
                .filter(|&j| in_cone(j, &outline.verts, corner))
                .map(|j| {
                    let dx = outline.verts[j].x - corner[0];
                    let dz = outline.verts[j].z - corner[1];
                    (j, dx * dx + dz * dz)
                })
                .collect();
            diags.sort_by_key(|d| d.1);

            for &(vert, _) in &diags {
                let pt = outline.verts[vert].xz();
                let mut crosses = intersect_seg_contour(pt, corner, Some(vert), &outline.verts);
                for &(_, _, _, other) in &ordered[oi..] {
                    if crosses {
                        break;
                    }
                    crosses |= intersect_seg_contour(pt, corner, None, &holes[other].verts);
                }
                if !crosses {
                    index = Some(vert);
                    break;
                }
            }
            if index.is_some() {
                break;
            }
            best_vertex = (best_vertex + 1) % hole_len;
        }

        match index {
            Some(ia) => merge_contours(outline, &mut holes[h], ia, best_vertex),
            None => log::warn!(
                "failed to find merge points for hole in region {}",
                outline.reg
            ),
        }
    }
}

impl ContourSet {
    /// Builds simplified region contours from a partitioned compact heightfield
    pub fn build(
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        build_flags: BuildContoursFlags,
    ) -> Result<Self> {
        let border_size = chf.border_size;
        let pad = border_size as f32 * chf.cs;
        let mut cset = ContourSet {
            contours: Vec::new(),
            bmin: chf.bmin + Vec3::new(pad, 0.0, pad),
            bmax: chf.bmax - Vec3::new(pad, 0.0, pad),
            cs: chf.cs,
            ch: chf.ch,
            width: chf.width - border_size * 2,
            height: chf.height - border_size * 2,
            border_size,
            max_error,
        };

        // Mark boundaries, one bit per edge that leaves the region
        let mut flags = vec![0u8; chf.span_count()];
        for (x, z, i) in chf.iter_spans() {
            let reg = chf.spans[i].reg;
            if reg == 0 || (reg & BORDER_REG) != 0 {
                continue;
            }
            let mut res = 0u8;
            for dir in 0..4 {
                let r = chf
                    .neighbor(x, z, i, dir)
                    .map(|ai| chf.spans[ai].reg)
                    .unwrap_or(0);
                if r == reg {
                    res |= 1 << dir;
                }
            }
            flags[i] = res ^ 0xf;
        }

        let mut verts = Vec::with_capacity(256);
        for (x, z, i) in chf.iter_spans() {
            if flags[i] == 0 || flags[i] == 0xf {
                flags[i] = 0;
                continue;
            }
            let reg = chf.spans[i].reg;
            if reg == 0 || (reg & BORDER_REG) != 0 {
                continue;
            }
            let area = chf.areas[i];

            verts.clear();
            walk_contour(x, z, i, chf, &mut flags, &mut verts);
            let mut simplified = simplify_contour(&verts, max_error, max_edge_len, build_flags);
            remove_degenerate_segments(&mut simplified);

            if simplified.len() >= 3 {
                let unborder = |v: &ContourVertex| {
                    ContourVertex::new(v.x - border_size, v.y, v.z - border_size, v.flags)
                };
                cset.contours.push(Contour {
                    verts: simplified.iter().map(unborder).collect(),
                    rverts: verts.iter().map(unborder).collect(),
                    reg,
                    area,
                });
            }
        }

        cset.merge_holes(chf.max_regions);
        log::debug!("built {} contours", cset.contours.len());
        Ok(cset)
    }

    /// Merges clockwise hole contours into their region outline
    fn merge_holes(&mut self, max_regions: u16) {
        let winding: Vec<i32> = self
            .contours
            .iter()
            .map(|c| if calc_area_of_polygon_2d(&c.verts) < 0 { -1 } else { 1 })
            .collect();
        if !winding.iter().any(|&w| w < 0) {
            return;
        }

        let nregions = max_regions as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; nregions];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];
        for (i, c) in self.contours.iter().enumerate() {
            let reg = c.reg as usize;
            if reg >= nregions {
                continue;
            }
            if winding[i] > 0 {
                if outlines[reg].is_some() {
                    log::error!("multiple outlines for region {reg}");
                }
                outlines[reg] = Some(i);
            } else {
                holes[reg].push(i);
            }
        }

        let mut merged = vec![false; self.contours.len()];
        for reg in 0..nregions {
            if holes[reg].is_empty() {
                continue;
            }
            let Some(outline_idx) = outlines[reg] else {
                log::error!("missing outline for region {reg}");
                continue;
            };
            let hole_contours: Vec<Contour> = holes[reg]
                .iter()
                .map(|&h| self.contours[h].clone())
                .collect();
            merge_region_holes(&mut self.contours[outline_idx], hole_contours);
            for &h in &holes[reg] {
                merged[h] = true;
            }
        }

        let mut idx = 0;
        self.contours.retain(|_| {
            let keep = !merged[idx];
            idx += 1;
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::regions::build_regions_monotone;
    use crate::triangle_utils::{NULL_AREA, WALKABLE_AREA};

    fn plane_chf(size: i32) -> CompactHeightfield {
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
        CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap()
    }

    #[test]
    fn test_integer_geometry_helpers() {
        assert!(left([0, 0], [0, 2], [1, 1]) || left([0, 0], [0, 2], [-1, 1]));
        assert!(collinear([0, 0], [1, 1], [2, 2]));
        assert!(intersect([0, 0], [2, 2], [0, 2], [2, 0]));
        assert!(!intersect([0, 0], [1, 0], [0, 1], [1, 1]));
        assert!(between([0, 0], [4, 0], [2, 0]));
    }

    #[test]
    fn test_plane_contour_is_square() {
        let mut chf = plane_chf(10);
        build_regions_monotone(&mut chf, 0, 1, 1).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::default()).unwrap();

        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.reg, 1);
        let mut corners: Vec<(i32, i32)> = contour.verts.iter().map(|v| (v.x, v.z)).collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 10), (10, 0), (10, 10)]);
        assert!(calc_area_of_polygon_2d(&contour.verts) > 0);
    }

    #[test]
    fn test_long_edges_are_split() {
        let mut chf = plane_chf(20);
        build_regions_monotone(&mut chf, 0, 1, 1).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 6, BuildContoursFlags::default()).unwrap();
        let contour = &cset.contours[0];
        assert!(contour.verts.len() > 4);
        let n = contour.verts.len();
        for i in 0..n {
            let a = contour.verts[i];
            let b = contour.verts[(i + 1) % n];
            let d2 = (a.x - b.x).pow(2) + (a.z - b.z).pow(2);
            assert!(d2 <= 36, "edge {i} too long");
        }
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        let mut chf = plane_chf(12);
        for z in 4..8 {
            for x in 4..8 {
                let i = chf.cell_spans(x, z).start;
                chf.areas[i] = NULL_AREA;
            }
        }
        crate::distance_field::build_distance_field(&mut chf).unwrap();
        crate::watershed::build_regions_watershed(&mut chf, 0, 1, 0).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        for c in &cset.contours {
            assert!(calc_area_of_polygon_2d(&c.verts) > 0);
        }
    }
}
