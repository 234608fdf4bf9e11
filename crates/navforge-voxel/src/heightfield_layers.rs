//! Height layers
//!
//! Slices a compact heightfield into 2.5D layers that do not overlap
//! vertically. Each layer stores one height per cell, which is the format
//! the tile cache compresses and stores.

use glam::Vec3;
use navforge_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y, NULL_AREA};

const MAX_LAYER_REGIONS: usize = 255;
const MAX_NEIS: usize = 16;
const NO_REGION: u8 = 0xff;
/// Height value of an empty layer cell
pub const LAYER_EMPTY_HEIGHT: u8 = 0xff;

#[derive(Debug, Clone)]
struct LayerRegion {
    layers: Vec<u8>,
    neis: Vec<u8>,
    ymin: u16,
    ymax: u16,
    layer_id: u8,
    base: bool,
}

impl Default for LayerRegion {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            neis: Vec::new(),
            ymin: u16::MAX,
            ymax: 0,
            layer_id: NO_REGION,
            base: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Number of samples connected to `nei`
    ns: u16,
    /// Final region id
    id: u8,
    /// Neighbour region in the previous row
    nei: u8,
}

/// One height layer of a tile
#[derive(Debug, Clone, PartialEq)]
pub struct HeightfieldLayer {
    /// Minimum bounds in world space
    pub bmin: Vec3,
    /// Maximum bounds in world space
    pub bmax: Vec3,
    /// Cell size
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Width in cells
    pub width: i32,
    /// Depth in cells
    pub height: i32,
    /// Used cell rectangle
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    /// Height range, in cell heights above `bmin.y`
    pub hmin: i32,
    pub hmax: i32,
    /// Per-cell height relative to `hmin`, `LAYER_EMPTY_HEIGHT` when unused
    pub heights: Vec<u8>,
    /// Per-cell area id
    pub areas: Vec<u8>,
    /// Per-cell connections: bits 0-3 walkable neighbours, bits 4-7 portals
    pub cons: Vec<u8>,
}

impl HeightfieldLayer {
    /// Number of cells that hold a walkable height
    pub fn used_cells(&self) -> usize {
        self.heights
            .iter()
            .filter(|&&h| h != LAYER_EMPTY_HEIGHT)
            .count()
    }
}

fn add_unique(list: &mut Vec<u8>, v: u8, cap: usize) -> bool {
    if list.contains(&v) {
        return true;
    }
    if list.len() >= cap {
        return false;
    }
    list.push(v);
    true
}

fn overlap_range(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Monotone sweep partition. Returns the per-span region ids and the
/// region count.
fn partition_monotone(chf: &CompactHeightfield, border: i32) -> Result<(Vec<u8>, usize)> {
    let w = chf.width;
    let h = chf.height;
    let mut src_reg = vec![NO_REGION; chf.span_count()];
    let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(w.max(0) as usize);
    let mut prev_count = vec![0u16; MAX_LAYER_REGIONS + 1];
    let mut reg_id: usize = 0;

    for z in border..(h - border) {
        prev_count[..reg_id].fill(0);
        sweeps.clear();

        for x in border..(w - border) {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut sid = NO_REGION;
                if let Some(ai) = chf.neighbor(x, z, i, 0) {
                    if chf.areas[ai] != NULL_AREA && src_reg[ai] != NO_REGION {
                        sid = src_reg[ai];
                    }
                }
                if sid == NO_REGION {
                    if sweeps.len() >= NO_REGION as usize {
                        return Err(Error::NavMeshGeneration(
                            "layer sweep overflow".to_string(),
                        ));
                    }
                    sid = sweeps.len() as u8;
                    sweeps.push(SweepSpan {
                        nei: NO_REGION,
                        ..SweepSpan::default()
                    });
                }

                if let Some(ai) = chf.neighbor(x, z, i, 3) {
                    let nr = src_reg[ai];
                    if nr != NO_REGION {
                        let sweep = &mut sweeps[sid as usize];
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_count[nr as usize] += 1;
                        } else {
                            sweep.nei = NO_REGION;
                        }
                    }
                }

                src_reg[i] = sid;
            }
        }

        // Resolve sweep ids into region ids
        for sweep in sweeps.iter_mut() {
            if sweep.nei != NO_REGION && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_id >= MAX_LAYER_REGIONS {
                    return Err(Error::NavMeshGeneration(
                        "too many layer regions".to_string(),
                    ));
                }
                sweep.id = reg_id as u8;
                reg_id += 1;
            }
        }

        for x in border..(w - border) {
            for i in chf.cell_spans(x, z) {
                if src_reg[i] != NO_REGION {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok((src_reg, reg_id))
}

/// Splits `chf` into height layers. At most `max_layers` layers are kept;
/// layers beyond the cap are dropped with a warning.
pub fn build_heightfield_layers(
    chf: &CompactHeightfield,
    border_size: i32,
    walkable_height: i32,
    max_layers: usize,
) -> Result<Vec<HeightfieldLayer>> {
    let (src_reg, nregs) = partition_monotone(chf, border_size)?;
    let mut regs = vec![LayerRegion::default(); nregs];

    // Region neighbours and vertical overlaps
    for z in 0..chf.height {
        for x in 0..chf.width {
            let mut lregs: Vec<u8> = Vec::new();
            for i in chf.cell_spans(x, z) {
                let ri = src_reg[i];
                if ri == NO_REGION {
                    continue;
                }
                let y = chf.spans[i].y;
                let reg = &mut regs[ri as usize];
                reg.ymin = reg.ymin.min(y);
                reg.ymax = reg.ymax.max(y);
                lregs.push(ri);

                for dir in 0..4 {
                    if let Some(ai) = chf.neighbor(x, z, i, dir) {
                        let rai = src_reg[ai];
                        if rai != NO_REGION && rai != ri {
                            add_unique(&mut regs[ri as usize].neis, rai, MAX_NEIS);
                        }
                    }
                }
            }

            for (a, &ra) in lregs.iter().enumerate() {
                for &rb in &lregs[a + 1..] {
                    if ra != rb {
                        if !add_unique(&mut regs[ra as usize].layers, rb, MAX_LAYER_REGIONS)
                            || !add_unique(&mut regs[rb as usize].layers, ra, MAX_LAYER_REGIONS)
                        {
                            return Err(Error::NavMeshGeneration(
                                "too many overlapping layer regions".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    // Grow layers from seed regions through non-overlapping neighbours
    let mut layer_id: usize = 0;
    let mut stack: Vec<usize> = Vec::new();
    for i in 0..nregs {
        if regs[i].layer_id != NO_REGION {
            continue;
        }
        regs[i].layer_id = layer_id as u8;
        regs[i].base = true;

        stack.clear();
        stack.push(i);
        while let Some(reg) = stack.pop() {
            let neis = regs[reg].neis.clone();
            for nei in neis {
                let ni = nei as usize;
                if regs[ni].layer_id != NO_REGION {
                    continue;
                }
                if regs[i].layers.contains(&nei) {
                    continue;
                }
                let ymin = regs[i].ymin.min(regs[ni].ymin);
                let ymax = regs[i].ymax.max(regs[ni].ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                stack.push(ni);
                regs[ni].layer_id = layer_id as u8;
                let nlayers = regs[ni].layers.clone();
                for l in nlayers {
                    add_unique(&mut regs[i].layers, l, MAX_LAYER_REGIONS);
                }
                regs[i].ymin = ymin;
                regs[i].ymax = ymax;
            }
        }
        layer_id += 1;
    }

    // Merge layers that are close enough vertically and never overlap
    let merge_height = walkable_height.max(0) as u16 * 4;
    for i in 0..nregs {
        if !regs[i].base {
            continue;
        }
        let new_id = regs[i].layer_id;

        loop {
            let mut old_id = NO_REGION;
            for j in 0..nregs {
                if i == j || !regs[j].base {
                    continue;
                }
                let (ri, rj) = (&regs[i], &regs[j]);
                if !overlap_range(
                    ri.ymin,
                    ri.ymax.saturating_add(merge_height),
                    rj.ymin,
                    rj.ymax.saturating_add(merge_height),
                ) {
                    continue;
                }
                let ymin = ri.ymin.min(rj.ymin);
                let ymax = ri.ymax.max(rj.ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                let overlap = (0..nregs)
                    .any(|k| regs[k].layer_id == new_id && rj.layers.contains(&(k as u8)));
                if overlap {
                    continue;
                }

                old_id = rj.layer_id;
                break;
            }

            if old_id == NO_REGION {
                break;
            }

            for j in 0..nregs {
                if regs[j].layer_id != old_id {
                    continue;
                }
                regs[j].base = false;
                regs[j].layer_id = new_id;
                let jl = regs[j].layers.clone();
                for l in jl {
                    add_unique(&mut regs[i].layers, l, MAX_LAYER_REGIONS);
                }
                regs[i].ymin = regs[i].ymin.min(regs[j].ymin);
                regs[i].ymax = regs[i].ymax.max(regs[j].ymax);
            }
        }
    }

    // Compact layer ids
    let mut remap = vec![NO_REGION; 256];
    let mut nlayers = 0usize;
    for reg in &regs {
        let id = reg.layer_id as usize;
        if remap[id] == NO_REGION {
            remap[id] = nlayers as u8;
            nlayers += 1;
        }
    }
    for reg in regs.iter_mut() {
        reg.layer_id = remap[reg.layer_id as usize];
    }

    if nlayers == 0 {
        return Ok(Vec::new());
    }
    if nlayers > max_layers {
        log::warn!("tile produced {nlayers} layers, keeping the first {max_layers}");
        nlayers = max_layers;
    }

    let lw = chf.width - border_size * 2;
    let lh = chf.height - border_size * 2;
    let pad = border_size as f32 * chf.cs;
    let mut bmin = chf.bmin;
    let mut bmax = chf.bmax;
    bmin.x += pad;
    bmin.z += pad;
    bmax.x -= pad;
    bmax.z -= pad;

    let cells = (lw.max(0) * lh.max(0)) as usize;
    let mut layers = Vec::with_capacity(nlayers);
    for lid in 0..nlayers as u8 {
        let (hmin, hmax) = regs
            .iter()
            .filter(|r| r.base && r.layer_id == lid)
            .fold((u16::MAX, 0u16), |(lo, hi), r| (lo.min(r.ymin), hi.max(r.ymax)));
        let hmin = hmin as i32;
        let hmax = hmax as i32;

        let mut layer = HeightfieldLayer {
            bmin: Vec3::new(bmin.x, chf.bmin.y + hmin as f32 * chf.ch, bmin.z),
            bmax: Vec3::new(bmax.x, chf.bmin.y + hmax as f32 * chf.ch, bmax.z),
            cs: chf.cs,
            ch: chf.ch,
            width: lw,
            height: lh,
            minx: lw,
            maxx: 0,
            miny: lh,
            maxy: 0,
            hmin,
            hmax,
            heights: vec![LAYER_EMPTY_HEIGHT; cells],
            areas: vec![NULL_AREA; cells],
            cons: vec![0; cells],
        };

        for y in 0..lh {
            for x in 0..lw {
                let cx = border_size + x;
                let cy = border_size + y;
                for j in chf.cell_spans(cx, cy) {
                    let ri = src_reg[j];
                    if ri == NO_REGION || regs[ri as usize].layer_id != lid {
                        continue;
                    }
                    let idx = (x + y * lw) as usize;
                    layer.minx = layer.minx.min(x);
                    layer.maxx = layer.maxx.max(x);
                    layer.miny = layer.miny.min(y);
                    layer.maxy = layer.maxy.max(y);

                    let sy = chf.spans[j].y as i32;
                    layer.heights[idx] = (sy - hmin).clamp(0, 254) as u8;
                    layer.areas[idx] = chf.areas[j];

                    let mut portal = 0u8;
                    let mut con = 0u8;
                    for dir in 0..4 {
                        let Some(ai) = chf.neighbor(cx, cy, j, dir) else {
                            continue;
                        };
                        if chf.areas[ai] == NULL_AREA {
                            continue;
                        }
                        let alid = match src_reg[ai] {
                            NO_REGION => NO_REGION,
                            r => regs[r as usize].layer_id,
                        };
                        if lid != alid {
                            portal |= 1 << dir;
                            // Portal cells keep the higher floor so the
                            // neighbour layer can be reached
                            let ay = chf.spans[ai].y as i32;
                            if ay > hmin {
                                let nh = (ay - hmin).clamp(0, 254) as u8;
                                layer.heights[idx] = layer.heights[idx].max(nh);
                            }
                        } else {
                            let nx = cx + get_dir_offset_x(dir) - border_size;
                            let ny = cy + get_dir_offset_y(dir) - border_size;
                            if nx >= 0 && ny >= 0 && nx < lw && ny < lh {
                                con |= 1 << dir;
                            }
                        }
                    }
                    layer.cons[idx] = (portal << 4) | con;
                }
            }
        }

        if layer.minx > layer.maxx {
            layer.minx = 0;
            layer.maxx = 0;
        }
        if layer.miny > layer.maxy {
            layer.miny = 0;
            layer.maxy = 0;
        }
        layers.push(layer);
    }

    log::debug!("built {} height layers", layers.len());
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::triangle_utils::WALKABLE_AREA;

    fn build(levels: &[(u16, u16)], size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 40.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                for &(smin, smax) in levels {
                    hf.add_span(x, z, smin, smax, WALKABLE_AREA, 1);
                }
            }
        }
        CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap()
    }

    #[test]
    fn test_single_floor_is_one_layer() {
        let chf = build(&[(0, 2)], 8);
        let layers = build_heightfield_layers(&chf, 0, 4, 8).unwrap();
        assert_eq!(layers.len(), 1);
        let layer = &layers[0];
        assert_eq!(layer.used_cells(), 64);
        assert_eq!((layer.minx, layer.maxx, layer.miny, layer.maxy), (0, 7, 0, 7));
        // Interior cells connect in all four directions
        assert_eq!(layer.cons[(3 + 3 * 8) as usize] & 0xf, 0xf);
        // Corner cells only connect inward
        assert_eq!(layer.cons[0] & 0xf, 0b0110);
    }

    #[test]
    fn test_stacked_floors_are_separate_layers() {
        let chf = build(&[(0, 2), (20, 22)], 6);
        let layers = build_heightfield_layers(&chf, 0, 4, 8).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(layers[0].hmin != layers[1].hmin);
        for layer in &layers {
            assert_eq!(layer.used_cells(), 36);
        }
    }

    #[test]
    fn test_layer_cap() {
        let chf = build(&[(0, 2), (20, 22)], 6);
        let layers = build_heightfield_layers(&chf, 0, 4, 1).unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn test_border_is_excluded() {
        let chf = build(&[(0, 2)], 10);
        let layers = build_heightfield_layers(&chf, 2, 4, 8).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].width, 6);
        assert_eq!(layers[0].bmin.x, 2.0);
        assert_eq!(layers[0].used_cells(), 36);
    }
}
