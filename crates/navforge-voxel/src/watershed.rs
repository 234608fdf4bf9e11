//! Watershed region partitioning
//!
//! Regions are seeded at the local maxima of the distance field and grown
//! level by level, which yields compact regions without long thin slivers.

use navforge_common::{Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::regions::{merge_and_filter_regions, paint_border_regions};
use crate::triangle_utils::{get_dir_offset_x, get_dir_offset_y, NULL_AREA};

const NB_STACKS: usize = 8;
const LOG_LEVELS_PER_STACK: u16 = 1;
const EXPAND_ITERS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    /// Span index, `None` once the span got a region
    index: Option<usize>,
}

fn sort_cells_by_level(
    start_level: u16,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    stacks: &mut [Vec<LevelStackEntry>],
) {
    let start_level = (start_level >> LOG_LEVELS_PER_STACK) as i32;
    for stack in stacks.iter_mut() {
        stack.clear();
    }

    for (x, z, i) in chf.iter_spans() {
        if chf.areas[i] == NULL_AREA || src_reg[i] != 0 {
            continue;
        }
        let level = (chf.dist[i] >> LOG_LEVELS_PER_STACK) as i32;
        let s_id = (start_level - level).max(0) as usize;
        if s_id >= stacks.len() {
            continue;
        }
        stacks[s_id].push(LevelStackEntry { x, z, index: Some(i) });
    }
}

fn append_stacks(src: &[LevelStackEntry], dst: &mut Vec<LevelStackEntry>, src_reg: &[u16]) {
    dst.extend(
        src.iter()
            .filter(|e| matches!(e.index, Some(i) if src_reg[i] == 0))
            .copied(),
    );
}

/// Floods a new region from span `i`, stopping at spans already claimed
/// by another region. Returns true if the region got any spans.
#[allow(clippy::too_many_arguments)]
fn flood_region(
    x: i32,
    z: i32,
    i: usize,
    level: u16,
    r: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let area = chf.areas[i];

    stack.clear();
    stack.push(LevelStackEntry { x, z, index: Some(i) });
    src_reg[i] = r;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(back) = stack.pop() {
        let (cx, cz) = (back.x, back.z);
        let Some(ci) = back.index else {
            continue;
        };

        // Check if any of the neighbours already have a valid region set
        let mut ar = 0u16;
        for dir in 0..4 {
            let Some(ai) = chf.neighbor(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if (nr & BORDER_REG) != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let ax = cx + get_dir_offset_x(dir);
            let az = cz + get_dir_offset_y(dir);
            if let Some(aai) = chf.neighbor(ax, az, ai, (dir + 1) & 0x3) {
                if chf.areas[aai] != area {
                    continue;
                }
                let nr2 = src_reg[aai];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        for dir in 0..4 {
            let Some(ai) = chf.neighbor(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push(LevelStackEntry {
                    x: cx + get_dir_offset_x(dir),
                    z: cz + get_dir_offset_y(dir),
                    index: Some(ai),
                });
            }
        }
    }

    count > 0
}

/// Grows existing regions into unassigned spans at or above `level`
fn expand_regions(
    max_iter: usize,
    level: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    if fill_stack {
        stack.clear();
        for (x, z, i) in chf.iter_spans() {
            if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA {
                stack.push(LevelStackEntry { x, z, index: Some(i) });
            }
        }
    } else {
        for entry in stack.iter_mut() {
            if matches!(entry.index, Some(i) if src_reg[i] != 0) {
                entry.index = None;
            }
        }
    }

    let mut dirty = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            let Some(i) = entry.index else {
                failed += 1;
                continue;
            };

            let mut r = src_reg[i];
            let mut d2 = u16::MAX;
            let area = chf.areas[i];
            for dir in 0..4 {
                let Some(ai) = chf.neighbor(entry.x, entry.z, i, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                if src_reg[ai] > 0 && (src_reg[ai] & BORDER_REG) == 0 {
                    let nd = src_dist[ai].saturating_add(2);
                    if nd < d2 {
                        r = src_reg[ai];
                        d2 = nd;
                    }
                }
            }
            if r != 0 {
                entry.index = None;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }

        if failed == stack.len() {
            break;
        }
        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Partitions the walkable surface with the watershed algorithm.
///
/// Requires the distance field to be built first.
pub fn build_regions_watershed(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    if chf.dist.len() != chf.span_count() {
        return Err(Error::NavMeshGeneration(
            "distance field must be built before watershed regions".to_string(),
        ));
    }

    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];
    let mut src_dist = vec![0u16; span_count];
    let mut stack = Vec::with_capacity(256);
    let mut lvl_stacks: Vec<Vec<LevelStackEntry>> =
        (0..NB_STACKS).map(|_| Vec::with_capacity(256)).collect();

    let mut region_id = paint_border_regions(border_size, chf, &mut src_reg);
    chf.border_size = border_size;

    let mut level = (chf.max_distance + 1) & !1;
    let mut s_id: isize = -1;
    while level > 0 {
        level = level.saturating_sub(2);
        s_id = (s_id + 1) & (NB_STACKS as isize - 1);
        let sid = s_id as usize;

        if sid == 0 {
            sort_cells_by_level(level, chf, &src_reg, &mut lvl_stacks);
        } else {
            let (before, after) = lvl_stacks.split_at_mut(sid);
            append_stacks(&before[sid - 1], &mut after[0], &src_reg);
        }

        expand_regions(
            EXPAND_ITERS,
            level,
            chf,
            &mut src_reg,
            &mut src_dist,
            &mut lvl_stacks[sid],
            false,
        );

        for j in 0..lvl_stacks[sid].len() {
            let entry = lvl_stacks[sid][j];
            let Some(i) = entry.index else {
                continue;
            };
            if src_reg[i] != 0 {
                continue;
            }
            if flood_region(
                entry.x,
                entry.z,
                i,
                level,
                region_id,
                chf,
                &mut src_reg,
                &mut src_dist,
                &mut stack,
            ) {
                if region_id == u16::MAX {
                    return Err(Error::NavMeshGeneration(
                        "region id overflow during watershed".to_string(),
                    ));
                }
                region_id += 1;
            }
        }
    }

    // Expand current regions until no empty connected cells remain
    expand_regions(
        EXPAND_ITERS * 8,
        0,
        chf,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        true,
    );

    let mut overlaps = Vec::new();
    chf.max_regions = merge_and_filter_regions(
        min_region_area.max(0) as usize,
        merge_region_area.max(0) as usize,
        region_id,
        chf,
        &mut src_reg,
        &mut overlaps,
    );

    if !overlaps.is_empty() {
        log::warn!("{} overlapping regions after watershed", overlaps.len());
    }

    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }
    log::debug!("watershed partition produced {} regions", chf.max_regions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
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

    #[test]
    fn test_requires_distance_field() {
        let mut chf = plane_chf(8, 8);
        assert!(build_regions_watershed(&mut chf, 0, 4, 20).is_err());
    }

    #[test]
    fn test_plane_is_one_region() {
        let mut chf = plane_chf(16, 16);
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 0, 8, 20).unwrap();
        assert_eq!(chf.max_regions, 1);
        assert!(chf.spans.iter().all(|s| s.reg == 1));
    }

    #[test]
    fn test_every_walkable_span_gets_a_region() {
        let mut chf = plane_chf(20, 10);
        for z in 2..8 {
            let i = chf.cell_spans(10, z).start;
            chf.areas[i] = NULL_AREA;
        }
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 0, 4, 20).unwrap();
        for (x, z, i) in chf.iter_spans() {
            if chf.areas[i] != NULL_AREA {
                assert_ne!(chf.spans[i].reg, 0, "span at {x},{z}");
            }
        }
        assert!(chf.max_regions >= 1);
    }
}
