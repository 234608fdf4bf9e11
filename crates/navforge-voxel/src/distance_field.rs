//! Distance field generation for watershed partitioning
//!
//! Every span receives its chamfer distance (2 per straight step, 3 per
//! diagonal step) to the nearest region or area border.

use navforge_common::Result;

use crate::compact_heightfield::CompactHeightfield;

/// Computes the distance field and stores the blurred result in `chf.dist`
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let mut src = vec![0u16; chf.span_count()];
    let max_dist = calculate_distance_field(chf, &mut src);
    chf.max_distance = max_dist;

    let mut dst = vec![0u16; chf.span_count()];
    box_blur(chf, 1, &src, &mut dst);
    chf.dist = dst;

    log::debug!("distance field built, max distance {max_dist}");
    Ok(())
}

fn calculate_distance_field(chf: &CompactHeightfield, src: &mut [u16]) -> u16 {
    src.fill(0xffff);

    for (x, z, i) in chf.iter_spans() {
        let area = chf.areas[i];
        let same_area = (0..4)
            .filter_map(|dir| chf.neighbor(x, z, i, dir))
            .filter(|&ai| chf.areas[ai] == area)
            .count();
        if same_area != 4 {
            src[i] = 0;
        }
    }

    let relax = |src: &mut [u16], i: usize, from: usize, cost: u32| {
        let nd = src[from] as u32 + cost;
        if nd < src[i] as u32 {
            src[i] = nd as u16;
        }
    };

    // Pass 1
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.neighbor(x, z, i, 0) {
                    relax(src, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x - 1, z, ai, 3) {
                        relax(src, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbor(x, z, i, 3) {
                    relax(src, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x, z - 1, ai, 2) {
                        relax(src, i, aai, 3);
                    }
                }
            }
        }
    }

    // Pass 2
    for z in (0..chf.height).rev() {
        for x in (0..chf.width).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.neighbor(x, z, i, 2) {
                    relax(src, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x + 1, z, ai, 1) {
                        relax(src, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbor(x, z, i, 1) {
                    relax(src, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x, z + 1, ai, 0) {
                        relax(src, i, aai, 3);
                    }
                }
            }
        }
    }

    src.iter().copied().max().unwrap_or(0)
}

fn box_blur(chf: &CompactHeightfield, thr: u16, src: &[u16], dst: &mut [u16]) {
    let thr = thr * 2;
    for (x, z, i) in chf.iter_spans() {
        let cd = src[i];
        if cd <= thr {
            dst[i] = cd;
            continue;
        }

        let mut d = cd as u32;
        for dir in 0..4 {
            match chf.neighbor(x, z, i, dir) {
                Some(ai) => {
                    d += src[ai] as u32;
                    let ax = x + crate::triangle_utils::get_dir_offset_x(dir);
                    let az = z + crate::triangle_utils::get_dir_offset_y(dir);
                    match chf.neighbor(ax, az, ai, (dir + 1) & 0x3) {
                        Some(aai) => d += src[aai] as u32,
                        None => d += cd as u32,
                    }
                }
                None => d += cd as u32 * 2,
            }
        }
        dst[i] = ((d + 5) / 9) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::triangle_utils::WALKABLE_AREA;
    use glam::Vec3;

    fn flat_chf(size: i32) -> CompactHeightfield {
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
    fn test_distance_grows_towards_center() {
        let mut chf = flat_chf(9);
        build_distance_field(&mut chf).unwrap();

        let at = |x: i32, z: i32| chf.dist[chf.cell_spans(x, z).start];
        assert_eq!(at(0, 4), 0);
        assert!(at(2, 4) > at(1, 4));
        assert!(at(4, 4) >= at(3, 4));
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn test_raw_field_is_chamfer() {
        let chf = flat_chf(5);
        let mut src = vec![0u16; chf.span_count()];
        calculate_distance_field(&chf, &mut src);
        let at = |x: i32, z: i32| src[chf.cell_spans(x, z).start];
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(1, 1), 2);
        assert_eq!(at(2, 2), 4);
    }
}
