//! Converts voxel polygon meshes into navigation mesh tiles

use navforge_common::{Aabb, Error, Result, Status};
use navforge_voxel::{PolyMesh, PolyMeshDetail, MESH_NULL_IDX, NULL_AREA, PORTAL_FLAG};

use crate::{MeshTile, Poly, PolyDetail, PolyFlags, TileHeader, EXT_LINK};

/// Placement and agent parameters of a tile being created
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCreateParams {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: i32,
    /// Agent height in world units
    pub walkable_height: f32,
    /// Agent radius in world units
    pub walkable_radius: f32,
    /// Agent step height in world units
    pub walkable_climb: f32,
}

/// Maps a poly mesh portal side onto the tile grid side used by links
fn portal_to_link_side(side: u8) -> u8 {
    match side & 0x3 {
        0 => 4,
        1 => 2,
        2 => 0,
        _ => 6,
    }
}

/// Creates a tile from a polygon mesh and its detail mesh. Vertex data is
/// converted to world space; links are built when the tile is added to a
/// `NavMesh`.
pub fn create_tile(
    poly_mesh: &PolyMesh,
    detail_mesh: &PolyMeshDetail,
    params: &TileCreateParams,
) -> Result<MeshTile> {
    if poly_mesh.is_empty() {
        return Err(Error::Detour(Status::InvalidParam));
    }
    if detail_mesh.meshes.len() != poly_mesh.poly_count() {
        return Err(Error::InvalidMesh(format!(
            "detail mesh has {} sub meshes for {} polygons",
            detail_mesh.meshes.len(),
            poly_mesh.poly_count()
        )));
    }

    let verts: Vec<_> = (0..poly_mesh.verts.len())
        .map(|i| poly_mesh.world_vertex(i as u16))
        .collect();

    let mut polys = Vec::with_capacity(poly_mesh.poly_count());
    for mp in &poly_mesh.polys {
        let neis = mp
            .neis
            .iter()
            .enumerate()
            .map(|(j, &n)| match mp.portal_side(j) {
                Some(side) => EXT_LINK | portal_to_link_side(side) as u16,
                None if n == MESH_NULL_IDX || n & PORTAL_FLAG != 0 => 0,
                None => n + 1,
            })
            .collect();

        let flags = match PolyFlags::from_bits_truncate(mp.flags) {
            f if f.is_empty() && mp.area != NULL_AREA => PolyFlags::WALK,
            f => f,
        };

        polys.push(Poly {
            verts: mp.verts.clone(),
            neis,
            links: Vec::new(),
            flags,
            area: mp.area,
        });
    }

    let detail_meshes = detail_mesh
        .meshes
        .iter()
        .map(|m| PolyDetail {
            vert_base: m.vert_base,
            vert_count: m.vert_count,
            tri_base: m.tri_base,
            tri_count: m.tri_count,
        })
        .collect();

    let mut bounds = Aabb::from_points(verts.iter().chain(detail_mesh.verts.iter()));
    if bounds.is_empty() {
        bounds = Aabb::new(poly_mesh.bmin, poly_mesh.bmax);
    }

    log::trace!(
        "created tile ({}, {}, {}) with {} polys",
        params.tile_x,
        params.tile_y,
        params.layer,
        polys.len()
    );

    Ok(MeshTile {
        salt: 0,
        header: TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: params.layer,
            bmin: bounds.min,
            bmax: bounds.max,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
        },
        verts,
        polys,
        detail_meshes,
        detail_verts: detail_mesh.verts.clone(),
        detail_tris: detail_mesh.tris.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NavMesh, NavMeshParams};
    use navforge_common::Vec3;
    use navforge_voxel::{BuildContext, VoxelBuilder, VoxelConfig};

    fn plane_meshes(x0: f32, size: f32) -> navforge_voxel::TileMeshes {
        let verts = vec![
            Vec3::new(x0 - 2.0, 0.0, -2.0),
            Vec3::new(x0 + size + 2.0, 0.0, -2.0),
            Vec3::new(x0 + size + 2.0, 0.0, size + 2.0),
            Vec3::new(x0 - 2.0, 0.0, size + 2.0),
        ];
        let tris = [[0, 2, 1], [0, 3, 2]];
        let mut config = VoxelConfig::new()
            .with_cell_size(0.3, 0.2)
            .with_agent(2.0, 0.5, 0.5, 45.0);
        config.tile_size = (size / config.cs).round() as i32;
        config.border_size = config.walkable_radius + 3;
        config.set_tile_bounds(Vec3::new(x0, -1.0, 0.0), Vec3::new(x0 + size, 1.0, size));
        VoxelBuilder::new(config)
            .build_tile(&mut BuildContext::new(), &verts, &tris)
            .unwrap()
            .unwrap()
    }

    fn params(x: i32) -> TileCreateParams {
        TileCreateParams {
            tile_x: x,
            tile_y: 0,
            layer: 0,
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
        }
    }

    #[test]
    fn test_create_tile_world_space() {
        let meshes = plane_meshes(0.0, 9.6);
        let tile = create_tile(&meshes.poly_mesh, &meshes.detail_mesh, &params(0)).unwrap();
        assert_eq!(tile.polys.len(), meshes.poly_mesh.poly_count());
        for v in &tile.verts {
            assert!(v.x >= -0.01 && v.x <= 9.61, "x out of tile: {v}");
            assert!(v.y.abs() < 0.5);
        }
        assert!(tile
            .polys
            .iter()
            .any(|p| p.neis.iter().any(|&n| n & EXT_LINK != 0)));
    }

    #[test]
    fn test_adjacent_built_tiles_link() {
        let mut nav = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 9.6,
            tile_height: 9.6,
            max_tiles: 8,
            max_polys: 128,
        })
        .unwrap();
        for x in 0..2 {
            let meshes = plane_meshes(x as f32 * 9.6, 9.6);
            let tile = create_tile(&meshes.poly_mesh, &meshes.detail_mesh, &params(x)).unwrap();
            nav.add_tile(tile).unwrap();
        }
        let left = nav.tile_at(0, 0, 0).unwrap();
        assert!(left
            .polys
            .iter()
            .flat_map(|p| &p.links)
            .any(|l| l.side == 0));
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let meshes = plane_meshes(0.0, 9.6);
        let mut empty = meshes.poly_mesh.clone();
        empty.polys.clear();
        assert!(create_tile(&empty, &meshes.detail_mesh, &params(0)).is_err());
    }
}
