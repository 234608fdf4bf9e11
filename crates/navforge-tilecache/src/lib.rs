//! Tile cache for navforge navigation meshes
//!
//! Stores compressed height layers per tile and rebuilds navigation mesh
//! tiles from them when dynamic obstacles are added or removed, without
//! voxelizing the source geometry again.

mod allocator;
mod compressor;
mod tile_cache;
mod tile_cache_builder;
mod tile_cache_data;

pub use allocator::{LinearAllocator, TileAllocator};
pub use compressor::{Lz4Compressor, TileCompressor};
pub use tile_cache::{
    CompressedTileRef, Obstacle, ObstacleData, ObstacleRef, ObstacleState, TileCache,
    TileCacheParams,
};
pub use tile_cache_builder::{carve_obstacle, layer_to_compact_heightfield, TileCacheBuilder};
pub use tile_cache_data::{
    build_tile_cache_layer, decompress_tile_cache_layer, TileCacheLayer, TileCacheLayerHeader,
    LAYER_HEADER_SIZE,
};
