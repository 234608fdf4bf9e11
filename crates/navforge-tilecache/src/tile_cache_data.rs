//! Tile cache layer format
//!
//! A stored layer is a fixed little-endian header followed by the
//! compressed payload: per-cell heights, areas and connections.

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use navforge_common::{Error, Result, Status, Vec3};
use navforge_voxel::HeightfieldLayer;

use crate::{TileAllocator, TileCompressor};

/// Magic number of a stored layer ('NFTL')
const TILECACHE_MAGIC: u32 = 0x4E46_544C;

/// Version of the stored layer format
const TILECACHE_VERSION: u32 = 1;

/// Size of the serialized header in bytes
pub const LAYER_HEADER_SIZE: usize = 4 * 5 + 4 * 6 + 2 * 2 + 6 + 4;

/// Header of a stored layer
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheLayerHeader {
    /// Tile position
    pub tx: i32,
    pub ty: i32,
    /// Layer index within the tile
    pub tlayer: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Height range in cells
    pub hmin: u16,
    pub hmax: u16,
    /// Grid dimensions in cells
    pub width: u8,
    pub height: u8,
    /// Used cell rectangle
    pub minx: u8,
    pub maxx: u8,
    pub miny: u8,
    pub maxy: u8,
    /// Uncompressed payload size in bytes
    pub payload_size: u32,
}

impl TileCacheLayerHeader {
    /// Number of cells in the layer grid
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Serializes the header
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(TILECACHE_MAGIC)?;
        w.write_u32::<LittleEndian>(TILECACHE_VERSION)?;
        w.write_i32::<LittleEndian>(self.tx)?;
        w.write_i32::<LittleEndian>(self.ty)?;
        w.write_i32::<LittleEndian>(self.tlayer)?;
        for v in self.bmin.to_array().into_iter().chain(self.bmax.to_array()) {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u16::<LittleEndian>(self.hmin)?;
        w.write_u16::<LittleEndian>(self.hmax)?;
        w.write_all(&[
            self.width,
            self.height,
            self.minx,
            self.maxx,
            self.miny,
            self.maxy,
        ])?;
        w.write_u32::<LittleEndian>(self.payload_size)?;
        Ok(())
    }

    /// Reads and validates a header from the start of `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LAYER_HEADER_SIZE {
            return Err(Error::Detour(Status::DataCorrupted));
        }
        let mut r = Cursor::new(data);
        if r.read_u32::<LittleEndian>()? != TILECACHE_MAGIC {
            return Err(Error::Detour(Status::WrongMagic));
        }
        if r.read_u32::<LittleEndian>()? != TILECACHE_VERSION {
            return Err(Error::Detour(Status::WrongVersion));
        }

        let tx = r.read_i32::<LittleEndian>()?;
        let ty = r.read_i32::<LittleEndian>()?;
        let tlayer = r.read_i32::<LittleEndian>()?;
        let mut b = [0.0f32; 6];
        r.read_f32_into::<LittleEndian>(&mut b)?;
        let hmin = r.read_u16::<LittleEndian>()?;
        let hmax = r.read_u16::<LittleEndian>()?;
        let mut dims = [0u8; 6];
        std::io::Read::read_exact(&mut r, &mut dims)?;
        let payload_size = r.read_u32::<LittleEndian>()?;

        Ok(Self {
            tx,
            ty,
            tlayer,
            bmin: Vec3::new(b[0], b[1], b[2]),
            bmax: Vec3::new(b[3], b[4], b[5]),
            hmin,
            hmax,
            width: dims[0],
            height: dims[1],
            minx: dims[2],
            maxx: dims[3],
            miny: dims[4],
            maxy: dims[5],
            payload_size,
        })
    }
}

/// A decompressed layer
#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    /// Per-cell height above `header.bmin.y`, in cells
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    /// Bits 0-3 walkable neighbours, bits 4-7 portals
    pub cons: Vec<u8>,
}

fn to_u8(v: i32, what: &str) -> Result<u8> {
    u8::try_from(v).map_err(|_| Error::TileCache(format!("layer {what} {v} does not fit in 8 bits")))
}

/// Compresses a height layer into its stored form
pub fn build_tile_cache_layer(
    comp: &dyn TileCompressor,
    layer: &HeightfieldLayer,
    tx: i32,
    ty: i32,
    tlayer: i32,
) -> Result<Vec<u8>> {
    let cells = (layer.width * layer.height).max(0) as usize;
    if layer.heights.len() != cells || layer.areas.len() != cells || layer.cons.len() != cells {
        return Err(Error::TileCache("layer grids do not match its size".into()));
    }

    let mut payload = Vec::with_capacity(cells * 3);
    payload.extend_from_slice(&layer.heights);
    payload.extend_from_slice(&layer.areas);
    payload.extend_from_slice(&layer.cons);

    let header = TileCacheLayerHeader {
        tx,
        ty,
        tlayer,
        bmin: layer.bmin,
        bmax: layer.bmax,
        hmin: layer.hmin.clamp(0, u16::MAX as i32) as u16,
        hmax: layer.hmax.clamp(0, u16::MAX as i32) as u16,
        width: to_u8(layer.width, "width")?,
        height: to_u8(layer.height, "height")?,
        minx: to_u8(layer.minx, "minx")?,
        maxx: to_u8(layer.maxx, "maxx")?,
        miny: to_u8(layer.miny, "miny")?,
        maxy: to_u8(layer.maxy, "maxy")?,
        payload_size: payload.len() as u32,
    };

    let compressed = comp.compress(&payload)?;
    let mut out = Vec::with_capacity(LAYER_HEADER_SIZE + compressed.len());
    header.write_to(&mut out)?;
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decompresses a stored layer using scratch memory from `alloc`
pub fn decompress_tile_cache_layer(
    comp: &dyn TileCompressor,
    alloc: &mut dyn TileAllocator,
    data: &[u8],
) -> Result<TileCacheLayer> {
    let header = TileCacheLayerHeader::from_bytes(data)?;
    let cells = header.cell_count();
    let expected = cells * 3;
    if header.payload_size as usize != expected {
        return Err(Error::Detour(Status::DataCorrupted));
    }

    let range = alloc
        .alloc(expected)
        .ok_or(Error::OutOfMemory("tile cache layer"))?;
    let buf = alloc.buffer_mut(range.clone());
    let written = comp.decompress(&data[LAYER_HEADER_SIZE..], buf)?;
    if written != expected {
        return Err(Error::Detour(Status::DataCorrupted));
    }

    let layer = TileCacheLayer {
        header,
        heights: buf[..cells].to_vec(),
        areas: buf[cells..2 * cells].to_vec(),
        cons: buf[2 * cells..].to_vec(),
    };
    alloc.free(range);
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LinearAllocator, Lz4Compressor};
    use navforge_voxel::LAYER_EMPTY_HEIGHT;

    fn layer(w: i32, h: i32) -> HeightfieldLayer {
        let cells = (w * h) as usize;
        let mut heights = vec![3u8; cells];
        heights[0] = LAYER_EMPTY_HEIGHT;
        HeightfieldLayer {
            bmin: Vec3::new(0.0, 1.0, 0.0),
            bmax: Vec3::new(w as f32, 2.0, h as f32),
            cs: 1.0,
            ch: 0.5,
            width: w,
            height: h,
            minx: 0,
            maxx: w - 1,
            miny: 0,
            maxy: h - 1,
            hmin: 2,
            hmax: 5,
            heights,
            areas: vec![63; cells],
            cons: vec![0x0f; cells],
        }
    }

    #[test]
    fn test_layer_round_trip() {
        let comp = Lz4Compressor;
        let mut alloc = LinearAllocator::new(1024);
        let src = layer(8, 6);
        let data = build_tile_cache_layer(&comp, &src, 3, -2, 1).unwrap();

        let header = TileCacheLayerHeader::from_bytes(&data).unwrap();
        assert_eq!((header.tx, header.ty, header.tlayer), (3, -2, 1));
        assert_eq!((header.hmin, header.hmax), (2, 5));

        let decoded = decompress_tile_cache_layer(&comp, &mut alloc, &data).unwrap();
        assert_eq!(decoded.heights, src.heights);
        assert_eq!(decoded.areas, src.areas);
        assert_eq!(decoded.cons, src.cons);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let comp = Lz4Compressor;
        let mut data = build_tile_cache_layer(&comp, &layer(4, 4), 0, 0, 0).unwrap();
        data[0] ^= 0xff;
        assert!(matches!(
            TileCacheLayerHeader::from_bytes(&data),
            Err(Error::Detour(Status::WrongMagic))
        ));
    }

    #[test]
    fn test_header_write_to_short_buffer() {
        let comp = Lz4Compressor;
        let data = build_tile_cache_layer(&comp, &layer(4, 4), 0, 0, 0).unwrap();
        let header = TileCacheLayerHeader::from_bytes(&data).unwrap();

        let mut short = [0u8; LAYER_HEADER_SIZE - 1];
        let mut w = Cursor::new(&mut short[..]);
        assert!(matches!(header.write_to(&mut w), Err(Error::Io(_))));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let comp = Lz4Compressor;
        let mut alloc = LinearAllocator::new(16);
        let data = build_tile_cache_layer(&comp, &layer(8, 8), 0, 0, 0).unwrap();
        assert!(matches!(
            decompress_tile_cache_layer(&comp, &mut alloc, &data),
            Err(Error::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_oversized_layer_rejected() {
        let comp = Lz4Compressor;
        assert!(build_tile_cache_layer(&comp, &layer(300, 1), 0, 0, 0).is_err());
    }
}
