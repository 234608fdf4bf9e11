//! Byte compression of tile layer payloads

use navforge_common::{Error, Result};

/// Compresses and decompresses tile layer payloads
pub trait TileCompressor {
    /// Upper bound of the compressed size of `buffer_size` input bytes
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses `data`
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `compressed` into `out`, returning the number of bytes
    /// written
    fn decompress(&self, compressed: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// LZ4 block compression
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(buffer_size)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress(&self, compressed: &[u8], out: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(compressed, out).map_err(|e| {
            log::error!("LZ4 decompression failed: {e}");
            Error::TileCache(format!("decompression failed: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_round_trip() {
        let comp = Lz4Compressor;
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();
        let packed = comp.compress(&data).unwrap();
        assert!(packed.len() <= comp.max_compressed_size(data.len()));
        assert!(packed.len() < data.len());

        let mut out = vec![0u8; data.len()];
        let n = comp.decompress(&packed, &mut out).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_lz4_output_too_small() {
        let comp = Lz4Compressor;
        let packed = comp.compress(&[1u8; 64]).unwrap();
        let mut out = vec![0u8; 8];
        assert!(comp.decompress(&packed, &mut out).is_err());
    }
}
