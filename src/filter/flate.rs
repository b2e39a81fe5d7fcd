//! The FlateDecode filter.

use crate::error::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::warn;
use std::io::Write;

const NAME: &str = "FlateDecode";

pub(crate) fn decode(data: &[u8], relaxed: bool) -> Result<Vec<u8>> {
    match miniz_oxide::inflate::decompress_to_vec_zlib(data) {
        Ok(out) => Ok(out),
        Err(zlib_err) => {
            // Some encoders emit raw deflate without the zlib wrapper.
            if let Ok(out) = miniz_oxide::inflate::decompress_to_vec(data) {
                return Ok(out);
            }

            // Trailing garbage after a complete stream is tolerated in
            // relaxed mode; whatever was decoded up to that point is intact.
            if relaxed && !zlib_err.output.is_empty() {
                warn!("flate stream is corrupt after {} bytes", zlib_err.output.len());

                return Ok(zlib_err.output);
            }

            Err(Error::decode(NAME, format!("{:?}", zlib_err.status)))
        }
    }
}

pub(crate) fn encode(data: &[u8]) -> Vec<u8> {
    const COMPRESSION_LEVEL: u32 = 6;

    let mut e = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );

    // Writing into a Vec cannot fail.
    e.write_all(data).unwrap();
    e.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_zlib() {
        let input = [
            0x78, 0x9c, 0xf3, 0x48, 0xcd, 0xc9, 0xc9, 0x7, 0x0, 0x5, 0x8c, 0x1, 0xf5,
        ];
        assert_eq!(decode(&input, false).unwrap(), b"Hello");
    }

    #[test]
    fn decode_raw_deflate() {
        let input = [0xf3, 0x48, 0xcd, 0xc9, 0xc9, 0x7, 0x0];
        assert_eq!(decode(&input, false).unwrap(), b"Hello");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"\xAA\xBB\xCC", false).is_err());
    }

    #[test]
    fn round_trip() {
        let mut long = Vec::new();
        for i in 0..10_000u32 {
            long.push((i % 13) as u8);
        }

        for data in [&b""[..], &b"Hello"[..], &long[..]] {
            assert_eq!(decode(&encode(data), false).unwrap(), data);
        }
    }
}
