//! Netpbm images: PGM (`P2`, `P5`) and PPM (`P3`, `P6`), 8-bit samples.

use crate::error::ApiError;
use crate::model::decoder::ImageDecoder;
use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct NetpbmCodec;

struct Header {
    magic: [u8; 2],
    width: usize,
    height: usize,
    maxval: usize,
    /// Offset of the first raster byte
    raster: usize,
}

fn malformed(path: &Path, detail: &str) -> ApiError {
    ApiError::UnsupportedFile(format!("{}: {}", path.display(), detail))
}

/// Next whitespace-separated header token, skipping `#` comments
fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (start < *pos).then(|| &bytes[start..*pos])
}

fn number(path: &Path, token: Option<&[u8]>) -> Result<usize, ApiError> {
    token
        .and_then(|t| std::str::from_utf8(t).ok())
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed(path, "bad header number"))
}

fn parse_header(path: &Path, bytes: &[u8]) -> Result<Header, ApiError> {
    let mut pos = 0;
    let magic = match next_token(bytes, &mut pos) {
        Some([b'P', kind @ (b'2' | b'3' | b'5' | b'6')]) => [b'P', *kind],
        _ => return Err(malformed(path, "not a PGM or PPM file")),
    };
    let width = number(path, next_token(bytes, &mut pos))?;
    let height = number(path, next_token(bytes, &mut pos))?;
    let maxval = number(path, next_token(bytes, &mut pos))?;
    if maxval == 0 || maxval > 255 {
        return Err(malformed(path, "only 8-bit samples are supported"));
    }
    // exactly one whitespace byte separates the header from a binary raster
    Ok(Header {
        magic,
        width,
        height,
        maxval,
        raster: pos + 1,
    })
}

fn scale(sample: usize, maxval: usize) -> u8 {
    if maxval == 255 {
        sample.min(255) as u8
    } else {
        ((sample.min(maxval) * 255 + maxval / 2) / maxval) as u8
    }
}

impl ImageDecoder for NetpbmCodec {
    fn extensions(&self) -> Vec<&'static str> {
        vec![".pgm", ".ppm"]
    }

    fn decode(&self, path: &Path) -> Result<ArrayD<u8>, ApiError> {
        if !path.is_file() {
            return Err(ApiError::FileNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let header = parse_header(path, &bytes)?;
        let channels = match header.magic[1] {
            b'2' | b'5' => 1,
            _ => 3,
        };
        let expected = header
            .width
            .checked_mul(header.height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| malformed(path, "image too large"))?;
        // every sample takes at least one byte, binary or ASCII
        if expected > bytes.len().saturating_sub(header.raster - 1) {
            return Err(malformed(path, "truncated raster"));
        }

        let samples: Vec<u8> = match header.magic[1] {
            b'5' | b'6' => {
                let raster = bytes
                    .get(header.raster..header.raster + expected)
                    .ok_or_else(|| malformed(path, "truncated raster"))?;
                raster.iter().map(|&s| scale(s as usize, header.maxval)).collect()
            }
            _ => {
                let mut pos = header.raster - 1;
                let mut samples = Vec::with_capacity(expected);
                for _ in 0..expected {
                    let value = number(path, next_token(&bytes, &mut pos))?;
                    samples.push(scale(value, header.maxval));
                }
                samples
            }
        };

        ArrayD::from_shape_vec(IxDyn(&[header.height, header.width, channels]), samples)
            .map_err(|e| malformed(path, &e.to_string()))
    }

    /// Binary PGM for one channel, binary PPM for three
    fn encode(&self, path: &Path, image: &ArrayD<u8>) -> Result<(), ApiError> {
        let (height, width, channels) = match image.shape() {
            [h, w] => (*h, *w, 1),
            [h, w, c] => (*h, *w, *c),
            other => {
                return Err(ApiError::InvalidArgument(format!(
                    "cannot encode an image of shape {:?}",
                    other
                )))
            }
        };
        let magic = match channels {
            1 => "P5",
            3 => "P6",
            other => {
                return Err(ApiError::InvalidArgument(format!(
                    "Netpbm supports 1 or 3 channels, got {}",
                    other
                )))
            }
        };
        let mut out = Vec::with_capacity(height * width * channels + 32);
        write!(out, "{}\n{} {}\n255\n", magic, width, height)?;
        out.extend(image.iter().copied());
        fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ascii_pgm_with_comment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pgm");
        fs::write(&path, "P2\n# comment\n2 2\n255\n0 64\n128 255\n").unwrap();
        let image = NetpbmCodec.decode(&path).unwrap();
        assert_eq!(image.shape(), &[2, 2, 1]);
        assert_eq!(image.iter().copied().collect::<Vec<_>>(), vec![0, 64, 128, 255]);
    }

    #[test]
    fn test_binary_ppm_written_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ppm");
        let image = ArrayD::from_shape_vec(IxDyn(&[1, 2, 3]), vec![1, 2, 3, 4, 5, 6]).unwrap();
        NetpbmCodec.encode(&path, &image).unwrap();
        assert_eq!(NetpbmCodec.decode(&path).unwrap(), image);
    }

    fn decode_bytes(name: &str, body: &[u8]) -> Result<ArrayD<u8>, ApiError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        NetpbmCodec.decode(&path)
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        for body in [
            "P2\n4294967296 4294967296\n255\n0\n".to_string(),
            format!("P5\n{} 2\n255\n", usize::MAX),
            "P2\n1000 1000\n255\n0 1 2\n".to_string(),
        ] {
            assert!(matches!(
                decode_bytes("big.pgm", body.as_bytes()),
                Err(ApiError::UnsupportedFile(_))
            ));
        }
    }

    #[test]
    fn test_truncated_binary_raster() {
        let mut body = b"P5\n3 2\n255\n".to_vec();
        body.extend_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            decode_bytes("short.pgm", &body),
            Err(ApiError::UnsupportedFile(message)) if message.contains("truncated raster")
        ));
        body.extend_from_slice(&[5, 6]);
        assert_eq!(decode_bytes("full.pgm", &body).unwrap().shape(), &[2, 3, 1]);
    }

    #[test]
    fn test_sixteen_bit_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep.pgm");
        fs::write(&path, "P2\n1 1\n65535\n0\n").unwrap();
        assert!(matches!(
            NetpbmCodec.decode(&path),
            Err(ApiError::UnsupportedFile(_))
        ));
    }
}
