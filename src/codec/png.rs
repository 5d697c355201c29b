//! Minimal PNG container codec for the PNG wrapper.
//!
//! Payload layout inside the image raster:
//! `[u32 BE length][payload][zero pad to whole RGBA pixels][zero pad to a
//! square image]`. The image itself is 8-bit/channel RGBA, non-interlaced,
//! square, every scanline filter type 0, a single zlib IDAT. The decoder
//! accepts any valid 8-bit RGBA non-interlaced PNG (all five scanline
//! filters) so images that were re-served by a host still unwrap.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use super::CodecError;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const BYTES_PER_PIXEL: usize = 4;
/// Upper bound on decoded image side length; a resource raster never gets
/// close, so anything larger is a malformed container.
const MAX_SIDE: u32 = 65_535;

fn unwrap_err(msg: impl Into<String>) -> CodecError {
    CodecError::Unwrap(msg.into())
}

/// Smallest `s` with `s * s >= pixels` (and at least 1).
fn side_for_pixels(pixels: u64) -> u64 {
    let mut side = (pixels as f64).sqrt() as u64;
    while side * side < pixels {
        side += 1;
    }
    while side > 1 && (side - 1) * (side - 1) >= pixels {
        side -= 1;
    }
    side.max(1)
}

fn push_chunk(out: &mut Vec<u8>, tag: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(data);
    let mut crc = Crc::new();
    crc.update(tag);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
}

/// Hide `payload` inside a square RGBA PNG.
pub fn wrap(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut raster = Vec::with_capacity(payload.len() + 64);
    raster.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    raster.extend_from_slice(payload);
    // Fill up the trailing partial pixel, then pad to a square image.
    let whole_pixels = raster.len().div_ceil(BYTES_PER_PIXEL);
    raster.resize(whole_pixels * BYTES_PER_PIXEL, 0);
    let side = side_for_pixels(whole_pixels as u64) as usize;
    raster.resize(side * side * BYTES_PER_PIXEL, 0);

    let stride = side * BYTES_PER_PIXEL;
    let mut scanlines = Vec::with_capacity(raster.len() + side);
    for row in raster.chunks(stride) {
        scanlines.push(0); // filter type 0
        scanlines.extend_from_slice(row);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let idat = encoder
        .write_all(&scanlines)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Wrap(e.to_string()))?;

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(side as u32).to_be_bytes());
    ihdr.extend_from_slice(&(side as u32).to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]); // 8-bit, RGBA, deflate, adaptive, no interlace

    let mut out = Vec::with_capacity(idat.len() + 128);
    out.extend_from_slice(&SIGNATURE);
    push_chunk(&mut out, b"IHDR", &ihdr);
    push_chunk(&mut out, b"IDAT", &idat);
    push_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

/// Recover the payload from a PNG produced by [`wrap`] (or a re-encoded
/// 8-bit RGBA variant of it).
pub fn unwrap(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let (width, height, idat) = parse_container(data)?;
    let stride = width as usize * BYTES_PER_PIXEL;

    let mut scanlines = Vec::new();
    ZlibDecoder::new(idat.as_slice())
        .read_to_end(&mut scanlines)
        .map_err(|e| unwrap_err(format!("bad IDAT stream: {e}")))?;
    if scanlines.len() != height as usize * (stride + 1) {
        return Err(unwrap_err("IDAT does not match the declared dimensions"));
    }

    let raster = unfilter(&scanlines, height as usize, stride)?;
    strip_padding(&raster)
}

/// Validate signature and chunk structure; return dimensions and the
/// concatenated IDAT payload.
fn parse_container(data: &[u8]) -> Result<(u32, u32, Vec<u8>), CodecError> {
    if data.len() < SIGNATURE.len() || data[..SIGNATURE.len()] != SIGNATURE {
        return Err(unwrap_err("missing PNG signature"));
    }
    let mut pos = SIGNATURE.len();
    let mut header: Option<(u32, u32)> = None;
    let mut idat = Vec::new();
    let mut seen_end = false;

    while pos < data.len() {
        if data.len() - pos < 12 {
            return Err(unwrap_err("truncated chunk"));
        }
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let tag: [u8; 4] = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let body_start = pos + 8;
        let body_end = body_start + len;
        if body_end + 4 > data.len() {
            return Err(unwrap_err("chunk overruns file"));
        }
        let body = &data[body_start..body_end];
        let declared_crc = u32::from_be_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let mut crc = Crc::new();
        crc.update(&tag);
        crc.update(body);
        if crc.sum() != declared_crc {
            return Err(unwrap_err(format!(
                "chunk {} CRC mismatch",
                String::from_utf8_lossy(&tag)
            )));
        }

        match &tag {
            b"IHDR" => {
                if body.len() != 13 {
                    return Err(unwrap_err("malformed IHDR"));
                }
                let width = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let height = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
                    return Err(unwrap_err("unreasonable image dimensions"));
                }
                // 8-bit RGBA, deflate, adaptive filtering, no interlace.
                if body[8] != 8 || body[9] != 6 || body[10] != 0 || body[11] != 0 || body[12] != 0 {
                    return Err(unwrap_err("unsupported image format (need 8-bit RGBA)"));
                }
                header = Some((width, height));
            }
            b"IDAT" => idat.extend_from_slice(body),
            b"IEND" => {
                seen_end = true;
                break;
            }
            _ => {} // ancillary chunks carry no payload bytes
        }
        pos = body_end + 4;
    }

    let (width, height) = header.ok_or_else(|| unwrap_err("missing IHDR"))?;
    if !seen_end {
        return Err(unwrap_err("missing IEND"));
    }
    if idat.is_empty() {
        return Err(unwrap_err("missing IDAT"));
    }
    Ok((width, height, idat))
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let (a, b, c) = (left as i32, up as i32, up_left as i32);
    let p = a + b - c;
    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// Undo per-scanline filtering; returns the raw raster.
fn unfilter(scanlines: &[u8], rows: usize, stride: usize) -> Result<Vec<u8>, CodecError> {
    let mut raster = vec![0u8; rows * stride];
    for row in 0..rows {
        let line = &scanlines[row * (stride + 1)..(row + 1) * (stride + 1)];
        let filter = line[0];
        let (done, cur) = raster.split_at_mut(row * stride);
        let prev = &done[done.len().saturating_sub(stride)..];
        let cur = &mut cur[..stride];
        for i in 0..stride {
            let x = line[1 + i];
            let left = if i >= BYTES_PER_PIXEL { cur[i - BYTES_PER_PIXEL] } else { 0 };
            let up = if row > 0 { prev[i] } else { 0 };
            let up_left = if row > 0 && i >= BYTES_PER_PIXEL { prev[i - BYTES_PER_PIXEL] } else { 0 };
            cur[i] = match filter {
                0 => x,
                1 => x.wrapping_add(left),
                2 => x.wrapping_add(up),
                3 => x.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => x.wrapping_add(paeth(left, up, up_left)),
                other => return Err(unwrap_err(format!("unknown scanline filter {other}"))),
            };
        }
    }
    Ok(raster)
}

/// Read the length pixel and slice out the payload.
fn strip_padding(raster: &[u8]) -> Result<Vec<u8>, CodecError> {
    if raster.len() < 4 {
        return Err(unwrap_err("raster too small for the length header"));
    }
    let declared = u32::from_be_bytes([raster[0], raster[1], raster[2], raster[3]]) as usize;
    raster
        .get(4..4 + declared)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| unwrap_err("declared payload length overruns the raster"))
}
