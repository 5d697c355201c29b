//! Resource inner payload format.
//!
//! ```text
//! +-------+---------+------+------+---------+------------------------+...
//! | magic | version | comp | wrap | count   | frames                 |
//! | PXRS  | u16 LE  | u8   | u8   | u32 LE  | per fragment:          |
//! |       |   (1)   |      |      |         | 32B sha256, u64 LE len,|
//! |       |         |      |      |         | body                   |
//! +-------+---------+------+------+---------+------------------------+...
//! ```
//!
//! The codec bytes mirror the catalog's per-resource encapsulation so a
//! payload is self-describing; a mismatch on decode means the blob was
//! swapped or tampered with.

use bytes::Bytes;

use crate::catalog::{ContentHash, FragmentPlacement};
use crate::codec::{Compressor, Encapsulation, Wrapper};

pub const MAGIC: [u8; 4] = *b"PXRS";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 12;
/// Hash + length prefix in front of every fragment body.
pub const FRAME_PREFIX_LEN: usize = 40;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("bad magic (not a resource payload)")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown codec byte {0}")]
    UnknownCodec(u8),

    #[error("payload truncated")]
    Truncated,

    #[error("header declares {header}, catalog records {catalog}")]
    SpecMismatch { header: String, catalog: String },
}

/// Concatenate fragment bodies into a framed inner payload. Returns the
/// payload and each body's final placement within it.
pub fn encode_payload(
    encapsulation: &Encapsulation,
    frames: &[(ContentHash, Bytes)],
) -> (Vec<u8>, Vec<FragmentPlacement>) {
    let body_total: usize = frames.iter().map(|(_, b)| b.len()).sum();
    let mut payload = Vec::with_capacity(HEADER_LEN + frames.len() * FRAME_PREFIX_LEN + body_total);
    payload.extend_from_slice(&MAGIC);
    payload.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    payload.push(encapsulation.compressor.code());
    payload.push(encapsulation.wrapper.code());
    payload.extend_from_slice(&(frames.len() as u32).to_le_bytes());

    let mut placements = Vec::with_capacity(frames.len());
    for (hash, body) in frames {
        payload.extend_from_slice(hash.as_bytes());
        payload.extend_from_slice(&(body.len() as u64).to_le_bytes());
        placements.push(FragmentPlacement {
            hash: *hash,
            offset: payload.len() as u64,
            length: body.len() as u64,
        });
        payload.extend_from_slice(body);
    }
    (payload, placements)
}

/// Parsed header of an inner payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub encapsulation: Encapsulation,
    pub fragment_count: u32,
}

pub fn parse_header(payload: &[u8]) -> Result<PayloadHeader, FormatError> {
    if payload.len() < HEADER_LEN {
        return Err(FormatError::Truncated);
    }
    if payload[..4] != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = u16::from_le_bytes([payload[4], payload[5]]);
    if version > FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let compressor = Compressor::from_code(payload[6]).ok_or(FormatError::UnknownCodec(payload[6]))?;
    let wrapper = Wrapper::from_code(payload[7]).ok_or(FormatError::UnknownCodec(payload[7]))?;
    let fragment_count = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]);
    Ok(PayloadHeader {
        encapsulation: Encapsulation::new(compressor, wrapper),
        fragment_count,
    })
}

/// Header check against what the catalog recorded for this resource.
pub fn check_header(
    payload: &[u8],
    encapsulation: &Encapsulation,
    fragment_count: u32,
) -> Result<(), FormatError> {
    let header = parse_header(payload)?;
    if header.encapsulation != *encapsulation || header.fragment_count != fragment_count {
        return Err(FormatError::SpecMismatch {
            header: format!("{}/{}", header.encapsulation.spec(), header.fragment_count),
            catalog: format!("{}/{}", encapsulation.spec(), fragment_count),
        });
    }
    Ok(())
}

/// Walk the frames of a payload; used by consistency checks and tests.
pub fn decode_frames(payload: &[u8]) -> Result<Vec<FragmentPlacement>, FormatError> {
    let header = parse_header(payload)?;
    let mut placements = Vec::with_capacity(header.fragment_count as usize);
    let mut pos = HEADER_LEN;
    for _ in 0..header.fragment_count {
        let prefix = payload.get(pos..pos + FRAME_PREFIX_LEN).ok_or(FormatError::Truncated)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&prefix[..32]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&prefix[32..]);
        let length = u64::from_le_bytes(len_bytes) as usize;
        pos += FRAME_PREFIX_LEN;
        if payload.len() < pos + length {
            return Err(FormatError::Truncated);
        }
        placements.push(FragmentPlacement {
            hash: ContentHash::from_bytes(hash),
            offset: pos as u64,
            length: length as u64,
        });
        pos += length;
    }
    if pos != payload.len() {
        return Err(FormatError::Truncated);
    }
    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(bodies: &[&[u8]]) -> Vec<(ContentHash, Bytes)> {
        bodies
            .iter()
            .map(|b| (ContentHash::of(b), Bytes::copy_from_slice(b)))
            .collect()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let enc = Encapsulation::new(Compressor::Zlib, Wrapper::Png);
        let frames = frames(&[b"first body", b"b", b""]);
        let (payload, placements) = encode_payload(&enc, &frames);

        let header = parse_header(&payload).unwrap();
        assert_eq!(header.encapsulation, enc);
        assert_eq!(header.fragment_count, 3);

        let decoded = decode_frames(&payload).unwrap();
        assert_eq!(decoded, placements);
        for (placement, (hash, body)) in decoded.iter().zip(&frames) {
            let slice =
                &payload[placement.offset as usize..(placement.offset + placement.length) as usize];
            assert_eq!(slice, body.as_ref());
            assert_eq!(placement.hash, *hash);
        }
    }

    #[test]
    fn test_check_header_flags_mismatch() {
        let enc = Encapsulation::default();
        let (payload, _) = encode_payload(&enc, &frames(&[b"x"]));
        check_header(&payload, &enc, 1).unwrap();
        let other = Encapsulation::new(Compressor::Zlib, Wrapper::Identity);
        assert!(matches!(
            check_header(&payload, &other, 1),
            Err(FormatError::SpecMismatch { .. })
        ));
        assert!(matches!(
            check_header(&payload, &enc, 2),
            Err(FormatError::SpecMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let (payload, _) = encode_payload(&Encapsulation::default(), &frames(&[b"body"]));
        assert!(matches!(
            decode_frames(&payload[..payload.len() - 1]),
            Err(FormatError::Truncated)
        ));
        assert!(matches!(parse_header(&payload[..4]), Err(FormatError::Truncated)));
    }

    #[test]
    fn test_foreign_bytes_rejected() {
        assert!(matches!(
            parse_header(b"definitely not a payload"),
            Err(FormatError::BadMagic)
        ));
    }
}
