//! Lossless compressors for both encapsulation layers.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use super::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    /// Pass-through; for payloads that are already dense.
    Identity,
    /// zlib deflate at the default level.
    Zlib,
}

impl Compressor {
    /// Identifier recorded in catalog records and the resource header.
    pub fn id(&self) -> &'static str {
        match self {
            Compressor::Identity => "pass",
            Compressor::Zlib => "zlib",
        }
    }

    /// One-byte code used by the resource inner format.
    pub fn code(&self) -> u8 {
        match self {
            Compressor::Identity => 0,
            Compressor::Zlib => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Compressor::Identity),
            1 => Some(Compressor::Zlib),
            _ => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compressor::Identity => Ok(data.to_vec()),
            Compressor::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| CodecError::Compress(e.to_string()))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compressor::Identity => Ok(data.to_vec()),
            Compressor::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| CodecError::Decompress(e.to_string()))?;
                Ok(out)
            }
        }
    }
}
