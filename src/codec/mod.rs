//! Reversible payload transforms: compressors and wrappers.
//!
//! Encapsulation is always compress-then-wrap so the wrapper sees already
//! dense bytes and the output stays a valid container format. Both layers
//! (per-fragment and per-resource) use the same closed set of codecs; the
//! identifiers recorded in the catalog make every stored blob self-describing.

pub mod compressor;
pub mod png;
pub mod svg;
pub mod wrapper;

pub use compressor::Compressor;
pub use wrapper::Wrapper;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("wrap failed: {0}")]
    Wrap(String),

    #[error("unwrap failed: {0}")]
    Unwrap(String),

    #[error("compress failed: {0}")]
    Compress(String),

    #[error("decompress failed: {0}")]
    Decompress(String),
}

/// One encapsulation layer: a compressor followed by a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encapsulation {
    pub compressor: Compressor,
    pub wrapper: Wrapper,
}

impl Default for Encapsulation {
    fn default() -> Self {
        Self {
            compressor: Compressor::Identity,
            wrapper: Wrapper::Identity,
        }
    }
}

impl Encapsulation {
    pub fn new(compressor: Compressor, wrapper: Wrapper) -> Self {
        Self { compressor, wrapper }
    }

    /// Plain bytes -> encapsulated bytes (compress, then wrap).
    pub fn apply(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.wrapper.wrap(&self.compressor.compress(data)?)
    }

    /// Encapsulated bytes -> plain bytes (unwrap, then decompress).
    pub fn strip(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.compressor.decompress(&self.wrapper.unwrap(data)?)
    }

    /// Identifier pair as recorded in catalog records, e.g. `zlib+png`.
    pub fn spec(&self) -> String {
        format!("{}+{}", self.compressor.id(), self.wrapper.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_strip_all_combinations() {
        let payload = b"some payload that zlib can shrink shrink shrink shrink".repeat(8);
        for compressor in [Compressor::Identity, Compressor::Zlib] {
            for wrapper in [Wrapper::Identity, Wrapper::Png, Wrapper::Svg] {
                let enc = Encapsulation::new(compressor, wrapper);
                let stored = enc.apply(&payload).unwrap();
                assert_eq!(enc.strip(&stored).unwrap(), payload, "{}", enc.spec());
            }
        }
    }

    #[test]
    fn test_spec_identifiers() {
        let enc = Encapsulation::new(Compressor::Zlib, Wrapper::Png);
        assert_eq!(enc.spec(), "zlib+png");
        assert_eq!(Encapsulation::default().spec(), "pass+pass");
    }
}
