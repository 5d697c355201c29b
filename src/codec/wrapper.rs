//! Wrappers: reversible transforms that make raw bytes acceptable to a
//! backend that only takes specific formats.

use serde::{Deserialize, Serialize};

use super::{png, svg, CodecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wrapper {
    /// Pass-through, for backends that accept arbitrary blobs.
    Identity,
    /// Payload hidden in a square RGBA PNG; the preferred image wrapper.
    Png,
    /// Hex payload in an SVG document; fallback when PNG is not tolerated.
    Svg,
}

impl Wrapper {
    /// Identifier recorded in catalog records and the resource header.
    pub fn id(&self) -> &'static str {
        match self {
            Wrapper::Identity => "pass",
            Wrapper::Png => "png",
            Wrapper::Svg => "svg",
        }
    }

    /// One-byte code used by the resource inner format.
    pub fn code(&self) -> u8 {
        match self {
            Wrapper::Identity => 0,
            Wrapper::Png => 1,
            Wrapper::Svg => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Wrapper::Identity),
            1 => Some(Wrapper::Png),
            2 => Some(Wrapper::Svg),
            _ => None,
        }
    }

    /// File extension backends use when a key doubles as a file name.
    pub fn extension(&self) -> &'static str {
        match self {
            Wrapper::Identity => "bin",
            Wrapper::Png => "png",
            Wrapper::Svg => "svg",
        }
    }

    pub fn wrap(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Wrapper::Identity => Ok(data.to_vec()),
            Wrapper::Png => png::wrap(data),
            Wrapper::Svg => Ok(svg::wrap(data)),
        }
    }

    pub fn unwrap(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Wrapper::Identity => Ok(data.to_vec()),
            Wrapper::Png => png::unwrap(data),
            Wrapper::Svg => svg::unwrap(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_property() {
        let payload: Vec<u8> = (0..5000).map(|i| (i * 7 % 256) as u8).collect();
        for wrapper in [Wrapper::Identity, Wrapper::Png, Wrapper::Svg] {
            assert_eq!(wrapper.unwrap(&wrapper.wrap(&payload).unwrap()).unwrap(), payload);
        }
    }

    #[test]
    fn test_codes_round_trip() {
        for w in [Wrapper::Identity, Wrapper::Png, Wrapper::Svg] {
            assert_eq!(Wrapper::from_code(w.code()), Some(w));
        }
        assert_eq!(Wrapper::from_code(7), None);
    }
}
