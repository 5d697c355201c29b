//! First-layer fragment processing: fixed-size chunking, encapsulation and
//! content addressing.
//!
//! The hash of the *encapsulated* body is the dedup key, so two compounds
//! share fragments only when they agree on fragment size and first-layer
//! codecs. Keeping those settings stable is an operator tuning decision.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::catalog::ContentHash;
use crate::codec::{CodecError, Encapsulation};

#[derive(Debug, Clone, Copy)]
pub struct FragmentPipeline {
    encapsulation: Encapsulation,
}

impl FragmentPipeline {
    pub fn new(encapsulation: Encapsulation) -> Self {
        Self { encapsulation }
    }

    /// Plain chunk -> (dedup key, encapsulated body).
    pub fn encode_chunk(&self, chunk: &[u8]) -> Result<(ContentHash, Bytes), CodecError> {
        let body = self.encapsulation.apply(chunk)?;
        let hash = ContentHash::of(&body);
        Ok((hash, Bytes::from(body)))
    }

    /// Encapsulated body -> plain chunk.
    pub fn decode_body(&self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.encapsulation.strip(body)
    }
}

/// Read the next fragment-sized chunk. Short reads are filled until the
/// chunk is complete or the stream ends; the final chunk keeps its true
/// length and is never padded.
pub async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    size: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut chunk = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    chunk.truncate(filled);
    Ok(Some(chunk))
}
