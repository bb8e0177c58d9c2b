//! Body encoding seam.
//!
//! The framework core does not bundle a compression codec; hosts plug
//! one in through [`Compressor`] and the cache keeps whatever variants
//! it produced. [`IdentityCompressor`] is the no-op default for hosts
//! that serve identity bodies only.

use std::io;

use bytes::Bytes;

/// Named body encodings a cached record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

/// Produces compressed encodings of a response body.
///
/// Implementations must be pure with respect to the input bytes; the
/// cache stores the output verbatim and never re-invokes the
/// compressor for a hit.
pub trait Compressor: Send + Sync {
    fn gzip(&self, input: &[u8]) -> io::Result<Bytes>;
    fn deflate(&self, input: &[u8]) -> io::Result<Bytes>;
}

/// Pass-through compressor: every encoding is the identity bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn gzip(&self, input: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(input))
    }

    fn deflate(&self, input: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(input))
    }
}

/// A body held in one or more encodings.
///
/// `identity` is always present; the compressed variants exist only
/// when the record was stored with variant compression enabled.
#[derive(Debug, Clone, Default)]
pub struct EncodedVariants {
    pub identity: Bytes,
    pub gzip: Option<Bytes>,
    pub deflate: Option<Bytes>,
}

impl EncodedVariants {
    /// Wrap an identity body with no compressed variants.
    pub fn identity_only(identity: Bytes) -> Self {
        Self {
            identity,
            gzip: None,
            deflate: None,
        }
    }

    /// Encode a body, optionally producing compressed variants.
    pub fn encode(
        identity: Bytes,
        compressor: &dyn Compressor,
        compress_variants: bool,
    ) -> io::Result<Self> {
        if !compress_variants {
            return Ok(Self::identity_only(identity));
        }
        let gzip = compressor.gzip(&identity)?;
        let deflate = compressor.deflate(&identity)?;
        Ok(Self {
            identity,
            gzip: Some(gzip),
            deflate: Some(deflate),
        })
    }

    /// Look up one encoding. `Identity` always succeeds.
    pub fn get(&self, encoding: Encoding) -> Option<&Bytes> {
        match encoding {
            Encoding::Identity => Some(&self.identity),
            Encoding::Gzip => self.gzip.as_ref(),
            Encoding::Deflate => self.deflate.as_ref(),
        }
    }
}
