//! The WOFF2 container: header, directories, the glyf/loca transform and
//! its inverse, and the top-level encoder and decoder.

pub mod decode;
pub mod encode;
pub(crate) mod glyf_decoder;
pub(crate) mod glyf_encoder;
pub(crate) mod headers;

use font_types::Tag;

pub(crate) const WOFF2_SIGNATURE: Tag = Tag::new(b"wOF2");
pub(crate) const WOFF2_HEADER_SIZE: usize = 48;

/// Ceiling on the total uncompressed size a WOFF2 file may claim.
pub(crate) const MAX_UNCOMPRESSED_SIZE: u32 = 30 * 1024 * 1024;

/// Default Brotli quality; the format was tuned for maximum compression.
pub(crate) const DEFAULT_BROTLI_QUALITY: u32 = 11;
