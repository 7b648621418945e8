//! WOFF2 encoder/decoder for sfnt fonts.
//!
//! The codec converts TrueType/OpenType fonts (single fonts or TrueType
//! Collections) to the WOFF2 container and back:
//!
//! - [`compress`] normalizes the font (canonical glyph packing, fixed
//!   checksums), applies the glyf/loca transform and emits a WOFF2 file
//!   with a single Brotli stream.
//! - [`decompress`] parses and validates a WOFF2 file, inverts the
//!   transform and reassembles a well-formed sfnt with correct checksums.
//!
//! Round-trip laws the implementation maintains: decoding an encoded font
//! yields exactly the normalized form of the input, and re-encoding a
//! decoded WOFF2 file reproduces it byte for byte.
//!
//! <https://www.w3.org/TR/WOFF2/>

pub mod checksum;
pub mod error;
pub mod sfnt;
pub mod table_tags;
pub mod variable_length;
pub mod woff2;

pub use error::WoffleErr;
pub use sfnt::normalize::normalize_font_collection;
pub use sfnt::FontCollection;
pub use woff2::decode::{compute_final_size, decompress, decompress_with_brotli};
pub use woff2::encode::{compress, compress_with_options, max_compressed_size, CompressOptions};

/// Round up to the nearest multiple of 4, saturating instead of
/// overflowing.
pub(crate) fn round4(value: usize) -> usize {
    match value.checked_add(3) {
        Some(value_plus_3) => value_plus_3 & !3,
        None => value,
    }
}
