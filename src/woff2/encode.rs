/* Copyright 2014 Google Inc. All Rights Reserved.

   Distributed under MIT license.
   See file LICENSE for detail or copy at https://opensource.org/licenses/MIT
*/

//! Conversion of sfnt fonts to WOFF2.

use std::collections::HashMap;

use brotli::enc::backward_references::BrotliEncoderMode;
use brotli::enc::BrotliEncoderParams;
use bytes::BufMut;
use font_types::Tag;

use crate::error::{bail, bail_if, bail_with_msg_if, WoffleErr};
use crate::round4;
use crate::sfnt::normalize::normalize_font_collection;
use crate::sfnt::{FontCollection, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE};
use crate::table_tags::{GLYF, HEAD, LOCA, TTC_FLAVOR};
use crate::variable_length::{put_255_u16, put_base_128};
use crate::woff2::glyf_encoder::transform_glyf_table;
use crate::woff2::{DEFAULT_BROTLI_QUALITY, WOFF2_HEADER_SIZE, WOFF2_SIGNATURE};

pub struct CompressOptions {
    /// Brotli quality, 0-11.
    pub brotli_quality: u32,
    /// Extended metadata (XML), compressed into the trailing metadata block.
    pub extended_metadata: Option<String>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressOptions {
            brotli_quality: DEFAULT_BROTLI_QUALITY,
            extended_metadata: None,
        }
    }
}

/// Worst-case WOFF2 size for an input of `input_len` bytes.
///
/// Except for the header, which is 32 bytes larger than an sfnt header,
/// every part of the container is smaller than its sfnt counterpart (short
/// directory entries, transforms, compression); 1024 bytes is generous
/// headroom.
pub fn max_compressed_size(input_len: usize, extended_metadata_len: usize) -> usize {
    input_len + 1024 + extended_metadata_len
}

/// Convert sfnt bytes (a single font or a TTC) to WOFF2 with the default
/// quality and no metadata block.
pub fn compress(sfnt_data: &[u8]) -> Result<Vec<u8>, WoffleErr> {
    compress_with_options(sfnt_data, &CompressOptions::default())
}

pub fn compress_with_options(
    sfnt_data: &[u8],
    options: &CompressOptions,
) -> Result<Vec<u8>, WoffleErr> {
    let mut collection = FontCollection::read(sfnt_data)?;
    normalize_font_collection(&mut collection)?;

    // Transform each font's glyf table. Keyed by pool index, so a glyf
    // shared between collection fonts is transformed once.
    let mut transformed_glyf: HashMap<u16, Vec<u8>> = HashMap::new();
    for font_idx in 0..collection.fonts.len() {
        if let Some(glyf_ix) = collection.font_table_index(font_idx, GLYF) {
            if !transformed_glyf.contains_key(&glyf_ix) {
                transformed_glyf.insert(glyf_ix, transform_glyf_table(&collection, font_idx)?);
            }
        }
    }

    // The WOFF2 table directory: every pool table exactly once, in
    // font-major output order. Fonts of a collection reference shared
    // entries through `directory_index_by_pool`.
    let mut records: Vec<DirectoryRecord> = Vec::with_capacity(collection.tables.len());
    let mut directory_index_by_pool: HashMap<u16, u16> = HashMap::new();
    for font_idx in 0..collection.fonts.len() {
        for pool_ix in collection.output_ordered_indices(font_idx) {
            if directory_index_by_pool.contains_key(&pool_ix) {
                continue;
            }
            directory_index_by_pool.insert(pool_ix, records.len() as u16);

            let table = &collection.tables[pool_ix as usize];
            let transform_length = if table.tag == GLYF {
                Some(
                    transformed_glyf
                        .get(&pool_ix)
                        .map(|blob| blob.len() as u32)
                        .ok_or(WoffleErr::MalformedFont)?,
                )
            } else if table.tag == LOCA {
                // The transformed loca is empty; the decoder rebuilds it.
                Some(0)
            } else {
                None
            };
            records.push(DirectoryRecord {
                pool_ix,
                tag: table.tag,
                src_length: table.length(),
                transform_length,
            });
        }
    }
    bail_if!(records.is_empty() || records.len() > u16::MAX as usize);

    // Concatenate every table's post-transform bytes and compress them as
    // one Brotli stream in FONT mode.
    let mut stream: Vec<u8> = Vec::new();
    for record in &records {
        match record.transform_length {
            Some(_) if record.tag == GLYF => {
                stream.extend_from_slice(&transformed_glyf[&record.pool_ix])
            }
            Some(_) => {} // loca: zero bytes
            None => stream.extend_from_slice(collection.tables[record.pool_ix as usize].data()),
        }
    }
    let compressed = brotli_compress(
        &stream,
        BrotliEncoderMode::BROTLI_MODE_FONT,
        options.brotli_quality,
    )?;

    let metadata = options.extended_metadata.as_deref().unwrap_or("");
    let compressed_metadata = if metadata.is_empty() {
        Vec::new()
    } else {
        brotli_compress(
            metadata.as_bytes(),
            BrotliEncoderMode::BROTLI_MODE_TEXT,
            options.brotli_quality,
        )?
    };

    // Serialize the variable-length directories up front so the total
    // length is exact rather than re-derived from per-entry sizing.
    let mut directory_bytes: Vec<u8> = Vec::new();
    for record in &records {
        record.store(&mut directory_bytes);
    }
    let mut collection_directory_bytes: Vec<u8> = Vec::new();
    if collection.is_collection() {
        collection_directory_bytes.put_u32(collection.header_version);
        put_255_u16(&mut collection_directory_bytes, collection.fonts.len() as u16);
        for font_idx in 0..collection.fonts.len() {
            let ordered = collection.output_ordered_indices(font_idx);
            put_255_u16(&mut collection_directory_bytes, ordered.len() as u16);
            collection_directory_bytes
                .put_slice(&collection.fonts[font_idx].flavor.to_be_bytes());
            for pool_ix in ordered {
                put_255_u16(
                    &mut collection_directory_bytes,
                    directory_index_by_pool[&pool_ix],
                );
            }
        }
    }

    let woff2_length = round4(
        WOFF2_HEADER_SIZE
            + directory_bytes.len()
            + collection_directory_bytes.len()
            + compressed.len(),
    ) + compressed_metadata.len();
    let total_sfnt_size = compute_uncompressed_length(&collection);
    let flavor = if collection.is_collection() {
        TTC_FLAVOR
    } else {
        collection.fonts[0].flavor
    };
    let head = match collection.font_table(0, HEAD) {
        Some(head) => head,
        None => {
            log::debug!("missing head table");
            bail!();
        }
    };
    bail_if!(head.length() < 8);
    let font_revision: [u8; 4] = head.data()[4..8].try_into().unwrap();

    // WOFF2 header. <https://www.w3.org/TR/WOFF2/#woff20Header>
    let mut out: Vec<u8> = Vec::with_capacity(woff2_length);
    out.put_slice(&WOFF2_SIGNATURE.to_be_bytes());
    out.put_slice(&flavor.to_be_bytes());
    out.put_u32(woff2_length as u32);
    out.put_u16(records.len() as u16);
    out.put_u16(0); // reserved
    out.put_u32(total_sfnt_size as u32);
    out.put_u32(compressed.len() as u32);
    out.put_slice(&font_revision); // majorVersion / minorVersion
    if compressed_metadata.is_empty() {
        out.put_u32(0); // metaOffset
        out.put_u32(0); // metaLength
        out.put_u32(0); // metaOrigLength
    } else {
        out.put_u32((woff2_length - compressed_metadata.len()) as u32);
        out.put_u32(compressed_metadata.len() as u32);
        out.put_u32(metadata.len() as u32);
    }
    out.put_u32(0); // privOffset
    out.put_u32(0); // privLength

    // Table directory, then the collection directory for TTCs.
    // <https://www.w3.org/TR/WOFF2/#table_dir_format>
    out.extend_from_slice(&directory_bytes);
    out.extend_from_slice(&collection_directory_bytes);

    // Compressed payload, zero-padded to 4 bytes, then the metadata block.
    out.extend_from_slice(&compressed);
    out.resize(round4(out.len()), 0);
    out.extend_from_slice(&compressed_metadata);

    bail_with_msg_if!(
        out.len() != woff2_length,
        "mismatch between computed and actual length ({} vs {})",
        woff2_length,
        out.len()
    );
    Ok(out)
}

struct DirectoryRecord {
    pool_ix: u16,
    tag: Tag,
    /// origLength: size of the table in the reconstructed sfnt.
    src_length: u32,
    /// Present exactly for transformed tables (glyf and loca).
    transform_length: Option<u32>,
}

impl DirectoryRecord {
    fn store(&self, out: &mut Vec<u8>) {
        // Bits 6-7 of the flag byte are reserved and stay zero; transform
        // version 0 is the only one we emit.
        out.put_u8(known_tag_byte(self.tag));
        if known_tag_byte(self.tag) == 63 {
            out.put_slice(&self.tag.to_be_bytes());
        }
        put_base_128(out, self.src_length);
        if let Some(transform_length) = self.transform_length {
            put_base_128(out, transform_length);
        }
    }
}

fn known_tag_byte(tag: Tag) -> u8 {
    crate::table_tags::known_tag_index(tag)
}

fn brotli_compress(
    data: &[u8],
    mode: BrotliEncoderMode,
    quality: u32,
) -> Result<Vec<u8>, WoffleErr> {
    let params = BrotliEncoderParams {
        quality: quality as i32,
        mode,
        ..Default::default()
    };
    let mut out: Vec<u8> = Vec::with_capacity(data.len() / 2 + 1024);
    let mut input = data;
    brotli::BrotliCompress(&mut input, &mut out, &params).map_err(|_| WoffleErr::MalformedFont)?;
    Ok(out)
}

/// totalSfntSize: what the reconstructed sfnt will occupy, shared tables
/// counted once.
fn compute_uncompressed_length(collection: &FontCollection<'_>) -> usize {
    let mut size = collection.collection_header_size();
    for font in &collection.fonts {
        size += SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len();
    }
    for table in &collection.tables {
        size += round4(table.length() as usize);
    }
    size
}
