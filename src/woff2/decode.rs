//! Conversion of WOFF2 files back to sfnt bytes.

use std::collections::HashMap;
use std::error::Error;
use std::io::Write;

use brotli_decompressor::DecompressorWriter;
use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::checksum::{compute_checksum, CHECKSUM_ADJUSTMENT_MAGIC};
use crate::error::{bail, bail_if, bail_with_msg_if, WoffleErr};
use crate::round4;
use crate::table_tags::{GLYF, HEAD, LOCA};
use crate::woff2::glyf_decoder::reconstruct_glyf_table;
use crate::woff2::headers::{
    CollectionDirectory, CollectionDirectoryEntry, Woff2Header, Woff2TableDirectory,
};
use crate::woff2::MAX_UNCOMPRESSED_SIZE;

// Over 14k test fonts the max compression ratio seen to date was ~20.
// >100 suggests you wrote a bad uncompressed size.
const MAX_PLAUSIBLE_COMPRESSION_RATIO: f32 = 100.0;

/// The Brotli collaborator: `(compressed bytes, expected size) -> bytes`.
pub type BrotliDecompressor<'b> = dyn FnMut(&[u8], usize) -> Result<Vec<u8>, Box<dyn Error>> + 'b;

fn brotli_decompress(compressed: &[u8], size_hint: usize) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut output: Vec<u8> = Vec::with_capacity(size_hint);
    let mut decompressor = DecompressorWriter::new(&mut output, 4096);
    decompressor.write_all(compressed)?;
    decompressor.close()?;
    drop(decompressor);
    Ok(output)
}

/// Convert a WOFF2 file to sfnt bytes (a single font or a TTC).
pub fn decompress(woff2_data: &[u8]) -> Result<Vec<u8>, WoffleErr> {
    decompress_with_brotli(woff2_data, &mut brotli_decompress)
}

/// [`decompress`] with the entropy coder supplied by the caller.
pub fn decompress_with_brotli(
    woff2_data: &[u8],
    brotli: &mut BrotliDecompressor<'_>,
) -> Result<Vec<u8>, WoffleErr> {
    // Parsing functions advance this view; `woff2_data` stays whole so
    // absolute offsets can be validated against it.
    let mut input = woff2_data;

    let header = Woff2Header::parse(&mut input)?;
    let table_directory = Woff2TableDirectory::parse(&mut input, header.num_tables as usize)?;

    let uncompressed_size = table_directory.uncompressed_size;
    bail_if!(uncompressed_size < 1);
    bail_with_msg_if!(
        uncompressed_size > MAX_UNCOMPRESSED_SIZE,
        "uncompressed size {} exceeds the {} byte cap",
        uncompressed_size,
        MAX_UNCOMPRESSED_SIZE
    );

    let mut collection_directory = if header.is_collection() {
        CollectionDirectory::parse(&mut input, &table_directory)?
    } else {
        CollectionDirectory::for_single_font(header.flavor, &table_directory)
    };
    collection_directory.sort_tables_within_each_font(&table_directory);

    // The compressed block, metadata block and private block must be
    // contiguous (up to padding) and account for the whole file.
    let compressed_offset = woff2_data.len() - input.remaining();
    let mut block_end = round4(compressed_offset + header.total_compressed_size as usize);
    bail_if!(block_end > woff2_data.len());
    if header.meta_offset != 0 {
        bail_if!(header.meta_offset as usize != block_end);
        block_end = round4(header.meta_offset as usize + header.meta_length as usize);
    }
    if header.priv_offset != 0 {
        bail_if!(header.priv_offset as usize != block_end);
        block_end = round4(header.priv_offset as usize + header.priv_length as usize);
    }
    bail_if!(block_end != round4(woff2_data.len()));

    let compression_ratio = uncompressed_size as f32 / woff2_data.len() as f32;
    bail_with_msg_if!(
        compression_ratio > MAX_PLAUSIBLE_COMPRESSION_RATIO,
        "implausible compression ratio {:.1}",
        compression_ratio
    );

    let compressed =
        &woff2_data[compressed_offset..compressed_offset + header.total_compressed_size as usize];
    let stream = brotli(compressed, uncompressed_size as usize)
        .map_err(|_| WoffleErr::MalformedFont)?;
    // The stream must decompress to exactly the sum of the table extents.
    bail_if!(stream.len() != uncompressed_size as usize);

    let mut out: Vec<u8> = Vec::with_capacity(header.total_sfnt_size as usize);
    let mut sfnt_header = generate_sfnt_header(&header, &table_directory, &collection_directory);
    out.extend_from_slice(&sfnt_header.data);

    let mut table_metadata: Vec<Option<TableMetadata>> = vec![None; table_directory.len()];
    for font_idx in 0..collection_directory.fonts.len() {
        reconstruct_font(
            &stream,
            &table_directory,
            &collection_directory.fonts[font_idx],
            &mut sfnt_header,
            &mut table_metadata,
            &mut out,
            font_idx,
        )?;
    }

    // Back-patch the directory entries that were written as zeros.
    out[..sfnt_header.data.len()].copy_from_slice(&sfnt_header.data);

    Ok(out)
}

/// Final-size oracle: the `totalSfntSize` header field, bounded.
pub fn compute_final_size(woff2_data: &[u8], max_size: usize) -> Result<usize, WoffleErr> {
    let mut input = woff2_data;
    bail_if!(input.remaining() < 20);
    input.advance(16);
    let total_sfnt_size = input.try_get_u32()? as usize;
    bail_if!(total_sfnt_size > max_size);
    Ok(total_sfnt_size)
}

#[derive(Clone, Copy, Default)]
struct TableMetadata {
    checksum: u32,
    dst_offset: u32,
    dst_length: u32,
}

impl TableMetadata {
    fn header_checksum_contribution(&self) -> u32 {
        self.checksum
            .wrapping_add(self.dst_offset)
            .wrapping_add(self.dst_length)
    }
}

#[derive(Clone, Default)]
struct FontInfo {
    /// Byte offset of each table's directory entry in the output header.
    table_entry_by_tag: HashMap<Tag, usize>,
    /// Checksum of this font's sfnt header and (zero-filled) directory.
    header_checksum: u32,
}

struct SfntHeaderData {
    data: Vec<u8>,
    font_infos: Vec<FontInfo>,
}

impl SfntHeaderData {
    /// Replace a zeroed directory entry with the table's real values.
    fn update_table_entry(&mut self, font_idx: usize, tag: Tag, metadata: TableMetadata) {
        let entry_offset = self.font_infos[font_idx].table_entry_by_tag[&tag];
        let mut entry = &mut self.data[entry_offset + 4..];
        entry.put_u32(metadata.checksum);
        entry.put_u32(metadata.dst_offset);
        entry.put_u32(metadata.dst_length);
    }
}

/// Lay out the sfnt header(s) and zero-filled table directories.
///
/// Entry values are patched in as tables are reconstructed; per-font header
/// checksums are taken now, while the entries are still zero, and table
/// contributions are added as the entries fill in.
fn generate_sfnt_header(
    header: &Woff2Header,
    tables: &Woff2TableDirectory,
    collection_directory: &CollectionDirectory,
) -> SfntHeaderData {
    let num_fonts = collection_directory.fonts.len();
    let mut output: Vec<u8> = Vec::new();
    let mut font_infos: Vec<FontInfo> = vec![FontInfo::default(); num_fonts];

    if header.is_collection() {
        output.put_slice(&header.flavor.to_be_bytes()); // TTCTag
        output.put_u32(collection_directory.version);
        output.put_u32(num_fonts as u32);

        let first_directory_offset = match collection_directory.version {
            0x0002_0000 => 12 + 12 + 4 * num_fonts as u32,
            _ => 12 + 4 * num_fonts as u32,
        };
        let mut directory_offset = first_directory_offset;
        for font in &collection_directory.fonts {
            output.put_u32(directory_offset);
            directory_offset += font.table_directory_size() as u32;
        }

        if collection_directory.version == 0x0002_0000 {
            output.put_u32(0); // ulDsigTag
            output.put_u32(0); // ulDsigLength
            output.put_u32(0); // ulDsigOffset
        }
    }

    for (font, info) in collection_directory.fonts.iter().zip(font_infos.iter_mut()) {
        let directory_start = output.len();
        write_sfnt_directory_header(&mut output, font.flavor, font.num_tables() as u16);
        for &table_index in &font.table_indices {
            let tag = tables[table_index as usize].tag;
            info.table_entry_by_tag.insert(tag, output.len());
            output.put_slice(&tag.to_be_bytes());
            output.put_u32(0); // checksum, patched later
            output.put_u32(0); // offset
            output.put_u32(0); // length
        }
        info.header_checksum = compute_checksum(&output[directory_start..]);
    }

    SfntHeaderData {
        data: output,
        font_infos,
    }
}

fn write_sfnt_directory_header(output: &mut impl BufMut, flavor: Tag, num_tables: u16) {
    let (search_range, entry_selector, range_shift) =
        crate::checksum::binary_search_header_fields(num_tables);
    output.put_slice(&flavor.to_be_bytes());
    output.put_u16(num_tables);
    output.put_u16(search_range);
    output.put_u16(entry_selector);
    output.put_u16(range_shift);
}

#[allow(clippy::too_many_arguments)]
fn reconstruct_font(
    stream: &[u8],
    tables: &Woff2TableDirectory,
    font_entry: &CollectionDirectoryEntry,
    sfnt_header: &mut SfntHeaderData,
    table_metadata: &mut [Option<TableMetadata>],
    out: &mut Vec<u8>,
    font_idx: usize,
) -> Result<(), WoffleErr> {
    // 'glyf' without 'loca' doesn't make sense, in either direction.
    let loca_idx = match (font_entry.glyf_idx, font_entry.loca_idx) {
        (Some(_), Some(loca_idx)) => Some(loca_idx as usize),
        (Some(_), None) | (None, Some(_)) => {
            bail_with_msg_if!(true, "font has only one of glyf/loca");
            None
        }
        (None, None) => None,
    };

    let mut font_checksum: u32 = sfnt_header.font_infos[font_idx].header_checksum;

    // Tables are visited in the order the output emits them (sorted by
    // tag), so glyf is reconstructed before the loca entry is reached.
    for &table_idx in &font_entry.table_indices {
        let table_idx = table_idx as usize;
        let table = &tables[table_idx];

        let metadata = if let Some(metadata) = table_metadata[table_idx] {
            // Already produced: either a table shared with an earlier font
            // of a collection, or loca, which glyf reconstruction emits.
            // Within the first font only loca can legitimately hit this.
            bail_if!(font_idx == 0 && table.tag != LOCA);
            metadata
        } else if !table.transformed {
            let table_data = table.src_slice(stream)?;

            // The head checksum is defined over a zero checkSumAdjustment;
            // subtracting the stored value saves rewriting the bytes.
            let checksum_adjustment = if table.tag == HEAD {
                bail_if!(table.src_length < 12);
                u32::from_be_bytes(table_data[8..12].try_into().unwrap())
            } else {
                0
            };
            let checksum = compute_checksum(table_data).wrapping_sub(checksum_adjustment);

            let metadata = TableMetadata {
                checksum,
                dst_offset: out.len() as u32,
                dst_length: table.dst_length,
            };
            table_metadata[table_idx] = Some(metadata);

            out.extend_from_slice(table_data);
            out.resize(round4(out.len()), 0);
            metadata
        } else if table.tag == GLYF {
            let loca_idx = loca_idx.expect("glyf implies loca was checked above");
            let loca_entry = &tables[loca_idx];

            let transformed = table.src_slice(stream)?;
            let rebuilt = reconstruct_glyf_table(transformed, loca_entry.dst_length)?;
            bail_if!(rebuilt.glyf_table.len() as u32 != table.dst_length);

            let glyf_metadata = TableMetadata {
                checksum: rebuilt.glyf_checksum,
                dst_offset: out.len() as u32,
                dst_length: rebuilt.glyf_table.len() as u32,
            };
            out.extend_from_slice(&rebuilt.glyf_table);
            out.resize(round4(out.len()), 0);
            table_metadata[table_idx] = Some(glyf_metadata);

            let loca_metadata = TableMetadata {
                checksum: rebuilt.loca_checksum,
                dst_offset: out.len() as u32,
                dst_length: rebuilt.loca_table.len() as u32,
            };
            out.extend_from_slice(&rebuilt.loca_table);
            out.resize(round4(out.len()), 0);
            table_metadata[loca_idx] = Some(loca_metadata);

            glyf_metadata
        } else {
            // A transformed table that isn't glyf (or loca, which never
            // reaches this arm) has no defined reconstruction.
            bail!();
        };

        font_checksum = font_checksum.wrapping_add(metadata.checksum);
        sfnt_header.update_table_entry(font_idx, table.tag, metadata);
        font_checksum = font_checksum.wrapping_add(metadata.header_checksum_contribution());
    }

    // Set head.checkSumAdjustment so the whole font sums to the magic.
    //
    //   1. Treat checkSumAdjustment as 0.
    //   2. Sum all table checksums and the header.
    //   3. Store 0xB1B0AFBA minus that sum.
    //
    // <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#calculating-checksums>
    if let Some(head_idx) = font_entry.head_idx {
        let head_metadata = table_metadata[head_idx as usize]
            .expect("all of this font's tables have metadata now");
        let adjustment = CHECKSUM_ADJUSTMENT_MAGIC.wrapping_sub(font_checksum);
        let offset = head_metadata.dst_offset as usize + 8;
        bail_if!(offset + 4 > out.len());
        out[offset..offset + 4].copy_from_slice(&adjustment.to_be_bytes());
    }

    Ok(())
}
