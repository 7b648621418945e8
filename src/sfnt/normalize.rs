//! Canonicalization of an sfnt so that encode-then-decode is a fixed point.
//!
//! Normalization rewrites every glyph to 4-byte alignment with a recomputed
//! bounding box, rebuilds `loca` (retrying with 32-bit offsets when the
//! short form cannot address the table), drops `DSIG`, relays table offsets
//! and fixes every checksum including `head.checkSumAdjustment`.

use bytes::BufMut;

use crate::checksum::{
    compute_checksum, compute_header_checksum, CHECKSUM_ADJUSTMENT_MAGIC,
    CHECKSUM_ADJUSTMENT_OFFSET,
};
use crate::error::{bail, bail_if, WoffleErr};
use crate::round4;
use crate::sfnt::glyph::{BoundingBox, Glyph};
use crate::sfnt::{FontCollection, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE};
use crate::table_tags::{CFF, DSIG, GLYF, HEAD, LOCA};

/// Largest glyf offset a 16-bit loca can address (entries store offset / 2).
const SHORT_LOCA_LIMIT: usize = 1 << 17;

/// Normalize every font of the collection in place.
pub fn normalize_font_collection(collection: &mut FontCollection<'_>) -> Result<(), WoffleErr> {
    collection.remove_table(DSIG);

    let mut rewritten_glyf = vec![false; collection.tables.len()];
    for font_idx in 0..collection.fonts.len() {
        normalize_glyphs(collection, font_idx, &mut rewritten_glyf)?;
    }

    normalize_offsets(collection);

    for font_idx in 0..collection.fonts.len() {
        fix_checksums(collection, font_idx)?;
    }
    Ok(())
}

/// Rewrite one font's glyf/loca pair to canonical form.
///
/// CFF-flavored fonts pass through untouched. Tables shared with an already
/// normalized font are not rewritten twice.
fn normalize_glyphs(
    collection: &mut FontCollection<'_>,
    font_idx: usize,
    rewritten_glyf: &mut [bool],
) -> Result<(), WoffleErr> {
    bail_if!(collection.font_table(font_idx, HEAD).is_none());

    let cff = collection.font_table(font_idx, CFF);
    let glyf_idx = collection.font_table_index(font_idx, GLYF);
    let loca_idx = collection.font_table_index(font_idx, LOCA);
    if cff.is_some() && glyf_idx.is_none() && loca_idx.is_none() {
        return Ok(());
    }
    let (Some(glyf_idx), Some(loca_idx)) = (glyf_idx, loca_idx) else {
        bail!();
    };
    if rewritten_glyf[glyf_idx as usize] {
        return Ok(());
    }

    let mut index_format = collection.index_format(font_idx)?;
    let num_glyphs = collection.num_glyphs(font_idx)?;

    let rewrite = match rewrite_glyf(collection, font_idx, num_glyphs, index_format)? {
        GlyfRewrite::Done(done) => done,
        GlyfRewrite::NeedsLongLoca => {
            // A short loca can't address this glyf table. Rewrite with
            // 32-bit entries and update head to match.
            bail_if!(index_format != 0);
            index_format = 1;
            match rewrite_glyf(collection, font_idx, num_glyphs, index_format)? {
                GlyfRewrite::Done(done) => done,
                GlyfRewrite::NeedsLongLoca => bail!(),
            }
        }
    };

    collection.tables[glyf_idx as usize].set_data(rewrite.glyf);
    collection.tables[loca_idx as usize].set_data(store_loca(&rewrite.loca_values, index_format));
    rewritten_glyf[glyf_idx as usize] = true;

    let head = collection
        .font_table_mut(font_idx, HEAD)
        .expect("presence checked above");
    bail_if!(head.length() < 52);
    head.make_editable()[51] = index_format as u8;

    Ok(())
}

struct RewrittenGlyf {
    glyf: Vec<u8>,
    /// One offset per glyph plus the table length, all 4-byte aligned.
    loca_values: Vec<u32>,
}

enum GlyfRewrite {
    Done(RewrittenGlyf),
    NeedsLongLoca,
}

fn rewrite_glyf(
    collection: &FontCollection<'_>,
    font_idx: usize,
    num_glyphs: u16,
    index_format: u16,
) -> Result<GlyfRewrite, WoffleErr> {
    let mut glyf: Vec<u8> = Vec::new();
    let mut loca_values: Vec<u32> = Vec::with_capacity(num_glyphs as usize + 1);

    for glyph_index in 0..num_glyphs as usize {
        loca_values.push(glyf.len() as u32);

        let data = collection.glyph_data(font_idx, glyph_index)?;
        let mut glyph = Glyph::parse(data)?;
        if let Glyph::Simple(simple) = &mut glyph {
            simple.bbox = BoundingBox::of_points(simple.contours.iter().flatten());
        }
        glyph.store(&mut glyf)?;

        bail_if!(glyf.len() > u32::MAX as usize);
        glyf.resize(round4(glyf.len()), 0);
        if index_format == 0 && glyf.len() >= SHORT_LOCA_LIMIT {
            return Ok(GlyfRewrite::NeedsLongLoca);
        }
    }
    loca_values.push(glyf.len() as u32);

    Ok(GlyfRewrite::Done(RewrittenGlyf { glyf, loca_values }))
}

/// Serialize loca offsets as u16 (offset / 2) or u32 entries.
pub(crate) fn store_loca(loca_values: &[u32], index_format: u16) -> Vec<u8> {
    let entry_size = if index_format == 0 { 2 } else { 4 };
    let mut out: Vec<u8> = Vec::with_capacity(loca_values.len() * entry_size);
    for &value in loca_values {
        if index_format == 0 {
            out.put_u16((value >> 1) as u16);
        } else {
            out.put_u32(value);
        }
    }
    out
}

/// Assign every pool table its output offset: directly after the header and
/// directories, in output order, 4-byte padded.
fn normalize_offsets(collection: &mut FontCollection<'_>) {
    let mut offset = collection.collection_header_size();
    for font in &collection.fonts {
        offset += SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len();
    }

    let mut placed = vec![false; collection.tables.len()];
    for font_idx in 0..collection.fonts.len() {
        for ix in collection.output_ordered_indices(font_idx) {
            if placed[ix as usize] {
                continue;
            }
            placed[ix as usize] = true;
            let table = &mut collection.tables[ix as usize];
            table.offset = offset as u32;
            offset += round4(table.length() as usize);
        }
    }
}

/// Recompute per-table checksums and the font's checkSumAdjustment.
fn fix_checksums(collection: &mut FontCollection<'_>, font_idx: usize) -> Result<(), WoffleErr> {
    {
        let Some(head) = collection.font_table_mut(font_idx, HEAD) else {
            bail!();
        };
        bail_if!(head.length() < 12);
        let head_buf = head.make_editable();
        head_buf[CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4].fill(0);
    }

    let mut file_checksum: u32 = 0;
    for &ix in &collection.fonts[font_idx].table_indices.clone() {
        let table = &mut collection.tables[ix as usize];
        table.checksum = compute_checksum(table.data());
        file_checksum = file_checksum.wrapping_add(table.checksum);
    }

    let font = &collection.fonts[font_idx];
    let header_checksum = compute_header_checksum(
        font.flavor,
        font.table_indices.iter().map(|&ix| {
            let table = &collection.tables[ix as usize];
            (table.tag, table.checksum, table.offset, table.length())
        }),
    );
    file_checksum = file_checksum.wrapping_add(header_checksum);

    let adjustment = CHECKSUM_ADJUSTMENT_MAGIC.wrapping_sub(file_checksum);
    let head = collection
        .font_table_mut(font_idx, HEAD)
        .expect("presence checked above");
    let head_buf = head.make_editable();
    head_buf[CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4]
        .copy_from_slice(&adjustment.to_be_bytes());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Whole-pipeline coverage lives in the integration suite; these tests
    // pin the leaf helpers.

    #[test]
    fn short_loca_halves_offsets() {
        let loca = store_loca(&[0, 8, 20], 0);
        assert_eq!(loca, vec![0, 0, 0, 4, 0, 10]);
    }

    #[test]
    fn long_loca_stores_raw_offsets() {
        let loca = store_loca(&[0, 1 << 17], 1);
        assert_eq!(loca, vec![0, 0, 0, 0, 0, 2, 0, 0]);
    }
}
