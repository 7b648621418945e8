//! In-memory model of sfnt font files: single TrueType/CFF fonts and
//! TrueType Collections.
//!
//! A parsed [`FontCollection`] borrows the input buffer; tables only become
//! owned buffers when something mutates them (see [`normalize`]). Collections
//! keep one shared table pool with per-font index vectors, so a table two
//! fonts share exists exactly once.

pub mod glyph;
pub mod normalize;

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Buf;
use font_types::Tag;

use crate::error::{bail, bail_if, WoffleErr};
use crate::round4;
use crate::table_tags::{GLYF, HEAD, LOCA, TTC_FLAVOR};

pub(crate) const SFNT_HEADER_SIZE: usize = 12;
pub(crate) const SFNT_ENTRY_SIZE: usize = 16;
pub(crate) const COLLECTION_HEADER_VERSION_1: u32 = 0x0001_0000;
pub(crate) const COLLECTION_HEADER_VERSION_2: u32 = 0x0002_0000;

/// One table of the shared pool.
pub struct FontTable<'a> {
    pub tag: Tag,
    /// Directory checksum. Taken on faith at parse time; recomputed by the
    /// normalizer.
    pub checksum: u32,
    /// Offset of the table data from the start of the file.
    pub offset: u32,
    data: Cow<'a, [u8]>,
}

impl<'a> FontTable<'a> {
    pub fn new(tag: Tag, data: Vec<u8>) -> Self {
        FontTable {
            tag,
            checksum: 0,
            offset: 0,
            data: Cow::Owned(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of the table payload, excluding alignment padding.
    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Cow::Owned(data);
    }

    /// Promote the payload to an owned buffer so it can be written to.
    pub(crate) fn make_editable(&mut self) -> &mut Vec<u8> {
        self.data.to_mut()
    }
}

/// One font of a collection: its flavor plus indices into the shared pool,
/// kept sorted by table tag.
pub struct CollectionFont {
    pub flavor: Tag,
    pub table_indices: Vec<u16>,
}

pub struct FontCollection<'a> {
    /// TTC header version; 0 for a single font.
    pub header_version: u32,
    /// `ttcf` for collections, otherwise the single font's sfnt version.
    pub flavor: Tag,
    pub tables: Vec<FontTable<'a>>,
    pub fonts: Vec<CollectionFont>,
}

impl<'a> FontCollection<'a> {
    /// Parse a single sfnt or a TTC.
    pub fn read(data: &'a [u8]) -> Result<FontCollection<'a>, WoffleErr> {
        let mut peek = data;
        let first = Tag::from_be_bytes(peek.try_get_u32()?.to_be_bytes());
        if first == TTC_FLAVOR {
            Self::read_collection(data)
        } else {
            Self::read_single(data)
        }
    }

    pub fn is_collection(&self) -> bool {
        self.header_version != 0
    }

    fn read_single(data: &'a [u8]) -> Result<FontCollection<'a>, WoffleErr> {
        let mut pool = Vec::new();
        let font = read_font_directory(data, 0, data.len(), &mut pool, &mut HashMap::new())?;

        Ok(FontCollection {
            header_version: 0,
            flavor: font.flavor,
            tables: pool,
            fonts: vec![font],
        })
    }

    fn read_collection(data: &'a [u8]) -> Result<FontCollection<'a>, WoffleErr> {
        let mut input = data;
        let _ttc_tag = input.try_get_u32()?;
        let header_version = input.try_get_u32()?;
        bail_if!(
            header_version != COLLECTION_HEADER_VERSION_1
                && header_version != COLLECTION_HEADER_VERSION_2
        );
        let num_fonts = input.try_get_u32()?;
        bail_if!(num_fonts == 0 || num_fonts > u16::MAX as u32);

        let mut directory_offsets = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            directory_offsets.push(input.try_get_u32()? as usize);
        }

        let mut pool: Vec<FontTable<'a>> = Vec::new();
        // Fonts pointing at identical (offset, length) pairs share one pool
        // entry; that is what makes them "reused".
        let mut pool_by_extent: HashMap<(u32, u32), u16> = HashMap::new();
        let mut fonts = Vec::with_capacity(num_fonts as usize);
        for offset in directory_offsets {
            fonts.push(read_font_directory(
                data,
                offset,
                data.len(),
                &mut pool,
                &mut pool_by_extent,
            )?);
        }

        Ok(FontCollection {
            header_version,
            flavor: TTC_FLAVOR,
            tables: pool,
            fonts,
        })
    }

    pub fn font_table_index(&self, font_idx: usize, tag: Tag) -> Option<u16> {
        let font = &self.fonts[font_idx];
        font.table_indices
            .binary_search_by_key(&tag, |&ix| self.tables[ix as usize].tag)
            .ok()
            .map(|pos| font.table_indices[pos])
    }

    pub fn font_table(&self, font_idx: usize, tag: Tag) -> Option<&FontTable<'a>> {
        self.font_table_index(font_idx, tag)
            .map(|ix| &self.tables[ix as usize])
    }

    pub fn font_table_mut(&mut self, font_idx: usize, tag: Tag) -> Option<&mut FontTable<'a>> {
        self.font_table_index(font_idx, tag)
            .map(|ix| &mut self.tables[ix as usize])
    }

    /// loca index width for the font: `head` byte 51.
    pub fn index_format(&self, font_idx: usize) -> Result<u16, WoffleErr> {
        let head = self.font_table(font_idx, HEAD);
        match head {
            Some(head) if head.length() >= 52 => Ok(head.data()[51] as u16),
            _ => bail!(),
        }
    }

    /// Glyph count, derived from the loca table length and index format.
    pub fn num_glyphs(&self, font_idx: usize) -> Result<u16, WoffleErr> {
        let Some(loca) = self.font_table(font_idx, LOCA) else {
            bail!();
        };
        let entry_size: u32 = if self.index_format(font_idx)? == 0 { 2 } else { 4 };
        let num_entries = loca.length() / entry_size;
        bail_if!(num_entries == 0 || num_entries - 1 > u16::MAX as u32);
        Ok((num_entries - 1) as u16)
    }

    /// The bytes of one glyph record, bounds-checked against loca and glyf.
    pub fn glyph_data(&self, font_idx: usize, glyph_index: usize) -> Result<&[u8], WoffleErr> {
        let index_fmt = self.index_format(font_idx)?;
        let (Some(loca), Some(glyf)) = (
            self.font_table(font_idx, LOCA),
            self.font_table(font_idx, GLYF),
        ) else {
            bail!();
        };

        let mut loca_data = loca.data();
        let (start, end) = if index_fmt == 0 {
            bail_if!(loca_data.remaining() < 2 * glyph_index + 4);
            loca_data.advance(2 * glyph_index);
            let start = loca_data.try_get_u16()? as usize * 2;
            let end = loca_data.try_get_u16()? as usize * 2;
            (start, end)
        } else {
            bail_if!(loca_data.remaining() < 4 * glyph_index + 8);
            loca_data.advance(4 * glyph_index);
            (
                loca_data.try_get_u32()? as usize,
                loca_data.try_get_u32()? as usize,
            )
        };
        bail_if!(end < start || end > glyf.data().len());
        Ok(&glyf.data()[start..end])
    }

    /// Drop a table from every font and from the pool, remapping indices.
    pub fn remove_table(&mut self, tag: Tag) {
        let tables = &self.tables;
        for font in &mut self.fonts {
            font.table_indices
                .retain(|&ix| tables[ix as usize].tag != tag);
        }

        let mut used = vec![false; self.tables.len()];
        for font in &self.fonts {
            for &ix in &font.table_indices {
                used[ix as usize] = true;
            }
        }
        let mut remap = vec![0u16; self.tables.len()];
        let mut next: u16 = 0;
        for (i, &is_used) in used.iter().enumerate() {
            remap[i] = next;
            if is_used {
                next += 1;
            }
        }
        let mut i = 0;
        self.tables.retain(|_| {
            let keep = used[i];
            i += 1;
            keep
        });
        for font in &mut self.fonts {
            for ix in &mut font.table_indices {
                *ix = remap[*ix as usize];
            }
        }
    }

    /// Table indices of one font in output order: sorted by tag, except that
    /// `loca` is emitted directly after `glyf`.
    pub(crate) fn output_ordered_indices(&self, font_idx: usize) -> Vec<u16> {
        let mut indices = self.fonts[font_idx].table_indices.clone();
        let glyf_pos = indices
            .iter()
            .position(|&ix| self.tables[ix as usize].tag == GLYF);
        let loca_pos = indices
            .iter()
            .position(|&ix| self.tables[ix as usize].tag == LOCA);
        if let (Some(glyf_pos), Some(loca_pos)) = (glyf_pos, loca_pos) {
            let loca_ix = indices.remove(loca_pos);
            let glyf_pos = if loca_pos < glyf_pos { glyf_pos - 1 } else { glyf_pos };
            indices.insert(glyf_pos + 1, loca_ix);
        }
        indices
    }

    /// Size of the TTC header. 0 when this isn't a collection.
    pub(crate) fn collection_header_size(&self) -> usize {
        collection_header_size(self.header_version, self.fonts.len())
    }

    /// Total size of the serialized sfnt, padding included.
    pub fn file_size(&self) -> usize {
        let mut size = self.collection_header_size();
        for font in &self.fonts {
            size += SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len();
        }
        for table in &self.tables {
            let end = table.offset as usize + round4(table.length() as usize);
            size = size.max(end);
        }
        size
    }

    /// Serialize with the offsets currently recorded on the tables. Offsets
    /// are expected to come from the normalizer's relayout.
    pub fn write(&self) -> Result<Vec<u8>, WoffleErr> {
        let size = self.file_size();
        let mut out: Vec<u8> = vec![0; size];

        let mut directory_offset = self.collection_header_size();
        if self.is_collection() {
            let mut header: Vec<u8> = Vec::with_capacity(directory_offset);
            header.extend_from_slice(&TTC_FLAVOR.to_be_bytes());
            header.extend_from_slice(&self.header_version.to_be_bytes());
            header.extend_from_slice(&(self.fonts.len() as u32).to_be_bytes());
            let mut next_directory = directory_offset;
            for font in &self.fonts {
                header.extend_from_slice(&(next_directory as u32).to_be_bytes());
                next_directory += SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * font.table_indices.len();
            }
            if self.header_version == COLLECTION_HEADER_VERSION_2 {
                // ulDsigTag / ulDsigLength / ulDsigOffset, all zero
                header.extend_from_slice(&[0; 12]);
            }
            out[..header.len()].copy_from_slice(&header);
        }

        for font in &self.fonts {
            let directory =
                serialize_font_directory(font, &self.tables);
            let end = directory_offset + directory.len();
            bail_if!(end > out.len());
            out[directory_offset..end].copy_from_slice(&directory);
            directory_offset = end;
        }

        for table in &self.tables {
            let start = table.offset as usize;
            let end = start + table.data().len();
            bail_if!(end > out.len());
            out[start..end].copy_from_slice(table.data());
        }

        Ok(out)
    }
}

pub(crate) fn collection_header_size(header_version: u32, num_fonts: usize) -> usize {
    let mut size = 0;
    if header_version == COLLECTION_HEADER_VERSION_2 {
        size += 12; // ulDsig{Tag,Length,Offset}
    }
    if header_version == COLLECTION_HEADER_VERSION_1
        || header_version == COLLECTION_HEADER_VERSION_2
    {
        size += 12 // TTCTag, Version, numFonts
            + 4 * num_fonts; // OffsetTable[numFonts]
    }
    size
}

/// Parse one sfnt table directory, interning tables into the shared pool.
fn read_font_directory<'a>(
    data: &'a [u8],
    directory_offset: usize,
    file_len: usize,
    pool: &mut Vec<FontTable<'a>>,
    pool_by_extent: &mut HashMap<(u32, u32), u16>,
) -> Result<CollectionFont, WoffleErr> {
    bail_if!(directory_offset > data.len());
    let mut input = &data[directory_offset..];

    // searchRange, entrySelector and rangeShift are recomputed on write, so
    // they are skipped here.
    let flavor = Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes());
    bail_if!(flavor == TTC_FLAVOR);
    let num_tables = input.try_get_u16()?;
    bail_if!(num_tables == 0);
    input.try_get_u32()?;
    input.try_get_u16()?;

    let mut table_indices: Vec<u16> = Vec::with_capacity(num_tables as usize);
    let mut seen_glyf = false;
    let mut seen_loca = false;
    for _ in 0..num_tables {
        let tag = Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes());
        let checksum = input.try_get_u32()?;
        let offset = input.try_get_u32()?;
        let length = input.try_get_u32()?;

        bail_if!((offset & 3) != 0);
        bail_if!(length as usize > file_len || file_len - (length as usize) < offset as usize);
        seen_glyf |= tag == GLYF;
        seen_loca |= tag == LOCA;

        let pool_index = match pool_by_extent.get(&(offset, length)) {
            Some(&ix) if pool[ix as usize].tag == tag => ix,
            _ => {
                bail_if!(pool.len() >= u16::MAX as usize);
                let ix = pool.len() as u16;
                pool.push(FontTable {
                    tag,
                    checksum,
                    offset,
                    data: Cow::Borrowed(
                        &data[offset as usize..offset as usize + length as usize],
                    ),
                });
                pool_by_extent.insert((offset, length), ix);
                ix
            }
        };
        table_indices.push(pool_index);
    }

    // Two entries of one font must never share a tag.
    let tables_ref = &*pool;
    let mut sorted = table_indices.clone();
    sorted.sort_by_key(|&ix| tables_ref[ix as usize].tag);
    bail_if!(sorted
        .windows(2)
        .any(|pair| tables_ref[pair[0] as usize].tag == tables_ref[pair[1] as usize].tag));

    // Check that this font's tables are non-overlapping, and that none
    // starts inside its own directory.
    let mut intervals: Vec<(u32, u32)> = table_indices
        .iter()
        .map(|&ix| (tables_ref[ix as usize].offset, tables_ref[ix as usize].length()))
        .collect();
    intervals.sort_unstable();
    let mut last_end: u64 =
        (directory_offset + SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables as usize) as u64;
    for (offset, length) in intervals {
        bail_if!((offset as u64) < last_end);
        last_end = offset as u64 + length as u64;
    }

    // glyf and loca only make sense together.
    bail_if!(seen_glyf != seen_loca);

    Ok(CollectionFont {
        flavor,
        table_indices: sorted,
    })
}

fn serialize_font_directory(font: &CollectionFont, tables: &[FontTable<'_>]) -> Vec<u8> {
    use crate::checksum::binary_search_header_fields;

    let num_tables = font.table_indices.len() as u16;
    let (search_range, entry_selector, range_shift) = binary_search_header_fields(num_tables);

    let mut out: Vec<u8> =
        Vec::with_capacity(SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables as usize);
    out.extend_from_slice(&font.flavor.to_be_bytes());
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());
    for &ix in &font.table_indices {
        let table = &tables[ix as usize];
        out.extend_from_slice(&table.tag.to_be_bytes());
        out.extend_from_slice(&table.checksum.to_be_bytes());
        out.extend_from_slice(&table.offset.to_be_bytes());
        out.extend_from_slice(&table.length().to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_tags::TRUE_TYPE_FLAVOR;

    fn minimal_font_bytes(tables: &[(Tag, Vec<u8>)]) -> Vec<u8> {
        let num_tables = tables.len();
        let mut offset = (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables) as u32;
        let mut directory = Vec::new();
        directory.extend_from_slice(&TRUE_TYPE_FLAVOR.to_be_bytes());
        directory.extend_from_slice(&(num_tables as u16).to_be_bytes());
        directory.extend_from_slice(&[0u8; 6]);
        let mut payload = Vec::new();
        for (tag, data) in tables {
            directory.extend_from_slice(&tag.to_be_bytes());
            directory.extend_from_slice(&0u32.to_be_bytes());
            directory.extend_from_slice(&offset.to_be_bytes());
            directory.extend_from_slice(&(data.len() as u32).to_be_bytes());
            payload.extend_from_slice(data);
            let padded = round4(data.len());
            payload.resize(payload.len() + padded - data.len(), 0);
            offset += padded as u32;
        }
        directory.extend_from_slice(&payload);
        directory
    }

    #[test]
    fn parses_a_single_font() {
        let bytes = minimal_font_bytes(&[
            (Tag::new(b"maxp"), vec![1, 2, 3, 4]),
            (Tag::new(b"name"), vec![5, 6]),
        ]);
        let collection = FontCollection::read(&bytes).unwrap();
        assert_eq!(collection.header_version, 0);
        assert_eq!(collection.fonts.len(), 1);
        assert_eq!(collection.tables.len(), 2);
        assert_eq!(
            collection.font_table(0, Tag::new(b"name")).unwrap().data(),
            &[5, 6]
        );
    }

    #[test]
    fn rejects_unaligned_table_offset() {
        let mut bytes = minimal_font_bytes(&[(Tag::new(b"maxp"), vec![1, 2, 3, 4])]);
        // nudge the offset to 2-byte alignment
        let offset_pos = SFNT_HEADER_SIZE + 8;
        bytes[offset_pos + 3] += 2;
        assert!(FontCollection::read(&bytes).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_table() {
        let mut bytes = minimal_font_bytes(&[(Tag::new(b"maxp"), vec![1, 2, 3, 4])]);
        let length_pos = SFNT_HEADER_SIZE + 12;
        bytes[length_pos + 3] = 0xFF;
        assert!(FontCollection::read(&bytes).is_err());
    }

    #[test]
    fn rejects_duplicate_tags() {
        let bytes = minimal_font_bytes(&[
            (Tag::new(b"maxp"), vec![1, 2, 3, 4]),
            (Tag::new(b"maxp"), vec![1, 2, 3, 4]),
        ]);
        assert!(FontCollection::read(&bytes).is_err());
    }

    #[test]
    fn rejects_glyf_without_loca() {
        let bytes = minimal_font_bytes(&[(GLYF, vec![0, 0, 0, 0])]);
        assert!(FontCollection::read(&bytes).is_err());
    }

    #[test]
    fn rejects_overlapping_tables() {
        let mut bytes = minimal_font_bytes(&[
            (Tag::new(b"maxp"), vec![1, 2, 3, 4]),
            (Tag::new(b"name"), vec![5, 6]),
        ]);
        // Point the second table at the first table's data.
        let second_offset_pos = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE + 8;
        let first_offset = (SFNT_HEADER_SIZE + 2 * SFNT_ENTRY_SIZE) as u32;
        bytes[second_offset_pos..second_offset_pos + 4]
            .copy_from_slice(&first_offset.to_be_bytes());
        assert!(FontCollection::read(&bytes).is_err());
    }

    #[test]
    fn rejects_overlapping_tables_in_collection() {
        // One-face TTC whose two table ranges overlap without being
        // byte-identical extents.
        let mut out = Vec::new();
        out.extend_from_slice(b"ttcf");
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&16u32.to_be_bytes()); // directory offset

        let table_offset = (16 + SFNT_HEADER_SIZE + 2 * SFNT_ENTRY_SIZE) as u32;
        out.extend_from_slice(&TRUE_TYPE_FLAVOR.to_be_bytes());
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        for (tag, length) in [(Tag::new(b"maxp"), 8u32), (Tag::new(b"name"), 4)] {
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&table_offset.to_be_bytes()); // same start
            out.extend_from_slice(&length.to_be_bytes());
        }
        out.resize(table_offset as usize + 8, 0);

        assert!(FontCollection::read(&out).is_err());
    }

    #[test]
    fn remove_table_remaps_indices() {
        let bytes = minimal_font_bytes(&[
            (Tag::new(b"DSIG"), vec![9, 9, 9, 9]),
            (Tag::new(b"maxp"), vec![1, 2, 3, 4]),
        ]);
        let mut collection = FontCollection::read(&bytes).unwrap();
        collection.remove_table(Tag::new(b"DSIG"));
        assert_eq!(collection.tables.len(), 1);
        assert_eq!(collection.fonts[0].table_indices, vec![0]);
        assert!(collection.font_table(0, Tag::new(b"maxp")).is_some());
        assert!(collection.font_table(0, Tag::new(b"DSIG")).is_none());
    }

    #[test]
    fn loca_after_glyf_in_output_order() {
        let bytes = minimal_font_bytes(&[
            (GLYF, vec![0, 0, 0, 0]),
            (Tag::new(b"head"), vec![0; 54]),
            (LOCA, vec![0, 0, 0, 0]),
        ]);
        let collection = FontCollection::read(&bytes).unwrap();
        let order: Vec<Tag> = collection
            .output_ordered_indices(0)
            .iter()
            .map(|&ix| collection.tables[ix as usize].tag)
            .collect();
        assert_eq!(order, vec![GLYF, LOCA, Tag::new(b"head")]);
    }
}
