//! Parsed forms of the WOFF2 header, table directory and TTC collection
//! directory.
//!
//! <https://www.w3.org/TR/WOFF2/#FileStructure>

use std::ops::Deref;

use bytes::Buf;
use font_types::Tag;

use crate::error::{bail, bail_if, u32_will_overflow, WoffleErr};
use crate::table_tags::{GLYF, HEAD, LOCA, KNOWN_TABLE_TAGS, TTC_FLAVOR};
use crate::variable_length::BufVariableExt;
use crate::woff2::WOFF2_SIGNATURE;

/// <https://www.w3.org/TR/WOFF2/#woff20Header>
pub(crate) struct Woff2Header {
    /// The "sfnt version" of the input font, or `ttcf`.
    pub flavor: Tag,
    /// Total size of the WOFF2 file.
    pub length: u32,
    /// Number of entries in the table directory.
    pub num_tables: u16,
    /// Total size needed for the uncompressed font data, including the sfnt
    /// header, directory and padding. Advisory; recomputed during decode.
    pub total_sfnt_size: u32,
    /// Length of the compressed data block.
    pub total_compressed_size: u32,
    pub meta_offset: u32,
    pub meta_length: u32,
    pub meta_orig_length: u32,
    pub priv_offset: u32,
    pub priv_length: u32,
}

impl Woff2Header {
    /// Parse and validate the fixed 48-byte header. `input` must start at
    /// the beginning of the file so the reported length can be checked.
    pub fn parse(input: &mut impl Buf) -> Result<Self, WoffleErr> {
        let input_len = input.remaining() as u32;

        let signature = Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes());
        bail_if!(signature != WOFF2_SIGNATURE);

        let flavor = Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes());
        let length = input.try_get_u32()?;
        let num_tables = input.try_get_u16()?;
        let reserved = input.try_get_u16()?;
        let total_sfnt_size = input.try_get_u32()?;
        let total_compressed_size = input.try_get_u32()?;
        let _major_version = input.try_get_u16()?;
        let _minor_version = input.try_get_u16()?;
        let meta_offset = input.try_get_u32()?;
        let meta_length = input.try_get_u32()?;
        let meta_orig_length = input.try_get_u32()?;
        let priv_offset = input.try_get_u32()?;
        let priv_length = input.try_get_u32()?;

        let header = Self {
            flavor,
            length,
            num_tables,
            total_sfnt_size,
            total_compressed_size,
            meta_offset,
            meta_length,
            meta_orig_length,
            priv_offset,
            priv_length,
        };

        bail_if!(header.length != input_len);
        bail_if!(header.num_tables == 0);
        bail_if!(reserved != 0);
        if header.meta_offset != 0 {
            bail_if!(
                header.meta_offset >= input_len
                    || input_len - header.meta_offset < header.meta_length
            );
        }
        if header.priv_offset != 0 {
            bail_if!(
                header.priv_offset >= input_len
                    || input_len - header.priv_offset < header.priv_length
            );
        }

        Ok(header)
    }

    pub fn is_collection(&self) -> bool {
        self.flavor == TTC_FLAVOR
    }
}

/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
pub(crate) struct Woff2TableDirectoryEntry {
    pub tag: Tag,
    /// Whether the table went through the glyf/loca transform. Since the
    /// reserved flag bits must be zero, this is true exactly for glyf and
    /// loca.
    pub transformed: bool,
    /// Size of the reconstructed sfnt table (origLength).
    pub dst_length: u32,
    /// Bytes this table occupies in the decompressed stream.
    pub src_length: u32,
    /// Offset of those bytes within the decompressed stream; computed while
    /// parsing the directory.
    pub src_offset: u32,
}

impl Woff2TableDirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, WoffleErr> {
        let flag_byte = input.try_get_u8()?;
        // Bits 6-7 carried experimental compression selectors once; in the
        // shipped format they are reserved and must be zero.
        bail_if!(flag_byte & 0xC0 != 0);

        let tag = match KNOWN_TABLE_TAGS.get((flag_byte & 0x3F) as usize) {
            Some(&tag) => tag,
            None => Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes()),
        };

        let dst_length = input.try_get_variable_128_u32()?;
        let transformed = tag == GLYF || tag == LOCA;
        let src_length = if transformed {
            let transform_length = input.try_get_variable_128_u32()?;
            bail_if!(tag == LOCA && transform_length != 0);
            transform_length
        } else {
            dst_length
        };

        Ok(Self {
            tag,
            transformed,
            dst_length,
            src_length,
            src_offset: 0, // assigned by the directory parse
        })
    }

    pub fn src_slice<'a>(&self, stream: &'a [u8]) -> Result<&'a [u8], WoffleErr> {
        let start = self.src_offset as usize;
        let end = start + self.src_length as usize;
        stream.get(start..end).ok_or(WoffleErr::MalformedFont)
    }
}

pub(crate) struct Woff2TableDirectory {
    pub tables: Vec<Woff2TableDirectoryEntry>,
    /// Sum of the per-table stream extents: the decompressed size the
    /// Brotli stream must produce exactly.
    pub uncompressed_size: u32,
}

impl Deref for Woff2TableDirectory {
    type Target = Vec<Woff2TableDirectoryEntry>;
    fn deref(&self) -> &Self::Target {
        &self.tables
    }
}

impl Woff2TableDirectory {
    pub fn parse(input: &mut impl Buf, num_tables: usize) -> Result<Self, WoffleErr> {
        // Tables are concatenated in directory order inside the decompressed
        // stream, so each entry's offset is the running sum of lengths.
        let mut src_offset: u32 = 0;
        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let mut table = Woff2TableDirectoryEntry::parse(input)?;
            bail_if!(u32_will_overflow(src_offset, table.src_length));
            table.src_offset = src_offset;
            src_offset += table.src_length;
            tables.push(table);
        }

        Ok(Self {
            tables,
            uncompressed_size: src_offset,
        })
    }
}

/// <https://www.w3.org/TR/WOFF2/#collection_dir_format>
pub(crate) struct CollectionDirectory {
    /// TTC header version of the original font; 0 for a single font.
    pub version: u32,
    pub fonts: Vec<CollectionDirectoryEntry>,
}

pub(crate) struct CollectionDirectoryEntry {
    pub flavor: Tag,
    /// Which table-directory entries this font references.
    pub table_indices: Vec<u16>,
    // Indices of the tables reconstruction needs random access to.
    pub head_idx: Option<u16>,
    pub glyf_idx: Option<u16>,
    pub loca_idx: Option<u16>,
}

impl CollectionDirectory {
    pub fn parse(
        input: &mut impl Buf,
        table_directory: &Woff2TableDirectory,
    ) -> Result<Self, WoffleErr> {
        let version = input.try_get_u32()?;
        let num_fonts = input.try_get_variable_255_u16()?;

        bail_if!(version != 0x0001_0000 && version != 0x0002_0000);
        bail_if!(num_fonts == 0);

        let mut fonts = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            fonts.push(CollectionDirectoryEntry::parse(input, table_directory)?);
        }

        Ok(Self { version, fonts })
    }

    /// Wrap a single font in a one-entry directory so serialization logic
    /// is shared between collections and single fonts.
    pub fn for_single_font(flavor: Tag, table_directory: &Woff2TableDirectory) -> Self {
        let mut entry = CollectionDirectoryEntry {
            flavor,
            table_indices: (0..table_directory.len() as u16).collect(),
            head_idx: None,
            glyf_idx: None,
            loca_idx: None,
        };
        for (table_index, table) in table_directory.iter().enumerate() {
            match table.tag {
                tag if tag == HEAD => entry.head_idx = Some(table_index as u16),
                tag if tag == GLYF => entry.glyf_idx = Some(table_index as u16),
                tag if tag == LOCA => entry.loca_idx = Some(table_index as u16),
                _ => {}
            }
        }
        Self {
            version: 0,
            fonts: vec![entry],
        }
    }

    /// Order each font's tables the way the reconstructed sfnt will emit
    /// them: sorted by tag.
    pub fn sort_tables_within_each_font(&mut self, tables: &Woff2TableDirectory) {
        for font in &mut self.fonts {
            font.table_indices
                .sort_by_cached_key(|&idx| tables[idx as usize].tag);
        }
    }
}

impl CollectionDirectoryEntry {
    pub fn parse(
        input: &mut impl Buf,
        tables: &Woff2TableDirectory,
    ) -> Result<Self, WoffleErr> {
        let num_tables = input.try_get_variable_255_u16()?;
        let flavor = Tag::from_be_bytes(input.try_get_u32()?.to_be_bytes());
        bail_if!(num_tables == 0);

        let mut entry = CollectionDirectoryEntry {
            flavor,
            table_indices: Vec::with_capacity(num_tables as usize),
            head_idx: None,
            glyf_idx: None,
            loca_idx: None,
        };
        for _ in 0..num_tables {
            let table_index = input.try_get_variable_255_u16()?;
            bail_if!(table_index as usize >= tables.len());

            match tables[table_index as usize].tag {
                tag if tag == HEAD => entry.head_idx = Some(table_index),
                tag if tag == GLYF => entry.glyf_idx = Some(table_index),
                tag if tag == LOCA => entry.loca_idx = Some(table_index),
                _ => {}
            }
            entry.table_indices.push(table_index);
        }

        // glyf and loca must travel together, and consecutively.
        match (entry.glyf_idx, entry.loca_idx) {
            (Some(glyf_idx), Some(loca_idx)) => {
                bail_if!(glyf_idx > loca_idx || loca_idx - glyf_idx != 1);
            }
            (Some(_), None) | (None, Some(_)) => bail!(),
            (None, None) => {}
        }

        Ok(entry)
    }

    pub fn num_tables(&self) -> usize {
        self.table_indices.len()
    }

    /// Size of this font's sfnt table directory in the reconstructed file.
    pub fn table_directory_size(&self) -> usize {
        12 + 16 * self.num_tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn header_bytes(len_override: Option<u32>, num_tables: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_slice(b"wOF2");
        out.put_slice(&0x0001_0000u32.to_be_bytes()); // flavor
        out.put_u32(len_override.unwrap_or(48)); // totalLength
        out.put_u16(num_tables);
        out.put_u16(0); // reserved
        out.put_u32(100); // totalSfntSize
        out.put_u32(0); // totalCompressedSize
        out.put_u16(1);
        out.put_u16(0);
        out.put_u32(0); // metaOffset
        out.put_u32(0);
        out.put_u32(0);
        out.put_u32(0); // privOffset
        out.put_u32(0);
        out
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = header_bytes(None, 1);
        bytes[0] = b'x';
        assert!(Woff2Header::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn rejects_zero_tables() {
        let bytes = header_bytes(None, 0);
        assert!(Woff2Header::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let bytes = header_bytes(Some(49), 1);
        assert!(Woff2Header::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn parses_minimal_header() {
        let bytes = header_bytes(None, 3);
        let header = Woff2Header::parse(&mut bytes.as_slice()).unwrap();
        assert_eq!(header.num_tables, 3);
        assert!(!header.is_collection());
    }

    #[test]
    fn entry_rejects_reserved_flag_bits() {
        // known tag 0 (cmap) with bit 6 set
        let bytes = [0x40u8, 0x00];
        assert!(Woff2TableDirectoryEntry::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn entry_reads_arbitrary_tag() {
        let mut bytes = Vec::new();
        bytes.put_u8(63);
        bytes.put_slice(b"ZZZZ");
        bytes.put_u8(5); // origLength
        let entry = Woff2TableDirectoryEntry::parse(&mut bytes.as_slice()).unwrap();
        assert_eq!(entry.tag, Tag::new(b"ZZZZ"));
        assert_eq!(entry.dst_length, 5);
        assert_eq!(entry.src_length, 5);
        assert!(!entry.transformed);
    }

    #[test]
    fn entry_rejects_nonzero_loca_transform_length() {
        let mut bytes = Vec::new();
        bytes.put_u8(11); // loca
        bytes.put_u8(10); // origLength
        bytes.put_u8(2); // transformLength != 0
        assert!(Woff2TableDirectoryEntry::parse(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn glyf_entry_reads_transform_length() {
        let mut bytes = Vec::new();
        bytes.put_u8(10); // glyf
        bytes.put_u8(100); // origLength
        bytes.put_u8(60); // transformLength
        let entry = Woff2TableDirectoryEntry::parse(&mut bytes.as_slice()).unwrap();
        assert!(entry.transformed);
        assert_eq!(entry.dst_length, 100);
        assert_eq!(entry.src_length, 60);
    }
}
