//! Builders for the synthetic fonts the integration tests feed the codec.

use font_types::Tag;
use woffle::sfnt::glyph::{BoundingBox, Glyph, Point, SimpleGlyph};

pub const HEAD: Tag = Tag::new(b"head");
pub const MAXP: Tag = Tag::new(b"maxp");
pub const GLYF: Tag = Tag::new(b"glyf");
pub const LOCA: Tag = Tag::new(b"loca");
pub const NAME: Tag = Tag::new(b"name");

const SFNT_HEADER_SIZE: usize = 12;
const SFNT_ENTRY_SIZE: usize = 16;

fn round4(value: usize) -> usize {
    (value + 3) & !3
}

/// A plausible head table: correct magic, zero checkSumAdjustment, the
/// requested indexToLocFormat in byte 51.
pub fn head_table(index_to_loc_format: u8) -> Vec<u8> {
    let mut head = vec![0u8; 54];
    head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // version
    head[4..8].copy_from_slice(&0x0001_5000u32.to_be_bytes()); // fontRevision
    head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes()); // magicNumber
    head[18..20].copy_from_slice(&1000u16.to_be_bytes()); // unitsPerEm
    head[50..52].copy_from_slice(&(index_to_loc_format as u16).to_be_bytes());
    head
}

pub fn maxp_table(num_glyphs: u16) -> Vec<u8> {
    let mut maxp = Vec::new();
    maxp.extend_from_slice(&0x0000_5000u32.to_be_bytes()); // version 0.5
    maxp.extend_from_slice(&num_glyphs.to_be_bytes());
    maxp
}

pub fn name_table(text: &[u8]) -> Vec<u8> {
    text.to_vec()
}

pub fn point(x: i32, y: i32, on_curve: bool) -> Point {
    Point { x, y, on_curve }
}

/// Serialize a simple glyph record from contours, bbox taken from the
/// points.
pub fn simple_glyph_record(contours: &[Vec<Point>], instructions: &[u8]) -> Vec<u8> {
    let glyph = Glyph::Simple(SimpleGlyph {
        bbox: BoundingBox::of_points(contours.iter().flatten()),
        contours: contours.to_vec(),
        instructions,
        has_overlap_bit: false,
    });
    let mut out = Vec::new();
    glyph.store(&mut out).unwrap();
    out
}

/// A composite glyph record with one component (word args) and optional
/// instructions.
pub fn composite_glyph_record(component_glyph: u16, instructions: Option<&[u8]>) -> Vec<u8> {
    const ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
    const WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

    let mut out = Vec::new();
    out.extend_from_slice(&(-1i16).to_be_bytes());
    // bbox; a decoder never recomputes composite boxes, so any values work
    for value in [0i16, 0, 500, 500] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    let mut flags = ARG_1_AND_2_ARE_WORDS;
    if instructions.is_some() {
        flags |= WE_HAVE_INSTRUCTIONS;
    }
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&component_glyph.to_be_bytes());
    out.extend_from_slice(&10i16.to_be_bytes()); // arg1: x offset
    out.extend_from_slice(&20i16.to_be_bytes()); // arg2: y offset
    if let Some(instructions) = instructions {
        out.extend_from_slice(&(instructions.len() as u16).to_be_bytes());
        out.extend_from_slice(instructions);
    }
    out
}

/// glyf plus short-format loca from raw glyph records. Records are 2-byte
/// aligned, the way pre-normalization fonts commonly pack them.
pub fn glyf_and_loca(glyph_records: &[Vec<u8>]) -> (Vec<u8>, Vec<u8>) {
    let mut glyf = Vec::new();
    let mut loca = Vec::new();
    for record in glyph_records {
        loca.extend_from_slice(&((glyf.len() / 2) as u16).to_be_bytes());
        glyf.extend_from_slice(record);
        if glyf.len() % 2 != 0 {
            glyf.push(0);
        }
    }
    loca.extend_from_slice(&((glyf.len() / 2) as u16).to_be_bytes());
    (glyf, loca)
}

/// Assemble a single-font sfnt from (tag, data) pairs, in the given
/// directory order, with sequential 4-byte-aligned offsets.
pub fn sfnt_from_tables(tables: &[(Tag, Vec<u8>)]) -> Vec<u8> {
    let num_tables = tables.len();
    let mut offset = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables;
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // sfnt version
    out.extend_from_slice(&(num_tables as u16).to_be_bytes());
    out.extend_from_slice(&[0u8; 6]); // search fields, unchecked on read

    let mut payload = Vec::new();
    for (tag, data) in tables {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // checksum, unchecked
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        payload.extend_from_slice(data);
        payload.resize(round4(payload.len()), 0);
        offset += round4(data.len());
    }
    out.extend_from_slice(&payload);
    out
}

/// A complete TrueType font around the given glyph records.
pub fn truetype_font(glyph_records: &[Vec<u8>]) -> Vec<u8> {
    let (glyf, loca) = glyf_and_loca(glyph_records);
    sfnt_from_tables(&[
        (HEAD, head_table(0)),
        (MAXP, maxp_table(glyph_records.len() as u16)),
        (GLYF, glyf),
        (LOCA, loca),
    ])
}

/// A two-font TTC where the fonts share every table except `name`.
pub fn ttc_with_shared_tables(glyph_records: &[Vec<u8>]) -> Vec<u8> {
    let (glyf, loca) = glyf_and_loca(glyph_records);
    let shared: Vec<(Tag, Vec<u8>)> = vec![
        (HEAD, head_table(0)),
        (MAXP, maxp_table(glyph_records.len() as u16)),
        (GLYF, glyf),
        (LOCA, loca),
    ];
    let names = [name_table(b"font number one"), name_table(b"font number two")];

    let num_fonts = 2;
    let header_size = 12 + 4 * num_fonts;
    let directory_size = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * (shared.len() + 1);
    let tables_start = header_size + num_fonts * directory_size;

    // Lay out shared tables once, then the two name tables.
    let mut all_tables: Vec<&Vec<u8>> = shared.iter().map(|(_, data)| data).collect();
    all_tables.push(&names[0]);
    all_tables.push(&names[1]);
    let mut offsets: Vec<u32> = Vec::new();
    let mut payload = Vec::new();
    for data in &all_tables {
        offsets.push((tables_start + payload.len()) as u32);
        payload.extend_from_slice(data);
        payload.resize(round4(payload.len()), 0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"ttcf");
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&(num_fonts as u32).to_be_bytes());
    for font_idx in 0..num_fonts {
        out.extend_from_slice(&((header_size + font_idx * directory_size) as u32).to_be_bytes());
    }

    for font_idx in 0..num_fonts {
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&((shared.len() + 1) as u16).to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        for (table_idx, (tag, data)) in shared.iter().enumerate() {
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&offsets[table_idx].to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        }
        let name = &names[font_idx];
        out.extend_from_slice(&NAME.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&offsets[shared.len() + font_idx].to_be_bytes());
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    }

    out.extend_from_slice(&payload);
    out
}

/// Big-endian u32 sum over the padded file, the quantity the checksum law
/// pins to 0xB1B0AFBA.
pub fn u32_sum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u32::from_be_bytes(chunk.try_into().unwrap()));
    }
    let mut last = [0u8; 4];
    let remainder = chunks.remainder();
    last[..remainder.len()].copy_from_slice(remainder);
    if !remainder.is_empty() {
        sum = sum.wrapping_add(u32::from_be_bytes(last));
    }
    sum
}
