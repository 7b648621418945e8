/* Copyright 2013 Google Inc. All Rights Reserved.

   Distributed under MIT license.
   See file LICENSE for detail or copy at https://opensource.org/licenses/MIT
*/

//! The glyf/loca transform, encode side: re-slicing the glyph table into
//! seven parallel substreams with triplet-coded coordinates.
//!
//! <https://www.w3.org/TR/WOFF2/#glyf_table_format>

use bytes::BufMut;

use crate::error::{bail_if, WoffleErr};
use crate::sfnt::glyph::{BoundingBox, Glyph};
use crate::sfnt::FontCollection;
use crate::variable_length::put_255_u16;

const FLAG_OVERLAP_SIMPLE_BITMAP: u16 = 1 << 0;

/// Rewrite one font's glyf table into the transformed-glyf blob.
///
/// The paired transformed loca is the empty byte string; the decoder
/// regenerates it from the reconstructed glyphs.
pub(crate) fn transform_glyf_table(
    collection: &FontCollection<'_>,
    font_idx: usize,
) -> Result<Vec<u8>, WoffleErr> {
    let num_glyphs = collection.num_glyphs(font_idx)?;
    let index_format = collection.index_format(font_idx)?;

    let mut n_contour_stream: Vec<u8> = Vec::with_capacity(2 * num_glyphs as usize);
    let mut n_points_stream: Vec<u8> = Vec::new();
    let mut flag_stream: Vec<u8> = Vec::new();
    let mut glyph_stream: Vec<u8> = Vec::new();
    let mut composite_stream: Vec<u8> = Vec::new();
    let mut bbox_values: Vec<u8> = Vec::new();
    let mut instruction_stream: Vec<u8> = Vec::new();

    let mut bbox_bitmap: Vec<u8> = vec![0; 4 * ((num_glyphs as usize + 31) / 32)];
    let mut overlap_bitmap: Vec<u8> = vec![0; (num_glyphs as usize + 7) / 8];
    let mut have_overlap = false;

    for glyph_index in 0..num_glyphs as usize {
        let data = collection.glyph_data(font_idx, glyph_index)?;
        match Glyph::parse(data)? {
            Glyph::Empty => {
                n_contour_stream.put_u16(0);
            }
            Glyph::Simple(glyph) => {
                bail_if!(glyph.contours.len() >= 0xFFFF);
                n_contour_stream.put_u16(glyph.contours.len() as u16);

                let mut last_x: i32 = 0;
                let mut last_y: i32 = 0;
                for contour in &glyph.contours {
                    bail_if!(contour.len() > u16::MAX as usize);
                    put_255_u16(&mut n_points_stream, contour.len() as u16);
                    for point in contour {
                        put_triplet(
                            &mut flag_stream,
                            &mut glyph_stream,
                            point.on_curve,
                            point.x - last_x,
                            point.y - last_y,
                        );
                        last_x = point.x;
                        last_y = point.y;
                    }
                }

                // The bbox is recomputable from the points; it only travels
                // explicitly when the stored box disagrees with the
                // computed one.
                let computed = BoundingBox::of_points(glyph.contours.iter().flatten());
                if glyph.bbox != computed {
                    bbox_bitmap[glyph_index >> 3] |= 0x80 >> (glyph_index & 7);
                    glyph.bbox.put(&mut bbox_values);
                }

                bail_if!(glyph.instructions.len() > u16::MAX as usize);
                put_255_u16(&mut glyph_stream, glyph.instructions.len() as u16);
                instruction_stream.put_slice(glyph.instructions);

                if glyph.has_overlap_bit {
                    overlap_bitmap[glyph_index >> 3] |= 0x80 >> (glyph_index & 7);
                    have_overlap = true;
                }
            }
            Glyph::Composite(glyph) => {
                n_contour_stream.put_u16(0xFFFF);

                // Composites always carry their bbox; the decoder cannot
                // recompute it without resolving components.
                bbox_bitmap[glyph_index >> 3] |= 0x80 >> (glyph_index & 7);
                glyph.bbox.put(&mut bbox_values);

                composite_stream.put_slice(glyph.components);
                if glyph.have_instructions {
                    bail_if!(glyph.instructions.len() > u16::MAX as usize);
                    put_255_u16(&mut glyph_stream, glyph.instructions.len() as u16);
                    instruction_stream.put_slice(glyph.instructions);
                }
            }
        }
    }

    let bbox_stream_len = bbox_bitmap.len() + bbox_values.len();
    let option_flags: u16 = if have_overlap { FLAG_OVERLAP_SIMPLE_BITMAP } else { 0 };

    let substream_total = n_contour_stream.len()
        + n_points_stream.len()
        + flag_stream.len()
        + glyph_stream.len()
        + composite_stream.len()
        + bbox_stream_len
        + instruction_stream.len();
    let mut out: Vec<u8> = Vec::with_capacity(36 + substream_total + overlap_bitmap.len());

    out.put_u16(0); // reserved
    out.put_u16(option_flags);
    out.put_u16(num_glyphs);
    out.put_u16(index_format);
    out.put_u32(n_contour_stream.len() as u32);
    out.put_u32(n_points_stream.len() as u32);
    out.put_u32(flag_stream.len() as u32);
    out.put_u32(glyph_stream.len() as u32);
    out.put_u32(composite_stream.len() as u32);
    out.put_u32(bbox_stream_len as u32);
    out.put_u32(instruction_stream.len() as u32);

    out.extend_from_slice(&n_contour_stream);
    out.extend_from_slice(&n_points_stream);
    out.extend_from_slice(&flag_stream);
    out.extend_from_slice(&glyph_stream);
    out.extend_from_slice(&composite_stream);
    out.extend_from_slice(&bbox_bitmap);
    out.extend_from_slice(&bbox_values);
    out.extend_from_slice(&instruction_stream);
    if have_overlap {
        out.extend_from_slice(&overlap_bitmap);
    }

    Ok(out)
}

/// Emit one point as a triplet: the flag byte picks the narrowest of the
/// six delta ranges and carries the signs; the data bytes carry magnitudes.
///
/// Based on section 5.11 of the MicroType Express draft spec.
pub(crate) fn put_triplet(
    flag_stream: &mut Vec<u8>,
    data_stream: &mut Vec<u8>,
    on_curve: bool,
    dx: i32,
    dy: i32,
) {
    let abs_x = dx.unsigned_abs() as i32;
    let abs_y = dy.unsigned_abs() as i32;
    let on_curve_bit: i32 = if on_curve { 0 } else { 128 };
    let x_sign_bit: i32 = if dx < 0 { 0 } else { 1 };
    let y_sign_bit: i32 = if dy < 0 { 0 } else { 1 };
    let xy_sign_bits = x_sign_bit + 2 * y_sign_bit;

    if dx == 0 && abs_y < 1280 {
        flag_stream.push((on_curve_bit + ((abs_y & 0xf00) >> 7) + y_sign_bit) as u8);
        data_stream.push((abs_y & 0xff) as u8);
    } else if dy == 0 && abs_x < 1280 {
        flag_stream.push((on_curve_bit + 10 + ((abs_x & 0xf00) >> 7) + x_sign_bit) as u8);
        data_stream.push((abs_x & 0xff) as u8);
    } else if abs_x < 65 && abs_y < 65 {
        flag_stream.push(
            (on_curve_bit + 20 + ((abs_x - 1) & 0x30) + (((abs_y - 1) & 0x30) >> 2) + xy_sign_bits)
                as u8,
        );
        data_stream.push(((((abs_x - 1) & 0xf) << 4) | ((abs_y - 1) & 0xf)) as u8);
    } else if abs_x < 769 && abs_y < 769 {
        flag_stream.push(
            (on_curve_bit
                + 84
                + 12 * (((abs_x - 1) & 0x300) >> 8)
                + (((abs_y - 1) & 0x300) >> 6)
                + xy_sign_bits) as u8,
        );
        data_stream.push(((abs_x - 1) & 0xff) as u8);
        data_stream.push(((abs_y - 1) & 0xff) as u8);
    } else if abs_x < 4096 && abs_y < 4096 {
        flag_stream.push((on_curve_bit + 120 + xy_sign_bits) as u8);
        data_stream.push((abs_x >> 4) as u8);
        data_stream.push((((abs_x & 0xf) << 4) | (abs_y >> 8)) as u8);
        data_stream.push((abs_y & 0xff) as u8);
    } else {
        flag_stream.push((on_curve_bit + 124 + xy_sign_bits) as u8);
        data_stream.push((abs_x >> 8) as u8);
        data_stream.push((abs_x & 0xff) as u8);
        data_stream.push((abs_y >> 8) as u8);
        data_stream.push((abs_y & 0xff) as u8);
    }
}
