//! The glyf/loca transform, decode side: rebuilding the sfnt glyph and
//! offset tables byte-exactly from the seven substreams.
//!
//! <https://www.w3.org/TR/WOFF2/#glyf_table_format>

use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::checksum::compute_checksum;
use crate::error::{bail, bail_if, u32_will_overflow, usize_will_overflow, WoffleErr};
use crate::round4;
use crate::sfnt::glyph::{size_of_composite, write_points, BoundingBox, Point};
use crate::sfnt::normalize::store_loca;
use crate::variable_length::BufVariableExt;

const NUM_SUB_STREAMS: usize = 7;
const FLAG_OVERLAP_SIMPLE_BITMAP: u16 = 1 << 0;
// 98% of Google Fonts have no glyph above 5k bytes. Largest glyph ever observed was 72k bytes
const DEFAULT_GLYPH_BUF_SIZE: usize = 5120;

pub(crate) struct ReconstructedGlyfLoca {
    pub num_glyphs: u16,
    /// loca index format, as recorded in the transform header.
    pub index_format: u16,
    pub glyf_table: Vec<u8>,
    pub glyf_checksum: u32,
    pub loca_table: Vec<u8>,
    pub loca_checksum: u32,
}

/// Rebuild `glyf` and `loca` from a transformed glyf blob.
///
/// `expected_loca_length` is the loca entry's origLength from the WOFF2
/// directory; a mismatch with the transform header is a hard error.
pub(crate) fn reconstruct_glyf_table(
    data: &[u8],
    expected_loca_length: u32,
) -> Result<ReconstructedGlyfLoca, WoffleErr> {
    GlyfDecoder::new(data)?.reconstruct(expected_loca_length)
}

struct GlyfDecoder<'a> {
    n_contour_stream: &'a [u8],
    n_points_stream: &'a [u8],
    flag_stream: &'a [u8],
    glyph_stream: &'a [u8],
    composite_stream: &'a [u8],
    bbox_bitmap: &'a [u8],
    bbox_stream: &'a [u8],
    instruction_stream: &'a [u8],
    overlap_bitmap: Option<&'a [u8]>,
    glyph_buf: Vec<u8>,

    num_glyphs: u16,
    index_format: u16,
}

impl<'a> GlyfDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<GlyfDecoder<'a>, WoffleErr> {
        let mut input = data;
        let _reserved: u16 = input.try_get_u16()?;
        let option_flags: u16 = input.try_get_u16()?;
        let has_overlap_bitmap = (option_flags & FLAG_OVERLAP_SIMPLE_BITMAP) != 0;
        let num_glyphs = input.try_get_u16()?;
        let index_format = input.try_get_u16()?;

        let mut offset: usize = (2 + NUM_SUB_STREAMS) * 4;
        bail_if!(offset > data.len());

        // Invariant from here on: data.len() >= offset
        let mut substreams: ArrayVec<&[u8], NUM_SUB_STREAMS> = ArrayVec::new();
        for _ in 0..NUM_SUB_STREAMS {
            let substream_size = input.try_get_u32()? as usize;
            bail_if!(substream_size > data.len() - offset);
            substreams.push(&data[offset..offset + substream_size]);
            offset += substream_size;
        }

        // The bbox substream opens with a 4-byte-padded presence bitmap.
        let bitmap_length = ((num_glyphs as usize + 31) >> 5) << 2;
        bail_if!(bitmap_length > substreams[5].len());
        let (bbox_bitmap, bbox_stream) = substreams[5].split_at(bitmap_length);

        let mut overlap_bitmap: Option<&[u8]> = None;
        if has_overlap_bitmap {
            let overlap_bitmap_length = (num_glyphs as usize + 7) >> 3;
            bail_if!(overlap_bitmap_length > data.len() - offset);
            overlap_bitmap = Some(&data[offset..offset + overlap_bitmap_length]);
        }

        Ok(GlyfDecoder {
            n_contour_stream: substreams[0],
            n_points_stream: substreams[1],
            flag_stream: substreams[2],
            glyph_stream: substreams[3],
            composite_stream: substreams[4],
            bbox_bitmap,
            bbox_stream,
            instruction_stream: substreams[6],
            overlap_bitmap,
            glyph_buf: Vec::with_capacity(DEFAULT_GLYPH_BUF_SIZE),
            num_glyphs,
            index_format,
        })
    }

    fn reconstruct(
        mut self,
        expected_loca_length: u32,
    ) -> Result<ReconstructedGlyfLoca, WoffleErr> {
        // The loca directory entry must agree with the transform header.
        // https://dev.w3.org/webfonts/WOFF2/spec/#conform-mustRejectLoca
        let entry_size: u32 = if self.index_format != 0 { 4 } else { 2 };
        bail_if!(expected_loca_length != entry_size * (self.num_glyphs as u32 + 1));

        let mut glyf_table: Vec<u8> = Vec::with_capacity(self.num_glyphs as usize * 12);
        let mut loca_values: Vec<u32> = Vec::with_capacity(self.num_glyphs as usize + 1);
        let mut glyf_checksum: u32 = 0;

        for i in 0..self.num_glyphs as usize {
            loca_values.push(glyf_table.len() as u32);

            let n_contours = self.n_contour_stream.try_get_i16()?;
            let glyph_has_bbox = (self.bbox_bitmap[i >> 3] & (0x80 >> (i & 7))) != 0;

            self.glyph_buf.clear();
            if n_contours == -1 {
                // composite glyphs must have an explicit bbox
                bail_if!(!glyph_has_bbox);
                self.reconstruct_composite_glyph()?;
            } else if n_contours > 0 {
                // Same bit position as glyph_has_bbox, different bitmap.
                let has_overlap_bit = self
                    .overlap_bitmap
                    .is_some_and(|bitmap| (bitmap[i >> 3] & (0x80 >> (i & 7))) != 0);
                self.reconstruct_simple_glyph(n_contours as usize, glyph_has_bbox, has_overlap_bit)?;
            } else if n_contours == 0 {
                // Empty glyph: nothing to emit, and it must NOT have a bbox.
                bail_if!(glyph_has_bbox);
            } else {
                bail!();
            }

            glyf_checksum = glyf_checksum.wrapping_add(compute_checksum(&self.glyph_buf));
            glyf_table.extend_from_slice(&self.glyph_buf);
            glyf_table.resize(round4(glyf_table.len()), 0);

            // Offsets must stay addressable by the declared loca width.
            if self.index_format == 0 {
                bail_if!(glyf_table.len() >= 1 << 17);
            }
        }
        // loca[n] equals the length of the glyph data table.
        loca_values.push(glyf_table.len() as u32);

        let loca_table = store_loca(&loca_values, self.index_format);
        let loca_checksum = compute_checksum(&loca_table);

        Ok(ReconstructedGlyfLoca {
            num_glyphs: self.num_glyphs,
            index_format: self.index_format,
            glyf_table,
            glyf_checksum,
            loca_table,
            loca_checksum,
        })
    }

    fn reconstruct_composite_glyph(&mut self) -> Result<(), WoffleErr> {
        // Size the component records with a scanning copy of the stream so
        // the bytes can then be copied wholesale.
        let mut scan = self.composite_stream;
        let (composite_size, have_instructions) = size_of_composite(&mut scan)?;

        let instruction_size = if have_instructions {
            self.glyph_stream.try_get_variable_255_u16()?
        } else {
            0
        };

        self.glyph_buf.put_i16(-1);
        self.bbox_stream.try_read_bytes_into(8, &mut self.glyph_buf)?;
        self.composite_stream
            .try_read_bytes_into(composite_size, &mut self.glyph_buf)?;
        if have_instructions {
            self.glyph_buf.put_u16(instruction_size);
            self.instruction_stream
                .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;
        }
        Ok(())
    }

    fn reconstruct_simple_glyph(
        &mut self,
        n_contours: usize,
        glyph_has_bbox: bool,
        has_overlap_bit: bool,
    ) -> Result<(), WoffleErr> {
        let mut n_points_per_contour: Vec<u16> = Vec::with_capacity(n_contours);
        let mut total_n_points: u32 = 0;
        for _ in 0..n_contours {
            let n_points = self.n_points_stream.try_get_variable_255_u16()?;
            bail_if!(u32_will_overflow(total_n_points, n_points as u32));
            total_n_points += n_points as u32;
            n_points_per_contour.push(n_points);
        }
        let flag_size = total_n_points as usize;
        bail_if!(flag_size > self.flag_stream.len());

        let mut points: Vec<Point> = Vec::with_capacity(flag_size);
        let triplet_bytes =
            decode_triplets(&self.flag_stream[..flag_size], self.glyph_stream, &mut points)?;
        self.flag_stream.advance(flag_size);
        self.glyph_stream.advance(triplet_bytes);

        let instruction_size = self.glyph_stream.try_get_variable_255_u16()?;

        let size_needed =
            12 + 2 * n_contours + 5 * flag_size + instruction_size as usize;
        if self.glyph_buf.capacity() < size_needed {
            self.glyph_buf.reserve(size_needed - self.glyph_buf.capacity());
        }

        self.glyph_buf.put_i16(n_contours as i16);
        if glyph_has_bbox {
            self.bbox_stream.try_read_bytes_into(8, &mut self.glyph_buf)?;
        } else {
            BoundingBox::of_points(&points).put(&mut self.glyph_buf);
        }

        let mut end_point: i64 = -1;
        for &count in &n_points_per_contour {
            end_point += count as i64;
            bail_if!(end_point >= 65536);
            self.glyph_buf.put_u16(end_point as u16);
        }

        self.glyph_buf.put_u16(instruction_size);
        self.instruction_stream
            .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;

        write_points(&points, has_overlap_bit, &mut self.glyph_buf);
        Ok(())
    }
}

/// Decode one triplet-coded point per flag byte, pushing absolute
/// coordinates. Returns how many data bytes were consumed.
pub(crate) fn decode_triplets(
    flags_in: &[u8],
    in_: &[u8],
    result: &mut Vec<Point>,
) -> Result<usize, WoffleErr> {
    #[inline(always)]
    fn with_sign(flag: i32, baseval: i32) -> i32 {
        // Precondition: 0 <= baseval < 65536 (to avoid integer overflow)
        if (flag & 1) != 0 { baseval } else { -baseval }
    }

    #[inline(always)]
    fn safe_add(a: i32, b: i32) -> Result<i32, WoffleErr> {
        bail_if!(((a > 0) && (b > i32::MAX - a)) || ((a < 0) && (b < i32::MIN - a)));
        Ok(a + b)
    }

    let mut x: i32 = 0;
    let mut y: i32 = 0;

    bail_if!(flags_in.len() > in_.len());

    let mut triplet_index: usize = 0;

    for &flag in flags_in {
        let on_curve = (flag >> 7) == 0;
        let flag = (flag & 0x7f) as i32;

        let n_data_bytes: usize = if flag < 84 {
            1
        } else if flag < 120 {
            2
        } else if flag < 124 {
            3
        } else {
            4
        };
        bail_if!(
            usize_will_overflow(triplet_index, n_data_bytes)
                || triplet_index + n_data_bytes > in_.len()
        );

        let dx: i32;
        let dy: i32;
        if flag < 10 {
            dx = 0;
            dy = with_sign(flag, ((flag & 14) << 7) + in_[triplet_index] as i32);
        } else if flag < 20 {
            dx = with_sign(flag, (((flag - 10) & 14) << 7) + in_[triplet_index] as i32);
            dy = 0;
        } else if flag < 84 {
            let b0 = flag - 20;
            let b1 = in_[triplet_index] as i32;
            dx = with_sign(flag, 1 + (b0 & 0x30) + (b1 >> 4));
            dy = with_sign(flag >> 1, 1 + ((b0 & 0x0c) << 2) + (b1 & 0x0f));
        } else if flag < 120 {
            let b0 = flag - 84;
            dx = with_sign(flag, 1 + ((b0 / 12) << 8) + in_[triplet_index] as i32);
            dy = with_sign(
                flag >> 1,
                1 + (((b0 % 12) >> 2) << 8) + in_[triplet_index + 1] as i32,
            );
        } else if flag < 124 {
            let b2 = in_[triplet_index + 1] as i32;
            dx = with_sign(flag, ((in_[triplet_index] as i32) << 4) + (b2 >> 4));
            dy = with_sign(flag >> 1, ((b2 & 0x0f) << 8) + in_[triplet_index + 2] as i32);
        } else {
            dx = with_sign(
                flag,
                ((in_[triplet_index] as i32) << 8) + in_[triplet_index + 1] as i32,
            );
            dy = with_sign(
                flag >> 1,
                ((in_[triplet_index + 2] as i32) << 8) + in_[triplet_index + 3] as i32,
            );
        }
        triplet_index += n_data_bytes;
        x = safe_add(x, dx)?;
        y = safe_add(y, dy)?;

        result.push(Point { x, y, on_curve });
    }

    Ok(triplet_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfnt::glyph::Glyph;
    use crate::woff2::glyf_encoder::put_triplet;

    fn transform_blob(
        option_flags: u16,
        num_glyphs: u16,
        index_format: u16,
        substreams: [&[u8]; 7],
        trailer: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(0);
        out.put_u16(option_flags);
        out.put_u16(num_glyphs);
        out.put_u16(index_format);
        for stream in &substreams {
            out.put_u32(stream.len() as u32);
        }
        for stream in &substreams {
            out.put_slice(stream);
        }
        out.put_slice(trailer);
        out
    }

    #[test]
    fn reconstructs_single_empty_glyph() {
        let blob = transform_blob(
            0,
            1,
            0,
            [&[0, 0], &[], &[], &[], &[], &[0, 0, 0, 0], &[]],
            &[],
        );
        let rebuilt = reconstruct_glyf_table(&blob, 4).unwrap();
        assert_eq!(rebuilt.num_glyphs, 1);
        assert!(rebuilt.glyf_table.is_empty());
        // loca: two u16 zeros
        assert_eq!(rebuilt.loca_table, vec![0, 0, 0, 0]);
    }

    #[test]
    fn rejects_wrong_loca_length() {
        let blob = transform_blob(
            0,
            1,
            0,
            [&[0, 0], &[], &[], &[], &[], &[0, 0, 0, 0], &[]],
            &[],
        );
        assert!(reconstruct_glyf_table(&blob, 8).is_err());
    }

    #[test]
    fn rejects_empty_glyph_with_bbox() {
        let blob = transform_blob(
            0,
            1,
            0,
            [
                &[0, 0],
                &[],
                &[],
                &[],
                &[],
                &[0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], // bit set + 8 bbox bytes
                &[],
            ],
            &[],
        );
        assert!(reconstruct_glyf_table(&blob, 4).is_err());
    }

    #[test]
    fn rejects_composite_without_bbox() {
        // nContour 0xFFFF but the bbox bitmap bit is clear.
        let blob = transform_blob(
            0,
            1,
            0,
            [&[0xFF, 0xFF], &[], &[], &[], &[], &[0, 0, 0, 0], &[]],
            &[],
        );
        assert!(reconstruct_glyf_table(&blob, 4).is_err());
    }

    #[test]
    fn reconstructs_simple_glyph_and_computes_bbox() {
        // One glyph, one contour, two points: (100,0) on-curve then
        // (100,200) off-curve.
        let mut flags = Vec::new();
        let mut triplets = Vec::new();
        put_triplet(&mut flags, &mut triplets, true, 100, 0);
        put_triplet(&mut flags, &mut triplets, false, 0, 200);

        let mut glyph_stream = triplets.clone();
        glyph_stream.push(0); // instruction size

        let blob = transform_blob(
            0,
            1,
            0,
            [
                &[0, 1],         // one contour
                &[2],            // two points
                &flags,
                &glyph_stream,
                &[],
                &[0, 0, 0, 0],   // bitmap clear: bbox recomputed
                &[],
            ],
            &[],
        );
        let rebuilt = reconstruct_glyf_table(&blob, 4).unwrap();

        let Glyph::Simple(glyph) = Glyph::parse(&rebuilt.glyf_table).unwrap() else {
            panic!("expected a simple glyph");
        };
        assert_eq!(glyph.bbox.x_min, 100);
        assert_eq!(glyph.bbox.x_max, 100);
        assert_eq!(glyph.bbox.y_min, 0);
        assert_eq!(glyph.bbox.y_max, 200);
        assert_eq!(glyph.contours.len(), 1);
        assert_eq!(glyph.contours[0].len(), 2);
        assert!(glyph.contours[0][0].on_curve);
        assert!(!glyph.contours[0][1].on_curve);

        // Glyphs are 4-byte padded and loca tracks the padded offsets.
        assert_eq!(rebuilt.glyf_table.len() % 4, 0);
        let end = u16::from_be_bytes(rebuilt.loca_table[2..4].try_into().unwrap());
        assert_eq!(end as usize * 2, rebuilt.glyf_table.len());
    }

    #[test]
    fn overlap_bitmap_sets_flag_bit_six() {
        let mut flags = Vec::new();
        let mut triplets = Vec::new();
        put_triplet(&mut flags, &mut triplets, true, 10, 10);
        let mut glyph_stream = triplets.clone();
        glyph_stream.push(0);

        let blob = transform_blob(
            FLAG_OVERLAP_SIMPLE_BITMAP,
            1,
            0,
            [
                &[0, 1],
                &[1],
                &flags,
                &glyph_stream,
                &[],
                &[0, 0, 0, 0],
                &[],
            ],
            &[0x80], // overlap bitmap: bit set for glyph 0
        );
        let rebuilt = reconstruct_glyf_table(&blob, 4).unwrap();
        let Glyph::Simple(glyph) = Glyph::parse(&rebuilt.glyf_table).unwrap() else {
            panic!("expected a simple glyph");
        };
        assert!(glyph.has_overlap_bit);
    }
}
