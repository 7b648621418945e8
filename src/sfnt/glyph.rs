//! Parsing and serialization of single sfnt glyph records.
//!
//! The same point/flag writer produces both normalized `glyf` tables and the
//! glyphs rebuilt from a WOFF2 transform, so the two paths emit identical
//! bytes for identical outlines.
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/glyf>

use bytes::{Buf, BufMut};

use crate::error::{bail, bail_if, WoffleErr};

// simple glyph flags
const GLYF_ON_CURVE: u8 = 1 << 0;
const GLYF_X_SHORT: u8 = 1 << 1;
const GLYF_Y_SHORT: u8 = 1 << 2;
const GLYF_REPEAT: u8 = 1 << 3;
const GLYF_THIS_X_IS_SAME: u8 = 1 << 4;
const GLYF_THIS_Y_IS_SAME: u8 = 1 << 5;
const OVERLAP_SIMPLE: u8 = 1 << 6;

// composite glyph flags
const FLAG_ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
const FLAG_WE_HAVE_A_SCALE: u16 = 1 << 3;
const FLAG_MORE_COMPONENTS: u16 = 1 << 5;
const FLAG_WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
const FLAG_WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
const FLAG_WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

/// A point of a simple glyph outline, in absolute font units.
///
/// Coordinates are i32 so that summing deltas can never overflow; every
/// valid font keeps them within i16.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub on_curve: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i16,
    pub y_min: i16,
    pub x_max: i16,
    pub y_max: i16,
}

impl BoundingBox {
    /// The min/max box of a point run. Empty input yields the zero box.
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let mut bbox = BoundingBox {
            x_min: first.x as i16,
            y_min: first.y as i16,
            x_max: first.x as i16,
            y_max: first.y as i16,
        };
        for point in iter {
            bbox.x_min = bbox.x_min.min(point.x as i16);
            bbox.x_max = bbox.x_max.max(point.x as i16);
            bbox.y_min = bbox.y_min.min(point.y as i16);
            bbox.y_max = bbox.y_max.max(point.y as i16);
        }
        bbox
    }

    pub(crate) fn parse(input: &mut impl Buf) -> Result<Self, WoffleErr> {
        Ok(BoundingBox {
            x_min: input.try_get_i16()?,
            y_min: input.try_get_i16()?,
            x_max: input.try_get_i16()?,
            y_max: input.try_get_i16()?,
        })
    }

    pub(crate) fn put(&self, dst: &mut impl BufMut) {
        dst.put_i16(self.x_min);
        dst.put_i16(self.y_min);
        dst.put_i16(self.x_max);
        dst.put_i16(self.y_max);
    }
}

pub struct SimpleGlyph<'a> {
    pub bbox: BoundingBox,
    pub contours: Vec<Vec<Point>>,
    pub instructions: &'a [u8],
    /// OVERLAP_SIMPLE on the first flag byte; carried so round-trips keep it.
    pub has_overlap_bit: bool,
}

pub struct CompositeGlyph<'a> {
    pub bbox: BoundingBox,
    /// The raw component records, copied through untouched.
    pub components: &'a [u8],
    pub instructions: &'a [u8],
    pub have_instructions: bool,
}

pub enum Glyph<'a> {
    Empty,
    Simple(SimpleGlyph<'a>),
    Composite(CompositeGlyph<'a>),
}

impl<'a> Glyph<'a> {
    /// Parse one glyph record. An empty slice is the empty glyph.
    pub fn parse(data: &'a [u8]) -> Result<Glyph<'a>, WoffleErr> {
        if data.is_empty() {
            return Ok(Glyph::Empty);
        }

        let mut input = data;
        let n_contours = input.try_get_i16()?;
        let bbox = BoundingBox::parse(&mut input)?;

        if n_contours == -1 {
            parse_composite_glyph(bbox, input)
        } else if n_contours > 0 {
            parse_simple_glyph(bbox, n_contours as usize, input)
        } else if n_contours == 0 {
            // A zero-contour record with a header canonicalizes to the
            // empty glyph; only the empty glyph serializes to zero bytes.
            Ok(Glyph::Empty)
        } else {
            bail!()
        }
    }

    /// Serialize the glyph in sfnt form, appending to `dst`. The empty glyph
    /// produces no bytes. Callers pad to 4-byte alignment themselves.
    pub fn store(&self, dst: &mut Vec<u8>) -> Result<(), WoffleErr> {
        match self {
            Glyph::Empty => Ok(()),
            Glyph::Simple(glyph) => store_simple_glyph(glyph, dst),
            Glyph::Composite(glyph) => store_composite_glyph(glyph, dst),
        }
    }
}

fn parse_simple_glyph<'a>(
    bbox: BoundingBox,
    n_contours: usize,
    mut input: &'a [u8],
) -> Result<Glyph<'a>, WoffleErr> {
    let mut end_points: Vec<usize> = Vec::with_capacity(n_contours);
    let mut prev_end: i64 = -1;
    for _ in 0..n_contours {
        let end_point = input.try_get_u16()? as i64;
        bail_if!(end_point < prev_end);
        end_points.push(end_point as usize);
        prev_end = end_point;
    }
    let num_points: usize = end_points.last().map(|last| last + 1).unwrap_or(0);

    let instruction_size = input.try_get_u16()? as usize;
    bail_if!(input.remaining() < instruction_size);
    let (instructions, mut input) = input.split_at(instruction_size);

    // First pass: flags, expanding repeat runs.
    let mut flags: Vec<u8> = Vec::with_capacity(num_points);
    while flags.len() < num_points {
        let flag = input.try_get_u8()?;
        flags.push(flag);
        if flag & GLYF_REPEAT != 0 {
            let repeats = input.try_get_u8()? as usize;
            bail_if!(flags.len() + repeats > num_points);
            for _ in 0..repeats {
                flags.push(flag);
            }
        }
    }
    let has_overlap_bit = flags.first().is_some_and(|flag| flag & OVERLAP_SIMPLE != 0);

    // Second pass: coordinates, one axis at a time.
    let mut xs: Vec<i32> = Vec::with_capacity(num_points);
    let mut x: i32 = 0;
    for &flag in &flags {
        if flag & GLYF_X_SHORT != 0 {
            let delta = input.try_get_u8()? as i32;
            x += if flag & GLYF_THIS_X_IS_SAME != 0 { delta } else { -delta };
        } else if flag & GLYF_THIS_X_IS_SAME == 0 {
            x += input.try_get_i16()? as i32;
        }
        xs.push(x);
    }
    let mut ys: Vec<i32> = Vec::with_capacity(num_points);
    let mut y: i32 = 0;
    for &flag in &flags {
        if flag & GLYF_Y_SHORT != 0 {
            let delta = input.try_get_u8()? as i32;
            y += if flag & GLYF_THIS_Y_IS_SAME != 0 { delta } else { -delta };
        } else if flag & GLYF_THIS_Y_IS_SAME == 0 {
            y += input.try_get_i16()? as i32;
        }
        ys.push(y);
    }

    // Regroup the flat point run into contours.
    let mut contours: Vec<Vec<Point>> = Vec::with_capacity(n_contours);
    let mut start: usize = 0;
    for &end_point in &end_points {
        let mut contour = Vec::with_capacity(end_point + 1 - start);
        for i in start..=end_point {
            contour.push(Point {
                x: xs[i],
                y: ys[i],
                on_curve: flags[i] & GLYF_ON_CURVE != 0,
            });
        }
        contours.push(contour);
        start = end_point + 1;
    }

    Ok(Glyph::Simple(SimpleGlyph {
        bbox,
        contours,
        instructions,
        has_overlap_bit,
    }))
}

fn parse_composite_glyph<'a>(
    bbox: BoundingBox,
    input: &'a [u8],
) -> Result<Glyph<'a>, WoffleErr> {
    let mut scan = input;
    let (components_size, have_instructions) = size_of_composite(&mut scan)?;
    let components = &input[..components_size];

    let mut rest = &input[components_size..];
    let instructions = if have_instructions {
        let instruction_size = rest.try_get_u16()? as usize;
        bail_if!(rest.remaining() < instruction_size);
        &rest[..instruction_size]
    } else {
        &[]
    };

    Ok(Glyph::Composite(CompositeGlyph {
        bbox,
        components,
        instructions,
        have_instructions,
    }))
}

/// Walk the component records of a composite glyph, returning how many bytes
/// they span and whether any component sets WE_HAVE_INSTRUCTIONS.
pub(crate) fn size_of_composite(composite_stream: &mut impl Buf) -> Result<(usize, bool), WoffleErr> {
    let mut bytes_read: usize = 0;
    let mut we_have_instructions: bool = false;
    let mut flags: u16 = FLAG_MORE_COMPONENTS;
    while flags & FLAG_MORE_COMPONENTS != 0 {
        flags = composite_stream.try_get_u16()?;
        we_have_instructions |= (flags & FLAG_WE_HAVE_INSTRUCTIONS) != 0;
        let mut arg_size: usize = 2; // glyph index
        if flags & FLAG_ARG_1_AND_2_ARE_WORDS != 0 {
            arg_size += 4;
        } else {
            arg_size += 2;
        }
        if flags & FLAG_WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & FLAG_WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & FLAG_WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        bail_if!(composite_stream.remaining() < arg_size);
        composite_stream.advance(arg_size);

        // 2 bytes for the flags + arg_size
        bytes_read += 2 + arg_size;
    }

    Ok((bytes_read, we_have_instructions))
}

fn store_simple_glyph(glyph: &SimpleGlyph<'_>, dst: &mut Vec<u8>) -> Result<(), WoffleErr> {
    bail_if!(glyph.contours.len() > i16::MAX as usize);
    dst.put_i16(glyph.contours.len() as i16);
    glyph.bbox.put(dst);

    let mut end_point: i64 = -1;
    for contour in &glyph.contours {
        end_point += contour.len() as i64;
        bail_if!(end_point >= 65536);
        dst.put_u16(end_point as u16);
    }

    bail_if!(glyph.instructions.len() > u16::MAX as usize);
    dst.put_u16(glyph.instructions.len() as u16);
    dst.put_slice(glyph.instructions);

    let points: Vec<Point> = glyph.contours.iter().flatten().copied().collect();
    write_points(&points, glyph.has_overlap_bit, dst);
    Ok(())
}

fn store_composite_glyph(glyph: &CompositeGlyph<'_>, dst: &mut Vec<u8>) -> Result<(), WoffleErr> {
    dst.put_i16(-1);
    glyph.bbox.put(dst);
    dst.put_slice(glyph.components);
    if glyph.have_instructions {
        bail_if!(glyph.instructions.len() > u16::MAX as usize);
        dst.put_u16(glyph.instructions.len() as u16);
        dst.put_slice(glyph.instructions);
    }
    Ok(())
}

/// Write the flag bytes and coordinate bytes of a simple glyph's point run.
///
/// Flags equal to their predecessor collapse into repeat runs of at most
/// 255; deltas within ±255 take the one-byte form with the sign folded into
/// the flag. This is the canonical form every emitted glyph uses.
pub(crate) fn write_points(points: &[Point], has_overlap_bit: bool, dst: &mut impl BufMut) {
    // Flags are buffered one step behind so a repeat count can be attached
    // once we know the run is over.
    let mut last_flag: u16 = u16::MAX; // never equal to a real flag
    let mut repeat_count: u8 = 0;
    let mut last_x: i32 = 0;
    let mut last_y: i32 = 0;

    for (i, point) in points.iter().enumerate() {
        let mut flag: u16 = 0;
        if point.on_curve {
            flag |= GLYF_ON_CURVE as u16;
        }
        if has_overlap_bit && i == 0 {
            flag |= OVERLAP_SIMPLE as u16;
        }

        let dx = point.x - last_x;
        if dx == 0 {
            flag |= GLYF_THIS_X_IS_SAME as u16;
        } else if dx > -256 && dx < 256 {
            flag |= GLYF_X_SHORT as u16
                | (if dx > 0 { GLYF_THIS_X_IS_SAME as u16 } else { 0 });
        }

        let dy = point.y - last_y;
        if dy == 0 {
            flag |= GLYF_THIS_Y_IS_SAME as u16;
        } else if dy > -256 && dy < 256 {
            flag |= GLYF_Y_SHORT as u16
                | (if dy > 0 { GLYF_THIS_Y_IS_SAME as u16 } else { 0 });
        }

        if flag == last_flag && repeat_count < 255 {
            repeat_count += 1;
        } else {
            if i != 0 {
                flush_flag_run(last_flag as u8, repeat_count, dst);
            }
            repeat_count = 0;
        }

        last_flag = flag;
        last_x = point.x;
        last_y = point.y;
    }
    if !points.is_empty() {
        flush_flag_run(last_flag as u8, repeat_count, dst);
    }

    // x coordinates
    last_x = 0;
    for point in points {
        let dx = point.x - last_x;
        if dx == 0 {
            // elided
        } else if dx > -256 && dx < 256 {
            dst.put_u8(dx.unsigned_abs() as u8);
        } else {
            dst.put_i16(dx as i16);
        }
        last_x = point.x;
    }

    // y coordinates
    last_y = 0;
    for point in points {
        let dy = point.y - last_y;
        if dy == 0 {
            // elided
        } else if dy > -256 && dy < 256 {
            dst.put_u8(dy.unsigned_abs() as u8);
        } else {
            dst.put_i16(dy as i16);
        }
        last_y = point.y;
    }
}

fn flush_flag_run(flag: u8, repeats: u8, dst: &mut impl BufMut) {
    if repeats > 0 {
        dst.put_u8(flag | GLYF_REPEAT);
        dst.put_u8(repeats);
    } else {
        dst.put_u8(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_glyph_bytes(
        bbox: BoundingBox,
        contours: &[&[Point]],
        instructions: &[u8],
    ) -> Vec<u8> {
        let glyph = Glyph::Simple(SimpleGlyph {
            bbox,
            contours: contours.iter().map(|c| c.to_vec()).collect(),
            instructions,
            has_overlap_bit: false,
        });
        let mut out = Vec::new();
        glyph.store(&mut out).unwrap();
        out
    }

    fn p(x: i32, y: i32, on_curve: bool) -> Point {
        Point { x, y, on_curve }
    }

    #[test]
    fn empty_glyph_stores_no_bytes() {
        let mut out = Vec::new();
        Glyph::Empty.store(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(matches!(Glyph::parse(&[]).unwrap(), Glyph::Empty));
    }

    #[test]
    fn simple_glyph_roundtrip() {
        let contour = [p(100, 0, true), p(100, 200, false), p(-300, 200, true)];
        let bbox = BoundingBox::of_points(&contour);
        let bytes = simple_glyph_bytes(bbox, &[&contour], &[0xAB, 0xCD]);

        let reparsed = Glyph::parse(&bytes).unwrap();
        let Glyph::Simple(simple) = reparsed else {
            panic!("expected a simple glyph");
        };
        assert_eq!(simple.bbox, bbox);
        assert_eq!(simple.contours, vec![contour.to_vec()]);
        assert_eq!(simple.instructions, &[0xAB, 0xCD]);
        assert!(!simple.has_overlap_bit);

        // Serialization is canonical: store(parse(x)) == x for our own output.
        let mut again = Vec::new();
        Glyph::Simple(simple).store(&mut again).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn repeat_runs_collapse() {
        // Nine identical delta steps produce one flag byte plus a repeat count.
        let contour: Vec<Point> = (0..10).map(|i| p(i * 10, 0, true)).collect();
        let bbox = BoundingBox::of_points(&contour);
        let bytes = simple_glyph_bytes(bbox, &[&contour], &[]);

        // Header 10 + endpoints 2 + instruction length 2 = 14; the first
        // point has dy == 0 while the rest repeat, so flags take 2 + 2 bytes
        // and coordinates 10 x-bytes.
        let flags = &bytes[14..];
        assert_eq!(flags[0] & GLYF_REPEAT, 0);
        assert_ne!(flags[1] & GLYF_REPEAT, 0);
        assert_eq!(flags[2], 8); // repeat count

        let Glyph::Simple(simple) = Glyph::parse(&bytes).unwrap() else {
            panic!("expected a simple glyph");
        };
        assert_eq!(simple.contours[0], contour);
    }

    #[test]
    fn overlap_bit_survives_roundtrip() {
        let contour = [p(0, 1, true), p(600, 1, true)];
        let glyph = Glyph::Simple(SimpleGlyph {
            bbox: BoundingBox::of_points(&contour),
            contours: vec![contour.to_vec()],
            instructions: &[],
            has_overlap_bit: true,
        });
        let mut bytes = Vec::new();
        glyph.store(&mut bytes).unwrap();

        let Glyph::Simple(simple) = Glyph::parse(&bytes).unwrap() else {
            panic!("expected a simple glyph");
        };
        assert!(simple.has_overlap_bit);
    }

    #[test]
    fn composite_glyph_roundtrip() {
        // One component: flags (words + instructions), glyph index, two word args.
        let mut composite = Vec::new();
        composite.put_i16(-1);
        BoundingBox { x_min: 0, y_min: 0, x_max: 10, y_max: 10 }.put(&mut composite);
        composite.put_u16(FLAG_ARG_1_AND_2_ARE_WORDS | FLAG_WE_HAVE_INSTRUCTIONS);
        composite.put_u16(7); // component glyph index
        composite.put_i16(5);
        composite.put_i16(-5);
        composite.put_u16(3); // instruction length
        composite.put_slice(&[1, 2, 3]);

        let Glyph::Composite(glyph) = Glyph::parse(&composite).unwrap() else {
            panic!("expected a composite glyph");
        };
        assert!(glyph.have_instructions);
        assert_eq!(glyph.components.len(), 8);
        assert_eq!(glyph.instructions, &[1, 2, 3]);

        let mut again = Vec::new();
        Glyph::Composite(glyph).store(&mut again).unwrap();
        assert_eq!(again, composite);
    }

    #[test]
    fn truncated_glyphs_are_rejected() {
        // Contour count says one contour but there is no endpoint array.
        assert!(Glyph::parse(&[0, 1, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        // Composite with MORE_COMPONENTS that runs off the end.
        let mut composite = Vec::new();
        composite.put_i16(-1);
        BoundingBox::default().put(&mut composite);
        composite.put_u16(FLAG_MORE_COMPONENTS);
        composite.put_u16(0);
        assert!(Glyph::parse(&composite).is_err());
    }
}
