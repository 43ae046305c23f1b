#![forbid(unsafe_code)]

//! DEC sixel.
//!
//! The image is quantized once to a palette that fits the terminal's color
//! registers, kept as a per-pixel index map, and emitted band by band (six
//! pixel rows per band). The byte range of every band is recorded, so a wipe
//! or rebuild re-encodes only the bands a cell touches and splices them in.
//!
//! Sixel has no alpha: a pixel is either drawn in some register or left
//! alone (`P2=1` keeps undrawn pixels at the terminal background). Wiping a
//! cell maps its pixels to "undrawn"; the restore data is the previous
//! indices.

use std::collections::HashMap;
use std::io::Write;

use crate::error::{EncodeError, Result};
use crate::sprixel::{Bitmap, PixelRect, TamState, WireBuffer};

/// Pixel rows per band.
pub const BAND_HEIGHT: u32 = 6;

/// Index of an undrawn pixel.
const TRANSPARENT: u16 = u16::MAX;

/// Channel bit depths tried, finest first.
const DEPTHS: [u32; 6] = [8, 5, 4, 3, 2, 1];

/// Palette, index map, and band table of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SixelLayout {
    width: u32,
    height: u32,
    colors: u16,
    map: Vec<u16>,
    band_offsets: Vec<usize>,
}

impl SixelLayout {
    fn bands(&self) -> u32 {
        self.height.div_ceil(BAND_HEIGHT)
    }

    fn band_rows(&self, band: u32) -> std::ops::Range<usize> {
        let start = (band * BAND_HEIGHT) as usize;
        let end = ((band + 1) * BAND_HEIGHT).min(self.height) as usize;
        start..end
    }
}

/// Sixel codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SixelCodec {
    color_registers: u16,
    max_width: u32,
    max_height: u32,
}

impl SixelCodec {
    /// Codec bounded by the terminal's registers and maximum geometry.
    pub fn new(color_registers: u16, max_width: u32, max_height: u32) -> Self {
        Self {
            color_registers: color_registers.clamp(8, 1024),
            max_width,
            max_height,
        }
    }

    /// Palette size bound.
    pub fn color_registers(&self) -> u16 {
        self.color_registers
    }

    pub(crate) fn encode_bitmap(
        &self,
        bitmap: &Bitmap,
    ) -> Result<(WireBuffer, SixelLayout), EncodeError> {
        if bitmap.width() > self.max_width || bitmap.height() > self.max_height {
            return Err(EncodeError::TooLarge {
                width: bitmap.width(),
                height: bitmap.height(),
            });
        }
        let (palette, map) = quantize(bitmap, usize::from(self.color_registers));
        let (width, height) = (bitmap.width(), bitmap.height());

        let mut out = Vec::with_capacity(map.len() / 2 + palette.len() * 16 + 64);
        let _ = write!(out, "\x1bP0;1;0q\"1;1;{width};{height}");
        for (i, [r, g, b]) in palette.iter().enumerate() {
            let _ = write!(out, "#{i};2;{};{};{}", percent(*r), percent(*g), percent(*b));
        }
        let mut layout = SixelLayout {
            width,
            height,
            colors: palette.len() as u16,
            map,
            band_offsets: Vec::new(),
        };
        let bands = layout.bands();
        for band in 0..bands {
            layout.band_offsets.push(out.len());
            let rows = layout.band_rows(band);
            let w = width as usize;
            encode_band(
                &layout.map[rows.start * w..rows.end * w],
                w,
                layout.colors,
                band + 1 == bands,
                &mut out,
            );
        }
        layout.band_offsets.push(out.len());
        out.extend_from_slice(b"\x1b\\");
        Ok((WireBuffer::new(out), layout))
    }

    pub(crate) fn wipe(
        &self,
        wire: &mut WireBuffer,
        layout: &mut SixelLayout,
        _bitmap: &Bitmap,
        rect: PixelRect,
    ) -> Result<Box<[u8]>> {
        let old = replace_indices(wire, layout, rect, |_| TRANSPARENT)?;
        Ok(old
            .iter()
            .flat_map(|i| i.to_le_bytes())
            .collect::<Vec<u8>>()
            .into_boxed_slice())
    }

    pub(crate) fn rebuild(
        &self,
        wire: &mut WireBuffer,
        layout: &mut SixelLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
        aux: &[u8],
    ) -> Result<TamState> {
        let bad = EncodeError::WireRange {
            offset: 0,
            len: aux.len(),
        };
        if aux.len() != rect.area() * 2 {
            return Err(bad.into());
        }
        let saved: Vec<u16> = aux
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        if saved
            .iter()
            .any(|&i| i != TRANSPARENT && i >= layout.colors)
        {
            return Err(bad.into());
        }
        replace_indices(wire, layout, rect, |i| saved[i])?;
        Ok(TamState::classify(bitmap.alphas(rect)))
    }
}

/// Set the indices of `rect` and re-encode the bands it touches. Returns the
/// previous indices, row-major. Nothing changes on error.
fn replace_indices(
    wire: &mut WireBuffer,
    layout: &mut SixelLayout,
    rect: PixelRect,
    value: impl Fn(usize) -> u16,
) -> Result<Vec<u16>> {
    if rect.is_empty()
        || rect.x + rect.width > layout.width
        || rect.y + rect.height > layout.height
    {
        return Err(EncodeError::WireRange {
            offset: rect.y as usize * layout.width as usize + rect.x as usize,
            len: rect.area(),
        }
        .into());
    }
    let w = layout.width as usize;
    let first_band = rect.y / BAND_HEIGHT;
    let last_band = (rect.y + rect.height - 1) / BAND_HEIGHT;
    let row_start = layout.band_rows(first_band).start;
    let row_end = layout.band_rows(last_band).end;

    let mut patch = layout.map[row_start * w..row_end * w].to_vec();
    let mut old = Vec::with_capacity(rect.area());
    for (i, (x, y)) in rect.pixels().enumerate() {
        let at = (y as usize - row_start) * w + x as usize;
        old.push(patch[at]);
        patch[at] = value(i);
    }

    let bands = layout.bands();
    let mut encoded = Vec::new();
    let mut lengths = Vec::with_capacity((last_band - first_band + 1) as usize);
    for band in first_band..=last_band {
        let rows = layout.band_rows(band);
        let before = encoded.len();
        encode_band(
            &patch[(rows.start - row_start) * w..(rows.end - row_start) * w],
            w,
            layout.colors,
            band + 1 == bands,
            &mut encoded,
        );
        lengths.push(encoded.len() - before);
    }

    let start = layout.band_offsets[first_band as usize];
    let end = layout.band_offsets[last_band as usize + 1];
    wire.splice(start..end, &encoded)?;

    layout.map[row_start * w..row_end * w].copy_from_slice(&patch);
    let mut offset = start;
    for (k, len) in lengths.into_iter().enumerate() {
        layout.band_offsets[first_band as usize + k] = offset;
        offset += len;
    }
    let shift = offset as isize - end as isize;
    for o in &mut layout.band_offsets[last_band as usize + 1..] {
        *o = (*o as isize + shift) as usize;
    }
    Ok(old)
}

/// Quantize to at most `registers` colors by dropping channel precision.
fn quantize(bitmap: &Bitmap, registers: usize) -> (Vec<[u8; 3]>, Vec<u16>) {
    let pixels = bitmap.as_rgba();
    let mut map = vec![TRANSPARENT; pixels.len() / 4];
    for bits in DEPTHS {
        let shift = 8 - bits;
        let mut index: HashMap<[u8; 3], u16> = HashMap::new();
        let mut palette = Vec::new();
        let mut fits = true;
        for (slot, px) in map.iter_mut().zip(pixels.chunks_exact(4)) {
            if px[3] == 0 {
                *slot = TRANSPARENT;
                continue;
            }
            let key = [px[0] >> shift, px[1] >> shift, px[2] >> shift];
            let next = palette.len() as u16;
            let i = *index.entry(key).or_insert_with(|| {
                palette.push(dequantize(key, shift));
                next
            });
            if palette.len() > registers {
                fits = false;
                break;
            }
            *slot = i;
        }
        if fits {
            tplane_core::trace!(bits, colors = palette.len(), "sixel palette");
            return (palette, map);
        }
    }
    // One bit per channel is at most eight colors, and registers >= 8.
    (Vec::new(), vec![TRANSPARENT; map.len()])
}

fn dequantize(key: [u8; 3], shift: u32) -> [u8; 3] {
    let half = if shift == 0 { 0 } else { 1u16 << (shift - 1) };
    key.map(|k| ((u16::from(k) << shift) + half).min(255) as u8)
}

fn percent(v: u8) -> u32 {
    (u32::from(v) * 100 + 127) / 255
}

/// Encode one band's rows (`rows.len() == width * band_height`).
fn encode_band(rows: &[u16], width: usize, colors: u16, last: bool, out: &mut Vec<u8>) {
    let height = rows.len() / width.max(1);
    let mut present = vec![false; usize::from(colors)];
    for &i in rows {
        if i != TRANSPARENT {
            present[usize::from(i)] = true;
        }
    }
    let mut first = true;
    let mut sixels = vec![0u8; width];
    for color in (0..colors).filter(|&c| present[usize::from(c)]) {
        sixels.fill(0);
        for (dy, row) in rows.chunks_exact(width).take(height).enumerate() {
            for (x, &i) in row.iter().enumerate() {
                if i == color {
                    sixels[x] |= 1 << dy;
                }
            }
        }
        if !first {
            out.push(b'$');
        }
        first = false;
        let _ = write!(out, "#{color}");
        let used = sixels.iter().rposition(|&s| s != 0).map_or(0, |p| p + 1);
        let mut x = 0;
        while x < used {
            let s = sixels[x];
            let run = sixels[x..used].iter().take_while(|&&v| v == s).count();
            push_run(out, b'?' + s, run);
            x += run;
        }
    }
    if !last {
        out.push(b'-');
    }
}

fn push_run(out: &mut Vec<u8>, ch: u8, n: usize) {
    if n >= 4 {
        let _ = write!(out, "!{n}");
        out.push(ch);
    } else {
        out.extend(std::iter::repeat_n(ch, n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Bitmap {
        let data: Vec<u8> = (0..w * h).flat_map(|_| rgba).collect();
        Bitmap::new(&data, w, h, None).unwrap()
    }

    fn text(wire: &WireBuffer) -> String {
        String::from_utf8(wire.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn single_color_band() {
        let codec = SixelCodec::new(256, 1000, 1000);
        let (wire, layout) = codec.encode_bitmap(&solid(5, 6, [255, 0, 0, 255])).unwrap();
        assert_eq!(
            text(&wire),
            "\x1bP0;1;0q\"1;1;5;6#0;2;100;0;0#0!5~\x1b\\"
        );
        assert_eq!(layout.band_offsets.len(), 2);
    }

    #[test]
    fn short_runs_and_band_separators() {
        let codec = SixelCodec::new(256, 1000, 1000);
        let (wire, _) = codec.encode_bitmap(&solid(2, 7, [0, 0, 255, 255])).unwrap();
        let t = text(&wire);
        assert!(t.ends_with("#0~~-#0@@\x1b\\"), "{t:?}");
    }

    #[test]
    fn transparent_pixels_are_not_drawn() {
        let codec = SixelCodec::new(256, 1000, 1000);
        let bmp = Bitmap::new(&[0, 0, 0, 0, 9, 9, 9, 255], 2, 1, None).unwrap();
        let (wire, layout) = codec.encode_bitmap(&bmp).unwrap();
        assert_eq!(layout.colors, 1);
        assert!(text(&wire).ends_with("#0?@\x1b\\"));
    }

    #[test]
    fn palette_respects_registers() {
        let codec = SixelCodec::new(8, 1000, 1000);
        let data: Vec<u8> = (0..64u32)
            .flat_map(|i| [(i * 4) as u8, (i * 3) as u8, (255 - i * 4) as u8, 255])
            .collect();
        let bmp = Bitmap::new(&data, 64, 1, None).unwrap();
        let (_, layout) = codec.encode_bitmap(&bmp).unwrap();
        assert!(layout.colors <= 8);
        assert!(layout.map.iter().all(|&i| i < layout.colors));
    }

    #[test]
    fn too_large_is_rejected() {
        let codec = SixelCodec::new(256, 4, 4);
        assert_eq!(
            codec.encode_bitmap(&solid(5, 1, [0, 0, 0, 255])).unwrap_err(),
            EncodeError::TooLarge { width: 5, height: 1 }
        );
    }

    #[test]
    fn wipe_and_rebuild_round_trip_across_bands() {
        let codec = SixelCodec::new(256, 1000, 1000);
        let bmp = solid(4, 14, [10, 200, 30, 255]);
        let (mut wire, mut layout) = codec.encode_bitmap(&bmp).unwrap();
        let original = wire.clone();
        let original_layout = layout.clone();
        let rect = PixelRect::new(1, 4, 2, 4);

        let aux = codec.wipe(&mut wire, &mut layout, &bmp, rect).unwrap();
        assert_eq!(aux.len(), 16);
        assert_ne!(wire, original);
        for (x, y) in rect.pixels() {
            assert_eq!(layout.map[(y * 4 + x) as usize], TRANSPARENT);
        }
        assert_eq!(*layout.band_offsets.last().unwrap() + 2, wire.len());

        let state = codec
            .rebuild(&mut wire, &mut layout, &bmp, rect, &aux)
            .unwrap();
        assert_eq!(state, TamState::Opaque);
        assert_eq!(wire, original);
        assert_eq!(layout, original_layout);
    }

    #[test]
    fn rebuild_rejects_bad_indices() {
        let codec = SixelCodec::new(256, 1000, 1000);
        let bmp = solid(1, 1, [1, 1, 1, 255]);
        let (mut wire, mut layout) = codec.encode_bitmap(&bmp).unwrap();
        let before = wire.clone();
        let err = codec.rebuild(&mut wire, &mut layout, &bmp, PixelRect::new(0, 0, 1, 1), &[7, 0]);
        assert!(err.is_err());
        assert_eq!(wire, before);
    }
}
