#![forbid(unsafe_code)]

//! Kitty graphics protocol.
//!
//! Pixels are sent as raw RGBA (`f=32`). Every 3 pixels make 12 raw bytes,
//! which base64 turns into exactly 16 characters: the payload unit. Chunks
//! always end on a unit boundary, so pixel `p`'s alpha byte lives at a fixed
//! offset computable from the chunk table alone:
//!
//! ```text
//! chunk  = p / pixels_per_chunk
//! group  = (p % pixels_per_chunk) / 3        16 chars per group
//! byte   = 4 * (p % 3) + 3                   alpha within the 12-byte group
//! quad   = byte / 3                          4 chars per 3 bytes
//! offset = chunk_start[chunk] + 16 * group + 4 * quad
//! ```
//!
//! Wipe and rebuild decode that one quad, patch the byte, and re-encode it
//! in place. Padding (`=`) in the final group is preserved by the round trip.
//!
//! ```text
//! ESC _G a=T,f=32,s=W,v=H,i=ID,p=1,C=1,q=2,m=1 ; <payload> ESC \
//! ESC _G m=1 ; <payload> ESC \
//! ESC _G m=0 ; <payload> ESC \
//! ```

use std::io::{self, Write};
use std::ops::Range;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use libflate::zlib;

use crate::config::AnimationLevel;
use crate::error::{EncodeError, Result};
use crate::sprixel::{Bitmap, PixelRect, SprixelId, TamState, WireBuffer};

/// Base64 characters per 3-pixel group.
pub const PAYLOAD_UNIT: usize = 16;

/// Largest image accepted, in pixels.
pub const MAX_PIXELS: u64 = 1 << 26;

/// String terminator.
const ST: &[u8] = b"\x1b\\";

/// Chunk table of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KittyLayout {
    chunk_starts: Vec<usize>,
    pixels_per_chunk: usize,
}

/// Output of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KittyEncoded {
    /// Complete transmission.
    pub bytes: Vec<u8>,
    /// Byte range of each chunk's base64 payload.
    pub chunks: Vec<Range<usize>>,
}

/// Round a descriptor chunk size down to whole payload units.
#[inline]
pub fn chunk_chars(chunk_size: u32) -> usize {
    ((chunk_size as usize) / PAYLOAD_UNIT * PAYLOAD_UNIT).max(PAYLOAD_UNIT)
}

/// Encode an RGBA image as a transmit-and-display command.
pub fn encode(
    rgba: &[u8],
    width: u32,
    height: u32,
    id: u32,
    chunk_size: u32,
) -> Result<KittyEncoded, EncodeError> {
    let chars = chunk_chars(chunk_size);
    let raw_per_chunk = chars / 4 * 3;
    let total_chunks = rgba.len().div_ceil(raw_per_chunk).max(1);
    let mut bytes = Vec::with_capacity(rgba.len().div_ceil(3) * 4 + total_chunks * 16 + 64);
    let mut chunks = Vec::with_capacity(total_chunks);
    let mut raw_chunks = rgba.chunks(raw_per_chunk).peekable();
    let mut first = true;
    loop {
        let raw = raw_chunks.next().unwrap_or(&[]);
        let more = raw_chunks.peek().is_some();
        let m = u8::from(more);
        if first {
            // Writing to a Vec cannot fail.
            let _ = write!(
                bytes,
                "\x1b_Ga=T,f=32,s={width},v={height},i={id},p=1,C=1,q=2,m={m};"
            );
            first = false;
        } else {
            let _ = write!(bytes, "\x1b_Gm={m};");
        }
        let start = bytes.len();
        let encoded_len = raw.len().div_ceil(3) * 4;
        bytes.resize(start + encoded_len, 0);
        let written = STANDARD
            .encode_slice(raw, &mut bytes[start..])
            .map_err(|_| EncodeError::WireRange {
                offset: start,
                len: encoded_len,
            })?;
        bytes.truncate(start + written);
        chunks.push(start..bytes.len());
        bytes.extend_from_slice(ST);
        if !more {
            break;
        }
    }
    Ok(KittyEncoded { bytes, chunks })
}

/// Write the re-placement command for an image already transmitted.
pub fn write_move<W: Write>(w: &mut W, id: u32) -> io::Result<()> {
    write!(w, "\x1b_Ga=p,i={id},p=1,C=1,q=2\x1b\\")
}

/// Write the deletion command (image data freed too).
pub fn write_delete<W: Write>(w: &mut W, id: u32) -> io::Result<()> {
    write!(w, "\x1b_Ga=d,d=I,i={id},q=2\x1b\\")
}

/// Kitty codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KittyCodec {
    chunk_size: u32,
    animation: AnimationLevel,
}

impl KittyCodec {
    /// Codec with the descriptor's chunk size and the caller's animation policy.
    pub fn new(chunk_size: u32, animation: AnimationLevel) -> Self {
        Self {
            chunk_size,
            animation,
        }
    }

    /// Animation policy in effect.
    pub fn animation(&self) -> AnimationLevel {
        self.animation
    }

    /// Payload characters per chunk.
    pub fn chunk_chars(&self) -> usize {
        chunk_chars(self.chunk_size)
    }

    fn pixels_per_chunk(&self) -> usize {
        self.chunk_chars() / PAYLOAD_UNIT * 3
    }

    pub(crate) fn encode_bitmap(
        &self,
        bitmap: &Bitmap,
        id: SprixelId,
    ) -> Result<(WireBuffer, KittyLayout), EncodeError> {
        if u64::from(bitmap.width()) * u64::from(bitmap.height()) > MAX_PIXELS {
            return Err(EncodeError::TooLarge {
                width: bitmap.width(),
                height: bitmap.height(),
            });
        }
        let encoded = encode(
            bitmap.as_rgba(),
            bitmap.width(),
            bitmap.height(),
            id.get(),
            self.chunk_size,
        )?;
        let layout = KittyLayout {
            chunk_starts: encoded.chunks.iter().map(|r| r.start).collect(),
            pixels_per_chunk: self.pixels_per_chunk(),
        };
        Ok((WireBuffer::new(encoded.bytes), layout))
    }

    /// Offset of the quad holding pixel `p`'s alpha, and the byte within it.
    fn alpha_quad(&self, layout: &KittyLayout, p: usize) -> Result<(usize, usize), EncodeError> {
        let chunk = p / layout.pixels_per_chunk;
        let within = p % layout.pixels_per_chunk;
        let start = *layout
            .chunk_starts
            .get(chunk)
            .ok_or(EncodeError::WireRange { offset: p, len: 4 })?;
        let raw = 4 * (within % 3) + 3;
        let offset = start + (within / 3) * PAYLOAD_UNIT + (raw / 3) * 4;
        Ok((offset, raw % 3))
    }

    /// Decode, patch, and re-encode one quad. Returns the old byte and the
    /// replacement characters.
    fn patch_quad(
        wire: &WireBuffer,
        offset: usize,
        byte: usize,
        value: u8,
    ) -> Result<(u8, [u8; 4]), EncodeError> {
        let quad = wire
            .as_bytes()
            .get(offset..offset + 4)
            .ok_or(EncodeError::WireRange { offset, len: 4 })?;
        let mut raw = [0u8; 3];
        let n = STANDARD
            .decode_slice(quad, &mut raw)
            .map_err(|_| EncodeError::WireRange { offset, len: 4 })?;
        if byte >= n {
            return Err(EncodeError::WireRange { offset, len: 4 });
        }
        let old = raw[byte];
        raw[byte] = value;
        let mut out = [0u8; 4];
        STANDARD
            .encode_slice(&raw[..n], &mut out)
            .map_err(|_| EncodeError::WireRange { offset, len: 4 })?;
        Ok((old, out))
    }

    /// Compute every quad edit for `rect` before touching the buffer.
    fn plan_edits(
        &self,
        wire: &WireBuffer,
        layout: &KittyLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
        mut value: impl FnMut(usize) -> u8,
    ) -> Result<(Vec<u8>, Vec<(usize, [u8; 4])>), EncodeError> {
        let mut old = Vec::with_capacity(rect.area());
        let mut edits = Vec::with_capacity(rect.area());
        for (i, (x, y)) in rect.pixels().enumerate() {
            let p = y as usize * bitmap.width() as usize + x as usize;
            let (offset, byte) = self.alpha_quad(layout, p)?;
            let (prev, quad) = Self::patch_quad(wire, offset, byte, value(i))?;
            old.push(prev);
            edits.push((offset, quad));
        }
        Ok((old, edits))
    }

    pub(crate) fn wipe(
        &self,
        wire: &mut WireBuffer,
        layout: &KittyLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
    ) -> Result<Box<[u8]>> {
        let (old, edits) = self.plan_edits(wire, layout, bitmap, rect, |_| 0)?;
        for (offset, quad) in edits {
            wire.overwrite(offset, &quad)?;
        }
        Ok(old.into_boxed_slice())
    }

    pub(crate) fn rebuild(
        &self,
        wire: &mut WireBuffer,
        layout: &KittyLayout,
        bitmap: &Bitmap,
        rect: PixelRect,
        aux: &[u8],
    ) -> Result<TamState> {
        if aux.len() != rect.area() {
            return Err(EncodeError::WireRange {
                offset: 0,
                len: aux.len(),
            }
            .into());
        }
        let (_, edits) = self.plan_edits(wire, layout, bitmap, rect, |i| aux[i])?;
        for (offset, quad) in edits {
            wire.overwrite(offset, &quad)?;
        }
        Ok(TamState::classify(aux.iter().copied()))
    }

    /// Frame edit replacing `rect` of the root frame with zlib-compressed pixels.
    pub(crate) fn frame_edit(
        &self,
        id: SprixelId,
        bitmap: &Bitmap,
        rect: PixelRect,
        zero_alpha: bool,
    ) -> Result<Vec<u8>, EncodeError> {
        let region = bitmap.region(rect, zero_alpha);
        let compress = || -> io::Result<Vec<u8>> {
            let mut encoder = zlib::Encoder::new(Vec::new())?;
            encoder.write_all(&region)?;
            encoder.finish().into_result()
        };
        let compressed = compress().map_err(|e| EncodeError::Compress(e.to_string()))?;
        let payload = STANDARD.encode(compressed);
        let chars = self.chunk_chars();
        let mut out = Vec::with_capacity(payload.len() + 96);
        let pieces: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.as_bytes().chunks(chars).collect()
        };
        let last = pieces.len() - 1;
        for (i, piece) in pieces.into_iter().enumerate() {
            let m = u8::from(i != last);
            if i == 0 {
                let _ = write!(
                    out,
                    "\x1b_Ga=f,r=1,i={},x={},y={},s={},v={},X=1,f=32,o=z,q=2,m={m};",
                    id.get(),
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height
                );
            } else {
                let _ = write!(out, "\x1b_Gm={m};");
            }
            out.extend_from_slice(piece);
            out.extend_from_slice(ST);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn opaque(pixels: usize) -> Vec<u8> {
        (0..pixels).flat_map(|i| [i as u8, 2, 3, 255]).collect()
    }

    fn sid(n: u32) -> SprixelId {
        SprixelId::new(std::num::NonZeroU32::new(n).unwrap())
    }

    fn payload(enc: &KittyEncoded) -> Vec<u8> {
        let mut all = Vec::new();
        for r in &enc.chunks {
            all.extend_from_slice(&enc.bytes[r.clone()]);
        }
        STANDARD.decode(all).unwrap()
    }

    #[test]
    fn single_chunk_framing() {
        let enc = encode(&opaque(1), 1, 1, 5, 4096).unwrap();
        let text = String::from_utf8(enc.bytes.clone()).unwrap();
        assert!(text.starts_with("\x1b_Ga=T,f=32,s=1,v=1,i=5,p=1,C=1,q=2,m=0;"));
        assert!(text.ends_with("\x1b\\"));
        assert_eq!(enc.chunks.len(), 1);
        assert_eq!(payload(&enc), opaque(1));
    }

    #[test]
    fn empty_image_is_one_empty_final_chunk() {
        let enc = encode(&[], 0, 0, 2, 4096).unwrap();
        assert_eq!(enc.chunks.len(), 1);
        assert!(enc.chunks[0].is_empty());
        let text = String::from_utf8(enc.bytes).unwrap();
        assert_eq!(text, "\x1b_Ga=T,f=32,s=0,v=0,i=2,p=1,C=1,q=2,m=0;\x1b\\");
    }

    #[test]
    fn chunks_split_on_payload_units() {
        let rgba = opaque(1000);
        let enc = encode(&rgba, 100, 10, 1, 4096).unwrap();
        assert_eq!(enc.chunks.len(), 2);
        assert_eq!(enc.chunks[0].len(), 4096);
        let second = &enc.bytes[enc.chunks[0].end..enc.chunks[1].start];
        assert_eq!(second, b"\x1b\\\x1b_Gm=0;");
        assert_eq!(payload(&enc), rgba);
    }

    #[test]
    fn odd_chunk_size_rounds_down() {
        assert_eq!(chunk_chars(4100), 4096);
        assert_eq!(chunk_chars(5), PAYLOAD_UNIT);
        let enc = encode(&opaque(10), 10, 1, 1, 20).unwrap();
        for r in &enc.chunks[..enc.chunks.len() - 1] {
            assert_eq!(r.len(), 16);
        }
    }

    #[test]
    fn wipe_zeroes_only_alpha_and_rebuild_restores() {
        let codec = KittyCodec::new(32, AnimationLevel::Full);
        let rgba = opaque(20);
        let bmp = Bitmap::new(&rgba, 5, 4, None).unwrap();
        let (mut wire, layout) = codec.encode_bitmap(&bmp, sid(1)).unwrap();
        let original = wire.clone();
        let rect = PixelRect::new(1, 1, 3, 2);
        let aux = codec.wipe(&mut wire, &layout, &bmp, rect).unwrap();
        assert_eq!(&*aux, &[255u8; 6][..]);

        let enc = KittyEncoded {
            bytes: wire.as_bytes().to_vec(),
            chunks: encode(&rgba, 5, 4, 1, 32).unwrap().chunks,
        };
        let decoded = payload(&enc);
        for (i, px) in decoded.chunks_exact(4).enumerate() {
            let (x, y) = ((i % 5) as u32, (i / 5) as u32);
            let inside = (1..4).contains(&x) && (1..3).contains(&y);
            assert_eq!(px[3], if inside { 0 } else { 255 }, "pixel {i}");
            assert_eq!(&px[..3], &rgba[i * 4..i * 4 + 3]);
        }

        let state = codec.rebuild(&mut wire, &layout, &bmp, rect, &aux).unwrap();
        assert_eq!(state, TamState::Opaque);
        assert_eq!(wire, original);
    }

    #[test]
    fn wipe_handles_padded_final_group() {
        let codec = KittyCodec::new(4096, AnimationLevel::Full);
        for n in 1..=5u32 {
            let bmp = Bitmap::new(&opaque(n as usize), n, 1, None).unwrap();
            let (mut wire, layout) = codec.encode_bitmap(&bmp, sid(1)).unwrap();
            let original = wire.clone();
            let rect = PixelRect::new(n - 1, 0, 1, 1);
            let aux = codec.wipe(&mut wire, &layout, &bmp, rect).unwrap();
            assert_eq!(&*aux, &[255u8]);
            codec.rebuild(&mut wire, &layout, &bmp, rect, &aux).unwrap();
            assert_eq!(wire, original);
        }
    }

    #[test]
    fn rebuild_rejects_mismatched_aux() {
        let codec = KittyCodec::new(4096, AnimationLevel::Full);
        let bmp = Bitmap::new(&opaque(4), 2, 2, None).unwrap();
        let (mut wire, layout) = codec.encode_bitmap(&bmp, sid(1)).unwrap();
        let before = wire.clone();
        assert!(codec.rebuild(&mut wire, &layout, &bmp, PixelRect::new(0, 0, 2, 2), &[1]).is_err());
        assert_eq!(wire, before);
    }

    #[test]
    fn frame_edit_carries_compressed_region() {
        let codec = KittyCodec::new(4096, AnimationLevel::Delta);
        let bmp = Bitmap::new(&opaque(4), 2, 2, None).unwrap();
        let rect = PixelRect::new(1, 0, 1, 2);
        let out = codec.frame_edit(sid(3), &bmp, rect, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        let header = "\x1b_Ga=f,r=1,i=3,x=1,y=0,s=1,v=2,X=1,f=32,o=z,q=2,m=0;";
        assert!(text.starts_with(header));
        let body = &text[header.len()..text.len() - 2];
        let compressed = STANDARD.decode(body).unwrap();
        let mut raw = Vec::new();
        zlib::Decoder::new(&compressed[..])
            .unwrap()
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw, vec![1, 2, 3, 0, 3, 2, 3, 0]);
    }

    #[test]
    fn control_verbs() {
        let mut out = Vec::new();
        write_delete(&mut out, 9).unwrap();
        assert_eq!(out, b"\x1b_Ga=d,d=I,i=9,q=2\x1b\\");
        out.clear();
        write_move(&mut out, 9).unwrap();
        assert_eq!(out, b"\x1b_Ga=p,i=9,p=1,C=1,q=2\x1b\\");
    }
}
