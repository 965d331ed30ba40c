use std::io::{Cursor, Read};

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageDecoder, ImageFormat};
use lz4_flex::frame::FrameDecoder;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Decoded image data (CPU side, as handed to the presentation layer)
// ---------------------------------------------------------------------------

/// Decoded pixel data, always 4 bytes per pixel (RGBA), row-major,
/// top-to-bottom. Animated images hold all frames concatenated, so
/// `rgba.len() == width * height * 4 * frame_count`.
#[derive(Debug)]
pub struct DecodedImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub animated: bool,
    /// Per-frame delay in milliseconds. Empty unless `animated`.
    pub frame_delays: Vec<u32>,
    pub frame_count: u32,
}

impl DecodedImage {
    fn still(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            animated: false,
            frame_delays: Vec::new(),
            frame_count: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid image file (failed to read magic bytes)")]
    ShortMagic,
    #[error("invalid PTF header")]
    BadPtfHeader,
    #[error("PTF payload: {0}")]
    PtfPayload(std::io::Error),
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("invalid image dimensions")]
    BadDimensions,
}

// ---------------------------------------------------------------------------
// Magic-prefix sniffing
// ---------------------------------------------------------------------------

fn is_webp_magic(magic: &[u8]) -> bool {
    magic.starts_with(b"RIFF")
}

fn is_gif_magic(magic: &[u8]) -> bool {
    magic.starts_with(b"GIF")
}

fn is_ptf_magic(magic: &[u8]) -> bool {
    magic.starts_with(b"PTF\0")
}

/// Cheap classification: does this byte prefix look like a supported image?
/// Never decodes. Used by file enumeration, so unreadable or truncated input
/// simply classifies as "not an image".
pub fn probe(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    is_ptf_magic(bytes) || image::guess_format(bytes).is_ok()
}

// ---------------------------------------------------------------------------
// Per-format decoders
// ---------------------------------------------------------------------------

// TODO: Animated WEBP support (single frame only for now)
fn decode_webp(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::WebP)?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    Ok(DecodedImage::still(rgba.into_raw(), w, h))
}

fn decode_gif(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let (w, h) = decoder.dimensions();
    let frames = decoder.into_frames().collect_frames()?;

    let mut rgba = Vec::with_capacity(w as usize * h as usize * 4 * frames.len());
    let mut delays = Vec::with_capacity(frames.len());
    for frame in &frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        delays.push(numer / denom.max(1));
        rgba.extend_from_slice(frame.buffer().as_raw());
    }

    Ok(DecodedImage {
        rgba,
        width: w,
        height: h,
        animated: true,
        frame_count: delays.len() as u32,
        frame_delays: delays,
    })
}

// PTF: 4-byte magic, then a flags byte (bit 0 set means the source carries
// an alpha channel) and a dimensions byte (low nibble log2 width, high
// nibble log2 height), then an LZ4-frame-compressed pixel block.
fn decode_ptf(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let (flags, dims) = match bytes.get(4..6) {
        Some(&[flags, dims]) => (flags, dims),
        _ => return Err(DecodeError::BadPtfHeader),
    };
    let channels = (flags as usize & 1) + 3;
    let w = 1u32 << (dims & 0xF);
    let h = 1u32 << (dims >> 4);
    let pixel_count = w as usize * h as usize;

    let mut packed = vec![0u8; pixel_count * channels];
    FrameDecoder::new(&bytes[6..])
        .read_exact(&mut packed)
        .map_err(DecodeError::PtfPayload)?;

    let mut rgba = vec![0u8; pixel_count * 4];
    for i in 0..pixel_count {
        let src = &packed[i * channels..];
        let dst = &mut rgba[i * 4..i * 4 + 4];
        dst[0] = src[0];
        dst[1] = src[1];
        dst[2] = src[2];
        dst[3] = if channels == 4 { src[3] } else { 0xFF };
    }

    Ok(DecodedImage::still(rgba, w, h))
}

// JPG, PNG, BMP, TGA, PSD, HDR, PNM and friends — whatever the general
// decoder recognizes.
fn decode_other(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let img = image::load_from_memory(bytes)?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    Ok(DecodedImage::still(rgba.into_raw(), w, h))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Identify the container format from the magic prefix and decode.
/// Pure function of the input bytes.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::ShortMagic);
    }

    let decoded = if is_webp_magic(bytes) {
        decode_webp(bytes)?
    } else if is_gif_magic(bytes) {
        decode_gif(bytes)?
    } else if is_ptf_magic(bytes) {
        decode_ptf(bytes)?
    } else {
        decode_other(bytes)?
    };

    // A decoder claiming success with degenerate dimensions is still a failure.
    if decoded.width == 0 || decoded.height == 0 {
        return Err(DecodeError::BadDimensions);
    }
    Ok(decoded)
}
