//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use jpeg_archive::codec::{encode, EncodeSettings};
use jpeg_archive::marker::find_app0;
use jpeg_archive::{PixelLayout, RasterImage, SubsamplingMode};

/// Photo-like RGB: smooth gradients plus deterministic texture.
pub fn photo(width: usize, height: usize, seed: u32) -> RasterImage {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            // xorshift
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let noise = (state % 9) as i32 - 4;
            let r = (x * 200 / width) as i32 + 30 + noise;
            let g = (y * 180 / height) as i32 + 40 + noise;
            let b = (((x / 8 + y / 8) % 2) * 60) as i32 + 90 + noise;
            pixels.extend([r, g, b].map(|v| v.clamp(0, 255) as u8));
        }
    }
    RasterImage::new(pixels, width, height, PixelLayout::Rgb).unwrap()
}

/// High-quality source JPEG with room to shrink.
pub fn source_jpeg(width: usize, height: usize, seed: u32, subsampling: SubsamplingMode) -> Vec<u8> {
    let settings = EncodeSettings::new(98).subsampling(subsampling);
    encode(&photo(width, height, seed), &settings).unwrap()
}

/// One marker segment with its length field.
pub fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Inserts `segments` right after the APP0 segment.
pub fn with_segments(jpeg: &[u8], segments: &[Vec<u8>]) -> Vec<u8> {
    let app0 = find_app0(jpeg).unwrap();
    let mut out = jpeg[..app0.end].to_vec();
    for seg in segments {
        out.extend_from_slice(seg);
    }
    out.extend_from_slice(&jpeg[app0.end..]);
    out
}

/// Replaces the APP0 segment with `payload`, or removes it for `None`.
pub fn with_app0(jpeg: &[u8], payload: Option<&[u8]>) -> Vec<u8> {
    let app0 = find_app0(jpeg).unwrap();
    let mut out = jpeg[..2].to_vec();
    if let Some(payload) = payload {
        out.extend(segment(0xE0, payload));
    }
    out.extend_from_slice(&jpeg[app0.end..]);
    out
}

/// EXIF, ICC and a comment, the way cameras and editors write them.
pub fn sample_metadata() -> Vec<Vec<u8>> {
    let mut icc = b"ICC_PROFILE\0\x01\x01".to_vec();
    icc.extend(std::iter::repeat(0x42).take(200));
    vec![
        segment(0xE1, b"Exif\0\0II*\0\x08\0\0\0\0\0"),
        segment(0xE2, &icc),
        segment(0xFE, b"shot on a test rig"),
    ]
}

/// Header of a 4-component baseline frame; with `adobe_transform` an APP14
/// marker is added (2 means YCCK).
pub fn four_component_jpeg(adobe_transform: Option<u8>) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    if let Some(transform) = adobe_transform {
        out.extend(segment(
            0xEE,
            &[b'A', b'd', b'o', b'b', b'e', 0, 100, 0, 0, 0, 0, transform],
        ));
    }
    let mut sof = vec![8, 0, 16, 0, 16, 4];
    for id in 1..=4u8 {
        sof.extend_from_slice(&[id, 0x11, 0]);
    }
    out.extend(segment(0xC0, &sof));
    let mut sos = vec![4];
    for id in 1..=4u8 {
        sos.extend_from_slice(&[id, 0x00]);
    }
    sos.extend_from_slice(&[0, 63, 0]);
    out.extend(segment(0xDA, &sos));
    out.extend_from_slice(&[0x00, 0x00, 0xFF, 0xD9]);
    out
}

/// Dimensions reported by an independent decoder.
pub fn decoded_size(jpeg: &[u8]) -> (usize, usize) {
    let mut decoder = jpeg_decoder::Decoder::new(jpeg);
    decoder.decode().expect("stream should decode");
    let info = decoder.info().expect("decoder info");
    (info.width as usize, info.height as usize)
}
