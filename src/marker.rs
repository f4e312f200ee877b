//! JPEG marker segment scanning.
//!
//! Walks the header segments of a JPEG stream (everything before the first
//! SOS) without decoding anything:
//! - locates the APP0 segment that follows SOI
//! - copies APP1-APP15 and COM segments out as an opaque [`MetadataBlob`]
//! - detects the "already processed" comment ([`SENTINEL`])
//! - reads the frame header to classify chroma subsampling
//!
//! All reads go through [`Cursor`], which bounds-checks every access.
//!
//! Reference: ITU-T T.81 Section B.1

use std::ops::Range;

use crate::error::{Error, Result};
use crate::types::{ColorSpace, SubsamplingMode};

/// Comment written into every recompressed file.
pub const SENTINEL: &str = "Compressed by jpeg-recompress";

/// Start of image
pub const JPEG_SOI: u8 = 0xD8;
/// End of image
pub const JPEG_EOI: u8 = 0xD9;
/// Start of scan
pub const JPEG_SOS: u8 = 0xDA;
/// JFIF application segment
pub const JPEG_APP0: u8 = 0xE0;
/// Adobe application segment
pub const JPEG_APP14: u8 = 0xEE;
/// Comment
pub const JPEG_COM: u8 = 0xFE;

/// Returns true if `data` starts with the SOI marker.
pub fn has_jpeg_magic(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == JPEG_SOI
}

/// Byte range of the APP0 segment directly after SOI, marker included.
///
/// The range always starts at 2; its end is `4 + app0_len` where `app0_len`
/// is the segment's length field (which counts itself).
pub fn find_app0(data: &[u8]) -> Result<Range<usize>> {
    if !has_jpeg_magic(data) {
        return Err(Error::NotJpeg);
    }
    let mut cursor = Cursor::at(data, 2);
    if cursor.read_u8()? != 0xFF || cursor.read_u8()? != JPEG_APP0 {
        return Err(Error::MissingApp0);
    }
    let len = cursor.read_u16_be()? as usize;
    if len < 2 {
        return Err(Error::MalformedSegment {
            marker: JPEG_APP0,
            offset: 2,
        });
    }
    let end = 4 + len;
    if end > data.len() {
        return Err(Error::Truncated { offset: data.len() });
    }
    Ok(2..end)
}

// =============================================================================
// Cursor
// =============================================================================

/// Bounds-checked big-endian reader over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Cursor at `pos` (clamped to the end of `data`).
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(Error::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads `n` bytes as a borrowed slice.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::Truncated {
                offset: self.data.len(),
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Reads the next marker code, returning it with the offset of its 0xFF.
    ///
    /// Garbage bytes before the marker and 0xFF fill bytes are skipped, the
    /// same way libjpeg resynchronizes.
    pub fn read_marker(&mut self) -> Result<(u8, usize)> {
        let skipped_from = self.pos;
        while self.read_u8()? != 0xFF {}
        let mut offset = self.pos - 1;
        let mut code = self.read_u8()?;
        while code == 0xFF {
            offset = self.pos - 1;
            code = self.read_u8()?;
        }
        if offset > skipped_from {
            tracing::trace!(
                "skipped {} extraneous bytes before marker 0x{:02X}",
                offset - skipped_from,
                code
            );
        }
        Ok((code, offset))
    }
}

// =============================================================================
// Frame header
// =============================================================================

/// Per-component entry of a SOFn header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComponent {
    /// Component identifier
    pub id: u8,
    /// Horizontal sampling factor
    pub h_samp: u8,
    /// Vertical sampling factor
    pub v_samp: u8,
}

/// Parsed SOFn segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// SOF marker code (0xC0 baseline, 0xC2 progressive, ...)
    pub marker: u8,
    /// Sample precision in bits
    pub precision: u8,
    /// Image width
    pub width: u16,
    /// Image height
    pub height: u16,
    /// Components in frame order
    pub components: Vec<FrameComponent>,
}

impl FrameHeader {
    fn parse(marker: u8, payload: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        let precision = cursor.read_u8()?;
        let height = cursor.read_u16_be()?;
        let width = cursor.read_u16_be()?;
        let count = cursor.read_u8()? as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let spec = cursor.read_bytes(3).map_err(|_| Error::Truncated {
                offset: offset + 4 + payload.len(),
            })?;
            components.push(FrameComponent {
                id: spec[0],
                h_samp: spec[1] >> 4,
                v_samp: spec[1] & 0x0F,
            });
        }
        Ok(Self {
            marker,
            precision,
            width,
            height,
            components,
        })
    }

    /// Sampling factor triple, if this is a 3-component frame.
    pub fn sampling_factors(&self) -> Option<[(u8, u8); 3]> {
        match self.components.as_slice() {
            [a, b, c] => Some([
                (a.h_samp, a.v_samp),
                (b.h_samp, b.v_samp),
                (c.h_samp, c.v_samp),
            ]),
            _ => None,
        }
    }
}

fn is_sof(marker: u8) -> bool {
    // C4 is DHT, C8 is reserved, CC is DAC
    (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

// =============================================================================
// JFIF
// =============================================================================

/// Version and pixel density fields of a JFIF APP0 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JfifHeader {
    /// Major and minor version
    pub version: (u8, u8),
    /// 0 = aspect ratio only, 1 = dots/inch, 2 = dots/cm
    pub density_unit: u8,
    /// Horizontal density
    pub x_density: u16,
    /// Vertical density
    pub y_density: u16,
}

impl JfifHeader {
    /// Parses an APP0 payload (after the length field). Non-JFIF APP0
    /// segments such as JFXX give `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let fields = payload.strip_prefix(b"JFIF\0")?;
        let mut cursor = Cursor::new(fields);
        let major = cursor.read_u8().ok()?;
        let minor = cursor.read_u8().ok()?;
        let density_unit = cursor.read_u8().ok()?;
        let x_density = cursor.read_u16_be().ok()?;
        let y_density = cursor.read_u16_be().ok()?;
        Some(Self {
            version: (major, minor),
            density_unit,
            x_density,
            y_density,
        })
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// APP1-APP15 and COM segments copied verbatim, markers and lengths included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBlob {
    bytes: Vec<u8>,
    segments: usize,
}

impl MetadataBlob {
    fn push(&mut self, segment: &[u8]) -> Result<()> {
        self.bytes.try_reserve(segment.len())?;
        self.bytes.extend_from_slice(segment);
        self.segments += 1;
        Ok(())
    }

    /// Concatenated segment bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if no segments were collected.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of segments collected.
    pub fn segment_count(&self) -> usize {
        self.segments
    }
}

// =============================================================================
// Header walk
// =============================================================================

/// Result of walking the header segments of a JPEG stream.
#[derive(Debug, Clone, Default)]
pub struct JpegMarkers {
    /// APP0 segment range, if one directly follows SOI
    pub app0: Option<Range<usize>>,
    /// JFIF fields of that APP0
    pub jfif: Option<JfifHeader>,
    /// Preserved APPn/COM segments
    pub metadata: MetadataBlob,
    /// True if a COM segment starts with [`SENTINEL`]
    pub already_processed: bool,
    /// First SOFn header
    pub frame: Option<FrameHeader>,
    /// Adobe APP14 color transform flag
    pub adobe_transform: Option<u8>,
}

impl JpegMarkers {
    /// Walks the segments from SOI up to the first SOS (or EOI).
    pub fn scan(data: &[u8]) -> Result<Self> {
        if !has_jpeg_magic(data) {
            return Err(Error::NotJpeg);
        }
        let app0 = find_app0(data).ok();
        let jfif = app0
            .as_ref()
            .and_then(|range| JfifHeader::parse(&data[range.start + 4..range.end]));
        let mut markers = JpegMarkers {
            app0,
            jfif,
            ..Default::default()
        };

        let mut cursor = Cursor::at(data, 2);
        loop {
            let (marker, offset) = cursor.read_marker()?;
            match marker {
                JPEG_SOS | JPEG_EOI => break,
                // Standalone markers without a length field
                0x01 | 0xD0..=0xD7 | JPEG_SOI => continue,
                _ => {}
            }

            let len = cursor.read_u16_be()? as usize;
            if len < 2 {
                return Err(Error::MalformedSegment { marker, offset });
            }
            let payload = cursor.read_bytes(len - 2)?;
            let segment = &data[offset..cursor.position()];
            tracing::trace!("marker 0x{:02X} at {} ({} bytes)", marker, offset, len);

            match marker {
                JPEG_APP0 => {}
                JPEG_COM if payload.starts_with(SENTINEL.as_bytes()) => {
                    markers.already_processed = true;
                }
                JPEG_COM => markers.metadata.push(segment)?,
                0xE1..=0xEF => {
                    if marker == JPEG_APP14
                        && payload.len() >= 12
                        && payload.starts_with(b"Adobe")
                    {
                        markers.adobe_transform = Some(payload[11]);
                    }
                    markers.metadata.push(segment)?;
                }
                m if is_sof(m) && markers.frame.is_none() => {
                    markers.frame = Some(FrameHeader::parse(m, payload, offset)?);
                }
                _ => {}
            }
        }
        Ok(markers)
    }

    /// Color space the file is stored in, inferred the way libjpeg does.
    pub fn color_space(&self) -> ColorSpace {
        let Some(frame) = &self.frame else {
            return ColorSpace::Unknown;
        };
        match frame.components.len() {
            1 => ColorSpace::Grayscale,
            3 => {
                let ids: Vec<u8> = frame.components.iter().map(|c| c.id).collect();
                if self.app0.is_some() {
                    ColorSpace::YCbCr
                } else if self.adobe_transform == Some(0) || ids == b"RGB" {
                    ColorSpace::Rgb
                } else {
                    ColorSpace::YCbCr
                }
            }
            4 => match self.adobe_transform {
                Some(2) => ColorSpace::Ycck,
                _ => ColorSpace::Cmyk,
            },
            _ => ColorSpace::Unknown,
        }
    }

    /// Chroma subsampling of a YCbCr frame; everything else is 4:2:0.
    pub fn subsampling(&self) -> SubsamplingMode {
        match (&self.frame, self.color_space()) {
            (Some(frame), ColorSpace::YCbCr) => frame
                .sampling_factors()
                .map(SubsamplingMode::from_factors)
                .unwrap_or_default(),
            _ => SubsamplingMode::Default420,
        }
    }
}

/// Classifies the chroma subsampling of a JPEG stream.
///
/// Never fails: unreadable headers and non-YCbCr frames report
/// [`SubsamplingMode::Default420`].
pub fn detect_subsampling(data: &[u8]) -> SubsamplingMode {
    match JpegMarkers::scan(data) {
        Ok(markers) => markers.subsampling(),
        Err(e) => {
            tracing::trace!("subsampling detection fell back to 4:2:0: {}", e);
            SubsamplingMode::Default420
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 2) as u16;
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn sof(factors: [(u8, u8); 3]) -> Vec<u8> {
        let mut payload = vec![8, 0, 16, 0, 16, 3];
        for (i, (h, v)) in factors.iter().enumerate() {
            payload.extend_from_slice(&[i as u8 + 1, (h << 4) | v, 0]);
        }
        segment(0xC0, &payload)
    }

    /// Header-only stream: SOI APP0 [extra] SOF0 SOS <data> EOI
    pub(crate) fn header_stream(extra: &[Vec<u8>], factors: [(u8, u8); 3]) -> Vec<u8> {
        let mut out = vec![0xFF, JPEG_SOI];
        out.extend(segment(JPEG_APP0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
        for seg in extra {
            out.extend_from_slice(seg);
        }
        out.extend(sof(factors));
        out.extend(segment(JPEG_SOS, &[1, 1, 0, 0, 63, 0]));
        out.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56]);
        out.extend_from_slice(&[0xFF, JPEG_EOI]);
        out
    }

    const S420: [(u8, u8); 3] = [(2, 2), (1, 1), (1, 1)];

    #[test]
    fn test_magic() {
        assert!(has_jpeg_magic(&[0xFF, 0xD8, 0xFF]));
        assert!(!has_jpeg_magic(&[0xFF]));
        assert!(!has_jpeg_magic(b"\x89PNG"));
        assert_eq!(JpegMarkers::scan(b"GIF89a").unwrap_err(), Error::NotJpeg);
    }

    #[test]
    fn test_cursor_bounds() {
        let mut c = Cursor::new(&[0x12, 0x34, 0x56]);
        assert_eq!(c.read_u16_be().unwrap(), 0x1234);
        assert_eq!(c.remaining(), 1);
        assert_eq!(c.read_bytes(2), Err(Error::Truncated { offset: 3 }));
        assert_eq!(c.read_u8().unwrap(), 0x56);
        assert_eq!(c.read_u8(), Err(Error::Truncated { offset: 3 }));
        assert_eq!(c.read_bytes(usize::MAX), Err(Error::Truncated { offset: 3 }));
    }

    #[test]
    fn test_read_marker_skips_fill_and_garbage() {
        let mut c = Cursor::new(&[0x00, 0x11, 0xFF, 0xFF, 0xFF, 0xE1]);
        assert_eq!(c.read_marker().unwrap(), (0xE1, 4));
        assert_eq!(c.position(), 6);
    }

    #[test]
    fn test_find_app0() {
        let data = header_stream(&[], S420);
        let range = find_app0(&data).unwrap();
        assert_eq!(range, 2..20);
        assert_eq!(&data[range.start..range.start + 2], &[0xFF, JPEG_APP0]);

        let mut no_app0 = vec![0xFF, JPEG_SOI];
        no_app0.extend(segment(0xE1, b"Exif\0\0"));
        assert_eq!(find_app0(&no_app0), Err(Error::MissingApp0));

        let truncated = &data[..10];
        assert!(matches!(find_app0(truncated), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_scan_collects_metadata_in_order() {
        let exif = segment(0xE1, b"Exif\0\0II*\0");
        let icc = segment(0xE2, b"ICC_PROFILE\0\x01\x01abc");
        let com = segment(JPEG_COM, b"hello");
        let dqt = segment(0xDB, &[0; 65]);
        let data = header_stream(&[exif.clone(), dqt, icc.clone(), com.clone()], S420);

        let markers = JpegMarkers::scan(&data).unwrap();
        assert!(!markers.already_processed);
        assert_eq!(markers.metadata.segment_count(), 3);
        let expected: Vec<u8> = [exif, icc, com].concat();
        assert_eq!(markers.metadata.as_bytes(), expected.as_slice());
        assert_eq!(markers.frame.as_ref().unwrap().width, 16);
    }

    #[test]
    fn test_scan_detects_sentinel_prefix() {
        let mut payload = SENTINEL.as_bytes().to_vec();
        payload.extend_from_slice(b" v2");
        let data = header_stream(&[segment(JPEG_COM, &payload)], S420);
        let markers = JpegMarkers::scan(&data).unwrap();
        assert!(markers.already_processed);
        assert!(markers.metadata.is_empty());

        let data = header_stream(&[segment(JPEG_COM, b"Compressed by")], S420);
        assert!(!JpegMarkers::scan(&data).unwrap().already_processed);
    }

    #[test]
    fn test_jfif_fields() {
        let markers = JpegMarkers::scan(&header_stream(&[], S420)).unwrap();
        assert_eq!(
            markers.jfif,
            Some(JfifHeader {
                version: (1, 1),
                density_unit: 0,
                x_density: 1,
                y_density: 1,
            })
        );

        assert_eq!(JfifHeader::parse(b"JFXX\0\x10"), None);
        assert_eq!(JfifHeader::parse(b"JFIF\0\x01\x02\x01\x01"), None);
        let dpi = JfifHeader::parse(b"JFIF\0\x01\x02\x01\x00\x48\x00\x60\0\0").unwrap();
        assert_eq!((dpi.x_density, dpi.y_density), (72, 96));
    }

    #[test]
    fn test_scan_rejects_bad_lengths() {
        let mut data = header_stream(&[], S420);
        let cut = data.len() - 30;
        data.truncate(cut);
        assert!(matches!(
            JpegMarkers::scan(&data),
            Err(Error::Truncated { .. })
        ));

        let mut data = vec![0xFF, JPEG_SOI, 0xFF, 0xE1, 0x00, 0x01];
        data.extend_from_slice(&[0xFF, JPEG_EOI]);
        assert_eq!(
            JpegMarkers::scan(&data).unwrap_err(),
            Error::MalformedSegment {
                marker: 0xE1,
                offset: 2
            }
        );
    }

    #[test]
    fn test_detect_subsampling() {
        let cases = [
            ([(1, 1), (1, 1), (1, 1)], SubsamplingMode::Full444),
            ([(2, 1), (1, 1), (1, 1)], SubsamplingMode::Horizontal422),
            (S420, SubsamplingMode::Default420),
            ([(4, 1), (1, 1), (1, 1)], SubsamplingMode::Default420),
        ];
        for (factors, expected) in cases {
            assert_eq!(detect_subsampling(&header_stream(&[], factors)), expected);
        }
        assert_eq!(detect_subsampling(b"nope"), SubsamplingMode::Default420);
    }

    #[test]
    fn test_color_space_inference() {
        let mut data = vec![0xFF, JPEG_SOI];
        data.extend(segment(JPEG_APP14, b"Adobe\0\x64\0\0\0\0\x02"));
        data.extend(segment(0xC0, &[8, 0, 8, 0, 8, 4, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11, 0, 4, 0x11, 0]));
        data.extend_from_slice(&[0xFF, JPEG_EOI]);
        let markers = JpegMarkers::scan(&data).unwrap();
        assert_eq!(markers.adobe_transform, Some(2));
        assert_eq!(markers.color_space(), ColorSpace::Ycck);
        assert!(!markers.color_space().is_convertible());

        let ycc = JpegMarkers::scan(&header_stream(&[], S420)).unwrap();
        assert_eq!(ycc.color_space(), ColorSpace::YCbCr);
    }

    proptest! {
        #[test]
        fn scan_never_panics(tail in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut data = vec![0xFF, JPEG_SOI];
            data.extend(tail);
            let _ = JpegMarkers::scan(&data);
            let _ = detect_subsampling(&data);
            let _ = find_app0(&data);
        }

        #[test]
        fn metadata_is_verbatim(payloads in proptest::collection::vec(
            (0xE1u8..=0xEF, proptest::collection::vec(any::<u8>(), 0..64)), 0..6)
        ) {
            let segments: Vec<Vec<u8>> =
                payloads.iter().map(|(m, p)| segment(*m, p)).collect();
            let data = header_stream(&segments, S420);
            let markers = JpegMarkers::scan(&data).unwrap();
            let joined = segments.concat();
            prop_assert_eq!(markers.metadata.as_bytes(), joined.as_slice());
            prop_assert_eq!(markers.metadata.segment_count(), segments.len());
        }
    }
}
