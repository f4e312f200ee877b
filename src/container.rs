//! Final output assembly.
//!
//! The encoder's stream is split after its APP0 segment and rebuilt as
//!
//! ```text
//! SOI APP0 | COM "<sentinel>" | original APPn/COM segments | rest of encode
//! ```
//!
//! so the output keeps the encoder's JFIF header, carries the idempotence
//! comment, and preserves EXIF/ICC/XMP bytes exactly as they were.

use crate::error::{Error, Result};
use crate::marker::{find_app0, MetadataBlob, JPEG_COM, SENTINEL};

/// Splices the sentinel comment and `metadata` into `encoded`.
///
/// `metadata` is left out when `strip` is set; APP0 and the sentinel are
/// always written.
///
/// # Errors
///
/// - [`Error::MissingApp0`] if `encoded` does not start with SOI + APP0
/// - [`Error::AllocationFailed`] if the output cannot be allocated
pub fn assemble(encoded: &[u8], metadata: &MetadataBlob, strip: bool) -> Result<Vec<u8>> {
    let app0 = find_app0(encoded).map_err(|e| match e {
        Error::NotJpeg => Error::MissingApp0,
        other => other,
    })?;
    let (head, tail) = encoded.split_at(app0.end);
    let preserved = if strip { &[][..] } else { metadata.as_bytes() };

    // length field counts itself
    let comment_len = u16::try_from(SENTINEL.len() + 2)
        .map_err(|_| Error::Internal("sentinel does not fit a COM segment"))?;
    let total = head.len() + 4 + SENTINEL.len() + preserved.len() + tail.len();

    let mut out = Vec::new();
    out.try_reserve_exact(total)?;
    out.extend_from_slice(head);
    out.extend_from_slice(&[0xFF, JPEG_COM]);
    out.extend_from_slice(&comment_len.to_be_bytes());
    out.extend_from_slice(SENTINEL.as_bytes());
    out.extend_from_slice(preserved);
    out.extend_from_slice(tail);
    debug_assert_eq!(out.len(), total);

    tracing::trace!(
        "assembled {} bytes: APP0 {}, metadata {}{}",
        out.len(),
        app0.len(),
        preserved.len(),
        if strip { " (stripped)" } else { "" }
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::tests::{header_stream, segment};
    use crate::marker::{JpegMarkers, JPEG_APP0};

    const S420: [(u8, u8); 3] = [(2, 2), (1, 1), (1, 1)];

    fn exif_and_comment() -> Vec<Vec<u8>> {
        vec![
            segment(0xE1, b"Exif\0\0MM\0*\0\0\0\x08"),
            segment(JPEG_COM, b"hello"),
        ]
    }

    #[test]
    fn test_layout_and_length() {
        let source = header_stream(&exif_and_comment(), S420);
        let metadata = JpegMarkers::scan(&source).unwrap().metadata;
        let encoded = header_stream(&[], S420);
        let app0 = find_app0(&encoded).unwrap();

        let out = assemble(&encoded, &metadata, false).unwrap();
        assert_eq!(
            out.len(),
            app0.end + 4 + SENTINEL.len() + metadata.len() + (encoded.len() - app0.end)
        );
        // SOI + APP0 are the encoder's bytes
        assert_eq!(&out[..app0.end], &encoded[..app0.end]);

        let com = &out[app0.end..app0.end + 4 + SENTINEL.len()];
        assert_eq!(&com[..2], &[0xFF, JPEG_COM]);
        assert_eq!(
            u16::from_be_bytes([com[2], com[3]]) as usize,
            SENTINEL.len() + 2
        );
        assert_eq!(&com[4..], SENTINEL.as_bytes());

        let meta_start = app0.end + com.len();
        assert_eq!(
            &out[meta_start..meta_start + metadata.len()],
            metadata.as_bytes()
        );
        assert_eq!(&out[meta_start + metadata.len()..], &encoded[app0.end..]);
    }

    #[test]
    fn test_output_is_marked_and_keeps_metadata() {
        let source = header_stream(&exif_and_comment(), S420);
        let metadata = JpegMarkers::scan(&source).unwrap().metadata;
        let out = assemble(&header_stream(&[], S420), &metadata, false).unwrap();

        let rescanned = JpegMarkers::scan(&out).unwrap();
        assert!(rescanned.already_processed);
        // the sentinel comment itself is not metadata
        assert_eq!(rescanned.metadata, metadata);
        assert_eq!(rescanned.metadata.segment_count(), 2);
    }

    #[test]
    fn test_strip_drops_metadata() {
        let source = header_stream(&exif_and_comment(), S420);
        let metadata = JpegMarkers::scan(&source).unwrap().metadata;
        let encoded = header_stream(&[], S420);
        let out = assemble(&encoded, &metadata, true).unwrap();
        assert_eq!(out.len(), encoded.len() + 4 + SENTINEL.len());

        let rescanned = JpegMarkers::scan(&out).unwrap();
        assert!(rescanned.already_processed);
        assert!(rescanned.metadata.is_empty());
    }

    #[test]
    fn test_requires_app0() {
        let empty = MetadataBlob::default();
        let mut no_app0 = vec![0xFF, 0xD8];
        no_app0.extend(segment(0xE1, b"Exif\0\0"));
        assert_eq!(assemble(&no_app0, &empty, false), Err(Error::MissingApp0));
        assert_eq!(assemble(b"not a jpeg", &empty, false), Err(Error::MissingApp0));
        assert_eq!(
            Error::MissingApp0.code(),
            crate::error::ErrorCode::UnknownError
        );

        let truncated = [0xFF, 0xD8, 0xFF, JPEG_APP0, 0x00, 0x10, 0x4A];
        assert!(matches!(
            assemble(&truncated, &empty, false),
            Err(Error::Truncated { .. })
        ));
    }
}
