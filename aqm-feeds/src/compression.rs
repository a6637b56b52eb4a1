/// Transparent gzip inflation for upstream payloads
use crate::error::{FeedError, Result};
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::io::Read;

/// First two bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns true if the payload starts with the gzip magic bytes.
pub fn is_gzip(input: &[u8]) -> bool {
    input.len() >= 2 && input[..2] == GZIP_MAGIC
}

/// Inflates gzip payloads and passes everything else through untouched.
///
/// Some exports are published as `.csv.gz`; decoders never need to care.
///
/// # Errors
///
/// Returns `FeedError::Decode` if the payload claims to be gzip but the
/// stream is corrupt.
pub fn maybe_inflate<'a>(feed: &str, input: &'a [u8]) -> Result<Cow<'a, [u8]>> {
    if !is_gzip(input) {
        return Ok(Cow::Borrowed(input));
    }
    let mut decoder = GzDecoder::new(input);
    let mut buf: Vec<u8> = Vec::new();
    decoder
        .read_to_end(&mut buf)
        .map_err(|e| FeedError::decode(feed, format!("gzip inflation failed: {}", e)))?;
    Ok(Cow::Owned(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_plain_payload_passes_through() {
        let out = maybe_inflate("t", b"a,b\n1,2\n").unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, b"a,b\n1,2\n");
    }

    #[test]
    fn test_gzip_payload_is_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(is_gzip(&compressed));
        let out = maybe_inflate("t", &compressed).unwrap();
        assert_eq!(&*out, b"a,b\n1,2\n");
    }

    #[test]
    fn test_corrupt_gzip_is_decode_error() {
        let err = maybe_inflate("t", &[0x1f, 0x8b, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, FeedError::Decode { .. }));
    }
}
