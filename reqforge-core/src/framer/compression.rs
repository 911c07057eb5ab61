//! Response body compression.

use serde::{Deserialize, Serialize};
use std::io::Write;

/// Body encoding selected for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Body is sent as-is.
    #[default]
    None,
    /// `Content-Encoding: gzip`.
    Gzip,
    /// `Content-Encoding: deflate`.
    Deflate,
    /// `Content-Encoding: br`.
    #[serde(rename = "br")]
    Brotli,
}

impl Compression {
    /// The `Content-Encoding` token, or `None` for an uncompressed body.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
            Compression::Deflate => Some("deflate"),
            Compression::Brotli => Some("br"),
        }
    }

    /// Picks the best encoding an `Accept-Encoding` value allows.
    ///
    /// Preference is br, then gzip, then deflate. Codings listed with
    /// `q=0` are treated as refused.
    pub fn negotiate(accept_encoding: &str) -> Compression {
        [Compression::Brotli, Compression::Gzip, Compression::Deflate]
            .into_iter()
            .find(|c| c.accepted_by(accept_encoding))
            .unwrap_or(Compression::None)
    }

    /// Returns `true` if `accept_encoding` allows this encoding.
    pub fn accepted_by(self, accept_encoding: &str) -> bool {
        let Some(token) = self.token() else {
            return true;
        };
        accept_encoding.split(',').any(|item| {
            let mut parts = item.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            let refused = parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            !refused && (coding.eq_ignore_ascii_case(token) || coding == "*")
        })
    }

    /// Compresses `body`. Returns `None` for [`Compression::None`] or when
    /// the encoder fails.
    pub fn compress(self, body: &[u8]) -> Option<Vec<u8>> {
        match self {
            Compression::None => None,
            Compression::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(body.len()),
                    flate2::Compression::default(),
                );
                encoder.write_all(body).ok()?;
                encoder.finish().ok()
            }
            Compression::Deflate => {
                let mut encoder = flate2::write::DeflateEncoder::new(
                    Vec::with_capacity(body.len()),
                    flate2::Compression::default(),
                );
                encoder.write_all(body).ok()?;
                encoder.finish().ok()
            }
            Compression::Brotli => {
                let mut compressed = Vec::with_capacity(body.len());
                let params = brotli::enc::BrotliEncoderParams {
                    quality: 5,
                    ..Default::default()
                };
                let mut input = std::io::Cursor::new(body);
                brotli::BrotliCompress(&mut input, &mut compressed, &params).ok()?;
                Some(compressed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_negotiate_preference() {
        assert_eq!(Compression::negotiate("gzip, deflate, br"), Compression::Brotli);
        assert_eq!(Compression::negotiate("deflate, gzip"), Compression::Gzip);
        assert_eq!(Compression::negotiate("deflate"), Compression::Deflate);
        assert_eq!(Compression::negotiate("identity"), Compression::None);
        assert_eq!(Compression::negotiate(""), Compression::None);
    }

    #[test]
    fn test_negotiate_respects_q_zero() {
        assert_eq!(Compression::negotiate("br;q=0, gzip;q=0.8"), Compression::Gzip);
        assert_eq!(Compression::negotiate("*"), Compression::Brotli);
    }

    #[test]
    fn test_gzip_decodes_back() {
        let body = b"hello hello hello hello hello".repeat(20);
        let compressed = Compression::Gzip.compress(&body).unwrap();
        assert!(compressed.len() < body.len());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_brotli_decodes_back() {
        let body = b"{\"items\":[1,2,3,4,5,6,7,8,9]}".repeat(10);
        let compressed = Compression::Brotli.compress(&body).unwrap();

        let mut decoded = Vec::new();
        brotli::Decompressor::new(&compressed[..], 4096)
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_none_does_not_compress() {
        assert!(Compression::None.compress(b"abc").is_none());
        assert_eq!(Compression::None.token(), None);
    }

    #[test]
    fn test_config_names() {
        let c: Compression = serde_json::from_str("\"br\"").unwrap();
        assert_eq!(c, Compression::Brotli);
        let c: Compression = serde_json::from_str("\"gzip\"").unwrap();
        assert_eq!(c, Compression::Gzip);
    }
}
