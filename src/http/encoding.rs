//! Content-Encoding codecs for response rewriting.
//!
//! Codec work is CPU bound and runs on the blocking pool.

use std::io::{Read, Write};

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unsupported content encoding '{0}'")]
    Unsupported(String),

    #[error("codec failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A supported `Content-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value. Absent means identity.
    pub fn parse(value: Option<&str>) -> Result<Self, EncodingError> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Ok(Self::Identity),
            Some("gzip") | Some("x-gzip") => Ok(Self::Gzip),
            Some("deflate") => Ok(Self::Deflate),
            Some("br") => Ok(Self::Brotli),
            Some(other) => Err(EncodingError::Unsupported(other.to_string())),
        }
    }
}

/// Decode a body according to its encoding.
pub async fn decode(encoding: ContentEncoding, body: Bytes) -> Result<Bytes, EncodingError> {
    if encoding == ContentEncoding::Identity {
        return Ok(body);
    }
    tokio::task::spawn_blocking(move || decode_blocking(encoding, &body)).await?
}

/// Encode a body with the given encoding.
pub async fn encode(encoding: ContentEncoding, body: Bytes) -> Result<Bytes, EncodingError> {
    if encoding == ContentEncoding::Identity {
        return Ok(body);
    }
    tokio::task::spawn_blocking(move || encode_blocking(encoding, &body)).await?
}

fn decode_blocking(encoding: ContentEncoding, body: &[u8]) -> Result<Bytes, EncodingError> {
    let mut out = Vec::new();
    match encoding {
        ContentEncoding::Identity => out.extend_from_slice(body),
        ContentEncoding::Gzip => {
            flate2::read::GzDecoder::new(body).read_to_end(&mut out)?;
        }
        ContentEncoding::Deflate => {
            flate2::read::ZlibDecoder::new(body).read_to_end(&mut out)?;
        }
        ContentEncoding::Brotli => {
            let mut input = body;
            brotli::BrotliDecompress(&mut input, &mut out)?;
        }
    }
    Ok(Bytes::from(out))
}

fn encode_blocking(encoding: ContentEncoding, body: &[u8]) -> Result<Bytes, EncodingError> {
    let out = match encoding {
        ContentEncoding::Identity => body.to_vec(),
        ContentEncoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(body)?;
            encoder.finish()?
        }
        ContentEncoding::Deflate => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(body)?;
            encoder.finish()?
        }
        ContentEncoding::Brotli => {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            let mut input = body;
            brotli::BrotliCompress(&mut input, &mut out, &params)?;
            out
        }
    };
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_values() {
        assert_eq!(ContentEncoding::parse(None).unwrap(), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::parse(Some("GZIP")).unwrap(), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::parse(Some("br")).unwrap(), ContentEncoding::Brotli);
        assert!(ContentEncoding::parse(Some("zstd")).is_err());
    }

    #[tokio::test]
    async fn every_codec_restores_the_body() {
        let body = Bytes::from_static(b"<html><head></head><body>hello</body></html>");
        for encoding in [ContentEncoding::Gzip, ContentEncoding::Deflate, ContentEncoding::Brotli] {
            let packed = encode(encoding, body.clone()).await.unwrap();
            assert_ne!(packed, body);
            assert_eq!(decode(encoding, packed).await.unwrap(), body);
        }
    }

    #[tokio::test]
    async fn corrupt_input_is_an_error() {
        assert!(decode(ContentEncoding::Gzip, Bytes::from_static(b"nope")).await.is_err());
    }
}
