//! Receipt handle codec
//!
//! A receipt handle names exactly one delivery of one message:
//! `(queue id, message id, delivery epoch)`. The encoded form is
//!
//! ```text
//! version:u8 | epoch:u64be | qlen:u16be | queue id | mlen:u16be | message id | hmac-sha256
//! ```
//!
//! encoded as URL-safe base64 without padding. The trailing tag is keyed by a
//! per-service secret, so clients can neither forge a handle nor move one to
//! another message or epoch.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::digest::Key;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 1;
const TAG_LEN: usize = 32;
const MIN_LEN: usize = 1 + 8 + 2 + 2 + TAG_LEN;

/// Longest queue or message id a handle can carry
pub const MAX_ID_LEN: usize = u16::MAX as usize;

/// Base64 length of the largest well-formed handle
const MAX_ENCODED_LEN: usize = ((MIN_LEN + 2 * MAX_ID_LEN) * 4 + 2) / 3;

/// Whether `id` fits the length prefix of the handle layout
pub fn fits_in_handle(id: &str) -> bool {
    id.len() <= MAX_ID_LEN
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Receipt handle is empty")]
    Empty,

    #[error("Receipt handle is too long")]
    TooLong,

    #[error("Receipt handle is not valid base64")]
    Encoding,

    #[error("Receipt handle is truncated")]
    Truncated,

    #[error("Receipt handle checksum mismatch")]
    TagMismatch,

    #[error("Unsupported receipt handle version: {0}")]
    UnsupportedVersion(u8),

    #[error("Receipt handle is malformed: {0}")]
    Malformed(&'static str),

    #[error("Receipt secret must not be empty")]
    EmptySecret,
}

/// Decoded receipt handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    pub queue_id: String,
    pub message_id: String,
    pub epoch: u64,
}

impl ReceiptHandle {
    pub fn new(queue_id: impl Into<String>, message_id: impl Into<String>, epoch: u64) -> Self {
        Self {
            queue_id: queue_id.into(),
            message_id: message_id.into(),
            epoch,
        }
    }
}

/// Mints and validates receipt handles
#[derive(Clone)]
pub struct ReceiptCodec {
    mac: HmacSha256,
}

impl std::fmt::Debug for ReceiptCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptCodec").finish_non_exhaustive()
    }
}

impl ReceiptCodec {
    pub fn new(secret: &[u8]) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| CodecError::EmptySecret)?;
        Ok(Self { mac })
    }

    /// Codec keyed by a fresh random secret; handles die with the process
    pub fn random() -> Self {
        let mut key = Key::<HmacSha256>::default();
        for chunk in key.chunks_mut(16) {
            chunk.copy_from_slice(Uuid::new_v4().as_bytes());
        }
        Self {
            mac: <HmacSha256 as Mac>::new(&key),
        }
    }

    /// Ids longer than [`MAX_ID_LEN`] are truncated to the length prefix and
    /// produce a handle that fails to decode; stores reject such ids when
    /// minting them.
    pub fn encode(&self, handle: &ReceiptHandle) -> String {
        let mut buf = Vec::with_capacity(
            MIN_LEN + handle.queue_id.len() + handle.message_id.len(),
        );
        buf.push(VERSION);
        buf.extend_from_slice(&handle.epoch.to_be_bytes());
        put_field(&mut buf, handle.queue_id.as_bytes());
        put_field(&mut buf, handle.message_id.as_bytes());

        let mut mac = self.mac.clone();
        mac.update(&buf);
        buf.extend_from_slice(&mac.finalize().into_bytes());

        URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode(&self, encoded: &str) -> Result<ReceiptHandle, CodecError> {
        if encoded.is_empty() {
            return Err(CodecError::Empty);
        }
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(CodecError::TooLong);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CodecError::Encoding)?;
        if raw.len() < MIN_LEN {
            return Err(CodecError::Truncated);
        }

        let (body, tag) = raw.split_at(raw.len() - TAG_LEN);
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| CodecError::TagMismatch)?;

        let mut reader = Reader { buf: body };
        let version = reader.u8()?;
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let epoch = reader.u64()?;
        let queue_id = reader.field()?;
        let message_id = reader.field()?;
        if !reader.buf.is_empty() {
            return Err(CodecError::Malformed("trailing bytes"));
        }

        Ok(ReceiptHandle {
            queue_id,
            message_id,
            epoch,
        })
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) {
    let len = u16::try_from(field.len()).unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(field);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Malformed("field overruns handle"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }

    fn field(&mut self) -> Result<String, CodecError> {
        let mut len = [0u8; 2];
        len.copy_from_slice(self.take(2)?);
        let bytes = self.take(usize::from(u16::from_be_bytes(len)))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::Malformed("id is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ReceiptCodec {
        ReceiptCodec::new(b"test-secret").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let handle = ReceiptHandle::new("q-1", "5f0c7a4e-0d4b-4c5b-9d6e-1b2c3d4e5f60", 7);

        let encoded = codec.encode(&handle);
        assert_eq!(codec.decode(&encoded).unwrap(), handle);
    }

    #[test]
    fn test_round_trip_extremes() {
        let codec = codec();
        for handle in [
            ReceiptHandle::new("", "", 0),
            ReceiptHandle::new("q", "m", u64::MAX),
            ReceiptHandle::new("キュー", "メッセージ", 1),
        ] {
            assert_eq!(codec.decode(&codec.encode(&handle)).unwrap(), handle);
        }
    }

    #[test]
    fn test_round_trip_long_ids() {
        let codec = codec();
        for handle in [
            ReceiptHandle::new("q", "x".repeat(800), 1),
            ReceiptHandle::new("q".repeat(4096), "m".repeat(4096), 2),
            ReceiptHandle::new("q".repeat(MAX_ID_LEN), "m".repeat(MAX_ID_LEN), 3),
        ] {
            assert_eq!(codec.decode(&codec.encode(&handle)).unwrap(), handle);
        }
    }

    #[test]
    fn test_oversized_id_does_not_fit() {
        assert!(fits_in_handle(&"x".repeat(MAX_ID_LEN)));
        assert!(!fits_in_handle(&"x".repeat(MAX_ID_LEN + 1)));
    }

    #[test]
    fn test_encoding_is_transport_safe() {
        let encoded = codec().encode(&ReceiptHandle::new("q", "m", 1));
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_distinct_epochs_give_distinct_handles() {
        let codec = codec();
        let h1 = codec.encode(&ReceiptHandle::new("q", "m", 1));
        let h2 = codec.encode(&ReceiptHandle::new("q", "m", 2));
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_rejects_tampered_bytes() {
        let codec = codec();
        let encoded = codec.encode(&ReceiptHandle::new("q", "m", 3));
        let raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let result = codec.decode(&URL_SAFE_NO_PAD.encode(&tampered));
            assert_eq!(result, Err(CodecError::TagMismatch), "byte {i}");
        }
    }

    #[test]
    fn test_rejects_handle_from_other_key() {
        let other = ReceiptCodec::new(b"another-secret").unwrap();
        let encoded = other.encode(&ReceiptHandle::new("q", "m", 1));
        assert_eq!(codec().decode(&encoded), Err(CodecError::TagMismatch));
    }

    #[test]
    fn test_rejects_garbage() {
        let codec = codec();
        assert_eq!(codec.decode(""), Err(CodecError::Empty));
        assert_eq!(codec.decode("not base64!"), Err(CodecError::Encoding));
        assert_eq!(codec.decode("AAAA"), Err(CodecError::Truncated));
        assert_eq!(
            codec.decode(&"A".repeat(MAX_ENCODED_LEN + 1)),
            Err(CodecError::TooLong)
        );

        let forged = URL_SAFE_NO_PAD.encode([0u8; MIN_LEN + 8]);
        assert_eq!(codec.decode(&forged), Err(CodecError::TagMismatch));
    }

    #[test]
    fn test_rejects_padded_and_truncated_forms() {
        let codec = codec();
        let encoded = codec.encode(&ReceiptHandle::new("q", "m", 1));

        assert!(codec.decode(&format!("{encoded}=")).is_err());
        assert!(codec.decode(&encoded[..encoded.len() - 4]).is_err());
    }

    #[test]
    fn test_random_codecs_do_not_share_keys() {
        let a = ReceiptCodec::random();
        let b = ReceiptCodec::random();
        let encoded = a.encode(&ReceiptHandle::new("q", "m", 1));
        assert!(a.decode(&encoded).is_ok());
        assert!(b.decode(&encoded).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(ReceiptCodec::new(b"").unwrap_err(), CodecError::EmptySecret);
    }
}
