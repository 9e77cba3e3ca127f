//! Message serialization capability.
//!
//! Publishers and subscribers are generic over the message type through the
//! [`Serializer`] trait. A topic channel's payload width is fixed at
//! creation, so `serialized_size` must report a width every value of the
//! type fits in, not the width of one particular value.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use thiserror::Error;

/// Message codec failures
#[derive(Error, Debug)]
pub enum CodecError {
    /// Destination buffer smaller than the encoded message
    #[error("buffer too small: need {needed} bytes, have {got}")]
    BufferTooSmall {
        /// Bytes the encoding requires
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Channel payload width does not match the codec's width
    #[error("payload size mismatch: channel carries {channel} bytes, codec needs {codec}")]
    SizeMismatch {
        /// Existing channel payload width
        channel: usize,
        /// Width this codec serializes to
        codec: usize,
    },

    /// JSON encode/decode failure
    #[error("JSON codec error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

/// External serialization capability over a message type.
pub trait Serializer<M>: Send + Sync + 'static {
    /// Fixed byte width the channel payload must accommodate.
    fn serialized_size(&self, msg: &M) -> usize;

    /// Encode `msg` into `buf`. `buf` is at least `serialized_size` bytes
    /// and starts zeroed; bytes past the encoding stay zero.
    fn serialize(&self, msg: &M, buf: &mut [u8]) -> Result<(), CodecError>;

    /// Decode a message from a full payload image.
    fn deserialize(&self, buf: &[u8]) -> Result<M, CodecError>;
}

/// JSON codec over any `serde`-capable message type.
///
/// Encodes into a fixed-capacity, NUL-padded slot so that values of
/// varying textual length share one channel width.
pub struct JsonCodec {
    capacity: usize,
}

/// Default payload capacity of a [`JsonCodec`] channel.
pub const JSON_CODEC_DEFAULT_CAPACITY: usize = 4096;

impl JsonCodec {
    /// Codec with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(JSON_CODEC_DEFAULT_CAPACITY)
    }

    /// Codec with an explicit payload capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Serialize + DeserializeOwned> Serializer<M> for JsonCodec {
    fn serialized_size(&self, _msg: &M) -> usize {
        self.capacity
    }

    fn serialize(&self, msg: &M, buf: &mut [u8]) -> Result<(), CodecError> {
        let encoded = serde_json::to_vec(msg)?;
        if encoded.len() > buf.len() {
            return Err(CodecError::BufferTooSmall {
                needed: encoded.len(),
                got: buf.len(),
            });
        }
        buf[..encoded.len()].copy_from_slice(&encoded);
        buf[encoded.len()..].fill(0);
        Ok(())
    }

    fn deserialize(&self, buf: &[u8]) -> Result<M, CodecError> {
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        Ok(serde_json::from_slice(&buf[..end])?)
    }
}

/// Host-native copy codec for plain-old-data messages.
///
/// The byte image is the in-memory representation, so this is only for
/// `#[repr(C)]` types whose every bit pattern of the written bytes is a
/// valid value (no references, no padding-dependent invariants). Layout is
/// host-native by design; the system never crosses an architecture
/// boundary.
pub struct PodCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> PodCodec<M> {
    /// Construct the codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for PodCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Copy + Send + Sync + 'static> Serializer<M> for PodCodec<M> {
    fn serialized_size(&self, _msg: &M) -> usize {
        std::mem::size_of::<M>()
    }

    fn serialize(&self, msg: &M, buf: &mut [u8]) -> Result<(), CodecError> {
        let needed = std::mem::size_of::<M>();
        if buf.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                (msg as *const M).cast::<u8>(),
                buf.as_mut_ptr(),
                needed,
            );
        }
        Ok(())
    }

    fn deserialize(&self, buf: &[u8]) -> Result<M, CodecError> {
        let needed = std::mem::size_of::<M>();
        if buf.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<M>()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_pads_and_trims() {
        let codec = JsonCodec::with_capacity(64);
        let mut buf = vec![0u8; 64];

        Serializer::<i32>::serialize(&codec, &7, &mut buf).unwrap();
        assert_eq!(&buf[..1], b"7");
        assert!(buf[1..].iter().all(|b| *b == 0));

        let value: i32 = codec.deserialize(&buf).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn json_codec_reports_fixed_width() {
        let codec = JsonCodec::with_capacity(128);
        assert_eq!(Serializer::<String>::serialized_size(&codec, &"a".into()), 128);
        assert_eq!(
            Serializer::<String>::serialized_size(&codec, &"a".repeat(100)),
            128
        );
    }

    #[test]
    fn json_codec_rejects_oversized_value() {
        let codec = JsonCodec::with_capacity(8);
        let mut buf = vec![0u8; 8];
        let err = codec
            .serialize(&"far too long for eight bytes".to_string(), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn json_codec_garbage_is_an_error() {
        let codec = JsonCodec::with_capacity(16);
        let err = Serializer::<i32>::deserialize(&codec, b"{oops\0\0\0").unwrap_err();
        assert!(matches!(err, CodecError::Json { .. }));
    }

    #[test]
    fn pod_codec_roundtrip() {
        #[derive(Clone, Copy, PartialEq, Debug)]
        #[repr(C)]
        struct Sample {
            seq: u64,
            value: f64,
        }

        let codec = PodCodec::<Sample>::new();
        let msg = Sample {
            seq: 42,
            value: -1.5,
        };
        let mut buf = vec![0u8; codec.serialized_size(&msg)];
        codec.serialize(&msg, &mut buf).unwrap();
        assert_eq!(codec.deserialize(&buf).unwrap(), msg);
    }

    #[test]
    fn pod_codec_short_buffer() {
        let codec = PodCodec::<u64>::new();
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            codec.serialize(&1u64, &mut buf),
            Err(CodecError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            codec.deserialize(&buf),
            Err(CodecError::BufferTooSmall { .. })
        ));
    }
}
