//! Content key acquisition for CENC.
//!
//! The pipeline only consumes `(key_id, key, iv, pssh)` tuples; how they are
//! obtained is the caller's business. The fixed-key source wraps key material
//! supplied as hex strings on the command line.

use bytes::Bytes;

use crate::buffer::BufferWriter;
use crate::error::{Error, Result};

/// Widevine protection system ID, used when wrapping raw pssh data into a
/// full `pssh` box.
pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21,
    0xed,
];

/// Content key classes a key source can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Sd,
    Hd,
    Audio,
    Unknown,
}

impl TrackType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "SD" => Self::Sd,
            "HD" => Self::Hd,
            "AUDIO" => Self::Audio,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sd => "SD",
            Self::Hd => "HD",
            Self::Audio => "AUDIO",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One content key with its DRM init data.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub key_id: Bytes,
    /// 16-byte AES key.
    pub key: Bytes,
    /// Initial IV; empty means "generate a random 8-byte IV".
    pub iv: Bytes,
    /// Full `pssh` box bytes, written verbatim under `moov`/`moof`.
    pub pssh: Bytes,
}

/// Provider of content keys, shared read-only across workers.
pub trait KeySource: Send + Sync {
    /// Fetch the key for the given track class.
    fn get_key(&self, track_type: TrackType) -> Result<EncryptionKey>;

    /// Fetch the key for one crypto period when key rotation is enabled.
    fn get_crypto_period_key(
        &self,
        crypto_period_index: u32,
        track_type: TrackType,
    ) -> Result<EncryptionKey>;
}

/// Key source serving one fixed key for every request.
pub struct FixedKeySource {
    key: EncryptionKey,
}

impl FixedKeySource {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Build a fixed key source from hex-encoded key material. The pssh data
    /// is wrapped into a full `pssh` box under the Widevine system ID.
    pub fn from_hex_strings(
        key_id_hex: &str,
        key_hex: &str,
        pssh_data_hex: &str,
        iv_hex: Option<&str>,
    ) -> Result<Self> {
        let key_id = decode_hex("key_id", key_id_hex)?;
        let key = decode_hex("key", key_hex)?;
        let pssh_data = decode_hex("pssh", pssh_data_hex)?;
        let iv = match iv_hex {
            Some(hex) if !hex.is_empty() => decode_hex("iv", hex)?,
            _ => Vec::new(),
        };
        Ok(Self::new(EncryptionKey {
            key_id: key_id.into(),
            key: key.into(),
            iv: iv.into(),
            pssh: pssh_box_from_pssh_data(&pssh_data).into(),
        }))
    }
}

impl KeySource for FixedKeySource {
    fn get_key(&self, _track_type: TrackType) -> Result<EncryptionKey> {
        Ok(self.key.clone())
    }

    fn get_crypto_period_key(
        &self,
        _crypto_period_index: u32,
        _track_type: TrackType,
    ) -> Result<EncryptionKey> {
        Err(Error::Unimplemented(
            "fixed key source does not support key rotation".into(),
        ))
    }
}

fn decode_hex(name: &str, hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str)
        .map_err(|_| Error::InvalidArgument(format!("cannot parse {name} hex string: {hex_str}")))
}

/// Wrap raw protection-system data into a full `pssh` box with the Widevine
/// system ID.
pub fn pssh_box_from_pssh_data(pssh_data: &[u8]) -> Vec<u8> {
    const PSSH_FOURCC: &[u8; 4] = b"pssh";
    const VERSION_AND_FLAGS: u32 = 0;

    let total_size = (4 + 4 + 4 + WIDEVINE_SYSTEM_ID.len() + 4 + pssh_data.len()) as u32;
    let mut writer = BufferWriter::with_capacity(total_size as usize);
    writer.append_u32(total_size);
    writer.append_slice(PSSH_FOURCC);
    writer.append_u32(VERSION_AND_FLAGS);
    writer.append_slice(&WIDEVINE_SYSTEM_ID);
    writer.append_u32(pssh_data.len() as u32);
    writer.append_slice(pssh_data);
    writer.buffer().to_vec()
}
