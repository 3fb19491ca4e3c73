//! Media samples and the per-sample decrypt information attached to them.

/// One clear/cipher span of a CENC subsample mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleEntry {
    pub clear_bytes: u16,
    pub cipher_bytes: u32,
}

/// Decryption parameters carried by an encrypted sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptConfig {
    pub key_id: Vec<u8>,
    pub iv: Vec<u8>,
    pub subsamples: Vec<SubsampleEntry>,
}

/// One audio frame or video access unit.
///
/// Timestamps are in the track time scale and may be negative before PTS
/// normalization. A sample with empty data denotes end-of-stream.
#[derive(Debug, Clone, Default)]
pub struct MediaSample {
    dts: i64,
    pts: i64,
    duration: i64,
    is_key_frame: bool,
    data: Vec<u8>,
    side_data: Option<Vec<u8>>,
    decrypt_config: Option<DecryptConfig>,
}

impl MediaSample {
    /// Create a sample by copying `data`.
    pub fn copy_from(data: &[u8], is_key_frame: bool) -> Self {
        Self {
            is_key_frame,
            data: data.to_vec(),
            ..Default::default()
        }
    }

    /// Create a sample taking ownership of `data`.
    pub fn from_data(data: Vec<u8>, is_key_frame: bool) -> Self {
        Self {
            is_key_frame,
            data,
            ..Default::default()
        }
    }

    /// The end-of-stream marker sample.
    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn is_key_frame(&self) -> bool {
        self.is_key_frame
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload access; encryption rewrites sample bytes in place.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn side_data(&self) -> Option<&[u8]> {
        self.side_data.as_deref()
    }

    pub fn set_side_data(&mut self, side_data: Vec<u8>) {
        self.side_data = Some(side_data);
    }

    pub fn decrypt_config(&self) -> Option<&DecryptConfig> {
        self.decrypt_config.as_ref()
    }

    pub fn set_decrypt_config(&mut self, config: DecryptConfig) {
        self.decrypt_config = Some(config);
    }
}

impl std::fmt::Display for MediaSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dts {} pts {} duration {} key_frame {} size {}",
            self.dts,
            self.pts,
            self.duration,
            self.is_key_frame,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_marker() {
        assert!(MediaSample::end_of_stream().is_end_of_stream());
        assert!(!MediaSample::copy_from(&[1], true).is_end_of_stream());
    }
}
