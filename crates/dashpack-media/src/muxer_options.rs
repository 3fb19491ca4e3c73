//! Options governing segmentation and output layout.

use crate::error::{Error, Result};

/// Options shared by all muxers of a packaging run.
#[derive(Debug, Clone)]
pub struct MuxerOptions {
    /// Generate a single output file containing all segments. Set for the
    /// DASH on-demand profile.
    pub single_segment: bool,

    /// Segment duration in seconds. With `single_segment` this is the
    /// subsegment duration. Actual durations are approximated upwards to the
    /// next acceptable sample boundary.
    pub segment_duration: f64,

    /// Fragment duration in seconds. Should not exceed the segment duration.
    pub fragment_duration: f64,

    /// Force segments to begin with stream access points.
    pub segment_sap_aligned: bool,

    /// Force fragments to begin with stream access points. Implies
    /// `segment_sap_aligned`.
    pub fragment_sap_aligned: bool,

    /// Subsegment count per `sidx`: 0 packs everything into one reference
    /// per segment, -1 omits the `sidx`, N > 0 packs N subsegments into the
    /// root `sidx`.
    pub num_subsegments_per_sidx: i32,

    /// Subtract the first observed PTS of each track from all its PTS.
    pub normalize_presentation_timestamp: bool,

    /// Output file. Without a segment template this receives the whole
    /// presentation; with one it receives the initialization segment.
    pub output_file_name: String,

    /// DASH segment-template pattern for per-segment file names. Optional.
    pub segment_template: String,

    /// Directory for the on-demand temp file; empty uses the OS default.
    pub temp_dir: String,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            single_segment: true,
            segment_duration: 10.0,
            fragment_duration: 2.0,
            segment_sap_aligned: true,
            fragment_sap_aligned: true,
            num_subsegments_per_sidx: 1,
            normalize_presentation_timestamp: true,
            output_file_name: String::new(),
            segment_template: String::new(),
            temp_dir: String::new(),
        }
    }
}

impl MuxerOptions {
    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.fragment_sap_aligned && !self.segment_sap_aligned {
            return Err(Error::InvalidArgument(
                "fragment_sap_aligned implies segment_sap_aligned".into(),
            ));
        }
        if self.fragment_duration > self.segment_duration {
            return Err(Error::InvalidArgument(format!(
                "fragment duration {} must not exceed segment duration {}",
                self.fragment_duration, self.segment_duration
            )));
        }
        if self.output_file_name.is_empty() {
            return Err(Error::InvalidArgument("output file name is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        let mut options = MuxerOptions::default();
        options.output_file_name = "out.mp4".into();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn sap_alignment_invariant() {
        let mut options = MuxerOptions::default();
        options.output_file_name = "out.mp4".into();
        options.segment_sap_aligned = false;
        assert!(options.validate().is_err());
        options.fragment_sap_aligned = false;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn fragment_duration_bound() {
        let mut options = MuxerOptions::default();
        options.output_file_name = "out.mp4".into();
        options.fragment_duration = 20.0;
        assert!(options.validate().is_err());
    }
}
