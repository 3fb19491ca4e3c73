//! Command line interface definitions.

use clap::{ArgAction, Parser};

/// DASH packager: remux, encrypt and segment media into fragmented MP4.
///
/// Stream descriptors take the form
/// `<input>#<selector>,<output>[,<segment_template>]` where `selector` is
/// `audio`, `video` or a stream index. The segment template, when present,
/// switches the stream to live (multi-file) output.
#[derive(Debug, Parser)]
#[command(name = "dashpack", version, about)]
pub struct Cli {
    /// Stream descriptors, one per output.
    #[arg(required = true, value_name = "STREAM_DESCRIPTOR")]
    pub stream_descriptors: Vec<String>,

    /// Generate a single segment for the media presentation (on-demand
    /// profile).
    #[arg(long = "single_segment", default_value_t = true, action = ArgAction::Set)]
    pub single_segment: bool,

    /// Segment duration in seconds. With --single_segment this is the
    /// subsegment duration. Actual durations are approximate.
    #[arg(long = "segment_duration", default_value_t = 10.0)]
    pub segment_duration: f64,

    /// Fragment duration in seconds; should not exceed the segment
    /// duration. Actual durations are approximate.
    #[arg(long = "fragment_duration", default_value_t = 2.0)]
    pub fragment_duration: f64,

    /// Force segments to begin with stream access points.
    #[arg(long = "segment_sap_aligned", default_value_t = true, action = ArgAction::Set)]
    pub segment_sap_aligned: bool,

    /// Force fragments to begin with stream access points. Implies
    /// --segment_sap_aligned.
    #[arg(long = "fragment_sap_aligned", default_value_t = true, action = ArgAction::Set)]
    pub fragment_sap_aligned: bool,

    /// Number of subsegments per SIDX box: 0 for one per segment, -1 to
    /// omit the SIDX, N > 0 to pack N subsegments into the root SIDX.
    #[arg(long = "num_subsegments_per_sidx", default_value_t = 1, allow_hyphen_values = true)]
    pub num_subsegments_per_sidx: i32,

    /// Normalize presentation timestamps to start from zero.
    #[arg(long = "normalize_presentation_timestamp", default_value_t = true, action = ArgAction::Set)]
    pub normalize_presentation_timestamp: bool,

    /// Default output file, overridden by each stream descriptor's output
    /// component.
    #[arg(long = "output", default_value = "")]
    pub output: String,

    /// Default segment name pattern for generated segments, overridden by a
    /// descriptor's template component. Implies live (multi-file) output.
    #[arg(long = "segment_template", default_value = "")]
    pub segment_template: String,

    /// Directory for the on-demand temp file; defaults to the OS temp
    /// directory.
    #[arg(long = "temp_file", default_value = "")]
    pub temp_file: String,

    /// Print a description of every discovered stream.
    #[arg(long = "dump_stream_info", default_value_t = false)]
    pub dump_stream_info: bool,

    /// Write a `<output>.media_info.json` record for each output.
    #[arg(long = "output_media_info", default_value_t = true, action = ArgAction::Set)]
    pub output_media_info: bool,

    /// schemeIdUri recorded in the media info for protected content.
    #[arg(
        long = "scheme_id_uri",
        default_value = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"
    )]
    pub scheme_id_uri: String,

    /// Enable encryption with a fixed key.
    #[arg(long = "enable_fixed_key_encryption", default_value_t = false)]
    pub enable_fixed_key_encryption: bool,

    /// Key id in hex string format.
    #[arg(long = "key_id", default_value = "")]
    pub key_id: String,

    /// Key in hex string format.
    #[arg(long = "key", default_value = "")]
    pub key: String,

    /// PSSH data in hex string format.
    #[arg(long = "pssh", default_value = "")]
    pub pssh: String,

    /// IV in hex string format; random when omitted.
    #[arg(long = "iv", default_value = "")]
    pub iv: String,

    /// Clear lead in seconds when encryption is enabled.
    #[arg(long = "clear_lead", default_value_t = 10.0)]
    pub clear_lead: f64,

    /// Crypto period duration in seconds; 0 disables key rotation.
    #[arg(long = "crypto_period_duration", default_value_t = 0.0)]
    pub crypto_period_duration: f64,

    /// Video tracks up to this many pixels are encrypted with the SD key.
    #[arg(long = "max_sd_pixels", default_value_t = 768 * 576)]
    pub max_sd_pixels: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["dashpack", "in.mp4#video,out.mp4"]);
        assert!(cli.single_segment);
        assert_eq!(cli.segment_duration, 10.0);
        assert_eq!(cli.fragment_duration, 2.0);
        assert_eq!(cli.num_subsegments_per_sidx, 1);
        assert!(!cli.enable_fixed_key_encryption);
        assert_eq!(cli.stream_descriptors.len(), 1);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "dashpack",
            "--single_segment",
            "false",
            "--segment_duration",
            "4",
            "--num_subsegments_per_sidx",
            "-1",
            "--enable_fixed_key_encryption",
            "--key_id",
            "00112233445566778899aabbccddeeff",
            "in.mp4#video,init.mp4,seg$Number$.m4s",
        ]);
        assert!(!cli.single_segment);
        assert_eq!(cli.segment_duration, 4.0);
        assert_eq!(cli.num_subsegments_per_sidx, -1);
        assert!(cli.enable_fixed_key_encryption);
    }

    #[test]
    fn requires_a_descriptor() {
        assert!(Cli::try_parse_from(["dashpack"]).is_err());
    }
}
