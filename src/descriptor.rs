//! Stream descriptor parsing.
//!
//! A descriptor names one remux operation:
//! `<input>#<selector>,<output>[,<segment_template>]`, where the selector
//! is `audio`, `video`, or a decimal stream index.

use dashpack_media::{Error, Result};

/// Which stream of the input feeds the muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    /// The first audio stream.
    Audio,
    /// The first video stream.
    Video,
    /// A zero-based index into the discovered streams.
    Index(usize),
}

impl StreamSelector {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => other
                .parse::<usize>()
                .map(Self::Index)
                .map_err(|_| {
                    Error::InvalidArgument(format!(
                        "stream selector must be 'audio', 'video' or a stream index, got '{other}'"
                    ))
                }),
        }
    }
}

/// One parsed `input#selector,output[,segment_template]` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub input: String,
    pub selector: StreamSelector,
    pub output: String,
    pub segment_template: Option<String>,
}

impl StreamDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let parts: Vec<&str> = descriptor.split(',').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::InvalidArgument(format!(
                "malformed stream descriptor '{descriptor}': expected \
                 input#selector,output[,segment_template]"
            )));
        }

        let (input, selector) = parts[0].split_once('#').ok_or_else(|| {
            Error::InvalidArgument(format!(
                "malformed stream descriptor '{descriptor}': stream selector unspecified"
            ))
        })?;
        if input.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "malformed stream descriptor '{descriptor}': empty input file"
            )));
        }
        let output = parts[1];
        if output.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "malformed stream descriptor '{descriptor}': empty output file"
            )));
        }

        let segment_template = parts.get(2).map(|t| t.to_string());
        if let Some(template) = &segment_template {
            dashpack_media::validate_segment_template(template)?;
        }

        Ok(Self {
            input: input.to_string(),
            selector: StreamSelector::parse(selector)?,
            output: output.to_string(),
            segment_template,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_descriptor() {
        let d = StreamDescriptor::parse("in.mp4#video,out.mp4").unwrap();
        assert_eq!(d.input, "in.mp4");
        assert_eq!(d.selector, StreamSelector::Video);
        assert_eq!(d.output, "out.mp4");
        assert!(d.segment_template.is_none());
    }

    #[test]
    fn parses_descriptor_with_template() {
        let d = StreamDescriptor::parse("in.mp4#audio,init.mp4,seg$Number$.m4s").unwrap();
        assert_eq!(d.selector, StreamSelector::Audio);
        assert_eq!(d.segment_template.as_deref(), Some("seg$Number$.m4s"));
    }

    #[test]
    fn parses_index_selector() {
        let d = StreamDescriptor::parse("in.mp4#2,out.mp4").unwrap();
        assert_eq!(d.selector, StreamSelector::Index(2));
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(StreamDescriptor::parse("in.mp4").is_err());
        assert!(StreamDescriptor::parse("in.mp4,out.mp4").is_err());
        assert!(StreamDescriptor::parse("in.mp4#bogus,out.mp4").is_err());
        assert!(StreamDescriptor::parse("in.mp4#video,out.mp4,seg.m4s").is_err());
        assert!(StreamDescriptor::parse("in.mp4#video,out.mp4,a,b").is_err());
        assert!(StreamDescriptor::parse("#video,out.mp4").is_err());
        assert!(StreamDescriptor::parse("in.mp4#video,").is_err());
    }
}
