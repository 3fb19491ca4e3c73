//! On-demand (single-file) segment output.
//!
//! Fragments are spooled to a temp file as they are produced; at finalize
//! the final file is assembled as `ftyp | moov | sidx | fragments` and the
//! per-fragment references collapse into one subsegment reference per
//! segment.

use std::fs::File;
use std::io::{Read, Seek, Write};

use tempfile::NamedTempFile;
use tracing::warn;

use super::box_buffer::Mp4Box;
use super::boxes::{FileType, Movie, SegmentIndex};
use super::segmenter::{collapse_references, NewSegmentEvent};
use crate::buffer::BufferWriter;
use crate::error::{Error, Result};
use crate::muxer_options::MuxerOptions;

const COPY_BUF_SIZE: usize = 0x40000; // 256 KiB

pub struct SingleSegmentSegmenter {
    temp_file: Option<NamedTempFile>,
    vod_sidx: Option<SegmentIndex>,
}

impl SingleSegmentSegmenter {
    pub fn new() -> Self {
        Self {
            temp_file: None,
            vod_sidx: None,
        }
    }

    pub fn vod_sidx(&self) -> Option<&SegmentIndex> {
        self.vod_sidx.as_ref()
    }

    /// Create the temp spool file, honoring the configured temp directory.
    pub fn initialize(&mut self, options: &MuxerOptions) -> Result<()> {
        let temp_file = if options.temp_dir.is_empty() {
            NamedTempFile::new()
        } else {
            NamedTempFile::new_in(&options.temp_dir)
        }
        .map_err(|e| Error::FileFailure(format!("unable to create temporary file: {e}")))?;
        self.temp_file = Some(temp_file);
        Ok(())
    }

    /// Collapse this segment's fragment references into one subsegment
    /// reference and append the fragment bytes to the temp file.
    pub fn finalize_segment(
        &mut self,
        sidx: &mut SegmentIndex,
        fragment_buffer: &mut BufferWriter,
    ) -> Result<NewSegmentEvent> {
        if sidx.references.is_empty() {
            return Err(Error::muxer("finalizing a segment with no fragments"));
        }
        let collapsed = collapse_references(&sidx.references);

        if self.vod_sidx.is_none() {
            let mut vod_sidx = SegmentIndex {
                reference_id: sidx.reference_id,
                timescale: sidx.timescale,
                ..Default::default()
            };
            if collapsed.earliest_presentation_time > 0 && sidx.timescale != 0 {
                let starting_time_in_seconds =
                    collapsed.earliest_presentation_time as f64 / sidx.timescale as f64;
                if starting_time_in_seconds > 0.5 {
                    warn!(
                        starting_time_in_seconds,
                        "non-zero starting time; manual adjustment of \
                         presentationTimeOffset in the MPD might be necessary"
                    );
                }
            }
            // On-demand presentations start from zero.
            vod_sidx.earliest_presentation_time = 0;
            self.vod_sidx = Some(vod_sidx);
        }
        if let Some(vod_sidx) = self.vod_sidx.as_mut() {
            vod_sidx.references.push(collapsed);
        }

        let temp_file = self
            .temp_file
            .as_mut()
            .ok_or_else(|| Error::FileFailure("temp file is not open".into()))?;
        fragment_buffer.write_to_file(temp_file.as_file_mut())?;

        Ok(NewSegmentEvent {
            start_time: collapsed.earliest_presentation_time,
            duration: u64::from(collapsed.subsegment_duration),
            segment_file_size: u64::from(collapsed.referenced_size),
        })
    }

    /// Assemble the final file: `ftyp | moov | sidx | (temp file bytes)`.
    pub fn finalize(
        &mut self,
        options: &MuxerOptions,
        ftyp: &mut FileType,
        moov: &mut Movie,
    ) -> Result<()> {
        let vod_sidx = self
            .vod_sidx
            .as_mut()
            .ok_or_else(|| Error::muxer("no segment was produced"))?;
        let mut temp_file = self
            .temp_file
            .take()
            .ok_or_else(|| Error::FileFailure("temp file is not open".into()))?;

        let mut output = File::create(&options.output_file_name).map_err(|e| {
            Error::FileFailure(format!(
                "cannot open file to write {}: {e}",
                options.output_file_name
            ))
        })?;

        let mut header = BufferWriter::new();
        ftyp.write(&mut header)?;
        moov.write(&mut header)?;
        vod_sidx.write(&mut header)?;
        header.write_to_file(&mut output)?;

        // Stream the spooled fragments over in fixed-size chunks.
        let spool = temp_file.as_file_mut();
        spool.rewind()?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let read = spool.read(&mut buf).map_err(|e| {
                Error::FileFailure(format!("failed to read temporary file: {e}"))
            })?;
            if read == 0 {
                break;
            }
            output.write_all(&buf[..read]).map_err(|e| {
                Error::FileFailure(format!(
                    "failed to write file {}: {e}",
                    options.output_file_name
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::boxes::{SapType, SegmentReference};

    fn fragment_reference(size: u32, duration: u32, ept: u64) -> SegmentReference {
        SegmentReference {
            reference_type: false,
            referenced_size: size,
            subsegment_duration: duration,
            starts_with_sap: true,
            sap_type: SapType::Type1,
            sap_delta_time: 0,
            earliest_presentation_time: ept,
        }
    }

    #[test]
    fn segment_collapses_to_one_reference() {
        let mut segmenter = SingleSegmentSegmenter::new();
        let options = MuxerOptions::default();
        segmenter.initialize(&options).unwrap();

        let mut sidx = SegmentIndex {
            reference_id: 1,
            timescale: 25,
            ..Default::default()
        };
        sidx.references.push(fragment_reference(100, 50, 0));
        sidx.references.push(fragment_reference(150, 50, 50));

        let mut buffer = BufferWriter::new();
        buffer.append_slice(b"fragment-bytes");
        let event = segmenter.finalize_segment(&mut sidx, &mut buffer).unwrap();
        assert_eq!(event.duration, 100);
        assert_eq!(event.segment_file_size, 250);

        let vod_sidx = segmenter.vod_sidx().unwrap();
        assert_eq!(vod_sidx.references.len(), 1);
        assert_eq!(vod_sidx.references[0].referenced_size, 250);
        assert_eq!(vod_sidx.references[0].subsegment_duration, 100);
        assert_eq!(vod_sidx.earliest_presentation_time, 0);
        // The fragment buffer is drained into the temp file.
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn finalizing_without_fragments_is_an_error() {
        let mut segmenter = SingleSegmentSegmenter::new();
        let options = MuxerOptions::default();
        segmenter.initialize(&options).unwrap();
        let mut sidx = SegmentIndex::default();
        let mut buffer = BufferWriter::new();
        assert!(segmenter.finalize_segment(&mut sidx, &mut buffer).is_err());
    }
}
