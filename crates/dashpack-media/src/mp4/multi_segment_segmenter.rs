//! Live (multi-file) segment output.
//!
//! The init segment `ftyp | moov` is written once to the main output file;
//! each media segment becomes `styp [sidx] (moof mdat)+`, either in its own
//! file named from the segment template or appended to the main output.

use std::fs::{File, OpenOptions};

use tracing::debug;

use super::box_buffer::Mp4Box;
use super::boxes::{FileType, Movie, SegmentIndex, SegmentType};
use super::segmenter::{collapse_references, NewSegmentEvent};
use crate::buffer::BufferWriter;
use crate::error::{Error, Result};
use crate::muxer_options::MuxerOptions;
use crate::muxer_util::get_segment_name;

pub struct MultiSegmentSegmenter {
    styp: SegmentType,
    num_segments: u32,
}

impl MultiSegmentSegmenter {
    pub fn new(ftyp: &FileType) -> Self {
        // styp carries the same brands as ftyp.
        Self {
            styp: SegmentType(ftyp.clone()),
            num_segments: 0,
        }
    }

    /// Write the init segment to the main output file.
    pub fn initialize(
        &mut self,
        options: &MuxerOptions,
        ftyp: &mut FileType,
        moov: &mut Movie,
    ) -> Result<()> {
        let mut file = File::create(&options.output_file_name).map_err(|e| {
            Error::FileFailure(format!(
                "cannot open file to write {}: {e}",
                options.output_file_name
            ))
        })?;
        let mut buffer = BufferWriter::new();
        ftyp.write(&mut buffer)?;
        moov.write(&mut buffer)?;
        buffer.write_to_file(&mut file)
    }

    /// Emit one finished segment.
    pub fn finalize_segment(
        &mut self,
        options: &MuxerOptions,
        sidx: &mut SegmentIndex,
        fragment_buffer: &mut BufferWriter,
    ) -> Result<NewSegmentEvent> {
        if sidx.references.is_empty() {
            return Err(Error::muxer("finalizing a segment with no fragments"));
        }
        let start_time = sidx.references[0].earliest_presentation_time;
        let segment_duration: u64 = sidx
            .references
            .iter()
            .map(|r| u64::from(r.subsegment_duration))
            .sum();

        let mut buffer = BufferWriter::new();
        self.styp.write(&mut buffer)?;

        if options.num_subsegments_per_sidx >= 0 {
            // Collapse the per-fragment references into the requested number
            // of subsegments of roughly equal fragment count.
            let num_subsegments = (options.num_subsegments_per_sidx as usize).max(1);
            let chunk_size = sidx.references.len().div_ceil(num_subsegments);
            let collapsed: Vec<_> = sidx
                .references
                .chunks(chunk_size)
                .map(collapse_references)
                .collect();

            let mut segment_sidx = SegmentIndex {
                reference_id: sidx.reference_id,
                timescale: sidx.timescale,
                earliest_presentation_time: start_time,
                first_offset: 0,
                references: collapsed,
                ..Default::default()
            };
            segment_sidx.write(&mut buffer)?;
        }

        buffer.append_buffer(fragment_buffer);
        fragment_buffer.clear();
        let segment_size = buffer.size() as u64;

        if options.segment_template.is_empty() {
            // No template: segments accumulate in the main output file.
            let mut file = OpenOptions::new()
                .append(true)
                .open(&options.output_file_name)
                .map_err(|e| {
                    Error::FileFailure(format!(
                        "cannot open file to write {}: {e}",
                        options.output_file_name
                    ))
                })?;
            buffer.write_to_file(&mut file)?;
        } else {
            let file_name = get_segment_name(
                &options.segment_template,
                start_time,
                self.num_segments,
                0,
            )?;
            debug!(segment = %file_name, size = segment_size, "writing segment");
            let mut file = File::create(&file_name).map_err(|e| {
                Error::FileFailure(format!("cannot open file to write {file_name}: {e}"))
            })?;
            buffer.write_to_file(&mut file)?;
        }
        self.num_segments += 1;

        Ok(NewSegmentEvent {
            start_time,
            duration: segment_duration,
            segment_file_size: segment_size,
        })
    }
}
