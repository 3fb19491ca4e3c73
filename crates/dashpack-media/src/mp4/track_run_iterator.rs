//! Linearizes per-sample metadata into a flat cursor.
//!
//! For fragmented files each `trun` becomes one run, resolving values in
//! precedence order `trun` > `tfhd` > `trex`. For progressive files each
//! chunk of the sample tables becomes one run. Runs are visited in data
//! offset order so the byte queue can be drained as early as possible.

use tracing::debug;

use super::boxes::{
    Movie, MovieFragment, SampleTable, TrackExtends, TrackFragmentHeader, TrackFragmentRun,
    TrackType,
};
use super::cenc::FrameCencInfo;
use super::chunk_info_iterator::ChunkInfoIterator;
use super::composition_offset_iterator::CompositionOffsetIterator;
use super::decoding_time_iterator::DecodingTimeIterator;
use super::sync_sample_iterator::SyncSampleIterator;
use crate::buffer::BufferReader;
use crate::error::{Error, Result};
use crate::media_sample::DecryptConfig;

// Per-sample metadata resolved from all applicable defaults.
#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    size: u32,
    duration: u32,
    cts_offset: i64,
    is_keyframe: bool,
}

// One linear run of samples sharing track-level properties.
#[derive(Debug, Clone)]
struct TrackRunInfo {
    track_id: u32,
    timescale: u32,
    track_type: TrackType,
    start_dts: i64,
    sample_start_offset: i64,
    samples: Vec<SampleInfo>,
    edit_media_time: i64,

    is_encrypted: bool,
    iv_size: u8,
    key_id: Vec<u8>,
    aux_info_start_offset: i64,
    aux_info_default_size: u8,
    aux_info_sizes: Vec<u8>,
    aux_info_total_size: usize,
}

impl TrackRunInfo {
    fn has_aux_info(&self) -> bool {
        self.is_encrypted && self.aux_info_total_size > 0
    }
}

// Per-sample-description encryption parameters from the stsd.
#[derive(Debug, Clone, Default)]
struct DescriptionMeta {
    is_encrypted: bool,
    iv_size: u8,
    key_id: Vec<u8>,
}

// Everything the iterator needs to know about one track.
#[derive(Debug, Clone)]
struct TrackMeta {
    track_id: u32,
    timescale: u32,
    track_type: TrackType,
    trex: TrackExtends,
    edit_media_time: i64,
    sample_table: SampleTable,
    descriptions: Vec<DescriptionMeta>,
}

/// Cursor over the samples described by a `moov` or by one `moof`.
pub struct TrackRunIterator {
    tracks: Vec<TrackMeta>,
    runs: Vec<TrackRunInfo>,
    run_index: usize,
    sample_index: usize,
    sample_dts: i64,
    sample_offset: i64,
    // DTS where the next fragment starts when it carries no tfdt, keyed by
    // position in `tracks`.
    next_fragment_start_dts: Vec<i64>,
    cenc_info: Vec<FrameCencInfo>,
    aux_cached: bool,
}

fn descriptions_from_sample_table(sample_table: &SampleTable) -> Vec<DescriptionMeta> {
    let description = &sample_table.description;
    let from_tenc = |tenc: &super::boxes::TrackEncryption| DescriptionMeta {
        is_encrypted: tenc.is_encrypted,
        iv_size: tenc.default_iv_size,
        key_id: tenc.default_kid.clone(),
    };
    match description.stream_type {
        TrackType::Video => description
            .video_entries
            .iter()
            .map(|e| from_tenc(&e.sinf.info.track_encryption))
            .collect(),
        TrackType::Audio => description
            .audio_entries
            .iter()
            .map(|e| from_tenc(&e.sinf.info.track_encryption))
            .collect(),
        _ => Vec::new(),
    }
}

impl TrackRunIterator {
    pub fn new(moov: &Movie) -> Self {
        let tracks = moov
            .tracks
            .iter()
            .map(|track| {
                let trex = moov
                    .extends
                    .tracks
                    .iter()
                    .find(|t| t.track_id == track.header.track_id)
                    .cloned()
                    .unwrap_or_default();
                let edits = &track.edit.list.edits;
                // A single-entry edit list biases CTS so the earliest CTS
                // becomes zero; DTS is never shifted.
                let edit_media_time = if edits.len() == 1 {
                    edits[0].media_time.max(0)
                } else {
                    0
                };
                let sample_table = track.media.information.sample_table.clone();
                let descriptions = descriptions_from_sample_table(&sample_table);
                TrackMeta {
                    track_id: track.header.track_id,
                    timescale: track.media.header.timescale,
                    track_type: track.media.handler.handler_type,
                    trex,
                    edit_media_time,
                    sample_table,
                    descriptions,
                }
            })
            .collect::<Vec<_>>();
        let track_count = tracks.len();
        Self {
            tracks,
            runs: Vec::new(),
            run_index: 0,
            sample_index: 0,
            sample_dts: 0,
            sample_offset: 0,
            next_fragment_start_dts: vec![0; track_count],
            cenc_info: Vec::new(),
            aux_cached: false,
        }
    }

    /// Build runs from the `moov` sample tables (progressive files). A
    /// fragmented file has empty tables and yields no runs.
    pub fn init(&mut self) -> Result<()> {
        let mut runs = Vec::new();

        for track in &self.tracks {
            let table = &track.sample_table;
            let chunk_offsets = &table.chunk_offset.offsets;
            if chunk_offsets.is_empty() || table.sample_size.sample_count == 0 {
                continue;
            }

            let stsz = &table.sample_size;
            let mut chunk_iter = ChunkInfoIterator::new(&table.sample_to_chunk);
            let mut time_iter = DecodingTimeIterator::new(&table.decoding_time_to_sample);
            let mut offset_iter =
                CompositionOffsetIterator::new(&table.composition_time_to_sample);
            let mut sync_iter = SyncSampleIterator::new(&table.sync_sample);

            let mut dts: i64 = 0;
            let mut sample_number: u32 = 0; // 0-based here

            for chunk_offset in chunk_offsets.iter() {
                if !chunk_iter.is_valid() {
                    break;
                }
                let samples_per_chunk = chunk_iter.samples_per_chunk();
                let description_index = chunk_iter.sample_description_index();
                let description = description_meta(track, description_index);

                let mut samples = Vec::with_capacity(samples_per_chunk as usize);
                let run_start_dts = dts;
                for _ in 0..samples_per_chunk {
                    if sample_number >= stsz.sample_count {
                        break;
                    }
                    let size = if stsz.sample_size != 0 {
                        stsz.sample_size
                    } else {
                        stsz.sizes[sample_number as usize]
                    };
                    let duration = time_iter.sample_delta();
                    let cts_offset = i64::from(offset_iter.sample_offset());
                    let is_keyframe = sync_iter.is_sync_sample();
                    samples.push(SampleInfo {
                        size,
                        duration,
                        cts_offset,
                        is_keyframe,
                    });
                    dts += i64::from(duration);
                    time_iter.advance_sample();
                    offset_iter.advance_sample();
                    sync_iter.advance_sample();
                    sample_number += 1;
                }
                chunk_iter.advance_chunk();

                runs.push(TrackRunInfo {
                    track_id: track.track_id,
                    timescale: track.timescale,
                    track_type: track.track_type,
                    start_dts: run_start_dts,
                    sample_start_offset: *chunk_offset as i64,
                    samples,
                    edit_media_time: track.edit_media_time,
                    is_encrypted: description.is_encrypted,
                    iv_size: description.iv_size,
                    key_id: description.key_id,
                    aux_info_start_offset: 0,
                    aux_info_default_size: 0,
                    aux_info_sizes: Vec::new(),
                    aux_info_total_size: 0,
                });
            }
        }

        runs.sort_by_key(|run| run.sample_start_offset);
        self.runs = runs;
        self.reset_run();
        Ok(())
    }

    /// Build runs from one movie fragment. Offsets are relative to the head
    /// of the `moof` (default-base-is-moof).
    pub fn init_fragment(&mut self, moof: &MovieFragment) -> Result<()> {
        let mut runs = Vec::new();

        for traf in &moof.tracks {
            let track_index = self
                .tracks
                .iter()
                .position(|t| t.track_id == traf.header.track_id)
                .ok_or_else(|| {
                    Error::parser(format!(
                        "traf references unknown track {}",
                        traf.header.track_id
                    ))
                })?;
            let track = &self.tracks[track_index];
            let trex = &track.trex;
            let tfhd = &traf.header;

            let description_index =
                if tfhd.flags & TrackFragmentHeader::SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
                    tfhd.sample_description_index
                } else {
                    trex.default_sample_description_index
                };
            let description = description_meta(track, description_index);

            let mut run_start_dts = if traf.has_decode_time {
                traf.decode_time.decode_time as i64
            } else {
                self.next_fragment_start_dts[track_index]
            };

            // Offsets in this traf accumulate run after run when a trun
            // carries no explicit data offset.
            let base_offset =
                if tfhd.flags & TrackFragmentHeader::BASE_DATA_OFFSET_PRESENT != 0 {
                    tfhd.base_data_offset as i64
                } else {
                    0
                };
            let mut next_run_offset = base_offset;
            let mut aux_size_index = 0usize;
            let mut prior_aux_sizes = 0usize;

            for (run_index, trun) in traf.runs.iter().enumerate() {
                let count = trun.sample_count as usize;
                let sample_start_offset =
                    if trun.flags & TrackFragmentRun::DATA_OFFSET_PRESENT != 0 {
                        base_offset + i64::from(trun.data_offset)
                    } else {
                        next_run_offset
                    };

                let mut samples = Vec::with_capacity(count);
                let mut run_bytes: i64 = 0;
                let mut run_duration: i64 = 0;
                for i in 0..count {
                    let duration = resolve(
                        trun.sample_durations.get(i).copied(),
                        tfhd.flags & TrackFragmentHeader::DEFAULT_SAMPLE_DURATION_PRESENT != 0,
                        tfhd.default_sample_duration,
                        trex.default_sample_duration,
                    );
                    let size = resolve(
                        trun.sample_sizes.get(i).copied(),
                        tfhd.flags & TrackFragmentHeader::DEFAULT_SAMPLE_SIZE_PRESENT != 0,
                        tfhd.default_sample_size,
                        trex.default_sample_size,
                    );
                    let mut flags = resolve(
                        trun.sample_flags.get(i).copied(),
                        tfhd.flags & TrackFragmentHeader::DEFAULT_SAMPLE_FLAGS_PRESENT != 0,
                        tfhd.default_sample_flags,
                        trex.default_sample_flags,
                    );
                    if i == 0 && trun.flags & TrackFragmentRun::FIRST_SAMPLE_FLAGS_PRESENT != 0 {
                        flags = trun.first_sample_flags;
                    }
                    let cts_offset = i64::from(
                        trun.sample_composition_time_offsets
                            .get(i)
                            .copied()
                            .unwrap_or(0),
                    );
                    samples.push(SampleInfo {
                        size,
                        duration,
                        cts_offset,
                        is_keyframe: flags & TrackFragmentHeader::NON_KEY_SAMPLE_MASK == 0,
                    });
                    run_bytes += i64::from(size);
                    run_duration += i64::from(duration);
                }

                // Auxiliary info for this run.
                let saiz = &traf.auxiliary_size;
                let saio = &traf.auxiliary_offset;
                let mut aux_info_default_size = 0;
                let mut aux_info_sizes = Vec::new();
                let mut aux_info_total_size = 0;
                let mut aux_info_start_offset = 0;
                if description.is_encrypted && saiz.sample_count > 0 && !saio.offsets.is_empty()
                {
                    aux_info_start_offset = if saio.offsets.len() > run_index {
                        saio.offsets[run_index] as i64
                    } else {
                        saio.offsets[0] as i64 + prior_aux_sizes as i64
                    };
                    aux_info_default_size = saiz.default_sample_info_size;
                    if aux_info_default_size == 0 {
                        aux_info_sizes = saiz
                            .sample_info_sizes
                            .iter()
                            .skip(aux_size_index)
                            .take(count)
                            .copied()
                            .collect();
                        if aux_info_sizes.len() != count {
                            return Err(Error::parser("truncated saiz sample info table"));
                        }
                        aux_info_total_size =
                            aux_info_sizes.iter().map(|s| *s as usize).sum();
                    } else {
                        aux_info_total_size = aux_info_default_size as usize * count;
                    }
                }
                aux_size_index += count;
                prior_aux_sizes += aux_info_total_size;

                runs.push(TrackRunInfo {
                    track_id: track.track_id,
                    timescale: track.timescale,
                    track_type: track.track_type,
                    start_dts: run_start_dts,
                    sample_start_offset,
                    samples,
                    edit_media_time: track.edit_media_time,
                    is_encrypted: description.is_encrypted,
                    iv_size: description.iv_size,
                    key_id: description.key_id.clone(),
                    aux_info_start_offset,
                    aux_info_default_size,
                    aux_info_sizes,
                    aux_info_total_size,
                });

                run_start_dts += run_duration;
                next_run_offset = sample_start_offset + run_bytes;
            }

            self.next_fragment_start_dts[track_index] = run_start_dts;
        }

        runs.sort_by_key(|run| run.sample_start_offset);
        debug!(runs = runs.len(), "initialized fragment runs");
        self.runs = runs;
        self.reset_run();
        Ok(())
    }

    fn reset_run(&mut self) {
        self.run_index = 0;
        self.sample_index = 0;
        self.cenc_info.clear();
        self.aux_cached = false;
        if let Some(run) = self.runs.first() {
            self.sample_dts = run.start_dts;
            self.sample_offset = run.sample_start_offset;
        }
    }

    pub fn is_run_valid(&self) -> bool {
        self.run_index < self.runs.len()
    }

    pub fn is_sample_valid(&self) -> bool {
        self.is_run_valid() && self.sample_index < self.runs[self.run_index].samples.len()
    }

    /// Advance to the next run.
    pub fn advance_run(&mut self) {
        self.run_index += 1;
        self.sample_index = 0;
        self.cenc_info.clear();
        self.aux_cached = false;
        if let Some(run) = self.runs.get(self.run_index) {
            self.sample_dts = run.start_dts;
            self.sample_offset = run.sample_start_offset;
        }
    }

    /// Advance to the next sample of the current run.
    pub fn advance_sample(&mut self) {
        debug_assert!(self.is_sample_valid());
        let sample = &self.runs[self.run_index].samples[self.sample_index];
        self.sample_offset += i64::from(sample.size);
        self.sample_dts += i64::from(sample.duration);
        self.sample_index += 1;
    }

    /// True when this run's aux info has not yet been copied out of the byte
    /// queue.
    pub fn aux_info_needs_to_be_cached(&self) -> bool {
        self.is_run_valid() && self.runs[self.run_index].has_aux_info() && !self.aux_cached
    }

    /// Parse and cache the CENC aux info blob for the current run. `buf`
    /// must start at `aux_info_offset()` and hold `aux_info_size()` bytes.
    pub fn cache_aux_info(&mut self, buf: &[u8]) -> Result<()> {
        let run = &self.runs[self.run_index];
        if buf.len() < run.aux_info_total_size {
            return Err(Error::parser("truncated CENC auxiliary information"));
        }
        let mut reader = BufferReader::new(&buf[..run.aux_info_total_size]);
        self.cenc_info.clear();
        for i in 0..run.samples.len() {
            let entry_size = if run.aux_info_default_size != 0 {
                run.aux_info_default_size as usize
            } else {
                run.aux_info_sizes[i] as usize
            };
            let start = reader.pos();
            let mut info = FrameCencInfo::default();
            let mut entry_reader = BufferReader::new(
                &buf[start..start + entry_size.min(run.aux_info_total_size - start)],
            );
            info.parse(run.iv_size as usize, &mut entry_reader)?;
            reader.skip_bytes(entry_size)?;
            self.cenc_info.push(info);
        }
        self.aux_cached = true;
        Ok(())
    }

    /// The lowest offset that must still be retained to serve the current
    /// and all subsequent samples. `i64::MAX` when unconstrained.
    pub fn get_max_clear_offset(&self) -> i64 {
        let mut offset = i64::MAX;
        if self.is_sample_valid() {
            offset = offset.min(self.sample_offset);
            if self.aux_info_needs_to_be_cached() {
                offset = offset.min(self.runs[self.run_index].aux_info_start_offset);
            }
        }
        if let Some(next) = self.runs.get(self.run_index + 1) {
            offset = offset.min(next.sample_start_offset);
            if next.has_aux_info() {
                offset = offset.min(next.aux_info_start_offset);
            }
        }
        offset
    }

    pub fn track_id(&self) -> u32 {
        self.runs[self.run_index].track_id
    }

    pub fn timescale(&self) -> u32 {
        self.runs[self.run_index].timescale
    }

    pub fn is_audio(&self) -> bool {
        self.runs[self.run_index].track_type == TrackType::Audio
    }

    pub fn is_video(&self) -> bool {
        self.runs[self.run_index].track_type == TrackType::Video
    }

    pub fn is_encrypted(&self) -> bool {
        self.runs[self.run_index].is_encrypted
    }

    pub fn aux_info_offset(&self) -> i64 {
        self.runs[self.run_index].aux_info_start_offset
    }

    pub fn aux_info_size(&self) -> usize {
        self.runs[self.run_index].aux_info_total_size
    }

    pub fn sample_offset(&self) -> i64 {
        self.sample_offset
    }

    pub fn sample_size(&self) -> u32 {
        self.runs[self.run_index].samples[self.sample_index].size
    }

    pub fn dts(&self) -> i64 {
        self.sample_dts
    }

    pub fn cts(&self) -> i64 {
        let run = &self.runs[self.run_index];
        self.sample_dts + run.samples[self.sample_index].cts_offset - run.edit_media_time
    }

    pub fn duration(&self) -> i64 {
        i64::from(self.runs[self.run_index].samples[self.sample_index].duration)
    }

    pub fn is_keyframe(&self) -> bool {
        self.runs[self.run_index].samples[self.sample_index].is_keyframe
    }

    /// Decrypt parameters for the current sample. Requires the aux info to
    /// be cached already.
    pub fn get_decrypt_config(&self) -> Result<DecryptConfig> {
        let run = &self.runs[self.run_index];
        let info = self.cenc_info.get(self.sample_index).ok_or_else(|| {
            Error::parser("CENC auxiliary information not cached for sample")
        })?;
        if !info.subsamples().is_empty()
            && info.total_size_of_subsamples() != self.sample_size() as usize
        {
            return Err(Error::parser(
                "subsample sizes do not add up to the sample size",
            ));
        }
        Ok(DecryptConfig {
            key_id: run.key_id.clone(),
            iv: info.iv().to_vec(),
            subsamples: info.subsamples().to_vec(),
        })
    }
}

fn description_meta(track: &TrackMeta, one_based_index: u32) -> DescriptionMeta {
    // Out-of-range indices fall back to the first entry; otherwise-valid
    // files with bad indices are not uncommon.
    let index = (one_based_index.max(1) - 1) as usize;
    track
        .descriptions
        .get(index)
        .or_else(|| track.descriptions.first())
        .cloned()
        .unwrap_or_default()
}

// trun per-sample value > tfhd default > trex default.
fn resolve(
    per_sample: Option<u32>,
    tfhd_present: bool,
    tfhd_default: u32,
    trex_default: u32,
) -> u32 {
    if let Some(value) = per_sample {
        return value;
    }
    if tfhd_present {
        return tfhd_default;
    }
    trex_default
}
