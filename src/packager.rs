//! Remux job construction and execution.
//!
//! Descriptors sharing an input file form one job: a single demuxer feeding
//! one muxer per descriptor. Each job runs on its own worker thread; the
//! first failure wins.

use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context};
use tracing::info;

use dashpack_media::{
    Demuxer, KeySource, Mp4Muxer, MuxerOptions, SystemClock, VodMediaInfoDumpMuxerListener,
};

use crate::descriptor::{StreamDescriptor, StreamSelector};

/// Packaging parameters shared by every muxer of a run.
pub struct PackagerParams {
    pub muxer_options: MuxerOptions,
    pub key_source: Option<Arc<dyn KeySource>>,
    pub max_sd_pixels: u32,
    pub clear_lead: f64,
    pub crypto_period_duration: f64,
    pub output_media_info: bool,
    pub scheme_id_uri: String,
    pub dump_stream_info: bool,
}

// One demuxer plus the muxers it feeds, run on one worker thread.
struct RemuxJob {
    demuxer: Demuxer,
    muxers: Vec<Mp4Muxer>,
}

impl RemuxJob {
    fn run(mut self) -> dashpack_media::Result<()> {
        self.demuxer.run(&mut self.muxers)
    }
}

fn resolve_selector(demuxer: &Demuxer, selector: &StreamSelector) -> anyhow::Result<usize> {
    let streams = demuxer.streams();
    let index = match selector {
        StreamSelector::Audio => streams.iter().position(|s| s.info().is_audio()),
        StreamSelector::Video => streams.iter().position(|s| s.info().is_video()),
        StreamSelector::Index(i) => {
            if *i < streams.len() {
                Some(*i)
            } else {
                None
            }
        }
    };
    index.ok_or_else(|| {
        anyhow!(
            "no stream matching selector {selector:?} in {}",
            demuxer.file_name()
        )
    })
}

fn create_remux_jobs(
    descriptors: &[StreamDescriptor],
    params: &PackagerParams,
) -> anyhow::Result<Vec<RemuxJob>> {
    // Sort so descriptors sharing an input form contiguous groups.
    let mut sorted = descriptors.to_vec();
    sorted.sort_by(|a, b| (&a.input, &a.output).cmp(&(&b.input, &b.output)));

    let mut jobs: Vec<RemuxJob> = Vec::new();
    let mut previous_input: Option<String> = None;

    for descriptor in &sorted {
        if previous_input.as_deref() != Some(descriptor.input.as_str()) {
            let mut demuxer = Demuxer::new(descriptor.input.clone());
            demuxer
                .initialize()
                .with_context(|| format!("failed to open {}", descriptor.input))?;
            if params.dump_stream_info {
                println!("\nFile \"{}\":", descriptor.input);
                for stream in demuxer.streams() {
                    println!("  {}", stream.info());
                }
            }
            jobs.push(RemuxJob {
                demuxer,
                muxers: Vec::new(),
            });
            previous_input = Some(descriptor.input.clone());
        }
        let job = jobs.last_mut().ok_or_else(|| anyhow!("no remux job"))?;

        let mut options = params.muxer_options.clone();
        options.output_file_name = descriptor.output.clone();
        if let Some(template) = &descriptor.segment_template {
            options.segment_template = template.clone();
        }
        if !options.segment_template.is_empty() {
            options.single_segment = false;
        }
        options.validate()?;

        let mut muxer = Mp4Muxer::new(options);
        muxer.set_clock(Box::new(SystemClock));
        if let Some(key_source) = &params.key_source {
            muxer.set_key_source(
                Arc::clone(key_source),
                params.max_sd_pixels,
                params.clear_lead,
                params.crypto_period_duration,
            );
        }
        if params.output_media_info {
            let mut listener = VodMediaInfoDumpMuxerListener::new(&descriptor.output);
            listener.set_content_protection_scheme_id_uri(&params.scheme_id_uri);
            muxer.set_muxer_listener(Box::new(listener));
        }

        let stream_index = resolve_selector(&job.demuxer, &descriptor.selector)?;
        let muxer_index = job.muxers.len();
        job.demuxer.connect_stream(stream_index, muxer_index);
        muxer.add_stream(job.demuxer.stream_info(stream_index), stream_index);
        job.muxers.push(muxer);
    }

    Ok(jobs)
}

fn run_remux_jobs(jobs: Vec<RemuxJob>) -> anyhow::Result<()> {
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        handles.push(thread::spawn(move || job.run()));
    }

    let mut first_error = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!(e));
                }
            }
            Err(_) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!("remux worker panicked"));
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Parse descriptors, build the remux jobs and run them to completion.
pub fn run_packager(descriptors: &[String], params: &PackagerParams) -> anyhow::Result<()> {
    if descriptors.is_empty() {
        bail!("at least one stream descriptor is required");
    }
    let parsed = descriptors
        .iter()
        .map(|d| StreamDescriptor::parse(d))
        .collect::<dashpack_media::Result<Vec<_>>>()?;

    let jobs = create_remux_jobs(&parsed, params)?;
    info!(jobs = jobs.len(), "starting remux jobs");
    run_remux_jobs(jobs)
}
