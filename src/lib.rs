//! dashpack: DASH packager built on the dashpack-media pipeline.
//!
//! Parses stream descriptors, groups them into remux jobs (one demuxer per
//! input file, one muxer per output), and runs the jobs on worker threads.

pub mod descriptor;
pub mod packager;

pub use descriptor::{StreamDescriptor, StreamSelector};
pub use packager::{run_packager, PackagerParams};
