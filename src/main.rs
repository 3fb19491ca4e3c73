mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dashpack::packager::{run_packager, PackagerParams};
use dashpack_media::{FixedKeySource, KeySource, MuxerOptions};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing. Respect RUST_LOG; default to info for our crates.
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "dashpack=info,dashpack_media=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .init();

    match run(cli) {
        Ok(()) => {
            println!("Packaging completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Packaging error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let key_source = build_key_source(&cli)?;

    let muxer_options = MuxerOptions {
        single_segment: cli.single_segment,
        segment_duration: cli.segment_duration,
        fragment_duration: cli.fragment_duration,
        segment_sap_aligned: cli.segment_sap_aligned,
        fragment_sap_aligned: cli.fragment_sap_aligned,
        num_subsegments_per_sidx: cli.num_subsegments_per_sidx,
        normalize_presentation_timestamp: cli.normalize_presentation_timestamp,
        output_file_name: cli.output.clone(),
        segment_template: cli.segment_template.clone(),
        temp_dir: cli.temp_file.clone(),
    };
    if !muxer_options.segment_template.is_empty() {
        dashpack_media::validate_segment_template(&muxer_options.segment_template)?;
    }

    let params = PackagerParams {
        muxer_options,
        key_source,
        max_sd_pixels: cli.max_sd_pixels,
        clear_lead: cli.clear_lead,
        crypto_period_duration: cli.crypto_period_duration,
        output_media_info: cli.output_media_info,
        scheme_id_uri: cli.scheme_id_uri.clone(),
        dump_stream_info: cli.dump_stream_info,
    };

    run_packager(&cli.stream_descriptors, &params)
}

fn build_key_source(cli: &Cli) -> anyhow::Result<Option<Arc<dyn KeySource>>> {
    if !cli.enable_fixed_key_encryption {
        return Ok(None);
    }
    for (name, value) in [
        ("--key_id", &cli.key_id),
        ("--key", &cli.key),
        ("--pssh", &cli.pssh),
    ] {
        if value.is_empty() {
            anyhow::bail!("{name} is required with --enable_fixed_key_encryption");
        }
    }
    let iv = if cli.iv.is_empty() {
        None
    } else {
        Some(cli.iv.as_str())
    };
    let source = FixedKeySource::from_hex_strings(&cli.key_id, &cli.key, &cli.pssh, iv)?;
    Ok(Some(Arc::new(source)))
}
