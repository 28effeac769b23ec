use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use byteorder::{LittleEndian, WriteBytesExt};
use clap::Parser;
use gaana_hls::{
    common::{http::ReqwestTransport, logger, types::AnyResult},
    configs::Config,
    sources::{PlayableTrack, gaana::GaanaTrack},
};
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "Gaana HLS playback client")]
struct CliArgs {
    /// Gaana track id to play
    track_id: String,

    /// Output file for interleaved s16le PCM (default: <track-id>.pcm)
    output: Option<PathBuf>,

    /// Start position in milliseconds
    #[arg(short, long, default_value_t = 0)]
    start: u64,

    /// Config file; falls back to config.toml, then config.default.toml
    #[arg(short, long)]
    config: Option<String>,
}

fn main() -> AnyResult<()> {
    let args = CliArgs::parse();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.pcm", args.track_id)));
    let (config, loaded_from) = Config::load(args.config.as_deref())?;
    logger::init(config.logging.as_ref());

    match loaded_from {
        Some(path) => info!("Loaded config from {}", path),
        None => info!("No config file found, using defaults"),
    }

    let gaana = &config.gaana;
    let transport = Arc::new(ReqwestTransport::new(
        &gaana.user_agent,
        gaana.request_timeout(),
        gaana.proxy.as_ref(),
    )?);

    let track = GaanaTrack::from_config(args.track_id.as_str(), transport, gaana)
        .with_start_position(args.start);
    let session = track.start_decoding();

    info!(
        "Playing Gaana track {} from {}ms into {}",
        args.track_id,
        args.start,
        output.display()
    );

    let mut out = BufWriter::new(File::create(&output)?);
    let mut samples = 0usize;
    for chunk in session.pcm.iter() {
        for sample in &chunk {
            out.write_i16::<LittleEndian>(*sample)?;
        }
        samples += chunk.len();
    }
    out.flush()?;

    if let Ok(err) = session.failures.try_recv() {
        error!("{}", err);
        return Err(err.into());
    }

    info!(
        "Wrote {} samples to {} (stopped at {}ms)",
        samples,
        output.display(),
        session.handle.position_ms()
    );
    Ok(())
}
