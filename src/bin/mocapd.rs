//! mocapd - motion-capture rig daemon
//!
//! This daemon:
//! 1. Loads the rig configuration (MOCAP_CONFIG + MOCAP_* overrides) and calibration
//! 2. Starts capture on the configured source
//! 3. Runs the consumer loop at `cycle_hz`, writing one JSON report per cycle to stdout
//! 4. Accepts operator commands on stdin (`threshold 180`, `detection off`, `stop`, ...)
//! 5. Stops capture cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mocap_rig::{
    run_consumer, Command, CycleSink, JsonLinesSink, Rig, RigConfig, SnapshotSink, Tee,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera marker capture daemon")]
struct Args {
    /// Capture source, overriding the config file (e.g. stub://2, v4l2:///dev/video0,/dev/video2).
    #[arg(long)]
    source: Option<String>,

    /// Use the blob-first detector with the contour fallback.
    #[arg(long)]
    strict: bool,

    /// Write the stitched, annotated frame to this PNG periodically.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Cycles between snapshot writes.
    #[arg(long, default_value_t = 20)]
    snapshot_every: u64,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_commands: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RigConfig::load()?;
    if let Some(source) = args.source {
        config.capture.source = source;
    }
    if args.strict {
        config.detection.strict = true;
    }

    let rig = Arc::new(Rig::new(config));
    let cameras = rig.start_capture()?;
    if cameras == 0 {
        log::warn!("no cameras available; send 'start' on stdin to retry");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = stop.clone();
    ctrlc::set_handler(move || {
        signal_stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    if !args.no_commands {
        let rig = rig.clone();
        std::thread::Builder::new()
            .name("commands".to_string())
            .spawn(move || read_commands(&rig))?;
    }

    let mut sinks: Vec<Box<dyn CycleSink>> = vec![Box::new(JsonLinesSink::new(std::io::stdout()))];
    if let Some(path) = args.snapshot {
        log::info!("writing snapshots to {}", path.display());
        sinks.push(Box::new(SnapshotSink::new(path, args.snapshot_every)));
    }
    let mut sink = Tee(sinks);

    log::info!("mocapd running (Ctrl-C to stop)");
    let summary = run_consumer(&rig, &mut sink, &stop)?;
    log::info!(
        "shutdown signal received after {} reports; stopping capture...",
        summary.reports
    );
    rig.stop_capture()?;
    log::info!("capture stopped");
    Ok(())
}

fn read_commands(rig: &Rig) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("command input closed: {}", err);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line).and_then(|cmd| rig.apply(cmd)) {
            Ok(status) => match serde_json::to_string(&status) {
                Ok(json) => log::info!("status {}", json),
                Err(err) => log::warn!("status not serializable: {}", err),
            },
            Err(err) => log::warn!("command '{}' rejected: {:#}", line.trim(), err),
        }
    }
}
