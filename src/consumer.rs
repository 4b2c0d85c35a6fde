//! Fixed-cadence consumer loop.
//!
//! Each tick runs `Rig::run_cycle` and hands the report to a `CycleSink`. The loop never
//! touches the capture driver; it only reads the frame buffer through the rig, so a slow
//! sink never blocks capture.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::rig::{CycleReport, Rig};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Receiver of cycle reports (the transport boundary).
pub trait CycleSink {
    fn emit(&mut self, report: &CycleReport) -> Result<()>;
}

/// One JSON document per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> CycleSink for JsonLinesSink<W> {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        serde_json::to_writer(&mut self.out, report).context("serialize cycle report")?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Writes the stitched, annotated frame to a PNG every `every` cycles.
pub struct SnapshotSink {
    path: PathBuf,
    every: u64,
}

impl SnapshotSink {
    pub fn new(path: PathBuf, every: u64) -> Self {
        Self {
            path,
            every: every.max(1),
        }
    }
}

impl CycleSink for SnapshotSink {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        if report.cycle % self.every != 0 {
            return Ok(());
        }
        if let Some(stitched) = &report.stitched {
            stitched
                .save(&self.path)
                .with_context(|| format!("write snapshot {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Fan a report out to several sinks; every sink runs even if an earlier one fails.
pub struct Tee(pub Vec<Box<dyn CycleSink>>);

impl CycleSink for Tee {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.0 {
            if let Err(err) = sink.emit(report) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Totals of one consumer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub ticks: u64,
    pub reports: u64,
    pub sink_errors: u64,
}

/// Tick at the configured cycle rate until `stop` is set.
pub fn run_consumer(
    rig: &Rig,
    sink: &mut dyn CycleSink,
    stop: &AtomicBool,
) -> Result<ConsumerSummary> {
    let interval = rig.config().cycle_interval();
    let mut summary = ConsumerSummary::default();
    let mut last_health_log = Instant::now();
    log::info!("consumer loop running every {:?}", interval);

    while !stop.load(Ordering::SeqCst) {
        let tick = Instant::now();
        summary.ticks += 1;
        match rig.run_cycle() {
            Ok(Some(report)) => {
                summary.reports += 1;
                if let Err(err) = sink.emit(&report) {
                    summary.sink_errors += 1;
                    log::warn!("cycle {} not delivered: {:#}", report.cycle, err);
                }
            }
            Ok(None) => {}
            Err(err) => log::error!("cycle failed: {:#}", err),
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let frames = rig.capture_stats().map_or(0, |s| s.frames_captured());
            log::info!(
                "health capturing={} cameras={} frames={} reports={} matcher_initialized={}",
                rig.is_capturing(),
                rig.camera_count(),
                frames,
                summary.reports,
                rig.is_initialized()
            );
            last_health_log = Instant::now();
        }

        std::thread::sleep(interval.saturating_sub(tick.elapsed()));
    }
    log::info!(
        "consumer loop stopped after {} ticks ({} reports)",
        summary.ticks,
        summary.reports
    );
    Ok(summary)
}
