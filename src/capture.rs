//! Capture loop.
//!
//! `CaptureSession::spawn` moves a started driver into a dedicated thread that reads at the
//! driver's native rate and writes every frame into the shared `FrameBuffer`. The thread hands
//! the driver back through its `JoinHandle`, so `stop` can only release the driver after the
//! loop has fully exited.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::FrameBuffer;
use crate::ingest::CaptureDriver;
use crate::settings::Settings;

/// Counters shared between the capture thread and observers.
#[derive(Debug, Default)]
pub struct CaptureStats {
    reads: AtomicU64,
    faults: AtomicU64,
}

impl CaptureStats {
    pub fn frames_captured(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

pub struct CaptureSession {
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    join: Option<JoinHandle<Box<dyn CaptureDriver>>>,
}

impl CaptureSession {
    /// Start the capture thread. `driver` must already be started.
    pub fn spawn(
        driver: Box<dyn CaptureDriver>,
        settings: Arc<Settings>,
        buffer: Arc<FrameBuffer>,
        yield_interval: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());
        let loop_stop = stop.clone();
        let loop_stats = stats.clone();
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                capture_loop(
                    driver,
                    &settings,
                    &buffer,
                    &loop_stop,
                    &loop_stats,
                    yield_interval,
                )
            })
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e))?;
        Ok(Self {
            stop,
            stats,
            join: Some(join),
        })
    }

    /// False once the stop flag is set, including a self-terminating fault.
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
            && self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Signal stop, wait for the loop to exit, then release the driver.
    pub fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("capture session already stopped"))?;
        let mut driver = join
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))?;
        log::info!(
            "capture loop joined after {} reads; releasing {} driver",
            self.stats.frames_captured(),
            driver.name()
        );
        driver.stop()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // A session dropped without `stop` still joins before the driver is dropped.
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(mut driver) => {
                    if let Err(err) = driver.stop() {
                        log::warn!("capture driver release on drop failed: {:#}", err);
                    }
                }
                Err(_) => log::error!("capture thread panicked"),
            }
        }
    }
}

fn capture_loop(
    mut driver: Box<dyn CaptureDriver>,
    settings: &Settings,
    buffer: &FrameBuffer,
    stop: &AtomicBool,
    stats: &CaptureStats,
    yield_interval: Duration,
) -> Box<dyn CaptureDriver> {
    let mut applied = settings.exposure_gain();
    while !stop.load(Ordering::SeqCst) {
        let requested = settings.exposure_gain();
        if requested != applied {
            match driver.set_exposure_gain(requested.0, requested.1) {
                Ok(()) => log::info!(
                    "applied exposure={} gain={} on {}",
                    requested.0,
                    requested.1,
                    driver.name()
                ),
                Err(err) => log::warn!("failed to apply exposure/gain: {:#}", err),
            }
            applied = requested;
        }

        let result = driver.read().and_then(|frames| buffer.put_all(frames));
        match result {
            Ok(()) => {
                stats.reads.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                stats.faults.fetch_add(1, Ordering::Relaxed);
                log::error!("capture loop fault, stopping capture: {:#}", err);
                stop.store(true, Ordering::SeqCst);
                break;
            }
        }
        std::thread::sleep(yield_interval);
    }
    log::info!("capture loop stopped");
    driver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::ingest::open_driver;
    use std::time::Instant;

    fn started(source: &str) -> Box<dyn CaptureDriver> {
        let mut driver = open_driver(source).unwrap();
        driver.start(&CaptureConfig::default()).unwrap();
        driver
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn fills_buffer_and_stops_cleanly() {
        let buffer = Arc::new(FrameBuffer::new());
        let session = CaptureSession::spawn(
            started("stub://2"),
            Arc::new(Settings::default()),
            buffer.clone(),
            Duration::from_millis(1),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || buffer.len() == 2));
        assert!(session.is_running());
        session.stop().unwrap();
    }

    #[test]
    fn driver_fault_self_terminates() {
        let buffer = Arc::new(FrameBuffer::new());
        let session = CaptureSession::spawn(
            started("stub://1?fail_after=3"),
            Arc::new(Settings::default()),
            buffer.clone(),
            Duration::from_millis(1),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || !session.is_running()));
        let stats = session.stats();
        assert_eq!(stats.frames_captured(), 3);
        assert_eq!(stats.faults(), 1);
        // The last good frame stays readable after the fault.
        assert_eq!(buffer.len(), 1);
        session.stop().unwrap();
    }
}
