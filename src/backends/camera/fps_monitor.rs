// SPDX-License-Identifier: GPL-3.0-only

//! Capture frame-rate reporting and freeze detection

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Callback fired when no frames arrive for the freeze timeout
pub type FreezeCallback = Box<dyn Fn() + Send + 'static>;

/// Counts delivered frames on a background thread
///
/// Logs the measured fps every `period` and calls the freeze callback once
/// if no frame arrives for `freeze_timeout`.
pub struct FpsMonitor {
    frames: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FpsMonitor {
    pub fn start(period: Duration, freeze_timeout: Duration, on_freeze: FreezeCallback) -> Self {
        let frames = Arc::new(AtomicU64::new(0));
        let frames_clone = Arc::clone(&frames);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let tick = (period.min(freeze_timeout) / 2).max(Duration::from_millis(10));

        let thread_handle = thread::Builder::new()
            .name("fps-monitor".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut last_report = started;
                let mut reported_frames = 0u64;
                let mut last_seen = 0u64;
                let mut last_progress = started;
                let mut freeze_fired = false;

                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let now = Instant::now();
                    let count = frames_clone.load(Ordering::Relaxed);

                    if count != last_seen {
                        last_seen = count;
                        last_progress = now;
                    } else if !freeze_fired && now.duration_since(last_progress) >= freeze_timeout {
                        warn!(
                            frames = count,
                            idle_ms = now.duration_since(last_progress).as_millis() as u64,
                            "Capture frozen"
                        );
                        freeze_fired = true;
                        on_freeze();
                    }

                    let elapsed = now.duration_since(last_report);
                    if elapsed >= period {
                        let fps = (count - reported_frames) as f64 / elapsed.as_secs_f64();
                        debug!(fps = format!("{:.1}", fps), total = count, "Capture fps");
                        reported_frames = count;
                        last_report = now;
                    }
                }
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to start fps monitor");
                None
            }
        };

        Self {
            frames,
            stop_tx: Some(stop_tx),
            thread_handle,
        }
    }

    /// Record one delivered frame
    pub fn frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!("Fps monitor thread panicked");
        }
    }
}

impl Drop for FpsMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_freeze_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        let mut monitor = FpsMonitor::start(
            Duration::from_millis(20),
            Duration::from_millis(50),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        thread::sleep(Duration::from_millis(300));
        monitor.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_steady_frames_never_freeze() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        let mut monitor = FpsMonitor::start(
            Duration::from_millis(20),
            Duration::from_millis(200),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        for _ in 0..30 {
            monitor.frame();
            thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.frame_count(), 30);
    }
}
