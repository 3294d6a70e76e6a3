//! Frame counters with periodic frames-per-second logging.
//!
//! Counted across all connections: `received` ticks when a frame enters a processor, `annotated`
//! when it comes back annotated and `dropped` when it is rejected with an error and not returned.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    received_frames: AtomicU64,
    annotated_frames: AtomicU64,
    dropped_frames: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            received_frames: AtomicU64::new(0),
            annotated_frames: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn tick_received(&self) {
        self.received_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_annotated(&self) {
        self.annotated_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_received(&self) -> u64 {
        self.received_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_annotated(&self) -> u64 {
        self.annotated_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_dropped(&self) -> u64 {
        self.dropped_frames.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let received_frames = METER.get_reset_received();
            let annotated_frames = METER.get_reset_annotated();
            let dropped_frames = METER.get_reset_dropped();
            let elapsed = start.elapsed().as_secs_f32();
            let fps_received = received_frames as f32 / elapsed;
            let fps_annotated = annotated_frames as f32 / elapsed;

            if received_frames > 0 {
                log::info!("Received frames per second: {fps_received:.2}")
            }
            if annotated_frames > 0 {
                log::info!("Annotated frames per second: {fps_annotated:.2}")
            }
            if dropped_frames > 0 {
                log::warn!("Dropped {dropped_frames} frames in the last {elapsed:.1}s")
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::Meter;

    #[test]
    fn test_get_reset() {
        let meter = Meter::new();
        meter.tick_received();
        meter.tick_received();
        meter.tick_annotated();
        meter.tick_dropped();

        assert_eq!(meter.get_reset_received(), 2);
        assert_eq!(meter.get_reset_annotated(), 1);
        assert_eq!(meter.get_reset_dropped(), 1);
        assert_eq!(meter.get_reset_received(), 0);
    }
}
