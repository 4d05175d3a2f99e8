//! Screen capture handling
//!
//! A background thread pulls raw frames from the device feed and keeps only
//! the newest one. Readers always get the latest snapshot; older frames are
//! dropped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::RgbaImage;

use super::{Frame, REFERENCE_HEIGHT, REFERENCE_WIDTH};
use crate::android::{DeviceError, FrameFeed};

/// Anything that can hand out the current screen
pub trait FrameSource: Send {
    /// Get the most recent frame
    ///
    /// May block briefly until the first frame arrives. A broken mirror is
    /// reported as an error instead of returning a stale frame.
    fn get_frame(&self) -> Result<Frame, DeviceError>;
}

/// How a raw frame was brought to the reference resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Already at the reference resolution
    Native,
    /// Same aspect ratio, resized to the reference resolution
    Rescaled,
    /// Landscape or non-9:16; left as captured
    Unsupported,
}

/// Bring a raw frame to the 1080x1920 reference resolution when possible
pub fn normalize(raw: RgbaImage) -> (RgbaImage, Normalization) {
    let (width, height) = raw.dimensions();
    if (width, height) == (REFERENCE_WIDTH, REFERENCE_HEIGHT) {
        return (raw, Normalization::Native);
    }
    if is_reference_aspect(width, height) {
        let resized = image::imageops::resize(
            &raw,
            REFERENCE_WIDTH,
            REFERENCE_HEIGHT,
            FilterType::Triangle,
        );
        return (resized, Normalization::Rescaled);
    }
    (raw, Normalization::Unsupported)
}

/// Check if a size shares the portrait 9:16 reference aspect ratio
pub fn is_reference_aspect(width: u32, height: u32) -> bool {
    width > 0
        && height > 0
        && u64::from(width) * u64::from(REFERENCE_HEIGHT)
            == u64::from(height) * u64::from(REFERENCE_WIDTH)
}

/// Frame source options
#[derive(Debug, Clone, Copy)]
pub struct MirrorOptions {
    /// Upper bound on frames pulled per second
    pub max_fps: u32,
    /// How long `get_frame` waits for the very first frame
    pub first_frame_timeout: Duration,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            max_fps: 5,
            first_frame_timeout: Duration::from_secs(10),
        }
    }
}

/// Latest-frame slot shared with the pump thread
#[derive(Default)]
struct Slot {
    latest: Option<Frame>,
    fault: Option<String>,
    sequence: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
    stop: AtomicBool,
}

/// Frame source mirroring the device screen on a background thread
pub struct Mirror {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    first_frame_timeout: Duration,
}

impl Mirror {
    /// Start mirroring from a frame feed
    pub fn connect<F: FrameFeed>(feed: F, options: MirrorOptions) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let interval = Duration::from_millis(1000 / u64::from(options.max_fps.max(1)));

        let pump_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("frame-mirror".into())
            .spawn(move || pump(feed, pump_shared, interval))?;

        log::info!("Screen mirror started at up to {} fps", options.max_fps.max(1));
        Ok(Self {
            shared,
            handle: Some(handle),
            first_frame_timeout: options.first_frame_timeout,
        })
    }

    /// Number of frames received so far
    pub fn frame_count(&self) -> u64 {
        self.shared.slot.lock().map(|slot| slot.sequence).unwrap_or(0)
    }

    /// Stop the pump thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.ready.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Frame mirror thread panicked");
            }
        }
    }
}

impl FrameSource for Mirror {
    fn get_frame(&self) -> Result<Frame, DeviceError> {
        let poisoned = || DeviceError::MirrorUnreachable("frame slot poisoned".into());
        let deadline = Instant::now() + self.first_frame_timeout;
        let mut slot = self.shared.slot.lock().map_err(|_| poisoned())?;

        loop {
            if let Some(fault) = &slot.fault {
                return Err(DeviceError::MirrorUnreachable(fault.clone()));
            }
            if let Some(frame) = &slot.latest {
                return Ok(frame.clone());
            }
            if self.shared.stop.load(Ordering::SeqCst) {
                return Err(DeviceError::MirrorUnreachable("mirror stopped".into()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::NoFrame(self.first_frame_timeout));
            }
            let (next, _) = self
                .shared
                .ready
                .wait_timeout(slot, deadline - now)
                .map_err(|_| poisoned())?;
            slot = next;
        }
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump<F: FrameFeed>(mut feed: F, shared: Arc<Shared>, interval: Duration) {
    let mut warned = false;

    while !shared.stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        let result = feed.next_frame();

        let Ok(mut slot) = shared.slot.lock() else {
            break;
        };
        match result {
            Ok(raw) => {
                let raw_size = raw.dimensions();
                let (image, normalization) = normalize(raw);
                if normalization == Normalization::Unsupported && !warned {
                    log::warn!(
                        "Unsupported frame size {}x{}, matching on unscaled frames; \
                         only 9:16 portrait resolutions are reliable",
                        raw_size.0,
                        raw_size.1
                    );
                    warned = true;
                }
                slot.sequence += 1;
                slot.latest = Some(Frame::new(image, Instant::now(), slot.sequence));
                if slot.fault.take().is_some() {
                    log::info!("Screen mirror recovered");
                }
            }
            Err(e) => {
                if slot.fault.is_none() {
                    log::error!("Screen mirror fault: {}", e);
                }
                slot.fault = Some(e.to_string());
            }
        }
        drop(slot);
        shared.ready.notify_all();

        let elapsed = started.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}
