//! Test fakes
//!
//! A scripted screen and device sharing one state, so a test can decide
//! which frame the bot sees next and inspect the input it sent.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use crate::android::{Controller, Device, DeviceError, ScreenCoordinates};
use crate::config::Settings;
use crate::timing::{self, Clock, Waiter};
use crate::vision::{Frame, FrameSource, MemoryTemplateStore, TemplateMatcher};

/// Held by tests that set the global pause flag or rely on it being clear
pub(crate) static PAUSE_FLAG: Mutex<()> = Mutex::new(());

/// Clock that records sleeps instead of blocking
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
    resume_at: Mutex<Option<usize>>,
}

impl ManualClock {
    /// Clear the pause flag once `count` sleeps have been recorded
    pub(crate) fn resume_after(&self, count: usize) {
        if let Ok(mut at) = self.resume_at.lock() {
            *at = Some(self.sleeps().len() + count);
        }
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let recorded = match self.sleeps.lock() {
            Ok(mut sleeps) => {
                sleeps.push(duration);
                sleeps.len()
            }
            Err(_) => return,
        };
        if let Ok(mut at) = self.resume_at.lock() {
            if *at == Some(recorded) {
                *at = None;
                timing::resume();
            }
        }
    }
}

/// When the scripted screen moves to its next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// After every capture
    OnCapture,
    /// After every tap
    OnTap,
}

#[derive(Debug)]
struct FakeState {
    screens: Vec<RgbaImage>,
    current: usize,
    advance: Advance,
    captures: usize,
    taps: Vec<(i32, i32)>,
    swipes: Vec<(i32, i32, i32, i32, u32)>,
    shell: Vec<String>,
    wm_size: String,
    running: Vec<String>,
    fault: bool,
}

impl FakeState {
    fn step(&mut self) {
        if self.current + 1 < self.screens.len() {
            self.current += 1;
        }
    }
}

type Shared = Arc<Mutex<FakeState>>;

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Frame source replaying the scripted screens
pub(crate) struct FakeScreen(Shared);

impl FrameSource for FakeScreen {
    fn get_frame(&self) -> Result<Frame, DeviceError> {
        let mut state = lock(&self.0);
        if state.fault {
            return Err(DeviceError::MirrorUnreachable("fake mirror down".into()));
        }
        let Some(image) = state.screens.get(state.current).cloned() else {
            return Err(DeviceError::NoFrame(Duration::ZERO));
        };
        state.captures += 1;
        let sequence = state.captures as u64;
        if state.advance == Advance::OnCapture {
            state.step();
        }
        Ok(Frame::new(image, Instant::now(), sequence))
    }
}

/// Device recording input
pub(crate) struct FakeDevice(Shared);

impl Device for FakeDevice {
    fn serial(&self) -> &str {
        "fake-device"
    }

    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        let mut state = lock(&self.0);
        state.taps.push((x, y));
        if state.advance == Advance::OnTap {
            state.step();
        }
        Ok(())
    }

    fn swipe(
        &mut self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
    ) -> Result<(), DeviceError> {
        lock(&self.0).swipes.push((x1, y1, x2, y2, duration_ms));
        Ok(())
    }

    fn shell(&mut self, command: &str) -> Result<String, DeviceError> {
        let mut state = lock(&self.0);
        state.shell.push(command.to_string());
        if command == "wm size" {
            return Ok(state.wm_size.clone());
        }
        if let Some(package) = command.strip_prefix("pidof ") {
            if state.running.iter().any(|p| p == package) {
                return Ok("4242\n".to_string());
            }
        }
        Ok(String::new())
    }
}

/// Scripted screen, device, templates and clock for one test
pub(crate) struct FakeRig {
    state: Shared,
    templates: MemoryTemplateStore,
    clock: Arc<ManualClock>,
    settings: Settings,
    diagnostics: tempfile::TempDir,
}

impl FakeRig {
    pub(crate) fn new(screens: Vec<RgbaImage>, advance: Advance) -> Self {
        let diagnostics = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.diagnostics_dir = diagnostics.path().to_path_buf();
        Self {
            state: Arc::new(Mutex::new(FakeState {
                screens,
                current: 0,
                advance,
                captures: 0,
                taps: Vec::new(),
                swipes: Vec::new(),
                shell: Vec::new(),
                wm_size: "Physical size: 1080x1920\n".to_string(),
                running: Vec::new(),
                fault: false,
            })),
            templates: MemoryTemplateStore::new(),
            clock: Arc::new(ManualClock::default()),
            settings,
            diagnostics,
        }
    }

    pub(crate) fn with_template(mut self, name: &str, image: RgbaImage) -> Self {
        self.templates.insert(name, image);
        self
    }

    pub(crate) fn with_settings(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub(crate) fn with_wm_size(self, output: &str) -> Self {
        lock(&self.state).wm_size = output.to_string();
        self
    }

    pub(crate) fn with_running(self, package: &str) -> Self {
        lock(&self.state).running.push(package.to_string());
        self
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn set_fault(&self, fault: bool) {
        lock(&self.state).fault = fault;
    }

    pub(crate) fn screen(&self) -> FakeScreen {
        FakeScreen(Arc::clone(&self.state))
    }

    pub(crate) fn device(&self) -> FakeDevice {
        FakeDevice(Arc::clone(&self.state))
    }

    pub(crate) fn template_store(&self) -> MemoryTemplateStore {
        self.templates.clone()
    }

    pub(crate) fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn waiter(&self) -> Waiter {
        Waiter::new(self.clock.clone(), self.settings.timings.wait_multiplier)
            .with_pause_poll(self.settings.timings.pause_poll)
    }

    pub(crate) fn matcher(&self) -> TemplateMatcher {
        TemplateMatcher::new(
            Box::new(self.screen()),
            Box::new(self.template_store()),
            self.waiter(),
        )
        .with_retry_wait(self.settings.timings.retry_wait)
    }

    pub(crate) fn controller(&self) -> Controller {
        Controller::new(
            Box::new(self.device()),
            self.matcher(),
            self.waiter(),
            ScreenCoordinates::default(),
            &self.settings,
        )
    }

    pub(crate) fn diagnostics_dir(&self) -> &Path {
        self.diagnostics.path()
    }

    pub(crate) fn diagnostic_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.diagnostics.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub(crate) fn captures(&self) -> usize {
        lock(&self.state).captures
    }

    pub(crate) fn taps(&self) -> Vec<(i32, i32)> {
        lock(&self.state).taps.clone()
    }

    pub(crate) fn swipes(&self) -> Vec<(i32, i32, i32, i32, u32)> {
        lock(&self.state).swipes.clone()
    }

    pub(crate) fn shell_log(&self) -> Vec<String> {
        lock(&self.state).shell.clone()
    }
}

/// Opaque black image
pub(crate) fn blank(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

/// Deterministic binary noise, each channel 0 or 255
pub(crate) fn pattern(width: u32, height: u32, seed: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let h = hash(x, y, seed);
        let bit = |n: u32| if (h >> n) & 1 == 1 { 255 } else { 0 };
        Rgba([bit(3), bit(11), bit(19), 255])
    })
}

/// Copy `template` into `frame` with its top-left corner at (x, y)
pub(crate) fn paste(frame: &mut RgbaImage, template: &RgbaImage, x: u32, y: u32) {
    image::imageops::replace(frame, template, i64::from(x), i64::from(y));
}

fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = x.wrapping_mul(0x9E37_79B1)
        ^ y.wrapping_mul(0x85EB_CA77)
        ^ seed.wrapping_add(1).wrapping_mul(0xC2B2_AE3D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    h = h.wrapping_mul(0x297A_2D39);
    h ^= h >> 15;
    h
}
