//! AutoAFK - template-matching automation for AFK Journey
//!
//! This library drives the game over ADB: it mirrors the screen, finds UI
//! elements by template matching and sends taps and swipes. On top of those
//! primitives sit the recovery protocol that keeps every task anchored to
//! the main map, and the stage-push state machine used for grinding.
//!
//! ## Session
//!
//! A [`Session`] owns the device, the frame source and the controller. Only
//! one can exist per process, since taps to one device are an exclusive,
//! ordered channel.

pub mod android;
pub mod config;
pub mod game;
pub mod timing;
pub mod vision;

#[cfg(test)]
mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::android::{AdbDevice, Controller, Device, DeviceError, ScreenCoordinates};
use crate::config::{ConfigError, Settings};
use crate::game::{run_sequence, PushModeKind, PushReport, Recovery, TaskCheckpoint, TaskError};
use crate::timing::{Clock, SystemClock, Waiter};
use crate::vision::capture::{is_reference_aspect, MirrorOptions};
use crate::vision::{
    DirTemplateStore, FrameSource, Mirror, TemplateMatcher, TemplateStore, VisionError,
};

/// Crate-wide error
#[derive(Debug, thiserror::Error)]
pub enum AutoError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a session is already active in this process")]
    SessionActive,
}

/// Result alias defaulting to [`AutoError`]
pub type Result<T, E = AutoError> = std::result::Result<T, E>;

/// Set while a [`Session`] exists
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The one live connection to a device
pub struct Session {
    settings: Settings,
    controller: Controller,
    recovery: Recovery,
    resolution: (u32, u32),
}

impl Session {
    /// Create the session from its collaborators
    ///
    /// Queries the device resolution: landscape is rejected, portrait sizes
    /// other than 9:16 are accepted with a warning.
    pub fn init(
        settings: Settings,
        mut device: Box<dyn Device>,
        source: Box<dyn FrameSource>,
        templates: Box<dyn TemplateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;
        if SESSION_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(AutoError::SessionActive);
        }

        let resolution = match check_resolution(device.as_mut()) {
            Ok(resolution) => resolution,
            Err(e) => {
                SESSION_ACTIVE.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let waiter = Waiter::new(clock, settings.timings.wait_multiplier)
            .with_pause_poll(settings.timings.pause_poll);
        let matcher = TemplateMatcher::new(source, templates, waiter.clone())
            .with_retry_wait(settings.timings.retry_wait);
        let coords = ScreenCoordinates::new(resolution.0, resolution.1);
        let controller = Controller::new(device, matcher, waiter, coords, &settings);
        let recovery = Recovery::new(&settings.recovery);

        log::info!("Session started on {}", controller.serial());
        Ok(Self {
            settings,
            controller,
            recovery,
            resolution,
        })
    }

    /// Connect over ADB and start mirroring, as configured
    pub fn connect_adb(settings: Settings) -> Result<Self> {
        let device = AdbDevice::connect(&settings.device)?;
        let options = MirrorOptions {
            max_fps: settings.device.max_fps,
            first_frame_timeout: Duration::from_millis(settings.device.first_frame_timeout_ms),
        };
        let mirror = Mirror::connect(device.screencap(), options)?;
        let templates = DirTemplateStore::new(&settings.paths.template_dir);

        Self::init(
            settings,
            Box::new(device),
            Box::new(mirror),
            Box::new(templates),
            Arc::new(SystemClock),
        )
    }

    /// Get the settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Device resolution reported at init
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Get the controller
    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Get the recovery protocol
    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    /// Run a task bracketed by the open and close checkpoints
    ///
    /// Disabled activities are skipped and return `None`. The close
    /// checkpoint runs even if the task fails, and a failed close fails a
    /// task that succeeded. A task's own error wins over a close failure.
    pub fn run_task<T>(
        &mut self,
        name: &str,
        task: impl FnOnce(&mut Controller) -> Result<T>,
    ) -> Result<Option<T>> {
        if !self.settings.activity_enabled(name) {
            log::info!("{} disabled, skipping", name);
            return Ok(None);
        }

        let ctl = &mut self.controller;
        self.recovery
            .safe_open_and_close(ctl, &TaskCheckpoint::open(name))?;
        let output = task(ctl);
        let closed = self
            .recovery
            .safe_open_and_close(ctl, &TaskCheckpoint::close(name));
        match (output, closed) {
            (Ok(output), Ok(())) => Ok(Some(output)),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close) = closed {
                    log::error!("{} also failed to close: {}", name, close);
                }
                Err(e)
            }
        }
    }

    /// Push a grinding mode until each of its stages terminates
    ///
    /// Kinds with several stages return one report per stage that could be
    /// opened.
    pub fn push(&mut self, kind: PushModeKind) -> Result<Vec<PushReport>> {
        let name = kind.name();
        let mut modes = kind.handlers();
        let ctl = &mut self.controller;

        self.recovery
            .safe_open_and_close(ctl, &TaskCheckpoint::open(&name))?;
        let reports = run_sequence(&self.settings.pushing, ctl, &self.recovery, &mut modes);
        let closed = self
            .recovery
            .safe_open_and_close(ctl, &TaskCheckpoint::close(&name));
        let reports = reports?;
        closed?;
        Ok(reports)
    }

    /// Check whether `package` has a running process on the device
    pub fn is_game_running(&mut self, package: &str) -> Result<bool> {
        let output = self.controller.shell(&format!("pidof {package}"))?;
        Ok(!output.trim().is_empty())
    }

    /// End the session
    pub fn teardown(self) {
        log::info!("Session on {} closed", self.controller.serial());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

fn check_resolution(device: &mut dyn Device) -> Result<(u32, u32), DeviceError> {
    let (width, height) = android::parse_wm_size(&device.shell("wm size")?)?;
    if width > height {
        return Err(DeviceError::UnsupportedOrientation { width, height });
    }
    if is_reference_aspect(width, height) {
        log::info!("Device resolution {}x{}", width, height);
    } else {
        log::warn!(
            "Unsupported resolution {}x{}, only 9:16 portrait devices are reliable",
            width,
            height
        );
    }
    Ok((width, height))
}
