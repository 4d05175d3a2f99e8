//! Touch input and interaction primitives
//!
//! Every coordinate the bot uses is in the 1080x1920 reference space.
//! [`ScreenCoordinates`] maps those onto the device, and [`Controller`]
//! combines the matcher with the device port into click/tap/swipe
//! primitives. Each successful primitive sends exactly one input event.

use std::path::PathBuf;

use image::Rgba;

use super::{Device, DeviceError, SwipeCommand, TapCommand};
use crate::config::Settings;
use crate::timing::Waiter;
use crate::vision::capture::is_reference_aspect;
use crate::vision::{
    Diagnostics, Frame, Match, MatchOptions, MatchResult, TemplateMatcher, REFERENCE_HEIGHT,
    REFERENCE_WIDTH,
};

/// Maps reference coordinates to device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenCoordinates {
    /// Reference width
    pub ref_width: u32,
    /// Reference height
    pub ref_height: u32,
    /// Device screen width
    pub screen_width: u32,
    /// Device screen height
    pub screen_height: u32,
}

impl ScreenCoordinates {
    /// Create coordinates for a device resolution
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            ref_width: REFERENCE_WIDTH,
            ref_height: REFERENCE_HEIGHT,
            screen_width,
            screen_height,
        }
    }

    /// Check if reference coordinates can be scaled onto this device
    ///
    /// Only same-aspect devices are scaled. Anything else keeps reference
    /// coordinates as-is, matching the un-rescaled frames it produces.
    pub fn scales(&self) -> bool {
        is_reference_aspect(self.screen_width, self.screen_height)
    }

    /// Scale X coordinate from reference to device
    pub fn scale_x(&self, x: i32) -> i32 {
        if !self.scales() {
            return x;
        }
        ((x as f32 * self.screen_width as f32) / self.ref_width as f32) as i32
    }

    /// Scale Y coordinate from reference to device
    pub fn scale_y(&self, y: i32) -> i32 {
        if !self.scales() {
            return y;
        }
        ((y as f32 * self.screen_height as f32) / self.ref_height as f32) as i32
    }

    /// Map a reference point to device pixels, rejecting points off the screen
    pub fn to_device(&self, x: i32, y: i32) -> Result<(i32, i32), DeviceError> {
        let (dx, dy) = (self.scale_x(x), self.scale_y(y));
        let inside = dx >= 0
            && dy >= 0
            && (dx as u32) < self.screen_width
            && (dy as u32) < self.screen_height;
        if !inside {
            return Err(DeviceError::TapOutOfBounds {
                x,
                y,
                width: self.screen_width,
                height: self.screen_height,
            });
        }
        Ok((dx, dy))
    }
}

impl Default for ScreenCoordinates {
    fn default() -> Self {
        Self::new(REFERENCE_WIDTH, REFERENCE_HEIGHT)
    }
}

/// Interaction primitives over one device
pub struct Controller {
    device: Box<dyn Device>,
    matcher: TemplateMatcher,
    waiter: Waiter,
    coords: ScreenCoordinates,
    diagnostics: Diagnostics,
    defaults: MatchOptions,
    tap_settle: f32,
    neutral: (i32, i32),
}

impl Controller {
    /// Create a controller, taking defaults from `settings`
    pub fn new(
        device: Box<dyn Device>,
        matcher: TemplateMatcher,
        waiter: Waiter,
        coords: ScreenCoordinates,
        settings: &Settings,
    ) -> Self {
        let defaults = MatchOptions::new()
            .with_confidence(settings.matching.confidence)
            .with_retries(settings.matching.retries);
        Self {
            device,
            matcher,
            waiter,
            coords,
            diagnostics: Diagnostics::new(&settings.paths.diagnostics_dir),
            defaults,
            tap_settle: settings.timings.tap_settle,
            neutral: settings.recovery.neutral_point,
        }
    }

    /// Match options carrying the configured confidence and retries
    pub fn options(&self) -> MatchOptions {
        self.defaults
    }

    /// Get the coordinate mapping
    pub fn coords(&self) -> ScreenCoordinates {
        self.coords
    }

    /// Get the waiter
    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// Get the diagnostics writer
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Get the matcher
    pub fn matcher(&self) -> &TemplateMatcher {
        &self.matcher
    }

    /// Get the device serial
    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    /// Run a shell command on the device
    pub fn shell(&mut self, command: &str) -> crate::Result<String> {
        Ok(self.device.shell(command)?)
    }

    /// Capture the current frame
    pub fn frame(&self) -> crate::Result<Frame> {
        Ok(self.matcher.frame()?)
    }

    /// Locate `name` without tapping
    pub fn locate(&self, name: &str, opts: &MatchOptions) -> crate::Result<MatchResult> {
        self.matcher.is_visible(name, opts)
    }

    /// Check if `name` is visible, without tapping
    pub fn is_visible(&self, name: &str, opts: &MatchOptions) -> crate::Result<bool> {
        Ok(self.locate(name, opts)?.is_found())
    }

    /// Tap the centre of `name` if it is found
    ///
    /// A miss is not an error; it is logged and `false` returned.
    pub fn click(&mut self, name: &str, opts: &MatchOptions) -> crate::Result<bool> {
        match self.locate(name, opts)? {
            MatchResult::Found(m) => {
                self.tap_match(&m, opts)?;
                Ok(true)
            }
            MatchResult::NotFound => {
                if !opts.quiet {
                    log::info!("{} not found, skipping click", name);
                }
                Ok(false)
            }
        }
    }

    /// Tap the bottom-most occurrence of `name`
    pub fn click_last(&mut self, name: &str, opts: &MatchOptions) -> crate::Result<bool> {
        let found = self.matcher.find_all(name, opts)?;
        // Raster order, so the last one is the lowest on screen
        match found.last() {
            Some(m) => {
                log::debug!("{} matches for {}, tapping the last", found.len(), name);
                self.tap_match(m, opts)?;
                Ok(true)
            }
            None => {
                if !opts.quiet {
                    log::info!("{} not found, skipping click", name);
                }
                Ok(false)
            }
        }
    }

    /// Tap the first of `names` visible in one frame, in priority order
    pub fn click_array<'a>(
        &mut self,
        names: &[&'a str],
        opts: &MatchOptions,
    ) -> crate::Result<Option<&'a str>> {
        match self.matcher.first_of(names, opts)? {
            Some((name, m)) => {
                self.tap_match(&m, opts)?;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// Find the first of `names` visible in one frame, without tapping
    pub fn first_of<'a>(
        &self,
        names: &[&'a str],
        opts: &MatchOptions,
    ) -> crate::Result<Option<(&'a str, Match)>> {
        self.matcher.first_of(names, opts)
    }

    /// Tap a reference coordinate and settle for the default time
    pub fn tap(&mut self, x: i32, y: i32) -> crate::Result<()> {
        self.execute_tap(TapCommand::new(x, y, self.tap_settle))
    }

    /// Tap a reference coordinate and settle for `seconds`
    pub fn tap_and_wait(&mut self, x: i32, y: i32, seconds: f32) -> crate::Result<()> {
        self.execute_tap(TapCommand::new(x, y, seconds))
    }

    /// Tap the neutral point
    pub fn tap_neutral(&mut self) -> crate::Result<()> {
        let (x, y) = self.neutral;
        self.tap(x, y)
    }

    /// Send a tap to the device
    pub fn execute_tap(&mut self, cmd: TapCommand) -> crate::Result<()> {
        let (x, y) = self.coords.to_device(cmd.x, cmd.y)?;
        self.device.tap(x, y)?;
        self.waiter.wait(cmd.settle);
        Ok(())
    }

    /// Send a swipe to the device
    pub fn swipe(&mut self, cmd: SwipeCommand) -> crate::Result<()> {
        let (x1, y1) = self.coords.to_device(cmd.start_x, cmd.start_y)?;
        let (x2, y2) = self.coords.to_device(cmd.end_x, cmd.end_y)?;
        self.device.swipe(x1, y1, x2, y2, cmd.duration_ms)?;
        self.waiter.wait(cmd.settle);
        Ok(())
    }

    /// Read a pixel of the current frame at a reference coordinate
    pub fn pixel(&self, x: u32, y: u32) -> crate::Result<Option<Rgba<u8>>> {
        Ok(self.frame()?.pixel(x, y))
    }

    /// Save the current frame as a diagnostic screenshot
    pub fn save_diagnostic(&self, tag: &str) -> crate::Result<PathBuf> {
        let frame = self.frame()?;
        Ok(self.diagnostics.save(&frame, tag)?)
    }

    /// Wait `seconds` wait units
    pub fn wait(&self, seconds: f32) {
        self.waiter.wait(seconds);
    }

    /// Block while the pause flag is set
    pub fn hold_while_paused(&self) -> bool {
        self.waiter.hold_while_paused()
    }

    fn tap_match(&mut self, m: &Match, opts: &MatchOptions) -> crate::Result<()> {
        let (cx, cy) = m.center();
        let (dx, dy) = opts.offset;
        let settle = opts.settle.unwrap_or(self.tap_settle);
        self.execute_tap(TapCommand::new(cx + dx, cy + dy, settle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blank, paste, pattern, Advance, FakeRig};
    use crate::AutoError;

    #[test]
    fn test_coordinate_scaling() {
        let coords = ScreenCoordinates::new(720, 1280);
        assert!(coords.scales());
        assert_eq!(coords.scale_x(540), 360);
        assert_eq!(coords.scale_y(960), 640);
        assert_eq!(coords.to_device(1080, 10).ok(), None);
    }

    #[test]
    fn test_other_aspect_is_identity() {
        let coords = ScreenCoordinates::new(720, 1600);
        assert!(!coords.scales());
        assert_eq!(coords.to_device(700, 1500).unwrap(), (700, 1500));
        assert!(matches!(
            coords.to_device(800, 100),
            Err(DeviceError::TapOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_tap_out_of_bounds_sends_nothing() {
        let rig = FakeRig::new(vec![blank(40, 40)], Advance::OnCapture);
        let mut ctl = rig.controller();

        let result = ctl.tap(-5, 10);
        assert!(matches!(
            result,
            Err(AutoError::Device(DeviceError::TapOutOfBounds { .. }))
        ));
        assert!(rig.taps().is_empty());
    }

    #[test]
    fn test_tap_settles() {
        let rig = FakeRig::new(vec![blank(40, 40)], Advance::OnCapture);
        let mut ctl = rig.controller();

        ctl.tap_and_wait(10, 20, 2.0).unwrap();
        assert_eq!(rig.taps(), vec![(10, 20)]);
        assert_eq!(rig.clock().total(), std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_click_taps_center_with_offset() {
        let template = pattern(10, 10, 4);
        let mut frame = blank(60, 60);
        paste(&mut frame, &template, 20, 30);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template("buttons/battle", template);
        let mut ctl = rig.controller();

        let opts = ctl.options().with_offset(0, -5);
        assert!(ctl.click("buttons/battle", &opts).unwrap());
        assert_eq!(rig.taps(), vec![(25, 30)]);
    }

    #[test]
    fn test_click_miss_is_not_an_error() {
        let rig = FakeRig::new(vec![blank(40, 40)], Advance::OnCapture)
            .with_template("buttons/battle", pattern(8, 8, 1));
        let mut ctl = rig.controller();

        let opts = ctl.options().with_retries(1);
        assert!(!ctl.click("buttons/battle", &opts).unwrap());
        assert!(rig.taps().is_empty());
    }

    #[test]
    fn test_click_found_on_third_capture() {
        let template = pattern(10, 10, 9);
        let mut shown = blank(50, 50);
        paste(&mut shown, &template, 5, 5);
        let rig = FakeRig::new(vec![blank(50, 50), blank(50, 50), shown], Advance::OnCapture)
            .with_template("buttons/battle", template);
        let mut ctl = rig.controller();

        let opts = ctl.options().with_retries(3);
        assert!(ctl.click("buttons/battle", &opts).unwrap());
        assert_eq!(rig.captures(), 3);
        assert_eq!(rig.taps(), vec![(10, 10)]);
    }

    #[test]
    fn test_click_last_taps_bottom_most() {
        let template = pattern(10, 10, 13);
        let mut frame = blank(80, 120);
        paste(&mut frame, &template, 10, 10);
        paste(&mut frame, &template, 50, 90);
        paste(&mut frame, &template, 30, 50);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template("buttons/join", template);
        let mut ctl = rig.controller();

        let opts = ctl.options();
        assert!(ctl.click_last("buttons/join", &opts).unwrap());
        assert_eq!(rig.taps(), vec![(55, 95)]);
    }

    #[test]
    fn test_click_array_honors_priority() {
        let a = pattern(10, 10, 31);
        let b = pattern(10, 10, 32);
        let c = pattern(10, 10, 33);
        let mut frame = blank(80, 80);
        // C sits above B so raster order alone would pick it
        paste(&mut frame, &c, 10, 10);
        paste(&mut frame, &b, 40, 50);
        let rig = FakeRig::new(vec![frame], Advance::OnCapture)
            .with_template("A", a)
            .with_template("B", b)
            .with_template("C", c);
        let mut ctl = rig.controller();

        let opts = ctl.options();
        let hit = ctl.click_array(&["A", "B", "C"], &opts).unwrap();
        assert_eq!(hit, Some("B"));
        assert_eq!(rig.taps(), vec![(45, 55)]);
        assert_eq!(rig.captures(), 1);
    }

    #[test]
    fn test_swipe_passthrough() {
        let rig = FakeRig::new(vec![blank(40, 40)], Advance::OnCapture);
        let mut ctl = rig.controller();

        ctl.swipe(SwipeCommand {
            start_x: 700,
            start_y: 1800,
            end_x: 250,
            end_y: 1800,
            duration_ms: 2000,
            settle: 1.0,
        })
        .unwrap();
        assert_eq!(rig.swipes(), vec![(700, 1800, 250, 1800, 2000)]);
    }

    #[test]
    fn test_save_diagnostic_writes_png() {
        let rig = FakeRig::new(vec![blank(20, 20)], Advance::OnCapture);
        let ctl = rig.controller();

        let path = ctl.save_diagnostic("battle_timeout").unwrap();
        assert!(path.starts_with(rig.diagnostics_dir()));
        assert!(path.exists());
    }
}
