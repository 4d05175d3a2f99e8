//! ADB-backed device port
//!
//! Shells out to the `adb` executable for input, shell commands and
//! screen captures. Starting the ADB server and launching the game are left
//! to the operator.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use image::RgbaImage;

use super::{Device, DeviceError, FrameFeed};
use crate::config::DeviceSettings;

/// A device reached through `adb -s <serial>`
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: String,
}

impl AdbDevice {
    /// Wrap an already-known serial without probing it
    pub fn new(adb_path: impl Into<PathBuf>, serial: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: serial.into(),
        }
    }

    /// Find and connect to the configured device
    ///
    /// With `auto_find_device` the first attached device is used. Otherwise
    /// the explicit serial is used, or `127.0.0.1:<port>` is connected and
    /// the device whose serial ends with the port is picked.
    pub fn connect(settings: &DeviceSettings) -> Result<Self, DeviceError> {
        let adb = PathBuf::from(&settings.adb_path);
        let devices = list_devices(&adb)?;

        let serial = if settings.auto_find_device && !devices.is_empty() {
            devices[0].clone()
        } else if let Some(serial) = &settings.serial {
            if serial.contains(':') && !devices.contains(serial) {
                run_adb(&adb, &["connect", serial])?;
            }
            serial.clone()
        } else {
            let target = format!("127.0.0.1:{}", settings.port);
            log::info!("Connecting manually with port: {}", settings.port);
            run_adb(&adb, &["connect", &target])?;
            let port = settings.port.to_string();
            list_devices(&adb)?
                .into_iter()
                .find(|serial| serial.ends_with(&port))
                .ok_or_else(|| {
                    DeviceError::DeviceNotFound(format!("no device with port {}", settings.port))
                })?
        };

        let mut device = Self::new(adb, serial);
        // A trivial command proves the device is actually online
        device.shell("echo ok")?;
        log::info!("Device {} connected successfully", device.serial);
        Ok(device)
    }

    /// Create a frame feed for the same device
    pub fn screencap(&self) -> AdbScreencap {
        AdbScreencap {
            adb_path: self.adb_path.clone(),
            serial: self.serial.clone(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, DeviceError> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        run_adb(&self.adb_path, &full)
    }
}

impl Device for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.run(&["shell", "input", "tap", &x, &y])?;
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
        let args = [
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            duration_ms.to_string(),
        ];
        let mut full = vec!["shell", "input", "swipe"];
        full.extend(args.iter().map(String::as_str));
        self.run(&full)?;
        Ok(())
    }

    fn shell(&mut self, command: &str) -> Result<String, DeviceError> {
        let output = self.run(&["shell", command])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Frame feed that polls `adb exec-out screencap -p`
#[derive(Debug, Clone)]
pub struct AdbScreencap {
    adb_path: PathBuf,
    serial: String,
}

impl FrameFeed for AdbScreencap {
    fn next_frame(&mut self) -> Result<RgbaImage, DeviceError> {
        let output = run_adb(
            &self.adb_path,
            &["-s", &self.serial, "exec-out", "screencap", "-p"],
        )
        .map_err(|e| DeviceError::MirrorUnreachable(e.to_string()))?;

        let image = image::load_from_memory(&output.stdout)?;
        Ok(image.to_rgba8())
    }
}

/// List serials of attached devices in the `device` state
pub fn list_devices(adb: &Path) -> Result<Vec<String>, DeviceError> {
    let output = run_adb(adb, &["devices"])?;
    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the output of `adb devices`
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            (parts.next()? == "device").then(|| serial.to_string())
        })
        .collect()
}

fn run_adb(adb: &Path, args: &[&str]) -> Result<Output, DeviceError> {
    let output = Command::new(adb).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DeviceError::Adb(format!(
            "adb {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}
