//! AutoAFK CLI - runs the configured push mode on a connected device
//!
//! Usage: `autoafk [settings.json]`. Press Enter to pause or resume.

use std::io::BufRead;
use std::path::Path;

use auto_afk::config::Settings;
use auto_afk::{timing, Session};

const DEFAULT_SETTINGS: &str = "settings.json";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("AutoAFK - template-matching automation for AFK Journey");
    println!("======================================================");
    println!();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS.to_string());
    let settings = if Path::new(&path).exists() {
        match Settings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        log::warn!("{} not found, using default settings", path);
        Settings::default()
    };

    let Some(mode) = settings.pushing.mode else {
        log::info!("No push mode configured in {}, nothing to do", path);
        return;
    };

    let mut session = match Session::connect_adb(settings) {
        Ok(session) => session,
        Err(e) => {
            log::error!("Could not start session: {}", e);
            std::process::exit(1);
        }
    };

    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() {
                break;
            }
            if timing::toggle_pause() {
                log::info!("Press Enter to resume");
            }
        }
    });

    match session.push(mode) {
        Ok(reports) => {
            for report in &reports {
                log::info!(
                    "Push finished ({:?}): {} battles, {} victories, {} defeats",
                    report.exit,
                    report.battles,
                    report.victories,
                    report.defeats
                );
            }
            if reports.is_empty() {
                log::warn!("No {} stage could be opened", mode.name());
            }
            session.teardown();
        }
        Err(e) => {
            log::error!("{}", e);
            session.teardown();
            std::process::exit(1);
        }
    }
}
