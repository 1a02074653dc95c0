//! Clawface Desktop — application entry.

mod app;

use anyhow::Context;
use eframe::egui;
use lib::config::SettingsStore;

fn start() -> anyhow::Result<(tokio::runtime::Runtime, SettingsStore)> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let settings = SettingsStore::open(None)?;
    Ok((runtime, settings))
}

fn main() -> eframe::Result<()> {
    let (runtime, settings) = match start() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("clawface-desktop: {:#}", e);
            std::process::exit(1);
        }
    };
    let handle = runtime.handle().clone();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 720.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Clawface",
        options,
        Box::new(move |cc| Box::new(app::ClawfaceApp::new(cc, handle, settings))),
    )
}
