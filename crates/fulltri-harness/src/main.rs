mod app;
mod config;
mod console;

use std::process::ExitCode;

use clap::Parser;
use fulltri_engine::device::GpuInit;
use fulltri_engine::logging::init_logging;
use fulltri_engine::window::Runtime;

use crate::app::FulltriApp;
use crate::config::{exit_code, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.logging_config());

    log::info!(
        "fulltri {}: {}x{} canvas, shaders from {}",
        env!("CARGO_PKG_VERSION"),
        cli.width,
        cli.height,
        cli.shader_dir.display()
    );

    let app = FulltriApp::new(&cli);
    match Runtime::run(cli.runtime_config(), GpuInit::linear_output(), app) {
        Ok(()) => {
            log::info!("terminating...");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}
