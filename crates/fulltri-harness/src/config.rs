use std::path::PathBuf;

use clap::Parser;
use fulltri_engine::logging::LoggingConfig;
use fulltri_engine::window::{RunError, RuntimeConfig};
use winit::dpi::PhysicalSize;

pub const WINDOW_TITLE: &str = "WebGL output tests";

/// Renders a full-screen precision gradient on the GPU next to the same
/// gradient computed on the CPU, for comparing shader output bit for bit.
#[derive(Debug, Clone, Parser)]
#[command(name = "fulltri", version)]
pub struct Cli {
    /// Canvas width in physical pixels.
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Canvas height in physical pixels.
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Directory holding the WGSL shaders.
    #[arg(long, default_value = "assets")]
    pub shader_dir: PathBuf,

    /// Where F12 writes the current render. `.ppm` is written as binary P6.
    #[arg(long, default_value = "render.ppm")]
    pub dump_path: PathBuf,

    /// Start with the CPU texture on screen instead of the GPU result.
    #[arg(long)]
    pub display_cpu: bool,

    /// env_logger filter, e.g. `debug` or `fulltri_engine=trace`.
    #[arg(long)]
    pub log: Option<String>,
}

impl Cli {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            title: WINDOW_TITLE.to_string(),
            initial_size: PhysicalSize::new(self.width, self.height).into(),
            resizable: false,
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            env_filter: self.log.clone(),
            ..LoggingConfig::default()
        }
    }
}

/// Process exit code for a runtime failure.
pub fn exit_code(err: &RunError) -> u8 {
    match err {
        RunError::EventLoop(_) => 1,
        RunError::Window(_) => 2,
        RunError::Start(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["fulltri"]).unwrap();
        assert_eq!((cli.width, cli.height), (512, 512));
        assert_eq!(cli.shader_dir, PathBuf::from("assets"));
        assert_eq!(cli.dump_path, PathBuf::from("render.ppm"));
        assert!(!cli.display_cpu);
        assert!(cli.log.is_none());
    }

    #[test]
    fn flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "fulltri",
            "--width",
            "256",
            "--height=128",
            "--shader-dir",
            "shaders",
            "--dump-path",
            "out.png",
            "--display-cpu",
            "--log",
            "debug",
        ])
        .unwrap();
        assert_eq!((cli.width, cli.height), (256, 128));
        assert_eq!(cli.shader_dir, PathBuf::from("shaders"));
        assert_eq!(cli.dump_path, PathBuf::from("out.png"));
        assert!(cli.display_cpu);
        assert_eq!(cli.logging_config().env_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(Cli::try_parse_from(["fulltri", "--width", "0"]).is_err());
    }

    #[test]
    fn window_is_fixed_size() {
        let cli = Cli::try_parse_from(["fulltri", "--width", "300"]).unwrap();
        let cfg = cli.runtime_config();
        assert!(!cfg.resizable);
        assert_eq!(cfg.title, WINDOW_TITLE);
        assert_eq!(cfg.initial_size, winit::dpi::Size::from(PhysicalSize::new(300u32, 512)));
    }

    #[test]
    fn exit_codes_follow_the_failed_stage() {
        assert_eq!(exit_code(&RunError::EventLoop(anyhow::anyhow!("x"))), 1);
        assert_eq!(exit_code(&RunError::Window(anyhow::anyhow!("x"))), 2);
        assert_eq!(exit_code(&RunError::Start(anyhow::anyhow!("x"))), 3);
    }
}
