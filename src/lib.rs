//! Light Organ Library
//!
//! Listens to an audio input, analyses each frame's spectrum and drives the
//! eight lamps of a serial light organ with single-letter commands.

pub mod audio;
pub mod cli;
pub mod config;
pub mod organ;
pub mod patterns;
pub mod protocol;
pub mod state;

pub use config::{Mode, RunConfig};
pub use organ::{Backend, LightOrgan, RunError, RunLoop, SystemBackend};
pub use patterns::{LampMapper, LampVector, NUM_LAMPS};
pub use state::{RunState, RunStatus};

use clap::Parser;

/// Entry point for the `light-organ` binary
pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = cli::Cli::parse();
    if let Err(e) = cli::execute(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
