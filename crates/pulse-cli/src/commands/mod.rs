mod config;
mod session;
mod simulate;

use pulse_config::PulseConfig;

use crate::cli::{Commands, GlobalFlags};

/// Route a parsed command to its handler.
pub async fn dispatch(
    command: Commands,
    config: &PulseConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match command {
        Commands::Session { action } => session::handle(&action, config, flags),
        Commands::Simulate(args) => simulate::handle(&args, config, flags).await,
        Commands::Config => config::handle(config, flags),
    }
}
