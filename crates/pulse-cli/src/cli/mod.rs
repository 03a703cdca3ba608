use clap::{Parser, Subcommand};

pub mod global;

pub use global::{GlobalFlags, OutputFormat};

/// Top-level CLI parser for the `pulse` binary.
#[derive(Debug, Parser)]
#[command(name = "pulse", version, about = "Pulse - multi-tab identity reconciliation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: json, raw
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    #[must_use]
    pub const fn global_flags(&self) -> GlobalFlags {
        GlobalFlags {
            format: self.format,
            quiet: self.quiet,
            verbose: self.verbose,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Inspect or remove the persisted session record.
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },
    /// Run several tabs of one in-process origin and report how they converge.
    Simulate(SimulateArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Clone, Debug, Subcommand)]
pub enum SessionCommands {
    /// Show the persisted session and impersonation state.
    Show,
    /// Remove the persisted session and impersonation key.
    Clear,
}

#[derive(Clone, Debug, clap::Args)]
pub struct SimulateArgs {
    /// Number of tabs to open.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub tabs: u16,

    /// Make every profile fetch fail.
    #[arg(long)]
    pub fail_profile: bool,
}
