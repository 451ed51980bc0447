use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use output::OutputFormat;

/// rebake - Reproducible builds and container packaging
#[derive(Parser)]
#[command(name = "rebake")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the artifact into the store
  Build {
    /// Path to the project descriptor
    #[arg(default_value = "rebake.toml")]
    descriptor: String,

    /// Target platform (e.g. linux-x86_64; defaults to the host)
    #[arg(short, long)]
    platform: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Enter the development shell
  Shell {
    /// Path to the project descriptor
    #[arg(default_value = "rebake.toml")]
    descriptor: String,

    /// Print the environment script instead of spawning a shell
    #[arg(long)]
    print: bool,
  },

  /// Package the built artifact as an OCI image layout
  Image {
    /// Path to the project descriptor
    #[arg(default_value = "rebake.toml")]
    descriptor: String,

    /// Target platform (e.g. linux-x86_64; defaults to the host)
    #[arg(short, long)]
    platform: Option<String>,

    /// Destination directory (default: <project>.oci)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Show host platform and store status
  Status {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  let result = match cli.command {
    Commands::Build {
      descriptor,
      platform,
      format,
    } => cmd::cmd_build(&descriptor, platform.as_deref(), format),
    Commands::Shell { descriptor, print } => cmd::cmd_shell(&descriptor, print),
    Commands::Image {
      descriptor,
      platform,
      output,
      format,
    } => cmd::cmd_image(&descriptor, platform.as_deref(), output, format),
    Commands::Status { format } => cmd::cmd_status(cli.verbose, format),
  };

  if let Err(err) = result {
    // Full cause chain, one line per failure
    output::print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}
