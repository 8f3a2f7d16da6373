mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use service_supervisor::Error as SvError;

fn main() {
    if let Err(e) = run() {
        if let Some(sv_error) = e.downcast_ref::<SvError>() {
            eprintln!("Error: {}", sv_error);
            if let Some(suggestion) = sv_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    if cli.check {
        return commands::run_check(&cli.config);
    }
    commands::run_supervisor(&cli)
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;
    Ok(())
}
