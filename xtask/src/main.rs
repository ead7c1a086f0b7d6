use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run all tests
    Test,
    /// Run discovery against simulated RDM responders, no hardware needed
    Discover {
        /// Number of simulated responders
        #[arg(default_value_t = 8)]
        count: u32,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Discover { count } => {
            println!("Discovering {count} simulated responders...");
            let count = count.to_string();
            cargo(
                &[
                    "run", "-p", "pollmvr-cli", "--", "discover", "--no-artnet", "--simulate", &count,
                ],
                "Discovery",
            )?;
        }
    }

    Ok(())
}
