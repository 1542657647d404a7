//! `tandem`: registry lint and inspection.
//!
//! `tandem check` reports every static defect an authored registry carries
//! before a job is ever launched; `tandem explain` prints the role, data,
//! and stage tables the engine would bind against.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tandem_types::RegistrySpec;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem", version, about = "MPMD coordination engine tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Statically validate a registry file.
    Check {
        /// Path to the registry JSON file.
        registry: PathBuf,
    },
    /// Print the role, shared-data, and stage tables of a registry.
    Explain {
        /// Path to the registry JSON file.
        registry: PathBuf,
    },
}

fn load(path: &PathBuf) -> anyhow::Result<RegistrySpec> {
    RegistrySpec::from_json_file(path)
        .with_context(|| format!("failed to load registry '{}'", path.display()))
}

fn check(path: &PathBuf) -> anyhow::Result<i32> {
    let registry = load(path)?;
    let defects = registry.lint();
    if defects.is_empty() {
        println!(
            "{}: {} roles, {} shared data, {} stages, no defects",
            path.display(),
            registry.roles.len(),
            registry.shared_data.len(),
            registry.stages.len()
        );
        return Ok(0);
    }
    for defect in &defects {
        eprintln!("error: {}", defect);
    }
    eprintln!("{}: {} defect(s)", path.display(), defects.len());
    Ok(1)
}

fn explain(path: &PathBuf) -> anyhow::Result<i32> {
    let registry = load(path)?;

    println!("roles:");
    for role in &registry.roles {
        println!("  id {:>3}  {}", role.id, role.names.join(", "));
    }

    println!("shared data:");
    for datum in &registry.shared_data {
        println!(
            "  {:<24} {:<18} size {:>4}{}  {} -> {}",
            datum.name,
            datum.layout.to_string(),
            datum.size,
            if datum.dynamic { " (dynamic)" } else { "" },
            datum.providers.join(","),
            datum.receivers.join(",")
        );
    }

    println!("stages:");
    for stage in &registry.stages {
        println!(
            "  {} (in: {}; out: {})",
            stage.name,
            stage.inputs.join(","),
            stage.outputs.join(",")
        );
        for operation in &stage.operations {
            for sub in &operation.sub_operations {
                println!("    {} on {}", sub.operation, sub.role);
            }
        }
    }
    Ok(0)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let status = match &cli.command {
        Command::Check { registry } => check(registry)?,
        Command::Explain { registry } => explain(registry)?,
    };
    std::process::exit(status);
}
