//! Survival modules command-line tool
//!
//! Inspects plugin configuration and module manifests without starting a
//! server.
//!
//! Usage:
//!   survival-modules -c survival.toml check-config
//!   survival-modules -c survival.toml plan [--modules-dir <dir>] [--json]

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use survival_modules::module::registry::{DependencyGraph, ModuleDiscovery};
use survival_modules::utils::{init_logging, init_logging_from_config};
use survival_modules::PluginConfig;

#[derive(Parser, Debug)]
#[command(name = "survival-modules", version, about = "Survival plugin module tooling")]
struct Args {
    /// Plugin configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration and report what it sets
    CheckConfig,
    /// Resolve the activation order from module manifests
    Plan {
        /// Directory of module subdirectories, overrides `manifests_dir`
        #[arg(long)]
        modules_dir: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct Plan {
    activation_order: Vec<String>,
    auto_enabled: Vec<String>,
    disabled: Vec<String>,
    unknown_in_config: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PluginConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PluginConfig::default(),
    };

    match &args.log_level {
        Some(filter) => init_logging(Some(filter)),
        None => init_logging_from_config(config.logging.as_ref()),
    };

    match args.command {
        Command::CheckConfig => check_config(&config),
        Command::Plan { modules_dir, json } => {
            let dir = modules_dir.unwrap_or_else(|| config.manifests_dir());
            plan(&config, dir, json)
        }
    }
}

fn check_config(config: &PluginConfig) -> anyhow::Result<()> {
    println!("config_dir:                   {}", config.config_dir);
    println!("manifests_dir:                {}", config.manifests_dir);
    println!("shutdown_timeout_secs:        {}", config.shutdown_timeout_secs);
    println!("module_shutdown_timeout_secs: {}", config.module_shutdown_timeout_secs);

    if config.module_shutdown_timeout_secs > config.shutdown_timeout_secs {
        warn!(
            "module_shutdown_timeout_secs ({}) exceeds shutdown_timeout_secs ({})",
            config.module_shutdown_timeout_secs, config.shutdown_timeout_secs
        );
    }

    if config.modules.is_empty() {
        println!("modules:                      (module defaults)");
    }
    for (id, enabled) in &config.modules {
        println!("  {:<28}{}", id, if *enabled { "enabled" } else { "disabled" });
    }

    info!("Configuration OK");
    Ok(())
}

fn plan(config: &PluginConfig, modules_dir: PathBuf, json: bool) -> anyhow::Result<()> {
    let descriptors = ModuleDiscovery::new(&modules_dir)
        .descriptors()
        .with_context(|| format!("Failed to scan {}", modules_dir.display()))?;

    let enabled: BTreeSet<String> = descriptors
        .values()
        .filter(|d| config.is_module_enabled(&d.id, d.enabled_by_default))
        .map(|d| d.id.clone())
        .collect();

    let unknown_in_config: Vec<String> = config
        .modules
        .keys()
        .filter(|id| !descriptors.contains_key(*id))
        .cloned()
        .collect();
    for id in &unknown_in_config {
        warn!("Configuration mentions unknown module: {}", id);
    }

    let resolution = DependencyGraph::new(&descriptors).resolve(&enabled)?;
    let disabled = descriptors
        .keys()
        .filter(|id| !resolution.activation_order.contains(id))
        .cloned()
        .collect();

    let plan = Plan {
        activation_order: resolution.activation_order,
        auto_enabled: resolution.auto_enabled,
        disabled,
        unknown_in_config,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Activation order:");
    for (i, id) in plan.activation_order.iter().enumerate() {
        let note = if plan.auto_enabled.contains(id) {
            " (auto-enabled)"
        } else {
            ""
        };
        println!("  {:>2}. {}{}", i + 1, id, note);
    }
    if !plan.disabled.is_empty() {
        println!("Disabled: {}", plan.disabled.join(", "));
    }
    Ok(())
}
