// src/lib.rs

pub mod backend;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;

use tracing::info;

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, Defaults};
use crate::engine::BackupJob;
use crate::errors::{BackdagError, Result};
use crate::exec::{build_catalog, RunContext};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - the named exec catalog
/// - job construction (backend, object arena, resolver)
/// - the scheduler run
pub async fn run(args: CliArgs) -> Result<()> {
    let defaults = Defaults::default();
    let cfg = load_and_validate(&args.config)?;

    match &args.command {
        Command::Config => {
            print_config(&cfg);
            Ok(())
        }
        Command::Run { task, dry_run } => {
            let task_id = task.as_deref().unwrap_or(defaults.task_id);
            let task_cfg = cfg
                .task
                .get(task_id)
                .ok_or_else(|| BackdagError::Config(format!("unknown task '{task_id}'")))?;

            let catalog = build_catalog(&cfg.exec)?;
            let ctx = RunContext::new(ambient_verbosity(&args, &cfg, &defaults));
            let job =
                BackupJob::from_config(task_cfg, &catalog, &defaults, ctx, cfg.settings.workers)?;

            if *dry_run {
                print!("{}", job.plan());
                return Ok(());
            }

            info!(task = %task_id, "running task");
            job.run().await
        }
    }
}

/// Ambient verbosity for gating process output streams:
/// CLI flag / `BACKDAG_LOG` > `[settings] verbosity` > default.
fn ambient_verbosity(args: &CliArgs, cfg: &ConfigFile, defaults: &Defaults) -> tracing::Level {
    logging::requested_level(args.log_level)
        .or_else(|| {
            cfg.settings
                .verbosity
                .as_deref()
                .and_then(logging::parse_level_str)
        })
        .unwrap_or(defaults.verbosity)
}

/// Print the parsed configuration structure for the `config` command.
fn print_config(cfg: &ConfigFile) {
    println!("backdag config");
    println!("  settings.workers = {}", cfg.settings.workers);
    if let Some(vl) = &cfg.settings.verbosity {
        println!("  settings.verbosity = {vl}");
    }
    println!();

    println!("execs ({}):", cfg.exec.len());
    for (id, exec) in cfg.exec.iter() {
        println!("  - {id}: {}", exec.argv.join(" "));
        if let Some(ec) = &exec.ec {
            println!("      ec: {ec}");
        }
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (id, task) in cfg.task.iter() {
        println!("  - {id}");
        println!("      backend: {}", task.backend);
        for group in task.groups.iter() {
            if group.depends.is_empty() {
                println!("      group {}", group.id);
            } else {
                println!("      group {} (depends: {:?})", group.id, group.depends);
            }
        }
        for obj in task.objects.iter() {
            match &obj.group {
                Some(group) => println!("      object {} (group {})", obj.path, group),
                None => println!("      object {}", obj.path),
            }
        }
    }
}
