// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, Defaults, StepConfig, TaskConfig};
use crate::errors::{BackdagError, Result};
use crate::exec::parse_ec;
use crate::logging::parse_level_str;

/// Run semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one task
/// - verbosity level names parse
/// - every exec (catalog and inline) has a non-empty argv and a parseable
///   exit-code spec
/// - pipeline steps reference existing `[exec.<id>]` entries
/// - group ids are unique, `depends` references exist, no group depends on
///   itself, and the group graph has no cycles
/// - object paths are unique and object group references exist
pub fn validate_config(cfg: &ConfigFile, defaults: &Defaults) -> Result<()> {
    ensure_has_tasks(cfg)?;

    if let Some(vl) = &cfg.settings.verbosity {
        parse_level(vl)?;
    }

    for (id, exec) in cfg.exec.iter() {
        validate_exec_fields(
            &format!("exec '{id}'"),
            &exec.argv,
            exec.ec.as_deref(),
            exec.vl_stdout.as_deref(),
            exec.vl_stderr.as_deref(),
        )?;
    }

    for (id, task) in cfg.task.iter() {
        validate_task(cfg, id, task, defaults)?;
    }

    Ok(())
}

fn ensure_has_tasks(cfg: &ConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(BackdagError::Config(
            "config must contain at least one [task.<id>] section".into(),
        ));
    }
    Ok(())
}

fn validate_task(cfg: &ConfigFile, id: &str, task: &TaskConfig, defaults: &Defaults) -> Result<()> {
    let mut group_ids: HashSet<&str> = HashSet::new();
    for group in task.groups.iter() {
        if !group_ids.insert(group.id.as_str()) {
            return Err(BackdagError::Config(format!(
                "task '{id}': duplicate object group '{}'",
                group.id
            )));
        }
    }

    for group in task.groups.iter() {
        for dep in group.depends.iter() {
            if dep == &group.id {
                return Err(BackdagError::Config(format!(
                    "task '{id}': object group '{}' depends on itself",
                    group.id
                )));
            }
            if !group_ids.contains(dep.as_str()) {
                return Err(BackdagError::Config(format!(
                    "task '{id}': object group '{}' has unknown dependency '{dep}'",
                    group.id
                )));
            }
        }
    }

    validate_group_dag(id, task)?;

    let mut paths: HashSet<&str> = HashSet::new();
    for obj in task.objects.iter() {
        if !paths.insert(obj.path.as_str()) {
            return Err(BackdagError::Config(format!(
                "task '{id}': duplicate object path '{}'",
                obj.path
            )));
        }

        if let Some(group) = &obj.group {
            // The default group exists implicitly even when not declared.
            if group != defaults.group_id && !group_ids.contains(group.as_str()) {
                return Err(BackdagError::Config(format!(
                    "task '{id}': object '{}' references unknown group '{group}'",
                    obj.path
                )));
            }
        }

        for step in obj.pipeline.iter() {
            validate_step(cfg, id, &obj.path, step)?;
        }
    }

    Ok(())
}

fn validate_group_dag(id: &str, task: &TaskConfig) -> Result<()> {
    // Edge direction: dep -> group. A topological sort fails on cycles.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for group in task.groups.iter() {
        graph.add_node(group.id.as_str());
    }

    for group in task.groups.iter() {
        for dep in group.depends.iter() {
            graph.add_edge(dep.as_str(), group.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(BackdagError::Config(format!(
            "task '{id}': cycle detected in group dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_step(cfg: &ConfigFile, task_id: &str, path: &str, step: &StepConfig) -> Result<()> {
    let what = format!("task '{task_id}', object '{path}'");

    match step {
        StepConfig::Exec { exec_id, .. } | StepConfig::ExecAppend { exec_id, .. } => {
            if !cfg.exec.contains_key(exec_id) {
                return Err(BackdagError::Config(format!(
                    "{what}: unknown exec id '{exec_id}'"
                )));
            }
        }
        StepConfig::ExecInline { argv, ec, .. } => {
            validate_exec_fields(&what, argv, ec.as_deref(), None, None)?;
        }
    }

    if let Some(vl) = step.vl_stdout() {
        parse_level(vl)?;
    }
    if let Some(vl) = step.vl_stderr() {
        parse_level(vl)?;
    }

    Ok(())
}

fn validate_exec_fields(
    what: &str,
    argv: &[String],
    ec: Option<&str>,
    vl_stdout: Option<&str>,
    vl_stderr: Option<&str>,
) -> Result<()> {
    if argv.is_empty() {
        return Err(BackdagError::Config(format!("{what}: empty argv")));
    }
    if let Some(ec) = ec {
        parse_ec(ec)?;
    }
    if let Some(vl) = vl_stdout {
        parse_level(vl)?;
    }
    if let Some(vl) = vl_stderr {
        parse_level(vl)?;
    }
    Ok(())
}

fn parse_level(s: &str) -> Result<tracing::Level> {
    parse_level_str(s)
        .ok_or_else(|| BackdagError::Config(format!("invalid verbosity level '{s}'")))
}
