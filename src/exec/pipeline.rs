// src/exec/pipeline.rs

//! Pipeline execution: an ordered chain of process units whose outputs feed
//! each other's inputs, terminated by a backend-provided sink command.
//!
//! All stages are launched concurrently; stage *i*'s stdout is connected to
//! stage *i+1*'s stdin, the first stage reads from the null device, and the
//! final stage's output feeds the sink. Every spawned process is waited on
//! to completion before any exit status is checked, so no process is left
//! unreaped even when an upstream stage fails.

use std::process::Stdio;

use anyhow::Context;
use tokio::process::{Child, ChildStdout};
use tracing::debug;

use crate::errors::{BackdagError, Result};
use crate::exec::unit::ExecUnit;
use crate::exec::RunContext;

/// Run a pipeline of stages into the given sink command.
///
/// An empty `stages` slice still runs the sink with empty input. The first
/// exit status found outside its unit's acceptance set (in stage order)
/// becomes the pipeline's failure.
pub async fn run_pipeline(ctx: &RunContext, stages: &[ExecUnit], sink: &ExecUnit) -> Result<()> {
    let mut children: Vec<(ExecUnit, Child)> = Vec::with_capacity(stages.len() + 1);
    let mut upstream: Option<ChildStdout> = None;
    let mut spawn_err: Option<BackdagError> = None;

    for unit in stages {
        match spawn_stage(unit, upstream.take(), Stdio::piped(), unit.stderr_stdio(ctx)) {
            Ok(mut child) => {
                upstream = child.stdout.take();
                children.push((unit.clone(), child));
            }
            Err(e) => {
                spawn_err = Some(e);
                break;
            }
        }
    }

    if spawn_err.is_none() {
        match spawn_stage(
            sink,
            upstream.take(),
            sink.stdout_stdio(ctx),
            sink.stderr_stdio(ctx),
        ) {
            Ok(child) => children.push((sink.clone(), child)),
            Err(e) => spawn_err = Some(e),
        }
    }

    // Closing an unconsumed read end lets the upstream stage exit on its own.
    drop(upstream);

    // Wait on every spawned process before reporting anything.
    let mut failure = spawn_err;
    for (unit, mut child) in children {
        match child.wait().await {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                if let Err(e) = unit.check_exit(code) {
                    debug!(cmd = %unit, code, "pipeline stage rejected exit status");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e.into());
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn_stage(
    unit: &ExecUnit,
    upstream: Option<ChildStdout>,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child> {
    debug!(cmd = %unit, "spawning pipeline stage");

    let mut cmd = unit.command();
    match upstream {
        Some(out) => {
            let stdin: Stdio = out.try_into()?;
            cmd.stdin(stdin);
        }
        None => {
            cmd.stdin(Stdio::null());
        }
    }
    cmd.stdout(stdout).stderr(stderr);

    cmd.spawn()
        .with_context(|| format!("spawning `{unit}`"))
        .map_err(Into::into)
}
