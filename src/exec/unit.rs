// src/exec/unit.rs

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;

use anyhow::Context;
use regex::Regex;
use tracing::debug;

use crate::config::model::{ExecConfig, StepConfig};
use crate::errors::{BackdagError, Result};
use crate::exec::RunContext;
use crate::logging::parse_level_str;

/// Accepted exit codes as a half-open range over `[0, 256)`.
///
/// The grammar only ever produces one contiguous range; `==N` is the
/// single-element range `[N, N+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcRange {
    start: u16,
    end: u16,
}

impl EcRange {
    pub fn single(n: u16) -> Self {
        Self { start: n, end: n + 1 }
    }

    pub fn contains(&self, code: i32) -> bool {
        code >= 0 && (self.start as i32) <= code && code < (self.end as i32)
    }
}

impl fmt::Display for EcRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start >= self.end {
            write!(f, "(none)")
        } else if self.start + 1 == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end - 1)
        }
    }
}

/// Parse an exit-code acceptance spec.
///
/// - `"A-B"` (whitespace around `-` allowed): inclusive range, invalid when
///   `A > B`.
/// - `"N"`, `"<N"`, `"<=N"`, `">N"`, `">=N"`, `"==N"`: bound relative to N;
///   the operator defaults to `==`.
///
/// Anything else is a configuration error.
pub fn parse_ec(spec: &str) -> Result<EcRange> {
    let x = spec.trim();

    let inclusive = Regex::new(r"^([0-9]+)\s*-\s*([0-9]+)$").expect("static regex");
    if let Some(m) = inclusive.captures(x) {
        let a: u16 = parse_code(&m[1], spec)?;
        let b: u16 = parse_code(&m[2], spec)?;
        if a > b {
            return Err(BackdagError::Config(format!(
                "invalid exit-code range: '{spec}'"
            )));
        }
        return Ok(EcRange { start: a, end: b + 1 });
    }

    let bounded = Regex::new(r"^(<=|>=|==|<|>)?\s*([0-9]+)$").expect("static regex");
    if let Some(m) = bounded.captures(x) {
        let op = m.get(1).map_or("==", |o| o.as_str());
        let n: u16 = parse_code(&m[2], spec)?;
        let range = match op {
            "==" => EcRange::single(n),
            "<" => EcRange { start: 0, end: n },
            "<=" => EcRange { start: 0, end: n + 1 },
            ">" => EcRange { start: n + 1, end: 256 },
            ">=" => EcRange { start: n, end: 256 },
            _ => unreachable!("pattern admits no other operator"),
        };
        return Ok(range);
    }

    Err(BackdagError::Config(format!(
        "invalid exit-code spec: '{spec}'"
    )))
}

fn parse_code(digits: &str, spec: &str) -> Result<u16> {
    let n: u16 = digits
        .parse()
        .map_err(|_| BackdagError::Config(format!("exit code out of range in '{spec}'")))?;
    if n > 255 {
        return Err(BackdagError::Config(format!(
            "exit code out of range in '{spec}'"
        )));
    }
    Ok(n)
}

/// A single external-command invocation.
///
/// Immutable once constructed except for [`ExecUnit::append`], which derives
/// a copy with an extended argv.
#[derive(Debug, Clone)]
pub struct ExecUnit {
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    accept: EcRange,
    vl_stdout: tracing::Level,
    vl_stderr: tracing::Level,
}

impl ExecUnit {
    pub const DEFAULT_VL_STDOUT: tracing::Level = tracing::Level::INFO;
    pub const DEFAULT_VL_STDERR: tracing::Level = tracing::Level::ERROR;

    /// Build a unit accepting only exit code 0, with default thresholds.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: BTreeMap::new(),
            accept: EcRange::single(0),
            vl_stdout: Self::DEFAULT_VL_STDOUT,
            vl_stderr: Self::DEFAULT_VL_STDERR,
        }
    }

    /// Build a unit from an `[exec.<id>]` catalog entry.
    pub fn from_config(cfg: &ExecConfig) -> Result<Self> {
        if cfg.argv.is_empty() {
            return Err(BackdagError::Config("empty argv".into()));
        }
        Ok(Self {
            argv: cfg.argv.clone(),
            env: cfg.env.clone(),
            accept: parse_ec(cfg.ec.as_deref().unwrap_or("0"))?,
            vl_stdout: parse_vl(cfg.vl_stdout.as_deref(), Self::DEFAULT_VL_STDOUT)?,
            vl_stderr: parse_vl(cfg.vl_stderr.as_deref(), Self::DEFAULT_VL_STDERR)?,
        })
    }

    /// Resolve a pipeline step against the named catalog.
    ///
    /// `exec` reuses the referenced unit, `exec-append` copies it and extends
    /// its argv, `exec-inline` builds one ad hoc. All variants may override
    /// the verbosity thresholds of the base definition.
    pub fn from_step(catalog: &BTreeMap<String, ExecUnit>, step: &StepConfig) -> Result<Self> {
        let mut unit = match step {
            StepConfig::Exec { exec_id, .. } => lookup(catalog, exec_id)?.clone(),
            StepConfig::ExecAppend { exec_id, argv, .. } => {
                lookup(catalog, exec_id)?.append(argv.iter().cloned())
            }
            StepConfig::ExecInline { argv, env, ec, .. } => {
                if argv.is_empty() {
                    return Err(BackdagError::Config("empty argv".into()));
                }
                Self {
                    argv: argv.clone(),
                    env: env.clone(),
                    accept: parse_ec(ec.as_deref().unwrap_or("0"))?,
                    vl_stdout: Self::DEFAULT_VL_STDOUT,
                    vl_stderr: Self::DEFAULT_VL_STDERR,
                }
            }
        };

        unit.vl_stdout = parse_vl(step.vl_stdout(), unit.vl_stdout)?;
        unit.vl_stderr = parse_vl(step.vl_stderr(), unit.vl_stderr)?;

        Ok(unit)
    }

    /// Copy-then-extend argv derivation.
    pub fn append<I: IntoIterator<Item = String>>(&self, extra: I) -> Self {
        let mut derived = self.clone();
        derived.argv.extend(extra);
        derived
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn accepts(&self, code: i32) -> bool {
        self.accept.contains(code)
    }

    /// Turn an observed exit code into a process failure unless accepted.
    pub fn check_exit(&self, code: i32) -> Result<()> {
        if self.accepts(code) {
            Ok(())
        } else {
            Err(BackdagError::ProcessFailure {
                cmdline: self.to_string(),
                code,
                expected: self.accept.to_string(),
            })
        }
    }

    /// Stdio for the unit's stdout under the given ambient verbosity.
    pub fn stdout_stdio(&self, ctx: &RunContext) -> Stdio {
        if ctx.forwards(self.vl_stdout) {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Stdio for the unit's stderr under the given ambient verbosity.
    pub fn stderr_stdio(&self, ctx: &RunContext) -> Stdio {
        if ctx.forwards(self.vl_stderr) {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }

    /// Command builder with this unit's argv and environment.
    ///
    /// The spawned process sees exactly `env`; nothing is inherited.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).env_clear().envs(&self.env);
        cmd
    }

    /// Run the unit standalone: spawn, gate both streams, wait, check the
    /// exit status against the acceptance set.
    pub async fn run(&self, ctx: &RunContext) -> Result<()> {
        debug!(cmd = %self, "running command");

        let mut cmd = self.command();
        cmd.stdout(self.stdout_stdio(ctx))
            .stderr(self.stderr_stdio(ctx));

        let status = cmd
            .status()
            .await
            .with_context(|| format!("spawning `{self}`"))?;

        self.check_exit(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ExecUnit {
    /// Rendered command line: env assignments followed by the argv.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.env.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{k}=\"{v}\"")?;
            first = false;
        }
        for arg in self.argv.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{arg}")?;
            first = false;
        }
        Ok(())
    }
}

fn parse_vl(s: Option<&str>, fallback: tracing::Level) -> Result<tracing::Level> {
    match s {
        None => Ok(fallback),
        Some(s) => parse_level_str(s)
            .ok_or_else(|| BackdagError::Config(format!("invalid verbosity level '{s}'"))),
    }
}

/// Build the named unit catalog from the `[exec.<id>]` tables.
pub fn build_catalog(execs: &BTreeMap<String, ExecConfig>) -> Result<BTreeMap<String, ExecUnit>> {
    let mut catalog = BTreeMap::new();
    for (id, cfg) in execs.iter() {
        let unit = ExecUnit::from_config(cfg)
            .map_err(|e| BackdagError::Config(format!("exec '{id}': {e}")))?;
        catalog.insert(id.clone(), unit);
    }
    Ok(catalog)
}

fn lookup<'a>(catalog: &'a BTreeMap<String, ExecUnit>, exec_id: &str) -> Result<&'a ExecUnit> {
    catalog
        .get(exec_id)
        .ok_or_else(|| BackdagError::Config(format!("unknown exec id '{exec_id}'")))
}
