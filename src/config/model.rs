// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [settings]
/// verbosity = "info"
/// workers = 0
///
/// [exec.tar-etc]
/// argv = ["/bin/tar", "-C", "/", "-c", "etc"]
/// ec = "0-1"
///
/// [task.default]
/// backend = "localfs"
///
/// [task.default.backend-param]
/// root = "/var/backups/host"
/// nb-copy-limit = 7
///
/// [[task.default.groups]]
/// id = "data"
/// depends = ["pre"]
///
/// [[task.default.objects]]
/// path = "etc.tar"
/// group = "data"
/// pipeline = [{ type = "exec", exec-id = "tar-etc" }]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Global behaviour from `[settings]`.
    #[serde(default)]
    pub settings: SettingsSection,

    /// Named process-unit catalog from `[exec.<id>]`.
    ///
    /// Pipelines reference these by id via `exec` / `exec-append` steps.
    #[serde(default)]
    pub exec: BTreeMap<String, ExecConfig>,

    /// All backup tasks from `[task.<id>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SettingsSection {
    /// Ambient verbosity ("error".."trace"). Gates whether the stdout/stderr
    /// of spawned commands is forwarded or discarded.
    #[serde(default)]
    pub verbosity: Option<String>,

    /// Worker pool size for pipeline runs.
    ///
    /// `0` (default) means available parallelism; a negative value means
    /// unbounded.
    #[serde(default)]
    pub workers: i64,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            verbosity: None,
            workers: 0,
        }
    }
}

/// A named process unit from `[exec.<id>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecConfig {
    /// Argument vector; the first element is the program.
    pub argv: Vec<String>,

    /// Environment for the process. The spawned process sees exactly this
    /// environment, nothing is inherited.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Exit-code acceptance spec, e.g. `"0"`, `"0-2"`, `"<=1"`. Default `"0"`.
    #[serde(default)]
    pub ec: Option<String>,

    /// Verbosity threshold for forwarding the process's stdout.
    #[serde(default)]
    pub vl_stdout: Option<String>,

    /// Verbosity threshold for forwarding the process's stderr.
    #[serde(default)]
    pub vl_stderr: Option<String>,
}

/// `[task.<id>]` section: one backup job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskConfig {
    /// Backend selector id ("null", "localfs", ...).
    pub backend: String,

    /// Backend-specific parameters, passed opaquely to the backend's
    /// constructor.
    #[serde(default)]
    pub backend_param: toml::Table,

    /// Object groups carrying the dependency edges.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    /// The objects to back up.
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

/// One `[[task.<id>.groups]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub id: String,

    /// Groups whose objects must all complete before any object in this
    /// group may run.
    #[serde(default)]
    pub depends: Vec<String>,
}

/// One `[[task.<id>.objects]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectConfig {
    /// Destination path, unique across the whole task.
    pub path: String,

    /// Owning group id; defaults to the implicit "default" group.
    #[serde(default)]
    pub group: Option<String>,

    /// The pipeline of process units producing this object's data.
    #[serde(default)]
    pub pipeline: Vec<StepConfig>,
}

/// One pipeline step, resolved against the `[exec.<id>]` catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum StepConfig {
    /// Reuse a catalog entry as-is.
    Exec {
        exec_id: String,
        #[serde(default)]
        vl_stdout: Option<String>,
        #[serde(default)]
        vl_stderr: Option<String>,
    },

    /// Copy a catalog entry and extend its argv.
    ExecAppend {
        exec_id: String,
        argv: Vec<String>,
        #[serde(default)]
        vl_stdout: Option<String>,
        #[serde(default)]
        vl_stderr: Option<String>,
    },

    /// Fully specified ad hoc process unit.
    ExecInline {
        argv: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        ec: Option<String>,
        #[serde(default)]
        vl_stdout: Option<String>,
        #[serde(default)]
        vl_stderr: Option<String>,
    },
}

impl StepConfig {
    pub fn vl_stdout(&self) -> Option<&str> {
        match self {
            StepConfig::Exec { vl_stdout, .. }
            | StepConfig::ExecAppend { vl_stdout, .. }
            | StepConfig::ExecInline { vl_stdout, .. } => vl_stdout.as_deref(),
        }
    }

    pub fn vl_stderr(&self) -> Option<&str> {
        match self {
            StepConfig::Exec { vl_stderr, .. }
            | StepConfig::ExecAppend { vl_stderr, .. }
            | StepConfig::ExecInline { vl_stderr, .. } => vl_stderr.as_deref(),
        }
    }
}

/// Built-in defaults, passed explicitly where needed instead of living as
/// ambient module state.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    /// Ambient verbosity when neither CLI nor config specify one.
    pub verbosity: tracing::Level,

    /// Worker-count setting when `[settings] workers` is absent.
    pub workers: i64,

    /// Group id objects fall into when they name none.
    pub group_id: &'static str,

    /// Task id `run` uses when none is given on the command line.
    pub task_id: &'static str,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            verbosity: tracing::Level::INFO,
            workers: 0,
            group_id: "default",
            task_id: "default",
        }
    }
}
