use std::collections::BTreeMap;
use std::error::Error;
use std::fs;

use backdag::config::model::ExecConfig;
use backdag::errors::BackdagError;
use backdag::exec::{run_pipeline, ExecUnit, RunContext};

type TestResult = Result<(), Box<dyn Error>>;

fn ctx() -> RunContext {
    RunContext::new(tracing::Level::INFO)
}

fn sh(script: &str) -> ExecUnit {
    let cfg = ExecConfig {
        argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
        env: BTreeMap::from([("PATH".into(), "/usr/bin:/bin".into())]),
        ec: None,
        vl_stdout: None,
        vl_stderr: None,
    };
    ExecUnit::from_config(&cfg).expect("test exec must build")
}

fn file_sink(dest: &std::path::Path) -> ExecUnit {
    ExecUnit::new(vec![
        "/bin/cp".into(),
        "/dev/stdin".into(),
        dest.display().to_string(),
    ])
}

#[tokio::test]
async fn empty_pipeline_feeds_sink_empty_input() -> TestResult {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out");

    run_pipeline(&ctx(), &[], &file_sink(&dest)).await?;

    assert_eq!(fs::read(&dest)?, b"");
    Ok(())
}

#[tokio::test]
async fn stages_chain_stdout_to_stdin() -> TestResult {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out");

    let stages = vec![sh("printf 'hello\\n'"), sh("tr a-z A-Z")];
    run_pipeline(&ctx(), &stages, &file_sink(&dest)).await?;

    assert_eq!(fs::read_to_string(&dest)?, "HELLO\n");
    Ok(())
}

#[tokio::test]
async fn failing_stage_reports_but_downstream_still_runs() -> TestResult {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out");
    let marker = dir.path().join("downstream-ran");

    let stages = vec![
        sh("exit 3"),
        sh(&format!(
            "while read line; do :; done; : > {}",
            marker.display()
        )),
    ];

    match run_pipeline(&ctx(), &stages, &file_sink(&dest)).await {
        Err(BackdagError::ProcessFailure { cmdline, code, .. }) => {
            assert_eq!(code, 3);
            assert!(cmdline.contains("exit 3"), "{cmdline}");
        }
        other => panic!("expected ProcessFailure, got {other:?}"),
    }

    // Every stage was waited on: the downstream stage finished its work
    // before the failure was reported.
    assert!(marker.exists());
    assert!(dest.exists());
    Ok(())
}

#[tokio::test]
async fn stage_exit_codes_checked_against_acceptance_set() -> TestResult {
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out");

    let cfg = ExecConfig {
        argv: vec!["/bin/sh".into(), "-c".into(), "exit 5".into()],
        env: BTreeMap::new(),
        ec: Some(">=4".into()),
        vl_stdout: None,
        vl_stderr: None,
    };
    let tolerant = ExecUnit::from_config(&cfg)?;

    run_pipeline(&ctx(), &[tolerant], &file_sink(&dest)).await?;
    Ok(())
}

#[tokio::test]
async fn single_unit_run_checks_exit_status() -> TestResult {
    sh("exit 0").run(&ctx()).await?;

    match sh("exit 7").run(&ctx()).await {
        Err(BackdagError::ProcessFailure { code: 7, .. }) => Ok(()),
        other => panic!("expected ProcessFailure, got {other:?}"),
    }
}
