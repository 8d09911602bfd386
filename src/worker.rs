//! The build worker: the child side of [`crate::build::run_build`].
//!
//! Runs inside a fresh process with only the environment the parent computed.
//! It stages the source into a scratch directory, runs each install step through
//! `sh -c` with output captured to a numbered log file, and reports a
//! [`BuildOutcome`] to the outcome file. Exit status is 0 on success and 1 on a
//! reported failure. With `debug` set, a failed build keeps its staging directory.

use crate::build::{BuildOutcome, BuildRequest};
use crate::extract::unpack_tar_gz;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

pub async fn run(request_path: &Path, outcome_path: &Path) -> i32 {
    let outcome = match execute(request_path).await {
        Ok(()) => BuildOutcome::Ok,
        Err(outcome) => outcome,
    };

    let json = match serde_json::to_vec_pretty(&outcome) {
        Ok(json) => json,
        Err(err) => {
            error!("Failed to serialize build outcome: {}", err);
            return 2;
        }
    };
    if let Err(err) = fs::write(outcome_path, json) {
        error!("Failed to write {}: {}", outcome_path.display(), err);
        return 2;
    }

    if outcome.is_ok() { 0 } else { 1 }
}

async fn execute(request_path: &Path) -> Result<(), BuildOutcome> {
    let contents = fs::read(request_path)
        .map_err(|e| BuildOutcome::error("request_unreadable", e.to_string()))?;
    let request: BuildRequest = serde_json::from_slice(&contents)
        .map_err(|e| BuildOutcome::error("request_invalid", e.to_string()))?;

    fs::create_dir_all(&request.logs).map_err(|e| {
        BuildOutcome::error("logs_unwritable", e.to_string())
            .with_field("logs", request.logs.display().to_string())
    })?;

    let staging = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", request.formula, request.version))
        .tempdir()
        .map_err(|e| BuildOutcome::error("staging_failed", e.to_string()))?;
    let workdir = stage_source(&request, staging.path())?;
    debug!("Building {} in {}", request.formula, workdir.display());

    fs::create_dir_all(&request.keg).map_err(|e| {
        BuildOutcome::error("keg_unwritable", e.to_string())
            .with_field("keg", request.keg.display().to_string())
    })?;

    let result = if request.interactive {
        interactive_shell(&request, &workdir).await
    } else {
        run_steps(&request, &workdir).await
    };

    match result {
        // Leave the source tree behind for inspection.
        Err(outcome) if request.debug => {
            let kept = staging.keep();
            Err(outcome.with_field("staging", kept.display().to_string()))
        }
        other => other,
    }
}

async fn run_steps(request: &BuildRequest, workdir: &Path) -> Result<(), BuildOutcome> {
    for (index, step) in request.steps.iter().enumerate() {
        run_step(request, workdir, index + 1, step).await?;
    }
    Ok(())
}

/// Unpack or copy the source into `staging`, returning the directory to build in.
fn stage_source(request: &BuildRequest, staging: &Path) -> Result<PathBuf, BuildOutcome> {
    let Some(source) = &request.source else {
        return Ok(staging.to_path_buf());
    };
    let failed = |message: String| {
        BuildOutcome::error("staging_failed", message)
            .with_field("source", source.display().to_string())
    };

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        unpack_tar_gz(source, staging).map_err(|e| failed(format!("{:#}", e)))?;

        // Tarballs usually wrap everything in one top-level directory.
        let entries: Vec<PathBuf> = fs::read_dir(staging)
            .map_err(|e| failed(e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        if let [only] = entries.as_slice()
            && only.is_dir()
        {
            return Ok(only.clone());
        }
        return Ok(staging.to_path_buf());
    }

    // Cached sources are stored as `<formula>--<basename>`.
    let basename = name.split_once("--").map(|(_, b)| b).unwrap_or(&name);
    fs::copy(source, staging.join(basename)).map_err(|e| failed(e.to_string()))?;
    Ok(staging.to_path_buf())
}

async fn run_step(
    request: &BuildRequest,
    workdir: &Path,
    number: usize,
    step: &str,
) -> Result<(), BuildOutcome> {
    let log_path = request.logs.join(log_name(number, step));
    let failed = |kind: &str, message: String| {
        BuildOutcome::error(kind, message)
            .with_field("step", step)
            .with_field("log", log_path.display().to_string())
    };

    let log = fs::File::create(&log_path).map_err(|e| failed("log_unwritable", e.to_string()))?;
    let log_err = log
        .try_clone()
        .map_err(|e| failed("log_unwritable", e.to_string()))?;

    if request.verbose {
        eprintln!("==> {}", step);
    }

    let status = Command::new("sh")
        .arg("-c")
        .arg(step)
        .current_dir(workdir)
        .env_clear()
        .envs(request.env.vars())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .await
        .map_err(|e| failed("step_not_started", e.to_string()))?;

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if request.verbose
            && let Ok(output) = fs::read_to_string(&log_path)
        {
            eprint!("{}", output);
        }
        return Err(failed(
            "step_failed",
            format!("`{}` exited with {}", step, status),
        )
        .with_field("exit_code", code));
    }

    Ok(())
}

/// Drop the user into a shell inside the staged source with the build environment.
async fn interactive_shell(request: &BuildRequest, workdir: &Path) -> Result<(), BuildOutcome> {
    let shell = request.env.get("SHELL").unwrap_or("/bin/sh");
    eprintln!(
        "==> Entering interactive mode; type `exit` to return and finalize the installation"
    );
    eprintln!("==> Install to this prefix: {}", request.keg.display());

    let status = Command::new(shell)
        .current_dir(workdir)
        .env_clear()
        .envs(request.env.vars())
        .status()
        .await
        .map_err(|e| BuildOutcome::error("shell_not_started", e.to_string()).with_field("shell", shell))?;

    if !status.success() {
        debug!("Interactive shell exited with {}", status);
    }
    Ok(())
}

/// `01.configure`, `02.make`, ... named after the step's program.
fn log_name(number: usize, step: &str) -> String {
    let program = step
        .split_whitespace()
        .next()
        .and_then(|word| word.rsplit('/').next())
        .filter(|word| !word.is_empty())
        .unwrap_or("step");
    let program: String = program
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{:02}.{}", number, program)
}
