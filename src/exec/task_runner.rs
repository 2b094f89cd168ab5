// src/exec/task_runner.rs

//! Individual leaf task execution.
//!
//! Runs a single admitted leaf to completion and reports a [`Completion`]
//! back to the manager:
//!
//! - Process tasks spawn a subprocess from the task's argument vector, with
//!   stdout/stderr either redirected to a log file or forwarded to `tracing`.
//! - In-process tasks run their callback on a blocking worker thread; a panic
//!   is reported as a crashed outcome.
//!
//! If the cancel channel fires, the subprocess is killed (or the blocking
//! handle abandoned) and a `Killed` completion is sent so the manager can
//! record the attempt as terminated.

use std::process::Stdio;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{Completion, CompletionSender, LaunchRequest, RunOutcome};

pub async fn run_task(
    request: LaunchRequest,
    completion_tx: CompletionSender,
    cancel_rx: oneshot::Receiver<()>,
) {
    let id = request.id;
    let attempt = request.attempt;
    let name = request.task.name();

    let result = if request.task.is_process() {
        run_process_task(&request, &completion_tx, cancel_rx).await
    } else {
        run_in_process_task(&request, &completion_tx, cancel_rx).await
    };

    if let Err(err) = result {
        error!(task = %name, id, attempt, error = %err, "task execution error");
        let _ = completion_tx.send(Completion {
            id,
            attempt,
            outcome: RunOutcome::Crashed,
            on_complete_ok: false,
            end_time: SystemTime::now(),
        });
    }
}

async fn run_process_task(
    request: &LaunchRequest,
    completion_tx: &CompletionSender,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let task = &request.task;
    let name = task.name();
    let argv = task
        .compute_argv()
        .ok_or_else(|| anyhow!("task '{name}' has no argument vector"))?;
    if argv.is_empty() {
        return Err(anyhow!("task '{name}' produced an empty argument vector"));
    }

    info!(
        task = %name,
        id = request.id,
        attempt = request.attempt,
        argv = ?argv,
        "starting task process"
    );

    if let Some(script_path) = &request.script_path {
        // Record the command line for post-hoc inspection.
        if let Err(err) = std::fs::write(script_path, format!("{}\n", argv.join(" "))) {
            warn!(
                task = %name,
                path = %script_path.display(),
                error = %err,
                "failed to write command script"
            );
        }
    }

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]).kill_on_drop(true);
    if let Some(cwd) = task.current_dir() {
        cmd.current_dir(cwd);
    }
    for (key, value) in task.env_vars() {
        cmd.env(key, value);
    }

    match &request.log_path {
        Some(log_path) => {
            let file = std::fs::File::create(log_path)
                .with_context(|| format!("creating log file for task '{name}'"))?;
            let stderr_file = file
                .try_clone()
                .with_context(|| format!("cloning log handle for task '{name}'"))?;
            cmd.stdout(Stdio::from(file)).stderr(Stdio::from(stderr_file));
        }
        None => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{name}'"))?;

    // When not writing to a log file, consume output so buffers don't fill.
    if let Some(stdout) = child.stdout.take() {
        let task_name = name.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let task_name = name.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task '{name}'"))?;
            let code = status.code().unwrap_or(-1);
            let on_complete_ok = task.invoke_on_complete(code);

            info!(
                task = %name,
                id = request.id,
                attempt = request.attempt,
                exit_code = code,
                on_complete_ok,
                "task process exited"
            );

            let _ = completion_tx.send(Completion {
                id: request.id,
                attempt: request.attempt,
                outcome: RunOutcome::Exited(code),
                on_complete_ok,
                end_time: SystemTime::now(),
            });
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(
                        task = %name,
                        id = request.id,
                        attempt = request.attempt,
                        "termination requested; killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(task = %name, error = %e, "failed to kill child process");
                    }
                    let _ = completion_tx.send(Completion {
                        id: request.id,
                        attempt: request.attempt,
                        outcome: RunOutcome::Killed,
                        on_complete_ok: false,
                        end_time: SystemTime::now(),
                    });
                }
                Err(e) => {
                    // Backend went away; the child is killed on drop.
                    debug!(task = %name, error = %e, "cancel channel closed");
                }
            }
        }
    }

    Ok(())
}

async fn run_in_process_task(
    request: &LaunchRequest,
    completion_tx: &CompletionSender,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let task = request.task.clone();
    let name = task.name();

    info!(
        task = %name,
        id = request.id,
        attempt = request.attempt,
        "starting in-process task"
    );

    let worker = task.clone();
    let mut handle = tokio::task::spawn_blocking(move || worker.run_in_process());

    tokio::select! {
        joined = &mut handle => {
            let completion = match joined {
                Ok(Some(code)) => {
                    let on_complete_ok = task.invoke_on_complete(code);
                    info!(
                        task = %name,
                        id = request.id,
                        attempt = request.attempt,
                        exit_code = code,
                        on_complete_ok,
                        "in-process task finished"
                    );
                    Completion {
                        id: request.id,
                        attempt: request.attempt,
                        outcome: RunOutcome::Exited(code),
                        on_complete_ok,
                        end_time: SystemTime::now(),
                    }
                }
                Ok(None) => {
                    return Err(anyhow!("task '{name}' is not an in-process task"));
                }
                Err(join_err) => {
                    warn!(
                        task = %name,
                        id = request.id,
                        attempt = request.attempt,
                        panicked = join_err.is_panic(),
                        "in-process task crashed"
                    );
                    Completion {
                        id: request.id,
                        attempt: request.attempt,
                        outcome: RunOutcome::Crashed,
                        on_complete_ok: false,
                        end_time: SystemTime::now(),
                    }
                }
            };
            let _ = completion_tx.send(completion);
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(
                        task = %name,
                        id = request.id,
                        attempt = request.attempt,
                        "termination requested; abandoning in-process task"
                    );
                    // A blocking callback cannot be interrupted mid-flight;
                    // its eventual result is discarded.
                    handle.abort();
                    let _ = completion_tx.send(Completion {
                        id: request.id,
                        attempt: request.attempt,
                        outcome: RunOutcome::Killed,
                        on_complete_ok: false,
                        end_time: SystemTime::now(),
                    });
                }
                Err(e) => {
                    debug!(task = %name, error = %e, "cancel channel closed");
                }
            }
        }
    }

    Ok(())
}
