//! Transform executor.
//!
//! Runs built transform commands against a download path, one file at a
//! time, under a process-wide CPU gate. Each file is written to a temp
//! sibling and renamed over the original only after a clean tool exit, so
//! a crash or failure mid-file never leaves a corrupt original behind.

use crate::command::{self, TransformCommand, TransformOp};
use crate::config;
use crate::error::{TransformError, TransformResult};
use crate::merge;
use crate::probe;
use crate::progress::{self, TransformProgress};
use crate::status::{StatusRegistry, TaskStatus};
use crate::task::TaskContext;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Process-wide gate over CPU-heavy subprocess work.
///
/// One permit covers a whole batch, not a single file: a batch holds its
/// slot from the first launched subprocess until the last file finishes,
/// so unrelated tasks queue rather than interleave.
static CPU_GATE: Lazy<Arc<Semaphore>> = Lazy::new(|| Arc::new(Semaphore::new(*config::transform::CPU_SLOTS)));

/// Wait for a CPU slot. Released when the returned permit drops, on every
/// exit path including panics.
pub async fn acquire_cpu_slot() -> TransformResult<OwnedSemaphorePermit> {
    Arc::clone(&CPU_GATE)
        .acquire_owned()
        .await
        .map_err(|_| TransformError::Cancelled)
}

/// Apply `op` to every eligible file under `root`, sequentially.
///
/// The CPU slot and the status entry are only taken once the first command
/// actually builds; a batch where nothing validates touches neither. In a
/// multi-file batch a failing file is logged and skipped, the rest still
/// run; a single-file batch propagates its failure. Cancellation always
/// unwinds with [`TransformError::Cancelled`].
pub async fn run_batch(
    ctx: &TaskContext,
    root: &Path,
    op: &TransformOp,
    statuses: &StatusRegistry,
) -> TransformResult<PathBuf> {
    let files = collect_eligible(root);
    if files.is_empty() {
        log::info!("No eligible files under {} for {}", root.display(), op.label());
        return Ok(root.to_path_buf());
    }
    let single = files.len() == 1;

    let progress = TransformProgress::new();
    let status = TaskStatus::new(ctx.name.clone(), op.label(), Arc::clone(&progress));
    let mut gate: Option<OwnedSemaphorePermit> = None;
    let mut registered = false;
    let mut last_err: Option<TransformError> = None;

    for file in &files {
        if ctx.is_cancelled() {
            last_err = Some(TransformError::Cancelled);
            break;
        }

        let cmd = match command::build(file, op).await {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("Skipping {}: {}", file.display(), e);
                last_err = Some(e);
                continue;
            }
        };

        if gate.is_none() {
            let permit = tokio::select! {
                permit = acquire_cpu_slot() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                },
                _ = ctx.cancelled() => {
                    last_err = Some(TransformError::Cancelled);
                    break;
                }
            };
            gate = Some(permit);
        }
        if !registered {
            statuses.register(ctx.task_id, Arc::clone(&status));
            registered = true;
        }

        status.set_current_file(&file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());

        match run_one(ctx, file, &cmd, &progress).await {
            Ok(()) => {
                log::info!("{} done for {}", op.label(), file.display());
            }
            Err(TransformError::Cancelled) => {
                last_err = Some(TransformError::Cancelled);
                break;
            }
            Err(e) => {
                log::error!("{} failed for {}: {}", op.label(), file.display(), e);
                last_err = Some(e);
            }
        }
    }

    if registered {
        statuses.deregister(ctx.task_id);
    }
    drop(gate);

    match last_err {
        Some(e @ TransformError::Cancelled) => Err(e),
        Some(e) if single => Err(e),
        _ => Ok(root.to_path_buf()),
    }
}

/// Run one built command to completion and swap the result into place.
async fn run_one(
    ctx: &TaskContext,
    file: &Path,
    cmd: &TransformCommand,
    progress: &Arc<TransformProgress>,
) -> TransformResult<()> {
    progress.clear();
    if let Ok(duration) = probe::media_duration(file).await {
        progress.set_total_time(duration);
    }
    progress.set_total_bytes(probe::path_size(file).await);

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let monitor = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(progress::watch_stdout(stdout, Arc::clone(progress))));
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    let exit = tokio::select! {
        exit = child.wait() => exit,
        _ = ctx.cancelled() => {
            let _ = child.kill().await;
            if let Some(m) = monitor {
                m.abort();
            }
            if let Some(t) = stderr_task {
                t.abort();
            }
            let _ = tokio::fs::remove_file(&cmd.temp_output).await;
            return Err(TransformError::Cancelled);
        }
    };

    // The progress stream closed with the pipe; stop the reader now so no
    // monitor outlives its subprocess.
    if let Some(m) = monitor {
        m.abort();
    }
    let exit = match exit {
        Ok(exit) => exit,
        Err(e) => {
            if let Some(t) = stderr_task {
                t.abort();
            }
            let _ = tokio::fs::remove_file(&cmd.temp_output).await;
            return Err(e.into());
        }
    };

    if ctx.is_cancelled() {
        let _ = tokio::fs::remove_file(&cmd.temp_output).await;
        return Err(TransformError::Cancelled);
    }

    if exit.success() {
        if let Some(t) = stderr_task {
            t.abort();
        }
        replace_original(file, &cmd.temp_output).await
    } else {
        let stderr_bytes = match stderr_task {
            Some(t) => t.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let _ = tokio::fs::remove_file(&cmd.temp_output).await;
        Err(TransformError::ToolExecution {
            code: exit.code().unwrap_or(-1),
            stderr: stderr_tail(&stderr_bytes),
        })
    }
}

/// Atomic swap: drop the original, move the finished temp into its place.
async fn replace_original(original: &Path, temp: &Path) -> TransformResult<()> {
    tokio::fs::remove_file(original).await?;
    tokio::fs::rename(temp, original).await?;
    Ok(())
}

/// Last portion of the tool's stderr, bounded for log lines and chat notices.
pub(crate) fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= config::transform::STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - config::transform::STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Mutation-eligible files under the path, in natural order.
fn collect_eligible(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return if command::is_eligible(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        };
    }
    merge::collect_files_sorted(root)
        .into_iter()
        .filter(|p| command::is_eligible(p))
        .collect()
}
