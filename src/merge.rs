//! Merge engine: concatenate a directory of videos into one file.
//!
//! Videos are discovered recursively, natural-sorted so "ep2" lands before
//! "ep10", written into a concat manifest and stream-copied into a single
//! `.mkv`. Since the concat demuxer reports no usable media time, progress
//! comes from the fixed-interval size poller over the growing output.

use crate::config;
use crate::error::{TransformError, TransformResult};
use crate::executor;
use crate::probe;
use crate::progress::{self, TransformProgress};
use crate::status::{StatusRegistry, TaskStatus};
use crate::task::TaskContext;
use std::cmp::Ordering;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Inputs merged; path of the single merged file
    Merged(PathBuf),
    /// Originals kept; path of the directory now holding them plus the merge
    KeptIn(PathBuf),
    /// Fewer than two videos found; path returned unchanged
    Skipped(PathBuf),
}

/// What the directory scan found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct VideoSet {
    /// Absolute input paths in merge order
    pub files: Vec<PathBuf>,
    /// Cumulative input size in bytes
    pub total_bytes: u64,
    /// Directory of the first video found
    pub original_dir: Option<PathBuf>,
}

impl VideoSet {
    /// Concat demuxer manifest body: one `file '<path>'` line per input,
    /// with single quotes in the path escaped for the demuxer.
    pub fn manifest(&self) -> String {
        self.files
            .iter()
            .map(|p| format!("file '{}'", p.display().to_string().replace('\'', r"'\''")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Merge every playable video under `path` into one file.
///
/// Fewer than two videos means nothing to merge and the path comes back
/// unchanged. On success the manifest is removed and, unless the task seeds
/// or `keep_originals` is set, the inputs are deleted. When originals are
/// kept and they live in a subdirectory, the merged file is written next to
/// them and the outcome names that directory.
pub async fn merge_videos(
    ctx: &TaskContext,
    path: &Path,
    keep_originals: bool,
    custom_name: Option<&str>,
    statuses: &StatusRegistry,
) -> TransformResult<MergeOutcome> {
    let set = collect_videos(path).await;
    log::info!("Merge check for: {} | Found {} video file(s)", path.display(), set.files.len());
    if set.files.len() < 2 {
        return Ok(MergeOutcome::Skipped(path.to_path_buf()));
    }

    let name = output_name(path, custom_name);

    // Keeping originals places the merge next to them when they live in a
    // subdirectory; otherwise it lands at the scan root.
    let keep_in_subdir = keep_originals
        && set
            .original_dir
            .as_deref()
            .map(|d| d != path)
            .unwrap_or(false);
    let out_dir = if keep_in_subdir {
        set.original_dir.clone().unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    };
    let outfile = out_dir.join(format!("{}.mkv", name));
    let manifest_path = path.join("input.txt");

    tokio::fs::write(&manifest_path, set.manifest()).await?;

    let gate = if *config::transform::MERGE_USES_GATE {
        tokio::select! {
            permit = executor::acquire_cpu_slot() => Some(permit?),
            _ = ctx.cancelled() => {
                let _ = tokio::fs::remove_file(&manifest_path).await;
                return Err(TransformError::Cancelled);
            }
        }
    } else {
        None
    };

    let progress = TransformProgress::new();
    progress.set_total_bytes(set.total_bytes);
    let status = TaskStatus::new(name.clone(), "merge", Arc::clone(&progress));
    status.set_current_file(&format!("{}.mkv", name));
    statuses.register(ctx.task_id, status);

    log::info!("Merging {} videos --> {}.mkv", set.files.len(), name);
    let result = run_merge(ctx, &manifest_path, &outfile, &progress).await;

    statuses.deregister(ctx.task_id);
    drop(gate);
    let _ = tokio::fs::remove_file(&manifest_path).await;

    match result {
        Ok(()) => {
            if !ctx.keep_data && !keep_originals {
                for file in &set.files {
                    if let Err(e) = tokio::fs::remove_file(file).await {
                        log::warn!("Failed to remove merged input {}: {}", file.display(), e);
                    }
                }
            }
            log::info!("Merge successfully with name: {}.mkv", name);
            if keep_in_subdir {
                Ok(MergeOutcome::KeptIn(out_dir))
            } else {
                Ok(MergeOutcome::Merged(outfile))
            }
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&outfile).await;
            log::error!("Failed to merge: {}.mkv", name);
            Err(e)
        }
    }
}

/// Launch the concat subprocess and wait it out against cancellation.
async fn run_merge(
    ctx: &TaskContext,
    manifest: &Path,
    outfile: &Path,
    progress: &Arc<TransformProgress>,
) -> TransformResult<()> {
    let mut child = Command::new(&*config::FFMPEG_BIN)
        .args(assemble_merge_args(manifest, outfile))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });
    let poller = progress::spawn_size_poller(outfile.to_path_buf(), Arc::clone(progress));

    let exit = tokio::select! {
        exit = child.wait() => exit,
        _ = ctx.cancelled() => {
            let _ = child.kill().await;
            poller.abort();
            if let Some(t) = stderr_task {
                t.abort();
            }
            return Err(TransformError::Cancelled);
        }
    };
    poller.abort();
    let exit = exit?;

    if ctx.is_cancelled() {
        if let Some(t) = stderr_task {
            t.abort();
        }
        return Err(TransformError::Cancelled);
    }

    if exit.success() {
        if let Some(t) = stderr_task {
            t.abort();
        }
        Ok(())
    } else {
        let stderr_bytes = match stderr_task {
            Some(t) => t.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Err(TransformError::ToolExecution {
            code: exit.code().unwrap_or(-1),
            stderr: executor::stderr_tail(&stderr_bytes),
        })
    }
}

fn assemble_merge_args(manifest: &Path, outfile: &Path) -> Vec<String> {
    vec![
        "-ignore_unknown".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        manifest.display().to_string(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        outfile.display().to_string(),
    ]
}

/// Output stem: custom name with any extension stripped, else the scan
/// root's own name.
fn output_name(path: &Path, custom_name: Option<&str>) -> String {
    if let Some(custom) = custom_name {
        let stem = Path::new(custom)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| custom.to_string());
        log::info!("Using custom merge name: {}", stem);
        return stem;
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "merged".to_string())
}

/// Scan for playable videos, probing each candidate.
async fn collect_videos(path: &Path) -> VideoSet {
    collect_videos_with(path, probe::is_playable_video).await
}

/// Scan with an injected playability check.
async fn collect_videos_with<F, Fut>(path: &Path, is_video: F) -> VideoSet
where
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut set = VideoSet::default();
    for file in collect_files_sorted(path) {
        if !is_video(file.clone()).await {
            continue;
        }
        set.total_bytes += probe::path_size(&file).await;
        if set.original_dir.is_none() {
            set.original_dir = file.parent().map(Path::to_path_buf);
        }
        set.files.push(file);
    }
    set
}

/// All files under the path recursively, in natural path order.
pub(crate) fn collect_files_sorted(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    files
}

/// Natural string comparison: digit runs compare numerically, everything
/// else byte-wise, so "ep2" sorts before "ep10".
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut ai);
                    let nb = take_number(&mut bi);
                    match na.cmp(&nb) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    ai.next();
                    bi.next();
                    match ca.cmp(&cb) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_number(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> u128 {
    let mut value: u128 = 0;
    while let Some(c) = iter.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        iter.next();
        value = value.saturating_mul(10).saturating_add((c as u8 - b'0') as u128);
    }
    value
}
