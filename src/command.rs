//! Transform command builder.
//!
//! Turns an operation descriptor plus a target file into the argument vector
//! for the external transform tool and the temp output path the executor
//! will rename into place. Pure except for the stream-count probe.
//!
//! Supported operations:
//! - Attach: embed an image as a named attachment stream
//! - RemoveAudio: drop specific audio tracks by index
//! - ReorderAudio: remap audio tracks in a requested order

use crate::config;
use crate::error::{TransformError, TransformResult};
use crate::probe;
use std::path::{Path, PathBuf};

/// A media mutation the executor can apply to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOp {
    /// Embed an image as an attachment stream (cover art)
    Attach { image: PathBuf },
    /// Remove the audio tracks at these indices
    RemoveAudio { indices: Vec<usize> },
    /// Remap audio tracks into this order; the first becomes the default track
    ReorderAudio { order: Vec<usize> },
}

impl TransformOp {
    /// Short label for status entries and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TransformOp::Attach { .. } => "attachment",
            TransformOp::RemoveAudio { .. } => "audio_remove",
            TransformOp::ReorderAudio { .. } => "audio_reorder",
        }
    }
}

/// A ready-to-launch invocation of the external transform tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Where the tool writes; renamed over the original on success
    pub temp_output: PathBuf,
}

/// Whether this container is eligible for stream-level mutation.
pub fn is_eligible<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|e| e.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false)
}

/// Deterministic temp output path: `<input>.temp.<container>`.
///
/// The global gate guarantees at most one active subprocess, so this can
/// never collide across concurrently active jobs.
pub fn temp_output_path(input: &Path) -> PathBuf {
    let container = input
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "mkv".to_string());
    PathBuf::from(format!("{}.temp.{}", input.display(), container))
}

/// Parse a comma-separated index list ("0, 2,3") from a chat command.
pub fn parse_indices(raw: &str) -> TransformResult<Vec<usize>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| TransformError::Validation(format!("invalid audio index: {:?}", part.trim())))
        })
        .collect()
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Build the command for `op` against `file`, probing stream metadata as needed.
pub async fn build(file: &Path, op: &TransformOp) -> TransformResult<TransformCommand> {
    match op {
        TransformOp::Attach { image } => build_attach(file, image).await,
        TransformOp::RemoveAudio { indices } => build_remove_audio(file, indices).await,
        TransformOp::ReorderAudio { order } => build_reorder_audio(file, order).await,
    }
}

/// Embed `image` as a named attachment stream with default disposition,
/// copying all existing streams unmodified.
pub async fn build_attach(file: &Path, image: &Path) -> TransformResult<TransformCommand> {
    let ext = image
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let temp_output = temp_output_path(file);
    let args = assemble_attach(file, image, &ext, &temp_output);
    Ok(TransformCommand {
        program: config::FFMPEG_BIN.clone(),
        args,
        temp_output,
    })
}

fn assemble_attach(file: &Path, image: &Path, ext: &str, temp: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        file.display().to_string(),
        "-attach".into(),
        image.display().to_string(),
        "-metadata:s:t".into(),
        format!("mimetype={}", mime_for_extension(ext)),
        "-metadata:s:t".into(),
        format!("filename=cover.{}", ext),
        "-disposition:t".into(),
        "default".into(),
        "-c".into(),
        "copy".into(),
        "-map".into(),
        "0".into(),
        "-map".into(),
        "0:t?".into(),
        "-threads".into(),
        config::transform::thread_hint().to_string(),
        temp.display().to_string(),
    ]
}

/// Drop the audio tracks at `indices`, copying every other stream.
///
/// Probes the file first; a probe failure counts as zero streams found and
/// the operation is rejected for this file. Removing *all* tracks is
/// permitted here with a warning — the interactive session is the layer
/// that blocks a full removal (see DESIGN.md).
pub async fn build_remove_audio(file: &Path, indices: &[usize]) -> TransformResult<TransformCommand> {
    if indices.is_empty() {
        return Err(TransformError::Validation("no audio indices given".to_string()));
    }

    let count = probed_audio_count(file).await;
    if count == 0 {
        return Err(TransformError::Validation(format!(
            "no audio streams found in {}",
            file.display()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i >= count) {
        return Err(TransformError::Validation(format!(
            "audio index {} out of range: {} has {} audio streams (0-{})",
            bad,
            file.display(),
            count,
            count - 1
        )));
    }
    if indices.len() >= count {
        log::warn!(
            "Removing all {} audio tracks from {}; video will have no audio",
            count,
            file.display()
        );
    }

    let temp_output = temp_output_path(file);
    let args = assemble_remove_audio(file, indices, &temp_output);
    Ok(TransformCommand {
        program: config::FFMPEG_BIN.clone(),
        args,
        temp_output,
    })
}

fn assemble_remove_audio(file: &Path, indices: &[usize], temp: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        file.display().to_string(),
        "-map".into(),
        "0".into(),
    ];
    for idx in indices {
        args.push("-map".into());
        args.push(format!("-0:a:{}", idx));
    }
    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-c:s".into(),
        "copy".into(),
        "-threads".into(),
        config::transform::thread_hint().to_string(),
        temp.display().to_string(),
    ]);
    args
}

/// Remap audio tracks into `order`; the first mapped track gets default
/// disposition, the rest none. Subtitles pass through unconditionally.
pub async fn build_reorder_audio(file: &Path, order: &[usize]) -> TransformResult<TransformCommand> {
    if order.is_empty() {
        return Err(TransformError::Validation("no audio order given".to_string()));
    }

    let count = probed_audio_count(file).await;
    if count == 0 {
        return Err(TransformError::Validation(format!(
            "no audio streams found in {}",
            file.display()
        )));
    }
    if order.len() > count {
        return Err(TransformError::Validation(format!(
            "{} indices provided but {} has only {} audio streams",
            order.len(),
            file.display(),
            count
        )));
    }
    if let Some(&bad) = order.iter().find(|&&i| i >= count) {
        return Err(TransformError::Validation(format!(
            "audio index {} out of range: {} has {} audio streams (0-{})",
            bad,
            file.display(),
            count,
            count - 1
        )));
    }

    let temp_output = temp_output_path(file);
    let args = assemble_reorder_audio(file, order, &temp_output);
    Ok(TransformCommand {
        program: config::FFMPEG_BIN.clone(),
        args,
        temp_output,
    })
}

fn assemble_reorder_audio(file: &Path, order: &[usize], temp: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        file.display().to_string(),
        "-map".into(),
        "0:v:0".into(),
    ];
    for (position, idx) in order.iter().enumerate() {
        args.push("-map".into());
        args.push(format!("0:a:{}", idx));
        args.push(format!("-disposition:a:{}", position));
        args.push(if position == 0 { "default".into() } else { "none".into() });
    }
    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-map".into(),
        "0:s?".into(),
        "-c:s".into(),
        "copy".into(),
        "-threads".into(),
        config::transform::thread_hint().to_string(),
        temp.display().to_string(),
    ]);
    args
}

/// Stream count with the probe-failure policy applied: unavailable or
/// malformed probe output counts as zero streams found.
async fn probed_audio_count(file: &Path) -> usize {
    match probe::audio_stream_count(file).await {
        Ok(count) => count,
        Err(e) => {
            log::warn!("Probe failed for {}: {}; treating as zero audio streams", file.display(), e);
            0
        }
    }
}
