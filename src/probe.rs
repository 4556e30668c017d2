//! FFprobe wrappers for stream metadata.
//!
//! Everything the pipeline knows about a media file comes through here:
//! audio-stream counts, per-stream language/title tags (JSON output),
//! total duration for ETA math, and the playable-video check used by the
//! merge engine.

use crate::config;
use crate::error::{TransformError, TransformResult};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

/// One selectable audio track, as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    /// Zero-based audio stream index
    pub index: usize,
    pub language: String,
    pub title: String,
    /// Label shown on selection buttons: "ENG - Commentary" or just "ENG"
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct ProbeStreams {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    language: Option<String>,
    title: Option<String>,
}

/// Number of audio streams in a file.
pub async fn audio_stream_count<P: AsRef<Path>>(path: P) -> TransformResult<usize> {
    let output = Command::new(&*config::FFPROBE_BIN)
        .args(["-v", "error", "-select_streams", "a", "-show_entries", "stream=index", "-of", "csv=p=0"])
        .arg(path.as_ref())
        .output()
        .await?;

    if !output.status.success() {
        return Err(TransformError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(count_from_csv(&String::from_utf8_lossy(&output.stdout)))
}

fn count_from_csv(stdout: &str) -> usize {
    stdout.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Detailed information about all audio tracks in a file.
pub async fn audio_tracks<P: AsRef<Path>>(path: P) -> TransformResult<Vec<AudioTrack>> {
    let output = Command::new(&*config::FFPROBE_BIN)
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index:stream_tags=language,title",
            "-of",
            "json",
        ])
        .arg(path.as_ref())
        .output()
        .await?;

    if !output.status.success() {
        return Err(TransformError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    tracks_from_json(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the JSON stream listing into the track catalog.
///
/// Indices are positional within the audio selection, matching the
/// `-map -0:a:N` addressing used by the command builder.
fn tracks_from_json(json: &str) -> TransformResult<Vec<AudioTrack>> {
    let parsed: ProbeStreams =
        serde_json::from_str(json).map_err(|e| TransformError::Probe(format!("malformed stream listing: {}", e)))?;

    Ok(parsed
        .streams
        .into_iter()
        .enumerate()
        .map(|(index, stream)| {
            let language = stream.tags.language.unwrap_or_else(|| "Unknown".to_string());
            let title = stream.tags.title.unwrap_or_default();
            let display_name = if title.is_empty() {
                language.to_uppercase()
            } else {
                format!("{} - {}", language.to_uppercase(), title)
            };
            AudioTrack {
                index,
                language,
                title,
                display_name,
            }
        })
        .collect())
}

/// Total duration in seconds, for ETA computation.
pub async fn media_duration<P: AsRef<Path>>(path: P) -> TransformResult<f64> {
    let output = Command::new(&*config::FFPROBE_BIN)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path.as_ref())
        .output()
        .await?;

    if !output.status.success() {
        return Err(TransformError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    duration_str
        .trim()
        .parse::<f64>()
        .map_err(|_| TransformError::Probe("failed to parse duration".to_string()))
}

/// Whether the file carries a video stream (merge eligibility check).
///
/// Probe failures count as "not a video" so a stray file can never break
/// a directory scan.
pub async fn is_playable_video<P: AsRef<Path>>(path: P) -> bool {
    let output = Command::new(&*config::FFPROBE_BIN)
        .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=codec_type", "-of", "csv=p=0"])
        .arg(path.as_ref())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).contains("video"),
        _ => false,
    }
}

/// Size of a file, or the cumulative size of a directory tree.
pub async fn path_size<P: AsRef<Path>>(path: P) -> u64 {
    let path = path.as_ref().to_path_buf();
    if path.is_file() {
        return tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
    }
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}
