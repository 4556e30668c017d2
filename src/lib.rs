//! Remuxa - Media-mutation pipeline for bot-managed downloads
//!
//! This library provides the stream-level mutation stage that sits between
//! a download engine and an upload target: lossless ffmpeg remuxes
//! (attachment embedding, audio track removal and reordering), an
//! interactive track-selection dialog, live progress reporting and a
//! natural-order merge engine.
//!
//! # Module Structure
//!
//! - `command`: Transform command builder (operation -> argument vector)
//! - `executor`: Sequential batch executor behind the global CPU gate
//! - `session`: Interactive track-selection sessions and their registry
//! - `merge`: Concat merge engine over a directory of videos
//! - `progress` / `status`: Live progress state and the task status registry
//! - `probe`: ffprobe wrappers for stream metadata
//! - `chat` / `upload`: Transport seams for messaging and delivery

#![allow(clippy::too_many_arguments)]

pub mod chat;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod merge;
pub mod probe;
pub mod progress;
pub mod session;
pub mod status;
pub mod task;
pub mod upload;

// Re-export commonly used types for convenience
pub use chat::{Button, ButtonRows, ChatEvent, ChatInterface};
pub use command::{TransformCommand, TransformOp};
pub use error::{TransformError, TransformResult};
pub use executor::run_batch;
pub use merge::{merge_videos, MergeOutcome};
pub use probe::AudioTrack;
pub use progress::TransformProgress;
pub use session::{interactive_audio_removal, run_selection, SelectionOutcome, SessionRegistry};
pub use status::{StatusRegistry, StatusSnapshot, TaskStatus};
pub use task::TaskContext;
pub use upload::UploadTarget;
