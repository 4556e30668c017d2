//! Interactive track-selection sessions.
//!
//! A session shows the requester a selectable list of audio tracks and
//! accumulates toggles until "done" or the deadline. All inbound events go
//! through a single dispatch entry point that checks the current state
//! before interpreting anything — the rename sub-dialog is an explicit
//! nested state, not a dynamically attached handler. Live sessions are kept
//! in a keyed registry; lookup and removal are atomic so a session can
//! never resolve twice and stale button events after resolution are
//! acknowledged and dropped.
//!
//! State machine:
//! `Created → AwaitingSelection → (AwaitingRename ↔ AwaitingSelection)
//!  → Resolved{Completed | TimedOut | Cancelled}`

use crate::chat::{Button, ButtonRows, ChatEvent, ChatInterface};
use crate::command::{self, TransformOp};
use crate::config;
use crate::error::{TransformError, TransformResult};
use crate::executor;
use crate::merge;
use crate::probe::{self, AudioTrack};
use crate::status::StatusRegistry;
use crate::task::TaskContext;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Callback token prefix for selection sessions.
const TOKEN_PREFIX: &str = "audsel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingSelection,
    AwaitingRename,
}

/// How a session resolved, as delivered to the waiting batch driver.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Apply { indices: Vec<usize>, rename: Option<String> },
    NoChange,
    Cancelled,
}

/// What the batch driver does after a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Remove these indices, then optionally rename the result
    Apply { indices: Vec<usize>, rename: Option<String> },
    /// Proceed with the file unchanged (empty or full selection)
    NoChange,
}

#[derive(Debug)]
struct SessionInner {
    selected: BTreeSet<usize>,
    pending_rename: Option<String>,
    state: SessionState,
    /// Bumped on every rename-state change so a stale sub-timeout is a no-op
    rename_epoch: u64,
    done_tx: Option<oneshot::Sender<Resolution>>,
}

/// Live state of one selection dialog with a single requester.
#[derive(Debug)]
pub struct SelectionSession {
    key: String,
    requester_id: i64,
    file_name: String,
    catalog: Vec<AudioTrack>,
    deadline: Instant,
    inner: Mutex<SessionInner>,
}

impl SelectionSession {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plain prompt text plus button layout for the chat collaborator.
    fn render(&self) -> (String, ButtonRows) {
        let (selected, pending_rename) = {
            let inner = self.lock();
            (inner.selected.clone(), inner.pending_rename.clone())
        };

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let mins = remaining.as_secs() / 60;
        let secs = remaining.as_secs() % 60;
        let filename = pending_rename.as_deref().unwrap_or(&self.file_name);

        let mut text = format!(
            "Audio Remove Settings\n\nTotal audio tracks: {}\nName: {}\n",
            self.catalog.len(),
            filename
        );
        if !selected.is_empty() {
            text.push_str("Selected for removal:\n");
            for track in self.catalog.iter().filter(|t| selected.contains(&t.index)) {
                text.push_str(&format!("├ {} (track {})\n", track.display_name, track.index + 1));
            }
        }
        text.push_str(&format!("Time left: {}m{:02}s", mins, secs));

        let mut rows: ButtonRows = vec![vec![Button::new(
            "📝 Rename",
            format!("{}:{}:rename", TOKEN_PREFIX, self.key),
        )]];
        for pair in self.catalog.chunks(2) {
            rows.push(
                pair.iter()
                    .map(|track| {
                        let prefix = if selected.contains(&track.index) { "✅ " } else { "" };
                        Button::new(
                            format!("{}{}", prefix, track.display_name),
                            format!("{}:{}:toggle:{}", TOKEN_PREFIX, self.key, track.index),
                        )
                    })
                    .collect(),
            );
        }
        rows.push(vec![Button::new(
            "✅ Done Selecting",
            format!("{}:{}:done", TOKEN_PREFIX, self.key),
        )]);

        (text, rows)
    }
}

/// Handle returned to the batch driver when a session opens.
#[derive(Debug)]
pub struct SessionTicket {
    key: String,
    deadline: Instant,
    rx: oneshot::Receiver<Resolution>,
}

impl SessionTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Registry of live selection sessions, keyed by chat + task identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SelectionSession>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Open a session over the given track catalog.
    ///
    /// Rejected immediately when fewer than 2 selectable entries exist —
    /// there is nothing to choose among one option, and a single track must
    /// never be removable interactively.
    pub fn open(&self, ctx: &TaskContext, file_name: String, catalog: Vec<AudioTrack>) -> TransformResult<SessionTicket> {
        if catalog.len() < 2 {
            return Err(TransformError::Validation(format!(
                "selection needs at least 2 audio tracks, found {}",
                catalog.len()
            )));
        }

        let key = ctx.session_key();
        let deadline = Instant::now() + config::session::selection_timeout();
        let (done_tx, rx) = oneshot::channel();
        let session = Arc::new(SelectionSession {
            key: key.clone(),
            requester_id: ctx.requester_id,
            file_name,
            catalog,
            deadline,
            inner: Mutex::new(SessionInner {
                selected: BTreeSet::new(),
                pending_rename: None,
                state: SessionState::AwaitingSelection,
                rename_epoch: 0,
                done_tx: Some(done_tx),
            }),
        });

        log::info!("Opened audio selection session {}", key);
        self.sessions.insert(key.clone(), session);
        Ok(SessionTicket { key, deadline, rx })
    }

    /// Re-render the prompt for a live session.
    pub async fn refresh(&self, key: &str, chat: &dyn ChatInterface) -> TransformResult<()> {
        let Some(session) = self.get(key) else {
            return Ok(());
        };
        let (text, rows) = session.render();
        chat.show_prompt(&text, rows).await
    }

    fn get(&self, key: &str) -> Option<Arc<SelectionSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Single entry point for all inbound session events.
    ///
    /// Events from anyone but the original requester are acknowledged and
    /// ignored. While the rename sub-dialog is active, toggle/done events
    /// are refused with a notice until a text reply arrives or the 60 s
    /// sub-timeout elapses.
    pub async fn dispatch(
        self: &Arc<Self>,
        key: &str,
        from_user: i64,
        event: ChatEvent,
        chat: &Arc<dyn ChatInterface>,
    ) -> TransformResult<()> {
        let Some(session) = self.get(key) else {
            chat.acknowledge(Some("Session expired!")).await;
            return Ok(());
        };

        if from_user != session.requester_id {
            chat.acknowledge(Some("You are not authorized to use this!")).await;
            return Ok(());
        }

        match event {
            ChatEvent::Toggle(index) => {
                let refused = {
                    let mut inner = session.lock();
                    if inner.state == SessionState::AwaitingRename {
                        true
                    } else {
                        if index < session.catalog.len() && !inner.selected.remove(&index) {
                            inner.selected.insert(index);
                        }
                        false
                    }
                };
                if refused {
                    chat.acknowledge(Some("Finish renaming first!")).await;
                    return Ok(());
                }
                chat.acknowledge(None).await;
                self.refresh(key, chat.as_ref()).await
            }

            ChatEvent::Rename => {
                let epoch = {
                    let mut inner = session.lock();
                    if inner.state == SessionState::AwaitingRename {
                        None
                    } else {
                        inner.state = SessionState::AwaitingRename;
                        inner.rename_epoch += 1;
                        Some(inner.rename_epoch)
                    }
                };
                let Some(epoch) = epoch else {
                    chat.acknowledge(Some("Finish renaming first!")).await;
                    return Ok(());
                };
                chat.acknowledge(None).await;
                chat.notify("Send the new filename (without extension) within 60 seconds").await?;

                let registry = Arc::clone(self);
                let chat = Arc::clone(chat);
                let key = key.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(config::session::rename_timeout()).await;
                    registry.expire_rename(&key, epoch, chat.as_ref()).await;
                });
                Ok(())
            }

            ChatEvent::RenameText(text) => {
                let accepted = {
                    let mut inner = session.lock();
                    if inner.state == SessionState::AwaitingRename {
                        inner.pending_rename = Some(text.trim().to_string());
                        inner.state = SessionState::AwaitingSelection;
                        inner.rename_epoch += 1;
                        true
                    } else {
                        false
                    }
                };
                if accepted {
                    self.refresh(key, chat.as_ref()).await?;
                }
                Ok(())
            }

            ChatEvent::Done => {
                let resolved = {
                    let mut inner = session.lock();
                    if inner.state == SessionState::AwaitingRename {
                        None
                    } else {
                        inner.done_tx.take().map(|tx| {
                            let resolution = if inner.selected.is_empty() {
                                (Resolution::NoChange, Some("No audio tracks selected. Proceeding without changes."))
                            } else if inner.selected.len() >= session.catalog.len() {
                                (
                                    Resolution::NoChange,
                                    Some("Cannot remove all audio tracks! Proceeding without changes."),
                                )
                            } else {
                                (
                                    Resolution::Apply {
                                        indices: inner.selected.iter().copied().collect(),
                                        rename: inner.pending_rename.take(),
                                    },
                                    None,
                                )
                            };
                            (tx, resolution)
                        })
                    }
                };

                match resolved {
                    None => {
                        let still_renaming = session.lock().state == SessionState::AwaitingRename;
                        let note = if still_renaming {
                            "Finish renaming first!"
                        } else {
                            "Session expired!"
                        };
                        chat.acknowledge(Some(note)).await;
                        Ok(())
                    }
                    Some((tx, (resolution, note))) => {
                        // Remove before waking the driver: stale button
                        // events must hit the expired path, never a
                        // half-resolved session.
                        self.sessions.remove(key);
                        chat.acknowledge(None).await;
                        if let Some(note) = note {
                            chat.notify(note).await?;
                        }
                        let _ = tx.send(resolution);
                        Ok(())
                    }
                }
            }

            ChatEvent::Cancel => {
                let tx = session.lock().done_tx.take();
                self.sessions.remove(key);
                chat.acknowledge(None).await;
                if let Some(tx) = tx {
                    let _ = tx.send(Resolution::Cancelled);
                }
                Ok(())
            }
        }
    }

    /// Rename sub-timeout: drop back to selection if the dialog is still
    /// waiting on the same epoch, then refresh the UI.
    async fn expire_rename(&self, key: &str, epoch: u64, chat: &dyn ChatInterface) {
        let Some(session) = self.get(key) else {
            return;
        };
        let expired = {
            let mut inner = session.lock();
            if inner.state == SessionState::AwaitingRename && inner.rename_epoch == epoch {
                inner.state = SessionState::AwaitingSelection;
                true
            } else {
                false
            }
        };
        if expired {
            log::info!("Rename dialog for session {} timed out", key);
            let _ = self.refresh(key, chat).await;
        }
    }
}

/// Parse a callback token back into its session key and event.
///
/// Layout: `audsel:<key>:toggle:<index>`, `audsel:<key>:rename`,
/// `audsel:<key>:done`. Transports route the matching prefix here.
pub fn parse_token(token: &str) -> Option<(String, ChatEvent)> {
    let rest = token.strip_prefix(&format!("{}:", TOKEN_PREFIX))?;
    let mut parts = rest.splitn(3, ':');
    let key = parts.next()?.to_string();
    let event = match (parts.next()?, parts.next()) {
        ("toggle", Some(index)) => ChatEvent::Toggle(index.parse().ok()?),
        ("rename", None) => ChatEvent::Rename,
        ("done", None) => ChatEvent::Done,
        ("cancel", None) => ChatEvent::Cancel,
        _ => return None,
    };
    Some((key, event))
}

/// Wait for the session to resolve: one wait racing explicit completion,
/// the overall deadline and the owning task's cancellation.
pub async fn wait_for_selection(
    registry: &SessionRegistry,
    chat: &dyn ChatInterface,
    ctx: &TaskContext,
    ticket: SessionTicket,
) -> TransformResult<SelectionOutcome> {
    let SessionTicket { key, deadline, mut rx } = ticket;

    tokio::select! {
        resolution = &mut rx => map_resolution(resolution.ok()),
        _ = tokio::time::sleep_until(deadline) => {
            // The done event may have raced the deadline.
            if let Ok(resolution) = rx.try_recv() {
                return map_resolution(Some(resolution));
            }
            registry.sessions.remove(&key);
            log::info!("Audio selection session {} timed out", key);
            let _ = chat.notify("Audio selection timed out!").await;
            Err(TransformError::SessionTimeout)
        }
        _ = ctx.cancelled() => {
            registry.sessions.remove(&key);
            Err(TransformError::Cancelled)
        }
    }
}

fn map_resolution(resolution: Option<Resolution>) -> TransformResult<SelectionOutcome> {
    match resolution {
        Some(Resolution::Apply { indices, rename }) => Ok(SelectionOutcome::Apply { indices, rename }),
        Some(Resolution::NoChange) => Ok(SelectionOutcome::NoChange),
        Some(Resolution::Cancelled) => Err(TransformError::Cancelled),
        None => Err(TransformError::Cancelled),
    }
}

/// Probe the target, open a session over its tracks, show the prompt and
/// wait for the outcome.
pub async fn run_selection(
    registry: &Arc<SessionRegistry>,
    chat: &Arc<dyn ChatInterface>,
    ctx: &TaskContext,
    target_file: &Path,
) -> TransformResult<SelectionOutcome> {
    let catalog = match probe::audio_tracks(target_file).await {
        Ok(catalog) => catalog,
        Err(e) => {
            log::warn!("Probe failed for {}: {}", target_file.display(), e);
            Vec::new()
        }
    };

    if catalog.is_empty() {
        chat.notify("No audio tracks found in the file!").await?;
        return Ok(SelectionOutcome::NoChange);
    }
    if catalog.len() == 1 {
        chat.notify("File has only one audio track. Cannot remove all audio!").await?;
        return Ok(SelectionOutcome::NoChange);
    }

    let file_name = target_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| target_file.display().to_string());

    let ticket = registry.open(ctx, file_name, catalog)?;
    registry.refresh(ticket.key(), chat.as_ref()).await?;
    wait_for_selection(registry, chat.as_ref(), ctx, ticket).await
}

/// Interactive audio removal over a download path: select tracks, run the
/// removal batch, then apply the optional rename.
pub async fn interactive_audio_removal(
    registry: &Arc<SessionRegistry>,
    chat: &Arc<dyn ChatInterface>,
    ctx: &TaskContext,
    statuses: &StatusRegistry,
    root: &Path,
) -> TransformResult<PathBuf> {
    let Some(target) = find_first_eligible(root) else {
        chat.notify("No MKV files found for audio removal!").await?;
        return Ok(root.to_path_buf());
    };

    match run_selection(registry, chat, ctx, &target).await {
        Ok(SelectionOutcome::NoChange) => Ok(root.to_path_buf()),
        Ok(SelectionOutcome::Apply { indices, rename }) => {
            let out = executor::run_batch(ctx, root, &TransformOp::RemoveAudio { indices }, statuses).await?;
            match rename {
                Some(name) => Ok(apply_rename(&out, &name).await),
                None => Ok(out),
            }
        }
        // Session discarded and requester notified; the file goes on unmodified.
        Err(TransformError::SessionTimeout) => Ok(root.to_path_buf()),
        Err(e) => Err(e),
    }
}

/// First mutation-eligible file under the path, in natural order.
fn find_first_eligible(root: &Path) -> Option<PathBuf> {
    if root.is_file() {
        return command::is_eligible(root).then(|| root.to_path_buf());
    }
    merge::collect_files_sorted(root).into_iter().find(|p| command::is_eligible(p))
}

/// Rename the result, keeping the original extension for files.
///
/// Rename failures are logged and swallowed: the transform already
/// succeeded, so the caller gets the un-renamed path back.
pub async fn apply_rename(path: &Path, new_name: &str) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let new_path = if path.is_file() {
        match path.extension() {
            Some(ext) => parent.join(format!("{}.{}", new_name, ext.to_string_lossy())),
            None => parent.join(new_name),
        }
    } else {
        parent.join(new_name)
    };

    match tokio::fs::rename(path, &new_path).await {
        Ok(()) => new_path,
        Err(e) => {
            log::error!("Rename failed for {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog(n: usize) -> Vec<AudioTrack> {
        (0..n)
            .map(|i| AudioTrack {
                index: i,
                language: format!("l{}", i),
                title: String::new(),
                display_name: format!("L{}", i),
            })
            .collect()
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(
            parse_token("audsel:10_3:toggle:2"),
            Some(("10_3".to_string(), ChatEvent::Toggle(2)))
        );
        assert_eq!(parse_token("audsel:10_3:rename"), Some(("10_3".to_string(), ChatEvent::Rename)));
        assert_eq!(parse_token("audsel:10_3:done"), Some(("10_3".to_string(), ChatEvent::Done)));
        assert_eq!(parse_token("audsel:10_3:cancel"), Some(("10_3".to_string(), ChatEvent::Cancel)));
        assert_eq!(parse_token("cuts:open:5"), None);
        assert_eq!(parse_token("audsel:10_3:toggle:x"), None);
        assert_eq!(parse_token("audsel:10_3:bogus"), None);
    }

    #[tokio::test]
    async fn test_open_rejects_small_catalogs() {
        let registry = SessionRegistry::new();
        let ctx = TaskContext::new(1, 10, 500, "f.mkv");

        for n in [0, 1] {
            let result = registry.open(&ctx, "f.mkv".to_string(), catalog(n));
            assert!(matches!(result, Err(TransformError::Validation(_))));
        }
        assert!(registry.is_empty());

        assert!(registry.open(&ctx, "f.mkv".to_string(), catalog(2)).is_ok());
        assert!(registry.contains("10_1"));
    }

    #[tokio::test]
    async fn test_render_shows_selection_and_preview() {
        let registry = SessionRegistry::new();
        let ctx = TaskContext::new(2, 10, 500, "movie.mkv");
        let _ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();

        let session = registry.get("10_2").unwrap();
        {
            let mut inner = session.lock();
            inner.selected.insert(0);
            inner.selected.insert(2);
            inner.pending_rename = Some("renamed".to_string());
        }

        let (text, rows) = session.render();
        assert!(text.contains("Total audio tracks: 3"));
        assert!(text.contains("Name: renamed"));
        assert!(text.contains("L0 (track 1)"));
        assert!(text.contains("L2 (track 3)"));
        assert!(!text.contains("L1 (track 2)"));

        // rename header, two track rows (2 + 1), done footer
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][0].token, "audsel:10_2:rename");
        assert_eq!(rows[1][0].label, "✅ L0");
        assert_eq!(rows[1][1].label, "L1");
        assert_eq!(rows[2][0].label, "✅ L2");
        assert_eq!(rows[3][0].token, "audsel:10_2:done");
    }
}
