//! Integration tests for the interactive selection session
//!
//! Run with: cargo test --test session_flow_test

use async_trait::async_trait;
use remuxa::chat::{ButtonRows, ChatEvent, ChatInterface};
use remuxa::error::{TransformError, TransformResult};
use remuxa::probe::AudioTrack;
use remuxa::session::{self, SelectionOutcome, SessionRegistry};
use remuxa::task::TaskContext;
use std::sync::{Arc, Mutex};

/// Chat transport double that records everything the pipeline sends.
#[derive(Default)]
struct RecordingChat {
    prompts: Mutex<Vec<(String, ButtonRows)>>,
    notices: Mutex<Vec<String>>,
    acks: Mutex<Vec<Option<String>>>,
}

impl RecordingChat {
    fn new() -> Arc<dyn ChatInterface> {
        Arc::new(Self::default())
    }

    fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    fn last_ack(&self) -> Option<Option<String>> {
        self.acks.lock().unwrap().last().cloned()
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatInterface for RecordingChat {
    async fn show_prompt(&self, text: &str, buttons: ButtonRows) -> TransformResult<()> {
        self.prompts.lock().unwrap().push((text.to_string(), buttons));
        Ok(())
    }

    async fn notify(&self, text: &str) -> TransformResult<()> {
        self.notices.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn acknowledge(&self, note: Option<&str>) {
        self.acks.lock().unwrap().push(note.map(str::to_string));
    }
}

fn recording_chat() -> (Arc<dyn ChatInterface>, Arc<RecordingChat>) {
    let concrete = Arc::new(RecordingChat::default());
    (Arc::clone(&concrete) as Arc<dyn ChatInterface>, concrete)
}

fn catalog(n: usize) -> Vec<AudioTrack> {
    (0..n)
        .map(|i| AudioTrack {
            index: i,
            language: format!("lang{}", i),
            title: String::new(),
            display_name: format!("LANG{}", i),
        })
        .collect()
}

const REQUESTER: i64 = 500;

fn ctx(task_id: u64) -> TaskContext {
    TaskContext::new(task_id, 10, REQUESTER, "movie.mkv")
}

#[tokio::test]
async fn test_toggle_and_done_resolve_apply() {
    let registry = SessionRegistry::new();
    let chat = RecordingChat::new();
    let ctx = ctx(1);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(2), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SelectionOutcome::Apply {
            indices: vec![0, 2],
            rename: None
        }
    );
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_toggle_twice_deselects() {
    let registry = SessionRegistry::new();
    let chat = RecordingChat::new();
    let ctx = ctx(2);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(1), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(1), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SelectionOutcome::Apply {
            indices: vec![0],
            rename: None
        }
    );
}

#[tokio::test]
async fn test_full_selection_is_a_guarded_noop() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(3);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(2)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(1), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(outcome, SelectionOutcome::NoChange);
    assert!(recorder.notices().iter().any(|n| n.contains("Cannot remove all audio tracks")));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_empty_selection_resolves_no_change() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(4);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    registry.dispatch(ticket.key(), REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(outcome, SelectionOutcome::NoChange);
    assert!(recorder.notices().iter().any(|n| n.contains("No audio tracks selected")));
}

#[tokio::test]
async fn test_other_users_are_ignored() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(5);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    // a stranger pressing done must neither resolve nor mutate the session
    registry.dispatch(&key, 999, ChatEvent::Done, &chat).await.unwrap();
    assert_eq!(recorder.last_ack(), Some(Some("You are not authorized to use this!".to_string())));
    assert!(registry.contains(&key));

    registry.dispatch(&key, 999, ChatEvent::Toggle(0), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    // the stranger's toggle never landed
    assert_eq!(outcome, SelectionOutcome::NoChange);
}

#[tokio::test]
async fn test_stale_events_after_resolution() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(6);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();
    assert!(registry.is_empty());

    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    assert_eq!(recorder.last_ack(), Some(Some("Session expired!".to_string())));
}

#[tokio::test]
async fn test_rename_flow_carries_new_name() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(7);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Rename, &chat).await.unwrap();
    assert!(recorder.notices().iter().any(|n| n.contains("new filename")));

    // toggles are refused while the rename dialog is open
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    assert_eq!(recorder.last_ack(), Some(Some("Finish renaming first!".to_string())));

    registry
        .dispatch(&key, REQUESTER, ChatEvent::RenameText("  better name  ".to_string()), &chat)
        .await
        .unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(1), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SelectionOutcome::Apply {
            indices: vec![1],
            rename: Some("better name".to_string())
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_rename_subtimeout_reverts_to_selection() {
    let registry = SessionRegistry::new();
    let chat = RecordingChat::new();
    let ctx = ctx(8);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    registry.dispatch(&key, REQUESTER, ChatEvent::Rename, &chat).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;

    // back in selection: toggling works again and no rename is carried
    registry.dispatch(&key, REQUESTER, ChatEvent::Toggle(0), &chat).await.unwrap();
    registry.dispatch(&key, REQUESTER, ChatEvent::Done, &chat).await.unwrap();

    let outcome = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SelectionOutcome::Apply {
            indices: vec![0],
            rename: None
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_session_deadline_times_out() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(9);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    let result = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket).await;
    assert!(matches!(result, Err(TransformError::SessionTimeout)));
    assert!(!registry.contains(&key));
    assert!(recorder.notices().iter().any(|n| n.contains("timed out")));
}

#[tokio::test]
async fn test_task_cancellation_unwinds_the_wait() {
    let registry = SessionRegistry::new();
    let chat = RecordingChat::new();
    let ctx = ctx(10);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    let key = ticket.key().to_string();

    ctx.cancel();
    let result = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket).await;
    assert!(matches!(result, Err(TransformError::Cancelled)));
    assert!(!registry.contains(&key));
}

#[tokio::test]
async fn test_cancel_event_resolves_cancelled() {
    let registry = SessionRegistry::new();
    let chat = RecordingChat::new();
    let ctx = ctx(11);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(2)).unwrap();
    registry
        .dispatch(ticket.key(), REQUESTER, ChatEvent::Cancel, &chat)
        .await
        .unwrap();

    let result = session::wait_for_selection(&registry, chat.as_ref(), &ctx, ticket).await;
    assert!(matches!(result, Err(TransformError::Cancelled)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_refresh_renders_prompt_with_buttons() {
    let registry = SessionRegistry::new();
    let (chat, recorder) = recording_chat();
    let ctx = ctx(12);

    let ticket = registry.open(&ctx, "movie.mkv".to_string(), catalog(3)).unwrap();
    registry.refresh(ticket.key(), chat.as_ref()).await.unwrap();

    assert_eq!(recorder.prompt_count(), 1);
    let (text, rows) = recorder.prompts.lock().unwrap()[0].clone();
    assert!(text.contains("Total audio tracks: 3"));
    assert!(text.contains("Name: movie.mkv"));
    // rename header, two track rows, done footer
    assert_eq!(rows.len(), 4);

    // every button token round-trips through the parser
    for row in &rows {
        for button in row {
            let (key, _event) = session::parse_token(&button.token).unwrap();
            assert_eq!(key, ticket.key());
        }
    }
}
