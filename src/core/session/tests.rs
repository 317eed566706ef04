use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::api::{ChunkChoice, ChunkDelta, ChunkUsage};
use crate::core::chat_stream::ChunkResult;
use crate::utils::test_utils::{spawn_mock_server, test_client, MockReply};

/// Hands out channel-backed streams the test feeds by hand.
#[derive(Default)]
struct ScriptedBackend {
    requests: Mutex<Vec<ChatCompletionRequest>>,
    senders: Mutex<Vec<mpsc::Sender<ChunkResult>>>,
}

impl ScriptedBackend {
    /// The producer side of the most recent stream; dropping it ends the stream.
    fn take_sender(&self) -> mpsc::Sender<ChunkResult> {
        self.senders
            .lock()
            .unwrap()
            .pop()
            .expect("a stream was opened")
    }

    fn last_request(&self) -> ChatCompletionRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a request was made")
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ChatBackend for ScriptedBackend {
    fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        cancel_token: CancellationToken,
    ) -> ChatStream {
        let (tx, stream) = ChatStream::channel(cancel_token, 16);
        self.requests.lock().unwrap().push(request);
        self.senders.lock().unwrap().push(tx);
        stream
    }
}

fn settings(model: &str, system_prompt: &str) -> ChatSettings {
    ChatSettings {
        model: model.to_string(),
        system_prompt: system_prompt.to_string(),
        temperature: 0.7,
        max_tokens: 2048,
    }
}

fn conversation(model: &str) -> (Arc<ScriptedBackend>, Conversation) {
    let backend = Arc::new(ScriptedBackend::default());
    let conversation = Conversation::new(backend.clone(), settings(model, ""));
    (backend, conversation)
}

fn chunk(content: Option<&str>, usage: Option<(u64, u64)>) -> CompletionChunk {
    CompletionChunk {
        id: "chatcmpl-1".to_string(),
        created: 0,
        model: "local-model".to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: content.map(str::to_string),
            },
            finish_reason: None,
        }],
        usage: usage.map(|(prompt_tokens, completion_tokens)| ChunkUsage {
            prompt_tokens,
            completion_tokens,
        }),
    }
}

fn text(content: &str) -> ChunkResult {
    Ok(chunk(Some(content), None))
}

#[test]
fn send_rejects_blank_input_without_touching_state() {
    let (backend, mut conversation) = conversation("local-model");
    conversation.set_input("draft");

    assert_eq!(conversation.send("   \n").err(), Some(SendRejection::EmptyInput));
    assert!(conversation.messages().is_empty());
    assert_eq!(conversation.input(), "draft");
    assert_eq!(conversation.state(), SessionState::Idle);
    assert_eq!(backend.request_count(), 0);
}

#[test]
fn send_requires_a_model() {
    let (backend, mut conversation) = conversation("");
    assert_eq!(
        conversation.send("hello").err(),
        Some(SendRejection::NoModelSelected)
    );
    assert!(conversation.messages().is_empty());
    assert_eq!(backend.request_count(), 0);
    assert_eq!(
        SendRejection::NoModelSelected.to_string(),
        "Select a model first"
    );
}

#[tokio::test]
async fn second_send_while_streaming_is_rejected() {
    let (backend, mut conversation) = conversation("local-model");
    let _turn = conversation.send("first").unwrap();
    conversation.set_input("second");

    assert_eq!(
        conversation.send("second").err(),
        Some(SendRejection::AlreadyStreaming)
    );
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.input(), "second");
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn send_appends_user_and_placeholder_and_builds_request() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut conversation = Conversation::new(backend.clone(), settings("local-model", "Be brief."));
    conversation.set_input("  hello  ");

    let turn = conversation.send_input().unwrap();
    assert_eq!(turn.stream_id(), 1);
    assert!(conversation.is_streaming());
    assert!(conversation.session().streaming);
    assert_eq!(conversation.input(), "");
    assert_eq!(
        conversation.messages(),
        &[ChatMessage::user("hello"), ChatMessage::assistant("")]
    );

    let request = backend.last_request();
    assert_eq!(request.model, "local-model");
    assert_eq!(request.stream, Some(true));
    assert_eq!(request.temperature, Some(0.7));
    assert_eq!(request.max_tokens, Some(2048));
    assert_eq!(
        request.messages,
        vec![ChatMessage::system("Be brief."), ChatMessage::user("hello")]
    );
}

#[tokio::test]
async fn empty_system_prompt_is_not_sent() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut conversation = Conversation::new(backend.clone(), settings("local-model", ""));
    let _turn = conversation.send("hi").unwrap();

    let request = backend.last_request();
    assert_eq!(request.messages, vec![ChatMessage::user("hi")]);
    assert!(conversation
        .messages()
        .iter()
        .all(|message| message.role != Role::System));
}

#[tokio::test]
async fn whitespace_system_prompt_is_sent_as_is() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut conversation = Conversation::new(backend.clone(), settings("local-model", "  "));
    let _turn = conversation.send("hi").unwrap();

    assert_eq!(
        backend.last_request().messages,
        vec![ChatMessage::system("  "), ChatMessage::user("hi")]
    );
}

#[tokio::test]
async fn chunks_accumulate_and_commit() {
    let (backend, mut conversation) = conversation("local-model");
    let mut turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();

    tx.send(Ok(chunk(None, None))).await.unwrap();
    tx.send(text("Hel")).await.unwrap();
    tx.send(text("lo")).await.unwrap();
    tx.send(Ok(chunk(Some(""), Some((3, 1))))).await.unwrap();
    tx.send(Ok(chunk(None, Some((3, 2))))).await.unwrap();
    drop(tx);

    let mut seen = Vec::new();
    let outcome = loop {
        let update = turn.next_update().await;
        if let Some(outcome) = conversation.apply_update(turn.stream_id(), update) {
            break outcome;
        }
        seen.push(conversation.messages()[1].content.clone());
    };

    assert_eq!(seen, vec!["", "Hel", "Hello", "Hello", "Hello"]);
    assert_eq!(outcome, TurnOutcome::Committed);
    assert_eq!(conversation.state(), SessionState::Idle);
    assert!(!conversation.session().streaming);
    assert_eq!(
        conversation.messages(),
        &[ChatMessage::user("hi"), ChatMessage::assistant("Hello")]
    );
    assert_eq!(
        conversation.usage(),
        Some(TokenUsage {
            prompt: 3,
            completion: 2
        })
    );
}

#[tokio::test]
async fn stop_keeps_only_chunks_already_applied() {
    let (backend, mut conversation) = conversation("local-model");
    let mut turn = conversation.send("count").unwrap();
    let tx = backend.take_sender();
    for part in ["one ", "two ", "three"] {
        tx.send(text(part)).await.unwrap();
    }

    for _ in 0..2 {
        let update = turn.next_update().await;
        assert!(conversation.apply_update(turn.stream_id(), update).is_none());
    }
    assert!(conversation.stop());

    let update = turn.next_update().await;
    assert!(matches!(update, StreamUpdate::Finished));
    assert_eq!(
        conversation.apply_update(turn.stream_id(), update),
        Some(TurnOutcome::Cancelled)
    );
    assert_eq!(conversation.messages()[1].content, "one two ");
    assert_eq!(conversation.last_error(), None);
    assert_eq!(conversation.state(), SessionState::Idle);
    assert!(tx.is_closed());
}

#[tokio::test]
async fn chunks_arriving_after_stop_are_dropped() {
    let (_backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let stop = conversation.stop_handle().expect("streaming");
    stop.stop();

    assert!(conversation
        .apply_update(turn.stream_id(), StreamUpdate::Chunk(chunk(Some("late"), None)))
        .is_none());
    assert_eq!(conversation.messages()[1].content, "");
    assert_eq!(
        conversation.apply_update(turn.stream_id(), StreamUpdate::Finished),
        Some(TurnOutcome::Cancelled)
    );
}

#[test]
fn stop_without_a_turn_is_a_no_op() {
    let (_backend, mut conversation) = conversation("local-model");
    assert!(!conversation.stop());
    assert!(conversation.stop_handle().is_none());
}

#[tokio::test]
async fn failure_removes_placeholder_and_records_error() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();
    tx.send(text("partial")).await.unwrap();
    tx.send(Err(ApiError::new("Server reported an error: overloaded")))
        .await
        .unwrap();

    let outcome = conversation.drive(turn).await;
    assert_eq!(
        outcome,
        TurnOutcome::Failed("Server reported an error: overloaded".to_string())
    );
    assert_eq!(conversation.messages(), &[ChatMessage::user("hi")]);
    assert_eq!(
        conversation.last_error(),
        Some("Server reported an error: overloaded")
    );
    assert_eq!(conversation.state(), SessionState::Idle);
}

#[tokio::test]
async fn http_error_from_server_fails_the_turn() {
    let server = spawn_mock_server(vec![MockReply::status(
        "500 Internal Server Error",
        "oops",
    )])
    .await;
    let client = test_client(&server.url("/v1"), "");
    let mut conversation = Conversation::new(Arc::new(client), settings("local-model", ""));

    let turn = conversation.send("hi").unwrap();
    let outcome = conversation.drive(turn).await;

    let TurnOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.contains("Internal Server Error"), "{message}");
    assert!(message.contains("oops"), "{message}");
    assert_eq!(conversation.messages(), &[ChatMessage::user("hi")]);
    assert_eq!(conversation.last_error(), Some(message.as_str()));
}

#[tokio::test]
async fn next_send_clears_previous_error() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();
    tx.send(Err(ApiError::new("boom"))).await.unwrap();
    conversation.drive(turn).await;
    assert_eq!(conversation.last_error(), Some("boom"));

    let _turn = conversation.send("again").unwrap();
    assert_eq!(conversation.last_error(), None);
    assert_eq!(
        backend.last_request().messages,
        vec![ChatMessage::user("hi"), ChatMessage::user("again")]
    );
}

#[tokio::test]
async fn updates_from_stale_streams_are_ignored() {
    let (backend, mut conversation) = conversation("local-model");
    let first = conversation.send("one").unwrap();
    let first_id = first.stream_id();
    drop(backend.take_sender());
    assert_eq!(conversation.drive(first).await, TurnOutcome::Committed);

    let second = conversation.send("two").unwrap();
    assert_ne!(second.stream_id(), first_id);

    assert!(conversation
        .apply_update(first_id, StreamUpdate::Chunk(chunk(Some("stale"), None)))
        .is_none());
    assert!(conversation
        .apply_update(first_id, StreamUpdate::Failed(ApiError::new("stale")))
        .is_none());
    assert!(conversation.is_streaming());
    assert_eq!(conversation.messages().last().unwrap().content, "");
    assert_eq!(conversation.last_error(), None);
}

#[tokio::test]
async fn drive_runs_to_completion() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();

    let feeder = tokio::spawn(async move {
        for part in ["a", "b", "c"] {
            tx.send(text(part)).await.unwrap();
        }
    });

    assert_eq!(conversation.drive(turn).await, TurnOutcome::Committed);
    feeder.await.unwrap();
    assert_eq!(conversation.messages()[1].content, "abc");
}

#[tokio::test]
async fn stop_handle_cancels_from_another_task() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();
    let stop = conversation.stop_handle().unwrap();

    tx.send(text("first")).await.unwrap();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        stop.stop();
    });

    assert_eq!(conversation.drive(turn).await, TurnOutcome::Cancelled);
    stopper.await.unwrap();
    assert_eq!(conversation.messages()[1].content, "first");
}

#[tokio::test]
async fn resend_removes_last_exchange_and_restores_input() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    assert_eq!(conversation.resend(), None);

    let tx = backend.take_sender();
    tx.send(text("hello")).await.unwrap();
    drop(tx);
    assert_eq!(conversation.drive(turn).await, TurnOutcome::Committed);

    assert_eq!(conversation.resend().as_deref(), Some("hi"));
    assert!(conversation.messages().is_empty());
    assert_eq!(conversation.input(), "hi");
    assert_eq!(backend.request_count(), 1);

    let _turn = conversation.send_input().unwrap();
    assert_eq!(backend.request_count(), 2);
    assert_eq!(backend.last_request().messages, vec![ChatMessage::user("hi")]);
}

#[tokio::test]
async fn resend_needs_a_completed_exchange() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();
    tx.send(Err(ApiError::new("boom"))).await.unwrap();
    conversation.drive(turn).await;
    assert_eq!(conversation.messages(), [ChatMessage::user("hi")]);

    assert_eq!(conversation.resend(), None);
    assert_eq!(conversation.messages(), [ChatMessage::user("hi")]);
    assert_eq!(conversation.input(), "");
}

#[tokio::test]
async fn resend_after_failure_restores_orphaned_user_message() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    let tx = backend.take_sender();
    tx.send(text("hello")).await.unwrap();
    drop(tx);
    assert_eq!(conversation.drive(turn).await, TurnOutcome::Committed);

    let turn = conversation.send("again").unwrap();
    let tx = backend.take_sender();
    tx.send(Err(ApiError::new("boom"))).await.unwrap();
    conversation.drive(turn).await;

    assert_eq!(conversation.resend().as_deref(), Some("again"));
    assert_eq!(
        conversation.messages(),
        [ChatMessage::user("hi"), ChatMessage::assistant("hello")]
    );
    assert_eq!(conversation.input(), "again");
}

#[test]
fn resend_with_empty_transcript_does_nothing() {
    let (_backend, mut conversation) = conversation("local-model");
    conversation.set_input("draft");
    assert_eq!(conversation.resend(), None);
    assert_eq!(conversation.input(), "draft");
}

#[tokio::test]
async fn clear_resets_transcript_only_when_idle() {
    let (backend, mut conversation) = conversation("local-model");
    let turn = conversation.send("hi").unwrap();
    assert!(!conversation.clear());
    assert_eq!(conversation.messages().len(), 2);

    let tx = backend.take_sender();
    tx.send(Ok(chunk(Some("yo"), Some((1, 1))))).await.unwrap();
    drop(tx);
    conversation.drive(turn).await;
    assert!(conversation.usage().is_some());

    assert!(conversation.clear());
    assert!(conversation.messages().is_empty());
    assert_eq!(conversation.usage(), None);
    assert_eq!(conversation.last_error(), None);
}
