// Integration tests for the promptlens relay and session controller.
//
// These tests exercise the full system end-to-end using the library crate's
// public API: a mock upstream provider served over real TCP, the relay in
// front of it, and either the relay client or the session controller
// driving the four operations through both HTTP hops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use promptlens::config::{SessionConfig, UpstreamConfig};
use promptlens::protocol::{QuestionAnswer, SessionCommand, SessionUpdate};
use promptlens::relay::{http, server, RelayContext, RelayListener};
use promptlens::session::{controller, RelayClient};
use promptlens::upstream::{OpenAiClient, Upstream};

// ===========================================================================
// Mock upstream provider
// ===========================================================================

const QUESTIONS_JSON: &str = r#"{"questions":["What breed is the dog?","What does the dog look like?","What is the setting you have in mind?","What color is the dog?","Is there a specific emotion the dog should convey?"]}"#;

/// Scripted behavior for the mock upstream. Chat responses are consumed in
/// order; when the queue is empty the standard questions JSON is returned.
#[derive(Default)]
struct UpstreamScript {
    chat_responses: Mutex<VecDeque<String>>,
    /// Non-zero forces every chat call to fail with this HTTP status.
    chat_status: AtomicU16,
    chat_calls: AtomicUsize,
    last_chat_body: Mutex<Option<serde_json::Value>>,
}

impl UpstreamScript {
    fn with_chat_responses(responses: &[&str]) -> Arc<Self> {
        let script = Self::default();
        *script.chat_responses.lock().unwrap() =
            responses.iter().map(|r| r.to_string()).collect();
        Arc::new(script)
    }

    /// The `content` of the user message in the last chat request.
    fn last_user_content(&self) -> Option<String> {
        let body = self.last_chat_body.lock().unwrap();
        body.as_ref()?["messages"][1]["content"]
            .as_str()
            .map(|s| s.to_string())
    }
}

/// Serve the mock upstream on an ephemeral port; returns its base URL.
async fn spawn_mock_upstream(script: Arc<UpstreamScript>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let script = Arc::clone(&script);
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let Ok(request) = http::read_request(&mut reader).await else {
                    return;
                };

                let response = match request.path.as_str() {
                    "/chat/completions" => {
                        script.chat_calls.fetch_add(1, Ordering::SeqCst);
                        *script.last_chat_body.lock().unwrap() =
                            serde_json::from_str(&request.body).ok();

                        let status = script.chat_status.load(Ordering::SeqCst);
                        if status != 0 && status != 200 {
                            http::json_response(
                                status,
                                r#"{"error":{"message":"mock upstream failure"}}"#,
                            )
                        } else {
                            let content = script
                                .chat_responses
                                .lock()
                                .unwrap()
                                .pop_front()
                                .unwrap_or_else(|| QUESTIONS_JSON.to_string());
                            let body = serde_json::json!({
                                "choices": [
                                    {"message": {"role": "assistant", "content": content}}
                                ]
                            });
                            http::json_response(200, &body.to_string())
                        }
                    }
                    "/images/generations" => http::json_response(
                        200,
                        r#"{"data":[{"url":"https://img.example/generated.png"}]}"#,
                    ),
                    "/images/variations" => http::json_response(
                        200,
                        r#"{"data":[{"url":"https://img.example/v1.png"},{"url":"https://img.example/v2.png"},{"url":"https://img.example/v3.png"}]}"#,
                    ),
                    _ => http::json_response(404, r#"{"error":"unknown mock path"}"#),
                };

                let _ = write_half.write_all(response.as_bytes()).await;
                let _ = write_half.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

/// Mock upstream + relay in front of it; returns the relay's base URL.
async fn spawn_relay(script: Arc<UpstreamScript>) -> String {
    let upstream_base = spawn_mock_upstream(script).await;
    let upstream_config = UpstreamConfig {
        base_url: upstream_base,
        chat_model: "test-chat".into(),
        image_model: "test-image".into(),
        image_size: "1024x1024".into(),
        variation_count: 3,
    };
    let client = OpenAiClient::new("sk-test".into(), &upstream_config);

    let ctx = Arc::new(RelayContext {
        upstream: Arc::new(client) as Arc<dyn Upstream>,
        variation_count: upstream_config.variation_count,
    });

    let listener = RelayListener::bind(0).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run(listener, ctx));

    format!("http://{addr}")
}

async fn next_update(rx: &mut mpsc::Receiver<SessionUpdate>) -> SessionUpdate {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a session update")
        .expect("update channel closed")
}

// ===========================================================================
// Relay end-to-end
// ===========================================================================

#[tokio::test]
async fn relay_serves_all_four_operations() {
    let script = UpstreamScript::with_chat_responses(&[
        QUESTIONS_JSON,
        "a fluffy golden retriever in a sunny park",
    ]);
    let relay = RelayClient::new(spawn_relay(Arc::clone(&script)).await);

    // generate-questions: five non-empty questions (shape, not literal text).
    let questions = relay.generate_questions("a fluffy dog").await.unwrap();
    assert_eq!(questions.questions.len(), 5);
    assert!(questions.questions.iter().all(|q| !q.is_empty()));
    assert_eq!(script.last_user_content().as_deref(), Some("a fluffy dog"));

    // refine-prompt: the answer text flows into the refined prompt.
    let refined = relay
        .refine_prompt(
            "a fluffy dog",
            vec![QuestionAnswer {
                question: "What color is the dog?".into(),
                answer: "golden retriever".into(),
            }],
        )
        .await
        .unwrap();
    assert!(refined.refined_prompt.contains("golden retriever"));
    let composite = script.last_user_content().unwrap();
    assert!(composite.contains("\"a fluffy dog\""));
    assert!(composite.contains("- What color is the dog?: golden retriever"));

    // generate-image: the sole image URL.
    let image = relay.generate_image(&refined.refined_prompt).await.unwrap();
    assert_eq!(image.image_url, "https://img.example/generated.png");

    // generate-image-variations: all variant URLs, in order.
    let variations = relay.image_variations(&image.image_url).await.unwrap();
    assert_eq!(
        variations.image_urls,
        vec![
            "https://img.example/v1.png",
            "https://img.example/v2.png",
            "https://img.example/v3.png",
        ]
    );
}

#[tokio::test]
async fn malformed_model_output_surfaces_as_structured_500() {
    let script =
        UpstreamScript::with_chat_responses(&["Sure! Here are five questions: 1. ..."]);
    let relay_base = spawn_relay(script).await;

    let response = reqwest::Client::new()
        .post(format!("{relay_base}/generate-questions"))
        .json(&serde_json::json!({"prompt": "a fluffy dog"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert!(body["details"]["modelOutput"]
        .as_str()
        .unwrap()
        .starts_with("Sure!"));
}

#[tokio::test]
async fn upstream_failure_surfaces_as_500_with_details() {
    let script = UpstreamScript::with_chat_responses(&[]);
    script.chat_status.store(503, Ordering::SeqCst);
    let relay_base = spawn_relay(script).await;

    let response = reqwest::Client::new()
        .post(format!("{relay_base}/generate-questions"))
        .json(&serde_json::json!({"prompt": "a fluffy dog"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("503"));
    assert_eq!(body["details"]["error"]["message"], "mock upstream failure");
}

#[tokio::test]
async fn empty_variation_reference_is_rejected() {
    let script = UpstreamScript::with_chat_responses(&[]);
    let relay_base = spawn_relay(script).await;

    let response = reqwest::Client::new()
        .post(format!("{relay_base}/generate-image-variations"))
        .json(&serde_json::json!({"imageId": ""}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("image reference is empty"));
}

#[tokio::test]
async fn cors_preflight_is_handled() {
    let script = UpstreamScript::with_chat_responses(&[]);
    let relay_base = spawn_relay(script).await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("{relay_base}/generate-image"),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

// ===========================================================================
// Session controller end-to-end
// ===========================================================================

fn session_config(relay_url: String, debounce_ms: u64) -> SessionConfig {
    SessionConfig {
        relay_url,
        debounce_ms,
    }
}

#[tokio::test]
async fn burst_of_prompt_edits_coalesces_into_one_fetch() {
    let script = UpstreamScript::with_chat_responses(&[]);
    let relay_base = spawn_relay(Arc::clone(&script)).await;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (update_tx, mut update_rx) = mpsc::channel(64);
    let config = session_config(relay_base, 120);
    let controller_handle =
        tokio::spawn(async move { controller::run(&config, cmd_rx, update_tx).await });

    // Three rapid edits inside the quiet period: only the final value may
    // trigger a fetch.
    for prompt in ["a", "a fluffy", "a fluffy dog"] {
        cmd_tx
            .send(SessionCommand::EditPrompt(prompt.into()))
            .await
            .unwrap();
        sleep(Duration::from_millis(30)).await;
    }

    match next_update(&mut update_rx).await {
        SessionUpdate::QuestionsChanged(questions) => assert_eq!(questions.len(), 5),
        other => panic!("expected QuestionsChanged, got: {other:?}"),
    }

    assert_eq!(script.chat_calls.load(Ordering::SeqCst), 1);
    let body = script.last_chat_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["messages"][1]["content"], "a fluffy dog");

    cmd_tx.send(SessionCommand::Quit).await.unwrap();
    let _ = controller_handle.await;
}

#[tokio::test]
async fn full_refine_then_generate_workflow() {
    let script = UpstreamScript::with_chat_responses(&[
        QUESTIONS_JSON,
        "a fluffy golden retriever",
        QUESTIONS_JSON,
    ]);
    let relay_base = spawn_relay(Arc::clone(&script)).await;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (update_tx, mut update_rx) = mpsc::channel(64);
    let config = session_config(relay_base, 50);
    let controller_handle =
        tokio::spawn(async move { controller::run(&config, cmd_rx, update_tx).await });

    // Draft the prompt, wait for the question set.
    cmd_tx
        .send(SessionCommand::EditPrompt("a fluffy dog".into()))
        .await
        .unwrap();
    match next_update(&mut update_rx).await {
        SessionUpdate::QuestionsChanged(questions) => assert_eq!(questions.len(), 5),
        other => panic!("expected QuestionsChanged, got: {other:?}"),
    }

    // Answer one question and refine through it.
    cmd_tx
        .send(SessionCommand::EditAnswer {
            index: 3,
            text: "golden retriever".into(),
        })
        .await
        .unwrap();
    cmd_tx.send(SessionCommand::Refine { index: 3 }).await.unwrap();

    assert_eq!(
        next_update(&mut update_rx).await,
        SessionUpdate::PromptChanged("a fluffy golden retriever".into())
    );
    assert_eq!(
        next_update(&mut update_rx).await,
        SessionUpdate::QuestionsChanged(vec![])
    );

    // The refined prompt re-arms the debounce: a fresh question set follows.
    match next_update(&mut update_rx).await {
        SessionUpdate::QuestionsChanged(questions) => assert_eq!(questions.len(), 5),
        other => panic!("expected QuestionsChanged, got: {other:?}"),
    }

    // The refinement composite was built from the refine-triggering pair.
    // The latest chat body belongs to the follow-up question fetch, so only
    // check the call count here: questions + refine + questions.
    assert_eq!(script.chat_calls.load(Ordering::SeqCst), 3);

    // Generate, then ask for variations of the displayed image.
    cmd_tx.send(SessionCommand::Submit).await.unwrap();
    assert_eq!(
        next_update(&mut update_rx).await,
        SessionUpdate::ImageChanged("https://img.example/generated.png".into())
    );

    cmd_tx.send(SessionCommand::Variations).await.unwrap();
    assert_eq!(
        next_update(&mut update_rx).await,
        SessionUpdate::ImageChanged("https://img.example/v1.png".into())
    );

    cmd_tx.send(SessionCommand::Quit).await.unwrap();
    let _ = controller_handle.await;
}

#[tokio::test]
async fn relay_failure_leaves_the_session_retryable() {
    let script = UpstreamScript::with_chat_responses(&[]);
    script.chat_status.store(500, Ordering::SeqCst);
    let relay_base = spawn_relay(Arc::clone(&script)).await;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (update_tx, mut update_rx) = mpsc::channel(64);
    let config = session_config(relay_base, 50);
    let controller_handle =
        tokio::spawn(async move { controller::run(&config, cmd_rx, update_tx).await });

    cmd_tx
        .send(SessionCommand::EditPrompt("a fluffy dog".into()))
        .await
        .unwrap();

    match next_update(&mut update_rx).await {
        SessionUpdate::Failed { operation, .. } => {
            assert_eq!(operation, "generate-questions");
        }
        other => panic!("expected Failed update, got: {other:?}"),
    }

    // The upstream recovers; editing the prompt again retries and succeeds.
    script.chat_status.store(0, Ordering::SeqCst);
    cmd_tx
        .send(SessionCommand::EditPrompt("a fluffy dog!".into()))
        .await
        .unwrap();

    match next_update(&mut update_rx).await {
        SessionUpdate::QuestionsChanged(questions) => assert_eq!(questions.len(), 5),
        other => panic!("expected QuestionsChanged, got: {other:?}"),
    }

    cmd_tx.send(SessionCommand::Quit).await.unwrap();
    let _ = controller_handle.await;
}
