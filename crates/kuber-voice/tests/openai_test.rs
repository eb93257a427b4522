use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use kuber_types::Speaker;
use kuber_voice::{
    AgentSession, ChatClient, ChatMessage, ConversationRuntime, LiveKitConfig, OpenAiConfig,
    SttService, ToolDefinition, ToolDispatcher, TranscriptSink, TtsService, VoiceError,
    VoicePipeline, VoiceService, MAX_TOOL_ROUNDS,
};
use tokio::sync::broadcast::error::RecvError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Mock OpenAI server ──

#[derive(Default)]
struct MockOpenAi {
    /// When set, every request offering tools gets another tool call.
    always_call_tools: bool,
    /// Raw `arguments` string returned in tool calls.
    tool_arguments: String,
    chat_requests: Mutex<Vec<Value>>,
    speech_requests: Mutex<Vec<Value>>,
    transcriptions: AtomicUsize,
}

fn tool_call_response(arguments: &str) -> Value {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "internet_search", "arguments": arguments}
                }]
            }
        }]
    })
}

fn text_response(text: &str) -> Value {
    json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
}

async fn chat_handler(State(mock): State<Arc<MockOpenAi>>, Json(body): Json<Value>) -> Json<Value> {
    mock.chat_requests.lock().unwrap().push(body.clone());

    let offers_tools = body.get("tools").is_some();
    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let has_tool_result = messages.iter().any(|m| m["role"] == "tool");
    let last_is_user = messages.last().map(|m| m["role"] == "user").unwrap_or(false);

    if offers_tools && (mock.always_call_tools || (last_is_user && !has_tool_result)) {
        return Json(tool_call_response(&mock.tool_arguments));
    }
    if has_tool_result {
        return Json(text_response(
            "Gold is around seven thousand rupees a gram. This isn't investment advice though.",
        ));
    }
    Json(text_response("Hello! Ask me about investments or digital gold."))
}

async fn speech_handler(State(mock): State<Arc<MockOpenAi>>, Json(body): Json<Value>) -> Vec<u8> {
    mock.speech_requests.lock().unwrap().push(body);
    vec![7u8; 480]
}

async fn transcription_handler(State(mock): State<Arc<MockOpenAi>>, body: Bytes) -> Json<Value> {
    mock.transcriptions.fetch_add(1, Ordering::SeqCst);
    let has = |needle: &[u8]| body.windows(needle.len()).any(|w| w == needle);
    assert!(has(b"RIFF"), "audio should be wrapped as WAV");
    assert!(has(b"gpt-4o-transcribe"));
    Json(json!({"text": "  what's the gold rate today?  "}))
}

async fn spawn_mock(mock: Arc<MockOpenAi>) -> OpenAiConfig {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_handler))
        .route("/v1/audio/speech", post(speech_handler))
        .route("/v1/audio/transcriptions", post(transcription_handler))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    OpenAiConfig {
        base_url: format!("http://{addr}/v1"),
        api_key: "sk-test".to_string(),
        timeout_secs: 5,
        ..OpenAiConfig::default()
    }
}

// ── Test collaborators ──

#[derive(Default)]
struct RecordingTools {
    calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl ToolDispatcher for RecordingTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "internet_search",
            "Search for current financial information",
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
        )]
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> String {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        "Source: Test - gold at 7000 per gram".to_string()
    }
}

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<(Speaker, String)>>,
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn committed(&self, speaker: Speaker, text: &str) {
        self.lines.lock().unwrap().push((speaker, text.to_string()));
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

// ── Chat client tests ──

#[tokio::test]
async fn reply_dispatches_tool_calls_and_feeds_results_back() {
    let mock = Arc::new(MockOpenAi {
        tool_arguments: r#"{"query":"gold rate today"}"#.to_string(),
        ..MockOpenAi::default()
    });
    let config = spawn_mock(mock.clone()).await;
    let chat = ChatClient::new(&config).unwrap();
    let tools = RecordingTools::default();

    let mut history = vec![
        ChatMessage::system("You are a finance assistant."),
        ChatMessage::user("What's the gold rate?"),
    ];
    let reply = chat.reply(&mut history, &tools).await.unwrap();

    assert!(reply.starts_with("Gold is around seven thousand rupees"));
    let calls = tools.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(
            "internet_search".to_string(),
            json!({"query": "gold rate today"})
        )]
    );

    // system, user, assistant(tool_calls), tool, assistant
    assert_eq!(history.len(), 5);
    assert_eq!(history[3].role, "tool");
    assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(history[4].role, "assistant");

    let requests = mock.chat_requests.lock().unwrap();
    assert_eq!(requests[0]["model"], "gpt-4o-mini");
    assert_eq!(requests[0]["tools"][0]["function"]["name"], "internet_search");
}

#[tokio::test]
async fn tool_rounds_are_capped() {
    let mock = Arc::new(MockOpenAi {
        always_call_tools: true,
        tool_arguments: r#"{"query":"again"}"#.to_string(),
        ..MockOpenAi::default()
    });
    let config = spawn_mock(mock.clone()).await;
    let chat = ChatClient::new(&config).unwrap();
    let tools = RecordingTools::default();

    let mut history = vec![ChatMessage::user("loop forever")];
    let reply = chat.reply(&mut history, &tools).await.unwrap();

    assert_eq!(tools.calls.lock().unwrap().len(), MAX_TOOL_ROUNDS);
    assert!(!reply.is_empty());

    let requests = mock.chat_requests.lock().unwrap();
    assert_eq!(requests.len(), MAX_TOOL_ROUNDS + 1);
    assert!(
        requests.last().unwrap().get("tools").is_none(),
        "final request must not offer tools"
    );
}

#[tokio::test]
async fn malformed_tool_arguments_reach_the_dispatcher() {
    let mock = Arc::new(MockOpenAi {
        tool_arguments: "not json".to_string(),
        ..MockOpenAi::default()
    });
    let config = spawn_mock(mock).await;
    let chat = ChatClient::new(&config).unwrap();
    let tools = RecordingTools::default();

    let mut history = vec![ChatMessage::user("gold?")];
    chat.reply(&mut history, &tools).await.unwrap();

    let calls = tools.calls.lock().unwrap();
    assert_eq!(calls[0].1, Value::String("not json".to_string()));
}

#[tokio::test]
async fn upstream_error_is_reported() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = OpenAiConfig {
        base_url: format!("http://{addr}/v1"),
        ..OpenAiConfig::default()
    };

    let chat = ChatClient::new(&config).unwrap();
    let err = chat
        .reply(&mut vec![ChatMessage::user("hi")], &RecordingTools::default())
        .await
        .unwrap_err();

    assert!(matches!(err, VoiceError::Llm(_)));
    assert!(err.to_string().contains("401"));
    assert!(err.to_string().contains("bad key"));
}

// ── Speech tests ──

#[tokio::test]
async fn tts_requests_raw_pcm_with_configured_voice() {
    let mock = Arc::new(MockOpenAi::default());
    let config = spawn_mock(mock.clone()).await;
    let tts = TtsService::new(&config).unwrap();

    let audio = tts.synthesize("Hello there").await.unwrap();
    assert_eq!(audio.len(), 480);

    let requests = mock.speech_requests.lock().unwrap();
    assert_eq!(requests[0]["model"], "gpt-4o-mini-tts");
    assert_eq!(requests[0]["voice"], "ash");
    assert_eq!(requests[0]["response_format"], "pcm");
    assert_eq!(requests[0]["input"], "Hello there");
}

#[tokio::test]
async fn tts_rejects_empty_and_oversized_text() {
    let tts = TtsService::new(&OpenAiConfig::default()).unwrap();

    assert!(matches!(tts.synthesize("   ").await, Err(VoiceError::Tts(_))));

    let long_text = "a".repeat(64 * 1024 + 1);
    let err = tts.synthesize(&long_text).await.unwrap_err();
    assert!(err.to_string().contains("exceeds maximum size"));
}

#[tokio::test]
async fn stt_uploads_wav_and_trims_text() {
    let mock = Arc::new(MockOpenAi::default());
    let config = spawn_mock(mock.clone()).await;
    let stt = SttService::new(&config).unwrap();

    let text = stt.transcribe(&[0u8; 3200]).await.unwrap();
    assert_eq!(text, "what's the gold rate today?");
    assert_eq!(mock.transcriptions.load(Ordering::SeqCst), 1);
}

// ── Pipeline tests ──

fn livekit() -> Arc<VoiceService> {
    Arc::new(VoiceService::new(LiveKitConfig::new(
        "http://localhost:7880",
        "devkey",
        "secret",
    )))
}

fn pipeline_for(config: &OpenAiConfig, voice: Arc<VoiceService>) -> Arc<VoicePipeline> {
    Arc::new(VoicePipeline::new(
        voice,
        Arc::new(SttService::new(config).unwrap()),
        Arc::new(TtsService::new(config).unwrap()),
        Arc::new(ChatClient::new(config).unwrap()),
    ))
}

fn session(
    room: &str,
    tools: Arc<RecordingTools>,
    sink: Arc<RecordingSink>,
) -> AgentSession {
    AgentSession {
        session_id: "s1".to_string(),
        room_name: room.to_string(),
        instructions: "You are a finance assistant.".to_string(),
        opening_instructions: "Greet the user. Session ID: s1".to_string(),
        tools,
        transcripts: sink,
    }
}

#[tokio::test]
async fn pipeline_holds_a_conversation_until_hang_up() {
    let mock = Arc::new(MockOpenAi {
        tool_arguments: r#"{"query":"gold rate today"}"#.to_string(),
        ..MockOpenAi::default()
    });
    let config = spawn_mock(mock.clone()).await;
    let pipeline = pipeline_for(&config, livekit());
    let tools = Arc::new(RecordingTools::default());
    let sink = Arc::new(RecordingSink::default());

    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session("kuber-s1", tools.clone(), sink.clone());
        async move { pipeline.run(session).await }
    });

    // Opening reply is spoken first.
    wait_until(|| sink.lines.lock().unwrap().len() == 1).await;
    assert!(pipeline.client("kuber-s1").is_some());
    let mut speech = pipeline.listen("kuber-s1").unwrap();

    pipeline
        .hear("kuber-s1", &[0u8; 3200], "user-1")
        .await
        .unwrap();
    wait_until(|| mock.speech_requests.lock().unwrap().len() == 2).await;

    let lines = sink.lines.lock().unwrap().clone();
    assert_eq!(
        lines[0],
        (
            Speaker::Assistant,
            "Hello! Ask me about investments or digital gold.".to_string()
        )
    );
    assert_eq!(
        lines[1],
        (Speaker::User, "what's the gold rate today?".to_string())
    );
    assert_eq!(lines[2].0, Speaker::Assistant);
    assert!(lines[2].1.contains("This isn't investment advice though."));
    assert_eq!(tools.calls.lock().unwrap().len(), 1);
    assert_eq!(mock.speech_requests.lock().unwrap().len(), 2);

    // The spoken reply reaches listeners as PCM.
    let frame = tokio::time::timeout(Duration::from_secs(5), speech.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&*frame, &[7u8; 480][..]);

    pipeline.hang_up("kuber-s1").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run should end after hang up")
        .unwrap();
    assert!(result.is_ok());

    // Listeners see the stream close once the agent has left.
    loop {
        match speech.recv().await {
            Ok(_) => continue,
            Err(RecvError::Closed) => break,
            Err(e) => panic!("unexpected receive error: {e}"),
        }
    }
    assert!(matches!(
        pipeline.listen("kuber-s1"),
        Err(VoiceError::RoomNotFound(_))
    ));
    assert!(pipeline.client("kuber-s1").is_none());
    assert!(matches!(
        pipeline.hear("kuber-s1", &[0u8; 2], "user-1").await,
        Err(VoiceError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn failed_turn_does_not_end_the_conversation() {
    // Chat endpoint missing entirely: every reply fails with 404.
    let app = Router::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = OpenAiConfig {
        base_url: format!("http://{addr}/v1"),
        timeout_secs: 5,
        ..OpenAiConfig::default()
    };

    let pipeline = pipeline_for(&config, livekit());
    let sink = Arc::new(RecordingSink::default());
    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session("kuber-s2", Arc::new(RecordingTools::default()), sink.clone());
        async move { pipeline.run(session).await }
    });

    wait_until(|| pipeline.client("kuber-s2").is_some()).await;
    // Transcription also fails, but the room stays up.
    assert!(pipeline.hear("kuber-s2", &[0u8; 320], "user-1").await.is_err());
    assert!(pipeline.client("kuber-s2").is_some());

    pipeline.hang_up("kuber-s2").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert!(sink.lines.lock().unwrap().is_empty());
}

#[tokio::test]
async fn run_fails_without_livekit() {
    let config = OpenAiConfig::default();
    let pipeline = pipeline_for(
        &config,
        Arc::new(VoiceService::new(LiveKitConfig::default())),
    );
    let session = session(
        "kuber-s3",
        Arc::new(RecordingTools::default()),
        Arc::new(RecordingSink::default()),
    );

    assert!(pipeline.run(session).await.is_err());
    assert!(pipeline.client("kuber-s3").is_none());
}

#[tokio::test]
async fn chat_context_stays_bounded_over_a_long_call() {
    let mock = Arc::new(MockOpenAi {
        tool_arguments: r#"{"query":"gold rate today"}"#.to_string(),
        ..MockOpenAi::default()
    });
    let config = spawn_mock(mock.clone()).await;
    let pipeline = Arc::new(
        VoicePipeline::new(
            livekit(),
            Arc::new(SttService::new(&config).unwrap()),
            Arc::new(TtsService::new(&config).unwrap()),
            Arc::new(ChatClient::new(&config).unwrap()),
        )
        .with_context_exchanges(2),
    );
    let sink = Arc::new(RecordingSink::default());

    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session("kuber-s4", Arc::new(RecordingTools::default()), sink.clone());
        async move { pipeline.run(session).await }
    });
    wait_until(|| mock.speech_requests.lock().unwrap().len() == 1).await;

    for turn in 1..=6 {
        pipeline
            .hear("kuber-s4", &[0u8; 3200], "user-1")
            .await
            .unwrap();
        wait_until(|| mock.speech_requests.lock().unwrap().len() == 1 + turn).await;
    }

    let requests = mock.chat_requests.lock().unwrap().clone();
    let bound = 2 + 2 * (1 + 2 * MAX_TOOL_ROUNDS + 1);
    for request in &requests {
        let messages = request["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "system");
        let users = messages.iter().filter(|m| m["role"] == "user").count();
        assert!(users <= 2, "{users} user messages resent");
        assert!(messages.len() <= bound);
        // A tool result is never sent without the call that produced it.
        if let Some(first) = messages.get(2) {
            assert_ne!(first["role"], "tool");
        }
    }
    // Every turn was still committed to the transcript.
    assert_eq!(sink.lines.lock().unwrap().len(), 1 + 2 * 6);

    pipeline.hang_up("kuber-s4").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

/// Answers the opening instantly, then stalls on every user turn.
#[derive(Default)]
struct StallingChat {
    stalled: AtomicUsize,
}

async fn stalling_chat_handler(
    State(chat): State<Arc<StallingChat>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let last_is_user = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .map(|m| m["role"] == "user")
        .unwrap_or(false);
    if last_is_user {
        chat.stalled.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
    Json(text_response("Hello! Ask me about investments or digital gold."))
}

#[tokio::test]
async fn hang_up_interrupts_a_turn_in_flight() {
    let chat = Arc::new(StallingChat::default());
    let app = Router::new()
        .route("/v1/chat/completions", post(stalling_chat_handler))
        .route("/v1/audio/speech", post(|| async { vec![7u8; 480] }))
        .route(
            "/v1/audio/transcriptions",
            post(|| async { Json(json!({"text": "is gold a good buy?"})) }),
        )
        .with_state(chat.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = OpenAiConfig {
        base_url: format!("http://{addr}/v1"),
        ..OpenAiConfig::default()
    };

    let pipeline = pipeline_for(&config, livekit());
    let sink = Arc::new(RecordingSink::default());
    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let session = session("kuber-s5", Arc::new(RecordingTools::default()), sink.clone());
        async move { pipeline.run(session).await }
    });
    wait_until(|| sink.lines.lock().unwrap().len() == 1).await;

    pipeline
        .hear("kuber-s5", &[0u8; 3200], "user-1")
        .await
        .unwrap();
    wait_until(|| chat.stalled.load(Ordering::SeqCst) == 1).await;

    pipeline.hang_up("kuber-s5").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("hang up should not wait for the stalled reply")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(
        sink.lines.lock().unwrap().last().unwrap(),
        &(Speaker::User, "is gold a good buy?".to_string())
    );
}
