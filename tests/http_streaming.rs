//! End-to-end chat cycles against mocked Assistants and chat-completions
//! servers. SSE bodies follow the documented event formats:
//! https://platform.openai.com/docs/api-reference/assistants-streaming/events
//! https://docs.perplexity.ai/api-reference/chat-completions

use qgen::config::{Config, PartialReplyPolicy};
use qgen::ui::conversation::ConversationManager;
use qgen::{ChatAgent, ChatError, ChatMode, ChatSession, DisplaySink, Turn};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct RecordingSink {
    clears: usize,
    shows: Vec<String>,
    settled: Option<String>,
}

impl DisplaySink for RecordingSink {
    fn clear(&mut self) {
        self.clears += 1;
    }

    fn show(&mut self, text: &str) {
        self.shows.push(text.to_string());
    }

    fn settle(&mut self, text: &str) {
        self.settled = Some(text.to_string());
    }
}

fn sse(events: &[(&str, serde_json::Value)]) -> String {
    let mut body = String::new();
    for (name, data) in events {
        body.push_str(&format!("event: {}\ndata: {}\n\n", name, data));
    }
    body
}

fn text_delta(value: &str) -> serde_json::Value {
    json!({
        "id": "msg_1",
        "object": "thread.message.delta",
        "delta": {"content": [{"index": 0, "type": "text", "text": {"value": value, "annotations": []}}]}
    })
}

fn run_stream(deltas: &[&str]) -> String {
    let mut events = vec![
        ("thread.run.created", json!({"id": "run_1", "object": "thread.run", "status": "queued"})),
        ("thread.message.created", json!({"id": "msg_1", "object": "thread.message"})),
    ];
    for delta in deltas {
        events.push(("thread.message.delta", text_delta(delta)));
    }
    events.push(("thread.run.completed", json!({"id": "run_1", "status": "completed"})));
    let mut body = sse(&events);
    body.push_str("event: done\ndata: [DONE]\n\n");
    body
}

fn chunk(content: Option<&str>) -> String {
    let data = json!({
        "id": "chatcmpl-1",
        "model": "sonar",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": content}, "finish_reason": null}]
    });
    format!("data: {}\n\n", data)
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn assistant_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.openai.base_url = server.uri();
    config.openai.assistant_id = "asst_test".to_string();
    config.openai.api_key = Some("sk-test".to_string());
    config
}

fn completion_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.perplexity.base_url = server.uri();
    config.perplexity.model = "sonar".to_string();
    config.perplexity.system_prompt = "Be brief.".to_string();
    config.perplexity.api_key = Some("pplx-test".to_string());
    config
}

async fn mount_thread(server: &MockServer, expected_threads: u64) {
    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header("OpenAI-Beta", "assistants=v2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "thread_abc", "object": "thread", "created_at": 1699012949})),
        )
        .expect(expected_threads)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/messages"))
        .and(body_partial_json(json!({"role": "user"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "msg_user", "object": "thread.message"})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn assistant_run_streams_into_transcript() {
    let server = MockServer::start().await;
    mount_thread(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs"))
        .and(body_partial_json(json!({"assistant_id": "asst_test", "stream": true})))
        .respond_with(event_stream(run_stream(&["4"])))
        .expect(1)
        .mount(&server)
        .await;

    let config = assistant_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Assistant).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Assistant).with_api_key(config.api_key(ChatMode::Assistant));
    let mut sink = RecordingSink::default();

    let turn = agent.submit(&mut session, "What is 2+2?", &mut sink).await.unwrap();

    assert_eq!(turn.content(), "4");
    assert_eq!(
        session.history(),
        [Turn::user("What is 2+2?"), Turn::assistant("4")]
    );
    assert_eq!(session.thread().map(|t| t.as_str()), Some("thread_abc"));
    assert_eq!(sink.shows, ["4"]);
    assert_eq!(sink.clears, 1);
}

#[tokio::test]
async fn cleared_session_creates_a_new_thread() {
    let server = MockServer::start().await;
    mount_thread(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs"))
        .respond_with(event_stream(run_stream(&["Sure", "."])))
        .expect(3)
        .mount(&server)
        .await;

    let config = assistant_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Assistant).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Assistant).with_api_key(config.api_key(ChatMode::Assistant));
    let mut sink = RecordingSink::default();

    agent.submit(&mut session, "one", &mut sink).await.unwrap();
    agent.submit(&mut session, "two", &mut sink).await.unwrap();
    assert_eq!(session.history().len(), 4);

    session.clear();
    assert!(session.thread().is_none());

    let turn = agent.submit(&mut session, "three", &mut sink).await.unwrap();
    assert_eq!(turn.content(), "Sure.");
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn rejected_key_surfaces_as_auth_error() {
    let server = MockServer::start().await;
    mount_thread(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error",
                "param": null,
                "code": "invalid_api_key"
            }
        })))
        .mount(&server)
        .await;

    let config = assistant_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Assistant).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Assistant).with_api_key(config.api_key(ChatMode::Assistant));
    let mut sink = RecordingSink::default();

    let err = agent.submit(&mut session, "hello", &mut sink).await.unwrap_err();

    assert!(err.is_auth());
    assert!(matches!(
        err,
        ChatError::Api { status: 401, ref message, .. } if message == "Incorrect API key provided"
    ));
    assert_eq!(session.history(), [Turn::user("hello")]);
    assert!(sink.shows.is_empty());
}

#[tokio::test]
async fn error_event_mid_run_keeps_partial_reply() {
    let server = MockServer::start().await;
    mount_thread(&server, 1).await;
    let body = sse(&[
        ("thread.message.delta", text_delta("Par")),
        ("error", json!({"code": "server_error", "message": "Something went wrong"})),
    ]);
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = assistant_config(&server);
    assert_eq!(config.partial_reply, PartialReplyPolicy::Commit);
    let agent = ChatAgent::from_config(&config, ChatMode::Assistant).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Assistant).with_api_key(config.api_key(ChatMode::Assistant));
    let mut sink = RecordingSink::default();

    let err = agent.submit(&mut session, "Tell me", &mut sink).await.unwrap_err();

    match err {
        ChatError::Interrupted {
            partial,
            committed,
            source,
        } => {
            assert_eq!(partial, "Par");
            assert!(committed);
            assert!(matches!(*source, ChatError::Stream(ref m) if m == "Something went wrong"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        session.history(),
        [Turn::user("Tell me"), Turn::assistant("Par")]
    );
}

#[tokio::test]
async fn completion_stream_ticks_on_every_chunk() {
    let server = MockServer::start().await;
    let body = [chunk(Some("Hel")), chunk(None), chunk(Some("lo"))].concat() + "data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer pplx-test"))
        .and(body_partial_json(json!({
            "model": "sonar",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let config = completion_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Completion).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Completion).with_api_key(config.api_key(ChatMode::Completion));
    let mut sink = RecordingSink::default();

    let turn = agent.submit(&mut session, "Hi", &mut sink).await.unwrap();

    assert_eq!(turn.content(), "Hello");
    assert_eq!(sink.shows.len(), 3);
    assert_eq!(sink.settled.as_deref(), Some("Hello"));
    assert_eq!(session.history(), [Turn::user("Hi"), Turn::assistant("Hello")]);
}

/// Read one request, headers and `content-length` body
async fn read_request(socket: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&request);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Answer one request with a chunked event stream holding `body`, then
/// close the socket without the terminating zero-length chunk.
async fn hang_up_after(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{}\r\n", body.len(), body);
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn dropped_connection_discards_partial_reply() {
    let base_url = hang_up_after(chunk(Some("Par"))).await;

    let mut config = Config::default();
    config.perplexity.base_url = base_url;
    config.perplexity.api_key = Some("pplx-test".to_string());
    assert_eq!(config.partial_reply, PartialReplyPolicy::Commit);

    let agent = ChatAgent::from_config(&config, ChatMode::Completion).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Completion).with_api_key(config.api_key(ChatMode::Completion));
    let mut sink = RecordingSink::default();

    let err = agent.submit(&mut session, "Hi", &mut sink).await.unwrap_err();

    match err {
        ChatError::Interrupted {
            partial,
            committed,
            source,
        } => {
            assert_eq!(partial, "Par");
            assert!(!committed);
            assert!(source.is_transport(), "unexpected source: {source:?}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.history(), [Turn::user("Hi")]);
    assert_eq!(sink.shows, ["Par▌"]);
    assert_eq!(sink.settled.as_deref(), Some("Par"));
}

#[tokio::test]
async fn completion_stream_may_end_without_done_marker() {
    let server = MockServer::start().await;
    let body = [chunk(Some("Good")), chunk(Some("bye"))].concat();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = completion_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Completion).unwrap();
    let mut session =
        ChatSession::new(ChatMode::Completion).with_api_key(config.api_key(ChatMode::Completion));
    let mut sink = RecordingSink::default();

    let turn = agent.submit(&mut session, "Bye", &mut sink).await.unwrap();
    assert_eq!(turn.content(), "Goodbye");
}

#[tokio::test]
async fn assistant_metadata_is_retrieved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assistants/asst_test"))
        .and(header("OpenAI-Beta", "assistants=v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "asst_test",
            "object": "assistant",
            "name": "Qgenerator",
            "model": "gpt-4o"
        })))
        .mount(&server)
        .await;

    let config = assistant_config(&server);
    let agent = ChatAgent::from_config(&config, ChatMode::Assistant).unwrap();
    let session =
        ChatSession::new(ChatMode::Assistant).with_api_key(config.api_key(ChatMode::Assistant));

    let info = agent.describe_assistant(&session).await.unwrap().unwrap();
    assert_eq!(info.name.as_deref(), Some("Qgenerator"));
    assert_eq!(info.model.as_deref(), Some("gpt-4o"));
}

#[tokio::test]
async fn terminal_conversation_renders_streamed_reply() {
    let server = MockServer::start().await;
    let body = [chunk(Some("Hel")), chunk(Some("lo"))].concat() + "data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = completion_config(&server);
    let mut manager =
        ConversationManager::with_writer(config, ChatMode::Completion, Vec::new()).unwrap();

    manager.handle_line("Hi").await.unwrap();

    assert_eq!(
        manager.session().history(),
        [Turn::user("Hi"), Turn::assistant("Hello")]
    );
    let output = String::from_utf8(manager.into_sink().into_inner()).unwrap();
    assert!(output.contains("Hi"));
    assert!(output.contains("lo"));
    assert!(!output.contains("Error"));
}
