use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, error};

use crate::error::{ChatError, Result};
use crate::events::Turn;
use crate::protocol::{self, AssistantEvent, AssistantInfo, CompletionChunk, ThreadObject};
use crate::session::ThreadId;

/// Lazily produced fragments of one streamed reply
pub type FragmentStream<F> = BoxStream<'static, Result<F>>;

/// Thread/run based service (OpenAI Assistants API)
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn retrieve_assistant(&self, api_key: &str, assistant_id: &str) -> Result<AssistantInfo>;

    async fn create_thread(&self, api_key: &str) -> Result<ThreadId>;

    async fn create_message(&self, api_key: &str, thread: &ThreadId, turn: &Turn) -> Result<()>;

    /// Start a streamed run of `assistant_id` on `thread`
    async fn create_run(
        &self,
        api_key: &str,
        thread: &ThreadId,
        assistant_id: &str,
    ) -> Result<FragmentStream<AssistantEvent>>;
}

/// Stateless chat-completions service (Perplexity and compatibles)
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn create_completion(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Turn],
    ) -> Result<FragmentStream<CompletionChunk>>;
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    // No overall timeout: a streamed reply may legitimately take minutes.
    Ok(reqwest::Client::builder().connect_timeout(timeout).build()?)
}

/// Turn a non-success response into an API error
async fn check_status(service: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = protocol::error_message(&body).unwrap_or(body);
    error!("{} API error ({}): {}", service, status.as_u16(), message);
    Err(ChatError::Api {
        service,
        status: status.as_u16(),
        message,
    })
}

/// Client for the OpenAI Assistants API
#[derive(Clone)]
pub struct OpenAiAssistants {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

const OPENAI: &str = "OpenAI";

#[derive(Serialize)]
struct CreateRunBody<'a> {
    assistant_id: &'a str,
    stream: bool,
}

impl OpenAiAssistants {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistants {
    async fn retrieve_assistant(&self, api_key: &str, assistant_id: &str) -> Result<AssistantInfo> {
        let response = self
            .request(reqwest::Method::GET, &format!("/assistants/{}", assistant_id), api_key)
            .timeout(self.timeout)
            .send()
            .await?;
        let body = check_status(OPENAI, response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn create_thread(&self, api_key: &str) -> Result<ThreadId> {
        let response = self
            .request(reqwest::Method::POST, "/threads", api_key)
            .timeout(self.timeout)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let body = check_status(OPENAI, response).await?.text().await?;
        let thread: ThreadObject = serde_json::from_str(&body)?;
        debug!("Created thread {}", thread.id);
        Ok(ThreadId::new(thread.id))
    }

    async fn create_message(&self, api_key: &str, thread: &ThreadId, turn: &Turn) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{}/messages", thread),
                api_key,
            )
            .timeout(self.timeout)
            .json(turn)
            .send()
            .await?;
        check_status(OPENAI, response).await?;
        Ok(())
    }

    async fn create_run(
        &self,
        api_key: &str,
        thread: &ThreadId,
        assistant_id: &str,
    ) -> Result<FragmentStream<AssistantEvent>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/threads/{}/runs", thread), api_key)
            .header("Accept", "text/event-stream")
            .json(&CreateRunBody {
                assistant_id,
                stream: true,
            })
            .send()
            .await?;
        let response = check_status(OPENAI, response).await?;
        debug!("Run stream opened on thread {}", thread);

        Ok(sse_fragments(response, |event, data| {
            AssistantEvent::from_sse(event, data)
        }))
    }
}

/// Client for a Perplexity-compatible chat-completions API
#[derive(Clone)]
pub struct PerplexityChat {
    client: reqwest::Client,
    base_url: String,
}

const PERPLEXITY: &str = "Perplexity";

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
}

impl PerplexityChat {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionApi for PerplexityChat {
    async fn create_completion(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Turn],
    ) -> Result<FragmentStream<CompletionChunk>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Accept", "text/event-stream")
            .json(&CompletionBody {
                model,
                messages,
                stream: true,
            })
            .send()
            .await?;
        let response = check_status(PERPLEXITY, response).await?;
        debug!("Completion stream opened for {} with {} messages", model, messages.len());

        Ok(sse_fragments(response, |_event, data| CompletionChunk::from_sse(data)))
    }
}

/// Parse an SSE body into fragments. The parser returns `Ok(None)` at the
/// protocol's end marker, which ends the stream; the first error is yielded
/// and ends it too.
fn sse_fragments<F, P>(response: reqwest::Response, parse: P) -> FragmentStream<F>
where
    F: Send + 'static,
    P: Fn(&str, &str) -> Result<Option<F>> + Send + 'static,
{
    let events = response.bytes_stream().eventsource();

    stream::unfold(Some((events, parse)), |state| async move {
        let (mut events, parse) = state?;
        match events.next().await? {
            Err(EventStreamError::Transport(e)) => Some((Err(ChatError::Http(e)), None)),
            Err(e) => {
                let err = ChatError::Stream(format!("SSE stream error: {}", e));
                Some((Err(err), None))
            }
            Ok(event) => match parse(&event.event, &event.data) {
                Ok(Some(fragment)) => Some((Ok(fragment), Some((events, parse)))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            },
        }
    })
    .boxed()
}
