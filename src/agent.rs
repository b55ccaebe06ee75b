use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{AssistantSettings, CompletionSettings, Config, PartialReplyPolicy};
use crate::error::{ChatError, Result};
use crate::events::{ChatMode, Turn};
use crate::llm::{AssistantApi, CompletionApi, OpenAiAssistants, PerplexityChat};
use crate::protocol::AssistantInfo;
use crate::session::ChatSession;
use crate::streaming::{DisplaySink, RenderStyle, StreamController, StreamFailure};

/// Remote service a [`ChatAgent`] sends turns to
pub enum Backend {
    /// Context lives in a server-side thread; each turn starts a run
    Assistant {
        api: Box<dyn AssistantApi>,
        assistant_id: String,
    },
    /// Stateless; every request carries the whole transcript
    Completion {
        api: Box<dyn CompletionApi>,
        model: String,
        system_prompt: String,
    },
}

impl Backend {
    pub fn mode(&self) -> ChatMode {
        match self {
            Backend::Assistant { .. } => ChatMode::Assistant,
            Backend::Completion { .. } => ChatMode::Completion,
        }
    }
}

/// Runs one request/stream/commit cycle per submitted user turn
pub struct ChatAgent {
    backend: Backend,
    partial_reply: PartialReplyPolicy,
    api_key_env: String,
}

impl ChatAgent {
    pub fn new(backend: Backend, partial_reply: PartialReplyPolicy) -> Self {
        let api_key_env = match backend.mode() {
            ChatMode::Assistant => AssistantSettings::default().api_key_env,
            ChatMode::Completion => CompletionSettings::default().api_key_env,
        };
        Self {
            backend,
            partial_reply,
            api_key_env,
        }
    }

    /// Build the HTTP-backed agent for `mode`
    pub fn from_config(config: &Config, mode: ChatMode) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let backend = match mode {
            ChatMode::Assistant => Backend::Assistant {
                api: Box::new(OpenAiAssistants::new(&config.openai.base_url, timeout)?),
                assistant_id: config.openai.assistant_id.clone(),
            },
            ChatMode::Completion => Backend::Completion {
                api: Box::new(PerplexityChat::new(&config.perplexity.base_url, timeout)?),
                model: config.perplexity.model.clone(),
                system_prompt: config.perplexity.system_prompt.clone(),
            },
        };

        let mut agent = Self::new(backend, config.partial_reply);
        agent.api_key_env = config.api_key_env(mode).to_string();
        Ok(agent)
    }

    pub fn mode(&self) -> ChatMode {
        self.backend.mode()
    }

    pub fn partial_reply(&self) -> PartialReplyPolicy {
        self.partial_reply
    }

    fn require_key<'s>(&self, session: &'s ChatSession) -> Result<&'s str> {
        session.api_key().ok_or_else(|| ChatError::MissingApiKey {
            service: self.mode().service(),
            env_var: self.api_key_env.clone(),
        })
    }

    /// Look up the configured assistant; `None` in completion mode
    pub async fn describe_assistant(&self, session: &ChatSession) -> Result<Option<AssistantInfo>> {
        match &self.backend {
            Backend::Assistant { api, assistant_id } => {
                let api_key = self.require_key(session)?;
                Ok(Some(api.retrieve_assistant(api_key, assistant_id).await?))
            }
            Backend::Completion { .. } => Ok(None),
        }
    }

    /// Send `input` as the next user turn, stream the reply into `sink` and
    /// append it to the session's transcript.
    ///
    /// Nothing is appended when the key is missing. A request that fails
    /// before streaming leaves only the user turn behind. A stream that fails
    /// after text arrived yields [`ChatError::Interrupted`]. The partial text
    /// is committed according to the agent's [`PartialReplyPolicy`], except
    /// after a transport failure, which always discards it.
    pub async fn submit(
        &self,
        session: &mut ChatSession,
        input: &str,
        sink: &mut dyn DisplaySink,
    ) -> Result<Turn> {
        debug_assert_eq!(session.mode(), self.mode());
        let api_key = self.require_key(session)?.to_string();
        let style = RenderStyle::for_mode(self.mode());

        let reply = match &self.backend {
            Backend::Assistant { api, assistant_id } => {
                let thread = match session.thread().cloned() {
                    Some(thread) => thread,
                    None => {
                        let thread = api.create_thread(&api_key).await?;
                        session.set_thread(thread.clone());
                        thread
                    }
                };

                let turn = Turn::user(input);
                session.append(turn.clone());
                api.create_message(&api_key, &thread, &turn).await?;

                let stream = api.create_run(&api_key, &thread, assistant_id).await?;
                StreamController::new(sink, style).consume(stream).await
            }
            Backend::Completion {
                api,
                model,
                system_prompt,
            } => {
                session.append(Turn::user(input));
                let messages = session.conversation().with_system_prompt(system_prompt);

                let stream = api.create_completion(&api_key, model, &messages).await?;
                StreamController::new(sink, style).consume(stream).await
            }
        };

        match reply {
            Ok(text) => {
                let turn = Turn::assistant(text);
                session.append(turn.clone());
                info!(
                    "Committed assistant turn ({} characters, {} turns total)",
                    turn.content().len(),
                    session.history().len()
                );
                Ok(turn)
            }
            Err(StreamFailure { partial, source }) if partial.is_empty() => {
                debug!("Stream failed before any text arrived");
                Err(source)
            }
            Err(StreamFailure { partial, source }) => {
                // a dropped connection never leaves a half reply behind
                let committed =
                    self.partial_reply == PartialReplyPolicy::Commit && !source.is_transport();
                if committed {
                    session.append(Turn::assistant(partial.clone()));
                }
                warn!(
                    "Reply interrupted after {} characters ({})",
                    partial.len(),
                    if committed { "kept" } else { "discarded" }
                );
                Err(ChatError::Interrupted {
                    partial,
                    committed,
                    source: Box::new(source),
                })
            }
        }
    }
}
