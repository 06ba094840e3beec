//! Completion orchestration
//!
//! Runs "load the log, ask the backend, store the reply" as one logical
//! operation on top of the [`ConversationStore`]. The prompting user message
//! is stored before the backend is asked, and nothing is rolled back when the
//! backend fails: the chat then visibly ends with an unanswered user turn.

use crate::chat::{ConversationStore, Message, Role};
use crate::completion::{ChatMessage, Completion, CompletionBackend, TokenUsage};
use crate::config::CompletionConfig;
use crate::error::{error_kind, ParleyError, Result};
use crate::metrics::CompletionMetrics;
use crate::preferences::{PreferenceResolver, SessionPreferences};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of [`CompletionOrchestrator::send_message`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    /// The stored user turn
    pub user: Message,
    /// The stored assistant reply
    pub assistant: Message,
    /// Token usage reported for the reply
    pub usage: TokenUsage,
}

/// Drives completions for stored chats
pub struct CompletionOrchestrator {
    store: ConversationStore,
    backend: Arc<dyn CompletionBackend>,
    resolver: PreferenceResolver,
    timeout: Duration,
}

impl CompletionOrchestrator {
    /// Create an orchestrator
    ///
    /// The model allow-list and the per-call timeout come from `config`.
    pub fn new(
        store: ConversationStore,
        backend: Arc<dyn CompletionBackend>,
        config: &CompletionConfig,
    ) -> Self {
        Self {
            store,
            backend,
            resolver: PreferenceResolver::from_config(config),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Replace the per-call backend timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Underlying conversation store
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Ask the backend to answer a chat and store the reply
    ///
    /// The whole stored log is sent in order. The reply is always stored
    /// with the assistant role and touches the chat like any other message.
    ///
    /// # Arguments
    ///
    /// * `user` - Caller identity, must own the chat
    /// * `chat_id` - Chat to complete
    /// * `model` - Backend model, passed through unchanged
    /// * `temperature` - Sampling temperature, passed through unchanged
    /// * `cancel` - Cancels the backend call; nothing is written afterwards
    ///
    /// # Errors
    ///
    /// - `ParleyError::Unauthorized` if `user` does not own the chat; the
    ///   backend is not called
    /// - `ParleyError::Completion` if the backend fails or times out
    /// - `ParleyError::Cancelled` if `cancel` fires first
    /// - `ParleyError::Storage` if the log cannot be read or the reply
    ///   cannot be stored
    pub async fn run_completion(
        &self,
        user: &str,
        chat_id: &str,
        model: &str,
        temperature: f64,
        cancel: &CancellationToken,
    ) -> Result<(Message, TokenUsage)> {
        if cancel.is_cancelled() {
            return Err(ParleyError::Cancelled.into());
        }

        self.store.authorize(user, chat_id).await?;
        let history: Vec<ChatMessage> = self
            .store
            .load_messages(chat_id)
            .await?
            .iter()
            .map(ChatMessage::from)
            .collect();

        let metrics = CompletionMetrics::new(model);
        let call = tokio::time::timeout(
            self.timeout,
            self.backend.complete(model, &history, temperature),
        );

        let outcome: Result<Completion> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ParleyError::Cancelled.into()),
            result = call => match result {
                Ok(result) => result,
                Err(_) => Err(ParleyError::Completion(format!(
                    "Backend did not answer within {:?}",
                    self.timeout
                ))
                .into()),
            },
        };

        let completion = match outcome {
            Ok(completion) => completion,
            Err(e) => {
                metrics.record_error(error_kind(&e));
                tracing::warn!(chat_id = %chat_id, model, "Completion failed: {}", e);
                return Err(e);
            }
        };
        metrics.record_completion(&completion.usage);

        if completion.reply.role != Role::Assistant.as_str() {
            tracing::warn!(
                chat_id = %chat_id,
                "Backend replied with role {:?}, storing as assistant",
                completion.reply.role
            );
        }

        let reply = Message::new(Role::Assistant, completion.reply.content);
        let stored = self.store.store_message(user, chat_id, reply).await?;

        tracing::info!(
            chat_id = %chat_id,
            model,
            total_tokens = completion.usage.total_tokens,
            "Stored completion"
        );
        Ok((stored, completion.usage))
    }

    /// Store a user turn and answer it
    ///
    /// Content is trimmed before storing. Preferences are resolved against
    /// the configured models. A backend failure leaves the user turn stored.
    ///
    /// # Errors
    ///
    /// - `ParleyError::Validation` if the content is blank; nothing is stored
    /// - Anything [`append_message`] or [`run_completion`] returns
    ///
    /// [`append_message`]: ConversationStore::append_message
    /// [`run_completion`]: Self::run_completion
    pub async fn send_message(
        &self,
        user: &str,
        chat_id: &str,
        content: &str,
        preferences: &SessionPreferences,
        cancel: &CancellationToken,
    ) -> Result<Exchange> {
        let content = content.trim();
        if content.is_empty() {
            return Err(
                ParleyError::Validation("message content cannot be empty".to_string()).into(),
            );
        }

        let user_message = self
            .store
            .append_message(user, chat_id, Role::User, content)
            .await?;

        let resolved = self.resolver.resolve(preferences);
        let (assistant, usage) = self
            .run_completion(user, chat_id, &resolved.model, resolved.temperature, cancel)
            .await?;

        Ok(Exchange {
            user: user_message,
            assistant,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockCompletionBackend;
    use crate::config::ChatConfig;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    const ALICE: &str = "alice";
    const MALLORY: &str = "mallory";

    /// Backend that never answers in time
    struct StalledBackend;

    #[async_trait]
    impl CompletionBackend for StalledBackend {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
        ) -> Result<Completion> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ParleyError::Completion("unreachable".to_string()).into())
        }
    }

    fn reply(content: &str) -> Completion {
        Completion {
            reply: ChatMessage::new("assistant", content),
            usage: TokenUsage::new(12, 3),
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemoryStore::new()), &ChatConfig::default())
    }

    fn config() -> CompletionConfig {
        CompletionConfig {
            models: vec!["a".to_string(), "b".to_string()],
            ..CompletionConfig::default()
        }
    }

    fn orchestrator(backend: impl CompletionBackend + 'static) -> CompletionOrchestrator {
        CompletionOrchestrator::new(store(), Arc::new(backend), &config())
    }

    fn kind_of(err: &anyhow::Error) -> &'static str {
        error_kind(err)
    }

    #[tokio::test]
    async fn test_run_completion_sends_full_log_and_stores_reply() {
        let mut backend = MockCompletionBackend::new();
        backend
            .expect_complete()
            .withf(|model, messages, temperature| {
                model.to_string() == "b"
                    && *temperature == 0.7
                    && messages.to_vec()
                        == vec![
                            ChatMessage::new("user", "first"),
                            ChatMessage::new("assistant", "ok"),
                            ChatMessage::new("user", "second"),
                        ]
            })
            .times(1)
            .returning(|_, _, _| Ok(reply("done")));
        let orch = orchestrator(backend);

        let chat = orch.store().new_chat(ALICE, "").await.unwrap();
        for (role, content) in [
            (Role::User, "first"),
            (Role::Assistant, "ok"),
            (Role::User, "second"),
        ] {
            orch.store()
                .append_message(ALICE, &chat.id, role, content)
                .await
                .unwrap();
        }

        let (message, usage) = orch
            .run_completion(ALICE, &chat.id, "b", 0.7, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "done");
        assert_eq!(usage.total_tokens, 15);

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert_eq!(view.messages.len(), 4);
        assert_eq!(view.messages.last(), Some(&message));
    }

    #[tokio::test]
    async fn test_run_completion_rejects_non_owner_before_backend() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_complete().never();
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let err = orch
            .run_completion(MALLORY, &chat.id, "a", 0.5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "unauthorized");
    }

    #[tokio::test]
    async fn test_backend_role_is_normalized_to_assistant() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_complete().returning(|_, _, _| {
            Ok(Completion {
                reply: ChatMessage::new("system", "odd"),
                usage: TokenUsage::default(),
            })
        });
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let (message, _) = orch
            .run_completion(ALICE, &chat.id, "a", 0.5, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(message.role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_send_message_end_to_end() {
        let mut backend = MockCompletionBackend::new();
        backend
            .expect_complete()
            .withf(|model, messages, temperature| {
                model.to_string() == "a"
                    && *temperature == 0.5
                    && messages.to_vec()
                        == vec![ChatMessage::new(
                            "user",
                            "hello there, how are you today friend",
                        )]
            })
            .returning(|_, _, _| Ok(reply("fine")));
        let orch = orchestrator(backend);

        let chat = orch.store().ensure_chat(ALICE).await.unwrap();
        let exchange = orch
            .send_message(
                ALICE,
                &chat.id,
                "  hello there, how are you today friend  ",
                &SessionPreferences::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(exchange.user.content, "hello there, how are you today friend");
        assert_eq!(exchange.assistant.content, "fine");
        assert_eq!(exchange.usage, TokenUsage::new(12, 3));

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert_eq!(view.summary.title, "hello there, how are you today f");
        let log: Vec<(Role, &str)> = view
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            log,
            vec![
                (Role::User, "hello there, how are you today friend"),
                (Role::Assistant, "fine"),
            ]
        );

        let listed = orch.store().list_chats(ALICE).await.unwrap();
        assert_eq!(listed[0].id, chat.id);
        assert!(listed[0].updated_at >= exchange.assistant.created_at);
    }

    #[tokio::test]
    async fn test_send_message_resolves_preferences() {
        let mut backend = MockCompletionBackend::new();
        backend
            .expect_complete()
            .withf(|model, _, temperature| model.to_string() == "a" && *temperature == 1.0)
            .returning(|_, _, _| Ok(reply("ok")));
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let prefs = SessionPreferences {
            model: Some("not-allowed".to_string()),
            temperature: Some(9.0),
        };
        orch.send_message(ALICE, &chat.id, "hi", &prefs, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_message_rejects_blank_content() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_complete().never();
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let err = orch
            .send_message(
                ALICE,
                &chat.id,
                " \n ",
                &SessionPreferences::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "validation");

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert!(view.messages.is_empty());
    }

    #[tokio::test]
    async fn test_failed_completion_keeps_user_message() {
        let mut backend = MockCompletionBackend::new();
        backend
            .expect_complete()
            .returning(|_, _, _| Err(ParleyError::Completion("status 502".to_string()).into()));
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let err = orch
            .send_message(
                ALICE,
                &chat.id,
                "anyone there?",
                &SessionPreferences::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "completion");

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::User);
        assert_eq!(view.summary.title, "anyone there?");
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_any_write() {
        let orch = orchestrator(StalledBackend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();
        orch.store()
            .append_message(ALICE, &chat.id, Role::User, "wait")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orch
            .run_completion(ALICE, &chat.id, "a", 0.5, &cancel)
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "cancelled");

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_complete().never();
        let orch = orchestrator(backend);
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch
            .run_completion(ALICE, &chat.id, "a", 0.5, &cancel)
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "cancelled");
    }

    #[tokio::test]
    async fn test_timeout_is_a_completion_error() {
        let orch = orchestrator(StalledBackend).with_timeout(Duration::from_millis(20));
        let chat = orch.store().new_chat(ALICE, "").await.unwrap();

        let err = orch
            .run_completion(ALICE, &chat.id, "a", 0.5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), "completion");

        let view = orch.store().get_chat(ALICE, &chat.id).await.unwrap();
        assert!(view.messages.is_empty());
    }
}
