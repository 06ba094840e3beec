use async_trait::async_trait;
use parley::chat::ConversationStore;
use parley::completion::{ChatMessage, Completion, CompletionBackend, TokenUsage};
use parley::config::ChatConfig;
use parley::error::{ParleyError, Result};
use parley::storage::SledStore;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (ConversationStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let kv = SledStore::open(tmp.path().join("chats.sled")).expect("failed to open sled store");
    let store = ConversationStore::new(Arc::new(kv), &ChatConfig::default());
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Backend answering every request with a fixed reply, or failing
#[allow(dead_code)]
pub struct StubBackend {
    reply: Option<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

#[allow(dead_code)]
impl StubBackend {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Conversations the backend was asked to complete, in call order
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _temperature: f64,
    ) -> Result<Completion> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.to_vec());
        match &self.reply {
            Some(reply) => Ok(Completion {
                reply: ChatMessage::new("assistant", reply.clone()),
                usage: TokenUsage::new(9, 1),
            }),
            None => Err(ParleyError::Completion("stub failure".to_string()).into()),
        }
    }
}
