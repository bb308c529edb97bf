//! Shared fakes for unit tests

use crate::store::CommandStore;
use crate::{ChatContext, Messenger, Tool, ToolResponse};
use anyhow::{anyhow, Result};
use chatgen_providers::{MediaProvider, MediaRequest, ProviderId, ProviderReply, TaskKind};
use chatgen_storage::{PlanStep, Storage};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn plan_step(tool: &str, action: &str) -> PlanStep {
    PlanStep {
        tool: tool.to_string(),
        action: action.to_string(),
        parameters: serde_json::Map::new(),
    }
}

pub fn temp_db_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "chatgen-core-{}-{}.db",
        tag,
        uuid::Uuid::new_v4()
    ))
}

pub fn temp_store(tag: &str) -> CommandStore {
    temp_store_with_path(tag).0
}

/// Store plus its database file, for tests that tamper with the table directly.
pub fn temp_store_with_path(tag: &str) -> (CommandStore, PathBuf) {
    let path = temp_db_path(tag);
    let storage = Storage::new(&path).expect("temp storage");
    (
        CommandStore::new(Arc::new(tokio::sync::Mutex::new(storage))),
        path,
    )
}

pub struct FailingMessenger;

#[async_trait::async_trait]
impl Messenger for FailingMessenger {
    async fn send_text(
        &self,
        _chat_id: &str,
        _text: &str,
        _quoted_message_id: Option<&str>,
        _typing_delay_ms: Option<u64>,
    ) -> Result<()> {
        Err(anyhow!("messenger offline"))
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait::async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        _chat_id: &str,
        text: &str,
        _quoted_message_id: Option<&str>,
        _typing_delay_ms: Option<u64>,
    ) -> Result<()> {
        self.sent.lock().expect("lock").push(text.to_string());
        Ok(())
    }
}

/// Provider answering from a script; `Err(msg)` entries become transport errors.
pub struct ScriptedProvider {
    id: ProviderId,
    replies: Mutex<VecDeque<std::result::Result<ProviderReply, String>>>,
    calls: Mutex<Vec<(TaskKind, MediaRequest)>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId, replies: Vec<std::result::Result<ProviderReply, String>>) -> Self {
        Self {
            id,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(id: ProviderId, url: &str) -> Self {
        Self::new(id, vec![Ok(ProviderReply::Url(url.to_string()))])
    }

    pub fn failing(id: ProviderId, reason: &str) -> Self {
        Self::new(id, vec![Ok(ProviderReply::Failed(reason.to_string()))])
    }

    pub fn calls(&self) -> Vec<(TaskKind, MediaRequest)> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait::async_trait]
impl MediaProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn generate(&self, task: TaskKind, request: &MediaRequest) -> Result<ProviderReply> {
        self.calls
            .lock()
            .expect("lock")
            .push((task, request.clone()));
        match self.replies.lock().expect("lock").pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(ProviderReply::Failed("no scripted reply".to_string())),
        }
    }
}

/// Tool that records its arguments and answers from a queue (repeating the last answer).
pub struct RecordingTool {
    responses: Mutex<VecDeque<std::result::Result<ToolResponse, String>>>,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTool {
    pub fn new(responses: Vec<std::result::Result<ToolResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(response: ToolResponse) -> Arc<Self> {
        Arc::new(Self::new(vec![Ok(response)]))
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait::async_trait]
impl Tool for RecordingTool {
    async fn execute(&self, args: serde_json::Value, _ctx: &ChatContext) -> Result<ToolResponse> {
        self.calls.lock().expect("lock").push(args);
        let mut responses = self.responses.lock().expect("lock");
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(ToolResponse::text("ok")),
        }
    }
}
