use crate::error::BackendError;
use crate::llm::ChatBackend;
use crate::models::{AssistantReply, ChatMessage, ToolDefinition};
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Conversation with a chat backend. Owns the history; nothing else mutates it.
///
/// Every request is `[system] + history + [new user turn]`. The user turn and the
/// reply are committed to history only when the backend call succeeds.
pub struct Session<B> {
    backend: B,
    system_prompt: String,
    history: Vec<ChatMessage>,
    request_delay: Duration,
}

impl<B: ChatBackend> Session<B> {
    pub fn new(backend: B, system_prompt: impl Into<String>, request_delay: Duration) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            request_delay,
        }
    }

    pub fn send(
        &mut self,
        user_message: &str,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, BackendError> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(user_message));

        if !self.request_delay.is_zero() {
            debug!(delay_ms = self.request_delay.as_millis() as u64, "waiting before request");
            thread::sleep(self.request_delay);
        }

        let reply = self.backend.complete(&messages, tools)?;

        self.history.push(ChatMessage::user(user_message));
        self.history.push(ChatMessage::assistant(&reply));
        Ok(reply)
    }

    pub fn add_tool_result(&mut self, call_id: &str, tool_name: &str, payload: &Value) {
        self.history
            .push(ChatMessage::tool_result(call_id, tool_name, payload));
    }

    /// Forgets everything said so far. Call between unrelated tasks.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Backend that replays canned replies and records every request.
    #[derive(Default)]
    pub struct ScriptedBackend {
        replies: RefCell<VecDeque<Result<AssistantReply, BackendError>>>,
        pub requests: RefCell<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<Result<AssistantReply, BackendError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<AssistantReply, BackendError> {
            self.requests.borrow_mut().push(messages.to_vec());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Malformed("script exhausted".to_string())))
        }
    }
}
