//! Ordered message history owned by a single agent run.

use std::collections::HashSet;

use crate::message::{Message, ToolCall, ToolResult};

/// The message sequence for one agent run.
///
/// Tool call ids are unique within a conversation: ids repeated by the
/// provider are rewritten before the assistant message is stored.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    call_ids: HashSet<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation with a system message and the opening user message.
    pub fn seeded(system: Message, user: Message) -> Self {
        let mut conversation = Self::new();
        conversation.messages.push(system);
        conversation.messages.push(user);
        conversation
    }

    /// Append an assistant message, returning the tool calls as stored
    /// (with any duplicate ids rewritten).
    pub fn push_assistant(&mut self, mut message: Message) -> Vec<ToolCall> {
        for call in &mut message.tool_calls {
            call.id = self.claim_id(&call.id);
        }
        let calls = message.tool_calls.clone();
        self.messages.push(message);
        calls
    }

    pub fn push_tool_result(&mut self, result: &ToolResult) {
        self.messages.push(Message::tool_result(result));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn claim_id(&mut self, id: &str) -> String {
        let base = if id.is_empty() { "call" } else { id };
        if self.call_ids.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.call_ids.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded() {
        let conversation = Conversation::seeded(Message::system("sys"), Message::user("hi"));
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_duplicate_call_ids_rewritten() {
        let mut conversation = Conversation::new();
        let first = conversation.push_assistant(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("gemini_tc_0", "search", json!({}))],
        ));
        let second = conversation.push_assistant(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("gemini_tc_0", "search", json!({})),
                ToolCall::new("gemini_tc_0", "calculator", json!({})),
            ],
        ));

        assert_eq!(first[0].id, "gemini_tc_0");
        assert_eq!(second[0].id, "gemini_tc_0_1");
        assert_eq!(second[1].id, "gemini_tc_0_2");

        let stored = &conversation.messages()[1].tool_calls;
        assert_eq!(stored[0].id, "gemini_tc_0_1");
    }

    #[test]
    fn test_empty_id_gets_placeholder() {
        let mut conversation = Conversation::new();
        let calls = conversation.push_assistant(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("", "search", json!({}))],
        ));
        assert_eq!(calls[0].id, "call");
    }
}
