use crate::models::{Conversation, ConversationListItem, Message, Role};

use super::config_service;
use super::extract_service::{self, UploadedFile};
use super::llm_client::{CancelFlag, OllamaClient};

/// How many archived conversations the sidebar surface shows.
pub const RECENT_CHATS: usize = 10;

/// Observable turn state, derived from the tail of the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingReply,
}

/// Per-session state. One instance per browser session, never shared and
/// never persisted.
#[derive(Debug)]
pub struct SessionState {
    pub messages: Vec<Message>,
    pub archive: Vec<Conversation>,
    pub model: String,
    pub file_context: Option<String>,
    pub attached_files: Vec<String>,
    cancel: CancelFlag,
}

impl SessionState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            archive: Vec::new(),
            model: model.into(),
            file_context: None,
            attached_files: Vec::new(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        match self.messages.last() {
            Some(message) if message.role == Role::User => TurnPhase::AwaitingReply,
            _ => TurnPhase::Idle,
        }
    }
}

impl Clone for SessionState {
    // A cloned session is an independent session: it must get its own
    // cancellation flag, not share the original's.
    fn clone(&self) -> Self {
        Self {
            messages: self.messages.clone(),
            archive: self.archive.clone(),
            model: self.model.clone(),
            file_context: self.file_context.clone(),
            attached_files: self.attached_files.clone(),
            cancel: CancelFlag::new(),
        }
    }
}

/// Orchestrates turn-taking over one session's state: append user message,
/// run the inference client, append the reply, and handle the sidebar
/// commands (new chat, clear history, select archived chat).
pub struct SessionController {
    state: SessionState,
    client: OllamaClient,
}

impl SessionController {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            state: SessionState::new(model),
            client,
        }
    }

    /// Build a controller from the app's configuration.
    pub fn from_config() -> Result<Self, String> {
        let config = config_service::load_config()?;
        let client = OllamaClient::with_timeout(&config.endpoint(), config.timeout_secs());
        Ok(Self::new(client, config.model()))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.phase()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.state.model = model.into();
    }

    /// Handle to the shared cancellation flag, for the cancel control.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.state.cancel.clone()
    }

    pub fn cancel(&self) {
        self.state.cancel.set();
    }

    /// Append a user message and move to awaiting-reply. Starting a new turn
    /// always resets cancellation, so a stale flag from a previous turn
    /// cannot abort this one.
    pub fn submit_prompt(&mut self, text: &str) -> Result<(), String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("Cannot submit an empty prompt".to_string());
        }
        if self.state.phase() == TurnPhase::AwaitingReply {
            return Err("A reply is already pending for this conversation".to_string());
        }

        self.state.cancel.clear();
        self.state.messages.push(Message::user(text));
        Ok(())
    }

    /// Generate the reply for the pending user message and append it. A
    /// cancelled or failed turn still completes with a (partial or error)
    /// reply; the returned text is the appended assistant content.
    pub async fn run_pending_turn(
        &mut self,
        on_progress: impl FnMut(&str),
    ) -> Result<String, String> {
        let prompt = match self.state.messages.last() {
            Some(message) if message.role == Role::User => message.content.clone(),
            _ => return Err("No pending user message".to_string()),
        };

        let context = self.state.file_context.clone();
        let cancel = self.state.cancel.clone();

        let reply = self
            .client
            .generate(
                &prompt,
                context.as_deref(),
                &self.state.model,
                &cancel,
                on_progress,
            )
            .await;

        self.state.messages.push(Message::assistant(reply.clone()));
        Ok(reply)
    }

    /// Archive a non-empty active conversation and start fresh. An empty
    /// conversation produces no archive entry.
    pub fn new_chat(&mut self) {
        if !self.state.messages.is_empty() {
            let messages = std::mem::take(&mut self.state.messages);
            self.state.archive.push(Conversation::archive(messages));
        }
        self.clear_file_context();
    }

    /// Discard everything: active conversation, archive, and file context.
    pub fn clear_history(&mut self) {
        self.state.messages.clear();
        self.state.archive.clear();
        self.clear_file_context();
    }

    /// Replace the active conversation with a copy of an archived one. The
    /// archive entry stays; file context is not restorable from history.
    pub fn select_chat(&mut self, id: &str) -> Result<(), String> {
        let conversation = self
            .state
            .archive
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| format!("No archived conversation with id {}", id))?;

        self.state.messages = conversation.messages.clone();
        self.clear_file_context();
        Ok(())
    }

    /// Most recent archived conversations, newest first, for the sidebar.
    pub fn recent_conversations(&self) -> Vec<ConversationListItem> {
        self.state
            .archive
            .iter()
            .rev()
            .take(RECENT_CHATS)
            .map(Into::into)
            .collect()
    }

    /// Extract and cache context text for an upload. Replaces any previously
    /// attached files wholesale.
    pub async fn attach_files(&mut self, files: &[UploadedFile]) {
        if files.is_empty() {
            return;
        }

        let context =
            extract_service::build_context(&self.client, &self.state.model, files).await;

        log::debug!("cached context from {} attached file(s)", files.len());
        self.state.file_context = Some(context);
        self.state.attached_files = files.iter().map(|f| f.name.clone()).collect();
    }

    fn clear_file_context(&mut self) {
        self.state.file_context = None;
        self.state.attached_files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TITLE_CHARS;

    fn offline_controller() -> SessionController {
        let client = OllamaClient::new("http://127.0.0.1:9/api/generate");
        SessionController::new(client, "llava")
    }

    #[test]
    fn new_chat_on_empty_conversation_archives_nothing() {
        let mut controller = offline_controller();
        controller.new_chat();
        assert!(controller.state().archive.is_empty());
    }

    #[test]
    fn new_chat_archives_exactly_one_entry_with_truncated_title() {
        let mut controller = offline_controller();
        let prompt = "Please summarize this very long document for me in detail";
        controller.submit_prompt(prompt).unwrap();
        controller.new_chat();

        assert_eq!(controller.state().archive.len(), 1);
        let expected: String = prompt.chars().take(TITLE_CHARS).collect();
        assert_eq!(controller.state().archive[0].title, expected);
        assert!(controller.state().messages.is_empty());
        assert_eq!(controller.phase(), TurnPhase::Idle);
    }

    #[test]
    fn clear_history_empties_everything() {
        let mut controller = offline_controller();
        controller.submit_prompt("first").unwrap();
        controller.new_chat();
        controller.submit_prompt("second").unwrap();

        controller.clear_history();

        assert!(controller.state().messages.is_empty());
        assert!(controller.state().archive.is_empty());
        assert!(controller.state().file_context.is_none());
        assert!(controller.state().attached_files.is_empty());
    }

    #[test]
    fn select_chat_copies_messages_and_keeps_archive_entry() {
        let mut controller = offline_controller();
        controller.submit_prompt("remember me").unwrap();
        controller.new_chat();
        let id = controller.state().archive[0].id.clone();

        controller.select_chat(&id).unwrap();

        assert_eq!(controller.state().messages.len(), 1);
        assert_eq!(controller.state().messages[0].content, "remember me");
        assert_eq!(controller.state().archive.len(), 1);

        assert!(controller.select_chat("missing-id").is_err());
    }

    #[tokio::test]
    async fn select_chat_clears_file_context() {
        let mut controller = offline_controller();
        let upload = [UploadedFile::new(
            "notes.txt",
            "text/plain",
            b"some notes".to_vec(),
        )];
        controller.attach_files(&upload).await;
        assert!(controller.state().file_context.is_some());
        assert_eq!(controller.state().attached_files, vec!["notes.txt"]);

        controller.submit_prompt("about my notes").unwrap();
        controller.new_chat();
        assert!(controller.state().file_context.is_none());

        controller.attach_files(&upload).await;
        let id = controller.state().archive[0].id.clone();
        controller.select_chat(&id).unwrap();
        assert!(controller.state().file_context.is_none());
        assert!(controller.state().attached_files.is_empty());
    }

    #[test]
    fn submit_is_rejected_while_a_reply_is_pending() {
        let mut controller = offline_controller();
        controller.submit_prompt("first").unwrap();
        assert_eq!(controller.phase(), TurnPhase::AwaitingReply);
        assert!(controller.submit_prompt("second").is_err());
        assert_eq!(controller.state().messages.len(), 1);
    }

    #[test]
    fn submit_rejects_empty_prompts() {
        let mut controller = offline_controller();
        assert!(controller.submit_prompt("   ").is_err());
        assert!(controller.state().messages.is_empty());
    }

    #[test]
    fn submitting_resets_a_stale_cancellation_flag() {
        let mut controller = offline_controller();
        controller.cancel();
        assert!(controller.cancel_flag().is_set());

        controller.submit_prompt("fresh turn").unwrap();
        assert!(!controller.cancel_flag().is_set());
    }

    #[test]
    fn cloned_session_state_does_not_share_the_cancel_flag() {
        let state = SessionState::new("llava");
        let other = state.clone();

        state.cancel.set();
        assert!(!other.cancel.is_set());
        assert_eq!(other.model, "llava");
    }

    #[test]
    fn recent_conversations_caps_at_ten_newest_first() {
        let mut controller = offline_controller();
        for i in 0..12 {
            controller.submit_prompt(&format!("chat {}", i)).unwrap();
            controller.new_chat();
        }

        let recent = controller.recent_conversations();
        assert_eq!(recent.len(), RECENT_CHATS);
        assert_eq!(recent[0].title, "chat 11");
        assert_eq!(recent[9].title, "chat 2");
        // Older entries are retained, just not surfaced.
        assert_eq!(controller.state().archive.len(), 12);
    }

    #[tokio::test]
    async fn run_pending_turn_requires_a_pending_user_message() {
        let mut controller = offline_controller();
        assert!(controller.run_pending_turn(|_| {}).await.is_err());
    }
}
