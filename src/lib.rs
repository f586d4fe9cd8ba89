pub mod models;
pub mod services;

pub use models::{Conversation, ConversationListItem, Message, Role};
pub use services::extract_service::{DocumentKind, UploadedFile};
pub use services::llm_client::{CancelFlag, OllamaClient};
pub use services::session_service::{SessionController, SessionState, TurnPhase};
