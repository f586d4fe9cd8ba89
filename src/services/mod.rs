pub mod config_service;
pub mod extract_service;
pub mod llm_client;
pub mod session_service;
