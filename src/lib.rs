pub mod config;
pub mod error;
pub mod handlers;
pub mod knowledge;
pub mod loader;
pub mod models;
pub mod server;
pub mod session;
pub mod transport;
pub mod vector_store;
pub mod view;

pub use crate::config::Config;
pub use crate::error::{PdfChatError, Result};
pub use crate::knowledge::{KnowledgeStore, RagApp};
pub use crate::server::{AppState, router};
