/// Action handlers for the chat page, dispatched by action kind
pub mod chat;
pub mod ingest;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{PdfChatError, Result};
use crate::models::UploadedPdf;
use crate::session::SessionContext;

pub use chat::{ChatHandler, ClearHistoryHandler};
pub use ingest::{AddToKnowledgeBaseHandler, NewUploadHandler, UploadHandler};

/// A user interaction on the page
#[derive(Debug, Clone)]
pub enum Action {
    Upload(UploadedPdf),
    AddToKnowledgeBase,
    Chat { prompt: String },
    ClearHistory,
    NewUpload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Upload,
    AddToKnowledgeBase,
    Chat,
    ClearHistory,
    NewUpload,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Upload(_) => ActionKind::Upload,
            Action::AddToKnowledgeBase => ActionKind::AddToKnowledgeBase,
            Action::Chat { .. } => ActionKind::Chat,
            Action::ClearHistory => ActionKind::ClearHistory,
            Action::NewUpload => ActionKind::NewUpload,
        }
    }
}

/// What an action produced besides the next session state
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Updated,
    Ingested { file_name: String },
    Answered(String),
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: SessionContext, action: Action)
    -> Result<(SessionContext, Outcome)>;
}

pub(crate) fn unexpected(handler: &str, action: &Action) -> PdfChatError {
    PdfChatError::Internal(format!(
        "{handler} cannot handle {:?} action",
        action.kind()
    ))
}

/// Handler table keyed by action kind
pub struct Dispatcher {
    table: HashMap<ActionKind, Box<dyn ActionHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut table: HashMap<ActionKind, Box<dyn ActionHandler>> = HashMap::new();
        table.insert(ActionKind::Upload, Box::new(UploadHandler));
        table.insert(
            ActionKind::AddToKnowledgeBase,
            Box::new(AddToKnowledgeBaseHandler),
        );
        table.insert(ActionKind::Chat, Box::new(ChatHandler));
        table.insert(ActionKind::ClearHistory, Box::new(ClearHistoryHandler));
        table.insert(ActionKind::NewUpload, Box::new(NewUploadHandler));
        Self { table }
    }

    /// Run `action` against `ctx` and return the next context
    pub async fn dispatch(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        let kind = action.kind();
        let handler = self
            .table
            .get(&kind)
            .ok_or_else(|| PdfChatError::Internal(format!("No handler for {kind:?}")))?;

        ctx.notice = None;
        tracing::debug!(session = %ctx.id, action = ?kind, "Dispatching action");
        handler.handle(ctx, action).await
    }

    /// Dispatch against a shared session. The session lock is held for the whole
    /// action and the stored context is replaced only when the action succeeds.
    pub async fn apply(&self, session: &Mutex<SessionContext>, action: Action) -> Result<Outcome> {
        let mut guard = session.lock().await;
        let kind = action.kind();
        match self.dispatch(guard.clone(), action).await {
            Ok((next, outcome)) => {
                *guard = next;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(session = %guard.id, action = ?kind, error = %e, "Action failed");
                Err(e)
            }
        }
    }
}
