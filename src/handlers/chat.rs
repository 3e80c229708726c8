use async_trait::async_trait;

use super::{Action, ActionHandler, Outcome, unexpected};
use crate::error::{PdfChatError, Result};
use crate::models::Turn;
use crate::session::SessionContext;

/// Append the user turn, ask the knowledge store, append the answer.
/// The whole prompt goes to the store as typed; history is not windowed here.
pub async fn submit(ctx: &mut SessionContext, prompt: &str) -> Result<String> {
    if prompt.trim().is_empty() {
        return Err(PdfChatError::InvalidInput("prompt is empty".to_string()));
    }

    ctx.messages.push(Turn::user(prompt));
    tracing::info!(session = %ctx.id, turns = ctx.messages.len(), "Submitting prompt");

    let answer = ctx.store.chat(prompt).await?;
    ctx.messages.push(Turn::assistant(answer.clone()));
    Ok(answer)
}

pub struct ChatHandler;

#[async_trait]
impl ActionHandler for ChatHandler {
    async fn handle(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        let Action::Chat { prompt } = action else {
            return Err(unexpected("ChatHandler", &action));
        };
        let answer = submit(&mut ctx, &prompt).await?;
        Ok((ctx, Outcome::Answered(answer)))
    }
}

/// "Clear Chat History": empties the transcript, keeps the knowledge store
pub struct ClearHistoryHandler;

#[async_trait]
impl ActionHandler for ClearHistoryHandler {
    async fn handle(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        if !matches!(action, Action::ClearHistory) {
            return Err(unexpected("ClearHistoryHandler", &action));
        }
        ctx.messages.clear();
        Ok((ctx, Outcome::Updated))
    }
}
