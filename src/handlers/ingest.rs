use async_trait::async_trait;
use std::io::Write;

use super::{Action, ActionHandler, Outcome, unexpected};
use crate::error::{PdfChatError, Result};
use crate::knowledge::KnowledgeStore;
use crate::models::{DataType, UploadedPdf};
use crate::session::SessionContext;

/// Reject anything the upload widget would not accept
pub fn validate_upload(upload: &UploadedPdf) -> Result<()> {
    if upload.bytes.is_empty() {
        return Err(PdfChatError::InvalidUpload("no file selected".to_string()));
    }
    if !upload.file_name.to_lowercase().ends_with(".pdf") {
        return Err(PdfChatError::InvalidUpload(format!(
            "{} is not a PDF file",
            upload.file_name
        )));
    }
    if let Some(content_type) = &upload.content_type {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if !essence.eq_ignore_ascii_case("application/pdf") {
            return Err(PdfChatError::InvalidUpload(format!(
                "{} was sent as {content_type}, expected application/pdf",
                upload.file_name
            )));
        }
    }
    Ok(())
}

/// Stage `upload` in a temp file, add it to `store`, then remove the file
/// whatever the outcome of the add.
pub async fn ingest_pdf(store: &dyn KnowledgeStore, upload: &UploadedPdf) -> Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".pdf")
        .tempfile()?;
    staged.write_all(&upload.bytes)?;
    staged.flush()?;

    tracing::info!(
        file = %upload.file_name,
        bytes = upload.bytes.len(),
        staged = %staged.path().display(),
        "Adding PDF to knowledge base"
    );
    let result = store.add(staged.path(), DataType::PdfFile).await;

    if let Err(e) = staged.close() {
        tracing::warn!(file = %upload.file_name, error = %e, "Failed to remove staged upload");
    }
    result
}

/// Holds a newly selected file for preview; does not touch the knowledge base
pub struct UploadHandler;

#[async_trait]
impl ActionHandler for UploadHandler {
    async fn handle(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        let Action::Upload(upload) = action else {
            return Err(unexpected("UploadHandler", &action));
        };
        validate_upload(&upload)?;

        tracing::info!(session = %ctx.id, file = %upload.file_name, "PDF uploaded for preview");
        ctx.upload = Some(upload);
        Ok((ctx, Outcome::Updated))
    }
}

/// "Add to Knowledge Base": ingest the pending upload and set the flag
pub struct AddToKnowledgeBaseHandler;

#[async_trait]
impl ActionHandler for AddToKnowledgeBaseHandler {
    async fn handle(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        if !matches!(action, Action::AddToKnowledgeBase) {
            return Err(unexpected("AddToKnowledgeBaseHandler", &action));
        }
        if ctx.pdf_added {
            return Err(PdfChatError::InvalidState(
                "a PDF is already in the knowledge base; choose \"Upload a new PDF\" first"
                    .to_string(),
            ));
        }
        let upload = ctx
            .upload
            .clone()
            .ok_or_else(|| PdfChatError::InvalidState("no PDF has been uploaded".to_string()))?;

        ingest_pdf(ctx.store.as_ref(), &upload).await?;

        ctx.pdf_added = true;
        ctx.notice = Some(format!("Added {} to knowledge base!", upload.file_name));
        Ok((
            ctx,
            Outcome::Ingested {
                file_name: upload.file_name,
            },
        ))
    }
}

/// "Upload a new PDF": clears the flag only. Transcript and index are kept.
pub struct NewUploadHandler;

#[async_trait]
impl ActionHandler for NewUploadHandler {
    async fn handle(
        &self,
        mut ctx: SessionContext,
        action: Action,
    ) -> Result<(SessionContext, Outcome)> {
        if !matches!(action, Action::NewUpload) {
            return Err(unexpected("NewUploadHandler", &action));
        }
        ctx.pdf_added = false;
        Ok((ctx, Outcome::Updated))
    }
}
