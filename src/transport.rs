use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};

use crate::error::{PdfChatError, Result};
use crate::models::{EmbeddingRequest, EmbeddingResponse, GenerateRequest, GenerateResponse};

/// Calls into the model server. No retries and no timeouts: a call either
/// completes or fails, and the failure reaches the caller unchanged.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<String>;
    async fn embed(&self, req: &EmbeddingRequest) -> Result<Vec<f32>>;
}

pub struct OllamaTransport {
    client: Client,
    generate_url: String,
    embeddings_url: String,
}

impl OllamaTransport {
    pub fn new(llm_base_url: &str, embedder_base_url: &str) -> Self {
        Self {
            client: Client::new(),
            generate_url: format!("{}/api/generate", llm_base_url.trim_end_matches('/')),
            embeddings_url: format!(
                "{}/api/embeddings",
                embedder_base_url.trim_end_matches('/')
            ),
        }
    }

    async fn check_status(response: Response, what: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(PdfChatError::Backend(format!(
            "Ollama {what} returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl Transport for OllamaTransport {
    async fn generate(&self, req: &GenerateRequest) -> Result<String> {
        tracing::debug!(model = %req.model, stream = req.stream, "Sending generate request");

        let response = self
            .client
            .post(&self.generate_url)
            .json(req)
            .send()
            .await?;
        let response = Self::check_status(response, "generate").await?;

        if !req.stream {
            let body: GenerateResponse = response.json().await.map_err(|e| {
                PdfChatError::Backend(format!("Failed to parse Ollama generate response: {e}"))
            })?;
            if let Some(err) = body.error {
                return Err(PdfChatError::Backend(err));
            }
            return Ok(body.response);
        }

        let mut acc = StreamAccumulator::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            acc.push(&chunk?)?;
            if acc.is_done() {
                break;
            }
        }
        acc.finish()
    }

    async fn embed(&self, req: &EmbeddingRequest) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.embeddings_url)
            .json(req)
            .send()
            .await?;
        let response = Self::check_status(response, "embeddings").await?;

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            PdfChatError::Backend(format!("Failed to parse Ollama embeddings response: {e}"))
        })?;
        if let Some(err) = body.error {
            return Err(PdfChatError::Backend(err));
        }
        if body.embedding.is_empty() {
            return Err(PdfChatError::Backend(format!(
                "Ollama returned an empty embedding for model {}",
                req.model
            )));
        }
        Ok(body.embedding)
    }
}

/// Reassembles a streamed NDJSON generate response into one answer.
/// Network chunks may split a JSON line anywhere, so bytes are buffered
/// until a newline completes the line.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    answer: String,
    done: bool,
}

impl StreamAccumulator {
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&line)?;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(mut self) -> Result<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.consume_line(&rest)?;
        }
        Ok(self.answer)
    }

    fn consume_line(&mut self, line: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(line)
            .map_err(|e| PdfChatError::Backend(format!("Non UTF-8 stream line: {e}")))?
            .trim();
        if text.is_empty() {
            return Ok(());
        }
        let part: GenerateResponse = serde_json::from_str(text).map_err(|e| {
            PdfChatError::Backend(format!("Failed to parse stream line: {e}. Raw: {text}"))
        })?;
        if let Some(err) = part.error {
            return Err(PdfChatError::Backend(err));
        }
        self.answer.push_str(&part.response);
        self.done |= part.done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_joins_fragments_split_mid_line() {
        let mut acc = StreamAccumulator::default();
        acc.push(br#"{"response":"Hel","done":false}"#).unwrap();
        acc.push(b"\n{\"response\":\"lo ").unwrap();
        acc.push(b"World\",\"done\":false}\n").unwrap();
        assert!(!acc.is_done());
        acc.push(br#"{"response":"","done":true}"#).unwrap();
        acc.push(b"\n").unwrap();
        assert!(acc.is_done());
        assert_eq!(acc.finish().unwrap(), "Hello World");
    }

    #[test]
    fn test_accumulator_handles_unterminated_last_line() {
        let mut acc = StreamAccumulator::default();
        acc.push(b"{\"response\":\"a\"}\n{\"response\":\"b\",\"done\":true}")
            .unwrap();
        assert_eq!(acc.finish().unwrap(), "ab");
    }

    #[test]
    fn test_accumulator_surfaces_backend_error() {
        let mut acc = StreamAccumulator::default();
        let err = acc
            .push(b"{\"error\":\"model 'llama2:latest' not found\"}\n")
            .unwrap_err();
        assert!(matches!(err, PdfChatError::Backend(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_urls_strip_trailing_slash() {
        let t = OllamaTransport::new("http://localhost:11434/", "http://embed:11434");
        assert_eq!(t.generate_url, "http://localhost:11434/api/generate");
        assert_eq!(t.embeddings_url, "http://embed:11434/api/embeddings");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        // Port 9 (discard) is not an HTTP server
        let t = OllamaTransport::new("http://127.0.0.1:9", "http://127.0.0.1:9");
        let req = EmbeddingRequest {
            model: "llama2:latest".to_string(),
            prompt: "hello".to_string(),
        };
        assert!(t.embed(&req).await.is_err());
    }
}
