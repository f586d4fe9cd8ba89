use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::config_service;

/// Reply used when the server streams nothing back.
pub const NO_RESPONSE: &str = "No response from the model server.";
pub const NO_TEXT_FOUND: &str = "No text found in image.";
pub const OCR_PARSE_FAILURE: &str = "Could not parse the OCR response.";

const OCR_PROMPT: &str = "You are an OCR assistant. Carefully read all visible text in this image \
and return ONLY the extracted text. Do not describe the image.";

/// Minimum gap between two partial-progress callbacks.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Shared cooperative-cancellation flag. Cloned into whoever needs to stop a
/// generation; the client checks it at each fragment boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ollama generate request
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    stream: bool,
}

/// One newline-delimited unit of a streamed generate response.
#[derive(Debug, Deserialize)]
struct GenerateFragment {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Frame file context ahead of the user's question; raw prompt when there is
/// no context.
pub fn compose_prompt(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.trim().is_empty() => format!(
            "Use the following file contents as context when answering.\n\n\
             Context:\n{}\n\nQuestion:\n{}",
            context, prompt
        ),
        _ => prompt.to_string(),
    }
}

/// Best-effort pull of the `response` field out of a body that did not parse
/// as JSON.
fn extract_response_field(body: &str) -> Option<String> {
    let re = Regex::new(r#""response":"(.*?)""#).unwrap();
    re.captures(body)
        .map(|captures| captures[1].replace("\\n", "\n").trim().to_string())
}

/// Client for a local Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    client: Client,
    endpoint: String,
}

impl OllamaClient {
    pub fn new(endpoint: &str) -> Self {
        Self::with_timeout(endpoint, config_service::DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(endpoint: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }

    /// Create a client from the app's configuration.
    pub fn from_config() -> Result<Self, String> {
        let config = config_service::load_config()?;
        Ok(Self::with_timeout(&config.endpoint(), config.timeout_secs()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stream a reply for the given prompt. Never fails: transport problems
    /// come back as a descriptive error string so the turn still completes
    /// with a visible reply.
    pub async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        model: &str,
        cancel: &CancelFlag,
        on_progress: impl FnMut(&str),
    ) -> String {
        let prompt = compose_prompt(prompt, context);

        match self.try_generate(&prompt, model, cancel, on_progress).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    NO_RESPONSE.to_string()
                } else {
                    text.to_string()
                }
            }
            Err(message) => {
                log::warn!("generate failed: {}", message);
                message
            }
        }
    }

    async fn try_generate(
        &self,
        prompt: &str,
        model: &str,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(&str),
    ) -> Result<String, String> {
        let request = GenerateRequest {
            model,
            prompt,
            images: None,
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Error contacting the model server: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Model server error ({}): {}", status, body));
        }

        let mut stream = response.bytes_stream();
        // Byte buffer: a multi-byte character may be split across transport
        // chunks, so decoding happens per complete line, never per chunk.
        let mut pending: Vec<u8> = Vec::new();
        let mut accumulated = String::new();
        let mut last_emit = Instant::now();
        let mut cancelled = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Error reading the model stream: {}", e))?;
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();

                // Stop consuming input as soon as cancellation is observed;
                // whatever accumulated so far becomes the reply.
                if cancel.is_set() {
                    cancelled = true;
                    break 'read;
                }

                let line = match std::str::from_utf8(&line) {
                    Ok(line) => line.trim(),
                    Err(_) => {
                        log::debug!("skipping non-UTF-8 stream fragment");
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                let fragment = match serde_json::from_str::<GenerateFragment>(line) {
                    Ok(fragment) => fragment,
                    Err(_) => {
                        // Malformed fragments are skipped, not fatal.
                        log::debug!("skipping malformed stream fragment");
                        continue;
                    }
                };

                accumulated.push_str(&fragment.response);

                if last_emit.elapsed() >= PROGRESS_INTERVAL {
                    on_progress(&accumulated);
                    last_emit = Instant::now();
                }

                if fragment.done {
                    break 'read;
                }
            }
        }

        // The server may omit the trailing newline on the final fragment.
        if !cancelled {
            if let Ok(leftover) = std::str::from_utf8(&pending) {
                let leftover = leftover.trim();
                if !leftover.is_empty() {
                    if let Ok(fragment) = serde_json::from_str::<GenerateFragment>(leftover) {
                        accumulated.push_str(&fragment.response);
                    }
                }
            }
        }

        on_progress(&accumulated);
        Ok(accumulated)
    }

    /// Non-streaming OCR variant of `generate`: send the image, return the
    /// text the vision model read. Never fails.
    pub async fn extract_image_text(&self, image: &[u8], model: &str) -> String {
        match self.try_extract_image_text(image, model).await {
            Ok(text) => text,
            Err(message) => {
                log::warn!("image OCR failed: {}", message);
                message
            }
        }
    }

    async fn try_extract_image_text(&self, image: &[u8], model: &str) -> Result<String, String> {
        let request = GenerateRequest {
            model,
            prompt: OCR_PROMPT,
            images: Some(vec![BASE64_STANDARD.encode(image)]),
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Error contacting the model server: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Model server error ({}): {}", status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("Error reading the model response: {}", e))?;

        match serde_json::from_str::<GenerateFragment>(&body) {
            Ok(fragment) => {
                let text = fragment.response.trim();
                if text.is_empty() {
                    Ok(NO_TEXT_FOUND.to_string())
                } else {
                    Ok(text.to_string())
                }
            }
            Err(_) => Ok(extract_response_field(&body)
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| OCR_PARSE_FAILURE.to_string())),
        }
    }
}
