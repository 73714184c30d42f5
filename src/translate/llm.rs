//! OpenAI-compatible chat/completions client behind the `LanguageModel` port.
//! Connection pooling via reqwest, manual SSE parsing, min-interval rate
//! limiting, retry on 429/5xx/timeout, cancellation via a shared token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CompletionRequest, LanguageModel, LlmError, Task};
use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = "You are a professional literary translator and editor of \
Korean and Japanese web novels. Follow the instructions exactly and output only what is asked.";

pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
    cancel: CancellationToken,
}

impl ChatClient {
    pub fn new(config: &LlmConfig, cancel: CancellationToken) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidInput("no API key configured".into()))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: config.min_request_interval,
            cancel,
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        // Extraction wants deterministic JSON; prose tasks get a little room.
        let temperature = match request.task {
            Task::ExtractNames => 0.0,
            Task::Translate | Task::Summarize => 0.3,
        };
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt}
            ],
            "max_tokens": request.max_tokens,
            "stream": true,
            "temperature": temperature
        })
    }

    /// Stream the completion and return the accumulated text.
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.rate_limit_wait().await;
        if self.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let body = self.request_body(request);
        let start = Instant::now();
        let response = self.send_with_retry(&body).await?;

        let mut full_text = String::new();
        let mut tokens_used: u32 = 0;
        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();

        while let Some(chunk_result) = tokio::select! {
            chunk = stream.next() => chunk,
            _ = self.cancel.cancelled() => {
                return Err(LlmError::Cancelled);
            }
        } {
            let bytes = chunk_result.map_err(|e| LlmError::ApiError(e.to_string()))?;
            for line in lines.push(&bytes)? {
                match parse_sse_line(line.trim()) {
                    SseEvent::Delta { content, usage } => {
                        if let Some(content) = content {
                            full_text.push_str(&content);
                        }
                        if let Some(total) = usage {
                            tokens_used = total;
                        }
                    }
                    SseEvent::Done | SseEvent::Ignored => {}
                }
            }
        }
        if let SseEvent::Delta { content: Some(content), .. } = parse_sse_line(lines.finish()?.trim()) {
            full_text.push_str(&content);
        }

        debug!(
            task = request.task.as_str(),
            tokens_used,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = full_text.chars().count(),
            "completion finished"
        );

        if full_text.trim().is_empty() {
            return Err(LlmError::ApiError("empty completion".into()));
        }
        Ok(full_text)
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp);
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    if attempt >= max_429_retries {
                        return Err(LlmError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    self.pause(wait).await?;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(LlmError::ApiError(format!("server error: {}", resp.status())));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    self.pause(wait).await?;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::ApiError(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(LlmError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => {
                    return Err(LlmError::ApiError(e.to_string()));
                }
            }
        }
    }

    async fn pause(&self, wait: Duration) -> Result<(), LlmError> {
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancel.cancelled() => Err(LlmError::Cancelled),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.stream_completion(request).await
    }
}

// --- SSE parsing ---

/// Byte buffer for SSE lines split across network chunks. A line is decoded
/// only once its newline has arrived, so a Hangul or kana character cut by a
/// chunk boundary is reassembled before decoding.
#[derive(Default)]
struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    /// Append a chunk and return every line it completed.
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LlmError> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(line)?);
        }
        Ok(lines)
    }

    /// Whatever followed the last newline.
    fn finish(self) -> Result<String, LlmError> {
        decode_line(self.buf)
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<String, LlmError> {
    String::from_utf8(bytes).map_err(|e| LlmError::ApiError(format!("invalid UTF-8 in stream: {e}")))
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta {
        content: Option<String>,
        usage: Option<u32>,
    },
    Done,
    Ignored,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Ignored;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<SseChunk>(data) {
        Ok(parsed) => SseEvent::Delta {
            content: parsed.choices.into_iter().next().and_then(|c| c.delta.content),
            usage: parsed.usage.map(|u| u.total_tokens),
        },
        Err(_) => SseEvent::Ignored,
    }
}

#[derive(Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    usage: Option<SseUsage>,
}

#[derive(Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Deserialize)]
struct SseDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct SseUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Kim Chulsoo"}}]}"#;
        assert_eq!(
            parse_sse_line(line),
            SseEvent::Delta {
                content: Some("Kim Chulsoo".into()),
                usage: None
            }
        );
    }

    #[test]
    fn test_parse_usage_only_chunk() {
        let line = r#"data: {"choices":[],"usage":{"total_tokens":42}}"#;
        assert_eq!(
            parse_sse_line(line),
            SseEvent::Delta {
                content: None,
                usage: Some(42)
            }
        );
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseEvent::Ignored);
        assert_eq!(parse_sse_line("data: {not json"), SseEvent::Ignored);
    }

    #[test]
    fn test_line_buffer_joins_split_characters() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"김철수\"}}]}\n".as_bytes();
        let cut = line.iter().position(|&b| b == 0xEA).unwrap() + 1;
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(&line[..cut]).unwrap().is_empty());
        let lines = buf.push(&line[cut..]).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_sse_line(lines[0].trim()),
            SseEvent::Delta {
                content: Some("김철수".into()),
                usage: None
            }
        );
        assert_eq!(buf.finish().unwrap(), "");
    }

    #[test]
    fn test_line_buffer_keeps_unterminated_tail() {
        let mut buf = SseLineBuffer::default();
        let lines = buf.push("data: a\n\ndata: 田".as_bytes()).unwrap();
        assert_eq!(lines, vec!["data: a\n".to_string(), "\n".to_string()]);
        assert_eq!(buf.finish().unwrap(), "data: 田");
    }

    #[test]
    fn test_line_buffer_rejects_invalid_utf8() {
        let mut buf = SseLineBuffer::default();
        assert!(matches!(buf.push(b"data: \xff\n"), Err(LlmError::ApiError(_))));
    }

    /// Serve one chunked SSE response, writing each chunk separately.
    async fn serve_chunks(chunks: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let body_len: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + body_len {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                      transfer-encoding: chunked\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            for chunk in chunks {
                socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_streamed_hangul_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"김철수\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();
        let cut = bytes.iter().position(|&b| b == 0xEA).unwrap() + 1;
        let base_url = serve_chunks(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;

        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            base_url,
            min_request_interval: Duration::ZERO,
            ..LlmConfig::default()
        };
        let client = ChatClient::new(&config, CancellationToken::new()).unwrap();
        let req = CompletionRequest::new(Task::ExtractNames, "김철수".into());
        assert_eq!(client.complete(&req).await, Ok("김철수".to_string()));
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(matches!(
            ChatClient::new(&config, CancellationToken::new()),
            Err(LlmError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_client_refuses_work() {
        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            min_request_interval: Duration::ZERO,
            ..LlmConfig::default()
        };
        let token = CancellationToken::new();
        let client = ChatClient::new(&config, token.clone()).unwrap();
        token.cancel();
        let req = CompletionRequest::new(Task::Translate, "안녕".into());
        assert_eq!(client.complete(&req).await, Err(LlmError::Cancelled));
    }
}
