//! HTTP submission transport.

use async_trait::async_trait;
use faultbench_proto::{Error, Result, SubmissionTransport, SubmitResponse};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct SubmitPayload<'a> {
    ans: &'a str,
}

/// Posts answers as `{"ans": "<answer>"}` to a benchmark submit endpoint.
///
/// Any HTTP status is a response; only failing to get one is a
/// [`Error::Transport`].
#[derive(Debug, Clone)]
pub struct HttpSubmitTransport {
    client: Client,
    url: String,
}

impl HttpSubmitTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SubmissionTransport for HttpSubmitTransport {
    async fn submit(&self, answer: &str) -> Result<SubmitResponse> {
        debug!(url = %self.url, "Posting submission");
        let response = self
            .client
            .post(&self.url)
            .json(&SubmitPayload { ans: answer })
            .send()
            .await
            .map_err(|e| Error::Transport(format!("submission to {} failed: {e}", self.url)))?;

        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read submission response: {e}")))?;
        info!(status, "Submission answered");
        Ok(SubmitResponse { status, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one request, returning the raw request body it received.
    async fn serve_once(
        listener: TcpListener,
        status_line: &'static str,
        body: &'static str,
    ) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        if !name.eq_ignore_ascii_case("content-length") {
                            return None;
                        }
                        value.trim().parse::<usize>().ok()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\n\
                         Connection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    return text[split + 4..].to_string();
                }
            }
            if n == 0 {
                return String::new();
            }
        }
    }

    #[tokio::test]
    async fn test_posts_answer_and_returns_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/submit", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "409 Conflict", "already graded"));

        let transport = HttpSubmitTransport::new(url, Duration::from_secs(5)).unwrap();
        let response = transport.submit("{\"detection\": true}").await.unwrap();

        assert_eq!(response.status, 409);
        assert_eq!(response.message, "already graded");
        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"ans": "{\"detection\": true}"}));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/submit", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpSubmitTransport::new(url, Duration::from_secs(2)).unwrap();
        assert!(matches!(transport.submit("yes").await, Err(Error::Transport(_))));
    }
}
