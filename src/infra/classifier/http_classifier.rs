use crate::core::collaborators::ContentItem;
use crate::core::scanner::{ClassifierVerdict, RiskClassifier, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Posts content to an external risk classifier and reads back
/// `{ "risk": 0..=10, "labels": [...] }`.
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self, ScanError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl RiskClassifier for HttpClassifier {
    async fn classify(&self, item: &ContentItem) -> Result<ClassifierVerdict, ScanError> {
        let payload = json!({
            "content_ref": item.content_ref,
            "text": item.text,
            "explicit": item.explicit,
            "audio": item.audio,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(self.timeout)
            } else {
                ScanError::Unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ScanError::Unavailable(format!(
                "classifier error: {} - {}",
                status, text
            )));
        }

        response
            .json::<ClassifierVerdict>()
            .await
            .map_err(|e| ScanError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serves one canned HTTP response and hands back the raw request it read.
    async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            // Headers first, then exactly Content-Length bytes of body.
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while raw.len() < header_end + body_len {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
        });

        (format!("http://{}/classify", addr), rx)
    }

    fn sample_item() -> ContentItem {
        serde_json::from_value(json!({
            "content_ref": "post-9",
            "author_id": "a9",
            "text": "free crypto giveaway",
            "created_at": "2024-09-01T10:00:00Z"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_verdict_is_parsed_and_key_is_sent() {
        let (url, request) = serve_once("200 OK", r#"{"risk": 7, "labels": ["spam"]}"#).await;
        let classifier =
            HttpClassifier::new(url, Some("secret".to_string()), Duration::from_secs(5)).unwrap();

        let verdict = classifier.classify(&sample_item()).await.unwrap();
        assert_eq!(verdict.risk, 7);
        assert_eq!(verdict.labels, vec!["spam".to_string()]);

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /classify"));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"content_ref\":\"post-9\""));
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let (url, _request) = serve_once("500 Internal Server Error", r#"{"error":"down"}"#).await;
        let classifier = HttpClassifier::new(url, None, Duration::from_secs(5)).unwrap();

        match classifier.classify(&sample_item()).await {
            Err(ScanError::Unavailable(msg)) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("down"));
            }
            other => panic!("expected Unavailable, got {:?}", other.map(|v| v.risk)),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let (url, _request) = serve_once("200 OK", "not json").await;
        let classifier = HttpClassifier::new(url, None, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            classifier.classify(&sample_item()).await,
            Err(ScanError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_risk_is_invalid_response() {
        let (url, _request) = serve_once("200 OK", r#"{"labels": ["spam"]}"#).await;
        let classifier = HttpClassifier::new(url, None, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            classifier.classify(&sample_item()).await,
            Err(ScanError::InvalidResponse(_))
        ));
    }
}
