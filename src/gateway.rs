//! Analysis service gateway
//!
//! The remote analysis service is reached through [`AnalysisGateway`]. The
//! gateway only moves bytes: it reports the status code and raw body of each
//! call and leaves interpretation to the submission orchestrator.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::PortalConfig;
use crate::job::JobRequest;

/// Status code and raw body returned by the analysis service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl GatewayReply {
    /// Create a reply
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport level failures talking to the analysis service
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP client could not be constructed
    #[error("Failed to build analysis service client: {0}")]
    Client(String),

    /// Call did not complete within the configured timeout
    #[error("Request to {endpoint} timed out")]
    Timeout {
        /// Endpoint URL
        endpoint: String,
    },

    /// Connection, protocol or body read failure
    #[error("Request to {endpoint} failed: {message}")]
    Transport {
        /// Endpoint URL
        endpoint: String,
        /// Client error text
        message: String,
    },
}

/// Remote analysis service
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// Dry-run validation of a job (`POST /validate`)
    async fn validate(&self, job: &JobRequest) -> Result<GatewayReply, GatewayError>;

    /// Start a job (`POST /run`)
    async fn run(&self, job: &JobRequest) -> Result<GatewayReply, GatewayError>;

    /// Fetch a TSV predictor template for the accessions (`POST /template`)
    async fn template(&self, accessions: &[String]) -> Result<GatewayReply, GatewayError>;
}

/// [`AnalysisGateway`] over HTTP with JSON bodies
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_uri: String,
}

impl HttpGateway {
    /// Create a gateway for `base_uri` with a per-call timeout
    pub fn new(base_uri: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a gateway from portal configuration
    pub fn from_config(config: &PortalConfig) -> Result<Self, GatewayError> {
        Self::new(config.gateway_uri.clone(), config.request_timeout())
    }

    /// Full URL of an endpoint
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_uri, path.trim_start_matches('/'))
    }

    async fn post_json<T: Serialize + ?Sized + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<GatewayReply, GatewayError> {
        let endpoint = self.endpoint(path);
        debug!("POST {}", endpoint);

        let response = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        debug!("{} answered {}", endpoint, status);
        Ok(GatewayReply { status, body })
    }
}

fn transport_error(endpoint: &str, err: reqwest::Error) -> GatewayError {
    error!("Analysis service call to {} failed: {}", endpoint, err);
    if err.is_timeout() {
        GatewayError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        GatewayError::Transport {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisGateway for HttpGateway {
    async fn validate(&self, job: &JobRequest) -> Result<GatewayReply, GatewayError> {
        self.post_json("validate", job).await
    }

    async fn run(&self, job: &JobRequest) -> Result<GatewayReply, GatewayError> {
        self.post_json("run", job).await
    }

    async fn template(&self, accessions: &[String]) -> Result<GatewayReply, GatewayError> {
        self.post_json("template", accessions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::XmlOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn job() -> JobRequest {
        JobRequest {
            accessions: vec!["AB123".to_string(); 5],
            reply_email: "a@b.com".to_string(),
            job_name: None,
            use_glm: false,
            predictors: None,
            xml_options: XmlOptions {
                chain_length: 1000u64.into(),
                sub_sample_rate: 10u64.into(),
                substitution_model: "HKY".to_string(),
            },
        }
    }

    /// Read one HTTP request (headers plus `Content-Length` body)
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if data.len() >= split + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    /// Serve exactly one canned response and hand back the raw request
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
            request
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_reply_success_range() {
        assert!(GatewayReply::new(200, "").is_success());
        assert!(GatewayReply::new(202, "").is_success());
        assert!(!GatewayReply::new(400, "").is_success());
        assert!(!GatewayReply::new(500, "").is_success());
    }

    #[test]
    fn test_endpoint_joining() {
        let gateway = HttpGateway::new("http://api:8007/", Duration::from_secs(1)).expect("gateway");
        assert_eq!(gateway.endpoint("validate"), "http://api:8007/validate");
        assert_eq!(gateway.endpoint("/run"), "http://api:8007/run");
    }

    #[tokio::test]
    async fn test_validate_posts_job_json() {
        let (uri, server) = serve_once(
            "200 OK",
            r#"{"error":null,"accessionsUsed":[],"accessionsRemoved":[]}"#,
        )
        .await;
        let gateway = HttpGateway::new(uri, Duration::from_secs(5)).expect("gateway");

        let reply = gateway.validate(&job()).await.expect("reply");
        assert_eq!(reply.status, 200);
        assert!(reply.body.contains("accessionsUsed"));

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /validate HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""replyEmail":"a@b.com""#));
        assert!(request.contains(r#""useGLM":false"#));
    }

    #[tokio::test]
    async fn test_run_returns_status_and_body() {
        let (uri, server) = serve_once("202 Accepted", "job-42").await;
        let gateway = HttpGateway::new(uri, Duration::from_secs(5)).expect("gateway");

        let reply = gateway.run(&job()).await.expect("reply");
        assert_eq!(reply, GatewayReply::new(202, "job-42"));
        assert!(server.await.expect("server task").starts_with("POST /run "));
    }

    #[tokio::test]
    async fn test_template_posts_accession_array() {
        let (uri, server) = serve_once("200 OK", "State\tPop\n").await;
        let gateway = HttpGateway::new(uri, Duration::from_secs(5)).expect("gateway");

        let reply = gateway
            .template(&["AB123".to_string(), "CD456".to_string()])
            .await
            .expect("reply");
        assert_eq!(reply.body, "State\tPop\n");
        assert!(server.await.expect("server task").contains(r#"["AB123","CD456"]"#));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let gateway =
            HttpGateway::new(format!("http://{}", addr), Duration::from_secs(5)).expect("gateway");
        let err = gateway.validate(&job()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_silent_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let gateway = HttpGateway::new(format!("http://{}", addr), Duration::from_millis(200))
            .expect("gateway");
        let err = gateway.run(&job()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
    }
}
