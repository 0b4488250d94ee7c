use crate::sigv4::{self, Credentials};
use crate::wire::{CompareFacesRequest, CompareFacesResponse, ServiceError};
use async_trait::async_trait;
use djook_core::{ComparisonRequest, FaceComparer, FaceMatch, RecognitionServiceError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use thiserror::Error;

const SERVICE: &str = "rekognition";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.1";
const TARGET_COMPARE_FACES: &str = "RekognitionService.CompareFaces";
/// Region the service has always been pinned to.
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Connection settings for [`RekognitionClient`].
#[derive(Debug, Clone)]
pub struct RekognitionConfig {
    pub region: String,
    pub credentials: Credentials,
    /// Overrides `https://rekognition.<region>.amazonaws.com/`.
    pub endpoint: Option<String>,
    /// Per-call timeout covering connect, send and response.
    pub timeout: Duration,
}

impl RekognitionConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            credentials,
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// `CompareFaces` client. One signed HTTPS request per comparison.
pub struct RekognitionClient {
    http: Client,
    endpoint: Url,
    host: String,
    region: String,
    credentials: Credentials,
}

impl RekognitionClient {
    pub fn new(config: RekognitionConfig) -> Result<Self, ClientError> {
        let raw = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{SERVICE}.{}.amazonaws.com/", config.region));
        let endpoint = Url::parse(&raw).map_err(|e| ClientError::InvalidEndpoint {
            endpoint: raw.clone(),
            reason: e.to_string(),
        })?;

        // The signed host must equal the Host header reqwest sends.
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(h), Some(port)) => format!("{h}:{port}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(ClientError::InvalidEndpoint {
                    endpoint: raw,
                    reason: "no host".into(),
                })
            }
        };

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("djook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        tracing::info!(
            endpoint = %endpoint,
            region = %config.region,
            timeout_ms = config.timeout.as_millis() as u64,
            "rekognition client ready"
        );

        Ok(Self {
            http,
            endpoint,
            host,
            region: config.region,
            credentials: config.credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn compare_faces(
        &self,
        request: &ComparisonRequest,
    ) -> Result<Vec<FaceMatch>, RecognitionServiceError> {
        let body = encode_body(request)?;

        let signature = sigv4::sign(
            &self.credentials,
            &self.region,
            SERVICE,
            "POST",
            &self.host,
            self.endpoint.path(),
            &[
                ("content-type", CONTENT_TYPE_JSON),
                ("x-amz-target", TARGET_COMPARE_FACES),
            ],
            &body,
            chrono::Utc::now(),
        );

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header("x-amz-target", TARGET_COMPARE_FACES)
            .header("x-amz-date", &signature.amz_date)
            .header(AUTHORIZATION, &signature.authorization);
        if let Some(token) = &signature.security_token {
            builder = builder.header("x-amz-security-token", token);
        }

        let started = Instant::now();
        let response = builder.body(body).send().await.map_err(transport_error)?;
        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let payload = response.bytes().await.map_err(transport_error)?;

        tracing::debug!(
            status = status.as_u16(),
            len = payload.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "CompareFaces response"
        );

        if !status.is_success() {
            let parsed: ServiceError = serde_json::from_slice(&payload).unwrap_or_default();
            let code = parsed
                .code()
                .map(str::to_string)
                .or(error_type)
                .unwrap_or_else(|| "UnknownError".to_string());
            return Err(RecognitionServiceError::Rejected {
                status: status.as_u16(),
                code,
                message: parsed
                    .message
                    .unwrap_or_else(|| String::from_utf8_lossy(&payload).into_owned()),
            });
        }

        let parsed: CompareFacesResponse = serde_json::from_slice(&payload)
            .map_err(|e| RecognitionServiceError::MalformedResponse(e.to_string()))?;
        let unmatched = parsed.unmatched_faces.len();
        let matches = parsed
            .into_matches()
            .map_err(RecognitionServiceError::MalformedResponse)?;

        tracing::debug!(matched = matches.len(), unmatched, "CompareFaces parsed");
        Ok(matches)
    }
}

#[async_trait]
impl FaceComparer for RekognitionClient {
    async fn compare(
        &self,
        request: ComparisonRequest,
    ) -> Result<Vec<FaceMatch>, RecognitionServiceError> {
        self.compare_faces(&request).await
    }
}

/// Serialize the CompareFaces body. Fails before anything is sent.
fn encode_body(request: &ComparisonRequest) -> Result<Vec<u8>, RecognitionServiceError> {
    serde_json::to_vec(&CompareFacesRequest::from(request))
        .map_err(|e| RecognitionServiceError::InvalidRequest(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> RecognitionServiceError {
    if e.is_timeout() {
        RecognitionServiceError::Timeout
    } else {
        RecognitionServiceError::Unreachable(e.to_string())
    }
}
