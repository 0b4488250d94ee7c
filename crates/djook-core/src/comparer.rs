use crate::types::{ComparisonRequest, FaceMatch};
use async_trait::async_trait;
use thiserror::Error;

/// Failure of the external face-comparison capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognitionServiceError {
    #[error("recognition service unreachable: {0}")]
    Unreachable(String),
    #[error("recognition service timed out")]
    Timeout,
    #[error("recognition service rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error("failed to encode request: {0}")]
    InvalidRequest(String),
    #[error("malformed response from recognition service: {0}")]
    MalformedResponse(String),
}

/// Compares the face in a source image against the faces in a target image.
///
/// Implementations perform exactly one outbound call per invocation: no
/// retries, no caching. An empty `Vec` means no face in the target reached
/// `similarity_threshold`.
#[async_trait]
pub trait FaceComparer: Send + Sync {
    async fn compare(
        &self,
        request: ComparisonRequest,
    ) -> Result<Vec<FaceMatch>, RecognitionServiceError>;
}

