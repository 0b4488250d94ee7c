//! CompareFaces request/response bodies (AWS JSON 1.1, PascalCase).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use djook_core::{BoundingBox, ComparisonRequest, FaceMatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CompareFacesRequest {
    pub source_image: Image,
    pub target_image: Image,
    pub similarity_threshold: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Image {
    /// Base64 of the raw image bytes.
    pub bytes: String,
}

impl From<&ComparisonRequest> for CompareFacesRequest {
    fn from(req: &ComparisonRequest) -> Self {
        Self {
            source_image: Image {
                bytes: STANDARD.encode(&req.source_image),
            },
            target_image: Image {
                bytes: STANDARD.encode(&req.target_image),
            },
            similarity_threshold: req.similarity_threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CompareFacesResponse {
    #[serde(default)]
    pub face_matches: Vec<CompareFacesMatch>,
    #[serde(default)]
    pub unmatched_faces: Vec<ComparedFace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CompareFacesMatch {
    pub similarity: Option<f32>,
    pub face: Option<ComparedFace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ComparedFace {
    pub bounding_box: Option<WireBoundingBox>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireBoundingBox {
    pub left: Option<f32>,
    pub top: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
}

impl CompareFacesResponse {
    /// Convert matches, rejecting any without a similarity score.
    pub fn into_matches(self) -> Result<Vec<FaceMatch>, String> {
        self.face_matches
            .into_iter()
            .enumerate()
            .map(|(i, m)| {
                let similarity = m
                    .similarity
                    .ok_or_else(|| format!("FaceMatches[{i}] has no Similarity"))?;
                let (confidence, bounding_box) = match m.face {
                    Some(face) => (face.confidence, face.bounding_box.and_then(to_bounding_box)),
                    None => (None, None),
                };
                Ok(FaceMatch {
                    similarity,
                    confidence,
                    bounding_box,
                })
            })
            .collect()
    }
}

fn to_bounding_box(b: WireBoundingBox) -> Option<BoundingBox> {
    Some(BoundingBox {
        left: b.left?,
        top: b.top?,
        width: b.width?,
        height: b.height?,
    })
}

/// Error body: `{"__type": "...#Code", "message": "..."}`. Some services
/// capitalise `Message`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServiceError {
    #[serde(rename = "__type")]
    pub kind: Option<String>,
    #[serde(alias = "Message")]
    pub message: Option<String>,
}

impl ServiceError {
    /// Error code with any namespace prefix (`com.amazon...#`) removed.
    pub fn code(&self) -> Option<&str> {
        self.kind
            .as_deref()
            .map(|k| k.rsplit_once('#').map_or(k, |(_, code)| code))
    }
}
