use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::Bytes;
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Minimum similarity (0–100) for two faces to count as the same person.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 90.0;

/// Standard alphabet, padding optional. Browsers and mobile clients are
/// inconsistent about trailing `=`.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image payload is not a recognizable image")]
    Unrecognized,
    #[error("unsupported image format {0:?} (expected JPEG or PNG)")]
    UnsupportedFormat(ImageFormat),
    #[error("image header is corrupt: {0}")]
    Corrupt(String),
}

/// Check that `bytes` hold a JPEG or PNG whose header decodes.
///
/// Only the header is parsed; pixel data is left to the recognition
/// service. Returns the detected format and dimensions.
pub fn sniff_image(bytes: &[u8]) -> Result<(ImageFormat, u32, u32), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let format = reader.format().ok_or(DecodeError::Unrecognized)?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(DecodeError::UnsupportedFormat(format));
    }

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    Ok((format, width, height))
}

/// Decode a base64 string, tolerating a `data:<mime>;base64,` prefix and
/// surrounding whitespace.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = encoded.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => trimmed,
    };

    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(LENIENT_BASE64.decode(payload)?)
}

/// A known individual with the reference photo used as comparison source.
#[derive(Debug, Clone)]
pub struct ReferencePerson {
    pub name: String,
    pub image: Bytes,
}

/// The inbound photo checked against every reference person.
///
/// Can only be built from a validated payload, so the orchestrator never
/// sees undecodable bytes.
#[derive(Debug, Clone)]
pub struct TargetImage {
    bytes: Bytes,
    format: ImageFormat,
}

impl TargetImage {
    /// Decode and validate a base64-encoded JPEG/PNG.
    pub fn from_base64(encoded: &str) -> Result<Self, DecodeError> {
        Self::from_bytes(decode_base64(encoded)?)
    }

    /// Validate raw JPEG/PNG bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        let (format, width, height) = sniff_image(&bytes)?;
        tracing::debug!(?format, width, height, len = bytes.len(), "target image decoded");
        Ok(Self { bytes, format })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Face location as ratios of the image width/height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// One face in the target image that matched the source face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Similarity in [0, 100].
    pub similarity: f32,
    /// Service confidence that the region is a face, if reported.
    pub confidence: Option<f32>,
    pub bounding_box: Option<BoundingBox>,
}

/// A single source-vs-target comparison.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub source_image: Bytes,
    pub target_image: Bytes,
    pub similarity_threshold: f32,
}

/// Outcome of comparing one reference person against the target.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub person_name: String,
    pub matches: Vec<FaceMatch>,
}

impl ComparisonResult {
    /// A person is present iff the service reported at least one match.
    pub fn is_match(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Highest similarity among the matches, if any.
    pub fn best_similarity(&self) -> Option<f32> {
        self.matches
            .iter()
            .map(|m| m.similarity)
            .fold(None, |best, s| Some(best.map_or(s, |b: f32| b.max(s))))
    }
}

/// Names of the reference persons found in the target, in dataset order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchResult {
    names: Vec<String>,
}

impl SearchResult {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
