//! djook-rekognition — AWS Rekognition `CompareFaces` as a [`FaceComparer`].
//!
//! Talks the AWS JSON 1.1 protocol directly over `reqwest`, signing each
//! request with SigV4.
//!
//! [`FaceComparer`]: djook_core::FaceComparer

pub mod client;
pub mod sigv4;
mod wire;

pub use client::{ClientError, RekognitionClient, RekognitionConfig, DEFAULT_REGION};
pub use sigv4::Credentials;
