//! djook-core — Person search over an external face-comparison service.
//!
//! Holds the fixed reference dataset, the [`FaceComparer`] seam to the
//! recognition service, and the [`PersonSearch`] orchestrator that fans a
//! target image out to one comparison per known person.

pub mod comparer;
pub mod dataset;
pub mod search;
pub mod types;

pub use comparer::{FaceComparer, RecognitionServiceError};
pub use dataset::{DatasetError, ReferenceDataset};
pub use search::{CancelToken, PersonSearch, SearchError, SearchOptions};
pub use types::{
    BoundingBox, ComparisonRequest, ComparisonResult, DecodeError, FaceMatch, ReferencePerson,
    SearchResult, TargetImage, DEFAULT_SIMILARITY_THRESHOLD,
};
