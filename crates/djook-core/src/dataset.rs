//! Reference dataset: the fixed catalog of known persons.
//!
//! Loaded once at startup from a TOML manifest:
//!
//! ```toml
//! [[person]]
//! name = "Angel"
//! image = "angel.json"
//! ```
//!
//! Image paths are relative to the manifest. A `.json` image is the legacy
//! wrapper `{"image": "<base64>"}`; anything else is read as raw JPEG/PNG.
//! Any failure aborts the whole load; there is no partially loaded dataset.

use crate::types::{decode_base64, sniff_image, DecodeError, ReferencePerson};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad dataset manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("bad image wrapper {path}: {source}")]
    ImageWrapper {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("person #{0} has an empty name")]
    EmptyName(usize),
    #[error("person {0:?} is listed more than once")]
    DuplicateName(String),
    #[error("reference image for {name:?} is invalid: {source}")]
    Image { name: String, source: DecodeError },
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "person", default)]
    persons: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    image: PathBuf,
}

/// `{"image": "<base64>"}`
#[derive(Debug, Deserialize)]
struct ImageWrapper {
    image: String,
}

/// Immutable list of reference persons, iterated in manifest order.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDataset {
    persons: Vec<ReferencePerson>,
}

impl ReferenceDataset {
    /// Load every person listed in the manifest at `manifest_path`.
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let manifest_path = manifest_path.as_ref();
        let text = std::fs::read_to_string(manifest_path).map_err(|source| DatasetError::Io {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = toml::from_str(&text).map_err(|source| DatasetError::Manifest {
            path: manifest_path.to_path_buf(),
            source,
        })?;

        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let mut persons = Vec::with_capacity(manifest.persons.len());
        for entry in manifest.persons {
            let path = base.join(&entry.image);
            let image = read_image_file(&path)?;
            tracing::debug!(name = %entry.name, path = %path.display(), len = image.len(), "reference image read");
            persons.push(ReferencePerson {
                name: entry.name,
                image,
            });
        }

        let dataset = Self::from_persons(persons)?;
        tracing::info!(
            path = %manifest_path.display(),
            persons = dataset.len(),
            "reference dataset loaded"
        );
        Ok(dataset)
    }

    /// Build a dataset from already-loaded persons, enforcing the same
    /// invariants as [`load`](Self::load).
    pub fn from_persons(persons: Vec<ReferencePerson>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for (i, person) in persons.iter().enumerate() {
            if person.name.trim().is_empty() {
                return Err(DatasetError::EmptyName(i));
            }
            if !seen.insert(person.name.as_str()) {
                return Err(DatasetError::DuplicateName(person.name.clone()));
            }
            sniff_image(&person.image).map_err(|source| DatasetError::Image {
                name: person.name.clone(),
                source,
            })?;
        }
        Ok(Self { persons })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReferencePerson> {
        self.persons.iter()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ReferencePerson> {
        self.persons.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.persons.iter().map(|p| p.name.as_str())
    }
}

impl<'a> IntoIterator for &'a ReferenceDataset {
    type Item = &'a ReferencePerson;
    type IntoIter = std::slice::Iter<'a, ReferencePerson>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn read_image_file(path: &Path) -> Result<Bytes, DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };

    let is_wrapper = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if !is_wrapper {
        return std::fs::read(path).map(Bytes::from).map_err(io_err);
    }

    let text = std::fs::read_to_string(path).map_err(io_err)?;
    let wrapper: ImageWrapper =
        serde_json::from_str(&text).map_err(|source| DatasetError::ImageWrapper {
            path: path.to_path_buf(),
            source,
        })?;
    // Name is not known here; the caller attaches it on validation.
    let bytes = decode_base64(&wrapper.image).map_err(|source| DatasetError::Image {
        name: path.display().to_string(),
        source,
    })?;
    Ok(Bytes::from(bytes))
}
