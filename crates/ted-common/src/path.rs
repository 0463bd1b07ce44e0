//! Hierarchical path codec.
//!
//! A path alternates collection names and document ids:
//! `<collection_1>/<doc_1>/<collection_2>/<doc_2>/.../<collection_n>[/<doc_n>]`.
//! Even positions are collections, odd positions are documents. A trailing unpaired
//! collection addresses the collection itself rather than one of its documents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Segment separator used by every path string.
pub const SEPARATOR: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: &'static str },

    #[error("Invalid path: {collections} collection(s) cannot address {documents} document(s)")]
    InvalidPath { collections: usize, documents: usize },
}

/// A validated path, split into its collection and document segments.
///
/// Always satisfies `documents.len() == collections.len()` (document address) or
/// `documents.len() + 1 == collections.len()` (collection address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath {
    collections: Vec<String>,
    documents: Vec<String>,
}

impl DocumentPath {
    /// Build a path from explicit segment lists, checking the length invariant.
    pub fn from_parts<C, D>(collections: C, documents: D) -> Result<Self, PathError>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let collections: Vec<String> = collections.into_iter().map(Into::into).collect();
        let documents: Vec<String> = documents.into_iter().map(Into::into).collect();

        let valid = documents.len() == collections.len()
            || documents.len() + 1 == collections.len();
        if !valid {
            return Err(PathError::InvalidPath {
                collections: collections.len(),
                documents: documents.len(),
            });
        }

        let path = Self { collections, documents };
        if path.collections.is_empty() {
            return Err(PathError::MalformedPath {
                path: String::new(),
                reason: "path is empty",
            });
        }
        for segment in path.collections.iter().chain(path.documents.iter()) {
            check_segment(segment, &path)?;
        }
        Ok(path)
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    /// True when the path ends on a document id rather than a collection name.
    pub fn is_document(&self) -> bool {
        self.documents.len() == self.collections.len()
    }

    /// The collection segments only, e.g. `users/42/posts/7` -> `users/posts`.
    ///
    /// This is the key projections are registered under.
    pub fn collection_path(&self) -> String {
        self.collections.join(&SEPARATOR.to_string())
    }

    /// The path that gets staged for projection.
    ///
    /// A document address is cut back to its parent collection (the trailing document id is
    /// dropped); a collection address is returned unchanged.
    pub fn staging_target(&self) -> DocumentPath {
        if self.is_document() {
            let mut documents = self.documents.clone();
            documents.pop();
            DocumentPath {
                collections: self.collections.clone(),
                documents,
            }
        } else {
            self.clone()
        }
    }
}

fn check_segment(segment: &str, path: &DocumentPath) -> Result<(), PathError> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment.contains(SEPARATOR) {
        "segment contains a separator"
    } else {
        return Ok(());
    };
    Err(PathError::MalformedPath {
        path: build(&path.collections, &path.documents),
        reason,
    })
}

/// Split a path string into its collection and document segments.
pub fn process(path: &str) -> Result<DocumentPath, PathError> {
    if path.is_empty() {
        return Err(PathError::MalformedPath {
            path: String::new(),
            reason: "path is empty",
        });
    }

    let mut collections = Vec::new();
    let mut documents = Vec::new();
    for (position, segment) in path.split(SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(PathError::MalformedPath {
                path: path.to_string(),
                reason: "empty segment",
            });
        }
        if position % 2 == 0 {
            collections.push(segment.to_string());
        } else {
            documents.push(segment.to_string());
        }
    }

    Ok(DocumentPath { collections, documents })
}

/// Interleave collections and documents back into a path string.
///
/// `documents` must not outnumber `collections`; surplus document ids are not representable
/// and are left out.
pub fn build<S: AsRef<str>>(collections: &[S], documents: &[S]) -> String {
    debug_assert!(documents.len() <= collections.len());

    let mut segments = Vec::with_capacity(collections.len() + documents.len());
    for (index, collection) in collections.iter().enumerate() {
        segments.push(collection.as_ref());
        if let Some(document) = documents.get(index) {
            segments.push(document.as_ref());
        }
    }
    segments.join(&SEPARATOR.to_string())
}

/// Collection segments of a raw path string, e.g. `users/42/posts` -> `users/posts`.
pub fn collection_path(path: &str) -> Result<String, PathError> {
    Ok(process(path)?.collection_path())
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&build(&self.collections, &self.documents))
    }
}

impl FromStr for DocumentPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        process(s)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        process(&value)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.to_string()
    }
}
