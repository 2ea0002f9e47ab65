//! On-disk layout of the span store.
//!
//! ```text
//! <root>/index.json
//! <root>/spans/<sha256(key)>/<offset>.<id>.span
//! <root>/spans/<sha256(key)>/<offset>.<id>.part    (in flight)
//! ```

use super::index::{Span, SpanId};
use crate::types::ResourceKey;
use std::path::{Path, PathBuf};

const SPANS_DIR: &str = "spans";
const INDEX_FILE: &str = "index.json";
const SPAN_EXT: &str = "span";
const PART_EXT: &str = "part";

/// Kind of file found under the spans directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanFileKind {
    Finished,
    InFlight,
}

/// Parsed span file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanFileName {
    pub offset: u64,
    pub id: SpanId,
    pub kind: SpanFileKind,
}

impl SpanFileName {
    pub fn parse(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        let kind = match ext {
            SPAN_EXT => SpanFileKind::Finished,
            PART_EXT => SpanFileKind::InFlight,
            _ => return None,
        };
        let (offset, id) = stem.split_once('.')?;
        Some(Self {
            offset: offset.parse().ok()?,
            id: id.parse().ok()?,
            kind,
        })
    }
}

/// Path scheme rooted at the cache directory.
#[derive(Debug, Clone)]
pub struct SpanLayout {
    root: PathBuf,
}

impl SpanLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spans_dir(&self) -> PathBuf {
        self.root.join(SPANS_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn key_dir(&self, key: &ResourceKey) -> PathBuf {
        self.spans_dir().join(key.storage_name())
    }

    pub fn span_path(&self, span: &Span) -> PathBuf {
        self.key_dir(&span.key)
            .join(format!("{}.{}.{}", span.offset, span.id, SPAN_EXT))
    }

    pub fn part_path(&self, key: &ResourceKey, offset: u64, id: SpanId) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}.{}.{}", offset, id, PART_EXT))
    }
}
