//! Immutable documents: a metadata stack plus content.
//!
//! A [`Document`] is a cheap handle (`Arc`) around a snapshot that is never
//! mutated. "Changing" a document means [`Document::clone_with`], which
//! pushes a metadata layer on a copy of the stack and optionally swaps the
//! content, producing a new document that keeps the original's
//! [`DocumentId`]. That id marks the *lineage*: every clone of a document
//! shares it, so modules can recognise "the same logical page" after it has
//! been re-emitted with new metadata.
//!
//! Modules never construct documents directly; new lineages start in the
//! [`ExecutionContext`](crate::context::ExecutionContext) factory, which
//! layers the engine's global metadata underneath.
//!
//! # Content and resource ownership
//!
//! [`Content`] is either empty, buffered text, or a seekable byte stream.
//! Streams live behind an `Arc`, so content is shared by reference between a
//! document and its clones. An *owned* stream ([`Content::stream`]) is
//! dropped, and its handle closed, when the last document referencing it
//! is released. A *shared* stream ([`Content::shared_stream`]) stays open for
//! as long as the caller keeps its own handle.

use crate::metadata::{MetaValue, Metadata, MetadataError, MetadataItem};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Lineage token shared by a document and all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DocumentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A seekable byte source usable as document content.
pub trait ContentStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ContentStream for T {}

/// A stream handle that can be shared between documents and their owner.
pub type SharedStream = Arc<Mutex<dyn ContentStream>>;

/// Document content payload.
#[derive(Clone, Default)]
pub enum Content {
    #[default]
    Empty,
    Text(Arc<str>),
    Stream(SharedStream),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(Arc::from(text.into()))
    }

    /// Take ownership of `stream`; it is closed once no document uses it.
    pub fn stream(stream: impl ContentStream + 'static) -> Self {
        Content::Stream(Arc::new(Mutex::new(stream)))
    }

    /// Borrow a caller-owned stream; the caller's handle keeps it open.
    pub fn shared_stream(stream: SharedStream) -> Self {
        Content::Stream(stream)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Content::Empty)
    }

    /// Read the full content from the start.
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        match self {
            Content::Empty => Ok(Vec::new()),
            Content::Text(text) => Ok(text.as_bytes().to_vec()),
            Content::Stream(stream) => {
                let mut guard = stream.lock().unwrap_or_else(PoisonError::into_inner);
                guard.seek(SeekFrom::Start(0))?;
                let mut bytes = Vec::new();
                guard.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }

    /// Read the full content as UTF-8 (lossy for streams).
    pub fn read_string(&self) -> io::Result<String> {
        match self {
            Content::Text(text) => Ok(text.to_string()),
            other => Ok(String::from_utf8_lossy(&other.read_bytes()?).into_owned()),
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => f.write_str("Empty"),
            Content::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Content::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

struct DocumentInner {
    id: DocumentId,
    source: Option<String>,
    metadata: Metadata,
    content: Content,
}

/// An immutable metadata + content snapshot.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Start a new lineage. Only the execution context and the engine call this.
    pub(crate) fn new(source: Option<String>, metadata: Metadata, content: Content) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                id: DocumentId::next(),
                source,
                metadata,
                content,
            }),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.inner.id
    }

    /// Logical source path, if the document came from somewhere.
    pub fn source(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn content(&self) -> &Content {
        &self.inner.content
    }

    pub fn content_string(&self) -> Result<String, DocumentError> {
        Ok(self.inner.content.read_string()?)
    }

    pub fn content_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(self.inner.content.read_bytes()?)
    }

    pub fn get(&self, key: &str) -> Result<Value, MetadataError> {
        self.inner.metadata.get(key)
    }

    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.inner.metadata.try_get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.metadata.get_string(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.inner.metadata.get_bool(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.inner.metadata.get_i64(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.inner.metadata.get_f64(key)
    }

    pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        self.inner.metadata.get_list(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.metadata.get_as(key)
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.inner.metadata.get_or(key, default)
    }

    /// Derive a new document in the same lineage.
    ///
    /// The metadata stack gains one layer holding `items`. `content` replaces
    /// the content when given; otherwise it is shared with `self`.
    pub fn clone_with<I, K>(&self, content: Option<Content>, items: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        Ok(Self {
            inner: Arc::new(DocumentInner {
                id: self.inner.id,
                source: self.inner.source.clone(),
                metadata: self.inner.metadata.clone_with(items)?,
                content: content.unwrap_or_else(|| self.inner.content.clone()),
            }),
        })
    }

    pub fn clone_with_items<I, K>(&self, items: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (K, MetaValue)>,
        K: Into<String>,
    {
        self.clone_with(None, items)
    }

    /// Swap the content; the metadata stack still gains one (empty) layer.
    pub fn clone_with_content(&self, content: Content) -> Result<Self, MetadataError> {
        self.clone_with(Some(content), Vec::<MetadataItem>::new())
    }

    /// Whether `other` descends from the same original document.
    pub fn same_lineage(&self, other: &Document) -> bool {
        self.inner.id == other.inner.id
    }

    /// Whether both handles point at the very same snapshot.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// SHA-256 over the source path and content, as a hex string.
    ///
    /// Used as the content-derived cache key: unchanged inputs map to the
    /// same key across engine runs.
    pub fn fingerprint(&self) -> Result<String, DocumentError> {
        let mut hasher = Sha256::new();
        match self.source() {
            Some(source) => {
                hasher.update(b"\x01");
                hasher.update(source.as_bytes());
            }
            None => hasher.update(b"\x00"),
        }
        hasher.update(b"\0");
        hasher.update(self.content_bytes()?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("content", &self.inner.content)
            .field("metadata", &self.inner.metadata)
            .finish()
    }
}
