use crate::objects::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Read-only document: {0}")]
    ReadOnlyViolation(String),

    #[error("Element has bad type: {0}")]
    ElementBadType(String),

    #[error("Page not found at position {0}")]
    PageNotFound(usize),

    #[error("Ambiguous page tree: node position can't be determined")]
    AmbiguousPageTree,

    #[error("Malformed format: {0}")]
    MalformedFormat(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Document has no page tree root")]
    NoPageRoot,

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Page handle is invalidated or belongs to another document")]
    InvalidPage,

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Invalid revision: {0}")]
    InvalidRevision(usize),
}

pub type Result<T> = std::result::Result<T, PdfError>;

impl PdfError {
    /// Errors that stop a lookup but say nothing about the tree being broken.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PdfError::PageNotFound(_) | PdfError::NoPageRoot)
    }
}
