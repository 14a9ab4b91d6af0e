//! Error kinds raised while parsing, building, navigating, or projecting a tree.
//!
//! Composite nodes never recover from a child failure. They only prepend the
//! failing child's key, so a message reads `outer->middle[3]->inner: Format: ...`.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Decoded bytes or in-memory values violate the grammar.
    #[error("Format: {0}")]
    Format(String),
    /// The source ran out of bytes or the sink refused a write.
    #[error("Stream: {0}")]
    Stream(#[from] io::Error),
    /// Unknown field name or index, or a walk past the root.
    #[error("Navigation: {0}")]
    Navigation(String),
    /// Character data could not be converted to or from its wire encoding.
    #[error("Encoding: {0}")]
    Encoding(String),
    /// Malformed document or a projection that does not match the grammar.
    #[error("XML: {0}")]
    Xml(String),
    /// An error annotated with the tree path that produced it.
    #[error("{path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Prepend a struct key to the error path.
    pub fn at(self, key: &str) -> Error {
        self.prepend(key.to_string())
    }

    /// Prepend a sequence index to the error path.
    pub fn at_index(self, index: usize) -> Error {
        self.prepend(format!("[{index}]"))
    }

    fn prepend(self, segment: String) -> Error {
        match self {
            Error::At { path, source } => {
                let path = if path.starts_with('[') {
                    format!("{segment}{path}")
                } else {
                    format!("{segment}->{path}")
                };
                Error::At { path, source }
            }
            other => Error::At {
                path: segment,
                source: Box::new(other),
            },
        }
    }

    /// The accumulated path, if any composite annotated this error.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::At { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The underlying error with every path annotation stripped.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::At { source, .. } = current {
            current = source;
        }
        current
    }
}
