//! Error types for field tree operations.

use thiserror::Error;

/// Result type alias for field tree operations.
pub type FieldResult<T> = Result<T, FieldError>;

/// Errors raised by mutating or looking up fields.
///
/// Every check runs before the corresponding mutation, so a returned error
/// means the tree was left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The same field instance appears twice in a list.
    #[error("field at index #{index} duplicates field at index #{duplicate_of} in {}", location(.parent_path, "list"))]
    DuplicateListMember {
        index: usize,
        duplicate_of: usize,
        parent_path: Option<String>,
    },

    /// A group already has a child with this name.
    #[error("duplicate child {name:?} in {}", location(.parent_path, "group"))]
    DuplicateChildName {
        name: String,
        parent_path: Option<String>,
    },

    /// A required path lookup did not resolve.
    #[error("field {path:?} not found in {}", location(.parent_path, "parent"))]
    FieldNotFound {
        path: String,
        parent_path: Option<String>,
    },

    /// A group has no child with this name.
    #[error("child {name:?} not found in {}", location(.parent_path, "group"))]
    ChildNameNotFound {
        name: String,
        parent_path: Option<String>,
    },

    /// A list value update addressed a child past the end of the list.
    #[error("index {index} out of bounds (len: {len}) in {}", location(.parent_path, "list"))]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        parent_path: Option<String>,
    },

    /// The proxy instance is already attached to the field.
    #[error("cannot attach proxy {proxy:?} twice")]
    DuplicateProxy { proxy: &'static str },

    /// The proxy instance is not attached to the field.
    #[error("proxy {proxy:?} not found")]
    ProxyNotFound { proxy: &'static str },

    /// The field already belongs to another list or group.
    #[error("field at {} already has a parent", location(.path, "root"))]
    AlreadyAttached { path: Option<String> },

    /// The field would become its own descendant.
    #[error("field cannot be attached inside its own subtree at {}", location(.path, "root"))]
    CyclicMembership { path: Option<String> },

    /// An update carried a value of the wrong shape for its key.
    #[error("expected {expected} for {key:?} at {}", location(.path, "root"))]
    TypeMismatch {
        key: String,
        expected: &'static str,
        path: Option<String>,
    },
}

fn location(path: &Option<String>, unnamed: &str) -> String {
    match path {
        Some(path) if !path.is_empty() => format!("{path:?}"),
        _ => format!("unnamed {unnamed}"),
    }
}

impl FieldError {
    #[inline]
    pub fn duplicate_child_name(name: impl Into<String>, parent_path: Option<String>) -> Self {
        FieldError::DuplicateChildName {
            name: name.into(),
            parent_path,
        }
    }

    #[inline]
    pub fn child_name_not_found(name: impl Into<String>, parent_path: Option<String>) -> Self {
        FieldError::ChildNameNotFound {
            name: name.into(),
            parent_path,
        }
    }

    #[inline]
    pub fn type_mismatch(key: &str, expected: &'static str, path: Option<String>) -> Self {
        FieldError::TypeMismatch {
            key: key.to_owned(),
            expected,
            path,
        }
    }
}
