//! Error taxonomy shared by members and the federation layer
//!
//! Every call against a member repository either returns a value or fails with
//! exactly one [`CohortError`]. The federation layer captures these per member
//! and later chooses a single error to surface; that choice is driven by
//! [`ErrorKind`], the fieldless discriminant of each variant.
//!
//! We use `thiserror` for the `Display` and `Error` implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for cohort operations
pub type CohortResult<T> = std::result::Result<T, CohortError>;

/// Errors raised by a member repository or synthesized by the federation layer.
///
/// # Categories
///
/// | Category | Variants |
/// |----------|----------|
/// | Input | `InvalidParameter`, `PropertyError`, `StatusNotSupported`, `PagingError` |
/// | Types | `TypeDefNotKnown`, `TypeDefConflict`, `InvalidTypeDef`, `TypeDefNotSupported` |
/// | Entities | `EntityNotKnown`, `EntityProxyOnly`, `EntityNotDeleted`, `EntityConflict`, `ClassificationError` |
/// | Relationships | `RelationshipNotKnown`, `RelationshipNotDeleted`, `RelationshipConflict` |
/// | Member | `FunctionNotSupported`, `RepositoryError`, `UserNotAuthorized`, `Unclassified` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CohortError {
    // ==================== Input ====================
    /// A parameter was missing or malformed
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// Properties do not match the instance's type definition
    #[error("property error: {reason}")]
    PropertyError { reason: String },

    /// The requested instance status is not valid for the type
    #[error("status not supported: {reason}")]
    StatusNotSupported { reason: String },

    /// Paging or sequencing parameters are not usable
    #[error("paging error: {reason}")]
    PagingError { reason: String },

    // ==================== Types ====================
    /// The type definition is not known to the member
    #[error("type definition not known: {reason}")]
    TypeDefNotKnown { reason: String },

    /// Two definitions claim the same identity with different content
    #[error("type definition conflict: {reason}")]
    TypeDefConflict { reason: String },

    /// The type definition is malformed
    #[error("invalid type definition: {reason}")]
    InvalidTypeDef { reason: String },

    /// The member cannot store instances of this type
    #[error("type definition not supported: {reason}")]
    TypeDefNotSupported { reason: String },

    // ==================== Entities ====================
    /// The entity is not known to the member
    #[error("entity not known: {guid}")]
    EntityNotKnown { guid: String },

    /// The member only holds a proxy for the entity
    #[error("entity proxy only: {guid}")]
    EntityProxyOnly { guid: String },

    /// Restore or purge was attempted on an entity that is not soft-deleted
    #[error("entity not deleted: {guid}")]
    EntityNotDeleted { guid: String },

    /// The entity clashes with an existing instance
    #[error("entity conflict: {reason}")]
    EntityConflict { reason: String },

    /// A classification cannot be applied or removed
    #[error("classification error: {reason}")]
    ClassificationError { reason: String },

    // ==================== Relationships ====================
    /// The relationship is not known to the member
    #[error("relationship not known: {guid}")]
    RelationshipNotKnown { guid: String },

    /// Restore or purge was attempted on a relationship that is not soft-deleted
    #[error("relationship not deleted: {guid}")]
    RelationshipNotDeleted { guid: String },

    /// The relationship clashes with an existing instance
    #[error("relationship conflict: {reason}")]
    RelationshipConflict { reason: String },

    // ==================== Member ====================
    /// The member does not implement the operation
    #[error("function not supported: {operation}")]
    FunctionNotSupported { operation: String },

    /// The member is unreachable or failed internally
    #[error("repository error: {reason}")]
    RepositoryError { reason: String },

    /// The calling user may not perform the operation
    #[error("user not authorized: {user}")]
    UserNotAuthorized { user: String },

    /// Any other failure, tagged with the member and operation that raised it
    #[error("unclassified failure in {operation} on {repository}: {reason}")]
    Unclassified {
        repository: String,
        operation: String,
        reason: String,
    },
}

/// Fieldless discriminant of [`CohortError`], used to rank captured errors.
///
/// Declaration order is the fallback ordering for kinds a precedence table
/// does not list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidParameter,
    PropertyError,
    StatusNotSupported,
    PagingError,
    TypeDefNotKnown,
    TypeDefConflict,
    InvalidTypeDef,
    TypeDefNotSupported,
    EntityNotKnown,
    EntityProxyOnly,
    EntityNotDeleted,
    EntityConflict,
    ClassificationError,
    RelationshipNotKnown,
    RelationshipNotDeleted,
    RelationshipConflict,
    FunctionNotSupported,
    RepositoryError,
    UserNotAuthorized,
    Unclassified,
}

impl ErrorKind {
    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 20] = [
        ErrorKind::InvalidParameter,
        ErrorKind::PropertyError,
        ErrorKind::StatusNotSupported,
        ErrorKind::PagingError,
        ErrorKind::TypeDefNotKnown,
        ErrorKind::TypeDefConflict,
        ErrorKind::InvalidTypeDef,
        ErrorKind::TypeDefNotSupported,
        ErrorKind::EntityNotKnown,
        ErrorKind::EntityProxyOnly,
        ErrorKind::EntityNotDeleted,
        ErrorKind::EntityConflict,
        ErrorKind::ClassificationError,
        ErrorKind::RelationshipNotKnown,
        ErrorKind::RelationshipNotDeleted,
        ErrorKind::RelationshipConflict,
        ErrorKind::FunctionNotSupported,
        ErrorKind::RepositoryError,
        ErrorKind::UserNotAuthorized,
        ErrorKind::Unclassified,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl CohortError {
    /// The discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CohortError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            CohortError::PropertyError { .. } => ErrorKind::PropertyError,
            CohortError::StatusNotSupported { .. } => ErrorKind::StatusNotSupported,
            CohortError::PagingError { .. } => ErrorKind::PagingError,
            CohortError::TypeDefNotKnown { .. } => ErrorKind::TypeDefNotKnown,
            CohortError::TypeDefConflict { .. } => ErrorKind::TypeDefConflict,
            CohortError::InvalidTypeDef { .. } => ErrorKind::InvalidTypeDef,
            CohortError::TypeDefNotSupported { .. } => ErrorKind::TypeDefNotSupported,
            CohortError::EntityNotKnown { .. } => ErrorKind::EntityNotKnown,
            CohortError::EntityProxyOnly { .. } => ErrorKind::EntityProxyOnly,
            CohortError::EntityNotDeleted { .. } => ErrorKind::EntityNotDeleted,
            CohortError::EntityConflict { .. } => ErrorKind::EntityConflict,
            CohortError::ClassificationError { .. } => ErrorKind::ClassificationError,
            CohortError::RelationshipNotKnown { .. } => ErrorKind::RelationshipNotKnown,
            CohortError::RelationshipNotDeleted { .. } => ErrorKind::RelationshipNotDeleted,
            CohortError::RelationshipConflict { .. } => ErrorKind::RelationshipConflict,
            CohortError::FunctionNotSupported { .. } => ErrorKind::FunctionNotSupported,
            CohortError::RepositoryError { .. } => ErrorKind::RepositoryError,
            CohortError::UserNotAuthorized { .. } => ErrorKind::UserNotAuthorized,
            CohortError::Unclassified { .. } => ErrorKind::Unclassified,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        CohortError::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Create an entity-not-known error
    pub fn entity_not_known(guid: impl fmt::Display) -> Self {
        CohortError::EntityNotKnown {
            guid: guid.to_string(),
        }
    }

    /// Create an entity-proxy-only error
    pub fn entity_proxy_only(guid: impl fmt::Display) -> Self {
        CohortError::EntityProxyOnly {
            guid: guid.to_string(),
        }
    }

    /// Create a relationship-not-known error
    pub fn relationship_not_known(guid: impl fmt::Display) -> Self {
        CohortError::RelationshipNotKnown {
            guid: guid.to_string(),
        }
    }

    /// Create a function-not-supported error
    pub fn function_not_supported(operation: impl Into<String>) -> Self {
        CohortError::FunctionNotSupported {
            operation: operation.into(),
        }
    }

    /// Create a repository error
    pub fn repository_error(reason: impl Into<String>) -> Self {
        CohortError::RepositoryError {
            reason: reason.into(),
        }
    }

    /// Create a type-def-not-known error
    pub fn type_def_not_known(reason: impl Into<String>) -> Self {
        CohortError::TypeDefNotKnown {
            reason: reason.into(),
        }
    }

    /// Create an unclassified error with no member context yet
    pub fn unclassified(reason: impl Into<String>) -> Self {
        CohortError::Unclassified {
            repository: String::new(),
            operation: String::new(),
            reason: reason.into(),
        }
    }

    /// Attach the originating member and operation to an unclassified error.
    ///
    /// Other kinds are returned unchanged; their variant already says what
    /// went wrong.
    pub fn with_origin(self, repository: &str, operation: &str) -> Self {
        match self {
            CohortError::Unclassified { reason, .. } => CohortError::Unclassified {
                repository: repository.to_string(),
                operation: operation.to_string(),
                reason,
            },
            other => other,
        }
    }

    /// True for the "this member does not have it" kinds
    pub fn is_not_known(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EntityNotKnown | ErrorKind::RelationshipNotKnown
        )
    }
}
