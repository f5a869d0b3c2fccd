//! Error precedence tables
//!
//! When no member produced a usable result the accumulator surfaces exactly
//! one captured error. Which one is decided here: each operation family has an
//! ordered table of [`ErrorKind`]s, most specific first, and the captured
//! error with the lowest rank wins. Ties within a kind go to the smallest
//! member id, so the outcome never depends on capture order.
//!
//! | Family | Used by |
//! |--------|---------|
//! | `RETRIEVAL` | get / is-known for one entity or relationship |
//! | `QUERY` | find-by-property, find-by-classification, relationships-for-entity, history |
//! | `MAINTENANCE` | add, update, classify, delete, restore, purge |
//! | `TYPE_MANAGEMENT` | type gallery, type lookups, type verification |

use cohort_core::{CohortError, ErrorKind};

/// Ordered ranking of error kinds for one operation family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecedenceTable {
    name: &'static str,
    order: &'static [ErrorKind],
}

impl PrecedenceTable {
    /// Fetching one instance
    pub const RETRIEVAL: PrecedenceTable = PrecedenceTable {
        name: "retrieval",
        order: &[
            ErrorKind::InvalidParameter,
            ErrorKind::EntityProxyOnly,
            ErrorKind::EntityNotKnown,
            ErrorKind::RelationshipNotKnown,
            ErrorKind::TypeDefNotKnown,
            ErrorKind::StatusNotSupported,
            ErrorKind::PagingError,
            ErrorKind::RepositoryError,
            ErrorKind::UserNotAuthorized,
            ErrorKind::FunctionNotSupported,
            ErrorKind::Unclassified,
        ],
    };

    /// Multi-contributor queries
    pub const QUERY: PrecedenceTable = PrecedenceTable {
        name: "query",
        order: &[
            ErrorKind::InvalidParameter,
            ErrorKind::TypeDefNotKnown,
            ErrorKind::TypeDefNotSupported,
            ErrorKind::PropertyError,
            ErrorKind::ClassificationError,
            ErrorKind::StatusNotSupported,
            ErrorKind::PagingError,
            ErrorKind::EntityNotKnown,
            ErrorKind::RepositoryError,
            ErrorKind::UserNotAuthorized,
            ErrorKind::FunctionNotSupported,
            ErrorKind::Unclassified,
        ],
    };

    /// Single-winner writes
    pub const MAINTENANCE: PrecedenceTable = PrecedenceTable {
        name: "maintenance",
        order: &[
            ErrorKind::InvalidParameter,
            ErrorKind::TypeDefNotKnown,
            ErrorKind::PropertyError,
            ErrorKind::ClassificationError,
            ErrorKind::StatusNotSupported,
            ErrorKind::EntityNotKnown,
            ErrorKind::EntityProxyOnly,
            ErrorKind::EntityNotDeleted,
            ErrorKind::EntityConflict,
            ErrorKind::RelationshipNotKnown,
            ErrorKind::RelationshipNotDeleted,
            ErrorKind::RelationshipConflict,
            ErrorKind::TypeDefNotSupported,
            ErrorKind::RepositoryError,
            ErrorKind::UserNotAuthorized,
            ErrorKind::FunctionNotSupported,
            ErrorKind::Unclassified,
        ],
    };

    /// Type gallery, lookups and verification
    pub const TYPE_MANAGEMENT: PrecedenceTable = PrecedenceTable {
        name: "type-management",
        order: &[
            ErrorKind::InvalidParameter,
            ErrorKind::TypeDefConflict,
            ErrorKind::InvalidTypeDef,
            ErrorKind::TypeDefNotKnown,
            ErrorKind::TypeDefNotSupported,
            ErrorKind::RepositoryError,
            ErrorKind::UserNotAuthorized,
            ErrorKind::FunctionNotSupported,
            ErrorKind::Unclassified,
        ],
    };

    /// Family name, for logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rank of a kind; lower surfaces first.
    ///
    /// Kinds the table does not list rank after every listed kind, in
    /// [`ErrorKind`] declaration order.
    pub fn rank(&self, kind: ErrorKind) -> usize {
        match self.order.iter().position(|k| *k == kind) {
            Some(position) => position,
            None => self.order.len() + kind as usize,
        }
    }

    /// Choose the error to surface from `(member, error)` pairs
    pub fn select<'a, I>(&self, captured: I) -> Option<&'a CohortError>
    where
        I: IntoIterator<Item = (&'a str, &'a CohortError)>,
    {
        captured
            .into_iter()
            .min_by(|(member_a, a), (member_b, b)| {
                self.rank(a.kind())
                    .cmp(&self.rank(b.kind()))
                    .then_with(|| member_a.cmp(member_b))
                    .then_with(|| a.to_string().cmp(&b.to_string()))
            })
            .map(|(_, error)| error)
    }
}
