//! Sort keys and direction
//!
//! Each paginated entity declares a closed set of sort keys. Anything else a
//! caller asks for is rejected at the boundary as `InvalidSortField`.

use std::fmt;

use crate::cursor::SortValue;

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    /// Resolve direction from the `sortDescending` / `sortAscending` flags
    ///
    /// Descending wins when either flag asks for it; ascending otherwise.
    pub fn from_flags(sort_descending: Option<bool>, sort_ascending: Option<bool>) -> Self {
        if sort_descending == Some(true) || sort_ascending == Some(false) {
            Direction::Descending
        } else {
            Direction::Ascending
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ascending => f.write_str("asc"),
            Direction::Descending => f.write_str("desc"),
        }
    }
}

/// A stored document addressable by a stable unique id
pub trait Document: Send + Sync + Sized + 'static {
    /// Entity name used in error messages and logs
    const ENTITY: &'static str;

    /// Closed set of keys this entity can be sorted by
    type Sort: SortField<Self>;

    /// Tiebreaker id
    fn id(&self) -> &str;
}

/// Permitted sort key for documents of type `T`
pub trait SortField<T: Document>: Copy + Send + Sync + fmt::Debug + 'static {
    /// Key used when the request names none
    fn primary() -> Self;

    /// Parse a caller supplied field name
    ///
    /// Returns `None` for anything outside the allowlist.
    fn parse(name: &str) -> Option<Self>;

    /// Document field name
    fn name(&self) -> &'static str;

    /// Whether this key is the document id itself
    fn is_primary(&self) -> bool;

    /// Sort value of `node` under this key
    fn value_of(&self, node: &T) -> SortValue;

    /// Whether a cursor value has the kind this key produces
    ///
    /// `Null` is always accepted since documents may lack the field.
    fn accepts(&self, value: &SortValue) -> bool;

    /// Parse with the primary key as fallback for an absent name
    fn resolve(name: Option<&str>) -> crate::Result<Self> {
        match name {
            None => Ok(Self::primary()),
            Some(name) => Self::parse(name).ok_or_else(|| crate::TutorError::InvalidSortField {
                entity: T::ENTITY,
                field: name.to_string(),
            }),
        }
    }
}
