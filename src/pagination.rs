//! Keyset cursor pagination
//!
//! Pages are resumed with a range predicate on `(sort value, id)` rather than
//! an offset, so inserts and deletes outside the returned range never shift
//! rows between pages.

use std::borrow::Cow;

use async_graphql::{InputObject, Json, Object, OutputType, SimpleObject, TypeName};
use serde_json::Value;

use crate::config::PaginationConfig;
use crate::cursor::Cursor;
use crate::sort::{Direction, Document, SortField};
use crate::store::{Filter, RangePredicate, Scan, ScanQuery};
use crate::TutorError;

/// Page information
#[derive(SimpleObject, Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// Edge in a connection
#[derive(Debug, Clone)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

impl<T: OutputType> TypeName for Edge<T> {
    fn type_name() -> Cow<'static, str> {
        format!("{}Edge", <T as OutputType>::type_name()).into()
    }
}

#[Object(name_type)]
impl<T: OutputType> Edge<T> {
    async fn cursor(&self) -> &str {
        &self.cursor
    }

    async fn node(&self) -> &T {
        &self.node
    }
}

/// Connection (paginated result)
#[derive(Debug, Clone)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T: OutputType> TypeName for Connection<T> {
    fn type_name() -> Cow<'static, str> {
        format!("{}Connection", <T as OutputType>::type_name()).into()
    }
}

#[Object(name_type)]
impl<T: OutputType> Connection<T> {
    async fn edges(&self) -> &[Edge<T>] {
        &self.edges
    }

    async fn page_info(&self) -> &PageInfo {
        &self.page_info
    }
}

impl<T> Connection<T> {
    /// Create new connection from edges already carrying their cursors
    pub fn new(edges: Vec<Edge<T>>, has_next: bool) -> Self {
        let start_cursor = edges.first().map(|e| e.cursor.clone());
        let end_cursor = edges.last().map(|e| e.cursor.clone());

        Self {
            edges,
            page_info: PageInfo {
                has_next_page: has_next,
                start_cursor,
                end_cursor,
            },
        }
    }

    /// Create empty connection
    pub fn empty() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Nodes in page order
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Request for one page of a connection
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Resume strictly after this position
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_descending: Option<bool>,
    pub sort_ascending: Option<bool>,
    pub filter: Filter,
}

impl PageRequest {
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.sort_descending = Some(descending);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Pagination input for GraphQL queries
#[derive(InputObject, Debug, Clone, Default)]
#[graphql(name = "PageInput")]
pub struct PageInput {
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,

    /// Page size
    pub limit: Option<i32>,

    pub sort_by: Option<String>,
    pub sort_descending: Option<bool>,
    pub sort_ascending: Option<bool>,

    /// Equality filter on document fields; `{"$ne": v}` negates
    ///
    /// `deleted` is reserved: soft-deleted documents are never listed.
    pub filter: Option<Json<Value>>,
}

impl PageInput {
    pub fn into_request(self) -> crate::Result<PageRequest> {
        let filter = match self.filter {
            Some(Json(value)) => Filter::from_json(value)?,
            None => Filter::default(),
        };
        Ok(PageRequest {
            cursor: self.cursor,
            limit: self.limit.map(i64::from),
            sort_by: self.sort_by,
            sort_descending: self.sort_descending,
            sort_ascending: self.sort_ascending,
            filter,
        })
    }
}

/// Builds connections from sorted range scans
#[derive(Debug, Clone, Copy, Default)]
pub struct Pager {
    config: PaginationConfig,
}

impl Pager {
    pub fn new(config: PaginationConfig) -> Self {
        Self { config }
    }

    /// Validate a requested page size
    ///
    /// Missing limits take the configured default. Limits outside
    /// `1..=max_limit` are rejected rather than clamped.
    pub fn resolve_limit(&self, limit: Option<i64>) -> crate::Result<usize> {
        let Some(limit) = limit else {
            return Ok(self.config.default_limit as usize);
        };
        if limit <= 0 || limit > i64::from(self.config.max_limit) {
            return Err(TutorError::LimitOutOfRange {
                limit,
                max: self.config.max_limit,
            });
        }
        Ok(limit as usize)
    }

    /// Fetch one page
    ///
    /// Issues a single scan for `limit + 1` rows; the extra row only decides
    /// `has_next_page` and is dropped.
    pub async fn paginate<T, E>(&self, executor: &E, request: PageRequest) -> crate::Result<Connection<T>>
    where
        T: Document,
        E: Scan<T> + ?Sized,
    {
        let sort = <T::Sort as SortField<T>>::resolve(request.sort_by.as_deref())?;
        let direction = Direction::from_flags(request.sort_descending, request.sort_ascending);
        let limit = self.resolve_limit(request.limit)?;

        let range = match request.cursor.as_deref() {
            Some(token) => Some(range_after::<T>(sort, direction, Cursor::decode(token)?)?),
            None => None,
        };

        let query = ScanQuery {
            filter: request.filter,
            sort,
            direction,
            range,
            limit: limit + 1,
        };
        let mut rows = executor.scan(&query).await?;

        let has_next = rows.len() > limit;
        rows.truncate(limit);

        tracing::debug!(
            entity = T::ENTITY,
            sort = sort.name(),
            %direction,
            limit,
            resumed = query.range.is_some(),
            returned = rows.len(),
            has_next,
            "fetched page"
        );

        let edges = rows
            .into_iter()
            .map(|node| Edge {
                cursor: cursor_for(sort, &node).encode(),
                node,
            })
            .collect();

        Ok(Connection::new(edges, has_next))
    }
}

/// Position of `node` under `sort`
fn cursor_for<T: Document>(sort: T::Sort, node: &T) -> Cursor {
    if sort.is_primary() {
        Cursor::simple(node.id())
    } else {
        Cursor::compound(sort.value_of(node), node.id())
    }
}

fn range_after<T: Document>(
    sort: T::Sort,
    direction: Direction,
    cursor: Cursor,
) -> crate::Result<RangePredicate> {
    if sort.is_primary() {
        return Ok(RangePredicate {
            value: None,
            id: cursor.id,
            direction,
        });
    }

    let value = cursor.sort_value.ok_or_else(|| {
        TutorError::MalformedCursor(format!(
            "cursor carries no sort value for '{}'",
            sort.name()
        ))
    })?;
    if !sort.accepts(&value) {
        return Err(TutorError::MalformedCursor(format!(
            "cursor holds a {} value but '{}' sorts by another kind",
            value.kind(),
            sort.name()
        )));
    }

    Ok(RangePredicate {
        value: Some(value),
        id: cursor.id,
        direction,
    })
}
