//! GraphQL schema: connection queries and grading mutations
//!
//! Resolvers are thin. Paging goes through [`Pager`], scoring through
//! [`crate::scoring`], and every core error becomes a field error carrying a
//! `code` extension so sibling fields still resolve.

use std::sync::Arc;

use async_graphql::{Context, EmptySubscription, ErrorExtensions, Object, Schema};
use chrono::Utc;

use crate::auth::{get_viewer, Viewer};
use crate::model::{Lesson, Session};
use crate::pagination::{Connection, PageInput, PageRequest, Pager};
use crate::scoring::{ExpectationScore, Grade, GradeField, GradeUpdate, Response};
use crate::store::{DocumentStore, SessionStore};
use crate::TutorError;

pub type TutorSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Storage handles shared by all resolvers
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub lessons: Arc<dyn DocumentStore<Lesson>>,
}

pub fn build_schema(stores: Stores, pager: Pager) -> TutorSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(stores)
        .data(pager)
        .finish()
}

fn field_error(err: TutorError) -> async_graphql::Error {
    tracing::warn!(code = err.code(), error = %err, "request rejected");
    err.extend()
}

async fn load_session(stores: &Stores, session_id: &str) -> crate::Result<Session> {
    stores
        .sessions
        .get(session_id)
        .await?
        .filter(|s| !s.deleted)
        .ok_or_else(|| TutorError::NotFound {
            kind: "session",
            id: session_id.to_string(),
        })
}

/// Restrict a caller's request to documents that are not soft-deleted
///
/// The `deleted` flag is owned by the server, so callers may not filter on it.
fn visible_only(page: Option<PageInput>) -> crate::Result<PageRequest> {
    let mut request = page.unwrap_or_default().into_request()?;
    if request.filter.contains("deleted") {
        return Err(TutorError::InvalidFilter(
            "'deleted' cannot be filtered on; deleted documents are never listed".to_string(),
        ));
    }
    request.filter = request.filter.not_equals("deleted", true);
    Ok(request)
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Sessions, excluding soft-deleted ones
    ///
    /// Null when paging fails; the error is reported on this field only.
    async fn sessions(
        &self,
        ctx: &Context<'_>,
        page: Option<PageInput>,
    ) -> async_graphql::Result<Option<Connection<Session>>> {
        let stores = ctx.data::<Stores>()?;
        let pager = ctx.data::<Pager>()?;
        let request = visible_only(page).map_err(field_error)?;
        pager
            .paginate(stores.sessions.as_ref(), request)
            .await
            .map(Some)
            .map_err(field_error)
    }

    /// Lessons, excluding soft-deleted ones
    async fn lessons(
        &self,
        ctx: &Context<'_>,
        page: Option<PageInput>,
    ) -> async_graphql::Result<Option<Connection<Lesson>>> {
        let stores = ctx.data::<Stores>()?;
        let pager = ctx.data::<Pager>()?;
        let request = visible_only(page).map_err(field_error)?;
        pager
            .paginate(stores.lessons.as_ref(), request)
            .await
            .map(Some)
            .map_err(field_error)
    }

    async fn session(
        &self,
        ctx: &Context<'_>,
        session_id: String,
    ) -> async_graphql::Result<Option<Session>> {
        let stores = ctx.data::<Stores>()?;
        match load_session(stores, &session_id).await {
            Ok(session) => Ok(Some(session)),
            Err(TutorError::NotFound { .. }) => Ok(None),
            Err(err) => Err(field_error(err)),
        }
    }
}

pub struct MutationRoot;

impl MutationRoot {
    async fn edit_leaf(
        stores: &Stores,
        viewer: Option<Viewer>,
        session_id: &str,
        response_id: &str,
        expectation_id: &str,
        update: GradeUpdate,
    ) -> crate::Result<Session> {
        let (session, outcome) = stores
            .sessions
            .update_leaf(session_id, response_id, expectation_id, update, Utc::now())
            .await?;

        tracing::info!(
            session_id,
            response_id,
            expectation_id,
            viewer = ?viewer,
            leaf = ?outcome.leaf,
            grader_grade = ?session.grader_grade,
            "expectation score updated"
        );
        Ok(session)
    }
}

#[Object]
impl MutationRoot {
    /// Set or clear one expectation grade and persist the recomputed score
    async fn set_grade(
        &self,
        ctx: &Context<'_>,
        session_id: String,
        response_id: String,
        expectation_id: String,
        grade: Option<Grade>,
        grade_field: Option<GradeField>,
    ) -> async_graphql::Result<Session> {
        let update = GradeUpdate::Grade {
            field: grade_field.unwrap_or_default(),
            grade,
        };
        let stores = ctx.data::<Stores>()?;
        Self::edit_leaf(stores, get_viewer(ctx), &session_id, &response_id, &expectation_id, update)
            .await
            .map_err(field_error)
    }

    /// Flag or unflag one expectation score as excluded from scoring
    async fn set_invalidated(
        &self,
        ctx: &Context<'_>,
        session_id: String,
        response_id: String,
        expectation_id: String,
        invalidated: bool,
    ) -> async_graphql::Result<Session> {
        let update = GradeUpdate::Invalidated(invalidated);
        let stores = ctx.data::<Stores>()?;
        Self::edit_leaf(stores, get_viewer(ctx), &session_id, &response_id, &expectation_id, update)
            .await
            .map_err(field_error)
    }

    /// Record a user response, creating the session on first use
    ///
    /// Each expectation starts ungraded. Re-recording a response id replaces
    /// it in place. A deleted session is not reopened, and an existing
    /// session keeps the lesson it was opened for.
    async fn record_response(
        &self,
        ctx: &Context<'_>,
        session_id: String,
        lesson_id: String,
        username: Option<String>,
        response_id: String,
        text: String,
        expectation_ids: Vec<String>,
    ) -> async_graphql::Result<Session> {
        let stores = ctx.data::<Stores>()?;
        let response = expectation_ids
            .into_iter()
            .fold(Response::new(&response_id, text), |response, id| {
                response.with_score(ExpectationScore::new(id))
            });
        let session = stores
            .sessions
            .record_response(&session_id, &lesson_id, username, response, Utc::now())
            .await
            .map_err(field_error)?;
        tracing::info!(%session_id, %response_id, viewer = ?get_viewer(ctx), "response recorded");
        Ok(session)
    }

    /// Soft-delete a session; returns whether one was deleted
    async fn delete_session(&self, ctx: &Context<'_>, session_id: String) -> async_graphql::Result<bool> {
        let stores = ctx.data::<Stores>()?;
        match stores.sessions.soft_delete(&session_id, Utc::now()).await {
            Ok(_) => {}
            Err(TutorError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(field_error(err)),
        }
        tracing::info!(%session_id, viewer = ?get_viewer(ctx), "session deleted");
        Ok(true)
    }
}
