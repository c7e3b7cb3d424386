//! Request identity extraction and the axum GraphQL handler
//!
//! Role checks happen upstream of this crate. The handler only carries the
//! caller's identity into the request so resolvers can attribute edits.

use async_graphql::{Context, ObjectType, Request, Response, Schema, SubscriptionType};
use axum::{extract::Extension, http::HeaderMap, Json};
use uuid::Uuid;

/// Identity of the caller, taken from the `x-user-id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub Uuid);

/// Extract the viewer from the x-user-id header
pub fn extract_viewer(headers: &HeaderMap) -> Option<Viewer> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(Viewer)
}

/// Standard GraphQL handler with viewer injection
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::post};
/// use tutor_graphql::auth::graphql_handler;
/// use tutor_graphql::schema::{MutationRoot, QueryRoot};
/// use async_graphql::EmptySubscription;
///
/// let app: Router = Router::new()
///     .route("/graphql", post(graphql_handler::<QueryRoot, MutationRoot, EmptySubscription>));
/// ```
pub async fn graphql_handler<Query, Mutation, Subscription>(
    Extension(schema): Extension<Schema<Query, Mutation, Subscription>>,
    headers: HeaderMap,
    req: Json<Request>,
) -> Json<Response>
where
    Query: ObjectType + 'static,
    Mutation: ObjectType + 'static,
    Subscription: SubscriptionType + 'static,
{
    let mut request = req.0;

    if let Some(viewer) = extract_viewer(&headers) {
        request = request.data(viewer);
    }

    Json(schema.execute(request).await)
}

/// Get the viewer from GraphQL context
pub fn get_viewer(ctx: &Context<'_>) -> Option<Viewer> {
    ctx.data_opt::<Viewer>().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_viewer() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_viewer(&headers), Some(Viewer(id)));
    }

    #[test]
    fn test_extract_viewer_ignores_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_viewer(&headers), None);
        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_viewer(&headers), None);
    }
}
