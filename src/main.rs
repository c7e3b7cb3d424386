use std::sync::Arc;

use anyhow::Context;
use async_graphql::EmptySubscription;
use axum::{extract::Extension, routing::post, Router};
use tutor_graphql::config::TutorConfig;
use tutor_graphql::model::{Lesson, Session};
use tutor_graphql::schema::{build_schema, MutationRoot, QueryRoot, Stores};
use tutor_graphql::{graphql_handler, telemetry, MemoryCollection, Pager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TutorConfig::load().context("failed to load configuration")?;
    telemetry::init_tracing(&config.log.level)?;

    // In-process collections; a document-store backend plugs in through the same traits.
    let stores = Stores {
        sessions: Arc::new(MemoryCollection::<Session>::new()),
        lessons: Arc::new(MemoryCollection::<Lesson>::new()),
    };
    let schema = build_schema(stores, Pager::new(config.pagination));

    let app = Router::new()
        .route(
            &config.server.graphql_path,
            post(graphql_handler::<QueryRoot, MutationRoot, EmptySubscription>),
        )
        .layer(Extension(schema));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(
        addr = %config.server.bind_addr,
        path = %config.server.graphql_path,
        max_limit = config.pagination.max_limit,
        "graphql server listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
