use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::admin::{broadcast, conversations as admin_conversations, members};
use crate::auth::middleware::JwtSecret;
use crate::chat::handlers as chat;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Identity extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on broadcasts: `broadcast_burst` requests per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let burst = state.realtime.broadcast_burst.max(1);
    let broadcast_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(u64::from((60 / burst).max(1)))
            .burst_size(burst)
            .finish()
            .expect("broadcast governor config with non-zero period and burst"),
    );
    let broadcast_limiter = broadcast_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            broadcast_limiter.retain_recent();
        }
    });

    let broadcast_routes = Router::new()
        .route(
            "/api/admin/broadcast",
            axum::routing::post(broadcast::broadcast),
        )
        .layer(GovernorLayer {
            config: broadcast_governor_config,
        });

    // Authenticated routes (JWT required, Identity extractor validates token)
    let conversation_routes = Router::new()
        .route("/api/conversations", axum::routing::get(chat::list_conversations))
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::get(chat::get_history),
        )
        .route(
            "/api/conversations/{id}/read",
            axum::routing::post(chat::mark_read),
        )
        .route("/api/messages", axum::routing::post(chat::send))
        .route(
            "/api/messages/{id}/delivered",
            axum::routing::post(chat::mark_delivered),
        );

    // Admin routes (handlers check the role)
    let admin_routes = Router::new()
        .route(
            "/api/admin/conversations/{id}/archive",
            axum::routing::post(admin_conversations::archive),
        )
        .route(
            "/api/admin/conversations/{id}/unarchive",
            axum::routing::post(admin_conversations::unarchive),
        )
        .route(
            "/api/admin/conversations/{id}",
            axum::routing::delete(admin_conversations::delete),
        )
        .route("/api/admin/members", axum::routing::put(members::upsert_members));

    // WebSocket endpoint (auth via query param or header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(broadcast_routes)
        .merge(conversation_routes)
        .merge(admin_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
