use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use banter_api::middleware::require_auth;
use banter_api::state::{AppState, AppStateInner};
use banter_api::{chats, messages, users};
use banter_gateway::{Fanout, SubscriptionRegistry, connection};

#[derive(Clone)]
struct ServerState {
    db: Arc<banter_db::Database>,
    registry: SubscriptionRegistry,
    fanout: Fanout,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("BANTER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("BANTER_DB_PATH").unwrap_or_else(|_| "banter.db".into());
    let host = std::env::var("BANTER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BANTER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(banter_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = SubscriptionRegistry::new();
    let fanout = Fanout::new(registry.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        fanout: fanout.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        db,
        registry,
        fanout,
        jwt_secret,
    };

    // Routes
    let protected_routes = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/contacts", get(chats::list_contacts))
        .route("/chats/direct", post(chats::create_direct_chat))
        .route("/chats/group", post(chats::create_group_chat))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .route("/chats/{chat_id}/messages", get(messages::get_messages))
        .route("/chats/{chat_id}/messages", post(messages::send_message))
        .route("/users", get(users::list_users))
        .route("/users", put(users::update_profile))
        .route("/users/{id}", get(users::get_user))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Banter server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.registry,
            state.fanout,
            state.db,
            state.jwt_secret,
        )
    })
}
