use std::net::SocketAddr;
use tokio::net::TcpListener;

use mindbridge_server::auth;
use mindbridge_server::config::{generate_config_template, Config};
use mindbridge_server::db;
use mindbridge_server::db::models::Role;
use mindbridge_server::routes;
use mindbridge_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;
    let realtime = config.realtime();

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token <user_id>:<role>: print a signed token and exit.
    // Runs before logging is set up so stdout carries only the token.
    if let Some(subject) = config.issue_token.as_deref() {
        let (user_id, role) = subject
            .rsplit_once(':')
            .ok_or("--issue-token expects <user_id>:<role>")?;
        let role: Role = role.parse()?;
        let token = auth::jwt::issue_access_token(&jwt_secret, user_id, role, realtime.access_token_ttl_secs)?;
        println!("{}", token);
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mindbridge_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("MindBridge server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    let app_state = AppState::new(db, jwt_secret, realtime);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
