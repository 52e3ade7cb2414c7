mod args;
mod export;
mod handlers;
mod logging;
mod normalize;
mod quickbooks;
mod session;

use std::time::Duration;

use args::parse_args;
use axum::{Router, extract::FromRef, routing::get};
use axum_extra::extract::cookie::Key;
use handlers::{
    authorise, callback, dashboard, export_transactions_csv, export_transactions_excel,
    export_transactions_json, get_transactions, index, raw_entity, signout, sync, tokens,
};
use logging::setup_logging;
use quickbooks::api_base_url;

// Key and reqwest::Client are both cheap, reference-counted clones.
#[derive(Clone)]
pub struct AppState {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    api_base_url: &'static str,
    cookie_key: Key,
    http: reqwest::Client,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    setup_logging(&args.base_log_dir);

    let cookie_key = match Key::try_from(args.secret_key.as_bytes()) {
        Ok(key) => key,
        Err(err) => {
            tracing::error!(
                "SECRET_KEY must be at least 64 bytes, got {}: {}",
                args.secret_key.len(),
                err
            );
            std::process::exit(1);
        }
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.upstream_timeout))
        .build()
        .expect("Failed to build HTTP client");

    if args.sandbox {
        tracing::info!("Querying the QuickBooks sandbox company API");
    }

    let app_state = AppState {
        client_id: args.client_id,
        client_secret: args.client_secret,
        redirect_uri: args.redirect_uri,
        api_base_url: api_base_url(args.sandbox),
        cookie_key,
        http,
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/auth", get(authorise))
        .route("/callback", get(callback))
        .route("/dashboard", get(dashboard))
        .route("/signout", get(signout))
        .route("/tokens", get(tokens))
        .route("/api/sync", get(sync))
        .route("/api/transactions/pandas", get(get_transactions))
        .route(
            "/api/transactions/export/pandas",
            get(export_transactions_csv),
        )
        .route(
            "/api/transactions/export/json",
            get(export_transactions_json),
        )
        .route(
            "/api/transactions/export/excel",
            get(export_transactions_excel),
        )
        .route("/api/{entity}", get(raw_entity))
        .with_state(app_state);

    let bind_address = format! {"0.0.0.0:{}", args.port};
    tracing::info!("Server listening on {}...", bind_address);

    let listener = tokio::net::TcpListener::bind(bind_address).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
