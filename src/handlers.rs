
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;
use uuid::Uuid;

use crate::{
    AppState,
    export,
    normalize::{self, NormalizedTransaction},
    quickbooks::{
        UpstreamError, build_authorization_url, count_entity, exchange_auth_code, query_entity,
        refresh_access_token,
    },
    session::{self, Credential},
};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "realmId")]
    pub realm_id: Option<String>,
}

#[derive(Debug)]
pub enum AppError {
    NotConnected,
    UnknownEntity(String),
    Upstream(UpstreamError),
    InternalServerError(String),
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        AppError::Upstream(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::NotConnected => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "Not connected to QuickBooks" }),
            ),
            AppError::UnknownEntity(slug) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("Unknown entity type: {}", slug) }),
            ),
            AppError::Upstream(UpstreamError::Api { status, body }) => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                serde_json::json!({ "error": "QuickBooks API request failed", "detail": body }),
            ),
            AppError::Upstream(UpstreamError::Http(err)) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": "QuickBooks API request failed", "detail": err.to_string() }),
            ),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", &msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Flash-message equivalent: redirect home carrying the message in the
/// query string for the landing page to render.
fn flash_redirect(param: &str, message: &str) -> Redirect {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(param, message)
        .finish();
    Redirect::to(&format!("/?{}", query))
}

#[derive(Debug, Deserialize)]
pub struct FlashParams {
    pub error: Option<String>,
    pub message: Option<String>,
}

/// The flash parameters come straight from the query string, so they
/// must never reach the page as markup.
fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub async fn index(Query(params): Query<FlashParams>) -> Html<String> {
    let flash = match (&params.error, &params.message) {
        (Some(error), _) => format!("<p class=\"error\">{}</p>", escape_html(error)),
        (None, Some(message)) => format!("<p class=\"message\">{}</p>", escape_html(message)),
        (None, None) => String::new(),
    };

    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>DataRift</title></head>\n<body>\n<h1>DataRift</h1>\n{}\n<p><a href=\"/auth\">Connect to QuickBooks</a></p>\n</body></html>",
        flash
    ))
}

pub async fn authorise(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let nonce = Uuid::new_v4().to_string();
    let auth_url = build_authorization_url(&state.client_id, &state.redirect_uri, &nonce);

    tracing::info!("Redirecting to {}", &auth_url);

    (jar.add(session::state_cookie(&nonce)), Redirect::to(&auth_url))
}

pub async fn callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> (PrivateCookieJar, Redirect) {
    let stored_nonce = session::stored_nonce(&jar);
    // The nonce is single-use; clear it whether or not the callback is valid.
    let jar = jar.add(session::clear_state_cookie());

    let validated = match session::validate_callback(
        params.code.as_deref(),
        params.state.as_deref(),
        params.realm_id.as_deref(),
        stored_nonce.as_deref(),
    ) {
        Ok(validated) => validated,
        Err(err) => {
            tracing::warn!("Rejecting authorization callback: {:?}", err);
            return (jar, flash_redirect("error", &err.to_string()));
        }
    };

    tracing::info!(
        "Received authorization code for realm_id={}",
        &validated.realm_id
    );

    let token_response = match exchange_auth_code(
        &state.http,
        &state.client_id,
        &state.client_secret,
        &state.redirect_uri,
        &validated.code,
    )
    .await
    {
        Ok(token_response) => token_response,
        Err(err) => {
            tracing::error!("Token exchange failed: {}", err);
            return (
                jar,
                flash_redirect("error", &format!("Error exchanging token: {}", err)),
            );
        }
    };

    let credential = Credential {
        access_token: token_response.access_token,
        refresh_token: token_response.refresh_token,
        company_id: validated.realm_id,
        expires_in: token_response.expires_in,
        x_refresh_token_expires_in: token_response.x_refresh_token_expires_in,
    };

    match session::credential_cookie(&credential) {
        Ok(cookie) => (jar.add(cookie), Redirect::to("/dashboard")),
        Err(err) => {
            tracing::error!("Failed to serialise credential cookie: {}", err);
            (
                jar,
                flash_redirect("error", "Error storing QuickBooks session."),
            )
        }
    }
}

pub async fn dashboard(jar: PrivateCookieJar) -> Response {
    match session::current_credential(&jar) {
        Some(credential) => Html(format!(
            "<!DOCTYPE html>\n<html><head><title>DataRift Dashboard</title></head>\n<body>\n<h1>Connected to QuickBooks</h1>\n<p>Company ID: {}</p>\n<p><a href=\"/signout\">Disconnect</a></p>\n</body></html>",
            credential.company_id
        ))
        .into_response(),
        None => flash_redirect("error", "Please connect to QuickBooks first.").into_response(),
    }
}

pub async fn signout(jar: PrivateCookieJar) -> (PrivateCookieJar, Redirect) {
    (
        jar.add(session::clear_credential_cookie()),
        flash_redirect("message", "Disconnected from QuickBooks."),
    )
}

pub async fn tokens(jar: PrivateCookieJar) -> Json<Value> {
    match session::current_credential(&jar) {
        Some(credential) => Json(serde_json::json!({
            "access_token": credential.access_token,
            "refresh_token": credential.refresh_token,
            "company_id": credential.company_id,
            "expires_in": credential.expires_in,
            "x_refresh_token_expires_in": credential.x_refresh_token_expires_in,
        })),
        None => Json(serde_json::json!({
            "access_token": null,
            "refresh_token": null,
            "company_id": null,
            "expires_in": null,
            "x_refresh_token_expires_in": null,
        })),
    }
}

/// URL slug → QuickBooks entity name for the raw passthrough routes.
fn entity_for_slug(slug: &str) -> Option<&'static str> {
    match slug {
        "customers" => Some("Customer"),
        "invoices" => Some("Invoice"),
        "payments" => Some("Payment"),
        "items" => Some("Item"),
        "journal_entries" => Some("JournalEntry"),
        "deposits" => Some("Deposit"),
        "expenses" => Some("Purchase"),
        "transfers" => Some("Transfer"),
        _ => None,
    }
}

fn require_credential(jar: &PrivateCookieJar) -> Result<Credential, AppError> {
    session::current_credential(jar).ok_or(AppError::NotConnected)
}

/// Query one entity type, refreshing the access token and retrying once
/// when the upstream rejects it with a 401. The credential is updated in
/// place when a refresh succeeds.
async fn query_with_refresh(
    state: &AppState,
    credential: &mut Credential,
    entity_type: &str,
) -> Result<Vec<Value>, UpstreamError> {
    match query_entity(&state.http, state.api_base_url, credential, entity_type).await {
        Err(err) if err.is_unauthorized() && !credential.refresh_token.is_empty() => {
            tracing::info!(
                "Access token rejected for company_id={}, attempting refresh",
                &credential.company_id
            );
            let token_response = refresh_access_token(
                &state.http,
                &state.client_id,
                &state.client_secret,
                &credential.refresh_token,
            )
            .await?;

            credential.access_token = token_response.access_token;
            credential.refresh_token = token_response.refresh_token;
            credential.expires_in = token_response.expires_in;
            credential.x_refresh_token_expires_in = token_response.x_refresh_token_expires_in;

            query_entity(&state.http, state.api_base_url, credential, entity_type).await
        }
        other => other,
    }
}

/// Write the rotated credential back into the session cookie when a
/// refresh replaced the access token.
fn persist_if_rotated(
    jar: PrivateCookieJar,
    credential: &Credential,
    previous_access_token: &str,
) -> Result<PrivateCookieJar, AppError> {
    if credential.access_token == previous_access_token {
        return Ok(jar);
    }
    let cookie = session::credential_cookie(credential)
        .map_err(|err| AppError::InternalServerError(err.to_string()))?;
    Ok(jar.add(cookie))
}

#[axum::debug_handler]
pub async fn raw_entity(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let entity_type = entity_for_slug(&slug).ok_or(AppError::UnknownEntity(slug))?;
    let mut credential = require_credential(&jar)?;
    let previous_access_token = credential.access_token.clone();

    let records = query_with_refresh(&state, &mut credential, entity_type).await?;

    let jar = persist_if_rotated(jar, &credential, &previous_access_token)?;
    Ok((jar, Json(records)).into_response())
}

/// Record counts for the entity types the dashboard cards show. A
/// failed count reports zero rather than failing the sync.
#[axum::debug_handler]
pub async fn sync(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Json<Value>, AppError> {
    let credential = require_credential(&jar)?;

    let mut counts = serde_json::Map::new();
    for (name, entity_type) in [
        ("customers", "Customer"),
        ("invoices", "Invoice"),
        ("items", "Item"),
        ("payments", "Payment"),
    ] {
        let count = count_entity(&state.http, state.api_base_url, &credential, entity_type)
            .await
            .unwrap_or_else(|err| {
                tracing::error!("Count query for {} failed: {}", entity_type, err);
                0
            });
        counts.insert(name.to_string(), count.into());
    }

    Ok(Json(serde_json::json!({
        "message": "Data sync completed",
        "counts": counts,
    })))
}

/// Normalize whatever subset of the per-entity fetches succeeded. A
/// failure for one type is logged and skipped so the remaining types
/// still contribute to the response.
fn collect_normalized(
    results: Vec<(&'static str, Result<Vec<Value>, UpstreamError>)>,
) -> Vec<NormalizedTransaction> {
    let mut transactions = Vec::new();

    for (entity_type, result) in results {
        match result {
            Ok(records) => {
                tracing::info!("Retrieved {} {} records", records.len(), entity_type);
                transactions.extend(
                    records
                        .iter()
                        .map(|record| normalize::normalize(record, entity_type)),
                );
            }
            Err(err) => {
                tracing::error!("Skipping {} after upstream failure: {}", entity_type, err);
            }
        }
    }

    transactions
}

/// Fetch and normalize every transaction entity type, sequentially.
async fn fetch_normalized(
    state: &AppState,
    credential: &mut Credential,
) -> Vec<NormalizedTransaction> {
    let mut results = Vec::new();

    for entity_type in normalize::TRANSACTION_ENTITIES {
        let result = query_with_refresh(state, credential, entity_type).await;
        results.push((entity_type, result));
    }

    collect_normalized(results)
}

#[axum::debug_handler]
pub async fn get_transactions(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let mut credential = require_credential(&jar)?;
    let previous_access_token = credential.access_token.clone();

    let transactions = fetch_normalized(&state, &mut credential).await;
    let summary = normalize::aggregate(&transactions);

    let jar = persist_if_rotated(jar, &credential, &previous_access_token)?;
    Ok((
        jar,
        Json(serde_json::json!({
            "transactions": transactions,
            "total_count": transactions.len(),
            "summary": summary,
        })),
    )
        .into_response())
}

fn attachment(bytes: Vec<u8>, content_type: &'static str, filename: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

#[axum::debug_handler]
pub async fn export_transactions_csv(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let mut credential = require_credential(&jar)?;
    let previous_access_token = credential.access_token.clone();

    let transactions = fetch_normalized(&state, &mut credential).await;
    let bytes = export::to_csv(&transactions)
        .map_err(|err| AppError::InternalServerError(err.to_string()))?;

    let jar = persist_if_rotated(jar, &credential, &previous_access_token)?;
    Ok((
        jar,
        attachment(bytes, "text/csv", export::attachment_filename("csv")),
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn export_transactions_json(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let mut credential = require_credential(&jar)?;
    let previous_access_token = credential.access_token.clone();

    let transactions = fetch_normalized(&state, &mut credential).await;
    let bytes = export::to_json(&transactions)
        .map_err(|err| AppError::InternalServerError(err.to_string()))?;

    let jar = persist_if_rotated(jar, &credential, &previous_access_token)?;
    Ok((
        jar,
        attachment(
            bytes,
            "application/json",
            export::attachment_filename("json"),
        ),
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn export_transactions_excel(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<Response, AppError> {
    let mut credential = require_credential(&jar)?;
    let previous_access_token = credential.access_token.clone();

    let transactions = fetch_normalized(&state, &mut credential).await;
    let summary = normalize::aggregate(&transactions);
    let bytes = export::to_xlsx(&transactions, &summary)
        .map_err(|err| AppError::InternalServerError(err.to_string()))?;

    let jar = persist_if_rotated(jar, &credential, &previous_access_token)?;
    Ok((
        jar,
        attachment(
            bytes,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            export::attachment_filename("xlsx"),
        ),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_for_slug() {
        assert_eq!(entity_for_slug("customers"), Some("Customer"));
        assert_eq!(entity_for_slug("journal_entries"), Some("JournalEntry"));
        assert_eq!(entity_for_slug("expenses"), Some("Purchase"));
        assert_eq!(entity_for_slug("transfers"), Some("Transfer"));
        assert_eq!(entity_for_slug("widgets"), None);
    }

    #[test]
    fn test_flash_redirect_escapes_message() {
        let redirect = flash_redirect("error", "a & b");
        let response = redirect.into_response();

        let location = response.headers().get(header::LOCATION).unwrap();
        assert_eq!(location, "/?error=a+%26+b");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert(\"1\")</script> & more"),
            "&lt;script&gt;alert(&quot;1&quot;)&lt;/script&gt; &amp; more"
        );
    }

    #[tokio::test]
    async fn test_index_escapes_flash_parameters() {
        let Html(body) = index(Query(FlashParams {
            error: Some("<script>alert(1)</script>".into()),
            message: None,
        }))
        .await;

        assert!(!body.contains("<script>alert"));
        assert!(body.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn test_collect_normalized_skips_failed_entity_types() {
        let results = vec![
            (
                "JournalEntry",
                Err(UpstreamError::Api {
                    status: 500,
                    body: "internal error".into(),
                }),
            ),
            (
                "Invoice",
                Ok(vec![serde_json::json!({"Id": "1", "TotalAmt": 100.0})]),
            ),
            (
                "Deposit",
                Ok(vec![serde_json::json!({"Id": "2", "TotalAmt": 200.0})]),
            ),
        ];

        let transactions = collect_normalized(results);

        assert_eq!(transactions.len(), 2);
        assert!(transactions.iter().all(|t| t.txn_type != "JournalEntry"));
        assert_eq!(transactions[0].txn_type, "Invoice");
        assert_eq!(transactions[1].amount, 200.0);
    }
}
