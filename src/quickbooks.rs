use std::fmt;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::session::Credential;

pub const OAUTH_AUTHORIZE_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
pub const OAUTH_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
pub const OAUTH_SCOPE: &str = "com.intuit.quickbooks.accounting";

// Intuit keeps the query API stable per minor version; 69 matches what
// existing downstream notebooks were built against.
const MINOR_VERSION: &str = "69";

pub fn api_base_url(sandbox: bool) -> &'static str {
    if sandbox {
        "https://sandbox-quickbooks.api.intuit.com/v3/company"
    } else {
        "https://quickbooks.api.intuit.com/v3/company"
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub x_refresh_token_expires_in: u64,
}

#[derive(Debug)]
pub enum UpstreamError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Http(err)
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Http(err) => write!(f, "request to QuickBooks failed: {}", err),
            UpstreamError::Api { status, body } => {
                write!(f, "QuickBooks returned status {}: {}", status, body)
            }
        }
    }
}

impl UpstreamError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, UpstreamError::Api { status: 401, .. })
    }
}

/// Build the Intuit consent-screen URL for the authorization redirect.
pub fn build_authorization_url(client_id: &str, redirect_uri: &str, nonce: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", client_id)
        .append_pair("scope", OAUTH_SCOPE)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("state", nonce)
        .append_pair("access_type", "offline")
        .finish();
    format!("{}?{}", OAUTH_AUTHORIZE_URL, query)
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Api { status, body })
}

/// Exchange an authorization code for bearer tokens.
///
/// The token endpoint authenticates the app itself with HTTP Basic
/// credentials built from the client id and secret.
pub async fn exchange_auth_code(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenResponse, UpstreamError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];

    let res = client
        .post(OAUTH_TOKEN_URL)
        .basic_auth(client_id, Some(client_secret))
        .header(ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .inspect_err(|err| {
            tracing::error!("Error occurred in request to Intuit token API: {:#?}", err);
        })?;

    let res = ensure_success(res).await?;

    res.json::<TokenResponse>()
        .await
        .inspect_err(|err| {
            tracing::error!(
                "Error occurred while deserialising token response: {:#?}",
                err
            );
        })
        .map_err(Into::into)
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenResponse, UpstreamError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    let res = client
        .post(OAUTH_TOKEN_URL)
        .basic_auth(client_id, Some(client_secret))
        .header(ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .inspect_err(|err| {
            tracing::error!("Error occurred in request to Intuit token API: {:#?}", err);
        })?;

    let res = ensure_success(res).await?;

    res.json::<TokenResponse>()
        .await
        .inspect_err(|err| {
            tracing::error!(
                "Error occurred while deserialising refresh response: {:#?}",
                err
            );
        })
        .map_err(Into::into)
}

pub fn build_query(entity_type: &str) -> String {
    format!("SELECT * FROM {}", entity_type)
}

/// Pull the entity array out of a query response body.
///
/// QuickBooks omits the array entirely when a company has no records of
/// that type, so an absent key means an empty collection, not an error.
pub fn extract_entities(body: &Value, entity_type: &str) -> Vec<Value> {
    body.get("QueryResponse")
        .and_then(|res| res.get(entity_type))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Issue `SELECT * FROM <entity_type>` against the company's query endpoint.
pub async fn query_entity(
    client: &reqwest::Client,
    base_url: &str,
    credential: &Credential,
    entity_type: &str,
) -> Result<Vec<Value>, UpstreamError> {
    let query = build_query(entity_type);
    let url = format!("{}/{}/query", base_url, credential.company_id);

    tracing::info!("Querying {} for company_id={}", entity_type, &credential.company_id);

    let res = client
        .get(&url)
        .query(&[("query", query.as_str()), ("minorversion", MINOR_VERSION)])
        .bearer_auth(&credential.access_token)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .inspect_err(|err| {
            tracing::error!("Error occurred in request to QuickBooks query API: {:#?}", err);
        })?;

    let res = ensure_success(res).await?;

    let body = res.json::<Value>().await.inspect_err(|err| {
        tracing::error!(
            "Error occurred while deserialising query response: {:#?}",
            err
        );
    })?;

    Ok(extract_entities(&body, entity_type))
}

/// Number of records of one entity type, via `SELECT COUNT(*)`.
pub async fn count_entity(
    client: &reqwest::Client,
    base_url: &str,
    credential: &Credential,
    entity_type: &str,
) -> Result<u64, UpstreamError> {
    let query = format!("SELECT COUNT(*) FROM {}", entity_type);
    let url = format!("{}/{}/query", base_url, credential.company_id);

    let res = client
        .get(&url)
        .query(&[("query", query.as_str()), ("minorversion", MINOR_VERSION)])
        .bearer_auth(&credential.access_token)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .inspect_err(|err| {
            tracing::error!("Error occurred in request to QuickBooks query API: {:#?}", err);
        })?;

    let res = ensure_success(res).await?;

    let body = res.json::<Value>().await?;
    Ok(extract_total_count(&body))
}

pub fn extract_total_count(body: &Value) -> u64 {
    body.get("QueryResponse")
        .and_then(|res| res.get("totalCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
