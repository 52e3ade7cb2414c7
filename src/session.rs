use std::fmt;

use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

const SESSION_COOKIE_NAME: &str = "qb_session";
const STATE_COOKIE_NAME: &str = "qb_oauth_state";

// The refresh token is the longest-lived credential Intuit hands out
// (100 days); the cookie outliving the access token is fine because the
// handlers refresh through it.
const SESSION_TTL_DAYS: i64 = 100;
const STATE_TTL_MINUTES: i64 = 10;

/// Bearer credential for one QuickBooks company, as stored in the
/// session cookie. The expiry fields are the raw second counts from the
/// token endpoint, kept verbatim for the `/tokens` interop surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub company_id: String,
    pub expires_in: u64,
    pub x_refresh_token_expires_in: u64,
}

/// Pending-authorization nonce cookie, written when the redirect is issued.
pub fn state_cookie(nonce: &str) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, nonce.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::minutes(STATE_TTL_MINUTES))
        .build()
}

pub fn clear_state_cookie() -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

pub fn credential_cookie(credential: &Credential) -> Result<Cookie<'static>, serde_json::Error> {
    let value = serde_json::to_string(credential)?;
    Ok(Cookie::build((SESSION_COOKIE_NAME, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::days(SESSION_TTL_DAYS))
        .build())
}

pub fn clear_credential_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Decode the credential from the session cookie. `None` when the
/// cookie is absent or does not decrypt/parse.
pub fn current_credential(jar: &PrivateCookieJar) -> Option<Credential> {
    let cookie = jar.get(SESSION_COOKIE_NAME)?;
    serde_json::from_str(cookie.value())
        .inspect_err(|err| tracing::warn!("Discarding undecodable session cookie: {}", err))
        .ok()
}

pub fn stored_nonce(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string())
}

#[derive(Debug, PartialEq)]
pub enum CallbackError {
    StateMismatch,
    MissingCodeOrRealm,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::StateMismatch => {
                write!(f, "Invalid state parameter. Please try connecting again.")
            }
            CallbackError::MissingCodeOrRealm => {
                write!(f, "Authorization failed. Missing code or realmId.")
            }
        }
    }
}

/// Parameters of a callback that passed validation.
#[derive(Debug, PartialEq)]
pub struct ValidatedCallback {
    pub code: String,
    pub realm_id: String,
}

/// Check a callback against the nonce stored for this session.
///
/// The nonce comparison runs first and an absent stored nonce counts as
/// a mismatch, so a callback can never succeed without a matching
/// `/auth` visit earlier in the same session.
pub fn validate_callback(
    code: Option<&str>,
    returned_state: Option<&str>,
    realm_id: Option<&str>,
    stored_nonce: Option<&str>,
) -> Result<ValidatedCallback, CallbackError> {
    match (returned_state, stored_nonce) {
        (Some(returned), Some(stored)) if returned == stored => {}
        _ => return Err(CallbackError::StateMismatch),
    }

    match (code, realm_id) {
        (Some(code), Some(realm_id)) if !code.is_empty() && !realm_id.is_empty() => {
            Ok(ValidatedCallback {
                code: code.to_string(),
                realm_id: realm_id.to_string(),
            })
        }
        _ => Err(CallbackError::MissingCodeOrRealm),
    }
}
