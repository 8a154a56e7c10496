//! Token endpoint wire protocol
//!
//! Every grant (refresh token, JWT assertion, authorization code) is a form
//! POST to the credential's `token_uri`, and every successful answer is the
//! same JSON shape. Failures carry the HTTP status plus the server's
//! `error`/`error_description`, or the raw body when it isn't JSON.

use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::helpers::urlsafe_b64decode;
use crate::http::HttpRequest;

/// Successful token endpoint response.
///
/// `expires_in` is a delta in seconds from the response time; some servers
/// send it as a string, which is accepted too.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// The full response body, kept for `Credentials::token_response`.
    #[serde(skip)]
    pub raw: Value,
}

impl TokenResponse {
    /// Interpret a token endpoint response.
    ///
    /// Non-2xx statuses, bodies that aren't JSON and bodies without
    /// `access_token` all become `Error::Refresh` with the response status.
    pub fn parse(status: StatusCode, body: &[u8]) -> Result<Self> {
        if !status.is_success() {
            return Err(Error::Refresh {
                status: status.as_u16(),
                message: error_message(body),
            });
        }

        let raw: Value = serde_json::from_slice(body).map_err(|e| Error::Refresh {
            status: status.as_u16(),
            message: format!("invalid token response: {e}"),
        })?;
        if raw.get("access_token").and_then(Value::as_str).is_none() {
            return Err(Error::Refresh {
                status: status.as_u16(),
                message: "token response is missing access_token".into(),
            });
        }

        let mut token: TokenResponse =
            serde_json::from_value(raw.clone()).map_err(|e| Error::Refresh {
                status: status.as_u16(),
                message: format!("invalid token response: {e}"),
            })?;
        token.raw = raw;
        Ok(token)
    }

    /// Absolute expiry for this token, assuming `default_lifetime` when the
    /// server did not say.
    pub fn expiry_from(&self, now: NaiveDateTime, default_lifetime: Duration) -> NaiveDateTime {
        let lifetime = match self.expires_in {
            Some(secs) => TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
                .unwrap_or(TimeDelta::MAX),
            None => TimeDelta::from_std(default_lifetime).unwrap_or(TimeDelta::MAX),
        };
        now.checked_add_signed(lifetime).unwrap_or(NaiveDateTime::MAX)
    }

    /// Claims of the returned `id_token`, decoded without signature checks.
    pub fn decoded_id_token(&self) -> Option<Value> {
        let id_token = self.id_token.as_deref()?;
        match decode_jwt_payload(id_token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(error = %e, "ignoring malformed id_token");
                None
            }
        }
    }
}

/// Human-readable failure message from a token or revoke endpoint body.
///
/// Prefers `error: error_description` from a JSON body, then the raw text.
pub fn error_message(body: &[u8]) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) {
        if let Some(error) = fields.get("error").and_then(Value::as_str) {
            return match fields.get("error_description").and_then(Value::as_str) {
                Some(description) => format!("{error}: {description}"),
                None => error.to_owned(),
            };
        }
    }
    let text = String::from_utf8_lossy(body).trim().to_owned();
    if text.is_empty() {
        String::from("<no body>")
    } else {
        text
    }
}

/// Build a form POST to a token endpoint.
pub(crate) fn form_request(
    token_uri: &str,
    params: &[(&str, &str)],
    user_agent: Option<&str>,
) -> HttpRequest {
    let form = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    HttpRequest::post_form(token_uri, form).with_user_agent(user_agent)
}

fn decode_jwt_payload(jwt: &str) -> Result<Value> {
    let mut segments = jwt.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::Decode("JWT must have three segments".into()));
    };
    Ok(serde_json::from_slice(&urlsafe_b64decode(payload)?)?)
}

fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expires_in out of range: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expires_in is not a number: {s}"))),
        Some(other) => Err(D::Error::custom(format!("unexpected expires_in: {other}"))),
    }
}
