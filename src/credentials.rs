//! Service-account key loading and the signed assertion exchanged for an access token.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

pub const EARTH_ENGINE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/earthengine",
    "https://www.googleapis.com/auth/cloud-platform",
];

#[derive(Deserialize, Clone)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// The private key must never reach the logs
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("kind", &self.kind)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl ServiceAccountKey {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read service account key {}", path.display()))?;
        let key: Self = serde_json::from_str(&content)
            .with_context(|| format!("malformed service account key {}", path.display()))?;
        if key.kind != "service_account" {
            return Err(anyhow!(
                "{} is a '{}' credential, expected 'service_account'",
                path.display(),
                key.kind
            ));
        }
        Ok(key)
    }

    pub fn claims(&self, scopes: &[&str], now: DateTime<Utc>) -> Claims {
        let iat = now.timestamp();
        Claims {
            iss: self.client_email.clone(),
            scope: scopes.join(" "),
            aud: self.token_uri.clone(),
            iat,
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        }
    }

    /// RS256-signed JWT for the OAuth2 jwt-bearer grant.
    pub fn assertion(&self, scopes: &[&str], now: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;
        let token = jsonwebtoken::encode(&header, &self.claims(scopes, now), &encoding_key)?;
        Ok(token)
    }
}
