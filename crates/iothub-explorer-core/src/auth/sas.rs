//! Shared access signature tokens.
//!
//! Wire form: `SharedAccessSignature sr=<resource>&sig=<signature>&se=<expiry>[&skn=<key name>]`
//! where every value is URL-encoded and the signature is the base64
//! HMAC-SHA256 of `<encoded resource>\n<expiry>` under the decoded key.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::connection_string::ServiceConnectionString;
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "SharedAccessSignature";

/// Validity window of tokens derived from a connection string.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    resource_uri: String,
    signature: String,
    expiry: i64,
    key_name: Option<String>,
}

impl SasToken {
    /// Sign `resource_uri` with a base64 shared access key, expiring at the
    /// given unix timestamp.
    pub fn generate(
        resource_uri: &str,
        key_name: Option<&str>,
        key: &str,
        expiry: i64,
    ) -> Result<Self, AuthError> {
        let key_bytes = BASE64
            .decode(key)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let string_to_sign = format!("{}\n{}", urlencoding::encode(resource_uri), expiry);
        mac.update(string_to_sign.as_bytes());

        Ok(Self {
            resource_uri: resource_uri.to_string(),
            signature: BASE64.encode(mac.finalize().into_bytes()),
            expiry,
            key_name: key_name.map(str::to_string),
        })
    }

    /// Hub-scoped token for a service connection string, valid for `ttl_secs` from now.
    pub fn for_service(cs: &ServiceConnectionString, ttl_secs: i64) -> Result<Self, AuthError> {
        Self::generate(
            &cs.host_name,
            Some(&cs.shared_access_key_name),
            &cs.shared_access_key,
            Utc::now().timestamp() + ttl_secs,
        )
    }

    /// Device-scoped token (`<host>/devices/<id>`), valid for `ttl_secs` from now.
    pub fn for_device(
        host_name: &str,
        device_id: &str,
        key: &str,
        ttl_secs: i64,
    ) -> Result<Self, AuthError> {
        let resource = format!("{}/devices/{}", host_name, device_id);
        Self::generate(&resource, None, key, Utc::now().timestamp() + ttl_secs)
    }

    /// The decoded `sr` field.
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Hub host name embedded in the resource URI.
    pub fn host(&self) -> &str {
        self.resource_uri
            .split('/')
            .next()
            .unwrap_or(&self.resource_uri)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Expiry as a unix timestamp (seconds).
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sr={}&sig={}&se={}",
            TOKEN_PREFIX,
            urlencoding::encode(&self.resource_uri),
            urlencoding::encode(&self.signature),
            self.expiry
        )?;
        if let Some(key_name) = &self.key_name {
            write!(f, "&skn={}", urlencoding::encode(key_name))?;
        }
        Ok(())
    }
}

impl FromStr for SasToken {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| AuthError::InvalidToken(format!("missing '{}' prefix", TOKEN_PREFIX)))?
            .trim_start();

        let mut resource_uri = None;
        let mut signature = None;
        let mut expiry = None;
        let mut key_name = None;

        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| AuthError::InvalidToken(format!("malformed field '{}'", pair)))?;
            let value = urlencoding::decode(value)
                .map_err(|e| AuthError::InvalidToken(e.to_string()))?
                .into_owned();

            match key {
                "sr" => resource_uri = Some(value),
                "sig" => signature = Some(value),
                "se" => {
                    expiry = Some(value.parse::<i64>().map_err(|_| {
                        AuthError::InvalidToken(format!("expiry '{}' is not a number", value))
                    })?)
                }
                "skn" => key_name = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            resource_uri: resource_uri
                .ok_or_else(|| AuthError::InvalidToken("missing sr".to_string()))?,
            signature: signature
                .ok_or_else(|| AuthError::InvalidToken("missing sig".to_string()))?,
            expiry: expiry.ok_or_else(|| AuthError::InvalidToken("missing se".to_string()))?,
            key_name,
        })
    }
}
