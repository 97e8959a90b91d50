//! Identity claims decoded once per session.
//!
//! Tokens are JWT-shaped (`header.payload.signature`, base64url without
//! padding). Only the payload is read: `sub`, `roles` and the optional `name`.
//! Issuance and signature verification belong to the auth provider.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::EngineError;
use crate::model::Role;
use crate::permissions::Actor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl IdentityClaims {
    pub fn new<I, S>(subject: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            display_name: None,
        }
    }

    /// Decode the payload segment of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Identity`] when the token is not three segments,
    /// the payload is not base64url JSON, or `sub` is missing or blank.
    pub fn decode(token: &str) -> Result<Self, EngineError> {
        let mut segments = token.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(EngineError::Identity(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| EngineError::Identity(format!("payload is not base64url: {err}")))?;
        let claims: Self = serde_json::from_slice(&bytes)
            .map_err(|err| EngineError::Identity(format!("payload is not valid claims: {err}")))?;

        if claims.subject.trim().is_empty() {
            return Err(EngineError::Identity("empty subject".to_string()));
        }
        Ok(claims)
    }

    /// Unsigned token carrying these claims, for local tooling and tests.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Identity`] if the claims cannot be serialized.
    pub fn encode_unsigned(&self) -> Result<String, EngineError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = serde_json::to_vec(self)
            .map_err(|err| EngineError::Identity(format!("encode claims: {err}")))?;
        Ok(format!("{header}.{}.", URL_SAFE_NO_PAD.encode(payload)))
    }

    /// Known roles named by the claims. Unknown names are logged and skipped.
    #[must_use]
    pub fn known_roles(&self) -> Vec<Role> {
        self.roles
            .iter()
            .filter_map(|raw| match Role::from_str(raw) {
                Ok(role) => Some(role),
                Err(err) => {
                    tracing::warn!(subject = %self.subject, %err, "ignoring unknown role claim");
                    None
                }
            })
            .collect()
    }

    /// Build the session actor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRoles`] when no known role is claimed.
    pub fn to_actor(&self) -> Result<Actor, EngineError> {
        Actor::new(self.subject.clone(), self.known_roles())
    }
}
