use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Caller, SessionError};
use crate::acl::{implement_acl, AclOptions};
use crate::config::SecurityConfig;
use crate::data::Data;
use crate::error::ApiError;
use crate::store::{date_value, Document, StoredObject};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User object id.
    pub sub: String,
    /// `_Session` object id.
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

/// Issues and checks session tokens. A token is only honoured while its
/// `_Session` object exists, so deleting the object logs the user out.
#[derive(Debug, Clone)]
pub struct SessionManager {
    secret: String,
    expiry_hours: u64,
}

impl SessionManager {
    pub fn new(secret: &str, expiry_hours: u64) -> Self {
        Self {
            secret: secret.to_string(),
            expiry_hours,
        }
    }

    pub fn from_config(security: &SecurityConfig) -> Self {
        Self::new(&security.session_secret, security.session_expiry_hours)
    }

    pub fn encode_token(&self, claims: &Claims) -> Result<String, SessionError> {
        if self.secret.is_empty() {
            return Err(SessionError::InvalidSecret);
        }
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| SessionError::TokenGeneration(e.to_string()))
    }

    pub fn decode_token(&self, token: &str) -> Result<Claims, SessionError> {
        if self.secret.is_empty() {
            return Err(SessionError::InvalidSecret);
        }
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| SessionError::InvalidToken(e.to_string()))
    }

    /// Create a `_Session` for the user and return its token.
    pub async fn issue(&self, data: &Data, user: &StoredObject, provider: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let expires = now + Duration::hours(self.expiry_hours as i64);

        let mut doc = Document::new();
        doc.insert("user".to_string(), user.pointer());
        doc.insert("expiresAt".to_string(), date_value(&expires));
        doc.insert(
            "createdWith".to_string(),
            json!({"action": "login", "authProvider": provider}),
        );
        let acl = implement_acl(&AclOptions::default().owner(&user.id, true, true));
        let session = data.create("_Session", doc, Some(acl), Some(&user.id)).await?;

        let token = self.encode_token(&Claims {
            sub: user.id.clone(),
            sid: session.id.clone(),
            exp: expires.timestamp(),
            iat: now.timestamp(),
        })?;
        tracing::info!("Opened session {} for user {}", session.id, user.id);
        Ok(token)
    }

    /// Resolve a token to its caller, checking the session and user still exist.
    pub async fn resolve(&self, data: &Data, token: &str) -> Result<Caller, ApiError> {
        let claims = self.decode_token(token)?;
        let session = data
            .get("_Session", &claims.sid)
            .await?
            .ok_or(SessionError::Revoked)?;
        if session.pointer_id("user") != Some(claims.sub.as_str()) {
            return Err(SessionError::Revoked.into());
        }
        let user = data.get("_User", &claims.sub).await?.ok_or(SessionError::Revoked)?;

        Ok(Caller {
            user_id: user.id.clone(),
            username: user.str_field("username").map(str::to_string),
            session_id: session.id,
        })
    }

    pub async fn revoke(&self, data: &Data, caller: &Caller) -> Result<(), ApiError> {
        if let Some(session) = data.get("_Session", &caller.session_id).await? {
            data.destroy(&session, Some(&caller.user_id)).await?;
            tracing::info!("Closed session {} for user {}", session.id, caller.user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "u1".to_string(),
            sid: "s1".to_string(),
            exp: now + exp_offset,
            iat: now,
        }
    }

    #[test]
    fn tokens_round_trip() {
        let sessions = SessionManager::new("secret", 1);
        let token = sessions.encode_token(&claims(3600)).unwrap();
        assert_eq!(sessions.decode_token(&token).unwrap().sid, "s1");
    }

    #[test]
    fn rejects_foreign_and_expired_tokens() {
        let ours = SessionManager::new("secret", 1);
        let theirs = SessionManager::new("other", 1);
        let token = theirs.encode_token(&claims(3600)).unwrap();
        assert!(matches!(ours.decode_token(&token), Err(SessionError::InvalidToken(_))));

        let expired = ours.encode_token(&claims(-3600)).unwrap();
        assert!(ours.decode_token(&expired).is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        let sessions = SessionManager::new("", 1);
        assert!(matches!(
            sessions.encode_token(&claims(60)),
            Err(SessionError::InvalidSecret)
        ));
    }
}
