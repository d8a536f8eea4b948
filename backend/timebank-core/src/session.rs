// src/session.rs
//
// Session lifecycle: established after provider sign-in, restored (and the
// user re-resolved) on every request, torn down on sign-out or when the
// user can no longer be resolved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::identity::{IdentityResolver, Principal, ResolvedUser};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    jti: String,
    iat: i64,
    exp: i64,
}

impl Claims {
    fn principal(&self) -> Principal {
        Principal {
            uid: self.sub.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: ResolvedUser,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    id: String,
}

pub struct SessionManager {
    resolver: IdentityResolver,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    /// Revoked token ids with their expiry, pruned as they lapse.
    revoked: Arc<Mutex<HashMap<String, i64>>>,
}

impl SessionManager {
    pub fn new(resolver: IdentityResolver, secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            resolver,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl: Duration::hours(ttl_hours),
            revoked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves the freshly authenticated principal and issues a token.
    pub async fn establish(&self, principal: Principal) -> Result<Session, AppError> {
        let user = self.resolver.resolve(&principal).await?;

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: principal.uid,
            email: principal.email,
            name: principal.name,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Config(format!("Failed to sign session token: {}", e)))?;

        info!("Session established for user {}", user.id);
        Ok(Session {
            token,
            user,
            expires_at,
            id: claims.jti,
        })
    }

    /// Validates the token and re-runs identity resolution. A user who is no
    /// longer registered or active is signed out.
    pub async fn restore(&self, token: &str) -> Result<Session, AppError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                AppError::Unauthorized
            })?
            .claims;

        if self.revoked.lock().await.contains_key(&claims.jti) {
            return Err(AppError::Unauthorized);
        }

        let user = match self.resolver.resolve(&claims.principal()).await {
            Ok(user) => user,
            Err(err) if err.terminates_session() => {
                warn!("Signing out {}: {}", claims.sub, err);
                self.revoke(&claims.jti, claims.exp).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AppError::Unauthorized)?;

        Ok(Session {
            token: token.to_string(),
            user,
            expires_at,
            id: claims.jti,
        })
    }

    pub async fn teardown(&self, session: &Session) {
        self.revoke(&session.id, session.expires_at.timestamp()).await;
        info!("Session closed for user {}", session.user.id);
    }

    async fn revoke(&self, jti: &str, exp: i64) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.lock().await;
        revoked.retain(|_, expiry| *expiry > now);
        revoked.insert(jti.to_string(), exp);
    }
}
