//! Authentication module

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use disparo_common::types::{ApiKeyId, TenantId};
use disparo_engine::{CampaignManager, StatePoller, StatusReconciler};
use disparo_storage::models::ApiKey;
use disparo_storage::{ApiKeyRepositoryTrait, DatabasePool, DbApiKeyRepository};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Application state shared across handlers
pub struct AppState {
    pub db_pool: DatabasePool,
    pub manager: CampaignManager,
    pub poller: Arc<StatePoller>,
    pub reconciler: StatusReconciler,
    /// Shared secret the gateway presents on webhook calls; empty
    /// disables the check
    pub webhook_secret: String,
}

/// Authenticated context extracted from an API key
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The tenant this API key belongs to
    pub tenant_id: TenantId,
    /// Scopes granted to this API key
    pub scopes: Vec<String>,
    /// API key ID for audit logging
    pub api_key_id: ApiKeyId,
}

impl AuthContext {
    /// Check if the authenticated context has a specific scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(&"*".to_string()) || self.scopes.contains(&scope.to_string())
    }

    /// Check if the request is authorized for the given tenant
    pub fn is_authorized_for_tenant(&self, tenant_id: TenantId) -> bool {
        self.tenant_id == tenant_id
    }
}

/// Pull the API key out of a request, from `Authorization: Bearer` or
/// the `X-API-Key` header
pub fn extract_api_key(req: &Request) -> Option<&str> {
    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer.is_some() {
        return bearer;
    }

    req.headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
}

/// Lookup prefix, the first 8 characters of a key
fn extract_key_prefix(api_key: &str) -> Option<&str> {
    api_key.get(..8)
}

/// Hash an API key for comparison
fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Verify an API key against a stored hash.
///
/// Supports both Argon2 hashes (`$argon2...`) and legacy SHA-256 hex
/// hashes so existing keys keep working during migration.
fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        return PasswordHash::new(stored_hash)
            .ok()
            .and_then(|parsed_hash| {
                Argon2::default()
                    .verify_password(api_key.as_bytes(), &parsed_hash)
                    .ok()
            })
            .is_some();
    }

    hash_api_key(api_key) == stored_hash
}

/// Validate an API key against the database
async fn validate_api_key(db_pool: &DatabasePool, api_key: &str) -> Result<ApiKey, StatusCode> {
    let prefix = extract_key_prefix(api_key).ok_or_else(|| {
        warn!("API key too short");
        StatusCode::UNAUTHORIZED
    })?;

    let repo = DbApiKeyRepository::new(db_pool.clone());

    let candidates = repo.find_by_prefix(prefix).await.map_err(|e| {
        error!("Database error while looking up API key: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let matched = candidates
        .into_iter()
        .find(|candidate| verify_api_key(api_key, &candidate.key_hash));

    let key = match matched {
        Some(key) => key,
        None => {
            warn!("No API key matched prefix {}", prefix);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    if key.is_expired() {
        warn!("API key {} has expired", key.id);
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Update last_used_at without holding up the request
    let repo_clone = DbApiKeyRepository::new(db_pool.clone());
    let key_id = key.id;
    tokio::spawn(async move {
        if let Err(e) = repo_clone.update_last_used(key_id).await {
            error!("Failed to update API key last_used_at: {}", e);
        }
    });

    debug!("API key {} authenticated for tenant {}", key.id, key.tenant_id);
    Ok(key)
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let api_key = extract_api_key(&request).ok_or_else(|| {
        warn!("Missing API key in request to {}", request.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    let validated_key = validate_api_key(&state.db_pool, api_key).await?;

    let auth_context = AuthContext {
        tenant_id: validated_key.tenant_id,
        scopes: validated_key.scopes_vec(),
        api_key_id: validated_key.id,
    };

    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

/// Check if the authenticated key is authorized for a specific tenant
pub fn require_tenant_access(
    auth_context: &AuthContext,
    tenant_id: TenantId,
) -> Result<(), StatusCode> {
    if !auth_context.is_authorized_for_tenant(tenant_id) {
        warn!(
            "Tenant access denied: API key tenant {} tried to access tenant {}",
            auth_context.tenant_id, tenant_id
        );
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::verify_api_key;
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use argon2::Argon2;
    use sha2::{Digest, Sha256};

    #[test]
    fn verifies_legacy_sha256_hash() {
        let api_key = "dsp_test_legacy_key";
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        let legacy_hash = hex::encode(hasher.finalize());

        assert!(verify_api_key(api_key, &legacy_hash));
        assert!(!verify_api_key("wrong_key", &legacy_hash));
    }

    #[test]
    fn verifies_argon2_hash() {
        let api_key = "dsp_test_argon2_key";
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(api_key.as_bytes(), &salt)
            .expect("argon2 hash generation should succeed")
            .to_string();

        assert!(verify_api_key(api_key, &hash));
        assert!(!verify_api_key("wrong_key", &hash));
    }
}
