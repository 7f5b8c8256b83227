//! Authentication utilities: JWT validation and capability checks

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Request;

/// JWT claims issued by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User email
    pub email: String,
    /// Display name used in notification e-mails
    #[serde(default)]
    pub name: Option<String>,
    /// User role (admin, user)
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request.
///
/// A valid JWT `token` is required; anything else is UNAUTHORIZED.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_ref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;

    Ok(AuthInfo {
        user_id,
        email: claims.email,
        name: claims.name,
        role: claims.role,
        permissions: claims.permissions,
    })
}

// =============================================================================
// Capabilities
// =============================================================================

/// Whether an authenticated actor may perform a named action
pub trait CapabilityCheck: Send + Sync {
    fn can_perform(&self, actor: &AuthInfo, action: &str) -> bool;
}

/// Capabilities carried in the token's `permissions` claim.
///
/// Admins and holders of `*` may do anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsCapabilities;

impl CapabilityCheck for ClaimsCapabilities {
    fn can_perform(&self, actor: &AuthInfo, action: &str) -> bool {
        actor.role == "admin"
            || actor
                .permissions
                .iter()
                .any(|p| p == "*" || p == action)
    }
}

// =============================================================================
// Tests
// =============================================================================
