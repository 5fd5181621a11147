use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::Value;
use shared::{
    domain::{Role, SellerId, UserId},
    protocol::{ForgotPasswordRequest, LoginRequest, RegisterRequest, RegisterResponse},
};
use storage::KeyValueStore;
use tracing::{debug, info, warn};

use crate::{
    backend::{AuthToken, CommerceBackend},
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
};

pub const TOKEN_KEY: &str = "token";
pub const ROLE_KEY: &str = "role";
pub const EMAIL_KEY: &str = "email";
pub const USER_ID_KEY: &str = "userId";
/// Written by older admin screens; only consulted when the session has no id.
pub const SELLER_ID_KEY: &str = "sellerId";

const TOKEN_USER_ID_CLAIMS: [&str; 4] = ["userId", "id", "sub", "user_id"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub token: Option<String>,
    pub role: Option<Role>,
    pub email: Option<String>,
    pub user_id: Option<UserId>,
}

pub struct Session {
    backend: Arc<dyn CommerceBackend>,
    kv: Arc<dyn KeyValueStore>,
    token: AuthToken,
    cell: Arc<BroadcastCell<SessionSnapshot>>,
}

impl Session {
    /// Loads whatever session a previous run left behind.
    pub async fn restore(
        backend: Arc<dyn CommerceBackend>,
        kv: Arc<dyn KeyValueStore>,
        token: AuthToken,
    ) -> ClientResult<Self> {
        let stored_token = kv.get(TOKEN_KEY).await?;
        let role = kv.get(ROLE_KEY).await?.as_deref().and_then(Role::parse);
        let email = kv.get(EMAIL_KEY).await?;
        let mut user_id = kv
            .get(USER_ID_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(UserId);

        if user_id.is_none() {
            user_id = stored_token.as_deref().and_then(user_id_from_token);
            if let Some(id) = user_id {
                kv.set(USER_ID_KEY, &id.to_string()).await?;
            }
        }

        token.set(stored_token.clone());
        let snapshot = SessionSnapshot {
            token: stored_token,
            role,
            email,
            user_id,
        };
        debug!(
            logged_in = snapshot.token.is_some(),
            user_id = ?snapshot.user_id,
            "session: restored"
        );
        Ok(Self {
            backend,
            kv,
            token,
            cell: Arc::new(BroadcastCell::new("session", snapshot)),
        })
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<SessionSnapshot>> {
        &self.cell
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<SessionSnapshot> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Email and password are required"));
        }
        let response = self
            .backend
            .login(&LoginRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await?;

        let user_id = response
            .user_id
            .filter(|id| *id != 0)
            .or(response.id.filter(|id| *id != 0))
            .map(UserId)
            .or_else(|| user_id_from_token(&response.token));

        let mut entries = vec![
            (TOKEN_KEY, response.token.clone()),
            (ROLE_KEY, response.role.as_str().to_string()),
            (EMAIL_KEY, response.email.clone()),
        ];
        if let Some(id) = user_id {
            entries.push((USER_ID_KEY, id.to_string()));
        } else {
            warn!(email = %response.email, "session: login response carried no user id");
        }
        self.kv.set_many(&entries).await?;

        self.token.set(Some(response.token.clone()));
        let snapshot = SessionSnapshot {
            token: Some(response.token),
            role: Some(response.role),
            email: Some(response.email),
            user_id,
        };
        self.cell.replace(snapshot.clone());
        info!(user_id = ?user_id, role = response.role.as_str(), "session: logged in");
        Ok(snapshot)
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> ClientResult<RegisterResponse> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Name, email and password are required"));
        }
        let response = self
            .backend
            .register(&RegisterRequest {
                name: name.trim().to_string(),
                email: email.trim().to_string(),
                password: password.to_string(),
                role,
            })
            .await?;
        info!(role = role.as_str(), "session: registered");
        Ok(response)
    }

    /// Clears local session state even when the remote logout fails.
    pub async fn logout(&self) -> ClientResult<()> {
        if let Err(err) = self.backend.logout().await {
            warn!(error = %err, "session: remote logout failed; clearing local session anyway");
        }
        for key in [TOKEN_KEY, ROLE_KEY, EMAIL_KEY, USER_ID_KEY] {
            self.kv.remove(key).await?;
        }
        self.token.set(None);
        self.cell.replace(SessionSnapshot::default());
        info!("session: logged out");
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> ClientResult<()> {
        if email.trim().is_empty() {
            return Err(ClientError::validation("Email is required"));
        }
        self.backend
            .forgot_password(&ForgotPasswordRequest {
                email: email.trim().to_string(),
            })
            .await?;
        Ok(())
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.cell.current().user_id
    }

    pub fn require_user(&self) -> ClientResult<UserId> {
        self.current_user_id()
            .ok_or_else(|| ClientError::validation("Please log in to continue"))
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_present()
    }

    pub fn role(&self) -> Option<Role> {
        self.cell.current().role
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn is_customer(&self) -> bool {
        self.role() == Some(Role::Customer)
    }

    /// Seller id for admin screens: the session's user id, else the stored
    /// `sellerId`, else none (callers then use the all-orders endpoints).
    pub async fn admin_id(&self) -> Option<SellerId> {
        if let Some(user_id) = self.current_user_id() {
            return Some(SellerId(user_id.0));
        }
        match self.kv.get(SELLER_ID_KEY).await {
            Ok(raw) => raw
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .filter(|id| *id != 0)
                .map(SellerId),
            Err(err) => {
                warn!(error = %err, "session: stored seller id unreadable");
                None
            }
        }
    }
}

/// Reads the user id out of a JWT payload without verifying it.
pub fn user_id_from_token(token: &str) -> Option<UserId> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    TOKEN_USER_ID_CLAIMS.iter().find_map(|claim| {
        let id = match claims.get(*claim)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        (id != 0).then_some(UserId(id))
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
