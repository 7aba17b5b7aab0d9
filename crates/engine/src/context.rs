//! Request context carried from the auth middleware into every operation.
//!
//! The session gate is an external collaborator: by the time a
//! [`RequestContext`] reaches the engine the credentials were already
//! checked, and the flags here are treated as opaque preconditions.

use crate::{EngineError, ResultEngine};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EMPLOYEE: &str = "employee";

/// Authentication and authorization state for one request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub authenticated: bool,
    pub two_factor_pending: bool,
    pub two_factor_verified: bool,
    pub role: String,
    pub user_id: String,
}

impl RequestContext {
    /// Checks the full session gate: authenticated, not mid-2FA, verified.
    pub fn require_session(&self) -> ResultEngine<()> {
        if !self.authenticated {
            return Err(EngineError::Unauthorized("not authenticated".to_string()));
        }
        if self.two_factor_pending || !self.two_factor_verified {
            return Err(EngineError::Unauthorized(
                "two-factor verification incomplete".to_string(),
            ));
        }
        Ok(())
    }

    /// Session gate plus the admin role.
    pub fn require_admin(&self) -> ResultEngine<()> {
        self.require_session()?;
        if !self.is_admin() {
            return Err(EngineError::Unauthorized(
                "admin role required".to_string(),
            ));
        }
        Ok(())
    }

    /// Session gate plus ownership: the caller must be an admin or the owner
    /// of the targeted records.
    pub fn require_self_or_admin(&self, user_id: &str) -> ResultEngine<()> {
        self.require_session()?;
        if self.is_admin() || self.user_id == user_id {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(
                "cannot access another user's records".to_string(),
            ))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}
