//! Resolved identity context consumed by the domain services.
//!
//! Token verification and permission resolution happen upstream; the core
//! trusts the context it is handed and only enforces business-level rules
//! (e.g. "only the card assignee or an expense manager may submit").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Permission names the domain rules consult.
pub mod consts {
    pub const MANAGE_ORDERS: &str = "orders:manage";
    pub const APPROVE_AMENDMENTS: &str = "amendments:approve";
    pub const MANAGE_INVOICES: &str = "invoices:manage";
    pub const RECORD_PAYMENTS: &str = "payments:record";
    pub const MANAGE_EXPENSES: &str = "expenses:manage";
}

/// Identity context resolved by the authentication gate for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: String,
    pub permissions: Vec<String>,
}

impl RequestContext {
    pub fn new(user_id: Uuid, company_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            user_id,
            company_id,
            role: role.into(),
            permissions: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<&str>) -> Self {
        self.permissions = permissions.into_iter().map(String::from).collect();
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Fails with `UNAUTHORIZED_ACTOR` unless the context holds `permission`.
    pub fn require_permission(&self, permission: &str) -> Result<(), ServiceError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(ServiceError::UnauthorizedActor(format!(
                "user {} lacks permission '{}'",
                self.user_id, permission
            )))
        }
    }
}
