//! Key permission policy.
//!
//! Every handler that touches the signing key is listed in a [`KeyPolicy`]
//! with the permissions it was granted. The policy is validated before the
//! router is built, and capabilities are only issued through a [`Grant`], so
//! a handler granted the wrong permission fails at startup instead of
//! failing (or succeeding) at request time.

use crate::ports::{KeyProvider, PublicKeyReader, Signer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// An operation on the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPermission {
    Sign,
    GetPublicKey,
}

impl KeyPermission {
    /// IAM action name for the permission.
    pub fn action(&self) -> &'static str {
        match self {
            KeyPermission::Sign => "kms:Sign",
            KeyPermission::GetPublicKey => "kms:GetPublicKey",
        }
    }
}

impl fmt::Display for KeyPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// What a handler does with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerRole {
    /// Signs access tokens after verifying an upstream credential.
    Exchange,
    /// Publishes the public key set.
    Jwks,
}

impl HandlerRole {
    pub fn required_permission(&self) -> KeyPermission {
        match self {
            HandlerRole::Exchange => KeyPermission::Sign,
            HandlerRole::Jwks => KeyPermission::GetPublicKey,
        }
    }

    pub fn forbidden_permission(&self) -> KeyPermission {
        match self {
            HandlerRole::Exchange => KeyPermission::GetPublicKey,
            HandlerRole::Jwks => KeyPermission::Sign,
        }
    }
}

/// Permissions held by one named handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub handler: String,
    pub role: HandlerRole,
    pub permissions: BTreeSet<KeyPermission>,
}

impl Grant {
    /// A grant holding no permissions yet.
    pub fn new(handler: impl Into<String>, role: HandlerRole) -> Self {
        Self {
            handler: handler.into(),
            role,
            permissions: BTreeSet::new(),
        }
    }

    /// A grant holding exactly what `role` needs.
    pub fn least_privilege(handler: impl Into<String>, role: HandlerRole) -> Self {
        Self::new(handler, role).allow(role.required_permission())
    }

    pub fn allow(mut self, permission: KeyPermission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn permits(&self, permission: KeyPermission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn validate(&self) -> Result<()> {
        let required = self.role.required_permission();
        if !self.permits(required) {
            return Err(Error::PermissionMisconfigured(format!(
                "handler '{}' is missing {}",
                self.handler, required
            )));
        }

        let forbidden = self.role.forbidden_permission();
        if self.permits(forbidden) {
            return Err(Error::PermissionMisconfigured(format!(
                "handler '{}' must not hold {}",
                self.handler, forbidden
            )));
        }

        Ok(())
    }

    /// Issue the signing capability, if this grant allows it.
    pub fn signer(&self, key: &dyn KeyProvider) -> Result<Arc<dyn Signer>> {
        self.validate()?;
        if self.role != HandlerRole::Exchange {
            return Err(Error::PermissionMisconfigured(format!(
                "handler '{}' is not an exchange handler and cannot sign",
                self.handler
            )));
        }
        Ok(key.signer())
    }

    /// Issue the public-key capability, if this grant allows it.
    pub fn public_key_reader(&self, key: &dyn KeyProvider) -> Result<Arc<dyn PublicKeyReader>> {
        self.validate()?;
        if self.role != HandlerRole::Jwks {
            return Err(Error::PermissionMisconfigured(format!(
                "handler '{}' is not a JWKS handler and cannot read the public key",
                self.handler
            )));
        }
        Ok(key.public_key_reader())
    }
}

/// All grants on one signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    pub key_id: String,
    pub grants: Vec<Grant>,
}

impl KeyPolicy {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            grants: vec![],
        }
    }

    /// Least-privilege policy for the given handlers.
    pub fn least_privilege<I, S>(key_id: impl Into<String>, handlers: I) -> Self
    where
        I: IntoIterator<Item = (S, HandlerRole)>,
        S: Into<String>,
    {
        handlers
            .into_iter()
            .fold(Self::new(key_id), |policy, (handler, role)| {
                policy.with_grant(Grant::least_privilege(handler, role))
            })
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    pub fn grant_for(&self, handler: &str) -> Result<&Grant> {
        self.grants
            .iter()
            .find(|g| g.handler == handler)
            .ok_or_else(|| {
                Error::PermissionMisconfigured(format!("no grant for handler '{}'", handler))
            })
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for grant in &self.grants {
            if !seen.insert(grant.handler.as_str()) {
                return Err(Error::PermissionMisconfigured(format!(
                    "handler '{}' is granted more than once",
                    grant.handler
                )));
            }
            grant.validate()?;
        }
        Ok(())
    }

    /// Render one IAM identity policy document per handler.
    pub fn to_iam_documents(&self, key_arn: &str) -> Value {
        let documents: serde_json::Map<String, Value> = self
            .grants
            .iter()
            .map(|grant| {
                let actions: Vec<&str> = grant.permissions.iter().map(|p| p.action()).collect();
                let document = json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": actions,
                        "Resource": key_arn,
                    }],
                });
                (grant.handler.clone(), document)
            })
            .collect();

        Value::Object(documents)
    }
}
