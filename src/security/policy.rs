// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The authentication policy-set capability and its value types.
//!
//! A policy set is a named, reusable capability; each flow being secured
//! binds one policy set and one [`crate::security::context::SecurityContext`]
//! keyed by the session id (= port-id of the flow carrying the handshake).

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    datapath::CryptoDirection,
    errors::{ControlError, ControlResult},
    models::cdap::CdapMessage,
};

/// Policy-type name of the null authentication policy.
pub const AUTH_NONE: &str = "PSOC_authentication-none";
/// Policy-type name of the password challenge-response policy.
pub const AUTH_PASSWORD: &str = "PSOC_authentication-password";
/// Policy-type name of the SSH2-style key-exchange policy.
pub const AUTH_SSH2: &str = "PSOC_authentication-ssh2";

/// Version every bundled policy implements.
pub const DEFAULT_POLICY_VERSION: &str = "1";

/// Outcome of an authentication step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Successful,
    InProgress,
    Failed,
}

/// One named, versioned policy with free-form parameters, as carried in
/// configuration and protection profiles.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default, rename = "Name")]
    pub name: String,
    #[serde(default, rename = "Version")]
    pub version: String,
    #[serde(default, rename = "Parameters")]
    pub params: HashMap<String, String>,
}

impl PolicyConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            params: HashMap::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn require_param(&self, name: &str) -> ControlResult<&str> {
        self.param(name).ok_or_else(|| {
            ControlError::MalformedMessage(format!(
                "policy {} is missing the '{name}' parameter",
                self.name
            ))
        })
    }
}

/// How SDUs on a flow must be protected: the authentication policy plus the
/// CRC and TTL policies applied by the datapath.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSduProtectionProfile {
    #[serde(rename = "AuthPolicy")]
    pub auth: PolicyConfig,
    #[serde(default, rename = "EncryptPolicy")]
    pub encrypt: PolicyConfig,
    #[serde(default, rename = "CrcPolicy")]
    pub crc: PolicyConfig,
    #[serde(default, rename = "TtlPolicy")]
    pub ttl: PolicyConfig,
}

/// The policy information returned by `get_auth_policy` and shipped to the
/// peer inside the enrollment offer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AuthPolicy {
    pub name: String,
    pub versions: Vec<String>,
    /// Policy-specific opaque options (the SSH2 policy carries its algorithm
    /// lists and DH public key here).
    pub options: Bytes,
}

impl AuthPolicy {
    /// Validate the peer's offer against this policy type and version.
    pub fn check(&self, expected_name: &str) -> ControlResult<()> {
        if self.name != expected_name {
            return Err(ControlError::UnknownPolicy(format!(
                "wrong policy name {}, expected {expected_name}",
                self.name
            )));
        }
        match self.versions.first() {
            Some(v) if v == DEFAULT_POLICY_VERSION => Ok(()),
            other => Err(ControlError::UnknownPolicy(format!(
                "unsupported policy version {other:?}"
            ))),
        }
    }
}

/// A pluggable authentication capability.
///
/// Implementations hold no per-session state of their own: everything
/// session-scoped lives in the security context registered with the
/// manager, so one policy-set instance serves every flow of its type.
pub trait AuthPolicySet: Send + Sync {
    /// The registered policy-type name.
    fn policy_type(&self) -> &'static str;

    /// Called on the side that offers authentication: install a security
    /// context for `session_id` and produce the offer for the peer.
    fn get_auth_policy(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<AuthPolicy>;

    /// Called on the side that received an offer: validate it, install the
    /// context and start the handshake.
    fn initiate(
        &self,
        policy: &AuthPolicy,
        profile: &AuthSduProtectionProfile,
        session_id: u32,
    ) -> ControlResult<AuthStatus>;

    /// Feed one incoming authentication CDAP message to the handshake.
    fn process_incoming(
        &self,
        msg: &CdapMessage,
        session_id: u32,
    ) -> ControlResult<AuthStatus>;

    /// Set a policy-specific parameter.
    fn set_param(&self, name: &str, value: &str) -> ControlResult<()>;

    /// Completion of an asynchronous datapath crypto enablement. Policies
    /// without a crypto bring-up phase treat this as a protocol error.
    fn crypto_enable_completed(
        &self,
        session_id: u32,
        direction: CryptoDirection,
    ) -> ControlResult<AuthStatus> {
        let _ = direction;
        Err(ControlError::wrong_state(
            "crypto_enable_completed",
            format!("policy {} has no crypto phase (session {session_id})", self.policy_type()),
        ))
    }
}
