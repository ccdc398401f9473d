// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The null authentication policy: no credentials, no messages. It still
//! installs a security context so the CRC/TTL protection policies of the
//! profile reach the datapath.

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    errors::{ControlError, ControlResult},
    models::cdap::CdapMessage,
    security::{
        SecurityCore,
        context::{ContextData, SecContextState, SecurityContext},
        policy::{
            AUTH_NONE, AuthPolicy, AuthPolicySet, AuthSduProtectionProfile,
            AuthStatus,
        },
    },
};

pub struct AuthNonePolicySet {
    core: Arc<SecurityCore>,
}

impl AuthNonePolicySet {
    pub fn new(core: Arc<SecurityCore>) -> Self {
        Self { core }
    }

    fn install_context(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<()> {
        self.core.add_security_context(SecurityContext {
            session_id,
            policy_type: AUTH_NONE,
            state: SecContextState::Established,
            crc_policy: profile.crc.clone(),
            ttl_policy: profile.ttl.clone(),
            data: ContextData::Bare,
            timer: None,
        })
    }
}

impl AuthPolicySet for AuthNonePolicySet {
    fn policy_type(&self) -> &'static str {
        AUTH_NONE
    }

    fn get_auth_policy(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<AuthPolicy> {
        if profile.auth.name != AUTH_NONE {
            error!(name = %profile.auth.name, "wrong policy name");
            return Err(ControlError::UnknownPolicy(profile.auth.name.clone()));
        }

        self.install_context(session_id, profile)?;

        Ok(AuthPolicy {
            name: AUTH_NONE.to_string(),
            versions: vec![profile.auth.version.clone()],
            options: Default::default(),
        })
    }

    fn initiate(
        &self,
        policy: &AuthPolicy,
        profile: &AuthSduProtectionProfile,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        if let Err(e) = policy.check(AUTH_NONE) {
            error!("refusing authentication offer: {e}");
            return Ok(AuthStatus::Failed);
        }

        self.install_context(session_id, profile)?;
        Ok(AuthStatus::Successful)
    }

    fn process_incoming(
        &self,
        _msg: &CdapMessage,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        // No authentication messages are ever exchanged under this policy.
        error!(session_id, "null policy received an authentication message");
        Ok(AuthStatus::Failed)
    }

    fn set_param(&self, name: &str, value: &str) -> ControlResult<()> {
        debug!(name, value, "null policy has no parameters");
        Err(ControlError::UnknownPolicy(format!(
            "{AUTH_NONE} has no parameter '{name}'"
        )))
    }
}
