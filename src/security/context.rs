// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session security state.
//!
//! A context exists per session id (= the port-id of the flow being secured)
//! from the moment a policy set touches the session until the handshake
//! finishes, the carrier N-1 flow goes away, or the abandonment timer fires.
//! At most one context per session id exists at any instant; the manager's
//! map enforces it.

use core::fmt;

use num_bigint::BigUint;

use crate::security::{policy::PolicyConfig, timer::TimerHandle};

/// Handshake progress of a security context.
///
/// `ReqEnableDecrypt` / `ReqEnableEncrypt` exist exclusively to disambiguate
/// which asynchronous datapath completion is acceptable next; a completion
/// arriving in any other state is a protocol error and destroys the context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SecContextState {
    #[default]
    Fresh,
    WaitEdhExchange,
    ReqEnableDecrypt,
    ReqEnableEncrypt,
    EncryptionSetup,
    Established,
    Failed,
}

impl fmt::Display for SecContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecContextState::Fresh => "FRESH",
            SecContextState::WaitEdhExchange => "WAIT_EDH_EXCHANGE",
            SecContextState::ReqEnableDecrypt => "REQUESTED_ENABLE_DECRYPTION",
            SecContextState::ReqEnableEncrypt => "REQUESTED_ENABLE_ENCRYPTION",
            SecContextState::EncryptionSetup => "ENCRYPTION_SETUP",
            SecContextState::Established => "ESTABLISHED",
            SecContextState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Session data of the password policy.
#[derive(Debug, Default, Clone)]
pub struct PasswordContextData {
    pub password: String,
    pub cipher: String,
    pub challenge_length: usize,
    /// The challenge we emitted; the reply must decrypt back to it.
    pub challenge: Option<String>,
}

/// Session data of the SSH2 policy.
#[derive(Debug, Default, Clone)]
pub struct Ssh2ContextData {
    pub key_exch_alg: String,
    pub encrypt_alg: String,
    pub mac_alg: String,
    pub compress_alg: String,
    pub private_key: BigUint,
    pub public_key: BigUint,
    pub peer_public_key: Option<BigUint>,
    pub shared_secret: Option<Vec<u8>>,
    /// Direction of the outstanding datapath enablement, when one exists.
    pub pending_enable: Option<crate::datapath::CryptoDirection>,
}

/// Policy-specific slice of a context.
#[derive(Debug, Default, Clone)]
pub enum ContextData {
    /// CRC/TTL policies only; nothing to negotiate.
    #[default]
    Bare,
    Password(PasswordContextData),
    Ssh2(Box<Ssh2ContextData>),
}

/// Everything the manager tracks for one secured session.
#[derive(Debug, Default, Clone)]
pub struct SecurityContext {
    pub session_id: u32,
    /// Type name of the policy set driving this session.
    pub policy_type: &'static str,
    pub state: SecContextState,
    pub crc_policy: PolicyConfig,
    pub ttl_policy: PolicyConfig,
    pub data: ContextData,
    /// Abandonment deadline, armed while the handshake is pending.
    pub timer: Option<TimerHandle>,
}

impl SecurityContext {
    pub fn password_data(&self) -> Option<&PasswordContextData> {
        match &self.data {
            ContextData::Password(data) => Some(data),
            _ => None,
        }
    }

    pub fn ssh2_data(&self) -> Option<&Ssh2ContextData> {
        match &self.data {
            ContextData::Ssh2(data) => Some(data),
            _ => None,
        }
    }

    pub fn ssh2_data_mut(&mut self) -> Option<&mut Ssh2ContextData> {
        match &mut self.data {
            ContextData::Ssh2(data) => Some(data),
            _ => None,
        }
    }
}
