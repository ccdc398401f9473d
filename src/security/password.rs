// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Password challenge-response authentication.
//!
//! Neither side ever sends the password: the challenger emits a random
//! alphanumeric string, the peer returns it encrypted under the shared
//! password, and the challenger decrypts and compares. The cipher is
//! pluggable per profile; the default is AES-128-GCM keyed with
//! MD5(password), while `cipher: xor` selects the legacy repeating-key XOR
//! transform for interop with old peers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use bytes::Bytes;
use md5::{Digest, Md5};
use rand::{RngExt, distr::Alphanumeric};
use tracing::{debug, error, warn};

use crate::{
    errors::{ControlError, ControlResult},
    models::cdap::{CdapMessage, CdapOpCode, RemoteProcessId},
    security::{
        SecurityCore,
        context::{
            ContextData, PasswordContextData, SecContextState, SecurityContext,
        },
        policy::{
            AUTH_PASSWORD, AuthPolicy, AuthPolicySet, AuthSduProtectionProfile,
            AuthStatus,
        },
    },
};

/// Profile parameter: the shared password.
pub const PASSWORD: &str = "password";
/// Profile parameter: the challenge cipher name.
pub const CIPHER: &str = "cipher";
/// Profile parameter: challenge length in characters.
pub const CHALLENGE_LENGTH: &str = "challenge-length";

/// Object class of the outgoing challenge.
pub const CHALLENGE_REQUEST: &str = "challenge request";
/// Object class of the encrypted reply.
pub const CHALLENGE_REPLY: &str = "challenge reply";

/// The default authenticated cipher.
pub const DEFAULT_CIPHER: &str = "aes128-gcm";
/// The legacy cipher, selectable by explicit opt-in only.
pub const XOR_CIPHER: &str = "xor";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A symmetric transform applied to challenges. Implementations derive
/// their key material from the shared password.
pub trait ChallengeCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> ControlResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> ControlResult<Vec<u8>>;
}

/// Repeating-key XOR with the password as the key. Involutive: encrypting
/// twice recovers the input.
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    pub fn new(password: &str) -> ControlResult<Self> {
        if password.is_empty() {
            return Err(ControlError::MalformedMessage(
                "the XOR cipher needs a non-empty password".into(),
            ));
        }
        Ok(Self {
            key: password.as_bytes().to_vec(),
        })
    }

    fn transform(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}

impl ChallengeCipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> ControlResult<Vec<u8>> {
        Ok(self.transform(plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> ControlResult<Vec<u8>> {
        Ok(self.transform(ciphertext))
    }
}

/// AES-128-GCM keyed with MD5(password). The 96-bit nonce is random per
/// message and travels in front of the ciphertext.
pub struct AesGcmCipher {
    cipher: Aes128Gcm,
}

const NONCE_LEN: usize = 12;

impl AesGcmCipher {
    pub fn new(password: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(password.as_bytes());
        let key_bytes = hasher.finalize();
        let key = Key::<Aes128Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes128Gcm::new(key),
        }
    }
}

impl ChallengeCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> ControlResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|_| {
            ControlError::Internal("AES-GCM encryption failed".into())
        })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> ControlResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(ControlError::MalformedMessage(
                "AES-GCM payload shorter than its nonce".into(),
            ));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| {
                ControlError::MalformedMessage(
                    "AES-GCM authentication failed".into(),
                )
            })
    }
}

/// Build the cipher selected by the profile.
pub fn challenge_cipher(
    name: &str,
    password: &str,
) -> ControlResult<Box<dyn ChallengeCipher>> {
    match name {
        XOR_CIPHER => Ok(Box::new(XorCipher::new(password)?)),
        DEFAULT_CIPHER => Ok(Box::new(AesGcmCipher::new(password))),
        other => Err(ControlError::UnknownPolicy(format!(
            "unsupported challenge cipher '{other}'"
        ))),
    }
}

fn generate_random_challenge(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub struct AuthPasswordPolicySet {
    core: Arc<SecurityCore>,
    timeout: Mutex<Duration>,
}

impl AuthPasswordPolicySet {
    pub fn new(core: Arc<SecurityCore>) -> Self {
        Self {
            core,
            timeout: Mutex::new(DEFAULT_TIMEOUT),
        }
    }

    fn timeout(&self) -> Duration {
        match self.timeout.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn context_data_from_profile(
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<PasswordContextData> {
        let password = profile.auth.require_param(PASSWORD)?.to_string();
        let challenge_length: usize = profile
            .auth
            .require_param(CHALLENGE_LENGTH)?
            .parse()
            .map_err(|e| {
                ControlError::MalformedMessage(format!(
                    "challenge-length is not an integer: {e}"
                ))
            })?;
        if challenge_length == 0 {
            return Err(ControlError::MalformedMessage(
                "challenge-length must be positive".into(),
            ));
        }
        let cipher = profile
            .auth
            .param(CIPHER)
            .unwrap_or(DEFAULT_CIPHER)
            .to_string();
        // Fail now if the cipher name or password cannot build a cipher.
        challenge_cipher(&cipher, &password)?;
        Ok(PasswordContextData {
            password,
            cipher,
            challenge_length,
            challenge: None,
        })
    }

    fn install_context(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<()> {
        let data = Self::context_data_from_profile(profile)?;
        self.core.add_security_context(SecurityContext {
            session_id,
            policy_type: AUTH_PASSWORD,
            state: SecContextState::Fresh,
            crc_policy: profile.crc.clone(),
            ttl_policy: profile.ttl.clone(),
            data: ContextData::Password(data),
            timer: None,
        })
    }

    /// Arm the abandonment deadline: on expiry the context disappears and
    /// any later reply is dropped as `WrongState`.
    fn arm_timer(&self, session_id: u32) {
        let core = Arc::clone(&self.core);
        let handle = self.core.timer.schedule(self.timeout(), move || {
            warn!(session_id, "authentication timed out, destroying context");
            core.destroy_security_context(session_id);
        });
        self.core.with_context(session_id, |ctx| {
            ctx.timer = Some(handle);
        });
    }

    fn process_challenge_request(
        &self,
        challenge: &[u8],
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        let Some((password, cipher_name)) =
            self.core.with_context(session_id, |ctx| {
                ctx.password_data()
                    .map(|d| (d.password.clone(), d.cipher.clone()))
            })
            .flatten()
        else {
            error!(session_id, "no pending password context for the session");
            return Ok(AuthStatus::Failed);
        };

        let cipher = challenge_cipher(&cipher_name, &password)?;
        let encrypted = cipher.encrypt(challenge)?;
        self.core.ribd.remote_write_object(
            CHALLENGE_REPLY,
            &cipher_name,
            Bytes::from(encrypted),
            0,
            RemoteProcessId {
                port_id: session_id,
            },
        )?;
        Ok(AuthStatus::InProgress)
    }

    fn process_challenge_reply(
        &self,
        encrypted: &[u8],
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        let Some((password, cipher_name, expected, timer)) =
            self.core.with_context(session_id, |ctx| {
                let timer = ctx.timer.take();
                ctx.password_data().map(|d| {
                    (
                        d.password.clone(),
                        d.cipher.clone(),
                        d.challenge.clone(),
                        timer,
                    )
                })
            })
            .flatten()
        else {
            error!(session_id, "no pending password context for the session");
            return Ok(AuthStatus::Failed);
        };

        // Success and expiry race; taking the timer first makes the expiry
        // path a tombstoned no-op.
        if let Some(handle) = timer {
            self.core.timer.cancel(handle);
        }

        let Some(expected) = expected else {
            error!(session_id, "challenge reply without an outstanding challenge");
            return Ok(AuthStatus::Failed);
        };

        let cipher = challenge_cipher(&cipher_name, &password)?;
        let recovered = match cipher.decrypt(encrypted) {
            Ok(recovered) => recovered,
            Err(e) => {
                debug!(session_id, "challenge reply failed to decrypt: {e}");
                return Ok(AuthStatus::Failed);
            },
        };

        if recovered == expected.as_bytes() {
            self.core.with_context(session_id, |ctx| {
                ctx.state = SecContextState::Established;
            });
            Ok(AuthStatus::Successful)
        } else {
            debug!(session_id, "authentication failed");
            Ok(AuthStatus::Failed)
        }
    }
}

impl AuthPolicySet for AuthPasswordPolicySet {
    fn policy_type(&self) -> &'static str {
        AUTH_PASSWORD
    }

    fn get_auth_policy(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<AuthPolicy> {
        if profile.auth.name != AUTH_PASSWORD {
            error!(name = %profile.auth.name, "wrong policy name");
            return Err(ControlError::UnknownPolicy(profile.auth.name.clone()));
        }

        self.install_context(session_id, profile)?;

        Ok(AuthPolicy {
            name: AUTH_PASSWORD.to_string(),
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
        if let Err(e) = policy.check(AUTH_PASSWORD) {
            error!("refusing authentication offer: {e}");
            return Ok(AuthStatus::Failed);
        }

        self.install_context(session_id, profile)?;

        // 1: generate a random challenge and send it to the peer being
        // authenticated. The object name carries the cipher name.
        let (challenge, cipher_name) = self
            .core
            .with_context(session_id, |ctx| match &mut ctx.data {
                ContextData::Password(data) => {
                    let challenge = generate_random_challenge(data.challenge_length);
                    data.challenge = Some(challenge.clone());
                    Some((challenge, data.cipher.clone()))
                },
                _ => None,
            })
            .flatten()
            .ok_or_else(|| {
                ControlError::Internal(format!(
                    "password context for session {session_id} vanished"
                ))
            })?;

        self.core.ribd.remote_write_object(
            CHALLENGE_REQUEST,
            &cipher_name,
            Bytes::from(challenge.into_bytes()),
            0,
            RemoteProcessId {
                port_id: session_id,
            },
        )?;

        // 2: clean the pending session up if the peer never answers.
        self.arm_timer(session_id);

        Ok(AuthStatus::InProgress)
    }

    fn process_incoming(
        &self,
        msg: &CdapMessage,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        if msg.op_code != CdapOpCode::MWrite {
            error!(op = ?msg.op_code, "wrong operation type");
            return Ok(AuthStatus::Failed);
        }

        match msg.object_class.as_str() {
            CHALLENGE_REQUEST => {
                self.process_challenge_request(&msg.object_value, session_id)
            },
            CHALLENGE_REPLY => {
                self.process_challenge_reply(&msg.object_value, session_id)
            },
            other => {
                error!(object_class = other, "wrong message type");
                Ok(AuthStatus::Failed)
            },
        }
    }

    fn set_param(&self, name: &str, value: &str) -> ControlResult<()> {
        match name {
            "timeout-ms" => {
                let ms: u64 = value.parse().map_err(|e| {
                    ControlError::MalformedMessage(format!(
                        "timeout-ms is not an integer: {e}"
                    ))
                })?;
                match self.timeout.lock() {
                    Ok(mut guard) => *guard = Duration::from_millis(ms),
                    Err(poisoned) => {
                        *poisoned.into_inner() = Duration::from_millis(ms)
                    },
                }
                Ok(())
            },
            other => {
                debug!(name = other, value, "unknown password-policy parameter");
                Err(ControlError::UnknownPolicy(format!(
                    "{AUTH_PASSWORD} has no parameter '{other}'"
                )))
            },
        }
    }
}
