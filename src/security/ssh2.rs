// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SSH2-style authentication: algorithm negotiation plus an ephemeral
//! Diffie-Hellman exchange that leaves both peers with the same shared
//! secret, which is then handed to the datapath to key SDU protection.
//!
//! The 2048-bit group is byte-fixed; a peer proposing anything else is
//! rejected. The group is validated once at policy construction with the
//! standard parameter checks (p prime, (p-1)/2 prime, generator residue);
//! when validation fails the policy set cannot be registered.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hex_literal::hex;
use num_bigint::BigUint;
use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::{
    datapath::{CryptoDirection, CryptoProfile, DatapathStatus},
    errors::{ControlError, ControlResult},
    models::{
        cdap::{CdapMessage, CdapOpCode, RemoteProcessId},
        payload::{PayloadReader, PayloadWriter},
    },
    security::{
        SecurityCore,
        context::{
            ContextData, SecContextState, SecurityContext, Ssh2ContextData,
        },
        policy::{
            AUTH_SSH2, AuthPolicy, AuthPolicySet, AuthSduProtectionProfile,
            AuthStatus,
        },
    },
};

/// Object class and name of the key-exchange CDAP write.
pub const EDH_EXCHANGE: &str = "Ephemeral Diffie-Hellman exchange";

/// Profile parameter names.
pub const KEY_EXCHANGE_ALGORITHM: &str = "keyExchangeAlg";
pub const ENCRYPTION_ALGORITHM: &str = "encryptAlg";
pub const MAC_ALGORITHM: &str = "macAlg";
pub const COMPRESSION_ALGORITHM: &str = "compressAlg";

const KEY_EXCHANGE_ALLOWED: &[&str] = &["EDH"];
const ENCRYPTION_ALLOWED: &[&str] = &["AES-128", "AES-256"];
const MAC_ALLOWED: &[&str] = &["MD5", "SHA1"];

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The fixed 2048-bit prime modulus.
const DH2048_P: [u8; 256] = hex!(
    "c42537635646da973a5198a1d1a1d0a0"
    "78586431746d1d8525383e0c881fff07"
    "5e73ff16522245c01bbac98e84929042"
    "3288f7940bb203f115a1d0314944fda0"
    "461106386f062fbba90bb1c8b58ffe7a"
    "7f4e9419ce7a1aa9b5e89f05192d3926"
    "f5c63a80c0cae36622121c46ac466f2c"
    "36291c6bfd35fa90877590a8321bfe2f"
    "329d62913a1a8becdbb526747ee37aa6"
    "5cbaeacf68950496b90f687d3fc62ea1"
    "ba108e833c525030dc0a5d9567276400"
    "9a181386c9c9ad4b4e779f92fd0e41db"
    "15ee006fa7df89ecd43314a557a1990f"
    "594c158b178dc11a2e70d08e0b0757b8"
    "b187b903977069950d8c2e4ec12e471f"
    "59dbb1823706a999c177391c1ac0a7b3"
);

/// The fixed generator.
const DH2048_G: u32 = 2;

static STANDARD_GROUP: OnceCell<Result<DhParameters, String>> = OnceCell::new();

/// A validated Diffie-Hellman group plus the key operations on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParameters {
    p: BigUint,
    g: BigUint,
}

impl DhParameters {
    /// The built-in 2048-bit group, validated once per process.
    pub fn standard_group() -> ControlResult<Self> {
        STANDARD_GROUP
            .get_or_init(|| {
                let params = DhParameters {
                    p: BigUint::from_bytes_be(&DH2048_P),
                    g: BigUint::from(DH2048_G),
                };
                params.check().map(|()| params).map_err(|e| e.to_string())
            })
            .clone()
            .map_err(ControlError::Internal)
    }

    /// The standard DH parameter check: 2048-bit odd prime modulus with a
    /// prime (p-1)/2, and a generator in range with the right residue.
    fn check(&self) -> ControlResult<()> {
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);

        if self.p.bits() != 2048 {
            return Err(ControlError::Internal(format!(
                "DH modulus has {} bits, expected 2048",
                self.p.bits()
            )));
        }
        if &self.p % &two == BigUint::from(0u32) {
            return Err(ControlError::Internal("DH modulus is even".into()));
        }
        if self.g <= one || self.g >= &self.p - &one {
            return Err(ControlError::Internal(
                "DH generator out of range".into(),
            ));
        }
        if self.g == two && &self.p % BigUint::from(24u32) != BigUint::from(11u32) {
            return Err(ControlError::Internal(
                "DH generator 2 is unsuitable for this modulus".into(),
            ));
        }
        if !miller_rabin(&self.p) {
            return Err(ControlError::Internal("DH modulus is not prime".into()));
        }
        let q = (&self.p - &one) / &two;
        if !miller_rabin(&q) {
            return Err(ControlError::Internal(
                "DH modulus is not a safe prime".into(),
            ));
        }
        Ok(())
    }

    /// Generate an ephemeral key pair: a 256-bit private exponent and its
    /// public value `g^x mod p`.
    pub fn generate_keypair(&self) -> (BigUint, BigUint) {
        use rand::RngExt;
        let mut raw = [0u8; 32];
        rand::rng().fill(&mut raw);
        // Keep the exponent at least 2.
        raw[31] |= 0b10;
        let private = BigUint::from_bytes_be(&raw);
        let public = self.g.modpow(&private, &self.p);
        (private, public)
    }

    /// Import a peer public key, rejecting degenerate values.
    pub fn import_public_key(&self, raw: &[u8]) -> ControlResult<BigUint> {
        let key = BigUint::from_bytes_be(raw);
        let one = BigUint::from(1u32);
        if key <= one || key >= &self.p - &one {
            return Err(ControlError::MalformedMessage(
                "peer DH public key out of range".into(),
            ));
        }
        Ok(key)
    }

    /// `peer_pub^private mod p`, as big-endian bytes.
    pub fn shared_secret(&self, private: &BigUint, peer_public: &BigUint) -> Vec<u8> {
        peer_public.modpow(private, &self.p).to_bytes_be()
    }
}

/// Deterministic Miller-Rabin over a fixed base set; ample for validating a
/// compiled-in constant.
fn miller_rabin(n: &BigUint) -> bool {
    let one = BigUint::from(1u32);
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n % &two == BigUint::from(0u32) {
        return false;
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while &d % &two == BigUint::from(0u32) {
        d /= &two;
        r += 1;
    }

    'base: for base in [2u32, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        let a = BigUint::from(base);
        if &a >= n {
            continue;
        }
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..r {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'base;
            }
        }
        return false;
    }
    true
}

/// The negotiation options shipped to the peer alongside the offer and the
/// key-exchange write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ssh2AuthOptions {
    pub key_exch_algs: Vec<String>,
    pub encrypt_algs: Vec<String>,
    pub mac_algs: Vec<String>,
    pub compress_algs: Vec<String>,
    pub dh_public_key: Vec<u8>,
}

impl Ssh2AuthOptions {
    fn put_list(w: &mut PayloadWriter, list: &[String]) {
        w.put_u16(list.len() as u16);
        for item in list {
            w.put_str(item);
        }
    }

    fn get_list(r: &mut PayloadReader) -> ControlResult<Vec<String>> {
        let n = r.get_u16()?;
        let mut list = Vec::with_capacity(n as usize);
        for _ in 0..n {
            list.push(r.get_str()?);
        }
        Ok(list)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        Self::put_list(&mut w, &self.key_exch_algs);
        Self::put_list(&mut w, &self.encrypt_algs);
        Self::put_list(&mut w, &self.mac_algs);
        Self::put_list(&mut w, &self.compress_algs);
        w.put_bytes(&self.dh_public_key);
        w.freeze()
    }

    pub fn from_bytes(buf: Bytes) -> ControlResult<Self> {
        let mut r = PayloadReader::new(buf);
        let options = Self {
            key_exch_algs: Self::get_list(&mut r)?,
            encrypt_algs: Self::get_list(&mut r)?,
            mac_algs: Self::get_list(&mut r)?,
            compress_algs: Self::get_list(&mut r)?,
            dh_public_key: r.get_bytes()?.to_vec(),
        };
        r.finish()?;
        Ok(options)
    }
}

fn pick_allowed(
    offered: &[String],
    allowed: &[&str],
    what: &str,
) -> ControlResult<String> {
    match offered.first() {
        Some(alg) if allowed.contains(&alg.as_str()) => Ok(alg.clone()),
        Some(alg) => {
            error!(alg = %alg, "unsupported {what} algorithm");
            Err(ControlError::UnknownPolicy(format!(
                "unsupported {what} algorithm {alg}"
            )))
        },
        None => Err(ControlError::MalformedMessage(format!(
            "peer offered no {what} algorithm"
        ))),
    }
}

pub struct AuthSsh2PolicySet {
    core: Arc<SecurityCore>,
    dh: DhParameters,
}

impl AuthSsh2PolicySet {
    /// Fails when the built-in group does not validate; the policy is then
    /// inoperative and cannot be registered.
    pub fn new(core: Arc<SecurityCore>) -> ControlResult<Self> {
        let dh = DhParameters::standard_group()?;
        Ok(Self { core, dh })
    }

    fn context_data_from_profile(
        &self,
        profile: &AuthSduProtectionProfile,
    ) -> Ssh2ContextData {
        let (private_key, public_key) = self.dh.generate_keypair();
        Ssh2ContextData {
            key_exch_alg: profile
                .auth
                .param(KEY_EXCHANGE_ALGORITHM)
                .unwrap_or("EDH")
                .to_string(),
            encrypt_alg: profile
                .auth
                .param(ENCRYPTION_ALGORITHM)
                .unwrap_or("AES-128")
                .to_string(),
            mac_alg: profile.auth.param(MAC_ALGORITHM).unwrap_or("SHA1").to_string(),
            compress_alg: profile
                .auth
                .param(COMPRESSION_ALGORITHM)
                .unwrap_or("none")
                .to_string(),
            private_key,
            public_key,
            peer_public_key: None,
            shared_secret: None,
            pending_enable: None,
        }
    }

    fn arm_timer(&self, session_id: u32) {
        let core = Arc::clone(&self.core);
        let handle = self.core.timer.schedule(HANDSHAKE_TIMEOUT, move || {
            error!(session_id, "key exchange timed out, destroying context");
            core.destroy_security_context(session_id);
        });
        self.core.with_context(session_id, |ctx| {
            ctx.timer = Some(handle);
        });
    }

    fn options_from_context(&self, data: &Ssh2ContextData) -> Ssh2AuthOptions {
        Ssh2AuthOptions {
            key_exch_algs: vec![data.key_exch_alg.clone()],
            encrypt_algs: vec![data.encrypt_alg.clone()],
            mac_algs: vec![data.mac_alg.clone()],
            compress_algs: vec![data.compress_alg.clone()],
            dh_public_key: data.public_key.to_bytes_be(),
        }
    }

    fn crypto_profile(data: &Ssh2ContextData) -> CryptoProfile {
        CryptoProfile {
            encrypt_alg: data.encrypt_alg.clone(),
            mac_alg: data.mac_alg.clone(),
            compress_alg: data.compress_alg.clone(),
            shared_secret: data.shared_secret.clone().unwrap_or_default(),
        }
    }

    /// Move the context into a `REQUESTED_ENABLE_*` state and ask the
    /// datapath for the given protection direction.
    fn request_enable(
        &self,
        session_id: u32,
        direction: CryptoDirection,
        next_state: SecContextState,
    ) -> ControlResult<DatapathStatus> {
        let profile = self
            .core
            .with_context(session_id, |ctx| {
                ctx.state = next_state;
                let data = ctx.ssh2_data_mut().ok_or_else(|| {
                    ControlError::Internal("context is not an SSH2 context".into())
                })?;
                data.pending_enable = Some(direction);
                Ok::<_, ControlError>(Self::crypto_profile(data))
            })
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "request_enable",
                    format!("no security context for session {session_id}"),
                )
            })??;

        match self.core.datapath.enable_crypto(session_id, direction, &profile) {
            Ok(status) => Ok(status),
            Err(e) => {
                self.core.destroy_security_context(session_id);
                Err(e)
            },
        }
    }

    /// Take the pending direction if state and direction match the expected
    /// completion; a mismatch is a protocol error that destroys the context.
    fn accept_completion(
        &self,
        session_id: u32,
        direction: CryptoDirection,
    ) -> ControlResult<()> {
        let accepted = self
            .core
            .with_context(session_id, |ctx| {
                let pending = ctx.ssh2_data().and_then(|d| d.pending_enable);
                let in_request_state = matches!(
                    ctx.state,
                    SecContextState::ReqEnableDecrypt
                        | SecContextState::ReqEnableEncrypt
                );
                if in_request_state && pending == Some(direction) {
                    if let Some(data) = ctx.ssh2_data_mut() {
                        data.pending_enable = None;
                    }
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if !accepted {
            error!(session_id, ?direction, "out-of-state crypto completion");
            self.core.destroy_security_context(session_id);
            return Err(ControlError::wrong_state(
                "crypto_enable_completed",
                format!("session {session_id}"),
            ));
        }
        Ok(())
    }

    /// Decryption is on: send our algorithms and public key to the peer,
    /// then ask for encryption.
    fn decryption_enabled(&self, session_id: u32) -> ControlResult<AuthStatus> {
        debug!(session_id, "decryption enabled");

        let options = self
            .core
            .with_context(session_id, |ctx| {
                ctx.ssh2_data().map(|d| self.options_from_context(d))
            })
            .flatten()
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "decryption_enabled",
                    format!("no SSH2 context for session {session_id}"),
                )
            })?;

        if let Err(e) = self.core.ribd.remote_write_object(
            EDH_EXCHANGE,
            EDH_EXCHANGE,
            options.to_bytes(),
            0,
            RemoteProcessId {
                port_id: session_id,
            },
        ) {
            error!("failed to send the key-exchange message: {e}");
            self.core.destroy_security_context(session_id);
            return Ok(AuthStatus::Failed);
        }

        match self.request_enable(
            session_id,
            CryptoDirection::Encrypt,
            SecContextState::ReqEnableEncrypt,
        )? {
            DatapathStatus::Successful => self.encryption_enabled(session_id),
            DatapathStatus::InProgress => Ok(AuthStatus::InProgress),
        }
    }

    /// Both directions of the offering side are on; the handshake settles.
    fn encryption_enabled(&self, session_id: u32) -> ControlResult<AuthStatus> {
        debug!(session_id, "encryption enabled");
        self.settle(session_id)
    }

    /// Atomic encrypt+decrypt enablement finished on the answering side.
    fn encryption_decryption_enabled(
        &self,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        debug!(session_id, "encryption and decryption enabled");
        self.settle(session_id)
    }

    fn settle(&self, session_id: u32) -> ControlResult<AuthStatus> {
        let timer = self
            .core
            .with_context(session_id, |ctx| {
                ctx.state = SecContextState::EncryptionSetup;
                ctx.timer.take()
            })
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "settle",
                    format!("no security context for session {session_id}"),
                )
            })?;
        if let Some(handle) = timer {
            self.core.timer.cancel(handle);
        }
        Ok(AuthStatus::InProgress)
    }
}

impl AuthPolicySet for AuthSsh2PolicySet {
    fn policy_type(&self) -> &'static str {
        AUTH_SSH2
    }

    fn get_auth_policy(
        &self,
        session_id: u32,
        profile: &AuthSduProtectionProfile,
    ) -> ControlResult<AuthPolicy> {
        if profile.auth.name != AUTH_SSH2 {
            error!(name = %profile.auth.name, "wrong policy name");
            return Err(ControlError::UnknownPolicy(profile.auth.name.clone()));
        }
        if self.core.has_security_context(session_id) {
            return Err(ControlError::wrong_state(
                "get_auth_policy",
                format!("session {session_id} already has a context"),
            ));
        }

        let data = self.context_data_from_profile(profile);
        let options = self.options_from_context(&data);

        self.core.add_security_context(SecurityContext {
            session_id,
            policy_type: AUTH_SSH2,
            state: SecContextState::WaitEdhExchange,
            crc_policy: profile.crc.clone(),
            ttl_policy: profile.ttl.clone(),
            data: ContextData::Ssh2(Box::new(data)),
            timer: None,
        })?;
        self.arm_timer(session_id);

        Ok(AuthPolicy {
            name: AUTH_SSH2.to_string(),
            versions: vec![profile.auth.version.clone()],
            options: options.to_bytes(),
        })
    }

    fn initiate(
        &self,
        policy: &AuthPolicy,
        profile: &AuthSduProtectionProfile,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        if let Err(e) = policy.check(AUTH_SSH2) {
            error!("refusing authentication offer: {e}");
            return Ok(AuthStatus::Failed);
        }
        if self.core.has_security_context(session_id) {
            error!(session_id, "a security context already exists");
            return Ok(AuthStatus::Failed);
        }

        let offered = match Ssh2AuthOptions::from_bytes(policy.options.clone()) {
            Ok(options) => options,
            Err(e) => {
                error!("could not decode SSH2 options: {e}");
                return Ok(AuthStatus::Failed);
            },
        };

        let key_exch_alg =
            match pick_allowed(&offered.key_exch_algs, KEY_EXCHANGE_ALLOWED, "key exchange")
            {
                Ok(alg) => alg,
                Err(_) => return Ok(AuthStatus::Failed),
            };
        let encrypt_alg =
            match pick_allowed(&offered.encrypt_algs, ENCRYPTION_ALLOWED, "encryption") {
                Ok(alg) => alg,
                Err(_) => return Ok(AuthStatus::Failed),
            };
        let mac_alg = match pick_allowed(&offered.mac_algs, MAC_ALLOWED, "MAC") {
            Ok(alg) => alg,
            Err(_) => return Ok(AuthStatus::Failed),
        };

        let peer_public_key = match self.dh.import_public_key(&offered.dh_public_key)
        {
            Ok(key) => key,
            Err(e) => {
                error!("rejecting peer public key: {e}");
                return Ok(AuthStatus::Failed);
            },
        };

        let (private_key, public_key) = self.dh.generate_keypair();
        let shared_secret = self.dh.shared_secret(&private_key, &peer_public_key);
        debug!(
            session_id,
            secret_len = shared_secret.len(),
            "computed the shared secret"
        );

        let data = Ssh2ContextData {
            key_exch_alg,
            encrypt_alg,
            mac_alg,
            compress_alg: offered
                .compress_algs
                .first()
                .cloned()
                .unwrap_or_else(|| "none".to_string()),
            private_key,
            public_key,
            peer_public_key: Some(peer_public_key),
            shared_secret: Some(shared_secret),
            pending_enable: None,
        };

        self.core.add_security_context(SecurityContext {
            session_id,
            policy_type: AUTH_SSH2,
            state: SecContextState::Fresh,
            crc_policy: profile.crc.clone(),
            ttl_policy: profile.ttl.clone(),
            data: ContextData::Ssh2(Box::new(data)),
            timer: None,
        })?;
        self.arm_timer(session_id);

        match self.request_enable(
            session_id,
            CryptoDirection::Decrypt,
            SecContextState::ReqEnableDecrypt,
        )? {
            DatapathStatus::Successful => {
                self.accept_completion(session_id, CryptoDirection::Decrypt)?;
                self.decryption_enabled(session_id)
            },
            DatapathStatus::InProgress => Ok(AuthStatus::InProgress),
        }
    }

    fn process_incoming(
        &self,
        msg: &CdapMessage,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        if msg.op_code != CdapOpCode::MWrite || msg.object_class != EDH_EXCHANGE {
            error!(op = ?msg.op_code, class = %msg.object_class, "wrong message type");
            return Ok(AuthStatus::Failed);
        }

        let state = self
            .core
            .with_context(session_id, |ctx| ctx.state)
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "process_incoming",
                    format!("no security context for session {session_id}"),
                )
            })?;
        if state != SecContextState::WaitEdhExchange {
            error!(session_id, %state, "key exchange arrived out of state");
            self.core.destroy_security_context(session_id);
            return Ok(AuthStatus::Failed);
        }

        let offered = match Ssh2AuthOptions::from_bytes(Bytes::copy_from_slice(
            &msg.object_value,
        )) {
            Ok(options) => options,
            Err(e) => {
                error!("could not decode SSH2 options: {e}");
                return Ok(AuthStatus::Failed);
            },
        };

        let peer_public_key = match self.dh.import_public_key(&offered.dh_public_key)
        {
            Ok(key) => key,
            Err(e) => {
                error!("rejecting peer public key: {e}");
                self.core.destroy_security_context(session_id);
                return Ok(AuthStatus::Failed);
            },
        };

        let imported = self
            .core
            .with_context(session_id, |ctx| {
                let Some(data) = ctx.ssh2_data_mut() else {
                    return false;
                };
                let secret = peer_public_key.clone();
                data.shared_secret =
                    Some(self.dh.shared_secret(&data.private_key, &secret));
                data.peer_public_key = Some(secret);
                true
            })
            .unwrap_or(false);
        if !imported {
            return Ok(AuthStatus::Failed);
        }

        match self.request_enable(
            session_id,
            CryptoDirection::EncryptDecrypt,
            SecContextState::ReqEnableEncrypt,
        )? {
            DatapathStatus::Successful => {
                self.accept_completion(session_id, CryptoDirection::EncryptDecrypt)?;
                self.encryption_decryption_enabled(session_id)
            },
            DatapathStatus::InProgress => Ok(AuthStatus::InProgress),
        }
    }

    fn set_param(&self, name: &str, value: &str) -> ControlResult<()> {
        debug!(name, value, "SSH2 policy has no parameters");
        Err(ControlError::UnknownPolicy(format!(
            "{AUTH_SSH2} has no parameter '{name}'"
        )))
    }

    fn crypto_enable_completed(
        &self,
        session_id: u32,
        direction: CryptoDirection,
    ) -> ControlResult<AuthStatus> {
        self.accept_completion(session_id, direction)?;
        match direction {
            CryptoDirection::Decrypt => self.decryption_enabled(session_id),
            CryptoDirection::Encrypt => self.encryption_enabled(session_id),
            CryptoDirection::EncryptDecrypt => {
                self.encryption_decryption_enabled(session_id)
            },
        }
    }
}
