// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Security-manager semantics and the password challenge-response policy.

use std::{sync::Arc, time::Duration};

use rina_control_rs::{
    datapath::{Datapath, DatapathEvent, StubDatapath},
    errors::ControlError,
    models::cdap::{CdapMessage, ChannelRibDaemon, RemoteProcessId, RibDaemon},
    security::{
        SecurityCore, SecurityManager,
        policy::{
            AUTH_NONE, AUTH_PASSWORD, AuthSduProtectionProfile, AuthStatus,
            PolicyConfig,
        },
        timer::DeadlineTimer,
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct SecStack {
    pub manager: Arc<SecurityManager>,
    pub core: Arc<SecurityCore>,
    pub cdap_rx: mpsc::UnboundedReceiver<(RemoteProcessId, CdapMessage)>,
    pub datapath_rx: mpsc::UnboundedReceiver<DatapathEvent>,
    pub cancel: CancellationToken,
}

pub fn sec_stack(async_crypto: bool) -> SecStack {
    let cancel = CancellationToken::new();
    let timer = DeadlineTimer::new(cancel.clone());
    tokio::spawn(Arc::clone(&timer).run());

    let (ribd, cdap_rx) = ChannelRibDaemon::new();
    let ribd: Arc<dyn RibDaemon> = Arc::new(ribd);
    let (datapath, datapath_rx) = StubDatapath::new(async_crypto);
    let datapath: Arc<dyn Datapath> = Arc::new(datapath);

    let core = SecurityCore::new(timer, ribd, datapath);
    let manager = SecurityManager::new(Arc::clone(&core));
    SecStack {
        manager,
        core,
        cdap_rx,
        datapath_rx,
        cancel,
    }
}

pub fn password_profile(cipher: &str) -> AuthSduProtectionProfile {
    let mut auth = PolicyConfig::new(AUTH_PASSWORD, "1");
    auth.params.insert("password".into(), "hunter2".into());
    auth.params.insert("challenge-length".into(), "8".into());
    auth.params.insert("cipher".into(), cipher.into());
    AuthSduProtectionProfile {
        auth,
        ..Default::default()
    }
}

fn none_profile() -> AuthSduProtectionProfile {
    AuthSduProtectionProfile {
        auth: PolicyConfig::new(AUTH_NONE, "1"),
        ..Default::default()
    }
}

#[tokio::test]
async fn add_policy_set_twice_is_idempotent() {
    let stack = sec_stack(false);
    stack.manager.add_policy_set(AUTH_NONE).expect("first add");
    stack.manager.add_policy_set(AUTH_NONE).expect("second add");
    assert!(matches!(
        stack.manager.add_policy_set("PSOC_authentication-bogus"),
        Err(ControlError::UnknownPolicy(_))
    ));
    stack.cancel.cancel();
}

#[tokio::test]
async fn param_writes_route_by_path() {
    let stack = sec_stack(false);
    stack
        .manager
        .add_policy_set(AUTH_PASSWORD)
        .expect("register");

    // Empty path addresses the manager itself, which has no parameters.
    assert!(stack.manager.set_policy_set_param("", "x", "y").is_err());
    // Unknown paths fail with the policy-not-found kind.
    assert!(matches!(
        stack.manager.set_policy_set_param("no-such-policy", "x", "y"),
        Err(ControlError::UnknownPolicy(_))
    ));
    // A registered policy type accepts its own parameters.
    stack
        .manager
        .set_policy_set_param(AUTH_PASSWORD, "timeout-ms", "250")
        .expect("timeout param");
    assert!(
        stack
            .manager
            .set_policy_set_param(AUTH_PASSWORD, "bogus", "1")
            .is_err()
    );
    stack.cancel.cancel();
}

#[tokio::test]
async fn destroying_an_absent_context_is_a_no_op() {
    let stack = sec_stack(false);
    stack.manager.destroy_security_context(424242);
    stack.manager.destroy_security_context(424242);
    stack.cancel.cancel();
}

#[tokio::test]
async fn none_policy_succeeds_without_messages() {
    let stack = sec_stack(false);
    stack.manager.add_policy_set(AUTH_NONE).expect("register");
    let policy_set = stack.manager.get_policy_set(AUTH_NONE).expect("lookup");

    let offer = policy_set.get_auth_policy(3, &none_profile()).expect("offer");
    assert_eq!(offer.name, AUTH_NONE);

    let status = policy_set
        .initiate(&offer, &none_profile(), 4)
        .expect("initiate");
    assert_eq!(status, AuthStatus::Successful);

    // This policy never exchanges messages; feeding it one fails.
    let stray = CdapMessage::default();
    assert_eq!(
        policy_set.process_incoming(&stray, 4).expect("status"),
        AuthStatus::Failed
    );
    stack.cancel.cancel();
}

async fn password_handshake(cipher: &str) {
    // Two processes: the client offers, the server challenges.
    let mut server = sec_stack(false);
    let mut client = sec_stack(false);
    server
        .manager
        .add_policy_set(AUTH_PASSWORD)
        .expect("server register");
    client
        .manager
        .add_policy_set(AUTH_PASSWORD)
        .expect("client register");

    let session = 7;
    let profile = password_profile(cipher);

    let offer = client
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &profile)
        .expect("offer");

    let status = server
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &profile, session)
        .expect("initiate");
    assert_eq!(status, AuthStatus::InProgress);

    // Server emitted the challenge request; the client answers it.
    let (remote, challenge) = server.cdap_rx.recv().await.expect("challenge");
    assert_eq!(remote.port_id, session);
    assert_eq!(challenge.object_class, "challenge request");
    let status = client
        .manager
        .process_incoming(&challenge, session)
        .expect("client step");
    assert_eq!(status, AuthStatus::InProgress);

    // The encrypted reply travels back and must verify.
    let (_, reply) = client.cdap_rx.recv().await.expect("reply");
    assert_eq!(reply.object_class, "challenge reply");
    let status = server
        .manager
        .process_incoming(&reply, session)
        .expect("server step");
    assert_eq!(status, AuthStatus::Successful);
    assert_eq!(
        server.manager.get_security_context_state(session).as_deref(),
        Some("ESTABLISHED")
    );

    server.cancel.cancel();
    client.cancel.cancel();
}

#[tokio::test]
async fn password_handshake_succeeds_with_the_default_cipher() {
    password_handshake("aes128-gcm").await;
}

#[tokio::test]
async fn password_handshake_succeeds_with_legacy_xor_opt_in() {
    password_handshake("xor").await;
}

#[tokio::test]
async fn wrong_password_fails_the_handshake() {
    let mut server = sec_stack(false);
    let client = sec_stack(false);
    server.manager.add_policy_set(AUTH_PASSWORD).expect("server");
    client.manager.add_policy_set(AUTH_PASSWORD).expect("client");

    let session = 8;
    let offer = client
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &{
            let mut profile = password_profile("xor");
            profile
                .auth
                .params
                .insert("password".into(), "wrong-secret".into());
            profile
        })
        .expect("offer");

    let status = server
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &password_profile("xor"), session)
        .expect("initiate");
    assert_eq!(status, AuthStatus::InProgress);

    let (_, challenge) = server.cdap_rx.recv().await.expect("challenge");
    client
        .manager
        .process_incoming(&challenge, session)
        .expect("client step");
    // Intercept the reply the mismatched client produced.
    let (_, reply) = {
        let mut rx = client.cdap_rx;
        rx.recv().await.expect("reply")
    };
    let status = server
        .manager
        .process_incoming(&reply, session)
        .expect("server step");
    assert_eq!(status, AuthStatus::Failed);

    server.cancel.cancel();
    client.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn password_timeout_destroys_the_context() {
    let mut server = sec_stack(false);
    let client = sec_stack(false);
    server.manager.add_policy_set(AUTH_PASSWORD).expect("server");
    client.manager.add_policy_set(AUTH_PASSWORD).expect("client");
    server
        .manager
        .set_policy_set_param(AUTH_PASSWORD, "timeout-ms", "100")
        .expect("shorten timeout");

    let session = 9;
    let profile = password_profile("xor");
    let offer = client
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &profile)
        .expect("offer");
    server
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &profile, session)
        .expect("initiate");
    let (_, challenge) = server.cdap_rx.recv().await.expect("challenge");

    // The client never answers; the deadline fires and the context goes.
    tokio::time::sleep(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;
    assert!(server.manager.get_security_context_state(session).is_none());

    // A late message for the session is dropped as wrong-state, not a crash.
    let status = server.manager.process_incoming(&challenge, session);
    assert!(matches!(status, Err(ControlError::WrongState { .. })));

    server.cancel.cancel();
    client.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn successful_handshake_cancels_the_deadline() {
    let mut server = sec_stack(false);
    let mut client = sec_stack(false);
    server.manager.add_policy_set(AUTH_PASSWORD).expect("server");
    client.manager.add_policy_set(AUTH_PASSWORD).expect("client");
    server
        .manager
        .set_policy_set_param(AUTH_PASSWORD, "timeout-ms", "100")
        .expect("shorten timeout");

    let session = 10;
    let profile = password_profile("xor");
    let offer = client
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &profile)
        .expect("offer");
    server
        .manager
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &profile, session)
        .expect("initiate");

    let (_, challenge) = server.cdap_rx.recv().await.expect("challenge");
    client
        .manager
        .process_incoming(&challenge, session)
        .expect("client step");
    let (_, reply) = client.cdap_rx.recv().await.expect("reply");
    assert_eq!(
        server
            .manager
            .process_incoming(&reply, session)
            .expect("server step"),
        AuthStatus::Successful
    );

    // The expired deadline must now be a tombstoned no-op.
    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        server.manager.get_security_context_state(session).as_deref(),
        Some("ESTABLISHED")
    );

    server.cancel.cancel();
    client.cancel.cancel();
}
