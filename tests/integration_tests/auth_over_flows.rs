// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Authentication riding the CDAP plumbing between two stacks, and the
//! lifetime coupling between flows, sessions and N-1 events.

use rina_control_rs::{
    events::InternalEvent,
    security::policy::{
        AUTH_PASSWORD, AUTH_SSH2, AuthSduProtectionProfile, AuthStatus,
        PolicyConfig,
    },
};

use crate::integration_tests::common::{TestStack, run_until_quiet};

fn password_profile() -> AuthSduProtectionProfile {
    let mut auth = PolicyConfig::new(AUTH_PASSWORD, "1");
    auth.params.insert("password".into(), "hunter2".into());
    auth.params.insert("challenge-length".into(), "8".into());
    auth.params.insert("cipher".into(), "xor".into());
    AuthSduProtectionProfile {
        auth,
        ..Default::default()
    }
}

fn ssh2_profile() -> AuthSduProtectionProfile {
    let mut auth = PolicyConfig::new(AUTH_SSH2, "1");
    auth.params.insert("keyExchangeAlg".into(), "EDH".into());
    auth.params.insert("encryptAlg".into(), "AES-256".into());
    auth.params.insert("macAlg".into(), "SHA1".into());
    auth.params.insert("compressAlg".into(), "none".into());
    AuthSduProtectionProfile {
        auth,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn password_auth_completes_across_stacks() {
    let mut server = TestStack::new(1, false);
    let mut client = TestStack::new(2, false);
    let session = 7;

    // The client offers; the server challenges; the reply loops back
    // through the shared CDAP plumbing automatically.
    let offer = client
        .security
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &password_profile())
        .expect("offer");
    let status = server
        .security
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &password_profile(), session)
        .expect("initiate");
    assert_eq!(status, AuthStatus::InProgress);

    run_until_quiet(&mut server, &mut client);

    assert_eq!(
        server.security.get_security_context_state(session).as_deref(),
        Some("ESTABLISHED")
    );

    server.cancel.cancel();
    client.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn ssh2_auth_completes_across_stacks() {
    let mut offerer = TestStack::new(1, true);
    let mut answerer = TestStack::new(2, true);
    let session = 9;

    let offer = offerer
        .security
        .get_policy_set(AUTH_SSH2)
        .expect("lookup")
        .get_auth_policy(session, &ssh2_profile())
        .expect("offer");
    let status = answerer
        .security
        .get_policy_set(AUTH_SSH2)
        .expect("lookup")
        .initiate(&offer, &ssh2_profile(), session)
        .expect("initiate");
    assert_eq!(status, AuthStatus::InProgress);

    run_until_quiet(&mut offerer, &mut answerer);

    for stack in [&offerer, &answerer] {
        assert_eq!(
            stack.security.get_security_context_state(session).as_deref(),
            Some("ENCRYPTION_SETUP")
        );
    }

    let secret = |stack: &TestStack| {
        stack
            .security
            .core()
            .with_context(session, |ctx| {
                ctx.ssh2_data().and_then(|d| d.shared_secret.clone())
            })
            .flatten()
    };
    assert_eq!(
        secret(&offerer).expect("offerer secret"),
        secret(&answerer).expect("answerer secret")
    );

    offerer.cancel.cancel();
    answerer.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn session_count_never_exceeds_live_flows_and_n_minus_one_cleans_up() {
    let mut server = TestStack::new(1, false);
    let mut client = TestStack::new(2, false);

    // One live "flow" per stack stands in for the session carrier; the
    // handshake binds one context to its port.
    let session = 7;
    let offer = client
        .security
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .get_auth_policy(session, &password_profile())
        .expect("offer");
    server
        .security
        .get_policy_set(AUTH_PASSWORD)
        .expect("lookup")
        .initiate(&offer, &password_profile(), session)
        .expect("initiate");

    // One security context per side, bound to one session.
    assert_eq!(server.security.core().context_count(), 1);
    assert_eq!(client.security.core().context_count(), 1);

    // The N-1 flow carrying session 7 dies mid-handshake.
    server
        .bus
        .publish(&InternalEvent::NMinusOneFlowDeallocated { port_id: session });
    assert_eq!(server.security.core().context_count(), 0);
    assert!(server.security.get_security_context_state(session).is_none());

    // Any message still in flight for session 7 now hits a dead session.
    let (_, challenge) = server.cdap_rx.try_recv().expect("challenge was emitted");
    assert!(server.security.process_incoming(&challenge, session).is_err());

    server.cancel.cancel();
    client.cancel.cancel();
}
