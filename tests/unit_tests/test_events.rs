// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Event-bus fan-out and the N-1 deallocation lifetime shortcut.

use std::sync::Arc;

use rina_control_rs::{
    errors::ControlError,
    events::{EventBus, EventKind, EventSubscriber, InternalEvent},
    security::policy::{AUTH_PASSWORD, AuthStatus},
};

use crate::unit_tests::test_security::{password_profile, sec_stack};

#[tokio::test]
async fn n_minus_one_deallocation_discards_the_session_context() {
    // A password handshake is mid-flight on session 7 when its N-1 flow
    // goes away.
    let mut server = sec_stack(false);
    let client = sec_stack(false);
    server.manager.add_policy_set(AUTH_PASSWORD).expect("server");
    client.manager.add_policy_set(AUTH_PASSWORD).expect("client");

    let session = 7;
    let profile = password_profile("xor");
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
    assert!(server.manager.get_security_context_state(session).is_some());

    let bus = EventBus::new();
    let subscriber: Arc<dyn EventSubscriber> =
        Arc::clone(&server.manager) as Arc<dyn EventSubscriber>;
    bus.subscribe(EventKind::NMinusOneFlowDeallocated, subscriber);

    bus.publish(&InternalEvent::NMinusOneFlowDeallocated { port_id: session });
    assert!(server.manager.get_security_context_state(session).is_none());

    // Any subsequent message for session 7 is wrong-state.
    let (_, challenge) = server.cdap_rx.try_recv().expect("challenge was sent");
    assert!(matches!(
        server.manager.process_incoming(&challenge, session),
        Err(ControlError::WrongState { .. })
    ));

    // Unrelated sessions are untouched.
    bus.publish(&InternalEvent::NMinusOneFlowDeallocated { port_id: 1234 });

    server.cancel.cancel();
    client.cancel.cancel();
}
