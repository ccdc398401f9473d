// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-process control-plane stack and the plumbing to wire two of them
//! back to back: the CDAP stream of one is delivered into the other the way
//! the N-1 SDU path would.

use std::{sync::Arc, time::Duration};

use rina_control_rs::{
    datapath::{Datapath, DatapathEvent, StubDatapath},
    events::{EventBus, EventKind, EventSubscriber},
    flow_allocator::{FlowAllocator, FlowAllocatorParts},
    models::{
        cdap::{CdapMessage, ChannelRibDaemon, RemoteProcessId, RibDaemon},
        message::MessagePayload,
        naming::ApplicationName,
        qos::{FlowSpec, QoSCube},
    },
    registry::{IpcProcessRegistry, PortIdAllocator},
    rib::RibStore,
    security::{
        SecurityCore, SecurityManager,
        policy::{AUTH_NONE, AUTH_PASSWORD, AUTH_SSH2, AuthStatus},
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const MPL: Duration = Duration::from_millis(100);

const AUTH_OBJECT_CLASSES: &[&str] = &[
    "challenge request",
    "challenge reply",
    "Ephemeral Diffie-Hellman exchange",
];

pub struct TestStack {
    pub fa: Arc<FlowAllocator>,
    pub security: Arc<SecurityManager>,
    pub registry: Arc<IpcProcessRegistry>,
    pub port_ids: Arc<PortIdAllocator>,
    pub rib: Arc<RibStore>,
    pub bus: Arc<EventBus>,
    pub outbound_rx: mpsc::UnboundedReceiver<(u32, MessagePayload)>,
    pub cdap_rx: mpsc::UnboundedReceiver<(RemoteProcessId, CdapMessage)>,
    pub datapath_rx: mpsc::UnboundedReceiver<DatapathEvent>,
    pub cancel: CancellationToken,
}

impl TestStack {
    pub fn new(ipcp_id: u16, async_crypto: bool) -> Self {
        let cancel = CancellationToken::new();
        let timer =
            rina_control_rs::security::timer::DeadlineTimer::new(cancel.clone());
        tokio::spawn(Arc::clone(&timer).run());

        let (ribd, cdap_rx) = ChannelRibDaemon::new();
        let ribd: Arc<dyn RibDaemon> = Arc::new(ribd);
        let (datapath, datapath_rx) = StubDatapath::new(async_crypto);
        let datapath: Arc<dyn Datapath> = Arc::new(datapath);

        let registry = Arc::new(IpcProcessRegistry::new());
        let port_ids = Arc::new(PortIdAllocator::new());
        let rib = Arc::new(RibStore::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let fa = FlowAllocator::new(FlowAllocatorParts {
            outbound: outbound_tx,
            ribd: Arc::clone(&ribd),
            datapath: Arc::clone(&datapath),
            timer: Arc::clone(&timer),
            registry: Arc::clone(&registry),
            port_ids: Arc::clone(&port_ids),
            rib: Arc::clone(&rib),
            mpl: MPL,
            local_ipcp_id: ipcp_id,
            local_control_port_id: 100 + ipcp_id as u32,
            dif_name: ApplicationName::dif("normal.DIF"),
            cubes: vec![QoSCube {
                id: 1,
                name: "best-effort".into(),
                bounds: FlowSpec {
                    average_bandwidth: Some(10_000_000),
                    ..Default::default()
                },
            }],
        });

        let core = SecurityCore::new(timer, ribd, datapath);
        let security = SecurityManager::new(core);
        for policy in [AUTH_NONE, AUTH_PASSWORD, AUTH_SSH2] {
            security.add_policy_set(policy).expect("policy set");
        }

        let bus = Arc::new(EventBus::new());
        let subscriber: Arc<dyn EventSubscriber> =
            Arc::clone(&security) as Arc<dyn EventSubscriber>;
        bus.subscribe(EventKind::NMinusOneFlowDeallocated, subscriber);

        Self {
            fa,
            security,
            registry,
            port_ids,
            rib,
            bus,
            outbound_rx,
            cdap_rx,
            datapath_rx,
            cancel,
        }
    }

    /// Feed queued datapath completions back in. Returns how many were
    /// handled.
    pub fn pump_datapath(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.datapath_rx.try_recv() {
            handled += 1;
            let outcome = match event {
                DatapathEvent::CreateConnectionResponse {
                    port_id,
                    cep_id,
                    result,
                } => self
                    .fa
                    .process_create_connection_response(port_id, cep_id, result),
                DatapathEvent::CreateConnectionResult { port_id, result } => {
                    self.fa.process_create_connection_result(port_id, result)
                },
                DatapathEvent::UpdateConnectionResponse {
                    port_id,
                    cep_id,
                    result,
                } => self
                    .fa
                    .process_update_connection_response(port_id, cep_id, result),
                DatapathEvent::DestroyConnectionResult { port_id, result } => {
                    self.fa.process_destroy_connection_result(port_id, result)
                },
                DatapathEvent::CryptoEnabled {
                    port_id,
                    direction,
                    result,
                } => self
                    .security
                    .crypto_enable_completed(port_id, direction, result)
                    .map(|_| ()),
            };
            outcome.expect("completion accepted");
        }
        handled
    }

    /// Deliver every queued outgoing CDAP message into the peer stack.
    pub fn deliver_cdap_to(&mut self, peer: &TestStack) -> usize {
        let mut delivered = 0;
        while let Ok((remote, msg)) = self.cdap_rx.try_recv() {
            delivered += 1;
            peer.handle_cdap(&msg, remote.port_id);
        }
        delivered
    }

    /// The daemon's routing: authentication classes go to the security
    /// manager, everything else to the Flow Allocator.
    pub fn handle_cdap(&self, msg: &CdapMessage, session_port_id: u32) {
        if AUTH_OBJECT_CLASSES.contains(&msg.object_class.as_str()) {
            match self.security.process_incoming(msg, session_port_id) {
                Ok(AuthStatus::Failed) => {
                    self.security.destroy_security_context(session_port_id);
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!("auth message dropped: {e}");
                },
            }
            return;
        }
        if let Err(e) = self.fa.cdap_message_received(msg, session_port_id) {
            tracing::warn!("cdap message dropped: {e}");
        }
    }
}

/// Ping-pong the two stacks until no datapath completion and no CDAP
/// message is in flight.
pub fn run_until_quiet(a: &mut TestStack, b: &mut TestStack) {
    loop {
        let mut moved = 0;
        moved += a.pump_datapath();
        moved += b.pump_datapath();
        moved += a.deliver_cdap_to(b);
        moved += b.deliver_cdap_to(a);
        if moved == 0 {
            return;
        }
    }
}
