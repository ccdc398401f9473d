// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flow Allocator FSM traces: the happy requestor path, refused requests,
//! teardown with its 2-MPL drain, and the tie-breaks around simultaneous
//! teardown.

use std::{sync::Arc, time::Duration};

use rina_control_rs::{
    datapath::{Datapath, DatapathEvent, StubDatapath},
    errors::ControlError,
    flow_allocator::{
        FlowAllocator, FlowAllocatorParts,
        instance::FaiState,
        policy::FlowRequestEvent,
        rib::{FLOW_RIB_OBJECT_CLASS, flow_object_name},
    },
    models::{
        cdap::{CdapMessage, CdapOpCode, ChannelRibDaemon, RemoteProcessId, RibDaemon},
        flow::Flow,
        message::MessagePayload,
        naming::ApplicationName,
        qos::{FlowSpec, QoSCube},
    },
    registry::{AppRegistration, IpcProcessRegistry, PortIdAllocator},
    rib::RibStore,
    security::timer::DeadlineTimer,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MPL: Duration = Duration::from_millis(100);

struct FaHarness {
    fa: Arc<FlowAllocator>,
    registry: Arc<IpcProcessRegistry>,
    port_ids: Arc<PortIdAllocator>,
    rib: Arc<RibStore>,
    outbound_rx: mpsc::UnboundedReceiver<(u32, MessagePayload)>,
    cdap_rx: mpsc::UnboundedReceiver<(RemoteProcessId, CdapMessage)>,
    datapath_rx: mpsc::UnboundedReceiver<DatapathEvent>,
    cancel: CancellationToken,
}

fn harness() -> FaHarness {
    let cancel = CancellationToken::new();
    let timer = DeadlineTimer::new(cancel.clone());
    tokio::spawn(Arc::clone(&timer).run());

    let (ribd, cdap_rx) = ChannelRibDaemon::new();
    let ribd: Arc<dyn RibDaemon> = Arc::new(ribd);
    let (datapath, datapath_rx) = StubDatapath::new(false);
    let datapath: Arc<dyn Datapath> = Arc::new(datapath);
    let registry = Arc::new(IpcProcessRegistry::new());
    let port_ids = Arc::new(PortIdAllocator::new());
    let rib = Arc::new(RibStore::new());
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let fa = FlowAllocator::new(FlowAllocatorParts {
        outbound: outbound_tx,
        ribd,
        datapath,
        timer,
        registry: Arc::clone(&registry),
        port_ids: Arc::clone(&port_ids),
        rib: Arc::clone(&rib),
        mpl: MPL,
        local_ipcp_id: 1,
        local_control_port_id: 100,
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

    FaHarness {
        fa,
        registry,
        port_ids,
        rib,
        outbound_rx,
        cdap_rx,
        datapath_rx,
        cancel,
    }
}

impl FaHarness {
    /// Feed every queued datapath completion back into the allocator.
    fn pump_datapath(&mut self) {
        while let Ok(event) = self.datapath_rx.try_recv() {
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
                DatapathEvent::CryptoEnabled { .. } => Ok(()),
            };
            outcome.expect("datapath completion accepted");
        }
    }

    /// Walk a requestor flow to FLOW_ALLOCATED, answering the peer's part.
    fn allocate(&mut self, reply_port: u32) -> u32 {
        self.fa
            .submit_allocate_request(FlowRequestEvent {
                source_name: ApplicationName::new("/apps/src", "1", "", "").expect("name"),
                dest_name: ApplicationName::new("/apps/dst", "1", "", "").expect("name"),
                flow_spec: FlowSpec::default(),
                dif_name: ApplicationName::dif("normal.DIF"),
                reply_port_id: reply_port,
            })
            .expect("submit");

        // NO_STATE -> CONNECTION_CREATE_REQUESTED happened synchronously;
        // the datapath answer advances to MESSAGE_TO_PEER_FAI_SENT.
        self.pump_datapath();

        let (_, create) = self.cdap_rx.try_recv().expect("M_CREATE to the peer");
        assert_eq!(create.op_code, CdapOpCode::MCreate);
        assert_eq!(create.object_class, FLOW_RIB_OBJECT_CLASS);
        let port_id = rina_control_rs::flow_allocator::rib::port_id_from_object_name(
            &create.object_name,
        )
        .expect("port in object name");
        assert_eq!(
            self.fa.instance(port_id).expect("instance").state(),
            FaiState::MessageToPeerFaiSent
        );

        // The peer accepts: its side of the flow comes back in M_CREATE_R.
        let mut peer_flow = Flow::from_bytes(create.object_value).expect("flow");
        peer_flow.dest_port_id = 7001;
        peer_flow.dest_cep_id = 8001;
        let response = CdapMessage {
            op_code: CdapOpCode::MCreateR,
            object_class: FLOW_RIB_OBJECT_CLASS.into(),
            object_name: create.object_name.clone(),
            object_value: peer_flow.to_bytes(),
            invoke_id: create.invoke_id,
            result: 0,
            result_reason: String::new(),
        };
        self.fa
            .cdap_message_received(&response, port_id)
            .expect("create response");
        self.pump_datapath();

        assert_eq!(
            self.fa.instance(port_id).expect("instance").state(),
            FaiState::FlowAllocated
        );
        port_id
    }
}

#[tokio::test]
async fn happy_path_local_allocate() {
    let mut h = harness();
    let port_id = h.allocate(55);

    // The requesting side hears back with the assigned port and result 0.
    let (dest, payload) = h.outbound_rx.try_recv().expect("allocate result");
    assert_eq!(dest, 55);
    match payload {
        MessagePayload::AppAllocateFlowRequestResult(result) => {
            assert_eq!(result.port_id, port_id as i32);
            assert!(result.error_description.is_empty());
            assert_eq!(result.ipcp_port_id, 100);
        },
        other => panic!("unexpected payload {other:?}"),
    }

    // The flow is indexed and published in the RIB.
    assert!(h.registry.flow_lookup(port_id).is_some());
    assert!(h.rib.read(&flow_object_name(port_id)).is_some());
    assert_eq!(h.fa.live_flow_count(), 1);

    h.cancel.cancel();
}

#[tokio::test]
async fn unsatisfiable_spec_fails_without_an_instance() {
    let mut h = harness();
    h.fa
        .submit_allocate_request(FlowRequestEvent {
            source_name: ApplicationName::new("/apps/src", "1", "", "").expect("name"),
            dest_name: ApplicationName::new("/apps/dst", "1", "", "").expect("name"),
            flow_spec: FlowSpec {
                loss_ppm: Some(0),
                ..Default::default()
            },
            dif_name: ApplicationName::dif("normal.DIF"),
            reply_port_id: 55,
        })
        .expect("submit");

    let (_, payload) = h.outbound_rx.try_recv().expect("failure surfaced");
    match payload {
        MessagePayload::AppAllocateFlowRequestResult(result) => {
            assert!(result.port_id < 0);
            assert_eq!(
                result.port_id,
                ControlError::QoSNotAchievable.result_code()
            );
        },
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(h.fa.live_flow_count(), 0);
    h.cancel.cancel();
}

#[tokio::test]
async fn peer_refusal_surfaces_a_negative_result() {
    let mut h = harness();
    h.fa
        .submit_allocate_request(FlowRequestEvent {
            source_name: ApplicationName::new("/apps/src", "1", "", "").expect("name"),
            dest_name: ApplicationName::new("/apps/dst", "1", "", "").expect("name"),
            flow_spec: FlowSpec::default(),
            dif_name: ApplicationName::dif("normal.DIF"),
            reply_port_id: 56,
        })
        .expect("submit");
    h.pump_datapath();
    let (_, create) = h.cdap_rx.try_recv().expect("M_CREATE");
    let port_id = rina_control_rs::flow_allocator::rib::port_id_from_object_name(
        &create.object_name,
    )
    .expect("port");

    let refusal = CdapMessage {
        op_code: CdapOpCode::MCreateR,
        object_class: FLOW_RIB_OBJECT_CLASS.into(),
        object_name: create.object_name,
        object_value: bytes::Bytes::new(),
        invoke_id: create.invoke_id,
        result: -9,
        result_reason: "application not found".into(),
    };
    h.fa
        .cdap_message_received(&refusal, port_id)
        .expect("refusal handled");

    let (_, payload) = h.outbound_rx.try_recv().expect("failure surfaced");
    match payload {
        MessagePayload::AppAllocateFlowRequestResult(result) => {
            assert_eq!(result.port_id, -9);
            assert_eq!(result.error_description, "application not found");
        },
        other => panic!("unexpected payload {other:?}"),
    }
    // The default retry policy gives up immediately; the port is free again.
    assert!(!h.port_ids.is_claimed(port_id));
    h.cancel.cancel();
}

#[tokio::test]
async fn responder_path_notifies_and_answers() {
    let mut h = harness();
    let dest = ApplicationName::new("/apps/dst", "1", "", "").expect("name");
    h.registry
        .register_app(
            &dest,
            AppRegistration {
                dif_name: ApplicationName::dif("normal.DIF"),
                app_port_id: 77,
            },
        )
        .expect("register");

    let incoming = Flow {
        source_name: ApplicationName::new("/apps/src", "1", "", "").expect("name"),
        dest_name: dest,
        dif_name: ApplicationName::dif("normal.DIF"),
        source_port_id: 4001,
        source_cep_id: 4002,
        qos_cube_id: 1,
        ..Default::default()
    };
    let create = CdapMessage {
        op_code: CdapOpCode::MCreate,
        object_class: FLOW_RIB_OBJECT_CLASS.into(),
        object_name: flow_object_name(4001),
        object_value: incoming.to_bytes(),
        invoke_id: 11,
        result: 0,
        result_reason: String::new(),
    };
    h.fa.cdap_message_received(&create, 4001).expect("M_CREATE");

    // The application was told about the incoming flow.
    let (dest_port, payload) = h.outbound_rx.try_recv().expect("arrived");
    assert_eq!(dest_port, 77);
    let port_id = match payload {
        MessagePayload::AppAllocateFlowRequestArrived(arrived) => arrived.port_id,
        other => panic!("unexpected payload {other:?}"),
    };
    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::AppNotifiedOfIncomingFlow
    );

    // It accepts; the connection is updated and M_CREATE_R goes back.
    h.fa
        .submit_allocate_response(port_id, 0)
        .expect("allocate response");
    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::ConnectionUpdateRequested
    );
    h.pump_datapath();
    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::FlowAllocated
    );

    let (_, answer) = h.cdap_rx.try_recv().expect("M_CREATE_R");
    assert_eq!(answer.op_code, CdapOpCode::MCreateR);
    assert_eq!(answer.result, 0);
    assert_eq!(answer.invoke_id, 11);
    let flow = Flow::from_bytes(answer.object_value).expect("flow");
    assert_eq!(flow.dest_port_id, port_id);
    assert_ne!(flow.dest_cep_id, 0);

    h.cancel.cancel();
}

#[tokio::test]
async fn refusing_an_unknown_destination() {
    let mut h = harness();
    let incoming = Flow {
        source_name: ApplicationName::new("/apps/src", "1", "", "").expect("name"),
        dest_name: ApplicationName::new("/apps/nobody", "1", "", "").expect("name"),
        dif_name: ApplicationName::dif("normal.DIF"),
        source_port_id: 4001,
        qos_cube_id: 1,
        ..Default::default()
    };
    let create = CdapMessage {
        op_code: CdapOpCode::MCreate,
        object_class: FLOW_RIB_OBJECT_CLASS.into(),
        object_name: flow_object_name(4001),
        object_value: incoming.to_bytes(),
        invoke_id: 12,
        result: 0,
        result_reason: String::new(),
    };
    h.fa.cdap_message_received(&create, 4001).expect("M_CREATE");

    let (_, answer) = h.cdap_rx.try_recv().expect("negative M_CREATE_R");
    assert_eq!(answer.op_code, CdapOpCode::MCreateR);
    assert!(answer.result < 0);
    assert_eq!(h.fa.live_flow_count(), 0);
    h.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn teardown_waits_exactly_one_2mpl_interval() {
    let mut h = harness();
    let port_id = h.allocate(55);
    let _ = h.outbound_rx.try_recv();

    h.fa.submit_deallocate(port_id).expect("deallocate");
    let (_, delete) = h.cdap_rx.try_recv().expect("M_DELETE to the peer");
    assert_eq!(delete.op_code, CdapOpCode::MDelete);

    h.pump_datapath();
    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::Waiting2MplBeforeTearingDown
    );
    // Mid-drain the port is still quarantined and the flow still indexed.
    assert!(h.port_ids.is_claimed(port_id));
    assert!(h.registry.flow_lookup(port_id).is_some());

    tokio::time::sleep(2 * MPL + Duration::from_millis(10)).await;
    tokio::task::yield_now().await;

    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::Finished
    );
    // Only now is the port-id re-offered and every index clean.
    assert!(!h.port_ids.is_claimed(port_id));
    assert!(h.registry.flow_lookup(port_id).is_none());
    assert!(h.rib.read(&flow_object_name(port_id)).is_none());

    // The local requestor hears the deallocation completed.
    let (dest, payload) = h.outbound_rx.try_recv().expect("dealloc response");
    assert_eq!(dest, 55);
    assert!(matches!(
        payload,
        MessagePayload::AppDeallocateFlowResponse(resp) if resp.result == 0
    ));

    h.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn simultaneous_teardown_is_settled_by_the_first_mover() {
    let mut h = harness();
    let port_id = h.allocate(55);
    let _ = h.outbound_rx.try_recv();

    h.fa.submit_deallocate(port_id).expect("local teardown");
    // The remote M_DELETE arrives while we already own the destroy phase.
    let remote_delete = CdapMessage {
        op_code: CdapOpCode::MDelete,
        object_class: FLOW_RIB_OBJECT_CLASS.into(),
        object_name: flow_object_name(port_id),
        object_value: bytes::Bytes::new(),
        invoke_id: 13,
        result: 0,
        result_reason: String::new(),
    };
    h.fa
        .cdap_message_received(&remote_delete, port_id)
        .expect("late delete is a no-op");

    h.pump_datapath();
    tokio::time::sleep(2 * MPL + Duration::from_millis(10)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        h.fa.instance(port_id).expect("instance").state(),
        FaiState::Finished
    );

    // A second local deallocate after FINISHED is also a no-op.
    h.fa.submit_deallocate(port_id).expect("no-op");
    h.cancel.cancel();
}

#[tokio::test]
async fn events_for_unknown_ports_are_wrong_state() {
    let h = harness();
    assert!(matches!(
        h.fa.submit_allocate_response(999, 0),
        Err(ControlError::WrongState { .. })
    ));
    assert!(matches!(
        h.fa.process_create_connection_result(999, 0),
        Err(ControlError::WrongState { .. })
    ));
    h.cancel.cancel();
}
