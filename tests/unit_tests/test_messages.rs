// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Codec contracts: every catalogued variant round-trips bit-exactly, and
//! anything outside the catalog is rejected rather than silently dropped.

use rina_control_rs::{
    errors::ControlError,
    models::{
        app_flow::{
            AppAllocateFlowRequest, AppAllocateFlowRequestArrived,
            AppAllocateFlowRequestResult, AppAllocateFlowResponse,
            AppDeallocateFlowRequest, AppDeallocateFlowResponse,
            AppFlowDeallocatedNotification,
        },
        app_registration::{
            AppGetDifPropertiesRequest, AppGetDifPropertiesResponse,
            AppRegisterApplicationRequest, AppRegisterApplicationResponse,
            AppRegistrationCanceledNotification, AppUnregisterApplicationRequest,
            AppUnregisterApplicationResponse, DifProperties,
        },
        header::HEADER_LEN,
        ipcm::{
            IpcmAllocateFlowRequest, IpcmAllocateFlowResponse,
            IpcmAssignToDifRequest, IpcmAssignToDifResponse,
            IpcmDisconnectFromNeighborRequest, IpcmDisconnectFromNeighborResponse,
            IpcmEnrollToDifRequest, IpcmEnrollToDifResponse,
            IpcmIpcProcessDifRegistrationNotification, IpcmQueryRibRequest,
            IpcmQueryRibResponse, IpcmRegisterApplicationRequest,
            IpcmRegisterApplicationResponse, IpcmUnregisterApplicationRequest,
            IpcmUnregisterApplicationResponse, RibObjectData,
        },
        message::{ControlMessage, MessagePayload, Unspecified},
        naming::ApplicationName,
        qos::{FlowSpec, QoSCube},
        rmt::{
            RmtAddFteRequest, RmtDeleteFteRequest, RmtDumpFtReply, RmtDumpFtRequest,
        },
    },
};

fn src() -> ApplicationName {
    ApplicationName::new("/apps/source", "12", "database", "12").expect("name")
}

fn dst() -> ApplicationName {
    ApplicationName::new("/apps/dest", "12345", "printer", "12623456").expect("name")
}

fn dif() -> ApplicationName {
    ApplicationName::dif("normal.DIF")
}

fn spec() -> FlowSpec {
    FlowSpec {
        average_bandwidth: Some(1_000_000),
        max_delay_us: Some(0),
        ordered_delivery: Some(true),
        ..Default::default()
    }
}

fn cube() -> QoSCube {
    QoSCube {
        id: 2,
        name: "reliable".into(),
        bounds: spec(),
    }
}

fn round_trip(payload: MessagePayload) {
    let msg = ControlMessage {
        family: 23,
        source_port_id: 41,
        dest_port_id: 42,
        source_ipcp_id: 1,
        dest_ipcp_id: 0,
        sequence_number: 7,
        payload,
    };
    let encoded = msg.encode().expect("encode");
    let decoded = ControlMessage::decode(&encoded).expect("decode");
    assert_eq!(decoded, msg);
}

#[test]
fn every_variant_round_trips() {
    let variants: Vec<MessagePayload> = vec![
        Unspecified.into(),
        AppAllocateFlowRequest {
            source_name: src(),
            dest_name: dst(),
            flow_spec: spec(),
        }
        .into(),
        AppAllocateFlowRequestResult {
            source_name: src(),
            port_id: -3,
            error_description: "no route".into(),
            dif_name: dif(),
            ipcp_port_id: 7,
            ipcp_id: 1,
        }
        .into(),
        AppAllocateFlowRequestArrived {
            source_name: src(),
            dest_name: dst(),
            flow_spec: FlowSpec::default(),
            port_id: 9,
            dif_name: dif(),
        }
        .into(),
        AppAllocateFlowResponse {
            result: 0,
            notify_source: true,
            port_id: 9,
        }
        .into(),
        AppDeallocateFlowRequest {
            port_id: 9,
            app_name: src(),
        }
        .into(),
        AppDeallocateFlowResponse {
            result: 0,
            error_description: String::new(),
            app_name: src(),
        }
        .into(),
        AppFlowDeallocatedNotification {
            port_id: 9,
            code: -1,
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
        AppRegisterApplicationRequest {
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
        AppRegisterApplicationResponse {
            result: 0,
            error_description: String::new(),
            app_name: src(),
            dif_name: dif(),
            ipcp_port_id: 7,
            ipcp_id: 1,
        }
        .into(),
        AppUnregisterApplicationRequest {
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
        AppUnregisterApplicationResponse {
            result: -2,
            error_description: "not registered".into(),
            app_name: src(),
        }
        .into(),
        AppRegistrationCanceledNotification {
            code: -1,
            reason: "DIF went away".into(),
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
        AppGetDifPropertiesRequest {
            app_name: src(),
            dif_name: ApplicationName::default(),
        }
        .into(),
        AppGetDifPropertiesResponse {
            result: 0,
            app_name: src(),
            dif_properties: vec![DifProperties {
                dif_name: dif(),
                max_sdu_size: 10_000,
                qos_cubes: vec![cube()],
            }],
        }
        .into(),
        IpcmAssignToDifRequest {
            dif_name: dif(),
            dif_type: "normal".into(),
            qos_cubes: vec![cube()],
        }
        .into(),
        IpcmAssignToDifResponse {
            result: 0,
            error_description: String::new(),
        }
        .into(),
        IpcmIpcProcessDifRegistrationNotification {
            ipc_process_name: src(),
            dif_name: dif(),
            registered: true,
        }
        .into(),
        IpcmEnrollToDifRequest { dif_name: dif() }.into(),
        IpcmEnrollToDifResponse { result: 0 }.into(),
        IpcmDisconnectFromNeighborRequest {
            neighbor_name: dst(),
        }
        .into(),
        IpcmDisconnectFromNeighborResponse { result: 0 }.into(),
        IpcmAllocateFlowRequest {
            source_name: src(),
            dest_name: dst(),
            flow_spec: spec(),
            dif_name: dif(),
            app_port_id: 55,
        }
        .into(),
        IpcmAllocateFlowResponse { result: 0 }.into(),
        IpcmRegisterApplicationRequest {
            app_name: src(),
            dif_name: dif(),
            app_port_id: 55,
        }
        .into(),
        IpcmRegisterApplicationResponse { result: 0 }.into(),
        IpcmUnregisterApplicationRequest {
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
        IpcmUnregisterApplicationResponse { result: 0 }.into(),
        IpcmQueryRibRequest {
            object_class: "flow".into(),
            object_name: "/dif/resource-allocation/flow-allocator/instances".into(),
            object_instance: 0,
            scope: 1,
            filter: String::new(),
        }
        .into(),
        IpcmQueryRibResponse {
            result: 0,
            objects: vec![RibObjectData {
                object_class: "flow".into(),
                object_name: "/dif/resource-allocation/flow-allocator/instances/9"
                    .into(),
                object_instance: 3,
                display_value: "src=/apps/source dst=/apps/dest".into(),
            }],
        }
        .into(),
        RmtAddFteRequest.into(),
        RmtDeleteFteRequest.into(),
        RmtDumpFtRequest.into(),
        RmtDumpFtReply { result: 0 }.into(),
    ];

    for payload in variants {
        round_trip(payload);
    }
}

#[test]
fn unspecified_fields_encode_as_zero_and_empty() {
    round_trip(
        AppAllocateFlowRequest {
            source_name: ApplicationName::default(),
            dest_name: ApplicationName::default(),
            flow_spec: FlowSpec::default(),
        }
        .into(),
    );
}

#[test]
fn unknown_opcode_is_rejected_not_dropped() {
    let msg = ControlMessage {
        family: 23,
        source_port_id: 1,
        dest_port_id: 2,
        source_ipcp_id: 0,
        dest_ipcp_id: 0,
        sequence_number: 1,
        payload: Unspecified.into(),
    };
    let mut encoded = msg.encode().expect("encode").to_vec();
    // Overwrite the opcode field with a value outside the registry.
    encoded[2] = 0xff;
    encoded[3] = 0xfe;
    match ControlMessage::decode(&encoded) {
        Err(ControlError::MalformedMessage(reason)) => {
            assert!(reason.contains("unknown operation code"), "{reason}");
        },
        other => panic!("expected MalformedMessage, got {other:?}"),
    }
}

#[test]
fn role_must_match_the_variant() {
    let msg = ControlMessage {
        family: 23,
        source_port_id: 1,
        dest_port_id: 2,
        source_ipcp_id: 0,
        dest_ipcp_id: 0,
        sequence_number: 1,
        payload: AppDeallocateFlowRequest {
            port_id: 1,
            app_name: src(),
        }
        .into(),
    };
    let mut encoded = msg.encode().expect("encode").to_vec();
    // Flip the role flags from request to notification.
    encoded[4] = 0b0000_0100;
    assert!(matches!(
        ControlMessage::decode(&encoded),
        Err(ControlError::MalformedMessage(_))
    ));
}

#[test]
fn truncated_payload_is_malformed() {
    let msg = ControlMessage {
        family: 23,
        source_port_id: 1,
        dest_port_id: 2,
        source_ipcp_id: 0,
        dest_ipcp_id: 0,
        sequence_number: 1,
        payload: AppRegisterApplicationRequest {
            app_name: src(),
            dif_name: dif(),
        }
        .into(),
    };
    let encoded = msg.encode().expect("encode");
    assert!(matches!(
        ControlMessage::decode(&encoded[..encoded.len() - 3]),
        Err(ControlError::MalformedMessage(_))
    ));
    assert!(matches!(
        ControlMessage::decode(&encoded[..HEADER_LEN - 1]),
        Err(ControlError::MalformedMessage(_))
    ));
}

#[test]
fn trailing_garbage_is_malformed() {
    let msg = ControlMessage {
        family: 23,
        source_port_id: 1,
        dest_port_id: 2,
        source_ipcp_id: 0,
        dest_ipcp_id: 0,
        sequence_number: 1,
        payload: IpcmEnrollToDifRequest { dif_name: dif() }.into(),
    };
    let encoded = msg.encode().expect("encode");
    let mut padded = encoded.to_vec();
    padded.extend_from_slice(&[0u8; 4]);
    assert!(matches!(
        ControlMessage::decode(&padded),
        Err(ControlError::MalformedMessage(_))
    ));
}
