// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The tagged control-message type and its codec.
//!
//! `encode` produces the fixed header followed by the variant payload;
//! `decode` reverses it exactly. For every well-formed message `m`,
//! `decode(encode(m)) == m`. A header carrying an operation code outside the
//! registry, a role bit that does not match the variant, or a payload that
//! does not parse to completion is rejected as `MalformedMessage`.

use bytes::{Bytes, BytesMut};
use enum_dispatch::enum_dispatch;

use crate::{
    errors::{ControlError, ControlResult},
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
            AppUnregisterApplicationResponse,
        },
        header::{HEADER_LEN, MessageHeader, MessageRole},
        ipcm::{
            IpcmAllocateFlowRequest, IpcmAllocateFlowResponse,
            IpcmAssignToDifRequest, IpcmAssignToDifResponse,
            IpcmDisconnectFromNeighborRequest, IpcmDisconnectFromNeighborResponse,
            IpcmEnrollToDifRequest, IpcmEnrollToDifResponse,
            IpcmIpcProcessDifRegistrationNotification,
            IpcmQueryRibRequest, IpcmQueryRibResponse,
            IpcmRegisterApplicationRequest, IpcmRegisterApplicationResponse,
            IpcmUnregisterApplicationRequest, IpcmUnregisterApplicationResponse,
        },
        opcode::{OperationCode, UnknownOpcode},
        payload::{PayloadReader, PayloadWriter},
        rmt::{RmtAddFteRequest, RmtDeleteFteRequest, RmtDumpFtReply, RmtDumpFtRequest},
    },
};

/// Behaviour common to every payload variant.
#[enum_dispatch]
pub trait PayloadCodec {
    fn opcode(&self) -> OperationCode;

    /// The role this variant always travels with.
    fn role(&self) -> MessageRole;

    fn encode_into(&self, w: &mut PayloadWriter);
}

/// The zero operation. Carried by peers that have nothing to say; decodes to
/// an empty payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unspecified;

impl PayloadCodec for Unspecified {
    fn opcode(&self) -> OperationCode {
        OperationCode::Unspecified
    }

    fn role(&self) -> MessageRole {
        MessageRole::Notification
    }

    fn encode_into(&self, _w: &mut PayloadWriter) {}
}

impl Unspecified {
    pub fn decode_from(_r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self)
    }
}

/// Every payload the control plane can carry, tagged by operation code.
#[enum_dispatch(PayloadCodec)]
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    Unspecified(Unspecified),
    AppAllocateFlowRequest(AppAllocateFlowRequest),
    AppAllocateFlowRequestResult(AppAllocateFlowRequestResult),
    AppAllocateFlowRequestArrived(AppAllocateFlowRequestArrived),
    AppAllocateFlowResponse(AppAllocateFlowResponse),
    AppDeallocateFlowRequest(AppDeallocateFlowRequest),
    AppDeallocateFlowResponse(AppDeallocateFlowResponse),
    AppFlowDeallocatedNotification(AppFlowDeallocatedNotification),
    AppRegisterApplicationRequest(AppRegisterApplicationRequest),
    AppRegisterApplicationResponse(AppRegisterApplicationResponse),
    AppUnregisterApplicationRequest(AppUnregisterApplicationRequest),
    AppUnregisterApplicationResponse(AppUnregisterApplicationResponse),
    AppRegistrationCanceledNotification(AppRegistrationCanceledNotification),
    AppGetDifPropertiesRequest(AppGetDifPropertiesRequest),
    AppGetDifPropertiesResponse(AppGetDifPropertiesResponse),
    IpcmAssignToDifRequest(IpcmAssignToDifRequest),
    IpcmAssignToDifResponse(IpcmAssignToDifResponse),
    IpcmIpcProcessDifRegistrationNotification(
        IpcmIpcProcessDifRegistrationNotification,
    ),
    IpcmEnrollToDifRequest(IpcmEnrollToDifRequest),
    IpcmEnrollToDifResponse(IpcmEnrollToDifResponse),
    IpcmDisconnectFromNeighborRequest(IpcmDisconnectFromNeighborRequest),
    IpcmDisconnectFromNeighborResponse(IpcmDisconnectFromNeighborResponse),
    IpcmAllocateFlowRequest(IpcmAllocateFlowRequest),
    IpcmAllocateFlowResponse(IpcmAllocateFlowResponse),
    IpcmRegisterApplicationRequest(IpcmRegisterApplicationRequest),
    IpcmRegisterApplicationResponse(IpcmRegisterApplicationResponse),
    IpcmUnregisterApplicationRequest(IpcmUnregisterApplicationRequest),
    IpcmUnregisterApplicationResponse(IpcmUnregisterApplicationResponse),
    IpcmQueryRibRequest(IpcmQueryRibRequest),
    IpcmQueryRibResponse(IpcmQueryRibResponse),
    RmtAddFteRequest(RmtAddFteRequest),
    RmtDeleteFteRequest(RmtDeleteFteRequest),
    RmtDumpFtRequest(RmtDumpFtRequest),
    RmtDumpFtReply(RmtDumpFtReply),
}

impl MessagePayload {
    fn decode_by_opcode(
        opcode: OperationCode,
        r: &mut PayloadReader,
    ) -> ControlResult<Self> {
        Ok(match opcode {
            OperationCode::Unspecified => Unspecified::decode_from(r)?.into(),
            OperationCode::AppAllocateFlowRequest => {
                AppAllocateFlowRequest::decode_from(r)?.into()
            },
            OperationCode::AppAllocateFlowRequestResult => {
                AppAllocateFlowRequestResult::decode_from(r)?.into()
            },
            OperationCode::AppAllocateFlowRequestArrived => {
                AppAllocateFlowRequestArrived::decode_from(r)?.into()
            },
            OperationCode::AppAllocateFlowResponse => {
                AppAllocateFlowResponse::decode_from(r)?.into()
            },
            OperationCode::AppDeallocateFlowRequest => {
                AppDeallocateFlowRequest::decode_from(r)?.into()
            },
            OperationCode::AppDeallocateFlowResponse => {
                AppDeallocateFlowResponse::decode_from(r)?.into()
            },
            OperationCode::AppFlowDeallocatedNotification => {
                AppFlowDeallocatedNotification::decode_from(r)?.into()
            },
            OperationCode::AppRegisterApplicationRequest => {
                AppRegisterApplicationRequest::decode_from(r)?.into()
            },
            OperationCode::AppRegisterApplicationResponse => {
                AppRegisterApplicationResponse::decode_from(r)?.into()
            },
            OperationCode::AppUnregisterApplicationRequest => {
                AppUnregisterApplicationRequest::decode_from(r)?.into()
            },
            OperationCode::AppUnregisterApplicationResponse => {
                AppUnregisterApplicationResponse::decode_from(r)?.into()
            },
            OperationCode::AppRegistrationCanceledNotification => {
                AppRegistrationCanceledNotification::decode_from(r)?.into()
            },
            OperationCode::AppGetDifPropertiesRequest => {
                AppGetDifPropertiesRequest::decode_from(r)?.into()
            },
            OperationCode::AppGetDifPropertiesResponse => {
                AppGetDifPropertiesResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmAssignToDifRequest => {
                IpcmAssignToDifRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmAssignToDifResponse => {
                IpcmAssignToDifResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmIpcProcessDifRegistrationNotification => {
                IpcmIpcProcessDifRegistrationNotification::decode_from(r)?.into()
            },
            OperationCode::IpcmEnrollToDifRequest => {
                IpcmEnrollToDifRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmEnrollToDifResponse => {
                IpcmEnrollToDifResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmDisconnectFromNeighborRequest => {
                IpcmDisconnectFromNeighborRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmDisconnectFromNeighborResponse => {
                IpcmDisconnectFromNeighborResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmAllocateFlowRequest => {
                IpcmAllocateFlowRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmAllocateFlowResponse => {
                IpcmAllocateFlowResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmRegisterApplicationRequest => {
                IpcmRegisterApplicationRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmRegisterApplicationResponse => {
                IpcmRegisterApplicationResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmUnregisterApplicationRequest => {
                IpcmUnregisterApplicationRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmUnregisterApplicationResponse => {
                IpcmUnregisterApplicationResponse::decode_from(r)?.into()
            },
            OperationCode::IpcmQueryRibRequest => {
                IpcmQueryRibRequest::decode_from(r)?.into()
            },
            OperationCode::IpcmQueryRibResponse => {
                IpcmQueryRibResponse::decode_from(r)?.into()
            },
            OperationCode::RmtAddFteRequest => {
                RmtAddFteRequest::decode_from(r)?.into()
            },
            OperationCode::RmtDeleteFteRequest => {
                RmtDeleteFteRequest::decode_from(r)?.into()
            },
            OperationCode::RmtDumpFtRequest => {
                RmtDumpFtRequest::decode_from(r)?.into()
            },
            OperationCode::RmtDumpFtReply => RmtDumpFtReply::decode_from(r)?.into(),
        })
    }
}

/// A complete control message: addressing header plus tagged payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    /// Numeric id of the message family, resolved by name at startup.
    pub family: u16,
    pub source_port_id: u32,
    pub dest_port_id: u32,
    /// 0 when the source is not an IPC Process.
    pub source_ipcp_id: u16,
    /// 0 when the destination is not an IPC Process.
    pub dest_ipcp_id: u16,
    pub sequence_number: u32,
    pub payload: MessagePayload,
}

impl ControlMessage {
    pub fn opcode(&self) -> OperationCode {
        self.payload.opcode()
    }

    pub fn role(&self) -> MessageRole {
        self.payload.role()
    }

    pub fn encode(&self) -> ControlResult<Bytes> {
        let mut w = PayloadWriter::new();
        self.payload.encode_into(&mut w);
        let payload = w.freeze();

        let mut header = MessageHeader {
            family: self.family.into(),
            opcode: (self.payload.opcode() as u16).into(),
            source_port_id: self.source_port_id.into(),
            dest_port_id: self.dest_port_id.into(),
            source_ipcp_id: self.source_ipcp_id.into(),
            dest_ipcp_id: self.dest_ipcp_id.into(),
            sequence_number: self.sequence_number.into(),
            payload_len: (payload.len() as u32).into(),
            ..Default::default()
        };
        header.set_role(self.payload.role());

        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
        let mut header_buf = [0u8; HEADER_LEN];
        header
            .to_header_bytes(&mut header_buf)
            .map_err(|e| ControlError::Internal(e.to_string()))?;
        out.extend_from_slice(&header_buf);
        out.extend_from_slice(&payload);
        Ok(out.freeze())
    }

    pub fn decode(buf: &[u8]) -> ControlResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ControlError::MalformedMessage(format!(
                "datagram shorter than the fixed header: {} bytes",
                buf.len()
            )));
        }
        let header = MessageHeader::from_header_bytes(&buf[..HEADER_LEN])?;
        let declared = header.payload_len.get() as usize;
        let body = &buf[HEADER_LEN..];
        if declared != body.len() {
            return Err(ControlError::MalformedMessage(format!(
                "payload length mismatch: header says {declared}, datagram carries {}",
                body.len()
            )));
        }

        let raw_opcode = header.opcode.get();
        let opcode = OperationCode::from_u16(raw_opcode).ok_or_else(|| {
            ControlError::MalformedMessage(UnknownOpcode(raw_opcode).to_string())
        })?;

        let role = header.role()?;
        let mut r = PayloadReader::new(Bytes::copy_from_slice(body));
        let payload = MessagePayload::decode_by_opcode(opcode, &mut r)?;
        r.finish()?;

        if payload.role() != role {
            return Err(ControlError::MalformedMessage(format!(
                "{opcode:?} cannot travel with role {role:?}"
            )));
        }

        Ok(Self {
            family: header.family.get(),
            source_port_id: header.source_port_id.get(),
            dest_port_id: header.dest_port_id.get(),
            source_ipcp_id: header.source_ipcp_id.get(),
            dest_ipcp_id: header.dest_ipcp_id.get(),
            sequence_number: header.sequence_number.get(),
            payload,
        })
    }
}
