// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flow allocation and deallocation messages exchanged between applications,
//! the IPC Manager and IPC Processes.

use crate::{
    errors::ControlResult,
    models::{
        header::MessageRole,
        message::PayloadCodec,
        naming::ApplicationName,
        opcode::OperationCode,
        payload::{PayloadReader, PayloadWriter},
        qos::FlowSpec,
    },
};

/// Application -> IPC Manager: allocate a flow to a destination application.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppAllocateFlowRequest {
    pub source_name: ApplicationName,
    pub dest_name: ApplicationName,
    pub flow_spec: FlowSpec,
}

impl PayloadCodec for AppAllocateFlowRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppAllocateFlowRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.source_name);
        w.put_name(&self.dest_name);
        w.put_flowspec(&self.flow_spec);
    }
}

impl AppAllocateFlowRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            source_name: r.get_name()?,
            dest_name: r.get_name()?,
            flow_spec: r.get_flowspec()?,
        })
    }
}

/// IPC Manager -> Application: the outcome of an allocate request. A
/// negative `port_id` is the error code; `error_description` explains it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppAllocateFlowRequestResult {
    pub source_name: ApplicationName,
    pub port_id: i32,
    pub error_description: String,
    pub dif_name: ApplicationName,
    /// Control port of the IPC Process that allocated the flow (0 for
    /// kernel-resident shims).
    pub ipcp_port_id: u32,
    pub ipcp_id: u16,
}

impl PayloadCodec for AppAllocateFlowRequestResult {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppAllocateFlowRequestResult
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.source_name);
        w.put_i32(self.port_id);
        w.put_str(&self.error_description);
        w.put_name(&self.dif_name);
        w.put_u32(self.ipcp_port_id);
        w.put_u16(self.ipcp_id);
    }
}

impl AppAllocateFlowRequestResult {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            source_name: r.get_name()?,
            port_id: r.get_i32()?,
            error_description: r.get_str()?,
            dif_name: r.get_name()?,
            ipcp_port_id: r.get_u32()?,
            ipcp_id: r.get_u16()?,
        })
    }
}

/// IPC Process -> Application: a remote peer wants a flow to this app.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppAllocateFlowRequestArrived {
    pub source_name: ApplicationName,
    pub dest_name: ApplicationName,
    pub flow_spec: FlowSpec,
    /// The port-id the responding side pre-assigned for the flow.
    pub port_id: u32,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppAllocateFlowRequestArrived {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppAllocateFlowRequestArrived
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.source_name);
        w.put_name(&self.dest_name);
        w.put_flowspec(&self.flow_spec);
        w.put_u32(self.port_id);
        w.put_name(&self.dif_name);
    }
}

impl AppAllocateFlowRequestArrived {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            source_name: r.get_name()?,
            dest_name: r.get_name()?,
            flow_spec: r.get_flowspec()?,
            port_id: r.get_u32()?,
            dif_name: r.get_name()?,
        })
    }
}

/// Application -> IPC Process: accept or refuse an incoming flow.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppAllocateFlowResponse {
    /// 0 accepts the flow, a negative value refuses it.
    pub result: i32,
    /// Whether the refusal should be reported back to the requestor.
    pub notify_source: bool,
    /// The port-id echoed from the arrived notification.
    pub port_id: u32,
}

impl PayloadCodec for AppAllocateFlowResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppAllocateFlowResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_bool(self.notify_source);
        w.put_u32(self.port_id);
    }
}

impl AppAllocateFlowResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
            notify_source: r.get_bool()?,
            port_id: r.get_u32()?,
        })
    }
}

/// Application -> IPC Process: tear the flow down.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppDeallocateFlowRequest {
    pub port_id: u32,
    pub app_name: ApplicationName,
}

impl PayloadCodec for AppDeallocateFlowRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppDeallocateFlowRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_u32(self.port_id);
        w.put_name(&self.app_name);
    }
}

impl AppDeallocateFlowRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            port_id: r.get_u32()?,
            app_name: r.get_name()?,
        })
    }
}

/// IPC Process -> Application: outcome of a deallocate request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppDeallocateFlowResponse {
    pub result: i32,
    pub error_description: String,
    pub app_name: ApplicationName,
}

impl PayloadCodec for AppDeallocateFlowResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppDeallocateFlowResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_str(&self.error_description);
        w.put_name(&self.app_name);
    }
}

impl AppDeallocateFlowResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
            error_description: r.get_str()?,
            app_name: r.get_name()?,
        })
    }
}

/// IPC Process -> Application: the flow went away without the application
/// having asked for it (peer teardown, N-1 failure).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppFlowDeallocatedNotification {
    pub port_id: u32,
    /// Reason code; mirrors the `result` convention (negative = error).
    pub code: i32,
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppFlowDeallocatedNotification {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppFlowDeallocatedNotification
    }

    fn role(&self) -> MessageRole {
        MessageRole::Notification
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_u32(self.port_id);
        w.put_i32(self.code);
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl AppFlowDeallocatedNotification {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            port_id: r.get_u32()?,
            code: r.get_i32()?,
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}
