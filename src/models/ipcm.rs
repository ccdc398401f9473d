// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Messages exchanged between the IPC Manager and IPC Processes.

use crate::{
    errors::ControlResult,
    models::{
        header::MessageRole,
        message::PayloadCodec,
        naming::ApplicationName,
        opcode::OperationCode,
        payload::{PayloadReader, PayloadWriter},
        qos::{FlowSpec, QoSCube},
    },
};

/// IPC Manager -> IPC Process: join this DIF with the given provisioning.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmAssignToDifRequest {
    pub dif_name: ApplicationName,
    pub dif_type: String,
    pub qos_cubes: Vec<QoSCube>,
}

impl PayloadCodec for IpcmAssignToDifRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmAssignToDifRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.dif_name);
        w.put_str(&self.dif_type);
        w.put_u16(self.qos_cubes.len() as u16);
        for cube in &self.qos_cubes {
            w.put_u32(cube.id);
            w.put_str(&cube.name);
            w.put_flowspec(&cube.bounds);
        }
    }
}

impl IpcmAssignToDifRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        let dif_name = r.get_name()?;
        let dif_type = r.get_str()?;
        let n = r.get_u16()?;
        let mut qos_cubes = Vec::with_capacity(n as usize);
        for _ in 0..n {
            qos_cubes.push(QoSCube {
                id: r.get_u32()?,
                name: r.get_str()?,
                bounds: r.get_flowspec()?,
            });
        }
        Ok(Self {
            dif_name,
            dif_type,
            qos_cubes,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmAssignToDifResponse {
    pub result: i32,
    pub error_description: String,
}

impl PayloadCodec for IpcmAssignToDifResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmAssignToDifResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_str(&self.error_description);
    }
}

impl IpcmAssignToDifResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
            error_description: r.get_str()?,
        })
    }
}

/// IPC Manager -> IPC Process: an IPC Process (un)registered in an N-1 DIF.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmIpcProcessDifRegistrationNotification {
    pub ipc_process_name: ApplicationName,
    pub dif_name: ApplicationName,
    pub registered: bool,
}

impl PayloadCodec for IpcmIpcProcessDifRegistrationNotification {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmIpcProcessDifRegistrationNotification
    }

    fn role(&self) -> MessageRole {
        MessageRole::Notification
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.ipc_process_name);
        w.put_name(&self.dif_name);
        w.put_bool(self.registered);
    }
}

impl IpcmIpcProcessDifRegistrationNotification {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            ipc_process_name: r.get_name()?,
            dif_name: r.get_name()?,
            registered: r.get_bool()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmEnrollToDifRequest {
    pub dif_name: ApplicationName,
}

impl PayloadCodec for IpcmEnrollToDifRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmEnrollToDifRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.dif_name);
    }
}

impl IpcmEnrollToDifRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            dif_name: r.get_name()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmEnrollToDifResponse {
    pub result: i32,
}

impl PayloadCodec for IpcmEnrollToDifResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmEnrollToDifResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl IpcmEnrollToDifResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmDisconnectFromNeighborRequest {
    pub neighbor_name: ApplicationName,
}

impl PayloadCodec for IpcmDisconnectFromNeighborRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmDisconnectFromNeighborRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.neighbor_name);
    }
}

impl IpcmDisconnectFromNeighborRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            neighbor_name: r.get_name()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmDisconnectFromNeighborResponse {
    pub result: i32,
}

impl PayloadCodec for IpcmDisconnectFromNeighborResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmDisconnectFromNeighborResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl IpcmDisconnectFromNeighborResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}

/// IPC Manager -> IPC Process: allocate a flow on behalf of an application.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmAllocateFlowRequest {
    pub source_name: ApplicationName,
    pub dest_name: ApplicationName,
    pub flow_spec: FlowSpec,
    pub dif_name: ApplicationName,
    /// Control port of the requesting application, used for the reply path.
    pub app_port_id: u32,
}

impl PayloadCodec for IpcmAllocateFlowRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmAllocateFlowRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.source_name);
        w.put_name(&self.dest_name);
        w.put_flowspec(&self.flow_spec);
        w.put_name(&self.dif_name);
        w.put_u32(self.app_port_id);
    }
}

impl IpcmAllocateFlowRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            source_name: r.get_name()?,
            dest_name: r.get_name()?,
            flow_spec: r.get_flowspec()?,
            dif_name: r.get_name()?,
            app_port_id: r.get_u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmAllocateFlowResponse {
    pub result: i32,
}

impl PayloadCodec for IpcmAllocateFlowResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmAllocateFlowResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl IpcmAllocateFlowResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmRegisterApplicationRequest {
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
    /// Control port of the application being registered.
    pub app_port_id: u32,
}

impl PayloadCodec for IpcmRegisterApplicationRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmRegisterApplicationRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
        w.put_u32(self.app_port_id);
    }
}

impl IpcmRegisterApplicationRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
            app_port_id: r.get_u32()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmRegisterApplicationResponse {
    pub result: i32,
}

impl PayloadCodec for IpcmRegisterApplicationResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmRegisterApplicationResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl IpcmRegisterApplicationResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmUnregisterApplicationRequest {
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for IpcmUnregisterApplicationRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmUnregisterApplicationRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl IpcmUnregisterApplicationRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmUnregisterApplicationResponse {
    pub result: i32,
}

impl PayloadCodec for IpcmUnregisterApplicationResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmUnregisterApplicationResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl IpcmUnregisterApplicationResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}

/// One object returned by a RIB query.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RibObjectData {
    pub object_class: String,
    pub object_name: String,
    pub object_instance: u64,
    pub display_value: String,
}

/// IPC Manager -> IPC Process: read a subtree of the RIB.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmQueryRibRequest {
    pub object_class: String,
    pub object_name: String,
    pub object_instance: u64,
    /// How many levels below `object_name` to include (0 = the object only).
    pub scope: u32,
    pub filter: String,
}

impl PayloadCodec for IpcmQueryRibRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmQueryRibRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_str(&self.object_class);
        w.put_str(&self.object_name);
        w.put_u64(self.object_instance);
        w.put_u32(self.scope);
        w.put_str(&self.filter);
    }
}

impl IpcmQueryRibRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            object_class: r.get_str()?,
            object_name: r.get_str()?,
            object_instance: r.get_u64()?,
            scope: r.get_u32()?,
            filter: r.get_str()?,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpcmQueryRibResponse {
    pub result: i32,
    pub objects: Vec<RibObjectData>,
}

impl PayloadCodec for IpcmQueryRibResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::IpcmQueryRibResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_u16(self.objects.len() as u16);
        for obj in &self.objects {
            w.put_str(&obj.object_class);
            w.put_str(&obj.object_name);
            w.put_u64(obj.object_instance);
            w.put_str(&obj.display_value);
        }
    }
}

impl IpcmQueryRibResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        let result = r.get_i32()?;
        let n = r.get_u16()?;
        let mut objects = Vec::with_capacity(n as usize);
        for _ in 0..n {
            objects.push(RibObjectData {
                object_class: r.get_str()?,
                object_name: r.get_str()?,
                object_instance: r.get_u64()?,
                display_value: r.get_str()?,
            });
        }
        Ok(Self { result, objects })
    }
}
