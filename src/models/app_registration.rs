// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Application registration and DIF-property messages.

use crate::{
    errors::ControlResult,
    models::{
        header::MessageRole,
        message::PayloadCodec,
        naming::ApplicationName,
        opcode::OperationCode,
        payload::{PayloadReader, PayloadWriter},
        qos::QoSCube,
    },
};

/// Application -> IPC Manager: register this name in a DIF.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppRegisterApplicationRequest {
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppRegisterApplicationRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppRegisterApplicationRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl AppRegisterApplicationRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}

/// IPC Manager -> Application: registration outcome.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppRegisterApplicationResponse {
    pub result: i32,
    pub error_description: String,
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
    pub ipcp_port_id: u32,
    pub ipcp_id: u16,
}

impl PayloadCodec for AppRegisterApplicationResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppRegisterApplicationResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_str(&self.error_description);
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
        w.put_u32(self.ipcp_port_id);
        w.put_u16(self.ipcp_id);
    }
}

impl AppRegisterApplicationResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
            error_description: r.get_str()?,
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
            ipcp_port_id: r.get_u32()?,
            ipcp_id: r.get_u16()?,
        })
    }
}

/// Application -> IPC Manager: remove a registration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppUnregisterApplicationRequest {
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppUnregisterApplicationRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppUnregisterApplicationRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl AppUnregisterApplicationRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}

/// IPC Manager -> Application: unregistration outcome.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppUnregisterApplicationResponse {
    pub result: i32,
    pub error_description: String,
    pub app_name: ApplicationName,
}

impl PayloadCodec for AppUnregisterApplicationResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppUnregisterApplicationResponse
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

impl AppUnregisterApplicationResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
            error_description: r.get_str()?,
            app_name: r.get_name()?,
        })
    }
}

/// IPC Manager -> Application: a registration was withdrawn without the
/// application having requested it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppRegistrationCanceledNotification {
    pub code: i32,
    pub reason: String,
    pub app_name: ApplicationName,
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppRegistrationCanceledNotification {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppRegistrationCanceledNotification
    }

    fn role(&self) -> MessageRole {
        MessageRole::Notification
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.code);
        w.put_str(&self.reason);
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl AppRegistrationCanceledNotification {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            code: r.get_i32()?,
            reason: r.get_str()?,
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}

/// Application -> IPC Manager: describe the DIFs available to this app.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppGetDifPropertiesRequest {
    pub app_name: ApplicationName,
    /// Restrict the answer to one DIF; unspecified asks for all of them.
    pub dif_name: ApplicationName,
}

impl PayloadCodec for AppGetDifPropertiesRequest {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppGetDifPropertiesRequest
    }

    fn role(&self) -> MessageRole {
        MessageRole::Request
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_name(&self.app_name);
        w.put_name(&self.dif_name);
    }
}

impl AppGetDifPropertiesRequest {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            app_name: r.get_name()?,
            dif_name: r.get_name()?,
        })
    }
}

/// The properties of one DIF as reported to applications.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DifProperties {
    pub dif_name: ApplicationName,
    pub max_sdu_size: u32,
    pub qos_cubes: Vec<QoSCube>,
}

/// IPC Manager -> Application: the DIF property listing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppGetDifPropertiesResponse {
    pub result: i32,
    pub app_name: ApplicationName,
    pub dif_properties: Vec<DifProperties>,
}

impl PayloadCodec for AppGetDifPropertiesResponse {
    fn opcode(&self) -> OperationCode {
        OperationCode::AppGetDifPropertiesResponse
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
        w.put_name(&self.app_name);
        w.put_u16(self.dif_properties.len() as u16);
        for props in &self.dif_properties {
            w.put_name(&props.dif_name);
            w.put_u32(props.max_sdu_size);
            w.put_u16(props.qos_cubes.len() as u16);
            for cube in &props.qos_cubes {
                w.put_u32(cube.id);
                w.put_str(&cube.name);
                w.put_flowspec(&cube.bounds);
            }
        }
    }
}

impl AppGetDifPropertiesResponse {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        let result = r.get_i32()?;
        let app_name = r.get_name()?;
        let n_difs = r.get_u16()?;
        let mut dif_properties = Vec::with_capacity(n_difs as usize);
        for _ in 0..n_difs {
            let dif_name = r.get_name()?;
            let max_sdu_size = r.get_u32()?;
            let n_cubes = r.get_u16()?;
            let mut qos_cubes = Vec::with_capacity(n_cubes as usize);
            for _ in 0..n_cubes {
                qos_cubes.push(QoSCube {
                    id: r.get_u32()?,
                    name: r.get_str()?,
                    bounds: r.get_flowspec()?,
                });
            }
            dif_properties.push(DifProperties {
                dif_name,
                max_sdu_size,
                qos_cubes,
            });
        }
        Ok(Self {
            result,
            app_name,
            dif_properties,
        })
    }
}
