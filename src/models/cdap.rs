// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed CDAP messages as seen by the control plane.
//!
//! Peer Flow Allocators and authentication policies speak CDAP over N-1
//! flows. The wire framing of CDAP is an external interface; this module
//! only carries the decoded form (operation, object class/name, opaque
//! value) plus a byte codec so the message can ride any datagram channel.

use bytes::Bytes;

use crate::{
    errors::{ControlError, ControlResult},
    models::payload::{PayloadReader, PayloadWriter},
};

/// CDAP operations used by the control plane.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CdapOpCode {
    #[default]
    MCreate = 0,
    MCreateR = 1,
    MDelete = 2,
    MDeleteR = 3,
    MRead = 4,
    MReadR = 5,
    MWrite = 6,
    MWriteR = 7,
}

impl CdapOpCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::MCreate,
            1 => Self::MCreateR,
            2 => Self::MDelete,
            3 => Self::MDeleteR,
            4 => Self::MRead,
            5 => Self::MReadR,
            6 => Self::MWrite,
            7 => Self::MWriteR,
            _ => return None,
        })
    }
}

/// A CDAP message addressed at one RIB object.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CdapMessage {
    pub op_code: CdapOpCode,
    pub object_class: String,
    pub object_name: String,
    /// Opaque object value; the addressed object knows its own encoding.
    pub object_value: Bytes,
    pub invoke_id: i32,
    /// 0 on success; responses carry a negative value on refusal.
    pub result: i32,
    pub result_reason: String,
}

impl CdapMessage {
    pub fn request(
        op_code: CdapOpCode,
        object_class: impl Into<String>,
        object_name: impl Into<String>,
        object_value: Bytes,
        invoke_id: i32,
    ) -> Self {
        Self {
            op_code,
            object_class: object_class.into(),
            object_name: object_name.into(),
            object_value,
            invoke_id,
            ..Default::default()
        }
    }

    pub fn response(
        op_code: CdapOpCode,
        object_class: impl Into<String>,
        object_name: impl Into<String>,
        invoke_id: i32,
        result: i32,
        result_reason: impl Into<String>,
    ) -> Self {
        Self {
            op_code,
            object_class: object_class.into(),
            object_name: object_name.into(),
            object_value: Bytes::new(),
            invoke_id,
            result,
            result_reason: result_reason.into(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.put_u8(self.op_code as u8);
        w.put_str(&self.object_class);
        w.put_str(&self.object_name);
        w.put_bytes(&self.object_value);
        w.put_i32(self.invoke_id);
        w.put_i32(self.result);
        w.put_str(&self.result_reason);
        w.freeze()
    }

    pub fn from_bytes(buf: Bytes) -> ControlResult<Self> {
        let mut r = PayloadReader::new(buf);
        let raw_op = r.get_u8()?;
        let op_code = CdapOpCode::from_u8(raw_op).ok_or_else(|| {
            ControlError::MalformedMessage(format!("unknown CDAP op-code {raw_op}"))
        })?;
        let msg = Self {
            op_code,
            object_class: r.get_str()?,
            object_name: r.get_str()?,
            object_value: r.get_bytes()?,
            invoke_id: r.get_i32()?,
            result: r.get_i32()?,
            result_reason: r.get_str()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Addressing information for a CDAP exchange: the N-1 port the message
/// travels on identifies the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteProcessId {
    pub port_id: u32,
}

/// Send side of the local RIB daemon: lets the Flow Allocator and the
/// authentication policies address objects in a remote RIB without knowing
/// how CDAP is framed or routed.
pub trait RibDaemon: Send + Sync {
    fn send(&self, msg: CdapMessage, remote: RemoteProcessId) -> ControlResult<()>;

    fn remote_create_object(
        &self,
        object_class: &str,
        object_name: &str,
        value: Bytes,
        invoke_id: i32,
        remote: RemoteProcessId,
    ) -> ControlResult<()> {
        self.send(
            CdapMessage::request(
                CdapOpCode::MCreate,
                object_class,
                object_name,
                value,
                invoke_id,
            ),
            remote,
        )
    }

    fn remote_delete_object(
        &self,
        object_class: &str,
        object_name: &str,
        invoke_id: i32,
        remote: RemoteProcessId,
    ) -> ControlResult<()> {
        self.send(
            CdapMessage::request(
                CdapOpCode::MDelete,
                object_class,
                object_name,
                Bytes::new(),
                invoke_id,
            ),
            remote,
        )
    }

    fn remote_write_object(
        &self,
        object_class: &str,
        object_name: &str,
        value: Bytes,
        invoke_id: i32,
        remote: RemoteProcessId,
    ) -> ControlResult<()> {
        self.send(
            CdapMessage::request(
                CdapOpCode::MWrite,
                object_class,
                object_name,
                value,
                invoke_id,
            ),
            remote,
        )
    }
}

/// A `RibDaemon` that forwards CDAP messages into an in-process channel.
/// The daemon wires the receive side to the N-1 SDU path; tests wire it
/// straight into the peer stack.
pub struct ChannelRibDaemon {
    tx: tokio::sync::mpsc::UnboundedSender<(RemoteProcessId, CdapMessage)>,
}

impl ChannelRibDaemon {
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<(RemoteProcessId, CdapMessage)>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RibDaemon for ChannelRibDaemon {
    fn send(&self, msg: CdapMessage, remote: RemoteProcessId) -> ControlResult<()> {
        self.tx.send((remote, msg)).map_err(|_| {
            ControlError::TransportUnavailable("CDAP outbound channel closed".into())
        })
    }
}
