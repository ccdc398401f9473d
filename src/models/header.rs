// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The fixed 32-byte header carried by every control message.
//!
//! ```text
//!  0               2               4       5               8
//! +---------------+---------------+-------+---------------+
//! |    family     |    opcode     | flags |   reserved    |
//! +---------------+---------------+-------+---------------+
//!  8                               12
//! +-------------------------------+-------------------------------+
//! |        source port-id         |         dest port-id          |
//! +-------------------------------+-------------------------------+
//!  16              18              20
//! +---------------+---------------+-------------------------------+
//! |  src ipcp-id  |  dst ipcp-id  |       sequence number         |
//! +---------------+---------------+-------------------------------+
//!  24                              28              32
//! +-------------------------------+---------------+
//! |        payload length         |   reserved    |
//! +-------------------------------+---------------+
//! ```
//!
//! All multi-byte fields are big-endian. An IPC-process id of 0 means the
//! endpoint is not an IPC Process (an application or the IPC Manager).

use anyhow::Result;
use bitflags::bitflags;
use zerocopy::{
    BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::errors::{ControlError, ControlResult};

/// Length of the fixed control-message header.
pub const HEADER_LEN: usize = 32;

bitflags! {
    /// Role bits carried in the header flags byte. Exactly one must be set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoleFlags: u8 {
        const REQUEST = 0b0000_0001;
        const RESPONSE = 0b0000_0010;
        const NOTIFICATION = 0b0000_0100;
    }
}

/// Whether a message solicits an answer, answers one, or informs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    #[default]
    Request,
    Response,
    Notification,
}

impl MessageRole {
    pub fn to_flags(self) -> RoleFlags {
        match self {
            MessageRole::Request => RoleFlags::REQUEST,
            MessageRole::Response => RoleFlags::RESPONSE,
            MessageRole::Notification => RoleFlags::NOTIFICATION,
        }
    }

    pub fn from_flags(raw: u8) -> ControlResult<Self> {
        let flags = RoleFlags::from_bits(raw).ok_or_else(|| {
            ControlError::MalformedMessage(format!(
                "unknown role flag bits: {raw:#04x}"
            ))
        })?;
        if flags == RoleFlags::REQUEST {
            Ok(MessageRole::Request)
        } else if flags == RoleFlags::RESPONSE {
            Ok(MessageRole::Response)
        } else if flags == RoleFlags::NOTIFICATION {
            Ok(MessageRole::Notification)
        } else {
            Err(ControlError::MalformedMessage(format!(
                "role flags must carry exactly one bit, got {flags:?}"
            )))
        }
    }
}

/// Wire-safe, zero-copy fixed header.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    pub family: U16<BigEndian>,          // 0..2
    pub opcode: U16<BigEndian>,          // 2..4 (raw registry value)
    pub flags: u8,                       // 4 (RoleFlags)
    pub reserved1: [u8; 3],              // 5..8
    pub source_port_id: U32<BigEndian>,  // 8..12
    pub dest_port_id: U32<BigEndian>,    // 12..16
    pub source_ipcp_id: U16<BigEndian>,  // 16..18
    pub dest_ipcp_id: U16<BigEndian>,    // 18..20
    pub sequence_number: U32<BigEndian>, // 20..24
    pub payload_len: U32<BigEndian>,     // 24..28
    pub reserved2: [u8; 4],              // 28..32
}

impl MessageHeader {
    pub fn to_header_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != HEADER_LEN {
            anyhow::bail!("buffer length must be {HEADER_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_header_bytes(buf: &[u8]) -> ControlResult<Self> {
        <Self as FromBytes>::read_from_bytes(buf).map_err(|e| {
            ControlError::MalformedMessage(format!("header read failed: {e}"))
        })
    }

    pub fn role(&self) -> ControlResult<MessageRole> {
        MessageRole::from_flags(self.flags)
    }

    pub fn set_role(&mut self, role: MessageRole) {
        self.flags = role.to_flags().bits();
    }
}
