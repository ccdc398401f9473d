// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reserved relay-and-multiplexing-task messages.
//!
//! These codes exist in the registry so peers that emit them are not
//! mistaken for malformed traffic; the dispatcher drops them after decode.

use crate::{
    errors::ControlResult,
    models::{
        header::MessageRole,
        message::PayloadCodec,
        opcode::OperationCode,
        payload::{PayloadReader, PayloadWriter},
    },
};

macro_rules! reserved_request {
    ($name:ident, $code:ident) => {
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl PayloadCodec for $name {
            fn opcode(&self) -> OperationCode {
                OperationCode::$code
            }

            fn role(&self) -> MessageRole {
                MessageRole::Request
            }

            fn encode_into(&self, _w: &mut PayloadWriter) {}
        }

        impl $name {
            pub fn decode_from(_r: &mut PayloadReader) -> ControlResult<Self> {
                Ok(Self)
            }
        }
    };
}

reserved_request!(RmtAddFteRequest, RmtAddFteRequest);
reserved_request!(RmtDeleteFteRequest, RmtDeleteFteRequest);
reserved_request!(RmtDumpFtRequest, RmtDumpFtRequest);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RmtDumpFtReply {
    pub result: i32,
}

impl PayloadCodec for RmtDumpFtReply {
    fn opcode(&self) -> OperationCode {
        OperationCode::RmtDumpFtReply
    }

    fn role(&self) -> MessageRole {
        MessageRole::Response
    }

    fn encode_into(&self, w: &mut PayloadWriter) {
        w.put_i32(self.result);
    }
}

impl RmtDumpFtReply {
    pub fn decode_from(r: &mut PayloadReader) -> ControlResult<Self> {
        Ok(Self {
            result: r.get_i32()?,
        })
    }
}
