// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The closed registry of control-message operation codes.
//!
//! Every message exchanged between applications, IPC Processes and the IPC
//! Manager carries one of these codes in its fixed header. The set is
//! closed: a decoder that meets an unknown code must reject the message, it
//! must never silently drop it.
//!
//! The `Rmt*` codes are reserved for the kernel relay-and-multiplexing task:
//! the codec round-trips them but no control-plane handler exists.

use thiserror::Error;

/// All operation codes understood by the control plane.
#[repr(u16)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCode {
    #[default]
    Unspecified = 0,
    AppAllocateFlowRequest = 1,
    AppAllocateFlowRequestResult = 2,
    AppAllocateFlowRequestArrived = 3,
    AppAllocateFlowResponse = 4,
    AppDeallocateFlowRequest = 5,
    AppDeallocateFlowResponse = 6,
    AppFlowDeallocatedNotification = 7,
    AppRegisterApplicationRequest = 8,
    AppRegisterApplicationResponse = 9,
    AppUnregisterApplicationRequest = 10,
    AppUnregisterApplicationResponse = 11,
    AppRegistrationCanceledNotification = 12,
    AppGetDifPropertiesRequest = 13,
    AppGetDifPropertiesResponse = 14,
    IpcmAssignToDifRequest = 15,
    IpcmAssignToDifResponse = 16,
    IpcmIpcProcessDifRegistrationNotification = 17,
    IpcmEnrollToDifRequest = 18,
    IpcmEnrollToDifResponse = 19,
    IpcmDisconnectFromNeighborRequest = 20,
    IpcmDisconnectFromNeighborResponse = 21,
    IpcmAllocateFlowRequest = 22,
    IpcmAllocateFlowResponse = 23,
    IpcmRegisterApplicationRequest = 24,
    IpcmRegisterApplicationResponse = 25,
    IpcmUnregisterApplicationRequest = 26,
    IpcmUnregisterApplicationResponse = 27,
    IpcmQueryRibRequest = 28,
    IpcmQueryRibResponse = 29,
    RmtAddFteRequest = 30,
    RmtDeleteFteRequest = 31,
    RmtDumpFtRequest = 32,
    RmtDumpFtReply = 33,
}

impl OperationCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => Self::Unspecified,
            1 => Self::AppAllocateFlowRequest,
            2 => Self::AppAllocateFlowRequestResult,
            3 => Self::AppAllocateFlowRequestArrived,
            4 => Self::AppAllocateFlowResponse,
            5 => Self::AppDeallocateFlowRequest,
            6 => Self::AppDeallocateFlowResponse,
            7 => Self::AppFlowDeallocatedNotification,
            8 => Self::AppRegisterApplicationRequest,
            9 => Self::AppRegisterApplicationResponse,
            10 => Self::AppUnregisterApplicationRequest,
            11 => Self::AppUnregisterApplicationResponse,
            12 => Self::AppRegistrationCanceledNotification,
            13 => Self::AppGetDifPropertiesRequest,
            14 => Self::AppGetDifPropertiesResponse,
            15 => Self::IpcmAssignToDifRequest,
            16 => Self::IpcmAssignToDifResponse,
            17 => Self::IpcmIpcProcessDifRegistrationNotification,
            18 => Self::IpcmEnrollToDifRequest,
            19 => Self::IpcmEnrollToDifResponse,
            20 => Self::IpcmDisconnectFromNeighborRequest,
            21 => Self::IpcmDisconnectFromNeighborResponse,
            22 => Self::IpcmAllocateFlowRequest,
            23 => Self::IpcmAllocateFlowResponse,
            24 => Self::IpcmRegisterApplicationRequest,
            25 => Self::IpcmRegisterApplicationResponse,
            26 => Self::IpcmUnregisterApplicationRequest,
            27 => Self::IpcmUnregisterApplicationResponse,
            28 => Self::IpcmQueryRibRequest,
            29 => Self::IpcmQueryRibResponse,
            30 => Self::RmtAddFteRequest,
            31 => Self::RmtDeleteFteRequest,
            32 => Self::RmtDumpFtRequest,
            33 => Self::RmtDumpFtReply,
            _ => return None,
        })
    }

    /// Reserved codes round-trip through the codec but have no handler.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            Self::RmtAddFteRequest
                | Self::RmtDeleteFteRequest
                | Self::RmtDumpFtRequest
                | Self::RmtDumpFtReply
        )
    }
}

/// Returned when the header carries an operation code outside the registry.
#[derive(Debug, Error)]
#[error("unknown operation code: {0}")]
pub struct UnknownOpcode(pub u16);
