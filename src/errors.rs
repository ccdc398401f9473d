// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed error kinds shared by every control-plane component.
//!
//! The core never panics on peer input: decode failures, out-of-state events
//! and refused operations all surface as a [`ControlError`] variant carrying
//! enough context for the caller to apply the recovery policy (drop-and-log,
//! fail the in-flight operation, or destroy the session).

use thiserror::Error;

/// Result alias used throughout the control-plane core.
pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Decode failed or the operation code is unknown. Dropped and logged by
    /// the dispatcher, never fatal.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The requested policy-set name is not registered.
    #[error("unknown policy set: {0}")]
    UnknownPolicy(String),

    /// An FSM or security context received an event that is not valid in its
    /// current state.
    #[error("{operation} not valid in state {state}")]
    WrongState {
        operation: &'static str,
        state: String,
    },

    /// No configured QoS cube dominates the requested flow specification.
    #[error("no QoS cube can honor the requested flow specification")]
    QoSNotAchievable,

    /// The peer cannot be reached over the control transport.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The authentication handshake exceeded its deadline.
    #[error("authentication deadline exceeded for session {0}")]
    AuthTimeout(u32),

    /// The remote side answered a CDAP request with a negative result.
    #[error("peer refused: result={result}, {reason}")]
    PeerRefused { result: i32, reason: String },

    /// Invariant violated; bug-class. Logged loudly, best-effort continue.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// The `result` integer reported to applications and the IPC Manager.
    /// Success is 0, every error kind maps to a stable negative code.
    pub fn result_code(&self) -> i32 {
        match self {
            ControlError::MalformedMessage(_) => -1,
            ControlError::UnknownPolicy(_) => -2,
            ControlError::WrongState { .. } => -3,
            ControlError::QoSNotAchievable => -4,
            ControlError::TransportUnavailable(_) => -5,
            ControlError::AuthTimeout(_) => -6,
            ControlError::PeerRefused { result, .. } => {
                if *result < 0 { *result } else { -7 }
            },
            ControlError::Internal(_) => -128,
        }
    }

    pub fn wrong_state(operation: &'static str, state: impl ToString) -> Self {
        ControlError::WrongState {
            operation,
            state: state.to_string(),
        }
    }
}
