// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The boundary to the datapath (kernel or user-space data-transfer
//! machinery).
//!
//! Every call may complete synchronously (`Successful`) or later through a
//! [`DatapathEvent`] completion (`InProgress`). The control plane treats the
//! datapath as a black box: it requests connection and crypto state changes
//! and reacts to the completions the daemon feeds back into it.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    errors::{ControlError, ControlResult},
    models::flow::Flow,
};

/// Synchronous outcome of a datapath request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapathStatus {
    Successful,
    InProgress,
}

/// Which direction of SDU protection to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoDirection {
    Decrypt,
    Encrypt,
    EncryptDecrypt,
}

/// Material handed to the datapath when enabling SDU protection.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CryptoProfile {
    pub encrypt_alg: String,
    pub mac_alg: String,
    pub compress_alg: String,
    pub shared_secret: Vec<u8>,
}

/// Asynchronous completions emitted by the datapath, keyed by the local
/// port-id of the flow they concern.
#[derive(Debug, Clone, PartialEq)]
pub enum DatapathEvent {
    /// The local connection exists; `cep_id` is the local endpoint.
    CreateConnectionResponse {
        port_id: u32,
        cep_id: u32,
        result: i32,
    },
    /// The connection is fully bound to both endpoints.
    CreateConnectionResult { port_id: u32, result: i32 },
    /// The connection was (created if needed and) bound to the remote
    /// endpoint; `cep_id` is the local endpoint, 0 when unchanged.
    UpdateConnectionResponse {
        port_id: u32,
        cep_id: u32,
        result: i32,
    },
    DestroyConnectionResult { port_id: u32, result: i32 },
    CryptoEnabled {
        port_id: u32,
        direction: CryptoDirection,
        result: i32,
    },
}

pub trait Datapath: Send + Sync {
    /// Create the local half of the connection for the flow bound to
    /// `port_id`.
    fn create_connection(&self, port_id: u32, flow: &Flow)
    -> ControlResult<DatapathStatus>;

    /// Requestor side: bind the peer's endpoint into the connection created
    /// by [`Datapath::create_connection`]. Completes with
    /// [`DatapathEvent::CreateConnectionResult`].
    fn commit_connection(&self, port_id: u32, flow: &Flow)
    -> ControlResult<DatapathStatus>;

    /// Responder side: create the local connection (if it does not exist
    /// yet) and bind the requestor's endpoint into it. Completes with
    /// [`DatapathEvent::UpdateConnectionResponse`].
    fn update_connection(&self, port_id: u32, flow: &Flow)
    -> ControlResult<DatapathStatus>;

    fn destroy_connection(&self, port_id: u32) -> ControlResult<DatapathStatus>;

    fn enable_crypto(
        &self,
        port_id: u32,
        direction: CryptoDirection,
        profile: &CryptoProfile,
    ) -> ControlResult<DatapathStatus>;

    /// SDU plane. Present for completeness; the control plane never calls
    /// these and the bundled implementation rejects them.
    fn sdu_write(&self, port_id: u32, sdu: Bytes) -> ControlResult<()>;

    fn sdu_read(&self, port_id: u32) -> ControlResult<Bytes>;
}

/// In-process datapath used by the daemon and the tests.
///
/// Connection requests always complete asynchronously through the completion
/// channel, mirroring the kernel behaviour; crypto enablement completes
/// synchronously unless `async_crypto` is set, which exercises the
/// `REQUESTED_ENABLE_*` paths of the SSH2 policy.
pub struct StubDatapath {
    completions: mpsc::UnboundedSender<DatapathEvent>,
    next_cep_id: std::sync::atomic::AtomicU32,
    async_crypto: bool,
}

impl StubDatapath {
    pub fn new(async_crypto: bool) -> (Self, mpsc::UnboundedReceiver<DatapathEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                completions: tx,
                next_cep_id: std::sync::atomic::AtomicU32::new(1),
                async_crypto,
            },
            rx,
        )
    }

    fn complete(&self, event: DatapathEvent) -> ControlResult<DatapathStatus> {
        self.completions.send(event).map_err(|_| {
            ControlError::Internal("datapath completion channel closed".into())
        })?;
        Ok(DatapathStatus::InProgress)
    }
}

impl Datapath for StubDatapath {
    fn create_connection(
        &self,
        port_id: u32,
        _flow: &Flow,
    ) -> ControlResult<DatapathStatus> {
        let cep_id = self
            .next_cep_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.complete(DatapathEvent::CreateConnectionResponse {
            port_id,
            cep_id,
            result: 0,
        })
    }

    fn commit_connection(
        &self,
        port_id: u32,
        _flow: &Flow,
    ) -> ControlResult<DatapathStatus> {
        self.complete(DatapathEvent::CreateConnectionResult { port_id, result: 0 })
    }

    fn update_connection(
        &self,
        port_id: u32,
        flow: &Flow,
    ) -> ControlResult<DatapathStatus> {
        let cep_id = if flow.dest_cep_id == 0 {
            self.next_cep_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        } else {
            0
        };
        self.complete(DatapathEvent::UpdateConnectionResponse {
            port_id,
            cep_id,
            result: 0,
        })
    }

    fn destroy_connection(&self, port_id: u32) -> ControlResult<DatapathStatus> {
        self.complete(DatapathEvent::DestroyConnectionResult { port_id, result: 0 })
    }

    fn enable_crypto(
        &self,
        port_id: u32,
        direction: CryptoDirection,
        _profile: &CryptoProfile,
    ) -> ControlResult<DatapathStatus> {
        if self.async_crypto {
            self.complete(DatapathEvent::CryptoEnabled {
                port_id,
                direction,
                result: 0,
            })
        } else {
            Ok(DatapathStatus::Successful)
        }
    }

    fn sdu_write(&self, port_id: u32, _sdu: Bytes) -> ControlResult<()> {
        Err(ControlError::Internal(format!(
            "sdu_write is not wired for port {port_id}"
        )))
    }

    fn sdu_read(&self, port_id: u32) -> ControlResult<Bytes> {
        Err(ControlError::Internal(format!(
            "sdu_read is not wired for port {port_id}"
        )))
    }
}
