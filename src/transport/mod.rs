// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The datagram control transport.
//!
//! This is the only component that touches raw bytes. One socket carries
//! every control message of a process: a dedicated read loop decodes
//! inbound datagrams and hands `(source_port_id, message)` pairs to the
//! dispatcher in arrival order, so ordering within a source port is
//! preserved end to end. Outgoing messages are stamped with a strictly
//! monotonic sequence number.
//!
//! Malformed datagrams (unknown op-code, bad role bits, truncated payload)
//! are logged and dropped here; they never reach a handler.

/// Message-family name resolution.
pub mod family;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context as _, Result};
use tokio::{net::UdpSocket, sync::{Mutex, mpsc}, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    errors::{ControlError, ControlResult},
    models::message::{ControlMessage, MessagePayload},
    transport::family::FamilyRegistry,
};

/// Largest datagram the read loop will accept.
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct ControlTransport {
    socket: Arc<UdpSocket>,
    family_id: u16,
    local_port_id: u32,
    local_ipcp_id: u16,
    sequence: AtomicU32,
    inbound: Mutex<mpsc::Receiver<(u32, ControlMessage)>>,
    cancel: CancellationToken,
    io_timeout: Duration,
}

impl ControlTransport {
    /// Bind the local socket, connect it to the peer, resolve the family id
    /// by name and start the read loop.
    pub async fn bind(
        family_name: &str,
        local_addr: &str,
        peer_addr: &str,
        local_port_id: u32,
        local_ipcp_id: u16,
        io_timeout: Duration,
        families: &FamilyRegistry,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(local_addr)
            .await
            .with_context(|| format!("failed to bind control socket {local_addr}"))?;
        socket
            .connect(peer_addr)
            .await
            .with_context(|| format!("failed to connect control socket to {peer_addr}"))?;

        let family_id = families.resolve(family_name);
        debug!(family_name, family_id, "resolved control family");

        let (tx, rx) = mpsc::channel(256);
        let transport = Arc::new(Self {
            socket: Arc::new(socket),
            family_id,
            local_port_id,
            local_ipcp_id,
            sequence: AtomicU32::new(0),
            inbound: Mutex::new(rx),
            cancel,
            io_timeout,
        });

        let reader = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop(tx).await {
                warn!("control transport read loop exited: {e}");
            }
        });

        Ok(transport)
    }

    pub fn family_id(&self) -> u16 {
        self.family_id
    }

    pub fn local_port_id(&self) -> u32 {
        self.local_port_id
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Fire-and-forget send to a peer port. Returns the stamped sequence
    /// number.
    pub async fn send(
        &self,
        dest_port_id: u32,
        payload: MessagePayload,
    ) -> ControlResult<u32> {
        self.send_to_ipcp(dest_port_id, 0, payload).await
    }

    /// Send to a peer port addressing a specific IPC Process.
    pub async fn send_to_ipcp(
        &self,
        dest_port_id: u32,
        dest_ipcp_id: u16,
        payload: MessagePayload,
    ) -> ControlResult<u32> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::TransportUnavailable(
                "transport is shut down".into(),
            ));
        }

        let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let msg = ControlMessage {
            family: self.family_id,
            source_port_id: self.local_port_id,
            dest_port_id,
            source_ipcp_id: self.local_ipcp_id,
            dest_ipcp_id,
            sequence_number,
            payload,
        };
        let encoded = msg.encode()?;
        debug!(
            opcode = ?msg.opcode(),
            dest_port_id,
            sequence_number,
            len = encoded.len(),
            "SEND control message"
        );

        let send = self.socket.send(&encoded);
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ControlError::TransportUnavailable("cancelled".into()));
            },
            res = timeout(self.io_timeout, send) => match res {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    return Err(ControlError::TransportUnavailable(e.to_string()));
                },
                Err(_) => {
                    return Err(ControlError::TransportUnavailable(
                        "send timed out".into(),
                    ));
                },
            },
        };
        if sent != encoded.len() {
            return Err(ControlError::TransportUnavailable(format!(
                "short datagram write: {sent} of {}",
                encoded.len()
            )));
        }
        Ok(sequence_number)
    }

    /// Blocking receive: one decoded message at a time, in arrival order.
    pub async fn recv(&self) -> ControlResult<(u32, ControlMessage)> {
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ControlError::TransportUnavailable(
                "transport is shut down".into(),
            )),
            msg = rx.recv() => msg.ok_or_else(|| {
                ControlError::TransportUnavailable("read loop terminated".into())
            }),
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        tx: mpsc::Sender<(u32, ControlMessage)>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                res = self.socket.recv(&mut buf) => res?,
            };

            let msg = match ControlMessage::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    // Per the error policy: drop, log, continue.
                    warn!("dropping malformed control datagram: {e}");
                    continue;
                },
            };

            if msg.family != self.family_id {
                warn!(
                    got = msg.family,
                    want = self.family_id,
                    "dropping datagram from a foreign message family"
                );
                continue;
            }

            debug!(opcode = ?msg.opcode(), source = msg.source_port_id, "RECV control message");
            let source = msg.source_port_id;
            if tx.send((source, msg)).await.is_err() {
                return Ok(());
            }
        }
    }
}
