// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Assembly and dispatch: one `IpcpDaemon` wires the transport, the Flow
//! Allocator, the Security Manager, the registry, the RIB and the event bus
//! together, then runs the single-threaded control dispatch loop.
//!
//! Construction captures all shared state in one place and hands it to each
//! subsystem; nothing is ambient. Teardown is explicit and ordered: flows,
//! then security contexts, then the registry, then the transport.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    datapath::{Datapath, DatapathEvent, StubDatapath},
    errors::{ControlError, ControlResult},
    events::{EventBus, EventKind, InternalEvent},
    flow_allocator::{FlowAllocator, FlowAllocatorParts, policy::FlowRequestEvent},
    models::{
        app_flow::AppDeallocateFlowResponse,
        app_registration::DifProperties,
        cdap::{CdapMessage, ChannelRibDaemon, RemoteProcessId, RibDaemon},
        message::{ControlMessage, MessagePayload, PayloadCodec},
        naming::ApplicationName,
        qos::QoSCube,
    },
    registry::{AppRegistration, DummyShim, IpcProcessRegistry, PortIdAllocator},
    rib::RibStore,
    security::{
        SecurityCore, SecurityManager, policy::AuthStatus, timer::DeadlineTimer,
    },
    transport::{ControlTransport, family::FamilyRegistry},
};

/// CDAP object classes the security manager owns.
const AUTH_OBJECT_CLASSES: &[&str] = &[
    crate::security::password::CHALLENGE_REQUEST,
    crate::security::password::CHALLENGE_REPLY,
    crate::security::ssh2::EDH_EXCHANGE,
];

pub struct IpcpDaemon {
    transport: Arc<ControlTransport>,
    fa: Arc<FlowAllocator>,
    security: Arc<SecurityManager>,
    registry: Arc<IpcProcessRegistry>,
    rib: Arc<RibStore>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    dif_name: ApplicationName,
    cubes: Vec<QoSCube>,
    max_sdu_size: u32,
    datapath_events: Mutex<mpsc::UnboundedReceiver<DatapathEvent>>,
    cdap_outbound: Mutex<mpsc::UnboundedReceiver<(RemoteProcessId, CdapMessage)>>,
}

impl IpcpDaemon {
    /// Build the whole stack from configuration. Unrecoverable bring-up
    /// failures (unusable transport, bad DH parameters) surface here and
    /// terminate the owning process.
    pub async fn build(
        cfg: &Config,
        families: &FamilyRegistry,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let transport = ControlTransport::bind(
            &cfg.transport.family_name,
            &cfg.transport.local_addr,
            &cfg.transport.peer_addr,
            cfg.transport.local_port_id,
            cfg.process.ipcp_id,
            cfg.transport.io_timeout,
            families,
            cancel.clone(),
        )
        .await
        .context("control transport bring-up failed")?;

        let timer = DeadlineTimer::new(cancel.clone());
        tokio::spawn(Arc::clone(&timer).run());

        let (datapath, datapath_events) = StubDatapath::new(false);
        let datapath: Arc<dyn Datapath> = Arc::new(datapath);

        let (ribd, cdap_outbound) = ChannelRibDaemon::new();
        let ribd: Arc<dyn RibDaemon> = Arc::new(ribd);

        let rib = Arc::new(RibStore::new());
        let registry = Arc::new(IpcProcessRegistry::new());
        registry.register_shim(Arc::new(DummyShim));
        let process_name = cfg
            .process
            .application_name()
            .map_err(|e| anyhow::anyhow!("invalid process name: {e}"))?;
        registry
            .create(&process_name, cfg.process.ipcp_id, cfg.dif.dif_type)
            .map_err(|e| anyhow::anyhow!("registering own ipcp failed: {e}"))?;

        let security_core = SecurityCore::new(
            Arc::clone(&timer),
            Arc::clone(&ribd),
            Arc::clone(&datapath),
        );
        let security = SecurityManager::new(security_core);
        for policy in &cfg.security.policy_sets {
            security
                .add_policy_set(policy)
                .map_err(|e| anyhow::anyhow!("policy set '{policy}' failed: {e}"))?;
        }

        let bus = Arc::new(EventBus::new());
        let subscriber: Arc<dyn crate::events::EventSubscriber> =
            Arc::clone(&security) as Arc<dyn crate::events::EventSubscriber>;
        bus.subscribe(EventKind::NMinusOneFlowDeallocated, subscriber);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let fa = FlowAllocator::new(FlowAllocatorParts {
            outbound: outbound_tx,
            ribd,
            datapath,
            timer,
            registry: Arc::clone(&registry),
            port_ids: Arc::new(PortIdAllocator::new()),
            rib: Arc::clone(&rib),
            mpl: cfg.timers.mpl,
            local_ipcp_id: cfg.process.ipcp_id,
            local_control_port_id: cfg.transport.local_port_id,
            dif_name: cfg.dif.dif_application_name(),
            cubes: cfg.dif.qos_cubes.clone(),
        });

        Self::spawn_outbound_forwarder(
            Arc::clone(&transport),
            outbound_rx,
            cancel.clone(),
        );

        Ok(Arc::new(Self {
            transport,
            fa,
            security,
            registry,
            rib,
            bus,
            cancel,
            dif_name: cfg.dif.dif_application_name(),
            cubes: cfg.dif.qos_cubes.clone(),
            max_sdu_size: cfg.dif.max_sdu_size,
            datapath_events: Mutex::new(datapath_events),
            cdap_outbound: Mutex::new(cdap_outbound),
        }))
    }

    fn spawn_outbound_forwarder(
        transport: Arc<ControlTransport>,
        mut rx: mpsc::UnboundedReceiver<(u32, MessagePayload)>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => next,
                };
                let Some((dest_port, payload)) = next else { break };
                if let Err(e) = transport.send(dest_port, payload).await {
                    warn!(dest_port, "failed to forward control message: {e}");
                }
            }
        });
    }

    pub fn flow_allocator(&self) -> &Arc<FlowAllocator> {
        &self.fa
    }

    pub fn security_manager(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn registry(&self) -> &Arc<IpcProcessRegistry> {
        &self.registry
    }

    pub fn rib(&self) -> &Arc<RibStore> {
        &self.rib
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The dispatch loop: control messages, datapath completions and
    /// outgoing CDAP, one at a time, until cancelled.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("control dispatch loop running");
        loop {
            let mut datapath_events = self.datapath_events.lock().await;
            let mut cdap_outbound = self.cdap_outbound.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = self.transport.recv() => {
                    drop(datapath_events);
                    drop(cdap_outbound);
                    match msg {
                        Ok((source_port, msg)) => {
                            self.handle_control_message(source_port, msg).await;
                        },
                        Err(e) => {
                            warn!("control transport closed: {e}");
                            break;
                        },
                    }
                },
                event = datapath_events.recv() => {
                    drop(cdap_outbound);
                    match event {
                        Some(event) => self.handle_datapath_event(event),
                        None => break,
                    }
                },
                outbound = cdap_outbound.recv() => {
                    match outbound {
                        Some((remote, msg)) => self.forward_cdap(remote, msg),
                        None => break,
                    }
                },
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Outgoing CDAP rides the N-1 flow's SDU path. The bundled datapath
    /// has no SDU plane, so in-process peers are wired at the test harness
    /// level and anything else is dropped with a log.
    fn forward_cdap(&self, remote: RemoteProcessId, msg: CdapMessage) {
        let encoded = msg.to_bytes();
        if let Err(e) = self
            .fa_datapath()
            .sdu_write(remote.port_id, encoded)
        {
            debug!(port = remote.port_id, "outgoing CDAP not deliverable: {e}");
        }
    }

    fn fa_datapath(&self) -> Arc<dyn Datapath> {
        Arc::clone(&self.security.core().datapath)
    }

    /// One decoded control message from the transport.
    pub async fn handle_control_message(&self, source_port: u32, msg: ControlMessage) {
        let opcode = msg.opcode();
        if let Err(e) = self.dispatch_control_message(source_port, msg).await {
            match e {
                ControlError::MalformedMessage(_) | ControlError::WrongState { .. } => {
                    // Drop, log, continue.
                    warn!(?opcode, source_port, "dropping control message: {e}");
                },
                other => warn!(?opcode, source_port, "handler failed: {other}"),
            }
        }
    }

    async fn dispatch_control_message(
        &self,
        source_port: u32,
        msg: ControlMessage,
    ) -> ControlResult<()> {
        match msg.payload {
            MessagePayload::AppAllocateFlowRequest(req) => {
                self.fa.submit_allocate_request(FlowRequestEvent {
                    source_name: req.source_name,
                    dest_name: req.dest_name,
                    flow_spec: req.flow_spec,
                    dif_name: self.dif_name.clone(),
                    reply_port_id: source_port,
                })
            },
            MessagePayload::IpcmAllocateFlowRequest(req) => {
                let accepted = self.fa.submit_allocate_request(FlowRequestEvent {
                    source_name: req.source_name,
                    dest_name: req.dest_name,
                    flow_spec: req.flow_spec,
                    dif_name: req.dif_name,
                    reply_port_id: req.app_port_id,
                });
                let (code, _) = result_fields(accepted);
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmAllocateFlowResponse {
                            result: code,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::AppAllocateFlowResponse(resp) => {
                self.fa.submit_allocate_response(resp.port_id, resp.result)
            },
            MessagePayload::AppDeallocateFlowRequest(req) => {
                if let Err(e) = self.fa.submit_deallocate(req.port_id) {
                    self.transport
                        .send(
                            source_port,
                            AppDeallocateFlowResponse {
                                result: e.result_code(),
                                error_description: e.to_string(),
                                app_name: req.app_name,
                            }
                            .into(),
                        )
                        .await?;
                }
                Ok(())
            },
            MessagePayload::AppRegisterApplicationRequest(req) => {
                let result = self.registry.register_app(
                    &req.app_name,
                    AppRegistration {
                        dif_name: req.dif_name.clone(),
                        app_port_id: source_port,
                    },
                );
                let (code, description) = result_fields(result);
                self.transport
                    .send(
                        source_port,
                        crate::models::app_registration::AppRegisterApplicationResponse {
                            result: code,
                            error_description: description,
                            app_name: req.app_name,
                            dif_name: req.dif_name,
                            ipcp_port_id: self.transport.local_port_id(),
                            ipcp_id: 0,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::AppUnregisterApplicationRequest(req) => {
                let result = self.registry.unregister_app(&req.app_name);
                let (code, description) = result_fields(result);
                self.transport
                    .send(
                        source_port,
                        crate::models::app_registration::AppUnregisterApplicationResponse {
                            result: code,
                            error_description: description,
                            app_name: req.app_name,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmRegisterApplicationRequest(req) => {
                let result = self.registry.register_app(
                    &req.app_name,
                    AppRegistration {
                        dif_name: req.dif_name,
                        app_port_id: req.app_port_id,
                    },
                );
                let (code, _) = result_fields(result);
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmRegisterApplicationResponse {
                            result: code,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmUnregisterApplicationRequest(req) => {
                let result = self.registry.unregister_app(&req.app_name);
                let (code, _) = result_fields(result);
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmUnregisterApplicationResponse {
                            result: code,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::AppGetDifPropertiesRequest(req) => {
                self.transport
                    .send(
                        source_port,
                        crate::models::app_registration::AppGetDifPropertiesResponse {
                            result: 0,
                            app_name: req.app_name,
                            dif_properties: vec![DifProperties {
                                dif_name: self.dif_name.clone(),
                                max_sdu_size: self.max_sdu_size,
                                qos_cubes: self.cubes.clone(),
                            }],
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmAssignToDifRequest(req) => {
                // Provisioning happens at startup from configuration; the
                // runtime only acknowledges a matching assignment.
                let matches = req.dif_name == self.dif_name;
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmAssignToDifResponse {
                            result: if matches { 0 } else { -1 },
                            error_description: if matches {
                                String::new()
                            } else {
                                format!(
                                    "process is assigned to {}",
                                    self.dif_name
                                )
                            },
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmEnrollToDifRequest(req) => {
                info!(dif = %req.dif_name, "enrollment acknowledged");
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmEnrollToDifResponse { result: 0 }
                            .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmDisconnectFromNeighborRequest(req) => {
                info!(neighbor = %req.neighbor_name, "neighbor disconnect acknowledged");
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmDisconnectFromNeighborResponse {
                            result: 0,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::IpcmQueryRibRequest(req) => {
                let objects = self.rib.query(&req.object_name);
                self.transport
                    .send(
                        source_port,
                        crate::models::ipcm::IpcmQueryRibResponse {
                            result: 0,
                            objects,
                        }
                        .into(),
                    )
                    .await?;
                Ok(())
            },
            MessagePayload::AppFlowDeallocatedNotification(notification) => {
                // We are an application of the N-1 DIF: one of our N-1
                // flows is gone. Fan the event out so per-session state
                // keyed by that port is discarded.
                self.notify_n_minus_one_flow_deallocated(notification.port_id);
                Ok(())
            },
            MessagePayload::IpcmIpcProcessDifRegistrationNotification(n) => {
                info!(
                    ipcp = %n.ipc_process_name,
                    dif = %n.dif_name,
                    registered = n.registered,
                    "N-1 registration changed"
                );
                Ok(())
            },
            MessagePayload::RmtAddFteRequest(_)
            | MessagePayload::RmtDeleteFteRequest(_)
            | MessagePayload::RmtDumpFtRequest(_)
            | MessagePayload::RmtDumpFtReply(_) => {
                debug!("reserved RMT operation dropped");
                Ok(())
            },
            MessagePayload::Unspecified(_) => Ok(()),
            other => Err(ControlError::MalformedMessage(format!(
                "{:?} is not handled by this process",
                other.opcode()
            ))),
        }
    }

    /// One asynchronous datapath completion.
    pub fn handle_datapath_event(&self, event: DatapathEvent) {
        let outcome = match event {
            DatapathEvent::CreateConnectionResponse {
                port_id,
                cep_id,
                result,
            } => self
                .fa
                .process_create_connection_response(port_id, cep_id, result),
            DatapathEvent::CreateConnectionResult { port_id, result } => {
                self.fa.process_create_connection_result(port_id, result)
            },
            DatapathEvent::UpdateConnectionResponse {
                port_id,
                cep_id,
                result,
            } => self
                .fa
                .process_update_connection_response(port_id, cep_id, result),
            DatapathEvent::DestroyConnectionResult { port_id, result } => {
                self.fa.process_destroy_connection_result(port_id, result)
            },
            DatapathEvent::CryptoEnabled {
                port_id,
                direction,
                result,
            } => self
                .security
                .crypto_enable_completed(port_id, direction, result)
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!("datapath completion dropped: {e}");
        }
    }

    /// One CDAP message from a peer, arriving over the N-1 session
    /// `session_port_id`. Authentication classes go to the security
    /// manager, everything else to the Flow Allocator's RIB surface.
    pub fn handle_cdap_message(
        &self,
        msg: &CdapMessage,
        session_port_id: u32,
    ) -> ControlResult<()> {
        if AUTH_OBJECT_CLASSES.contains(&msg.object_class.as_str()) {
            let status = self.security.process_incoming(msg, session_port_id)?;
            match status {
                AuthStatus::Successful => {
                    info!(session = session_port_id, "authentication completed");
                },
                AuthStatus::InProgress => {},
                AuthStatus::Failed => {
                    warn!(session = session_port_id, "authentication failed");
                    self.security.destroy_security_context(session_port_id);
                },
            }
            return Ok(());
        }
        self.fa.cdap_message_received(msg, session_port_id)
    }

    /// Entry point for the resource-allocation layer: an N-1 flow died.
    pub fn notify_n_minus_one_flow_deallocated(&self, port_id: u32) {
        self.bus
            .publish(&InternalEvent::NMinusOneFlowDeallocated { port_id });
    }

    /// Ordered teardown: flows, security contexts, registry, transport.
    pub fn shutdown(&self) {
        info!("shutting the control plane down");
        for port in self.fa.ports() {
            if let Err(e) = self.fa.submit_deallocate(port) {
                debug!(port, "flow teardown skipped: {e}");
            }
        }
        self.security.core().destroy_all();
        if let Err(e) = self.registry.destroy_all() {
            debug!("registry teardown: {e}");
        }
        self.transport.shutdown();
        self.cancel.cancel();
    }
}

fn result_fields(result: ControlResult<()>) -> (i32, String) {
    match result {
        Ok(()) => (0, String::new()),
        Err(e) => (e.result_code(), e.to_string()),
    }
}
