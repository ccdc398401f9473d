// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One Flow Allocator Instance per flow: the per-flow state machine that
//! drives allocation, the CDAP exchange with the peer FAI, connection
//! creation and teardown.
//!
//! ```text
//! NO_STATE -> CONNECTION_CREATE_REQUESTED -> MESSAGE_TO_PEER_FAI_SENT
//!          -> FLOW_ALLOCATED                      (requestor)
//! NO_STATE -> APP_NOTIFIED_OF_INCOMING_FLOW
//!          -> CONNECTION_UPDATE_REQUESTED -> FLOW_ALLOCATED (responder)
//! FLOW_ALLOCATED -> CONNECTION_DESTROY_REQUESTED
//!          -> WAITING_2_MPL_BEFORE_TEARING_DOWN -> FINISHED
//! ```
//!
//! The instance holds no pointer back to its allocator; it is addressed by
//! port-id and looked up on demand, and a finished instance answers every
//! late event with a no-op.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::{
    datapath::DatapathStatus,
    errors::{ControlError, ControlResult},
    flow_allocator::{
        FaShared,
        policy::FlowRequestEvent,
        rib::{FLOW_RIB_OBJECT_CLASS, flow_object_name},
    },
    models::{
        app_flow::{
            AppAllocateFlowRequestArrived, AppAllocateFlowRequestResult,
            AppDeallocateFlowResponse, AppFlowDeallocatedNotification,
        },
        cdap::{CdapMessage, CdapOpCode, RemoteProcessId},
        flow::{Flow, FlowRole},
    },
};

/// The states of the per-flow FSM.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FaiState {
    #[default]
    NoState,
    ConnectionCreateRequested,
    MessageToPeerFaiSent,
    AppNotifiedOfIncomingFlow,
    ConnectionUpdateRequested,
    FlowAllocated,
    ConnectionDestroyRequested,
    Waiting2MplBeforeTearingDown,
    Finished,
}

impl fmt::Display for FaiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaiState::NoState => "NO_STATE",
            FaiState::ConnectionCreateRequested => "CONNECTION_CREATE_REQUESTED",
            FaiState::MessageToPeerFaiSent => "MESSAGE_TO_PEER_FAI_SENT",
            FaiState::AppNotifiedOfIncomingFlow => "APP_NOTIFIED_OF_INCOMING_FLOW",
            FaiState::ConnectionUpdateRequested => "CONNECTION_UPDATE_REQUESTED",
            FaiState::FlowAllocated => "FLOW_ALLOCATED",
            FaiState::ConnectionDestroyRequested => "CONNECTION_DESTROY_REQUESTED",
            FaiState::Waiting2MplBeforeTearingDown => {
                "WAITING_2_MPL_BEFORE_TEARING_DOWN"
            },
            FaiState::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct FaiInner {
    state: FaiState,
    role: FlowRole,
    flow: Flow,
    /// The original allocate request, kept so the outcome can be surfaced.
    request: Option<FlowRequestEvent>,
    /// RIB name of the flow object; also the key the peer addresses.
    object_name: String,
    /// Invoke id of the peer's M_CREATE, echoed in the response.
    invoke_id: i32,
    /// CDAP session used to reach the peer FAI.
    underlying_port_id: u32,
    /// Control port of the local application bound to the flow.
    app_port_id: u32,
    /// True when the local side asked for the teardown.
    local_teardown: bool,
    attempts: u32,
}

pub struct FlowAllocatorInstance {
    port_id: u32,
    shared: Arc<FaShared>,
    inner: Mutex<FaiInner>,
}

impl FlowAllocatorInstance {
    pub(crate) fn new(port_id: u32, shared: Arc<FaShared>) -> Arc<Self> {
        Arc::new(Self {
            port_id,
            shared,
            inner: Mutex::new(FaiInner {
                underlying_port_id: port_id,
                ..Default::default()
            }),
        })
    }

    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    pub fn state(&self) -> FaiState {
        self.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.state() == FaiState::Finished
    }

    pub fn flow(&self) -> Flow {
        self.lock().flow.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FaiInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wrong_state(
        &self,
        operation: &'static str,
        state: FaiState,
    ) -> ControlError {
        ControlError::wrong_state(
            operation,
            format!("{state} (port {})", self.port_id),
        )
    }

    // ---- requestor path ----

    /// Start a locally-requested allocation: remember the request, ask the
    /// datapath for a connection.
    pub fn submit_allocate_request(
        &self,
        flow: Flow,
        event: FlowRequestEvent,
    ) -> ControlResult<()> {
        {
            let mut inner = self.lock();
            if inner.state != FaiState::NoState {
                return Err(self.wrong_state("submit_allocate_request", inner.state));
            }
            inner.role = FlowRole::Requestor;
            inner.flow = flow;
            inner.flow.source_port_id = self.port_id;
            inner.object_name = flow_object_name(self.port_id);
            inner.app_port_id = event.reply_port_id;
            inner.request = Some(event);
            inner.state = FaiState::ConnectionCreateRequested;
        }
        debug!(port = self.port_id, "requesting connection creation");

        let flow = self.flow();
        if let Err(e) = self.shared.datapath.create_connection(self.port_id, &flow) {
            warn!(port = self.port_id, "connection creation failed: {e}");
            self.fail_allocate(e.result_code(), e.to_string());
        }
        Ok(())
    }

    /// The datapath created the local connection (or refused to).
    pub fn process_create_connection_response(
        &self,
        cep_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let flow = {
            let mut inner = self.lock();
            if inner.state != FaiState::ConnectionCreateRequested {
                return Err(self.wrong_state(
                    "process_create_connection_response",
                    inner.state,
                ));
            }
            if result < 0 {
                if self.maybe_retry(&mut inner) {
                    return Ok(());
                }
                drop(inner);
                self.fail_allocate(result, "connection creation refused".into());
                return Ok(());
            }
            inner.flow.source_cep_id = cep_id;
            inner.state = FaiState::MessageToPeerFaiSent;
            inner.flow.clone()
        };

        self.shared.rib.write(
            FLOW_RIB_OBJECT_CLASS,
            &flow_object_name(self.port_id),
            flow.displayable_value(),
        );

        let remote = self.remote();
        if let Err(e) = self.shared.ribd.remote_create_object(
            FLOW_RIB_OBJECT_CLASS,
            &flow_object_name(self.port_id),
            flow.to_bytes(),
            0,
            remote,
        ) {
            warn!(port = self.port_id, "failed to reach the peer FAI: {e}");
            self.fail_allocate(e.result_code(), e.to_string());
        }
        Ok(())
    }

    /// The peer FAI answered our M_CREATE.
    pub fn create_response(
        &self,
        result: i32,
        result_reason: &str,
        object_value: bytes::Bytes,
    ) -> ControlResult<()> {
        {
            let inner = self.lock();
            if inner.state != FaiState::MessageToPeerFaiSent {
                return Err(self.wrong_state("create_response", inner.state));
            }
        }

        if result < 0 {
            let retried = {
                let mut inner = self.lock();
                self.maybe_retry(&mut inner)
            };
            if retried {
                let flow = self.flow();
                return self.shared.ribd.remote_create_object(
                    FLOW_RIB_OBJECT_CLASS,
                    &flow_object_name(self.port_id),
                    flow.to_bytes(),
                    0,
                    self.remote(),
                );
            }
            info!(
                port = self.port_id,
                result, result_reason, "peer refused the flow"
            );
            self.fail_allocate(result, result_reason.to_string());
            return Ok(());
        }

        let peer_flow = Flow::from_bytes(object_value)?;
        let flow = {
            let mut inner = self.lock();
            inner.flow.dest_port_id = peer_flow.dest_port_id;
            inner.flow.dest_cep_id = peer_flow.dest_cep_id;
            inner.flow.clone()
        };
        if let Err(e) = self.shared.datapath.commit_connection(self.port_id, &flow) {
            self.fail_allocate(e.result_code(), e.to_string());
        }
        Ok(())
    }

    /// The datapath bound both endpoints; the flow is up.
    pub fn process_create_connection_result(&self, result: i32) -> ControlResult<()> {
        let (flow, event) = {
            let mut inner = self.lock();
            if inner.state != FaiState::MessageToPeerFaiSent {
                return Err(
                    self.wrong_state("process_create_connection_result", inner.state)
                );
            }
            if result < 0 {
                drop(inner);
                self.fail_allocate(result, "connection binding failed".into());
                return Ok(());
            }
            inner.state = FaiState::FlowAllocated;
            (inner.flow.clone(), inner.request.clone())
        };

        info!(port = self.port_id, "flow allocated");
        self.shared.registry.flow_update(self.port_id, flow.clone());
        self.shared.rib.write(
            FLOW_RIB_OBJECT_CLASS,
            &flow_object_name(self.port_id),
            flow.displayable_value(),
        );

        if let Some(event) = event {
            self.reply_allocate_result(&event, self.port_id as i32, String::new());
        }
        Ok(())
    }

    // ---- responder path ----

    /// A peer's M_CREATE(flow) arrived: check the destination is local and
    /// hand the decision to the application.
    pub fn create_flow_request_message_received(
        &self,
        flow: Flow,
        object_name: &str,
        invoke_id: i32,
        underlying_port_id: u32,
    ) -> ControlResult<()> {
        let arrived = {
            let mut inner = self.lock();
            if inner.state != FaiState::NoState {
                return Err(self.wrong_state(
                    "create_flow_request_message_received",
                    inner.state,
                ));
            }
            inner.role = FlowRole::Responder;
            inner.flow = flow;
            inner.object_name = object_name.to_string();
            inner.invoke_id = invoke_id;
            inner.underlying_port_id = underlying_port_id;
            AppAllocateFlowRequestArrived {
                source_name: inner.flow.source_name.clone(),
                dest_name: inner.flow.dest_name.clone(),
                flow_spec: inner.flow.flow_spec.clone(),
                port_id: self.port_id,
                dif_name: inner.flow.dif_name.clone(),
            }
        };

        let Some(registration) =
            self.shared.registry.app_registration(&arrived.dest_name)
        else {
            info!(dest = %arrived.dest_name, "destination application not registered");
            self.send_create_response(-1, "destination application not registered");
            self.finish_now();
            return Ok(());
        };

        {
            let mut inner = self.lock();
            inner.app_port_id = registration.app_port_id;
            inner.state = FaiState::AppNotifiedOfIncomingFlow;
        }
        self.send_to_control_port(registration.app_port_id, arrived.into());
        Ok(())
    }

    /// The application accepted or refused the incoming flow.
    pub fn submit_allocate_response(&self, result: i32) -> ControlResult<()> {
        let flow = {
            let mut inner = self.lock();
            if inner.state != FaiState::AppNotifiedOfIncomingFlow {
                return Err(self.wrong_state("submit_allocate_response", inner.state));
            }
            if result < 0 {
                drop(inner);
                info!(port = self.port_id, result, "application refused the flow");
                self.send_create_response(result, "application refused the flow");
                self.finish_now();
                return Ok(());
            }
            inner.flow.dest_port_id = self.port_id;
            inner.state = FaiState::ConnectionUpdateRequested;
            inner.flow.clone()
        };

        if let Err(e) = self.shared.datapath.update_connection(self.port_id, &flow) {
            self.send_create_response(e.result_code(), &e.to_string());
            self.finish_now();
        }
        Ok(())
    }

    /// The datapath bound the responder's connection.
    pub fn process_update_connection_response(
        &self,
        cep_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let (flow, object_name, invoke_id) = {
            let mut inner = self.lock();
            if inner.state != FaiState::ConnectionUpdateRequested {
                return Err(self.wrong_state(
                    "process_update_connection_response",
                    inner.state,
                ));
            }
            if result < 0 {
                drop(inner);
                self.send_create_response(result, "connection update failed");
                self.finish_now();
                return Ok(());
            }
            if cep_id != 0 {
                inner.flow.dest_cep_id = cep_id;
            }
            inner.state = FaiState::FlowAllocated;
            (
                inner.flow.clone(),
                inner.object_name.clone(),
                inner.invoke_id,
            )
        };

        info!(port = self.port_id, "flow allocated");
        self.shared.registry.flow_update(self.port_id, flow.clone());
        self.shared.rib.write(
            FLOW_RIB_OBJECT_CLASS,
            &flow_object_name(self.port_id),
            flow.displayable_value(),
        );

        let response = CdapMessage {
            op_code: CdapOpCode::MCreateR,
            object_class: FLOW_RIB_OBJECT_CLASS.to_string(),
            object_name,
            object_value: flow.to_bytes(),
            invoke_id,
            result: 0,
            result_reason: String::new(),
        };
        if let Err(e) = self.shared.ribd.send(response, self.remote()) {
            warn!(port = self.port_id, "failed to answer the peer FAI: {e}");
        }
        Ok(())
    }

    // ---- teardown ----

    /// Locally requested teardown: tell the peer, tear the connection down.
    /// Entering the destroy phase twice is a no-op; whoever got there first
    /// owns the 2-MPL wait.
    pub fn submit_deallocate(self: &Arc<Self>) -> ControlResult<()> {
        {
            let mut inner = self.lock();
            match inner.state {
                FaiState::FlowAllocated => {
                    inner.local_teardown = true;
                    inner.state = FaiState::ConnectionDestroyRequested;
                },
                FaiState::ConnectionDestroyRequested
                | FaiState::Waiting2MplBeforeTearingDown
                | FaiState::Finished => {
                    debug!(port = self.port_id, "teardown already in progress");
                    return Ok(());
                },
                state => return Err(self.wrong_state("submit_deallocate", state)),
            }
        }

        let object_name = self.lock().object_name.clone();
        if let Err(e) = self.shared.ribd.remote_delete_object(
            FLOW_RIB_OBJECT_CLASS,
            &object_name,
            0,
            self.remote(),
        ) {
            warn!(port = self.port_id, "failed to send M_DELETE: {e}");
        }
        self.destroy_connection_or_drain();
        Ok(())
    }

    /// A peer M_DELETE on our flow object: notify the application and tear
    /// the connection down. Late deletes during teardown are no-ops.
    pub fn delete_flow_request_message_received(
        self: &Arc<Self>,
        invoke_id: i32,
    ) -> ControlResult<()> {
        let (app_name, app_port, object_name) = {
            let mut inner = self.lock();
            match inner.state {
                FaiState::FlowAllocated => {},
                FaiState::ConnectionDestroyRequested
                | FaiState::Waiting2MplBeforeTearingDown
                | FaiState::Finished => {
                    debug!(port = self.port_id, "teardown already in progress");
                    return Ok(());
                },
                state => {
                    return Err(self.wrong_state(
                        "delete_flow_request_message_received",
                        state,
                    ));
                },
            }
            inner.local_teardown = false;
            inner.state = FaiState::ConnectionDestroyRequested;
            let app_name = match inner.role {
                FlowRole::Requestor => inner.flow.source_name.clone(),
                FlowRole::Responder => inner.flow.dest_name.clone(),
            };
            (app_name, inner.app_port_id, inner.object_name.clone())
        };

        if app_port != 0 {
            let dif_name = self.lock().flow.dif_name.clone();
            self.send_to_control_port(
                app_port,
                AppFlowDeallocatedNotification {
                    port_id: self.port_id,
                    code: 0,
                    app_name,
                    dif_name,
                }
                .into(),
            );
        }

        let response = CdapMessage::response(
            CdapOpCode::MDeleteR,
            FLOW_RIB_OBJECT_CLASS,
            object_name,
            invoke_id,
            0,
            "",
        );
        if let Err(e) = self.shared.ribd.send(response, self.remote()) {
            warn!(port = self.port_id, "failed to answer M_DELETE: {e}");
        }

        self.destroy_connection_or_drain();
        Ok(())
    }

    /// Ask the datapath to tear the connection down. Neither a synchronous
    /// completion nor a refusal may strand the FSM in
    /// `CONNECTION_DESTROY_REQUESTED`: in both cases the drain path runs
    /// here, so the flow still reaches `FINISHED` and the port-id is
    /// released after its 2-MPL wait.
    fn destroy_connection_or_drain(self: &Arc<Self>) {
        let drain_result = match self.shared.datapath.destroy_connection(self.port_id)
        {
            Ok(DatapathStatus::InProgress) => return,
            Ok(DatapathStatus::Successful) => 0,
            Err(e) => {
                warn!(port = self.port_id, "teardown request failed: {e}");
                e.result_code()
            },
        };
        if let Err(e) = self.process_destroy_connection_result(drain_result) {
            warn!(port = self.port_id, "teardown drain not started: {e}");
        }
    }

    /// The datapath confirmed the teardown; park the port for 2 MPL before
    /// it can be reused.
    pub fn process_destroy_connection_result(
        self: &Arc<Self>,
        result: i32,
    ) -> ControlResult<()> {
        {
            let mut inner = self.lock();
            if inner.state != FaiState::ConnectionDestroyRequested {
                return Err(self.wrong_state(
                    "process_destroy_connection_result",
                    inner.state,
                ));
            }
            if result < 0 {
                warn!(port = self.port_id, result, "teardown reported an error");
            }
            inner.state = FaiState::Waiting2MplBeforeTearingDown;
        }

        let wait = 2 * self.shared.mpl;
        debug!(port = self.port_id, ?wait, "waiting 2 MPL before tearing down");
        let fai = Arc::clone(self);
        self.shared.timer.schedule(wait, move || {
            fai.teardown_timer_fired();
        });
        Ok(())
    }

    /// The 2-MPL drain elapsed: reach the terminal state and release
    /// everything, the port-id last.
    pub fn teardown_timer_fired(&self) {
        let (local_teardown, app_port, app_name) = {
            let mut inner = self.lock();
            if inner.state != FaiState::Waiting2MplBeforeTearingDown {
                return;
            }
            inner.state = FaiState::Finished;
            let app_name = match inner.role {
                FlowRole::Requestor => inner.flow.source_name.clone(),
                FlowRole::Responder => inner.flow.dest_name.clone(),
            };
            (inner.local_teardown, inner.app_port_id, app_name)
        };

        info!(port = self.port_id, "flow torn down");
        self.shared.registry.flow_remove(self.port_id);
        self.shared.rib.remove(&flow_object_name(self.port_id));
        self.shared.port_ids.release(self.port_id);

        if local_teardown && app_port != 0 {
            self.send_to_control_port(
                app_port,
                AppDeallocateFlowResponse {
                    result: 0,
                    error_description: String::new(),
                    app_name,
                }
                .into(),
            );
        }
    }

    // ---- helpers ----

    fn remote(&self) -> RemoteProcessId {
        RemoteProcessId {
            port_id: self.lock().underlying_port_id,
        }
    }

    /// Retry bookkeeping for a refused allocation. True when another attempt
    /// was granted.
    fn maybe_retry(&self, inner: &mut FaiInner) -> bool {
        inner.attempts += 1;
        let retry = self.shared.retry_policy.should_retry(inner.attempts);
        if retry {
            info!(
                port = self.port_id,
                attempts = inner.attempts,
                "retrying the allocate request"
            );
        }
        retry
    }

    /// A refused or failed allocation: surface `result < 0` to the
    /// requestor and reach the terminal state immediately (no connection
    /// ever existed, so there is nothing to drain).
    fn fail_allocate(&self, result: i32, description: String) {
        let event = {
            let mut inner = self.lock();
            inner.state = FaiState::Finished;
            inner.request.take()
        };
        self.cleanup_indexes();
        if let Some(event) = event {
            self.reply_allocate_result(&event, result.min(-1), description);
        }
    }

    /// Terminal housekeeping for flows that never reached FLOW_ALLOCATED.
    fn finish_now(&self) {
        self.lock().state = FaiState::Finished;
        self.cleanup_indexes();
    }

    fn cleanup_indexes(&self) {
        self.shared.registry.flow_remove(self.port_id);
        self.shared.rib.remove(&flow_object_name(self.port_id));
        self.shared.port_ids.release(self.port_id);
    }

    fn send_create_response(&self, result: i32, reason: &str) {
        let (object_name, invoke_id) = {
            let inner = self.lock();
            (inner.object_name.clone(), inner.invoke_id)
        };
        let response = CdapMessage::response(
            CdapOpCode::MCreateR,
            FLOW_RIB_OBJECT_CLASS,
            object_name,
            invoke_id,
            result,
            reason,
        );
        if let Err(e) = self.shared.ribd.send(response, self.remote()) {
            warn!(port = self.port_id, "failed to answer the peer FAI: {e}");
        }
    }

    fn reply_allocate_result(
        &self,
        event: &FlowRequestEvent,
        port_or_error: i32,
        description: String,
    ) {
        self.send_to_control_port(
            event.reply_port_id,
            AppAllocateFlowRequestResult {
                source_name: event.source_name.clone(),
                port_id: port_or_error,
                error_description: description,
                dif_name: event.dif_name.clone(),
                ipcp_port_id: self.shared.local_control_port_id,
                ipcp_id: self.shared.local_ipcp_id,
            }
            .into(),
        );
    }

    fn send_to_control_port(
        &self,
        dest_port_id: u32,
        payload: crate::models::message::MessagePayload,
    ) {
        if self.shared.outbound.send((dest_port_id, payload)).is_err() {
            warn!(port = self.port_id, "control outbound channel closed");
        }
    }
}
