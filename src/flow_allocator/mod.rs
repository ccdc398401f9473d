// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Flow Allocator: one instance per flow, each driving the per-flow
//! FSM, plus the routing that turns control messages, CDAP messages and
//! datapath completions into FSM events.

/// The per-flow state machine.
pub mod instance;
/// QoS-cube selection and retry policies.
pub mod policy;
/// RIB paths and the data-transfer constants object.
pub mod rib;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    datapath::Datapath,
    errors::{ControlError, ControlResult},
    flow_allocator::{
        instance::FlowAllocatorInstance,
        policy::{
            AllocateRetryPolicy, FlowRequestEvent, NewFlowRequestPolicy,
            NoRetryPolicy, SimpleNewFlowRequestPolicy,
        },
        rib::{
            DATA_TRANSFER_CONSTANTS_RIB_OBJECT_CLASS,
            DATA_TRANSFER_CONSTANTS_RIB_OBJECT_NAME, DataTransferConstants,
            FLOW_RIB_OBJECT_CLASS, populate_rib, port_id_from_object_name,
        },
    },
    models::{
        app_flow::AppAllocateFlowRequestResult,
        cdap::{CdapMessage, CdapOpCode, RibDaemon},
        flow::Flow,
        message::MessagePayload,
        naming::ApplicationName,
        qos::QoSCube,
    },
    registry::{IpcProcessRegistry, PortIdAllocator},
    rib::RibStore,
    security::timer::DeadlineTimer,
};

/// Everything a flow allocator instance needs from its surroundings,
/// captured once at construction. No ambient state.
pub(crate) struct FaShared {
    /// Control messages bound for applications and the IPC Manager; the
    /// daemon forwards them onto the transport.
    pub outbound: mpsc::UnboundedSender<(u32, MessagePayload)>,
    pub ribd: Arc<dyn RibDaemon>,
    pub datapath: Arc<dyn Datapath>,
    pub timer: Arc<DeadlineTimer>,
    pub registry: Arc<IpcProcessRegistry>,
    pub port_ids: Arc<PortIdAllocator>,
    pub rib: Arc<RibStore>,
    pub retry_policy: Arc<dyn AllocateRetryPolicy>,
    /// Maximum packet lifetime; teardown waits twice this.
    pub mpl: Duration,
    pub local_ipcp_id: u16,
    pub local_control_port_id: u32,
    pub dif_name: ApplicationName,
}

pub struct FlowAllocator {
    instances: DashMap<u32, Arc<FlowAllocatorInstance>>,
    /// Flow-object name -> local port. The responder's instance lives under
    /// the object name the requestor minted, so peer messages route here.
    objects: DashMap<String, u32>,
    cubes: Vec<QoSCube>,
    new_flow_policy: Box<dyn NewFlowRequestPolicy>,
    shared: Arc<FaShared>,
}

/// Construction parameters for [`FlowAllocator::new`].
pub struct FlowAllocatorParts {
    pub outbound: mpsc::UnboundedSender<(u32, MessagePayload)>,
    pub ribd: Arc<dyn RibDaemon>,
    pub datapath: Arc<dyn Datapath>,
    pub timer: Arc<DeadlineTimer>,
    pub registry: Arc<IpcProcessRegistry>,
    pub port_ids: Arc<PortIdAllocator>,
    pub rib: Arc<RibStore>,
    pub mpl: Duration,
    pub local_ipcp_id: u16,
    pub local_control_port_id: u32,
    pub dif_name: ApplicationName,
    pub cubes: Vec<QoSCube>,
}

impl FlowAllocator {
    pub fn new(parts: FlowAllocatorParts) -> Arc<Self> {
        populate_rib(&parts.rib, &parts.cubes);
        let shared = Arc::new(FaShared {
            outbound: parts.outbound,
            ribd: parts.ribd,
            datapath: parts.datapath,
            timer: parts.timer,
            registry: parts.registry,
            port_ids: parts.port_ids,
            rib: parts.rib,
            retry_policy: Arc::new(NoRetryPolicy),
            mpl: parts.mpl,
            local_ipcp_id: parts.local_ipcp_id,
            local_control_port_id: parts.local_control_port_id,
            dif_name: parts.dif_name,
        });
        Arc::new(Self {
            instances: DashMap::new(),
            objects: DashMap::new(),
            cubes: parts.cubes,
            new_flow_policy: Box::new(SimpleNewFlowRequestPolicy),
            shared,
        })
    }

    /// Number of instances whose FSM has not reached the terminal state.
    pub fn live_flow_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|e| !e.value().is_finished())
            .count()
    }

    pub fn instance(&self, port_id: u32) -> Option<Arc<FlowAllocatorInstance>> {
        self.instances.get(&port_id).map(|e| Arc::clone(e.value()))
    }

    /// Port-ids of every tracked instance.
    pub fn ports(&self) -> Vec<u32> {
        self.instances.iter().map(|e| *e.key()).collect()
    }

    pub fn remove_flow_allocator_instance(&self, port_id: u32) {
        self.instances.remove(&port_id);
        self.objects.retain(|_, port| *port != port_id);
    }

    /// Drop instances that already answered their last event.
    fn purge_if_finished(&self, port_id: u32) {
        let finished = self
            .instances
            .get(&port_id)
            .map(|e| e.value().is_finished())
            .unwrap_or(false);
        if finished {
            self.remove_flow_allocator_instance(port_id);
        }
    }

    /// A local application asked for a flow. Name validation and cube
    /// selection happen before any state is created; a bad name or an
    /// unsatisfiable spec fails here.
    pub fn submit_allocate_request(&self, event: FlowRequestEvent) -> ControlResult<()> {
        if let Err(e) = event
            .source_name
            .validate()
            .and_then(|()| event.dest_name.validate())
        {
            info!(
                source = %event.source_name,
                dest = %event.dest_name,
                "allocate request refused: {e}"
            );
            self.reply_without_instance(&event, &e);
            return Ok(());
        }

        let flow = match self.new_flow_policy.generate_flow(&event, &self.cubes) {
            Ok(flow) => flow,
            Err(e) => {
                info!(
                    source = %event.source_name,
                    dest = %event.dest_name,
                    "allocate request failed: {e}"
                );
                self.reply_without_instance(&event, &e);
                return Ok(());
            },
        };

        let port_id = self.shared.port_ids.allocate();
        let fai = FlowAllocatorInstance::new(port_id, Arc::clone(&self.shared));
        self.instances.insert(port_id, Arc::clone(&fai));
        self.objects
            .insert(crate::flow_allocator::rib::flow_object_name(port_id), port_id);
        self.shared.registry.flow_add(port_id, flow.clone())?;
        debug!(port = port_id, "flow allocator instance created");
        fai.submit_allocate_request(flow, event)
    }

    /// The application's answer to an incoming-flow notification.
    pub fn submit_allocate_response(
        &self,
        port_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let outcome = self
            .instance(port_id)
            .ok_or_else(|| Self::no_instance("submit_allocate_response", port_id))?
            .submit_allocate_response(result);
        self.purge_if_finished(port_id);
        outcome
    }

    /// A local deallocate request for a port.
    pub fn submit_deallocate(&self, port_id: u32) -> ControlResult<()> {
        self.instance(port_id)
            .ok_or_else(|| Self::no_instance("submit_deallocate", port_id))?
            .submit_deallocate()
    }

    // ---- datapath completions ----

    pub fn process_create_connection_response(
        &self,
        port_id: u32,
        cep_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let outcome = self
            .instance(port_id)
            .ok_or_else(|| {
                Self::no_instance("process_create_connection_response", port_id)
            })?
            .process_create_connection_response(cep_id, result);
        self.purge_if_finished(port_id);
        outcome
    }

    pub fn process_create_connection_result(
        &self,
        port_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let outcome = self
            .instance(port_id)
            .ok_or_else(|| {
                Self::no_instance("process_create_connection_result", port_id)
            })?
            .process_create_connection_result(result);
        self.purge_if_finished(port_id);
        outcome
    }

    pub fn process_update_connection_response(
        &self,
        port_id: u32,
        cep_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        let outcome = self
            .instance(port_id)
            .ok_or_else(|| {
                Self::no_instance("process_update_connection_response", port_id)
            })?
            .process_update_connection_response(cep_id, result);
        self.purge_if_finished(port_id);
        outcome
    }

    pub fn process_destroy_connection_result(
        &self,
        port_id: u32,
        result: i32,
    ) -> ControlResult<()> {
        self.instance(port_id)
            .ok_or_else(|| {
                Self::no_instance("process_destroy_connection_result", port_id)
            })?
            .process_destroy_connection_result(result)
    }

    // ---- CDAP surface ----

    /// Route a CDAP message addressed at the flow-allocator subtree.
    /// `session_port_id` identifies the N-1 session it arrived on.
    pub fn cdap_message_received(
        &self,
        msg: &CdapMessage,
        session_port_id: u32,
    ) -> ControlResult<()> {
        match (msg.op_code, msg.object_class.as_str()) {
            (CdapOpCode::MCreate, FLOW_RIB_OBJECT_CLASS) => {
                let flow = Flow::from_bytes(msg.object_value.clone())?;
                self.create_flow_request_message_received(
                    flow,
                    &msg.object_name,
                    msg.invoke_id,
                    session_port_id,
                )
            },
            (CdapOpCode::MCreateR, FLOW_RIB_OBJECT_CLASS) => {
                let port_id = self.port_for_object(&msg.object_name)?;
                let outcome = self
                    .instance(port_id)
                    .ok_or_else(|| Self::no_instance("create_response", port_id))?
                    .create_response(
                        msg.result,
                        &msg.result_reason,
                        msg.object_value.clone(),
                    );
                self.purge_if_finished(port_id);
                outcome
            },
            (CdapOpCode::MDelete, FLOW_RIB_OBJECT_CLASS) => {
                let port_id = self.port_for_object(&msg.object_name)?;
                self.instance(port_id)
                    .ok_or_else(|| {
                        Self::no_instance("delete_flow_request", port_id)
                    })?
                    .delete_flow_request_message_received(msg.invoke_id)
            },
            (CdapOpCode::MDeleteR, FLOW_RIB_OBJECT_CLASS) => {
                debug!(object = %msg.object_name, "peer confirmed the teardown");
                Ok(())
            },
            (CdapOpCode::MWrite, DATA_TRANSFER_CONSTANTS_RIB_OBJECT_CLASS) => {
                self.data_transfer_constants_written(msg.object_value.clone())
            },
            (op, class) => Err(ControlError::MalformedMessage(format!(
                "no flow-allocator handler for {op:?} on class '{class}'"
            ))),
        }
    }

    /// A peer M_CREATE(flow): mint a responder instance on a fresh port.
    pub fn create_flow_request_message_received(
        &self,
        flow: Flow,
        object_name: &str,
        invoke_id: i32,
        underlying_port_id: u32,
    ) -> ControlResult<()> {
        let port_id = self.shared.port_ids.allocate();
        let fai = FlowAllocatorInstance::new(port_id, Arc::clone(&self.shared));
        self.instances.insert(port_id, Arc::clone(&fai));
        self.objects.insert(object_name.to_string(), port_id);
        self.shared.registry.flow_add(port_id, flow.clone())?;
        debug!(port = port_id, object_name, "responder instance created");
        let outcome = fai.create_flow_request_message_received(
            flow,
            object_name,
            invoke_id,
            underlying_port_id,
        );
        self.purge_if_finished(port_id);
        outcome
    }

    /// Remote update of the DIF's data-transfer constants.
    fn data_transfer_constants_written(&self, value: Bytes) -> ControlResult<()> {
        let constants = DataTransferConstants::from_bytes(value)?;
        info!(constants = %constants.displayable_value(), "data-transfer constants updated");
        self.shared.rib.write(
            DATA_TRANSFER_CONSTANTS_RIB_OBJECT_CLASS,
            DATA_TRANSFER_CONSTANTS_RIB_OBJECT_NAME,
            constants.displayable_value(),
        );
        Ok(())
    }

    fn port_for_object(&self, object_name: &str) -> ControlResult<u32> {
        if let Some(port) = self.objects.get(object_name) {
            return Ok(*port);
        }
        port_id_from_object_name(object_name).ok_or_else(|| {
            ControlError::MalformedMessage(format!(
                "'{object_name}' is not a flow object name"
            ))
        })
    }

    fn no_instance(operation: &'static str, port_id: u32) -> ControlError {
        ControlError::wrong_state(operation, format!("no instance for port {port_id}"))
    }

    /// Failure before any instance exists: answer the requestor directly.
    fn reply_without_instance(&self, event: &FlowRequestEvent, error: &ControlError) {
        let reply = AppAllocateFlowRequestResult {
            source_name: event.source_name.clone(),
            port_id: error.result_code(),
            error_description: error.to_string(),
            dif_name: self.shared.dif_name.clone(),
            ipcp_port_id: self.shared.local_control_port_id,
            ipcp_id: self.shared.local_ipcp_id,
        };
        if self
            .shared
            .outbound
            .send((event.reply_port_id, reply.into()))
            .is_err()
        {
            warn!("control outbound channel closed");
        }
    }
}
