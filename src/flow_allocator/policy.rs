// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flow-allocation policies: translating an allocate request into a flow
//! object, and deciding whether a refused request is retried.

use tracing::debug;

use crate::{
    errors::{ControlError, ControlResult},
    models::{
        flow::Flow,
        naming::ApplicationName,
        qos::{FlowSpec, QoSCube},
    },
};

/// An allocate request as seen by the Flow Allocator, whichever doorway it
/// came in through.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlowRequestEvent {
    pub source_name: ApplicationName,
    pub dest_name: ApplicationName,
    pub flow_spec: FlowSpec,
    pub dif_name: ApplicationName,
    /// Control port the outcome is reported to.
    pub reply_port_id: u32,
}

/// Converts an allocate request into a flow object, selecting the QoS cube.
pub trait NewFlowRequestPolicy: Send + Sync {
    fn generate_flow(
        &self,
        event: &FlowRequestEvent,
        cubes: &[QoSCube],
    ) -> ControlResult<Flow>;
}

/// Scans the configured cube set in order and picks the first cube whose
/// bounds dominate the requested spec.
pub struct SimpleNewFlowRequestPolicy;

impl SimpleNewFlowRequestPolicy {
    fn select_qos_cube<'a>(
        &self,
        spec: &FlowSpec,
        cubes: &'a [QoSCube],
    ) -> Option<&'a QoSCube> {
        cubes.iter().find(|cube| cube.dominates(spec))
    }
}

impl NewFlowRequestPolicy for SimpleNewFlowRequestPolicy {
    fn generate_flow(
        &self,
        event: &FlowRequestEvent,
        cubes: &[QoSCube],
    ) -> ControlResult<Flow> {
        let cube = self
            .select_qos_cube(&event.flow_spec, cubes)
            .ok_or(ControlError::QoSNotAchievable)?;
        debug!(cube = %cube.name, "selected QoS cube");

        Ok(Flow {
            source_name: event.source_name.clone(),
            dest_name: event.dest_name.clone(),
            dif_name: event.dif_name.clone(),
            flow_spec: event.flow_spec.clone(),
            qos_cube_id: cube.id,
            ..Default::default()
        })
    }
}

/// Decides whether a refused allocate request gets another attempt.
pub trait AllocateRetryPolicy: Send + Sync {
    fn should_retry(&self, attempts: u32) -> bool;
}

/// The default: one attempt, no retries.
pub struct NoRetryPolicy;

impl AllocateRetryPolicy for NoRetryPolicy {
    fn should_retry(&self, _attempts: u32) -> bool {
        false
    }
}
