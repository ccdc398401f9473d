// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The IPC Process registry: id -> process and port-id -> flow lookups,
//! shim-instance lifecycle, application registrations and port-id
//! allocation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    errors::{ControlError, ControlResult},
    models::{flow::Flow, naming::ApplicationName},
};

/// How an IPC Process is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifType {
    #[serde(rename = "normal", alias = "Normal", alias = "NORMAL")]
    Normal,
    #[serde(rename = "shim", alias = "Shim", alias = "SHIM")]
    Shim,
}

/// One instantiated shim endpoint.
pub trait ShimInstance: Send + Sync {
    fn ipcp_id(&self) -> u16;
}

/// A wrapper around a non-RINA transport, able to mint per-IPCP instances.
pub trait Shim: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, ipcp_id: u16) -> ControlResult<Arc<dyn ShimInstance>>;

    fn configure(
        &self,
        instance: &Arc<dyn ShimInstance>,
        config: &HashMap<String, String>,
    ) -> ControlResult<()>;

    fn destroy(&self, instance: Arc<dyn ShimInstance>) -> ControlResult<()>;
}

/// The default shim: it carries no transport and exists so normal bring-up
/// paths (create, configure, destroy) run end to end.
pub struct DummyShim;

pub const DUMMY_SHIM_NAME: &str = "shim-dummy";

struct DummyShimInstance {
    ipcp_id: u16,
}

impl ShimInstance for DummyShimInstance {
    fn ipcp_id(&self) -> u16 {
        self.ipcp_id
    }
}

impl Shim for DummyShim {
    fn name(&self) -> &'static str {
        DUMMY_SHIM_NAME
    }

    fn create(&self, ipcp_id: u16) -> ControlResult<Arc<dyn ShimInstance>> {
        debug!(ipcp_id, "shim instance created");
        Ok(Arc::new(DummyShimInstance { ipcp_id }))
    }

    fn configure(
        &self,
        _instance: &Arc<dyn ShimInstance>,
        _config: &HashMap<String, String>,
    ) -> ControlResult<()> {
        Ok(())
    }

    fn destroy(&self, instance: Arc<dyn ShimInstance>) -> ControlResult<()> {
        debug!(ipcp_id = instance.ipcp_id(), "shim instance destroyed");
        Ok(())
    }
}

struct IpcProcessEntry {
    name: ApplicationName,
    dif_type: DifType,
    shim_name: Option<&'static str>,
    shim_instance: Option<Arc<dyn ShimInstance>>,
}

/// Identity information returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcProcessInfo {
    pub id: u16,
    pub name: ApplicationName,
    pub dif_type: DifType,
}

/// An application registration: where to reach the app on the control
/// transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRegistration {
    pub dif_name: ApplicationName,
    pub app_port_id: u32,
}

/// Hands out port-ids that are unique for the lifetime of this process.
///
/// A port stays claimed until [`PortIdAllocator::release`], which the Flow
/// Allocator only calls once the owning FSM has reached its terminal state
/// and the 2-MPL drain has elapsed.
#[derive(Default)]
pub struct PortIdAllocator {
    next: std::sync::atomic::AtomicU32,
    in_use: DashMap<u32, ()>,
}

impl PortIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u32 {
        loop {
            let candidate = 1 + self
                .next
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.try_claim(candidate) {
                return candidate;
            }
        }
    }

    /// Claim a specific port-id; false when it is already taken.
    pub fn try_claim(&self, port_id: u32) -> bool {
        match self.in_use.entry(port_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                true
            },
        }
    }

    pub fn is_claimed(&self, port_id: u32) -> bool {
        self.in_use.contains_key(&port_id)
    }

    pub fn release(&self, port_id: u32) {
        self.in_use.remove(&port_id);
    }
}

/// The process-wide registry. Both indexes share the same shape: insert,
/// lookup, remove, iterate.
#[derive(Default)]
pub struct IpcProcessRegistry {
    shims: DashMap<&'static str, Arc<dyn Shim>>,
    processes: DashMap<u16, IpcProcessEntry>,
    flows: DashMap<u32, Flow>,
    apps: DashMap<ApplicationName, AppRegistration>,
}

impl IpcProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shim(&self, shim: Arc<dyn Shim>) {
        info!(name = shim.name(), "shim registered");
        self.shims.insert(shim.name(), shim);
    }

    /// Create an IPC Process. A duplicate id is refused and leaves the
    /// registry untouched.
    pub fn create(
        &self,
        name: &ApplicationName,
        id: u16,
        dif_type: DifType,
    ) -> ControlResult<()> {
        name.validate()?;
        if self.processes.contains_key(&id) {
            error!(id, "ipc process id already exists");
            return Err(ControlError::Internal(format!(
                "ipc process id {id} already exists"
            )));
        }

        let (shim_name, shim_instance) = match dif_type {
            DifType::Shim => {
                let shim = self
                    .shims
                    .get(DUMMY_SHIM_NAME)
                    .map(|e| Arc::clone(e.value()))
                    .ok_or_else(|| {
                        ControlError::Internal(format!(
                            "cannot find the requested shim {DUMMY_SHIM_NAME}"
                        ))
                    })?;
                (Some(shim.name()), Some(shim.create(id)?))
            },
            DifType::Normal => (None, None),
        };

        // Guard against a concurrent insert of the same id: entry() decides.
        match self.processes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                if let (Some(shim_name), Some(instance)) = (shim_name, shim_instance)
                {
                    if let Some(shim) = self.shims.get(shim_name) {
                        let _ = shim.destroy(instance);
                    }
                }
                error!(id, "ipc process id already exists");
                Err(ControlError::Internal(format!(
                    "ipc process id {id} already exists"
                )))
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(IpcProcessEntry {
                    name: name.clone(),
                    dif_type,
                    shim_name,
                    shim_instance,
                });
                info!(id, name = %name, ?dif_type, "ipc process created");
                Ok(())
            },
        }
    }

    /// Destroy an IPC Process: the shim destroy hook runs first, then the
    /// entry is unlinked.
    pub fn destroy(&self, id: u16) -> ControlResult<()> {
        let (_, entry) = self.processes.remove(&id).ok_or_else(|| {
            ControlError::Internal(format!("ipc process {id} does not exist"))
        })?;

        if let (Some(shim_name), Some(instance)) =
            (entry.shim_name, entry.shim_instance)
        {
            let shim = self.shims.get(shim_name).map(|e| Arc::clone(e.value()));
            match shim {
                Some(shim) => shim.destroy(instance)?,
                None => {
                    return Err(ControlError::Internal(format!(
                        "shim {shim_name} vanished while destroying ipcp {id}"
                    )));
                },
            }
        }
        info!(id, "ipc process destroyed");
        Ok(())
    }

    pub fn configure(
        &self,
        id: u16,
        config: &HashMap<String, String>,
    ) -> ControlResult<()> {
        let entry = self.processes.get(&id).ok_or_else(|| {
            ControlError::Internal(format!("ipc process {id} does not exist"))
        })?;
        if let (Some(shim_name), Some(instance)) =
            (entry.shim_name, entry.shim_instance.as_ref())
        {
            let shim = self
                .shims
                .get(shim_name)
                .map(|e| Arc::clone(e.value()))
                .ok_or_else(|| {
                    ControlError::Internal(format!("shim {shim_name} vanished"))
                })?;
            shim.configure(instance, config)?;
        }
        Ok(())
    }

    /// Teardown path: destroy every registered process, shim hooks first.
    pub fn destroy_all(&self) -> ControlResult<()> {
        let ids: Vec<u16> = self.processes.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.destroy(id)?;
        }
        Ok(())
    }

    pub fn lookup(&self, id: u16) -> Option<IpcProcessInfo> {
        self.processes.get(&id).map(|e| IpcProcessInfo {
            id,
            name: e.name.clone(),
            dif_type: e.dif_type,
        })
    }

    /// Every registered process, ordered by id.
    pub fn processes(&self) -> Vec<IpcProcessInfo> {
        let mut all: Vec<IpcProcessInfo> = self
            .processes
            .iter()
            .map(|e| IpcProcessInfo {
                id: *e.key(),
                name: e.value().name.clone(),
                dif_type: e.value().dif_type,
            })
            .collect();
        all.sort_by_key(|info| info.id);
        all
    }

    /// Bind a flow to its port-id. A port with a live flow cannot be bound
    /// again.
    pub fn flow_add(&self, port_id: u32, flow: Flow) -> ControlResult<()> {
        match self.flows.entry(port_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ControlError::Internal(format!(
                    "port {port_id} already carries a flow"
                )))
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(flow);
                Ok(())
            },
        }
    }

    /// Refresh the stored snapshot of a live flow.
    pub fn flow_update(&self, port_id: u32, flow: Flow) {
        if let Some(mut entry) = self.flows.get_mut(&port_id) {
            *entry = flow;
        }
    }

    pub fn flow_remove(&self, port_id: u32) -> Option<Flow> {
        self.flows.remove(&port_id).map(|(_, flow)| flow)
    }

    pub fn flow_lookup(&self, port_id: u32) -> Option<Flow> {
        self.flows.get(&port_id).map(|e| e.clone())
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn register_app(
        &self,
        app_name: &ApplicationName,
        registration: AppRegistration,
    ) -> ControlResult<()> {
        app_name.validate()?;
        match self.apps.entry(app_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ControlError::Internal(format!(
                    "application {app_name} is already registered"
                )))
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(registration);
                info!(app = %app_name, "application registered");
                Ok(())
            },
        }
    }

    pub fn unregister_app(&self, app_name: &ApplicationName) -> ControlResult<()> {
        self.apps.remove(app_name).map(|_| ()).ok_or_else(|| {
            ControlError::Internal(format!(
                "application {app_name} is not registered"
            ))
        })
    }

    pub fn app_registration(
        &self,
        app_name: &ApplicationName,
    ) -> Option<AppRegistration> {
        self.apps.get(app_name).map(|e| e.clone())
    }
}
