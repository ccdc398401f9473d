// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry semantics: duplicate ids, shim lifecycle hooks, application
//! registrations and port-id claims.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use rina_control_rs::{
    models::naming::ApplicationName,
    registry::{
        AppRegistration, DifType, DummyShim, IpcProcessRegistry, PortIdAllocator,
        Shim, ShimInstance,
    },
};

fn name(s: &str) -> ApplicationName {
    ApplicationName::new(s, "1", "", "").expect("name")
}

/// Shim that counts its create/destroy hooks.
struct CountingShim {
    created: AtomicU32,
    destroyed: AtomicU32,
}

struct CountingInstance {
    ipcp_id: u16,
}

impl ShimInstance for CountingInstance {
    fn ipcp_id(&self) -> u16 {
        self.ipcp_id
    }
}

impl Shim for CountingShim {
    fn name(&self) -> &'static str {
        "shim-dummy"
    }

    fn create(
        &self,
        ipcp_id: u16,
    ) -> rina_control_rs::errors::ControlResult<Arc<dyn ShimInstance>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingInstance { ipcp_id }))
    }

    fn configure(
        &self,
        _instance: &Arc<dyn ShimInstance>,
        _config: &std::collections::HashMap<String, String>,
    ) -> rina_control_rs::errors::ControlResult<()> {
        Ok(())
    }

    fn destroy(
        &self,
        _instance: Arc<dyn ShimInstance>,
    ) -> rina_control_rs::errors::ControlResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn duplicate_ipcp_id_keeps_only_the_first() {
    let registry = IpcProcessRegistry::new();
    registry.register_shim(Arc::new(DummyShim));

    registry
        .create(&name("/ipcps/x"), 1, DifType::Shim)
        .expect("first");
    assert!(registry.create(&name("/ipcps/y"), 1, DifType::Shim).is_err());

    let all = registry.processes();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, 1);
    assert_eq!(all[0].name, name("/ipcps/x"));
}

#[test]
fn shim_hooks_run_on_create_and_destroy() {
    let registry = IpcProcessRegistry::new();
    let shim = Arc::new(CountingShim {
        created: AtomicU32::new(0),
        destroyed: AtomicU32::new(0),
    });
    registry.register_shim(Arc::clone(&shim) as Arc<dyn Shim>);

    registry
        .create(&name("/ipcps/x"), 2, DifType::Shim)
        .expect("create");
    assert_eq!(shim.created.load(Ordering::SeqCst), 1);

    registry.configure(2, &Default::default()).expect("configure");

    registry.destroy(2).expect("destroy");
    assert_eq!(shim.destroyed.load(Ordering::SeqCst), 1);
    assert!(registry.lookup(2).is_none());
}

#[test]
fn normal_processes_need_no_shim() {
    let registry = IpcProcessRegistry::new();
    registry
        .create(&name("/ipcps/n"), 5, DifType::Normal)
        .expect("create");
    let info = registry.lookup(5).expect("present");
    assert_eq!(info.dif_type, DifType::Normal);
    registry.destroy(5).expect("destroy");
}

#[test]
fn iteration_is_ordered_by_id() {
    let registry = IpcProcessRegistry::new();
    for id in [9u16, 3, 6] {
        registry
            .create(&name(&format!("/ipcps/{id}")), id, DifType::Normal)
            .expect("create");
    }
    let ids: Vec<u16> = registry.processes().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3, 6, 9]);
}

#[test]
fn app_registration_is_exclusive() {
    let registry = IpcProcessRegistry::new();
    let app = name("/apps/a");
    let reg = AppRegistration {
        dif_name: ApplicationName::dif("normal.DIF"),
        app_port_id: 55,
    };
    registry.register_app(&app, reg.clone()).expect("register");
    assert!(registry.register_app(&app, reg).is_err());
    assert_eq!(
        registry.app_registration(&app).expect("present").app_port_id,
        55
    );
    registry.unregister_app(&app).expect("unregister");
    assert!(registry.unregister_app(&app).is_err());
}

#[test]
fn a_claimed_port_cannot_be_claimed_again() {
    let ports = PortIdAllocator::new();
    let port = ports.allocate();
    // A second allocation path racing for the same port loses.
    assert!(!ports.try_claim(port));
    // Fresh allocations never collide with claimed ports.
    let other = ports.allocate();
    assert_ne!(port, other);
    ports.release(port);
    assert!(ports.try_claim(port));
}
