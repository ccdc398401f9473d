// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Message-family name resolution.
//!
//! Family ids are allocated dynamically, the way the generic-transport
//! controller hands them out: the first binder of a name gets the next free
//! id, later binders of the same name observe the same id. Ids below
//! [`FamilyRegistry::FIRST_DYNAMIC_ID`] are reserved for the controller
//! itself.

use dashmap::DashMap;

/// Process-wide registry of resolved family names. Part of the top-level
/// context value, never ambient.
pub struct FamilyRegistry {
    families: DashMap<String, u16>,
    next_id: std::sync::atomic::AtomicU16,
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FamilyRegistry {
    pub const FIRST_DYNAMIC_ID: u16 = 16;

    pub fn new() -> Self {
        Self {
            families: DashMap::new(),
            next_id: std::sync::atomic::AtomicU16::new(Self::FIRST_DYNAMIC_ID),
        }
    }

    /// Resolve `name` to its numeric id, allocating one on first use.
    pub fn resolve(&self, name: &str) -> u16 {
        *self.families.entry(name.to_string()).or_insert_with(|| {
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        })
    }

    /// Look the id up without allocating.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.families.get(name).map(|e| *e)
    }
}
