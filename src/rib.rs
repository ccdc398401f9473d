// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The local Resource Information Base: a key-addressable store of
//! manageable objects, keyed by their naming-tree path.
//!
//! The core writes flow and QoS-cube objects here and answers
//! `IpcmQueryRib` requests from it. Storage semantics only; the CDAP side
//! lives in [`crate::models::cdap`].

use dashmap::DashMap;

use crate::models::ipcm::RibObjectData;

#[derive(Default)]
pub struct RibStore {
    objects: DashMap<String, RibObjectData>,
    next_instance: std::sync::atomic::AtomicU64,
}

impl RibStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the object at `object_name`. The instance id is
    /// preserved across replacements of the same path.
    pub fn write(
        &self,
        object_class: &str,
        object_name: &str,
        display_value: String,
    ) {
        let mut entry =
            self.objects
                .entry(object_name.to_string())
                .or_insert_with(|| RibObjectData {
                    object_class: object_class.to_string(),
                    object_name: object_name.to_string(),
                    object_instance: 1 + self
                        .next_instance
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
                    display_value: String::new(),
                });
        entry.display_value = display_value;
    }

    pub fn remove(&self, object_name: &str) -> Option<RibObjectData> {
        self.objects.remove(object_name).map(|(_, v)| v)
    }

    pub fn read(&self, object_name: &str) -> Option<RibObjectData> {
        self.objects.get(object_name).map(|e| e.clone())
    }

    /// All objects whose path starts with `prefix`, sorted by path. An empty
    /// prefix returns the whole tree.
    pub fn query(&self, prefix: &str) -> Vec<RibObjectData> {
        let mut found: Vec<RibObjectData> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.object_name.cmp(&b.object_name));
        found
    }
}
