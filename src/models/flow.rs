// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The flow object: the value exchanged between peer Flow Allocators in
//! CDAP `M_CREATE` / `M_CREATE_R` messages and published into the RIB.

use bytes::Bytes;

use crate::{
    errors::ControlResult,
    models::{
        naming::ApplicationName,
        payload::{PayloadReader, PayloadWriter},
        qos::FlowSpec,
    },
};

/// Which side of the flow this process is.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FlowRole {
    #[default]
    Requestor,
    Responder,
}

/// A flow between two applications, as tracked by the Flow Allocator and
/// shipped to the peer inside `M_CREATE(flow)`.
///
/// Identity is the 5-tuple `(source_name, dest_name, port_id_local,
/// port_id_remote, dif_name)`. The connection-endpoint ids are 0 until the
/// datapath has created the local connection.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Flow {
    pub source_name: ApplicationName,
    pub dest_name: ApplicationName,
    pub dif_name: ApplicationName,
    /// Port-id on the side that initiated the allocation.
    pub source_port_id: u32,
    /// Port-id on the responding side; 0 until the responder assigns it.
    pub dest_port_id: u32,
    /// Connection endpoint on the source side; 0 until created.
    pub source_cep_id: u32,
    /// Connection endpoint on the destination side; 0 until created.
    pub dest_cep_id: u32,
    pub flow_spec: FlowSpec,
    /// Id of the QoS cube selected for the flow.
    pub qos_cube_id: u32,
}

impl Flow {
    /// The local/remote port-id pair as seen from `role`.
    pub fn port_ids(&self, role: FlowRole) -> (u32, u32) {
        match role {
            FlowRole::Requestor => (self.source_port_id, self.dest_port_id),
            FlowRole::Responder => (self.dest_port_id, self.source_port_id),
        }
    }

    /// Encoding used as the object value of `M_CREATE(flow)`.
    pub fn to_bytes(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.put_name(&self.source_name);
        w.put_name(&self.dest_name);
        w.put_name(&self.dif_name);
        w.put_u32(self.source_port_id);
        w.put_u32(self.dest_port_id);
        w.put_u32(self.source_cep_id);
        w.put_u32(self.dest_cep_id);
        w.put_flowspec(&self.flow_spec);
        w.put_u32(self.qos_cube_id);
        w.freeze()
    }

    pub fn from_bytes(buf: Bytes) -> ControlResult<Self> {
        let mut r = PayloadReader::new(buf);
        let flow = Self {
            source_name: r.get_name()?,
            dest_name: r.get_name()?,
            dif_name: r.get_name()?,
            source_port_id: r.get_u32()?,
            dest_port_id: r.get_u32()?,
            source_cep_id: r.get_u32()?,
            dest_cep_id: r.get_u32()?,
            flow_spec: r.get_flowspec()?,
            qos_cube_id: r.get_u32()?,
        };
        r.finish()?;
        Ok(flow)
    }

    /// One-line rendering shown by RIB queries.
    pub fn displayable_value(&self) -> String {
        format!(
            "src={} dst={} src-port={} dst-port={} cube={}",
            self.source_name,
            self.dest_name,
            self.source_port_id,
            self.dest_port_id,
            self.qos_cube_id
        )
    }
}
