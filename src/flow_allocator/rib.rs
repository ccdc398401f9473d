// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Flow Allocator's slice of the RIB naming tree.

use bytes::Bytes;

use crate::{
    errors::ControlResult,
    models::payload::{PayloadReader, PayloadWriter},
    models::qos::QoSCube,
    rib::RibStore,
};

pub const FLOW_RIB_OBJECT_CLASS: &str = "flow";
pub const FLOW_SET_RIB_OBJECT_CLASS: &str = "flow set";
pub const FLOW_SET_RIB_OBJECT_NAME: &str =
    "/dif/resource-allocation/flow-allocator/instances";

pub const QOS_CUBE_RIB_OBJECT_CLASS: &str = "qoscube";
pub const QOS_CUBE_SET_RIB_OBJECT_CLASS: &str = "qoscube set";
pub const QOS_CUBE_SET_RIB_OBJECT_NAME: &str =
    "/dif/management/flow-allocator/qos-cubes";

pub const DATA_TRANSFER_CONSTANTS_RIB_OBJECT_CLASS: &str = "datatransfercons";
pub const DATA_TRANSFER_CONSTANTS_RIB_OBJECT_NAME: &str =
    "/dif/data-transfer/data-transfer-constants";

pub fn flow_object_name(port_id: u32) -> String {
    format!("{FLOW_SET_RIB_OBJECT_NAME}/{port_id}")
}

/// The port-id a flow object name refers to, when it lies in the flow set.
pub fn port_id_from_object_name(object_name: &str) -> Option<u32> {
    object_name
        .strip_prefix(FLOW_SET_RIB_OBJECT_NAME)?
        .strip_prefix('/')?
        .parse()
        .ok()
}

pub fn qos_cube_object_name(cube_id: u32) -> String {
    format!("{QOS_CUBE_SET_RIB_OBJECT_NAME}/{cube_id}")
}

/// Seed the naming tree: the parent sets, one object per provisioned cube,
/// and the data-transfer constants placeholder.
pub fn populate_rib(rib: &RibStore, cubes: &[QoSCube]) {
    rib.write(FLOW_SET_RIB_OBJECT_CLASS, FLOW_SET_RIB_OBJECT_NAME, String::new());
    rib.write(
        QOS_CUBE_SET_RIB_OBJECT_CLASS,
        QOS_CUBE_SET_RIB_OBJECT_NAME,
        String::new(),
    );
    for cube in cubes {
        rib.write(
            QOS_CUBE_RIB_OBJECT_CLASS,
            &qos_cube_object_name(cube.id),
            format!("id={} name={}", cube.id, cube.name),
        );
    }
    rib.write(
        DATA_TRANSFER_CONSTANTS_RIB_OBJECT_CLASS,
        DATA_TRANSFER_CONSTANTS_RIB_OBJECT_NAME,
        DataTransferConstants::default().displayable_value(),
    );
}

/// The DIF-wide data-transfer constants, updated by a remote
/// `M_WRITE(dataTransferConstants)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTransferConstants {
    pub max_pdu_size: u32,
    pub address_length: u32,
    pub port_id_length: u32,
    pub cep_id_length: u32,
    pub qos_id_length: u32,
    pub sequence_number_length: u32,
    pub max_pdu_lifetime_ms: u32,
}

impl Default for DataTransferConstants {
    fn default() -> Self {
        Self {
            max_pdu_size: 10_000,
            address_length: 2,
            port_id_length: 2,
            cep_id_length: 2,
            qos_id_length: 1,
            sequence_number_length: 4,
            max_pdu_lifetime_ms: 2_000,
        }
    }
}

impl DataTransferConstants {
    pub fn to_bytes(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.put_u32(self.max_pdu_size);
        w.put_u32(self.address_length);
        w.put_u32(self.port_id_length);
        w.put_u32(self.cep_id_length);
        w.put_u32(self.qos_id_length);
        w.put_u32(self.sequence_number_length);
        w.put_u32(self.max_pdu_lifetime_ms);
        w.freeze()
    }

    pub fn from_bytes(buf: Bytes) -> ControlResult<Self> {
        let mut r = PayloadReader::new(buf);
        let constants = Self {
            max_pdu_size: r.get_u32()?,
            address_length: r.get_u32()?,
            port_id_length: r.get_u32()?,
            cep_id_length: r.get_u32()?,
            qos_id_length: r.get_u32()?,
            sequence_number_length: r.get_u32()?,
            max_pdu_lifetime_ms: r.get_u32()?,
        };
        r.finish()?;
        Ok(constants)
    }

    pub fn displayable_value(&self) -> String {
        format!(
            "maxPDUSize={} addressLength={} portIdLength={} cepIdLength={} \
             qosIdLength={} seqNumberLength={} maxPDULifetime={}ms",
            self.max_pdu_size,
            self.address_length,
            self.port_id_length,
            self.cep_id_length,
            self.qos_id_length,
            self.sequence_number_length,
            self.max_pdu_lifetime_ms
        )
    }
}
