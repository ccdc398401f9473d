// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Requested QoS (flow specifications) and pre-provisioned QoS cubes.

use serde::{Deserialize, Serialize};

/// The QoS requested for a flow. Every field is optional: *unspecified*
/// (`None`) is distinct from an explicit zero, and only specified fields
/// take part in cube selection.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSpec {
    /// Average bandwidth in bytes/s.
    #[serde(default, rename = "AverageBandwidth")]
    pub average_bandwidth: Option<u64>,
    /// Peak bandwidth allowed in bytes/s.
    #[serde(default, rename = "PeakBandwidth")]
    pub peak_bandwidth: Option<u64>,
    /// Burst size in bytes.
    #[serde(default, rename = "BurstSize")]
    pub burst_size: Option<u32>,
    /// Bounded loss, parts per million.
    #[serde(default, rename = "LossPpm")]
    pub loss_ppm: Option<u32>,
    /// Maximum one-way delay in microseconds.
    #[serde(default, rename = "MaxDelayUs")]
    pub max_delay_us: Option<u32>,
    /// Maximum jitter in microseconds.
    #[serde(default, rename = "MaxJitterUs")]
    pub max_jitter_us: Option<u32>,
    /// Whether SDUs must be delivered in order.
    #[serde(default, rename = "OrderedDelivery")]
    pub ordered_delivery: Option<bool>,
    /// Whether partial SDU delivery is acceptable.
    #[serde(default, rename = "PartialDelivery")]
    pub partial_delivery: Option<bool>,
}

impl FlowSpec {
    /// True when no field is specified at all.
    pub fn is_unspecified(&self) -> bool {
        *self == FlowSpec::default()
    }
}

/// A pre-provisioned QoS profile: the bounds a DIF has committed to honor.
/// Immutable after configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QoSCube {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "Name")]
    pub name: String,
    /// The bounds this cube can honor, expressed as a flow spec. An
    /// unspecified bound means "no commitment" and cannot satisfy a request
    /// that specifies the corresponding field.
    #[serde(default, rename = "Bounds")]
    pub bounds: FlowSpec,
}

impl QoSCube {
    /// True when this cube's bounds satisfy every *specified* field of the
    /// requested spec. Unspecified request fields are ignored.
    ///
    /// Bandwidth and burst bounds must be at least the requested value; loss,
    /// delay and jitter bounds must not exceed it. A requested
    /// `ordered_delivery = true` needs a cube that guarantees ordering, and a
    /// requested `partial_delivery = false` needs a cube that never delivers
    /// partial SDUs.
    pub fn dominates(&self, requested: &FlowSpec) -> bool {
        fn at_least<T: PartialOrd + Copy>(bound: Option<T>, wanted: Option<T>) -> bool {
            match wanted {
                None => true,
                Some(w) => bound.is_some_and(|b| b >= w),
            }
        }
        fn at_most<T: PartialOrd + Copy>(bound: Option<T>, wanted: Option<T>) -> bool {
            match wanted {
                None => true,
                Some(w) => bound.is_some_and(|b| b <= w),
            }
        }

        let b = &self.bounds;
        if !at_least(b.average_bandwidth, requested.average_bandwidth)
            || !at_least(b.peak_bandwidth, requested.peak_bandwidth)
            || !at_least(b.burst_size, requested.burst_size)
            || !at_most(b.loss_ppm, requested.loss_ppm)
            || !at_most(b.max_delay_us, requested.max_delay_us)
            || !at_most(b.max_jitter_us, requested.max_jitter_us)
        {
            return false;
        }

        if requested.ordered_delivery == Some(true) && b.ordered_delivery != Some(true)
        {
            return false;
        }
        if requested.partial_delivery == Some(false)
            && b.partial_delivery == Some(true)
        {
            return false;
        }

        true
    }
}
