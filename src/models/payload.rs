// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Field-level encoding helpers for control-message payloads.
//!
//! The payload of a control message is a flat sequence of fields in variant
//! order: integers big-endian, strings as a u16 length followed by UTF-8
//! bytes, opaque blobs as a u32 length followed by the raw bytes. Optional
//! flow-spec fields travel behind a presence bitmap so that *unspecified*
//! survives the round-trip distinct from zero.
//!
//! Readers are fully checked: any underrun or invalid UTF-8 surfaces as
//! [`ControlError::MalformedMessage`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    errors::{ControlError, ControlResult},
    models::{naming::ApplicationName, qos::FlowSpec},
};

pub struct PayloadWriter {
    buf: BytesMut,
}

impl Default for PayloadWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
        }
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn put_str(&mut self, s: &str) {
        debug_assert!(s.len() <= u16::MAX as usize);
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.buf.put_u32(b.len() as u32);
        self.buf.put_slice(b);
    }

    pub fn put_name(&mut self, name: &ApplicationName) {
        self.put_str(&name.process_name);
        self.put_str(&name.process_instance);
        self.put_str(&name.entity_name);
        self.put_str(&name.entity_instance);
    }

    /// Presence bitmap (one bit per field, in declaration order) followed by
    /// the specified fields only.
    pub fn put_flowspec(&mut self, spec: &FlowSpec) {
        let mut bitmap = 0u16;
        let bits = [
            spec.average_bandwidth.is_some(),
            spec.peak_bandwidth.is_some(),
            spec.burst_size.is_some(),
            spec.loss_ppm.is_some(),
            spec.max_delay_us.is_some(),
            spec.max_jitter_us.is_some(),
            spec.ordered_delivery.is_some(),
            spec.partial_delivery.is_some(),
        ];
        for (i, present) in bits.iter().enumerate() {
            if *present {
                bitmap |= 1 << i;
            }
        }
        self.put_u16(bitmap);
        if let Some(v) = spec.average_bandwidth {
            self.put_u64(v);
        }
        if let Some(v) = spec.peak_bandwidth {
            self.put_u64(v);
        }
        if let Some(v) = spec.burst_size {
            self.put_u32(v);
        }
        if let Some(v) = spec.loss_ppm {
            self.put_u32(v);
        }
        if let Some(v) = spec.max_delay_us {
            self.put_u32(v);
        }
        if let Some(v) = spec.max_jitter_us {
            self.put_u32(v);
        }
        if let Some(v) = spec.ordered_delivery {
            self.put_bool(v);
        }
        if let Some(v) = spec.partial_delivery {
            self.put_bool(v);
        }
    }
}

pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// A decoder must consume its payload exactly; trailing garbage means
    /// the sender and receiver disagree about the variant layout.
    pub fn finish(self) -> ControlResult<()> {
        if self.buf.has_remaining() {
            return Err(ControlError::MalformedMessage(format!(
                "{} unconsumed payload bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn need(&self, n: usize, what: &str) -> ControlResult<()> {
        if self.buf.remaining() < n {
            return Err(ControlError::MalformedMessage(format!(
                "payload truncated reading {what}: need {n}, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> ControlResult<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> ControlResult<u16> {
        self.need(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u32(&mut self) -> ControlResult<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn get_u64(&mut self) -> ControlResult<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64())
    }

    pub fn get_i32(&mut self) -> ControlResult<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn get_bool(&mut self) -> ControlResult<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ControlError::MalformedMessage(format!(
                "boolean field carries {other}"
            ))),
        }
    }

    pub fn get_str(&mut self) -> ControlResult<String> {
        let len = self.get_u16()? as usize;
        self.need(len, "string body")?;
        let raw = self.buf.copy_to_bytes(len);
        String::from_utf8(raw.to_vec()).map_err(|e| {
            ControlError::MalformedMessage(format!("string field is not UTF-8: {e}"))
        })
    }

    pub fn get_bytes(&mut self) -> ControlResult<Bytes> {
        let len = self.get_u32()? as usize;
        self.need(len, "bytes body")?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn get_name(&mut self) -> ControlResult<ApplicationName> {
        Ok(ApplicationName {
            process_name: self.get_str()?,
            process_instance: self.get_str()?,
            entity_name: self.get_str()?,
            entity_instance: self.get_str()?,
        })
    }

    pub fn get_flowspec(&mut self) -> ControlResult<FlowSpec> {
        let bitmap = self.get_u16()?;
        if bitmap & !0xff != 0 {
            return Err(ControlError::MalformedMessage(format!(
                "flow-spec presence bitmap carries unknown bits: {bitmap:#06x}"
            )));
        }
        let mut spec = FlowSpec::default();
        if bitmap & (1 << 0) != 0 {
            spec.average_bandwidth = Some(self.get_u64()?);
        }
        if bitmap & (1 << 1) != 0 {
            spec.peak_bandwidth = Some(self.get_u64()?);
        }
        if bitmap & (1 << 2) != 0 {
            spec.burst_size = Some(self.get_u32()?);
        }
        if bitmap & (1 << 3) != 0 {
            spec.loss_ppm = Some(self.get_u32()?);
        }
        if bitmap & (1 << 4) != 0 {
            spec.max_delay_us = Some(self.get_u32()?);
        }
        if bitmap & (1 << 5) != 0 {
            spec.max_jitter_us = Some(self.get_u32()?);
        }
        if bitmap & (1 << 6) != 0 {
            spec.ordered_delivery = Some(self.get_bool()?);
        }
        if bitmap & (1 << 7) != 0 {
            spec.partial_delivery = Some(self.get_bool()?);
        }
        Ok(spec)
    }
}
