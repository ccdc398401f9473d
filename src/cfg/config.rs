// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! YAML configuration of one control-plane process.

use std::{collections::HashSet, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    errors::ControlResult,
    models::{naming::ApplicationName, qos::QoSCube},
    registry::DifType,
    security::policy::{
        AUTH_NONE, AUTH_PASSWORD, AUTH_SSH2, AuthSduProtectionProfile,
    },
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Identity of this process.
    pub process: ProcessConfig,
    /// The DIF this process serves, including its provisioned QoS cubes.
    pub dif: DifConfig,
    /// Control-transport endpoints and the message family to bind.
    pub transport: TransportConfig,
    /// Authentication policy sets and the per-flow protection profile.
    pub security: SecurityConfig,
    /// Protocol timers.
    pub timers: TimersConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProcessConfig {
    #[serde(rename = "ProcessName")]
    pub process_name: String,
    #[serde(default, rename = "ProcessInstance")]
    pub process_instance: String,
    /// 0 means "not an IPC Process" (an application or the IPC Manager).
    #[serde(default, rename = "IpcProcessId")]
    pub ipcp_id: u16,
}

impl ProcessConfig {
    pub fn application_name(&self) -> ControlResult<ApplicationName> {
        ApplicationName::new(
            self.process_name.clone(),
            self.process_instance.clone(),
            "",
            "",
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DifConfig {
    #[serde(rename = "DifName")]
    pub dif_name: String,
    #[serde(rename = "DifType")]
    pub dif_type: DifType,
    #[serde(rename = "MaxSduSize", default = "default_max_sdu_size")]
    pub max_sdu_size: u32,
    #[serde(default, rename = "QosCubes")]
    pub qos_cubes: Vec<QoSCube>,
}

fn default_max_sdu_size() -> u32 {
    10_000
}

impl DifConfig {
    pub fn dif_application_name(&self) -> ApplicationName {
        ApplicationName::dif(self.dif_name.clone())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransportConfig {
    /// The named message family resolved to a numeric id at startup.
    #[serde(rename = "FamilyName")]
    pub family_name: String,
    #[serde(rename = "LocalAddress")]
    pub local_addr: String,
    #[serde(rename = "PeerAddress")]
    pub peer_addr: String,
    /// This process's port on the control transport.
    #[serde(rename = "LocalPortId")]
    pub local_port_id: u32,
    #[serde(rename = "IoTimeoutMs", with = "serde_millis")]
    pub io_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SecurityConfig {
    /// Policy-set type names registered at startup.
    #[serde(default, rename = "PolicySets")]
    pub policy_sets: Vec<String>,
    /// The protection profile applied to flows of this DIF.
    #[serde(default, rename = "AuthProfile")]
    pub auth_profile: AuthSduProtectionProfile,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimersConfig {
    /// Maximum packet lifetime; a torn-down port is quarantined for twice
    /// this before reuse.
    #[serde(rename = "MplMs", with = "serde_millis")]
    pub mpl: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path).with_context(|| {
            format!("failed to read config file {:?}", path.as_ref())
        })?;
        let cfg: Config =
            serde_yaml::from_str(&raw).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.process.process_name.is_empty(),
            "ProcessName must not be empty"
        );
        ensure!(!self.dif.dif_name.is_empty(), "DifName must not be empty");
        ensure!(
            self.transport.local_port_id != 0,
            "LocalPortId must not be zero"
        );
        ensure!(
            !self.timers.mpl.is_zero(),
            "MplMs must be a positive duration"
        );

        let mut cube_ids = HashSet::new();
        for cube in &self.dif.qos_cubes {
            ensure!(
                cube_ids.insert(cube.id),
                "duplicate QoS cube id {}",
                cube.id
            );
            ensure!(!cube.name.is_empty(), "QoS cube {} has no name", cube.id);
        }

        for policy in &self.security.policy_sets {
            ensure!(
                [AUTH_NONE, AUTH_PASSWORD, AUTH_SSH2].contains(&policy.as_str()),
                "unknown policy set '{policy}'"
            );
        }
        Ok(())
    }
}

/// Durations expressed as integer milliseconds in YAML.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
