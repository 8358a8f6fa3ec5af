// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed resource keys and per-task resource requirements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed resource pool key.
///
/// The four built-in kinds cover the common pools; `Custom` carries any
/// user-defined key. Serializes as a plain string either way, so pool
/// configuration and snapshots stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Network,
    Disk,
    Custom(String),
}

impl ResourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Network => "network",
            ResourceKind::Disk => "disk",
            ResourceKind::Custom(key) => key,
        }
    }
}

impl From<&str> for ResourceKind {
    fn from(s: &str) -> Self {
        match s {
            "cpu" => ResourceKind::Cpu,
            "memory" => ResourceKind::Memory,
            "network" => ResourceKind::Network,
            "disk" => ResourceKind::Disk,
            other => ResourceKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ResourceKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ResourceKind::from(s.as_str()))
    }
}

/// A requirement of `units` from the pool named by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub units: u32,
}

impl ResourceSpec {
    pub fn new(kind: impl Into<ResourceKind>, units: u32) -> Self {
        Self {
            kind: kind.into(),
            units,
        }
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
