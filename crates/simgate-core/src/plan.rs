//! Run plan and identity.

use crate::config::RunInputs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Subsystem key used when `TEST_SUBSYSTEM` was not provided.
pub const UNSET_SUBSYSTEM: &str = "<unset>";

/// What a run will process, in order.
///
/// The digest identifies the plan so two reports can be compared for
/// "same inputs" without diffing every field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPlan {
    /// Subsystems in caller order.
    pub subsystems: Vec<String>,

    pub base_root: Option<PathBuf>,

    pub config_file: Option<PathBuf>,

    /// SHA-256 of the ordered subsystem names and paths (deterministic).
    pub plan_digest: String,
}

impl RunPlan {
    pub fn new(inputs: &RunInputs) -> Self {
        let plan_digest = compute_plan_digest(inputs);
        Self {
            subsystems: inputs.subsystems.clone(),
            base_root: inputs.base_root.clone(),
            config_file: inputs.config_file.clone(),
            plan_digest,
        }
    }

    /// First 12 hex characters of the digest.
    pub fn short_digest(&self) -> &str {
        &self.plan_digest[..12.min(self.plan_digest.len())]
    }
}

fn compute_plan_digest(inputs: &RunInputs) -> String {
    let mut hasher = Sha256::new();
    for subsystem in &inputs.subsystems {
        hasher.update(subsystem.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"\x01");
    if let Some(base) = &inputs.base_root {
        hasher.update(base.to_string_lossy().as_bytes());
    }
    hasher.update(b"\0");
    if let Some(config) = &inputs.config_file {
        hasher.update(config.to_string_lossy().as_bytes());
    }
    hex::encode(hasher.finalize())
}
