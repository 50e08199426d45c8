//! Two-layer policy store.
//!
//! The file layer holds the compiled form of the persisted policy source
//! and survives restarts. The runtime layer is an ephemeral overlay that
//! exists only while the store is in [`EnforcementMode::PermitAll`].
//! Statement edits always land in the file layer; mode changes never
//! touch it.

use std::sync::RwLock;

use serde::Serialize;
use thiserror::Error;

use crate::rules::RuleSet;

/// How the active rule set is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforcementMode {
    /// The file layer is enforced.
    Enforce,
    /// A runtime overlay granting everything is enforced; the file layer
    /// keeps accumulating edits underneath.
    PermitAll,
}

/// Store access failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A lock was poisoned by a panicking writer.
    #[error("policy store lock poisoned")]
    LockPoisoned,

    /// A file-layer replacement carried no rules at all. Installing it
    /// would silently disable enforcement.
    #[error("refusing to install an empty rule set")]
    EmptyRuleSet,
}

#[derive(Debug, Clone)]
struct Layers {
    file: RuleSet,
    file_source: String,
    runtime: Option<RuleSet>,
    mode: EnforcementMode,
}

/// Point-in-time view of both layers.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Compiled file layer.
    pub file: RuleSet,
    /// Persisted policy source the file layer was compiled from.
    pub file_source: String,
    /// Runtime overlay, present only in permit-all mode.
    pub runtime: Option<RuleSet>,
    /// Current enforcement mode.
    pub mode: EnforcementMode,
}

impl StoreSnapshot {
    /// The rule set enforcement should consult right now.
    #[must_use]
    pub fn active(&self) -> &RuleSet {
        match (&self.mode, &self.runtime) {
            (EnforcementMode::PermitAll, Some(runtime)) => runtime,
            _ => &self.file,
        }
    }
}

/// Thread-safe holder of the file and runtime layers.
#[derive(Debug)]
pub struct PolicyStore {
    layers: RwLock<Layers>,
}

impl PolicyStore {
    /// Create a store enforcing `file` compiled from `file_source`.
    #[must_use]
    pub fn new(file: RuleSet, file_source: impl Into<String>) -> Self {
        Self {
            layers: RwLock::new(Layers {
                file,
                file_source: file_source.into(),
                runtime: None,
                mode: EnforcementMode::Enforce,
            }),
        }
    }

    /// Defensive copy of both layers and the mode.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let layers = self.layers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(StoreSnapshot {
            file: layers.file.clone(),
            file_source: layers.file_source.clone(),
            runtime: layers.runtime.clone(),
            mode: layers.mode,
        })
    }

    /// Current enforcement mode.
    pub fn mode(&self) -> Result<EnforcementMode, StoreError> {
        let layers = self.layers.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(layers.mode)
    }

    /// Replace the file layer wholesale. The runtime layer and mode are
    /// untouched, so an edit made during permit-all accumulates without
    /// weakening the overlay. An empty rule set is rejected no matter who
    /// supplies it; this guard also covers external reload paths that
    /// bypass the control plane's own checks.
    pub fn set_file_layer(&self, rules: RuleSet, source: impl Into<String>) -> Result<(), StoreError> {
        if rules.is_empty() {
            return Err(StoreError::EmptyRuleSet);
        }
        let mut layers = self.layers.write().map_err(|_| StoreError::LockPoisoned)?;
        layers.file = rules;
        layers.file_source = source.into();
        Ok(())
    }

    /// Enter permit-all: install the runtime overlay. The file layer and
    /// its source text are untouched, so the operator's draft survives.
    pub fn enter_permit_all(&self, overlay: RuleSet) -> Result<(), StoreError> {
        let mut layers = self.layers.write().map_err(|_| StoreError::LockPoisoned)?;
        layers.runtime = Some(overlay);
        layers.mode = EnforcementMode::PermitAll;
        Ok(())
    }

    /// Resume enforcement: drop the overlay and serve the file layer.
    pub fn resume_enforcement(&self) -> Result<(), StoreError> {
        let mut layers = self.layers.write().map_err(|_| StoreError::LockPoisoned)?;
        layers.runtime = None;
        layers.mode = EnforcementMode::Enforce;
        Ok(())
    }
}
