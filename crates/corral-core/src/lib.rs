//! corral-core - Policy control plane for sandboxed agent workloads
//!
//! This crate governs what a sandboxed workload may do at runtime. Policy
//! lives as human-editable statement text; the control plane compiles it
//! into enforcement-ready rules, keeps a persisted file layer and an
//! ephemeral runtime overlay, and serves the operator surface: snapshot
//! reads, statement patches, permit-all switching, decision-to-statement
//! synthesis, and editor completion.
//!
//! # Modules
//!
//! - [`rules`]: compiled rule model ([`rules::Rule`], [`rules::RuleSet`])
//! - [`compiler`]: validator seam, built-in statement compiler, file watcher
//! - [`statement`]: statement synthesis and humanized line rendering
//! - [`conflict`]: contradiction detection across statements
//! - [`store`]: the two-layer store and enforcement modes
//! - [`plane`]: control-plane operations and the snapshot publisher seam
//! - [`hints`]: tiered completion hint aggregation
//! - [`complete`]: cursor-context completion engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use corral_core::compiler::StatementCompiler;
//! use corral_core::plane::{ControlPlane, PlaneConfig};
//!
//! # fn main() -> Result<(), corral_core::plane::PlaneError> {
//! let plane = ControlPlane::open(
//!     PlaneConfig::new("/var/lib/corral/policy.txt"),
//!     Arc::new(StatementCompiler::new()),
//! )?;
//! let snapshot = plane.snapshot()?;
//! println!("{} active rules", snapshot.active_rules.len());
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod complete;
pub mod conflict;
pub mod hints;
pub mod plane;
pub mod rules;
pub mod statement;
pub mod store;

pub use compiler::{PolicyCompiler, StatementCompiler, SyntaxError};
pub use conflict::ConflictError;
pub use plane::{ControlPlane, PlaneConfig, PlaneError, PolicySnapshot};
pub use rules::{Effect, Operation, Rule, RuleSet};
pub use store::EnforcementMode;
