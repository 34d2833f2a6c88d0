// src/buildsys.rs

//! Build-system kinds and phase definitions
//!
//! Package behavior is data: each package's facts name one of a closed set of
//! build systems, which contributes the ordered phase list the installer
//! drives. The work inside each phase is an opaque callback supplied by the
//! caller; the installer itself is phase-agnostic.

use std::path::Path;
use std::sync::Arc;

use crate::spec::ConcreteSpec;

/// The closed set of supported build-system shapes
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    #[default]
    Autotools,
    CMake,
    Makefile,
    Custom,
}

/// One step of a package build
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Fetch,
    Patch,
    Configure,
    Build,
    Install,
}

impl BuildSystem {
    /// The ordered phases the installer runs for this build system
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            BuildSystem::Autotools | BuildSystem::CMake => &[
                Phase::Fetch,
                Phase::Patch,
                Phase::Configure,
                Phase::Build,
                Phase::Install,
            ],
            BuildSystem::Makefile => {
                &[Phase::Fetch, Phase::Patch, Phase::Build, Phase::Install]
            }
            BuildSystem::Custom => &[Phase::Fetch, Phase::Install],
        }
    }
}

/// Everything a phase callback may see: the node being built, the phase, the
/// final install prefix, and a private per-attempt staging directory
pub struct PhaseContext<'a> {
    pub spec: &'a ConcreteSpec,
    pub phase: Phase,
    pub prefix: &'a Path,
    pub staging: &'a Path,
}

/// Outcome of one phase body; the error string becomes the `PhaseFailed` cause
pub type PhaseOutcome = Result<(), String>;

/// The opaque per-package build callback
pub type PhaseRunner = Arc<dyn Fn(&PhaseContext<'_>) -> PhaseOutcome + Send + Sync>;

/// A runner that succeeds without doing anything, for dry runs and tests
pub fn noop_runner() -> PhaseRunner {
    Arc::new(|_ctx| Ok(()))
}
