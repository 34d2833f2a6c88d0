// src/hooks.rs

//! Installer lifecycle hooks
//!
//! Hooks observe the install pipeline: callers register callbacks per event
//! and the installer fires them around node builds and individual phases. A
//! hook error aborts the node's build the same way a phase failure does.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::buildsys::Phase;
use crate::spec::ConcreteSpec;

/// Points in the install pipeline where hooks fire
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum HookEvent {
    /// Before any phase of a node runs
    PreInstall,
    /// After all phases of a node succeeded, before the node is recorded
    PostInstall,
    /// Before each individual phase
    PrePhase,
    /// After each individual phase succeeded
    PostPhase,
    /// After a node's build failed, before cascading begins
    OnFailure,
}

/// What a hook callback gets to see
pub struct HookContext<'a> {
    pub spec: &'a ConcreteSpec,
    /// Set for `PrePhase` and `PostPhase`, `None` for node-level events
    pub phase: Option<Phase>,
    pub prefix: &'a Path,
}

/// Outcome of a hook body; the error string becomes the failure cause
pub type HookOutcome = Result<(), String>;

pub type HookFn = Arc<dyn Fn(&HookContext<'_>) -> HookOutcome + Send + Sync>;

/// Registered hooks, fired in registration order per event
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<HookEvent, Vec<HookFn>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, event: HookEvent, hook: F)
    where
        F: Fn(&HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.hooks.entry(event).or_default().push(Arc::new(hook));
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    /// Fire all hooks for an event; stops at the first error
    pub fn fire(&self, event: HookEvent, ctx: &HookContext<'_>) -> HookOutcome {
        if let Some(hooks) = self.hooks.get(&event) {
            for hook in hooks {
                if let Err(cause) = hook(ctx) {
                    tracing::warn!(
                        event = %event,
                        spec = %ctx.spec.label(),
                        cause = %cause,
                        "hook failed"
                    );
                    return Err(format!("{event} hook failed: {cause}"));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<String> = self
            .hooks
            .iter()
            .map(|(event, hooks)| format!("{event}: {}", hooks.len()))
            .collect();
        write!(f, "HookRegistry {{ {} }}", counts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_spec() -> ConcreteSpec {
        ConcreteSpec::build(
            "zlib",
            Version::parse("1.2.13").unwrap(),
            Map::new(),
            None,
            "x86_64",
            Vec::new(),
            Map::new(),
        )
    }

    #[test]
    fn test_hooks_fire_in_order() {
        let mut registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        registry.register(HookEvent::PreInstall, move |_| {
            assert_eq!(c1.fetch_add(1, Ordering::SeqCst), 0);
            Ok(())
        });
        let c2 = Arc::clone(&counter);
        registry.register(HookEvent::PreInstall, move |_| {
            assert_eq!(c2.fetch_add(1, Ordering::SeqCst), 1);
            Ok(())
        });

        let spec = sample_spec();
        let ctx = HookContext {
            spec: &spec,
            phase: None,
            prefix: Path::new("/opt/strata"),
        };
        registry.fire(HookEvent::PreInstall, &ctx).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hook_error_stops_chain() {
        let mut registry = HookRegistry::new();
        registry.register(HookEvent::PrePhase, |_| Err("disk full".to_string()));
        let fired_after = Arc::new(AtomicUsize::new(0));
        let fa = Arc::clone(&fired_after);
        registry.register(HookEvent::PrePhase, move |_| {
            fa.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let spec = sample_spec();
        let ctx = HookContext {
            spec: &spec,
            phase: Some(Phase::Configure),
            prefix: Path::new("/opt/strata"),
        };
        let err = registry.fire(HookEvent::PrePhase, &ctx).unwrap_err();
        assert!(err.contains("disk full"));
        assert_eq!(fired_after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregistered_event_is_ok() {
        let registry = HookRegistry::new();
        let spec = sample_spec();
        let ctx = HookContext {
            spec: &spec,
            phase: None,
            prefix: Path::new("/opt/strata"),
        };
        assert!(registry.fire(HookEvent::PostInstall, &ctx).is_ok());
    }
}
