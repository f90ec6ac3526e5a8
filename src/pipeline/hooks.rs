use crate::error::ConfigError;
use crate::error::HookError;
use crate::error::PipelineError;
use crate::manifest::ManifestContext;
use crate::model::ColumnMappingPatch;
use crate::pipeline::Stage;
use crate::registry::Hook;
use crate::registry::HookContext;
use crate::registry::HookKind;
use crate::registry::HookOutcome;
use crate::registry::Registered;
use crate::registry::Registry;
use crate::telemetry::Event;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

/// What the run does after a hook of a given kind failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run
    AbortRun,
    /// Skip the rest of the current sheet
    SkipSheet,
    /// Skip the current table
    SkipTable,
    /// Record the failure and carry on
    Isolate,
}

/// Stage a hook kind is invoked from.
pub const fn stage_of(kind: HookKind) -> Stage {
    match kind {
        HookKind::WorkbookStart => Stage::Load,
        HookKind::SheetStart => Stage::Classify,
        HookKind::TableDetected => Stage::Segment,
        HookKind::TableMapped => Stage::Map,
        HookKind::TableWritten => Stage::Write,
        HookKind::BeforeSave => Stage::Save,
    }
}

/// Default failure policy of a hook kind.
pub const fn default_policy(kind: HookKind) -> FailurePolicy {
    match kind {
        HookKind::WorkbookStart | HookKind::BeforeSave => FailurePolicy::AbortRun,
        HookKind::SheetStart => FailurePolicy::SkipSheet,
        HookKind::TableMapped => FailurePolicy::SkipTable,
        HookKind::TableDetected | HookKind::TableWritten => FailurePolicy::Isolate,
    }
}

/// Result of invoking every hook of one kind.
#[derive(Debug, Default)]
pub struct HookReport {
    /// Patches returned by `on_table_mapped` hooks, with the hook name, in call order
    pub patches: Vec<(String, ColumnMappingPatch)>,
    pub failures: Vec<HookError>,
}

impl HookReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Calls the hooks of a lifecycle point in registry order.
pub struct HookInvoker<'a> {
    registry: &'a Registry,
    manifest: &'a ManifestContext,
}

impl<'a> HookInvoker<'a> {
    /// Checks that every hook the manifest names is registered for its kind.
    pub fn new(registry: &'a Registry, manifest: &'a ManifestContext) -> Result<Self, ConfigError> {
        for kind in HookKind::ALL {
            if let Some(names) = manifest.hook_selection(kind) {
                if let Some(name) = names.iter().find(|name| !registry.has_hook(kind, name)) {
                    Err(ConfigError::UnknownHook { kind, hook: name.to_owned() })?
                }
            }
        }
        Ok(Self { registry, manifest })
    }

    /// Policy applied when a hook of this kind fails.
    pub fn policy(&self, kind: HookKind) -> FailurePolicy {
        if self.manifest.engine.defaults.hook_failures_fatal {
            FailurePolicy::AbortRun
        } else {
            default_policy(kind)
        }
    }

    /// Hooks that run for a kind: all registered ones, or the manifest's
    /// selection when it lists the kind.
    pub fn selected(&self, kind: HookKind) -> Vec<&'a Registered<Hook>> {
        let selection = self.manifest.hook_selection(kind);
        self.registry
            .hooks(kind)
            .filter(|hook| selection.map(|names| names.contains(&hook.name)).unwrap_or(true))
            .collect()
    }

    /// Invokes every selected hook of `context.kind`. A failing hook does not
    /// stop later hooks of the same kind; contract violations do.
    pub fn invoke(&self, context: &mut HookContext<'_>) -> Result<HookReport, PipelineError> {
        let kind = context.kind;
        let mut report = HookReport::default();
        for hook in self.selected(kind) {
            let missing = context.missing(&hook.item.requires);
            if !missing.is_empty() {
                Err(PipelineError::MissingHookParameters { hook: hook.name.to_owned(), missing })?
            }
            match (hook.item.call)(context) {
                Ok(HookOutcome::Continue) => {}
                Ok(HookOutcome::Patch(patch)) if kind == HookKind::TableMapped => {
                    report.patches.push((hook.name.to_owned(), patch));
                }
                Ok(HookOutcome::Patch(_)) => Err(PipelineError::UnexpectedPatch { hook: hook.name.to_owned(), kind })?,
                Err(error) => {
                    let failure = HookError {
                        stage: context.stage,
                        kind,
                        hook: hook.name.to_owned(),
                        message: format!("{:#}", error),
                    };
                    warn!(hook = %failure.hook, %kind, message = %failure.message, "hook failed");
                    let payload = json!({
                        "hook": failure.hook,
                        "kind": kind,
                        "message": failure.message,
                        "policy": self.policy(kind),
                    });
                    context.events.emit(&Event::warning("hook.failed", context.stage, payload));
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::model::ColumnMapping;
    use crate::registry::HookParam;
    use crate::registry::RunInfo;
    use crate::registry::RunState;
    use crate::telemetry::MemoryEmitter;
    use anyhow::anyhow;
    use std::path::PathBuf;

    fn run_info() -> RunInfo {
        RunInfo {
            run_id: "run".to_owned(),
            input: PathBuf::from("in.xlsx"),
            output: PathBuf::from("out.xlsx"),
            logs_dir: PathBuf::from("logs"),
        }
    }

    fn invoke(
        registry: &Registry,
        manifest: &ManifestContext,
        kind: HookKind,
        mapping: Option<&ColumnMapping>,
        state: &mut RunState,
        events: &MemoryEmitter,
    ) -> Result<HookReport, PipelineError> {
        let run = run_info();
        let invoker = HookInvoker::new(registry, manifest).unwrap();
        let mut context = HookContext {
            run: &run,
            manifest,
            state,
            events,
            stage: stage_of(kind),
            kind,
            sheet: None,
            table: None,
            mapping,
            normalized: None,
            output: None,
        };
        invoker.invoke(&mut context)
    }

    #[test]
    fn failures_are_isolated_per_hook() {
        let mut registry = Registry::new();
        registry
            .register_hook("first", HookKind::TableWritten, 2, &[], |context| {
                context.state.insert("first".to_owned(), json!(true));
                Ok(HookOutcome::Continue)
            })
            .unwrap();
        registry.register_hook("broken", HookKind::TableWritten, 1, &[], |_| Err(anyhow!("boom"))).unwrap();
        registry
            .register_hook("last", HookKind::TableWritten, 0, &[], |context| {
                context.state.insert("last".to_owned(), json!(true));
                Ok(HookOutcome::Continue)
            })
            .unwrap();
        registry.finalize();
        let manifest = manifest();
        let events = MemoryEmitter::new();
        let mut state = RunState::new();

        let report = invoke(&registry, &manifest, HookKind::TableWritten, None, &mut state, &events).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].hook, "broken");
        assert_eq!(report.failures[0].stage, Stage::Write);
        assert_eq!(report.failures[0].message, "boom");
        assert!(state.contains_key("first") && state.contains_key("last"));
        assert_eq!(events.named("hook.failed")[0].payload["policy"], "isolate");
    }

    #[test]
    fn missing_required_parameters_are_named() {
        let mut registry = Registry::new();
        registry
            .register_hook("needs", HookKind::TableMapped, 0, &[HookParam::Table, HookParam::Mapping, HookParam::Sheet], |_| {
                Ok(HookOutcome::Continue)
            })
            .unwrap();
        registry.finalize();
        let manifest = manifest();
        let mapping = ColumnMapping::default();
        let result = invoke(&registry, &manifest, HookKind::TableMapped, Some(&mapping), &mut RunState::new(), &MemoryEmitter::new());

        match result {
            Err(PipelineError::MissingHookParameters { hook, missing }) => {
                assert_eq!(hook, "needs");
                assert_eq!(missing, vec!["table".to_owned(), "sheet".to_owned()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn only_table_mapped_may_patch() {
        let mut registry = Registry::new();
        for kind in [HookKind::TableMapped, HookKind::TableDetected] {
            registry
                .register_hook("patcher", kind, 0, &[], |_| Ok(HookOutcome::Patch(ColumnMappingPatch::default().drop(1))))
                .unwrap();
        }
        registry.finalize();
        let manifest = manifest();

        let report = invoke(&registry, &manifest, HookKind::TableMapped, None, &mut RunState::new(), &MemoryEmitter::new()).unwrap();
        assert_eq!(report.patches.len(), 1);
        assert_eq!(report.patches[0].0, "patcher");

        let result = invoke(&registry, &manifest, HookKind::TableDetected, None, &mut RunState::new(), &MemoryEmitter::new());
        assert!(matches!(result, Err(PipelineError::UnexpectedPatch { kind: HookKind::TableDetected, .. })));
    }

    #[test]
    fn manifest_selection_restricts_hooks() {
        let mut registry = Registry::new();
        for name in ["a", "b", "c"] {
            registry.register_hook(name, HookKind::BeforeSave, 0, &[], |_| Ok(HookOutcome::Continue)).unwrap();
        }
        registry.finalize();
        let mut manifest = manifest();
        manifest.hooks.insert("on_before_save".to_owned(), vec!["c".to_owned(), "a".to_owned()]);

        let invoker = HookInvoker::new(&registry, &manifest).unwrap();
        let names: Vec<&str> = invoker.selected(HookKind::BeforeSave).iter().map(|hook| hook.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);

        manifest.hooks.insert("on_table_mapped".to_owned(), vec!["a".to_owned()]);
        let result = HookInvoker::new(&registry, &manifest);
        assert!(matches!(result, Err(ConfigError::UnknownHook { kind: HookKind::TableMapped, .. })));
    }

    #[test]
    fn policies_per_kind() {
        let registry = Registry::new();
        let mut manifest = manifest();
        let invoker = HookInvoker::new(&registry, &manifest).unwrap();
        assert_eq!(invoker.policy(HookKind::WorkbookStart), FailurePolicy::AbortRun);
        assert_eq!(invoker.policy(HookKind::SheetStart), FailurePolicy::SkipSheet);
        assert_eq!(invoker.policy(HookKind::TableDetected), FailurePolicy::Isolate);
        assert_eq!(invoker.policy(HookKind::TableMapped), FailurePolicy::SkipTable);
        assert_eq!(invoker.policy(HookKind::TableWritten), FailurePolicy::Isolate);
        assert_eq!(invoker.policy(HookKind::BeforeSave), FailurePolicy::AbortRun);

        manifest.engine.defaults.hook_failures_fatal = true;
        let invoker = HookInvoker::new(&registry, &manifest).unwrap();
        assert_eq!(invoker.policy(HookKind::TableWritten), FailurePolicy::AbortRun);
    }
}
