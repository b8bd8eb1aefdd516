//! Dispatcher: runs processors against frames and classifies every fault
//!
//! Nothing a processor does (returning an error or panicking) escapes
//! `process`/`run`; each outcome is reported as an explicit [`Outcome`].
//!
//! Every run that is not a skip leaves an entry under `metrics.pipeline`:
//! `{processor, checksum, executionTime, executionDate, error}`. An asset whose
//! entry for the same processor and checksum carries no error is not processed
//! again unless the reference sets `force`.

use crate::context::Context;
use crate::error::{ErrorKind, ProcessorError};
use crate::frame::Frame;
use crate::processor::{Processor, ProcessorRef};
use crate::registry::Registry;
use asset_analysis_common::{Asset, AssetError};
use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A classified fault attributed to one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    pub error_kind: ErrorKind,
    pub processor: String,
    pub message: String,
    pub asset_id: String,
    pub fatal: bool,
}

impl Fault {
    fn new(error: &ProcessorError, processor: &str, asset_id: &str) -> Self {
        let error_kind = error.kind();
        Self {
            error_kind,
            processor: processor.to_string(),
            message: error.to_string(),
            asset_id: asset_id.to_string(),
            fatal: error_kind.is_fatal_to_asset(),
        }
    }
}

/// Result of running one processor on one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The processor finished normally
    Completed,
    /// A clean metric for this processor and checksum was already present
    AlreadyProcessed,
    /// The asset did not meet the processor's requirements; nothing was done
    Skipped(Fault),
    /// Processor-declared recoverable fault; the chain continues
    Recoverable(Fault),
    /// Processor-declared unrecoverable fault; the chain stops
    FatalToAsset(Fault),
    /// Unclassified fault or panic, treated as fatal to the asset
    Internal(Fault),
}

impl Outcome {
    fn classify(fault: Fault) -> Self {
        match fault.error_kind {
            ErrorKind::ValidationError => Outcome::Skipped(fault),
            ErrorKind::ProcessingError => Outcome::Recoverable(fault),
            ErrorKind::FatalProcessingError => Outcome::FatalToAsset(fault),
            // resolution or configuration problems surfacing mid-process are the processor's bug
            _ => Outcome::Internal(Fault {
                fatal: true,
                ..fault
            }),
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Outcome::Completed | Outcome::AlreadyProcessed => None,
            Outcome::Skipped(fault)
            | Outcome::Recoverable(fault)
            | Outcome::FatalToAsset(fault)
            | Outcome::Internal(fault) => Some(fault),
        }
    }

    /// True when the rest of the chain must not run
    pub fn halts_chain(&self) -> bool {
        matches!(self, Outcome::FatalToAsset(_) | Outcome::Internal(_))
    }
}

/// What happened to one asset across a processor chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Skipped processors
    pub warnings: Vec<String>,
    /// Recoverable and fatal faults, in order
    pub faults: Vec<Fault>,
    /// Whether a fatal fault stopped the chain
    pub halted: bool,
}

impl ChainReport {
    pub fn record(&mut self, outcome: Outcome) {
        self.halted |= outcome.halts_chain();
        match outcome {
            Outcome::Completed | Outcome::AlreadyProcessed => {}
            Outcome::Skipped(fault) => self
                .warnings
                .push(format!("{} skipped: {}", fault.processor, fault.message)),
            Outcome::Recoverable(fault) | Outcome::FatalToAsset(fault) | Outcome::Internal(fault) => {
                self.faults.push(fault)
            }
        }
    }
}

/// One asset and its chain report
#[derive(Debug, Clone, PartialEq)]
pub struct AssetResult {
    pub asset: Asset,
    pub report: ChainReport,
}

/// A processor instance that has been constructed and initialized
#[derive(Clone)]
pub struct PreparedProcessor {
    class_ref: String,
    checksum: i64,
    force: bool,
    processor: Arc<dyn Processor>,
}

impl PreparedProcessor {
    pub fn class_ref(&self) -> &str {
        &self.class_ref
    }

    /// Whether `asset` carries a clean metric for this processor and checksum
    fn already_processed(&self, asset: &Asset) -> bool {
        if self.force {
            return false;
        }
        asset
            .get_attr("metrics.pipeline")
            .and_then(Value::as_array)
            .is_some_and(|metrics| {
                metrics.iter().any(|metric| {
                    metric["processor"] == self.class_ref.as_str()
                        && metric["checksum"] == self.checksum
                        && metric.get("error").map_or(true, Value::is_null)
                })
            })
    }

    /// Record one run under `metrics.pipeline`, one entry per processor class
    fn record_metric(&self, asset: &mut Asset, outcome: &Outcome, seconds: f64) -> Result<(), AssetError> {
        let error = match outcome {
            Outcome::Skipped(_) | Outcome::AlreadyProcessed => return Ok(()),
            Outcome::Completed => None,
            Outcome::Recoverable(_) => Some("warning"),
            Outcome::FatalToAsset(_) | Outcome::Internal(_) => Some("fatal"),
        };

        let mut metrics = asset
            .get_attr("metrics.pipeline")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let index = match metrics
            .iter()
            .position(|metric| metric["processor"] == self.class_ref.as_str())
        {
            Some(index) => index,
            None => {
                metrics.push(json!({"processor": self.class_ref, "executionTime": 0}));
                metrics.len() - 1
            }
        };

        if let Some(metric) = metrics[index].as_object_mut() {
            metric.insert("checksum".to_string(), json!(self.checksum));
            match error {
                None => {
                    metric.insert("executionTime".to_string(), json!((seconds * 100.0).round() / 100.0));
                    metric.insert(
                        "executionDate".to_string(),
                        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                    metric.remove("error");
                }
                Some(error) => {
                    metric.insert("error".to_string(), json!(error));
                }
            }
        }
        asset.set_attr("metrics.pipeline", metrics)
    }
}

impl std::fmt::Debug for PreparedProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedProcessor")
            .field("class_ref", &self.class_ref)
            .finish()
    }
}

/// Resolves, constructs and runs processors
///
/// Instances obtained through [`Dispatcher::instance`] are kept per reference
/// until [`Dispatcher::teardown`] retires them.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    ctx: Context,
    instances: Arc<Mutex<HashMap<String, PreparedProcessor>>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, ctx: Context) -> Self {
        Self {
            registry,
            ctx,
            instances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Resolve the reference, validate its arguments, construct and initialize
    ///
    /// Failures here reject the whole request; a panic in `init` is reported as
    /// [`ProcessorError::Panicked`].
    pub async fn prepare(&self, reference: &ProcessorRef) -> Result<PreparedProcessor, ProcessorError> {
        let descriptor = self.registry.resolve(reference)?;
        let mut processor = descriptor.instantiate(&reference.args)?;

        let init = AssertUnwindSafe(processor.init(&self.ctx)).catch_unwind().await;
        match init {
            Ok(result) => result?,
            Err(panic) => return Err(ProcessorError::Panicked(panic_message(panic))),
        }

        debug!("Prepared processor {}", descriptor.class_ref);
        Ok(PreparedProcessor {
            class_ref: descriptor.class_ref.clone(),
            checksum: reference.checksum,
            force: reference.force,
            processor: Arc::from(processor),
        })
    }

    /// Like [`Dispatcher::prepare`], reusing the instance kept for an equal reference
    pub async fn instance(&self, reference: &ProcessorRef) -> Result<PreparedProcessor, ProcessorError> {
        let key = reference.instance_key();
        if let Some(prepared) = self.instances().get(&key).cloned() {
            return Ok(prepared);
        }

        let prepared = self.prepare(reference).await?;
        self.instances().insert(key, prepared.clone());
        Ok(prepared)
    }

    /// Retire the instance kept for `reference`
    ///
    /// Returns `false` when no instance was kept for it.
    pub async fn teardown(&self, reference: &ProcessorRef) -> Result<bool, ProcessorError> {
        let Some(prepared) = self.instances().remove(&reference.instance_key()) else {
            warn!("No instance of {} to tear down", reference.class_name);
            return Ok(false);
        };
        info!("tearing down processor {}", prepared.class_ref);
        self.retire(&prepared).await?;
        Ok(true)
    }

    /// Retire every kept instance; failures are logged
    pub async fn teardown_all(&self) -> usize {
        let retired: Vec<PreparedProcessor> = self.instances().drain().map(|(_, p)| p).collect();
        for prepared in &retired {
            if let Err(e) = self.retire(prepared).await {
                error!("Teardown of {} failed: {}", prepared.class_ref, e);
            }
        }
        retired.len()
    }

    /// Number of kept instances
    pub fn instance_count(&self) -> usize {
        self.instances().len()
    }

    async fn retire(&self, prepared: &PreparedProcessor) -> Result<(), ProcessorError> {
        AssertUnwindSafe(prepared.processor.teardown(&self.ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessorError::Panicked(panic_message(panic))))
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, PreparedProcessor>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a prepared processor on one frame and classify the result
    pub async fn process(&self, prepared: &PreparedProcessor, frame: &mut Frame<'_>) -> Outcome {
        let asset_id = frame.asset().id().to_string();
        if prepared.already_processed(frame.asset()) {
            debug!("Asset {} already processed by {}", asset_id, prepared.class_ref);
            return Outcome::AlreadyProcessed;
        }

        info!("started processor {} on asset {}", prepared.class_ref, asset_id);
        let start = Instant::now();

        let result = AssertUnwindSafe(prepared.processor.process(&self.ctx, frame))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessorError::Panicked(panic_message(panic))));

        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(e) => Outcome::classify(Fault::new(&e, &prepared.class_ref, &asset_id)),
        };

        let elapsed = start.elapsed().as_secs_f64();
        if let Err(e) = prepared.record_metric(&mut *frame.asset, &outcome, elapsed) {
            warn!("Cannot record metrics for asset {}: {}", asset_id, e);
        }

        match &outcome {
            Outcome::Completed | Outcome::AlreadyProcessed => {}
            Outcome::Skipped(fault) | Outcome::Recoverable(fault) => {
                warn!("{} on asset {}: {}", fault.error_kind, asset_id, fault.message)
            }
            Outcome::FatalToAsset(fault) | Outcome::Internal(fault) => {
                error!("{} on asset {}: {}", fault.error_kind, asset_id, fault.message)
            }
        }
        info!("completed processor {} in {:.3}s", prepared.class_ref, elapsed);
        outcome
    }

    /// Prepare and run one processor
    pub async fn run(&self, reference: &ProcessorRef, frame: &mut Frame<'_>) -> Result<Outcome, ProcessorError> {
        let prepared = self.prepare(reference).await?;
        Ok(self.process(&prepared, frame).await)
    }

    /// Run prepared processors in order, stopping after the first fatal fault
    pub async fn run_chain(&self, chain: &[PreparedProcessor], frame: &mut Frame<'_>) -> ChainReport {
        let mut report = ChainReport::default();
        for prepared in chain {
            report.record(self.process(prepared, frame).await);
            if report.halted {
                debug!(
                    "Chain halted for asset {} after {}",
                    frame.asset().id(),
                    prepared.class_ref
                );
                break;
            }
        }
        report
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ArgType, Argument, ProcessorDescriptor};
    use async_trait::async_trait;
    use serde_json::json;

    /// Writes `analysis.<name>` and then fails (or not) as configured
    struct ScriptedProcessor {
        name: String,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Processor for ScriptedProcessor {
        async fn process(&self, _ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
            frame.asset_mut().add_analysis(&self.name, true)?;
            match self.fail_with.as_deref() {
                None => Ok(()),
                Some("validation") => Err(ProcessorError::Validation("too long".into())),
                Some("recoverable") => Err(ProcessorError::Recoverable("flaky".into())),
                Some("fatal") => Err(ProcessorError::Fatal("corrupt".into())),
                Some("io") => Err(std::io::Error::other("disk").into()),
                Some(_) => panic!("processor blew up"),
            }
        }
    }

    struct PanickingInit;

    #[async_trait]
    impl Processor for PanickingInit {
        async fn init(&mut self, _ctx: &Context) -> Result<(), ProcessorError> {
            panic!("init exploded")
        }

        async fn process(&self, _ctx: &Context, _frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
            Ok(())
        }
    }

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let mut registry = Registry::new();
        registry.register(ProcessorDescriptor::new(
            "test.Scripted",
            vec![
                Argument::optional("name", ArgType::String, "step"),
                Argument::optional("fail_with", ArgType::String, ""),
            ],
            |args| {
                let fail_with = args.string("fail_with")?;
                Ok(Box::new(ScriptedProcessor {
                    name: args.string("name")?,
                    fail_with: (!fail_with.is_empty()).then_some(fail_with),
                }))
            },
        ));
        registry.register(ProcessorDescriptor::new("test.PanickingInit", vec![], |_| {
            Ok(Box::new(PanickingInit))
        }));
        Dispatcher::new(Arc::new(registry), Context::local(dir))
    }

    // every step shares one class, so a clean metric would skip the next one
    fn step(name: &str, fail_with: &str) -> ProcessorRef {
        ProcessorRef::new("test.Scripted")
            .with_arg("name", name)
            .with_arg("fail_with", fail_with)
            .forced()
    }

    /// Counts init and teardown calls
    struct Lifecycle {
        inits: Arc<std::sync::atomic::AtomicUsize>,
        teardowns: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Processor for Lifecycle {
        async fn init(&mut self, _ctx: &Context) -> Result<(), ProcessorError> {
            self.inits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn process(&self, _ctx: &Context, _frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
            Ok(())
        }

        async fn teardown(&self, _ctx: &Context) -> Result<(), ProcessorError> {
            self.teardowns.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn asset() -> Asset {
        Asset::new("a1", json!({"source": {"path": "/x.png"}}).as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn test_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let outcome = dispatcher
            .run(&step("labels", ""), &mut Frame::new(&mut asset))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(asset.get_attr("analysis.labels"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_classification() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let cases = [
            ("validation", ErrorKind::ValidationError),
            ("recoverable", ErrorKind::ProcessingError),
            ("fatal", ErrorKind::FatalProcessingError),
            ("io", ErrorKind::InternalError),
            ("panic", ErrorKind::InternalError),
        ];
        for (mode, kind) in cases {
            let mut asset = asset();
            let outcome = dispatcher
                .run(&step("x", mode), &mut Frame::new(&mut asset))
                .await
                .unwrap();
            let fault = outcome.fault().unwrap();
            assert_eq!(fault.error_kind, kind, "mode {mode}");
            assert_eq!(fault.asset_id, "a1");
            assert_eq!(fault.processor, "test.Scripted");
            assert_eq!(fault.fatal, outcome.halts_chain());
        }
    }

    #[tokio::test]
    async fn test_panic_does_not_escape() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let outcome = dispatcher
            .run(&step("x", "panic"), &mut Frame::new(&mut asset))
            .await
            .unwrap();
        match outcome {
            Outcome::Internal(fault) => assert!(fault.message.contains("processor blew up")),
            other => panic!("expected internal fault, got {other:?}"),
        }

        // the dispatcher is still usable afterwards
        let outcome = dispatcher
            .run(&step("y", ""), &mut Frame::new(&mut asset))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn test_prepare_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let err = dispatcher.prepare(&ProcessorRef::new("test.Missing")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolutionError);

        let err = dispatcher
            .prepare(&ProcessorRef::new("test.Scripted").with_arg("bogus", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);

        let err = dispatcher
            .prepare(&ProcessorRef::new("test.PanickingInit"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(err.to_string().contains("init exploded"));
    }

    #[tokio::test]
    async fn test_chain_continues_after_recoverable_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut chain = Vec::new();
        for (name, mode) in [("a", "validation"), ("b", "recoverable"), ("c", "")] {
            chain.push(dispatcher.prepare(&step(name, mode)).await.unwrap());
        }

        let mut asset = asset();
        let report = dispatcher.run_chain(&chain, &mut Frame::new(&mut asset)).await;
        assert!(!report.halted);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.faults.len(), 1);
        assert!(!report.faults[0].fatal);
        assert!(asset.attr_exists("analysis.c"));
    }

    #[tokio::test]
    async fn test_chain_stops_after_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut chain = Vec::new();
        for (name, mode) in [("a", ""), ("b", "fatal"), ("c", "")] {
            chain.push(dispatcher.prepare(&step(name, mode)).await.unwrap());
        }

        let mut asset = asset();
        let report = dispatcher.run_chain(&chain, &mut Frame::new(&mut asset)).await;
        assert!(report.halted);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].error_kind, ErrorKind::FatalProcessingError);
        // partial document kept, later steps never ran
        assert!(asset.attr_exists("analysis.a"));
        assert!(asset.attr_exists("analysis.b"));
        assert!(!asset.attr_exists("analysis.c"));
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_processor() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let reference = ProcessorRef::new("test.Scripted").with_checksum(42);
        let outcome = dispatcher.run(&reference, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let metrics = asset.get_attr("metrics.pipeline").unwrap().as_array().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0]["processor"], "test.Scripted");
        assert_eq!(metrics[0]["checksum"], 42);
        assert!(metrics[0]["executionTime"].is_number());
        assert!(metrics[0]["executionDate"].is_string());
        assert!(metrics[0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_clean_metric_skips_rerun_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let first = ProcessorRef::new("test.Scripted").with_arg("name", "one").with_checksum(7);
        dispatcher.run(&first, &mut Frame::new(&mut asset)).await.unwrap();
        let before = asset.clone();

        let again = ProcessorRef::new("test.Scripted").with_arg("name", "two").with_checksum(7);
        let outcome = dispatcher.run(&again, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(outcome, Outcome::AlreadyProcessed);
        assert_eq!(asset, before);

        // a new checksum runs again
        let changed = ProcessorRef::new("test.Scripted").with_arg("name", "two").with_checksum(8);
        let outcome = dispatcher.run(&changed, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(asset.attr_exists("analysis.two"));

        let forced = ProcessorRef::new("test.Scripted")
            .with_arg("name", "three")
            .with_checksum(8)
            .forced();
        let outcome = dispatcher.run(&forced, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(asset.attr_exists("analysis.three"));
        assert_eq!(asset.get_attr("metrics.pipeline").unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_metric_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let failing = ProcessorRef::new("test.Scripted").with_arg("fail_with", "recoverable");
        dispatcher.run(&failing, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(asset.get_attr("metrics.pipeline").unwrap()[0]["error"], "warning");

        let fatal = ProcessorRef::new("test.Scripted").with_arg("fail_with", "fatal");
        dispatcher.run(&fatal, &mut Frame::new(&mut asset)).await.unwrap();
        assert_eq!(asset.get_attr("metrics.pipeline").unwrap()[0]["error"], "fatal");

        let outcome = dispatcher
            .run(&ProcessorRef::new("test.Scripted"), &mut Frame::new(&mut asset))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(asset.get_attr("metrics.pipeline").unwrap()[0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_skip_leaves_no_metric() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let mut asset = asset();

        let outcome = dispatcher
            .run(
                &ProcessorRef::new("test.Scripted").with_arg("fail_with", "validation"),
                &mut Frame::new(&mut asset),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(!asset.attr_exists("metrics.pipeline"));
    }

    #[tokio::test]
    async fn test_instances_are_reused_until_teardown() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let inits = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let (i, t) = (inits.clone(), teardowns.clone());
        registry.register(ProcessorDescriptor::new(
            "test.Lifecycle",
            vec![Argument::optional("level", ArgType::Int, 1)],
            move |_| {
                Ok(Box::new(Lifecycle {
                    inits: i.clone(),
                    teardowns: t.clone(),
                }))
            },
        ));
        let dispatcher = Dispatcher::new(Arc::new(registry), Context::local(dir.path()));

        let reference = ProcessorRef::new("test.Lifecycle").with_arg("level", 2);
        dispatcher.instance(&reference).await.unwrap();
        dispatcher.instance(&reference).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        // different arguments are a different instance
        dispatcher
            .instance(&ProcessorRef::new("test.Lifecycle").with_arg("level", 3))
            .await
            .unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.instance_count(), 2);

        assert!(dispatcher.teardown(&reference).await.unwrap());
        assert!(!dispatcher.teardown(&reference).await.unwrap());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);

        dispatcher.instance(&reference).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 3);

        assert_eq!(dispatcher.teardown_all().await, 2);
        assert_eq!(teardowns.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.instance_count(), 0);
    }

    #[test]
    fn test_fault_wire_shape() {
        let fault = Fault::new(&ProcessorError::Fatal("corrupt".into()), "pkg.X", "a1");
        assert_eq!(
            serde_json::to_value(&fault).unwrap(),
            json!({
                "errorKind": "FatalProcessingError",
                "processor": "pkg.X",
                "message": "corrupt",
                "assetId": "a1",
                "fatal": true
            })
        );
    }
}
