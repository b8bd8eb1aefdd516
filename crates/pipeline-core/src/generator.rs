//! Generator/Consumer streaming model
//!
//! A [`Generator`] produces frames from a bulk source and pushes each one to a
//! [`Consumer`] before fetching the next, so memory stays bounded by one
//! listing page. Delivery order is source order.

use crate::context::Context;
use crate::dispatcher::{AssetResult, Dispatcher, PreparedProcessor};
use crate::error::ProcessorError;
use crate::frame::Frame;
use crate::processor::{validate_args, ArgType, Argument, ProcessorArgs};
use asset_analysis_common::{media_types, Asset};
use asset_analysis_storage::{lister_for_uri, ObjectLister};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Sink accepting frames one at a time
#[async_trait]
pub trait Consumer: Send {
    async fn accept(&mut self, frame: Frame<'_>) -> Result<(), ProcessorError>;
}

#[async_trait]
impl<F> Consumer for F
where
    F: FnMut(Frame<'_>) -> Result<(), ProcessorError> + Send,
{
    async fn accept(&mut self, frame: Frame<'_>) -> Result<(), ProcessorError> {
        (*self)(frame)
    }
}

/// Produces a finite, ordered sequence of frames
#[async_trait]
pub trait Generator: Send + Sync {
    /// Push every frame to `consumer`, returning how many were delivered
    async fn generate(&self, consumer: &mut dyn Consumer) -> Result<usize, ProcessorError>;
}

// ============================================================================
// Generators
// ============================================================================

/// Creates one asset per entry of a paged object listing
pub struct ListingGenerator<L: ObjectLister> {
    lister: L,
}

impl<L: ObjectLister> ListingGenerator<L> {
    pub fn new(lister: L) -> Self {
        Self { lister }
    }
}

#[async_trait]
impl<L: ObjectLister> Generator for ListingGenerator<L> {
    async fn generate(&self, consumer: &mut dyn Consumer) -> Result<usize, ProcessorError> {
        let mut delivered = 0;
        let mut token = None;
        loop {
            let page = self.lister.list_page(token).await?;
            debug!("Listing page with {} entries", page.uris.len());
            for uri in &page.uris {
                let mut asset = Asset::from_source(uri);
                consumer.accept(Frame::new(&mut asset)).await?;
                delivered += 1;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        info!("Listing generator delivered {} frames", delivered);
        Ok(delivered)
    }
}

/// Replays a fixed list of asset snapshots
pub struct DocumentGenerator {
    assets: Vec<Asset>,
}

impl DocumentGenerator {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl Generator for DocumentGenerator {
    async fn generate(&self, consumer: &mut dyn Consumer) -> Result<usize, ProcessorError> {
        for asset in &self.assets {
            let mut asset = asset.clone();
            consumer.accept(Frame::new(&mut asset)).await?;
        }
        Ok(self.assets.len())
    }
}

// ============================================================================
// Consumers
// ============================================================================

/// Forwards asset snapshots into a tokio channel
pub struct ChannelConsumer {
    tx: mpsc::Sender<Asset>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::Sender<Asset>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn accept(&mut self, frame: Frame<'_>) -> Result<(), ProcessorError> {
        self.tx
            .send(frame.asset().clone())
            .await
            .map_err(|_| ProcessorError::Fatal("consumer channel closed".to_string()))
    }
}

/// Runs a processor chain over every accepted frame and keeps the results
pub struct DispatchConsumer<'a> {
    dispatcher: &'a Dispatcher,
    chain: &'a [PreparedProcessor],
    file_types: Option<HashSet<String>>,
    results: Vec<AssetResult>,
}

impl<'a> DispatchConsumer<'a> {
    pub fn new(dispatcher: &'a Dispatcher, chain: &'a [PreparedProcessor]) -> Self {
        Self {
            dispatcher,
            chain,
            file_types: None,
            results: Vec::new(),
        }
    }

    /// Only accept frames whose source extension is in `file_types`
    ///
    /// An empty list is a configuration error.
    pub fn with_file_types(mut self, file_types: &[String]) -> Result<Self, ProcessorError> {
        if file_types.is_empty() {
            return Err(ProcessorError::Configuration(
                "no file types were supplied in the generate settings".to_string(),
            ));
        }
        self.file_types = Some(
            file_types
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        Ok(self)
    }

    fn wants(&self, asset: &Asset) -> bool {
        let Some(file_types) = &self.file_types else {
            return true;
        };
        asset
            .get_attr("source.path")
            .and_then(Value::as_str)
            .and_then(media_types::extension_of)
            .is_some_and(|ext| file_types.contains(&ext))
    }

    pub fn into_results(self) -> Vec<AssetResult> {
        self.results
    }
}

#[async_trait]
impl<'a> Consumer for DispatchConsumer<'a> {
    async fn accept(&mut self, mut frame: Frame<'_>) -> Result<(), ProcessorError> {
        if !self.wants(frame.asset()) {
            debug!("Filtered out asset {}", frame.asset().id());
            return Ok(());
        }
        let report = self.dispatcher.run_chain(self.chain, &mut frame).await;
        self.results.push(AssetResult {
            asset: frame.asset().clone(),
            report,
        });
        Ok(())
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Builds a generator from validated arguments and the execution context
pub type GeneratorFactory =
    Arc<dyn Fn(&ProcessorArgs, &Context) -> Result<Box<dyn Generator>, ProcessorError> + Send + Sync>;

/// Registry entry for one generator class
#[derive(Clone)]
pub struct GeneratorDescriptor {
    pub class_ref: String,
    pub args: Vec<Argument>,
    factory: GeneratorFactory,
}

impl GeneratorDescriptor {
    pub fn new<F>(class_ref: impl Into<String>, args: Vec<Argument>, factory: F) -> Self
    where
        F: Fn(&ProcessorArgs, &Context) -> Result<Box<dyn Generator>, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            class_ref: class_ref.into(),
            args,
            factory: Arc::new(factory),
        }
    }

    pub fn instantiate(
        &self,
        raw: &Map<String, Value>,
        ctx: &Context,
    ) -> Result<Box<dyn Generator>, ProcessorError> {
        let args = validate_args(&self.args, raw)?;
        (self.factory)(&args, ctx)
    }
}

impl std::fmt::Debug for GeneratorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorDescriptor")
            .field("class_ref", &self.class_ref)
            .field("args", &self.args)
            .finish()
    }
}

/// `pkg.ListingGenerator`: lists `s3://bucket/prefix` or a local directory
pub fn listing_generator() -> GeneratorDescriptor {
    GeneratorDescriptor::new(
        "pkg.ListingGenerator",
        vec![
            Argument::required("uri", ArgType::String),
            Argument::optional("page_size", ArgType::Int, 1000),
        ],
        |args, ctx| {
            let page_size = usize::try_from(args.int("page_size")?)
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    ProcessorError::Configuration("page_size must be positive".to_string())
                })?;
            let lister = lister_for_uri(&args.string("uri")?, ctx.object_storage.clone(), page_size)?;
            Ok(Box::new(ListingGenerator::new(lister)))
        },
    )
}

/// `pkg.DocumentGenerator`: replays the asset snapshots given in `assets`
pub fn document_generator() -> GeneratorDescriptor {
    GeneratorDescriptor::new(
        "pkg.DocumentGenerator",
        vec![Argument::required("assets", ArgType::List)],
        |args, _ctx| {
            let raw = args.get("assets").cloned().unwrap_or(Value::Array(vec![]));
            let assets: Vec<Asset> = serde_json::from_value(raw).map_err(|e| {
                ProcessorError::Configuration(format!("invalid asset snapshot: {e}"))
            })?;
            Ok(Box::new(DocumentGenerator::new(assets)))
        },
    )
}
