//! Asset Pipeline Core - processor execution runtime
//!
//! This crate provides the core abstractions for running pluggable processing
//! units against media assets:
//! - [`Frame`]: transit wrapper around one asset
//! - [`Processor`] / [`ProcessorDescriptor`]: processing units and their argument schemas
//! - [`Registry`]: the fixed table of known processor and generator classes
//! - [`Dispatcher`]: runs processors and classifies every fault into an [`Outcome`]
//! - [`Generator`] / [`Consumer`]: push-based bulk ingestion
//! - [`Context`] / [`ModelCache`]: process-scoped services shared by every request

pub mod cache;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod generator;
pub mod processor;
pub mod registry;

pub use cache::ModelCache;
pub use context::Context;
pub use dispatcher::{AssetResult, ChainReport, Dispatcher, Fault, Outcome, PreparedProcessor};
pub use error::{ErrorKind, ProcessorError, RegistryError};
pub use frame::Frame;
pub use generator::{
    document_generator, listing_generator, ChannelConsumer, Consumer, DispatchConsumer,
    DocumentGenerator, Generator, GeneratorDescriptor, ListingGenerator,
};
pub use processor::{
    validate_args, ArgType, Argument, Processor, ProcessorArgs, ProcessorDescriptor, ProcessorRef,
};
pub use registry::Registry;
