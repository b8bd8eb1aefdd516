//! Processor registry
//!
//! A fixed table of known processing units, populated by explicit registration
//! at startup. Nothing is loaded at request time beyond a lookup in this table.

use crate::error::RegistryError;
use crate::generator::GeneratorDescriptor;
use crate::processor::{ProcessorDescriptor, ProcessorRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of processor and generator classes
#[derive(Debug, Default)]
pub struct Registry {
    /// Processors by class ref
    processors: HashMap<String, Arc<ProcessorDescriptor>>,

    /// Generators by class ref
    generators: HashMap<String, Arc<GeneratorDescriptor>>,

    /// Image this process serves, if pinned
    image: Option<String>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Only serve requests for `image` (requests naming no image are always served)
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        let image = image.into();
        self.image = (!image.is_empty()).then_some(image);
        self
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    /// Register a processor class
    pub fn register(&mut self, descriptor: ProcessorDescriptor) {
        info!("Registering processor: {}", descriptor.class_ref);
        self.processors
            .insert(descriptor.class_ref.clone(), Arc::new(descriptor));
    }

    /// Register a generator class
    pub fn register_generator(&mut self, descriptor: GeneratorDescriptor) {
        info!("Registering generator: {}", descriptor.class_ref);
        self.generators
            .insert(descriptor.class_ref.clone(), Arc::new(descriptor));
    }

    /// Resolve a processor reference
    pub fn resolve(&self, reference: &ProcessorRef) -> Result<Arc<ProcessorDescriptor>, RegistryError> {
        self.check_image(reference)?;
        debug!("Resolving processor {}", reference.class_name);
        self.processors
            .get(&reference.class_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownClass(reference.class_name.clone()))
    }

    /// Resolve a generator reference
    pub fn resolve_generator(
        &self,
        reference: &ProcessorRef,
    ) -> Result<Arc<GeneratorDescriptor>, RegistryError> {
        self.check_image(reference)?;
        debug!("Resolving generator {}", reference.class_name);
        self.generators
            .get(&reference.class_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownGenerator(reference.class_name.clone()))
    }

    /// All registered class refs, sorted
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .processors
            .keys()
            .chain(self.generators.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn check_image(&self, reference: &ProcessorRef) -> Result<(), RegistryError> {
        match &self.image {
            Some(served) if !reference.image.is_empty() && reference.image != *served => {
                Err(RegistryError::ImageMismatch {
                    requested: reference.image.clone(),
                    served: served.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}
