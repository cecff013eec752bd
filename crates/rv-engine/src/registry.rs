//! Process registry: process name to schema and work function.
//!
//! Built once at startup and shared read-only (behind an `Arc`) by the
//! scheduler and every job.

use async_trait::async_trait;
use rv_types::{config_error, ProcessInputs, ProcessSchema, RvResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::JobContext;

/// Work function of a process.
#[async_trait]
pub trait ProcessHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext, inputs: &ProcessInputs) -> RvResult<()>;

    /// Cross-field checks the schema cannot express, run at submission.
    fn validate(&self, _inputs: &ProcessInputs) -> RvResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct ProcessDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub schema: ProcessSchema,
    handler: Arc<dyn ProcessHandler>,
}

impl ProcessDescriptor {
    pub fn new<H>(name: impl Into<String>, title: impl Into<String>, schema: ProcessSchema, handler: H) -> Self
    where
        H: ProcessHandler + 'static,
    {
        Self {
            name: name.into(),
            title: title.into(),
            description: String::new(),
            schema,
            handler: Arc::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validate raw inputs against the schema, then the handler's own checks.
    pub fn validate(&self, raw: &Map<String, Value>) -> RvResult<ProcessInputs> {
        let inputs = self.schema.validate(raw)?;
        self.handler.validate(&inputs)?;
        Ok(inputs)
    }

    pub fn handler(&self) -> Arc<dyn ProcessHandler> {
        self.handler.clone()
    }
}

impl fmt::Debug for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDescriptor")
            .field("name", &self.name)
            .field("title", &self.title)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, ProcessDescriptor>,
}

impl ProcessRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.processes.get(name)
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<&ProcessDescriptor> {
        let mut all: Vec<_> = self.processes.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: Vec<ProcessDescriptor>,
}

impl RegistryBuilder {
    pub fn register(mut self, descriptor: ProcessDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> RvResult<ProcessRegistry> {
        let mut processes = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            if descriptor.name.is_empty() {
                return Err(config_error!("process names must not be empty"));
            }
            if processes.contains_key(&descriptor.name) {
                return Err(config_error!("process {} registered twice", descriptor.name));
            }
            processes.insert(descriptor.name.clone(), descriptor);
        }
        Ok(ProcessRegistry { processes })
    }
}
