//! Collaborators a problem is built against.

use crate::problem::{Problem, ProblemDefinition};
use faultbench_proto::{
    Application, ClusterControl, Error, FaultInjector, Result, WorkloadGenerator,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a fault injector scoped to one namespace.
pub type InjectorFactory = Box<dyn Fn(&str) -> Result<Arc<dyn FaultInjector>> + Send + Sync>;

/// Cluster, applications, injector backends and the load generator.
pub struct Platform {
    cluster: Arc<dyn ClusterControl>,
    applications: BTreeMap<String, Arc<dyn Application>>,
    injectors: BTreeMap<String, InjectorFactory>,
    workload: Option<Arc<dyn WorkloadGenerator>>,
}

impl Platform {
    pub fn new(cluster: Arc<dyn ClusterControl>) -> Self {
        Self {
            cluster,
            applications: BTreeMap::new(),
            injectors: BTreeMap::new(),
            workload: None,
        }
    }

    pub fn with_application(mut self, app: Arc<dyn Application>) -> Self {
        self.applications.insert(app.name().to_string(), app);
        self
    }

    pub fn with_injector<F>(mut self, backend: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn FaultInjector>> + Send + Sync + 'static,
    {
        self.injectors.insert(backend.into(), Box::new(factory));
        self
    }

    pub fn with_workload(mut self, workload: Arc<dyn WorkloadGenerator>) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn cluster(&self) -> &dyn ClusterControl {
        self.cluster.as_ref()
    }

    pub fn workload(&self) -> Option<&dyn WorkloadGenerator> {
        self.workload.as_deref()
    }

    pub fn application(&self, name: &str) -> Result<Arc<dyn Application>> {
        self.applications
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown application '{name}'")))
    }

    pub fn application_names(&self) -> impl Iterator<Item = &str> {
        self.applications.keys().map(String::as_str)
    }

    /// Binds a definition to its application and a fresh injector.
    pub fn build_problem(&self, definition: &ProblemDefinition) -> Result<Problem> {
        definition.validate()?;
        let app = self.application(&definition.application)?;
        let namespace = definition
            .namespace
            .clone()
            .unwrap_or_else(|| app.namespace().to_string());
        let factory = self.injectors.get(&definition.injector).ok_or_else(|| {
            Error::config(format!(
                "problem '{}' uses unknown injector '{}'",
                definition.id, definition.injector
            ))
        })?;
        let injector = factory(&namespace)?;
        debug!(
            problem_id = %definition.id,
            application = %definition.application,
            namespace = %namespace,
            backend = injector.backend(),
            "Problem built"
        );
        Ok(Problem::new(definition.clone(), app, injector))
    }
}
