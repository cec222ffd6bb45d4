use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::scheduler::types::ReportGenerator;

/// Registry mapping report keys to generator implementations
#[derive(Default)]
pub struct ReportRegistry {
    generators: HashMap<String, Arc<dyn ReportGenerator>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self {
            generators: HashMap::new(),
        }
    }

    /// Register a generator under its report key
    pub fn register<G>(&mut self, generator: G) -> &mut Self
    where
        G: ReportGenerator + 'static,
    {
        self.generators
            .insert(G::report_key().to_string(), Arc::new(generator));
        self
    }

    /// Look up the generator for a report key
    ///
    /// A schedule referencing an unknown key fails its run with this
    /// not-found error rather than blocking the claim batch.
    pub fn get(&self, report_key: &str) -> AppResult<Arc<dyn ReportGenerator>> {
        self.generators
            .get(report_key)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                entity: "ReportGenerator".to_string(),
                field: "report_key".to_string(),
                value: report_key.to_string(),
            })
    }

    pub fn keys(&self) -> Vec<&str> {
        self.generators.keys().map(String::as_str).collect()
    }
}
