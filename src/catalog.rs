use async_trait::async_trait;

use crate::error::Result;

/// Enumerates the resource types known to the upstream schema.
///
/// Consulted when the job configuration does not restrict the fan-out.
#[async_trait]
pub trait ResourceTypeCatalog: Send + Sync {
    async fn get_all(&self) -> Result<Vec<String>>;
}

/// Catalog over a fixed list of resource types.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    resource_types: Vec<String>,
}

impl StaticCatalog {
    pub fn new(resource_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            resource_types: resource_types.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ResourceTypeCatalog for StaticCatalog {
    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.resource_types.clone())
    }
}
