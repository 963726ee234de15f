//! Once-initialised shared resources
//!
//! Embedding models, collection handles and the reranker model are expensive
//! to build and read-only afterwards. `SharedResource` builds the value on
//! first use; concurrent first callers wait on the same initialisation so
//! exactly one instance exists. A failed initialisation leaves the cell empty
//! and the next caller retries.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::RagError;

type Initializer<T> = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<T>, RagError>> + Send + Sync>;

/// Lazily-initialised, process-wide handle
pub struct SharedResource<T: ?Sized + Send + Sync> {
    name: String,
    cell: OnceCell<Arc<T>>,
    init: Initializer<T>,
}

impl<T: ?Sized + Send + Sync + 'static> SharedResource<T> {
    /// Build on first `get()` using `init`
    pub fn lazy<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>, RagError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cell: OnceCell::new(),
            init: Box::new(move || Box::pin(init())),
        }
    }

    /// Wrap an already-built value
    pub fn ready(name: impl Into<String>, value: Arc<T>) -> Self {
        let name = name.into();
        let missing = name.clone();
        Self {
            name,
            cell: OnceCell::new_with(Some(value)),
            init: Box::new(move || {
                let missing = missing.clone();
                Box::pin(async move {
                    Err(RagError::Configuration(format!(
                        "{} has no initializer",
                        missing
                    )))
                })
            }),
        }
    }

    /// Get the shared value, initialising it if needed
    pub async fn get(&self) -> Result<Arc<T>, RagError> {
        let value = self
            .cell
            .get_or_try_init(|| {
                tracing::info!(resource = %self.name, "Initializing shared resource");
                (self.init)()
            })
            .await?;
        Ok(Arc::clone(value))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
