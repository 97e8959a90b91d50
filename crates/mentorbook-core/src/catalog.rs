//! Read-only product catalog collaborator.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::model::{Product, ProductId};
use crate::persist::PersistError;

/// Lookup of products by id. Events snapshot what they need at creation.
pub trait ProductCatalog: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the catalog backend cannot be reached.
    fn product(&self, id: &ProductId) -> Result<Option<Product>, PersistError>;
}

/// In-process catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id.clone(), product);
    }
}

impl FromIterator<Product> for MemoryCatalog {
    fn from_iter<I: IntoIterator<Item = Product>>(iter: I) -> Self {
        let products = iter
            .into_iter()
            .map(|product| (product.id.clone(), product))
            .collect();
        Self {
            products: RwLock::new(products),
        }
    }
}

impl ProductCatalog for MemoryCatalog {
    fn product(&self, id: &ProductId) -> Result<Option<Product>, PersistError> {
        Ok(self
            .products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }
}
