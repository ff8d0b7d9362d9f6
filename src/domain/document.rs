use serde::{Deserialize, Serialize};

use super::events::{ProductCreated, ProductUpdated};

/// A product as stored in the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDocument {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

impl From<&ProductCreated> for ProductDocument {
    fn from(e: &ProductCreated) -> Self {
        Self {
            id: e.product_id.clone(),
            name: e.name.clone(),
            description: e.description.clone(),
            category: e.category.clone(),
            price: e.price.clone(),
        }
    }
}

impl From<&ProductUpdated> for ProductDocument {
    fn from(e: &ProductUpdated) -> Self {
        Self {
            id: e.product_id.clone(),
            name: e.name.clone(),
            description: e.description.clone(),
            category: e.category.clone(),
            price: e.price.clone(),
        }
    }
}
