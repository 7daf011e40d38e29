use serde::{Deserialize, Serialize};

use crate::domain::{image_file_name, NewProduct, OrderId, Pricing, ProductId, VendorId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: OrderId,
    pub status: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUidRequest {
    pub phone_number: String,
    pub firebase_uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUidResponse {
    pub vendor_id: VendorId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVendorRequest {
    pub shop_name: String,
    pub owner_name: String,
    pub shop_image_url: String,
    pub business_type: String,
    pub address: String,
    pub mobile: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_500: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_1000: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
}

impl ProductRecord {
    pub fn matches_search(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle))
    }
}

/// Fields common to the add and update product payloads. The image name is
/// always re-derived from the current product name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductForm {
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub category: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_500: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_1000: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
}

impl From<&NewProduct> for ProductForm {
    fn from(product: &NewProduct) -> Self {
        let (price, price_500, price_1000, min_price) = match product.pricing {
            Pricing::PerWeight {
                price_500,
                price_1000,
                min_price,
            } => (None, Some(price_500), Some(price_1000), Some(min_price)),
            Pricing::PerUnit { price } => (Some(price), None, None, None),
        };
        Self {
            name: product.name.clone(),
            description: product.description.clone(),
            quantity: product.quantity,
            category: product.category.label().to_string(),
            image_url: image_file_name(&product.name),
            price,
            price_500,
            price_1000,
            min_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProductRequest {
    pub vendor_id: VendorId,
    #[serde(flatten)]
    pub form: ProductForm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub id: ProductId,
    #[serde(flatten)]
    pub form: ProductForm,
}
