use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(VendorId);
id_newtype!(ProductId);
id_newtype!(OrderId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusinessType {
    Grocery,
    Veggies,
    Meat,
    Other(String),
}

impl BusinessType {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Grocery" => BusinessType::Grocery,
            "Veggies" => BusinessType::Veggies,
            "Meat" => BusinessType::Meat,
            other => BusinessType::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            BusinessType::Grocery => "Grocery",
            BusinessType::Veggies => "Veggies",
            BusinessType::Meat => "Meat",
            BusinessType::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductCategory {
    Veggies,
    Grocery,
    Other(String),
}

impl ProductCategory {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Veggies" => ProductCategory::Veggies,
            "Grocery" => ProductCategory::Grocery,
            other => ProductCategory::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ProductCategory::Veggies => "Veggies",
            ProductCategory::Grocery => "Grocery",
            ProductCategory::Other(name) => name,
        }
    }

    /// Veggies and Grocery sell by weight; everything else is per unit.
    pub fn is_weight_based(&self) -> bool {
        matches!(self, ProductCategory::Veggies | ProductCategory::Grocery)
    }
}

/// Weight-based items carry a 500 g price, a 1 kg price, and a minimum
/// order amount; unit items carry a single price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pricing {
    PerWeight {
        price_500: f64,
        price_1000: f64,
        min_price: f64,
    },
    PerUnit {
        price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct NewVendor {
    pub shop_name: String,
    pub owner_name: String,
    pub business_type: BusinessType,
    pub address: String,
    pub mobile: String,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub category: ProductCategory,
    pub pricing: Pricing,
}

/// Image names are derived from display names: lowercased, whitespace
/// stripped, `.jpeg` appended.
pub fn image_file_name(display_name: &str) -> String {
    let stem: String = display_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    format!("{stem}.jpeg")
}
