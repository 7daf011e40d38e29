use thiserror::Error;

/// Input rejections raised before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("enter a valid 10-digit mobile number")]
    InvalidPhone,
    #[error("enter the complete 6-digit code")]
    IncompleteCode,
    #[error("please fill all required fields")]
    MissingRequiredFields,
    #[error("describe the business type")]
    MissingBusinessType,
    #[error("name and quantity are required")]
    MissingProductBasics,
    #[error("enter 500 g and 1 kg prices")]
    InvalidWeightPrices,
    #[error("enter a price")]
    InvalidUnitPrice,
}
