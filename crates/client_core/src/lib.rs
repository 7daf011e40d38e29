use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{
        image_file_name, BusinessType, NewProduct, NewVendor, Pricing, ProductId, VendorId,
    },
    error::ValidationError,
    protocol::{
        AddProductRequest, LinkUidRequest, LinkUidResponse, OrderRecord, ProductForm,
        ProductRecord, RegisterVendorRequest, UpdateProductRequest,
    },
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::info;

pub mod order_feed;
pub use order_feed::{FeedEvent, FeedState, OrderFeed, ORDER_POLL_PERIOD};

/// Dialing prefix prepended to the 10-digit number the vendor types in.
pub const PHONE_COUNTRY_PREFIX: &str = "+91";

/// Durable single-user session state. The one key that matters is the linked
/// vendor id; it survives process restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn vendor_id(&self) -> Result<Option<VendorId>>;
    async fn set_vendor_id(&self, vendor_id: VendorId) -> Result<()>;
    async fn clear_vendor_id(&self) -> Result<()>;
}

#[async_trait]
impl SessionStore for Storage {
    async fn vendor_id(&self) -> Result<Option<VendorId>> {
        Storage::vendor_id(self).await
    }

    async fn set_vendor_id(&self, vendor_id: VendorId) -> Result<()> {
        Storage::set_vendor_id(self, vendor_id).await
    }

    async fn clear_vendor_id(&self) -> Result<()> {
        Storage::clear_vendor_id(self).await
    }
}

/// Outcome of a confirmed phone challenge: the canonical number and the
/// provider uid the backend links to a vendor row.
#[derive(Debug, Clone)]
pub struct VerifiedPhone {
    pub phone_number: String,
    pub uid: String,
}

/// A verification code that has been sent and is waiting to be confirmed.
#[async_trait]
pub trait PendingVerification: Send + Sync {
    async fn confirm(&self, code: &str) -> Result<VerifiedPhone>;
}

/// Phone sign-in provider. Production wires the hosted auth service; tests
/// substitute doubles.
#[async_trait]
pub trait PhoneVerifier: Send + Sync {
    async fn begin_verification(&self, phone_number: &str) -> Result<Arc<dyn PendingVerification>>;
    async fn sign_out(&self) -> Result<()>;
}

/// Default verifier for builds without an auth provider wired in. Sign-in
/// fails; sign-out has nothing to end and succeeds.
pub struct MissingPhoneVerifier;

#[async_trait]
impl PhoneVerifier for MissingPhoneVerifier {
    async fn begin_verification(
        &self,
        _phone_number: &str,
    ) -> Result<Arc<dyn PendingVerification>> {
        Err(anyhow!("phone verification not available in this build"))
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }
}

/// Thin wrapper over the vendor backend's REST surface. Paths mirror the
/// backend controller routes, including their mixed casing.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
        }
    }

    pub async fn link_vendor_uid(&self, request: &LinkUidRequest) -> Result<VendorId> {
        let response: LinkUidResponse = self
            .http
            .post(format!("{}/Vendors/link-uid", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.vendor_id)
    }

    pub async fn register_vendor(&self, request: &RegisterVendorRequest) -> Result<()> {
        self.http
            .post(format!("{}/Vendors/register", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn orders_for_vendor(&self, vendor_id: VendorId) -> Result<Vec<OrderRecord>> {
        let orders = self
            .http
            .get(format!("{}/Orders/vendor/{}", self.base_url, vendor_id.0))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(orders)
    }

    pub async fn products_for_vendor(&self, vendor_id: VendorId) -> Result<Vec<ProductRecord>> {
        let products = self
            .http
            .get(format!("{}/Product/{}", self.base_url, vendor_id.0))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(products)
    }

    pub async fn product(&self, product_id: ProductId) -> Result<ProductRecord> {
        let product = self
            .http
            .get(format!("{}/Product/single/{}", self.base_url, product_id.0))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(product)
    }

    pub async fn add_product(&self, request: &AddProductRequest) -> Result<()> {
        self.http
            .post(format!("{}/Product/add", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn update_product(&self, request: &UpdateProductRequest) -> Result<()> {
        self.http
            .put(format!("{}/Product/update/{}", self.base_url, request.id.0))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Default)]
struct VendorClientState {
    pending_verification: Option<Arc<dyn PendingVerification>>,
}

/// Vendor-facing operations: phone sign-in, registration and catalog
/// management. Order polling lives in [`OrderFeed`].
pub struct VendorClient {
    api: ApiClient,
    session: Arc<dyn SessionStore>,
    verifier: Arc<dyn PhoneVerifier>,
    inner: Mutex<VendorClientState>,
}

impl VendorClient {
    pub fn new(api: ApiClient, session: Arc<dyn SessionStore>) -> Self {
        Self::new_with_verifier(api, session, Arc::new(MissingPhoneVerifier))
    }

    pub fn new_with_verifier(
        api: ApiClient,
        session: Arc<dyn SessionStore>,
        verifier: Arc<dyn PhoneVerifier>,
    ) -> Self {
        Self {
            api,
            session,
            verifier,
            inner: Mutex::new(VendorClientState::default()),
        }
    }

    /// Sends a verification code to a 10-digit mobile number.
    pub async fn start_sign_in(&self, phone: &str) -> Result<()> {
        if !is_ten_digit_number(phone) {
            return Err(ValidationError::InvalidPhone.into());
        }
        let full_number = format!("{PHONE_COUNTRY_PREFIX}{phone}");
        let pending = self.verifier.begin_verification(&full_number).await?;
        self.inner.lock().await.pending_verification = Some(pending);
        info!("verification code sent");
        Ok(())
    }

    /// Confirms the 6-digit code, links the verified number to its vendor row
    /// and persists the vendor id. A rejected code leaves the challenge in
    /// place so the caller can retry.
    pub async fn confirm_sign_in(&self, code: &str) -> Result<VendorId> {
        if !is_six_digit_code(code) {
            return Err(ValidationError::IncompleteCode.into());
        }
        let pending = self
            .inner
            .lock()
            .await
            .pending_verification
            .clone()
            .ok_or_else(|| anyhow!("no verification in progress: call start_sign_in first"))?;
        let verified = pending.confirm(code).await?;
        let vendor_id = self
            .api
            .link_vendor_uid(&LinkUidRequest {
                phone_number: verified.phone_number,
                firebase_uid: verified.uid,
            })
            .await?;
        self.session.set_vendor_id(vendor_id).await?;
        self.inner.lock().await.pending_verification = None;
        info!(vendor_id = vendor_id.0, "vendor signed in");
        Ok(vendor_id)
    }

    /// Clears the stored vendor id and ends the provider session.
    pub async fn sign_out(&self) -> Result<()> {
        self.session.clear_vendor_id().await?;
        self.verifier.sign_out().await?;
        self.inner.lock().await.pending_verification = None;
        info!("vendor signed out");
        Ok(())
    }

    pub async fn session_vendor_id(&self) -> Result<Option<VendorId>> {
        self.session.vendor_id().await
    }

    /// Registers a new shop. The backend keeps the row unverified until an
    /// operator approves it.
    pub async fn register(&self, vendor: &NewVendor) -> Result<()> {
        validate_vendor(vendor)?;
        let request = RegisterVendorRequest {
            shop_name: vendor.shop_name.clone(),
            owner_name: vendor.owner_name.clone(),
            shop_image_url: image_file_name(&vendor.shop_name),
            business_type: vendor.business_type.label().to_string(),
            address: vendor.address.clone(),
            mobile: vendor.mobile.clone(),
            is_verified: false,
        };
        self.api.register_vendor(&request).await?;
        info!(shop = %request.shop_name, "vendor registration submitted");
        Ok(())
    }

    pub async fn products(&self) -> Result<Vec<ProductRecord>> {
        let vendor_id = self.require_vendor_id().await?;
        self.api.products_for_vendor(vendor_id).await
    }

    /// Case-insensitive name/category filter over the vendor's catalog.
    pub async fn search_products(&self, query: &str) -> Result<Vec<ProductRecord>> {
        let mut products = self.products().await?;
        products.retain(|product| product.matches_search(query));
        Ok(products)
    }

    pub async fn product(&self, product_id: ProductId) -> Result<ProductRecord> {
        self.api.product(product_id).await
    }

    pub async fn add_product(&self, product: &NewProduct) -> Result<()> {
        validate_product(product)?;
        let vendor_id = self.require_vendor_id().await?;
        let request = AddProductRequest {
            vendor_id,
            form: ProductForm::from(product),
        };
        self.api.add_product(&request).await?;
        info!(name = %product.name, "product added");
        Ok(())
    }

    pub async fn update_product(&self, product_id: ProductId, product: &NewProduct) -> Result<()> {
        validate_product(product)?;
        let request = UpdateProductRequest {
            id: product_id,
            form: ProductForm::from(product),
        };
        self.api.update_product(&request).await?;
        info!(product_id = product_id.0, "product updated");
        Ok(())
    }

    async fn require_vendor_id(&self) -> Result<VendorId> {
        self.session
            .vendor_id()
            .await?
            .ok_or_else(|| anyhow!("not signed in: no vendor id in session"))
    }
}

fn is_ten_digit_number(phone: &str) -> bool {
    phone.len() == 10 && phone.chars().all(|c| c.is_ascii_digit())
}

fn is_six_digit_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

fn validate_vendor(vendor: &NewVendor) -> Result<(), ValidationError> {
    if vendor.shop_name.trim().is_empty()
        || vendor.owner_name.trim().is_empty()
        || vendor.address.trim().is_empty()
        || vendor.mobile.trim().is_empty()
    {
        return Err(ValidationError::MissingRequiredFields);
    }
    if let BusinessType::Other(name) = &vendor.business_type {
        if name.trim().is_empty() {
            return Err(ValidationError::MissingBusinessType);
        }
    }
    Ok(())
}

fn validate_product(product: &NewProduct) -> Result<(), ValidationError> {
    if product.name.trim().is_empty() || product.quantity <= 0 {
        return Err(ValidationError::MissingProductBasics);
    }
    match (&product.pricing, product.category.is_weight_based()) {
        (
            Pricing::PerWeight {
                price_500,
                price_1000,
                ..
            },
            true,
        ) => {
            if *price_500 <= 0.0 || *price_1000 <= 0.0 {
                return Err(ValidationError::InvalidWeightPrices);
            }
        }
        (Pricing::PerUnit { price }, false) => {
            if *price <= 0.0 {
                return Err(ValidationError::InvalidUnitPrice);
            }
        }
        (_, true) => return Err(ValidationError::InvalidWeightPrices),
        (_, false) => return Err(ValidationError::InvalidUnitPrice),
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
