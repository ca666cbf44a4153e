//! Redirect-style checkout gateway.
//!
//! The buyer is sent to a signed URL carrying the order. The result is read
//! back from the gateway's status query endpoint, which is signed the same way.

use crate::body::WireBody;
use crate::url_builder::UrlBuilder;
use crate::{Client, Error, RequestSpec, Result};
use http::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// Name of the parameter carrying the signature.
pub const SECURE_HASH_PARAM: &str = "secure_hash";

/// Signs the canonical form of a parameter set.
///
/// The canonical form is `k1=v1&k2=v2...` with keys in ascending order and no
/// percent-encoding.
pub trait PayloadSigner: Send + Sync {
    /// Returns the signature of `canonical`, as sent in [`SECURE_HASH_PARAM`].
    fn sign(&self, canonical: &str) -> String;
}

impl<F> PayloadSigner for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sign(&self, canonical: &str) -> String {
        self(canonical)
    }
}

/// Merchant account at the checkout gateway.
#[derive(Clone)]
pub struct CheckoutMerchant {
    /// Merchant identifier assigned by the gateway.
    pub merchant_id: String,
    /// Access code paired with `merchant_id`. Never printed by `Debug`.
    pub access_code: String,
}

impl std::fmt::Debug for CheckoutMerchant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutMerchant")
            .field("merchant_id", &self.merchant_id)
            .field("access_code", &"<redacted>")
            .finish()
    }
}

/// An order to be paid on the gateway's hosted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOrder {
    /// Merchant-side order reference, unique per attempt.
    pub order_ref: String,
    /// Amount in minor units.
    pub amount: u64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Free-text description shown on the payment page.
    pub order_info: String,
    /// Where the gateway sends the buyer back to.
    pub return_url: String,
    /// Language of the payment page, for example `"en"`.
    pub locale: String,
}

/// Outcome of a server-to-server status query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionStatus {
    /// Gateway response code; `"0"` means approved.
    pub response_code: String,
    /// Gateway's textual state of the transaction.
    pub transaction_status: String,
    /// Signature over the response, checked by the caller.
    pub secure_hash: String,
    /// Order reference as echoed by the gateway.
    #[serde(default)]
    pub order_ref: Option<String>,
    /// Amount as echoed by the gateway.
    #[serde(default)]
    pub amount: Option<String>,
    /// Human-readable explanation of the response code.
    #[serde(default)]
    pub message: Option<String>,
}

impl TransactionStatus {
    /// Returns `true` if the gateway approved the payment.
    pub fn is_approved(&self) -> bool {
        self.response_code == "0"
    }
}

/// Adapter for a redirect-style checkout gateway.
///
/// The buyer is redirected to a signed checkout URL; the outcome is later
/// confirmed with a status query through the client. Parameters are always
/// emitted in ascending key order so the signature covers exactly what is
/// sent.
pub struct RedirectCheckout {
    client: Client,
    checkout_url: Url,
    merchant: CheckoutMerchant,
    signer: Box<dyn PayloadSigner>,
}

impl std::fmt::Debug for RedirectCheckout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectCheckout")
            .field("client", &self.client)
            .field("checkout_url", &self.checkout_url.as_str())
            .field("merchant", &self.merchant)
            .finish_non_exhaustive()
    }
}

impl RedirectCheckout {
    /// `checkout_url` is the hosted payment page (sandbox or live); `client`
    /// talks to the status query endpoint.
    pub fn new(
        client: Client,
        checkout_url: impl AsRef<str>,
        merchant: CheckoutMerchant,
        signer: impl PayloadSigner + 'static,
    ) -> Result<Self> {
        Ok(Self {
            client,
            checkout_url: Url::parse(checkout_url.as_ref())?,
            merchant,
            signer: Box::new(signer),
        })
    }

    /// The signed URL to redirect the buyer to.
    pub fn checkout_url(&self, order: &CheckoutOrder) -> Result<Url> {
        if order.amount == 0 {
            return Err(Error::ConfigurationError(
                "Checkout amount must be positive".to_string(),
            ));
        }

        let mut params = self.merchant_params("pay");
        params.insert("amount", order.amount.to_string());
        params.insert("currency", order.currency.clone());
        params.insert("locale", order.locale.clone());
        params.insert("order_info", order.order_info.clone());
        params.insert("order_ref", order.order_ref.clone());
        params.insert("return_url", order.return_url.clone());

        let spec = RequestSpec::builder(Method::GET, "")
            .base_url(self.checkout_url.as_str())
            .query_params(self.sign(params))
            .build()?;
        UrlBuilder::new().build(&spec)
    }

    /// Asks the gateway for the state of `order_ref`.
    pub async fn query_status(&self, order_ref: &str) -> Result<TransactionStatus> {
        let mut params = self.merchant_params("query");
        params.insert("order_ref", order_ref.to_string());

        let spec = self
            .client
            .request(Method::POST, "/status")
            .body(WireBody::form(self.sign(params)))
            .build()?;

        let status = self.client.fetch_one::<TransactionStatus>(spec).await?.data;
        tracing::info!(
            destination = %self.client.destination(),
            order_ref = %order_ref,
            response_code = %status.response_code,
            "Checkout status received"
        );
        Ok(status)
    }

    fn merchant_params(&self, command: &str) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("access_code", self.merchant.access_code.clone()),
            ("command", command.to_string()),
            ("merchant", self.merchant.merchant_id.clone()),
            ("version", "1".to_string()),
        ])
    }

    /// Appends the signature to `params`, keeping ascending key order.
    fn sign(&self, params: BTreeMap<&'static str, String>) -> Vec<(&'static str, String)> {
        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let hash = self.signer.sign(&canonical);

        let mut signed: Vec<_> = params.into_iter().collect();
        signed.push((SECURE_HASH_PARAM, hash));
        signed
    }
}
