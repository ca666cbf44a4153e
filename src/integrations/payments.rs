//! Hosted-checkout payment gateway.
//!
//! Payment requests are created with form-encoded calls authenticated by the
//! merchant's header credentials. The gateway answers with a link the buyer
//! is redirected to.

use crate::body::{BodyProcessor, BodyProcessors, WireBody};
use crate::{Client, Result};
use http::Method;
use serde::Deserialize;

/// Header carrying the merchant API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Header carrying the merchant auth token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Merchant credentials, sent as headers on every gateway call.
#[derive(Clone)]
pub struct MerchantCredentials {
    /// Sent as [`API_KEY_HEADER`].
    pub api_key: String,
    /// Sent as [`AUTH_TOKEN_HEADER`].
    pub auth_token: String,
}

impl std::fmt::Debug for MerchantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantCredentials")
            .field("api_key", &"<redacted>")
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// A payment the buyer is asked to complete.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// Amount in major units, as the gateway expects it (`"499.00"`).
    pub amount: String,
    /// Short description shown to the buyer.
    pub purpose: String,
    /// Prefills the buyer's name on the checkout page.
    pub buyer_name: Option<String>,
    /// Prefills the buyer's email.
    pub email: Option<String>,
    /// Prefills the buyer's phone number.
    pub phone: Option<String>,
    /// Where the buyer lands after paying.
    pub redirect_url: Option<String>,
    /// Server-to-server notification endpoint.
    pub webhook: Option<String>,
    /// Ask the gateway to email the payment link to the buyer.
    pub send_email: bool,
}

impl PaymentRequest {
    /// A request for `amount` with nothing prefilled.
    pub fn new(amount: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            purpose: purpose.into(),
            buyer_name: None,
            email: None,
            phone: None,
            redirect_url: None,
            webhook: None,
            send_email: false,
        }
    }
}

impl BodyProcessor for PaymentRequest {
    fn to_wire(&self) -> Result<WireBody> {
        let mut fields = vec![
            ("amount", self.amount.clone()),
            ("purpose", self.purpose.clone()),
        ];
        let optional = [
            ("buyer_name", &self.buyer_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("redirect_url", &self.redirect_url),
            ("webhook", &self.webhook),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.push((name, value.clone()));
            }
        }
        fields.push(("send_email", self.send_email.to_string()));
        Ok(WireBody::form(fields))
    }
}

/// The gateway's view of a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentLink {
    /// Gateway identifier of the payment request.
    pub id: String,
    /// Gateway status, for example `"Pending"` or `"Completed"`.
    pub status: String,
    /// Hosted checkout page for the buyer.
    #[serde(alias = "longurl")]
    pub checkout_url: String,
    /// Amount as echoed by the gateway.
    #[serde(default)]
    pub amount: Option<String>,
    /// Purpose as echoed by the gateway.
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Adapter for a hosted-checkout payment gateway.
///
/// Payments are created server side; the buyer is then sent to the returned
/// [`PaymentLink::checkout_url`].
#[derive(Debug, Clone)]
pub struct PaymentGateway {
    client: Client,
    credentials: MerchantCredentials,
    processors: BodyProcessors,
}

impl PaymentGateway {
    /// Wraps `client`, which must point at the gateway's API root.
    pub fn new(client: Client, credentials: MerchantCredentials) -> Self {
        let mut processors = BodyProcessors::new();
        processors.register_processor::<PaymentRequest>();
        Self {
            client,
            credentials,
            processors,
        }
    }

    /// Creates a payment and returns where to send the buyer.
    pub async fn create_payment(&self, payment: &PaymentRequest) -> Result<PaymentLink> {
        let spec = self
            .client
            .request(Method::POST, "/payment-requests/")
            .header(API_KEY_HEADER, &self.credentials.api_key)?
            .header(AUTH_TOKEN_HEADER, &self.credentials.auth_token)?
            .processed_body(&self.processors, payment)?
            .build()?;

        let link = self.client.fetch_one::<PaymentLink>(spec).await?.data;
        tracing::info!(
            destination = %self.client.destination(),
            payment_id = %link.id,
            "Payment request created"
        );
        Ok(link)
    }

    /// Current state of payment request `id`.
    pub async fn payment_status(&self, id: &str) -> Result<PaymentLink> {
        let spec = self
            .client
            .request(Method::GET, "/payment-requests/{id}/")
            .path_var("id", id)
            .header(API_KEY_HEADER, &self.credentials.api_key)?
            .header(AUTH_TOKEN_HEADER, &self.credentials.auth_token)?
            .build()?;
        Ok(self.client.fetch_one(spec).await?.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_request_encodes_as_form() {
        let mut payment = PaymentRequest::new("499.00", "Pro plan");
        payment.email = Some("ana@example.com".to_string());

        let wire = payment.to_wire().unwrap();
        assert_eq!(
            wire,
            WireBody::form([
                ("amount", "499.00"),
                ("purpose", "Pro plan"),
                ("email", "ana@example.com"),
                ("send_email", "false"),
            ])
        );
    }

    #[test]
    fn test_payment_link_accepts_longurl() {
        let link: PaymentLink = serde_json::from_str(
            r#"{"id":"pr_1","status":"Pending","longurl":"https://pay.example/pr_1"}"#,
        )
        .unwrap();
        assert_eq!(link.checkout_url, "https://pay.example/pr_1");
    }
}
