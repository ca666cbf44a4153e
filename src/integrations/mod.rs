//! Adapters for concrete remote services.
//!
//! Each adapter wraps a [`Client`](crate::Client) for its destination and
//! exposes the handful of operations the application needs, in the
//! application's terms. Errors are passed through unchanged.

mod checkout;
mod payments;
mod project_tracker;

pub use checkout::{
    CheckoutMerchant, CheckoutOrder, PayloadSigner, RedirectCheckout, TransactionStatus,
    SECURE_HASH_PARAM,
};
pub use payments::{
    MerchantCredentials, PaymentGateway, PaymentLink, PaymentRequest, API_KEY_HEADER,
    AUTH_TOKEN_HEADER,
};
pub use project_tracker::{Board, Member, ProjectTracker, DEFAULT_SCOPE};
