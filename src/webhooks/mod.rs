/// Inbound payment-provider webhooks
pub mod signature;
pub mod stripe;

pub use signature::{signature_header, verify_signature, SIGNATURE_HEADER};
pub use stripe::{StripeEventEnvelope, StripeEventKind, WebhookOutcome, WebhookProcessor};
