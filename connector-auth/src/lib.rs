//! # Connector Auth
//!
//! OAuth token lifecycle for the Google Drive connector.
//!
//! ## Overview
//!
//! The [`TokenProvider`] produces a valid bearer token per account, caching
//! in memory, falling back to the credential store, and exchanging refresh
//! tokens or service-account assertions as needed. The whole acquisition
//! path is serialised so at most one refresh is ever in flight.

pub mod error;
pub mod provider;
pub mod service_account;
pub mod token;

pub use error::{AuthError, Result};
pub use provider::TokenProvider;
pub use service_account::{ServiceAccountKey, ServiceAccountSigner};
pub use token::AccessToken;
