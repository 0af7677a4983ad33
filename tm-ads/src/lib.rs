//! tm-ads - Google Ads integration
//!
//! - OAuth: consent URL, authorization-code exchange, refresh with retry
//! - Enhanced conversions upload with partial-failure inspection
//! - Spend report export to CSV

pub mod client;
pub mod conversions;
pub mod error;
pub mod oauth;
pub mod reports;

pub use client::{AdsClientConfig, AdsCredentials};
pub use conversions::{ClickConversion, ConversionFailure, ConversionUploader, UploadOutcome};
pub use error::{AdsError, Result};
pub use oauth::{RetryPolicy, TokenProvider};
pub use reports::{Bucket, SpendReporter, SpendRow};
