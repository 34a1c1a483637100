//! Verified-caller extractor.
//!
//! The access middleware verifies the token and stores an `Identity` in
//! request extensions; handlers take `IdentityExtractor` and never see the raw token.

mod core;

pub use core::IdentityExtractor;
