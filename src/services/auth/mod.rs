pub mod claims;
pub mod factory;
pub mod filter;
pub mod identity;
pub mod issuer;
pub mod keys;
pub mod policy;
pub mod provider;
pub mod signature;
pub mod token;

pub use factory::{Gateway, build_gateway};
pub use filter::{Decision, GatewayFilter, ReasonCode, Rejection};
pub use identity::Identity;
pub use issuer::TokenIssuer;
pub use keys::{KeySet, KeyStore, VerificationKey};
pub use policy::Policy;
pub use provider::{KeyProvider, spawn_key_refresh};
