pub mod client;
pub mod memory;

pub use client::{
    CacheKey, Fingerprint, NoopVerificationCache, VerificationCache, VerificationResult,
};
pub use memory::MemoryVerificationCache;
