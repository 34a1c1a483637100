mod identity;

pub use identity::IdentityExtractor;
