//! Verification keys, key sets and the rotating key store.
//!
//! A `KeySet` is never mutated after construction. Rotation builds a new set
//! and swaps it into the `KeyStore` atomically, so a request sees either the
//! old set or the new one, never a mix.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use ed25519_dalek::VerifyingKey;
use ed25519_dalek::pkcs8::DecodePublicKey;
use jsonwebtoken::Algorithm;
use thiserror::Error;

/// HMAC secrets shorter than this are refused (RFC 7518 §3.2 for HS256).
pub const MIN_HMAC_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key set is empty")]
    EmptyKeySet,
    #[error("duplicate key id: {0}")]
    DuplicateKid(String),
    #[error("key '{kid}': hmac secret too short ({len} bytes, need {min})", min = MIN_HMAC_SECRET_LEN)]
    WeakSecret { kid: String, len: usize },
    #[error("key '{kid}': invalid key material: {reason}")]
    InvalidKeyMaterial { kid: String, reason: String },
    #[error("key '{kid}': algorithm {alg} does not match the key type")]
    AlgorithmMismatch { kid: String, alg: String },
    #[error("invalid jwk set: {0}")]
    InvalidJwkSet(String),
    #[error("failed to read key source: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Ed25519,
}

impl KeyFamily {
    /// The key family able to verify `alg`, if the gateway implements it.
    pub fn for_algorithm(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Some(Self::Hmac),
            Algorithm::EdDSA => Some(Self::Ed25519),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Hmac(Arc<[u8]>),
    Ed25519(VerifyingKey),
}

impl KeyMaterial {
    pub fn family(&self) -> KeyFamily {
        match self {
            Self::Hmac(_) => KeyFamily::Hmac,
            Self::Ed25519(_) => KeyFamily::Ed25519,
        }
    }
}

/// A single verification key.
///
/// Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    material: KeyMaterial,
    algorithm: Option<Algorithm>,
    // Unix seconds after which a rotated-out key stops verifying.
    retire_at: Option<i64>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.material.family())
            .field("algorithm", &self.algorithm)
            .field("retire_at", &self.retire_at)
            .finish()
    }
}

impl VerificationKey {
    pub fn hmac(kid: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, KeyError> {
        let kid = kid.into();
        let secret = secret.as_ref();
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(KeyError::WeakSecret {
                kid,
                len: secret.len(),
            });
        }
        Ok(Self {
            kid,
            material: KeyMaterial::Hmac(Arc::from(secret)),
            algorithm: None,
            retire_at: None,
        })
    }

    /// Ed25519 public key from its raw 32 bytes.
    pub fn ed25519(kid: impl Into<String>, public_key: &[u8]) -> Result<Self, KeyError> {
        let kid = kid.into();
        let bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| KeyError::InvalidKeyMaterial {
                kid: kid.clone(),
                reason: format!("expected 32 bytes, got {}", public_key.len()),
            })?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| KeyError::InvalidKeyMaterial {
            kid: kid.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_verifying_key(kid, key))
    }

    /// Ed25519 public key from an SPKI PEM document (`-----BEGIN PUBLIC KEY-----`).
    pub fn ed25519_from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        let kid = kid.into();
        let key =
            VerifyingKey::from_public_key_pem(pem).map_err(|e| KeyError::InvalidKeyMaterial {
                kid: kid.clone(),
                reason: format!("invalid ed25519 public key pem: {}", e),
            })?;
        Ok(Self::from_verifying_key(kid, key))
    }

    pub fn from_verifying_key(kid: impl Into<String>, key: VerifyingKey) -> Self {
        Self {
            kid: kid.into(),
            material: KeyMaterial::Ed25519(key),
            algorithm: None,
            retire_at: None,
        }
    }

    /// Pin the key to one algorithm (e.g. a JWK `alg` member).
    pub fn with_algorithm(mut self, alg: Algorithm) -> Result<Self, KeyError> {
        if KeyFamily::for_algorithm(alg) != Some(self.family()) {
            return Err(KeyError::AlgorithmMismatch {
                kid: self.kid,
                alg: format!("{:?}", alg),
            });
        }
        self.algorithm = Some(alg);
        Ok(self)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.material.family()
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn retire_at(&self) -> Option<i64> {
        self.retire_at
    }

    pub fn is_usable_at(&self, now: i64) -> bool {
        self.retire_at.is_none_or(|deadline| now <= deadline)
    }

    /// Whether this key may verify a signature made with `alg`.
    pub fn accepts(&self, alg: Algorithm) -> bool {
        KeyFamily::for_algorithm(alg) == Some(self.family())
            && self.algorithm.is_none_or(|pinned| pinned == alg)
    }

    fn same_key(&self, other: &Self) -> bool {
        self.kid == other.kid && self.algorithm == other.algorithm && self.material == other.material
    }
}

/// Ordered collection of verification keys plus the generation it was built at.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
    generation: u64,
}

impl KeySet {
    pub fn new(keys: Vec<VerificationKey>) -> Result<Self, KeyError> {
        check_incoming(&keys)?;
        Ok(Self {
            keys,
            generation: 0,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationKey> {
        self.keys.iter()
    }

    /// Kids are unique within a set.
    pub fn find(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    /// Keys that may verify a token declaring `alg` (and `kid`, when present), in set order.
    ///
    /// A token naming a `kid` is only ever checked against keys with that id.
    pub fn candidates<'a>(
        &'a self,
        kid: Option<&'a str>,
        alg: Algorithm,
        now: i64,
    ) -> impl Iterator<Item = &'a VerificationKey> + 'a {
        self.keys.iter().filter(move |key| {
            kid.is_none_or(|kid| key.kid == kid) && key.accepts(alg) && key.is_usable_at(now)
        })
    }

    fn active(&self) -> impl Iterator<Item = &VerificationKey> {
        self.keys.iter().filter(|key| key.retire_at.is_none())
    }

    fn has_same_active_keys(&self, incoming: &[VerificationKey]) -> bool {
        let active: Vec<&VerificationKey> = self.active().collect();
        active.len() == incoming.len()
            && active.iter().zip(incoming).all(|(a, b)| a.same_key(b))
    }

    /// Build the successor set: incoming keys first, then previously active keys
    /// that disappeared, retiring at `now + grace_seconds`.
    fn rotated(
        &self,
        incoming: Vec<VerificationKey>,
        grace_seconds: u64,
        now: i64,
    ) -> Result<KeySet, KeyError> {
        check_incoming(&incoming)?;

        let incoming_kids: HashSet<&str> = incoming.iter().map(|k| k.kid.as_str()).collect();
        let deadline = now.saturating_add(i64::try_from(grace_seconds).unwrap_or(i64::MAX));

        let retiring: Vec<VerificationKey> = self
            .keys
            .iter()
            .filter(|key| !incoming_kids.contains(key.kid.as_str()) && key.is_usable_at(now))
            .map(|key| {
                let mut key = key.clone();
                key.retire_at = Some(key.retire_at.map_or(deadline, |at| at.min(deadline)));
                key
            })
            .collect();

        let mut keys = incoming;
        keys.extend(retiring);

        Ok(KeySet {
            keys,
            generation: self.generation + 1,
        })
    }
}

fn check_incoming(keys: &[VerificationKey]) -> Result<(), KeyError> {
    if keys.is_empty() {
        return Err(KeyError::EmptyKeySet);
    }
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.kid.as_str()) {
            return Err(KeyError::DuplicateKid(key.kid.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    Unchanged { generation: u64 },
    Rotated { generation: u64, retiring: usize },
}

/// Holder of the current `KeySet`.
///
/// Reads are lock-free; rotations are serialised through a single writer lock
/// and published with one atomic swap.
pub struct KeyStore {
    current: ArcSwap<KeySet>,
    writer: Mutex<()>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        f.debug_struct("KeyStore")
            .field("generation", &current.generation)
            .field("keys", &current.keys.len())
            .finish()
    }
}

impl KeyStore {
    pub fn new(initial: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    pub fn rotate(
        &self,
        incoming: Vec<VerificationKey>,
        grace_seconds: u64,
        now: i64,
    ) -> Result<RotationOutcome, KeyError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load_full();

        if current.has_same_active_keys(&incoming) {
            return Ok(RotationOutcome::Unchanged {
                generation: current.generation,
            });
        }

        let next = current.rotated(incoming, grace_seconds, now)?;
        let outcome = RotationOutcome::Rotated {
            generation: next.generation,
            retiring: next.keys.iter().filter(|k| k.retire_at.is_some()).count(),
        };
        self.current.store(Arc::new(next));
        Ok(outcome)
    }
}
