//! Bearer token parsing.
//!
//! Nothing decoded here is trusted: header and claims are only turned into
//! JSON objects, and the signature segment is kept as received. Every failure
//! is a typed `ParseError`; attacker-controlled input never panics.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::services::auth::policy::DEFAULT_MAX_SEGMENT_LEN;
use crate::services::cache::Fingerprint;

pub type Claims = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("authorization header missing")]
    MissingHeader,
    #[error("malformed bearer token")]
    MalformedStructure,
    #[error("token segment exceeds the configured maximum length")]
    OversizedSegment,
    #[error("token segment is not base64url-encoded JSON object")]
    InvalidEncoding,
}

/// Decoded JOSE header. `alg` / `kid` / `typ` are picked out only when they are strings.
#[derive(Debug, Clone)]
pub struct TokenHeader {
    pub alg: Option<String>,
    pub kid: Option<String>,
    pub typ: Option<String>,
    pub fields: Map<String, Value>,
}

impl TokenHeader {
    fn from_fields(fields: Map<String, Value>) -> Self {
        let string = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_owned);
        Self {
            alg: string("alg"),
            kid: string("kid"),
            typ: string("typ"),
            fields,
        }
    }
}

/// A parsed, not yet verified, compact JWS.
#[derive(Clone)]
pub struct Token {
    raw: String,
    header: TokenHeader,
    claims: Claims,
    // `raw[..signing_input_len]` is `header_b64 "." claims_b64` exactly as received.
    signing_input_len: usize,
}

impl fmt::Debug for Token {
    // The raw token is a bearer credential; never print it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("header", &self.header)
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Token {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn signing_input(&self) -> &[u8] {
        self.raw[..self.signing_input_len].as_bytes()
    }

    /// Signature segment, still base64url text.
    pub fn signature_segment(&self) -> &str {
        &self.raw[self.signing_input_len + 1..]
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.raw)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenParser {
    max_segment_len: usize,
}

impl Default for TokenParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEGMENT_LEN)
    }
}

impl TokenParser {
    pub fn new(max_segment_len: usize) -> Self {
        Self { max_segment_len }
    }

    /// Parse the value of an `Authorization` header (`None` when absent).
    pub fn parse(&self, authorization: Option<&str>) -> Result<Token, ParseError> {
        let value = authorization
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingHeader)?;

        let compact = strip_bearer(value).ok_or(ParseError::MalformedStructure)?;
        self.parse_compact(compact)
    }

    /// Parse a compact token without the `Bearer ` scheme.
    pub fn parse_compact(&self, compact: &str) -> Result<Token, ParseError> {
        // Cheap upper bound before splitting anything.
        if compact.len() > self.max_segment_len.saturating_mul(3).saturating_add(2) {
            return Err(ParseError::OversizedSegment);
        }

        let mut parts = compact.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::MalformedStructure);
        };

        if header_b64.is_empty() || claims_b64.is_empty() {
            return Err(ParseError::MalformedStructure);
        }

        for segment in [header_b64, claims_b64, signature_b64] {
            if segment.len() > self.max_segment_len {
                return Err(ParseError::OversizedSegment);
            }
            if !is_base64url(segment) {
                return Err(ParseError::MalformedStructure);
            }
        }

        let header = TokenHeader::from_fields(decode_object(header_b64)?);
        let claims = decode_object(claims_b64)?;

        Ok(Token {
            raw: compact.to_owned(),
            header,
            claims,
            signing_input_len: header_b64.len() + 1 + claims_b64.len(),
        })
    }
}

// `Bearer <token>`: scheme is case-insensitive, exactly one space, no other whitespace.
fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }
    if token.is_empty() || token.contains(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    Some(token)
}

fn is_base64url(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn decode_object(segment: &str) -> Result<Map<String, Value>, ParseError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| ParseError::InvalidEncoding)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ParseError::InvalidEncoding),
    }
}
