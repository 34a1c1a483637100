use std::{fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use clap::Parser;
use ed25519_dalek::{SigningKey, pkcs8::DecodePrivateKey};
use jsonwebtoken::Algorithm;
use token_check_gateway::services::auth::TokenIssuer;
use token_check_gateway::services::auth::issuer::IssuedClaims;
use uuid::Uuid;

/// Mint a compact JWT the gateway will accept, for local testing.
///
/// - HS256/HS384/HS512: `--secret` (or `--secret-file`), same value as GATEWAY_HMAC_SECRET
/// - EdDSA: `--ed25519-private-pem` (PKCS#8 PEM)
/// - `--print-jwk` also prints the JWK-set entry that verifies the token
#[derive(Parser, Debug)]
#[command(name = "token-gen", version, about)]
struct Args {
    /// Signature algorithm (HS256, HS384, HS512, EdDSA)
    #[arg(long, default_value = "HS256")]
    alg: String,

    /// Key id written to the header `kid`
    #[arg(long, default_value = "default")]
    kid: String,

    /// Shared HMAC secret
    #[arg(long, conflicts_with = "secret_file")]
    secret: Option<String>,

    /// File containing the shared HMAC secret (trailing newline is ignored)
    #[arg(long, value_name = "FILE")]
    secret_file: Option<PathBuf>,

    /// Ed25519 private key in PEM (PKCS#8)
    #[arg(long, value_name = "FILE")]
    ed25519_private_pem: Option<PathBuf>,

    /// Subject (`sub`)
    #[arg(long, default_value = "local-user")]
    sub: String,

    /// Issuer (`iss`)
    #[arg(long)]
    iss: Option<String>,

    /// Audience (`aud`)
    #[arg(long)]
    aud: Option<String>,

    /// Space separated scopes (`scope`)
    #[arg(long)]
    scope: Option<String>,

    /// Lifetime in seconds
    #[arg(long, default_value_t = 300)]
    ttl: u64,

    /// Override `nbf` offset in seconds from now (negative = in the past)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    nbf_offset: i64,

    /// Print the verifying JWK too
    #[arg(long, default_value_t = false)]
    print_jwk: bool,
}

fn read_secret(args: &Args) -> Result<Vec<u8>> {
    if let Some(secret) = &args.secret {
        return Ok(secret.as_bytes().to_vec());
    }
    if let Some(path) = &args.secret_file {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading secret file {}", path.display()))?;
        return Ok(raw.trim_end_matches(['\r', '\n']).as_bytes().to_vec());
    }
    bail!("--secret or --secret-file is required for {}", args.alg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let alg = Algorithm::from_str(&args.alg)
        .map_err(|_| anyhow::anyhow!("unknown algorithm: {}", args.alg))?;

    let (issuer, jwk) = match alg {
        Algorithm::EdDSA => {
            let path = args
                .ed25519_private_pem
                .as_ref()
                .context("--ed25519-private-pem is required for EdDSA")?;
            let pem = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let public = SigningKey::from_pkcs8_pem(&pem)
                .context("parsing Ed25519 private key")?
                .verifying_key();
            let jwk = serde_json::json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "kid": args.kid,
                "alg": "EdDSA",
                "use": "sig",
                "x": URL_SAFE_NO_PAD.encode(public.as_bytes()),
            });
            (TokenIssuer::ed25519_pem(&pem, args.kid.clone())?, jwk)
        }
        _ => {
            let secret = read_secret(&args)?;
            let jwk = serde_json::json!({
                "kty": "oct",
                "kid": args.kid,
                "alg": args.alg,
                "use": "sig",
                "k": URL_SAFE_NO_PAD.encode(&secret),
            });
            (TokenIssuer::hmac(alg, &secret, args.kid.clone())?, jwk)
        }
    };

    let now = chrono::Utc::now().timestamp();
    let ttl = i64::try_from(args.ttl).unwrap_or(i64::MAX);
    let claims = IssuedClaims {
        sub: args.sub.clone(),
        iss: args.iss.clone(),
        aud: args.aud.clone(),
        iat: now,
        nbf: now.saturating_add(args.nbf_offset),
        exp: now.saturating_add(ttl),
        jti: Uuid::new_v4().to_string(),
        scope: args.scope.clone(),
    };

    let token = issuer.sign(&claims)?;
    println!("{}", token);

    if args.print_jwk {
        println!("{}", serde_json::json!({ "keys": [jwk] }));
    }

    Ok(())
}
