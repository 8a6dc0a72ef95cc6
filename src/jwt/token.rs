use super::jwks::{Jwks, decode_private_key};
use super::{Error, b64d, b64d_json, b64e_json, segments};
use base64ct::{Base64UrlUnpadded, Encoding};
use ring::signature::{ECDSA_P256_SHA256_FIXED, UnparsedPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Sha256, Sha384, Sha512};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Header and payload of a token, decoded but not verified.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DecodedToken {
    #[schema(value_type = Object)]
    pub header: Value,
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Decode a compact JWT for display. Never a trust decision: the signature is
/// not checked, and anything malformed yields `None`.
#[must_use]
pub fn decode_token_for_display(token: &str) -> Option<DecodedToken> {
    let (header, payload, _) = segments(token).ok()?;
    let header: Value = b64d_json(header).ok()?;
    let payload: Value = b64d_json(payload).ok()?;
    if !header.is_object() || !payload.is_object() {
        return None;
    }
    Some(DecodedToken { header, payload })
}

/// Claims of a token without verifying anything.
///
/// # Errors
/// Returns an error if the token is not a compact JWS with a JSON object payload.
pub fn decode_claims_unverified(token: &str) -> Result<Value, Error> {
    let (_, payload, _) = segments(token)?;
    let claims: Value = b64d_json(payload)?;
    if claims.is_object() {
        Ok(claims)
    } else {
        Err(Error::TokenFormat)
    }
}

/// Sign `claims` as an RS256 JWT.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed or the JSON cannot be encoded.
pub fn sign_rs256<T: Serialize>(
    private_key_pem_or_der: &[u8],
    kid: impl Into<String>,
    claims: &T,
) -> Result<String, Error> {
    let header = JwtHeader {
        alg: "RS256".to_string(),
        typ: Some("JWT".to_string()),
        kid: Some(kid.into()),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);

    let private_key = decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify the signature of a compact JWS against `jwks` and return its header and claims.
///
/// # Errors
///
/// Returns an error if the token is malformed, no key matches, the algorithm is
/// unsupported, or the signature does not verify.
pub fn verify_jws(token: &str, jwks: &Jwks) -> Result<(JwtHeader, Value), Error> {
    let (header_b64, claims_b64, sig_b64) = segments(token)?;
    let header: JwtHeader = b64d_json(header_b64)?;
    let jwk = jwks
        .find_key(header.kid.as_deref())
        .ok_or(Error::UnknownKid)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = b64d(sig_b64)?;

    match header.alg.as_str() {
        "RS256" => verify_rsa(
            &VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?),
            &signing_input,
            &signature,
        )?,
        "RS384" => verify_rsa(
            &VerifyingKey::<Sha384>::new(jwk.to_rsa_public_key()?),
            &signing_input,
            &signature,
        )?,
        "RS512" => verify_rsa(
            &VerifyingKey::<Sha512>::new(jwk.to_rsa_public_key()?),
            &signing_input,
            &signature,
        )?,
        "ES256" => {
            let point = jwk.to_p256_point()?;
            UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point)
                .verify(signing_input.as_bytes(), &signature)
                .map_err(|_| Error::InvalidSignature)?;
        }
        other => return Err(Error::UnsupportedAlg(other.to_string())),
    }

    let claims: Value = b64d_json(claims_b64)?;
    if !claims.is_object() {
        return Err(Error::TokenFormat);
    }
    Ok((header, claims))
}

fn verify_rsa(
    verifying_key: &impl Verifier<Signature>,
    signing_input: &str,
    signature: &[u8],
) -> Result<(), Error> {
    let signature = Signature::try_from(signature).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)
}

/// Verify an ID token: signature, then `iss`, `aud` and `exp`.
///
/// # Errors
///
/// Returns the first failing check.
pub fn verify_id_token(
    token: &str,
    jwks: &Jwks,
    expected_issuer: &str,
    expected_audience: &str,
    now_unix_seconds: i64,
) -> Result<Value, Error> {
    let (_, claims) = verify_jws(token, jwks)?;

    let issuer = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
    if issuer.trim_end_matches('/') != expected_issuer.trim_end_matches('/') {
        return Err(Error::InvalidIssuer);
    }

    let audience_ok = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected_audience,
        Some(Value::Array(values)) => values
            .iter()
            .any(|aud| aud.as_str() == Some(expected_audience)),
        _ => false,
    };
    if !audience_ok {
        return Err(Error::InvalidAudience);
    }

    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or(Error::MissingExpiry)?;
    if exp <= now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}
