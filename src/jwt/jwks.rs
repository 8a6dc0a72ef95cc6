use super::Error;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Pick the verification key for a token header.
    ///
    /// With a `kid` only an exact match counts. Without one, a set holding a single
    /// signing key is unambiguous.
    #[must_use]
    pub fn find_key(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let mut signing = self.keys.iter().filter(|k| k.is_signing_key());
                match (signing.next(), signing.next()) {
                    (Some(key), None) => Some(key),
                    _ => None,
                }
            }
        }
    }

    /// Build a single-key JWKS from an RSA private key (PEM or DER, PKCS#8 or PKCS#1).
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_private_key_pem_or_der(
        private_key_pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self, Error> {
        let private_key = decode_private_key(private_key_pem_or_der)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            keys: vec![Jwk::from_rsa_public_key(&public_key, kid)],
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.into()),
            n: Some(Base64UrlUnpadded::encode_string(
                &public_key.n().to_bytes_be(),
            )),
            e: Some(Base64UrlUnpadded::encode_string(
                &public_key.e().to_bytes_be(),
            )),
            ..Self::default()
        }
    }

    fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().is_none_or(|u| u == "sig")
    }

    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not RSA or its parameters are invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, Error> {
        if self.kty != "RSA" {
            return Err(Error::KeyParse);
        }
        let n = decode_param(self.n.as_deref())?;
        let e = decode_param(self.e.as_deref())?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(Error::Rsa)
    }

    /// Uncompressed SEC1 point (`0x04 | x | y`) of a P-256 key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not an EC P-256 key.
    pub fn to_p256_point(&self) -> Result<Vec<u8>, Error> {
        if self.kty != "EC" || self.crv.as_deref() != Some("P-256") {
            return Err(Error::KeyParse);
        }
        let x = decode_param(self.x.as_deref())?;
        let y = decode_param(self.y.as_deref())?;
        if x.len() != 32 || y.len() != 32 {
            return Err(Error::KeyParse);
        }
        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(&x);
        point.extend_from_slice(&y);
        Ok(point)
    }
}

fn decode_param(value: Option<&str>) -> Result<Vec<u8>, Error> {
    let value = value.ok_or(Error::KeyParse)?;
    Base64UrlUnpadded::decode_vec(value).map_err(|_| Error::Base64)
}

pub(super) fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| Error::KeyParse)?;
        return RsaPrivateKey::from_pkcs8_pem(s)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(s))
            .map_err(|_| Error::KeyParse);
    }
    RsaPrivateKey::from_pkcs8_der(pem_or_der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(pem_or_der))
        .map_err(|_| Error::KeyParse)
}
