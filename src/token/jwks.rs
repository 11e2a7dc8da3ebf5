use super::{Error, VerifyingKey};
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
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

    /// Serialize this JWKS to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Public JWK for an `RSA` or `OKP` (Ed25519) signing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    pub kid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            crv: None,
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            n: Some(Base64UrlUnpadded::encode_string(
                &public_key.n().to_bytes_be(),
            )),
            e: Some(Base64UrlUnpadded::encode_string(
                &public_key.e().to_bytes_be(),
            )),
            x: None,
        }
    }

    #[must_use]
    pub fn from_ed25519_public_key(
        public_key: &ed25519_dalek::VerifyingKey,
        kid: impl Into<String>,
    ) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: Some("Ed25519".to_string()),
            alg: Some("EdDSA".to_string()),
            key_use: Some("sig".to_string()),
            kid: kid.into(),
            n: None,
            e: None,
            x: Some(Base64UrlUnpadded::encode_string(public_key.as_bytes())),
        }
    }

    /// Convert this JWK to a verification key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key type is unsupported, the base64url values cannot
    /// be decoded, or the key material is invalid.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, Error> {
        match (self.kty.as_str(), self.crv.as_deref()) {
            ("RSA", _) => {
                let n_bytes = decode_member(self.n.as_deref())?;
                let e_bytes = decode_member(self.e.as_deref())?;
                let n = BigUint::from_bytes_be(&n_bytes);
                let e = BigUint::from_bytes_be(&e_bytes);
                Ok(VerifyingKey::Rs256(RsaPublicKey::new(n, e)?))
            }
            ("OKP", Some("Ed25519")) => {
                let x = decode_member(self.x.as_deref())?;
                let bytes: [u8; 32] = x.as_slice().try_into().map_err(|_| Error::KeyParse)?;
                let key =
                    ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| Error::KeyParse)?;
                Ok(VerifyingKey::EdDsa(key))
            }
            (kty, _) => Err(Error::UnsupportedAlg(kty.to_string())),
        }
    }
}

fn decode_member(value: Option<&str>) -> Result<Vec<u8>, Error> {
    let value = value.ok_or(Error::KeyParse)?;
    Base64UrlUnpadded::decode_vec(value).map_err(|_| Error::Base64)
}
