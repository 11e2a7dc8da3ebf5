use super::{Error, Jwk, Jwks};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::SignatureEncoding;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl Algorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::EdDsa => "EdDSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "EdDSA" => Ok(Self::EdDsa),
            other => Err(Error::UnsupportedAlg(other.to_string())),
        }
    }
}

/// Private key used to sign tokens.
#[derive(Clone)]
pub enum SigningKey {
    Rs256 {
        signer: Box<pkcs1v15::SigningKey<Sha256>>,
        public: RsaPublicKey,
    },
    EdDsa(ed25519_dalek::SigningKey),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey")
            .field(&self.algorithm())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Load an RSA private key (PKCS#8 or PKCS#1, PEM or DER).
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyParse`] if the key cannot be decoded.
    pub fn rs256_from_pem_or_der(pem_or_der: &[u8]) -> Result<Self, Error> {
        let private_key = decode_private_key(pem_or_der)?;
        let public = RsaPublicKey::from(&private_key);
        Ok(Self::Rs256 {
            signer: Box::new(pkcs1v15::SigningKey::<Sha256>::new(private_key)),
            public,
        })
    }

    #[must_use]
    pub fn ed25519_from_seed(seed: &[u8; 32]) -> Self {
        Self::EdDsa(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Rs256 { .. } => Algorithm::Rs256,
            Self::EdDsa(_) => Algorithm::EdDsa,
        }
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            Self::Rs256 { public, .. } => VerifyingKey::Rs256(public.clone()),
            Self::EdDsa(key) => VerifyingKey::EdDsa(key.verifying_key()),
        }
    }

    pub(super) fn sign(&self, input: &[u8]) -> Vec<u8> {
        match self {
            Self::Rs256 { signer, .. } => {
                let signature: pkcs1v15::Signature =
                    rsa::signature::Signer::sign(&**signer, input);
                signature.to_vec()
            }
            Self::EdDsa(key) => ed25519_dalek::Signer::sign(key, input).to_bytes().to_vec(),
        }
    }
}

/// Public key used to verify token signatures.
#[derive(Clone, Debug)]
pub enum VerifyingKey {
    Rs256(RsaPublicKey),
    EdDsa(ed25519_dalek::VerifyingKey),
}

impl VerifyingKey {
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Rs256(_) => Algorithm::Rs256,
            Self::EdDsa(_) => Algorithm::EdDsa,
        }
    }

    pub(super) fn verify(&self, input: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::Rs256(public) => {
                let verifying_key = pkcs1v15::VerifyingKey::<Sha256>::new(public.clone());
                let signature = pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                rsa::signature::Verifier::verify(&verifying_key, input, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
            Self::EdDsa(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::InvalidSignature)?;
                key.verify_strict(input, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
        }
    }

    /// Publish this key as a JWK.
    #[must_use]
    pub fn to_jwk(&self, kid: impl Into<String>) -> Jwk {
        match self {
            Self::Rs256(public) => Jwk::from_rsa_public_key(public, kid),
            Self::EdDsa(key) => Jwk::from_ed25519_public_key(key, kid),
        }
    }
}

/// Source of issuer keys, looked up by key id and algorithm.
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Private key for signing, if this source holds one.
    fn signing_key(&self, kid: &str, alg: Algorithm) -> Option<&SigningKey>;

    /// Public key for verification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKid`] if no key matches.
    fn verifying_key(&self, kid: &str, alg: Algorithm) -> Result<VerifyingKey, Error>;

    /// Public keys for publication.
    fn jwks(&self) -> Jwks;
}

/// In-memory signing keys, for a locally hosted issuer.
#[derive(Debug, Default, Clone)]
pub struct StaticKeySource {
    keys: Vec<(String, SigningKey)>,
}

impl StaticKeySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key(mut self, kid: impl Into<String>, key: SigningKey) -> Self {
        self.keys.push((kid.into(), key));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeySource for StaticKeySource {
    fn signing_key(&self, kid: &str, alg: Algorithm) -> Option<&SigningKey> {
        self.keys
            .iter()
            .find(|(id, key)| id == kid && key.algorithm() == alg)
            .map(|(_, key)| key)
    }

    fn verifying_key(&self, kid: &str, alg: Algorithm) -> Result<VerifyingKey, Error> {
        self.signing_key(kid, alg)
            .map(SigningKey::verifying_key)
            .ok_or_else(|| Error::UnknownKid(kid.to_string()))
    }

    fn jwks(&self) -> Jwks {
        Jwks {
            keys: self
                .keys
                .iter()
                .map(|(kid, key)| key.verifying_key().to_jwk(kid.clone()))
                .collect(),
        }
    }
}

/// Verification-only keys published by a remote issuer.
#[derive(Debug, Clone)]
pub struct JwksKeySource {
    jwks: Jwks,
}

impl JwksKeySource {
    #[must_use]
    pub fn new(jwks: Jwks) -> Self {
        Self { jwks }
    }
}

impl KeySource for JwksKeySource {
    fn signing_key(&self, _kid: &str, _alg: Algorithm) -> Option<&SigningKey> {
        None
    }

    fn verifying_key(&self, kid: &str, alg: Algorithm) -> Result<VerifyingKey, Error> {
        let jwk = self
            .jwks
            .find_by_kid(kid)
            .ok_or_else(|| Error::UnknownKid(kid.to_string()))?;
        let key = jwk.to_verifying_key()?;
        if key.algorithm() != alg {
            return Err(Error::UnsupportedAlg(alg.to_string()));
        }
        Ok(key)
    }

    fn jwks(&self) -> Jwks {
        self.jwks.clone()
    }
}

pub(super) fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| Error::KeyParse)?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(Error::KeyParse);
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}
