//! JWKS publication.
//!
//! The document is the union of the active *publishable* verification
//! keys. Symmetric identities have no public half and are skipped.

use serde::Serialize;

use super::identity::VerificationKey;

/// A JWKS response body.
#[derive(Debug, Clone, Serialize)]
pub struct JwksDocument {
    /// The published keys, ascending by kid
    pub keys: Vec<Jwk>,
}

/// One key of a JWKS document.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    /// Key type
    pub kty: &'static str,
    /// Signature algorithm
    pub alg: &'static str,
    /// Always `"sig"`
    #[serde(rename = "use")]
    pub public_key_use: &'static str,
    /// Key id
    pub kid: String,
    /// RSA modulus, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl JwksDocument {
    /// Build the document from the verification index, dropping keys with
    /// no publishable material.
    pub fn from_keys<'a>(keys: impl Iterator<Item = &'a VerificationKey>) -> Self {
        let keys = keys
            .filter_map(|key| {
                let rsa = key.rsa.as_ref()?;
                Some(Jwk {
                    kty: "RSA",
                    alg: key.algorithm.name(),
                    public_key_use: "sig",
                    kid: key.kid.clone(),
                    n: Some(rsa.n.clone()),
                    e: Some(rsa.e.clone()),
                })
            })
            .collect();
        Self { keys }
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::DecodingKey;

    use super::*;
    use crate::token::identity::{RsaComponents, SigningAlgorithm};

    fn rsa_key(kid: &str) -> VerificationKey {
        VerificationKey {
            kid: kid.to_string(),
            issuer: "https://issuer.test".to_string(),
            audience: "aud://r1".to_string(),
            algorithm: SigningAlgorithm::RS256,
            rsa: Some(RsaComponents {
                n: "sXchYvVoTHU".to_string(),
                e: "AQAB".to_string(),
            }),
            decoding_key: DecodingKey::from_secret(b"placeholder"),
        }
    }

    fn hs_key(kid: &str) -> VerificationKey {
        VerificationKey {
            kid: kid.to_string(),
            issuer: "https://issuer.test".to_string(),
            audience: "aud://r2".to_string(),
            algorithm: SigningAlgorithm::HS256,
            rsa: None,
            decoding_key: DecodingKey::from_secret(b"placeholder"),
        }
    }

    #[test]
    fn document_carries_rsa_keys_in_standard_form() {
        // GIVEN: one RSA and one symmetric key
        let keys = [rsa_key("kid-rsa"), hs_key("kid-hs")];

        // WHEN: the document is built
        let doc = JwksDocument::from_keys(keys.iter());

        // THEN: only the RSA key is published, with the standard fields
        assert_eq!(doc.keys.len(), 1);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["keys"][0]["kty"], "RSA");
        assert_eq!(json["keys"][0]["alg"], "RS256");
        assert_eq!(json["keys"][0]["use"], "sig");
        assert_eq!(json["keys"][0]["kid"], "kid-rsa");
        assert_eq!(json["keys"][0]["e"], "AQAB");
    }

    #[test]
    fn symmetric_only_index_publishes_empty_set() {
        let keys = [hs_key("kid-1")];
        let doc = JwksDocument::from_keys(keys.iter());
        assert!(doc.keys.is_empty());
        assert_eq!(serde_json::to_string(&doc).unwrap(), r#"{"keys":[]}"#);
    }
}
