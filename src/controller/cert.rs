//! # Certificate Generator
//!
//! Produces the CA bundle, serving certificate and private key used by the
//! webhook. A fresh self-signed CA is minted for each rotation; the previous
//! CA stays in the published bundle until it expires, which lets the API
//! server keep trusting pods that still serve the old material.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Secret;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;

use crate::constants::{
    CA_CERT_KEY, CERT_NOT_AFTER_ANNOTATION, CERT_NOT_BEFORE_ANNOTATION, PREVIOUS_CA_CERT_KEY,
    PREVIOUS_CA_NOT_AFTER_ANNOTATION, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::controller::hash::hash_serving_cert;
use crate::controller::rotation::CertValidity;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate signing failed: {0}")]
    Signing(String),
    #[error("invalid DNS name '{name}': {reason}")]
    InvalidDnsName { name: String, reason: String },
    #[error("invalid validity window: {0}")]
    InvalidValidity(String),
}

/// Freshly generated serving material
#[derive(Clone, PartialEq, Eq)]
pub struct ServingCertBundle {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub validity: CertValidity,
}

impl std::fmt::Debug for ServingCertBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingCertBundle")
            .field("validity", &self.validity)
            .field("key_pem", &"***")
            .finish_non_exhaustive()
    }
}

/// Source of serving certificates
pub trait CertGenerator: Send + Sync + std::fmt::Debug {
    /// Generate a CA and a CA-signed serving certificate for `dns_names`
    /// valid from `now` for `validity`.
    ///
    /// # Errors
    ///
    /// Returns a [`CertError`] when key generation or signing fails.
    fn generate(
        &self,
        dns_names: &[String],
        validity: Duration,
        now: DateTime<Utc>,
    ) -> Result<ServingCertBundle, CertError>;
}

/// [`CertGenerator`] backed by `rcgen`
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenCertGenerator;

impl CertGenerator for RcgenCertGenerator {
    fn generate(
        &self,
        dns_names: &[String],
        validity: Duration,
        now: DateTime<Utc>,
    ) -> Result<ServingCertBundle, CertError> {
        if validity <= Duration::zero() {
            return Err(CertError::InvalidValidity(format!(
                "validity must be positive, got {}s",
                validity.num_seconds()
            )));
        }
        let Some(common_name) = dns_names.first() else {
            return Err(CertError::InvalidDnsName {
                name: String::new(),
                reason: "at least one DNS name is required".to_string(),
            });
        };

        // Whole seconds, so the window recorded alongside the secret round-trips exactly.
        let not_before = to_seconds(now)?;
        let not_after = to_seconds(now + validity)?;
        let (nb, na) = (to_offset(not_before)?, to_offset(not_after)?);

        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = distinguished_name(&format!(
            "run-once-duration-override-ca@{}",
            not_before.timestamp()
        ));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_before = nb;
        ca_params.not_after = na;

        let ca_key = KeyPair::generate()
            .map_err(|e| CertError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .map_err(|e| CertError::Signing(format!("failed to self-sign CA: {e}")))?;
        let ca_pem = ca_cert.pem();
        let issuer = Issuer::new(ca_params, ca_key);

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = nb;
        params.not_after = na;
        params.subject_alt_names = dns_names
            .iter()
            .map(|name| {
                Ia5String::try_from(name.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| CertError::InvalidDnsName {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let server_key = KeyPair::generate().map_err(|e| {
            CertError::KeyGeneration(format!("failed to generate serving key: {e}"))
        })?;
        let server_cert = params
            .signed_by(&server_key, &issuer)
            .map_err(|e| CertError::Signing(format!("failed to sign serving cert: {e}")))?;

        Ok(ServingCertBundle {
            ca_pem,
            cert_pem: server_cert.pem(),
            key_pem: server_key.serialize_pem(),
            validity: CertValidity::new(not_before, not_after),
        })
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn
}

fn to_seconds(at: DateTime<Utc>) -> Result<DateTime<Utc>, CertError> {
    DateTime::from_timestamp(at.timestamp(), 0)
        .ok_or_else(|| CertError::InvalidValidity(format!("timestamp out of range: {at}")))
}

fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime, CertError> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertError::InvalidValidity(e.to_string()))
}

/// Concatenate the CA certificates the API server should trust
///
/// The previous CA is kept while it is still valid so that pods serving the
/// old certificate keep verifying during a rollout.
#[must_use]
pub fn ca_bundle(current_ca: &str, previous_ca: Option<&str>) -> String {
    let mut bundle = current_ca.trim_end().to_string();
    bundle.push('\n');
    if let Some(prev) = previous_ca {
        let prev = prev.trim_end();
        if !prev.is_empty() && prev != current_ca.trim_end() {
            bundle.push_str(prev);
            bundle.push('\n');
        }
    }
    bundle
}

/// Serving material currently in force, either loaded from the serving cert
/// secret or produced by a rotation
#[derive(Clone, PartialEq, Eq)]
pub struct ServingCertMaterial {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
    /// CA replaced by the most recent rotation
    pub previous_ca_pem: Option<String>,
    /// When the previous CA stops being valid
    pub previous_ca_not_after: Option<DateTime<Utc>>,
    pub validity: CertValidity,
}

impl std::fmt::Debug for ServingCertMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingCertMaterial")
            .field("validity", &self.validity)
            .field("has_previous_ca", &self.previous_ca_pem.is_some())
            .field("key_pem", &"***")
            .finish_non_exhaustive()
    }
}

impl ServingCertMaterial {
    /// Read the material back from a stored serving cert secret
    ///
    /// Returns `None` when any required key or validity annotation is missing
    /// or unreadable, which callers treat as "no usable certificate". A
    /// previous CA without a recorded expiry is not carried.
    #[must_use]
    pub fn from_secret(object: &serde_json::Value) -> Option<Self> {
        let secret: Secret = serde_json::from_value(object.clone()).ok()?;
        let data = secret.data.as_ref()?;
        let text = |key: &str| -> Option<String> {
            let bytes = data.get(key)?;
            let s = String::from_utf8(bytes.0.clone()).ok()?;
            (!s.trim().is_empty()).then_some(s)
        };

        let annotations = secret.metadata.annotations.as_ref()?;
        let timestamp = |key: &str| -> Option<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(annotations.get(key)?)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        };

        let previous_ca_not_after = timestamp(PREVIOUS_CA_NOT_AFTER_ANNOTATION);
        let previous_ca_pem =
            text(PREVIOUS_CA_CERT_KEY).filter(|_| previous_ca_not_after.is_some());

        Some(Self {
            ca_pem: text(CA_CERT_KEY)?,
            cert_pem: text(TLS_CERT_KEY)?,
            key_pem: text(TLS_PRIVATE_KEY_KEY)?,
            previous_ca_not_after: previous_ca_not_after.filter(|_| previous_ca_pem.is_some()),
            previous_ca_pem,
            validity: CertValidity::new(
                timestamp(CERT_NOT_BEFORE_ANNOTATION)?,
                timestamp(CERT_NOT_AFTER_ANNOTATION)?,
            ),
        })
    }

    /// Material after a rotation at `now`
    ///
    /// The outgoing CA is carried as the previous one unless it has already
    /// expired.
    #[must_use]
    pub fn rotated(
        bundle: ServingCertBundle,
        outgoing: Option<&ServingCertMaterial>,
        now: DateTime<Utc>,
    ) -> Self {
        let outgoing = outgoing.filter(|m| m.validity.not_after > now);
        Self {
            previous_ca_pem: outgoing.map(|m| m.ca_pem.clone()),
            previous_ca_not_after: outgoing.map(|m| m.validity.not_after),
            ca_pem: bundle.ca_pem,
            cert_pem: bundle.cert_pem,
            key_pem: bundle.key_pem,
            validity: bundle.validity,
        }
    }

    /// Drop the previous CA once it has expired at `now`
    #[must_use]
    pub fn retire_expired_ca(mut self, now: DateTime<Utc>) -> Self {
        if self.previous_ca_not_after.is_some_and(|at| at <= now) {
            self.previous_ca_pem = None;
            self.previous_ca_not_after = None;
        }
        self
    }

    /// Digest of the certificate and key
    #[must_use]
    pub fn hash(&self) -> String {
        hash_serving_cert(self.cert_pem.as_bytes(), self.key_pem.as_bytes())
    }

    /// CA bundle published to the API server
    #[must_use]
    pub fn ca_bundle(&self) -> String {
        ca_bundle(&self.ca_pem, self.previous_ca_pem.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rcgen_generates_signed_serving_cert() {
        let now = Utc.timestamp_opt(1_700_000_000, 500).unwrap();
        let names = vec![
            "runoncedurationoverride.ns.svc".to_string(),
            "runoncedurationoverride.ns.svc.cluster.local".to_string(),
        ];
        let bundle = RcgenCertGenerator
            .generate(&names, Duration::days(30), now)
            .unwrap();

        assert!(bundle.ca_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.key_pem.contains("PRIVATE KEY"));
        assert_ne!(bundle.ca_pem, bundle.cert_pem);
        assert_eq!(bundle.validity.not_before.timestamp(), 1_700_000_000);
        assert_eq!(bundle.validity.lifetime(), Duration::days(30));
    }

    #[test]
    fn test_rcgen_rejects_empty_names_and_validity() {
        let now = Utc::now();
        assert!(matches!(
            RcgenCertGenerator.generate(&[], Duration::days(1), now),
            Err(CertError::InvalidDnsName { .. })
        ));
        assert!(matches!(
            RcgenCertGenerator.generate(&["a.svc".to_string()], Duration::zero(), now),
            Err(CertError::InvalidValidity(_))
        ));
    }

    #[test]
    fn test_ca_bundle_keeps_previous_ca() {
        let bundle = ca_bundle("NEW\n", Some("OLD"));
        assert_eq!(bundle, "NEW\nOLD\n");
    }

    #[test]
    fn test_ca_bundle_deduplicates() {
        assert_eq!(ca_bundle("SAME", Some("SAME\n")), "SAME\n");
        assert_eq!(ca_bundle("ONLY", None), "ONLY\n");
        assert_eq!(ca_bundle("ONLY", Some("")), "ONLY\n");
    }

    fn secret_with(data: serde_json::Value, annotations: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "serving", "annotations": annotations},
            "data": data
        })
    }

    #[test]
    fn test_material_round_trips_through_secret() {
        use base64::Engine;
        let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
        let object = secret_with(
            serde_json::json!({
                "ca.crt": b64("CA"),
                "tls.crt": b64("CERT"),
                "tls.key": b64("KEY"),
                "ca-previous.crt": ""
            }),
            serde_json::json!({
                CERT_NOT_BEFORE_ANNOTATION: "2024-01-01T00:00:00Z",
                CERT_NOT_AFTER_ANNOTATION: "2025-01-01T00:00:00Z"
            }),
        );

        let material = ServingCertMaterial::from_secret(&object).unwrap();
        assert_eq!(material.ca_pem, "CA");
        assert_eq!(material.cert_pem, "CERT");
        assert_eq!(material.key_pem, "KEY");
        assert_eq!(material.previous_ca_pem, None);
        assert_eq!(material.validity.lifetime(), Duration::days(366));
    }

    #[test]
    fn test_material_without_window_is_unusable() {
        use base64::Engine;
        let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
        let object = secret_with(
            serde_json::json!({"ca.crt": b64("CA"), "tls.crt": b64("CERT"), "tls.key": b64("KEY")}),
            serde_json::json!({}),
        );
        assert!(ServingCertMaterial::from_secret(&object).is_none());
    }

    #[test]
    fn test_rotation_carries_outgoing_ca() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let old = ServingCertMaterial {
            ca_pem: "OLD-CA".to_string(),
            cert_pem: "OLD".to_string(),
            key_pem: "OLD-KEY".to_string(),
            previous_ca_pem: Some("ANCIENT-CA".to_string()),
            previous_ca_not_after: Some(now + Duration::hours(1)),
            validity: CertValidity::new(now, now + Duration::days(1)),
        };
        let bundle = ServingCertBundle {
            ca_pem: "NEW-CA".to_string(),
            cert_pem: "NEW".to_string(),
            key_pem: "NEW-KEY".to_string(),
            validity: CertValidity::new(now, now + Duration::days(2)),
        };

        let rotated = ServingCertMaterial::rotated(bundle.clone(), Some(&old), now);
        assert_eq!(rotated.previous_ca_pem.as_deref(), Some("OLD-CA"));
        assert_eq!(rotated.previous_ca_not_after, Some(now + Duration::days(1)));
        assert_eq!(rotated.ca_bundle(), "NEW-CA\nOLD-CA\n");
        assert_ne!(rotated.hash(), old.hash());

        // An outgoing CA that has already expired is not worth trusting
        let late = ServingCertMaterial::rotated(bundle, Some(&old), now + Duration::days(2));
        assert_eq!(late.previous_ca_pem, None);
        assert_eq!(late.ca_bundle(), "NEW-CA\n");
    }

    #[test]
    fn test_previous_ca_retired_at_expiry() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let material = ServingCertMaterial {
            ca_pem: "NEW-CA".to_string(),
            cert_pem: "NEW".to_string(),
            key_pem: "NEW-KEY".to_string(),
            previous_ca_pem: Some("OLD-CA".to_string()),
            previous_ca_not_after: Some(now),
            validity: CertValidity::new(now, now + Duration::days(2)),
        };

        let kept = material.clone().retire_expired_ca(now - Duration::seconds(1));
        assert_eq!(kept.ca_bundle(), "NEW-CA\nOLD-CA\n");

        let retired = material.retire_expired_ca(now);
        assert_eq!(retired.previous_ca_pem, None);
        assert_eq!(retired.previous_ca_not_after, None);
        assert_eq!(retired.ca_bundle(), "NEW-CA\n");
    }

    #[test]
    fn test_previous_ca_without_expiry_is_dropped() {
        use base64::Engine;
        let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
        let object = secret_with(
            serde_json::json!({
                "ca.crt": b64("CA"),
                "tls.crt": b64("CERT"),
                "tls.key": b64("KEY"),
                "ca-previous.crt": b64("OLD-CA")
            }),
            serde_json::json!({
                CERT_NOT_BEFORE_ANNOTATION: "2024-01-01T00:00:00Z",
                CERT_NOT_AFTER_ANNOTATION: "2025-01-01T00:00:00Z"
            }),
        );
        let material = ServingCertMaterial::from_secret(&object).unwrap();
        assert_eq!(material.previous_ca_pem, None);
        assert_eq!(material.previous_ca_not_after, None);
    }
}
