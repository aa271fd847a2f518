//! Committee membership
//!
//! Every backend carries a signer mask with exactly one bit set. Masks are
//! pairwise disjoint, so OR-ing the masks of the members that signed gives an
//! unambiguous signer set. The registry also derives the quorum
//! `K = N + 1 - H` and the keyset hash that certificates refer to.

use crate::backend::DasService;
use anytrust_core::{AnytrustError, Hash32, Keyset, PublicKey, Result, MAX_COMMITTEE_SIZE};
use std::fmt;
use std::sync::Arc;

/// One committee member
#[derive(Clone)]
pub struct ServiceDetails {
    /// Backend handle
    pub service: Arc<dyn DasService>,
    /// Key the member signs certificates with
    pub pub_key: PublicKey,
    /// Single bit identifying the member
    pub signers_mask: u64,
    /// Name used in logs and metric paths
    pub label: String,
}

impl ServiceDetails {
    /// Fails unless `signers_mask` has exactly one bit set
    pub fn new(
        service: Arc<dyn DasService>,
        pub_key: PublicKey,
        signers_mask: u64,
        label: impl Into<String>,
    ) -> Result<Self> {
        let label = label.into();
        if signers_mask.count_ones() != 1 {
            return Err(AnytrustError::configuration(format!(
                "tried to configure backend {label} with invalid signersMask {signers_mask:X}"
            )));
        }
        Ok(Self {
            service,
            pub_key,
            signers_mask,
            label,
        })
    }
}

impl fmt::Debug for ServiceDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDetails")
            .field("label", &self.label)
            .field("signers_mask", &self.signers_mask)
            .field("pub_key", &self.pub_key)
            .finish()
    }
}

/// Validated committee with its quorum parameters
#[derive(Clone, Debug)]
pub struct BackendRegistry {
    services: Vec<ServiceDetails>,
    assumed_honest: usize,
    keyset: Keyset,
    keyset_hash: Hash32,
}

impl BackendRegistry {
    /// Validated committee; masks must be disjoint and `1 <= H <= N`
    pub fn new(services: Vec<ServiceDetails>, assumed_honest: usize) -> Result<Self> {
        if services.is_empty() {
            return Err(AnytrustError::configuration("no backends configured"));
        }
        if services.len() > MAX_COMMITTEE_SIZE {
            return Err(AnytrustError::configuration(format!(
                "{} backends configured, at most {MAX_COMMITTEE_SIZE} are supported",
                services.len()
            )));
        }
        if assumed_honest == 0 || assumed_honest > services.len() {
            return Err(AnytrustError::configuration(format!(
                "assumed-honest must be between 1 and {}, got {assumed_honest}",
                services.len()
            )));
        }

        let mut seen = 0u64;
        for details in &services {
            if details.signers_mask.count_ones() != 1 {
                return Err(AnytrustError::configuration(format!(
                    "backend {} has invalid signersMask {:X}",
                    details.label, details.signers_mask
                )));
            }
            if seen & details.signers_mask != 0 {
                return Err(AnytrustError::configuration(format!(
                    "backend {} shares signersMask {:X} with another backend",
                    details.label, details.signers_mask
                )));
            }
            seen |= details.signers_mask;
        }

        // Keyset order follows ascending mask bits
        let mut by_mask: Vec<&ServiceDetails> = services.iter().collect();
        by_mask.sort_by_key(|d| d.signers_mask);
        let keyset = Keyset {
            assumed_honest: assumed_honest as u64,
            pub_keys: by_mask.iter().map(|d| d.pub_key).collect(),
        };
        let keyset_hash = keyset.hash();

        Ok(Self {
            services,
            assumed_honest,
            keyset,
            keyset_hash,
        })
    }

    /// Members in ascending mask order
    pub fn services(&self) -> &[ServiceDetails] {
        &self.services
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Option<&ServiceDetails> {
        self.services.get(index)
    }

    /// N
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True for an empty committee
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// H
    pub fn assumed_honest(&self) -> usize {
        self.assumed_honest
    }

    /// K = N + 1 - H
    pub fn required_signers(&self) -> usize {
        self.services.len() + 1 - self.assumed_honest
    }

    /// N - K; one more failure makes quorum impossible
    pub fn max_allowed_failures(&self) -> usize {
        self.assumed_honest - 1
    }

    /// Keyset certificates are verified against
    pub fn keyset(&self) -> &Keyset {
        &self.keyset
    }

    /// Hash of the serialized keyset
    pub fn keyset_hash(&self) -> Hash32 {
        self.keyset_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DasReader, DasWriter, HealthCheck};
    use anytrust_core::{DataAvailabilityCertificate, ExpirationPolicy, SigningKey};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl DasWriter for Unreachable {
        async fn store(&self, _: &[u8], _: u64) -> Result<DataAvailabilityCertificate> {
            Err(AnytrustError::transport("unreachable"))
        }
    }

    #[async_trait]
    impl DasReader for Unreachable {
        async fn get_by_hash(&self, _: Hash32) -> Result<Vec<u8>> {
            Err(AnytrustError::transport("unreachable"))
        }
        async fn expiration_policy(&self) -> Result<ExpirationPolicy> {
            Err(AnytrustError::transport("unreachable"))
        }
    }

    #[async_trait]
    impl HealthCheck for Unreachable {
        async fn health_check(&self) -> Result<()> {
            Err(AnytrustError::transport("unreachable"))
        }
    }

    fn details(seed: u8, mask: u64) -> ServiceDetails {
        ServiceDetails::new(
            Arc::new(Unreachable),
            SigningKey::from_bytes(&[seed; 32]).public_key(),
            mask,
            format!("backend{seed}"),
        )
        .unwrap()
    }

    #[test]
    fn test_mask_must_have_one_bit() {
        let key = SigningKey::from_bytes(&[1; 32]).public_key();
        assert!(ServiceDetails::new(Arc::new(Unreachable), key, 0, "a").is_err());
        assert!(ServiceDetails::new(Arc::new(Unreachable), key, 0b11, "a").is_err());
    }

    #[test]
    fn test_shared_mask_rejected() {
        let err = BackendRegistry::new(vec![details(1, 1), details(2, 1)], 1).unwrap_err();
        assert!(matches!(err, AnytrustError::Configuration { .. }));
    }

    #[test]
    fn test_quorum_arithmetic() {
        let services: Vec<_> = (0..10).map(|i| details(i + 1, 1 << i)).collect();
        let strict = BackendRegistry::new(services.clone(), 1).unwrap();
        assert_eq!(strict.required_signers(), 10);
        assert_eq!(strict.max_allowed_failures(), 0);

        let lenient = BackendRegistry::new(services.clone(), 5).unwrap();
        assert_eq!(lenient.required_signers(), 6);
        assert_eq!(lenient.max_allowed_failures(), 4);

        assert!(BackendRegistry::new(services.clone(), 0).is_err());
        assert!(BackendRegistry::new(services, 11).is_err());
        assert!(BackendRegistry::new(vec![], 1).is_err());
    }

    #[test]
    fn test_keyset_follows_mask_order() {
        let registry = BackendRegistry::new(vec![details(2, 0b10), details(1, 0b01)], 1).unwrap();
        let keys = &registry.keyset().pub_keys;
        assert_eq!(keys[0], SigningKey::from_bytes(&[1; 32]).public_key());
        assert_eq!(keys[1], SigningKey::from_bytes(&[2; 32]).public_key());
        assert_eq!(registry.keyset_hash(), registry.keyset().hash());
    }
}
