//! OID constants for the attestation subject profile and signing extensions.
//!
//! OIDs are kept in dotted form, as the authority service API uses them.
//! [`components`] converts them for `rcgen`.

/// `id-at-commonName`.
pub const COMMON_NAME: &str = "2.5.4.3";

/// `id-at-organizationName`.
pub const ORGANIZATION: &str = "2.5.4.10";

/// `id-at-organizationalUnitName`.
pub const ORGANIZATIONAL_UNIT: &str = "2.5.4.11";

/// `matter-oid-vid` (CSA arc 1.3.6.1.4.1.37244.2.1).
pub const MATTER_VENDOR_ID: &str = "1.3.6.1.4.1.37244.2.1";

/// `matter-oid-pid` (CSA arc 1.3.6.1.4.1.37244.2.2).
pub const MATTER_PRODUCT_ID: &str = "1.3.6.1.4.1.37244.2.2";

/// `id-ce-keyUsage`.
pub const KEY_USAGE: &str = "2.5.29.15";

/// Subject field names that must never appear next to custom attributes.
pub const STANDARD_SUBJECT_FIELDS: &[&str] = &[
    "Country",
    "Organization",
    "OrganizationalUnit",
    "DistinguishedNameQualifier",
    "State",
    "CommonName",
    "SerialNumber",
    "Locality",
    "Title",
    "Surname",
    "GivenName",
    "Initials",
    "Pseudonym",
    "GenerationQualifier",
];

/// Converts a dotted OID into its components.
pub fn components(dotted: &str) -> Option<Vec<u64>> {
    dotted.split('.').map(|c| c.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_of_profile_oids() {
        assert_eq!(components(COMMON_NAME), Some(vec![2, 5, 4, 3]));
        assert_eq!(components(MATTER_VENDOR_ID), Some(vec![1, 3, 6, 1, 4, 1, 37244, 2, 1]));
        assert_eq!(components(MATTER_PRODUCT_ID), Some(vec![1, 3, 6, 1, 4, 1, 37244, 2, 2]));
        assert_eq!(components(KEY_USAGE), Some(vec![2, 5, 29, 15]));
    }

    #[test]
    fn test_components_rejects_garbage() {
        assert_eq!(components("2.5.x.3"), None);
    }
}
