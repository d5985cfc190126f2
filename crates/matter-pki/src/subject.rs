//! Subject attribute composition for attestation authorities.
//!
//! Authority subjects are expressed exclusively through custom attributes
//! (the authority service accepts either standard fields or custom
//! attributes, never both). The attribute order is fixed:
//!
//! ```text
//! CN, VID, O, [OU], [PID]
//! ```
//!
//! Exactly one of four [`SubjectVariant`]s is produced per authority, chosen
//! by the presence of an organizational unit and (subordinates only) a
//! product id.
//!
//! # Example
//!
//! ```
//! use matter_pki::identifier::{Identifier, IdentifierField};
//! use matter_pki::subject::compose;
//! use matter_pki::Tier;
//!
//! let vid = Identifier::validate(IdentifierField::VendorId, "FFF1").unwrap();
//! let pid = Identifier::validate(IdentifierField::ProductId, "8000").unwrap();
//!
//! let subject = compose(Tier::Subordinate, "Matter PAI", &vid, "Acme", Some("Devices"), Some(&pid));
//! assert_eq!(subject.len(), 5);
//!
//! let root = compose(Tier::Root, "Matter PAA", &vid, "Acme", None, Some(&pid));
//! assert_eq!(root.len(), 3);
//! ```

use crate::authority::Tier;
use crate::identifier::{Identifier, IdentifierField};
use crate::oid;
use crate::CompositionError;
use rcgen::{DistinguishedName, DnType};
use serde::{Deserialize, Serialize};

/// One `(objectIdentifier, value)` pair of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomAttribute {
    /// Dotted OID.
    pub object_identifier: String,
    /// Attribute value.
    pub value: String,
}

impl CustomAttribute {
    /// Creates a new attribute.
    pub fn new(object_identifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            object_identifier: object_identifier.into(),
            value: value.into(),
        }
    }
}

/// The optional part of a subject, tagged by which optional fields exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum SubjectVariant {
    /// CN, VID, O.
    Base,
    /// CN, VID, O, OU.
    WithOrganizationalUnit {
        /// Organizational unit.
        organizational_unit: String,
    },
    /// CN, VID, O, PID (subordinates only).
    WithProductId {
        /// Product id.
        product_id: Identifier,
    },
    /// CN, VID, O, OU, PID (subordinates only).
    WithOrganizationalUnitAndProductId {
        /// Organizational unit.
        organizational_unit: String,
        /// Product id.
        product_id: Identifier,
    },
}

impl SubjectVariant {
    /// Selects the variant for the given tier and optional fields.
    ///
    /// An empty organizational unit counts as absent. Root authorities never
    /// carry a product id, so `product_id` is ignored for [`Tier::Root`].
    pub fn select(tier: Tier, organizational_unit: Option<&str>, product_id: Option<&Identifier>) -> Self {
        let organizational_unit = organizational_unit
            .filter(|ou| !ou.is_empty())
            .map(str::to_string);
        let product_id = match tier {
            Tier::Root => None,
            Tier::Subordinate => product_id.cloned(),
        };

        match (organizational_unit, product_id) {
            (None, None) => Self::Base,
            (Some(organizational_unit), None) => Self::WithOrganizationalUnit { organizational_unit },
            (None, Some(product_id)) => Self::WithProductId { product_id },
            (Some(organizational_unit), Some(product_id)) => {
                Self::WithOrganizationalUnitAndProductId {
                    organizational_unit,
                    product_id,
                }
            }
        }
    }

    /// Number of attributes this variant yields.
    pub fn attribute_count(&self) -> usize {
        match self {
            Self::Base => 3,
            Self::WithOrganizationalUnit { .. } | Self::WithProductId { .. } => 4,
            Self::WithOrganizationalUnitAndProductId { .. } => 5,
        }
    }

    fn organizational_unit(&self) -> Option<&str> {
        match self {
            Self::WithOrganizationalUnit { organizational_unit }
            | Self::WithOrganizationalUnitAndProductId {
                organizational_unit, ..
            } => Some(organizational_unit),
            _ => None,
        }
    }

    fn product_id(&self) -> Option<&Identifier> {
        match self {
            Self::WithProductId { product_id }
            | Self::WithOrganizationalUnitAndProductId { product_id, .. } => Some(product_id),
            _ => None,
        }
    }
}

/// An immutable, ordered subject built from custom attributes only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectAttributeSet {
    common_name: String,
    vendor_id: Identifier,
    organization: String,
    #[serde(flatten)]
    variant: SubjectVariant,
}

/// Composes the subject of an authority.
pub fn compose(
    tier: Tier,
    common_name: &str,
    vendor_id: &Identifier,
    organization: &str,
    organizational_unit: Option<&str>,
    product_id: Option<&Identifier>,
) -> SubjectAttributeSet {
    SubjectAttributeSet {
        common_name: common_name.to_string(),
        vendor_id: vendor_id.clone(),
        organization: organization.to_string(),
        variant: SubjectVariant::select(tier, organizational_unit, product_id),
    }
}

impl SubjectAttributeSet {
    /// Returns the attributes in their fixed order.
    pub fn attributes(&self) -> Vec<CustomAttribute> {
        let mut attributes = vec![
            CustomAttribute::new(oid::COMMON_NAME, &self.common_name),
            CustomAttribute::new(oid::MATTER_VENDOR_ID, self.vendor_id.as_str()),
            CustomAttribute::new(oid::ORGANIZATION, &self.organization),
        ];
        if let Some(ou) = self.variant.organizational_unit() {
            attributes.push(CustomAttribute::new(oid::ORGANIZATIONAL_UNIT, ou));
        }
        if let Some(pid) = self.variant.product_id() {
            attributes.push(CustomAttribute::new(oid::MATTER_PRODUCT_ID, pid.as_str()));
        }
        attributes
    }

    /// Number of attributes (3, 4 or 5).
    pub fn len(&self) -> usize {
        self.variant.attribute_count()
    }

    /// Always false; a subject has at least the base attributes.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The selected variant.
    pub fn variant(&self) -> &SubjectVariant {
        &self.variant
    }

    /// Common name.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Vendor id.
    pub fn vendor_id(&self) -> &Identifier {
        &self.vendor_id
    }

    /// Organization.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Organizational unit, if the variant carries one.
    pub fn organizational_unit(&self) -> Option<&str> {
        self.variant.organizational_unit()
    }

    /// Product id, if the variant carries one.
    pub fn product_id(&self) -> Option<&Identifier> {
        self.variant.product_id()
    }

    /// Builds an `rcgen` distinguished name with OID-addressed entries.
    pub fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for attribute in self.attributes() {
            // Every OID here comes from `oid`, so the conversion cannot fail.
            if let Some(components) = oid::components(&attribute.object_identifier) {
                dn.push(DnType::from_oid(&components), attribute.value);
            }
        }
        dn
    }

    /// Rebuilds a subject from raw attributes, e.g. an authority description.
    ///
    /// # Errors
    ///
    /// Returns a [`CompositionError`] when the attributes are not exactly one
    /// of the four variants in the fixed order, or carry a product id on a
    /// root authority.
    pub fn classify(tier: Tier, attributes: &[CustomAttribute]) -> Result<Self, CompositionError> {
        for attribute in attributes {
            if oid::STANDARD_SUBJECT_FIELDS.contains(&attribute.object_identifier.as_str()) {
                return Err(CompositionError::MixedAttributeForms {
                    field: attribute.object_identifier.clone(),
                });
            }
            if !KNOWN_OIDS.contains(&attribute.object_identifier.as_str()) {
                return Err(CompositionError::UnknownAttribute {
                    oid: attribute.object_identifier.clone(),
                });
            }
        }

        let oids: Vec<&str> = attributes
            .iter()
            .map(|a| a.object_identifier.as_str())
            .collect();
        let layout_error = || CompositionError::UnexpectedLayout {
            oids: oids.join(","),
        };

        let [cn, vid, org, rest @ ..] = attributes else {
            return Err(layout_error());
        };
        if cn.object_identifier != oid::COMMON_NAME
            || vid.object_identifier != oid::MATTER_VENDOR_ID
            || org.object_identifier != oid::ORGANIZATION
        {
            return Err(layout_error());
        }

        let (organizational_unit, product_id) = match rest {
            [] => (None, None),
            [ou] if ou.object_identifier == oid::ORGANIZATIONAL_UNIT => (Some(ou), None),
            [pid] if pid.object_identifier == oid::MATTER_PRODUCT_ID => (None, Some(pid)),
            [ou, pid]
                if ou.object_identifier == oid::ORGANIZATIONAL_UNIT
                    && pid.object_identifier == oid::MATTER_PRODUCT_ID =>
            {
                (Some(ou), Some(pid))
            }
            _ => return Err(layout_error()),
        };

        if tier == Tier::Root && product_id.is_some() {
            return Err(CompositionError::ProductIdOnRoot);
        }

        let vendor_id = Identifier::validate(IdentifierField::VendorId, &vid.value)
            .map_err(|_| layout_error())?;
        let product_id = product_id
            .map(|pid| Identifier::validate(IdentifierField::ProductId, &pid.value))
            .transpose()
            .map_err(|_| layout_error())?;

        let subject = compose(
            tier,
            &cn.value,
            &vendor_id,
            &org.value,
            organizational_unit.map(|ou| ou.value.as_str()),
            product_id.as_ref(),
        );
        // An empty OU value collapses to another variant; reject it.
        if subject.len() != attributes.len() {
            return Err(layout_error());
        }
        Ok(subject)
    }
}

const KNOWN_OIDS: &[&str] = &[
    oid::COMMON_NAME,
    oid::MATTER_VENDOR_ID,
    oid::ORGANIZATION,
    oid::ORGANIZATIONAL_UNIT,
    oid::MATTER_PRODUCT_ID,
];
