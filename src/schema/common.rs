use std::fmt;

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::FieldCursor;

bitflags! {
    /// CommonObjectFlags ::= BIT STRING { private(0), modifiable(1), internal(2) }
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommonObjectFlags: u8 {
        const PRIVATE = 0x80;
        const MODIFIABLE = 0x40;
        const INTERNAL = 0x20;
    }
}

/// AccessMode ::= BIT STRING { read(0), update(1), execute(2) }
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    Read = 0,
    Update = 1,
    Execute = 2,
}

/// A recursive boolean expression over authentication object identifiers.
///
/// ```text
/// SecurityCondition ::= CHOICE {
///     authId Identifier,
///     not [0] SecurityCondition,
///     and [1] SEQUENCE SIZE (2..pkcs15-ub-securityConditions) OF SecurityCondition,
///     or  [2] SEQUENCE SIZE (2..pkcs15-ub-securityConditions) OF SecurityCondition
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityCondition {
    Leaf(String),
    Not(Box<SecurityCondition>),
    And(Vec<SecurityCondition>),
    Or(Vec<SecurityCondition>),
}

impl SecurityCondition {
    pub fn parse(tlv: &Asn1) -> Result<SecurityCondition> {
        if tlv.tag == asn1::OCTET_STRING {
            return Ok(SecurityCondition::Leaf(helpers::to_hex(tlv.value())));
        }
        match tlv.tag_number() {
            0 => {
                let inner = tlv
                    .child(0)
                    .ok_or(Error::MalformedEncoding("empty NOT security condition"))?;
                Ok(SecurityCondition::Not(Box::new(Self::parse(inner)?)))
            }
            1 => Ok(SecurityCondition::And(
                tlv.children.iter().map(Self::parse).collect::<Result<_>>()?,
            )),
            2 => Ok(SecurityCondition::Or(
                tlv.children.iter().map(Self::parse).collect::<Result<_>>()?,
            )),
            _ => Err(Error::MalformedEncoding("unknown security condition choice")),
        }
    }
}

impl fmt::Display for SecurityCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityCondition::Leaf(id) => write!(f, "authId={}", id),
            SecurityCondition::Not(inner) => write!(f, "NOT=[{}]", inner),
            SecurityCondition::And(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "AND=[{}]", parts.join(","))
            }
            SecurityCondition::Or(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "OR=[{}]", parts.join(","))
            }
        }
    }
}

/// AccessControlRule ::= SEQUENCE { accessMode AccessMode, securityCondition SecurityCondition }
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControlRule {
    pub access_mode: AccessMode,
    pub security_condition: SecurityCondition,
}

impl AccessControlRule {
    pub fn parse(tlv: &Asn1) -> Result<AccessControlRule> {
        if tlv.children.len() != 2 {
            return Err(Error::MalformedEncoding(
                "access control rule needs accessMode and securityCondition",
            ));
        }
        let mode = &tlv.children[0];
        if mode.tag != asn1::BIT_STRING {
            return Err(Error::MalformedEncoding("accessMode is not a BIT STRING"));
        }
        let choice = helpers::choice_from_bit_string(mode.value())?;
        let access_mode = AccessMode::from_repr(choice)
            .ok_or(Error::MalformedEncoding("unknown accessMode choice"))?;
        Ok(AccessControlRule {
            access_mode,
            security_condition: SecurityCondition::parse(&tlv.children[1])?,
        })
    }
}

impl fmt::Display for AccessControlRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessControlRule {{accessMode={},securityCondition={{{}}}}}",
            self.access_mode, self.security_condition
        )
    }
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CommonObjectAttributes ::= SEQUENCE {
///     label Label OPTIONAL,
///     flags CommonObjectFlags OPTIONAL,
///     authId Identifier OPTIONAL,
///     userConsent INTEGER (1..cia-ub-userConsent) OPTIONAL,
///     accessControlRules SEQUENCE SIZE (1..MAX) OF AccessControlRule OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonObjectAttributes {
    pub label: Option<String>,
    pub flags: Option<CommonObjectFlags>,
    pub auth_id: Option<Vec<u8>>,
    pub user_consent: Option<i32>,
    pub access_control_rules: Option<Vec<AccessControlRule>>,
}

impl CommonObjectAttributes {
    /// Decodes the attributes from their own SEQUENCE node.
    pub fn parse(coa: &Asn1) -> Result<CommonObjectAttributes> {
        let mut cursor = FieldCursor::new(coa);
        let mut attrs = CommonObjectAttributes::default();
        if let Some(t) = cursor.accept(asn1::UTF8_STRING) {
            attrs.label = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept(asn1::BIT_STRING) {
            // some cards emit an empty flags BIT STRING, treat it as absent
            if t.value().len() > 1 {
                attrs.flags = Some(CommonObjectFlags::from_bits_retain(t.value()[1]));
            }
        }
        if let Some(t) = cursor.accept(asn1::OCTET_STRING) {
            attrs.auth_id = Some(t.value().to_vec());
        }
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            attrs.user_consent = Some(t.int_value()?);
        }
        if let Some(t) = cursor.accept(asn1::SEQUENCE) {
            attrs.access_control_rules = Some(
                t.children
                    .iter()
                    .map(AccessControlRule::parse)
                    .collect::<Result<_>>()?,
            );
        }
        Ok(attrs)
    }

    /// Decodes the attributes out of a whole CIO node, where they sit in
    /// the first child.
    pub fn from_cio(cio: &Asn1) -> Result<CommonObjectAttributes> {
        let coa = cio
            .child(0)
            .filter(|t| t.tag == asn1::SEQUENCE)
            .ok_or(Error::MalformedEncoding("CIO without commonObjectAttributes"))?;
        Self::parse(coa)
    }
}

impl fmt::Display for CommonObjectAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommonObjectAttributes {{")?;
        if let Some(label) = &self.label {
            write!(f, "label={},", label)?;
        }
        if let Some(flags) = self.flags {
            write!(f, "flags={:?},", flags)?;
        }
        if let Some(auth_id) = &self.auth_id {
            write!(f, "authId={},", helpers::to_hex(auth_id))?;
        }
        if let Some(consent) = self.user_consent {
            write!(f, "userConsent={},", consent)?;
        }
        if let Some(rules) = &self.access_control_rules {
            let rules: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
            write!(f, "accessControlRules={},", rules.join(":"))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_optional_fields_in_order() {
        // label "ab", flags {private}, authId 01, userConsent 1
        let coa = Asn1::parse(&hex::decode("300e0c02616203020780040101020101").unwrap()).unwrap();
        let attrs = CommonObjectAttributes::parse(&coa).unwrap();
        assert_eq!(attrs.label.as_deref(), Some("ab"));
        assert_eq!(attrs.flags, Some(CommonObjectFlags::PRIVATE));
        assert_eq!(attrs.auth_id, Some(vec![0x01]));
        assert_eq!(attrs.user_consent, Some(1));
        assert!(attrs.access_control_rules.is_none());
    }

    #[test]
    fn unmatched_tags_leave_fields_absent() {
        // only authId and userConsent, no label or flags
        let coa = Asn1::parse(&hex::decode("30060401aa020102").unwrap()).unwrap();
        let attrs = CommonObjectAttributes::parse(&coa).unwrap();
        assert!(attrs.label.is_none());
        assert!(attrs.flags.is_none());
        assert_eq!(attrs.auth_id, Some(vec![0xAA]));
        assert_eq!(attrs.user_consent, Some(2));
    }

    #[test]
    fn empty_flags_bit_string_is_skipped() {
        // BIT STRING with only the unused-bits byte does not consume the
        // flags slot, so the following authId still lands
        let coa = Asn1::parse(&hex::decode("300703010004020102").unwrap()).unwrap();
        let attrs = CommonObjectAttributes::parse(&coa).unwrap();
        assert!(attrs.flags.is_none());
        assert_eq!(attrs.auth_id, Some(vec![0x01, 0x02]));
    }

    #[test]
    fn access_control_rule_with_leaf_condition() {
        // accessMode read (choice 0), securityCondition OCTET STRING aabbcc
        let rule = Asn1::parse(&hex::decode("3009030200800403aabbcc").unwrap()).unwrap();
        let rule = AccessControlRule::parse(&rule).unwrap();
        assert_eq!(rule.access_mode, AccessMode::Read);
        assert_eq!(
            rule.security_condition,
            SecurityCondition::Leaf("aabbcc".to_string())
        );
    }

    #[test]
    fn security_condition_tree() {
        // or [2] { authId 07, not [0] { authId 0a } }
        let leaf = Asn1::from_tag_and_value(0x04, &[0x07]).unwrap();
        let not_leaf = Asn1::from_tag_and_value(0x04, &[0x0A]).unwrap();
        let not = Asn1::from_tag_and_value(0xA0, &not_leaf.to_bytes()).unwrap();
        let mut or_value = leaf.to_bytes();
        or_value.extend(not.to_bytes());
        let or = Asn1::from_tag_and_value(0xA2, &or_value).unwrap();

        let condition = SecurityCondition::parse(&or).unwrap();
        assert_eq!(
            condition,
            SecurityCondition::Or(vec![
                SecurityCondition::Leaf("07".to_string()),
                SecurityCondition::Not(Box::new(SecurityCondition::Leaf("0a".to_string()))),
            ])
        );
        assert_eq!(condition.to_string(), "OR=[authId=07,NOT=[authId=0a]]");
    }
}
