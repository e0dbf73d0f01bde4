//! Decoders for the PKCS #15 / ISO 7816-15 object syntax.
//!
//! Each type takes a decoded [`Asn1`] node and pulls its fields out
//! positionally, which is how the DER of these structures actually
//! arrives: optional fields are simply absent, so decoding walks the
//! children once with a [`FieldCursor`] and takes each field only if
//! its tag matches.

use std::fmt;

use strum::FromRepr;

use crate::asn1::Asn1;
use crate::types::Result;

pub mod application_template;
pub mod auth;
pub mod certificate;
pub mod cia_info;
pub mod common;
pub mod data_container;
pub mod keys;
pub mod path;

pub use self::application_template::{ApplicationTemplate, Ddo};
pub use self::auth::{
    AuthenticationObject, CommonAuthenticationObjectAttributes, PasswordAuthenticationObject,
    PasswordFlags, PasswordType,
};
pub use self::certificate::{Certificate, CommonCertificateAttributes};
pub use self::cia_info::{AlgorithmInfo, CardFlags, CiaInfo, SupportedOperations};
pub use self::common::{
    AccessControlRule, AccessMode, CommonObjectAttributes, CommonObjectFlags, SecurityCondition,
};
pub use self::data_container::{CommonDataContainerObjectAttributes, DataContainerObject};
pub use self::keys::{CommonKeyAttributes, KeyAccess, KeyKind, KeyUsage, PrivateKey, PublicKey};
pub use self::path::Path;

/// Walks the children of a constructed node in order, consuming a child
/// only when the caller's tag (or predicate) matches. This mirrors how
/// OPTIONAL and DEFAULT fields behave in DER: a skipped field leaves the
/// cursor where it is for the next field to try.
pub struct FieldCursor<'a> {
    children: &'a [Asn1],
    index: usize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(node: &'a Asn1) -> FieldCursor<'a> {
        return FieldCursor {
            children: &node.children,
            index: 0,
        };
    }

    /// Takes the current child if its tag matches, otherwise leaves it.
    pub fn accept(&mut self, tag: u8) -> Option<&'a Asn1> {
        return self.accept_if(|t| t.tag == tag);
    }

    /// Takes the current child if the predicate holds, otherwise leaves it.
    pub fn accept_if(&mut self, pred: impl Fn(&Asn1) -> bool) -> Option<&'a Asn1> {
        let child = self.children.get(self.index)?;
        if pred(child) {
            self.index += 1;
            return Some(child);
        }
        return None;
    }

    /// Takes the current child unconditionally.
    pub fn next(&mut self) -> Option<&'a Asn1> {
        let child = self.children.get(self.index)?;
        self.index += 1;
        return Some(child);
    }
}

/// The context tag an ODF entry carries, naming which CIO file its path
/// points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum CioCategory {
    PrivateKey = 0xA0,
    PublicKey = 0xA1,
    TrustedPublicKey = 0xA2,
    SecretKey = 0xA3,
    Certificate = 0xA4,
    TrustedCertificate = 0xA5,
    UsefulCertificate = 0xA6,
    DataContainer = 0xA7,
    AuthObject = 0xA8,
}

impl fmt::Display for CioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CioCategory::PrivateKey => "PrKDF",
            CioCategory::PublicKey => "PuKDF",
            CioCategory::TrustedPublicKey => "PuKDF (trusted)",
            CioCategory::SecretKey => "SKDF",
            CioCategory::Certificate => "CDF",
            CioCategory::TrustedCertificate => "CDF (trusted)",
            CioCategory::UsefulCertificate => "CDF (useful)",
            CioCategory::DataContainer => "DODF",
            CioCategory::AuthObject => "AODF",
        };
        return write!(f, "{}", name);
    }
}

/// One decoded cryptographic information object.
///
/// Secret keys and trusted public keys only get their common attributes
/// decoded; their type attributes are card-specific and rarely present
/// on the cards this decoder targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Cio {
    PrivateKey(PrivateKey),
    PublicKey(PublicKey),
    TrustedPublicKey(CommonObjectAttributes),
    SecretKey(CommonObjectAttributes),
    Certificate(Certificate),
    TrustedCertificate(Certificate),
    UsefulCertificate(Certificate),
    DataContainer(DataContainerObject),
    AuthObject(AuthenticationObject),
}

impl Cio {
    /// Decodes one object from a CIO file belonging to `category`.
    pub fn decode(category: CioCategory, node: &Asn1) -> Result<Cio> {
        let cio = match category {
            CioCategory::PrivateKey => Cio::PrivateKey(PrivateKey::parse(node)?),
            CioCategory::PublicKey => Cio::PublicKey(PublicKey::parse(node)?),
            CioCategory::TrustedPublicKey => {
                Cio::TrustedPublicKey(CommonObjectAttributes::from_cio(node)?)
            }
            CioCategory::SecretKey => Cio::SecretKey(CommonObjectAttributes::from_cio(node)?),
            CioCategory::Certificate => Cio::Certificate(Certificate::parse(node)?),
            CioCategory::TrustedCertificate => {
                Cio::TrustedCertificate(Certificate::parse(node)?)
            }
            CioCategory::UsefulCertificate => Cio::UsefulCertificate(Certificate::parse(node)?),
            CioCategory::DataContainer => Cio::DataContainer(DataContainerObject::parse(node)?),
            CioCategory::AuthObject => Cio::AuthObject(AuthenticationObject::parse(node)?),
        };
        return Ok(cio);
    }
}

impl fmt::Display for Cio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cio::PrivateKey(object) => write!(f, "private {}", object),
            Cio::PublicKey(object) => write!(f, "public {}", object),
            Cio::TrustedPublicKey(attrs) => write!(f, "trusted public key {{{}}}", attrs),
            Cio::SecretKey(attrs) => write!(f, "secret key {{{}}}", attrs),
            Cio::Certificate(object)
            | Cio::TrustedCertificate(object)
            | Cio::UsefulCertificate(object) => object.fmt(f),
            Cio::DataContainer(object) => object.fmt(f),
            Cio::AuthObject(object) => object.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1;

    #[test]
    fn cursor_skips_absent_optionals() {
        let first = Asn1::from_tag_and_value(0x04, &[0x01]).unwrap();
        let third = Asn1::from_tag_and_value(0x02, &[0x05]).unwrap();
        let mut inner = first.to_bytes();
        inner.extend(third.to_bytes());
        let node = Asn1::from_tag_and_value(0x30, &inner).unwrap();

        let mut cursor = FieldCursor::new(&node);
        assert!(cursor.accept(asn1::OCTET_STRING).is_some());
        assert!(cursor.accept(asn1::BOOLEAN).is_none());
        assert!(cursor.accept(asn1::INTEGER).is_some());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn category_round_trips_through_repr() {
        assert_eq!(CioCategory::from_repr(0xA0), Some(CioCategory::PrivateKey));
        assert_eq!(CioCategory::from_repr(0xA8), Some(CioCategory::AuthObject));
        assert_eq!(CioCategory::from_repr(0xA9), None);
    }
}
