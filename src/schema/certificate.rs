use std::fmt;

use simplelog::warn;

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::{CommonObjectAttributes, FieldCursor, Path};

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CommonCertificateAttributes ::= SEQUENCE {
///     iD Identifier,
///     authority BOOLEAN DEFAULT FALSE,
///     identifier CredentialIdentifier {{KeyIdentifiers}} OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonCertificateAttributes {
    pub id: Vec<u8>,
    pub authority: bool,
    pub identifier: Option<Vec<u8>>,
}

impl CommonCertificateAttributes {
    pub fn parse(cca: &Asn1) -> Result<CommonCertificateAttributes> {
        let mut cursor = FieldCursor::new(cca);
        let id = cursor
            .accept(asn1::OCTET_STRING)
            .ok_or(Error::MalformedEncoding("certificate attributes without iD"))?
            .value()
            .to_vec();
        let mut attrs = CommonCertificateAttributes {
            id,
            authority: false,
            identifier: None,
        };
        if let Some(t) = cursor.accept(asn1::BOOLEAN) {
            attrs.authority = t.bool_value()?;
        }
        if let Some(t) = cursor.accept(asn1::SEQUENCE) {
            attrs.identifier = Some(t.value().to_vec());
        }
        Ok(attrs)
    }
}

/// An X.509 certificate CIO with an indirect path to the certificate
/// value.
///
/// ```text
/// X509CertificateAttributes ::= SEQUENCE {
///     value ObjectValue { Certificate },
///     subject Name OPTIONAL,
///     issuer [0] Name OPTIONAL,
///     serialNumber CertificateSerialNumber OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub common: CommonObjectAttributes,
    pub cert: CommonCertificateAttributes,
    pub path: Option<Path>,
    pub serial_number: Option<Vec<u8>>,
}

impl Certificate {
    pub fn parse(tlv: &Asn1) -> Result<Certificate> {
        let common = CommonObjectAttributes::from_cio(tlv)?;
        let cert = CommonCertificateAttributes::parse(
            tlv.child(1)
                .ok_or(Error::MalformedEncoding("certificate CIO without attributes"))?,
        )?;
        let type_attrs = tlv
            .child(2)
            .filter(|t| t.tag == 0xA1)
            .ok_or(Error::MalformedEncoding("certificate CIO without typeAttributes"))?;
        let attrs = type_attrs
            .child(0)
            .ok_or(Error::MalformedEncoding("empty certificate typeAttributes"))?;

        let mut certificate = Certificate {
            common,
            cert,
            path: None,
            serial_number: None,
        };
        if tlv.tag != asn1::SEQUENCE {
            // only the x509Certificate branch of CertificateType is decoded
            warn!("Certificate choice 0x{:02x} not decoded", tlv.tag);
            return Ok(certificate);
        }
        let mut cursor = FieldCursor::new(attrs);
        if let Some(t) = cursor.accept(asn1::SEQUENCE) {
            certificate.path = Some(Path::parse(t)?);
            // a second SEQUENCE at this position is the subject name
            cursor.accept(asn1::SEQUENCE);
        }
        cursor.accept(0xA0); // issuer, not further decoded
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            certificate.serial_number = Some(t.value().to_vec());
        }
        Ok(certificate)
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x509Certificate {{{} iD={},authority={},",
            self.common,
            helpers::to_hex(&self.cert.id),
            self.cert.authority
        )?;
        if let Some(path) = &self.path {
            write!(f, "value indirect: path: {},", path)?;
        }
        if let Some(serial) = &self.serial_number {
            write!(f, "serialNumber={},", helpers::to_hex(serial))?;
        }
        write!(f, "}}")
    }
}
