use std::fmt;

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::{CommonObjectAttributes, FieldCursor, Path};

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CommonDataContainerObjectAttributes ::= SEQUENCE {
///     applicationName Label OPTIONAL,
///     applicationOID OBJECT IDENTIFIER OPTIONAL,
///     iD Identifier OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonDataContainerObjectAttributes {
    pub application_name: Option<String>,
    pub application_oid: Option<String>,
    pub id: Option<Vec<u8>>,
}

impl CommonDataContainerObjectAttributes {
    pub fn parse(cdcoa: &Asn1) -> Result<CommonDataContainerObjectAttributes> {
        let mut cursor = FieldCursor::new(cdcoa);
        let mut attrs = CommonDataContainerObjectAttributes::default();
        if let Some(t) = cursor.accept(asn1::UTF8_STRING) {
            attrs.application_name = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept(asn1::OBJECT_IDENTIFIER) {
            attrs.application_oid = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept(asn1::OCTET_STRING) {
            attrs.id = Some(t.value().to_vec());
        }
        Ok(attrs)
    }
}

/// An opaque data container CIO. Only the indirect (path) form of the
/// object value is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContainerObject {
    pub common: CommonObjectAttributes,
    pub data: CommonDataContainerObjectAttributes,
    pub path: Path,
}

impl DataContainerObject {
    pub fn parse(tlv: &Asn1) -> Result<DataContainerObject> {
        let common = CommonObjectAttributes::from_cio(tlv)?;
        let data = CommonDataContainerObjectAttributes::parse(
            tlv.child(1)
                .ok_or(Error::MalformedEncoding("data container without attributes"))?,
        )?;
        let type_attrs = tlv
            .child(2)
            .filter(|t| t.tag == 0xA1)
            .ok_or(Error::MalformedEncoding("data container without typeAttributes"))?;
        let value = type_attrs
            .child(0)
            .ok_or(Error::MalformedEncoding("empty data container typeAttributes"))?;
        if value.tag != asn1::SEQUENCE {
            return Err(Error::UnsupportedObjectType(value.tag));
        }
        let path = Path::parse(
            value
                .child(0)
                .ok_or(Error::MalformedEncoding("data container value without path"))?,
        )?;
        Ok(DataContainerObject { common, data, path })
    }
}

impl fmt::Display for DataContainerObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opaqueDO {{{}", self.common)?;
        if let Some(name) = &self.data.application_name {
            write!(f, " applicationName={},", name)?;
        }
        if let Some(oid) = &self.data.application_oid {
            write!(f, " applicationOID={},", oid)?;
        }
        if let Some(id) = &self.data.id {
            write!(f, " iD={},", helpers::to_hex(id))?;
        }
        write!(f, " value indirect: path: {},}}", self.path)
    }
}
