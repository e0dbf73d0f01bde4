use std::fmt;

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::{FieldCursor, Path};

/// The DDO template carried inside an EF.DIR entry (tag 0x73). Points
/// at the application's ODF and EF.CIAInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ddo {
    pub oid: Option<String>,
    pub odf_path: Option<Path>,
    pub cia_info_path: Option<Path>,
}

impl Ddo {
    pub fn parse(tlv: &Asn1) -> Result<Ddo> {
        let mut cursor = FieldCursor::new(tlv);
        let mut ddo = Ddo::default();
        if let Some(t) = cursor.accept(asn1::OBJECT_IDENTIFIER) {
            ddo.oid = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept_if(|t| t.tag & 0x30 == 0x30) {
            ddo.odf_path = Some(Path::parse(t)?);
        }
        if let Some(t) = cursor.accept(0xA0) {
            ddo.cia_info_path = Some(Path::parse(t)?);
        }
        Ok(ddo)
    }
}

impl fmt::Display for Ddo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        if let Some(oid) = &self.oid {
            write!(f, "oid={},", oid)?;
        }
        if let Some(path) = &self.odf_path {
            write!(f, "odfPath={},", path)?;
        }
        if let Some(path) = &self.cia_info_path {
            write!(f, "ciaInfoPath={},", path)?;
        }
        write!(f, "}}")
    }
}

/// One EF.DIR application template (ISO 7816-4 tag 0x61).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationTemplate {
    pub aid: String,
    pub label: Option<String>,
    pub path: Option<String>,
    pub ddo: Ddo,
}

impl ApplicationTemplate {
    pub fn parse(tlv: &Asn1) -> Result<ApplicationTemplate> {
        if tlv.tag != 0x61 {
            return Err(Error::MalformedEncoding("application template tag is not 0x61"));
        }
        let mut aid = None;
        let mut label = None;
        let mut path = None;
        let mut ddo = None;
        for child in &tlv.children {
            match child.tag {
                0x4F => aid = Some(helpers::to_hex(child.value())),
                0x50 => label = Some(String::from_utf8_lossy(child.value()).into_owned()),
                0x51 => path = Some(format!(":{}", helpers::to_hex(child.value()))),
                0x73 => ddo = Some(Ddo::parse(child)?),
                _ => {}
            }
        }
        let aid = aid.ok_or(Error::MalformedEncoding("application template without AID"))?;
        Ok(ApplicationTemplate {
            aid,
            label,
            path,
            // cards without a DDO get default paths filled in later
            ddo: ddo.unwrap_or_default(),
        })
    }
}

impl fmt::Display for ApplicationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{aid={},", self.aid)?;
        if let Some(label) = &self.label {
            write!(f, "label={},", label)?;
        }
        if let Some(path) = &self.path {
            write!(f, "path={},", path)?;
        }
        write!(f, "ddo={},}}", self.ddo)
    }
}
