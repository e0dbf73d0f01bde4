use std::fmt;

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// Path ::= SEQUENCE {
///     efidOrPath OCTET STRING,
///     index INTEGER (0..cia-ub-index) OPTIONAL,
///     length [0] INTEGER (0..cia-ub-index) OPTIONAL
/// } (WITH COMPONENTS {..., index PRESENT, length PRESENT} |
///    WITH COMPONENTS {..., index ABSENT, length ABSENT})
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Colon-separated two-byte file identifiers, e.g. `:3f00:5015`.
    pub efid_or_path: String,
    /// Optional application id prefix for absolute addressing.
    pub aid: Option<String>,
    pub index: Option<i32>,
    pub length: Option<i32>,
}

impl Path {
    pub fn parse(tlv: &Asn1) -> Result<Path> {
        let efid = tlv
            .child(0)
            .ok_or(Error::MalformedEncoding("path without efidOrPath"))?;
        let mut efid_or_path = String::new();
        for pair in efid.value().chunks(2) {
            efid_or_path.push(':');
            efid_or_path.push_str(&helpers::to_hex(pair));
        }
        let mut path = Path {
            efid_or_path,
            aid: None,
            index: None,
            length: None,
        };
        // index and length come together or not at all
        if tlv.children.len() == 3 {
            let index = &tlv.children[1];
            if index.tag != asn1::INTEGER {
                return Err(Error::MalformedEncoding("path index is not an INTEGER"));
            }
            let length = &tlv.children[2];
            if length.tag != 0x80 {
                return Err(Error::MalformedEncoding("path length is not context tag 0"));
            }
            path.index = Some(index.int_value()?);
            path.length = Some(helpers::to_signed(length.value())?);
        }
        Ok(path)
    }

    /// Resolves this path against a DF: a path already rooted at the
    /// master file (`:3F00`) is returned as is, anything else is
    /// prefixed. An aid prefix takes precedence over both.
    pub fn absolute_path(&self, df: &str) -> String {
        if let Some(aid) = &self.aid {
            return format!("{}#{}", aid, self.efid_or_path);
        }
        let lowered = self.efid_or_path.to_lowercase();
        if lowered.starts_with(":3f00") {
            return self.efid_or_path.clone();
        }
        return format!("{}{}", df, self.efid_or_path);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{efidOrPath={}", self.efid_or_path)?;
        if let Some(index) = self.index {
            write!(f, ",index={}", index)?;
        }
        if let Some(length) = self.length {
            write!(f, ",length={}", length)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_efid_as_colon_hex_pairs() {
        let tlv = Asn1::parse(&[0x30, 0x06, 0x04, 0x04, 0x3F, 0x00, 0x50, 0x15]).unwrap();
        let path = Path::parse(&tlv).unwrap();
        assert_eq!(path.efid_or_path, ":3f00:5015");
        assert_eq!(path.index, None);
        assert_eq!(path.length, None);
    }

    #[test]
    fn accepts_empty_efid() {
        let tlv = Asn1::parse(&[0x30, 0x02, 0x04, 0x00]).unwrap();
        let path = Path::parse(&tlv).unwrap();
        assert_eq!(path.efid_or_path, "");
    }

    #[test]
    fn index_and_length_come_together() {
        let tlv = Asn1::parse(&[
            0x30, 0x0A, 0x04, 0x02, 0x44, 0x01, 0x02, 0x01, 0x10, 0x80, 0x01, 0x20,
        ])
        .unwrap();
        let path = Path::parse(&tlv).unwrap();
        assert_eq!(path.efid_or_path, ":4401");
        assert_eq!(path.index, Some(0x10));
        assert_eq!(path.length, Some(0x20));
    }

    #[test]
    fn absolute_path_roots_relative_paths() {
        let path = Path {
            efid_or_path: ":4401".to_string(),
            aid: None,
            index: None,
            length: None,
        };
        assert_eq!(path.absolute_path(":3F00:5015"), ":3F00:5015:4401");

        let rooted = Path {
            efid_or_path: ":3F00:5015:4401".to_string(),
            aid: None,
            index: None,
            length: None,
        };
        assert_eq!(rooted.absolute_path(":3F00"), ":3F00:5015:4401");
    }
}
