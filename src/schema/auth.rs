use std::fmt;

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::{CommonObjectAttributes, FieldCursor, Path};

bitflags! {
    /// PinAttributes.pinFlags, a BIT STRING read MSB-first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PasswordFlags: u32 {
        const CASE_SENSITIVE = 0x800000;
        const LOCAL = 0x400000;
        const CHANGE_DISABLED = 0x200000;
        const UNBLOCK_DISABLED = 0x100000;
        const INITIALIZED = 0x080000;
        const NEEDS_PADDING = 0x040000;
        const UNBLOCKING_PASSWORD = 0x020000;
        const SO_PASSWORD = 0x010000;
        const DISABLE_ALLOWED = 0x008000;
        const INTEGRITY_PROTECTED = 0x004000;
        const CONFIDENTIALITY_PROTECTED = 0x002000;
        const EXCHANGE_REF_DATA = 0x001000;
        const RESET_RETRY_COUNTER_1 = 0x000800;
        const RESET_RETRY_COUNTER_2 = 0x000400;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
pub enum PasswordType {
    #[strum(serialize = "BCD")]
    Bcd = 0,
    #[strum(serialize = "ASCII-NUMERIC")]
    AsciiNumeric = 1,
    #[strum(serialize = "UTF8")]
    Utf8 = 2,
    #[strum(serialize = "HALF-NIBBLE-BCD")]
    HalfNibbleBcd = 3,
    #[strum(serialize = "ISO9564-1")]
    Iso9564_1 = 4,
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CommonAuthenticationObjectAttributes ::= SEQUENCE {
///     authId Identifier OPTIONAL,
///     authReference Reference OPTIONAL,
///     seIdentifier [0] Reference OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonAuthenticationObjectAttributes {
    pub auth_id: Option<Vec<u8>>,
    pub auth_reference: Option<i32>,
    pub se_identifier: Option<i32>,
}

impl CommonAuthenticationObjectAttributes {
    pub fn parse(caoa: &Asn1) -> Result<CommonAuthenticationObjectAttributes> {
        let mut cursor = FieldCursor::new(caoa);
        let mut attrs = CommonAuthenticationObjectAttributes::default();
        if let Some(t) = cursor.accept(asn1::OCTET_STRING) {
            attrs.auth_id = Some(t.value().to_vec());
        }
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            attrs.auth_reference = Some(t.int_value()?);
        }
        if let Some(t) = cursor.accept(0x80) {
            attrs.se_identifier = Some(helpers::to_signed(t.value())?);
        }
        Ok(attrs)
    }
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// PasswordAttributes ::= SEQUENCE {
///     pwdFlags PasswordFlags,
///     pwdType PasswordType,
///     minLength INTEGER,
///     storedLength INTEGER OPTIONAL,
///     maxLength INTEGER OPTIONAL,
///     pwdReference [0] Reference DEFAULT 0,
///     padChar OCTET STRING (SIZE(1)) OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordAuthenticationObject {
    pub common: CommonObjectAttributes,
    pub auth: CommonAuthenticationObjectAttributes,
    pub pwd_flags: PasswordFlags,
    pub pwd_type: Option<PasswordType>,
    pub min_length: i32,
    pub stored_length: Option<i32>,
    pub max_length: Option<i32>,
    pub pwd_reference: Option<u32>,
    pub padding: Option<u32>,
    pub path: Option<Path>,
}

impl PasswordAuthenticationObject {
    fn parse(
        common: CommonObjectAttributes,
        auth: CommonAuthenticationObjectAttributes,
        attrs: &Asn1,
    ) -> Result<PasswordAuthenticationObject> {
        let mut cursor = FieldCursor::new(attrs);
        let flags = cursor
            .accept(asn1::BIT_STRING)
            .ok_or(Error::MalformedEncoding("password object without pwdFlags"))?;
        let pwd_flags = PasswordFlags::from_bits_retain(helpers::int_from_bit_string(
            flags.value(),
        )? as u32);
        let pwd_type = cursor
            .accept(asn1::ENUMERATED)
            .map(|t| t.uint_value())
            .transpose()?
            .and_then(PasswordType::from_repr);
        let min_length = cursor
            .accept(asn1::INTEGER)
            .ok_or(Error::MalformedEncoding("password object without minLength"))?
            .int_value()?;

        let mut object = PasswordAuthenticationObject {
            common,
            auth,
            pwd_flags,
            pwd_type,
            min_length,
            stored_length: None,
            max_length: None,
            pwd_reference: None,
            padding: None,
            path: None,
        };
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            object.stored_length = Some(t.int_value()?);
        }
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            object.max_length = Some(t.int_value()?);
        }
        if let Some(t) = cursor.accept(0x80) {
            object.pwd_reference = Some(helpers::to_unsigned(t.value())?);
        }
        if let Some(t) = cursor.accept(asn1::OCTET_STRING) {
            object.padding = Some(helpers::to_unsigned(t.value())?);
        }
        if let Some(t) = cursor.accept(asn1::SEQUENCE) {
            object.path = Some(Path::parse(t)?);
        }
        Ok(object)
    }
}

impl fmt::Display for PasswordAuthenticationObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pwd {{{}", self.common)?;
        if let Some(auth_id) = &self.auth.auth_id {
            write!(f, " authId={},", helpers::to_hex(auth_id))?;
        }
        if let Some(reference) = self.auth.auth_reference {
            write!(f, " authReference={},", reference)?;
        }
        write!(f, " pwdFlags={:?},", self.pwd_flags)?;
        if let Some(pwd_type) = self.pwd_type {
            write!(f, "pwdType={},", pwd_type)?;
        }
        write!(f, "minLength={},", self.min_length)?;
        if let Some(len) = self.stored_length {
            write!(f, "storedLength={},", len)?;
        }
        if let Some(len) = self.max_length {
            write!(f, "maxLength={},", len)?;
        }
        if let Some(reference) = self.pwd_reference {
            write!(f, "pwdReference={},", reference)?;
        }
        if let Some(pad) = self.padding {
            write!(f, "padChar={:02x},", pad)?;
        }
        write!(f, "}}")
    }
}

/// The password branch of the AuthenticationObject CHOICE. Other
/// branches (biometric, external auth) are reported as unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationObject {
    Password(PasswordAuthenticationObject),
}

impl AuthenticationObject {
    pub fn parse(tlv: &Asn1) -> Result<AuthenticationObject> {
        let common = CommonObjectAttributes::from_cio(tlv)?;
        let auth = match tlv.child(1) {
            Some(t) if t.tag == asn1::SEQUENCE => {
                CommonAuthenticationObjectAttributes::parse(t)?
            }
            _ => CommonAuthenticationObjectAttributes::default(),
        };
        let type_attrs = tlv
            .children
            .last()
            .filter(|t| t.tag == 0xA1)
            .ok_or(Error::MalformedEncoding("auth object without typeAttributes"))?;
        let attrs = type_attrs
            .child(0)
            .ok_or(Error::MalformedEncoding("empty auth object typeAttributes"))?;
        if attrs.tag != asn1::SEQUENCE {
            return Err(Error::UnsupportedObjectType(attrs.tag));
        }
        let object = PasswordAuthenticationObject::parse(common, auth, attrs)?;
        Ok(AuthenticationObject::Password(object))
    }
}

impl fmt::Display for AuthenticationObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationObject::Password(object) => object.fmt(f),
        }
    }
}
