use std::fmt;

use simplelog::debug;
use strum::{Display, FromRepr};
use time::PrimitiveDateTime;

use crate::asn1::{self, Asn1};
use crate::helpers;
use crate::types::{Error, Result};

use super::{CommonObjectAttributes, FieldCursor, Path};

/// KeyUsageFlags choice index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
#[strum(serialize_all = "camelCase")]
pub enum KeyUsage {
    Encrypt = 0,
    Decrypt = 1,
    Sign = 2,
    SignRecover = 3,
    Wrap = 4,
    Unwrap = 5,
    Verify = 6,
    VerifyRecover = 7,
    Derive = 8,
    NonRepudiation = 9,
}

/// KeyAccessFlags choice index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
#[strum(serialize_all = "camelCase")]
pub enum KeyAccess {
    Sensitive = 0,
    Extractable = 1,
    AlwaysSensitive = 2,
    NeverExtractable = 3,
    Local = 4,
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CommonKeyAttributes ::= SEQUENCE {
///     iD Identifier,
///     usage KeyUsageFlags,
///     native BOOLEAN DEFAULT TRUE,
///     accessFlags KeyAccessFlags OPTIONAL,
///     keyReference Reference OPTIONAL,
///     startDate GeneralizedTime OPTIONAL,
///     endDate [0] GeneralizedTime OPTIONAL,
///     algReference [1] SEQUENCE OF Reference OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CommonKeyAttributes {
    pub id: Vec<u8>,
    pub usage: KeyUsage,
    pub native: bool,
    pub access_flags: Option<KeyAccess>,
    pub key_reference: Option<i32>,
    pub start_date: Option<PrimitiveDateTime>,
    pub end_date: Option<PrimitiveDateTime>,
    pub alg_reference: Option<Vec<i32>>,
}

impl CommonKeyAttributes {
    pub fn parse(cka: &Asn1) -> Result<CommonKeyAttributes> {
        let mut cursor = FieldCursor::new(cka);
        let id = cursor
            .next()
            .ok_or(Error::MalformedEncoding("key attributes without iD"))?
            .value()
            .to_vec();
        let usage_node = cursor
            .accept(asn1::BIT_STRING)
            .ok_or(Error::MalformedEncoding("key usage is not a BIT STRING"))?;
        let usage = KeyUsage::from_repr(helpers::choice_from_bit_string(usage_node.value())?)
            .ok_or(Error::MalformedEncoding("unknown key usage choice"))?;

        let mut attrs = CommonKeyAttributes {
            id,
            usage,
            native: true,
            access_flags: None,
            key_reference: None,
            start_date: None,
            end_date: None,
            alg_reference: None,
        };
        if let Some(t) = cursor.accept(asn1::BOOLEAN) {
            attrs.native = t.bool_value()?;
        }
        if let Some(t) = cursor.accept(asn1::BIT_STRING) {
            let choice = helpers::choice_from_bit_string(t.value())?;
            attrs.access_flags = Some(
                KeyAccess::from_repr(choice)
                    .ok_or(Error::MalformedEncoding("unknown key access choice"))?,
            );
        }
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            attrs.key_reference = Some(t.int_value()?);
        }
        if let Some(t) = cursor.accept(asn1::GENERALIZED_TIME) {
            attrs.start_date = Some(t.date_time_value()?);
        }
        if let Some(t) = cursor.accept(0x80) {
            let text = String::from_utf8(t.value().to_vec())
                .map_err(|_| Error::MalformedEncoding("non-ASCII byte in time value"))?;
            attrs.end_date = Some(asn1::parse_generalized_time(&text)?);
        }
        if let Some(t) = cursor.accept(0xA1) {
            let mut references = Vec::new();
            for child in &t.children {
                if child.tag != asn1::INTEGER {
                    return Err(Error::MalformedEncoding("algReference entry not an INTEGER"));
                }
                references.push(child.int_value()?);
            }
            attrs.alg_reference = Some(references);
        }
        Ok(attrs)
    }
}

impl fmt::Display for CommonKeyAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "commonKeyAttributes {{iD={},usage={},native={},",
            helpers::to_hex(&self.id),
            self.usage,
            self.native
        )?;
        if let Some(access) = self.access_flags {
            write!(f, "accessFlags={},", access)?;
        }
        if let Some(reference) = self.key_reference {
            write!(f, "keyReference=0x{:X},", reference)?;
        }
        if let Some(date) = self.start_date {
            write!(f, "startDate={},", date)?;
        }
        if let Some(date) = self.end_date {
            write!(f, "endDate={},", date)?;
        }
        if let Some(references) = &self.alg_reference {
            let references: Vec<String> =
                references.iter().map(|r| format!("0x{:02X}", r)).collect();
            write!(f, "algReference={},", references.join(":"))?;
        }
        write!(f, "}}")
    }
}

/// One AttributeTypeAndValue pair from a RelativeDistinguishedName.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAttribute {
    pub oid: String,
    pub value: String,
}

/// An X.501 Name, flattened to the attribute pairs of its rdnSequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub attributes: Vec<NameAttribute>,
}

impl DistinguishedName {
    pub fn parse(tlv: &Asn1) -> Result<DistinguishedName> {
        let mut attributes = Vec::new();
        for rdn in &tlv.children {
            for pair in &rdn.children {
                let oid_node = pair
                    .child(0)
                    .filter(|t| t.tag == asn1::OBJECT_IDENTIFIER)
                    .ok_or(Error::MalformedEncoding("RDN attribute without a type OID"))?;
                let value_node = pair
                    .child(1)
                    .ok_or(Error::MalformedEncoding("RDN attribute without a value"))?;
                let value = match value_node.tag {
                    asn1::UTF8_STRING
                    | asn1::NUMERIC_STRING
                    | asn1::PRINTABLE_STRING
                    | asn1::T61_STRING
                    | asn1::VIDEOTEX_STRING
                    | asn1::IA5_STRING
                    | asn1::GRAPHIC_STRING
                    | asn1::VISIBLE_STRING
                    | asn1::GENERAL_STRING
                    | asn1::BMP_STRING => value_node.str_value()?,
                    // non-string values render as '#'-prefixed hex
                    _ => format!("#{}", helpers::to_hex(value_node.value())),
                };
                attributes.push(NameAttribute {
                    oid: helpers::bytes_to_oid(oid_node.value())?,
                    value,
                });
            }
        }
        Ok(DistinguishedName { attributes })
    }
}

/// Short symbol for the X.520 attribute types usually seen in card
/// subject names. Unlisted types fall back to the dotted OID.
fn attribute_symbol(oid: &str) -> Option<&'static str> {
    let symbol = match oid {
        "2.5.4.3" => "CN",
        "2.5.4.4" => "SURNAME",
        "2.5.4.5" => "SERIALNUMBER",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.12" => "T",
        "2.5.4.42" => "GIVENNAME",
        "2.5.4.43" => "INITIALS",
        "2.5.4.44" => "GENERATION",
        "2.5.4.46" => "DN",
        "2.5.4.65" => "Pseudonym",
        "1.2.840.113549.1.9.1" => "E",
        "0.9.2342.19200300.100.1.1" => "UID",
        "0.9.2342.19200300.100.1.25" => "DC",
        _ => return None,
    };
    return Some(symbol);
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match attribute_symbol(&attr.oid) {
                Some(symbol) => write!(f, "{}={}", symbol, attr.value)?,
                None => write!(f, "{}={}", attr.oid, attr.value)?,
            }
        }
        Ok(())
    }
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// CredentialIdentifier ::= SEQUENCE {
///     idType KEY-IDENTIFIER.&id,
///     idValue KEY-IDENTIFIER.&Value
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialIdentifier {
    pub id_type: i32,
    pub id_value: Vec<u8>,
}

impl CredentialIdentifier {
    pub fn parse(tlv: &Asn1) -> Result<CredentialIdentifier> {
        let id_type = tlv
            .child(0)
            .ok_or(Error::MalformedEncoding("credential identifier without idType"))?
            .int_value()?;
        let id_value = tlv
            .child(1)
            .ok_or(Error::MalformedEncoding("credential identifier without idValue"))?
            .value()
            .to_vec();
        Ok(CredentialIdentifier { id_type, id_value })
    }
}

impl fmt::Display for CredentialIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "credentialIdentifier {{idType={},idValue={}}}",
            self.id_type,
            helpers::to_hex(&self.id_value)
        )
    }
}

/// Decodes the following ASN.1 syntax, carried in the `[0]`
/// subClassAttributes slot of a private key CIO:
///
/// ```text
/// CommonPrivateKeyAttributes ::= SEQUENCE {
///     subjectName Name OPTIONAL,
///     keyIdentifiers [0] SEQUENCE OF CredentialIdentifier OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonPrivateKeyAttributes {
    pub subject_name: Option<DistinguishedName>,
    pub key_identifiers: Vec<CredentialIdentifier>,
}

impl CommonPrivateKeyAttributes {
    pub fn parse(sub: &Asn1) -> Result<CommonPrivateKeyAttributes> {
        let mut cursor = FieldCursor::new(sub);
        let mut attrs = CommonPrivateKeyAttributes::default();
        if let Some(t) = cursor.accept(asn1::SEQUENCE) {
            attrs.subject_name = Some(DistinguishedName::parse(t)?);
        }
        if let Some(t) = cursor.accept(0xA0) {
            for child in &t.children {
                attrs.key_identifiers.push(CredentialIdentifier::parse(child)?);
            }
        }
        Ok(attrs)
    }
}

impl fmt::Display for CommonPrivateKeyAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subClassAttributes {{")?;
        if let Some(name) = &self.subject_name {
            write!(f, "subjectName rdnSequence: {{{}}},", name)?;
        }
        if !self.key_identifiers.is_empty() {
            let idents: Vec<String> =
                self.key_identifiers.iter().map(|i| i.to_string()).collect();
            write!(f, "keyIdentifiers {{{}}},", idents.join(","))?;
        }
        write!(f, "}}")
    }
}

/// The RSA and EC key type branches share this shape: an indirect path
/// to the key material plus, for RSA, the modulus length in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum KeyKind {
    Rsa,
    Ec,
}

/// A private key CIO.
///
/// ```text
/// PrivateKeyType ::= CHOICE {
///     privateRSAKey PrivateKeyObject { PrivateRSAKeyAttributes },
///     privateECKey [0] PrivateKeyObject { PrivateECKeyAttributes }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateKey {
    pub common: CommonObjectAttributes,
    pub key: CommonKeyAttributes,
    pub subclass: Option<CommonPrivateKeyAttributes>,
    pub kind: KeyKind,
    pub path: Path,
    /// Modulus length in bits, RSA keys only.
    pub modulus_length: Option<i32>,
}

impl PrivateKey {
    pub fn parse(tlv: &Asn1) -> Result<PrivateKey> {
        let common = CommonObjectAttributes::from_cio(tlv)?;
        let key = CommonKeyAttributes::parse(
            tlv.child(1)
                .ok_or(Error::MalformedEncoding("key CIO without commonKeyAttributes"))?,
        )?;
        let subclass = match tlv.child(2).filter(|t| t.tag == 0xA0) {
            Some(sub) => Some(CommonPrivateKeyAttributes::parse(sub)?),
            None => None,
        };
        let (kind, path, modulus_length) = parse_key_type_attributes(tlv)?;
        Ok(PrivateKey {
            common,
            key,
            subclass,
            kind,
            path,
            modulus_length,
        })
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "private{}Key {{{} {}", self.kind, self.common, self.key)?;
        if let Some(sub) = &self.subclass {
            write!(f, " {}", sub)?;
        }
        write!(f, " value indirect: path: {}", self.path)?;
        if let Some(bits) = self.modulus_length {
            write!(f, ",modulusLength={}", bits)?;
        }
        write!(f, "}}")
    }
}

/// A public key CIO, mirroring [`PrivateKey`] per the PublicKeyType CHOICE.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKey {
    pub common: CommonObjectAttributes,
    pub key: CommonKeyAttributes,
    pub kind: KeyKind,
    pub path: Path,
    pub modulus_length: Option<i32>,
}

impl PublicKey {
    pub fn parse(tlv: &Asn1) -> Result<PublicKey> {
        let common = CommonObjectAttributes::from_cio(tlv)?;
        let key = CommonKeyAttributes::parse(
            tlv.child(1)
                .ok_or(Error::MalformedEncoding("key CIO without commonKeyAttributes"))?,
        )?;
        if let Some(sub) = tlv.child(2).filter(|t| t.tag == 0xA0) {
            debug!("trustedUsage not further decoded: {}", sub);
        }
        let (kind, path, modulus_length) = parse_key_type_attributes(tlv)?;
        Ok(PublicKey {
            common,
            key,
            kind,
            path,
            modulus_length,
        })
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "public{}Key {{{} {} value indirect: path: {}",
            self.kind, self.common, self.key, self.path
        )?;
        if let Some(bits) = self.modulus_length {
            write!(f, ",modulusLength={}", bits)?;
        }
        write!(f, "}}")
    }
}

/// Decodes the `[1]` typeAttributes slot at the end of a key CIO. The CIO's
/// own tag selects the branch: SEQUENCE is RSA, context tag 0 is EC.
/// Anything else is an unsupported key type, distinct from a malformed one.
fn parse_key_type_attributes(tlv: &Asn1) -> Result<(KeyKind, Path, Option<i32>)> {
    let type_attrs = tlv
        .children
        .last()
        .filter(|t| t.tag == 0xA1)
        .ok_or(Error::MalformedEncoding("key CIO without typeAttributes"))?;
    let attrs = type_attrs
        .child(0)
        .ok_or(Error::MalformedEncoding("empty key typeAttributes"))?;
    let kind = match tlv.tag {
        asn1::SEQUENCE => KeyKind::Rsa,
        0xA0 => KeyKind::Ec,
        tag => return Err(Error::UnsupportedObjectType(tag)),
    };
    let path = Path::parse(
        attrs
            .child(0)
            .ok_or(Error::MalformedEncoding("key typeAttributes without value path"))?,
    )?;
    let modulus_length = match kind {
        KeyKind::Rsa => {
            let t = attrs
                .child(1)
                .filter(|t| t.tag == asn1::INTEGER)
                .ok_or(Error::MalformedEncoding("RSA key without modulusLength"))?;
            Some(t.int_value()?)
        }
        KeyKind::Ec => None,
    };
    Ok((kind, path, modulus_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn key_attributes(payload: &str) -> CommonKeyAttributes {
        let tlv = Asn1::parse(&hex::decode(payload).unwrap()).unwrap();
        CommonKeyAttributes::parse(&tlv).unwrap()
    }

    #[test]
    fn usage_choice_and_defaults() {
        // iD 01, usage sign (choice 2), nothing else
        let attrs = key_attributes("30090401010304052000c0");
        assert_eq!(attrs.id, vec![0x01]);
        assert_eq!(attrs.usage, KeyUsage::Sign);
        assert!(attrs.native);
        assert!(attrs.access_flags.is_none());
        assert!(attrs.key_reference.is_none());
    }

    #[test]
    fn optional_fields_in_order() {
        // iD 02, usage nonRepudiation, native FALSE, keyReference 0x81
        let attrs = key_attributes("300e0401020303060040010100020181");
        assert_eq!(attrs.usage, KeyUsage::NonRepudiation);
        assert!(!attrs.native);
        assert_eq!(attrs.key_reference, Some(-127));
    }

    #[test]
    fn context_wrapped_end_date() {
        let start = Asn1::from_tag_and_value(asn1::GENERALIZED_TIME, b"20200101000000.0000Z")
            .unwrap();
        let end = Asn1::from_tag_and_value(0x80, b"20300101000000.0000Z").unwrap();
        let mut value = vec![0x04, 0x01, 0x05, 0x03, 0x02, 0x06, 0x80];
        value.extend(start.to_bytes());
        value.extend(end.to_bytes());
        let cka = Asn1::from_tag_and_value(0x30, &value).unwrap();
        let attrs = CommonKeyAttributes::parse(&cka).unwrap();
        assert_eq!(attrs.usage, KeyUsage::Encrypt);
        assert_eq!(attrs.start_date, Some(datetime!(2020-01-01 00:00:00)));
        assert_eq!(attrs.end_date, Some(datetime!(2030-01-01 00:00:00)));
    }

    fn private_key_cio(subclass: &Asn1) -> Asn1 {
        let coa = Asn1::from_tag_and_value(0x30, &[]).unwrap();
        let cka = Asn1::from_tag_and_value(0x30, &[0x04, 0x01, 0x01, 0x03, 0x02, 0x06, 0x40])
            .unwrap();
        let path = Asn1::from_tag_and_value(0x30, &[0x04, 0x00]).unwrap();
        let mut rsa = path.to_bytes();
        rsa.extend(Asn1::from_tag_and_value(0x02, &[0x04, 0x00]).unwrap().to_bytes());
        let rsa = Asn1::from_tag_and_value(0x30, &rsa).unwrap();
        let type_attrs = Asn1::from_tag_and_value(0xA1, &rsa.to_bytes()).unwrap();
        let mut value = coa.to_bytes();
        value.extend(cka.to_bytes());
        value.extend(subclass.to_bytes());
        value.extend(type_attrs.to_bytes());
        return Asn1::from_tag_and_value(0x30, &value).unwrap();
    }

    #[test]
    fn subject_name_in_subclass_attributes() {
        let oid = Asn1::from_tag_and_value(
            asn1::OBJECT_IDENTIFIER,
            &helpers::oid_to_bytes("2.5.4.3").unwrap(),
        )
        .unwrap();
        let cn = Asn1::from_tag_and_value(asn1::PRINTABLE_STRING, b"Card User").unwrap();
        let mut pair = oid.to_bytes();
        pair.extend(cn.to_bytes());
        let pair = Asn1::from_tag_and_value(asn1::SEQUENCE, &pair).unwrap();
        let rdn = Asn1::from_tag_and_value(asn1::SET, &pair.to_bytes()).unwrap();
        let name = Asn1::from_tag_and_value(asn1::SEQUENCE, &rdn.to_bytes()).unwrap();
        let subclass = Asn1::from_tag_and_value(0xA0, &name.to_bytes()).unwrap();

        let key = PrivateKey::parse(&private_key_cio(&subclass)).unwrap();
        let subject = key.subclass.as_ref().unwrap().subject_name.as_ref().unwrap();
        assert_eq!(subject.attributes.len(), 1);
        assert_eq!(subject.attributes[0].oid, "2.5.4.3");
        assert_eq!(subject.attributes[0].value, "Card User");
        assert_eq!(subject.to_string(), "CN=Card User");
        assert!(key.to_string().contains("subjectName rdnSequence: {CN=Card User}"));
    }

    #[test]
    fn key_identifiers_in_subclass_attributes() {
        let id_type = Asn1::from_tag_and_value(0x02, &[0x01]).unwrap();
        let id_value = Asn1::from_tag_and_value(0x04, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let mut ident = id_type.to_bytes();
        ident.extend(id_value.to_bytes());
        let ident = Asn1::from_tag_and_value(0x30, &ident).unwrap();
        let idents = Asn1::from_tag_and_value(0xA0, &ident.to_bytes()).unwrap();
        let subclass = Asn1::from_tag_and_value(0xA0, &idents.to_bytes()).unwrap();

        let key = PrivateKey::parse(&private_key_cio(&subclass)).unwrap();
        let subclass = key.subclass.as_ref().unwrap();
        assert!(subclass.subject_name.is_none());
        assert_eq!(subclass.key_identifiers.len(), 1);
        assert_eq!(subclass.key_identifiers[0].id_type, 1);
        assert_eq!(subclass.key_identifiers[0].id_value, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(key.to_string().contains("keyIdentifiers {credentialIdentifier {idType=1,idValue=deadbeef}}"));
    }

    #[test]
    fn non_string_rdn_values_render_as_hex() {
        let oid = Asn1::from_tag_and_value(
            asn1::OBJECT_IDENTIFIER,
            &helpers::oid_to_bytes("2.5.4.5").unwrap(),
        )
        .unwrap();
        let serial = Asn1::from_tag_and_value(asn1::OCTET_STRING, &[0x01, 0x02]).unwrap();
        let mut pair = oid.to_bytes();
        pair.extend(serial.to_bytes());
        let pair = Asn1::from_tag_and_value(asn1::SEQUENCE, &pair).unwrap();
        let rdn = Asn1::from_tag_and_value(asn1::SET, &pair.to_bytes()).unwrap();
        let name = Asn1::from_tag_and_value(asn1::SEQUENCE, &rdn.to_bytes()).unwrap();

        let subject = DistinguishedName::parse(&name).unwrap();
        assert_eq!(subject.attributes[0].value, "#0102");
        assert_eq!(subject.to_string(), "SERIALNUMBER=#0102");
    }

    #[test]
    fn unsupported_key_choice_is_distinct() {
        // outer tag [1] is neither the RSA nor the EC branch
        let coa = Asn1::from_tag_and_value(0x30, &[]).unwrap();
        let cka = Asn1::from_tag_and_value(0x30, &[0x04, 0x01, 0x01, 0x03, 0x02, 0x06, 0x40])
            .unwrap();
        let type_attrs =
            Asn1::from_tag_and_value(0xA1, &Asn1::from_tag_and_value(0x30, &[]).unwrap().to_bytes())
                .unwrap();
        let mut value = coa.to_bytes();
        value.extend(cka.to_bytes());
        value.extend(type_attrs.to_bytes());
        let cio = Asn1::from_tag_and_value(0xA1, &value).unwrap();
        assert!(matches!(
            PrivateKey::parse(&cio),
            Err(Error::UnsupportedObjectType(0xA1))
        ));
    }
}
