use std::fmt;

use bitflags::bitflags;
use simplelog::debug;

use crate::asn1::{self, Asn1};
use crate::types::{Error, Result};

use super::FieldCursor;

bitflags! {
    /// CardInfo.cardFlags, a BIT STRING read MSB-first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CardFlags: u8 {
        const READ_ONLY = 0x80;
        const AUTH_REQUIRED = 0x40;
        const PRNG_GENERATION = 0x20;
    }
}

bitflags! {
    /// AlgorithmInfo.supportedOperations, a BIT STRING read MSB-first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SupportedOperations: u8 {
        const COMPUTE_CHECKSUM = 0x80;
        const COMPUTE_SIGNATURE = 0x40;
        const VERIFY_CHECKSUM = 0x20;
        const VERIFY_SIGNATURE = 0x10;
        const ENCIPHER = 0x08;
        const DECIPHER = 0x04;
        const HASH = 0x02;
        const GENERATE_KEY = 0x01;
    }
}

/// Decodes the following ASN.1 syntax:
///
/// ```text
/// AlgorithmInfo ::= SEQUENCE {
///     reference Reference,
///     algorithm CIO-ALGORITHM.&id({AlgorithmSet}),
///     parameters CIO-ALGORITHM.&Parameters({AlgorithmSet}{@algorithm}),
///     supportedOperations CIO-ALGORITHM.&Operations({AlgorithmSet}{@algorithm}),
///     objId CIO-ALGORITHM.&objectIdentifier({AlgorithmSet}{@algorithm}) OPTIONAL,
///     algRef Reference OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmInfo {
    pub reference: i32,
    pub algorithm: i32,
    pub parameters: Asn1,
    pub supported_operations: SupportedOperations,
    pub obj_id: Option<String>,
    pub alg_ref: Option<i32>,
}

impl AlgorithmInfo {
    pub fn parse(tlv: &Asn1) -> Result<AlgorithmInfo> {
        let mut cursor = FieldCursor::new(tlv);
        let reference = cursor
            .accept(asn1::INTEGER)
            .ok_or(Error::MalformedEncoding("algorithm info without reference"))?
            .int_value()?;
        let algorithm = cursor
            .accept(asn1::INTEGER)
            .ok_or(Error::MalformedEncoding("algorithm info without algorithm"))?
            .int_value()?;
        // parameters is an open type, kept as the raw node
        let parameters = cursor
            .next()
            .ok_or(Error::MalformedEncoding("algorithm info without parameters"))?
            .clone();
        let operations = cursor
            .accept(asn1::BIT_STRING)
            .ok_or(Error::MalformedEncoding(
                "algorithm info without supportedOperations",
            ))?;
        let bits = operations.value();
        let supported_operations =
            SupportedOperations::from_bits_retain(if bits.len() > 1 { bits[1] } else { 0 });
        let mut info = AlgorithmInfo {
            reference,
            algorithm,
            parameters,
            supported_operations,
            obj_id: None,
            alg_ref: None,
        };
        if let Some(t) = cursor.accept(asn1::OBJECT_IDENTIFIER) {
            info.obj_id = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept(asn1::INTEGER) {
            info.alg_ref = Some(t.int_value()?);
        }
        Ok(info)
    }
}

impl fmt::Display for AlgorithmInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{reference={},algorithm={},supportedOperations={:?}",
            self.reference, self.algorithm, self.supported_operations
        )?;
        if let Some(oid) = &self.obj_id {
            write!(f, ",objId={}", oid)?;
        }
        if let Some(alg_ref) = self.alg_ref {
            write!(f, ",algRef={}", alg_ref)?;
        }
        write!(f, "}}")
    }
}

/// Decodes EF.CIAInfo, the card-level metadata file:
///
/// ```text
/// CIAInfo ::= SEQUENCE {
///     version INTEGER {v1(0), v2(1)} (v1|v2,...),
///     serialNumber OCTET STRING OPTIONAL,
///     manufacturerID Label OPTIONAL,
///     label [0] Label OPTIONAL,
///     cardflags CardFlags,
///     seInfo SEQUENCE OF SecurityEnvironmentInfo OPTIONAL,
///     recordInfo [1] RecordInfo OPTIONAL,
///     supportedAlgorithms [2] SEQUENCE OF AlgorithmInfo OPTIONAL,
///     issuerId [3] Label OPTIONAL,
///     holderId [4] Label OPTIONAL,
///     lastUpdate [5] LastUpdate OPTIONAL,
///     preferredLanguage PrintableString OPTIONAL,
///     profileIndication [6] SEQUENCE OF ProfileIndication OPTIONAL,
///     ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CiaInfo {
    pub version: i32,
    pub serial_number: Option<Vec<u8>>,
    pub manufacturer_id: Option<String>,
    pub label: Option<String>,
    pub card_flags: CardFlags,
    pub se_info: bool,
    pub record_info: bool,
    pub supported_algorithms: Vec<AlgorithmInfo>,
    pub issuer_id: bool,
    pub holder_id: bool,
    pub last_update: bool,
    pub preferred_language: Option<String>,
    pub profile_indication: bool,
}

impl CiaInfo {
    pub fn parse(tlv: &Asn1) -> Result<CiaInfo> {
        let mut cursor = FieldCursor::new(tlv);
        let version = cursor
            .accept(asn1::INTEGER)
            .ok_or(Error::MalformedEncoding("CIAInfo without version"))?
            .int_value()?;
        let mut info = CiaInfo {
            version,
            serial_number: None,
            manufacturer_id: None,
            label: None,
            card_flags: CardFlags::empty(),
            se_info: false,
            record_info: false,
            supported_algorithms: Vec::new(),
            issuer_id: false,
            holder_id: false,
            last_update: false,
            preferred_language: None,
            profile_indication: false,
        };
        if let Some(t) = cursor.accept(asn1::OCTET_STRING) {
            info.serial_number = Some(t.value().to_vec());
        }
        if let Some(t) = cursor.accept(asn1::UTF8_STRING) {
            info.manufacturer_id = Some(t.str_value()?);
        }
        if let Some(t) = cursor.accept(0x80) {
            info.label = Some(String::from_utf8_lossy(t.value()).into_owned());
        }
        let flags = cursor
            .accept(asn1::BIT_STRING)
            .ok_or(Error::MalformedEncoding("CIAInfo without cardflags"))?;
        let bits = flags.value();
        info.card_flags = CardFlags::from_bits_retain(if bits.len() > 1 { bits[1] } else { 0 });
        if cursor.accept(asn1::SEQUENCE).is_some() {
            debug!("CIAInfo seInfo present, not further decoded");
            info.se_info = true;
        }
        if cursor.accept(0xA1).is_some() {
            debug!("CIAInfo recordInfo present, not further decoded");
            info.record_info = true;
        }
        if let Some(t) = cursor.accept(0xA2) {
            for algorithm in &t.children {
                info.supported_algorithms.push(AlgorithmInfo::parse(algorithm)?);
            }
        }
        if cursor.accept(0xA3).is_some() {
            debug!("CIAInfo issuerId present, not further decoded");
            info.issuer_id = true;
        }
        if cursor.accept(0xA4).is_some() {
            debug!("CIAInfo holderId present, not further decoded");
            info.holder_id = true;
        }
        if cursor.accept(0xA5).is_some() {
            debug!("CIAInfo lastUpdate present, not further decoded");
            info.last_update = true;
        }
        if let Some(t) = cursor.accept(asn1::PRINTABLE_STRING) {
            info.preferred_language = Some(t.str_value()?);
        }
        if cursor.accept(0xA6).is_some() {
            debug!("CIAInfo profileIndication present, not further decoded");
            info.profile_indication = true;
        }
        Ok(info)
    }
}

impl fmt::Display for CiaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CIAInfo {{version={},", self.version)?;
        if let Some(serial) = &self.serial_number {
            write!(f, "serialNumber={},", crate::helpers::to_hex(serial))?;
        }
        if let Some(id) = &self.manufacturer_id {
            write!(f, "manufacturerID={},", id)?;
        }
        if let Some(label) = &self.label {
            write!(f, "label={},", label)?;
        }
        write!(f, "cardflags={:?},", self.card_flags)?;
        if !self.supported_algorithms.is_empty() {
            write!(f, "supportedAlgorithms=[")?;
            for algorithm in &self.supported_algorithms {
                write!(f, "{},", algorithm)?;
            }
            write!(f, "],")?;
        }
        if let Some(language) = &self.preferred_language {
            write!(f, "preferredLanguage={},", language)?;
        }
        write!(f, "}}")
    }
}
