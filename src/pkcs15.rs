//! The directory walker: reads EF.DIR, follows each application's DDO
//! to its object directory file, and decodes every cryptographic
//! information object the ODF points at.

use std::collections::HashMap;

use simplelog::{debug, error, info, warn};

use crate::asn1::Asn1;
use crate::schema::{ApplicationTemplate, CiaInfo, Cio, CioCategory, Path};
use crate::smartcard_abstractions::{CardController, CardFile};
use crate::types::{CardError, Error, Result};

/// EF.DIR lives at a fixed place in the master file.
const EF_DIR_PATH: &str = ":3F00:2F00";

pub struct Pkcs15<C: CardController> {
    card: C,
}

impl<C: CardController> Pkcs15<C> {
    pub fn new(card: C) -> Pkcs15<C> {
        return Pkcs15 { card };
    }

    pub fn card(&self) -> &C {
        &self.card
    }

    /// Reads EF.DIR and returns the application templates it lists,
    /// keyed by hex AID.
    ///
    /// Transparent EF.DIR files are a concatenation of `0x61` templates
    /// with possible garbage in between; anything that is not a
    /// template is skipped byte by byte until the next `0x61`. For
    /// record-oriented files each record holds one template.
    pub fn read_application_directory(&mut self) -> Result<HashMap<String, ApplicationTemplate>> {
        let ef_dir = self.card.open(EF_DIR_PATH)?;
        let mut applications = HashMap::new();
        if ef_dir.is_transparent() {
            let data = ef_dir.read_all()?;
            let mut offset = 0;
            while offset < data.len() {
                if data[offset] != 0x61 {
                    offset += 1;
                    continue;
                }
                let tlv = match Asn1::parse_at(&data, offset) {
                    Ok(tlv) => tlv,
                    Err(err) => {
                        debug!("Not a template at EF.DIR offset {}: {}", offset, err);
                        offset += 1;
                        continue;
                    }
                };
                offset += tlv.total_length;
                match ApplicationTemplate::parse(&tlv) {
                    Ok(template) => {
                        applications.insert(template.aid.clone(), template);
                    }
                    Err(err) => warn!("Skipping EF.DIR entry: {}", err),
                }
            }
        } else {
            for record in 1..=255 {
                let data = match ef_dir.read_record(record) {
                    Ok(data) => data,
                    Err(CardError::NoSuchRecord) => break,
                    Err(err) => {
                        error!("Reading EF.DIR record {} failed: {}", record, err);
                        return Err(err.into());
                    }
                };
                let template = ApplicationTemplate::parse(&Asn1::parse(&data)?)?;
                applications.insert(template.aid.clone(), template);
            }
        }
        return Ok(applications);
    }

    /// Reads the raw contents of one file addressed by a PKCS #15 path,
    /// honoring the path's optional offset and length.
    pub fn read_card_object(&mut self, df: &str, path: &Path) -> Result<Vec<u8>> {
        let absolute = path.absolute_path(df);
        debug!("Reading object from {}", absolute);
        let ef = self.card.open(&absolute)?;
        let data = if path.index.is_some() {
            ef.read_range(path.index.map(|i| i as u32), path.length.map(|l| l as u32))?
        } else {
            ef.read_all()?
        };
        Ok(data)
    }

    /// Reads a file holding back-to-back TLV objects and returns them
    /// in order.
    ///
    /// Transparent files may pad between objects with `0x00` or `0xFF`
    /// bytes, which are skipped. A truncated or malformed trailing TLV
    /// is logged and dropped, keeping the objects decoded so far.
    /// Record-oriented files carry one object per record behind a
    /// 2-byte record header; empty records are skipped.
    pub fn read_card_objects(&mut self, df: &str, path: &Path) -> Result<Vec<Asn1>> {
        let absolute = path.absolute_path(df);
        debug!("Reading objects from {}", absolute);
        let ef = self.card.open(&absolute)?;
        let mut list = Vec::new();
        if ef.is_transparent() {
            let data =
                ef.read_range(path.index.map(|i| i as u32), path.length.map(|l| l as u32))?;
            let mut offset = 0;
            while offset < data.len() {
                if data[offset] == 0x00 || data[offset] == 0xFF {
                    offset += 1;
                    continue;
                }
                match Asn1::parse_at(&data, offset) {
                    Ok(tlv) => {
                        offset += tlv.total_length;
                        list.push(tlv);
                    }
                    Err(err) => {
                        error!(
                            "Error reading cryptographic information object: {} in {}",
                            err,
                            crate::helpers::to_hex(&data[offset..])
                        );
                        break;
                    }
                }
            }
        } else {
            for record in 1..=255 {
                let data = match ef.read_record(record) {
                    Ok(data) => data,
                    Err(CardError::NoSuchRecord) => break,
                    Err(err) => {
                        error!("Reading record {} failed: {}", record, err);
                        return Err(err.into());
                    }
                };
                // records carry a 2-byte header before the TLV
                if data.len() <= 4 {
                    continue;
                }
                match Asn1::parse(&data[2..]) {
                    Ok(tlv) => list.push(tlv),
                    Err(err) => {
                        error!(
                            "Error reading cryptographic information object: {} in {}",
                            err,
                            crate::helpers::to_hex(&data[2..])
                        );
                    }
                }
            }
        }
        return Ok(list);
    }

    /// Strictly parses a buffer of back-to-back TLV objects, skipping
    /// pad bytes. Unlike [`read_card_objects`](Self::read_card_objects)
    /// any malformed object fails the whole parse.
    pub fn parse_object_list(data: &[u8]) -> Result<Vec<Asn1>> {
        let mut list = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            if data[offset] == 0x00 || data[offset] == 0xFF {
                offset += 1;
                continue;
            }
            let tlv = Asn1::parse_at(data, offset)?;
            offset += tlv.total_length;
            list.push(tlv);
        }
        return Ok(list);
    }

    /// Reads and decodes EF.CIAInfo for an application whose DDO names
    /// its location.
    pub fn read_cia_info(&mut self, template: &ApplicationTemplate) -> Result<CiaInfo> {
        let path = template
            .ddo
            .cia_info_path
            .as_ref()
            .ok_or(Error::Configuration("application has no ciaInfoPath"))?;
        let data = self.read_card_object(":3F00", path)?;
        return CiaInfo::parse(&Asn1::parse(&data)?);
    }

    /// Walks one application's ODF and decodes every object it points
    /// at.
    ///
    /// One malformed object never aborts the walk: decode failures are
    /// logged and the object skipped, and a category file that cannot
    /// be read at all is logged and skipped as a whole. Only a missing
    /// ODF path (or a card error on the ODF itself) fails the call.
    pub fn read_object_list_for_application(
        &mut self,
        template: &ApplicationTemplate,
    ) -> Result<Vec<Cio>> {
        let odf_path = template
            .ddo
            .odf_path
            .as_ref()
            .ok_or(Error::Configuration("application has no odfPath"))?;

        if !template.aid.is_empty() {
            // some cards list an AID that cannot be selected but still
            // resolve the ODF by absolute path
            if let Err(err) = self.card.select_application(&template.aid) {
                warn!("Selecting application {} failed: {}", template.aid, err);
            }
        }

        let entries = self.read_card_objects(":3F00", odf_path)?;

        let df = odf_path.absolute_path(":3F00");
        if df.len() < 5 {
            return Err(Error::Configuration("ODF path is too short"));
        }
        let df = &df[..df.len() - 5];
        let upper_path = &odf_path.efid_or_path[..odf_path.efid_or_path.len().saturating_sub(5)];

        let mut objects = Vec::new();
        for entry in &entries {
            let Some(category) = CioCategory::from_repr(entry.tag) else {
                warn!("Unknown ODF entry tag 0x{:02x}, skipping", entry.tag);
                continue;
            };
            let path_node = match entry.child(0) {
                Some(node) => node,
                None => {
                    warn!("Empty ODF entry for {}, skipping", category);
                    continue;
                }
            };
            let mut path = match Path::parse(path_node) {
                Ok(path) => path,
                Err(err) => {
                    error!("Bad path in ODF entry for {}: {}", category, err);
                    continue;
                }
            };
            // some cards emit CIO paths rooted under the wrong DF
            if !path.efid_or_path.starts_with(upper_path)
                && path.efid_or_path.len() >= upper_path.len()
            {
                path.efid_or_path =
                    format!("{}{}", upper_path, &path.efid_or_path[upper_path.len()..]);
            }
            let cios = match self.read_card_objects(df, &path) {
                Ok(cios) => cios,
                Err(err) => {
                    error!("Reading {} at {} failed: {}", category, path, err);
                    continue;
                }
            };
            for tlv in &cios {
                match Cio::decode(category, tlv) {
                    Ok(cio) => {
                        info!("{}: {}", category, cio);
                        objects.push(cio);
                    }
                    Err(err) => {
                        error!("Skipping an object in {}: {}", category, err);
                    }
                }
            }
        }
        return Ok(objects);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::result::Result;

    use super::*;
    use crate::schema::{AccessMode, Ddo};

    enum MockFile {
        Transparent(Vec<u8>),
        Records(Vec<Vec<u8>>),
        FailingRecords(Vec<Vec<u8>>, u8),
    }

    struct MockHandle {
        transparent: bool,
        data: Vec<u8>,
        records: Vec<Vec<u8>>,
        failing_record: Option<u8>,
    }

    impl CardFile for MockHandle {
        fn is_transparent(&self) -> bool {
            self.transparent
        }

        fn length(&self) -> u32 {
            self.data.len() as u32
        }

        fn read_all(&self) -> Result<Vec<u8>, CardError> {
            Ok(self.data.clone())
        }

        fn read_range(
            &self,
            offset: Option<u32>,
            length: Option<u32>,
        ) -> Result<Vec<u8>, CardError> {
            let offset = offset.unwrap_or(0) as usize;
            if offset > self.data.len() {
                return Err(CardError::OutOfRange(format!("offset {}", offset)));
            }
            let remaining = self.data.len() - offset;
            let length = length.map(|l| l as usize).unwrap_or(remaining).min(remaining);
            Ok(self.data[offset..offset + length].to_vec())
        }

        fn read_record(&self, record: u8) -> Result<Vec<u8>, CardError> {
            if self.transparent {
                return Err(CardError::NoSuchRecord);
            }
            if self.failing_record == Some(record) {
                return Err(CardError::Io("record read failed".to_string()));
            }
            self.records
                .get(record as usize - 1)
                .cloned()
                .ok_or(CardError::NoSuchRecord)
        }
    }

    struct MockCard {
        files: HashMap<String, MockFile>,
        selected: Vec<String>,
    }

    impl MockCard {
        fn new() -> MockCard {
            MockCard {
                files: HashMap::new(),
                selected: Vec::new(),
            }
        }

        fn transparent(mut self, path: &str, data: Vec<u8>) -> MockCard {
            self.files.insert(path.to_string(), MockFile::Transparent(data));
            self
        }

        fn records(mut self, path: &str, records: Vec<Vec<u8>>) -> MockCard {
            self.files.insert(path.to_string(), MockFile::Records(records));
            self
        }

        fn records_failing_at(mut self, path: &str, records: Vec<Vec<u8>>, failing: u8) -> MockCard {
            self.files
                .insert(path.to_string(), MockFile::FailingRecords(records, failing));
            self
        }
    }

    impl CardController for MockCard {
        type File = MockHandle;

        fn select_application(&mut self, aid: &str) -> Result<(), CardError> {
            self.selected.push(aid.to_string());
            Ok(())
        }

        fn open(&mut self, path: &str) -> Result<Self::File, CardError> {
            let path = path.rsplit('#').next().unwrap_or(path);
            match self.files.get(path) {
                Some(MockFile::Transparent(data)) => Ok(MockHandle {
                    transparent: true,
                    data: data.clone(),
                    records: Vec::new(),
                    failing_record: None,
                }),
                Some(MockFile::Records(records)) => Ok(MockHandle {
                    transparent: false,
                    data: Vec::new(),
                    records: records.clone(),
                    failing_record: None,
                }),
                Some(MockFile::FailingRecords(records, failing)) => Ok(MockHandle {
                    transparent: false,
                    data: Vec::new(),
                    records: records.clone(),
                    failing_record: Some(*failing),
                }),
                None => Err(CardError::NotFound(path.to_string())),
            }
        }
    }

    fn ef_dir_entry() -> Vec<u8> {
        // application template for AID a0000002 with an ODF at :5031
        let aid = Asn1::from_tag_and_value(0x4F, &[0xA0, 0x00, 0x00, 0x02]).unwrap();
        let odf_efid = Asn1::from_tag_and_value(0x04, &[0x50, 0x31]).unwrap();
        let odf_path = Asn1::from_tag_and_value(0x30, &odf_efid.to_bytes()).unwrap();
        let ddo = Asn1::from_tag_and_value(0x73, &odf_path.to_bytes()).unwrap();
        let mut inner = aid.to_bytes();
        inner.extend(ddo.to_bytes());
        Asn1::from_tag_and_value(0x61, &inner).unwrap().to_bytes()
    }

    const PRKDF: &str = "3040301E0C0950724B2E43482E4453020103300E300C03020520A20604010704010A300C040101030306004002020082A00430023000A10A30083002040002020400";

    #[test]
    fn walks_transparent_ef_dir() {
        let card = MockCard::new().transparent(":3F00:2F00", ef_dir_entry());
        let mut pkcs15 = Pkcs15::new(card);
        let applications = pkcs15.read_application_directory().unwrap();
        assert_eq!(applications.len(), 1);
        let template = &applications["a0000002"];
        assert_eq!(
            template.ddo.odf_path.as_ref().unwrap().efid_or_path,
            ":5031"
        );
    }

    #[test]
    fn ef_dir_skips_noise_between_templates() {
        let mut data = vec![0x00, 0x42];
        data.extend(ef_dir_entry());
        data.extend([0xFF, 0xFF]);
        let card = MockCard::new().transparent(":3F00:2F00", data);
        let mut pkcs15 = Pkcs15::new(card);
        let applications = pkcs15.read_application_directory().unwrap();
        assert_eq!(applications.len(), 1);
        assert!(applications.contains_key("a0000002"));
    }

    #[test]
    fn walks_record_oriented_ef_dir() {
        let card = MockCard::new().records(":3F00:2F00", vec![ef_dir_entry()]);
        let mut pkcs15 = Pkcs15::new(card);
        let applications = pkcs15.read_application_directory().unwrap();
        assert!(applications.contains_key("a0000002"));
    }

    #[test]
    fn missing_odf_path_is_a_configuration_error() {
        let card = MockCard::new();
        let mut pkcs15 = Pkcs15::new(card);
        let template = ApplicationTemplate {
            aid: "a0000002".to_string(),
            label: None,
            path: None,
            ddo: Ddo::default(),
        };
        assert_eq!(
            pkcs15.read_object_list_for_application(&template),
            Err(Error::Configuration("application has no odfPath"))
        );
    }

    #[test]
    fn decodes_private_keys_and_skips_truncated_trailer() {
        // ODF with one PrKDF entry pointing at :4401
        let efid = Asn1::from_tag_and_value(0x04, &[0x44, 0x01]).unwrap();
        let path = Asn1::from_tag_and_value(0x30, &efid.to_bytes()).unwrap();
        let odf = Asn1::from_tag_and_value(0xA0, &path.to_bytes())
            .unwrap()
            .to_bytes();

        // one valid private key CIO followed by a truncated TLV
        let mut prkdf = hex::decode(PRKDF).unwrap();
        prkdf.extend([0x30, 0x20, 0x04, 0x01]);

        let card = MockCard::new()
            .transparent(":3F00:5031", odf)
            .transparent(":3F00:4401", prkdf);
        let mut pkcs15 = Pkcs15::new(card);

        let template = ApplicationTemplate {
            aid: "a0000002".to_string(),
            label: None,
            path: None,
            ddo: Ddo {
                oid: None,
                odf_path: Some(Path {
                    efid_or_path: ":5031".to_string(),
                    aid: None,
                    index: None,
                    length: None,
                }),
                cia_info_path: None,
            },
        };
        let objects = pkcs15.read_object_list_for_application(&template).unwrap();
        assert_eq!(pkcs15.card().selected, vec!["a0000002".to_string()]);
        assert_eq!(objects.len(), 1);
        let Cio::PrivateKey(key) = &objects[0] else {
            panic!("expected a private key");
        };
        assert_eq!(key.common.label.as_deref(), Some("PrK.CH.DS"));
        assert_eq!(key.modulus_length, Some(1024));
        assert!(!objects[0].to_string().is_empty());
    }

    #[test]
    fn malformed_cio_is_skipped_not_propagated() {
        let efid = Asn1::from_tag_and_value(0x04, &[0x44, 0x01]).unwrap();
        let path = Asn1::from_tag_and_value(0x30, &efid.to_bytes()).unwrap();
        let odf = Asn1::from_tag_and_value(0xA0, &path.to_bytes())
            .unwrap()
            .to_bytes();

        // a CIO with no children decodes as malformed and is skipped
        let mut prkdf = Asn1::from_tag_and_value(0x30, &[]).unwrap().to_bytes();
        prkdf.extend(hex::decode(PRKDF).unwrap());

        let card = MockCard::new()
            .transparent(":3F00:5031", odf)
            .transparent(":3F00:4401", prkdf);
        let mut pkcs15 = Pkcs15::new(card);

        let template = ApplicationTemplate {
            aid: String::new(),
            label: None,
            path: None,
            ddo: Ddo {
                oid: None,
                odf_path: Some(Path {
                    efid_or_path: ":5031".to_string(),
                    aid: None,
                    index: None,
                    length: None,
                }),
                cia_info_path: None,
            },
        };
        let objects = pkcs15.read_object_list_for_application(&template).unwrap();
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn access_control_rule_from_prkdf_blob() {
        let tlv = Asn1::parse(&hex::decode(PRKDF).unwrap()).unwrap();
        let key = crate::schema::PrivateKey::parse(&tlv).unwrap();
        let rules = key.common.access_control_rules.as_ref().unwrap();
        assert_eq!(rules[0].access_mode, AccessMode::Execute);
    }

    #[test]
    fn reads_cia_info_through_the_ddo() {
        let version = Asn1::from_tag_and_value(0x02, &[0x00]).unwrap();
        let flags = Asn1::from_tag_and_value(0x03, &[0x06, 0x40]).unwrap();
        let mut inner = version.to_bytes();
        inner.extend(flags.to_bytes());
        let cia = Asn1::from_tag_and_value(0x30, &inner).unwrap().to_bytes();

        let card = MockCard::new().transparent(":3F00:5032", cia);
        let mut pkcs15 = Pkcs15::new(card);
        let template = ApplicationTemplate {
            aid: String::new(),
            label: None,
            path: None,
            ddo: Ddo {
                oid: None,
                odf_path: None,
                cia_info_path: Some(Path {
                    efid_or_path: ":5032".to_string(),
                    aid: None,
                    index: None,
                    length: None,
                }),
            },
        };
        let info = pkcs15.read_cia_info(&template).unwrap();
        assert_eq!(info.version, 0);
        assert_eq!(info.card_flags, crate::schema::CardFlags::AUTH_REQUIRED);
    }

    #[test]
    fn record_file_objects_strip_record_headers() {
        let mut record = vec![0x00, 0x20];
        record.extend(hex::decode(PRKDF).unwrap());
        let card = MockCard::new().records(":3F00:4401", vec![record, vec![0x00, 0x00]]);
        let mut pkcs15 = Pkcs15::new(card);
        let path = Path {
            efid_or_path: ":3F00:4401".to_string(),
            aid: None,
            index: None,
            length: None,
        };
        let objects = pkcs15.read_card_objects("", &path).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].tag, 0x30);
    }

    #[test]
    fn record_read_failure_mid_scan_is_propagated() {
        let mut record = vec![0x00, 0x20];
        record.extend(hex::decode(PRKDF).unwrap());
        let err = Error::Card(CardError::Io("record read failed".to_string()));

        // record 2 fails with an I/O error, not NoSuchRecord
        let card = MockCard::new().records_failing_at(":3F00:4401", vec![record.clone()], 2);
        let mut pkcs15 = Pkcs15::new(card);
        let path = Path {
            efid_or_path: ":3F00:4401".to_string(),
            aid: None,
            index: None,
            length: None,
        };
        assert_eq!(pkcs15.read_card_objects("", &path), Err(err.clone()));

        let card = MockCard::new().records_failing_at(":3F00:2F00", vec![ef_dir_entry()], 2);
        let mut pkcs15 = Pkcs15::new(card);
        assert_eq!(pkcs15.read_application_directory(), Err(err));
    }

    #[test]
    fn parse_object_list_is_strict() {
        let mut data = Asn1::from_tag_and_value(0x30, &[0x02, 0x01, 0x05])
            .unwrap()
            .to_bytes();
        data.extend([0x00, 0x00]);
        let list = Pkcs15::<MockCard>::parse_object_list(&data).unwrap();
        assert_eq!(list.len(), 1);

        data.extend([0x30, 0x10, 0x01]);
        assert!(Pkcs15::<MockCard>::parse_object_list(&data).is_err());
    }
}
