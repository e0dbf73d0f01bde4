//! Decoder for the PKCS #15 / ISO 7816-15 cryptographic token layout on
//! smart cards.
//!
//! The crate is layered the way the data arrives from a card: raw bytes
//! are parsed into an [`asn1::Asn1`] TLV tree, the tree is decoded into
//! typed [`schema`] objects, and [`pkcs15::Pkcs15`] drives the whole
//! walk over a [`smartcard_abstractions::CardController`], from EF.DIR
//! through each application's object directory file.
//!
//! ```no_run
//! use pkcs15_probe::pkcs15::Pkcs15;
//! use pkcs15_probe::smartcard_abstractions::DirectoryCard;
//!
//! # fn main() -> Result<(), pkcs15_probe::types::Error> {
//! let card = DirectoryCard::new("/path/to/card/dump");
//! let mut pkcs15 = Pkcs15::new(card);
//! for (aid, template) in pkcs15.read_application_directory()? {
//!     println!("{}: {}", aid, template);
//! }
//! # Ok(())
//! # }
//! ```

pub mod asn1;
pub mod helpers;
pub mod pkcs15;
pub mod schema;
pub mod smartcard_abstractions;
pub mod types;
