//! Byte-level codec helpers shared by the ASN.1 engine and the PKCS#15
//! schema decoders: hex and bit rendering, big-endian integer decoding,
//! BIT STRING choice decoding, OID conversion and byte-array arithmetic.

use crate::types::{Error, Result};

pub fn to_hex(data: &[u8]) -> String {
    return hex::encode(data);
}

pub fn from_hex(data: &str) -> Result<Vec<u8>> {
    hex::decode(data).map_err(|_| Error::MalformedEncoding("not a hex string"))
}

/// Renders a byte slice as a string of bits, MSB first.
pub fn to_bits(data: &[u8]) -> String {
    return data.iter().map(|b| format!("{:08b}", b)).collect();
}

/// Returns a copy of `data` with any run of trailing zero bytes removed.
/// An all-zero input yields an empty vector.
pub fn remove_trailing_zeros(data: &[u8]) -> Vec<u8> {
    let mut end = data.len();
    while end >= 1 && data[end - 1] == 0 {
        end -= 1;
    }
    return data[..end].to_vec();
}

/// Decodes the value bytes of an ASN.1 INTEGER as a big-endian unsigned
/// integer. Leading zero bytes are ignored; more than 4 significant bytes
/// do not fit a u32 and fail.
pub fn to_unsigned(data: &[u8]) -> Result<u32> {
    let significant: Vec<u8> = data.iter().copied().skip_while(|&b| b == 0x00).collect();
    if significant.len() > 4 {
        return Err(Error::Overflow("unsigned INTEGER needs more than 4 bytes"));
    }
    let mut value: u32 = 0;
    for byte in significant {
        value = (value << 8) | byte as u32;
    }
    return Ok(value);
}

/// Decodes the value bytes of an ASN.1 INTEGER as a big-endian
/// two's-complement signed integer. Leading sign-extension bytes
/// (0x00 positive, 0xFF negative) are ignored; more than 4 significant
/// bytes do not fit an i32 and fail.
pub fn to_signed(data: &[u8]) -> Result<i32> {
    let first = *data
        .first()
        .ok_or(Error::MalformedEncoding("empty INTEGER value"))?;
    let negative = first & 0x80 != 0;
    let pad: u8 = if negative { 0xFF } else { 0x00 };
    let significant: Vec<u8> = data.iter().copied().skip_while(|&b| b == pad).collect();
    if significant.len() > 4 {
        return Err(Error::Overflow("signed INTEGER needs more than 4 bytes"));
    }
    let mut value: i64 = if negative { -1 } else { 0 };
    for byte in significant {
        value = (value << 8) | byte as i64;
    }
    return Ok(value as i32);
}

/// Decodes a BIT STRING value as a CHOICE index: the index of the first
/// set bit. The first byte is the count of unused trailing bits; a
/// single-byte BIT STRING must be all zero and yields choice 0.
pub fn choice_from_bit_string(data: &[u8]) -> Result<u32> {
    if data.len() == 1 {
        if data[0] != 0 {
            return Err(Error::MalformedEncoding("single-byte BIT STRING not zero"));
        }
        return Ok(0);
    }
    if data.is_empty() {
        return Err(Error::MalformedEncoding("empty BIT STRING value"));
    }
    let unused = data[0] as usize;
    let mut bits = to_bits(&data[1..]);
    if unused > 0 {
        if unused > bits.len() {
            return Err(Error::MalformedEncoding("BIT STRING unused bit count too large"));
        }
        bits.truncate(bits.len() - unused);
    }
    match bits.find('1') {
        Some(index) => Ok(index as u32),
        None => Err(Error::MalformedEncoding("no bit set in BIT STRING")),
    }
}

/// Decodes a BIT STRING value as a signed integer: the content bytes as a
/// big-endian integer, shifted right by the unused-bit count.
pub fn int_from_bit_string(data: &[u8]) -> Result<i32> {
    if data.len() < 2 {
        return Err(Error::MalformedEncoding("BIT STRING value too short"));
    }
    // DER allows at most 7 unused bits; anything larger came off a bad card
    if data[0] > 7 {
        return Err(Error::MalformedEncoding("BIT STRING unused bit count out of range"));
    }
    let bits = to_signed(&data[1..])?;
    return Ok(bits >> data[0]);
}

/// Encodes a dotted-decimal OID string (e.g. "1.2.840.113549") as its BER
/// byte representation.
pub fn oid_to_bytes(oid: &str) -> Result<Vec<u8>> {
    let mut arcs = Vec::new();
    for part in oid.trim().trim_matches('.').split('.') {
        let arc: u32 = part
            .parse()
            .map_err(|_| Error::MalformedEncoding("not a dotted OID string"))?;
        arcs.push(arc);
    }
    if arcs.len() < 2 {
        return Err(Error::MalformedEncoding("OID needs at least two arcs"));
    }
    let mut out: Vec<u8> = vec![(40 * arcs[0] + arcs[1]) as u8];
    for &arc in &arcs[2..] {
        if arc < 128 {
            out.push(arc as u8);
        } else {
            out.push((128 + arc / 128) as u8);
            out.push((arc % 128) as u8);
        }
    }
    return Ok(out);
}

/// Decodes a BER OID value into its dotted-decimal string form.
pub fn bytes_to_oid(data: &[u8]) -> Result<String> {
    let first = *data
        .first()
        .ok_or(Error::MalformedEncoding("empty OID value"))?;
    let mut out = format!("{}.{}", first / 40, first % 40);
    let mut i = 1;
    while i < data.len() {
        if data[i] < 128 {
            out.push_str(&format!(".{}", data[i]));
        } else {
            let next = *data
                .get(i + 1)
                .ok_or(Error::MalformedEncoding("truncated OID arc"))?;
            out.push_str(&format!(".{}", (data[i] as u32 - 128) * 128 + next as u32));
            i += 1;
        }
        i += 1;
    }
    return Ok(out);
}

/// ISO 7816-4 / EMV padding: append 0x80, then zero-fill to the next
/// multiple of 8 bytes.
pub fn emv_pad(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    while out.len() % 8 != 0 {
        out.push(0x00);
    }
    return out;
}

/// Adds `src` to `dst`, both treated as fixed-width big-endian magnitudes.
/// The result has the width of `dst`; a carry out of the top byte is lost.
pub fn add(dst: &[u8], src: &[u8]) -> Vec<u8> {
    let mut out = dst.to_vec();
    let mut carry = 0u16;
    for i in 0..out.len() {
        let di = out.len() - 1 - i;
        let s = if i < src.len() {
            src[src.len() - 1 - i] as u16
        } else {
            0
        };
        let sum = out[di] as u16 + s + carry;
        out[di] = sum as u8;
        carry = sum >> 8;
    }
    return out;
}

/// Subtracts `src` from `dst`, both treated as fixed-width big-endian
/// magnitudes. The result has the width of `dst`; a borrow out of the top
/// byte wraps.
pub fn subtract(dst: &[u8], src: &[u8]) -> Vec<u8> {
    let mut out = dst.to_vec();
    let mut borrow = 0i16;
    for i in 0..out.len() {
        let di = out.len() - 1 - i;
        let s = if i < src.len() {
            src[src.len() - 1 - i] as i16
        } else {
            0
        };
        let mut diff = out[di] as i16 - s - borrow;
        if diff < 0 {
            diff += 0x100;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[di] = diff as u8;
    }
    return out;
}

/// XORs `src` into a copy of `dst`, aligned at the start. Fails if `src`
/// is longer than `dst`.
pub fn xor(dst: &[u8], src: &[u8]) -> Result<Vec<u8>> {
    if src.len() > dst.len() {
        return Err(Error::Overflow("xor operand longer than destination"));
    }
    let mut out = dst.to_vec();
    for (i, byte) in src.iter().enumerate() {
        out[i] ^= byte;
    }
    return Ok(out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_ignores_leading_zeros() {
        assert_eq!(to_unsigned(&[0x00, 0x00, 0x01, 0x02]).unwrap(), 0x0102);
        assert_eq!(to_unsigned(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(), u32::MAX);
        assert_eq!(to_unsigned(&[]).unwrap(), 0);
    }

    #[test]
    fn unsigned_overflows_past_four_significant_bytes() {
        assert!(matches!(
            to_unsigned(&[0x01, 0x00, 0x00, 0x00, 0x00]),
            Err(Error::Overflow(_))
        ));
        // 5 bytes but only 4 significant
        assert_eq!(
            to_unsigned(&[0x00, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap(),
            0xDEADBEEF
        );
    }

    #[test]
    fn signed_decodes_twos_complement() {
        assert_eq!(to_signed(&[0x7F]).unwrap(), 127);
        assert_eq!(to_signed(&[0xFF]).unwrap(), -1);
        assert_eq!(to_signed(&[0xFF, 0xFE]).unwrap(), -2);
        assert_eq!(to_signed(&[0x00, 0x80]).unwrap(), 128);
        assert_eq!(to_signed(&[0xFF, 0x7F]).unwrap(), -129);
    }

    #[test]
    fn signed_overflows_past_four_significant_bytes() {
        assert!(matches!(
            to_signed(&[0x01, 0x02, 0x03, 0x04, 0x05]),
            Err(Error::Overflow(_))
        ));
        assert_eq!(to_signed(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(), -1i32);
    }

    #[test]
    fn bit_string_choice() {
        // single zero byte means choice 0
        assert_eq!(choice_from_bit_string(&[0x00]).unwrap(), 0);
        // 0 unused bits, pattern 00100000 -> first set bit at index 2
        assert_eq!(choice_from_bit_string(&[0x06, 0x20]).unwrap(), 2);
        assert_eq!(choice_from_bit_string(&[0x00, 0x80]).unwrap(), 0);
        assert!(choice_from_bit_string(&[0x07, 0x00]).is_err());
        assert!(choice_from_bit_string(&[0x01]).is_err());
    }

    #[test]
    fn bit_string_int_shifts_out_unused_bits() {
        assert_eq!(int_from_bit_string(&[0x06, 0x40]).unwrap(), 0x01);
        assert_eq!(int_from_bit_string(&[0x00, 0x05, 0x20]).unwrap(), 0x0520);
    }

    #[test]
    fn bit_string_int_rejects_bad_unused_bit_count() {
        // an unused-bit byte this large would overflow the shift
        assert!(matches!(
            int_from_bit_string(&[0x21, 0x01]),
            Err(Error::MalformedEncoding(_))
        ));
        assert!(matches!(
            int_from_bit_string(&[0xFF, 0x01]),
            Err(Error::MalformedEncoding(_))
        ));
        assert!(int_from_bit_string(&[0x07, 0x80]).is_ok());
    }

    #[test]
    fn oid_round_trip() {
        for oid in ["1.2.840", "0.4.0.127.0.7", "2.16.840.1.101"] {
            let encoded = oid_to_bytes(oid).unwrap();
            assert_eq!(bytes_to_oid(&encoded).unwrap(), oid);
        }
        assert_eq!(oid_to_bytes("1.2.840").unwrap(), vec![0x2A, 0x86, 0x48]);
    }

    #[test]
    fn oid_rejects_garbage() {
        assert!(oid_to_bytes("not an oid").is_err());
        assert!(bytes_to_oid(&[0x2A, 0x86]).is_err());
    }

    #[test]
    fn emv_padding_fills_to_block() {
        assert_eq!(
            emv_pad(&[0x01, 0x02]),
            vec![0x01, 0x02, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        // already one short of a block, only the marker is needed
        assert_eq!(emv_pad(&[0u8; 7]).len(), 8);
        assert_eq!(emv_pad(&[0u8; 8]).len(), 16);
    }

    #[test]
    fn big_endian_arithmetic() {
        assert_eq!(add(&[0x00, 0xFF], &[0x01]), vec![0x01, 0x00]);
        assert_eq!(add(&[0xFF, 0xFF], &[0x01]), vec![0x00, 0x00]);
        assert_eq!(subtract(&[0x01, 0x00], &[0x01]), vec![0x00, 0xFF]);
        assert_eq!(subtract(&[0x00, 0x05], &[0x03]), vec![0x00, 0x02]);
        assert_eq!(xor(&[0xF0, 0x0F], &[0xFF]).unwrap(), vec![0x0F, 0x0F]);
        assert!(xor(&[0x00], &[0x00, 0x00]).is_err());
    }

    #[test]
    fn trailing_zero_strip() {
        assert_eq!(remove_trailing_zeros(&[0x01, 0x00, 0x02, 0x00]), vec![0x01, 0x00, 0x02]);
        assert!(remove_trailing_zeros(&[0x00, 0x00]).is_empty());
    }
}
