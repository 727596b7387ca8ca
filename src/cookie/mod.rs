//! Consent cookie codec.
//!
//! A consent record is persisted as two cookies: the vendor cookie (global,
//! purpose and vendor consent) and the publisher cookie (publisher purposes).
//! Both are bit-packed and base64url encoded. Encoding is total and
//! deterministic; decoding never fails hard, malformed input degrades to
//! [`DecodedConsent::Empty`].

mod bits;

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use self::bits::{BitReader, BitWriter};
use crate::errors::CmpError;
use crate::models::{CmpSchema, ConsentRecord, COOKIE_VERSION};

/// Cookie holding global, purpose and vendor consent.
pub const VENDOR_COOKIE_NAME: &str = "euconsent";
/// Cookie holding publisher purpose consent.
pub const PUBLISHER_COOKIE_NAME: &str = "pubconsent";

const KIND_BITS: u8 = 2;
const KIND_VENDOR: u64 = 1;
const KIND_PUBLISHER: u64 = 2;
const VERSION_BITS: u8 = 8;
const TIMESTAMP_BITS: u8 = 48;
const FIELD_BITS: u8 = 16;
const MAX_TIMESTAMP_MS: i64 = (1 << TIMESTAMP_BITS) - 1;

const ENCODING_BITFIELD: bool = false;
const ENCODING_LIST: bool = true;

/// Both cookie values of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedConsent {
    pub vendor: String,
    pub publisher: String,
}

/// Outcome of reading the persisted cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedConsent {
    /// Neither cookie exists: first visit
    Absent,
    /// Cookies exist but none could be decoded
    Empty,
    Record(ConsentRecord),
}

impl DecodedConsent {
    /// Whether any consent cookie was present, decodable or not.
    pub fn cookie_present(&self) -> bool {
        !matches!(self, DecodedConsent::Absent)
    }

    #[cfg(test)]
    pub fn into_record(self) -> Option<ConsentRecord> {
        match self {
            DecodedConsent::Record(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    cookie_version: u8,
    created: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    cmp_id: u16,
    cmp_version: u16,
}

#[derive(Debug)]
struct VendorPart {
    header: Header,
    vendor_list_version: u16,
    global_consent: bool,
    purpose_consent: BTreeMap<u16, bool>,
    vendor_consent: BTreeMap<u16, bool>,
}

#[derive(Debug)]
struct PublisherPart {
    header: Header,
    publisher_consent: BTreeMap<u16, bool>,
}

/// Encoder/decoder between [`ConsentRecord`] and cookie strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentCookieCodec;

impl ConsentCookieCodec {
    pub fn encode(record: &ConsentRecord) -> EncodedConsent {
        EncodedConsent {
            vendor: Self::encode_vendor(record),
            publisher: Self::encode_publisher(record),
        }
    }

    /// Encode the vendor cookie: header, global flag, purposes, vendors.
    pub fn encode_vendor(record: &ConsentRecord) -> String {
        let mut writer = BitWriter::new();
        write_header(&mut writer, KIND_VENDOR, record);
        writer.push_bits(u64::from(record.vendor_list_version), FIELD_BITS);
        writer.push_bool(record.global_consent);
        write_consent_map(&mut writer, &record.purpose_consent);
        write_consent_map(&mut writer, &record.vendor_consent);
        URL_SAFE_NO_PAD.encode(writer.into_bytes())
    }

    /// Encode the publisher cookie: header, publisher purposes.
    pub fn encode_publisher(record: &ConsentRecord) -> String {
        let mut writer = BitWriter::new();
        write_header(&mut writer, KIND_PUBLISHER, record);
        write_consent_map(&mut writer, &record.publisher_consent);
        URL_SAFE_NO_PAD.encode(writer.into_bytes())
    }

    /// Decode whatever cookies exist into one record.
    ///
    /// A cookie that fails to decode is logged and treated as if it carried
    /// no decisions; the other cookie still contributes.
    pub fn decode(vendor: Option<&str>, publisher: Option<&str>) -> DecodedConsent {
        let vendor = vendor.map(str::trim).filter(|s| !s.is_empty());
        let publisher = publisher.map(str::trim).filter(|s| !s.is_empty());

        if vendor.is_none() && publisher.is_none() {
            return DecodedConsent::Absent;
        }

        let vendor_part = vendor.and_then(|raw| match decode_vendor(raw) {
            Ok(part) => Some(part),
            Err(e) => {
                tracing::warn!("Discarding vendor consent cookie: {}", e);
                None
            }
        });
        let publisher_part = publisher.and_then(|raw| match decode_publisher(raw) {
            Ok(part) => Some(part),
            Err(e) => {
                tracing::warn!("Discarding publisher consent cookie: {}", e);
                None
            }
        });

        match merge_parts(vendor_part, publisher_part) {
            Some(record) => DecodedConsent::Record(record),
            None => DecodedConsent::Empty,
        }
    }
}

fn merge_parts(
    vendor: Option<VendorPart>,
    publisher: Option<PublisherPart>,
) -> Option<ConsentRecord> {
    let (mut record, publisher) = match (vendor, publisher) {
        (None, None) => return None,
        (Some(vendor), publisher) => {
            let record = ConsentRecord {
                cmp_version: vendor.header.cmp_version,
                cmp_id: vendor.header.cmp_id,
                cookie_version: vendor.header.cookie_version,
                vendor_list_version: vendor.vendor_list_version,
                created: vendor.header.created,
                last_updated: vendor.header.last_updated,
                global_consent: vendor.global_consent,
                vendor_consent: vendor.vendor_consent,
                purpose_consent: vendor.purpose_consent,
                publisher_consent: BTreeMap::new(),
            };
            (record, publisher)
        }
        (None, Some(publisher)) => {
            let header = &publisher.header;
            let schema = CmpSchema {
                cmp_version: header.cmp_version,
                cmp_id: header.cmp_id,
                cookie_version: header.cookie_version,
            };
            (ConsentRecord::empty(schema, header.created), Some(publisher))
        }
    };

    if let Some(publisher) = publisher {
        record.created = record.created.min(publisher.header.created);
        record.last_updated = record.last_updated.max(publisher.header.last_updated);
        record.publisher_consent = publisher.publisher_consent;
    }

    Some(record)
}

fn write_header(writer: &mut BitWriter, kind: u64, record: &ConsentRecord) {
    writer.push_bits(kind, KIND_BITS);
    writer.push_bits(u64::from(record.cookie_version), VERSION_BITS);
    writer.push_bits(timestamp_bits(&record.created), TIMESTAMP_BITS);
    writer.push_bits(timestamp_bits(&record.last_updated), TIMESTAMP_BITS);
    writer.push_bits(u64::from(record.cmp_id), FIELD_BITS);
    writer.push_bits(u64::from(record.cmp_version), FIELD_BITS);
}

/// Milliseconds since the epoch, clamped to the field width.
fn timestamp_bits(ts: &DateTime<Utc>) -> u64 {
    ts.timestamp_millis().clamp(0, MAX_TIMESTAMP_MS) as u64
}

/// Write a consent map in whichever of the two encodings is shorter.
fn write_consent_map(writer: &mut BitWriter, map: &BTreeMap<u16, bool>) {
    let Some(&max_id) = map.keys().next_back() else {
        writer.push_bool(ENCODING_LIST);
        writer.push_bits(0, FIELD_BITS);
        return;
    };

    let bitfield_cost = 2 * (usize::from(max_id) + 1);
    let list_cost = (usize::from(FIELD_BITS) + 1) * map.len();

    if bitfield_cost <= list_cost {
        writer.push_bool(ENCODING_BITFIELD);
        writer.push_bits(u64::from(max_id), FIELD_BITS);
        for id in 0..=max_id {
            match map.get(&id) {
                Some(&consent) => {
                    writer.push_bool(true);
                    writer.push_bool(consent);
                }
                None => {
                    writer.push_bool(false);
                    writer.push_bool(false);
                }
            }
        }
    } else {
        writer.push_bool(ENCODING_LIST);
        writer.push_bits(map.len() as u64, FIELD_BITS);
        for (&id, &consent) in map {
            writer.push_bits(u64::from(id), FIELD_BITS);
            writer.push_bool(consent);
        }
    }
}

fn read_consent_map(reader: &mut BitReader<'_>) -> Result<BTreeMap<u16, bool>, CmpError> {
    let mut map = BTreeMap::new();

    if reader.read_bool()? == ENCODING_BITFIELD {
        let max_id = reader.read_bits(FIELD_BITS)? as u16;
        for id in 0..=max_id {
            let present = reader.read_bool()?;
            let consent = reader.read_bool()?;
            match (present, consent) {
                (true, consent) => {
                    map.insert(id, consent);
                }
                (false, false) => {}
                (false, true) => {
                    return Err(CmpError::CookieDecode(format!(
                        "Consent bit set for absent id {}",
                        id
                    )))
                }
            }
        }
        if !map.contains_key(&max_id) {
            return Err(CmpError::CookieDecode(format!(
                "Bitfield max id {} has no entry",
                max_id
            )));
        }
    } else {
        let count = reader.read_bits(FIELD_BITS)?;
        let mut previous: Option<u16> = None;
        for _ in 0..count {
            let id = reader.read_bits(FIELD_BITS)? as u16;
            if previous.is_some_and(|p| p >= id) {
                return Err(CmpError::CookieDecode(format!(
                    "Consent list ids out of order at {}",
                    id
                )));
            }
            previous = Some(id);
            map.insert(id, reader.read_bool()?);
        }
    }

    Ok(map)
}

fn read_timestamp(reader: &mut BitReader<'_>) -> Result<DateTime<Utc>, CmpError> {
    let ms = reader.read_bits(TIMESTAMP_BITS)? as i64;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CmpError::CookieDecode(format!("Timestamp out of range: {}", ms)))
}

fn read_header(reader: &mut BitReader<'_>, expected_kind: u64) -> Result<Header, CmpError> {
    let kind = reader.read_bits(KIND_BITS)?;
    if kind != expected_kind {
        return Err(CmpError::CookieDecode(format!(
            "Unexpected cookie kind {} (expected {})",
            kind, expected_kind
        )));
    }

    let cookie_version = reader.read_bits(VERSION_BITS)? as u8;
    if cookie_version != COOKIE_VERSION {
        return Err(CmpError::CookieDecode(format!(
            "Unsupported cookie version {} (supported {})",
            cookie_version, COOKIE_VERSION
        )));
    }

    Ok(Header {
        cookie_version,
        created: read_timestamp(reader)?,
        last_updated: read_timestamp(reader)?,
        cmp_id: reader.read_bits(FIELD_BITS)? as u16,
        cmp_version: reader.read_bits(FIELD_BITS)? as u16,
    })
}

fn decode_bytes(raw: &str) -> Result<Vec<u8>, CmpError> {
    URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|e| CmpError::CookieDecode(format!("Invalid cookie encoding: {}", e)))
}

fn decode_vendor(raw: &str) -> Result<VendorPart, CmpError> {
    let bytes = decode_bytes(raw)?;
    let mut reader = BitReader::new(&bytes);

    let header = read_header(&mut reader, KIND_VENDOR)?;
    let vendor_list_version = reader.read_bits(FIELD_BITS)? as u16;
    let global_consent = reader.read_bool()?;
    let purpose_consent = read_consent_map(&mut reader)?;
    let vendor_consent = read_consent_map(&mut reader)?;
    reader.finish()?;

    Ok(VendorPart {
        header,
        vendor_list_version,
        global_consent,
        purpose_consent,
        vendor_consent,
    })
}

fn decode_publisher(raw: &str) -> Result<PublisherPart, CmpError> {
    let bytes = decode_bytes(raw)?;
    let mut reader = BitReader::new(&bytes);

    let header = read_header(&mut reader, KIND_PUBLISHER)?;
    let publisher_consent = read_consent_map(&mut reader)?;
    reader.finish()?;

    Ok(PublisherPart {
        header,
        publisher_consent,
    })
}
