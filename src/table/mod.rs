//! Compiled mapping tables and the metadata reader.
//!
//! A table is an immutable blob made of a fixed header, a name table and
//! the rule data. All integers are big-endian.
//!
//! ```text
//!  0  magic            b"eMap"
//!  4  format_version   16.16
//!  8  compiler_version 16.16
//! 12  table_flags      bit 0: rule data is zlib-compressed
//! 16  lhs_flags        SideFlags
//! 20  rhs_flags        SideFlags
//! 24  name_count
//! 28  names_offset
//! 32  names_length
//! 36  rules_offset
//! 40  rules_length     stored length
//! 44  rules_raw_length uncompressed length
//! ```
//!
//! Name records are `id: u16, units: u16, units × u16` sorted by id. The
//! header and names are never compressed, so metadata can be read without
//! touching the rule data.

pub mod rules;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::form::SideFlags;
use crate::{Error, Result};
use rules::RuleSet;

/// Leading bytes of every table
pub const MAGIC: [u8; 4] = *b"eMap";

/// Table format version written by this crate
pub const FORMAT_VERSION: Version = Version::new(1, 0);

/// Size of the fixed header
pub const HEADER_LEN: usize = 48;

const FLAG_COMPRESSED: u32 = 0x0000_0001;
const KNOWN_TABLE_FLAGS: u32 = FLAG_COMPRESSED;

/// A 16.16 fixed-point version number
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u32);

impl Version {
    /// Version from its major and minor parts
    pub const fn new(major: u16, minor: u16) -> Self {
        Version(((major as u32) << 16) | minor as u32)
    }

    /// Version from its raw 16.16 value
    pub const fn from_raw(raw: u32) -> Self {
        Version(raw)
    }

    /// Raw 16.16 value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Integer part
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Fractional part
    pub const fn minor(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self)
    }
}

/// Key of a name record
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameId(pub u16);

impl NameId {
    /// Name of the left-hand (source) encoding
    pub const SOURCE_NAME: NameId = NameId(0);
    /// Name of the right-hand (target) encoding
    pub const TARGET_NAME: NameId = NameId(1);
    /// Description of the left-hand encoding
    pub const SOURCE_DESCRIPTION: NameId = NameId(2);
    /// Description of the right-hand encoding
    pub const TARGET_DESCRIPTION: NameId = NameId(3);
    /// Mapping version string
    pub const VERSION: NameId = NameId(4);
    /// Contact address
    pub const CONTACT: NameId = NameId(5);
    /// Registration authority
    pub const REGISTRATION_AUTHORITY: NameId = NameId(6);
    /// Registered mapping name
    pub const REGISTRATION_NAME: NameId = NameId(7);
    /// Copyright notice
    pub const COPYRIGHT: NameId = NameId(8);

    /// Every id defined by the current format
    pub const KNOWN: [NameId; 9] = [
        NameId::SOURCE_NAME,
        NameId::TARGET_NAME,
        NameId::SOURCE_DESCRIPTION,
        NameId::TARGET_DESCRIPTION,
        NameId::VERSION,
        NameId::CONTACT,
        NameId::REGISTRATION_AUTHORITY,
        NameId::REGISTRATION_NAME,
        NameId::COPYRIGHT,
    ];

    /// Human-readable label, `None` for ids reserved for future use
    pub fn label(self) -> Option<&'static str> {
        let label = match self.0 {
            0 => "source name",
            1 => "target name",
            2 => "source description",
            3 => "target description",
            4 => "version",
            5 => "contact",
            6 => "registration authority",
            7 => "registration name",
            8 => "copyright",
            _ => return None,
        };
        Some(label)
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "name #{}", self.0),
        }
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({})", self.0)
    }
}

/// Decoded fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    format_version: Version,
    compiler_version: Version,
    compressed: bool,
    lhs_flags: SideFlags,
    rhs_flags: SideFlags,
    name_count: usize,
    names: (usize, usize),
    rules: (usize, usize),
    rules_raw_length: usize,
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn region(bytes: &[u8], offset: u32, length: u32, what: &str) -> Result<(usize, usize)> {
    let start = offset as usize;
    let end = start
        .checked_add(length as usize)
        .filter(|&end| start >= HEADER_LEN && end <= bytes.len())
        .ok_or_else(|| Error::InvalidMapping(format!("{} region lies outside the table", what)))?;
    Ok((start, end))
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return Err(Error::InvalidMapping("not a compiled mapping table".to_string()));
    }
    let format_version = Version::from_raw(be_u32(bytes, 4));
    if format_version.major() != FORMAT_VERSION.major() {
        return Err(Error::BadMappingVersion {
            found: format_version,
            supported: FORMAT_VERSION,
        });
    }
    let table_flags = be_u32(bytes, 12);
    if table_flags & !KNOWN_TABLE_FLAGS != 0 {
        return Err(Error::InvalidMapping(format!(
            "unknown table flags 0x{:08X}",
            table_flags
        )));
    }
    let side = |at: usize| {
        SideFlags::from_bits(be_u32(bytes, at))
            .ok_or_else(|| Error::InvalidMapping("unknown side flag bits".to_string()))
    };
    let lhs_flags = side(16)?;
    let rhs_flags = side(20)?;
    let names = region(bytes, be_u32(bytes, 28), be_u32(bytes, 32), "name")?;
    let rules = region(bytes, be_u32(bytes, 36), be_u32(bytes, 40), "rule")?;
    Ok(Header {
        format_version,
        compiler_version: Version::from_raw(be_u32(bytes, 8)),
        compressed: table_flags & FLAG_COMPRESSED != 0,
        lhs_flags,
        rhs_flags,
        name_count: be_u32(bytes, 24) as usize,
        names,
        rules,
        rules_raw_length: be_u32(bytes, 44) as usize,
    })
}

fn read_record(bytes: &[u8], pos: usize, end: usize) -> Result<(NameId, &[u8], usize)> {
    if pos + 4 > end {
        return Err(Error::InvalidMapping("name table is truncated".to_string()));
    }
    let id = NameId(u16::from_be_bytes([bytes[pos], bytes[pos + 1]]));
    let units = usize::from(u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]));
    let start = pos + 4;
    let stop = start + units * 2;
    if stop > end {
        return Err(Error::InvalidMapping("name record is truncated".to_string()));
    }
    Ok((id, &bytes[start..stop], stop))
}

/// Walk the name records, yielding `(id, units)` slices of big-endian UTF-16
fn name_records<'a>(
    bytes: &'a [u8],
    header: &Header,
) -> impl Iterator<Item = Result<(NameId, &'a [u8])>> + 'a {
    let (mut pos, end) = header.names;
    let mut remaining = header.name_count;
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        remaining -= 1;
        match read_record(bytes, pos, end) {
            Ok((id, raw, next)) => {
                pos = next;
                Some(Ok((id, raw)))
            }
            Err(e) => {
                remaining = 0;
                Some(Err(e))
            }
        }
    })
}

fn units_of(raw: &[u8]) -> Vec<u16> {
    raw.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn parse_names(bytes: &[u8], header: &Header) -> Result<BTreeMap<NameId, Vec<u16>>> {
    let mut names = BTreeMap::new();
    for record in name_records(bytes, header) {
        let (id, raw) = record?;
        if names.insert(id, units_of(raw)).is_some() {
            return Err(Error::InvalidMapping(format!("duplicate name record for {}", id)));
        }
    }
    Ok(names)
}

fn find_name<'a>(bytes: &'a [u8], header: &Header, id: NameId) -> Result<&'a [u8]> {
    for record in name_records(bytes, header) {
        let (record_id, raw) = record?;
        if record_id == id {
            return Ok(raw);
        }
    }
    Err(Error::NameNotFound(id))
}

fn decode_name(units: &[u16]) -> Result<String> {
    String::from_utf16(units)
        .map_err(|_| Error::InvalidMapping("name record is not valid UTF-16".to_string()))
}

fn copy_units(units: impl ExactSizeIterator<Item = u16>, buffer: &mut [u16]) -> usize {
    let required = units.len();
    if required <= buffer.len() {
        for (slot, unit) in buffer.iter_mut().zip(units) {
            *slot = unit;
        }
    }
    required
}

/// Read one name from a raw table blob without building a converter
pub fn mapping_name(blob: &[u8], id: NameId) -> Result<String> {
    let header = parse_header(blob)?;
    let raw = find_name(blob, &header, id)?;
    decode_name(&units_of(raw))
}

/// Two-call name query on a raw table blob.
///
/// Returns the number of UTF-16 units the name needs. The units are written
/// only when `buffer` is large enough, so a zero-length buffer queries the
/// size.
pub fn copy_mapping_name(blob: &[u8], id: NameId, buffer: &mut [u16]) -> Result<usize> {
    let header = parse_header(blob)?;
    let raw = find_name(blob, &header, id)?;
    let units = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    Ok(copy_units(units, buffer))
}

/// Read the `(lhs, rhs)` side flags from a raw table blob
pub fn mapping_flags(blob: &[u8]) -> Result<(SideFlags, SideFlags)> {
    let header = parse_header(blob)?;
    Ok((header.lhs_flags, header.rhs_flags))
}

/// One entry of [`TableInfo::names`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Record key
    pub id: NameId,
    /// Record text
    pub value: String,
}

/// Serializable summary of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Format version of the blob
    pub format_version: Version,
    /// Version of the compiler that wrote it
    pub compiler_version: Version,
    /// Rule data is compressed
    pub compressed: bool,
    /// Left-hand side flags
    pub lhs_flags: SideFlags,
    /// Right-hand side flags
    pub rhs_flags: SideFlags,
    /// Name records in id order
    pub names: Vec<NameRecord>,
    /// Total blob size in bytes
    pub size: usize,
}

/// A validated compiled mapping table.
///
/// Construction checks the header and the name table; rule data is decoded
/// by [`MappingTable::rules`] when a converter is built. The table is
/// immutable and can be shared between converters through an `Arc`.
#[derive(Debug, Clone)]
pub struct MappingTable {
    bytes: Vec<u8>,
    header: Header,
    names: BTreeMap<NameId, Vec<u16>>,
}

impl MappingTable {
    /// Validate and take ownership of a table blob
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let header = parse_header(&bytes)?;
        let names = parse_names(&bytes, &header)?;
        debug!(
            "loaded mapping table: {} bytes, format {}, {} name(s), compressed={}",
            bytes.len(),
            header.format_version,
            names.len(),
            header.compressed
        );
        Ok(Self {
            bytes,
            header,
            names,
        })
    }

    /// The raw blob
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Give the raw blob back
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Format version stamped in the header
    pub fn format_version(&self) -> Version {
        self.header.format_version
    }

    /// Version of the compiler that produced the table
    pub fn compiler_version(&self) -> Version {
        self.header.compiler_version
    }

    /// Rule data is stored compressed
    pub fn is_compressed(&self) -> bool {
        self.header.compressed
    }

    /// `(lhs, rhs)` side flags
    pub fn flags(&self) -> (SideFlags, SideFlags) {
        (self.header.lhs_flags, self.header.rhs_flags)
    }

    /// Look up a name as UTF-16 units
    pub fn name_units(&self, id: NameId) -> Result<&[u16]> {
        self.names
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(Error::NameNotFound(id))
    }

    /// Look up a name
    pub fn name(&self, id: NameId) -> Result<String> {
        decode_name(self.name_units(id)?)
    }

    /// Two-call name query; see [`copy_mapping_name`]
    pub fn copy_name(&self, id: NameId, buffer: &mut [u16]) -> Result<usize> {
        let units = self.name_units(id)?;
        Ok(copy_units(units.iter().copied(), buffer))
    }

    /// All names in id order, replacing unpaired surrogates
    pub fn names(&self) -> impl Iterator<Item = (NameId, String)> + '_ {
        self.names
            .iter()
            .map(|(id, units)| (*id, String::from_utf16_lossy(units)))
    }

    /// Uncompressed rule data
    pub fn rule_data(&self) -> Result<Cow<'_, [u8]>> {
        let (start, end) = self.header.rules;
        let stored = &self.bytes[start..end];
        if !self.header.compressed {
            return Ok(Cow::Borrowed(stored));
        }
        let expected = self.header.rules_raw_length;
        let mut raw = Vec::new();
        raw.try_reserve_exact(expected)?;
        ZlibDecoder::new(stored)
            .take(expected as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| Error::InvalidMapping(format!("rule data does not inflate: {}", e)))?;
        if raw.len() != expected {
            return Err(Error::InvalidMapping(format!(
                "rule data inflates to {} bytes, header says {}",
                raw.len(),
                expected
            )));
        }
        Ok(Cow::Owned(raw))
    }

    /// Decode and validate the rule data
    pub fn rules(&self) -> Result<RuleSet> {
        let data = self.rule_data()?;
        let set = RuleSet::decode(&data)?;
        let (lhs, rhs) = self.flags();
        if set.lhs_is_unicode() != lhs.is_unicode() || set.rhs_is_unicode() != rhs.is_unicode() {
            return Err(Error::InvalidMapping(
                "header side flags disagree with the passes".to_string(),
            ));
        }
        Ok(set)
    }

    /// Serializable summary
    pub fn info(&self) -> TableInfo {
        TableInfo {
            format_version: self.header.format_version,
            compiler_version: self.header.compiler_version,
            compressed: self.header.compressed,
            lhs_flags: self.header.lhs_flags,
            rhs_flags: self.header.rhs_flags,
            names: self
                .names()
                .map(|(id, value)| NameRecord { id, value })
                .collect(),
            size: self.bytes.len(),
        }
    }
}

/// Everything the writer needs to lay out a table
#[derive(Debug, Clone)]
pub(crate) struct TableParts<'a> {
    pub compiler_version: Version,
    pub lhs_flags: SideFlags,
    pub rhs_flags: SideFlags,
    pub names: &'a BTreeMap<NameId, Vec<u16>>,
    pub rules: &'a RuleSet,
    /// zlib level when the rule data should be compressed
    pub compression: Option<u32>,
}

fn put(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_be_bytes());
}

/// Lay out a table blob
pub(crate) fn write_table(parts: &TableParts<'_>) -> Result<Vec<u8>> {
    let raw_rules = parts.rules.encode();
    let stored_rules = match parts.compression {
        Some(level) => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
            encoder
                .write_all(&raw_rules)
                .and_then(|_| encoder.finish())
                .map_err(|e| Error::Exception(format!("compression failed: {}", e)))?
        }
        None => raw_rules.clone(),
    };

    let mut names = Vec::new();
    for (id, units) in parts.names {
        let count = u16::try_from(units.len()).map_err(|_| {
            Error::InvalidMapping(format!("{} is longer than 65535 UTF-16 units", id))
        })?;
        names.extend_from_slice(&id.0.to_be_bytes());
        names.extend_from_slice(&count.to_be_bytes());
        for unit in units {
            names.extend_from_slice(&unit.to_be_bytes());
        }
    }

    let total = HEADER_LEN + names.len() + stored_rules.len();
    let too_big = |_| Error::InvalidMapping("table exceeds 4 GiB".to_string());
    let names_offset = u32::try_from(HEADER_LEN).map_err(too_big)?;
    let names_length = u32::try_from(names.len()).map_err(too_big)?;
    let rules_offset = u32::try_from(HEADER_LEN + names.len()).map_err(too_big)?;
    let rules_length = u32::try_from(stored_rules.len()).map_err(too_big)?;
    let raw_length = u32::try_from(raw_rules.len()).map_err(too_big)?;
    u32::try_from(total).map_err(too_big)?;

    let mut out = Vec::new();
    out.try_reserve_exact(total)?;
    out.extend_from_slice(&MAGIC);
    put(&mut out, FORMAT_VERSION.raw());
    put(&mut out, parts.compiler_version.raw());
    put(
        &mut out,
        if parts.compression.is_some() { FLAG_COMPRESSED } else { 0 },
    );
    put(&mut out, parts.lhs_flags.bits());
    put(&mut out, parts.rhs_flags.bits());
    put(&mut out, parts.names.len() as u32);
    put(&mut out, names_offset);
    put(&mut out, names_length);
    put(&mut out, rules_offset);
    put(&mut out, rules_length);
    put(&mut out, raw_length);
    out.extend_from_slice(&names);
    out.extend_from_slice(&stored_rules);
    Ok(out)
}
