//! Encoding forms: the description of one side of a mapping.
//!
//! A form combines a 4-bit base selector (raw bytes or one of the UTF
//! encodings) with normalization expectations, a visual-order bit and a
//! Unicode bit that is always derived from the base.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Base encoding selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum BaseForm {
    /// Let the mapping decide (raw bytes or UTF-8)
    #[default]
    Unspecified,
    /// One byte per unit, no Unicode interpretation
    RawBytes,
    /// UTF-8 Unicode encoding (variable length, 1-4 bytes)
    UTF8,
    /// UTF-16BE Unicode encoding (big endian)
    UTF16BE,
    /// UTF-16LE Unicode encoding (little endian)
    UTF16LE,
    /// UTF-32BE Unicode encoding (big endian)
    UTF32BE,
    /// UTF-32LE Unicode encoding (little endian)
    UTF32LE,
}

impl BaseForm {
    /// All selectors in code order
    pub const ALL: [BaseForm; 7] = [
        BaseForm::Unspecified,
        BaseForm::RawBytes,
        BaseForm::UTF8,
        BaseForm::UTF16BE,
        BaseForm::UTF16LE,
        BaseForm::UTF32BE,
        BaseForm::UTF32LE,
    ];

    /// 4-bit selector value
    pub fn code(self) -> u16 {
        match self {
            BaseForm::Unspecified => 0,
            BaseForm::RawBytes => 1,
            BaseForm::UTF8 => 2,
            BaseForm::UTF16BE => 3,
            BaseForm::UTF16LE => 4,
            BaseForm::UTF32BE => 5,
            BaseForm::UTF32LE => 6,
        }
    }

    /// Selector from its 4-bit value
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Get the canonical name of this form
    pub fn name(self) -> &'static str {
        match self {
            BaseForm::Unspecified => "unspecified",
            BaseForm::RawBytes => "bytes",
            BaseForm::UTF8 => "UTF-8",
            BaseForm::UTF16BE => "UTF-16BE",
            BaseForm::UTF16LE => "UTF-16LE",
            BaseForm::UTF32BE => "UTF-32BE",
            BaseForm::UTF32LE => "UTF-32LE",
        }
    }

    /// Check if this form carries Unicode text
    pub fn is_unicode(self) -> bool {
        matches!(
            self,
            BaseForm::UTF8
                | BaseForm::UTF16BE
                | BaseForm::UTF16LE
                | BaseForm::UTF32BE
                | BaseForm::UTF32LE
        )
    }

    /// Width in bytes of one code unit of this form
    pub fn code_unit_size(self) -> usize {
        match self {
            BaseForm::UTF16BE | BaseForm::UTF16LE => 2,
            BaseForm::UTF32BE | BaseForm::UTF32LE => 4,
            BaseForm::Unspecified | BaseForm::RawBytes | BaseForm::UTF8 => 1,
        }
    }

    /// Get the byte order mark (BOM) for this form if it has one
    pub fn bom(self) -> Option<&'static [u8]> {
        match self {
            BaseForm::UTF8 => Some(&[0xEF, 0xBB, 0xBF]),
            BaseForm::UTF16LE => Some(&[0xFF, 0xFE]),
            BaseForm::UTF16BE => Some(&[0xFE, 0xFF]),
            BaseForm::UTF32LE => Some(&[0xFF, 0xFE, 0x00, 0x00]),
            BaseForm::UTF32BE => Some(&[0x00, 0x00, 0xFE, 0xFF]),
            _ => None,
        }
    }
}

impl fmt::Display for BaseForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BaseForm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let form = match s.to_uppercase().as_str() {
            "UNSPECIFIED" | "AUTO" => BaseForm::Unspecified,
            "BYTES" | "RAW" | "RAWBYTES" => BaseForm::RawBytes,
            "UTF8" | "UTF-8" => BaseForm::UTF8,
            "UTF16BE" | "UTF-16BE" => BaseForm::UTF16BE,
            "UTF16LE" | "UTF-16LE" => BaseForm::UTF16LE,
            "UTF32BE" | "UTF-32BE" => BaseForm::UTF32BE,
            "UTF32LE" | "UTF-32LE" => BaseForm::UTF32LE,
            _ => return Err(Error::InvalidForm(format!("unknown encoding form: {}", s))),
        };
        Ok(form)
    }
}

/// Unicode normalization form used by normalization stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalForm {
    /// Canonical composition
    Nfc,
    /// Canonical decomposition
    Nfd,
}

/// Per-side flag bits as stored in a table header
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SideFlags(u32);

impl SideFlags {
    /// No flags
    pub const NONE: SideFlags = SideFlags(0);
    /// Input on this side is expected to be NFC
    pub const EXPECTS_NFC: SideFlags = SideFlags(0x01);
    /// Input on this side is expected to be NFD
    pub const EXPECTS_NFD: SideFlags = SideFlags(0x02);
    /// Output on this side is NFC
    pub const GENERATES_NFC: SideFlags = SideFlags(0x04);
    /// Output on this side is NFD
    pub const GENERATES_NFD: SideFlags = SideFlags(0x08);
    /// Text on this side is in visual order
    pub const VISUAL: SideFlags = SideFlags(0x10);
    /// This side is Unicode
    pub const UNICODE: SideFlags = SideFlags(0x20);

    const KNOWN: u32 = 0x3F;
    const NORMALIZATION: u32 = 0x0F;

    const NAMES: [(SideFlags, &'static str); 6] = [
        (SideFlags::EXPECTS_NFC, "ExpectsNFC"),
        (SideFlags::EXPECTS_NFD, "ExpectsNFD"),
        (SideFlags::GENERATES_NFC, "GeneratesNFC"),
        (SideFlags::GENERATES_NFD, "GeneratesNFD"),
        (SideFlags::VISUAL, "Visual"),
        (SideFlags::UNICODE, "Unicode"),
    ];

    /// Raw bit value
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Flags from raw bits, rejecting unknown bits
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::KNOWN == 0 {
            Some(SideFlags(bits))
        } else {
            None
        }
    }

    /// Flags from raw bits, dropping unknown bits
    pub const fn from_bits_truncate(bits: u32) -> Self {
        SideFlags(bits & Self::KNOWN)
    }

    /// Check that every bit of `other` is set
    pub const fn contains(self, other: SideFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check that no bit is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags with the bits of `other` removed
    pub const fn without(self, other: SideFlags) -> Self {
        SideFlags(self.0 & !other.0)
    }

    /// Check the Unicode bit
    pub const fn is_unicode(self) -> bool {
        self.contains(SideFlags::UNICODE)
    }

    /// Just the four normalization bits
    pub const fn normalization(self) -> Self {
        SideFlags(self.0 & Self::NORMALIZATION)
    }

    /// Normalization form this side expects on input
    pub fn expected_form(self) -> Option<NormalForm> {
        if self.contains(SideFlags::EXPECTS_NFD) {
            Some(NormalForm::Nfd)
        } else if self.contains(SideFlags::EXPECTS_NFC) {
            Some(NormalForm::Nfc)
        } else {
            None
        }
    }

    /// Normalization form this side generates on output
    pub fn generated_form(self) -> Option<NormalForm> {
        if self.contains(SideFlags::GENERATES_NFD) {
            Some(NormalForm::Nfd)
        } else if self.contains(SideFlags::GENERATES_NFC) {
            Some(NormalForm::Nfc)
        } else {
            None
        }
    }

    /// Look up a single flag by its rule-language name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _)| *flag)
    }
}

impl BitOr for SideFlags {
    type Output = SideFlags;

    fn bitor(self, rhs: SideFlags) -> SideFlags {
        SideFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SideFlags {
    fn bitor_assign(&mut self, rhs: SideFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SideFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SideFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SideFlags({})", self)
    }
}

/// One endpoint of a conversion: base form plus flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EncodingForm {
    /// Base selector
    pub base: BaseForm,
    /// Normalization and visual-order bits; the Unicode bit is derived
    pub flags: SideFlags,
}

impl EncodingForm {
    /// Let the mapping pick the form
    pub const UNSPECIFIED: EncodingForm = EncodingForm::new(BaseForm::Unspecified);
    /// Raw bytes
    pub const BYTES: EncodingForm = EncodingForm::new(BaseForm::RawBytes);
    /// UTF-8
    pub const UTF8: EncodingForm = EncodingForm::new(BaseForm::UTF8);
    /// UTF-16 big endian
    pub const UTF16BE: EncodingForm = EncodingForm::new(BaseForm::UTF16BE);
    /// UTF-16 little endian
    pub const UTF16LE: EncodingForm = EncodingForm::new(BaseForm::UTF16LE);
    /// UTF-32 big endian
    pub const UTF32BE: EncodingForm = EncodingForm::new(BaseForm::UTF32BE);
    /// UTF-32 little endian
    pub const UTF32LE: EncodingForm = EncodingForm::new(BaseForm::UTF32LE);

    const BASE_MASK: u16 = 0x000F;
    const NORM_SHIFT: u16 = 4;
    const VISUAL_BIT: u16 = 0x0100;
    const UNICODE_BIT: u16 = 0x0200;
    const KNOWN_BITS: u16 = 0x03FF;

    /// Form with no flags
    pub const fn new(base: BaseForm) -> Self {
        Self {
            base,
            flags: SideFlags::NONE,
        }
    }

    /// Same form with additional flags; the Unicode bit is ignored
    pub const fn with_flags(self, flags: SideFlags) -> Self {
        Self {
            base: self.base,
            flags: SideFlags(self.flags.0 | flags.without(SideFlags::UNICODE).0),
        }
    }

    /// Check if this form carries Unicode text
    pub fn is_unicode(&self) -> bool {
        self.base.is_unicode()
    }

    /// Flags including the derived Unicode bit
    pub fn side_flags(&self) -> SideFlags {
        if self.is_unicode() {
            self.flags | SideFlags::UNICODE
        } else {
            self.flags.without(SideFlags::UNICODE)
        }
    }

    /// Packed 16-bit representation
    pub fn bits(&self) -> u16 {
        let mut bits = self.base.code();
        bits |= (self.flags.normalization().bits() as u16) << Self::NORM_SHIFT;
        if self.flags.contains(SideFlags::VISUAL) {
            bits |= Self::VISUAL_BIT;
        }
        if self.is_unicode() {
            bits |= Self::UNICODE_BIT;
        }
        bits
    }

    /// Unpack a 16-bit representation
    ///
    /// Fails with `InvalidForm` for unknown bits, an unknown base selector,
    /// or a Unicode bit that contradicts the base.
    pub fn from_bits(bits: u16) -> Result<Self> {
        if bits & !Self::KNOWN_BITS != 0 {
            return Err(Error::InvalidForm(format!(
                "unknown form bits 0x{:04X}",
                bits & !Self::KNOWN_BITS
            )));
        }
        let base = BaseForm::from_code(bits & Self::BASE_MASK).ok_or_else(|| {
            Error::InvalidForm(format!("unknown base form {}", bits & Self::BASE_MASK))
        })?;
        let unicode = bits & Self::UNICODE_BIT != 0;
        if base == BaseForm::RawBytes && unicode {
            return Err(Error::InvalidForm(
                "raw bytes cannot be marked as Unicode".to_string(),
            ));
        }
        if base.is_unicode() && !unicode {
            return Err(Error::InvalidForm(format!(
                "{} must carry the Unicode bit",
                base.name()
            )));
        }
        let mut flags = SideFlags::from_bits_truncate(
            ((bits >> Self::NORM_SHIFT) & 0x0F) as u32,
        );
        if bits & Self::VISUAL_BIT != 0 {
            flags |= SideFlags::VISUAL;
        }
        Ok(Self { base, flags })
    }
}

impl From<BaseForm> for EncodingForm {
    fn from(base: BaseForm) -> Self {
        EncodingForm::new(base)
    }
}

impl fmt::Display for EncodingForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags.without(SideFlags::UNICODE);
        if flags.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{} ({})", self.base, flags)
        }
    }
}

impl FromStr for EncodingForm {
    type Err = Error;

    /// Parses `utf8`, `utf16le+nfc`, `bytes`, `utf8+nfd+visual`, ...
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('+');
        let base: BaseForm = parts.next().unwrap_or_default().trim().parse()?;
        let mut form = EncodingForm::new(base);
        for part in parts {
            let flag = match part.trim().to_uppercase().as_str() {
                "NFC" => SideFlags::GENERATES_NFC,
                "NFD" => SideFlags::GENERATES_NFD,
                "VISUAL" => SideFlags::VISUAL,
                other => {
                    return Err(Error::InvalidForm(format!("unknown form flag: {}", other)));
                }
            };
            form = form.with_flags(flag);
        }
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_form_properties() {
        assert_eq!(BaseForm::UTF8.name(), "UTF-8");
        assert!(BaseForm::UTF16LE.is_unicode());
        assert!(!BaseForm::RawBytes.is_unicode());
        assert!(!BaseForm::Unspecified.is_unicode());
        assert_eq!(BaseForm::UTF8.code_unit_size(), 1);
        assert_eq!(BaseForm::UTF16BE.code_unit_size(), 2);
        assert_eq!(BaseForm::UTF32LE.code_unit_size(), 4);
        assert_eq!(BaseForm::UTF8.bom(), Some([0xEF, 0xBB, 0xBF].as_slice()));
        assert_eq!(BaseForm::UTF16BE.bom(), Some([0xFE, 0xFF].as_slice()));
        assert_eq!(BaseForm::RawBytes.bom(), None);

        for base in BaseForm::ALL {
            assert_eq!(BaseForm::from_code(base.code()), Some(base));
        }
        assert_eq!(BaseForm::from_code(7), None);
    }

    #[test]
    fn test_base_form_parsing() {
        assert_eq!("utf-8".parse::<BaseForm>().unwrap(), BaseForm::UTF8);
        assert_eq!("UTF16LE".parse::<BaseForm>().unwrap(), BaseForm::UTF16LE);
        assert_eq!("bytes".parse::<BaseForm>().unwrap(), BaseForm::RawBytes);
        assert!(matches!(
            "ebcdic".parse::<BaseForm>(),
            Err(Error::InvalidForm(_))
        ));
    }

    #[test]
    fn test_form_bits_round_trip() {
        let form = EncodingForm::UTF16LE
            .with_flags(SideFlags::GENERATES_NFC | SideFlags::VISUAL);
        let bits = form.bits();
        assert_eq!(bits & 0x000F, 4);
        assert_ne!(bits & 0x0200, 0);
        assert_eq!(EncodingForm::from_bits(bits).unwrap(), form);
        assert_eq!(EncodingForm::from_bits(EncodingForm::BYTES.bits()).unwrap(), EncodingForm::BYTES);
    }

    #[test]
    fn test_raw_bytes_with_unicode_bit_is_rejected() {
        let bits = BaseForm::RawBytes.code() | 0x0200;
        assert!(matches!(
            EncodingForm::from_bits(bits),
            Err(Error::InvalidForm(_))
        ));
        // UTF form without the derived bit is just as contradictory
        assert!(EncodingForm::from_bits(BaseForm::UTF8.code()).is_err());
        assert!(EncodingForm::from_bits(0x0F).is_err());
        assert!(EncodingForm::from_bits(0x8000 | 0x0202).is_err());
    }

    #[test]
    fn test_side_flags() {
        let flags = SideFlags::UNICODE | SideFlags::EXPECTS_NFD | SideFlags::GENERATES_NFC;
        assert!(flags.is_unicode());
        assert_eq!(flags.expected_form(), Some(NormalForm::Nfd));
        assert_eq!(flags.generated_form(), Some(NormalForm::Nfc));
        assert_eq!(flags.to_string(), "ExpectsNFD|GeneratesNFC|Unicode");
        assert_eq!(SideFlags::from_bits(0x40), None);
        assert_eq!(SideFlags::from_name("visual"), Some(SideFlags::VISUAL));
        assert_eq!(SideFlags::NONE.to_string(), "none");
    }

    #[test]
    fn test_form_parsing_with_flags() {
        let form: EncodingForm = "utf8+nfd".parse().unwrap();
        assert_eq!(form.base, BaseForm::UTF8);
        assert!(form.flags.contains(SideFlags::GENERATES_NFD));
        assert!(form.side_flags().is_unicode());
        assert!("utf8+nfkc".parse::<EncodingForm>().is_err());
    }
}
