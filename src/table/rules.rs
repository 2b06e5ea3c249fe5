//! Rule data: the passes, classes and rewrite rules the engine executes.
//!
//! The serialized form is a flat sequence of big-endian `u32` words:
//!
//! ```text
//! pass_count
//! per pass:
//!   kind lhs_default rhs_default
//!   class_count  { len value* }*
//!   range_count  { lo hi }*
//!   forward rules, reverse rules:
//!     rule_count { pre_len match_len post_len out_len line
//!                  pre* match* post* output* }*
//! ```
//!
//! Element words hold a literal value (below `0x0100_0000`), a class
//! reference (`0x8000_0000 | class`) or the text boundary (`0x4000_0000`).
//! Output words hold a literal or a class correspondence
//! (`0x8000_0000 | match_pos << 16 | class`).

use crate::{Error, Result};

const CLASS_TAG: u32 = 0x8000_0000;
const BOUNDARY_WORD: u32 = 0x4000_0000;
const LITERAL_LIMIT: u32 = 0x0100_0000;
const MAX_CODE_POINT: u32 = 0x10_FFFF;

/// Longest element sequence a single rule part may hold
pub const MAX_RULE_PART: usize = 255;

/// What a pass reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Bytes to bytes
    Byte,
    /// Unicode to Unicode
    Unicode,
    /// Bytes on the left, Unicode on the right
    ByteUnicode,
    /// Unicode on the left, bytes on the right
    UnicodeByte,
    /// Canonical composition
    Nfc,
    /// Canonical decomposition
    Nfd,
}

impl PassKind {
    /// Serialized code
    pub fn code(self) -> u32 {
        match self {
            PassKind::Byte => 0,
            PassKind::Unicode => 1,
            PassKind::ByteUnicode => 2,
            PassKind::UnicodeByte => 3,
            PassKind::Nfc => 4,
            PassKind::Nfd => 5,
        }
    }

    /// Kind from its serialized code
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0 => PassKind::Byte,
            1 => PassKind::Unicode,
            2 => PassKind::ByteUnicode,
            3 => PassKind::UnicodeByte,
            4 => PassKind::Nfc,
            5 => PassKind::Nfd,
            _ => return None,
        };
        Some(kind)
    }

    /// Name used in `Pass(...)` declarations
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Byte => "Byte",
            PassKind::Unicode => "Unicode",
            PassKind::ByteUnicode => "Byte_Unicode",
            PassKind::UnicodeByte => "Unicode_Byte",
            PassKind::Nfc => "NFC",
            PassKind::Nfd => "NFD",
        }
    }

    /// Kind from its declaration name
    pub fn from_name(name: &str) -> Option<Self> {
        [
            PassKind::Byte,
            PassKind::Unicode,
            PassKind::ByteUnicode,
            PassKind::UnicodeByte,
            PassKind::Nfc,
            PassKind::Nfd,
        ]
        .into_iter()
        .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Left-hand side carries Unicode
    pub fn lhs_is_unicode(self) -> bool {
        !matches!(self, PassKind::Byte | PassKind::ByteUnicode)
    }

    /// Right-hand side carries Unicode
    pub fn rhs_is_unicode(self) -> bool {
        !matches!(self, PassKind::Byte | PassKind::UnicodeByte)
    }

    /// Pass maps between bytes and Unicode
    pub fn is_mapping(self) -> bool {
        matches!(self, PassKind::ByteUnicode | PassKind::UnicodeByte)
    }

    /// Pass is a normalization step without rules
    pub fn is_normalization(self) -> bool {
        matches!(self, PassKind::Nfc | PassKind::Nfd)
    }
}

/// One position of a match or context pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    /// Exactly this unit
    Literal(u32),
    /// Any member of the class
    Class(u16),
    /// Start of stream (left context) or end of complete input (right context)
    Boundary,
}

/// One produced unit of a rule's replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputItem {
    /// Exactly this unit
    Literal(u32),
    /// Member of `class` at the index the unit matched at `source` had in its class
    Class {
        /// Output class
        class: u16,
        /// Match position whose class index is reused
        source: u8,
    },
}

/// A compiled rewrite rule for one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Left context, outermost element first
    pub pre: Vec<Element>,
    /// Units consumed when the rule fires
    pub matched: Vec<Element>,
    /// Right context, nearest element first
    pub post: Vec<Element>,
    /// Replacement
    pub output: Vec<OutputItem>,
    /// Source line the rule was declared on
    pub line: u32,
}

/// One pass of a mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    /// What the pass reads and writes
    pub kind: PassKind,
    /// Unit emitted on the left side for unmapped input
    pub lhs_default: u32,
    /// Unit emitted on the right side for unmapped input
    pub rhs_default: u32,
    /// Class members in declaration order
    pub classes: Vec<Vec<u32>>,
    /// Inclusive ranges copied through unchanged when no rule matches
    pub pass_through: Vec<(u32, u32)>,
    /// Rules applied left to right, in priority order
    pub forward: Vec<Rule>,
    /// Rules applied right to left, in priority order
    pub reverse: Vec<Rule>,
}

impl Pass {
    /// Empty pass of the given kind with the usual replacement defaults
    pub fn new(kind: PassKind) -> Self {
        let (lhs_default, rhs_default) = match kind {
            PassKind::ByteUnicode => (0x3F, 0xFFFD),
            PassKind::UnicodeByte => (0xFFFD, 0x3F),
            PassKind::Byte => (0x3F, 0x3F),
            _ => (0xFFFD, 0xFFFD),
        };
        Self {
            kind,
            lhs_default,
            rhs_default,
            classes: Vec::new(),
            pass_through: Vec::new(),
            forward: Vec::new(),
            reverse: Vec::new(),
        }
    }

    /// Rules for one direction
    pub fn rules(&self, forward: bool) -> &[Rule] {
        if forward { &self.forward } else { &self.reverse }
    }
}

/// All passes of a mapping, in left-to-right order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    /// Passes in forward order
    pub passes: Vec<Pass>,
}

impl RuleSet {
    /// Left side carries Unicode
    pub fn lhs_is_unicode(&self) -> bool {
        self.passes.first().is_some_and(|p| p.kind.lhs_is_unicode())
    }

    /// Right side carries Unicode
    pub fn rhs_is_unicode(&self) -> bool {
        self.passes.last().is_some_and(|p| p.kind.rhs_is_unicode())
    }

    /// Serialize to the word layout described in the module docs
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WordWriter::default();
        w.put(self.passes.len() as u32);
        for pass in &self.passes {
            w.put(pass.kind.code());
            w.put(pass.lhs_default);
            w.put(pass.rhs_default);
            w.put(pass.classes.len() as u32);
            for class in &pass.classes {
                w.put(class.len() as u32);
                class.iter().for_each(|&v| w.put(v));
            }
            w.put(pass.pass_through.len() as u32);
            for &(lo, hi) in &pass.pass_through {
                w.put(lo);
                w.put(hi);
            }
            encode_rules(&mut w, &pass.forward);
            encode_rules(&mut w, &pass.reverse);
        }
        w.bytes
    }

    /// Parse and validate serialized rule data
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidMapping(
                "rule data is not a whole number of words".to_string(),
            ));
        }
        let mut r = WordReader { bytes, pos: 0 };
        let pass_count = r.count(3)?;
        if pass_count == 0 {
            return Err(Error::InvalidMapping("mapping has no passes".to_string()));
        }
        let mut passes = Vec::new();
        passes.try_reserve_exact(pass_count)?;
        for index in 0..pass_count {
            passes.push(decode_pass(&mut r, index)?);
        }
        if !r.at_end() {
            return Err(Error::InvalidMapping(
                "trailing bytes after rule data".to_string(),
            ));
        }
        let set = RuleSet { passes };
        set.check_chain()?;
        Ok(set)
    }

    fn check_chain(&self) -> Result<()> {
        for pair in self.passes.windows(2) {
            if pair[0].kind.rhs_is_unicode() != pair[1].kind.lhs_is_unicode() {
                return Err(Error::InvalidMapping(format!(
                    "pass {} cannot feed pass {}",
                    pair[0].kind.name(),
                    pair[1].kind.name()
                )));
            }
        }
        Ok(())
    }
}

fn encode_rules(w: &mut WordWriter, rules: &[Rule]) {
    w.put(rules.len() as u32);
    for rule in rules {
        w.put(rule.pre.len() as u32);
        w.put(rule.matched.len() as u32);
        w.put(rule.post.len() as u32);
        w.put(rule.output.len() as u32);
        w.put(rule.line);
        for el in rule.pre.iter().chain(&rule.matched).chain(&rule.post) {
            w.put(element_word(*el));
        }
        for item in &rule.output {
            w.put(match *item {
                OutputItem::Literal(v) => v,
                OutputItem::Class { class, source } => {
                    CLASS_TAG | (u32::from(source) << 16) | u32::from(class)
                }
            });
        }
    }
}

fn element_word(el: Element) -> u32 {
    match el {
        Element::Literal(v) => v,
        Element::Class(c) => CLASS_TAG | u32::from(c),
        Element::Boundary => BOUNDARY_WORD,
    }
}

fn decode_pass(r: &mut WordReader<'_>, index: usize) -> Result<Pass> {
    let code = r.word()?;
    let kind = PassKind::from_code(code).ok_or_else(|| {
        Error::InvalidMapping(format!("pass {} has unknown kind {}", index, code))
    })?;
    let lhs_default = r.word()?;
    let rhs_default = r.word()?;
    check_unit(lhs_default, kind.lhs_is_unicode())?;
    check_unit(rhs_default, kind.rhs_is_unicode())?;

    let class_count = r.count(1)?;
    if class_count > usize::from(u16::MAX) {
        return Err(Error::InvalidMapping(format!("pass {} has too many classes", index)));
    }
    let mut classes = Vec::new();
    classes.try_reserve_exact(class_count)?;
    for _ in 0..class_count {
        let len = r.count(1)?;
        let mut members = Vec::new();
        members.try_reserve_exact(len)?;
        for _ in 0..len {
            members.push(r.word()?);
        }
        classes.push(members);
    }

    // A mapping pass copies pass-through units across the byte side
    let range_limit = if kind.is_mapping() { 0xFF } else { MAX_CODE_POINT };
    let range_count = r.count(2)?;
    let mut pass_through = Vec::new();
    pass_through.try_reserve_exact(range_count)?;
    for _ in 0..range_count {
        let lo = r.word()?;
        let hi = r.word()?;
        if lo > hi || hi > range_limit {
            return Err(Error::InvalidMapping(format!(
                "pass {} has malformed pass-through range",
                index
            )));
        }
        pass_through.push((lo, hi));
    }

    let forward = decode_rules(r, &classes, kind, true)?;
    let reverse = decode_rules(r, &classes, kind, false)?;
    if kind.is_normalization() && !(forward.is_empty() && reverse.is_empty()) {
        return Err(Error::InvalidMapping(format!(
            "normalization pass {} carries rules",
            index
        )));
    }

    Ok(Pass {
        kind,
        lhs_default,
        rhs_default,
        classes,
        pass_through,
        forward,
        reverse,
    })
}

fn decode_rules(
    r: &mut WordReader<'_>,
    classes: &[Vec<u32>],
    kind: PassKind,
    forward: bool,
) -> Result<Vec<Rule>> {
    let (input_unicode, output_unicode) = if forward {
        (kind.lhs_is_unicode(), kind.rhs_is_unicode())
    } else {
        (kind.rhs_is_unicode(), kind.lhs_is_unicode())
    };
    let count = r.count(5)?;
    let mut rules = Vec::new();
    rules.try_reserve_exact(count)?;
    for _ in 0..count {
        let pre_len = r.part_len()?;
        let match_len = r.part_len()?;
        let post_len = r.part_len()?;
        let out_len = r.part_len()?;
        let line = r.word()?;
        if match_len == 0 {
            return Err(bad_rule(line, "empty match"));
        }
        let pre = decode_elements(r, pre_len, classes, input_unicode, line)?;
        let matched = decode_elements(r, match_len, classes, input_unicode, line)?;
        let post = decode_elements(r, post_len, classes, input_unicode, line)?;
        if matched.contains(&Element::Boundary)
            || pre.iter().skip(1).any(|e| *e == Element::Boundary)
            || post.iter().rev().skip(1).any(|e| *e == Element::Boundary)
        {
            return Err(bad_rule(line, "boundary inside a pattern"));
        }
        let mut output = Vec::with_capacity(out_len);
        for _ in 0..out_len {
            let word = r.word()?;
            let item = if word & CLASS_TAG != 0 {
                let class = (word & 0xFFFF) as u16;
                let source = ((word >> 16) & 0xFF) as u8;
                let target_ok = classes.get(usize::from(class)).is_some_and(|members| {
                    members.iter().all(|&v| check_unit(v, output_unicode).is_ok())
                });
                let source_ok = matches!(
                    matched.get(usize::from(source)),
                    Some(Element::Class(c)) if classes[usize::from(*c)].len()
                        <= classes.get(usize::from(class)).map_or(0, Vec::len)
                );
                if !target_ok || !source_ok {
                    return Err(bad_rule(line, "bad class correspondence"));
                }
                OutputItem::Class { class, source }
            } else {
                check_unit(word, output_unicode)?;
                OutputItem::Literal(word)
            };
            output.push(item);
        }
        rules.push(Rule {
            pre,
            matched,
            post,
            output,
            line,
        });
    }
    Ok(rules)
}

fn decode_elements(
    r: &mut WordReader<'_>,
    len: usize,
    classes: &[Vec<u32>],
    unicode: bool,
    line: u32,
) -> Result<Vec<Element>> {
    let mut elements = Vec::with_capacity(len);
    for _ in 0..len {
        let word = r.word()?;
        let el = if word == BOUNDARY_WORD {
            Element::Boundary
        } else if word & CLASS_TAG != 0 {
            let class = word & !CLASS_TAG;
            if class as usize >= classes.len() {
                return Err(bad_rule(line, "class reference out of range"));
            }
            Element::Class(class as u16)
        } else {
            check_unit(word, unicode)?;
            Element::Literal(word)
        };
        elements.push(el);
    }
    Ok(elements)
}

fn check_unit(value: u32, unicode: bool) -> Result<()> {
    let ok = if unicode {
        char::from_u32(value).is_some()
    } else {
        value <= 0xFF
    };
    if ok && value < LITERAL_LIMIT {
        Ok(())
    } else {
        Err(Error::InvalidMapping(format!(
            "value 0x{:X} is not a valid {} unit",
            value,
            if unicode { "Unicode" } else { "byte" }
        )))
    }
}

fn bad_rule(line: u32, what: &str) -> Error {
    Error::InvalidMapping(format!("rule from line {}: {}", line, what))
}

#[derive(Default)]
struct WordWriter {
    bytes: Vec<u8>,
}

impl WordWriter {
    fn put(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_be_bytes());
    }
}

struct WordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl WordReader<'_> {
    fn word(&mut self) -> Result<u32> {
        let chunk = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| Error::InvalidMapping("rule data is truncated".to_string()))?;
        self.pos += 4;
        Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    /// A count whose items take at least `min_words` each; rejects counts the
    /// remaining data cannot possibly hold.
    fn count(&mut self, min_words: usize) -> Result<usize> {
        let count = self.word()? as usize;
        let remaining = (self.bytes.len() - self.pos) / 4;
        if count.saturating_mul(min_words) > remaining {
            return Err(Error::InvalidMapping(
                "count exceeds remaining rule data".to_string(),
            ));
        }
        Ok(count)
    }

    fn part_len(&mut self) -> Result<usize> {
        let len = self.word()? as usize;
        if len > MAX_RULE_PART {
            return Err(Error::InvalidMapping("rule part is too long".to_string()));
        }
        Ok(len)
    }

    fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greek_pass() -> Pass {
        let mut pass = Pass::new(PassKind::ByteUnicode);
        pass.classes = vec![vec![0x61, 0x62], vec![0x3B1, 0x3B2]];
        pass.pass_through = vec![(0x00, 0x7F)];
        pass.forward = vec![
            Rule {
                pre: vec![],
                matched: vec![Element::Literal(0xC1), Element::Literal(0x80)],
                post: vec![],
                output: vec![OutputItem::Literal(0xC0)],
                line: 3,
            },
            Rule {
                pre: vec![Element::Boundary],
                matched: vec![Element::Class(0)],
                post: vec![Element::Literal(0x20)],
                output: vec![OutputItem::Class { class: 1, source: 0 }],
                line: 4,
            },
        ];
        pass.reverse = vec![Rule {
            pre: vec![],
            matched: vec![Element::Class(1)],
            post: vec![],
            output: vec![OutputItem::Class { class: 0, source: 0 }],
            line: 4,
        }];
        pass
    }

    #[test]
    fn test_encode_decode() {
        let set = RuleSet {
            passes: vec![greek_pass(), Pass::new(PassKind::Nfc)],
        };
        let bytes = set.encode();
        assert_eq!(bytes.len() % 4, 0);
        let decoded = RuleSet::decode(&bytes).unwrap();
        assert_eq!(decoded, set);
        assert!(!decoded.lhs_is_unicode());
        assert!(decoded.rhs_is_unicode());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = RuleSet {
            passes: vec![greek_pass()],
        }
        .encode();
        for cut in [4, 8, bytes.len() - 4] {
            assert!(matches!(
                RuleSet::decode(&bytes[..cut]),
                Err(Error::InvalidMapping(_))
            ));
        }
        assert!(RuleSet::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_broken_chain() {
        let set = RuleSet {
            passes: vec![Pass::new(PassKind::ByteUnicode), Pass::new(PassKind::Byte)],
        };
        assert!(matches!(
            RuleSet::decode(&set.encode()),
            Err(Error::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_decode_rejects_out_of_range_values() {
        let mut pass = Pass::new(PassKind::ByteUnicode);
        pass.forward.push(Rule {
            pre: vec![],
            matched: vec![Element::Literal(0x141)],
            post: vec![],
            output: vec![],
            line: 1,
        });
        let set = RuleSet { passes: vec![pass] };
        assert!(RuleSet::decode(&set.encode()).is_err());

        let mut pass = Pass::new(PassKind::Unicode);
        pass.forward.push(Rule {
            pre: vec![],
            matched: vec![Element::Literal(0x41)],
            post: vec![],
            output: vec![OutputItem::Literal(0xD800)],
            line: 1,
        });
        let set = RuleSet { passes: vec![pass] };
        assert!(RuleSet::decode(&set.encode()).is_err());
    }

    #[test]
    fn test_decode_rejects_wide_pass_through_in_mapping_pass() {
        let mut pass = Pass::new(PassKind::UnicodeByte);
        pass.pass_through = vec![(0x00, 0x7F), (0x100, 0x17F)];
        let set = RuleSet { passes: vec![pass] };
        assert!(matches!(
            RuleSet::decode(&set.encode()),
            Err(Error::InvalidMapping(_))
        ));

        let mut pass = Pass::new(PassKind::ByteUnicode);
        pass.pass_through = vec![(0x00, 0xFF)];
        let set = RuleSet { passes: vec![pass] };
        assert!(RuleSet::decode(&set.encode()).is_ok());
    }

    #[test]
    fn test_decode_rejects_huge_counts() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            RuleSet::decode(&bytes),
            Err(Error::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_pass_kind_names() {
        assert_eq!(PassKind::from_name("byte_unicode"), Some(PassKind::ByteUnicode));
        assert_eq!(PassKind::from_name("NFD"), Some(PassKind::Nfd));
        assert_eq!(PassKind::from_name("bogus"), None);
        assert!(!PassKind::ByteUnicode.lhs_is_unicode());
        assert!(PassKind::ByteUnicode.rhs_is_unicode());
        assert!(PassKind::UnicodeByte.is_mapping());
    }
}
