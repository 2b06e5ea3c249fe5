//! Streaming NFC/NFD stage on top of `unicode-normalization`.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::{canonical_combining_class, compose};

use crate::form::NormalForm;
use crate::{Error, Result};

/// Normalizes a unit stream one segment at a time.
///
/// A segment ends before a starter that cannot compose with the character
/// in front of it, so text on either side of the cut normalizes
/// independently.
#[derive(Debug, Clone)]
pub(crate) struct NormalizeStage {
    form: NormalForm,
    pending: Vec<char>,
}

impl NormalizeStage {
    pub fn new(form: NormalForm) -> Self {
        Self {
            form,
            pending: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn process(&mut self, input: &[u32], complete: bool, out: &mut Vec<u32>) -> Result<()> {
        for &unit in input {
            let ch = char::from_u32(unit).ok_or_else(|| {
                Error::Exception(format!("value 0x{:X} reached a normalizer", unit))
            })?;
            let boundary = canonical_combining_class(ch) == 0
                && self
                    .pending
                    .last()
                    .is_some_and(|&prev| compose(prev, ch).is_none());
            if boundary {
                self.emit(out);
            }
            self.pending.push(ch);
        }
        if complete {
            self.emit(out);
        }
        Ok(())
    }

    fn emit(&mut self, out: &mut Vec<u32>) {
        let segment = self.pending.drain(..);
        match self.form {
            NormalForm::Nfc => out.extend(segment.nfc().map(u32::from)),
            NormalForm::Nfd => out.extend(segment.nfd().map(u32::from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u32> {
        s.chars().map(u32::from).collect()
    }

    #[test]
    fn test_nfc_across_chunks() {
        let mut stage = NormalizeStage::new(NormalForm::Nfc);
        let mut out = Vec::new();
        stage.process(&units("ce"), false, &mut out).unwrap();
        assert_eq!(out, units("c"));
        stage.process(&units("\u{301}"), false, &mut out).unwrap();
        assert_eq!(out, units("c"));
        stage.process(&units("x"), true, &mut out).unwrap();
        assert_eq!(out, units("c\u{e9}x"));
        assert_eq!(stage.pending_len(), 0);
    }

    #[test]
    fn test_nfd_decomposes_and_reorders() {
        let mut stage = NormalizeStage::new(NormalForm::Nfd);
        let mut out = Vec::new();
        // Marks in non-canonical order: dot below (220) after acute (230)
        stage
            .process(&units("\u{e9}\u{323}a"), true, &mut out)
            .unwrap();
        assert_eq!(out, units("e\u{323}\u{301}a"));
    }

    #[test]
    fn test_hangul_jamo_stay_in_one_segment() {
        let mut stage = NormalizeStage::new(NormalForm::Nfc);
        let mut out = Vec::new();
        stage.process(&units("\u{1100}"), false, &mut out).unwrap();
        stage.process(&units("\u{1161}"), true, &mut out).unwrap();
        assert_eq!(out, units("\u{AC00}"));
    }
}
