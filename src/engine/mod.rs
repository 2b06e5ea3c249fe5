//! Streaming conversion engine.
//!
//! A [`Converter`] binds a [`MappingTable`] to a direction and a pair of
//! encoding forms and then translates input one buffer at a time:
//!
//! ```text
//! decoder -> [input normalizer] -> passes -> [output normalizer] -> encoder -> pending bytes
//! ```
//!
//! State that cannot be decided yet (a partial UTF sequence, the start of
//! a multi-unit rule, output that did not fit) is kept between calls.

mod codec;
mod normalize;
mod shared;
mod stage;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::form::{BaseForm, EncodingForm, NormalForm, SideFlags};
use crate::table::rules::PassKind;
use crate::table::{FORMAT_VERSION, MappingTable, NameId, Version};
use crate::{Error, Result, Status};
use codec::{Decoder, Encoder, Step};
use normalize::NormalizeStage;
use stage::RuleStage;

pub use shared::SharedConverter;

/// Table format version this engine executes
pub fn engine_version() -> Version {
    FORMAT_VERSION
}

/// Where a converter is in its stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No stream in progress
    Ready,
    /// Input has been accepted and more may follow
    Converting,
    /// Input is complete; buffered output is being drained
    Flushing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Ready => "ready",
            Phase::Converting => "converting",
            Phase::Flushing => "flushing",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful [`Converter::convert_buffer`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// `NoError`, `OutputBufferFull` or `NeedMoreInput`
    pub status: Status,
    /// Input bytes taken; resume from here after `OutputBufferFull`
    pub input_read: usize,
    /// Input bytes whose translation is settled, excluding bytes held as
    /// an undecided partial match
    pub input_used: usize,
    /// Bytes written to the output buffer
    pub output_used: usize,
}

#[derive(Debug, Clone)]
enum Stage {
    Rules(RuleStage),
    Normalize(NormalizeStage),
}

impl Stage {
    fn process(&mut self, input: &[u32], complete: bool, out: &mut Vec<u32>) -> Result<()> {
        match self {
            Stage::Rules(stage) => stage.process(input, complete, out),
            Stage::Normalize(stage) => stage.process(input, complete, out),
        }
    }

    fn pending_len(&self) -> usize {
        match self {
            Stage::Rules(stage) => stage.pending_len(),
            Stage::Normalize(stage) => stage.pending_len(),
        }
    }

    fn reset(&mut self) {
        match self {
            Stage::Rules(stage) => stage.reset(),
            Stage::Normalize(stage) => stage.reset(),
        }
    }
}

fn resolve_form(form: EncodingForm, unicode: bool, role: &str) -> Result<EncodingForm> {
    let base = match form.base {
        BaseForm::Unspecified if unicode => BaseForm::UTF8,
        BaseForm::Unspecified => BaseForm::RawBytes,
        base => base,
    };
    if base.is_unicode() != unicode {
        return Err(Error::InvalidForm(format!(
            "{} form {} does not fit a {} side",
            role,
            base,
            if unicode { "Unicode" } else { "byte" }
        )));
    }
    Ok(EncodingForm {
        base,
        flags: form.flags,
    })
}

/// A streaming converter bound to one table, direction and pair of forms.
///
/// Not thread-safe; wrap it in a [`SharedConverter`] to get fail-fast
/// rejection of overlapping calls.
#[derive(Debug, Clone)]
pub struct Converter {
    table: Arc<MappingTable>,
    forward: bool,
    source: EncodingForm,
    target: EncodingForm,
    decoder: Decoder,
    stages: Vec<Stage>,
    encoder: Encoder,
    /// Encoded output that did not fit the caller's buffer
    pending: VecDeque<u8>,
    /// Encoded width of each unit held by the first stage
    widths: VecDeque<u8>,
    finished: bool,
    phase: Phase,
}

impl Converter {
    /// Create a converter.
    ///
    /// `forward` maps the table's left side to its right side. Fails with
    /// `InvalidForm` when a form does not fit its side of the table, and
    /// with `InvalidMapping` when the rule data is corrupt.
    pub fn new(
        table: Arc<MappingTable>,
        forward: bool,
        source: EncodingForm,
        target: EncodingForm,
    ) -> Result<Self> {
        let rules = table.rules()?;
        let (lhs, rhs) = table.flags();
        let (source_side, target_side) = if forward { (lhs, rhs) } else { (rhs, lhs) };

        let source = resolve_form(source, source_side.is_unicode(), "source")?;
        let target = resolve_form(target, target_side.is_unicode(), "target")?;
        let wanted = target.flags;
        if wanted.contains(SideFlags::GENERATES_NFC | SideFlags::GENERATES_NFD) {
            return Err(Error::InvalidForm(
                "target form asks for both NFC and NFD".to_string(),
            ));
        }
        if !target.is_unicode() && !wanted.normalization().is_empty() {
            return Err(Error::InvalidForm(
                "normalization requested on a byte target".to_string(),
            ));
        }

        let mut stages = Vec::new();
        if source.is_unicode()
            && let Some(form) = source_side.expected_form()
        {
            stages.push(Stage::Normalize(NormalizeStage::new(form)));
        }
        let ordered: Vec<_> = if forward {
            rules.passes.iter().collect()
        } else {
            rules.passes.iter().rev().collect()
        };
        for pass in ordered {
            let stage = match pass.kind {
                PassKind::Nfc => Stage::Normalize(NormalizeStage::new(NormalForm::Nfc)),
                PassKind::Nfd => Stage::Normalize(NormalizeStage::new(NormalForm::Nfd)),
                _ => {
                    let strict = stages.is_empty()
                        && source.base == BaseForm::RawBytes
                        && pass.kind.is_mapping();
                    Stage::Rules(RuleStage::new(pass, forward, strict))
                }
            };
            stages.push(stage);
        }
        if let Some(form) = wanted.generated_form()
            && target_side.generated_form() != Some(form)
        {
            stages.push(Stage::Normalize(NormalizeStage::new(form)));
        }

        debug!(
            "created {} converter {} -> {} with {} stage(s)",
            if forward { "forward" } else { "reverse" },
            source,
            target,
            stages.len()
        );

        Ok(Self {
            decoder: Decoder::new(source.base),
            encoder: Encoder::new(target.base),
            table,
            forward,
            source,
            target,
            stages,
            pending: VecDeque::new(),
            widths: VecDeque::new(),
            finished: false,
            phase: Phase::Ready,
        })
    }

    /// Table the converter executes
    pub fn table(&self) -> &Arc<MappingTable> {
        &self.table
    }

    /// Maps the table's left side to its right side
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Resolved source form
    pub fn source_form(&self) -> EncodingForm {
        self.source
    }

    /// Resolved target form
    pub fn target_form(&self) -> EncodingForm {
        self.target
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Look up a name record of the underlying table
    pub fn name(&self, id: NameId) -> Result<String> {
        self.table.name(id)
    }

    /// Two-call name query on the underlying table
    pub fn copy_name(&self, id: NameId, buffer: &mut [u16]) -> Result<usize> {
        self.table.copy_name(id, buffer)
    }

    /// `(source, target)` side flags in conversion order
    pub fn flags(&self) -> (SideFlags, SideFlags) {
        let (lhs, rhs) = self.table.flags();
        if self.forward { (lhs, rhs) } else { (rhs, lhs) }
    }

    /// Discard all buffered state and return to [`Phase::Ready`]
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.stages.iter_mut().for_each(Stage::reset);
        self.pending.clear();
        self.widths.clear();
        self.finished = false;
        self.phase = Phase::Ready;
    }

    /// Convert one buffer of input.
    ///
    /// With `complete == false` the result is `NeedMoreInput` once all
    /// input has been taken. With `complete == true` the stream is finished
    /// and the converter returns to `Ready` when the result is `NoError`.
    /// `OutputBufferFull` means the caller must call again with
    /// `&input[progress.input_read..]` and a drained buffer.
    pub fn convert_buffer(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        complete: bool,
    ) -> Result<Progress> {
        let mut written = self.drain(output);
        let mut read = 0;

        while read < input.len() && self.pending.is_empty() {
            match self.decoder.next(&input[read..]) {
                Step::Char {
                    value,
                    width,
                    taken,
                } => {
                    read += taken;
                    self.widths.push_back(width);
                    let result = self.run(&[value], false);
                    written += self.drain(&mut output[written..]);
                    if let Err(e) = result {
                        return Err(self.locate(e, read, written));
                    }
                }
                Step::Partial { taken } => read += taken,
                Step::Malformed => {
                    let e = Error::IncompleteChar {
                        input_read: 0,
                        input_used: 0,
                        output_used: 0,
                    };
                    return Err(self.locate(e, read, written));
                }
            }
        }

        let all_read = read == input.len() && self.pending.is_empty();
        if complete && all_read && !self.finished {
            if self.decoder.partial_len() > 0 {
                let e = Error::IncompleteChar {
                    input_read: 0,
                    input_used: 0,
                    output_used: 0,
                };
                return Err(self.locate(e, read, written));
            }
            let result = self.run(&[], true);
            written += self.drain(&mut output[written..]);
            result.map_err(|e| self.locate(e, read, written))?;
            self.finished = true;
        }

        let status = if !self.pending.is_empty() || read < input.len() {
            Status::OutputBufferFull
        } else if complete {
            Status::NoError
        } else {
            Status::NeedMoreInput
        };
        let progress = Progress {
            status,
            input_read: read,
            input_used: self.input_used(read),
            output_used: written,
        };

        self.phase = match status {
            Status::NoError => {
                self.reset();
                Phase::Ready
            }
            _ if complete && read == input.len() => Phase::Flushing,
            _ => Phase::Converting,
        };
        Ok(progress)
    }

    /// Drain buffered state at end of input; same as an empty, complete
    /// [`Converter::convert_buffer`] call
    pub fn flush(&mut self, output: &mut [u8]) -> Result<Progress> {
        self.convert_buffer(&[], output, true)
    }

    /// Convert a whole input in one go, starting from a clean stream
    pub fn convert_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.reset();
        let mut result = Vec::new();
        let mut buffer = [0u8; 4096];
        let mut pos = 0;
        loop {
            let progress = self.convert_buffer(&input[pos..], &mut buffer, true)?;
            result.try_reserve(progress.output_used)?;
            result.extend_from_slice(&buffer[..progress.output_used]);
            pos += progress.input_read;
            if progress.status == Status::NoError {
                return Ok(result);
            }
        }
    }

    /// Push units through every stage and encode what comes out.
    ///
    /// A stage fault still lets the units produced before it flow on.
    fn run(&mut self, units: &[u32], complete: bool) -> Result<()> {
        let mut current = units.to_vec();
        let mut next = Vec::new();
        let mut fault = None;
        let mut complete = complete;
        for (i, stage) in self.stages.iter_mut().enumerate() {
            next.clear();
            if let Err(e) = stage.process(&current, complete, &mut next) {
                fault.get_or_insert(e);
                complete = false;
            }
            if i == 0 {
                let held = stage.pending_len();
                while self.widths.len() > held {
                    self.widths.pop_front();
                }
            }
            std::mem::swap(&mut current, &mut next);
        }
        for &unit in &current {
            self.encoder.encode(unit, &mut self.pending)?;
        }
        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drain(&mut self, output: &mut [u8]) -> usize {
        let count = output.len().min(self.pending.len());
        for (slot, byte) in output.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn input_used(&self, read: usize) -> usize {
        let held: usize = self.widths.iter().map(|&w| usize::from(w)).sum();
        read.saturating_sub(self.decoder.partial_len() + held)
    }

    fn locate(&self, error: Error, read: usize, written: usize) -> Error {
        match error {
            Error::IncompleteChar { .. } => Error::IncompleteChar {
                input_read: read,
                input_used: self.input_used(read),
                output_used: written,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, compile};

    const GREEK: &str = "
        LHSName \"Legacy-Greek\"
        RHSName \"UNICODE\"
        PassThrough 0x00..0x7F
        0x41 <> U+0391
        0xC1 0x80 <> U+00C0
    ";

    fn table(source: &str) -> Arc<MappingTable> {
        let blob = compile(source, &CompileOptions::default(), |_| {}).unwrap();
        Arc::new(MappingTable::from_bytes(blob).unwrap())
    }

    fn utf16le_units(bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_bytes_to_utf16le() {
        let mut conv =
            Converter::new(table(GREEK), true, EncodingForm::BYTES, EncodingForm::UTF16LE).unwrap();
        let mut out = [0u8; 16];
        let progress = conv.convert_buffer(&[0x41, 0x42], &mut out, true).unwrap();
        assert_eq!(progress.status, Status::NoError);
        assert_eq!(progress.input_read, 2);
        assert_eq!(progress.output_used, 4);
        assert_eq!(utf16le_units(&out[..4]), vec![0x0391, 0x0042]);
        assert_eq!(conv.phase(), Phase::Ready);
    }

    #[test]
    fn test_partial_rule_is_held_between_calls() {
        let mut conv =
            Converter::new(table(GREEK), true, EncodingForm::BYTES, EncodingForm::UTF16LE).unwrap();
        let mut out = [0u8; 16];
        let progress = conv.convert_buffer(&[0xC1], &mut out, false).unwrap();
        assert_eq!(progress.status, Status::NeedMoreInput);
        assert_eq!(progress.input_read, 1);
        assert_eq!(progress.input_used, 0);
        assert_eq!(progress.output_used, 0);
        assert_eq!(conv.phase(), Phase::Converting);

        let progress = conv.convert_buffer(&[0x80], &mut out, true).unwrap();
        assert_eq!(progress.status, Status::NoError);
        assert_eq!(utf16le_units(&out[..progress.output_used]), vec![0x00C0]);
    }

    #[test]
    fn test_truncated_rule_at_end_of_input() {
        let mut conv =
            Converter::new(table(GREEK), true, EncodingForm::BYTES, EncodingForm::UTF16LE).unwrap();
        let mut out = [0u8; 16];
        let err = conv.convert_buffer(&[0xC1], &mut out, true).unwrap_err();
        assert_eq!(err.status(), Status::IncompleteChar);
        assert!(matches!(
            err,
            Error::IncompleteChar {
                input_read: 1,
                output_used: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_held_prefix_with_its_own_mapping_ends_cleanly() {
        let digraph = table("PassThrough 0x00..0x7F\n0x61 0x65 <> U+00E6\n");
        for (input, expected) in [("ba", "ba"), ("bae", "b\u{e6}"), ("ab", "ab")] {
            let mut conv =
                Converter::new(digraph.clone(), true, EncodingForm::BYTES, EncodingForm::UTF8)
                    .unwrap();
            assert_eq!(conv.convert_all(input.as_bytes()).unwrap(), expected.as_bytes());
        }

        let reorder = table("Pass(Byte)\n0x41 0x42 <> 0x42 0x41\nPass(Byte_Unicode)\nPassThrough 0x00..0x7F\n");
        let mut conv =
            Converter::new(reorder, true, EncodingForm::BYTES, EncodingForm::UTF8).unwrap();
        assert_eq!(conv.convert_all(b"ABA").unwrap(), b"BAA");
    }

    #[test]
    fn test_output_buffer_full_and_flush() {
        let mut conv =
            Converter::new(table(GREEK), true, EncodingForm::BYTES, EncodingForm::UTF8).unwrap();
        let mut out = [0u8; 1];
        let mut collected = Vec::new();

        let progress = conv.convert_buffer(b"A", &mut out, true).unwrap();
        assert_eq!(progress.status, Status::OutputBufferFull);
        assert_eq!(conv.phase(), Phase::Flushing);
        collected.extend_from_slice(&out[..progress.output_used]);

        let progress = conv.flush(&mut out).unwrap();
        assert_eq!(progress.status, Status::NoError);
        collected.extend_from_slice(&out[..progress.output_used]);
        assert_eq!(collected, "\u{391}".as_bytes());
        assert_eq!(conv.phase(), Phase::Ready);
    }

    #[test]
    fn test_reverse_direction() {
        let mut conv =
            Converter::new(table(GREEK), false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        let out = conv.convert_all("\u{391}B\u{C0}".as_bytes()).unwrap();
        assert_eq!(out, vec![0x41, 0x42, 0xC1, 0x80]);
        assert_eq!(conv.flags().0, SideFlags::UNICODE);
    }

    #[test]
    fn test_malformed_utf8_is_incomplete_char() {
        let mut conv =
            Converter::new(table(GREEK), false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        let mut out = [0u8; 16];
        let err = conv.convert_buffer(b"B\xFFB", &mut out, true).unwrap_err();
        assert!(matches!(
            err,
            Error::IncompleteChar {
                input_read: 1,
                output_used: 1,
                ..
            }
        ));
        assert_eq!(out[0], 0x42);
    }

    #[test]
    fn test_dangling_partial_utf8_at_end() {
        let mut conv =
            Converter::new(table(GREEK), false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        let mut out = [0u8; 16];
        let progress = conv.convert_buffer(b"\xCE", &mut out, false).unwrap();
        assert_eq!(progress.status, Status::NeedMoreInput);
        assert_eq!(progress.input_used, 0);
        let err = conv.flush(&mut out).unwrap_err();
        assert_eq!(err.status(), Status::IncompleteChar);
    }

    #[test]
    fn test_form_validation() {
        let greek = table(GREEK);
        let err = Converter::new(greek.clone(), true, EncodingForm::UTF8, EncodingForm::UTF8)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidForm(_)));

        let nfc_and_nfd = EncodingForm::UTF8
            .with_flags(SideFlags::GENERATES_NFC | SideFlags::GENERATES_NFD);
        assert!(Converter::new(greek.clone(), true, EncodingForm::BYTES, nfc_and_nfd).is_err());

        let normalized_bytes = EncodingForm::BYTES.with_flags(SideFlags::GENERATES_NFC);
        assert!(
            Converter::new(greek.clone(), false, EncodingForm::UTF8, normalized_bytes).is_err()
        );

        let conv = Converter::new(
            greek,
            true,
            EncodingForm::UNSPECIFIED,
            EncodingForm::UNSPECIFIED,
        )
        .unwrap();
        assert_eq!(conv.source_form(), EncodingForm::BYTES);
        assert_eq!(conv.target_form(), EncodingForm::UTF8);
    }

    #[test]
    fn test_output_normalizer_on_request() {
        let rules = "
            PassThrough 0x00..0x7F
            0xE9 <> U+0065 U+0301
        ";
        let table = table(rules);
        let plain = Converter::new(table.clone(), true, EncodingForm::BYTES, EncodingForm::UTF8)
            .unwrap()
            .convert_all(&[0xE9])
            .unwrap();
        assert_eq!(plain, "e\u{301}".as_bytes());

        let nfc = EncodingForm::UTF8.with_flags(SideFlags::GENERATES_NFC);
        let composed = Converter::new(table, true, EncodingForm::BYTES, nfc)
            .unwrap()
            .convert_all(&[0xE9])
            .unwrap();
        assert_eq!(composed, "\u{e9}".as_bytes());
    }

    #[test]
    fn test_source_side_expectation_normalizes_input() {
        let expects = table("RHSFlags (ExpectsNFC)\nPassThrough 0x00..0x7F\n0xC1 <> U+00E9\n");
        let mut conv =
            Converter::new(expects, false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        assert_eq!(conv.convert_all("ae\u{301}".as_bytes()).unwrap(), vec![0x61, 0xC1]);
        assert_eq!(conv.convert_all("a\u{e9}".as_bytes()).unwrap(), vec![0x61, 0xC1]);

        // Without the expectation the combining mark falls to the default
        let plain = table("PassThrough 0x00..0x7F\n0xC1 <> U+00E9\n");
        let mut conv =
            Converter::new(plain, false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        assert_ne!(conv.convert_all("ae\u{301}".as_bytes()).unwrap(), vec![0x61, 0xC1]);
    }

    #[test]
    fn test_multi_pass_table_both_directions() {
        let rules = "
            Pass(Byte)
            0x41 0x42 <> 0x42 0x41
            Pass(Byte_Unicode)
            PassThrough 0x00..0x7F
            0xC1 <> U+00E9
            0xC2 > U+0065 U+0301
            Pass(NFC)
        ";
        let table = table(rules);
        let mut fwd =
            Converter::new(table.clone(), true, EncodingForm::BYTES, EncodingForm::UTF8).unwrap();
        assert_eq!(
            fwd.convert_all(b"AB\xC1x\xC2").unwrap(),
            "BA\u{e9}x\u{e9}".as_bytes()
        );

        let mut rev =
            Converter::new(table, false, EncodingForm::UTF8, EncodingForm::BYTES).unwrap();
        assert_eq!(rev.convert_all("BA\u{e9}x".as_bytes()).unwrap(), b"AB\xC1x");
        // The NFC pass composes decomposed input before the mapping pass
        assert_eq!(rev.convert_all("BAe\u{301}x".as_bytes()).unwrap(), b"AB\xC1x");
    }

    #[test]
    fn test_surrogate_pair_split_across_calls() {
        let clef = table("PassThrough 0x00..0x7F\n0xC2 <> U+1D11E\n");
        let cases: [(EncodingForm, &[u8]); 3] = [
            (EncodingForm::UTF16LE, &[0x41, 0x00, 0x34, 0xD8, 0x1E, 0xDD]),
            (EncodingForm::UTF16BE, &[0x00, 0x41, 0xD8, 0x34, 0xDD, 0x1E]),
            (EncodingForm::UTF32BE, &[0, 0, 0, 0x41, 0x00, 0x01, 0xD1, 0x1E]),
        ];
        for (source, input) in cases {
            let mut conv =
                Converter::new(clef.clone(), false, source, EncodingForm::BYTES).unwrap();
            let mut out = [0u8; 8];
            let mut collected = Vec::new();
            for byte in input {
                let progress = conv.convert_buffer(&[*byte], &mut out, false).unwrap();
                assert_eq!(progress.status, Status::NeedMoreInput);
                assert_eq!(progress.input_read, 1);
                collected.extend_from_slice(&out[..progress.output_used]);
            }
            let progress = conv.flush(&mut out).unwrap();
            assert_eq!(progress.status, Status::NoError);
            collected.extend_from_slice(&out[..progress.output_used]);
            assert_eq!(collected, vec![0x41, 0xC2], "{}", source);
        }

        // A high surrogate left dangling is incomplete
        let mut conv =
            Converter::new(clef, false, EncodingForm::UTF16LE, EncodingForm::BYTES).unwrap();
        let mut out = [0u8; 8];
        let err = conv.convert_buffer(&[0x34, 0xD8], &mut out, true).unwrap_err();
        assert_eq!(err.status(), Status::IncompleteChar);
    }

    #[test]
    fn test_metadata_through_converter() {
        let conv =
            Converter::new(table(GREEK), true, EncodingForm::BYTES, EncodingForm::UTF8).unwrap();
        assert_eq!(conv.name(NameId::SOURCE_NAME).unwrap(), "Legacy-Greek");
        assert_eq!(conv.copy_name(NameId::TARGET_NAME, &mut []).unwrap(), 7);
        assert_eq!(
            conv.name(NameId::CONTACT),
            Err(Error::NameNotFound(NameId::CONTACT))
        );
        assert_eq!(engine_version(), FORMAT_VERSION);
    }
}
