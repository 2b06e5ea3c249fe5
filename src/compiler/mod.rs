//! Rule compiler.
//!
//! Turns mapping rule source text into a table blob that
//! [`MappingTable::from_bytes`](crate::MappingTable::from_bytes) accepts.
//! Problems are reported through a caller-supplied callback as
//! [`Diagnostic`]s, one per problem, each carrying the 1-based source line.
//!
//! ```rust
//! use encmap::{compile, CompileOptions, Severity};
//!
//! let mut diagnostics = Vec::new();
//! let result = compile("0x41 <> U+0391\n0x41 <> U+0392\n", &CompileOptions::default(), |d| {
//!     diagnostics.push(d.clone())
//! });
//! assert!(result.is_err());
//! assert_eq!(diagnostics[0].line, 2);
//! assert_eq!(diagnostics.last().unwrap().severity, Severity::Fatal);
//! ```

mod build;
mod lexer;
mod parser;

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::table::{TableParts, Version, write_table};
use crate::{Error, Result};

/// Version stamped into every table this compiler writes
pub const COMPILER_VERSION: Version = Version::new(1, 0);

/// Version of the rule compiler
pub fn compiler_version() -> Version {
    COMPILER_VERSION
}

/// How bad a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious but the table is still produced
    Warning,
    /// The table will not be produced
    Error,
    /// Closing report of a failed compilation
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// One compiler message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Offending token, when there is one
    pub token: Option<String>,
    /// 1-based source line
    pub line: u32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.severity, self.message)?;
        if let Some(token) = &self.token {
            write!(f, " [{}]", token)?;
        }
        Ok(())
    }
}

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Store the rule data zlib-compressed
    pub compress: bool,
    /// zlib level (0-9) used when `compress` is set
    pub compression_level: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            compress: false,
            compression_level: 6,
        }
    }
}

/// Forwards diagnostics to the caller and keeps count
pub(crate) struct Reporter<'a> {
    sink: &'a mut dyn FnMut(&Diagnostic),
    errors: usize,
    warnings: usize,
    first_error: Option<u32>,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(sink: &'a mut dyn FnMut(&Diagnostic)) -> Self {
        Self {
            sink,
            errors: 0,
            warnings: 0,
            first_error: None,
        }
    }

    pub(crate) fn error(&mut self, line: u32, message: impl Into<String>, token: Option<&str>) {
        self.errors += 1;
        self.first_error.get_or_insert(line);
        self.emit(Severity::Error, line, message.into(), token);
    }

    pub(crate) fn warning(&mut self, line: u32, message: impl Into<String>, token: Option<&str>) {
        self.warnings += 1;
        self.emit(Severity::Warning, line, message.into(), token);
    }

    fn emit(&mut self, severity: Severity, line: u32, message: String, token: Option<&str>) {
        let diagnostic = Diagnostic {
            severity,
            message,
            token: token.map(str::to_string),
            line,
        };
        match severity {
            Severity::Warning => warn!("{}", diagnostic),
            _ => debug!("{}", diagnostic),
        }
        (self.sink)(&diagnostic);
    }

    /// Close a failed compilation; returns the error count
    fn fail(&mut self) -> usize {
        let line = self.first_error.unwrap_or(1);
        let message = format!("compilation failed with {} error(s)", self.errors);
        self.emit(Severity::Fatal, line, message, None);
        self.errors
    }
}

/// Compile rule source text into a table blob.
///
/// Every problem is passed to `diagnostics` as it is found. If any error was
/// reported, a single [`Severity::Fatal`] diagnostic follows and the call
/// returns [`Error::CompilationFailed`]. The same source and options always
/// produce byte-identical output.
pub fn compile(
    source: &str,
    options: &CompileOptions,
    mut diagnostics: impl FnMut(&Diagnostic),
) -> Result<Vec<u8>> {
    let mut reporter = Reporter::new(&mut diagnostics);

    let (lines, lex_errors) = lexer::tokenize(source);
    let (statements, parse_errors) = parser::parse(&lines);
    let mut syntax: Vec<(u32, String, Option<String>)> = lex_errors
        .into_iter()
        .map(|e| (e.line, e.message, Some(e.token)))
        .chain(parse_errors.into_iter().map(|e| (e.line, e.message, e.token)))
        .collect();
    syntax.sort_by_key(|(line, _, _)| *line);
    for (line, message, token) in syntax {
        reporter.error(line, message, token.as_deref());
    }

    let lowered = build::lower(&statements, &mut reporter);
    if reporter.errors > 0 {
        let errors = reporter.fail();
        return Err(Error::CompilationFailed { errors });
    }

    let blob = write_table(&TableParts {
        compiler_version: COMPILER_VERSION,
        lhs_flags: lowered.lhs_flags,
        rhs_flags: lowered.rhs_flags,
        names: &lowered.names,
        rules: &lowered.rules,
        compression: options.compress.then_some(options.compression_level),
    })?;
    debug!(
        "compiled {} statement(s) into {} pass(es), {} bytes, {} warning(s)",
        statements.len(),
        lowered.rules.passes.len(),
        blob.len(),
        reporter.warnings
    );
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::SideFlags;
    use crate::table::rules::{Element, OutputItem, PassKind};
    use crate::{MappingTable, NameId, Status};

    fn run(source: &str) -> (Result<Vec<u8>>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let result = compile(source, &CompileOptions::default(), |d| {
            diagnostics.push(d.clone())
        });
        (result, diagnostics)
    }

    fn errors(source: &str) -> Vec<Diagnostic> {
        let (result, diagnostics) = run(source);
        assert!(result.is_err(), "expected failure for {:?}", source);
        diagnostics
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    fn warnings(source: &str) -> Vec<Diagnostic> {
        let (result, diagnostics) = run(source);
        assert!(result.is_ok(), "{:?}", diagnostics);
        diagnostics
            .into_iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn load(source: &str) -> MappingTable {
        let (result, diagnostics) = run(source);
        let blob = result.unwrap_or_else(|e| panic!("{}: {:?}", e, diagnostics));
        MappingTable::from_bytes(blob).unwrap()
    }

    #[test]
    fn test_headers_become_names() {
        let table = load(
            "LHSName \"SIL-Greek\"\nRHSName \"UNICODE\"\nCopyright 'none'\n0x41 <> U+0391\n",
        );
        assert_eq!(table.name(NameId::SOURCE_NAME).unwrap(), "SIL-Greek");
        assert_eq!(table.name(NameId::TARGET_NAME).unwrap(), "UNICODE");
        assert_eq!(table.name(NameId::COPYRIGHT).unwrap(), "none");
        assert_eq!(
            table.name(NameId::CONTACT),
            Err(Error::NameNotFound(NameId::CONTACT))
        );
        assert_eq!(table.compiler_version(), COMPILER_VERSION);
    }

    #[test]
    fn test_side_flags() {
        let table = load("RHSFlags (GeneratesNFC)\n0x41 <> U+0391\n");
        let (lhs, rhs) = table.flags();
        assert_eq!(lhs, SideFlags::NONE);
        assert_eq!(rhs, SideFlags::UNICODE | SideFlags::GENERATES_NFC);

        let table = load("Pass(Unicode)\nU+0041 <> U+0061\n");
        assert_eq!(
            table.flags(),
            (SideFlags::UNICODE, SideFlags::UNICODE)
        );
    }

    #[test]
    fn test_flag_errors() {
        let found = errors("LHSFlags (ExpectsNFC)\n0x41 <> U+0391\n");
        assert_eq!(found[0].message, "normalization flags on a byte side");
        assert_eq!(found[0].line, 1);

        let found = errors("RHSFlags (GeneratesNFC GeneratesNFD)\n0x41 <> U+0391\n");
        assert_eq!(found[0].message, "flags ask for both NFC and NFD");

        let found = errors("RHSFlags (Shiny)\n0x41 <> U+0391\n");
        assert_eq!(found[0].token.as_deref(), Some("Shiny"));
    }

    #[test]
    fn test_fatal_is_reported_once_at_first_error() {
        let (result, diagnostics) = run("0x41 <> U+0391\n0x1FF <> U+0392\n0x42 <> [nope]\n");
        assert_eq!(result, Err(Error::CompilationFailed { errors: 2 }));
        assert_eq!(result.unwrap_err().status(), Status::CompilationFailed);

        let fatal: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Fatal)
            .collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].line, 2);
        assert_eq!(fatal[0].message, "compilation failed with 2 error(s)");
        assert_eq!(diagnostics.last(), Some(fatal[0]));
    }

    #[test]
    fn test_syntax_errors_keep_line_order() {
        let found = errors("0x41 <> U+0391\n0x42 ! U+0392\nBogus 1\n0x43 <>\n");
        let lines: Vec<u32> = found.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert_eq!(found[0].token.as_deref(), Some("!"));
        assert_eq!(found[1].message, "unknown keyword");
        assert_eq!(found[2].message, "empty match");
    }

    #[test]
    fn test_value_range_errors() {
        let found = errors("0x100 <> U+0100\n");
        assert_eq!(found[0].message, "value exceeds the byte range");
        assert_eq!(found[0].token.as_deref(), Some("0x100"));

        let found = errors("U+0041 <> U+0391\n");
        assert_eq!(found[0].message, "code point on a byte side");

        let found = errors("0x41 <> 0x110000\n");
        assert_eq!(found[0].message, "value is not a Unicode scalar value");

        let found = errors("ByteDefault 0x100\n0x41 <> U+0391\n");
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn test_class_errors() {
        let found = errors("ByteClass [a] = (0x41)\nByteClass [a] = (0x42)\n[a] <> U+0391\n");
        assert_eq!(found[0].message, "duplicate class");
        assert_eq!(found[0].line, 2);

        let found = errors("UniClass [u] = (U+0391)\n[u] <> U+0391\n");
        assert_eq!(found[0].message, "UniClass used on a byte side");

        let found = errors(
            "ByteClass [b] = (0x41..0x43)\nUniClass [u] = (U+0391 U+0392)\n[b] <> [u]\n",
        );
        assert!(found[0].message.starts_with("class size mismatch"));

        let found = errors("UniClass [u] = (U+0391)\n0x41 <> [u]\n");
        assert_eq!(
            found[0].message,
            "class in output has no corresponding class in the match"
        );
    }

    #[test]
    fn test_class_rules_compile() {
        let table = load(
            "ByteClass [b] = (0x41..0x42)\nUniClass [u] = (U+0391 U+0392)\n[b] 0x2E <> [u]\n",
        );
        let rules = table.rules().unwrap();
        let pass = &rules.passes[0];
        assert_eq!(pass.classes, vec![vec![0x41, 0x42], vec![0x391, 0x392]]);
        assert_eq!(pass.forward[0].matched, vec![Element::Class(0), Element::Literal(0x2E)]);
        assert_eq!(
            pass.forward[0].output,
            vec![OutputItem::Class { class: 1, source: 0 }]
        );
        assert_eq!(
            pass.reverse[0].output,
            vec![OutputItem::Class { class: 0, source: 0 }, OutputItem::Literal(0x2E)]
        );
    }

    #[test]
    fn test_boundary_placement() {
        let found = errors("0x41 / _ # 0x42 <> U+0391\n");
        assert_eq!(
            found[0].message,
            "boundary is only allowed at the outer edge of a context"
        );
        load("0x41 / # _ <> U+0391\n0x41 / _ # <> U+0392\n0x41 <> U+0393\n");
    }

    #[test]
    fn test_conflicting_rules() {
        let found = errors("0x41 <> U+0391\n0x42 <> U+0392\n0x41 <> U+0393\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 3);
        assert_eq!(found[0].message, "rule conflicts with the rule on line 1");

        // A class covering the later literal shadows it too
        let found = errors("ByteClass [b] = (0x41..0x43)\nUniClass [u] = (U+0391..U+0393)\n[b] <> [u]\n0x42 > U+0392\n");
        assert_eq!(found[0].line, 4);

        // Context-free rule first hides the narrower one
        let found = errors("0x41 > U+0391\n0x41 / 0x20 _ > U+0386\n");
        assert_eq!(found[0].line, 2);
        load("0x41 / 0x20 _ > U+0386\n0x41 > U+0391\n");
        load("0x41 > U+0391\n0x41 < U+0386\n");
    }

    #[test]
    fn test_rules_sorted_longest_first() {
        let table = load("0x41 <> U+0391\n0x41 0x42 <> U+0392\n");
        let rules = table.rules().unwrap();
        let lens: Vec<usize> = rules.passes[0]
            .forward
            .iter()
            .map(|r| r.matched.len())
            .collect();
        assert_eq!(lens, vec![2, 1]);
    }

    #[test]
    fn test_passes() {
        let table = load(
            "Pass(Byte)\n0x41 0x42 > 0x42 0x41\nPass(Byte_Unicode)\n0x41 <> U+0391\nPass(NFC)\n",
        );
        let rules = table.rules().unwrap();
        let kinds: Vec<PassKind> = rules.passes.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PassKind::Byte, PassKind::ByteUnicode, PassKind::Nfc]);

        let found = errors("Pass(Unicode)\nU+0041 <> U+0061\nPass(Byte)\n0x41 <> 0x42\n");
        assert_eq!(found[0].line, 3);

        let found = errors("Pass(NFD)\nU+0041 <> U+0061\n");
        assert_eq!(found[0].message, "rules are not allowed in a normalization pass");
    }

    #[test]
    fn test_defaults_and_pass_through() {
        let table = load("ByteDefault '?'\nUniDefault U+FFFD\nPassThrough 0x20..0x7E\n0x80 <> U+20AC\n");
        let rules = table.rules().unwrap();
        assert_eq!(rules.passes[0].pass_through, vec![(0x20, 0x7E)]);
        assert_eq!(rules.passes[0].lhs_default, 0x3F);

        let found = errors("PassThrough 0x7E..0x20\n0x41 <> U+0391\n");
        assert_eq!(found[0].message, "range is reversed");
    }

    #[test]
    fn test_warnings() {
        let found = warnings("RHSName \"A\"\nRHSName \"B\"\nByteClass [x] = (0x41)\n0x41 <> U+0391\n");
        let messages: Vec<&str> = found.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["duplicate header, last value wins", "unused class"]);

        let found = warnings("Pass(Unicode)\nUniDefault U+0020\nU+0041 <> U+0061\n");
        assert_eq!(found[0].message, "default ignored in non-mapping pass");

        let found = warnings("Pass(Byte_Unicode)\nPass(Unicode)\nU+0041 <> U+0061\n");
        assert_eq!(found[0].message, "pass has no rules");
        assert_eq!(found[0].line, 1);
    }

    #[test]
    fn test_deterministic_and_compressed() {
        let source = "LHSName \"x\"\nPassThrough 0x00..0x7F\n0x41 <> U+0391\n0xC1 0x80 <> U+00C0\n";
        let first = compile(source, &CompileOptions::default(), |_| {}).unwrap();
        let second = compile(source, &CompileOptions::default(), |_| {}).unwrap();
        assert_eq!(first, second);

        let options = CompileOptions {
            compress: true,
            ..CompileOptions::default()
        };
        let packed = compile(source, &options, |_| {}).unwrap();
        let packed = MappingTable::from_bytes(packed).unwrap();
        assert!(packed.is_compressed());
        let plain = MappingTable::from_bytes(first).unwrap();
        assert_eq!(packed.rules().unwrap(), plain.rules().unwrap());
    }

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            message: "unknown class".to_string(),
            token: Some("[x]".to_string()),
            line: 7,
        };
        assert_eq!(diagnostic.to_string(), "line 7: error: unknown class [x]");
    }
}
