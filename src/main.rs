//! # encmap CLI - Mapping Compiler and Converter
//!
//! Command-line front end for compiling mapping rules into tables and
//! streaming text through them.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use encmap::table::MAGIC;
use encmap::{
    BaseForm, CompileOptions, Converter, Diagnostic, EncodingForm, MappingTable, Severity, Status,
    compile, compiler_version, engine_version,
};

/// encmap: compile mapping rules and convert text with them
#[derive(Parser)]
#[command(name = "encmap")]
#[command(version, about, long_about = None)]
#[command(author = "encmap Contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule source file into a mapping table
    Compile(CompileArgs),

    /// Convert text through a mapping table
    Convert(ConvertArgs),

    /// Show the metadata stored in a mapping table
    Info(InfoArgs),

    /// List the supported encoding forms
    Forms,
}

#[derive(Args)]
struct CompileArgs {
    /// Rule source file
    rules: PathBuf,

    /// Table file to write (defaults to the rules path with an .emap extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Store the rule data zlib-compressed
    #[arg(long)]
    compress: bool,

    /// zlib level used with --compress
    #[arg(long, default_value = "6")]
    level: u32,
}

#[derive(Args)]
struct ConvertArgs {
    /// Mapping table, or a rule source file to compile on the fly
    #[arg(short, long)]
    mapping: PathBuf,

    /// Map from the right-hand side to the left-hand side
    #[arg(short, long)]
    reverse: bool,

    /// Source encoding form, e.g. bytes, utf8, utf16le
    #[arg(short = 'f', long = "from", default_value = "unspecified")]
    from: EncodingForm,

    /// Target encoding form, e.g. utf8+nfc
    #[arg(short = 't', long = "to", default_value = "unspecified")]
    to: EncodingForm,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Bytes read per conversion call
    #[arg(long, default_value = "65536")]
    chunk_size: usize,

    /// Size of the output buffer handed to the converter
    #[arg(long, default_value = "65536")]
    buffer_size: usize,

    /// Strip BOM from input
    #[arg(long)]
    strip_bom: bool,

    /// Add BOM to output
    #[arg(long)]
    add_bom: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Mapping table to describe
    table: PathBuf,
}

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct CompileResult {
    success: bool,
    output: Option<String>,
    bytes_written: usize,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct ConversionResult {
    success: bool,
    source_form: String,
    target_form: String,
    bytes_read: usize,
    bytes_written: usize,
    calls: usize,
    processing_time_ms: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Compile(ref args) => compile_command(args, &cli)?,
        Commands::Convert(ref args) => convert_command(args, &cli)?,
        Commands::Info(ref args) => info_command(args, &cli)?,
        Commands::Forms => forms_command(&cli)?,
    }

    Ok(())
}

/// Compile rule source, printing diagnostics as `file:line: ...`
fn compile_source(
    path: &Path,
    options: &CompileOptions,
    print: bool,
) -> (encmap::Result<Vec<u8>>, Vec<Diagnostic>) {
    let source = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            let diagnostic = Diagnostic {
                severity: Severity::Fatal,
                message: format!("cannot read rule source: {}", e),
                token: None,
                line: 0,
            };
            if print {
                eprintln!("{}: {}", path.display(), diagnostic.message);
            }
            return (
                Err(encmap::Error::CompilationFailed { errors: 1 }),
                vec![diagnostic],
            );
        }
    };
    let mut diagnostics = Vec::new();
    let result = compile(&source, options, |d| {
        if print {
            let token = d.token.as_deref().map(|t| format!(" [{}]", t));
            eprintln!(
                "{}:{}: {}: {}{}",
                path.display(),
                d.line,
                d.severity,
                d.message,
                token.unwrap_or_default()
            );
        }
        diagnostics.push(d.clone());
    });
    (result, diagnostics)
}

fn compile_command(args: &CompileArgs, cli: &Cli) -> Result<()> {
    let options = CompileOptions {
        compress: args.compress,
        compression_level: args.level,
    };
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.rules.with_extension("emap"));

    if cli.verbose {
        eprintln!(
            "Compiling {} with compiler {}",
            args.rules.display(),
            compiler_version()
        );
    }

    let print = matches!(cli.format, OutputFormat::Text);
    let (result, diagnostics) = compile_source(&args.rules, &options, print);
    let written = match &result {
        Ok(blob) => {
            fs::write(&output_path, blob).with_context(|| {
                format!("Failed to write table file: {}", output_path.display())
            })?;
            blob.len()
        }
        Err(_) => 0,
    };

    match cli.format {
        OutputFormat::Json => {
            let report = CompileResult {
                success: result.is_ok(),
                output: result
                    .is_ok()
                    .then(|| output_path.display().to_string()),
                bytes_written: written,
                diagnostics,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if result.is_ok() && cli.verbose {
                eprintln!("Wrote {} bytes to {}", written, output_path.display());
            }
        }
    }

    result
        .map(|_| ())
        .with_context(|| format!("Failed to compile {}", args.rules.display()))
}

/// Load a table file, compiling it first when it holds rule source
fn load_table(path: &Path, cli: &Cli) -> Result<Arc<MappingTable>> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read mapping: {}", path.display()))?;
    let blob = if bytes.starts_with(&MAGIC) {
        bytes
    } else {
        if cli.verbose {
            eprintln!("Compiling rule source {}", path.display());
        }
        let (result, _) = compile_source(path, &CompileOptions::default(), true);
        result.with_context(|| format!("Failed to compile {}", path.display()))?
    };
    let table = MappingTable::from_bytes(blob)
        .with_context(|| format!("Invalid mapping table: {}", path.display()))?;
    Ok(Arc::new(table))
}

/// Pull up to `len` bytes, stopping early only at end of input
fn read_head(reader: &mut dyn Read, len: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(len);
    reader.take(len as u64).read_to_end(&mut head)?;
    Ok(head)
}

struct Pump<'a> {
    converter: Converter,
    output: Vec<u8>,
    writer: Box<dyn Write + 'a>,
    bytes_read: usize,
    bytes_written: usize,
    calls: usize,
}

impl Pump<'_> {
    /// Feed one chunk, draining the output buffer as often as needed
    fn feed(&mut self, mut input: &[u8], complete: bool) -> Result<()> {
        loop {
            let progress = self
                .converter
                .convert_buffer(input, &mut self.output, complete)
                .with_context(|| {
                    format!("Conversion failed after {} input bytes", self.bytes_read)
                })?;
            self.calls += 1;
            self.writer
                .write_all(&self.output[..progress.output_used])
                .context("Failed to write output")?;
            self.bytes_read += progress.input_read;
            self.bytes_written += progress.output_used;
            input = &input[progress.input_read..];
            if progress.status != Status::OutputBufferFull {
                return Ok(());
            }
        }
    }
}

fn convert_command(args: &ConvertArgs, cli: &Cli) -> Result<()> {
    let start_time = std::time::Instant::now();

    let table = load_table(&args.mapping, cli)?;
    let converter = Converter::new(table, !args.reverse, args.from, args.to).with_context(|| {
        format!(
            "Failed to create converter from {} to {}",
            args.from, args.to
        )
    })?;
    let source_form = converter.source_form();
    let target_form = converter.target_form();

    if cli.verbose {
        eprintln!(
            "Converting {} from {} to {}",
            if args.reverse { "in reverse" } else { "forward" },
            source_form,
            target_form
        );
    }

    let mut reader: Box<dyn Read> = match args.input {
        Some(ref input_path) => Box::new(fs::File::open(input_path).with_context(|| {
            format!("Failed to open input file: {}", input_path.display())
        })?),
        None => Box::new(io::stdin().lock()),
    };
    let writer: Box<dyn Write> = match args.output {
        Some(ref output_path) => Box::new(io::BufWriter::new(
            fs::File::create(output_path).with_context(|| {
                format!("Failed to create output file: {}", output_path.display())
            })?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let mut pump = Pump {
        converter,
        output: vec![0u8; args.buffer_size.max(1)],
        writer,
        bytes_read: 0,
        bytes_written: 0,
        calls: 0,
    };

    if args.add_bom
        && let Some(bom) = target_form.base.bom()
    {
        pump.writer.write_all(bom).context("Failed to write BOM")?;
        pump.bytes_written += bom.len();
    }

    if args.strip_bom
        && let Some(bom) = source_form.base.bom()
    {
        let head = read_head(&mut reader, bom.len()).context("Failed to read input")?;
        if head == bom {
            pump.bytes_read += bom.len();
            if cli.verbose {
                eprintln!("Stripped BOM ({} bytes)", bom.len());
            }
        } else {
            pump.feed(&head, false)?;
        }
    }

    let mut chunk = vec![0u8; args.chunk_size.max(1)];
    loop {
        let n = reader.read(&mut chunk).context("Failed to read input")?;
        if n == 0 {
            break;
        }
        pump.feed(&chunk[..n], false)?;
    }
    pump.feed(&[], true)?;
    pump.writer.flush().context("Failed to flush output")?;

    let processing_time = start_time.elapsed();

    if cli.verbose {
        eprintln!(
            "Processed {} bytes -> {} bytes in {} call(s), {:?}",
            pump.bytes_read, pump.bytes_written, pump.calls, processing_time
        );
    }

    if let OutputFormat::Json = cli.format {
        let result = ConversionResult {
            success: true,
            source_form: source_form.to_string(),
            target_form: target_form.to_string(),
            bytes_read: pump.bytes_read,
            bytes_written: pump.bytes_written,
            calls: pump.calls,
            processing_time_ms: processing_time.as_millis() as u64,
        };
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

fn info_command(args: &InfoArgs, cli: &Cli) -> Result<()> {
    let bytes = fs::read(&args.table)
        .with_context(|| format!("Failed to read table file: {}", args.table.display()))?;
    let table = MappingTable::from_bytes(bytes)
        .with_context(|| format!("Invalid mapping table: {}", args.table.display()))?;
    let info = table.info();

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            println!("Mapping Table: {}", args.table.display());
            println!(
                "Format version: {} (engine reads {})",
                info.format_version,
                engine_version()
            );
            println!("Compiler version: {}", info.compiler_version);
            println!("Size: {} bytes", info.size);
            println!(
                "Compressed: {}",
                if info.compressed { "Yes" } else { "No" }
            );
            println!("LHS flags: {}", info.lhs_flags);
            println!("RHS flags: {}", info.rhs_flags);

            if !info.names.is_empty() {
                println!("\nNames:");
                for record in &info.names {
                    println!("  {:24} {}", record.id.to_string(), record.value);
                }
            }
        }
    }

    Ok(())
}

fn forms_command(cli: &Cli) -> Result<()> {
    let forms: Vec<_> = BaseForm::ALL
        .iter()
        .filter(|form| **form != BaseForm::Unspecified)
        .collect();

    match cli.format {
        OutputFormat::Json => {
            let forms_info: Vec<_> = forms
                .iter()
                .map(|form| {
                    serde_json::json!({
                        "name": form.name(),
                        "code": form.code(),
                        "unicode": form.is_unicode(),
                        "code_unit_bytes": form.code_unit_size(),
                        "has_bom": form.bom().is_some()
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&forms_info)?);
        }
        OutputFormat::Text => {
            println!("Supported Encoding Forms ({} total):", forms.len());
            println!();

            for form in forms {
                print!(
                    "{:10} {:10} unit: {}",
                    form.name(),
                    if form.is_unicode() { "[unicode]" } else { "[bytes]" },
                    form.code_unit_size()
                );
                match form.bom() {
                    Some(bom) => println!(" BOM: {:02X?}", bom),
                    None => println!(),
                }
            }
            println!();
            println!("Append +nfc, +nfd or +visual to a form to request those properties.");
        }
    }

    Ok(())
}
