use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dossier_export::{merge_sections, parse_export_block, ExportSections, MergeReport};
use dossier_model::Workbook;
use dossier_xlsx::{PackageLimits, XlsxWorkbook};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "dossier-merge",
    version,
    about = "Merge an [EXCEL_EXPORT] block into a patient record workbook."
)]
pub struct Args {
    /// Patient record workbook (.xlsx or .xlsm).
    #[arg(long, value_name = "PATH")]
    pub workbook: PathBuf,

    /// Text containing the export block, or `-` to read stdin.
    #[arg(long, value_name = "PATH")]
    pub export: PathBuf,

    /// Updated workbook destination (default: `<stem>.updated.<ext>` next to the input).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Report format printed to stdout.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,

    /// Print the parsed sections as JSON and exit without opening the workbook.
    #[arg(long)]
    pub dump_sections: bool,

    /// Log merge decisions to stderr (`RUST_LOG` takes precedence).
    #[arg(short, long)]
    pub verbose: bool,

    /// Largest uncompressed ZIP part accepted when loading the workbook.
    #[arg(long, value_name = "BYTES", default_value_t = PackageLimits::DEFAULT_MAX_PART_BYTES)]
    pub max_part_bytes: u64,

    /// Largest total uncompressed size accepted when loading the workbook.
    #[arg(long, value_name = "BYTES", default_value_t = PackageLimits::DEFAULT_MAX_TOTAL_BYTES)]
    pub max_total_bytes: u64,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    workbook: String,
    output: String,
    #[serde(flatten)]
    report: &'a MergeReport,
}

pub fn run() -> Result<()> {
    run_with_args(Args::parse())
}

pub fn run_with_args(args: Args) -> Result<()> {
    init_logging(args.verbose);

    let text = read_export(&args.export)?;
    let sections = parse_export_block(&text);
    if args.dump_sections {
        return ignore_broken_pipe(print_sections(&sections));
    }

    let limits = PackageLimits {
        max_part_bytes: args.max_part_bytes,
        max_total_bytes: args.max_total_bytes,
    };
    let mut workbook = load_workbook(&args.workbook, limits)
        .with_context(|| format!("failed to read workbook {}", args.workbook.display()))?;

    let report = merge_sections(&mut workbook, &sections)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.workbook));
    let bytes = workbook
        .save_to_vec()
        .context("failed to serialize workbook")?;
    write_atomically(&output, &bytes)
        .with_context(|| format!("failed to write workbook {}", output.display()))?;

    ignore_broken_pipe(print_report(&args, &output, &report))
}

/// A closed stdout (`| head`) is not a failure once the work is done.
fn ignore_broken_pipe(result: io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when running in-process from tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn read_export(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read export block from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path)
        .with_context(|| format!("failed to read export block {}", path.display()))
}

fn load_workbook(path: &Path, limits: PackageLimits) -> Result<XlsxWorkbook> {
    let bytes = fs::read(path)?;
    Ok(XlsxWorkbook::from_bytes_with_limits(&bytes, limits)?)
}

/// `patient.xlsx` -> `patient.updated.xlsx` in the same directory.
pub fn default_output_path(workbook: &Path) -> PathBuf {
    let stem = workbook
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let ext = workbook
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());
    workbook.with_file_name(format!("{stem}.updated.{ext}"))
}

/// Write to a temp file in the destination directory, then rename it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn print_sections(sections: &ExportSections) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, sections)?;
    writeln!(stdout)?;
    stdout.flush()
}

fn print_report(args: &Args, output: &Path, report: &MergeReport) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    match args.report {
        ReportFormat::Json => {
            let json = JsonReport {
                workbook: args.workbook.display().to_string(),
                output: output.display().to_string(),
                report,
            };
            serde_json::to_writer_pretty(&mut stdout, &json)?;
            writeln!(stdout)?;
        }
        ReportFormat::Text => {
            writeln!(stdout, "Merged export block into {}", args.workbook.display())?;
            writeln!(stdout, "  output: {}", output.display())?;
            if report.is_noop() {
                writeln!(stdout, "  no changes")?;
            }
            for appended in &report.appended {
                writeln!(
                    stdout,
                    "  {}: +{} row(s), {} column(s)",
                    appended.sheet, appended.rows, appended.width
                )?;
            }
            for cell in &report.cells {
                writeln!(
                    stdout,
                    "  {}!{} <- [{}] {:?}",
                    cell.sheet, cell.cell, cell.section, cell.value
                )?;
            }
            if !report.ignored_sections.is_empty() {
                writeln!(
                    stdout,
                    "  ignored sections: {}",
                    report.ignored_sections.join(", ")
                )?;
            }
        }
    }
    stdout.flush()
}
