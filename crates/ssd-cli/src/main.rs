// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use serde::Serialize;
use ssd_calibrate::{Calibration, CalibrationConfig, calibrate};
use ssd_cli::{SegmentOptions, SegmentReport, SeriesInput, analyze, analyze_batch, line_positions};
use ssd_core::{ExecutionContext, SeriesView, SsdError};
use ssd_preprocess::{SmoothWindow, SmoothingRecommendation, recommend_smoothing};
use ssd_segment::IntervalMode;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

struct Cli {
    command: Command,
}

enum Command {
    Segment(SegmentArgs),
    Calibrate(CalibrateArgs),
    Batch(BatchArgs),
}

#[derive(Clone, Debug, PartialEq)]
enum ColumnArg {
    Index(usize),
    Name(String),
}

impl ColumnArg {
    fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(raw.to_string()),
        }
    }
}

impl fmt::Display for ColumnArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct ColumnSelection {
    column: ColumnArg,
    abs: bool,
    line_column: Option<ColumnArg>,
}

impl Default for ColumnSelection {
    fn default() -> Self {
        Self {
            column: ColumnArg::Index(0),
            abs: false,
            line_column: None,
        }
    }
}

#[derive(Debug, Default)]
struct SegmentArgs {
    input: PathBuf,
    columns: ColumnSelection,
    options: SegmentOptions,
    output: Option<PathBuf>,
}

#[derive(Debug)]
struct CalibrateArgs {
    input: PathBuf,
    columns: ColumnSelection,
    sensitivity: f64,
    output: Option<PathBuf>,
}

impl Default for CalibrateArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            columns: ColumnSelection::default(),
            sensitivity: CalibrationConfig::default().sensitivity,
            output: None,
        }
    }
}

#[derive(Debug, Default)]
struct BatchArgs {
    inputs: Vec<PathBuf>,
    columns: ColumnSelection,
    options: SegmentOptions,
    output: Option<PathBuf>,
}

#[derive(Debug)]
enum CliError {
    Ssd(SsdError),
    Io {
        context: String,
        source: std::io::Error,
    },
    Json {
        context: String,
        source: serde_json::Error,
    },
    InvalidInput(String),
}

impl CliError {
    fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Ssd(err) => err.code(),
            Self::InvalidInput(_) => "invalid_input",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssd(err) => write!(f, "{err}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Json { context, source } => write!(f, "{context}: {source}"),
            Self::InvalidInput(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ssd(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::InvalidInput(_) => None,
        }
    }
}

impl From<SsdError> for CliError {
    fn from(value: SsdError) -> Self {
        Self::Ssd(value)
    }
}

#[derive(Clone, Debug)]
struct LoadedSeries {
    path: PathBuf,
    columns: ColumnSelection,
    series: SeriesInput,
}

impl LoadedSeries {
    fn summary(&self) -> InputSummary {
        InputSummary {
            path: self.path.display().to_string(),
            n: self.series.values.len(),
            column: self.columns.column.to_string(),
            abs: self.columns.abs,
            line_column: self.columns.line_column.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Serialize)]
struct InputSummary {
    path: String,
    n: usize,
    column: String,
    abs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_column: Option<String>,
}

#[derive(Serialize)]
struct SegmentOutput {
    command: &'static str,
    input: InputSummary,
    mode: &'static str,
    report: SegmentReport,
}

#[derive(Serialize)]
struct CalibrateOutput {
    command: &'static str,
    input: InputSummary,
    calibration: Calibration,
    smoothing: SmoothingRecommendation,
}

#[derive(Serialize)]
struct BatchOutput {
    command: &'static str,
    mode: &'static str,
    succeeded: usize,
    failed: usize,
    items: Vec<BatchItem>,
}

#[derive(Serialize)]
struct BatchItem {
    input: InputSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<SegmentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        emit_structured_error(&err);
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn run() -> Result<(), CliError> {
    let Some(cli) = parse_cli_from_env()? else {
        return Ok(());
    };

    match cli.command {
        Command::Segment(args) => handle_segment(args),
        Command::Calibrate(args) => handle_calibrate(args),
        Command::Batch(args) => handle_batch(args),
    }
}

fn parse_cli_from_env() -> Result<Option<Cli>, CliError> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help") {
        print_root_help();
        return Ok(None);
    }
    if matches!(args[0].as_str(), "-V" | "--version") {
        print_version();
        return Ok(None);
    }

    let command_name = args[0].as_str();
    let rest = &args[1..];

    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_command_help(command_name)?;
        return Ok(None);
    }

    let command = match command_name {
        "segment" => Command::Segment(parse_segment_args(rest)?),
        "calibrate" => Command::Calibrate(parse_calibrate_args(rest)?),
        "batch" => Command::Batch(parse_batch_args(rest)?),
        _ => {
            return Err(CliError::invalid_input(format!(
                "unknown command '{command_name}'; expected one of: segment, calibrate, batch"
            )));
        }
    };

    Ok(Some(Cli { command }))
}

/// Applies an input-selection flag. Returns `false` when `flag` is not one.
fn apply_input_flag(
    columns: &mut ColumnSelection,
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<bool, CliError> {
    match flag {
        "--column" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            columns.column = ColumnArg::parse(raw.as_str());
        }
        "--line-column" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            columns.line_column = Some(ColumnArg::parse(raw.as_str()));
        }
        "--abs" => {
            ensure_no_inline_value(flag, inline_value)?;
            columns.abs = true;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// Applies a segmentation flag. Returns `false` when `flag` is not one.
fn apply_segment_flag(
    options: &mut SegmentOptions,
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<bool, CliError> {
    match flag {
        "--sensitivity" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config = options
                .config
                .with_sensitivity(parse_f64_arg(raw.as_str(), flag)?);
        }
        "--mode" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config.mode = raw.parse::<IntervalMode>()?;
        }
        "--target-coverage" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config.coverage.target_coverage = parse_f64_arg(raw.as_str(), flag)?;
        }
        "--max-merge-gap-ratio" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config.coverage.max_merge_gap_ratio = parse_f64_arg(raw.as_str(), flag)?;
        }
        "--aggressive-merge-gap-ratio" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config.coverage.aggressive_merge_gap_ratio =
                parse_f64_arg(raw.as_str(), flag)?;
        }
        "--expand-ratio" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.config.coverage.expand_ratio_for_coverage =
                parse_f64_arg(raw.as_str(), flag)?;
        }
        "--smooth" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.smooth = parse_smooth_arg(raw.as_str())?;
        }
        "--retry" => {
            ensure_no_inline_value(flag, inline_value)?;
            options.retry = true;
        }
        "--adjustment-ratio" => {
            let raw = take_flag_value(flag, inline_value, tokens, idx)?;
            options.adjustment_ratio = parse_f64_arg(raw.as_str(), flag)?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn parse_segment_args(tokens: &[String]) -> Result<SegmentArgs, CliError> {
    let mut args = SegmentArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.input = PathBuf::from(raw);
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                let handled =
                    apply_input_flag(&mut args.columns, other, inline_value.clone(), tokens, &mut idx)?
                        || apply_segment_flag(
                            &mut args.options,
                            other,
                            inline_value,
                            tokens,
                            &mut idx,
                        )?;
                if !handled {
                    return Err(CliError::invalid_input(format!(
                        "unknown segment option '{other}'"
                    )));
                }
            }
        }
        idx += 1;
    }

    if args.input.as_os_str().is_empty() {
        return Err(CliError::invalid_input("segment requires --input <path>"));
    }

    Ok(args)
}

fn parse_calibrate_args(tokens: &[String]) -> Result<CalibrateArgs, CliError> {
    let mut args = CalibrateArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.input = PathBuf::from(raw);
            }
            "--sensitivity" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.sensitivity = parse_f64_arg(raw.as_str(), flag)?;
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                if !apply_input_flag(&mut args.columns, other, inline_value, tokens, &mut idx)? {
                    return Err(CliError::invalid_input(format!(
                        "unknown calibrate option '{other}'"
                    )));
                }
            }
        }
        idx += 1;
    }

    if args.input.as_os_str().is_empty() {
        return Err(CliError::invalid_input("calibrate requires --input <path>"));
    }

    Ok(args)
}

fn parse_batch_args(tokens: &[String]) -> Result<BatchArgs, CliError> {
    let mut args = BatchArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.inputs.push(PathBuf::from(raw));
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                let handled =
                    apply_input_flag(&mut args.columns, other, inline_value.clone(), tokens, &mut idx)?
                        || apply_segment_flag(
                            &mut args.options,
                            other,
                            inline_value,
                            tokens,
                            &mut idx,
                        )?;
                if !handled {
                    return Err(CliError::invalid_input(format!(
                        "unknown batch option '{other}'"
                    )));
                }
            }
        }
        idx += 1;
    }

    if args.inputs.is_empty() {
        return Err(CliError::invalid_input(
            "batch requires at least one --input <path>",
        ));
    }

    Ok(args)
}

fn split_flag(token: &str) -> Result<(&str, Option<String>), CliError> {
    if !token.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "unexpected positional argument '{token}'; expected --flag value"
        )));
    }
    if let Some((flag, value)) = token.split_once('=') {
        return Ok((flag, Some(value.to_string())));
    }
    Ok((token, None))
}

fn take_flag_value(
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<String, CliError> {
    if let Some(value) = inline_value {
        return Ok(value);
    }

    *idx += 1;
    let value = tokens
        .get(*idx)
        .ok_or_else(|| CliError::invalid_input(format!("{flag} requires a value")))?;
    if value.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "{flag} requires a value, but got option '{value}'"
        )));
    }
    Ok(value.clone())
}

fn ensure_no_inline_value(flag: &str, inline_value: Option<String>) -> Result<(), CliError> {
    if inline_value.is_some() {
        return Err(CliError::invalid_input(format!(
            "{flag} does not accept a value"
        )));
    }
    Ok(())
}

fn parse_f64_arg(raw: &str, flag: &str) -> Result<f64, CliError> {
    raw.parse::<f64>()
        .map_err(|_| CliError::invalid_input(format!("{flag} expects a number, got '{raw}'")))
}

fn parse_smooth_arg(raw: &str) -> Result<Option<SmoothWindow>, CliError> {
    match raw.to_ascii_lowercase().as_str() {
        "none" | "off" => Ok(None),
        "auto" => Ok(Some(SmoothWindow::Auto)),
        other => match other.parse::<usize>() {
            Ok(window) if window >= 1 => Ok(Some(SmoothWindow::Fixed(window))),
            _ => Err(CliError::invalid_input(format!(
                "invalid --smooth '{raw}'; expected none, auto or a window >= 1"
            ))),
        },
    }
}

fn print_version() {
    println!("ssd {}", env!("CARGO_PKG_VERSION"));
}

fn print_root_help() {
    println!(
        "ssd {}\n\nUSAGE:\n  ssd <COMMAND> [OPTIONS]\n\nCOMMANDS:\n  segment     Find steady-state intervals in one load series\n  calibrate   Show the thresholds calibrated for a series\n  batch       Segment several series files\n\nGLOBAL OPTIONS:\n  -h, --help      Show help\n  -V, --version   Show version\n\nRun 'ssd <COMMAND> --help' for subcommand options.\nSet RUST_LOG (default: warn) to control log output on stderr.",
        env!("CARGO_PKG_VERSION")
    );
}

const INPUT_OPTIONS_HELP: &str = "  --column <index|name>                    Load column (default: 0)\n  --abs                                    Use absolute load values\n  --line-column <index|name>               Program line number column; adds positions";

const SEGMENT_OPTIONS_HELP: &str = "  --sensitivity <float>                    Default: 1.0\n  --mode <all_small|large_coverage>        Default: large_coverage\n  --target-coverage <float>                Default: 0.90\n  --max-merge-gap-ratio <float>            Default: 0.02\n  --aggressive-merge-gap-ratio <float>     Default: 0.10\n  --expand-ratio <float>                   Default: 1.0\n  --smooth <none|auto|window>              Default: none\n  --retry                                  Retry once at lower sensitivity when nothing is found\n  --adjustment-ratio <float>               Ideal value ratio (default: 1.2)\n  --output <path>                          Write JSON output to file";

fn print_command_help(command: &str) -> Result<(), CliError> {
    match command {
        "segment" => {
            println!(
                "USAGE:\n  ssd segment --input <csv> [OPTIONS]\n\nOPTIONS:\n{INPUT_OPTIONS_HELP}\n{SEGMENT_OPTIONS_HELP}"
            );
            Ok(())
        }
        "calibrate" => {
            println!(
                "USAGE:\n  ssd calibrate --input <csv> [OPTIONS]\n\nOPTIONS:\n{INPUT_OPTIONS_HELP}\n  --sensitivity <float>                    Default: 1.0\n  --output <path>                          Write JSON output to file"
            );
            Ok(())
        }
        "batch" => {
            println!(
                "USAGE:\n  ssd batch --input <csv> [--input <csv> ...] [OPTIONS]\n\nOPTIONS:\n{INPUT_OPTIONS_HELP}\n{SEGMENT_OPTIONS_HELP}"
            );
            Ok(())
        }
        _ => Err(CliError::invalid_input(format!(
            "unknown command '{command}'; expected one of: segment, calibrate, batch"
        ))),
    }
}

fn handle_segment(args: SegmentArgs) -> Result<(), CliError> {
    let loaded = load_series(args.input.as_path(), &args.columns)?;
    let report = analyze(&loaded.series, &args.options, &ExecutionContext::new())?;
    tracing::info!(
        path = %loaded.path.display(),
        intervals = report.intervals.len(),
        coverage = report.coverage,
        "segmented series"
    );

    write_json_output(
        &SegmentOutput {
            command: "segment",
            input: loaded.summary(),
            mode: args.options.config.mode.as_str(),
            report,
        },
        args.output.as_deref(),
    )
}

fn handle_calibrate(args: CalibrateArgs) -> Result<(), CliError> {
    let loaded = load_series(args.input.as_path(), &args.columns)?;
    let config = CalibrationConfig::new(args.sensitivity)?;
    let view = SeriesView::new(&loaded.series.values)?;
    let calibration = calibrate(&view, &config)?;

    write_json_output(
        &CalibrateOutput {
            command: "calibrate",
            input: loaded.summary(),
            calibration,
            smoothing: recommend_smoothing(&loaded.series.values),
        },
        args.output.as_deref(),
    )
}

fn handle_batch(args: BatchArgs) -> Result<(), CliError> {
    let loaded = args
        .inputs
        .iter()
        .map(|path| load_series(path.as_path(), &args.columns))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs = loaded
        .iter()
        .map(|item| item.series.clone())
        .collect::<Vec<_>>();

    let results = analyze_batch(&inputs, &args.options, &ExecutionContext::new())?;
    let items = loaded
        .iter()
        .zip(results)
        .map(|(item, result)| match result {
            Ok(report) => BatchItem {
                input: item.summary(),
                report: Some(report),
                error: None,
            },
            Err(err) => {
                tracing::warn!(path = %item.path.display(), error = %err, "series failed");
                BatchItem {
                    input: item.summary(),
                    report: None,
                    error: Some(ErrorPayload {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                }
            }
        })
        .collect::<Vec<_>>();
    let failed = items.iter().filter(|item| item.error.is_some()).count();

    write_json_output(
        &BatchOutput {
            command: "batch",
            mode: args.options.config.mode.as_str(),
            succeeded: items.len() - failed,
            failed,
            items,
        },
        args.output.as_deref(),
    )
}

fn load_series(path: &Path, columns: &ColumnSelection) -> Result<LoadedSeries, CliError> {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase());
    if extension.as_deref() != Some("csv") {
        return Err(CliError::Ssd(SsdError::not_supported(format!(
            "unsupported input '{}'; expected a .csv file",
            path.display()
        ))));
    }

    let raw = fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))?;
    let series = parse_csv_series(raw.as_str(), columns)?;
    tracing::debug!(path = %path.display(), n = series.values.len(), "loaded series");
    Ok(LoadedSeries {
        path: path.to_path_buf(),
        columns: columns.clone(),
        series,
    })
}

fn parse_csv_series(raw: &str, columns: &ColumnSelection) -> Result<SeriesInput, CliError> {
    let rows = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(',').map(str::trim).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let Some(first) = rows.first() else {
        return Err(CliError::invalid_input("CSV input is empty"));
    };

    let header = first_row_looks_like_header(first).then_some(first);
    let data_start = usize::from(header.is_some());
    let data = &rows[data_start..];
    if data.is_empty() {
        return Err(CliError::invalid_input("CSV input has no data rows"));
    }

    let width = first.len();
    let value_col = resolve_column(&columns.column, header.map(Vec::as_slice), width)?;
    let line_col = columns
        .line_column
        .as_ref()
        .map(|column| resolve_column(column, header.map(Vec::as_slice), width))
        .transpose()?;

    let mut values = Vec::with_capacity(data.len());
    let mut line_numbers = Vec::with_capacity(if line_col.is_some() { data.len() } else { 0 });
    for (offset, cells) in data.iter().enumerate() {
        let row = data_start + offset + 1;
        if cells.len() != width {
            return Err(CliError::invalid_input(format!(
                "CSV row {row} has {} columns but expected {width}",
                cells.len()
            )));
        }

        let value = parse_cell_f64(cells[value_col], row, value_col)?;
        values.push(if columns.abs { value.abs() } else { value });

        if let Some(col) = line_col {
            line_numbers.push(parse_line_number(cells[col], row, col)?);
        }
    }

    Ok(SeriesInput {
        values,
        positions: line_col.map(|_| line_positions(&line_numbers)),
    })
}

fn first_row_looks_like_header(first_row: &[&str]) -> bool {
    !first_row.is_empty() && first_row.iter().all(|cell| cell.parse::<f64>().is_err())
}

fn resolve_column(
    column: &ColumnArg,
    header: Option<&[&str]>,
    width: usize,
) -> Result<usize, CliError> {
    match column {
        ColumnArg::Index(index) if *index < width => Ok(*index),
        ColumnArg::Index(index) => Err(CliError::invalid_input(format!(
            "column {index} is out of range; CSV has {width} columns"
        ))),
        ColumnArg::Name(name) => {
            let header = header.ok_or_else(|| {
                CliError::invalid_input(format!(
                    "column '{name}' requested by name but the CSV has no header row"
                ))
            })?;
            header
                .iter()
                .position(|cell| cell == name)
                .ok_or_else(|| CliError::invalid_input(format!("CSV header has no column '{name}'")))
        }
    }
}

fn parse_cell_f64(cell: &str, row: usize, col: usize) -> Result<f64, CliError> {
    cell.parse::<f64>().map_err(|_| {
        CliError::invalid_input(format!(
            "CSV row {row} column {} is not a valid float: '{cell}'",
            col + 1
        ))
    })
}

fn parse_line_number(cell: &str, row: usize, col: usize) -> Result<u32, CliError> {
    let value = parse_cell_f64(cell, row, col)?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Err(CliError::invalid_input(format!(
            "CSV row {row} column {} is not a valid line number: '{cell}'",
            col + 1
        )))
    }
}

fn write_json_output<T: Serialize>(
    payload: &T,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))?;

    if let Some(path) = output_path {
        fs::write(path, format!("{encoded}\n"))
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        println!("{encoded}");
        Ok(())
    }
}

fn emit_structured_error(err: &CliError) {
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!(
            "{{\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
            err.code(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CliError, ColumnArg, ColumnSelection, parse_batch_args, parse_calibrate_args, parse_csv_series,
        parse_segment_args, parse_smooth_arg,
    };
    use ssd_core::SsdError;
    use ssd_preprocess::SmoothWindow;
    use ssd_segment::{IntervalMode, ThresholdSource};

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn csv_parser_reads_first_column_without_header() {
        let series = parse_csv_series("1.0,9\n2.0,9\n3.5,9\n", &ColumnSelection::default())
            .expect("csv should parse");
        assert_eq!(series.values, vec![1.0, 2.0, 3.5]);
        assert!(series.positions.is_none());
    }

    #[test]
    fn csv_parser_selects_named_column_and_applies_abs() {
        let columns = ColumnSelection {
            column: ColumnArg::Name("load".to_string()),
            abs: true,
            line_column: None,
        };
        let series = parse_csv_series("line,load\n10,-2.5\n10,3.0\n", &columns)
            .expect("csv with header should parse");
        assert_eq!(series.values, vec![2.5, 3.0]);
    }

    #[test]
    fn csv_parser_builds_line_positions() {
        let columns = ColumnSelection {
            column: ColumnArg::Index(1),
            abs: false,
            line_column: Some(ColumnArg::Index(0)),
        };
        let series = parse_csv_series("line,load\n10,1\n10,2\n11,3\n10,4\n", &columns)
            .expect("csv should parse");
        let positions = series.positions.expect("positions requested");
        let pairs = positions
            .iter()
            .map(|p| (p.line_number, p.point_index))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![(10, 0), (10, 1), (11, 0), (10, 2)]);
    }

    #[test]
    fn csv_parser_reports_bad_cells_with_row_numbers() {
        let err = parse_csv_series("load\n1.0\nabc\n", &ColumnSelection::default())
            .expect_err("non-numeric cell should fail");
        assert!(
            err.to_string().contains("CSV row 3 column 1"),
            "unexpected error message: {err}"
        );

        let columns = ColumnSelection {
            line_column: Some(ColumnArg::Index(1)),
            ..ColumnSelection::default()
        };
        let err = parse_csv_series("1.0,2.5\n", &columns).expect_err("fractional line number");
        assert!(err.to_string().contains("not a valid line number"));
    }

    #[test]
    fn csv_parser_rejects_ragged_rows_and_unknown_columns() {
        let err = parse_csv_series("1,2\n3\n", &ColumnSelection::default()).expect_err("ragged");
        assert!(err.to_string().contains("CSV row 2 has 1 columns"));

        let columns = ColumnSelection {
            column: ColumnArg::Name("load".to_string()),
            ..ColumnSelection::default()
        };
        let err = parse_csv_series("1,2\n", &columns).expect_err("no header");
        assert!(err.to_string().contains("no header row"));

        let columns = ColumnSelection {
            column: ColumnArg::Index(4),
            ..ColumnSelection::default()
        };
        let err = parse_csv_series("1,2\n", &columns).expect_err("out of range");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn segment_args_accept_inline_and_separate_values() {
        let args = parse_segment_args(&tokens(&[
            "--input",
            "load.csv",
            "--sensitivity=1.5",
            "--mode",
            "all_small",
            "--target-coverage",
            "0.8",
            "--smooth=auto",
            "--retry",
            "--abs",
            "--line-column",
            "line",
        ]))
        .expect("args should parse");

        assert_eq!(args.input.to_str(), Some("load.csv"));
        assert_eq!(args.options.config.mode, IntervalMode::AllSmall);
        assert!(matches!(
            args.options.config.thresholds,
            ThresholdSource::Auto(cfg) if cfg.sensitivity == 1.5
        ));
        assert_eq!(args.options.config.coverage.target_coverage, 0.8);
        assert_eq!(args.options.smooth, Some(SmoothWindow::Auto));
        assert!(args.options.retry);
        assert!(args.columns.abs);
        assert_eq!(
            args.columns.line_column,
            Some(ColumnArg::Name("line".to_string()))
        );
    }

    #[test]
    fn segment_args_reject_missing_input_and_unknown_flags() {
        let err = parse_segment_args(&tokens(&["--sensitivity", "1.0"])).err();
        assert!(matches!(err, Some(CliError::InvalidInput(_))));

        let err = parse_segment_args(&tokens(&["--input", "a.csv", "--bogus", "1"]))
            .err()
            .expect("unknown option should fail");
        assert!(err.to_string().contains("unknown segment option '--bogus'"));

        let err = parse_segment_args(&tokens(&["--input", "--retry"]))
            .err()
            .expect("missing value should fail");
        assert!(err.to_string().contains("--input requires a value"));

        let err = parse_segment_args(&tokens(&["--input", "a.csv", "--retry=yes"]))
            .err()
            .expect("flag with inline value should fail");
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn invalid_mode_maps_to_engine_error_code() {
        let err = parse_segment_args(&tokens(&["--input", "a.csv", "--mode", "huge"]))
            .err()
            .expect("invalid mode should fail");
        assert!(matches!(err, CliError::Ssd(SsdError::InvalidInput(_))));
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn smooth_arg_accepts_none_auto_and_window() {
        assert_eq!(parse_smooth_arg("none").expect("none"), None);
        assert_eq!(
            parse_smooth_arg("AUTO").expect("auto"),
            Some(SmoothWindow::Auto)
        );
        assert_eq!(
            parse_smooth_arg("7").expect("window"),
            Some(SmoothWindow::Fixed(7))
        );
        assert!(parse_smooth_arg("0").is_err());
        assert!(parse_smooth_arg("wide").is_err());
    }

    #[test]
    fn batch_args_collect_repeated_inputs() {
        let args = parse_batch_args(&tokens(&[
            "--input", "a.csv", "--input=b.csv", "--column", "2", "--retry",
        ]))
        .expect("batch args should parse");
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.columns.column, ColumnArg::Index(2));
        assert!(args.options.retry);

        assert!(parse_batch_args(&tokens(&["--retry"])).is_err());
    }

    #[test]
    fn calibrate_args_reject_segment_only_flags() {
        let args = parse_calibrate_args(&tokens(&["--input", "a.csv", "--sensitivity", "2"]))
            .expect("calibrate args should parse");
        assert_eq!(args.sensitivity, 2.0);

        let err = parse_calibrate_args(&tokens(&["--input", "a.csv", "--retry"]))
            .err()
            .expect("segment flag should fail");
        assert!(err.to_string().contains("unknown calibrate option"));
    }
}
