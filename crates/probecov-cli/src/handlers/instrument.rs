//! `probecov instrument`

use crate::commands::InstrumentArgs;
use crate::error::{CliError, CliResult};
use crate::output::Reporter;
use probecov::archive::{ContentType, ARCHIVE_EXTENSIONS};
use probecov::{InstrumentConfig, Instrumenter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Instrument a class file, a jar, or a directory tree of both into `args.output`
///
/// Relative paths are preserved; companion classes are written next to the
/// package of their name. Jars are rewritten whole, with their classes
/// instrumented in place.
pub fn run_instrument(args: &InstrumentArgs, reporter: &Reporter) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => InstrumentConfig::from_json_file(path)?,
        None => InstrumentConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.probe_mode = mode.into();
    }
    let instrumenter = Instrumenter::new(config);

    let files = input_files(&args.input)?;
    let mut classes = 0_usize;
    let mut probes = 0_u64;
    for (path, relative) in &files {
        let bytes = fs::read(path)?;
        let location = path.display().to_string();
        if ContentType::detect(&bytes) == ContentType::Archive {
            let archive = instrumenter.instrument_archive(&bytes, &location)?;
            debug!(
                path = %path.display(),
                classes = archive.classes,
                probe_count = archive.probe_count,
                "instrumented archive"
            );
            write_file(&args.output.join(relative), &archive.bytes)?;
            classes += archive.classes;
            probes += archive.probe_count;
            continue;
        }
        let unit = instrumenter.instrument(&bytes, &location)?;
        debug!(
            path = %path.display(),
            probe_count = unit.probe_count,
            strategy = unit.strategy.as_str(),
            "instrumented"
        );
        write_file(&args.output.join(relative), &unit.bytes)?;
        if let Some(companion) = &unit.companion {
            write_file(
                &args.output.join(format!("{}.class", companion.name)),
                &companion.bytes,
            )?;
        }
        classes += 1;
        probes += u64::from(unit.probe_count);
    }
    reporter.success(&format!(
        "Instrumented {classes} classes ({probes} probes) into {}",
        args.output.display()
    ));
    Ok(())
}

/// Class files and archives below `input` with their path relative to it
pub fn input_files(input: &Path) -> CliResult<Vec<(PathBuf, PathBuf)>> {
    if input.is_file() {
        let name = input
            .file_name()
            .ok_or_else(|| CliError::invalid_argument(format!("not a file: {}", input.display())))?;
        return Ok(vec![(input.to_path_buf(), PathBuf::from(name))]);
    }
    if !input.is_dir() {
        return Err(CliError::invalid_argument(format!(
            "no such file or directory: {}",
            input.display()
        )));
    }
    let root = input
        .to_str()
        .ok_or_else(|| CliError::invalid_argument("input path is not valid UTF-8"))?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root));
    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(|e| CliError::Io(e.into_error()))?;
        if !path.is_file() || !is_input(&path) {
            continue;
        }
        let relative = path
            .strip_prefix(input)
            .map_err(|e| CliError::invalid_argument(e.to_string()))?
            .to_path_buf();
        files.push((path, relative));
    }
    Ok(files)
}

fn is_input(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "class" || ARCHIVE_EXTENSIONS.contains(&ext))
}

fn write_file(path: &Path, bytes: &[u8]) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}
