//! `probecov info`

use super::expand_patterns;
use crate::commands::InfoArgs;
use crate::error::CliResult;
use probecov::{CoverageResult, ExecDataReader, ExecDataVisitor, ExecutionData, SessionInfo};
use std::fs::File;
use std::io::{self, BufReader, Write};

/// Prints stream records as they are read
#[derive(Debug)]
pub struct InfoPrinter<W: Write> {
    out: W,
}

impl<W: Write> InfoPrinter<W> {
    /// Printer writing to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ExecDataVisitor for InfoPrinter<W> {
    fn visit_session_info(&mut self, info: &SessionInfo) -> CoverageResult<()> {
        let time = |t: Option<String>| t.unwrap_or_else(|| "?".to_string());
        writeln!(
            self.out,
            "Session \"{}\": {} - {}",
            info.id,
            time(info.start_time().map(|t| t.to_rfc3339())),
            time(info.dump_time().map(|t| t.to_rfc3339()))
        )?;
        Ok(())
    }

    fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()> {
        let hits = data.probes().covered().iter().filter(|&&c| c).count();
        writeln!(
            self.out,
            "{:016x}  {:4} of {:4}  {}",
            data.id(),
            hits,
            data.probe_count(),
            data.name()
        )?;
        Ok(())
    }
}

/// Dump the sessions and class records of every input
pub fn run_info(args: &InfoArgs) -> CliResult<()> {
    let stdout = io::stdout().lock();
    let mut printer = InfoPrinter::new(stdout);
    for path in expand_patterns(&args.inputs)? {
        writeln!(printer.out, "[{}]", path.display())?;
        writeln!(printer.out, "CLASS ID          HITS/PROBES  CLASS NAME")?;
        ExecDataReader::new(BufReader::new(File::open(&path)?)).read(&mut printer)?;
    }
    Ok(())
}
