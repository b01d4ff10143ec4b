//! `probecov merge`

use super::expand_patterns;
use crate::commands::MergeArgs;
use crate::error::CliResult;
use crate::output::Reporter;
use probecov::ExecFileLoader;

/// Load every input into one store and write it as a single stream
pub fn run_merge(args: &MergeArgs, reporter: &Reporter) -> CliResult<()> {
    let inputs = expand_patterns(&args.inputs)?;
    let mut loader = ExecFileLoader::new();
    for path in &inputs {
        reporter.info(&format!("Loading {}", path.display()));
        loader.load(path)?;
    }
    loader.save(&args.output, false)?;
    reporter.success(&format!(
        "Merged {} files ({} classes) into {}",
        inputs.len(),
        loader.store().len(),
        args.output.display()
    ));
    Ok(())
}
