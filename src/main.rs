use anyhow::{bail, Context};
use clap::Parser;
use retoucher::cli::CliArgs;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let report = retoucher::run(&args)
        .with_context(|| format!("failed to replay {}", args.script.display()))?;

    println!(
        "{} step(s) applied, {} failed",
        report.applied,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  step {} ({}): {}", failure.index, failure.step, failure.error);
    }
    for path in &report.downloads {
        println!("saved {}", path.display());
    }

    if args.strict && !report.is_clean() {
        bail!("{} step(s) failed", report.failures.len());
    }
    Ok(())
}
