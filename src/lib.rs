pub mod cli;
pub mod config;
pub mod crop;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod geometry;
pub mod handles;
pub mod history;
pub mod logging;
pub mod script;
pub mod session;
pub mod storage;
pub mod studio;
pub use error::{AppError, AppResult};

use std::path::Path;

use crate::cli::CliArgs;
use crate::generator::CommandGenerator;
use crate::handles::ObjectUrlRegistry;
use crate::script::{ReplayReport, SessionScript};
use crate::storage::DownloadStorage;
use crate::studio::{Studio, StudioSettings};

/// Entrypoint used by the binary: replays one session script.
pub fn run(args: &CliArgs) -> AppResult<ReplayReport> {
    logging::init();
    tracing::info!(script = %args.script.display(), "starting retoucher");

    let config = match &args.config {
        Some(path) => config::load_app_config_from(path).map_err(|source| AppError::Read {
            path: path.clone(),
            source,
        })?,
        None => config::load_app_config(),
    };
    let storage = match args.download_dir.clone().or_else(|| config.download_dir.clone()) {
        Some(dir) => DownloadStorage::with_dir(dir),
        None => DownloadStorage::with_default_dir()?,
    };
    let session_script = SessionScript::from_path(&args.script)?;
    let base_dir = args.script.parent().unwrap_or(Path::new("."));

    if config.generator_command.is_empty() {
        tracing::warn!("generator_command is not configured; generative steps will fail");
    }
    let generator = CommandGenerator::new(
        config.generator_command.clone(),
        config.generator_timeout(),
    );
    let studio = Studio::new(
        generator,
        ObjectUrlRegistry::new(),
        storage,
        StudioSettings::from(&config),
    );

    let report = script::replay(&studio, &session_script, base_dir);
    {
        let session = studio.session();
        tracing::info!(
            applied = report.applied,
            failed = report.failures.len(),
            versions = session.history().len(),
            cursor = ?session.history().cursor(),
            "replay finished"
        );
    }
    studio.teardown();
    Ok(report)
}
