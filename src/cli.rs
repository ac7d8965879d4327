use std::path::PathBuf;

use clap::Parser;

/// Replays a JSON editing session against the configured generator.
#[derive(Parser, Debug)]
#[command(name = "retoucher", version, about)]
pub struct CliArgs {
    /// Session script to replay.
    #[arg(value_name = "SCRIPT.json")]
    pub script: PathBuf,

    /// Config file to use instead of `$XDG_CONFIG_HOME/retoucher/config.json`.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Overrides the configured download directory.
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// Exit with an error if any step fails.
    #[arg(long)]
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_and_overrides() {
        let args = CliArgs::try_parse_from([
            "retoucher",
            "session.json",
            "--config",
            "alt.json",
            "--strict",
        ])
        .expect("args should parse");

        assert_eq!(args.script, PathBuf::from("session.json"));
        assert_eq!(args.config, Some(PathBuf::from("alt.json")));
        assert!(args.download_dir.is_none());
        assert!(args.strict);
    }

    #[test]
    fn script_is_required() {
        assert!(CliArgs::try_parse_from(["retoucher"]).is_err());
    }
}
