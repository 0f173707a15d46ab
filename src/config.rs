use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const USAGE: &str = "Usage: azurekv [OPTIONS] [FILTER]

Browse and edit Azure Key Vault secrets through the Azure CLI.

Arguments:
  [FILTER]                     Initial Key Vault filter

Options:
  -s, --subscription <NAME>    Switch the Azure CLI subscription before starting
      --debug                  Write a debug log (see AZKV_LOG_FILE)
  -h, --help                   Print this help

Environment:
  AZKV_CLI                     Azure CLI binary (default: az, az.cmd on Windows)
  AZKV_TIMEOUT_SECS            Timeout for each CLI call in seconds (default: none)
  AZKV_LOG_FILE                Debug log path (default: azkv.log)
  RUST_LOG                     Log filter used with --debug (default: debug)";

// PATH lookup on Windows only resolves `az` to `az.exe`, never `az.cmd`
const DEFAULT_CLI: &str = if cfg!(windows) { "az.cmd" } else { "az" };
const DEFAULT_LOG_FILE: &str = "azkv.log";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub subscription: Option<String>,
    pub filter: Option<String>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Help,
    Run(CliArgs),
}

/// Parses the arguments after the program name. Unknown options are ignored,
/// and the last positional argument becomes the vault filter.
pub fn parse_args<I, S>(args: I) -> CliCommand
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return CliCommand::Help,
            "-s" | "--subscription" => {
                if let Some(name) = args.next() {
                    parsed.subscription = Some(name);
                }
            }
            "--debug" => parsed.debug = true,
            other if other.starts_with('-') => {}
            _ => parsed.filter = Some(arg),
        }
    }
    CliCommand::Run(parsed)
}

/// Settings read from the environment (and an optional `.env` file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub cli: String,
    pub timeout: Option<Duration>,
    pub log_file: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = non_blank("AZKV_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            cli: non_blank("AZKV_CLI").unwrap_or_else(|| DEFAULT_CLI.into()),
            timeout,
            log_file: non_blank("AZKV_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}
