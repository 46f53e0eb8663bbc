use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Convert CSV/TXT/XLS files to XLSX and remove password protection
#[derive(Parser, Debug)]
#[command(name = "xlsx-utility", version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level for this run
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not mirror log lines to the console
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert .csv, .txt, .xls and .xlsx files to .xlsx
    Convert(RunArgs),

    /// Remove workbook and sheet protection with a known password
    Unlock(UnlockArgs),

    /// Show or change the saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

/// Options shared by `convert` and `unlock`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Files to process; opens a file picker when empty
    pub files: Vec<Utf8PathBuf>,

    /// Destination folder (defaults to the saved output folder)
    #[arg(short, long)]
    pub output: Option<Utf8PathBuf>,

    /// Choose the files with a file picker
    #[arg(long)]
    pub pick: bool,

    /// Delete each original after its output was saved
    #[arg(long)]
    pub delete_originals: bool,

    /// Retry files that fail with a file error, using the saved retry count
    #[arg(long)]
    pub retry: bool,

    /// Print the error of every failed file in the summary
    #[arg(long)]
    pub details: bool,

    /// Run even when the file count differs from the expected count
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Password of the protected files; prompted for when omitted
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsAction {
    /// Print the effective settings
    Show,

    /// Print the location of the settings file
    Path,

    /// Delete the settings file so defaults apply
    Reset,

    /// Change one setting and save
    Set { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_convert() {
        let cli = Cli::parse_from([
            "xlsx-utility",
            "convert",
            "A.csv",
            "B.txt",
            "-o",
            "/out",
            "--delete-originals",
        ]);

        match cli.command {
            Command::Convert(args) => {
                assert_eq!(args.files, vec![Utf8PathBuf::from("A.csv"), Utf8PathBuf::from("B.txt")]);
                assert_eq!(args.output, Some(Utf8PathBuf::from("/out")));
                assert!(args.delete_originals);
                assert!(!args.retry);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_unlock_with_global_flags() {
        let cli = Cli::parse_from([
            "xlsx-utility",
            "unlock",
            "--password",
            "s3cret",
            "Budget.xlsx",
            "--quiet",
            "--retry",
        ]);

        assert!(cli.quiet);
        match cli.command {
            Command::Unlock(args) => {
                assert_eq!(args.password.as_deref(), Some("s3cret"));
                assert_eq!(args.run.files.len(), 1);
                assert!(args.run.retry);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_settings_set() {
        let cli = Cli::parse_from(["xlsx-utility", "settings", "set", "batch_size", "10"]);
        assert!(matches!(
            cli.command,
            Command::Settings {
                action: SettingsAction::Set { ref key, ref value }
            } if key == "batch_size" && value == "10"
        ));
    }
}
