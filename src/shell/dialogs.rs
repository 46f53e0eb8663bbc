//! Native pickers and console prompts.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use rfd::FileDialog;
use std::io::{self, BufRead, Write};

/// Extensions offered by the input picker
pub const SPREADSHEET_EXTENSIONS: [&str; 4] = ["csv", "txt", "xls", "xlsx"];

/// Show a native multi-file picker
///
/// # Returns
/// The selected files, or None if cancelled
pub fn pick_input_files(title: &str, start_dir: Option<&Utf8Path>) -> Option<Vec<Utf8PathBuf>> {
    let mut dialog = FileDialog::new()
        .set_title(title)
        .add_filter("Spreadsheets", &SPREADSHEET_EXTENSIONS)
        .add_filter("All files", &["*"]);
    if let Some(dir) = start_dir.filter(|dir| dir.is_dir()) {
        dialog = dialog.set_directory(dir);
    }

    let paths = dialog.pick_files()?;
    let files: Vec<Utf8PathBuf> = paths
        .into_iter()
        .filter_map(|path| {
            Utf8PathBuf::try_from(path)
                .map_err(|e| {
                    tracing::error!("Failed to convert path to UTF-8: {}", e);
                    e
                })
                .ok()
        })
        .collect();
    Some(files)
}

/// Show a native folder picker
///
/// # Returns
/// The selected folder, or None if cancelled
pub fn pick_output_folder(title: &str, start_dir: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    let mut dialog = FileDialog::new().set_title(title);
    if let Some(dir) = start_dir.filter(|dir| dir.is_dir()) {
        dialog = dialog.set_directory(dir);
    }

    dialog.pick_folder().and_then(|path| {
        Utf8PathBuf::try_from(path)
            .map_err(|e| {
                tracing::error!("Failed to convert path to UTF-8: {}", e);
                e
            })
            .ok()
    })
}

/// Ask for the unlock password on the console
pub fn prompt_password() -> Result<String> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    read_password(&mut stdin.lock(), &mut stderr)
}

/// Read one password line from `input`, writing the prompt to `prompt_out`
pub fn read_password<R: BufRead, W: Write>(input: &mut R, prompt_out: &mut W) -> Result<String> {
    write!(prompt_out, "Password: ").context("Failed to write password prompt")?;
    prompt_out.flush().context("Failed to write password prompt")?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();

    if password.is_empty() {
        bail!("A password is required to unlock files");
    }
    Ok(password)
}

/// Make `path` absolute against the working directory
pub fn absolutize(path: &Utf8Path) -> Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let cwd = Utf8PathBuf::try_from(cwd).context("Working directory is not valid UTF-8")?;
    Ok(cwd.join(path))
}
