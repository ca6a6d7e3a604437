use crate::cli::validate_input_file;
use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use std::path::PathBuf;

/// Ask for an input file until a valid one or a blank answer is given.
pub fn select_input_file(theme: &ColorfulTheme) -> Result<Option<PathBuf>> {
    loop {
        let raw: String = Input::with_theme(theme)
            .with_prompt("MKV file to convert (blank to quit)")
            .allow_empty(true)
            .interact_text()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match validate_input_file(trimmed) {
            Ok(path) => return Ok(Some(path)),
            Err(err) => println!("{err}. Please try again."),
        }
    }
}

pub fn confirm_run(theme: &ColorfulTheme, file_label: &str) -> Result<bool> {
    Ok(Confirm::with_theme(theme)
        .with_prompt(format!("{file_label}. Run conversion?"))
        .default(true)
        .interact()?)
}

pub fn convert_another(theme: &ColorfulTheme) -> Result<bool> {
    Ok(Confirm::with_theme(theme)
        .with_prompt("Convert another file?")
        .default(false)
        .interact()?)
}
