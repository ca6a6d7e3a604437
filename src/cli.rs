use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueHint};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "mkv2mp4",
    version,
    about = "Convert an MKV file to MP4 (H.264/AAC) with live progress"
)]
pub struct Cli {
    /// Input .mkv file (prompted for when omitted)
    #[arg(short = 'i', long, value_hint = ValueHint::FilePath, value_parser = validate_input_file)]
    pub input: Option<PathBuf>,

    /// Path to ffmpeg binary (overrides bundled and PATH lookup)
    #[arg(long, value_hint = ValueHint::ExecutablePath)]
    pub ffmpeg: Option<PathBuf>,

    /// Show debug diagnostics on stderr
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig> {
        if let Some(path) = &self.ffmpeg {
            if !path.is_file() {
                bail!("Provided binary not found: {}", path.display());
            }
        }
        Ok(AppConfig {
            input: self.input,
            ffmpeg: self.ffmpeg,
            verbose: self.verbose,
        })
    }
}

pub fn has_mkv_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mkv"))
}

/// Accepts an existing regular file ending in `.mkv`.
pub fn validate_input_file(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw.trim());
    if !has_mkv_extension(&path) {
        return Err(format!("`{}` is not an .mkv file", path.display()));
    }
    if !path.is_file() {
        return Err(format!("input not found: {}", path.display()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_mkv_extension(Path::new("a/b/Movie.MKV")));
        assert!(has_mkv_extension(Path::new("movie.mkv")));
        assert!(!has_mkv_extension(Path::new("movie.mp4")));
        assert!(!has_mkv_extension(Path::new("mkv")));
    }

    #[test]
    fn validate_accepts_existing_mkv() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"x").unwrap();

        assert_eq!(validate_input_file(file.to_str().unwrap()), Ok(file));
    }

    #[test]
    fn validate_rejects_wrong_extension_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let avi = dir.path().join("movie.avi");
        fs::write(&avi, b"x").unwrap();

        assert!(validate_input_file(avi.to_str().unwrap()).is_err());
        let missing = dir.path().join("gone.mkv");
        let err = validate_input_file(missing.to_str().unwrap()).unwrap_err();
        assert!(err.starts_with("input not found"), "{err}");
    }

    #[test]
    fn directory_named_like_mkv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("season.mkv");
        fs::create_dir(&sub).unwrap();
        assert!(validate_input_file(sub.to_str().unwrap()).is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from(["mkv2mp4", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.input.is_none());
        let cfg = cli.into_config().unwrap();
        assert!(cfg.ffmpeg.is_none());
    }

    #[test]
    fn cli_rejects_non_mkv_input() {
        assert!(Cli::try_parse_from(["mkv2mp4", "-i", "clip.mp4"]).is_err());
    }
}
