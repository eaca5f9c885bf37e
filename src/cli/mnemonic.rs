use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Environment variable holding the keyring mnemonic
pub const MNEMONIC_ENV: &str = "MIRRORSHARD_MNEMONIC";

/// Where the keyring mnemonic comes from, checked in order
#[derive(Debug, PartialEq, Eq)]
pub enum MnemonicSource {
    /// From --mnemonic-file /path/to/phrase (container-native)
    File(String),
    /// From MIRRORSHARD_MNEMONIC (fallback, warned as insecure)
    EnvVar,
    /// From a masked stdin prompt
    Stdin,
}

/// Pick the mnemonic source for the given CLI arguments.
pub fn determine_mnemonic_source(mnemonic_file: Option<String>) -> MnemonicSource {
    if let Some(file) = mnemonic_file {
        MnemonicSource::File(file)
    } else if std::env::var(MNEMONIC_ENV).is_ok() {
        MnemonicSource::EnvVar
    } else {
        MnemonicSource::Stdin
    }
}

/// Read an existing keyring mnemonic.
pub fn read_mnemonic(source: MnemonicSource) -> Result<String, Box<dyn std::error::Error>> {
    let mnemonic = match source {
        MnemonicSource::File(path) => {
            if !Path::new(&path).exists() {
                return Err(format!("Mnemonic file not found: {}", path).into());
            }
            fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read mnemonic file: {}", e))?
                .trim()
                .to_string()
        }
        MnemonicSource::EnvVar => {
            eprintln!("WARNING: reading the keyring mnemonic from {} is insecure", MNEMONIC_ENV);
            eprintln!("   Use --mnemonic-file with a secrets manager in production");
            eprintln!();
            std::env::var(MNEMONIC_ENV)
                .map_err(|_| format!("{} env var not set", MNEMONIC_ENV))?
                .trim()
                .to_string()
        }
        MnemonicSource::Stdin => rpassword::prompt_password("Enter keyring mnemonic: ")
            .map_err(|e| format!("Failed to read mnemonic from stdin: {}", e))?
            .trim()
            .to_string(),
    };

    if mnemonic.is_empty() {
        return Err("Mnemonic is empty".into());
    }
    Ok(mnemonic)
}

/// Save a mnemonic to a file readable only by its owner (0600).
pub fn save_mnemonic_to_file(
    mnemonic: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create mnemonic directory: {}", e))?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| format!("Failed to create mnemonic file '{}': {}", path.display(), e))?;

    writeln!(file, "{}", mnemonic)
        .map_err(|e| format!("Failed to write mnemonic to '{}': {}", path.display(), e))?;
    Ok(())
}

/// Show a freshly generated mnemonic once, on stderr.
pub fn display_generated_mnemonic(mnemonic: &str, saved_path: Option<&Path>) {
    const BOLD: &str = "\x1b[1m";
    const RESET: &str = "\x1b[0m";
    const BOX_WIDTH: usize = 79;

    eprintln!();
    eprintln!("{}", "═".repeat(BOX_WIDTH));
    eprintln!("{BOLD}Keyring mnemonic (SAVE THIS SECURELY){RESET}");
    eprintln!("{}", "═".repeat(BOX_WIDTH));
    eprintln!();
    match saved_path {
        Some(path) => {
            eprintln!("Saved to {BOLD}{}{RESET} (mode 0600).", path.display());
            eprintln!("Back this file up now. Without it every manifest's sealed");
            eprintln!("fragment keys are unreadable and every record is lost.");
        }
        None => {
            eprintln!("  {BOLD}{mnemonic}{RESET}");
            eprintln!();
            eprintln!("This phrase is shown once. Without it every manifest's sealed");
            eprintln!("fragment keys are unreadable and every record is lost.");
        }
    }
    eprintln!();
    let _ = io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_read_mnemonic_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  abandon ability  ").unwrap();

        let source = MnemonicSource::File(temp_file.path().to_string_lossy().to_string());
        assert_eq!(read_mnemonic(source).unwrap(), "abandon ability");
    }

    #[test]
    fn test_read_mnemonic_file_not_found() {
        let source = MnemonicSource::File("/nonexistent/phrase".to_string());
        let err = read_mnemonic(source).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_read_mnemonic_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let source = MnemonicSource::File(temp_file.path().to_string_lossy().to_string());
        assert!(read_mnemonic(source).unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_determine_source_prefers_file() {
        assert_eq!(
            determine_mnemonic_source(Some("/tmp/phrase".to_string())),
            MnemonicSource::File("/tmp/phrase".to_string())
        );
    }

    #[test]
    fn test_save_is_owner_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys").join("mnemonic.txt");
        save_mnemonic_to_file("abandon ability", &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let source = MnemonicSource::File(path.to_string_lossy().to_string());
        assert_eq!(read_mnemonic(source).unwrap(), "abandon ability");
    }
}
