use super::mnemonic::{display_generated_mnemonic, save_mnemonic_to_file};
use mirrorshard::config::{default_config_path, MirrorConfig};
use mirrorshard::crypto::generate_mnemonic;
use std::fs;
use std::path::PathBuf;

/// Set up a new deployment
///
/// Writes the default configuration and generates the keyring mnemonic. The
/// mnemonic is saved to `--mnemonic-file` when given, otherwise shown once.
pub fn execute(
    config_path: Option<String>,
    mnemonic_file: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(format!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    fs::write(&config_path, MirrorConfig::generate_default_toml())
        .map_err(|e| format!("Failed to write config '{}': {}", config_path.display(), e))?;
    println!("Config written to {}", config_path.display());

    let mnemonic = generate_mnemonic()?;
    match mnemonic_file.map(PathBuf::from) {
        Some(path) => {
            save_mnemonic_to_file(&mnemonic, &path)?;
            display_generated_mnemonic(&mnemonic, Some(&path));
        }
        None => display_generated_mnemonic(&mnemonic, None),
    }
    Ok(())
}
