use super::mnemonic::{determine_mnemonic_source, read_mnemonic};
use mirrorshard::config::{default_config_path, MirrorConfig};
use mirrorshard::crypto::ServiceKeyring;
use std::path::PathBuf;

/// Validate the deployment's config file and keyring mnemonic
///
/// Loads and validates the config (every duration and threshold), then derives
/// the keyring to confirm the mnemonic is a valid BIP-39 phrase.
pub fn execute(
    config_path: Option<String>,
    mnemonic_file: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    println!("Checking mirrorshard deployment...");
    println!();

    let config = MirrorConfig::load(&config_path)?;
    println!("  Config: {} (valid)", config_path.display());
    println!(
        "  Protection: n = {}, k = {}, padding = {}",
        config.protection.n, config.protection.k, config.protection.padding
    );
    println!("  Manifest replicas: {}", config.manifest.replicas);

    let mnemonic = read_mnemonic(determine_mnemonic_source(mnemonic_file))?;
    let keyring = ServiceKeyring::from_mnemonic(&mnemonic)?;
    println!("  Keyring: derived (epoch {})", keyring.epoch());

    println!();
    println!("All checks passed");
    Ok(())
}
