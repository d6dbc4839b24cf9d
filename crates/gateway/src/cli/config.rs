use std::io::Read;

use anyhow::Context;
use cg_domain::config::{Config, ConfigSeverity};
use cg_providers::CredentialCipher;

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when errors are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config).context("serializing config")?;
    print!("{output}");
    Ok(())
}

/// Read a plaintext provider key from stdin and print its `enc:` form.
pub fn encrypt_credential(config: &Config) -> anyhow::Result<()> {
    let env_var = &config.security.credential_key_env;
    let cipher = CredentialCipher::from_env(env_var)?
        .with_context(|| format!("{env_var} is not set; export a hex-encoded 32-byte key"))?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading key from stdin")?;
    let key = input.trim();
    if key.is_empty() {
        anyhow::bail!("no key on stdin");
    }

    println!("{}", cipher.encrypt(key)?);
    Ok(())
}
