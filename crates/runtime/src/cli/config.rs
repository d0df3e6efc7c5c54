use parley_domain::config::{ConfigSeverity, Settings};

/// Validate the settings, printing any issues. Returns `false` when at
/// least one error was found.
pub fn validate(settings: &Settings, config_path: &str) -> bool {
    let issues = settings.validate();

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

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved settings (with all defaults filled in) as TOML.
pub fn show(settings: &Settings) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(settings)
        .map_err(|e| anyhow::anyhow!("serializing settings: {e}"))?;
    print!("{output}");
    Ok(())
}
