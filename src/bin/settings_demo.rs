use passage::settings::*;

fn main() -> anyhow::Result<()> {
    // $ cargo run --bin settings_demo -- --settings=settings/dev.toml
    let cli = Cli::parse();
    let project_settings = parse_settings(cli.settings.as_deref())?;

    // secrets print as ***
    println!("Loaded settings: {:#?}", project_settings);
    println!("Cookies marked Secure: {}", project_settings.cookie_secure());

    let overridden: Vec<_> = ENV_OVERRIDES
        .iter()
        .filter(|(var, _)| std::env::var(var).is_ok())
        .map(|(var, key)| format!("{var} -> {key}"))
        .collect();
    println!("Environment overrides applied: {:?}", overridden);
    Ok(())
}
