use vb_domain::config::GatewayConfig;

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &GatewayConfig) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
