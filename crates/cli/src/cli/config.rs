use ks_domain::config::{Config, ConfigError, ConfigSeverity, SessionsConfig, SiteLoginConfig};

use super::LoadedConfig;

/// `keystone config validate`: print what the session managers would run
/// with, then any issues.
///
/// Returns `false` when errors were found; warnings alone pass.
pub fn validate(loaded: &LoadedConfig) -> bool {
    println!("{}", loaded.describe_source());
    for line in sessions_summary(&loaded.config.sessions) {
        println!("{line}");
    }

    let issues = loaded.config.validate();
    if issues.is_empty() {
        println!("\nConfig OK");
        return true;
    }

    println!();
    for issue in &issues {
        println!("{issue}");
    }
    let (errors, warnings) = tally(&issues);
    println!("\n{errors} error(s), {warnings} warning(s)");
    errors == 0
}

/// `keystone config show`: the resolved config with defaults filled in.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}

fn tally(issues: &[ConfigError]) -> (usize, usize) {
    let errors = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    (errors, issues.len() - errors)
}

/// The `[sessions]` table as an operator reads it.
pub fn sessions_summary(s: &SessionsConfig) -> Vec<String> {
    let mut lines = vec![
        "[sessions]".to_owned(),
        format!(
            "  state file       {}",
            s.state_path.join("sessions").join("sessions.json").display()
        ),
        format!("  server           {}", span(s.server_lifetime_secs)),
        format!("  messaging        {}", span(s.messaging_lifetime_secs)),
        format!(
            "  remote client    {}, renewed {} before expiry",
            span(s.client_lifetime_secs),
            span(s.client_renewal_margin_secs)
        ),
        format!("  api keys         {} sliding", span(s.api_session_expiry_secs)),
        match s.sweep_interval_secs {
            Some(secs) if secs > 0 => format!("  sweep            every {}", span(secs as i64)),
            _ => "  sweep            off (expiry on access only)".to_owned(),
        },
    ];

    if s.sites.is_empty() {
        lines.push("  sites            none".to_owned());
    } else {
        lines.push(format!(
            "  sites            {}, renewed {} before expiry",
            s.sites.len(),
            span(s.web_renewal_margin_secs)
        ));
        for site in &s.sites {
            let kind = match &site.login {
                SiteLoginConfig::Interstitial { .. } => "interstitial".to_owned(),
                SiteLoginConfig::Form {
                    username_env,
                    password_env,
                    ..
                } => format!("form ({username_env}/{password_env})"),
            };
            lines.push(format!(
                "    {:<14} {kind}, ttl {}",
                site.name,
                span(site.effective_ttl_secs())
            ));
        }
    }
    lines
}

/// Whole days, hours or minutes when the value divides evenly.
fn span(secs: i64) -> String {
    match secs {
        s if s != 0 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s != 0 && s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s != 0 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}
