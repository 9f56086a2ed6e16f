//! Database URL resolution

use shiftguard::config::MigratorConfig;

/// Environment variables consulted, in order, when no `--database-url` is given
pub const URL_ENV_VARS: &[&str] = &["SHIFTGUARD_DATABASE_URL", "DATABASE_URL"];

/// Pick the database URL: flag, then environment, then configuration.
///
/// `env` is injected so callers (and tests) control where variables come from.
pub fn resolve_database_url(
    flag: Option<String>,
    env: impl Fn(&str) -> Option<String>,
    config: &MigratorConfig,
) -> String {
    flag.or_else(|| URL_ENV_VARS.iter().find_map(|name| env(name)))
        .unwrap_or_else(|| config.database_url.clone())
}
