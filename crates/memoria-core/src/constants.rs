//! Package-level constants.

/// Current version of Memoria (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "memoria";

/// Directory under `$HOME` holding settings and the summary database.
pub const HOME_DIR_NAME: &str = ".memoria";
