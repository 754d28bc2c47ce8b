mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Export, Postgres, Search, Service, Stats, Storage, parse_utc_offset};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::ParseConfig { source, .. } =>
			Error::ParseConfig { path: path.to_path_buf(), source },
		other => other,
	})
}

pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("storage.postgres.dsn", &cfg.storage.postgres.dsn),
		("search.url", &cfg.search.url),
		("search.records_index", &cfg.search.records_index),
		("search.sessions_index", &cfg.search.sessions_index),
		("export.scroll_keep_alive", &cfg.export.scroll_keep_alive),
		("export.default_locale", &cfg.export.default_locale),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.search.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search.term_agg_size == 0 {
		return Err(Error::Validation {
			message: "search.term_agg_size must be greater than zero.".to_string(),
		});
	}
	if cfg.export.base_dir.as_os_str().is_empty() {
		return Err(Error::Validation { message: "export.base_dir must be non-empty.".to_string() });
	}
	if cfg.export.page_size == 0 {
		return Err(Error::Validation {
			message: "export.page_size must be greater than zero.".to_string(),
		});
	}
	if cfg.export.max_rows_per_file == 0 {
		return Err(Error::Validation {
			message: "export.max_rows_per_file must be greater than zero.".to_string(),
		});
	}

	cfg.utc_offset()?;

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.search.username.as_deref().map(|name| name.trim().is_empty()).unwrap_or(false) {
		cfg.search.username = None;
	}
	if cfg.search.password.as_deref().map(|password| password.trim().is_empty()).unwrap_or(false) {
		cfg.search.password = None;
	}

	cfg.search.url = cfg.search.url.trim_end_matches('/').to_string();
}
