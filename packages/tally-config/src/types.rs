use serde::Deserialize;
use time::UtcOffset;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub search: Search,
	pub stats: Stats,
	pub export: Export,
}
impl Config {
	/// Offset applied to bucket boundaries and to the housekeeping day boundary.
	pub fn utc_offset(&self) -> Result<UtcOffset> {
		parse_utc_offset(&self.stats.timezone)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Search {
	pub url: String,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub password: Option<String>,
	pub timeout_ms: u64,
	pub records_index: String,
	pub sessions_index: String,
	#[serde(default = "default_term_agg_size")]
	pub term_agg_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stats {
	#[serde(default = "default_timezone")]
	pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Export {
	pub base_dir: std::path::PathBuf,
	#[serde(default = "default_page_size")]
	pub page_size: u32,
	#[serde(default = "default_max_rows_per_file")]
	pub max_rows_per_file: u32,
	#[serde(default = "default_scroll_keep_alive")]
	pub scroll_keep_alive: String,
	#[serde(default = "default_locale")]
	pub default_locale: String,
}

/// Parses `+HH:MM` / `-HH:MM` (and `Z`) into a [`UtcOffset`].
pub fn parse_utc_offset(raw: &str) -> Result<UtcOffset> {
	let invalid = || Error::InvalidTimezone { value: raw.to_string() };
	let trimmed = raw.trim();

	if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
		return Ok(UtcOffset::UTC);
	}

	let (sign, rest) = match trimmed.split_at_checked(1) {
		Some(("+", rest)) => (1_i8, rest),
		Some(("-", rest)) => (-1_i8, rest),
		_ => return Err(invalid()),
	};
	let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;

	if hours.len() != 2 || minutes.len() != 2 {
		return Err(invalid());
	}

	let hours: i8 = hours.parse().map_err(|_| invalid())?;
	let minutes: i8 = minutes.parse().map_err(|_| invalid())?;

	UtcOffset::from_hms(sign * hours, sign * minutes, 0).map_err(|_| invalid())
}

fn default_term_agg_size() -> u32 {
	1_000
}

fn default_timezone() -> String {
	"+00:00".to_string()
}

fn default_page_size() -> u32 {
	1_000
}

fn default_max_rows_per_file() -> u32 {
	100_000
}

fn default_scroll_keep_alive() -> String {
	"1m".to_string()
}

fn default_locale() -> String {
	"zh-cn".to_string()
}
