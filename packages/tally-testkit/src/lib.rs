//! Throwaway Postgres databases for the `TALLY_PG_DSN`-gated integration tests.

mod error;

pub use error::{Error, Result};

use std::{env, str::FromStr};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use uuid::Uuid;

const DSN_VAR: &str = "TALLY_PG_DSN";
// Databases tried, in order, for CREATE and DROP DATABASE.
const MAINTENANCE_DATABASES: [&str; 2] = ["postgres", "template1"];

/// A database named `tally_test_<uuid>` on the server behind the base DSN.
///
/// Call [`TestDatabase::drop_database`] at the end of a test; a database that is only dropped
/// by scope is left behind and reported on stderr.
pub struct TestDatabase {
	name: String,
	options: PgConnectOptions,
	maintenance: PgConnectOptions,
	dropped: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {DSN_VAR}: {err}.")))?;
		let (maintenance, mut conn) = maintenance_connection(&base).await?;
		let name = format!("tally_test_{}", Uuid::new_v4().simple());

		conn.execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create {name}: {err}.")))?;

		let options = base.database(&name);

		Ok(Self { name, options, maintenance, dropped: false })
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn dsn(&self) -> String {
		self.options.to_url_lossy().to_string()
	}

	/// Storage settings pointing at this database.
	pub fn postgres(&self, pool_max_conns: u32) -> tally_config::Postgres {
		tally_config::Postgres { dsn: self.dsn(), pool_max_conns }
	}

	/// Terminates leftover sessions, then drops the database.
	pub async fn drop_database(mut self) -> Result<()> {
		let mut conn = PgConnection::connect_with(&self.maintenance).await?;

		// Pools of the test may still hold connections.
		sqlx::query(
			"SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
			 WHERE datname = $1 AND pid <> pg_backend_pid()",
		)
		.bind(&self.name)
		.fetch_all(&mut conn)
		.await?;
		conn.execute(format!(r#"DROP DATABASE IF EXISTS "{}""#, self.name).as_str()).await?;

		self.dropped = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if !self.dropped {
			eprintln!("Test database {} was left behind.", self.name);
		}
	}
}

/// The base DSN, when Postgres tests are enabled.
pub fn env_dsn() -> Option<String> {
	env::var(DSN_VAR).ok().filter(|dsn| !dsn.trim().is_empty())
}

async fn maintenance_connection(
	base: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut errors = Vec::new();

	for database in MAINTENANCE_DATABASES {
		let options = base.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => errors.push(format!("{database}: {err}")),
		}
	}

	Err(Error::Message(format!("No maintenance database reachable ({}).", errors.join("; "))))
}
