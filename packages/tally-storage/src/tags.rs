use sqlx::PgExecutor;

use crate::{Result, models::TagRow};

/// Tenant used for tag rows that apply to every tenant.
pub const SYSTEM_APP_ID: &str = "system";

pub async fn load_tag_rows<'e, E>(executor: E) -> Result<Vec<TagRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, TagRow>(
		"\
SELECT t.app_id, tt.code AS tag_type, t.code, t.name
FROM tags t
JOIN tag_types tt ON tt.id = t.type_id
ORDER BY t.app_id, tt.code, t.id",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn insert_tag<'e, E>(
	executor: E,
	app_id: &str,
	tag_type: &str,
	code: &str,
	name: &str,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO tags (type_id, code, name, app_id)
SELECT id, $2, $3, $4
FROM tag_types
WHERE code = $1
ON CONFLICT (app_id, type_id, code) DO UPDATE
SET name = EXCLUDED.name",
	)
	.bind(tag_type)
	.bind(code)
	.bind(name)
	.bind(app_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_tag_type<'e, E>(executor: E, code: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("INSERT INTO tag_types (code) VALUES ($1) ON CONFLICT (code) DO NOTHING")
		.bind(code)
		.execute(executor)
		.await?;

	Ok(())
}
