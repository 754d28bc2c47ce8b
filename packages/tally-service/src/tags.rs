//! Per-tenant tag catalog and closed-world tag normalization.

use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	sync::{Arc, RwLock},
};

use crate::{Result, stats::MergedStats};
use tally_storage::{TagRow, db::Db, tags};

/// Tag code to display name.
pub type TagValues = BTreeMap<String, String>;

/// Tag type to its values, as visible to one tenant.
pub type AvailableTags = BTreeMap<String, TagValues>;

#[derive(Debug, Default)]
struct TagSnapshot {
	system: AvailableTags,
	tenants: HashMap<String, AvailableTags>,
}
impl TagSnapshot {
	fn from_rows(rows: Vec<TagRow>) -> Self {
		let mut snapshot = Self::default();

		for row in rows {
			let owner = if row.app_id == tags::SYSTEM_APP_ID {
				&mut snapshot.system
			} else {
				snapshot.tenants.entry(row.app_id).or_default()
			};

			owner.entry(row.tag_type).or_default().insert(row.code, row.name);
		}

		snapshot
	}

	fn available(&self, tenant_id: &str) -> AvailableTags {
		let mut available = self.system.clone();

		if let Some(tenant) = self.tenants.get(tenant_id) {
			for (tag_type, values) in tenant {
				available.entry(tag_type.clone()).or_default().extend(values.clone());
			}
		}

		available
	}

	fn values(&self, tenant_id: &str, tag_type: &str) -> TagValues {
		let mut values = self.system.get(tag_type).cloned().unwrap_or_default();

		if let Some(overrides) =
			self.tenants.get(tenant_id).and_then(|tenant| tenant.get(tag_type))
		{
			values.extend(overrides.clone());
		}

		values
	}
}

/// System tags overlaid by tenant tags; a tenant entry wins over a system entry with the same code.
///
/// Readers get a consistent snapshot; [`TagCatalog::reload`] swaps in a new one atomically.
#[derive(Debug, Default)]
pub struct TagCatalog {
	snapshot: RwLock<Arc<TagSnapshot>>,
}
impl TagCatalog {
	pub fn from_rows(rows: Vec<TagRow>) -> Self {
		Self { snapshot: RwLock::new(Arc::new(TagSnapshot::from_rows(rows))) }
	}

	pub async fn load(db: &Db) -> Result<Self> {
		Ok(Self::from_rows(tags::load_tag_rows(&db.pool).await?))
	}

	pub async fn reload(&self, db: &Db) -> Result<()> {
		let rows = tags::load_tag_rows(&db.pool).await?;

		self.replace(rows);

		Ok(())
	}

	pub fn replace(&self, rows: Vec<TagRow>) {
		let snapshot = Arc::new(TagSnapshot::from_rows(rows));

		*self.snapshot.write().unwrap_or_else(|err| err.into_inner()) = snapshot;

		tracing::info!("Tag catalog reloaded.");
	}

	pub fn available_tags(&self, tenant_id: &str) -> AvailableTags {
		self.current().available(tenant_id)
	}

	/// Display names of every tag of `tag_type` visible to `tenant_id`.
	pub fn available_values(&self, tenant_id: &str, tag_type: &str) -> BTreeSet<String> {
		self.current().values(tenant_id, tag_type).into_values().collect()
	}

	pub fn tag_code_by_name(&self, tenant_id: &str, tag_type: &str, name: &str) -> Option<String> {
		self.current()
			.values(tenant_id, tag_type)
			.into_iter()
			.find_map(|(code, value)| (value == name).then_some(code))
	}

	pub fn tag_name_by_code(&self, tenant_id: &str, tag_type: &str, code: &str) -> Option<String> {
		self.current().values(tenant_id, tag_type).remove(code)
	}

	/// Reconciles `counts` against the available tag values.
	///
	/// The result holds exactly the available values: counted ones are copied, missing ones get
	/// `zero()`, and counted values the catalog does not know are dropped.
	pub fn normalize<V, F>(
		&self,
		counts: &HashMap<String, V>,
		tenant_id: &str,
		tag_type: &str,
		zero: F,
	) -> HashMap<String, V>
	where
		V: Clone,
		F: Fn() -> V,
	{
		self.available_values(tenant_id, tag_type)
			.into_iter()
			.map(|value| {
				let count = counts.get(&value).cloned().unwrap_or_else(&zero);

				(value, count)
			})
			.collect()
	}

	/// [`TagCatalog::normalize`] applied to a merged by-tag table.
	pub fn normalize_stats(&self, stats: &mut MergedStats, tenant_id: &str, tag_type: &str) {
		let available = self.available_values(tenant_id, tag_type);
		let dropped = stats.rows.keys().filter(|key| !available.contains(*key)).count();

		if dropped > 0 {
			tracing::debug!(tenant_id, tag_type, dropped, "Dropped buckets of unknown tags.");
		}

		stats.reconcile_keys(available);
	}

	fn current(&self) -> Arc<TagSnapshot> {
		Arc::clone(&self.snapshot.read().unwrap_or_else(|err| err.into_inner()))
	}
}
