//! Snapshot reconciliation.
//!
//! A snapshot replaces a company's directory wholesale. Each collection is
//! upserted in dependency order (codes, departments, users, members), then
//! rows missing from the snapshot are removed in reverse order so nothing
//! is left pointing at a deleted parent. Users are the exception: they are
//! soft-deleted inline right after their upsert.
//!
//! An empty collection skips both its upsert and its delete phase, so a
//! snapshot that omits a collection leaves the local rows alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::bulk::{BulkMutator, MutationSummary};
use crate::company::CompanyResolver;
use crate::directory::{Department, Member, MutationTarget, OrganizationCode, User};
use crate::observability::MetricsRegistry;
use crate::provision::{ProvisioningClient, SnapshotPayload};
use crate::store::DirectoryStore;

/// Per-kind row counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	pub codes: MutationSummary,
	pub departments: MutationSummary,
	pub users: MutationSummary,
	pub members: MutationSummary,
}

#[derive(Clone)]
pub struct SnapshotSyncer {
	client: Arc<dyn ProvisioningClient>,
	resolver: Arc<dyn CompanyResolver>,
	store: Arc<dyn DirectoryStore>,
	bulk: BulkMutator,
	metrics: Arc<MetricsRegistry>,
}

/// Keep the last record for each id, preserving first-seen order.
fn dedup_by_id<T>(items: Vec<T>, id_of: impl Fn(&T) -> i64, kind: &str) -> Vec<T> {
	let mut slots: HashMap<i64, usize> = HashMap::with_capacity(items.len());
	let mut out: Vec<T> = Vec::with_capacity(items.len());
	for item in items {
		let id = id_of(&item);
		match slots.get(&id) {
			Some(&pos) => {
				warn!("Snapshot carries duplicate {} id {}; last one wins", kind, id);
				out[pos] = item;
			}
			None => {
				slots.insert(id, out.len());
				out.push(item);
			}
		}
	}
	out
}

fn mark_targets<T>(
	items: &mut [T],
	existing: &HashSet<i64>,
	id_of: impl Fn(&T) -> i64,
	set: impl Fn(&mut T, MutationTarget),
) {
	for item in items.iter_mut() {
		let target = if existing.contains(&id_of(item)) {
			MutationTarget::Update
		} else {
			MutationTarget::Insert
		};
		set(item, target);
	}
}

fn missing(local: HashSet<i64>, snapshot: &HashSet<i64>) -> Vec<i64> {
	let mut ids: Vec<i64> = local.difference(snapshot).copied().collect();
	ids.sort_unstable();
	ids
}

impl SnapshotSyncer {
	pub fn new(
		client: Arc<dyn ProvisioningClient>,
		resolver: Arc<dyn CompanyResolver>,
		store: Arc<dyn DirectoryStore>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			client,
			resolver,
			bulk: BulkMutator::new(store.clone()),
			store,
			metrics,
		}
	}

	/// Fetch and apply each snapshot in the given order. Returns the last log
	/// position any of them carried, or `None` when none did.
	#[tracing::instrument(skip(self))]
	pub async fn sync(&self, company_key: &str, snapshot_ids: &[i64]) -> Result<Option<i64>> {
		info!("Snapshot sync: company={} snapshots={:?}", company_key, snapshot_ids);
		let company_id = self.resolver.resolve(company_key).await?;

		let mut last_log_seq = None;
		for &snapshot_id in snapshot_ids {
			let payload = self
				.client
				.snapshot_payload(company_key, snapshot_id)
				.await
				.with_context(|| format!("failed to fetch snapshot {snapshot_id} for {company_key}"))?;
			let log_seq = payload.log_seq;
			let report = self
				.apply(company_id, payload)
				.await
				.with_context(|| format!("failed to reconcile snapshot {snapshot_id} for {company_key}"))?;
			self.metrics.snapshots_applied_total.inc();
			info!(
				"Applied snapshot {} for {} at log_seq {:?}: {:?}",
				snapshot_id, company_key, log_seq, report
			);
			last_log_seq = log_seq.or(last_log_seq);
		}
		Ok(last_log_seq)
	}

	pub async fn apply(&self, company_id: i64, payload: SnapshotPayload) -> Result<ReconcileReport> {
		self.reconcile(
			company_id,
			payload.org_codes,
			payload.departments,
			payload.users,
			payload.members,
		)
		.await
	}

	/// Converge the company's directory onto the given collections.
	#[tracing::instrument(
		skip(self, org_codes, departments, users, members),
		fields(codes = org_codes.len(), departments = departments.len(), users = users.len(), members = members.len())
	)]
	pub async fn reconcile(
		&self,
		company_id: i64,
		org_codes: Vec<OrganizationCode>,
		departments: Vec<Department>,
		users: Vec<User>,
		members: Vec<Member>,
	) -> Result<ReconcileReport> {
		let mut report = ReconcileReport::default();

		let code_ids = self.upsert_codes(company_id, org_codes, &mut report).await?;
		let dept_ids = self
			.upsert_departments(company_id, departments, &mut report)
			.await?;
		self.sync_users(company_id, users, &mut report).await?;
		let member_ids = self.upsert_members(members, &mut report).await?;

		// reverse dependency order
		if !member_ids.is_empty() {
			let doomed = missing(self.store.member_ids(company_id).await?, &member_ids);
			report.members.deleted = self.bulk.delete_members(&doomed).await?;
		}
		if !dept_ids.is_empty() {
			let doomed = missing(self.store.department_ids(company_id).await?, &dept_ids);
			report.departments.deleted = self.bulk.delete_departments(company_id, &doomed).await?;
		}
		if !code_ids.is_empty() {
			let doomed = missing(self.store.code_ids(company_id).await?, &code_ids);
			report.codes.deleted = self.bulk.delete_codes(company_id, &doomed).await?;
		}

		Ok(report)
	}

	async fn upsert_codes(
		&self,
		company_id: i64,
		codes: Vec<OrganizationCode>,
		report: &mut ReconcileReport,
	) -> Result<HashSet<i64>> {
		if codes.is_empty() {
			return Ok(HashSet::new());
		}
		let mut codes = dedup_by_id(codes, |c| c.id, "organization code");
		for c in codes.iter_mut() {
			c.company_id = company_id;
		}
		let ids: Vec<i64> = codes.iter().map(|c| c.id).collect();
		let existing = self.store.existing_code_ids(company_id, &ids).await?;
		mark_targets(&mut codes, &existing, |c| c.id, |c, t| c.target = t);

		report.codes = self.bulk.apply_code_changes(company_id, codes).await?;
		Ok(ids.into_iter().collect())
	}

	async fn upsert_departments(
		&self,
		company_id: i64,
		departments: Vec<Department>,
		report: &mut ReconcileReport,
	) -> Result<HashSet<i64>> {
		if departments.is_empty() {
			return Ok(HashSet::new());
		}
		let mut departments = dedup_by_id(departments, |d| d.id, "department");
		for d in departments.iter_mut() {
			d.company_id = company_id;
			d.refresh_path();
		}
		let ids: Vec<i64> = departments.iter().map(|d| d.id).collect();
		let existing = self.store.existing_department_ids(company_id, &ids).await?;
		mark_targets(&mut departments, &existing, |d| d.id, |d, t| d.target = t);

		report.departments = self
			.bulk
			.apply_department_changes(company_id, departments)
			.await?;
		Ok(ids.into_iter().collect())
	}

	async fn sync_users(
		&self,
		company_id: i64,
		users: Vec<User>,
		report: &mut ReconcileReport,
	) -> Result<()> {
		if users.is_empty() {
			return Ok(());
		}
		let mut users = dedup_by_id(users, |u| u.id, "user");
		for u in users.iter_mut() {
			u.company_id = company_id;
		}
		let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
		let existing = self.store.existing_user_ids(company_id, &ids).await?;
		mark_targets(&mut users, &existing, |u| u.id, |u, t| u.target = t);
		report.users = self.bulk.apply_user_changes(company_id, users).await?;

		let snapshot: HashSet<i64> = ids.into_iter().collect();
		let doomed = missing(self.store.user_ids(company_id).await?, &snapshot);
		report.users.deleted = self.bulk.soft_delete_users(company_id, &doomed).await?;
		Ok(())
	}

	async fn upsert_members(
		&self,
		members: Vec<Member>,
		report: &mut ReconcileReport,
	) -> Result<HashSet<i64>> {
		if members.is_empty() {
			return Ok(HashSet::new());
		}
		let mut members = dedup_by_id(members, |m| m.id, "member");
		let ids: Vec<i64> = members.iter().map(|m| m.id).collect();
		let existing = self.store.existing_member_ids(&ids).await?;
		mark_targets(&mut members, &existing, |m| m.id, |m, t| m.target = t);

		report.members = self.bulk.apply_member_changes(members).await?;
		Ok(ids.into_iter().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicate_ids_keep_the_last_record() {
		let mut a = Department::new(1, 0);
		a.name = Some("first".into());
		let mut b = Department::new(1, 0);
		b.name = Some("second".into());
		let out = dedup_by_id(vec![a, Department::new(2, 0), b], |d| d.id, "department");
		assert_eq!(out.len(), 2);
		assert_eq!(out[0].name.as_deref(), Some("second"));
		assert_eq!(out[1].id, 2);
	}

	#[test]
	fn missing_is_sorted_difference() {
		let local = HashSet::from([4, 1, 2, 9]);
		let snapshot = HashSet::from([1, 2, 3]);
		assert_eq!(missing(local, &snapshot), vec![4, 9]);
	}
}
