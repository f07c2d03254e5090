//! Bulk mutation engine.
//!
//! Splits a batch of directory records into insert, update and delete sets
//! using each record's [`MutationTarget`] marker, then applies every
//! non-empty set with a single store call.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::directory::{Department, Member, MutationTarget, OrganizationCode, User};
use crate::store::DirectoryStore;

/// Outcome of classifying one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<T> {
	pub to_insert: Vec<T>,
	pub to_update: Vec<T>,
	pub to_delete: Vec<i64>,
}

impl<T> Default for Classified<T> {
	fn default() -> Self {
		Self {
			to_insert: Vec::new(),
			to_update: Vec::new(),
			to_delete: Vec::new(),
		}
	}
}

/// Partition `items` with an explicit predicate pair. New wins over delete;
/// anything that is neither is an update. Delete targets keep only their id.
pub fn classify<T>(
	items: Vec<T>,
	id_of: impl Fn(&T) -> i64,
	is_new: impl Fn(&T) -> bool,
	is_delete_target: impl Fn(&T) -> bool,
) -> Classified<T> {
	let mut out = Classified::default();
	for item in items {
		if is_new(&item) {
			out.to_insert.push(item);
		} else if is_delete_target(&item) {
			out.to_delete.push(id_of(&item));
		} else {
			out.to_update.push(item);
		}
	}
	out
}

pub fn classify_codes(codes: Vec<OrganizationCode>) -> Classified<OrganizationCode> {
	classify(
		codes,
		|c| c.id,
		|c| c.target == MutationTarget::Insert,
		|c| c.target == MutationTarget::Delete,
	)
}

pub fn classify_departments(departments: Vec<Department>) -> Classified<Department> {
	classify(
		departments,
		|d| d.id,
		|d| d.target == MutationTarget::Insert,
		|d| d.target == MutationTarget::Delete,
	)
}

pub fn classify_users(users: Vec<User>) -> Classified<User> {
	classify(
		users,
		|u| u.id,
		|u| u.target == MutationTarget::Insert,
		|u| u.target == MutationTarget::Delete,
	)
}

pub fn classify_members(members: Vec<Member>) -> Classified<Member> {
	classify(
		members,
		|m| m.id,
		|m| m.target == MutationTarget::Insert,
		|m| m.target == MutationTarget::Delete,
	)
}

/// Row counts reported by the store for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSummary {
	pub inserted: u64,
	pub updated: u64,
	pub deleted: u64,
}

/// Applies classified batches to a [`DirectoryStore`]. Empty sets never
/// reach the store.
#[derive(Clone)]
pub struct BulkMutator {
	store: Arc<dyn DirectoryStore>,
}

impl BulkMutator {
	pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
		Self { store }
	}

	#[tracing::instrument(skip(self, codes), fields(count = codes.len()))]
	pub async fn apply_code_changes(
		&self,
		company_id: i64,
		codes: Vec<OrganizationCode>,
	) -> Result<MutationSummary> {
		let batch = classify_codes(codes);
		let mut summary = MutationSummary::default();
		if !batch.to_insert.is_empty() {
			summary.inserted = self.store.insert_codes(&batch.to_insert).await?;
			info!("Inserted {} organization codes for company {}", summary.inserted, company_id);
		}
		if !batch.to_update.is_empty() {
			summary.updated = self.store.update_codes(company_id, &batch.to_update).await?;
			info!("Updated {} organization codes for company {}", summary.updated, company_id);
		}
		summary.deleted = self.delete_codes(company_id, &batch.to_delete).await?;
		Ok(summary)
	}

	#[tracing::instrument(skip(self, departments), fields(count = departments.len()))]
	pub async fn apply_department_changes(
		&self,
		company_id: i64,
		departments: Vec<Department>,
	) -> Result<MutationSummary> {
		let batch = classify_departments(departments);
		let mut summary = MutationSummary::default();
		if !batch.to_insert.is_empty() {
			summary.inserted = self.store.insert_departments(&batch.to_insert).await?;
			info!("Inserted {} departments for company {}", summary.inserted, company_id);
		}
		if !batch.to_update.is_empty() {
			summary.updated = self
				.store
				.update_departments(company_id, &batch.to_update)
				.await?;
			info!("Updated {} departments for company {}", summary.updated, company_id);
		}
		summary.deleted = self.delete_departments(company_id, &batch.to_delete).await?;
		Ok(summary)
	}

	#[tracing::instrument(skip(self, users), fields(count = users.len()))]
	pub async fn apply_user_changes(&self, company_id: i64, users: Vec<User>) -> Result<MutationSummary> {
		let batch = classify_users(users);
		let mut summary = MutationSummary::default();
		if !batch.to_insert.is_empty() {
			summary.inserted = self.store.insert_users(&batch.to_insert).await?;
			info!("Inserted {} users for company {}", summary.inserted, company_id);
		}
		if !batch.to_update.is_empty() {
			summary.updated = self.store.update_users(company_id, &batch.to_update).await?;
			info!("Updated {} users for company {}", summary.updated, company_id);
		}
		summary.deleted = self.soft_delete_users(company_id, &batch.to_delete).await?;
		Ok(summary)
	}

	#[tracing::instrument(skip(self, members), fields(count = members.len()))]
	pub async fn apply_member_changes(&self, members: Vec<Member>) -> Result<MutationSummary> {
		let batch = classify_members(members);
		let mut summary = MutationSummary::default();
		if !batch.to_insert.is_empty() {
			summary.inserted = self.store.insert_members(&batch.to_insert).await?;
			info!("Inserted {} members", summary.inserted);
		}
		if !batch.to_update.is_empty() {
			summary.updated = self.store.update_members(&batch.to_update).await?;
			info!("Updated {} members", summary.updated);
		}
		summary.deleted = self.delete_members(&batch.to_delete).await?;
		Ok(summary)
	}

	pub async fn delete_codes(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let n = self.store.delete_codes(company_id, ids).await?;
		info!("Deleted {} organization codes for company {}", n, company_id);
		Ok(n)
	}

	pub async fn delete_departments(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let n = self.store.delete_departments(company_id, ids).await?;
		info!("Deleted {} departments for company {}", n, company_id);
		Ok(n)
	}

	/// Users are never removed; they are marked deleted as of now.
	pub async fn soft_delete_users(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let n = self.store.soft_delete_users(company_id, ids, Utc::now()).await?;
		info!("Marked {} users deleted for company {}", n, company_id);
		Ok(n)
	}

	pub async fn delete_members(&self, ids: &[i64]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let n = self.store.delete_members(ids).await?;
		info!("Deleted {} members", n);
		Ok(n)
	}
}
