//! Local directory store: the relational replica of codes, departments,
//! users and memberships.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::directory::{Department, Member, OrganizationCode, User};

pub use memory::MemoryDirectory;
pub use postgres::PgDirectory;

/// Storage seam used by the bulk mutation engine and the reconciler.
///
/// Existence checks take the full id list of a batch and answer with one
/// round trip. Codes, departments and users are scoped by company; member
/// ids are global and a member belongs to the company of its department or
/// of its user.
/// Every write returns the number of rows it touched.
#[async_trait]
pub trait DirectoryStore: Send + Sync + 'static {
	async fn existing_code_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>>;
	async fn existing_department_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>>;
	async fn existing_user_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>>;
	async fn existing_member_ids(&self, ids: &[i64]) -> Result<HashSet<i64>>;

	async fn code_ids(&self, company_id: i64) -> Result<HashSet<i64>>;
	async fn department_ids(&self, company_id: i64) -> Result<HashSet<i64>>;
	/// Every user row of the company, soft-deleted ones included.
	async fn user_ids(&self, company_id: i64) -> Result<HashSet<i64>>;
	/// Members whose department or user belongs to the company.
	async fn member_ids(&self, company_id: i64) -> Result<HashSet<i64>>;

	async fn insert_codes(&self, codes: &[OrganizationCode]) -> Result<u64>;
	async fn update_codes(&self, company_id: i64, codes: &[OrganizationCode]) -> Result<u64>;
	async fn delete_codes(&self, company_id: i64, ids: &[i64]) -> Result<u64>;

	async fn insert_departments(&self, departments: &[Department]) -> Result<u64>;
	async fn update_departments(&self, company_id: i64, departments: &[Department]) -> Result<u64>;
	/// Hard delete. Member rows referencing the departments go first, in
	/// the same unit of work.
	async fn delete_departments(&self, company_id: i64, ids: &[i64]) -> Result<u64>;

	async fn insert_users(&self, users: &[User]) -> Result<u64>;
	async fn update_users(&self, company_id: i64, users: &[User]) -> Result<u64>;
	/// Soft delete: `status = DELETE`, `deleted_at = at`. Users already
	/// deleted are left untouched.
	async fn soft_delete_users(&self, company_id: i64, ids: &[i64], at: DateTime<Utc>)
	-> Result<u64>;

	async fn insert_members(&self, members: &[Member]) -> Result<u64>;
	async fn update_members(&self, members: &[Member]) -> Result<u64>;
	async fn delete_members(&self, ids: &[i64]) -> Result<u64>;
}
