use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DirectoryStore;
use crate::directory::{Department, Member, MutationTarget, OrganizationCode, User};

/// In-process directory replica. Rows are kept exactly as handed in, with
/// the mutation marker reset, so tests can compare them with payloads.
#[derive(Default)]
pub struct MemoryDirectory {
	tables: Mutex<Tables>,
	existence_queries: AtomicUsize,
}

#[derive(Default)]
struct Tables {
	codes: BTreeMap<i64, OrganizationCode>,
	departments: BTreeMap<i64, Department>,
	users: BTreeMap<i64, User>,
	members: BTreeMap<i64, Member>,
}

impl MemoryDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
		self.tables
			.lock()
			.map_err(|_| anyhow!("memory directory mutex poisoned"))
	}

	/// Number of batched existence lookups served so far.
	pub fn existence_queries(&self) -> usize {
		self.existence_queries.load(Ordering::SeqCst)
	}

	pub fn code(&self, id: i64) -> Option<OrganizationCode> {
		self.tables().ok()?.codes.get(&id).cloned()
	}

	pub fn department(&self, id: i64) -> Option<Department> {
		self.tables().ok()?.departments.get(&id).cloned()
	}

	pub fn user(&self, id: i64) -> Option<User> {
		self.tables().ok()?.users.get(&id).cloned()
	}

	pub fn member(&self, id: i64) -> Option<Member> {
		self.tables().ok()?.members.get(&id).cloned()
	}

	fn count_query(&self) {
		self.existence_queries.fetch_add(1, Ordering::SeqCst);
	}
}

fn settled<T: Clone>(row: &T, reset: impl FnOnce(&mut T)) -> T {
	let mut row = row.clone();
	reset(&mut row);
	row
}

fn present<T>(table: &BTreeMap<i64, T>, ids: &[i64], scoped: impl Fn(&T) -> bool) -> HashSet<i64> {
	ids.iter()
		.copied()
		.filter(|id| table.get(id).is_some_and(&scoped))
		.collect()
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
	async fn existing_code_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.count_query();
		let t = self.tables()?;
		Ok(present(&t.codes, ids, |c| c.company_id == company_id))
	}

	async fn existing_department_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.count_query();
		let t = self.tables()?;
		Ok(present(&t.departments, ids, |d| d.company_id == company_id))
	}

	async fn existing_user_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.count_query();
		let t = self.tables()?;
		Ok(present(&t.users, ids, |u| u.company_id == company_id))
	}

	async fn existing_member_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
		self.count_query();
		let t = self.tables()?;
		Ok(present(&t.members, ids, |_| true))
	}

	async fn code_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		let t = self.tables()?;
		Ok(t.codes
			.values()
			.filter(|c| c.company_id == company_id)
			.map(|c| c.id)
			.collect())
	}

	async fn department_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		let t = self.tables()?;
		Ok(t.departments
			.values()
			.filter(|d| d.company_id == company_id)
			.map(|d| d.id)
			.collect())
	}

	async fn user_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		let t = self.tables()?;
		Ok(t.users
			.values()
			.filter(|u| u.company_id == company_id)
			.map(|u| u.id)
			.collect())
	}

	async fn member_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		let t = self.tables()?;
		Ok(t.members
			.values()
			.filter(|m| {
				t.departments
					.get(&m.department_id)
					.is_some_and(|d| d.company_id == company_id)
					|| t.users
						.get(&m.user_id)
						.is_some_and(|u| u.company_id == company_id)
			})
			.map(|m| m.id)
			.collect())
	}

	async fn insert_codes(&self, codes: &[OrganizationCode]) -> Result<u64> {
		let mut t = self.tables()?;
		for c in codes {
			if t.codes.contains_key(&c.id) {
				return Err(anyhow!("organization_code {} already exists", c.id));
			}
			t.codes
				.insert(c.id, settled(c, |r| r.target = MutationTarget::Update));
		}
		Ok(codes.len() as u64)
	}

	async fn update_codes(&self, company_id: i64, codes: &[OrganizationCode]) -> Result<u64> {
		let mut t = self.tables()?;
		let mut n = 0;
		for c in codes {
			if let Some(row) = t.codes.get_mut(&c.id).filter(|r| r.company_id == company_id) {
				*row = settled(c, |r| r.target = MutationTarget::Update);
				n += 1;
			}
		}
		Ok(n)
	}

	async fn delete_codes(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		let mut t = self.tables()?;
		let before = t.codes.len();
		t.codes
			.retain(|id, c| !(c.company_id == company_id && ids.contains(id)));
		Ok((before - t.codes.len()) as u64)
	}

	async fn insert_departments(&self, departments: &[Department]) -> Result<u64> {
		let mut t = self.tables()?;
		for d in departments {
			if t.departments.contains_key(&d.id) {
				return Err(anyhow!("department {} already exists", d.id));
			}
			t.departments
				.insert(d.id, settled(d, |r| r.target = MutationTarget::Update));
		}
		Ok(departments.len() as u64)
	}

	async fn update_departments(&self, company_id: i64, departments: &[Department]) -> Result<u64> {
		let mut t = self.tables()?;
		let mut n = 0;
		for d in departments {
			if let Some(row) = t
				.departments
				.get_mut(&d.id)
				.filter(|r| r.company_id == company_id)
			{
				let kept_path = row.path.take();
				*row = settled(d, |r| r.target = MutationTarget::Update);
				if row.path.is_none() {
					row.path = kept_path;
				}
				n += 1;
			}
		}
		Ok(n)
	}

	async fn delete_departments(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		let mut t = self.tables()?;
		let doomed: HashSet<i64> = t
			.departments
			.values()
			.filter(|d| d.company_id == company_id && ids.contains(&d.id))
			.map(|d| d.id)
			.collect();
		t.members.retain(|_, m| !doomed.contains(&m.department_id));
		t.departments.retain(|id, _| !doomed.contains(id));
		Ok(doomed.len() as u64)
	}

	async fn insert_users(&self, users: &[User]) -> Result<u64> {
		let mut t = self.tables()?;
		for u in users {
			if t.users.contains_key(&u.id) {
				return Err(anyhow!("user {} already exists", u.id));
			}
			t.users
				.insert(u.id, settled(u, |r| r.target = MutationTarget::Update));
		}
		Ok(users.len() as u64)
	}

	async fn update_users(&self, company_id: i64, users: &[User]) -> Result<u64> {
		let mut t = self.tables()?;
		let mut n = 0;
		for u in users {
			if let Some(row) = t.users.get_mut(&u.id).filter(|r| r.company_id == company_id) {
				*row = settled(u, |r| r.target = MutationTarget::Update);
				n += 1;
			}
		}
		Ok(n)
	}

	async fn soft_delete_users(
		&self,
		company_id: i64,
		ids: &[i64],
		at: DateTime<Utc>,
	) -> Result<u64> {
		let mut t = self.tables()?;
		let mut n = 0;
		for id in ids {
			if let Some(u) = t
				.users
				.get_mut(id)
				.filter(|u| u.company_id == company_id && !u.is_deleted())
			{
				u.mark_as_deleted(at);
				n += 1;
			}
		}
		Ok(n)
	}

	async fn insert_members(&self, members: &[Member]) -> Result<u64> {
		let mut t = self.tables()?;
		for m in members {
			if t.members.contains_key(&m.id) {
				return Err(anyhow!("member {} already exists", m.id));
			}
			t.members
				.insert(m.id, settled(m, |r| r.target = MutationTarget::Update));
		}
		Ok(members.len() as u64)
	}

	async fn update_members(&self, members: &[Member]) -> Result<u64> {
		let mut t = self.tables()?;
		let mut n = 0;
		for m in members {
			if let Some(row) = t.members.get_mut(&m.id) {
				*row = settled(m, |r| r.target = MutationTarget::Update);
				n += 1;
			}
		}
		Ok(n)
	}

	async fn delete_members(&self, ids: &[i64]) -> Result<u64> {
		let mut t = self.tables()?;
		let before = t.members.len();
		t.members.retain(|id, _| !ids.contains(id));
		Ok((before - t.members.len()) as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn department_delete_cascades_members() {
		let store = MemoryDirectory::new();
		store
			.insert_departments(&[Department::new(1, 7), Department::new(2, 7)])
			.await
			.unwrap();
		store
			.insert_members(&[Member::new(100, 10, 1), Member::new(101, 11, 2)])
			.await
			.unwrap();

		assert_eq!(store.delete_departments(7, &[2]).await.unwrap(), 1);
		assert!(store.member(101).is_none());
		assert!(store.member(100).is_some());
		assert_eq!(store.member_ids(7).await.unwrap(), HashSet::from([100]));
	}

	#[tokio::test]
	async fn soft_delete_skips_already_deleted_users() {
		let store = MemoryDirectory::new();
		store.insert_users(&[User::new(12, 7)]).await.unwrap();
		let first = Utc::now();
		assert_eq!(store.soft_delete_users(7, &[12], first).await.unwrap(), 1);
		assert_eq!(
			store
				.soft_delete_users(7, &[12], first + chrono::Duration::seconds(5))
				.await
				.unwrap(),
			0
		);
		assert_eq!(store.user(12).unwrap().deleted_at, Some(first));
	}

	#[tokio::test]
	async fn existence_is_company_scoped() {
		let store = MemoryDirectory::new();
		store
			.insert_codes(&[OrganizationCode::new(1, 7), OrganizationCode::new(2, 8)])
			.await
			.unwrap();
		let found = store.existing_code_ids(7, &[1, 2, 3]).await.unwrap();
		assert_eq!(found, HashSet::from([1]));
		assert_eq!(store.existence_queries(), 1);
	}
}
