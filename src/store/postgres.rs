use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::PgPool;

use super::DirectoryStore;
use crate::directory::{Department, Member, OrganizationCode, User};

/// Directory replica in Postgres. Bulk writes bind one array per column and
/// expand them with `UNNEST`, so each call is a single statement.
#[derive(Clone)]
pub struct PgDirectory {
	pool: PgPool,
}

impl PgDirectory {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn id_set(&self, sql: &str, scope: Option<i64>, ids: Option<&[i64]>) -> Result<HashSet<i64>> {
		let mut q = sqlx::query_scalar::<_, i64>(sql);
		if let Some(company_id) = scope {
			q = q.bind(company_id);
		}
		if let Some(ids) = ids {
			q = q.bind(ids.to_vec());
		}
		let rows = q
			.fetch_all(&self.pool)
			.await
			.with_context(|| format!("directory id query failed: {sql}"))?;
		Ok(rows.into_iter().collect())
	}
}

fn strings<T>(rows: &[T], f: impl Fn(&T) -> Option<&str>) -> Vec<Option<String>> {
	rows.iter().map(|r| f(r).map(str::to_string)).collect()
}

#[async_trait]
impl DirectoryStore for PgDirectory {
	async fn existing_code_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM organization_code WHERE company_id = $1 AND id = ANY($2)",
			Some(company_id),
			Some(ids),
		)
		.await
	}

	async fn existing_department_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM department WHERE company_id = $1 AND id = ANY($2)",
			Some(company_id),
			Some(ids),
		)
		.await
	}

	async fn existing_user_ids(&self, company_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM \"user\" WHERE company_id = $1 AND id = ANY($2)",
			Some(company_id),
			Some(ids),
		)
		.await
	}

	async fn existing_member_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
		self.id_set("SELECT id FROM member WHERE id = ANY($1)", None, Some(ids))
			.await
	}

	async fn code_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM organization_code WHERE company_id = $1",
			Some(company_id),
			None,
		)
		.await
	}

	async fn department_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM department WHERE company_id = $1",
			Some(company_id),
			None,
		)
		.await
	}

	async fn user_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT id FROM \"user\" WHERE company_id = $1",
			Some(company_id),
			None,
		)
		.await
	}

	async fn member_ids(&self, company_id: i64) -> Result<HashSet<i64>> {
		self.id_set(
			"SELECT m.id FROM member m \
			 WHERE m.department_id IN (SELECT id FROM department WHERE company_id = $1) \
			    OR m.user_id IN (SELECT id FROM \"user\" WHERE company_id = $1)",
			Some(company_id),
			None,
		)
		.await
	}

	async fn insert_codes(&self, codes: &[OrganizationCode]) -> Result<u64> {
		let res = sqlx::query(
			"INSERT INTO organization_code (id, company_id, name, code, type, sort_order) \
			 SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[], $5::text[], $6::int[])",
		)
		.bind(codes.iter().map(|c| c.id).collect::<Vec<_>>())
		.bind(codes.iter().map(|c| c.company_id).collect::<Vec<_>>())
		.bind(strings(codes, |c| c.name.as_deref()))
		.bind(strings(codes, |c| c.code.as_deref()))
		.bind(strings(codes, |c| c.kind.map(|k| k.as_str())))
		.bind(codes.iter().map(|c| c.sort_order).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk insert organization_code failed")?;
		debug!("Inserted {} organization codes", res.rows_affected());
		Ok(res.rows_affected())
	}

	async fn update_codes(&self, company_id: i64, codes: &[OrganizationCode]) -> Result<u64> {
		let res = sqlx::query(
			"UPDATE organization_code AS o SET name = u.name, code = u.code, type = u.type, \
			 sort_order = u.sort_order \
			 FROM UNNEST($2::bigint[], $3::text[], $4::text[], $5::text[], $6::int[]) \
			 AS u(id, name, code, type, sort_order) \
			 WHERE o.id = u.id AND o.company_id = $1",
		)
		.bind(company_id)
		.bind(codes.iter().map(|c| c.id).collect::<Vec<_>>())
		.bind(strings(codes, |c| c.name.as_deref()))
		.bind(strings(codes, |c| c.code.as_deref()))
		.bind(strings(codes, |c| c.kind.map(|k| k.as_str())))
		.bind(codes.iter().map(|c| c.sort_order).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk update organization_code failed")?;
		Ok(res.rows_affected())
	}

	async fn delete_codes(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		let res = sqlx::query("DELETE FROM organization_code WHERE company_id = $1 AND id = ANY($2)")
			.bind(company_id)
			.bind(ids.to_vec())
			.execute(&self.pool)
			.await
			.context("bulk delete organization_code failed")?;
		Ok(res.rows_affected())
	}

	async fn insert_departments(&self, departments: &[Department]) -> Result<u64> {
		let res = sqlx::query(
			"INSERT INTO department (id, company_id, name, parent_id, code, alias, email, status, \
			 sort_order, department_path, deleted_at) \
			 SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::bigint[], $5::text[], \
			 $6::text[], $7::text[], $8::text[], $9::int[], $10::text[], $11::timestamptz[])",
		)
		.bind(departments.iter().map(|d| d.id).collect::<Vec<_>>())
		.bind(departments.iter().map(|d| d.company_id).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.name.as_deref()))
		.bind(departments.iter().map(|d| d.parent_id).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.code.as_deref()))
		.bind(strings(departments, |d| d.alias.as_deref()))
		.bind(strings(departments, |d| d.email.as_deref()))
		.bind(departments.iter().map(|d| d.status.as_str()).collect::<Vec<_>>())
		.bind(departments.iter().map(|d| d.sort_order).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.path.as_deref()))
		.bind(departments.iter().map(|d| d.deleted_at).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk insert department failed")?;
		debug!("Inserted {} departments", res.rows_affected());
		Ok(res.rows_affected())
	}

	async fn update_departments(&self, company_id: i64, departments: &[Department]) -> Result<u64> {
		// A missing path keeps the stored one; child paths are maintained elsewhere.
		let res = sqlx::query(
			"UPDATE department AS d SET name = u.name, parent_id = u.parent_id, code = u.code, \
			 alias = u.alias, email = u.email, status = u.status, sort_order = u.sort_order, \
			 department_path = COALESCE(u.department_path, d.department_path), deleted_at = u.deleted_at \
			 FROM UNNEST($2::bigint[], $3::text[], $4::bigint[], $5::text[], $6::text[], $7::text[], \
			 $8::text[], $9::int[], $10::text[], $11::timestamptz[]) \
			 AS u(id, name, parent_id, code, alias, email, status, sort_order, department_path, deleted_at) \
			 WHERE d.id = u.id AND d.company_id = $1",
		)
		.bind(company_id)
		.bind(departments.iter().map(|d| d.id).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.name.as_deref()))
		.bind(departments.iter().map(|d| d.parent_id).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.code.as_deref()))
		.bind(strings(departments, |d| d.alias.as_deref()))
		.bind(strings(departments, |d| d.email.as_deref()))
		.bind(departments.iter().map(|d| d.status.as_str()).collect::<Vec<_>>())
		.bind(departments.iter().map(|d| d.sort_order).collect::<Vec<_>>())
		.bind(strings(departments, |d| d.path.as_deref()))
		.bind(departments.iter().map(|d| d.deleted_at).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk update department failed")?;
		Ok(res.rows_affected())
	}

	async fn delete_departments(&self, company_id: i64, ids: &[i64]) -> Result<u64> {
		let mut tx = self
			.pool
			.begin()
			.await
			.context("failed to open department delete transaction")?;

		let members = sqlx::query(
			"DELETE FROM member WHERE department_id IN \
			 (SELECT id FROM department WHERE company_id = $1 AND id = ANY($2))",
		)
		.bind(company_id)
		.bind(ids.to_vec())
		.execute(&mut *tx)
		.await
		.context("member cascade for department delete failed")?;

		let res = sqlx::query("DELETE FROM department WHERE company_id = $1 AND id = ANY($2)")
			.bind(company_id)
			.bind(ids.to_vec())
			.execute(&mut *tx)
			.await
			.context("bulk delete department failed")?;

		tx.commit()
			.await
			.context("failed to commit department delete")?;
		debug!(
			"Deleted {} departments and {} member rows",
			res.rows_affected(),
			members.rows_affected()
		);
		Ok(res.rows_affected())
	}

	async fn insert_users(&self, users: &[User]) -> Result<u64> {
		let res = sqlx::query(
			"INSERT INTO \"user\" (id, company_id, name, login_id, status, locale, employee_number, \
			 mobile_number, profile_image_path, grade_code_id, position_code_id, dormant_at, deleted_at) \
			 SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::text[], $5::text[], \
			 $6::text[], $7::text[], $8::text[], $9::text[], $10::bigint[], $11::bigint[], \
			 $12::timestamptz[], $13::timestamptz[])",
		)
		.bind(users.iter().map(|u| u.id).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.company_id).collect::<Vec<_>>())
		.bind(strings(users, |u| u.name.as_deref()))
		.bind(strings(users, |u| u.login_id.as_deref()))
		.bind(users.iter().map(|u| u.status.as_str()).collect::<Vec<_>>())
		.bind(strings(users, |u| u.locale.as_deref()))
		.bind(strings(users, |u| u.employee_number.as_deref()))
		.bind(strings(users, |u| u.mobile_number.as_deref()))
		.bind(strings(users, |u| u.profile_image_path.as_deref()))
		.bind(users.iter().map(|u| u.grade_code_id).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.position_code_id).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.dormant_at).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.deleted_at).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk insert user failed")?;
		debug!("Inserted {} users", res.rows_affected());
		Ok(res.rows_affected())
	}

	async fn update_users(&self, company_id: i64, users: &[User]) -> Result<u64> {
		let res = sqlx::query(
			"UPDATE \"user\" AS t SET name = u.name, login_id = u.login_id, status = u.status, \
			 locale = u.locale, employee_number = u.employee_number, mobile_number = u.mobile_number, \
			 profile_image_path = u.profile_image_path, grade_code_id = u.grade_code_id, \
			 position_code_id = u.position_code_id, dormant_at = u.dormant_at, deleted_at = u.deleted_at \
			 FROM UNNEST($2::bigint[], $3::text[], $4::text[], $5::text[], $6::text[], $7::text[], \
			 $8::text[], $9::text[], $10::bigint[], $11::bigint[], $12::timestamptz[], $13::timestamptz[]) \
			 AS u(id, name, login_id, status, locale, employee_number, mobile_number, profile_image_path, \
			 grade_code_id, position_code_id, dormant_at, deleted_at) \
			 WHERE t.id = u.id AND t.company_id = $1",
		)
		.bind(company_id)
		.bind(users.iter().map(|u| u.id).collect::<Vec<_>>())
		.bind(strings(users, |u| u.name.as_deref()))
		.bind(strings(users, |u| u.login_id.as_deref()))
		.bind(users.iter().map(|u| u.status.as_str()).collect::<Vec<_>>())
		.bind(strings(users, |u| u.locale.as_deref()))
		.bind(strings(users, |u| u.employee_number.as_deref()))
		.bind(strings(users, |u| u.mobile_number.as_deref()))
		.bind(strings(users, |u| u.profile_image_path.as_deref()))
		.bind(users.iter().map(|u| u.grade_code_id).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.position_code_id).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.dormant_at).collect::<Vec<_>>())
		.bind(users.iter().map(|u| u.deleted_at).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk update user failed")?;
		Ok(res.rows_affected())
	}

	async fn soft_delete_users(
		&self,
		company_id: i64,
		ids: &[i64],
		at: DateTime<Utc>,
	) -> Result<u64> {
		let res = sqlx::query(
			"UPDATE \"user\" SET status = 'DELETE', deleted_at = $3 \
			 WHERE company_id = $1 AND id = ANY($2) AND status <> 'DELETE'",
		)
		.bind(company_id)
		.bind(ids.to_vec())
		.bind(at)
		.execute(&self.pool)
		.await
		.context("bulk soft delete user failed")?;
		Ok(res.rows_affected())
	}

	async fn insert_members(&self, members: &[Member]) -> Result<u64> {
		let res = sqlx::query(
			"INSERT INTO member (id, user_id, department_id, duty_code_id, member_type, sort_order, \
			 department_order) \
			 SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[], $5::text[], \
			 $6::int[], $7::int[])",
		)
		.bind(members.iter().map(|m| m.id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.user_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.department_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.duty_code_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.member_type.as_str()).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.sort_order).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.department_order).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk insert member failed")?;
		debug!("Inserted {} members", res.rows_affected());
		Ok(res.rows_affected())
	}

	async fn update_members(&self, members: &[Member]) -> Result<u64> {
		let res = sqlx::query(
			"UPDATE member AS m SET user_id = u.user_id, department_id = u.department_id, \
			 duty_code_id = u.duty_code_id, member_type = u.member_type, sort_order = u.sort_order, \
			 department_order = u.department_order \
			 FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[], $5::text[], \
			 $6::int[], $7::int[]) \
			 AS u(id, user_id, department_id, duty_code_id, member_type, sort_order, department_order) \
			 WHERE m.id = u.id",
		)
		.bind(members.iter().map(|m| m.id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.user_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.department_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.duty_code_id).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.member_type.as_str()).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.sort_order).collect::<Vec<_>>())
		.bind(members.iter().map(|m| m.department_order).collect::<Vec<_>>())
		.execute(&self.pool)
		.await
		.context("bulk update member failed")?;
		Ok(res.rows_affected())
	}

	async fn delete_members(&self, ids: &[i64]) -> Result<u64> {
		let res = sqlx::query("DELETE FROM member WHERE id = ANY($1)")
			.bind(ids.to_vec())
			.execute(&self.pool)
			.await
			.context("bulk delete member failed")?;
		Ok(res.rows_affected())
	}
}
