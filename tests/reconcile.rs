mod common;

use std::sync::Arc;

use common::{ACME_ID, GLOBEX_ID, ScriptedProvisioning};
use vanopticon_mimir::company::StaticCompanyResolver;
use vanopticon_mimir::directory::{Department, Member, OrganizationCode, User, UserStatus};
use vanopticon_mimir::observability::MetricsRegistry;
use vanopticon_mimir::provision::SnapshotPayload;
use vanopticon_mimir::store::MemoryDirectory;
use vanopticon_mimir::sync::{ReconcileReport, SnapshotSyncer};

fn syncer() -> (Arc<MemoryDirectory>, SnapshotSyncer) {
	let store = Arc::new(MemoryDirectory::new());
	let syncer = SnapshotSyncer::new(
		Arc::new(ScriptedProvisioning::default()),
		Arc::new(StaticCompanyResolver::new([("acme", ACME_ID)])),
		store.clone(),
		Arc::new(MetricsRegistry::try_new().expect("metrics")),
	);
	(store, syncer)
}

fn depts(ids: &[i64]) -> Vec<Department> {
	ids.iter().map(|&id| Department::new(id, 0)).collect()
}

fn users(ids: &[i64]) -> Vec<User> {
	ids.iter().map(|&id| User::new(id, 0)).collect()
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn departments_converge_and_cascade_members() {
	let (store, syncer) = syncer();
	syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				departments: depts(&[1, 2, 3]),
				members: vec![Member::new(10, 100, 1), Member::new(30, 100, 3)],
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert!(store.member(30).is_some());

	// no members in the second snapshot: department 3 takes member 30 with it
	let report = syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				departments: depts(&[1, 2, 4]),
				..Default::default()
			},
		)
		.await
		.unwrap();

	assert_eq!(report.departments.inserted, 1);
	assert_eq!(report.departments.updated, 2);
	assert_eq!(report.departments.deleted, 1);
	assert!(store.department(3).is_none());
	assert!(store.department(4).is_some());
	assert!(store.member(30).is_none());
	assert!(store.member(10).is_some());
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn members_missing_from_snapshot_are_removed() {
	let (store, syncer) = syncer();
	let seed = SnapshotPayload {
		departments: depts(&[1]),
		members: vec![Member::new(10, 100, 1), Member::new(11, 101, 1)],
		..Default::default()
	};
	syncer.apply(ACME_ID, seed).await.unwrap();

	let report = syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				members: vec![Member::new(11, 101, 1), Member::new(12, 102, 1)],
				..Default::default()
			},
		)
		.await
		.unwrap();

	assert_eq!(report.members.inserted, 1);
	assert_eq!(report.members.updated, 1);
	assert_eq!(report.members.deleted, 1);
	assert!(store.member(10).is_none());
	// departments were absent from this snapshot and stay untouched
	assert!(store.department(1).is_some());
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn user_soft_delete_is_idempotent() {
	let (store, syncer) = syncer();
	let with = |ids: &[i64]| SnapshotPayload {
		users: users(ids),
		..Default::default()
	};

	syncer.apply(ACME_ID, with(&[100, 101])).await.unwrap();
	let report = syncer.apply(ACME_ID, with(&[100])).await.unwrap();
	assert_eq!(report.users.updated, 1);
	assert_eq!(report.users.deleted, 1);

	let gone = store.user(101).expect("soft-deleted users are kept");
	assert_eq!(gone.status, UserStatus::Delete);
	let deleted_at = gone.deleted_at.expect("deletion time recorded");

	let again = syncer.apply(ACME_ID, with(&[100])).await.unwrap();
	assert_eq!(again.users.deleted, 0);
	assert_eq!(store.user(101).unwrap().deleted_at, Some(deleted_at));
	assert_eq!(store.user(100).unwrap().status, UserStatus::Normal);
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn other_companies_are_never_touched() {
	let (store, syncer) = syncer();
	syncer
		.reconcile(
			GLOBEX_ID,
			vec![OrganizationCode::new(500, 0)],
			depts(&[50]),
			users(&[5000]),
			vec![Member::new(900, 5000, 50)],
		)
		.await
		.unwrap();

	syncer
		.reconcile(
			ACME_ID,
			vec![OrganizationCode::new(1, 0)],
			depts(&[1]),
			users(&[100]),
			vec![Member::new(10, 100, 1)],
		)
		.await
		.unwrap();

	assert_eq!(store.code(500).unwrap().company_id, GLOBEX_ID);
	assert!(store.department(50).is_some());
	assert_eq!(store.user(5000).unwrap().status, UserStatus::Normal);
	assert!(store.member(900).is_some());
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn one_existence_query_per_kind() {
	let (store, syncer) = syncer();
	let codes: Vec<OrganizationCode> = (1..=50).map(|id| OrganizationCode::new(id, 0)).collect();
	let departments = depts(&(1..=50).collect::<Vec<_>>());
	let people = users(&(100..150).collect::<Vec<_>>());
	let members = (0..50).map(|i| Member::new(1000 + i, 100 + i, 1 + i)).collect();

	syncer
		.reconcile(ACME_ID, codes, departments, people, members)
		.await
		.unwrap();
	assert_eq!(store.existence_queries(), 4);
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn empty_snapshot_leaves_directory_alone() {
	let (store, syncer) = syncer();
	syncer
		.reconcile(
			ACME_ID,
			vec![OrganizationCode::new(1, 0)],
			depts(&[1]),
			users(&[100]),
			vec![Member::new(10, 100, 1)],
		)
		.await
		.unwrap();

	let report = syncer.apply(ACME_ID, SnapshotPayload::default()).await.unwrap();
	assert_eq!(report, ReconcileReport::default());
	assert!(store.code(1).is_some());
	assert!(store.department(1).is_some());
	assert_eq!(store.user(100).unwrap().status, UserStatus::Normal);
	assert!(store.member(10).is_some());
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn child_department_keeps_stored_path() {
	let (store, syncer) = syncer();
	let mut child = Department::new(2, 0);
	child.parent_id = Some(1);
	child.path = Some("1.2.".to_string());
	syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				departments: vec![Department::new(1, 0), child],
				..Default::default()
			},
		)
		.await
		.unwrap();

	let mut renamed = Department::new(2, 0);
	renamed.parent_id = Some(1);
	renamed.name = Some("Platform".to_string());
	syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				departments: vec![Department::new(1, 0), renamed],
				..Default::default()
			},
		)
		.await
		.unwrap();

	let stored = store.department(2).unwrap();
	assert_eq!(stored.name.as_deref(), Some("Platform"));
	assert_eq!(stored.path.as_deref(), Some("1.2."));
	assert_eq!(store.department(1).unwrap().path.as_deref(), Some("1."));
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn member_without_local_department_is_still_reconciled() {
	let (store, syncer) = syncer();
	// department 77 never arrives; the member is tied to acme through its user
	syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				users: users(&[100]),
				members: vec![Member::new(10, 100, 77)],
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert!(store.member(10).is_some());

	let report = syncer
		.apply(
			ACME_ID,
			SnapshotPayload {
				members: vec![Member::new(11, 100, 77)],
				..Default::default()
			},
		)
		.await
		.unwrap();

	assert_eq!(report.members.inserted, 1);
	assert_eq!(report.members.deleted, 1);
	assert!(store.member(10).is_none());
	assert!(store.member(11).is_some());
}
