//! Directory entities replicated from the provisioning service.
//!
//! The same structs serve as the wire payload (camelCase JSON from the remote
//! snapshot endpoint) and as the rows handed to the directory store. The
//! `target` marker is local bookkeeping and never crosses the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// What the bulk mutation engine should do with a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MutationTarget {
	#[default]
	Update,
	Insert,
	Delete,
}

macro_rules! lenient_enum {
	(
		$(#[$meta:meta])*
		$name:ident, fallback = $fallback:ident {
			$($variant:ident => ($upper:literal, $code:literal)),+ $(,)?
		}
	) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
		pub enum $name {
			$($variant),+
		}

		impl $name {
			/// Upper-case name stored in the database.
			pub fn as_str(&self) -> &'static str {
				match self {
					$(Self::$variant => $upper),+
				}
			}

			/// Lower-case code used by some provisioning payloads.
			pub fn code(&self) -> &'static str {
				match self {
					$(Self::$variant => $code),+
				}
			}

			/// Case-insensitive match on the name or the code.
			pub fn parse(s: &str) -> Option<Self> {
				let s = s.trim();
				$(
					if s.eq_ignore_ascii_case($upper) || s.eq_ignore_ascii_case($code) {
						return Some(Self::$variant);
					}
				)+
				None
			}

			/// Parse, substituting the fallback for blank or unknown input.
			pub fn parse_lenient(s: &str) -> Self {
				Self::parse(s).unwrap_or(Self::$fallback)
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::$fallback
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				f.write_str(self.as_str())
			}
		}

		impl Serialize for $name {
			fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
				serializer.serialize_str(self.as_str())
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
				let raw = Option::<String>::deserialize(deserializer)?;
				Ok(raw.map(|s| Self::parse_lenient(&s)).unwrap_or_default())
			}
		}
	};
}

lenient_enum! {
	/// Kind of organization code. The fallback is only used for
	/// non-optional contexts; payload decoding maps unknown kinds to `None`.
	OrganizationType, fallback = Grade {
		Grade => ("GRADE", "grade"),
		Position => ("POSITION", "position"),
		UserGroup => ("USER_GROUP", "user_group"),
		Duty => ("DUTY", "duty"),
	}
}

lenient_enum! {
	DepartmentStatus, fallback = Active {
		Active => ("ACTIVE", "active"),
		TemporarilyDeleted => ("TEMPORARILY_DELETED", "temporarily_deleted"),
		PermanentlyDeleted => ("PERMANENTLY_DELETED", "permanently_deleted"),
	}
}

lenient_enum! {
	UserStatus, fallback = Normal {
		Unset => ("NONE", "none"),
		Normal => ("NORMAL", "normal"),
		Dormant => ("DORMANT", "dormant"),
		Stop => ("STOP", "stop"),
		Delete => ("DELETE", "delete"),
	}
}

lenient_enum! {
	MemberType, fallback = TeamMember {
		DepartmentHead => ("DEPARTMENT_HEAD", "department_head"),
		AssistantHead => ("ASSISTANT_HEAD", "assistant_head"),
		TeamMember => ("TEAM_MEMBER", "team_member"),
	}
}

fn organization_type_opt<'de, D: Deserializer<'de>>(
	deserializer: D,
) -> Result<Option<OrganizationType>, D::Error> {
	let raw = Option::<String>::deserialize(deserializer)?;
	Ok(raw.as_deref().and_then(OrganizationType::parse))
}

fn default_sort_order() -> i32 {
	1
}

fn default_locale() -> Option<String> {
	Some("ko".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationCode {
	pub id: i64,
	#[serde(default)]
	pub company_id: i64,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub code: Option<String>,
	#[serde(rename = "type", default, deserialize_with = "organization_type_opt")]
	pub kind: Option<OrganizationType>,
	#[serde(default = "default_sort_order")]
	pub sort_order: i32,
	#[serde(skip)]
	pub target: MutationTarget,
}

impl OrganizationCode {
	pub fn new(id: i64, company_id: i64) -> Self {
		Self {
			id,
			company_id,
			name: None,
			code: None,
			kind: None,
			sort_order: default_sort_order(),
			target: MutationTarget::Insert,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
	pub id: i64,
	#[serde(default)]
	pub company_id: i64,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub parent_id: Option<i64>,
	#[serde(default)]
	pub code: Option<String>,
	#[serde(default)]
	pub alias: Option<String>,
	#[serde(default)]
	pub email: Option<String>,
	#[serde(default)]
	pub status: DepartmentStatus,
	#[serde(default = "default_sort_order")]
	pub sort_order: i32,
	#[serde(default, alias = "departmentPath")]
	pub path: Option<String>,
	#[serde(default)]
	pub deleted_at: Option<DateTime<Utc>>,
	#[serde(skip)]
	pub target: MutationTarget,
}

impl Department {
	pub fn new(id: i64, company_id: i64) -> Self {
		Self {
			id,
			company_id,
			name: None,
			parent_id: None,
			code: None,
			alias: None,
			email: None,
			status: DepartmentStatus::Active,
			sort_order: default_sort_order(),
			path: None,
			deleted_at: None,
			target: MutationTarget::Insert,
		}
	}

	pub fn is_root(&self) -> bool {
		self.parent_id.is_none()
	}

	/// Recompute the materialized path from `(id, parent_id)`. A supplied
	/// path on a non-root department is kept as-is.
	pub fn refresh_path(&mut self) {
		if let Some(path) = derive_path(self.id, self.parent_id) {
			self.path = Some(path);
		}
	}
}

/// Materialized path for a department. Roots are seeded from their own id;
/// a child's path depends on its ancestors and is not derivable here.
pub fn derive_path(id: i64, parent_id: Option<i64>) -> Option<String> {
	match parent_id {
		None => Some(format!("{id}.")),
		Some(_) => None,
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub id: i64,
	#[serde(default)]
	pub company_id: i64,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub login_id: Option<String>,
	#[serde(default)]
	pub status: UserStatus,
	#[serde(default = "default_locale")]
	pub locale: Option<String>,
	#[serde(default)]
	pub employee_number: Option<String>,
	#[serde(default)]
	pub mobile_number: Option<String>,
	#[serde(default)]
	pub profile_image_path: Option<String>,
	#[serde(default)]
	pub grade_code_id: Option<i64>,
	#[serde(default)]
	pub position_code_id: Option<i64>,
	#[serde(default)]
	pub dormant_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub deleted_at: Option<DateTime<Utc>>,
	#[serde(skip)]
	pub target: MutationTarget,
}

impl User {
	pub fn new(id: i64, company_id: i64) -> Self {
		Self {
			id,
			company_id,
			name: None,
			login_id: None,
			status: UserStatus::Normal,
			locale: default_locale(),
			employee_number: None,
			mobile_number: None,
			profile_image_path: None,
			grade_code_id: None,
			position_code_id: None,
			dormant_at: None,
			deleted_at: None,
			target: MutationTarget::Insert,
		}
	}

	pub fn is_deleted(&self) -> bool {
		self.status == UserStatus::Delete
	}

	/// Soft delete. Already-deleted users keep their original `deleted_at`.
	pub fn mark_as_deleted(&mut self, now: DateTime<Utc>) {
		if self.is_deleted() {
			return;
		}
		self.status = UserStatus::Delete;
		self.deleted_at = Some(now);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
	pub id: i64,
	pub user_id: i64,
	pub department_id: i64,
	#[serde(default)]
	pub duty_code_id: Option<i64>,
	#[serde(default)]
	pub member_type: MemberType,
	#[serde(default = "default_sort_order")]
	pub sort_order: i32,
	#[serde(default = "default_sort_order")]
	pub department_order: i32,
	#[serde(skip)]
	pub target: MutationTarget,
}

impl Member {
	pub fn new(id: i64, user_id: i64, department_id: i64) -> Self {
		Self {
			id,
			user_id,
			department_id,
			duty_code_id: None,
			member_type: MemberType::TeamMember,
			sort_order: default_sort_order(),
			department_order: default_sort_order(),
			target: MutationTarget::Insert,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn root_department_path_is_seeded_from_id() {
		assert_eq!(derive_path(42, None).as_deref(), Some("42."));
		assert_eq!(derive_path(42, Some(7)), None);

		let mut child = Department::new(9, 1);
		child.parent_id = Some(3);
		child.path = Some("3.9.".to_string());
		child.refresh_path();
		assert_eq!(child.path.as_deref(), Some("3.9."));
	}

	#[test]
	fn enums_parse_names_and_codes() {
		assert_eq!(MemberType::parse("department_head"), Some(MemberType::DepartmentHead));
		assert_eq!(MemberType::parse("ASSISTANT_HEAD"), Some(MemberType::AssistantHead));
		assert_eq!(MemberType::parse_lenient(""), MemberType::TeamMember);
		assert_eq!(UserStatus::parse_lenient("whatever"), UserStatus::Normal);
		assert_eq!(DepartmentStatus::parse_lenient("nope"), DepartmentStatus::Active);
		assert_eq!(OrganizationType::parse("User_Group"), Some(OrganizationType::UserGroup));
	}

	#[test]
	fn snapshot_payload_decodes_with_defaults() {
		let json = r#"{
			"id": 5,
			"name": "Lead",
			"type": "unknown-kind"
		}"#;
		let code: OrganizationCode = serde_json::from_str(json).unwrap();
		assert_eq!(code.kind, None);
		assert_eq!(code.sort_order, 1);
		assert_eq!(code.target, MutationTarget::Update);

		let json = r#"{"id": 10, "loginId": "kim", "status": null}"#;
		let user: User = serde_json::from_str(json).unwrap();
		assert_eq!(user.status, UserStatus::Normal);
		assert_eq!(user.locale.as_deref(), Some("ko"));

		let json = r#"{"id": 1, "userId": 10, "departmentId": 2, "memberType": "assistant_head"}"#;
		let member: Member = serde_json::from_str(json).unwrap();
		assert_eq!(member.member_type, MemberType::AssistantHead);
		assert_eq!(member.department_order, 1);
	}

	#[test]
	fn soft_delete_keeps_first_timestamp() {
		let mut user = User::new(12, 1);
		let first = Utc::now();
		user.mark_as_deleted(first);
		user.mark_as_deleted(first + chrono::Duration::seconds(60));
		assert!(user.is_deleted());
		assert_eq!(user.deleted_at, Some(first));
	}
}
