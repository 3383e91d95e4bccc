//! Domain functions, grouped by the classes they work on.

pub mod appointment;
pub mod appointment_plan;
pub mod charge_request;
pub mod chat;
pub mod child_profile;
pub mod image;
pub mod levels;
pub mod placement_test;
pub mod stage;
pub mod training;
pub mod user;
pub mod wallet;

use serde_json::{json, Value};

use crate::acl::Acl;
use crate::functions::FunctionRegistry;
use crate::store::{file_name, pointer, Document, StoredObject, WriteBatch};

/// Roles allowed to run administrative functions.
pub const ADMIN_ROLES: &[&str] = &["Admin", "SuperAdmin"];

/// ACL letting only `user_ids` and members of `roles` read the object.
/// Functions write through the data layer, so no one gets write access.
pub(crate) fn read_acl(user_ids: &[&str], roles: &[&str]) -> Acl {
    let mut acl = Acl::new();
    for user_id in user_ids {
        acl.set_read_access(user_id, true);
    }
    for role in roles {
        acl.set_role_read_access(role, true);
    }
    acl
}

pub fn register_all(registry: &mut FunctionRegistry) {
    user::register(registry);
    appointment_plan::register(registry);
    appointment::register(registry);
    wallet::register(registry);
    charge_request::register(registry);
    chat::register(registry);
    levels::register(registry);
    stage::register(registry);
    training::register(registry);
    placement_test::register(registry);
    child_profile::register(registry);
    image::register(registry);
}

pub(crate) fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// `{id, username}` for an optional user object.
pub(crate) fn user_summary(user: Option<&StoredObject>) -> Value {
    match user {
        Some(user) => json!({ "id": user.id, "username": user.str_field("username") }),
        None => Value::Null,
    }
}

/// Queue a notification for `user_id`. `links` are extra pointer fields
/// such as `appointment_id` or `chat_group_id`.
pub(crate) fn queue_notification(
    batch: &mut WriteBatch,
    user_id: &str,
    title: &str,
    body: &str,
    kind: &str,
    links: &[(&str, Value)],
) -> String {
    let mut data = doc(json!({
        "user_id": pointer("_User", user_id),
        "title": title,
        "body": body,
        "type": kind,
        "is_read": false,
    }));
    for (field, value) in links {
        data.insert(field.to_string(), value.clone());
    }
    batch.create_with_acl("Notifications", data, Some(read_acl(&[user_id], &[])))
}

/// One answer per question id, a later answer replacing an earlier one.
/// Keeps the order questions first appeared in. `None` when an entry has
/// no string `id_field`.
pub(crate) fn last_answers<'a>(answers: &'a [Value], id_field: &str) -> Option<Vec<(&'a str, &'a Value)>> {
    let mut out: Vec<(&str, &Value)> = Vec::with_capacity(answers.len());
    for answer in answers {
        let id = answer.get(id_field)?.as_str()?;
        match out.iter_mut().find(|(seen, _)| *seen == id) {
            Some(entry) => entry.1 = answer,
            None => out.push((id, answer)),
        }
    }
    Some(out)
}

/// URL of a File field, or null.
pub(crate) fn file_url(state: &crate::app::AppState, object: &StoredObject, field: &str) -> Value {
    object
        .get(field)
        .and_then(file_name)
        .map(|name| Value::String(state.files.file_location(name)))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_answers_replace_earlier_ones() {
        let answers = vec![
            json!({ "question_id": "q1", "answer": 1 }),
            json!({ "question_id": "q2", "answer": 2 }),
            json!({ "question_id": "q1", "answer": 3 }),
        ];
        let latest = last_answers(&answers, "question_id").unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].0, "q1");
        assert_eq!(latest[0].1["answer"], 3);
        assert_eq!(latest[1].0, "q2");

        assert!(last_answers(&[json!({ "answer": 1 })], "question_id").is_none());
    }

    #[test]
    fn read_acl_grants_nothing_but_reads() {
        let acl = read_acl(&["u1"], &["Admin"]);
        assert!(acl.can_read(Some("u1"), &[]));
        assert!(acl.can_read(Some("u9"), &["Admin".to_string()]));
        assert!(!acl.can_read(Some("u2"), &[]));
        assert!(!acl.can_read(None, &[]));
        assert!(!acl.can_write(Some("u1"), &[]));
    }
}
