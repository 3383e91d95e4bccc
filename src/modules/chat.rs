//! Chat groups tied to appointments, their messages and read receipts.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, queue_notification, read_acl, user_summary};
use crate::store::{date_value, iso_timestamp, pointer, Query, StoredObject, WriteBatch};

const MESSAGE_PAGE: usize = 100;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "createChatGroupForAppointment",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("appointment_id").required()),
        create_chat_group_for_appointment,
    );
    registry.register(
        "sendChatMessage",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("chat_group_id").required())
            .param(ParamRule::string("message").required())
            .param(ParamRule::string("child_id")),
        send_chat_message,
    );
    registry.register(
        "getChatMessages",
        FunctionConfig::methods(&[axum::http::Method::GET, axum::http::Method::POST])
            .require_user()
            .param(ParamRule::string("chat_group_id").required()),
        get_chat_messages,
    );
    registry.register(
        "markMessageAsRead",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("chat_message_id").required()),
        mark_message_as_read,
    );
    registry.register(
        "getUserChatGroups",
        FunctionConfig::get().require_user(),
        get_user_chat_groups,
    );
}

/// Queue a chat group for an appointment with its requester and provider as
/// participants. Returns the group id.
pub(crate) fn queue_chat_group(batch: &mut WriteBatch, appointment: &StoredObject) -> String {
    let mut group = doc(json!({
        "appointment_id": appointment.pointer(),
        "chat_status": "active",
    }));
    if let Some(child) = appointment.get("child_id") {
        group.insert("child_id".to_string(), child.clone());
    }
    let parties: Vec<&str> = ["provider_id", "user_id"]
        .into_iter()
        .filter_map(|field| appointment.pointer_id(field))
        .collect();
    let group_id = batch.create_with_acl("ChatGroup", group, Some(read_acl(&parties, &[])));

    for user_id in &parties {
        batch.create_with_acl(
            "ChatGroupParticipants",
            doc(json!({
                "chat_group_id": pointer("ChatGroup", &group_id),
                "user_id": pointer("_User", user_id),
            })),
            Some(read_acl(&parties, &[])),
        );
    }
    group_id
}

pub(crate) async fn group_for_appointment(
    state: &AppState,
    appointment_id: &str,
) -> Result<Option<StoredObject>, ApiError> {
    state
        .data
        .first(Query::new("ChatGroup").equal_to("appointment_id", pointer("Appointment", appointment_id)))
        .await
}

fn is_party(appointment: &StoredObject, user_id: &str) -> bool {
    appointment.pointer_id("user_id") == Some(user_id) || appointment.pointer_id("provider_id") == Some(user_id)
}

async fn is_participant(state: &AppState, group: &StoredObject, user_id: &str) -> Result<bool, ApiError> {
    let count = state
        .data
        .count(
            &Query::new("ChatGroupParticipants")
                .equal_to("chat_group_id", group.pointer())
                .equal_to("user_id", pointer("_User", user_id)),
        )
        .await?;
    Ok(count > 0)
}

async fn participant_group(state: &AppState, group_id: &str, user_id: &str) -> Result<StoredObject, ApiError> {
    let group = state.data.fetch("ChatGroup", group_id, "Chat group not found").await?;
    if !is_participant(state, &group, user_id).await? {
        tracing::warn!("User {} is not a participant of chat group {}", user_id, group_id);
        return Err(ApiError::forbidden("Unauthorized: You are not part of this chat"));
    }
    Ok(group)
}

/// Loads users by id once each.
struct UserCache<'a> {
    state: &'a AppState,
    users: HashMap<String, Option<StoredObject>>,
}

impl<'a> UserCache<'a> {
    fn new(state: &'a AppState) -> Self {
        Self {
            state,
            users: HashMap::new(),
        }
    }

    async fn summary(&mut self, user_id: Option<&str>) -> Result<Value, ApiError> {
        let Some(user_id) = user_id else {
            return Ok(Value::Null);
        };
        if !self.users.contains_key(user_id) {
            let user = self.state.data.get("_User", user_id).await?;
            self.users.insert(user_id.to_string(), user);
        }
        Ok(user_summary(self.users.get(user_id).and_then(Option::as_ref)))
    }
}

async fn create_chat_group_for_appointment(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let appointment_id = req.str_param("appointment_id")?;
    let appointment = state
        .data
        .fetch("Appointment", &appointment_id, "Appointment not found")
        .await?;

    if !is_party(&appointment, &caller.user_id) {
        return Err(ApiError::forbidden("Unauthorized: You are not part of this appointment"));
    }

    if let Some(group) = group_for_appointment(&state, &appointment.id).await? {
        return Ok(json!({
            "message": "Chat group already exists",
            "chat_group_id": group.id,
        }));
    }

    let mut batch = WriteBatch::new();
    let group_id = queue_chat_group(&mut batch, &appointment);
    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Chat group {} created for appointment {}", group_id, appointment.id);

    Ok(json!({
        "message": "Chat group created successfully",
        "chat_group_id": group_id,
    }))
}

async fn send_chat_message(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let text = req.str_param("message")?;
    let mut group = participant_group(&state, &req.str_param("chat_group_id")?, &caller.user_id).await?;

    let appointment_id = group
        .pointer_id("appointment_id")
        .ok_or_else(|| ApiError::not_found("Appointment not found"))?;
    let appointment = state
        .data
        .fetch("Appointment", appointment_id, "Appointment not found")
        .await?;
    let receiver = if appointment.pointer_id("user_id") == Some(caller.user_id.as_str()) {
        appointment.pointer_id("provider_id")
    } else {
        appointment.pointer_id("user_id")
    }
    .ok_or_else(|| ApiError::bad_request("Chat has no receiver"))?
    .to_string();

    let mut batch = WriteBatch::new();
    let notification_id = queue_notification(
        &mut batch,
        &receiver,
        "New message",
        &format!("You have a new message from {}", caller.display_name()),
        "chat",
        &[("chat_group_id", group.pointer())],
    );

    let mut message = doc(json!({
        "chat_group_id": group.pointer(),
        "send_id": pointer("_User", &caller.user_id),
        "receive_id": pointer("_User", &receiver),
        "message": text,
        "time": date_value(&Utc::now()),
        "is_read": false,
        "notifications_id": pointer("Notifications", &notification_id),
    }));
    if let Some(child_id) = req.opt_str("child_id") {
        message.insert("child_id".to_string(), pointer("ChildProfile", &child_id));
    }
    let message_id = batch.create_with_acl(
        "ChatMessage",
        message,
        Some(read_acl(&[caller.user_id.as_str(), receiver.as_str()], &[])),
    );

    group.set("last_message", text);
    batch.overwrite(&group);

    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::debug!("Message {} sent in chat group {}", message_id, group.id);

    Ok(json!({
        "message": "Message sent successfully",
        "chat_message_id": message_id,
        "notification_id": notification_id,
    }))
}

async fn get_chat_messages(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let group = participant_group(&state, &req.str_param("chat_group_id")?, &caller.user_id).await?;

    let messages = state
        .data
        .find(
            &Query::new("ChatMessage")
                .equal_to("chat_group_id", group.pointer())
                .ascending("time")
                .limit(MESSAGE_PAGE),
        )
        .await?;

    let mut users = UserCache::new(&state);
    let mut out = Vec::with_capacity(messages.len());
    for message in &messages {
        out.push(json!({
            "objectId": message.id,
            "message": message.str_field("message"),
            "time": message.get("time"),
            "is_read": message.bool_field("is_read").unwrap_or(false),
            "send_id": users.summary(message.pointer_id("send_id")).await?,
            "receive_id": users.summary(message.pointer_id("receive_id")).await?,
            "child_id": message.pointer_id("child_id"),
        }));
    }

    Ok(json!({ "count": out.len(), "messages": out }))
}

async fn mark_message_as_read(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let mut message = state
        .data
        .fetch("ChatMessage", &req.str_param("chat_message_id")?, "Message not found")
        .await?;

    if message.pointer_id("receive_id") != Some(caller.user_id.as_str()) {
        return Err(ApiError::forbidden(
            "Unauthorized: You are not the receiver of this message",
        ));
    }

    let read_at = Utc::now();
    message.set("is_read", true);
    message.set("read_at", date_value(&read_at));
    let message = state.data.save(&message, Some(&caller.user_id)).await?;

    Ok(json!({
        "message": "Message marked as read",
        "chat_message_id": message.id,
        "read_at": iso_timestamp(&read_at),
    }))
}

async fn get_user_chat_groups(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let me = pointer("_User", &caller.user_id);

    let appointments = state
        .data
        .find(&Query::new("Appointment").or(vec![
            Query::new("Appointment").equal_to("user_id", me.clone()),
            Query::new("Appointment").equal_to("provider_id", me),
        ]))
        .await?;
    if appointments.is_empty() {
        return Ok(json!({ "count": 0, "chat_groups": [] }));
    }

    let by_id: HashMap<&str, &StoredObject> = appointments.iter().map(|a| (a.id.as_str(), a)).collect();
    let groups = state
        .data
        .find(
            &Query::new("ChatGroup")
                .contained_in("appointment_id", appointments.iter().map(StoredObject::pointer).collect())
                .descending("updatedAt")
                .limit(MESSAGE_PAGE),
        )
        .await?;

    let mut users = UserCache::new(&state);
    let mut out = Vec::with_capacity(groups.len());
    for group in &groups {
        let appointment = group.pointer_id("appointment_id").and_then(|id| by_id.get(id));
        let appointment = match appointment {
            Some(appointment) => json!({
                "objectId": appointment.id,
                "status": appointment.str_field("status"),
                "user_id": users.summary(appointment.pointer_id("user_id")).await?,
                "provider_id": users.summary(appointment.pointer_id("provider_id")).await?,
            }),
            None => Value::Null,
        };
        out.push(json!({
            "objectId": group.id,
            "last_message": group.str_field("last_message"),
            "chat_status": group.str_field("chat_status"),
            "updatedAt": iso_timestamp(&group.updated_at),
            "appointment": appointment,
        }));
    }

    Ok(json!({ "count": out.len(), "chat_groups": out }))
}
