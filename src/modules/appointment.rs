//! Appointment requests and the provider's decision on them.
//!
//! Approving an appointment moves money, confirms the invoice, opens the
//! chat group and notifies the requester in a single write batch.

use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::chat::{group_for_appointment, queue_chat_group};
use crate::modules::wallet::{balance_of, ensure_wallet, find_wallet, queue_transfer};
use crate::modules::{doc, queue_notification, read_acl, ADMIN_ROLES};
use crate::store::{iso_timestamp, pointer, Query, StoredObject, WriteBatch};

pub const STATUS_PENDING: &str = "pending_provider_approval";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_REJECTED: &str = "rejected";

/// Statuses that give a provider access to the child's evaluation.
const EVALUATION_STATUSES: &[&str] = &[STATUS_PENDING, STATUS_CONFIRMED, "completed", "paid"];

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "requestPsychologistAppointment",
        FunctionConfig::post()
            .roles(&["Parent", "Child"])
            .denial_message("Only parents or children can request appointments")
            .param(ParamRule::string("child_id").required())
            .param(ParamRule::string("provider_id").required())
            .param(ParamRule::string("appointment_plan_id").required())
            .param(ParamRule::string("note")),
        request_psychologist_appointment,
    );
    registry.register(
        "getChildAppointments",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("child_id").required()),
        get_child_appointments,
    );
    registry.register(
        "getAppointmentDetails",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("appointment_id").required()),
        get_appointment_details,
    );
    registry.register(
        "getPendingAppointmentsForProvider",
        FunctionConfig::post().require_user(),
        get_pending_appointments_for_provider,
    );
    registry.register(
        "canAccessChildEvaluation",
        FunctionConfig::post()
            .roles(&["Psychologist", "Doctor"])
            .denial_message("Unauthorized: Only providers with valid roles can access evaluations")
            .param(ParamRule::string("child_id").required()),
        can_access_child_evaluation,
    );
    registry.register(
        "decideAppointment",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("appointment_id").required())
            .param(ParamRule::string("decision").required()),
        decide_appointment,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            _ => Err(ApiError::field_error("decision", "decision must be approve or reject")),
        }
    }
}

/// Appointment with its plan, provider, child and requester expanded.
async fn describe(state: &AppState, appointment: &StoredObject) -> Result<Value, ApiError> {
    let plan = match appointment.pointer_id("appointment_plan_id") {
        Some(id) => state.data.get("AppointmentPlan", id).await?,
        None => None,
    };
    let provider = match appointment.pointer_id("provider_id") {
        Some(id) => state.data.get("_User", id).await?,
        None => None,
    };
    let requester = match appointment.pointer_id("user_id") {
        Some(id) => state.data.get("_User", id).await?,
        None => None,
    };
    let child = match appointment.pointer_id("child_id") {
        Some(id) => state.data.get("ChildProfile", id).await?,
        None => None,
    };

    let named = |object: Option<&StoredObject>, field: &str| match object {
        Some(object) => json!({ "id": object.id, "name": object.str_field(field) }),
        None => json!({}),
    };

    Ok(json!({
        "id": appointment.id,
        "status": appointment.str_field("status"),
        "note": appointment.str_field("note"),
        "created_at": iso_timestamp(&appointment.created_at),
        "appointment_plan": match &plan {
            Some(plan) => json!({
                "id": plan.id,
                "title": plan.str_field("title"),
                "duration_minutes": plan.get("duration_minutes"),
                "price": plan.get("price"),
            }),
            None => json!({}),
        },
        "provider": named(provider.as_ref(), "username"),
        "child": named(child.as_ref(), "name"),
        "requested_by": named(requester.as_ref(), "username"),
    }))
}

async fn describe_all(state: &AppState, appointments: &[StoredObject]) -> Result<Value, ApiError> {
    let mut out = Vec::with_capacity(appointments.len());
    for appointment in appointments {
        out.push(describe(state, appointment).await?);
    }
    Ok(Value::Array(out))
}

async fn request_psychologist_appointment(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let plan = state
        .data
        .fetch("AppointmentPlan", &req.str_param("appointment_plan_id")?, "Appointment plan not found")
        .await?;
    let provider = state
        .data
        .fetch("_User", &req.str_param("provider_id")?, "Provider not found")
        .await?;
    let child = state
        .data
        .fetch("ChildProfile", &req.str_param("child_id")?, "Child profile not found")
        .await?;
    let price = plan
        .f64_field("price")
        .ok_or_else(|| ApiError::bad_request("Appointment plan has no price"))?;

    let acl = read_acl(&[caller.user_id.as_str(), provider.id.as_str()], ADMIN_ROLES);
    let mut batch = WriteBatch::new();
    let appointment_id = batch.create_with_acl(
        "Appointment",
        doc(json!({
            "user_id": pointer("_User", &caller.user_id),
            "provider_id": provider.pointer(),
            "child_id": child.pointer(),
            "appointment_plan_id": plan.pointer(),
            "note": req.opt_str("note").unwrap_or_default(),
            "status": STATUS_PENDING,
        })),
        Some(acl.clone()),
    );
    batch.create_with_acl(
        "Invoice",
        doc(json!({
            "appointment_id": pointer("Appointment", &appointment_id),
            "amount": price,
            "status": "pending",
        })),
        Some(acl),
    );
    queue_notification(
        &mut batch,
        &provider.id,
        "New appointment request",
        &format!("{} requested an appointment", caller.display_name()),
        "appointment",
        &[("appointment_id", pointer("Appointment", &appointment_id))],
    );

    let saved = state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!(
        "Appointment {} requested by {} with provider {}",
        appointment_id,
        caller.user_id,
        provider.id
    );

    let mut saved = saved.iter();
    Ok(json!({
        "message": "Appointment request submitted successfully",
        "appointment": saved.next().map(StoredObject::to_json),
        "invoice": saved.next().map(StoredObject::to_json),
    }))
}

async fn get_child_appointments(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let child_id = req.str_param("child_id")?;
    let appointments = state
        .data
        .find(
            &Query::new("Appointment")
                .equal_to("child_id", pointer("ChildProfile", &child_id))
                .descending("createdAt"),
        )
        .await?;
    describe_all(&state, &appointments).await
}

async fn get_appointment_details(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let appointment = state
        .data
        .fetch("Appointment", &req.str_param("appointment_id")?, "Appointment not found")
        .await?;

    let party = appointment.pointer_id("user_id") == Some(caller.user_id.as_str())
        || appointment.pointer_id("provider_id") == Some(caller.user_id.as_str());
    if !party {
        return Err(ApiError::forbidden("Unauthorized: You are not part of this appointment"));
    }

    describe(&state, &appointment).await
}

async fn get_pending_appointments_for_provider(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let appointments = state
        .data
        .find(
            &Query::new("Appointment")
                .equal_to("provider_id", pointer("_User", &caller.user_id))
                .equal_to("status", STATUS_PENDING)
                .descending("createdAt"),
        )
        .await?;
    describe_all(&state, &appointments).await
}

async fn can_access_child_evaluation(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let child_id = req.str_param("child_id")?;
    let statuses = EVALUATION_STATUSES.iter().map(|s| Value::from(*s)).collect();

    let found = state
        .data
        .count(
            &Query::new("Appointment")
                .equal_to("child_id", pointer("ChildProfile", &child_id))
                .equal_to("provider_id", pointer("_User", &caller.user_id))
                .contained_in("status", statuses),
        )
        .await?;

    Ok(if found > 0 {
        json!({
            "canAccess": true,
            "message": "Access granted: Provider has a valid appointment with this child",
        })
    } else {
        json!({
            "canAccess": false,
            "message": "Access denied: No valid appointment found for this child",
        })
    })
}

async fn decide_appointment(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let decision = Decision::parse(&req.str_param("decision")?)?;
    let mut appointment = state
        .data
        .fetch("Appointment", &req.str_param("appointment_id")?, "Appointment not found")
        .await?;

    if appointment.pointer_id("provider_id") != Some(caller.user_id.as_str()) {
        tracing::warn!("User {} tried to decide appointment {}", caller.user_id, appointment.id);
        return Err(ApiError::forbidden("Only the assigned provider can decide this appointment"));
    }
    if appointment.str_field("status") != Some(STATUS_PENDING) {
        return Err(ApiError::conflict("Appointment is not awaiting provider approval"));
    }
    let requester_id = appointment
        .pointer_id("user_id")
        .ok_or_else(|| ApiError::bad_request("Appointment has no requester"))?
        .to_string();

    let mut invoice = state
        .data
        .first(Query::new("Invoice").equal_to("appointment_id", appointment.pointer()))
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))?;

    let mut batch = WriteBatch::new();
    let mut body = json!({ "appointment_id": appointment.id });

    match decision {
        Decision::Reject => {
            appointment.set("status", STATUS_REJECTED);
            invoice.set("status", "cancelled");
            batch.update(&appointment);
            batch.update(&invoice);
            queue_notification(
                &mut batch,
                &requester_id,
                "Appointment rejected",
                "Your appointment request was rejected",
                "appointment",
                &[("appointment_id", appointment.pointer())],
            );
            body["message"] = json!("Appointment rejected");
        }
        Decision::Approve => {
            let amount = invoice.f64_field("amount").unwrap_or(0.0);
            let payer = find_wallet(&state, &requester_id)
                .await?
                .ok_or_else(|| ApiError::payment_required("Requester has no wallet"))?;
            if balance_of(&payer) < amount {
                return Err(ApiError::payment_required("Insufficient balance in requester wallet"));
            }
            let (payee, _) = ensure_wallet(&state, &caller.user_id).await?;

            let transaction_id = queue_transfer(
                &mut batch,
                &payer,
                &payee,
                amount,
                "appointment_payment",
                Some(&appointment),
            );
            appointment.set("status", STATUS_CONFIRMED);
            invoice.set("status", "paid");
            batch.update(&appointment);
            batch.update(&invoice);

            let group_id = match group_for_appointment(&state, &appointment.id).await? {
                Some(group) => group.id,
                None => queue_chat_group(&mut batch, &appointment),
            };
            queue_notification(
                &mut batch,
                &requester_id,
                "Appointment confirmed",
                "Your appointment was approved",
                "appointment",
                &[
                    ("appointment_id", appointment.pointer()),
                    ("chat_group_id", pointer("ChatGroup", &group_id)),
                ],
            );

            body["message"] = json!("Appointment approved");
            body["transaction_id"] = json!(transaction_id);
            body["chat_group_id"] = json!(group_id);
        }
    }

    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Appointment {} decided {:?} by {}", appointment.id, decision, caller.user_id);

    body["status"] = json!(appointment.str_field("status"));
    Ok(body)
}
