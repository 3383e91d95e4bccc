use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, ADMIN_ROLES};
use crate::store::Query;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "createAppointmentPlan",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .denial_message("User is not authorized to create plans")
            .param(ParamRule::string("title").required())
            .param(ParamRule::number("duration_minutes").required())
            .param(ParamRule::number("price").required())
            .param(ParamRule::string("description")),
        create_appointment_plan,
    );
    registry.register(
        "getAvailableAppointmentPlans",
        FunctionConfig::get().require_user(),
        get_available_appointment_plans,
    );
}

async fn create_appointment_plan(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let price = req.f64_param("price")?;
    let duration = req.f64_param("duration_minutes")?;
    if price < 0.0 || duration <= 0.0 {
        return Err(ApiError::bad_request("Price and duration must be positive"));
    }

    let plan = state
        .data
        .create(
            "AppointmentPlan",
            doc(json!({
                "title": req.str_param("title")?,
                "duration_minutes": duration,
                "price": price,
                "description": req.opt_str("description").unwrap_or_default(),
            })),
            None,
            Some(&caller.user_id),
        )
        .await?;
    tracing::info!("Appointment plan {} created by {}", plan.id, caller.user_id);

    Ok(json!({
        "message": "Appointment plan created successfully",
        "appointmentPlan": plan.to_json(),
    }))
}

async fn get_available_appointment_plans(state: AppState, _req: FunctionRequest) -> Result<Value, ApiError> {
    let plans = state
        .data
        .find(&Query::new("AppointmentPlan").ascending("createdAt"))
        .await?;

    Ok(Value::Array(
        plans
            .iter()
            .map(|plan| {
                json!({
                    "id": plan.id,
                    "title": plan.str_field("title"),
                    "duration_minutes": plan.get("duration_minutes"),
                    "price": plan.get("price"),
                    "description": plan.str_field("description"),
                })
            })
            .collect(),
    ))
}
