//! Wallet top-ups: users file a charge request with a receipt, admins
//! approve (crediting the wallet) or reject it.

use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::wallet::{add_money, balance_of, find_wallet};
use crate::modules::{doc, queue_notification, read_acl, ADMIN_ROLES};
use crate::store::{iso_timestamp, Query, StoredObject, WriteBatch};

const PENDING: &str = "pending";

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "createChargeRequest",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::number("amount").required())
            .param(ParamRule::string("note"))
            .param(ParamRule::any("receipt_image")),
        create_charge_request,
    );
    registry.register(
        "approveChargeRequest",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .denial_message("Only admins can approve charge requests")
            .param(ParamRule::string("charge_request_id").required()),
        approve_charge_request,
    );
    registry.register(
        "rejectChargeRequest",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .denial_message("Only admins can reject charge requests")
            .param(ParamRule::string("charge_request_id").required())
            .param(ParamRule::string("rejection_note").required()),
        reject_charge_request,
    );
    registry.register(
        "getChargeRequests",
        FunctionConfig::get()
            .roles(ADMIN_ROLES)
            .denial_message("Only admins can view charge requests")
            .param(ParamRule::string("status")),
        get_charge_requests,
    );
}

async fn pending_request(state: &AppState, id: &str) -> Result<StoredObject, ApiError> {
    let request = state.data.fetch("ChargeRequest", id, "Charge request not found").await?;
    if request.str_field("status") != Some(PENDING) {
        return Err(ApiError::bad_request("Charge request is already processed"));
    }
    Ok(request)
}

async fn wallet_owner(state: &AppState, wallet: &StoredObject) -> Result<Option<StoredObject>, ApiError> {
    match wallet.pointer_id("user_id") {
        Some(id) => state.data.get("_User", id).await,
        None => Ok(None),
    }
}

async fn create_charge_request(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let amount = req.f64_param("amount")?;
    if amount <= 0.0 {
        return Err(ApiError::bad_request("Amount must be greater than zero"));
    }

    let wallet = find_wallet(&state, &caller.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Wallet not found for this user"))?;

    let mut data = doc(json!({
        "wallet_id": wallet.pointer(),
        "amount": amount,
        "status": PENDING,
    }));
    if let Some(note) = req.opt_str("note") {
        data.insert("note".to_string(), Value::String(note));
    }
    if let Some(receipt) = req.param("receipt_image") {
        data.insert("receipt_image".to_string(), receipt.clone());
    }

    let request = state
        .data
        .create(
            "ChargeRequest",
            data,
            Some(read_acl(&[caller.user_id.as_str()], ADMIN_ROLES)),
            Some(&caller.user_id),
        )
        .await?;
    tracing::info!("Charge request {} for {} filed by {}", request.id, amount, caller.user_id);

    Ok(json!({
        "message": "Charge request created successfully",
        "charge_request_id": request.id,
        "wallet_id": wallet.id,
        "amount": amount,
        "status": PENDING,
    }))
}

async fn approve_charge_request(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let mut request = pending_request(&state, &req.str_param("charge_request_id")?).await?;
    let wallet_id = request
        .pointer_id("wallet_id")
        .ok_or_else(|| ApiError::not_found("Wallet not found"))?
        .to_string();
    let mut wallet = state.data.fetch("Wallet", &wallet_id, "Wallet not found").await?;
    let amount = request.f64_field("amount").unwrap_or(0.0);

    let new_balance = add_money(balance_of(&wallet), amount);
    wallet.set("balance", new_balance);
    request.set("status", "approved");

    let mut batch = WriteBatch::new();
    batch.update(&wallet);
    batch.update(&request);
    if let Some(owner) = wallet.pointer_id("user_id") {
        queue_notification(
            &mut batch,
            owner,
            "Wallet charged",
            &format!("{} was added to your wallet", amount),
            "wallet",
            &[],
        );
    }
    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Charge request {} approved by {}", request.id, caller.user_id);

    Ok(json!({
        "message": "Charge request approved and wallet updated",
        "wallet_id": wallet.id,
        "new_balance": new_balance,
        "charge_request_id": request.id,
        "status": "approved",
    }))
}

async fn reject_charge_request(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let rejection_note = req.str_param("rejection_note")?;
    let mut request = pending_request(&state, &req.str_param("charge_request_id")?).await?;

    request.set("status", "rejected");
    request.set("rejection_note", rejection_note.as_str());

    let owner = match request.pointer_id("wallet_id") {
        Some(wallet_id) => state
            .data
            .get("Wallet", wallet_id)
            .await?
            .and_then(|wallet| wallet.pointer_id("user_id").map(str::to_string)),
        None => None,
    };

    let mut batch = WriteBatch::new();
    batch.update(&request);
    if let Some(owner) = &owner {
        queue_notification(
            &mut batch,
            owner,
            "Charge request rejected",
            &rejection_note,
            "wallet",
            &[],
        );
    }
    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Charge request {} rejected by {}", request.id, caller.user_id);

    Ok(json!({
        "message": "Charge request rejected",
        "charge_request_id": request.id,
        "status": "rejected",
        "rejection_note": rejection_note,
    }))
}

async fn get_charge_requests(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let mut query = Query::new("ChargeRequest").descending("createdAt");
    if let Some(status) = req.opt_str("status") {
        query = query.equal_to("status", status);
    }
    let requests = state.data.find(&query).await?;

    let mut out = Vec::with_capacity(requests.len());
    for request in &requests {
        let wallet = match request.pointer_id("wallet_id") {
            Some(id) => state.data.get("Wallet", id).await?,
            None => None,
        };
        let owner = match &wallet {
            Some(wallet) => wallet_owner(&state, wallet).await?,
            None => None,
        };
        out.push(json!({
            "charge_request_id": request.id,
            "wallet_id": wallet.as_ref().map(|w| w.id.clone()),
            "amount": request.get("amount"),
            "status": request.str_field("status"),
            "note": request.str_field("note"),
            "rejection_note": request.str_field("rejection_note"),
            "receipt_image": crate::modules::file_url(&state, request, "receipt_image"),
            "createdAt": iso_timestamp(&request.created_at),
            "username": owner.as_ref().and_then(|u| u.str_field("username")),
        }));
    }

    Ok(json!({
        "message": "Charge requests retrieved successfully",
        "count": out.len(),
        "requests": out,
    }))
}
