//! Wallet balances and transfers. Balances are summed as decimals so
//! repeated transfers do not drift.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, read_acl, ADMIN_ROLES};
use crate::store::{pointer, Query, StoredObject, WriteBatch};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "getWalletBalance",
        FunctionConfig::get().require_user(),
        get_wallet_balance,
    );
    registry.register(
        "createWalletTransaction",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("from_wallet_id").required())
            .param(ParamRule::string("to_wallet_id").required())
            .param(ParamRule::number("amount").required())
            .param(ParamRule::string("type").required())
            .param(ParamRule::string("appointment_id")),
        create_wallet_transaction,
    );
}

/// `balance + delta`, rounded to cents.
pub(crate) fn add_money(balance: f64, delta: f64) -> f64 {
    let balance = Decimal::from_f64(balance).unwrap_or_default();
    let delta = Decimal::from_f64(delta).unwrap_or_default();
    (balance + delta).round_dp(2).to_f64().unwrap_or(0.0)
}

pub(crate) fn balance_of(wallet: &StoredObject) -> f64 {
    wallet.f64_field("balance").unwrap_or(0.0)
}

pub(crate) async fn find_wallet(state: &AppState, user_id: &str) -> Result<Option<StoredObject>, ApiError> {
    state
        .data
        .first(Query::new("Wallet").equal_to("user_id", pointer("_User", user_id)))
        .await
}

/// Queue the debit, the credit and the transaction record for one transfer.
/// Returns the transaction id.
pub(crate) fn queue_transfer(
    batch: &mut WriteBatch,
    from: &StoredObject,
    to: &StoredObject,
    amount: f64,
    kind: &str,
    appointment: Option<&StoredObject>,
) -> String {
    let mut from = from.clone();
    from.set("balance", add_money(balance_of(&from), -amount));
    let mut to = to.clone();
    to.set("balance", add_money(balance_of(&to), amount));
    batch.update(&from);
    batch.update(&to);

    let mut record = doc(json!({
        "from_wallet": from.pointer(),
        "to_wallet": to.pointer(),
        "amount": amount,
        "type": kind,
    }));
    if let Some(appointment) = appointment {
        record.insert("appointment_id".to_string(), appointment.pointer());
    }
    let owners: Vec<&str> = [&from, &to].iter().filter_map(|w| w.pointer_id("user_id")).collect();
    batch.create_with_acl("WalletTransaction", record, Some(read_acl(&owners, ADMIN_ROLES)))
}

/// The user's wallet, created empty on first use. The flag is true when it was just created.
pub(crate) async fn ensure_wallet(state: &AppState, user_id: &str) -> Result<(StoredObject, bool), ApiError> {
    if let Some(wallet) = find_wallet(state, user_id).await? {
        return Ok((wallet, false));
    }
    let wallet = state
        .data
        .create(
            "Wallet",
            doc(json!({ "user_id": pointer("_User", user_id), "balance": 0 })),
            Some(read_acl(&[user_id], ADMIN_ROLES)),
            Some(user_id),
        )
        .await?;
    tracing::info!("Created wallet {} for {}", wallet.id, user_id);
    Ok((wallet, true))
}

async fn get_wallet_balance(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let (wallet, created) = ensure_wallet(&state, &caller.user_id).await?;

    let message = if created {
        "Wallet created successfully"
    } else {
        "Wallet balance retrieved successfully"
    };
    Ok(json!({
        "message": message,
        "balance": balance_of(&wallet),
        "wallet_id": wallet.id,
    }))
}

async fn create_wallet_transaction(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let from_id = req.str_param("from_wallet_id")?;
    let to_id = req.str_param("to_wallet_id")?;
    let amount = req.f64_param("amount")?;
    let kind = req.str_param("type")?;

    if amount <= 0.0 {
        return Err(ApiError::bad_request("Amount must be greater than zero"));
    }
    if from_id == to_id {
        return Err(ApiError::bad_request("Source and destination wallets must differ"));
    }

    let from = state.data.get("Wallet", &from_id).await?;
    let to = state.data.get("Wallet", &to_id).await?;
    let (Some(from), Some(to)) = (from, to) else {
        return Err(ApiError::not_found("One or both wallets not found"));
    };

    if from.pointer_id("user_id") != Some(caller.user_id.as_str()) {
        tracing::warn!("User {} tried to spend from wallet {}", caller.user_id, from.id);
        return Err(ApiError::forbidden("You can only transfer from your own wallet"));
    }
    if balance_of(&from) < amount {
        return Err(ApiError::payment_required("Insufficient balance in source wallet"));
    }

    let appointment = match req.opt_str("appointment_id") {
        Some(id) => Some(state.data.fetch("Appointment", &id, "Appointment not found").await?),
        None => None,
    };

    let mut batch = WriteBatch::new();
    let transaction_id = queue_transfer(&mut batch, &from, &to, amount, &kind, appointment.as_ref());
    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Transferred {} from wallet {} to {}", amount, from.id, to.id);

    Ok(json!({
        "message": "Wallet transaction created successfully",
        "transaction_id": transaction_id,
        "from_wallet_id": from_id,
        "to_wallet_id": to_id,
        "amount": amount,
        "type": kind,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_money_avoids_float_drift() {
        assert_eq!(add_money(0.1, 0.2), 0.3);
        assert_eq!(add_money(100.0, -33.33), 66.67);
    }
}
