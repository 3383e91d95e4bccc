//! Mobile number login with one-time codes stored as `OTPcode` objects.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::Value;

use super::AuthAdapter;
use crate::config::AppConfig;
use crate::data::Data;
use crate::error::ApiError;
use crate::store::Query;

pub const PROVIDER: &str = "mobileAuth";

const OTP_LENGTH: usize = 6;

/// Optional leading `+`, then 7 to 15 digits.
pub fn is_valid_mobile(mobile: &str) -> bool {
    let digits = mobile.strip_prefix('+').unwrap_or(mobile);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_otp(otp: &str) -> bool {
    otp.len() == OTP_LENGTH && otp.chars().all(|c| c.is_ascii_digit())
}

pub fn generate_otp() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

pub struct MobileOtpAdapter {
    expiry: Duration,
    bypass_code: Option<String>,
}

impl MobileOtpAdapter {
    pub fn new(expiry_minutes: i64, bypass_code: Option<String>) -> Self {
        Self {
            expiry: Duration::minutes(expiry_minutes),
            bypass_code,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.security.otp_expiry_minutes,
            config.security.otp_bypass_code.clone(),
        )
    }
}

#[async_trait]
impl AuthAdapter for MobileOtpAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn validate_auth_data(&self, auth_data: &Value, data: &Data) -> Result<(), ApiError> {
        let mobile = auth_data
            .get("id")
            .and_then(Value::as_str)
            .filter(|m| is_valid_mobile(m))
            .ok_or_else(|| ApiError::bad_request("Incorrect or missing mobile number."))?;
        let otp = auth_data
            .get("otp")
            .and_then(Value::as_str)
            .filter(|o| is_valid_otp(o))
            .ok_or_else(|| ApiError::bad_request("Invalid or missing OTP."))?;

        if self.bypass_code.as_deref() == Some(otp) {
            tracing::warn!("OTP bypass code used for {}", mobile);
            return Ok(());
        }

        let record = data
            .first(
                Query::new("OTPcode")
                    .equal_to("mobileNumber", mobile)
                    .equal_to("code", otp)
                    .descending("createdAt"),
            )
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid Code."))?;

        // Codes are single use, expired or not.
        data.destroy(&record, None).await?;
        if Utc::now() - record.created_at >= self.expiry {
            return Err(ApiError::unauthorized("Code Is Expired."));
        }
        Ok(())
    }
}
