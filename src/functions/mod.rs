//! Named server functions. Each is registered with its allowed methods,
//! role requirement and parameter rules; the registry runs those checks
//! before the handler.

pub mod authorize;
pub mod params;

use axum::http::Method;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

pub use authorize::{authorize, RoleLookup, RoleRequirement};
pub use params::{validate_params, ParamKind, ParamRule};

pub type HandlerFuture = BoxFuture<'static, Result<Value, ApiError>>;
pub type Handler = Arc<dyn Fn(AppState, FunctionRequest) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FunctionConfig {
    pub methods: Vec<Method>,
    pub require_user: bool,
    pub roles: RoleRequirement,
    pub params: Vec<ParamRule>,
}

impl FunctionConfig {
    pub fn methods(methods: &[Method]) -> Self {
        Self {
            methods: methods.to_vec(),
            require_user: false,
            roles: RoleRequirement::default(),
            params: Vec::new(),
        }
    }

    pub fn post() -> Self {
        Self::methods(&[Method::POST])
    }

    pub fn get() -> Self {
        Self::methods(&[Method::GET])
    }

    pub fn require_user(mut self) -> Self {
        self.require_user = true;
        self
    }

    /// Caller must hold at least one of these roles.
    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.roles.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn require_all_roles(mut self) -> Self {
        self.roles.require_all = true;
        self
    }

    pub fn denial_message(mut self, message: &str) -> Self {
        self.roles.message = Some(message.to_string());
        self
    }

    pub fn param(mut self, rule: ParamRule) -> Self {
        self.params.push(rule);
        self
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// One invocation: merged query and body parameters plus who is calling.
#[derive(Debug, Clone)]
pub struct FunctionRequest {
    pub params: Map<String, Value>,
    pub caller: Option<Caller>,
    /// Master-key requests skip the session and role checks.
    pub master: bool,
}

fn required(name: &str) -> ApiError {
    ApiError::field_error(name, format!("{} is required", name))
}

impl FunctionRequest {
    pub fn new(params: Map<String, Value>, caller: Option<Caller>) -> Self {
        Self {
            params,
            caller,
            master: false,
        }
    }

    pub fn user(&self) -> Result<&Caller, ApiError> {
        self.caller.as_ref().ok_or_else(ApiError::authentication_required)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn opt_str(&self, name: &str) -> Option<String> {
        self.param(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn str_param(&self, name: &str) -> Result<String, ApiError> {
        self.opt_str(name).ok_or_else(|| required(name))
    }

    /// Numbers may arrive as JSON numbers or numeric strings.
    pub fn opt_f64(&self, name: &str) -> Option<f64> {
        match self.param(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f64_param(&self, name: &str) -> Result<f64, ApiError> {
        match self.param(name) {
            None => Err(required(name)),
            Some(_) => self
                .opt_f64(name)
                .ok_or_else(|| ApiError::field_error(name, format!("{} must be a number", name))),
        }
    }

    pub fn i64_param(&self, name: &str) -> Result<i64, ApiError> {
        let value = self.f64_param(name)?;
        if value.fract() != 0.0 {
            return Err(ApiError::field_error(name, format!("{} must be a whole number", name)));
        }
        Ok(value as i64)
    }

    pub fn array_param(&self, name: &str) -> Result<&Vec<Value>, ApiError> {
        self.param(name)
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::field_error(name, format!("{} must be an array", name)))
    }
}

#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub config: FunctionConfig,
    handler: Handler,
}

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every application function.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::modules::register_all(&mut registry);
        registry
    }

    /// Registering an existing name replaces it.
    pub fn register<F, Fut>(&mut self, name: &str, config: FunctionConfig, handler: F)
    where
        F: Fn(AppState, FunctionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |state, request| Box::pin(handler(state, request)));
        let function = RegisteredFunction {
            name: name.to_string(),
            config,
            handler,
        };
        if self.functions.insert(name.to_string(), function).is_some() {
            warn!("Function '{}' registered twice; the latest registration wins", name);
        } else {
            debug!("Registered function '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// 404 for unknown names, 405 for a method the function does not accept.
    pub fn lookup(&self, name: &str, method: &Method) -> Result<&RegisteredFunction, ApiError> {
        let function = self
            .get(name)
            .ok_or_else(|| ApiError::not_found("Function not found"))?;
        if !function.config.allows(method) {
            return Err(ApiError::method_not_allowed("Method not allowed"));
        }
        Ok(function)
    }

    /// Run the checks in order: signed in, roles, parameters, then the handler.
    /// Master-key requests skip the first two.
    pub async fn invoke(
        &self,
        state: AppState,
        name: &str,
        method: &Method,
        request: FunctionRequest,
    ) -> Result<Value, ApiError> {
        let function = self.lookup(name, method)?;
        let config = &function.config;

        // The master key stands in for any session and role.
        if !request.master {
            if config.require_user && request.caller.is_none() {
                return Err(ApiError::authentication_required());
            }
            authorize(&config.roles, request.caller.as_ref(), &state.data).await?;
        }
        validate_params(&config.params, &request.params)?;

        debug!(
            "Running function {} for {}",
            name,
            request.caller.as_ref().map_or("anonymous", |c| c.user_id.as_str())
        );
        (function.handler)(state, request).await
    }
}
