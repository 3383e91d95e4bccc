use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

use super::{StoreError, StoredObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NIn,
    Exists,
}

impl FilterOp {
    fn from_key(op_key: &str) -> Result<Self, StoreError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$exists" => FilterOp::Exists,
            other => return Err(StoreError::InvalidQuery(format!("Unsupported operator: {}", other))),
        })
    }

    fn key(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::In => "$in",
            FilterOp::NIn => "$nin",
            FilterOp::Exists => "$exists",
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Field { field: String, op: FilterOp, value: Value },
    Or(Vec<Vec<Condition>>),
    And(Vec<Vec<Condition>>),
}

/// Query over one class: JSON where-clause, ordering and paging.
#[derive(Debug, Clone)]
pub struct Query {
    pub class_name: String,
    pub where_clause: Map<String, Value>,
    pub order: Vec<(String, SortDirection)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            where_clause: Map::new(),
            order: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    fn with_op(mut self, field: &str, op: FilterOp, value: Value) -> Self {
        let entry = self
            .where_clause
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !is_operator_map(entry) {
            let eq = entry.take();
            *entry = json!({ "$eq": eq });
        }
        if let Value::Object(ops) = entry {
            ops.insert(op.key().to_string(), value);
        }
        self
    }

    pub fn equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Eq, value.into())
    }

    pub fn not_equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Ne, value.into())
    }

    pub fn greater_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Gt, value.into())
    }

    pub fn greater_than_or_equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Gte, value.into())
    }

    pub fn less_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Lt, value.into())
    }

    pub fn less_than_or_equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_op(field, FilterOp::Lte, value.into())
    }

    pub fn contained_in(self, field: &str, values: Vec<Value>) -> Self {
        self.with_op(field, FilterOp::In, Value::Array(values))
    }

    pub fn not_contained_in(self, field: &str, values: Vec<Value>) -> Self {
        self.with_op(field, FilterOp::NIn, Value::Array(values))
    }

    pub fn exists(self, field: &str) -> Self {
        self.with_op(field, FilterOp::Exists, Value::Bool(true))
    }

    pub fn does_not_exist(self, field: &str) -> Self {
        self.with_op(field, FilterOp::Exists, Value::Bool(false))
    }

    /// Match objects satisfying any of the given queries' constraints.
    pub fn or(mut self, queries: Vec<Query>) -> Self {
        let clauses = queries.into_iter().map(|q| Value::Object(q.where_clause)).collect();
        self.where_clause.insert("$or".to_string(), Value::Array(clauses));
        self
    }

    /// Merge a raw client where-clause. Validated when the query runs.
    pub fn with_where(mut self, where_clause: Map<String, Value>) -> Self {
        self.where_clause.extend(where_clause);
        self
    }

    pub fn ascending(mut self, field: &str) -> Self {
        self.order.push((field.to_string(), SortDirection::Asc));
        self
    }

    pub fn descending(mut self, field: &str) -> Self {
        self.order.push((field.to_string(), SortDirection::Desc));
        self
    }

    /// Parse `"-createdAt,name"` style ordering.
    pub fn order_by(mut self, spec: &str) -> Self {
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('-') {
                Some(field) => self.order.push((field.to_string(), SortDirection::Desc)),
                None => self.order.push((part.to_string(), SortDirection::Asc)),
            }
        }
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn conditions(&self) -> Result<Vec<Condition>, StoreError> {
        parse_where(&self.where_clause)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.conditions()?;
        for (field, _) in &self.order {
            validate_field(field)?;
        }
        Ok(())
    }

    /// Client queries may not filter or sort on underscore fields such as
    /// `_hashed_password`; those never leave the server.
    pub fn reject_internal_fields(&self) -> Result<(), StoreError> {
        internal_where_field(&self.where_clause)
            .or_else(|| self.order.iter().map(|(f, _)| f.as_str()).find(|f| f.starts_with('_')))
            .map_or(Ok(()), |field| {
                Err(StoreError::InvalidQuery(format!("Invalid field name: {}", field)))
            })
    }

    /// SQL predicate over the `objects` table. Placeholders start at `$start_index`.
    pub fn sql_where(&self, start_index: usize) -> Result<(String, Vec<Value>), StoreError> {
        let conditions = self.conditions()?;
        let mut builder = SqlWhere {
            params: Vec::new(),
            param_index: start_index - 1,
        };
        let sql = builder.build_all(&conditions)?;
        Ok((sql, builder.params))
    }

    pub fn sql_order(&self) -> Result<String, StoreError> {
        let mut parts = Vec::with_capacity(self.order.len() + 1);
        for (field, direction) in &self.order {
            validate_field(field)?;
            let column = match field.as_str() {
                "objectId" => "object_id".to_string(),
                "createdAt" => "created_at".to_string(),
                "updatedAt" => "updated_at".to_string(),
                other => format!("data->'{}'", other),
            };
            parts.push(format!("{} {}", column, direction.to_sql()));
        }
        parts.push("seq ASC".to_string());
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }

    pub fn sql_paging(&self) -> String {
        match self.limit {
            Some(limit) => format!("LIMIT {} OFFSET {}", limit, self.skip),
            None if self.skip > 0 => format!("OFFSET {}", self.skip),
            None => String::new(),
        }
    }

    /// Evaluate the where-clause against an object in memory.
    pub fn matches(&self, object: &StoredObject) -> Result<bool, StoreError> {
        if object.class_name != self.class_name {
            return Ok(false);
        }
        let conditions = self.conditions()?;
        Ok(matches_all(&conditions, object))
    }

    /// Order two objects by the query's sort keys. Missing values sort last.
    pub fn compare(&self, a: &StoredObject, b: &StoredObject) -> Ordering {
        for (field, direction) in &self.order {
            let left = field_value(a, field);
            let right = field_value(b, field);
            let ordering = match (left, right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => {
                    let ordering = compare_values(&l, &r).unwrap_or(Ordering::Equal);
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn is_operator_map(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.keys().all(|k| k.starts_with('$')))
}

fn validate_field(field: &str) -> Result<(), StoreError> {
    let mut chars = field.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!("Invalid field name: {}", field)))
    }
}

fn internal_where_field(where_clause: &Map<String, Value>) -> Option<&str> {
    where_clause.iter().find_map(|(key, value)| {
        if key.starts_with('_') {
            return Some(key.as_str());
        }
        if !key.starts_with('$') {
            return None;
        }
        value
            .as_array()?
            .iter()
            .filter_map(Value::as_object)
            .find_map(internal_where_field)
    })
}

fn parse_where(where_clause: &Map<String, Value>) -> Result<Vec<Condition>, StoreError> {
    let mut conditions = Vec::new();
    for (key, value) in where_clause {
        if key.starts_with('$') {
            let clauses = value
                .as_array()
                .ok_or_else(|| StoreError::InvalidQuery(format!("{} requires array", key)))?;
            let mut parsed = Vec::with_capacity(clauses.len());
            for clause in clauses {
                let clause = clause
                    .as_object()
                    .ok_or_else(|| StoreError::InvalidQuery(format!("{} entries must be objects", key)))?;
                parsed.push(parse_where(clause)?);
            }
            match key.as_str() {
                "$or" => conditions.push(Condition::Or(parsed)),
                "$and" => conditions.push(Condition::And(parsed)),
                other => return Err(StoreError::InvalidQuery(format!("Unsupported operator: {}", other))),
            }
            continue;
        }

        validate_field(key)?;
        if matches!(key.as_str(), "createdAt" | "updatedAt") {
            return Err(StoreError::InvalidQuery(format!("Cannot filter on {}", key)));
        }

        match value {
            Value::Object(ops) if !ops.is_empty() && is_operator_map(value) => {
                for (op_key, op_value) in ops {
                    let op = FilterOp::from_key(op_key)?;
                    if matches!(op, FilterOp::In | FilterOp::NIn) && !op_value.is_array() {
                        return Err(StoreError::InvalidQuery(format!("{} requires array", op_key)));
                    }
                    conditions.push(Condition::Field {
                        field: key.clone(),
                        op,
                        value: op_value.clone(),
                    });
                }
            }
            // Implicit equality: { field: value }
            _ => conditions.push(Condition::Field {
                field: key.clone(),
                op: FilterOp::Eq,
                value: value.clone(),
            }),
        }
    }
    Ok(conditions)
}

struct SqlWhere {
    params: Vec<Value>,
    param_index: usize,
}

impl SqlWhere {
    fn build_all(&mut self, conditions: &[Condition]) -> Result<String, StoreError> {
        if conditions.is_empty() {
            return Ok("1=1".to_string());
        }
        let mut parts = Vec::with_capacity(conditions.len());
        for condition in conditions {
            parts.push(self.build(condition)?);
        }
        Ok(parts.join(" AND "))
    }

    fn build(&mut self, condition: &Condition) -> Result<String, StoreError> {
        match condition {
            Condition::Or(clauses) | Condition::And(clauses) => {
                let joiner = if matches!(condition, Condition::Or(_)) { " OR " } else { " AND " };
                if clauses.is_empty() {
                    return Ok(if joiner == " OR " { "1=0" } else { "1=1" }.to_string());
                }
                let mut parts = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    parts.push(format!("({})", self.build_all(clause)?));
                }
                Ok(format!("({})", parts.join(joiner)))
            }
            Condition::Field { field, op, value } => {
                let column = if field == "objectId" {
                    "to_jsonb(object_id)".to_string()
                } else {
                    format!("data->'{}'", field)
                };
                let missing = format!("({c} IS NULL OR {c} = 'null'::jsonb)", c = column);
                let present = format!("({c} IS NOT NULL AND {c} <> 'null'::jsonb)", c = column);
                Ok(match op {
                    FilterOp::Eq if value.is_null() => missing,
                    FilterOp::Eq => format!("{} = {}", column, self.param(value.clone())),
                    FilterOp::Ne if value.is_null() => present,
                    FilterOp::Ne => format!("({c} IS NULL OR {c} <> {p})", c = column, p = self.param(value.clone())),
                    FilterOp::Gt => format!("{} > {}", column, self.param(value.clone())),
                    FilterOp::Gte => format!("{} >= {}", column, self.param(value.clone())),
                    FilterOp::Lt => format!("{} < {}", column, self.param(value.clone())),
                    FilterOp::Lte => format!("{} <= {}", column, self.param(value.clone())),
                    FilterOp::In | FilterOp::NIn => {
                        let values = value.as_array().cloned().unwrap_or_default();
                        if values.is_empty() {
                            return Ok(if *op == FilterOp::In { "1=0" } else { "1=1" }.to_string());
                        }
                        let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                        if *op == FilterOp::In {
                            format!("{} IN ({})", column, params.join(", "))
                        } else {
                            format!("({c} IS NULL OR {c} NOT IN ({p}))", c = column, p = params.join(", "))
                        }
                    }
                    FilterOp::Exists => {
                        if value.as_bool().unwrap_or(true) {
                            present
                        } else {
                            missing
                        }
                    }
                })
            }
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn field_value<'a>(object: &'a StoredObject, field: &str) -> Option<Cow<'a, Value>> {
    match field {
        "objectId" => Some(Cow::Owned(Value::String(object.id.clone()))),
        "createdAt" => Some(Cow::Owned(super::date_value(&object.created_at))),
        "updatedAt" => Some(Cow::Owned(super::date_value(&object.updated_at))),
        _ => object.data.get(field).filter(|v| !v.is_null()).map(Cow::Borrowed),
    }
}

fn matches_all(conditions: &[Condition], object: &StoredObject) -> bool {
    conditions.iter().all(|c| matches_condition(c, object))
}

fn matches_condition(condition: &Condition, object: &StoredObject) -> bool {
    match condition {
        Condition::Or(clauses) => clauses.iter().any(|c| matches_all(c, object)),
        Condition::And(clauses) => clauses.iter().all(|c| matches_all(c, object)),
        Condition::Field { field, op, value } => {
            let actual = field_value(object, field);
            let actual = actual.as_deref();
            match op {
                FilterOp::Eq => match actual {
                    None => value.is_null(),
                    Some(a) => values_equal(a, value),
                },
                FilterOp::Ne => match actual {
                    None => !value.is_null(),
                    Some(a) => !values_equal(a, value),
                },
                FilterOp::Gt => cmp_is(actual, value, |o| o == Ordering::Greater),
                FilterOp::Gte => cmp_is(actual, value, |o| o != Ordering::Less),
                FilterOp::Lt => cmp_is(actual, value, |o| o == Ordering::Less),
                FilterOp::Lte => cmp_is(actual, value, |o| o != Ordering::Greater),
                FilterOp::In => match (actual, value.as_array()) {
                    (Some(a), Some(values)) => values.iter().any(|v| values_equal(a, v)),
                    _ => false,
                },
                FilterOp::NIn => match (actual, value.as_array()) {
                    (Some(a), Some(values)) => !values.iter().any(|v| values_equal(a, v)),
                    _ => true,
                },
                FilterOp::Exists => actual.is_some() == value.as_bool().unwrap_or(true),
            }
        }
    }
}

fn cmp_is(actual: Option<&Value>, expected: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|a| compare_values(a, expected))
        .map(accept)
        .unwrap_or(false)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn date_iso(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("Date") => {
            map.get("iso").and_then(Value::as_str)
        }
        _ => None,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => Some(date_iso(a)?.cmp(date_iso(b)?)),
    }
}
