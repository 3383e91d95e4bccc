//! Class definitions: typed fields, class-level permissions and the write
//! normalisation every stored object goes through.

pub mod classes;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::store::{date_value, file_value, pointer, Document};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Class {0} does not exist")]
    UnknownClass(String),

    #[error("Field {field} is not defined on {class_name}")]
    UnknownField { class_name: String, field: String },

    #[error("Field {field} on {class_name} must be a {expected}")]
    InvalidType {
        class_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("Field {field} must be a pointer to {target}")]
    InvalidPointer { field: String, target: String },

    #[error("Field {field} is required on {class_name}")]
    MissingRequired { class_name: String, field: String },

    #[error("Field {field} points to {target} {object_id}, which does not exist")]
    DanglingPointer {
        field: String,
        target: String,
        object_id: String,
    },

    #[error("Class {0} is declared twice")]
    DuplicateClass(String),

    #[error("Field {field} is declared twice on {class_name}")]
    DuplicateField { class_name: String, field: String },

    #[error("Field {field} on {class_name} targets unknown class {target}")]
    UnknownTarget {
        class_name: String,
        field: String,
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    Bytes,
    Polygon,
    Pointer,
    Relation,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Object => "Object",
            FieldType::Array => "Array",
            FieldType::GeoPoint => "GeoPoint",
            FieldType::File => "File",
            FieldType::Bytes => "Bytes",
            FieldType::Polygon => "Polygon",
            FieldType::Pointer => "Pointer",
            FieldType::Relation => "Relation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub target_class: Option<String>,
}

impl FieldDef {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            target_class: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, FieldType::Object)
    }

    pub fn array(name: &str) -> Self {
        Self::new(name, FieldType::Array)
    }

    pub fn geo_point(name: &str) -> Self {
        Self::new(name, FieldType::GeoPoint)
    }

    pub fn file(name: &str) -> Self {
        Self::new(name, FieldType::File)
    }

    pub fn bytes(name: &str) -> Self {
        Self::new(name, FieldType::Bytes)
    }

    pub fn polygon(name: &str) -> Self {
        Self::new(name, FieldType::Polygon)
    }

    pub fn pointer(name: &str, target_class: &str) -> Self {
        Self {
            target_class: Some(target_class.to_string()),
            ..Self::new(name, FieldType::Pointer)
        }
    }

    pub fn relation(name: &str, target_class: &str) -> Self {
        Self {
            target_class: Some(target_class.to_string()),
            ..Self::new(name, FieldType::Relation)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({ "type": self.field_type.as_str(), "required": self.required });
        if let Some(target) = &self.target_class {
            out["targetClass"] = Value::String(target.clone());
        }
        out
    }
}

/// Who may perform one operation: `"*"`, `"requiresAuthentication"`,
/// a user id or `"role:<name>"`.
pub type ClpRule = BTreeMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClpOperation {
    Find,
    Get,
    Count,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Clp {
    pub find: ClpRule,
    pub get: ClpRule,
    pub count: ClpRule,
    pub create: ClpRule,
    pub update: ClpRule,
    pub delete: ClpRule,
    #[serde(rename = "protectedFields")]
    pub protected_fields: BTreeMap<String, Vec<String>>,
}

fn rule(entries: &[&str]) -> ClpRule {
    entries.iter().map(|k| (k.to_string(), true)).collect()
}

impl Clp {
    fn uniform(entries: &[&str]) -> Self {
        Self {
            find: rule(entries),
            get: rule(entries),
            count: rule(entries),
            create: rule(entries),
            update: rule(entries),
            delete: rule(entries),
            protected_fields: BTreeMap::new(),
        }
    }

    /// Every operation open to everyone.
    pub fn public() -> Self {
        Self::uniform(&["*"])
    }

    /// Every operation open to any signed-in caller.
    pub fn authenticated() -> Self {
        Self::uniform(&["requiresAuthentication"])
    }

    pub fn restricted_to(roles: &[&str]) -> Self {
        let keys: Vec<String> = roles.iter().map(|r| format!("role:{}", r)).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        Self::uniform(&keys)
    }

    /// SuperAdmin plus the per-class `{Class}-role-{r,c,u,d}` roles.
    pub fn role_default(class_name: &str, is_public: bool) -> Self {
        let read = format!("role:{}-role-r", class_name);
        let mut read_rule = rule(&["role:SuperAdmin", &read]);
        if is_public {
            read_rule.insert("*".to_string(), true);
        }
        Self {
            find: read_rule.clone(),
            get: read_rule.clone(),
            count: read_rule,
            create: rule(&["role:SuperAdmin", &format!("role:{}-role-c", class_name)]),
            update: rule(&["role:SuperAdmin", &format!("role:{}-role-u", class_name)]),
            delete: rule(&["role:SuperAdmin", &format!("role:{}-role-d", class_name)]),
            protected_fields: BTreeMap::new(),
        }
    }

    pub fn rule(&self, op: ClpOperation) -> &ClpRule {
        match op {
            ClpOperation::Find => &self.find,
            ClpOperation::Get => &self.get,
            ClpOperation::Count => &self.count,
            ClpOperation::Create => &self.create,
            ClpOperation::Update => &self.update,
            ClpOperation::Delete => &self.delete,
        }
    }

    pub fn allows(&self, op: ClpOperation, user_id: Option<&str>, roles: &[String]) -> bool {
        let rule = self.rule(op);
        let granted = |key: &str| rule.get(key).copied().unwrap_or(false);

        if granted("*") {
            return true;
        }
        let Some(user_id) = user_id else {
            return false;
        };
        granted("requiresAuthentication")
            || granted(user_id)
            || roles.iter().any(|role| granted(&format!("role:{}", role)))
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub clp: Option<Clp>,
    pub is_public: bool,
}

impl ClassDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            clp: None,
            is_public: false,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_clp(mut self, clp: Clp) -> Self {
        self.clp = Some(clp);
        self
    }

    /// Open read operations to everyone when the default role CLP applies.
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn effective_clp(&self) -> Clp {
        self.clp
            .clone()
            .unwrap_or_else(|| Clp::role_default(&self.name, self.is_public))
    }
}

/// A pointer value found while normalising a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRef {
    pub field: String,
    pub class_name: String,
    pub object_id: String,
}

/// Fields maintained by the store; stripped from incoming documents.
const SYSTEM_FIELDS: &[&str] = &["objectId", "className", "createdAt", "updatedAt", "ACL"];

#[derive(Debug, Clone)]
pub struct Schema {
    classes: BTreeMap<String, ClassDef>,
}

impl Schema {
    pub fn new(defs: Vec<ClassDef>) -> Result<Self, SchemaError> {
        let mut classes = BTreeMap::new();
        for def in defs {
            let mut seen = HashSet::new();
            for field in &def.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        class_name: def.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            if classes.contains_key(&def.name) {
                return Err(SchemaError::DuplicateClass(def.name));
            }
            classes.insert(def.name.clone(), def);
        }

        for def in classes.values() {
            for field in &def.fields {
                if let Some(target) = &field.target_class {
                    if !classes.contains_key(target) {
                        return Err(SchemaError::UnknownTarget {
                            class_name: def.name.clone(),
                            field: field.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { classes })
    }

    /// The application's class table.
    pub fn standard() -> Result<Self, SchemaError> {
        Self::new(classes::all())
    }

    pub fn class(&self, name: &str) -> Result<&ClassDef, SchemaError> {
        self.classes
            .get(name)
            .ok_or_else(|| SchemaError::UnknownClass(name.to_string()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }

    pub fn clp(&self, class_name: &str) -> Result<Clp, SchemaError> {
        Ok(self.class(class_name)?.effective_clp())
    }

    /// `{className, fields, classLevelPermissions}` for one class.
    pub fn schema_definition(&self, class_name: &str) -> Result<Value, SchemaError> {
        let def = self.class(class_name)?;
        let fields: Map<String, Value> = def
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json()))
            .collect();
        Ok(json!({
            "className": def.name,
            "fields": fields,
            "classLevelPermissions": def.effective_clp(),
        }))
    }

    pub fn definitions(&self) -> Vec<Value> {
        self.classes
            .keys()
            .filter_map(|name| self.schema_definition(name).ok())
            .collect()
    }

    /// Coerce a document to the declared field types. Returns the pointers
    /// it holds so the caller can check they resolve.
    pub fn normalize(&self, class_name: &str, data: &mut Document) -> Result<Vec<PointerRef>, SchemaError> {
        let def = self.class(class_name)?;
        for field in SYSTEM_FIELDS {
            data.remove(*field);
        }

        let mut pointers = Vec::new();
        let keys: Vec<String> = data.keys().cloned().collect();
        for key in keys {
            if key.starts_with('_') {
                continue;
            }
            let field = def.field_def(&key).ok_or_else(|| SchemaError::UnknownField {
                class_name: class_name.to_string(),
                field: key.clone(),
            })?;

            let Some(value) = data.remove(&key) else { continue };
            if value.is_null() {
                continue;
            }
            let value = normalize_value(class_name, field, value)?;
            if field.field_type == FieldType::Pointer {
                if let Some(id) = crate::store::pointer_target_id(&value) {
                    pointers.push(PointerRef {
                        field: key.clone(),
                        class_name: field.target_class.clone().unwrap_or_default(),
                        object_id: id.to_string(),
                    });
                }
            }
            data.insert(key, value);
        }

        for field in def.fields.iter().filter(|f| f.required) {
            if data.get(&field.name).map_or(true, Value::is_null) {
                return Err(SchemaError::MissingRequired {
                    class_name: class_name.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(pointers)
    }
}

fn has_type(map: &Map<String, Value>, type_name: &str) -> bool {
    map.get("__type").and_then(Value::as_str) == Some(type_name)
}

fn normalize_value(class_name: &str, field: &FieldDef, value: Value) -> Result<Value, SchemaError> {
    let invalid = || SchemaError::InvalidType {
        class_name: class_name.to_string(),
        field: field.name.clone(),
        expected: field.field_type.as_str(),
    };

    match field.field_type {
        FieldType::String => value.is_string().then_some(value).ok_or_else(invalid),
        FieldType::Number => value.is_number().then_some(value).ok_or_else(invalid),
        FieldType::Boolean => value.is_boolean().then_some(value).ok_or_else(invalid),
        FieldType::Object => value.is_object().then_some(value).ok_or_else(invalid),
        FieldType::Array => value.is_array().then_some(value).ok_or_else(invalid),
        FieldType::Date => {
            let iso = match &value {
                Value::String(s) => s.as_str(),
                Value::Object(map) if has_type(map, "Date") => {
                    map.get("iso").and_then(Value::as_str).ok_or_else(invalid)?
                }
                _ => return Err(invalid()),
            };
            let at = DateTime::parse_from_rfc3339(iso).map_err(|_| invalid())?;
            Ok(date_value(&at.with_timezone(&Utc)))
        }
        FieldType::File => match &value {
            Value::String(name) if !name.is_empty() => Ok(file_value(name)),
            Value::Object(map) if has_type(map, "File") => match map.get("name").and_then(Value::as_str) {
                Some(name) => Ok(file_value(name)),
                None => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        FieldType::Bytes => match value {
            Value::String(base64) => Ok(json!({"__type": "Bytes", "base64": base64})),
            Value::Object(ref map) if has_type(map, "Bytes") && map.get("base64").map_or(false, Value::is_string) => {
                Ok(value)
            }
            _ => Err(invalid()),
        },
        FieldType::GeoPoint => match &value {
            Value::Object(map)
                if has_type(map, "GeoPoint")
                    && map.get("latitude").map_or(false, Value::is_number)
                    && map.get("longitude").map_or(false, Value::is_number) =>
            {
                Ok(value)
            }
            _ => Err(invalid()),
        },
        FieldType::Polygon => match &value {
            Value::Object(map) if has_type(map, "Polygon") && map.get("coordinates").map_or(false, Value::is_array) => {
                Ok(value)
            }
            _ => Err(invalid()),
        },
        FieldType::Pointer => {
            let target = field.target_class.clone().unwrap_or_default();
            let bad_pointer = || SchemaError::InvalidPointer {
                field: field.name.clone(),
                target: target.clone(),
            };
            match &value {
                Value::String(id) if !id.is_empty() => Ok(pointer(&target, id)),
                Value::Object(map) => {
                    let class_matches = map.get("className").and_then(Value::as_str) == Some(target.as_str());
                    match map.get("objectId").and_then(Value::as_str) {
                        Some(id) if class_matches && !id.is_empty() => Ok(pointer(&target, id)),
                        _ => Err(bad_pointer()),
                    }
                }
                _ => Err(bad_pointer()),
            }
        }
        FieldType::Relation => match &value {
            Value::Object(map)
                if has_type(map, "Relation")
                    && map.get("className").and_then(Value::as_str) == field.target_class.as_deref() =>
            {
                Ok(value)
            }
            _ => Err(invalid()),
        },
    }
}
