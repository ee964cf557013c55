/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Schema identifiers and field-level encoding specifications.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Versioned identifier of a message schema.
///
/// The canonical textual form is `name@major.minor.patch`. The short forms
/// `name.v1`, `name.v1.2` and `name.v1.2.3` are accepted when parsing; missing
/// components default to zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaId {
    name: String,
    version: Version,
}

impl SchemaId {
    /// Creates an id from a name and a version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The schema name without version.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    fn parse_short(raw: &str) -> Option<Self> {
        let (name, tail) = raw.rsplit_once(".v")?;
        let mut parts = [0_u64; 3];
        let mut count = 0;
        for piece in tail.split('.') {
            if count == 3 || piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            parts[count] = piece.parse().ok()?;
            count += 1;
        }
        if count == 0 || name.is_empty() {
            return None;
        }
        Some(Self::new(name, Version::new(parts[0], parts[1], parts[2])))
    }
}

/// Error returned for unparseable schema ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIdParseError(String);

impl fmt::Display for SchemaIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid schema id '{}': expected name@x.y.z or name.vN",
            self.0
        )
    }
}

impl std::error::Error for SchemaIdParseError {}

impl FromStr for SchemaId {
    type Err = SchemaIdParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some((name, version)) = raw.split_once('@') {
            let version =
                Version::parse(version).map_err(|_| SchemaIdParseError(raw.to_string()))?;
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(SchemaIdParseError(raw.to_string()));
            }
            return Ok(Self::new(name, version));
        }
        Self::parse_short(raw).ok_or_else(|| SchemaIdParseError(raw.to_string()))
    }
}

impl TryFrom<String> for SchemaId {
    type Error = SchemaIdParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<SchemaId> for String {
    fn from(id: SchemaId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Wire format of a schema's payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// MessagePack with named fields.
    #[serde(alias = "msgpack")]
    MessagePack,
}

/// Kind of value a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// `true` or `false`.
    Bool,
    /// A signed or unsigned integer.
    Integer,
    /// Any number; integers are accepted.
    Float,
    /// A string.
    String,
    /// An array of integers in `0..=255`.
    Bytes,
    /// Any array.
    Array,
    /// Any object.
    Object,
    /// Anything, including null.
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::String => value.is_string(),
            Self::Bytes => value.as_array().is_some_and(|items| {
                items
                    .iter()
                    .all(|item| item.as_u64().is_some_and(|byte| byte <= 255))
            }),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// One declared field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Accepted kind.
    pub kind: FieldKind,
    /// Whether the field must be present and non-null.
    #[serde(default)]
    pub required: bool,
}

/// Wire format plus the ordered list of fields of a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncodingSpec {
    /// Payload format.
    #[serde(default)]
    pub format: Format,
    /// Declared fields, in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl EncodingSpec {
    /// An empty JSON spec.
    #[must_use]
    pub const fn json() -> Self {
        Self {
            format: Format::Json,
            fields: Vec::new(),
        }
    }

    /// An empty MessagePack spec.
    #[must_use]
    pub const fn message_pack() -> Self {
        Self {
            format: Format::MessagePack,
            fields: Vec::new(),
        }
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Checks a value against the declared fields.
    ///
    /// The value must be an object. Undeclared fields are rejected, required fields
    /// must be present and non-null, and every non-null declared field must match its
    /// kind. Returns the first violation.
    ///
    /// # Errors
    ///
    /// A human-readable description of the violation.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(object) = value.as_object() else {
            return Err("payload must be an object".to_string());
        };

        if let Some(unknown) = object.keys().find(|key| self.field(key).is_none()) {
            return Err(format!("undeclared field '{unknown}'"));
        }
        self.check_declared(object)
    }

    /// Strips undeclared fields from `value`, then checks the declared ones.
    ///
    /// Readers use this so a payload written by a later minor version, which may
    /// carry extra optional fields, still decodes.
    ///
    /// # Errors
    ///
    /// A human-readable description of the violation.
    pub fn validate_lenient(&self, value: &mut Value) -> Result<(), String> {
        let Some(object) = value.as_object_mut() else {
            return Err("payload must be an object".to_string());
        };
        object.retain(|key, _| self.fields.iter().any(|field| &field.name == key));
        self.check_declared(object)
    }

    fn check_declared(&self, object: &serde_json::Map<String, Value>) -> Result<(), String> {
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(present) if !field.kind.accepts(present) => {
                    return Err(format!(
                        "field '{}' is not of kind {}",
                        field.name, field.kind
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Checks that `newer` may follow `older` within one major version line.
///
/// A minor bump keeps the format, keeps every field with the same kind and
/// required-ness, and may only add optional fields. A patch bump (same minor) must
/// have an identical field set.
pub(crate) fn check_successor(
    older: (&Version, &EncodingSpec),
    newer: (&Version, &EncodingSpec),
) -> Result<(), String> {
    let (old_version, old_spec) = older;
    let (new_version, new_spec) = newer;

    if old_spec.format != new_spec.format {
        return Err(format!(
            "wire format changed between {old_version} and {new_version}"
        ));
    }

    for old_field in &old_spec.fields {
        let Some(new_field) = new_spec.field(&old_field.name) else {
            return Err(format!(
                "field '{}' of {old_version} removed in {new_version}",
                old_field.name
            ));
        };
        if new_field.kind != old_field.kind {
            return Err(format!(
                "field '{}' changed kind from {} to {}",
                old_field.name, old_field.kind, new_field.kind
            ));
        }
        if new_field.required != old_field.required {
            return Err(format!(
                "field '{}' changed required-ness",
                old_field.name
            ));
        }
    }

    let added: Vec<&FieldSpec> = new_spec
        .fields
        .iter()
        .filter(|field| old_spec.field(&field.name).is_none())
        .collect();

    if old_version.minor == new_version.minor {
        if let Some(field) = added.first() {
            return Err(format!(
                "patch release {new_version} adds field '{}'",
                field.name
            ));
        }
    } else if let Some(field) = added.iter().find(|field| field.required) {
        return Err(format!(
            "minor release {new_version} adds required field '{}'",
            field.name
        ));
    }
    Ok(())
}
