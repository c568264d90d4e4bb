use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Free-form property bag attached to components and relations.
pub type Data = serde_json::Map<String, Value>;

/// The logical stream a snapshot belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub url: String,
}

impl Instance {
    pub fn new(instance_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_type, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    pub external_id: String,
    #[serde(rename = "type", serialize_with = "type_name")]
    pub component_type: String,
    pub data: Data,
}

impl Component {
    pub fn new(external_id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            component_type: component_type.into(),
            data: Data::new(),
        }
    }

    /// Sets a data key, replacing any previous value.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    /// Alternative URNs under which the component is known.
    pub fn identifiers(&self) -> Vec<&str> {
        self.data
            .get("identifiers")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// The closed set of relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Encloses,
    EnclosedIn,
    ScheduledOn,
    Exposes,
    Claims,
    Mounts,
    Owns,
    RoutesTo,
    Uses,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Encloses => "encloses",
            RelationType::EnclosedIn => "enclosed_in",
            RelationType::ScheduledOn => "scheduled_on",
            RelationType::Exposes => "exposes",
            RelationType::Claims => "claims",
            RelationType::Mounts => "mounts",
            RelationType::Owns => "owns",
            RelationType::RoutesTo => "routes_to",
            RelationType::Uses => "uses",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    pub external_id: String,
    #[serde(rename = "type", serialize_with = "type_name")]
    pub relation_type: RelationType,
    pub source_id: String,
    pub target_id: String,
    pub data: Data,
}

impl Relation {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            external_id: format!("{}->{}", source_id, target_id),
            relation_type,
            source_id,
            target_id,
            data: Data::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

// Serializes a bare type name as `{"name": ...}`.
fn type_name<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: fmt::Display,
{
    let mut st = serializer.serialize_struct("Type", 1)?;
    st.serialize_field("name", &value.to_string())?;
    st.end()
}
