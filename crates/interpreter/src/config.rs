use serde::{Deserialize, Serialize};

/// Prefixes of the identifiers interpreters derive for spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub service_urn_prefix: String,
    pub service_instance_urn_prefix: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            service_urn_prefix: "urn:service:/".into(),
            service_instance_urn_prefix: "urn:service-instance:/".into(),
        }
    }
}

impl InterpreterConfig {
    pub fn service_urn(&self, service_name: &str) -> String {
        format!("{}{}", self.service_urn_prefix, service_name)
    }

    pub fn service_instance_urn(&self, service_name: &str, hostname: &str, pid: i64, create_time: i64) -> String {
        format!(
            "{}{}:/{}:{}:{}",
            self.service_instance_urn_prefix, service_name, hostname, pid, create_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urns() {
        let config = InterpreterConfig::default();
        assert_eq!(config.service_urn("api"), "urn:service:/api");
        assert_eq!(
            config.service_instance_urn("api", "host-1", 42, 1700000000),
            "urn:service-instance:/api:/host-1:42:1700000000"
        );
    }
}
