//! Workload description types.

use crate::prelude::*;
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::Path,
};

use serde::{Deserialize, Serialize};

/// Namespace used when the workload description leaves it out.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Optional security settings applied to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContextSpec {
    /// UID the container process runs as.
    pub run_as_user: Option<i64>,
    /// GID the container process runs as.
    pub run_as_group: Option<i64>,
    /// Run the container in privileged mode.
    pub privileged: Option<bool>,
}

/// Container template. One container per entry in the workload's pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerTemplate {
    /// Container name, unique within the workload.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint override. Empty keeps the image entrypoint.
    pub command: Vec<String>,
    /// Arguments passed to the entrypoint.
    pub args: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Security settings.
    pub security_context: Option<SecurityContextSpec>,
}

/// User-defined workload. Usually loaded from TOML files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KjobUserWorkload {
    /// Namespace to create the workload in. Defaults to `default`.
    pub namespace: Option<String>,
    /// Workload name. Mandatory.
    pub name: Option<String>,
    /// Number of successful pods required for completion.
    /// When unset the workload is complete once any pod succeeds and none is active.
    pub completions: Option<i32>,
    /// Maximum number of pods running at once.
    pub parallelism: Option<i32>,
    /// Number of retries before the cluster marks the workload failed. Defaults to 0.
    pub backoff_limit: Option<i32>,
    /// Labels put on every pod. Also used to select the workload's pods.
    pub labels: BTreeMap<String, String>,
    /// Container templates.
    pub containers: Vec<ContainerTemplate>,
}

impl KjobUserWorkload {
    /// Load a workload description from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file_path)?;
        Self::from_toml(&contents)
    }

    /// Parse a workload description from TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        Ok(toml::from_str(value)?)
    }
}

/// Fully resolved workload, ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Optional completion count.
    pub completions: Option<i32>,
    /// Optional parallelism.
    pub parallelism: Option<i32>,
    /// Retries allowed before the cluster gives up.
    pub backoff_limit: i32,
    /// Pod selector (match labels).
    pub selector: BTreeMap<String, String>,
    /// Container templates.
    pub containers: Vec<ContainerTemplate>,
}

impl WorkloadSpec {
    /// Convert a user workload into a resolved spec, applying defaults.
    pub fn from_user_workload(workload: KjobUserWorkload) -> Result<Self> {
        let spec = Self {
            namespace: workload
                .namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| String::from(DEFAULT_NAMESPACE)),
            name: workload.name.ok_or(Error::MissingField("name"))?,
            completions: workload.completions,
            parallelism: workload.parallelism,
            backoff_limit: workload.backoff_limit.unwrap_or(0),
            selector: workload.labels,
            containers: workload.containers,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check every mandatory field before the spec is submitted.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::MissingField("name"));
        }
        validate_dns_label("name", &self.name)?;
        if self.namespace.is_empty() {
            return Err(Error::MissingField("namespace"));
        }
        validate_dns_label("namespace", &self.namespace)?;

        if let Some(completions) = self.completions {
            if completions < 1 {
                return Err(Error::invalid("completions", "must be >= 1"));
            }
        }
        if let Some(parallelism) = self.parallelism {
            if parallelism < 1 {
                return Err(Error::invalid("parallelism", "must be >= 1"));
            }
        }
        if self.backoff_limit < 0 {
            return Err(Error::invalid("backoff_limit", "must be >= 0"));
        }

        if self.containers.is_empty() {
            return Err(Error::MissingField("containers"));
        }
        let mut names = HashSet::new();
        for (i, container) in self.containers.iter().enumerate() {
            if container.name.is_empty() {
                return Err(Error::MissingField("containers.name"));
            }
            if container.image.is_empty() {
                return Err(Error::invalid(
                    format!("containers[{i}].image"),
                    "image is mandatory",
                ));
            }
            if !names.insert(container.name.as_str()) {
                return Err(Error::invalid(
                    format!("containers[{i}].name"),
                    format!("duplicate container name {}", container.name),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for WorkloadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn validate_dns_label(field: &'static str, value: &str) -> Result<()> {
    if value.len() > 63 {
        return Err(Error::invalid(field, "must be at most 63 characters"));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !valid_chars || !alnum(value.chars().next()) || !alnum(value.chars().last()) {
        return Err(Error::invalid(
            field,
            format!("{value:?} is not a lowercase RFC 1123 label"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(content: &str) -> KjobUserWorkload {
        KjobUserWorkload::from_toml(content).expect("Failed to parse workload")
    }

    #[test]
    pub fn deserialize() -> Result<()> {
        let content = r#"
            namespace = "ci"
            name = "build-42"
            completions = 3
            parallelism = 2

            [labels]
            app = "builder"

            [[containers]]
            name = "main"
            image = "rust:1.85"
            command = ["cargo"]
            args = ["test", "--workspace"]
            working_dir = "/src"

            [containers.env]
            RUST_LOG = "debug"

            [containers.security_context]
            run_as_user = 1000
            privileged = false

            [[containers]]
            name = "sidecar"
            image = "busybox"
        "#;
        let spec = WorkloadSpec::from_user_workload(workload(content))?;
        assert_eq!(spec.namespace, "ci");
        assert_eq!(spec.name, "build-42");
        assert_eq!(spec.completions, Some(3));
        assert_eq!(spec.backoff_limit, 0);
        assert_eq!(spec.selector.get("app").map(String::as_str), Some("builder"));
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[0].env["RUST_LOG"], "debug");
        assert_eq!(
            spec.containers[0]
                .security_context
                .as_ref()
                .and_then(|s| s.run_as_user),
            Some(1000)
        );
        assert_eq!(spec.to_string(), "ci/build-42");
        Ok(())
    }

    #[test]
    fn defaults_namespace() -> Result<()> {
        let spec = WorkloadSpec::from_user_workload(workload(
            "name = \"job\"\n[[containers]]\nname = \"main\"\nimage = \"alpine\"",
        ))?;
        assert_eq!(spec.namespace, DEFAULT_NAMESPACE);
        assert_eq!(spec.completions, None);
        Ok(())
    }

    #[test]
    fn missing_name_fails_fast() {
        let err = WorkloadSpec::from_user_workload(workload(
            "[[containers]]\nname = \"main\"\nimage = \"alpine\"",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::MissingField("name")));
    }

    #[test]
    fn missing_containers_fails_fast() {
        let err = WorkloadSpec::from_user_workload(workload("name = \"job\"")).unwrap_err();
        assert!(matches!(err, Error::MissingField("containers")));
    }

    #[test]
    fn missing_image_fails_fast() {
        let err = WorkloadSpec::from_user_workload(workload(
            "name = \"job\"\n[[containers]]\nname = \"main\"",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "containers[0].image"));
    }

    #[test]
    fn duplicate_container_names_rejected() {
        let err = WorkloadSpec::from_user_workload(workload(
            r#"
            name = "job"
            [[containers]]
            name = "main"
            image = "alpine"
            [[containers]]
            name = "main"
            image = "busybox"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
    }

    #[test]
    fn rejects_invalid_names() {
        let too_long = "a".repeat(64);
        for name in ["Build", "-job", "job-", "job_1", too_long.as_str()] {
            let mut user = workload("[[containers]]\nname = \"main\"\nimage = \"alpine\"");
            user.name = Some(name.to_string());
            assert!(
                WorkloadSpec::from_user_workload(user).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_completions() {
        let err = WorkloadSpec::from_user_workload(workload(
            "name = \"job\"\ncompletions = 0\n[[containers]]\nname = \"main\"\nimage = \"alpine\"",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "completions"));
    }
}
