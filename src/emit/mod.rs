//! Writes the artifacts produced by a finished discovery.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use crate::errors::WizardError;
use crate::utils::persistence::write_atomic;

/// Placeholder written wherever discovery could not determine a value.
pub const MANUAL_CONFIGURATION: &str = "@@ MANUAL CONFIGURATION REQUIRED @@";

const OVERRIDE_FILE: &str = "override.yaml";
const MANIFEST_DIR: &str = "servo-manifests";
const CONFIG_FILE: &str = "config.yaml";
const SERVO_FILE: &str = "servo.yaml";

/// Everything emission needs, gathered by the root module.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub servo_config: Value,
    pub override_doc: Value,
    pub servo: ServoSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServoSettings {
    pub namespace: String,
    pub image: String,
    pub account: Option<String>,
    pub app: Option<String>,
    pub token: Option<String>,
}

pub trait ArtifactEmitter: Send + Sync {
    /// Writes every artifact and returns the paths written.
    fn emit(&self, bundle: &ArtifactBundle) -> Result<Vec<PathBuf>, WizardError>;
}

/// Emits YAML files under a root directory.
#[derive(Debug, Clone)]
pub struct YamlArtifacts {
    root: PathBuf,
}

impl YamlArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactEmitter for YamlArtifacts {
    fn emit(&self, bundle: &ArtifactBundle) -> Result<Vec<PathBuf>, WizardError> {
        let override_path = self.root.join(OVERRIDE_FILE);
        write_atomic(&override_path, &serde_yaml::to_string(&bundle.override_doc)?)?;

        let manifests = self.root.join(MANIFEST_DIR);
        let config_path = manifests.join(CONFIG_FILE);
        write_atomic(&config_path, &serde_yaml::to_string(&bundle.servo_config)?)?;

        let servo_path = manifests.join(SERVO_FILE);
        write_atomic(&servo_path, &servo_manifests(&bundle.servo)?)?;

        let written = vec![override_path, config_path, servo_path];
        info!(root = %self.root.display(), files = written.len(), "wrote discovery artifacts");
        Ok(written)
    }
}

fn or_manual(value: &Option<String>) -> String {
    value
        .clone()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| MANUAL_CONFIGURATION.to_string())
}

/// Secret and Deployment for the servo, as one multi-document YAML stream.
fn servo_manifests(servo: &ServoSettings) -> Result<String, WizardError> {
    let secret = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": "opsani-servo-auth", "namespace": servo.namespace },
        "type": "Opaque",
        "stringData": { "token": or_manual(&servo.token) },
    });
    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": "opsani-servo",
            "namespace": servo.namespace,
            "labels": { "comp": "opsani-servo" },
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "comp": "opsani-servo" } },
            "template": {
                "metadata": { "labels": { "comp": "opsani-servo" } },
                "spec": {
                    "serviceAccountName": "opsani-servo",
                    "containers": [{
                        "name": "main",
                        "image": servo.image,
                        "args": [or_manual(&servo.app), "--auth-token=/etc/opsani-servo-auth/token"],
                        "env": [{ "name": "OPTUNE_ACCOUNT", "value": or_manual(&servo.account) }],
                        "volumeMounts": [
                            { "name": "auth", "mountPath": "/etc/opsani-servo-auth", "readOnly": true },
                            { "name": "config", "mountPath": "/servo/config.yaml", "subPath": "config.yaml", "readOnly": true },
                        ],
                    }],
                    "volumes": [
                        { "name": "auth", "secret": { "secretName": "opsani-servo-auth" } },
                        { "name": "config", "configMap": { "name": "opsani-servo-config" } },
                    ],
                },
            },
        },
    });
    Ok(format!(
        "{}---\n{}",
        serde_yaml::to_string(&secret)?,
        serde_yaml::to_string(&deployment)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn bundle(token: Option<&str>) -> ArtifactBundle {
        ArtifactBundle {
            servo_config: json!({ "k8s": { "namespace": "shop" } }),
            override_doc: json!({ "optimization": { "perf": "metrics['main_request_rate']" } }),
            servo: ServoSettings {
                namespace: "shop".into(),
                image: "opsani/servo:latest".into(),
                account: Some("acme.com".into()),
                app: Some("web".into()),
                token: token.map(str::to_string),
            },
        }
    }

    #[test]
    fn writes_override_config_and_servo_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = YamlArtifacts::new(dir.path());
        let written = emitter.emit(&bundle(Some("t0k3n"))).unwrap();
        assert_eq!(written.len(), 3);

        let override_doc = fs::read_to_string(dir.path().join("override.yaml")).unwrap();
        assert!(override_doc.contains("main_request_rate"));

        let servo = fs::read_to_string(dir.path().join("servo-manifests/servo.yaml")).unwrap();
        assert!(servo.contains("kind: Secret"));
        assert!(servo.contains("kind: Deployment"));
        assert!(servo.contains("t0k3n"));
        assert!(!servo.contains(MANUAL_CONFIGURATION));
    }

    #[test]
    fn missing_values_carry_the_manual_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut incomplete = bundle(None);
        incomplete.servo.app = None;
        YamlArtifacts::new(dir.path()).emit(&incomplete).unwrap();
        let servo = fs::read_to_string(dir.path().join("servo-manifests/servo.yaml")).unwrap();
        assert_eq!(servo.matches(MANUAL_CONFIGURATION).count(), 2);
    }
}
