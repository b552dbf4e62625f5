//! Resolves artifact bytes into a framework-opaque [`LoadedModel`].

use crate::error::{SmcpError, ValidationError};
use crate::inference::backends::{
    Capabilities, ModelRuntime, NativeModel, NativeRuntime, PythonModel,
};
use crate::inference::formats::{ArtifactSignature, detect_signature};
use crate::runtime::PythonRuntime;
use crate::types::{Domain, Framework};
use serde::{Deserialize, Serialize};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Non-fatal observation made while loading an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadWarning {
    /// The declared tag disagrees with the artifact; the artifact wins.
    FrameworkMismatch {
        declared: Framework,
        verified: Framework,
    },
    /// The artifact carries no task metadata to check the declared domain against.
    DomainUnverified { framework: Framework },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameworkMismatch { declared, verified } => write!(
                f,
                "framework_mismatch: declared {declared}, artifact is {verified}"
            ),
            Self::DomainUnverified { framework } => write!(
                f,
                "domain_unverified: {framework} artifacts do not declare their task"
            ),
        }
    }
}

/// A model ready for inference.
pub struct LoadedModel {
    /// Framework verified from the artifact.
    pub framework: Framework,
    pub declared_framework: Framework,
    pub domain: Domain,
    pub signature: ArtifactSignature,
    /// Hex SHA-256 of the artifact bytes.
    pub digest: String,
    pub warnings: Vec<LoadWarning>,
    runtime: Arc<dyn ModelRuntime>,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("framework", &self.framework)
            .field("declared_framework", &self.declared_framework)
            .field("domain", &self.domain)
            .field("signature", &self.signature)
            .field("digest", &self.digest)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    /// Wrap an already-open runtime.
    pub fn from_runtime(runtime: Arc<dyn ModelRuntime>, domain: Domain) -> Self {
        let framework = runtime.framework();
        Self {
            framework,
            declared_framework: framework,
            domain,
            signature: ArtifactSignature::Native,
            digest: String::new(),
            warnings: Vec::new(),
            runtime,
        }
    }

    pub fn runtime(&self) -> &dyn ModelRuntime {
        self.runtime.as_ref()
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.runtime.input_dim()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.runtime.capabilities()
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn artifact_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Builds adapters from artifact signatures.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    python: PythonRuntime,
}

impl ModelLoader {
    pub fn new(python: PythonRuntime) -> Self {
        Self { python }
    }

    /// Verify the artifact, build its adapter and open it. Artifact parsing
    /// and temp-file writes run on the blocking pool.
    pub async fn load(
        &self,
        bytes: Bytes,
        declared_framework: Framework,
        declared_domain: Domain,
    ) -> Result<LoadedModel, SmcpError> {
        let loader = self.clone();
        let model = tokio::task::spawn_blocking(move || {
            loader.prepare(&bytes, declared_framework, declared_domain)
        })
        .await
        .map_err(|e| SmcpError::internal(format!("model load task failed: {e}")))??;

        model.runtime.open().await?;
        debug!(
            framework = %model.framework,
            input_dim = ?model.input_dim(),
            "Opened model artifact"
        );
        Ok(model)
    }

    /// Verify the artifact and construct its adapter without opening it.
    pub fn prepare(
        &self,
        bytes: &[u8],
        declared_framework: Framework,
        declared_domain: Domain,
    ) -> Result<LoadedModel, SmcpError> {
        let signature = detect_signature(bytes)?;
        let framework = signature
            .framework()
            .ok_or_else(|| ValidationError::UnsupportedFormat {
                reason: format!(
                    "{} holds weights without an executable model",
                    signature.as_str()
                ),
            })?;
        let digest = artifact_digest(bytes);
        let mut warnings = Vec::new();

        if !declared_framework.is_compatible_with(framework) {
            warn!(
                declared = %declared_framework,
                verified = %framework,
                digest = %digest,
                "Declared framework does not match artifact; using artifact signature"
            );
            warnings.push(LoadWarning::FrameworkMismatch {
                declared: declared_framework,
                verified: framework,
            });
        }

        let runtime: Arc<dyn ModelRuntime> = match framework {
            Framework::Native => {
                let model = NativeModel::from_bytes(bytes)?;
                if model.domain() != declared_domain {
                    return Err(ValidationError::DomainMismatch {
                        declared: declared_domain,
                        artifact: model.domain(),
                    }
                    .into());
                }
                Arc::new(NativeRuntime::new(model))
            }
            _ => {
                warnings.push(LoadWarning::DomainUnverified { framework });
                Arc::new(PythonModel::new(
                    framework,
                    signature,
                    declared_domain,
                    bytes,
                    self.python.clone(),
                )?)
            }
        };

        debug!(
            framework = %framework,
            signature = signature.as_str(),
            digest = %digest,
            bytes = bytes.len(),
            "Loaded model artifact"
        );

        Ok(LoadedModel {
            framework,
            declared_framework,
            domain: declared_domain,
            signature,
            digest,
            warnings,
            runtime,
        })
    }
}
