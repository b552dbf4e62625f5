//! Python-backed adapter for sklearn, PyTorch, Keras and ONNX artifacts.
//!
//! The artifact lives in a private temporary file owned by the adapter and is
//! removed when the adapter is dropped. The loader opens the artifact once to
//! confirm it deserializes and to read its input width; after that every batch
//! runs the adapter script once in a fresh interpreter.

use super::{Capabilities, ModelRuntime, Prediction, ProbabilityMatrix, label_from_json};
use crate::data::FeatureRow;
use crate::error::{FrameworkError, SmcpError, ValidationError, sanitize_runtime_message};
use crate::inference::formats::ArtifactSignature;
use crate::runtime::PythonRuntime;
use crate::types::{Domain, Framework};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::sync::OnceLock;
use tempfile::NamedTempFile;

/// Cap on the loader message kept in a `CorruptArtifact` reason.
const MAX_LOAD_ERROR_CHARS: usize = 240;

const ADAPTER_SCRIPT: &str = r#"
import json
import sys


def load(framework, path):
    if framework == "sklearn":
        import pickle
        with open(path, "rb") as fh:
            return pickle.load(fh)
    if framework == "pytorch":
        import torch
        model = torch.load(path, map_location="cpu", weights_only=False)
        model.eval()
        return model
    if framework in ("keras", "tensorflow"):
        try:
            import keras
        except ImportError:
            from tensorflow import keras
        return keras.models.load_model(path, compile=False)
    if framework == "onnx":
        import onnxruntime
        return onnxruntime.InferenceSession(path, providers=["CPUExecutionProvider"])
    raise ValueError("no adapter for framework " + framework)


def features(rows, domain):
    if domain == "text":
        return [" ".join("" if c is None else str(c) for c in row) for row in rows]
    import numpy as np
    return np.array([[np.nan if c is None else c for c in row] for row in rows], dtype=np.float32)


def scalar(value):
    if hasattr(value, "item"):
        value = value.item()
    if isinstance(value, bytes):
        value = value.decode("utf-8", "replace")
    return value


def tolist(values):
    if hasattr(values, "tolist"):
        values = values.tolist()
    return [tolist(v) if isinstance(v, (list, tuple)) else scalar(v) for v in values]


def raw_outputs(framework, model, X):
    if framework == "pytorch":
        import torch
        with torch.no_grad():
            return model(torch.as_tensor(X)).numpy()
    if framework in ("keras", "tensorflow"):
        return model.predict(X, verbose=0)
    if framework == "onnx":
        name = model.get_inputs()[0].name
        return model.run(None, {name: X})
    return None


def decode(domain, out):
    import numpy as np
    out = np.asarray(out)
    if domain == "classification":
        if out.ndim == 2 and out.shape[1] > 1:
            return out.argmax(axis=1)
        return (out.reshape(-1) > 0.5).astype(int)
    if domain == "vision":
        if out.ndim > 2:
            return out.argmax(axis=1).reshape(out.shape[0], -1)
        return (out > 0.5).astype(int)
    return out.reshape(out.shape[0], -1)[:, 0]


def predict(framework, model, X, domain):
    if framework == "sklearn":
        return tolist(model.predict(X))
    out = raw_outputs(framework, model, X)
    if framework == "onnx":
        # Converted sklearn graphs emit labels first; raw graphs emit scores.
        first = out[0]
        if domain in ("classification", "text") and getattr(first, "ndim", 2) == 1:
            return tolist(first)
        out = first
    return tolist(decode(domain, out))


def predict_proba(framework, model, X):
    import numpy as np
    if framework == "sklearn":
        if not hasattr(model, "predict_proba"):
            return None, None
        return tolist(model.classes_), tolist(model.predict_proba(X))
    out = raw_outputs(framework, model, X)
    if framework == "onnx":
        if len(out) < 2:
            return None, None
        probs = out[1]
        if isinstance(probs, list) and probs and isinstance(probs[0], dict):
            classes = sorted(probs[0].keys())
            return tolist(classes), [[float(row[c]) for c in classes] for row in probs]
        out = probs
    out = np.asarray(out, dtype=np.float64)
    if out.ndim != 2:
        return None, None
    if out.shape[1] == 1:
        p = out[:, 0]
        out = np.stack([1.0 - p, p], axis=1)
    elif framework == "pytorch":
        out = np.exp(out - out.max(axis=1, keepdims=True))
        out = out / out.sum(axis=1, keepdims=True)
    return list(range(out.shape[1])), out.tolist()


def width(shape):
    if shape is None or len(shape) != 2:
        return None
    last = shape[-1]
    return last if isinstance(last, int) else None


def input_dim(framework, model):
    if framework == "sklearn":
        n = getattr(model, "n_features_in_", None)
        return int(n) if n is not None else None
    if framework == "onnx":
        return width(model.get_inputs()[0].shape)
    if framework in ("keras", "tensorflow"):
        shape = getattr(model, "input_shape", None)
        if isinstance(shape, list):
            shape = shape[0] if len(shape) == 1 else None
        return width(shape)
    leaves = [m for m in model.modules() if not list(m.children())]
    n = getattr(leaves[0], "in_features", None) if leaves else None
    return n if isinstance(n, int) else None


def main():
    req = json.load(sys.stdin)
    framework = req["framework"]
    try:
        model = load(framework, req["artifact"])
    except ImportError:
        raise
    except Exception as exc:
        json.dump({"load_error": type(exc).__name__ + ": " + str(exc)}, sys.stdout)
        return

    op = req["op"]
    if op == "describe":
        json.dump({"input_dim": input_dim(framework, model)}, sys.stdout)
        return

    X = features(req["rows"], req["domain"])
    out = {}
    if op in ("predict", "predict_with_proba"):
        out["predictions"] = predict(framework, model, X, req["domain"])
    if op in ("predict_proba", "predict_with_proba"):
        out["classes"], out["probabilities"] = predict_proba(framework, model, X)
    json.dump(out, sys.stdout)


main()
"#;

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbaResponse {
    #[serde(default)]
    classes: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    probabilities: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    input_dim: Option<usize>,
}

/// File suffix the framework loaders expect for each container.
fn artifact_suffix(signature: ArtifactSignature) -> &'static str {
    match signature {
        ArtifactSignature::Pickle => ".pkl",
        ArtifactSignature::PytorchArchive => ".pt",
        ArtifactSignature::KerasArchive => ".keras",
        ArtifactSignature::Hdf5 => ".h5",
        ArtifactSignature::Onnx => ".onnx",
        _ => ".bin",
    }
}

/// Model executed by a Python framework runtime.
#[derive(Debug)]
pub struct PythonModel {
    framework: Framework,
    signature: ArtifactSignature,
    domain: Domain,
    runtime: PythonRuntime,
    artifact: NamedTempFile,
    input_dim: OnceLock<Option<usize>>,
}

impl PythonModel {
    /// Copy the artifact into a private temporary file.
    pub fn new(
        framework: Framework,
        signature: ArtifactSignature,
        domain: Domain,
        bytes: &[u8],
        runtime: PythonRuntime,
    ) -> Result<Self, SmcpError> {
        let mut artifact = tempfile::Builder::new()
            .prefix("smcp-artifact-")
            .suffix(artifact_suffix(signature))
            .tempfile()
            .map_err(|e| SmcpError::internal(format!("Failed to create artifact file: {e}")))?;
        artifact
            .write_all(bytes)
            .and_then(|()| artifact.flush())
            .map_err(|e| SmcpError::internal(format!("Failed to write artifact file: {e}")))?;

        Ok(Self {
            framework,
            signature,
            domain,
            runtime,
            artifact,
            input_dim: OnceLock::new(),
        })
    }

    async fn call(&self, op: &str, batch: &[FeatureRow]) -> Result<serde_json::Value, SmcpError> {
        let request = serde_json::json!({
            "framework": self.framework.as_str(),
            "artifact": self.artifact.path().to_string_lossy(),
            "domain": self.domain.as_str(),
            "op": op,
            "rows": batch,
        });
        let value = self
            .runtime
            .run_script(self.framework, ADAPTER_SCRIPT, &request)
            .await?;
        if let Some(reason) = value.get("load_error").and_then(|v| v.as_str()) {
            return Err(ValidationError::CorruptArtifact {
                container: self.signature.as_str().to_string(),
                reason: sanitize_runtime_message(reason, MAX_LOAD_ERROR_CHARS),
            }
            .into());
        }
        Ok(value)
    }

    fn probabilities(&self, response: ProbaResponse) -> Result<Option<ProbabilityMatrix>, SmcpError> {
        let (Some(classes), Some(rows)) = (response.classes, response.probabilities) else {
            return Ok(None);
        };
        let classes = classes
            .iter()
            .map(|c| label_from_json(c).ok_or_else(|| self.malformed(format!("class {c}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(ProbabilityMatrix { classes, rows }))
    }

    fn predictions(&self, raw: &[serde_json::Value]) -> Result<Vec<Prediction>, SmcpError> {
        raw.iter()
            .map(|value| {
                Prediction::from_json(self.domain, value)
                    .ok_or_else(|| self.malformed(format!("{value} is not a {} output", self.domain)))
            })
            .collect()
    }

    fn malformed(&self, what: impl std::fmt::Display) -> SmcpError {
        FrameworkError::inference(self.framework, format!("unexpected adapter output: {what}"))
            .into()
    }
}

#[async_trait]
impl ModelRuntime for PythonModel {
    fn framework(&self) -> Framework {
        self.framework
    }

    /// Text rows are joined into one string, so a declared width does not apply.
    fn input_dim(&self) -> Option<usize> {
        if self.domain == Domain::Text {
            return None;
        }
        self.input_dim.get().copied().flatten()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            predict_proba: self.domain == Domain::Classification,
            predict_distribution: false,
        }
    }

    async fn open(&self) -> Result<(), SmcpError> {
        let value = self.call("describe", &[]).await?;
        let response: DescribeResponse =
            serde_json::from_value(value).map_err(|e| self.malformed(e))?;
        let _ = self.input_dim.set(response.input_dim);
        Ok(())
    }

    async fn predict(&self, batch: &[FeatureRow]) -> Result<Vec<Prediction>, SmcpError> {
        let value = self.call("predict", batch).await?;
        let response: PredictResponse =
            serde_json::from_value(value).map_err(|e| self.malformed(e))?;
        self.predictions(&response.predictions)
    }

    async fn predict_proba(
        &self,
        batch: &[FeatureRow],
    ) -> Result<Option<ProbabilityMatrix>, SmcpError> {
        let value = self.call("predict_proba", batch).await?;
        let response: ProbaResponse =
            serde_json::from_value(value).map_err(|e| self.malformed(e))?;
        self.probabilities(response)
    }

    async fn predict_with_proba(
        &self,
        batch: &[FeatureRow],
    ) -> Result<(Vec<Prediction>, Option<ProbabilityMatrix>), SmcpError> {
        let value = self.call("predict_with_proba", batch).await?;
        let predictions: PredictResponse =
            serde_json::from_value(value.clone()).map_err(|e| self.malformed(e))?;
        let probabilities: ProbaResponse =
            serde_json::from_value(value).map_err(|e| self.malformed(e))?;
        Ok((
            self.predictions(&predictions.predictions)?,
            self.probabilities(probabilities)?,
        ))
    }
}
