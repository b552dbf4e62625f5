//! Model artifact signature detection.
//!
//! Artifacts are identified from their bytes, never from a file name.

use crate::error::ValidationError;
use crate::types::Framework;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Marker carried by native JSON model containers.
pub const NATIVE_FORMAT_MARKER: &str = "smcp-native";

const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
/// Smallest HDF5 superblock (version 0) including the magic.
const HDF5_MIN_SUPERBLOCK: usize = 56;
/// ModelProto tags that may follow `ir_version` (producer_name .. functions).
const ONNX_FOLLOW_TAGS: &[u8] = &[0x12, 0x1a, 0x22, 0x28, 0x32, 0x3a, 0x42, 0x72, 0xa2, 0xaa];

/// Container layout recognised from an artifact's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSignature {
    Pickle,
    PytorchArchive,
    KerasArchive,
    Hdf5,
    Onnx,
    Native,
    SafeTensors,
    Gguf,
}

impl ArtifactSignature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickle => "pickle",
            Self::PytorchArchive => "pytorch archive",
            Self::KerasArchive => "keras archive",
            Self::Hdf5 => "hdf5",
            Self::Onnx => "onnx",
            Self::Native => "native",
            Self::SafeTensors => "safetensors",
            Self::Gguf => "gguf",
        }
    }

    /// Framework whose adapter executes this container, if any.
    pub fn framework(&self) -> Option<Framework> {
        match self {
            Self::Pickle => Some(Framework::Sklearn),
            Self::PytorchArchive => Some(Framework::Pytorch),
            Self::KerasArchive | Self::Hdf5 => Some(Framework::Keras),
            Self::Onnx => Some(Framework::Onnx),
            Self::Native => Some(Framework::Native),
            // Weight-only containers: no executable graph.
            Self::SafeTensors | Self::Gguf => None,
        }
    }
}

/// Identify an artifact's container from its bytes.
///
/// Returns `CorruptArtifact` when a container is recognised but its structure
/// is damaged, and `UnsupportedFormat` when nothing matches.
pub fn detect_signature(bytes: &[u8]) -> Result<ArtifactSignature, ValidationError> {
    if bytes.is_empty() {
        return Err(unsupported("artifact is empty"));
    }

    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        return inspect_zip(bytes);
    }
    if bytes.starts_with(HDF5_MAGIC) {
        if bytes.len() < HDF5_MIN_SUPERBLOCK {
            return Err(corrupt("hdf5", "truncated superblock"));
        }
        return Ok(ArtifactSignature::Hdf5);
    }
    if bytes.starts_with(b"GGUF") {
        return Ok(ArtifactSignature::Gguf);
    }
    if is_safetensors(bytes) {
        return Ok(ArtifactSignature::SafeTensors);
    }
    if bytes[0] == 0x80 && bytes.len() > 1 && (2..=5).contains(&bytes[1]) {
        // Every pickle stream ends with the STOP opcode.
        if bytes.len() < 3 || bytes[bytes.len() - 1] != b'.' {
            return Err(corrupt("pickle", "stream is truncated (no STOP opcode)"));
        }
        return Ok(ArtifactSignature::Pickle);
    }
    if is_native(bytes) {
        return Ok(ArtifactSignature::Native);
    }
    if is_onnx(bytes) {
        return Ok(ArtifactSignature::Onnx);
    }

    Err(unsupported("unrecognised artifact signature"))
}

fn inspect_zip(bytes: &[u8]) -> Result<ArtifactSignature, ValidationError> {
    let archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt("zip", e.to_string()))?;

    let names: Vec<&str> = archive.file_names().collect();
    // torch.save archives nest entries under "<name>/".
    if names
        .iter()
        .any(|n| *n == "data.pkl" || n.ends_with("/data.pkl"))
    {
        return Ok(ArtifactSignature::PytorchArchive);
    }
    if names.contains(&"config.json") && names.iter().any(|n| n.ends_with(".weights.h5")) {
        return Ok(ArtifactSignature::KerasArchive);
    }
    Err(unsupported("zip archive without a recognised model layout"))
}

fn is_safetensors(bytes: &[u8]) -> bool {
    let Some(len_bytes) = bytes.get(..8) else {
        return false;
    };
    let mut buf = [0u8; 8];
    buf.copy_from_slice(len_bytes);
    let header_len = u64::from_le_bytes(buf);
    let Some(end) = usize::try_from(header_len)
        .ok()
        .and_then(|n| n.checked_add(8))
    else {
        return false;
    };
    let Some(header) = bytes.get(8..end) else {
        return false;
    };
    header.first() == Some(&b'{') && header.trim_ascii_end().last() == Some(&b'}')
}

/// Top-level `format` key of a JSON container; other keys are ignored.
#[derive(Deserialize)]
struct FormatTag {
    format: String,
}

fn is_native(bytes: &[u8]) -> bool {
    if bytes.trim_ascii_start().first() != Some(&b'{') {
        return false;
    }
    match serde_json::from_slice::<FormatTag>(bytes) {
        Ok(tag) => tag.format == NATIVE_FORMAT_MARKER,
        // Damaged JSON that still names the marker goes to the native
        // parser, which reports it as corrupt.
        Err(_) => {
            let text = String::from_utf8_lossy(bytes);
            text.contains("\"format\"") && text.contains(NATIVE_FORMAT_MARKER)
        }
    }
}

fn is_onnx(bytes: &[u8]) -> bool {
    // Field 1 (ir_version), wire type varint.
    if bytes.first() != Some(&0x08) {
        return false;
    }
    let mut value: u64 = 0;
    let mut pos = 1;
    for shift in (0..64).step_by(7) {
        let Some(&b) = bytes.get(pos) else {
            return false;
        };
        value |= u64::from(b & 0x7f) << shift;
        pos += 1;
        if b & 0x80 == 0 {
            break;
        }
    }
    (1..=20).contains(&value)
        && bytes
            .get(pos)
            .is_some_and(|tag| ONNX_FOLLOW_TAGS.contains(tag))
}

fn unsupported(reason: impl Into<String>) -> ValidationError {
    ValidationError::UnsupportedFormat {
        reason: reason.into(),
    }
}

fn corrupt(container: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::CorruptArtifact {
        container: container.to_string(),
        reason: reason.into(),
    }
}
