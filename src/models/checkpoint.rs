//! Safetensors checkpoint holding encoder weights and the model schema.
//!
//! The schema travels as JSON in the safetensors metadata so a checkpoint is
//! self-describing: inference rebuilds the exact encoder (variant, widths,
//! categories, scalers) before copying weights in.

use super::encoder::{HeteroEncoder, ModelSchema};
use crate::error::{FraudError, Result};
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata key of the JSON model schema.
pub const SCHEMA_KEY: &str = "fraud_graph.model_schema";

/// Write the encoder atomically: temp file in the same directory, then rename.
pub fn save<P: AsRef<Path>>(encoder: &HeteroEncoder, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tensors: HashMap<String, Tensor> = {
        let data = encoder.varmap().data().lock().map_err(|_| {
            FraudError::StructuralMismatch("parameter store lock poisoned".to_string())
        })?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };

    let mut metadata = HashMap::new();
    metadata.insert(
        SCHEMA_KEY.to_string(),
        serde_json::to_string(encoder.schema())?,
    );
    let bytes = safetensors::serialize(tensors.iter(), &Some(metadata))?;

    let tmp = temp_path(path);
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;

    debug!(
        path = %path.display(),
        tensors = tensors.len(),
        bytes = bytes.len(),
        "Checkpoint written"
    );
    Ok(())
}

/// Schema stored in a checkpoint, without touching the weights.
pub fn read_schema<P: AsRef<Path>>(path: P) -> Result<ModelSchema> {
    let bytes = read_bytes(path.as_ref())?;
    schema_from_bytes(&bytes)
}

/// Rebuild the encoder described by a checkpoint and load its weights.
pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<HeteroEncoder> {
    let path = path.as_ref();
    let bytes = read_bytes(path)?;
    let schema = schema_from_bytes(&bytes)?;
    let encoder = HeteroEncoder::from_schema(schema, device)?;
    apply_weights(&encoder, &bytes, device)?;

    info!(
        path = %path.display(),
        variant = ?encoder.variant(),
        parameters = encoder.parameter_count(),
        "Checkpoint loaded"
    );
    Ok(encoder)
}

/// Like `load`, but the stored structure must equal `expected`.
pub fn load_matching<P: AsRef<Path>>(
    path: P,
    expected: &ModelSchema,
    device: &Device,
) -> Result<HeteroEncoder> {
    let encoder = load(path, device)?;
    ensure_same_structure(encoder.schema(), expected)?;
    Ok(encoder)
}

/// Hyper-parameters, variant and feature layout must agree; scalers may not.
pub fn ensure_same_structure(stored: &ModelSchema, expected: &ModelSchema) -> Result<()> {
    if stored.variant != expected.variant {
        return Err(FraudError::StructuralMismatch(format!(
            "checkpoint variant {:?}, expected {:?}",
            stored.variant, expected.variant
        )));
    }
    let dims = |s: &ModelSchema| (s.hidden, s.num_heads, s.num_layers);
    if dims(stored) != dims(expected) {
        return Err(FraudError::StructuralMismatch(format!(
            "checkpoint (hidden, heads, layers) = {:?}, expected {:?}",
            dims(stored),
            dims(expected)
        )));
    }
    stored.ensure_features_match(&expected.features)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => FraudError::CheckpointMissing(path.to_path_buf()),
        _ => FraudError::Io(e),
    })
}

fn schema_from_bytes(bytes: &[u8]) -> Result<ModelSchema> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)?;
    let json = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(SCHEMA_KEY))
        .ok_or_else(|| {
            FraudError::StructuralMismatch(format!("checkpoint has no '{}' metadata", SCHEMA_KEY))
        })?;
    Ok(serde_json::from_str(json)?)
}

fn apply_weights(encoder: &HeteroEncoder, bytes: &[u8], device: &Device) -> Result<()> {
    let stored = candle_core::safetensors::load_buffer(bytes, device)?;
    let data = encoder.varmap().data().lock().map_err(|_| {
        FraudError::StructuralMismatch("parameter store lock poisoned".to_string())
    })?;

    if let Some(extra) = stored.keys().find(|name| !data.contains_key(*name)) {
        return Err(FraudError::StructuralMismatch(format!(
            "checkpoint has unexpected weight '{}'",
            extra
        )));
    }
    for (name, var) in data.iter() {
        let tensor = stored.get(name).ok_or_else(|| {
            FraudError::StructuralMismatch(format!("checkpoint is missing weight '{}'", name))
        })?;
        if tensor.dims() != var.dims() {
            return Err(FraudError::StructuralMismatch(format!(
                "weight '{}' has shape {:?}, expected {:?}",
                name,
                tensor.dims(),
                var.dims()
            )));
        }
        var.set(tensor)?;
    }
    Ok(())
}

/// Pointer file next to the configured path naming the newest run-scoped
/// checkpoint.
pub fn latest_pointer(configured: &Path) -> PathBuf {
    suffixed(configured, ".latest")
}

/// Record `actual` as the checkpoint behind `configured`.
pub fn write_latest(configured: &Path, actual: &Path) -> Result<()> {
    let pointer = latest_pointer(configured);
    let tmp = temp_path(&pointer);
    fs::write(&tmp, actual.to_string_lossy().as_bytes())?;
    fs::rename(&tmp, &pointer)?;
    debug!(pointer = %pointer.display(), target = %actual.display(), "Latest checkpoint recorded");
    Ok(())
}

/// Drop the pointer so `configured` resolves to itself again.
pub fn clear_latest(configured: &Path) -> Result<()> {
    match fs::remove_file(latest_pointer(configured)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Checkpoint file to load for a configured path: the target of its pointer
/// when one exists, the configured path otherwise.
pub fn resolve(configured: &Path) -> Result<PathBuf> {
    match fs::read_to_string(latest_pointer(configured)) {
        Ok(target) => Ok(PathBuf::from(target.trim())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(configured.to_path_buf()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    suffixed(path, ".tmp")
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::graph::{build, GraphTensors};
    use crate::synthetic::{generate, SyntheticConfig};

    fn trained_shape_encoder() -> (HeteroEncoder, GraphTensors) {
        let tables = generate(&SyntheticConfig {
            users: 10,
            payments: 10,
            orders: 30,
            ..SyntheticConfig::default()
        })
        .unwrap();
        let graph = build(&tables).unwrap();
        let config = ModelConfig {
            hidden: 8,
            num_heads: 2,
            ..ModelConfig::default()
        };
        let encoder = HeteroEncoder::new(&config, &graph, &Device::Cpu).unwrap();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        (encoder, tensors)
    }

    #[test]
    fn test_round_trip_restores_logits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.safetensors");
        let (encoder, tensors) = trained_shape_encoder();

        save(&encoder, &path).unwrap();
        assert!(!temp_path(&path).exists());

        let restored = load_matching(&path, encoder.schema(), &Device::Cpu).unwrap();
        assert_eq!(restored.schema(), encoder.schema());
        let before = encoder.forward(&tensors).unwrap().to_vec1::<f32>().unwrap();
        let after = restored.forward(&tensors).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_resolve_follows_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("model.safetensors");
        let run = dir.path().join("model-run.safetensors");

        assert_eq!(resolve(&configured).unwrap(), configured);

        write_latest(&configured, &run).unwrap();
        assert_eq!(resolve(&configured).unwrap(), run);
        assert!(!temp_path(&latest_pointer(&configured)).exists());

        clear_latest(&configured).unwrap();
        clear_latest(&configured).unwrap();
        assert_eq!(resolve(&configured).unwrap(), configured);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_schema(dir.path().join("absent.safetensors"));
        assert!(matches!(result, Err(FraudError::CheckpointMissing(_))));
    }

    #[test]
    fn test_category_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let (encoder, _) = trained_shape_encoder();
        save(&encoder, &path).unwrap();

        let mut expected = encoder.schema().clone();
        expected.features.payment_categories.push("crypto".to_string());
        let result = load_matching(&path, &expected, &Device::Cpu);
        assert!(matches!(result, Err(FraudError::StructuralMismatch(_))));
    }
}
