//! Safetensors checkpoints with an `epoch` metadata entry.
//!
//! Files are named `model_epoch{N}.safetensors`. Loading matches stored names
//! to parameter names; if that fails, the leading dot-separated segment of
//! every stored name is dropped and matching is retried, so checkpoints
//! written from a wrapped module (`module.entity_user_embed`) still load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use safetensors::SafeTensors;
use tracing::{debug, info};

use crate::error::{Error, Result};

const EPOCH_KEY: &str = "epoch";

/// Path of the checkpoint for `epoch` under `dir`.
pub fn checkpoint_path(dir: impl AsRef<Path>, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("model_epoch{epoch}.safetensors"))
}

/// Write every variable of `varmap` to `path`.
pub fn save(varmap: &VarMap, path: impl AsRef<Path>, epoch: usize) -> Result<()> {
    let path = path.as_ref();
    let mut tensors: Vec<(String, Tensor)> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| Error::Checkpoint("parameter store lock poisoned".into()))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };
    tensors.sort_by(|a, b| a.0.cmp(&b.0));

    let metadata = Some(HashMap::from([(EPOCH_KEY.to_string(), epoch.to_string())]));
    safetensors::serialize_to_file(
        tensors.iter().map(|(name, t)| (name.as_str(), t)),
        &metadata,
        path,
    )?;
    info!(path = %path.display(), epoch, params = tensors.len(), "saved checkpoint");
    Ok(())
}

/// Read the epoch recorded in a checkpoint header.
fn read_epoch(bytes: &[u8]) -> Result<usize> {
    let (_, header) = SafeTensors::read_metadata(bytes)?;
    let raw = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(EPOCH_KEY))
        .ok_or_else(|| Error::Checkpoint("missing epoch metadata".into()))?;
    raw.parse()
        .map_err(|e| Error::Checkpoint(format!("epoch {raw:?}: {e}")))
}

fn strip_leading_segment(stored: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    stored
        .into_iter()
        .map(|(name, t)| match name.split_once('.') {
            Some((_, rest)) => (rest.to_string(), t),
            None => (name, t),
        })
        .collect()
}

/// Load `path` into the variables of `varmap`, returning the stored epoch.
///
/// Every variable must be present with its exact shape. I/O errors are
/// returned unmodified.
pub fn load(varmap: &VarMap, path: impl AsRef<Path>, device: &Device) -> Result<usize> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let epoch = read_epoch(&bytes)?;
    let mut stored = candle_core::safetensors::load_buffer(&bytes, device)?;

    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Checkpoint("parameter store lock poisoned".into()))?;
    if !data.keys().all(|k| stored.contains_key(k)) {
        debug!(path = %path.display(), "direct name match failed, dropping stored prefix");
        stored = strip_leading_segment(stored);
    }

    for (name, var) in data.iter() {
        let tensor = stored
            .get(name)
            .ok_or_else(|| Error::Checkpoint(format!("missing parameter {name:?}")))?;
        if tensor.dims() != var.dims() {
            return Err(Error::ShapeMismatch {
                name: name.clone(),
                expected: var.dims().to_vec(),
                got: tensor.dims().to_vec(),
            });
        }
        var.set(&tensor.to_dtype(var.dtype())?)?;
    }
    info!(path = %path.display(), epoch, "loaded checkpoint");
    Ok(epoch)
}
