//! Atomic artifact writes and the run manifest.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use perpcheck_shared::{ArtifactMeta, PerpcheckError, Result, RunManifest};

/// A named file body to be written.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Artifact {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Write `content` to a dot-prefixed temp file next to `target`, then rename.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PerpcheckError::validation(format!("{} has no file name", target.display())))?;
    let temp = dir.join(format!(".{name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| PerpcheckError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| PerpcheckError::io(target, e))?;
    Ok(())
}

/// Pretty-printed JSON, written atomically.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(|e| PerpcheckError::serialization(path, e))?;
    write_atomic(path, &json)?;
    debug!(path = %path.display(), bytes = json.len(), "wrote JSON file");
    Ok(())
}

/// Hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Write every artifact into `out_dir` (created if needed) and return their
/// checksums in input order.
#[instrument(skip_all, fields(out_dir = %out_dir.display(), artifact_count = artifacts.len()))]
pub fn write_artifacts(out_dir: &Path, artifacts: &[Artifact]) -> Result<Vec<ArtifactMeta>> {
    std::fs::create_dir_all(out_dir).map_err(|e| PerpcheckError::io(out_dir, e))?;

    let mut metas = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let target = out_dir.join(&artifact.filename);
        write_atomic(&target, &artifact.content)?;
        debug!(file = %artifact.filename, size = artifact.content.len(), "wrote artifact");

        metas.push(ArtifactMeta {
            filename: artifact.filename.clone(),
            sha256: sha256_hex(&artifact.content),
            size_bytes: artifact.content.len(),
        });
    }

    info!(count = metas.len(), "artifacts written");
    Ok(metas)
}

/// Write `manifest` as `out_dir/filename`.
pub fn write_manifest(out_dir: &Path, filename: &str, manifest: &RunManifest) -> Result<PathBuf> {
    let path = out_dir.join(filename);
    write_json(&path, manifest)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use perpcheck_shared::{CURRENT_SCHEMA_VERSION, RunId};

    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("perpcheck-report-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn writes_files_with_checksums() {
        let tmp = temp_dir();
        let artifacts = vec![
            Artifact::new("analysis.txt", "MISMATCH DISTRIBUTION\n"),
            Artifact::new("analysis_charts.svg", "<svg></svg>\n"),
        ];

        let metas = write_artifacts(&tmp, &artifacts).unwrap();

        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].filename, "analysis.txt");
        assert_eq!(metas[0].sha256.len(), 64);
        assert_eq!(metas[0].size_bytes, 22);
        assert_eq!(
            std::fs::read_to_string(tmp.join("analysis_charts.svg")).unwrap(),
            "<svg></svg>\n"
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn checksum_is_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = temp_dir();
        write_artifacts(&tmp, &[Artifact::new("a.txt", "x")]).unwrap();
        write_json(&tmp.join("b.json"), &serde_json::json!({"k": 1})).unwrap();

        for entry in std::fs::read_dir(&tmp).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn manifest_lists_artifacts() {
        let tmp = temp_dir();
        let metas = write_artifacts(&tmp, &[Artifact::new("analysis.txt", "x")]).unwrap();
        let manifest = RunManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            tool_version: "0.1.0-test".into(),
            created_at: Utc::now(),
            view: "raw".into(),
            input: "comparison_output.json".into(),
            input_generated_at: Utc::now(),
            window: None,
            artifacts: metas,
        };

        let path = write_manifest(&tmp, "manifest.json", &manifest).unwrap();
        let parsed: RunManifest =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.artifacts.len(), 1);
        assert_eq!(parsed.artifacts[0].filename, "analysis.txt");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
