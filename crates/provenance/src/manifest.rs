//! Scene folder manifest verification
//!
//! A scene folder carries `manifest.json` listing each file with its
//! SHA256. Verification re-hashes every declared file and reports a
//! status per entry; it never writes to the database. Entries whose path
//! would leave the scene folder are reported, not read.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Manifest file name inside a scene folder
pub const MANIFEST_FILE: &str = "manifest.json";

/// Parsed `manifest.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

/// One declared file; unknown fields are ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the scene folder
    pub path: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ManifestEntry {
    /// Declared kind, or one inferred from the file name
    pub fn kind(&self) -> Option<String> {
        self.kind.clone().or_else(|| infer_kind(&self.path))
    }
}

impl Manifest {
    /// Read `<scene_folder>/manifest.json`
    pub fn load(scene_folder: &Path) -> Result<Self> {
        let path = scene_folder.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| Error::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Manifest {
            path,
            reason: e.to_string(),
        })
    }
}

/// Outcome for one manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Missing,
    HashMismatch { expected: String, actual: String },
    /// Hash matches but the declared byte size does not
    SizeMismatch { expected: u64, actual: u64 },
    /// Exists but cannot be read as a file (directory, permissions)
    Unreadable { reason: String },
    /// Path is absolute or climbs out of the scene folder
    OutsideFolder,
}

/// Verification outcome of one declared file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCheck {
    /// Path as declared in the manifest
    pub path: String,
    pub kind: Option<String>,
    pub status: CheckStatus,
    /// Bytes hashed, when the file could be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AssetCheck {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

impl fmt::Display for AssetCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            CheckStatus::Passed => write!(f, "{}: ok", self.path),
            CheckStatus::Missing => write!(f, "{}: missing", self.path),
            CheckStatus::HashMismatch { expected, actual } => write!(
                f,
                "{}: hash mismatch (expected {}, got {})",
                self.path, expected, actual
            ),
            CheckStatus::SizeMismatch { expected, actual } => write!(
                f,
                "{}: size mismatch (expected {} bytes, got {})",
                self.path, expected, actual
            ),
            CheckStatus::Unreadable { reason } => write!(f, "{}: unreadable ({})", self.path, reason),
            CheckStatus::OutsideFolder => write!(f, "{}: outside scene folder", self.path),
        }
    }
}

/// Result of verifying a scene folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub scene_folder: PathBuf,
    /// True iff every check passed
    pub ok: bool,
    pub checks: Vec<AssetCheck>,
}

impl VerificationResult {
    fn new(scene_folder: PathBuf, checks: Vec<AssetCheck>) -> Self {
        let ok = checks.iter().all(AssetCheck::passed);
        Self {
            scene_folder,
            ok,
            checks,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssetCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    /// Turn a failing result into [`Error::Integrity`] listing every failure.
    pub fn into_integrity_result(self) -> Result<Self> {
        if self.ok {
            return Ok(self);
        }
        let failures = self.failures().cloned().collect();
        Err(Error::Integrity {
            context: self.scene_folder.display().to_string(),
            failures,
        })
    }
}

/// Verify every file declared in `<scene_folder>/manifest.json`.
///
/// An unreadable or malformed manifest is an error; file-level problems
/// are reported in the result.
pub fn verify(scene_folder: impl AsRef<Path>) -> Result<VerificationResult> {
    let scene_folder = scene_folder.as_ref();
    let manifest = Manifest::load(scene_folder)?;
    verify_manifest(scene_folder, &manifest)
}

/// Verify an already parsed manifest against `scene_folder`.
///
/// Checks come back in manifest order, one per entry.
pub fn verify_manifest(scene_folder: &Path, manifest: &Manifest) -> Result<VerificationResult> {
    let mut checks = Vec::with_capacity(manifest.files.len());

    for entry in &manifest.files {
        let (status, size) = match resolve_entry(scene_folder, &entry.path) {
            None => (CheckStatus::OutsideFolder, None),
            Some(path) => check_file(&path, entry),
        };
        debug!(path = %entry.path, ?status, "checked manifest entry");
        checks.push(AssetCheck {
            path: entry.path.clone(),
            kind: entry.kind(),
            status,
            size,
        });
    }

    let result = VerificationResult::new(scene_folder.to_path_buf(), checks);
    if !result.ok {
        warn!(
            folder = %scene_folder.display(),
            failures = result.failures().count(),
            "scene verification failed"
        );
    }
    Ok(result)
}

/// Status of one entry and the number of bytes read, if any
fn check_file(path: &Path, entry: &ManifestEntry) -> (CheckStatus, Option<u64>) {
    let (actual, size) = match hash_file(path) {
        Ok(hashed) => hashed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return (CheckStatus::Missing, None),
        Err(e) => {
            let status = CheckStatus::Unreadable {
                reason: e.to_string(),
            };
            return (status, None);
        }
    };

    let expected = entry.sha256.trim().to_ascii_lowercase();
    let status = if actual != expected {
        CheckStatus::HashMismatch { expected, actual }
    } else {
        match entry.size {
            Some(declared) if declared != size => CheckStatus::SizeMismatch {
                expected: declared,
                actual: size,
            },
            _ => CheckStatus::Passed,
        }
    };
    (status, Some(size))
}

fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Lowercase hex SHA256 of a file's bytes
pub fn sha256_file(path: &Path) -> Result<String> {
    hash_file(path)
        .map(|(hash, _)| hash)
        .map_err(Error::io(path))
}

/// Lowercase hex SHA256 of a byte buffer
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Join a manifest path onto the folder, refusing anything that escapes it
pub(crate) fn resolve_entry(scene_folder: &Path, declared: &str) -> Option<PathBuf> {
    let relative = Path::new(declared);
    if declared.is_empty() {
        return None;
    }
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    contained.then(|| scene_folder.join(relative))
}

/// Sentinel-2 band or product token found in a file name
pub fn infer_kind(path: &str) -> Option<String> {
    let stem = Path::new(path).file_stem()?.to_str()?;
    stem.split(|c: char| c == '_' || c == '-' || c == '.')
        .map(|token| token.to_ascii_uppercase())
        .find(|token| is_kind_token(token))
}

fn is_kind_token(token: &str) -> bool {
    match token {
        "B8A" | "SCL" | "TCI" | "AOT" | "WVP" => true,
        _ => {
            token.len() == 3
                && token.starts_with('B')
                && token[1..].bytes().all(|b| b.is_ascii_digit())
                && token[1..]
                    .parse::<u8>()
                    .map_or(false, |n| (1..=12).contains(&n))
        }
    }
}
