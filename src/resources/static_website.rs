use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::s3_bucket::BucketHandle;
use crate::error::{Error, Result};
use crate::stack::StackInput;

/// metadata key under which asset bundles are recorded in the template.
pub const ASSETS_METADATA_KEY: &str = "Photomosaic::Assets";

/// one file of a local directory, addressed by its `/` separated path
/// relative to the directory root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFile {
    pub key: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String,
}

/// a directory snapshot: its files in sorted order and one checksum
/// covering every path and every byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFingerprint {
    pub files: Vec<AssetFile>,
    pub checksum: String,
}

pub fn fingerprint_dir(dir: &Path) -> Result<DirFingerprint> {
    if !dir.is_dir() {
        return Err(Error::Asset {
            path: dir.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    let mut whole = adler::Adler32::new();
    let mut files = vec![];
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).map_err(|e| Error::Asset {
            path: entry.path().to_path_buf(),
            reason: e.to_string(),
        })?;
        let key = relative.components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let contents = std::fs::read(entry.path()).map_err(|e| Error::Asset {
            path: entry.path().to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut file_sum = adler::Adler32::new();
        file_sum.write_slice(&contents);

        whole.write_slice(key.as_bytes());
        whole.write_slice(&[0]);
        whole.write_slice(&contents);

        files.push(AssetFile {
            key,
            path: entry.path().to_path_buf(),
            size: contents.len() as u64,
            checksum: format!("{:08x}", file_sum.checksum()),
        });
    }
    Ok(DirFingerprint {
        files,
        checksum: format!("{:08x}", whole.checksum()),
    })
}

/// a local directory whose contents get synchronized into a bucket
/// every time the stack is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBundle {
    pub id: String,
    pub source_dir: PathBuf,
    /// logical id of the destination bucket.
    pub bucket_logical_id: String,
    /// delete objects in the bucket that don't exist in the source directory.
    pub prune: bool,
    /// if false, the bundle's objects are removed when the stack is destroyed.
    pub retain_on_delete: bool,
    pub fingerprint: String,
    pub files: Vec<AssetFile>,
}

impl AssetBundle {
    pub fn from_dir(id: &str, source_dir: &Path, bucket: &BucketHandle, prune: bool, retain_on_delete: bool) -> Result<Self> {
        let DirFingerprint { files, checksum } = fingerprint_dir(source_dir)?;
        Ok(Self {
            id: id.to_string(),
            source_dir: source_dir.to_path_buf(),
            bucket_logical_id: bucket.logical_id.clone(),
            prune,
            retain_on_delete,
            fingerprint: checksum,
            files,
        })
    }

    fn metadata(&self) -> Value {
        json!({
            "Id": self.id,
            "Bucket": self.bucket_logical_id,
            "Fingerprint": self.fingerprint,
            "Files": self.files.len(),
            "Prune": self.prune,
            "RetainOnDelete": self.retain_on_delete,
        })
    }
}

/// what a deploy has to do to make a bucket match a bundle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan<'a> {
    pub uploads: Vec<&'a AssetFile>,
    pub unchanged: usize,
    pub deletes: Vec<String>,
}

impl AssetBundle {
    /// diffs the bundle against the bucket. `remote` maps every object key in
    /// the bucket to the checksum it was uploaded with, if known.
    pub fn plan_sync(&self, remote: &BTreeMap<String, Option<String>>) -> SyncPlan<'_> {
        let mut plan = SyncPlan::default();
        for file in &self.files {
            match remote.get(&file.key) {
                Some(Some(checksum)) if *checksum == file.checksum => plan.unchanged += 1,
                _ => plan.uploads.push(file),
            }
        }
        if self.prune {
            let wanted: BTreeSet<&str> = self.files.iter().map(|f| f.key.as_str()).collect();
            plan.deletes = remote.keys()
                .filter(|key| !wanted.contains(key.as_str()))
                .cloned()
                .collect();
        }
        plan
    }
}

/// records the bundle in the template metadata. The fingerprint makes the
/// template change whenever the directory contents change, and stay
/// identical otherwise.
pub fn add_asset_bundle(bundle: &AssetBundle, stack: &mut StackInput) {
    let entry = stack.metadata.entry(ASSETS_METADATA_KEY.to_string()).or_insert_with(|| Value::Array(vec![]));
    if let Value::Array(bundles) = entry {
        bundles.push(bundle.metadata());
    }
}

pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
