//! Filesystem tool discovery.
//!
//! Discovery roots are walked for `*.tool.toml` manifests, each describing a
//! subprocess-backed tool. Files are fingerprinted with SHA-256; the
//! background watcher rescans only when a fingerprint changes, and each
//! provider bucket is swapped atomically under the registry write lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::registry::ToolRegistry;
use crate::subprocess::SubprocessTool;
use crate::tool::{Modality, Tool, VersionInfo};
use crate::version::{ToolVersion, VersionStatus};

/// Manifest file suffix recognized during a scan.
const MANIFEST_SUFFIX: &str = ".tool.toml";

/// On-disk manifest declaring one subprocess tool.
#[derive(Debug, Deserialize)]
struct ToolManifest {
    name: String,
    description: String,
    #[serde(default)]
    usage: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    version: Option<String>,
    min_compatible_version: Option<String>,
    #[serde(default)]
    modalities: Vec<String>,
    #[serde(default)]
    trigger_keywords: Vec<String>,
    status: Option<String>,
}

/// Result of one discovery pass.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub files_seen: usize,
    pub tools_registered: usize,
    pub failures: usize,
    /// True when nothing changed and the catalog was left untouched.
    pub unchanged: bool,
}

/// Periodically re-discovers tools under the configured roots.
pub struct DiscoveryService {
    registry: Arc<ToolRegistry>,
    roots: Vec<PathBuf>,
    interval_ms: u64,
    fingerprints: Mutex<HashMap<PathBuf, String>>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<ToolRegistry>, roots: Vec<PathBuf>, interval_ms: u64) -> Self {
        Self {
            registry,
            roots,
            interval_ms,
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    /// Manual scan entry point. Walks every root, parses changed manifests,
    /// and swaps provider buckets. Per-file failures are logged and do not
    /// abort the pass.
    pub fn scan(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut new_fingerprints: HashMap<PathBuf, String> = HashMap::new();
        // provider -> manifests found under it this pass
        let mut buckets: HashMap<String, Vec<(Arc<dyn Tool>, VersionStatus)>> = HashMap::new();

        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "discovery root missing, skipped");
                continue;
            }
            for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file()
                    || !path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with(MANIFEST_SUFFIX))
                        .unwrap_or(false)
                {
                    continue;
                }
                report.files_seen += 1;

                let bytes = match std::fs::read(path) {
                    Ok(b) => b,
                    Err(e) => {
                        error!(file = %path.display(), "manifest read failed: {e}");
                        report.failures += 1;
                        continue;
                    }
                };
                new_fingerprints.insert(path.to_path_buf(), fingerprint(&bytes));

                let provider = derive_provider(root, path);
                match load_manifest(&bytes) {
                    Ok((tool, status)) => {
                        buckets.entry(provider).or_default().push((tool, status));
                    }
                    Err(e) => {
                        error!(file = %path.display(), "manifest rejected: {e}");
                        report.failures += 1;
                    }
                }
            }
        }

        // Hash-based change detection: skip the swap when nothing moved.
        let removed_providers: Vec<String> = {
            let mut old = self.fingerprints.lock().unwrap();
            if *old == new_fingerprints && report.failures == 0 {
                debug!("discovery pass found no changes");
                report.unchanged = true;
                return Ok(report);
            }
            // Providers whose every manifest vanished still need their
            // bucket emptied.
            let removed = old
                .keys()
                .filter(|p| !new_fingerprints.contains_key(*p))
                .filter_map(|p| self.provider_for(p))
                .filter(|prov| !buckets.contains_key(prov))
                .collect();
            *old = new_fingerprints;
            removed
        };

        for provider in removed_providers {
            self.registry.replace_provider(&provider, Vec::new())?;
        }
        for (provider, tools) in buckets {
            report.tools_registered += self.registry.replace_provider(&provider, tools)?;
        }
        info!(
            files = report.files_seen,
            registered = report.tools_registered,
            failures = report.failures,
            "discovery scan complete"
        );
        Ok(report)
    }

    /// Provider label for a manifest path, using whichever root contains it.
    fn provider_for(&self, path: &Path) -> Option<String> {
        self.roots
            .iter()
            .find(|root| path.starts_with(root))
            .map(|root| derive_provider(root, path))
    }

    /// Background loop. Scans on the configured interval until `shutdown`
    /// broadcasts `true`. An interval of 0 disables auto-scan.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.interval_ms == 0 {
            info!("tool discovery auto-scan disabled");
            return;
        }
        info!(interval_ms = self.interval_ms, "tool discovery watcher started");
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(self.interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan() {
                        error!("discovery scan error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tool discovery watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Provider label derived from the manifest's directory relative to its
/// root: `<root-name>` for top-level files, `<root-name>.<sub.dirs>` below.
fn derive_provider(root: &Path, path: &Path) -> String {
    let root_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("plugins");
    let rel_dir = path
        .parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "."))
        .unwrap_or_default();
    if rel_dir.is_empty() {
        root_name.to_string()
    } else {
        format!("{root_name}.{rel_dir}")
    }
}

fn load_manifest(bytes: &[u8]) -> std::result::Result<(Arc<dyn Tool>, VersionStatus), String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    let manifest: ToolManifest = toml::from_str(text).map_err(|e| e.to_string())?;

    let version_info = match &manifest.version {
        Some(v) => {
            let version = ToolVersion::from_str(v).map_err(|e| e.to_string())?;
            let min = match &manifest.min_compatible_version {
                Some(m) => ToolVersion::from_str(m).map_err(|e| e.to_string())?,
                None => version,
            };
            Some(VersionInfo::new(version, min))
        }
        None => None,
    };

    let modalities: Vec<Modality> = if manifest.modalities.is_empty() {
        vec![Modality::Text]
    } else {
        manifest
            .modalities
            .iter()
            .map(|m| Modality::from_str(m))
            .collect::<std::result::Result<_, _>>()?
    };

    let status = match &manifest.status {
        Some(s) => VersionStatus::from_str(s)?,
        None => VersionStatus::Active,
    };

    let tool = SubprocessTool::new(
        manifest.name,
        manifest.description,
        manifest.usage,
        manifest.command,
        manifest.args,
        modalities,
        version_info,
        manifest.trigger_keywords,
    );
    Ok((Arc::new(tool), status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, file: &str, name: &str, version: Option<&str>) {
        let version_line = version
            .map(|v| format!("version = \"{v}\"\n"))
            .unwrap_or_default();
        std::fs::write(
            dir.join(file),
            format!(
                "name = \"{name}\"\ndescription = \"a test tool\"\ncommand = \"cat\"\n{version_line}"
            ),
        )
        .unwrap();
    }

    #[test]
    fn scan_registers_manifests_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "echo.tool.toml", "fs_echo", Some("1.2.0"));
        std::fs::write(dir.path().join("broken.tool.toml"), "not [valid toml").unwrap();
        std::fs::write(dir.path().join("readme.md"), "ignore me").unwrap();

        let registry = Arc::new(ToolRegistry::new());
        let service =
            DiscoveryService::new(registry.clone(), vec![dir.path().to_path_buf()], 0);
        let report = service.scan().unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.tools_registered, 1);
        assert_eq!(report.failures, 1);
        let resolved = registry.resolve("fs_echo", None).unwrap();
        assert_eq!(resolved.version, ToolVersion::new(1, 2, 0));
    }

    #[test]
    fn unchanged_tree_skips_the_swap() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "echo.tool.toml", "fs_echo", None);

        let registry = Arc::new(ToolRegistry::new());
        let service =
            DiscoveryService::new(registry.clone(), vec![dir.path().to_path_buf()], 0);
        assert!(!service.scan().unwrap().unchanged);
        assert!(service.scan().unwrap().unchanged);

        // Touching the manifest re-triggers the swap.
        write_manifest(dir.path(), "echo.tool.toml", "fs_echo_v2", None);
        let report = service.scan().unwrap();
        assert!(!report.unchanged);
        assert!(registry.resolve("fs_echo_v2", None).is_ok());
        assert!(registry.resolve("fs_echo", None).is_err());
    }

    #[test]
    fn provider_labels_follow_directory_structure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("plugins");
        let nested = root.join("imaging").join("v2");
        std::fs::create_dir_all(&nested).unwrap();
        write_manifest(&root, "top.tool.toml", "top_tool", None);
        write_manifest(&nested, "deep.tool.toml", "deep_tool", None);

        let registry = Arc::new(ToolRegistry::new());
        let service = DiscoveryService::new(registry.clone(), vec![root], 0);
        service.scan().unwrap();

        let catalog = registry.catalog();
        let top = catalog.iter().find(|t| t.name == "top_tool").unwrap();
        let deep = catalog.iter().find(|t| t.name == "deep_tool").unwrap();
        assert_eq!(top.provider, "plugins");
        assert_eq!(deep.provider, "plugins.imaging.v2");
    }
}
