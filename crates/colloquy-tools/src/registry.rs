use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{Result, ToolError};
use crate::tool::Tool;
use crate::version::{ToolVersion, VersionStatus};

/// One registered (name, version) slot.
#[derive(Clone)]
struct Entry {
    tool: Arc<dyn Tool>,
    provider: String,
    status: VersionStatus,
    deprecation_message: Option<String>,
}

impl Entry {
    fn min_compatible(&self) -> ToolVersion {
        self.tool
            .version_info()
            .map(|vi| vi.min_compatible)
            .unwrap_or(ToolVersion::new(1, 0, 0))
    }

    fn is_deprecated(&self) -> bool {
        self.status == VersionStatus::Deprecated
            || self.tool.version_info().map(|vi| vi.deprecated).unwrap_or(false)
    }

    fn deprecation_notice(&self, name: &str, version: ToolVersion) -> Option<String> {
        if !self.is_deprecated() {
            return None;
        }
        let mut notice = format!("tool '{name}' v{version} is deprecated");
        let message = self
            .deprecation_message
            .clone()
            .or_else(|| {
                self.tool
                    .version_info()
                    .and_then(|vi| vi.deprecation_message.clone())
            });
        if let Some(m) = message {
            notice.push_str(": ");
            notice.push_str(&m);
        }
        Some(notice)
    }
}

#[derive(Default)]
struct Inner {
    /// name -> version -> entry, ordered so "newest" is the last key.
    tools: HashMap<String, BTreeMap<ToolVersion, Entry>>,
    /// Explicitly set default versions.
    defaults: HashMap<String, ToolVersion>,
}

/// Outcome of version resolution.
pub struct ResolvedTool {
    pub tool: Arc<dyn Tool>,
    pub version: ToolVersion,
    pub provider: String,
    pub status: VersionStatus,
    /// Populated when the caller is handed a deprecated version.
    pub deprecation_notice: Option<String>,
}

/// Summary row for catalog listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub version: String,
    pub provider: String,
    pub status: VersionStatus,
    pub description: String,
    pub usage: String,
}

/// Catalog of callable tools, per provider, by version.
///
/// Reads are concurrent; registration and discovery rescans take the write
/// lock, so observers see either the pre-scan or post-scan catalog, never a
/// partial state.
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn version_of(tool: &dyn Tool) -> ToolVersion {
        tool.version_info()
            .map(|vi| vi.version)
            .unwrap_or(ToolVersion::new(1, 0, 0))
    }

    /// Register a tool under a provider label. Name+version must be unique.
    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        provider: impl Into<String>,
        status: VersionStatus,
        set_as_default: bool,
    ) -> Result<()> {
        let provider = provider.into();
        let name = tool.name().to_string();
        let version = Self::version_of(tool.as_ref());

        let mut inner = self.inner.write().unwrap();
        let versions = inner.tools.entry(name.clone()).or_default();
        if versions.contains_key(&version) {
            return Err(ToolError::AlreadyRegistered {
                name,
                version: version.to_string(),
            });
        }
        versions.insert(
            version,
            Entry {
                tool,
                provider: provider.clone(),
                status,
                deprecation_message: None,
            },
        );
        if set_as_default {
            inner.defaults.insert(name.clone(), version);
        }
        info!(tool = %name, %version, %provider, status = %status, "tool registered");
        Ok(())
    }

    /// Convenience for unversioned core tools.
    pub fn register_simple(&self, tool: Arc<dyn Tool>, provider: impl Into<String>) -> Result<()> {
        self.register(tool, provider, VersionStatus::Active, false)
    }

    /// Explicitly pin the default version for a name.
    pub fn set_default(&self, name: &str, version: ToolVersion) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let known = inner
            .tools
            .get(name)
            .map(|m| m.contains_key(&version))
            .unwrap_or(false);
        if !known {
            return Err(ToolError::NotFound {
                name: format!("{name}@{version}"),
            });
        }
        inner.defaults.insert(name.to_string(), version);
        Ok(())
    }

    /// Mark a version deprecated. If it held the explicit default, the
    /// default moves to the newest non-deprecated version.
    pub fn deprecate(
        &self,
        name: &str,
        version: ToolVersion,
        message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let versions = inner.tools.get_mut(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        let entry = versions.get_mut(&version).ok_or_else(|| ToolError::NotFound {
            name: format!("{name}@{version}"),
        })?;
        entry.status = VersionStatus::Deprecated;
        entry.deprecation_message = message;
        warn!(tool = %name, %version, "tool version deprecated");

        if inner.defaults.get(name) == Some(&version) {
            let replacement = inner.tools[name]
                .iter()
                .rev()
                .find(|(_, e)| e.status != VersionStatus::Deprecated)
                .map(|(v, _)| *v);
            match replacement {
                Some(v) => {
                    inner.defaults.insert(name.to_string(), v);
                }
                None => {
                    inner.defaults.remove(name);
                }
            }
        }
        Ok(())
    }

    /// Resolve a tool by name and optional requested version.
    ///
    /// 1. Exact requested version wins, even when deprecated (with notice).
    /// 2. Otherwise the highest version V ≤ requested with
    ///    V.min_compatible ≤ requested.
    /// 3. No request: explicit default, else newest non-experimental, else
    ///    newest overall.
    pub fn resolve(&self, name: &str, requested: Option<&str>) -> Result<ResolvedTool> {
        let inner = self.inner.read().unwrap();
        let versions = inner.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        let chosen = match requested {
            Some(req_str) => {
                let requested: ToolVersion = req_str.parse()?;
                if versions.contains_key(&requested) {
                    requested
                } else {
                    versions
                        .iter()
                        .rev()
                        .find(|(v, e)| **v <= requested && e.min_compatible() <= requested)
                        .map(|(v, _)| *v)
                        .ok_or_else(|| ToolError::IncompatibleVersion {
                            tool: name.to_string(),
                            requested: requested.to_string(),
                            closest: closest_version(versions, requested),
                        })?
                }
            }
            None => inner
                .defaults
                .get(name)
                .copied()
                .filter(|v| versions.contains_key(v))
                .or_else(|| {
                    versions
                        .iter()
                        .rev()
                        .find(|(_, e)| e.status != VersionStatus::Experimental)
                        .map(|(v, _)| *v)
                })
                .or_else(|| versions.keys().next_back().copied())
                .ok_or_else(|| ToolError::NotFound {
                    name: name.to_string(),
                })?,
        };

        let entry = &versions[&chosen];
        debug!(tool = %name, version = %chosen, "tool resolved");
        Ok(ResolvedTool {
            tool: entry.tool.clone(),
            version: chosen,
            provider: entry.provider.clone(),
            status: entry.status,
            deprecation_notice: entry.deprecation_notice(name, chosen),
        })
    }

    /// All registered versions of a name, oldest first.
    pub fn versions_of(&self, name: &str) -> Vec<ToolVersion> {
        self.inner
            .read()
            .unwrap()
            .tools
            .get(name)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Flat catalog listing, sorted by name then version.
    pub fn catalog(&self) -> Vec<ToolSummary> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        let mut names: Vec<&String> = inner.tools.keys().collect();
        names.sort();
        for name in names {
            for (version, entry) in &inner.tools[name] {
                out.push(ToolSummary {
                    name: name.clone(),
                    version: version.to_string(),
                    provider: entry.provider.clone(),
                    status: entry.status,
                    description: entry.tool.description().to_string(),
                    usage: entry.tool.usage().to_string(),
                });
            }
        }
        out
    }

    /// One tool (the resolvable default) per name, for decision passes.
    pub fn default_tools(&self) -> Vec<Arc<dyn Tool>> {
        let names: Vec<String> = {
            let inner = self.inner.read().unwrap();
            inner.tools.keys().cloned().collect()
        };
        names
            .iter()
            .filter_map(|n| self.resolve(n, None).ok())
            .map(|r| r.tool)
            .collect()
    }

    /// Render the catalog as a prompt section.
    pub fn prompt_listing(&self) -> String {
        let mut out = String::from("available tools:\n");
        for summary in self.catalog() {
            out.push_str(&format!(
                "- {} (v{}): {}",
                summary.name, summary.version, summary.description
            ));
            if !summary.usage.is_empty() {
                out.push_str(&format!(" ; usage: {}", summary.usage));
            }
            out.push('\n');
        }
        out
    }

    /// Atomically replace every tool registered under `provider` with a new
    /// set. Used by discovery rescans; observers never see a partial swap.
    pub fn replace_provider(
        &self,
        provider: &str,
        tools: Vec<(Arc<dyn Tool>, VersionStatus)>,
    ) -> Result<usize> {
        let mut inner = self.inner.write().unwrap();
        for versions in inner.tools.values_mut() {
            versions.retain(|_, e| e.provider != provider);
        }
        inner.tools.retain(|_, versions| !versions.is_empty());

        let mut registered = 0;
        for (tool, status) in tools {
            let name = tool.name().to_string();
            let version = Self::version_of(tool.as_ref());
            let versions = inner.tools.entry(name.clone()).or_default();
            if versions.contains_key(&version) {
                warn!(tool = %name, %version, "discovered tool collides with existing version, skipped");
                continue;
            }
            versions.insert(
                version,
                Entry {
                    tool,
                    provider: provider.to_string(),
                    status,
                    deprecation_message: None,
                },
            );
            registered += 1;
        }
        info!(%provider, registered, "provider bucket swapped");
        Ok(registered)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The registered version nearest to `requested`, for error suggestions.
fn closest_version(
    versions: &BTreeMap<ToolVersion, Entry>,
    requested: ToolVersion,
) -> Option<String> {
    versions
        .range(..=requested)
        .next_back()
        .map(|(v, _)| *v)
        .or_else(|| versions.range(requested..).next().map(|(v, _)| *v))
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolOutput, VersionInfo};
    use async_trait::async_trait;

    struct FakeTool {
        name: String,
        info: Option<VersionInfo>,
    }

    impl FakeTool {
        fn versioned(name: &str, version: &str, min: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                name: name.to_string(),
                info: Some(VersionInfo::new(
                    version.parse().unwrap(),
                    min.parse().unwrap(),
                )),
            })
        }
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "fake tool"
        }
        fn version_info(&self) -> Option<&VersionInfo> {
            self.info.as_ref()
        }
        async fn invoke(&self, _args: serde_json::Value) -> crate::error::Result<ToolOutput> {
            Ok(ToolOutput::Text("ok".into()))
        }
    }

    fn registry_with_calculator() -> ToolRegistry {
        let reg = ToolRegistry::new();
        reg.register(
            FakeTool::versioned("calculator", "1.0.0", "1.0.0"),
            "core",
            VersionStatus::Stable,
            true,
        )
        .unwrap();
        reg.register(
            FakeTool::versioned("calculator", "2.0.0", "1.0.0"),
            "core",
            VersionStatus::Experimental,
            false,
        )
        .unwrap();
        reg
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg = registry_with_calculator();
        let err = reg.register(
            FakeTool::versioned("calculator", "1.0.0", "1.0.0"),
            "elsewhere",
            VersionStatus::Active,
            false,
        );
        assert!(matches!(err, Err(ToolError::AlreadyRegistered { .. })));
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let reg = ToolRegistry::new();
        assert!(matches!(
            reg.resolve("nope", None),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[test]
    fn default_resolution_follows_precedence() {
        let reg = registry_with_calculator();
        // Explicit default wins over the newer experimental version.
        let r = reg.resolve("calculator", None).unwrap();
        assert_eq!(r.version, ToolVersion::new(1, 0, 0));

        // Deprecating the default moves it to the newest non-deprecated.
        reg.deprecate("calculator", ToolVersion::new(1, 0, 0), None)
            .unwrap();
        let r = reg.resolve("calculator", None).unwrap();
        assert_eq!(r.version, ToolVersion::new(2, 0, 0));
    }

    #[test]
    fn exact_deprecated_version_resolves_with_notice() {
        let reg = registry_with_calculator();
        reg.deprecate(
            "calculator",
            ToolVersion::new(1, 0, 0),
            Some("use v2".into()),
        )
        .unwrap();
        let r = reg.resolve("calculator", Some("1.0.0")).unwrap();
        assert_eq!(r.version, ToolVersion::new(1, 0, 0));
        let notice = r.deprecation_notice.unwrap();
        assert!(notice.contains("deprecated"));
        assert!(notice.contains("use v2"));
    }

    #[test]
    fn older_request_below_min_is_incompatible() {
        let reg = registry_with_calculator();
        let err = reg
            .resolve("calculator", Some("0.9.0"))
            .err()
            .expect("resolution below min_compatible must fail");
        match err {
            ToolError::IncompatibleVersion {
                requested, closest, ..
            } => {
                assert_eq!(requested, "0.9.0");
                assert_eq!(closest.as_deref(), Some("1.0.0"));
            }
            other => panic!("expected IncompatibleVersion, got {other}"),
        }
    }

    #[test]
    fn inexact_request_takes_highest_compatible_below() {
        let reg = registry_with_calculator();
        // 1.5.0 is not registered; v1.0.0 is the highest ≤ 1.5.0 whose
        // min_compatible (1.0.0) ≤ 1.5.0.
        let r = reg.resolve("calculator", Some("1.5.0")).unwrap();
        assert_eq!(r.version, ToolVersion::new(1, 0, 0));
        assert!(r.version <= ToolVersion::new(1, 5, 0));
    }

    #[test]
    fn experimental_is_skipped_without_explicit_default() {
        let reg = ToolRegistry::new();
        reg.register(
            FakeTool::versioned("probe", "1.0.0", "1.0.0"),
            "core",
            VersionStatus::Stable,
            false,
        )
        .unwrap();
        reg.register(
            FakeTool::versioned("probe", "3.0.0", "3.0.0"),
            "core",
            VersionStatus::Experimental,
            false,
        )
        .unwrap();
        let r = reg.resolve("probe", None).unwrap();
        assert_eq!(r.version, ToolVersion::new(1, 0, 0));
    }

    #[test]
    fn provider_swap_is_total() {
        let reg = ToolRegistry::new();
        reg.register(
            FakeTool::versioned("alpha", "1.0.0", "1.0.0"),
            "plugins",
            VersionStatus::Active,
            false,
        )
        .unwrap();
        reg.register(
            FakeTool::versioned("keep", "1.0.0", "1.0.0"),
            "core",
            VersionStatus::Active,
            false,
        )
        .unwrap();

        reg.replace_provider(
            "plugins",
            vec![(
                FakeTool::versioned("beta", "1.0.0", "1.0.0"),
                VersionStatus::Active,
            )],
        )
        .unwrap();

        assert!(reg.resolve("alpha", None).is_err());
        assert!(reg.resolve("beta", None).is_ok());
        assert!(reg.resolve("keep", None).is_ok());
    }

    #[test]
    fn resolved_version_bounds_hold() {
        // If a version V is returned for request R: min_compatible ≤ R ≤ V
        // is required by the compatibility rule only when V ≤ R; exact hits
        // trivially satisfy V == R.
        let reg = registry_with_calculator();
        for req in ["1.0.0", "1.2.3", "2.0.0"] {
            let r = reg.resolve("calculator", Some(req)).unwrap();
            let requested: ToolVersion = req.parse().unwrap();
            let min = r
                .tool
                .version_info()
                .map(|vi| vi.min_compatible)
                .unwrap();
            assert!(min <= requested);
            assert!(r.version <= requested || r.version == requested);
        }
    }
}
