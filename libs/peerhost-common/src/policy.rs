//! Sync policy pattern matching, shared between the coordinator's Content Store and the peer's
//! Uploader/Watcher so both sides agree on what is restricted/ignored/readonly without
//! duplicating the glob semantics.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

/// One policy list, compiled once from its raw glob patterns.
pub struct PatternSet {
    raw: Vec<String>,
    matchers: Vec<GlobMatcher>,
}

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Self {
        let matchers = patterns
            .iter()
            .filter_map(|p| Glob::new(p).ok().map(|g| g.compile_matcher()))
            .collect();
        Self {
            raw: patterns.to_vec(),
            matchers,
        }
    }

    /// A path matches if either the full relative path or just its file name matches any
    /// pattern, mirroring `original_source/app/services/file_service.py`'s
    /// `relative_path in RESTRICTED_PATTERNS or filename in RESTRICTED_PATTERNS` check, extended
    /// to glob patterns for `ignored`/`readonly`.
    pub fn matches(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.matchers
            .iter()
            .any(|m| m.is_match(relative_path) || m.is_match(file_name))
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }
}

/// The policy document served at `GET /world/config` (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicyDoc {
    pub restricted: Vec<String>,
    pub ignored: Vec<String>,
    pub readonly: Vec<String>,
    pub start_command: Option<String>,
    #[serde(default)]
    pub mirror_sync: bool,
    pub tunnel_name: Option<String>,
    pub game_hostname: Option<String>,
    pub game_local_port: Option<u16>,
    #[serde(default = "default_java_version")]
    pub java_version: String,
}

fn default_java_version() -> String {
    "21".to_string()
}

impl Default for SyncPolicyDoc {
    fn default() -> Self {
        Self {
            restricted: DEFAULT_RESTRICTED.iter().map(|s| s.to_string()).collect(),
            ignored: DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect(),
            readonly: DEFAULT_READONLY.iter().map(|s| s.to_string()).collect(),
            start_command: None,
            mirror_sync: false,
            tunnel_name: None,
            game_hostname: None,
            game_local_port: None,
            java_version: default_java_version(),
        }
    }
}

/// Compiled form of [`SyncPolicyDoc`], used by both the Content Store and the Uploader.
pub struct CompiledPolicy {
    pub restricted: PatternSet,
    pub ignored: PatternSet,
    pub readonly: PatternSet,
}

impl CompiledPolicy {
    pub fn compile(doc: &SyncPolicyDoc) -> Self {
        Self {
            restricted: PatternSet::compile(&doc.restricted),
            ignored: PatternSet::compile(&doc.ignored),
            readonly: PatternSet::compile(&doc.readonly),
        }
    }

    pub fn is_restricted(&self, path: &str) -> bool {
        self.restricted.matches(path)
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.matches(path)
    }

    pub fn is_readonly(&self, path: &str) -> bool {
        self.readonly.matches(path)
    }

    /// A path a conforming peer may upload: not ignored, not readonly, not restricted.
    pub fn is_uploadable(&self, path: &str) -> bool {
        !self.is_ignored(path) && !self.is_readonly(path) && !self.is_restricted(path)
    }
}

/// Defaults mirroring `original_source/app/services/file_service.py`.
pub const DEFAULT_RESTRICTED: &[&str] = &[
    "server.properties",
    "permissions.json",
    "ops.json",
    "whitelist.json",
    "banned-players.json",
    "banned-ips.json",
    "eula.txt",
    "server.jar",
    "cert.pem",
    "config.yaml",
];

pub const DEFAULT_IGNORED: &[&str] = &[
    "*.tmp",
    "*.log",
    "*.lock",
    "desktop.ini",
    ".DS_Store",
    "__pycache__/*",
    "*.bak",
    "*~",
];

pub const DEFAULT_READONLY: &[&str] = &["cloudflared-tunnel/*", "libraries/*", "logs/*", "versions/*"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_full_path_and_file_name() {
        let doc = SyncPolicyDoc::default();
        let compiled = CompiledPolicy::compile(&doc);
        assert!(compiled.is_restricted("server.properties"));
        assert!(compiled.is_restricted("nested/dir/server.properties"));
        assert!(!compiled.is_restricted("world/level.dat"));
    }

    #[test]
    fn glob_patterns_match_ignored_and_readonly() {
        let doc = SyncPolicyDoc::default();
        let compiled = CompiledPolicy::compile(&doc);
        assert!(compiled.is_ignored("crash-report.log"));
        assert!(compiled.is_readonly("logs/latest.log"));
        assert!(!compiled.is_readonly("world/level.dat"));
    }

    #[test]
    fn uploadable_excludes_all_three_lists() {
        let doc = SyncPolicyDoc::default();
        let compiled = CompiledPolicy::compile(&doc);
        assert!(compiled.is_uploadable("world/level.dat"));
        assert!(!compiled.is_uploadable("server.properties"));
        assert!(!compiled.is_uploadable("logs/latest.log"));
        assert!(!compiled.is_uploadable("debug.tmp"));
    }
}
