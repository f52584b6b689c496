//! Policy configuration and enforcement.

use crate::{CapabilityKind, CapabilityRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Policy configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Capabilities that are explicitly allowed.
    #[serde(default)]
    pub allow: AllowRules,

    /// Capabilities that are explicitly denied (overrides allow).
    #[serde(default)]
    pub deny: DenyRules,
}

/// Rules for allowed capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowRules {
    /// Readable paths, relative to the sandbox root (glob patterns).
    #[serde(default)]
    pub fs_read: Vec<String>,

    /// Writable paths, relative to the sandbox root (glob patterns).
    #[serde(default)]
    pub fs_write: Vec<String>,

    /// Allowed HTTP hosts. A host also covers its subdomains.
    #[serde(default)]
    pub net_http: Vec<String>,
}

/// Rules for denied capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    /// Deny all capabilities of these kinds.
    #[serde(default)]
    pub all: HashSet<CapabilityKind>,
}

/// Result of a capability check.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl Policy {
    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Create a default restrictive policy.
    ///
    /// The whole sandbox directory is readable and writable; the network is
    /// denied.
    pub fn restrictive() -> Self {
        let mut deny_all = HashSet::new();
        deny_all.insert(CapabilityKind::NetHttp);

        Self {
            allow: AllowRules {
                fs_read: vec!["**".to_string()],
                fs_write: vec!["**".to_string()],
                ..Default::default()
            },
            deny: DenyRules { all: deny_all },
        }
    }

    /// Reject rules that can never match a sandbox-relative path.
    pub fn validate(&self) -> Result<()> {
        for pattern in self.allow.fs_read.iter().chain(&self.allow.fs_write) {
            if pattern.is_empty() {
                return Err(Error::Invalid("empty filesystem pattern".to_string()));
            }
            if pattern.starts_with('/') || pattern.split('/').any(|c| c == "..") {
                return Err(Error::Invalid(format!(
                    "filesystem pattern '{pattern}' must be relative to the sandbox root"
                )));
            }
        }
        if self.allow.net_http.iter().any(|h| h.is_empty()) {
            return Err(Error::Invalid("empty network host".to_string()));
        }
        Ok(())
    }

    /// Check if a capability request is allowed.
    pub fn check(&self, request: &CapabilityRequest) -> Decision {
        // Check explicit denials first
        if self.deny.all.contains(&request.kind) {
            return Decision::Deny {
                reason: format!("{:?} is denied by policy", request.kind),
            };
        }

        // Check allowlist
        let allowed = match request.kind {
            CapabilityKind::FsRead => self.check_path_allowed(&self.allow.fs_read, &request.scope),
            CapabilityKind::FsWrite => self.check_path_allowed(&self.allow.fs_write, &request.scope),
            CapabilityKind::NetHttp => self.check_host_allowed(&self.allow.net_http, &request.scope),
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!(
                    "{:?} not in allowlist{}",
                    request.kind,
                    request.scope.as_ref().map(|s| format!(" (scope: {})", s)).unwrap_or_default()
                ),
            }
        }
    }

    /// Check a request, turning a denial into an error.
    pub fn require(&self, request: &CapabilityRequest) -> Result<()> {
        match self.check(request) {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Denied(reason)),
        }
    }

    fn check_path_allowed(&self, allowlist: &[String], scope: &Option<String>) -> bool {
        let Some(path) = scope else {
            return !allowlist.is_empty(); // No scope = any path, allow if list non-empty
        };
        let path = path.trim_start_matches("./");

        for pattern in allowlist {
            if pattern == "*" || pattern == "**" || pattern == "." {
                return true;
            }
            let pattern = pattern.trim_start_matches("./");
            if path == pattern || path.starts_with(&format!("{}/", pattern.trim_end_matches('/'))) {
                return true;
            }
            // Simple glob: foo/* matches foo/bar but not foo/bar/baz
            if let Some(prefix) = pattern.strip_suffix("/*") {
                if let Some(rest) = path.strip_prefix(&format!("{prefix}/")) {
                    if !rest.contains('/') {
                        return true;
                    }
                }
            }
            // Recursive glob: foo/** matches foo/bar/baz
            if let Some(prefix) = pattern.strip_suffix("/**") {
                if path == prefix || path.starts_with(&format!("{prefix}/")) {
                    return true;
                }
            }
        }
        false
    }

    fn check_host_allowed(&self, allowlist: &[String], scope: &Option<String>) -> bool {
        let Some(host) = scope else {
            return !allowlist.is_empty();
        };
        let host = host.to_ascii_lowercase();

        for allowed in allowlist {
            if allowed == "*" {
                return true;
            }
            let allowed = allowed.to_ascii_lowercase();
            if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restrictive_denies_network() {
        let policy = Policy::restrictive();
        let req = CapabilityRequest::net_http("example.com");
        assert!(!policy.check(&req).is_allowed());
    }

    #[test]
    fn test_restrictive_allows_sandbox_files() {
        let policy = Policy::restrictive();
        assert!(policy.check(&CapabilityRequest::fs_read("notes/today.txt")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_write("out.txt")).is_allowed());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[allow]
fs_read = ["data/**", "config.json"]
fs_write = ["out/*"]
net_http = ["api.example.com"]
"#;
        let policy = Policy::parse(toml).unwrap();

        // Allowed
        assert!(policy.check(&CapabilityRequest::fs_read("data/a/b.csv")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_read("config.json")).is_allowed());
        assert!(policy.check(&CapabilityRequest::fs_write("out/report.txt")).is_allowed());
        assert!(policy.check(&CapabilityRequest::net_http("api.example.com")).is_allowed());
        assert!(policy.check(&CapabilityRequest::net_http("v2.API.example.com")).is_allowed());

        // Denied
        assert!(!policy.check(&CapabilityRequest::fs_read("database.db")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_write("out/nested/report.txt")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::fs_write("config.json")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::net_http("evil.com")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::net_http("notexample.com")).is_allowed());
    }

    #[test]
    fn test_deny_overrides_allow() {
        let toml = r#"
[allow]
net_http = ["*"]

[deny]
all = ["net_http"]
"#;
        let policy = Policy::parse(toml).unwrap();
        let decision = policy.check(&CapabilityRequest::net_http("example.com"));
        assert!(!decision.is_allowed());
        assert!(matches!(
            policy.require(&CapabilityRequest::net_http("example.com")),
            Err(Error::Denied(_))
        ));
    }

    #[test]
    fn test_rejects_escaping_patterns() {
        let err = Policy::parse("[allow]\nfs_read = [\"/etc/**\"]\n").unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = Policy::parse("[allow]\nfs_write = [\"../up\"]\n").unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_policy_json_roundtrip() {
        let policy = Policy::restrictive();
        let json = serde_json::to_string(&policy).unwrap();
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert!(back.check(&CapabilityRequest::fs_read("x")).is_allowed());
        assert!(!back.check(&CapabilityRequest::net_http("x.com")).is_allowed());
    }
}
