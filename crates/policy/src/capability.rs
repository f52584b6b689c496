use serde::{Deserialize, Serialize};

/// Capability types that can be granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    FsRead,
    FsWrite,
    NetHttp,
}

/// A capability request with optional scope.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub kind: CapabilityKind,
    pub scope: Option<String>, // sandbox-relative path or host name
}

impl CapabilityRequest {
    pub fn with_scope(kind: CapabilityKind, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Some(scope.into()),
        }
    }

    pub fn fs_read(path: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::FsRead, path)
    }

    pub fn fs_write(path: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::FsWrite, path)
    }

    pub fn net_http(host: impl Into<String>) -> Self {
        Self::with_scope(CapabilityKind::NetHttp, host)
    }
}
