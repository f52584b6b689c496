//! `fs`: file access confined to a sandbox directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use policy::{CapabilityRequest, Policy};

use super::{Capability, CapabilityError, string_arg};
use crate::Result;
use crate::sandbox::Sandbox;
use crate::value::ScriptValue;

type CapResult<T> = std::result::Result<T, CapabilityError>;

const PRELUDE: &str = r#"
local read, write, delete, exists, list = __fs_read, __fs_write, __fs_delete, __fs_exists, __fs_list
__fs_read, __fs_write, __fs_delete, __fs_exists, __fs_list = nil, nil, nil, nil, nil
fs = {
  read = function(path) return read(path) end,
  write = function(path, content) return write(path, content) end,
  delete = function(path) return delete(path) end,
  exists = function(path) return exists(path) end,
  list = function(path) return list(path or ".") end,
}
"#;

/// File access rooted at one directory.
///
/// Paths are interpreted relative to the root. Absolute paths and `..`
/// that climbs above the root are rejected before touching the disk; the
/// deepest existing part of the target is canonicalized and must still lie
/// inside the root, so symlinks cannot lead out of it either.
#[derive(Debug)]
pub struct FsModule {
    root: PathBuf,
    policy: Arc<Policy>,
}

/// A path that passed resolution.
struct Resolved {
    full: PathBuf,
    /// Root-relative, `/`-separated; `.` for the root itself.
    scope: String,
}

impl FsModule {
    /// Create the module, creating `root` if it does not exist yet.
    pub fn new(root: impl AsRef<Path>, policy: Arc<Policy>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
            policy,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Contents of a file, or `None` when it is missing or unreadable.
    pub fn read(&self, path: &str) -> CapResult<Option<String>> {
        let target = self.resolve(path)?;
        self.policy.require(&CapabilityRequest::fs_read(&target.scope))?;

        match fs::read(&target.full) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) => {
                tracing::debug!(path, error = %e, "fs.read failed");
                Ok(None)
            }
        }
    }

    /// Write a file, creating parent directories. Returns whether it worked.
    pub fn write(&self, path: &str, content: &str) -> CapResult<bool> {
        let target = self.resolve(path)?;
        self.policy.require(&CapabilityRequest::fs_write(&target.scope))?;
        if target.scope == "." {
            return Ok(false);
        }

        let written = target
            .full
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&target.full, content));
        if let Err(e) = &written {
            tracing::debug!(path, error = %e, "fs.write failed");
        }
        Ok(written.is_ok())
    }

    /// Remove a file or an empty directory. The root itself is never removed.
    pub fn delete(&self, path: &str) -> CapResult<bool> {
        let target = self.resolve(path)?;
        self.policy.require(&CapabilityRequest::fs_write(&target.scope))?;
        if target.scope == "." {
            return Ok(false);
        }

        let removed = match fs::symlink_metadata(&target.full) {
            Ok(meta) if meta.is_dir() => fs::remove_dir(&target.full),
            Ok(_) => fs::remove_file(&target.full),
            Err(e) => Err(e),
        };
        Ok(removed.is_ok())
    }

    pub fn exists(&self, path: &str) -> CapResult<bool> {
        let target = self.resolve(path)?;
        self.policy.require(&CapabilityRequest::fs_read(&target.scope))?;
        Ok(target.full.exists())
    }

    /// Sorted entry names of a directory; empty when it does not exist.
    pub fn list(&self, path: &str) -> CapResult<Vec<String>> {
        let target = self.resolve(path)?;
        self.policy.require(&CapabilityRequest::fs_read(&target.scope))?;

        let Ok(entries) = fs::read_dir(&target.full) else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn resolve(&self, path: &str) -> CapResult<Resolved> {
        let escape = || CapabilityError::Escape(path.to_string());

        let mut parts: Vec<String> = Vec::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop().ok_or_else(escape)?;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        let full = parts.iter().fold(self.root.clone(), |acc, part| acc.join(part));

        // Canonicalize the deepest part that exists, link or not.
        let mut probe = Some(full.as_path());
        while let Some(candidate) = probe {
            if candidate.symlink_metadata().is_ok() {
                let real = candidate.canonicalize().map_err(|_| escape())?;
                if !real.starts_with(&self.root) {
                    return Err(escape());
                }
                break;
            }
            probe = candidate.parent();
        }

        let scope = if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        };
        Ok(Resolved { full, scope })
    }
}

impl Capability for FsModule {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn install(self: Arc<Self>, sandbox: &Sandbox) -> Result<()> {
        let this = Arc::clone(&self);
        sandbox.bind_function("__fs_read", move |args| {
            let path = string_arg(&args, 0, "fs.read")?;
            Ok(this.read(&path)?.map(ScriptValue::Str).unwrap_or_default())
        })?;

        let this = Arc::clone(&self);
        sandbox.bind_function("__fs_write", move |args| {
            let path = string_arg(&args, 0, "fs.write")?;
            let content = string_arg(&args, 1, "fs.write")?;
            Ok(this.write(&path, &content)?.into())
        })?;

        let this = Arc::clone(&self);
        sandbox.bind_function("__fs_delete", move |args| {
            let path = string_arg(&args, 0, "fs.delete")?;
            Ok(this.delete(&path)?.into())
        })?;

        let this = Arc::clone(&self);
        sandbox.bind_function("__fs_exists", move |args| {
            let path = string_arg(&args, 0, "fs.exists")?;
            Ok(this.exists(&path)?.into())
        })?;

        let this = self;
        sandbox.bind_function("__fs_list", move |args| {
            let path = string_arg(&args, 0, "fs.list")?;
            let names = this.list(&path)?;
            Ok(ScriptValue::List(names.into_iter().map(ScriptValue::Str).collect()))
        })?;

        sandbox.exec("fs", PRELUDE)
    }
}
