//! Server workspaces.
//!
//! A workspace is a named directory holding one server's launch artifact,
//! license marker, properties file and, while a process is recorded for it,
//! the process record. [`Workspaces`] is the store that finds, creates,
//! renames and backs them up; the lifecycle core only ever asks it for an
//! existing workspace and never creates or deletes one.
//!
//! # Layout
//!
//! ```text
//! servers/<name>/
//!     server.jar          launch artifact
//!     eula.txt            license marker
//!     server.properties   key=value settings
//!     config.json         {"starter": "<template jar>"}
//!     server.pid          process record (only while recorded)
//! ```
pub mod guard;
mod properties;

pub use properties::Properties;

use crate::config::PathsConfig;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const ARTIFACT_FILE: &str = "server.jar";
pub const LICENSE_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";
pub const RECORD_FILE: &str = "server.pid";
pub const STARTER_FILE: &str = "config.json";

const DEFAULT_PROPERTIES: &str = "motd=Welcome to Moonlight Server\nmax-players=20\n";

/// An existing server workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    name: String,
    root: PathBuf,
}

impl Workspace {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(ARTIFACT_FILE)
    }

    pub fn license_path(&self) -> PathBuf {
        self.root.join(LICENSE_FILE)
    }

    pub fn properties_path(&self) -> PathBuf {
        self.root.join(PROPERTIES_FILE)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Whether the license marker currently records acceptance.
    pub fn license_accepted(&self) -> bool {
        std::fs::read_to_string(self.license_path())
            .map(|content| guard::records_acceptance(&content))
            .unwrap_or(false)
    }

    /// Parsed `server.properties`; empty when the file does not exist.
    pub fn properties(&self) -> Result<Properties> {
        match std::fs::read_to_string(self.properties_path()) {
            Ok(content) => Ok(Properties::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Properties::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store of all server workspaces under one directory.
#[derive(Debug, Clone)]
pub struct Workspaces {
    servers_dir: PathBuf,
    starters_dir: PathBuf,
    backups_dir: PathBuf,
}

impl Workspaces {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            servers_dir: paths.servers_dir.clone(),
            starters_dir: paths.starters_dir.clone(),
            backups_dir: paths.backups_dir.clone(),
        }
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    /// Returns the workspace called `name`, failing with
    /// [`Error::WorkspaceMissing`] if its directory does not exist.
    pub fn ensure_exists(&self, name: &str) -> Result<Workspace> {
        let root = self.root_for(name)?;
        if !root.is_dir() {
            return Err(Error::WorkspaceMissing(name.to_string()));
        }
        Ok(Workspace {
            name: name.to_string(),
            root,
        })
    }

    pub fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.ensure_exists(name)?.artifact_path())
    }

    pub fn properties_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.ensure_exists(name)?.properties_path())
    }

    /// Names of all workspaces, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.servers_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.servers_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Starter artifacts (`*.jar`) available for [`Workspaces::create`].
    pub fn templates(&self) -> Result<Vec<String>> {
        if !self.starters_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.starters_dir)? {
            let path = entry?.path();
            let is_jar = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"));
            if is_jar && path.is_file() {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Creates a workspace from a starter artifact.
    #[tracing::instrument(skip(self))]
    pub fn create(&self, name: &str, starter: &str) -> Result<Workspace> {
        let root = self.root_for(name)?;
        if root.exists() {
            return Err(Error::WorkspaceExists(name.to_string()));
        }

        let starter_path = self.starters_dir.join(starter);
        if Path::new(starter).components().count() != 1 || !starter_path.is_file() {
            return Err(Error::TemplateMissing(starter.to_string()));
        }

        std::fs::create_dir_all(&root)?;
        let workspace = Workspace {
            name: name.to_string(),
            root,
        };

        std::fs::copy(&starter_path, workspace.artifact_path())?;
        std::fs::write(workspace.properties_path(), DEFAULT_PROPERTIES)?;
        let starter_json = serde_json::json!({ "starter": starter });
        std::fs::write(
            workspace.root().join(STARTER_FILE),
            serde_json::to_string_pretty(&starter_json)
                .map_err(|e| Error::Other(format!("Failed to serialize starter info: {}", e)))?,
        )?;

        tracing::info!(root = %workspace.root().display(), "Created server workspace");
        Ok(workspace)
    }

    /// Renames a workspace directory. The new name must be free.
    #[tracing::instrument(skip(self))]
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<Workspace> {
        let old = self.ensure_exists(old_name)?;
        let new_root = self.root_for(new_name)?;
        if new_root.exists() {
            return Err(Error::WorkspaceExists(new_name.to_string()));
        }

        std::fs::rename(old.root(), &new_root)?;
        tracing::info!("Renamed server workspace");
        Ok(Workspace {
            name: new_name.to_string(),
            root: new_root,
        })
    }

    /// Key/value view of a workspace's properties.
    pub fn properties(&self, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.ensure_exists(name)?.properties()?.to_map())
    }

    /// Sets the given properties, keeping the rest of the file intact.
    #[tracing::instrument(skip(self, updates))]
    pub fn update_properties(&self, name: &str, updates: &[(&str, &str)]) -> Result<()> {
        let workspace = self.ensure_exists(name)?;
        let mut properties = workspace.properties()?;
        for (key, value) in updates {
            properties.set(key, value);
        }
        std::fs::write(workspace.properties_path(), properties.render())?;
        tracing::debug!(updated = updates.len(), "Saved server properties");
        Ok(())
    }

    /// Copies a workspace into the backups directory, skipping its process
    /// record, and returns the backup location.
    #[tracing::instrument(skip(self))]
    pub fn backup(&self, name: &str) -> Result<PathBuf> {
        let workspace = self.ensure_exists(name)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = self.backups_dir.join(format!("{}_backup_{}", name, stamp));
        if target.exists() {
            return Err(Error::WorkspaceExists(target.display().to_string()));
        }

        for entry in WalkDir::new(workspace.root()) {
            let entry = entry.map_err(|e| Error::Other(format!("Failed to walk workspace: {}", e)))?;
            let relative = entry
                .path()
                .strip_prefix(workspace.root())
                .map_err(|e| Error::Other(e.to_string()))?;
            if relative == Path::new(RECORD_FILE) {
                continue;
            }

            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&destination)?;
            } else {
                std::fs::copy(entry.path(), &destination)?;
            }
        }

        tracing::info!(backup = %target.display(), "Backed up server workspace");
        Ok(target)
    }

    fn root_for(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if name.trim() == name => {
                Ok(self.servers_dir.join(name))
            }
            _ => Err(Error::InvalidName(name.to_string())),
        }
    }
}
