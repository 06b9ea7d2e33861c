use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::catalog::files::FileManager;
use crate::catalog::users::{FileMeta, FileType, ADMIN};
use crate::config::CatalogConfig;
use crate::error::{JobError, Result};

/// Simulation environments under `<env_root>/<env>`:
///
/// - `lib/*.jar`: simulator libraries
/// - `builtin/admin/<cate>/*.class`: classes available to every user
#[derive(Debug, Clone)]
pub struct SimEnvironments {
    root: PathBuf,
    home_dir: PathBuf,
    fm: FileManager,
}

impl SimEnvironments {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            root: config.env_root.clone(),
            home_dir: config.home_dir.clone(),
            fm: FileManager::new(),
        }
    }

    fn env_dir(&self, env: &str) -> Result<PathBuf> {
        let valid = !env.is_empty()
            && env
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(JobError::Validation(format!("invalid environment {:?}", env)));
        }
        Ok(self.root.join(env))
    }

    /// Environment names, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut envs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| JobError::io(format!("scan {}", self.root.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| JobError::io(format!("scan {}", self.root.display()), e))?
        {
            if self.fm.is_directory(&entry.path()).await? {
                envs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        envs.sort();
        Ok(envs)
    }

    /// Fails with a validation error when `env` does not exist.
    pub async fn resolve(&self, env: &str) -> Result<PathBuf> {
        let dir = self.env_dir(env)?;
        if self.fm.exists(&dir).await && self.fm.is_directory(&dir).await? {
            Ok(dir)
        } else {
            Err(JobError::Validation(format!("unknown environment {:?}", env)))
        }
    }

    /// Builtin class files of `env`, owned by the admin account.
    pub async fn builtin(&self, env: &str) -> Result<Vec<FileMeta>> {
        let root = self.resolve(env).await?.join("builtin").join(ADMIN);
        if !self.fm.exists(&root).await {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in self.fm.scan_directory(&root).await? {
            let Some((FileType::Class, stem)) = FileType::from_file_name(&entry.name) else {
                continue;
            };
            let Some(cate) = category_of(&root, &entry.path) else {
                continue;
            };
            files.push(FileMeta {
                owner: ADMIN.to_string(),
                jpath: Some(format!("{}.{}.{}", ADMIN, cate, stem)),
                cate,
                name: stem.to_string(),
                file_type: FileType::Class,
                path: entry.path,
                public: true,
            });
        }
        Ok(files)
    }

    /// Classpath for compiling and running against `env`: its jars, the
    /// builtin class root and the users' home root.
    pub async fn classpath(&self, env: &str) -> Result<OsString> {
        let dir = self.resolve(env).await?;
        let lib = dir.join("lib");

        let mut entries: Vec<PathBuf> = Vec::new();
        if self.fm.exists(&lib).await {
            entries.extend(
                self.fm
                    .scan_directory(&lib)
                    .await?
                    .into_iter()
                    .filter(|f| f.name.ends_with(".jar"))
                    .map(|f| f.path),
            );
        }
        entries.push(dir.join("builtin"));
        entries.push(self.home_dir.clone());

        std::env::join_paths(entries)
            .map_err(|e| JobError::Validation(format!("unusable classpath entry: {}", e)))
    }
}

/// First path component below `root`, i.e. the category directory.
fn category_of(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components = rel.components();
    let first = components.next()?;
    // A bare file directly under the root has no category.
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}
