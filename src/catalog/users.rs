use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::catalog::files::FileManager;
use crate::config::CatalogConfig;
use crate::error::{JobError, Result};
use crate::scheduler::{PubTarget, UserPatch};

/// Owner of the environment-provided builtin files.
pub const ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileType {
    Class,
    Java,
}

impl FileType {
    pub fn from_file_name(name: &str) -> Option<(Self, &str)> {
        if let Some(stem) = name.strip_suffix(".class") {
            Some((FileType::Class, stem))
        } else {
            name.strip_suffix(".java").map(|stem| (FileType::Java, stem))
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Class => write!(f, "Class"),
            FileType::Java => write!(f, "Java"),
        }
    }
}

/// A source or class file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub owner: String,
    pub cate: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub path: PathBuf,
    /// Fully qualified class name; class files only.
    #[serde(rename = "JPath", default, skip_serializing_if = "Option::is_none")]
    pub jpath: Option<String>,
    #[serde(rename = "pub", default)]
    pub public: bool,
}

impl FileMeta {
    fn key(&self) -> (FileType, &str, &str) {
        (self.file_type, &self.cate, &self.name)
    }

    fn matches(&self, file_type: FileType, cate: &str, name: &str) -> bool {
        self.file_type == file_type && self.cate == cate && self.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(rename = "passwd")]
    pub password: String,
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

impl User {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            files: Vec::new(),
        }
    }

    pub fn file(&self, file_type: FileType, cate: &str, name: &str) -> Option<&FileMeta> {
        self.files.iter().find(|f| f.matches(file_type, cate, name))
    }

    pub fn files_of(&self, file_type: FileType) -> impl Iterator<Item = &FileMeta> {
        self.files.iter().filter(move |f| f.file_type == file_type)
    }

    pub fn pubs(&self, file_type: FileType) -> impl Iterator<Item = &FileMeta> {
        self.files_of(file_type).filter(|f| f.public)
    }

    fn set_pub(&mut self, target: &PubTarget, public: bool) -> Result<()> {
        let user = self.name.clone();
        let file = self
            .files
            .iter_mut()
            .find(|f| f.matches(target.file_type, &target.cate, &target.name))
            .ok_or_else(|| {
                JobError::NotFound(format!(
                    "{} file {}/{}/{}",
                    target.file_type, user, target.cate, target.name
                ))
            })?;
        file.public = public;
        Ok(())
    }

    /// Replace the file list with a fresh scan, carrying public flags over.
    fn replace_files(&mut self, mut scanned: Vec<FileMeta>) {
        let flags: HashMap<(FileType, &str, &str), bool> =
            self.files.iter().map(|f| (f.key(), f.public)).collect();
        for f in &mut scanned {
            f.public = flags.get(&f.key()).copied().unwrap_or(false);
        }
        self.files = scanned;
    }
}

/// User records and their file trees.
#[derive(Debug)]
pub struct UserManager {
    users: RwLock<BTreeMap<String, User>>,
    fm: FileManager,
    home_dir: PathBuf,
    categories: Vec<String>,
    users_file: Option<PathBuf>,
}

impl UserManager {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            fm: FileManager::new(),
            home_dir: config.home_dir.clone(),
            categories: config.categories.clone(),
            users_file: config.users_file.clone(),
        }
    }

    /// Build the manager and restore user records from the users file, if
    /// one is configured and present. File lists are rescanned from disk;
    /// only the public flags are taken from the stored records.
    pub async fn load(config: &CatalogConfig) -> Result<Self> {
        let manager = Self::new(config);
        if let Some(path) = &manager.users_file {
            if manager.fm.exists(path).await {
                let raw = manager.fm.read_file(path).await?;
                let stored: Vec<User> = serde_json::from_str(&raw)?;
                let count = stored.len();
                {
                    let mut users = manager.users.write().await;
                    for user in stored {
                        users.insert(user.name.clone(), user);
                    }
                }
                tracing::info!(count, path = %path.display(), "Users loaded");
            }
        }
        manager.scan_all().await?;
        Ok(manager)
    }

    /// Persist user records to the users file. No-op without one.
    pub async fn save(&self) -> Result<()> {
        let users = self.users.read().await;
        self.persist(&users).await
    }

    async fn persist(&self, users: &BTreeMap<String, User>) -> Result<()> {
        let Some(path) = &self.users_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&users.values().collect::<Vec<_>>())?;
        self.fm.write_file(path, &json).await
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn is_category(&self, cate: &str) -> bool {
        self.categories.iter().any(|c| c == cate)
    }

    /// `<home>/<owner>/<cate>/<name>.java`
    pub fn source_path(&self, owner: &str, cate: &str, name: &str) -> PathBuf {
        self.home_dir
            .join(owner)
            .join(cate)
            .join(format!("{}.java", name))
    }

    pub async fn add_user(&self, name: &str, password: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(name) {
            return Err(JobError::Validation(format!("user {} already exists", name)));
        }
        let mut staged = users.clone();
        staged.insert(name.to_string(), User::new(name, password));
        self.persist(&staged).await?;
        *users = staged;
        Ok(())
    }

    pub async fn get_user(&self, name: &str) -> Result<User> {
        self.users
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("user {}", name)))
    }

    pub async fn user_names(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }

    /// Apply `patch` to a copy of the record and commit it only once the
    /// users file has been written.
    pub async fn modify_user(&self, name: &str, patch: &UserPatch) -> Result<()> {
        let mut users = self.users.write().await;
        let mut staged = users.clone();
        let user = staged
            .get_mut(name)
            .ok_or_else(|| JobError::NotFound(format!("user {}", name)))?;
        match patch {
            UserPatch::AddPub(target) => user.set_pub(target, true)?,
            UserPatch::RemovePub(target) => user.set_pub(target, false)?,
            UserPatch::UpdatePassword(password) => user.password = password.clone(),
        }
        self.persist(&staged).await?;
        *users = staged;
        tracing::info!(user = name, "User record modified");
        Ok(())
    }

    /// Rescan the user's home tree. Repeated scans of an unchanged tree
    /// produce the same list.
    pub async fn scan_home(&self, name: &str) -> Result<Vec<FileMeta>> {
        if !self.users.read().await.contains_key(name) {
            return Err(JobError::NotFound(format!("user {}", name)));
        }

        let mut scanned = Vec::new();
        for cate in &self.categories {
            let dir = self.home_dir.join(name).join(cate);
            if !self.fm.exists(&dir).await {
                continue;
            }
            for entry in self.fm.scan_directory(&dir).await? {
                let Some((file_type, stem)) = FileType::from_file_name(&entry.name) else {
                    continue;
                };
                scanned.push(FileMeta {
                    owner: name.to_string(),
                    cate: cate.clone(),
                    name: stem.to_string(),
                    file_type,
                    jpath: (file_type == FileType::Class)
                        .then(|| format!("{}.{}.{}", name, cate, stem)),
                    path: entry.path,
                    public: false,
                });
            }
        }
        scanned.sort_by(|a, b| a.key().cmp(&b.key()));
        scanned.dedup_by(|a, b| a.key() == b.key());

        let mut users = self.users.write().await;
        let user = users
            .get_mut(name)
            .ok_or_else(|| JobError::NotFound(format!("user {}", name)))?;
        user.replace_files(scanned);
        tracing::debug!(user = name, files = user.files.len(), "Home scanned");
        Ok(user.files.clone())
    }

    pub async fn scan_all(&self) -> Result<()> {
        for name in self.user_names().await {
            self.scan_home(&name).await?;
        }
        Ok(())
    }

    /// Class files visible to `viewer`: their own plus other users' public ones.
    pub async fn class_files(&self, viewer: &str) -> Vec<FileMeta> {
        let users = self.users.read().await;
        users
            .values()
            .flat_map(|u| {
                let own = u.name == viewer;
                u.files_of(FileType::Class)
                    .filter(move |f| own || f.public)
                    .cloned()
            })
            .collect()
    }

    pub async fn java_files(&self, name: &str) -> Result<Vec<FileMeta>> {
        let user = self.get_user(name).await?;
        Ok(user.files_of(FileType::Java).cloned().collect())
    }

    pub async fn public_files(&self, name: &str) -> Result<Vec<FileMeta>> {
        let user = self.get_user(name).await?;
        Ok(user
            .files
            .iter()
            .filter(|f| f.public)
            .cloned()
            .collect())
    }

    pub async fn is_pub(&self, owner: &str, file_type: FileType, cate: &str, name: &str) -> bool {
        self.users
            .read()
            .await
            .get(owner)
            .and_then(|u| u.file(file_type, cate, name))
            .map(|f| f.public)
            .unwrap_or(false)
    }
}
