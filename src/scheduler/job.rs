use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::FileType;
use crate::error::{JobError, Result};

/// Opaque job identifier. Doubles as the stem of per-job log files, so
/// caller-supplied ids are limited to `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(id: &str) -> Result<Self> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(JobError::Validation(format!("invalid job id {:?}", id)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Read,
    Store,
    Delete,
    UserMod,
    Compile,
    Simulate,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::Read,
        JobKind::Store,
        JobKind::Delete,
        JobKind::UserMod,
        JobKind::Compile,
        JobKind::Simulate,
    ];

    /// Whether jobs of this kind run an external process.
    pub fn spawns_process(&self) -> bool {
        matches!(self, JobKind::Compile | JobKind::Simulate)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Read => write!(f, "read"),
            JobKind::Store => write!(f, "store"),
            JobKind::Delete => write!(f, "delete"),
            JobKind::UserMod => write!(f, "user-mod"),
            JobKind::Compile => write!(f, "compile"),
            JobKind::Simulate => write!(f, "simulate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to a class inside a simulation environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "JPath")]
    pub jpath: String,
}

impl Locator {
    pub fn new(jpath: impl Into<String>) -> Self {
        Self {
            jpath: jpath.into(),
        }
    }

    /// A JPath is a fully qualified class name with at least owner, category
    /// and name segments, each a Java identifier.
    pub fn validate(&self) -> Result<()> {
        let segments: Vec<&str> = self.jpath.split('.').collect();
        let ok = segments.len() >= 3 && segments.iter().all(|s| is_java_identifier(s));
        if ok {
            Ok(())
        } else {
            Err(JobError::Validation(format!(
                "unresolved source locator {:?}",
                self.jpath
            )))
        }
    }
}

pub(crate) fn is_java_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub env: String,
    pub gen: Locator,
    pub sche: Locator,
    pub sim: Locator,
    pub plat: Locator,
    #[serde(default)]
    pub argu: Vec<String>,
    /// Milliseconds; missing or zero falls back to the configured default.
    #[serde(default)]
    pub ttl: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub env: String,
    #[serde(rename = "fOwner")]
    pub owner: String,
    #[serde(rename = "fCate")]
    pub cate: String,
    #[serde(rename = "fName")]
    pub name: String,
}

/// Coordinates of a source file in the submitting user's tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRequest {
    #[serde(rename = "fCate")]
    pub cate: String,
    #[serde(rename = "fName")]
    pub name: String,
    #[serde(rename = "fContent", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubTarget {
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub cate: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserPatch {
    #[serde(rename = "$addPub")]
    AddPub(PubTarget),
    #[serde(rename = "$removePub")]
    RemovePub(PubTarget),
    #[serde(rename = "$updatePassword")]
    UpdatePassword(String),
}

/// Kind-specific job payload.
#[derive(Debug, Clone, PartialEq)]
pub enum JobData {
    Read(FileRequest),
    Store(FileRequest),
    Delete(FileRequest),
    UserMod(UserPatch),
    Compile(CompileRequest),
    Simulate(SimulateRequest),
}

impl JobData {
    pub fn kind(&self) -> JobKind {
        match self {
            JobData::Read(_) => JobKind::Read,
            JobData::Store(_) => JobKind::Store,
            JobData::Delete(_) => JobKind::Delete,
            JobData::UserMod(_) => JobKind::UserMod,
            JobData::Compile(_) => JobKind::Compile,
            JobData::Simulate(_) => JobKind::Simulate,
        }
    }

    /// Decode the payload of a job of the given kind.
    pub fn from_parts(kind: JobKind, data: serde_json::Value) -> Result<Self> {
        let data = match kind {
            JobKind::Read => JobData::Read(serde_json::from_value(data)?),
            JobKind::Store => JobData::Store(serde_json::from_value(data)?),
            JobKind::Delete => JobData::Delete(serde_json::from_value(data)?),
            JobKind::UserMod => JobData::UserMod(serde_json::from_value(data)?),
            JobKind::Compile => JobData::Compile(serde_json::from_value(data)?),
            JobKind::Simulate => JobData::Simulate(serde_json::from_value(data)?),
        };
        Ok(data)
    }
}

/// Serialized form of a job as accepted by the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub owner: String,
    pub kind: JobKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub data: JobData,
    pub ttl: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(owner: impl Into<String>, data: JobData) -> Self {
        Self::with_id(JobId::generate(), owner, data)
    }

    pub fn with_id(id: JobId, owner: impl Into<String>, data: JobData) -> Self {
        let ttl = match &data {
            JobData::Simulate(req) => req.ttl.filter(|ms| *ms > 0).map(Duration::from_millis),
            _ => None,
        };
        Self {
            id,
            owner: owner.into(),
            data,
            ttl,
            created_at: Utc::now(),
        }
    }

    pub fn from_spec(spec: JobSpec) -> Result<Self> {
        let id = match spec.id.as_deref() {
            Some(id) => JobId::parse(id)?,
            None => JobId::generate(),
        };
        let data = JobData::from_parts(spec.kind, spec.data)?;
        Ok(Self::with_id(id, spec.owner, data))
    }

    /// Zero means no limit.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    pub fn kind(&self) -> JobKind {
        self.data.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Success,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogPaths {
    pub out: PathBuf,
    pub err: PathBuf,
}

/// Payload of a process-backed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
    #[serde(rename = "type")]
    pub kind: Option<ResultType>,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogPaths>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

/// Success payload of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Process(ProcessResult),
    Data(serde_json::Value),
}

impl JobOutput {
    pub fn as_process(&self) -> Option<&ProcessResult> {
        match self {
            JobOutput::Process(r) => Some(r),
            JobOutput::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            JobOutput::Data(v) => Some(v),
            JobOutput::Process(_) => None,
        }
    }
}
