//! Frida bot backend: employee registration, conversation logs and the
//! knowledge-base topics the bot answers from.

use crate::employee::{EmployeeDirectory, Lookup};
use crate::error::Result;
use crate::store::{FridaStore, LogRecord, NewTopic, NewUser};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: i64,
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Created,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    pub message: String,
    pub fio: Option<String>,
    pub position: Option<String>,
}

/// Outcome of [`authenticate`] for users 1C does not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDenied;

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Access denied: user is not an employee.")
    }
}

/// Whether the bot managed to answer; sent as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ResponseStatus {
    Failed,
    Answered,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Failed),
            1 => Ok(Self::Answered),
            other => Err(format!("status must be 0 or 1, got {other}")),
        }
    }
}

impl From<ResponseStatus> for u8 {
    fn from(s: ResponseStatus) -> u8 {
        match s {
            ResponseStatus::Failed => 0,
            ResponseStatus::Answered => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub user_id: i64,
    pub query: String,
    pub ai_response: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub hashes: Vec<String>,
    #[serde(default)]
    pub category: String,
}

impl From<LogEntry> for LogRecord {
    fn from(e: LogEntry) -> Self {
        LogRecord {
            user_id: e.user_id,
            query: e.query,
            response: e.ai_response,
            response_status: e.status == ResponseStatus::Answered,
            topic_hashes: e.hashes,
            category: e.category,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashesRequest {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".into(),
        }
    }
}

/// First and last name for a new user. 1C's `fio` is "Last First Middle";
/// missing words fall back to what Telegram reported.
fn split_fio(fio: &str, firstname: &str, lastname: &str) -> (String, String) {
    let mut words = fio.split_whitespace();
    let last = words.next().unwrap_or(lastname);
    let first = words.next().unwrap_or(firstname);
    (first.to_string(), last.to_string())
}

/// Register a Telegram user, provided 1C knows them as an employee.
pub async fn authenticate(
    directory: &EmployeeDirectory,
    store: &dyn FridaStore,
    user: &UserData,
) -> Result<std::result::Result<AuthResponse, AccessDenied>> {
    let employee = match directory.lookup(user.user_id).await {
        Lookup::Employee(e) => e,
        Lookup::Denied(reason) => {
            warn!(user_id = user.user_id, %reason, "authentication denied");
            return Ok(Err(AccessDenied));
        }
    };

    if store.user_exists(user.user_id).await? {
        info!(user_id = user.user_id, "user already registered");
        return Ok(Ok(AuthResponse {
            status: AuthStatus::Exists,
            message: "User already exists.".into(),
            fio: Some(employee.fio),
            position: Some(employee.job_title),
        }));
    }

    let (first_name, last_name) = split_fio(&employee.fio, &user.firstname, &user.lastname);
    store
        .add_user(&NewUser {
            user_id: user.user_id,
            username: user.username.clone(),
            first_name,
            last_name,
        })
        .await?;
    info!(user_id = user.user_id, fio = %employee.fio, "user registered");

    Ok(Ok(AuthResponse {
        status: AuthStatus::Created,
        message: "User successfully added.".into(),
        fio: Some(employee.fio),
        position: Some(employee.job_title),
    }))
}

pub async fn log_message(store: &dyn FridaStore, entry: LogEntry) -> Result<StatusResponse> {
    store.log_message(&entry.into()).await?;
    Ok(StatusResponse::success())
}

pub async fn add_topic(store: &dyn FridaStore, topic: &NewTopic) -> Result<StatusResponse> {
    store.insert_topic(topic).await?;
    Ok(StatusResponse::success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmployeeOverride, EmployeesConfig};
    use crate::store::memory::MemoryFridaStore;

    fn directory() -> EmployeeDirectory {
        EmployeeDirectory::new(&EmployeesConfig {
            base_url: "http://127.0.0.1:1/anydata".into(),
            timeout_secs: 1,
            overrides: vec![EmployeeOverride {
                telegram_id: 42,
                fio: "Ivanova Anna Sergeevna".into(),
                job_title: "Accountant".into(),
            }],
        })
        .unwrap()
    }

    fn user(id: i64) -> UserData {
        UserData {
            user_id: id,
            firstname: "Anya".into(),
            lastname: "I".into(),
            username: "anya".into(),
        }
    }

    #[test]
    fn fio_is_last_name_first() {
        assert_eq!(
            split_fio("Ivanova Anna Sergeevna", "x", "y"),
            ("Anna".to_string(), "Ivanova".to_string())
        );
        assert_eq!(
            split_fio("Ivanova", "Anya", "I"),
            ("Anya".to_string(), "Ivanova".to_string())
        );
        assert_eq!(split_fio("", "Anya", "I"), ("Anya".to_string(), "I".to_string()));
    }

    #[test]
    fn status_accepts_only_zero_and_one() {
        let entry: LogEntry = serde_json::from_str(
            r#"{"user_id":1,"query":"q","ai_response":"a","status":1}"#,
        )
        .unwrap();
        assert_eq!(entry.status, ResponseStatus::Answered);
        assert!(entry.hashes.is_empty());
        assert!(
            serde_json::from_str::<LogEntry>(
                r#"{"user_id":1,"query":"q","ai_response":"a","status":2}"#
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn new_employee_is_created_then_exists() {
        let store = MemoryFridaStore::new();
        let dir = directory();

        let first = authenticate(&dir, &store, &user(42)).await.unwrap().unwrap();
        assert_eq!(first.status, AuthStatus::Created);
        assert_eq!(first.position.as_deref(), Some("Accountant"));

        let added = store.added_users();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].first_name, "Anna");
        assert_eq!(added[0].last_name, "Ivanova");
        assert_eq!(added[0].username, "anya");

        let second = authenticate(&dir, &store, &user(42)).await.unwrap().unwrap();
        assert_eq!(second.status, AuthStatus::Exists);
        assert_eq!(store.added_users().len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_is_denied() {
        let store = MemoryFridaStore::new();
        let result = authenticate(&directory(), &store, &user(7)).await.unwrap();
        assert_eq!(result.unwrap_err(), AccessDenied);
        assert!(store.added_users().is_empty());
    }

    #[tokio::test]
    async fn failed_answers_are_logged_as_false() {
        let store = MemoryFridaStore::new();
        let entry = LogEntry {
            user_id: 3,
            query: "q".into(),
            ai_response: "".into(),
            status: ResponseStatus::Failed,
            hashes: vec!["h1".into(), "h2".into()],
            category: String::new(),
        };
        log_message(&store, entry).await.unwrap();
        assert!(!store.logs()[0].response_status);
        assert_eq!(store.log_hashes().len(), 2);
    }
}
