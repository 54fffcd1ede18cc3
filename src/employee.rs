use crate::config::{EmployeeOverride, EmployeesConfig};
use crate::error::Result;
use crate::http::{HttpClient, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// An employee record from 1C.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub fio: String,
    #[serde(rename = "jobTitle")]
    pub job_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// 1C answered with a non-200 status or could not be reached.
    ConnectionFailed,
    /// 1C knows no employee with this Telegram id.
    NotEmployee,
    /// 1C answered, but without the expected fields.
    UnknownResponse,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "1C connection error"),
            Self::NotEmployee => write!(f, "access denied"),
            Self::UnknownResponse => write!(f, "unknown response from 1C"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Employee(Employee),
    Denied(DenyReason),
}

#[derive(Deserialize)]
struct EmployeePayload {
    fio: Option<String>,
    #[serde(rename = "jobTitle")]
    job_title: Option<String>,
}

/// Resolves Telegram users to company employees through 1C.
pub struct EmployeeDirectory {
    base_url: String,
    overrides: Vec<EmployeeOverride>,
    http: HttpClient,
}

impl EmployeeDirectory {
    pub fn new(config: &EmployeesConfig) -> Result<Self> {
        let http = HttpClient::builder(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .retries(1, Duration::ZERO)
            .build()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            overrides: config.overrides.clone(),
            http,
        })
    }

    fn url(&self, telegram_id: i64) -> String {
        format!("{}?query=emploeyy&telegramId={telegram_id}", self.base_url)
    }

    pub async fn lookup(&self, telegram_id: i64) -> Lookup {
        if let Some(o) = self.overrides.iter().find(|o| o.telegram_id == telegram_id) {
            debug!(telegram_id, "employee resolved from overrides");
            return Lookup::Employee(Employee {
                fio: o.fio.clone(),
                job_title: o.job_title.clone(),
            });
        }

        debug!(telegram_id, "checking employee in 1C");
        let (status, body) = match self.http.get_status_text(&self.url(telegram_id)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(telegram_id, "1C request failed: {e}");
                return Lookup::Denied(DenyReason::ConnectionFailed);
            }
        };

        if !status.is_success() {
            warn!(telegram_id, status = status.as_u16(), "1C returned an error status");
            return Lookup::Denied(DenyReason::ConnectionFailed);
        }

        let lookup = interpret(&body);
        match &lookup {
            Lookup::Employee(e) => info!(telegram_id, fio = %e.fio, "employee authenticated in 1C"),
            Lookup::Denied(DenyReason::NotEmployee) => info!(telegram_id, "not found in 1C"),
            Lookup::Denied(reason) => warn!(telegram_id, %reason, "unusable 1C answer"),
        }
        lookup
    }
}

/// Classify a 200 response body from 1C.
fn interpret(body: &str) -> Lookup {
    let value: serde_json::Value = match serde_json::from_str(body.trim()) {
        Ok(v) => v,
        Err(_) if body.trim().is_empty() => return Lookup::Denied(DenyReason::NotEmployee),
        Err(_) => return Lookup::Denied(DenyReason::ConnectionFailed),
    };

    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(m) => m.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    };
    if empty {
        return Lookup::Denied(DenyReason::NotEmployee);
    }

    match serde_json::from_value::<EmployeePayload>(value) {
        Ok(EmployeePayload {
            fio: Some(fio),
            job_title: Some(job_title),
        }) if !fio.is_empty() && !job_title.is_empty() => {
            Lookup::Employee(Employee { fio, job_title })
        }
        _ => Lookup::Denied(DenyReason::UnknownResponse),
    }
}
