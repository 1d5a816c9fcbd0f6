use chrono::{Local, NaiveDate};
use sales_types::domain::tenant::TenantId;
use serde::Serialize;
use std::{env, fmt};

use crate::application::lifecycle::ApprovalChain;
use crate::errors::HarnessError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";
pub const DEFAULT_EMAIL: &str = "admin@gym.com";
pub const DEFAULT_PASSWORD: &str = "password123";

pub const ENV_BASE_URL: &str = "SALES_SMOKE_BASE_URL";
pub const ENV_EMAIL: &str = "SALES_SMOKE_EMAIL";
pub const ENV_PASSWORD: &str = "SALES_SMOKE_PASSWORD";
pub const ENV_TENANT_ID: &str = "SALES_SMOKE_TENANT_ID";
pub const ENV_APPROVAL_STEPS: &str = "SALES_SMOKE_APPROVAL_STEPS";
pub const ENV_DOCUMENT_DATE: &str = "SALES_SMOKE_DOCUMENT_DATE";

/// Login pair, serialized as the `/auth/login` body.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSelection {
    /// Reuse the server-side active tenant, else the first one listed.
    FirstAvailable,
    Explicit(TenantId),
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub tenant_selection: TenantSelection,
    pub approval_chain: ApprovalChain,
    /// Fixed document date; today when unset.
    pub document_date: Option<NaiveDate>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            credentials: Credentials::new(DEFAULT_EMAIL, DEFAULT_PASSWORD),
            tenant_selection: TenantSelection::FirstAvailable,
            approval_chain: ApprovalChain::default(),
            document_date: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let base_url = get(ENV_BASE_URL).unwrap_or(defaults.base_url);
        let credentials = Credentials::new(
            get(ENV_EMAIL).unwrap_or(defaults.credentials.email),
            get(ENV_PASSWORD).unwrap_or(defaults.credentials.password),
        );
        let tenant_selection = match get(ENV_TENANT_ID) {
            Some(id) => TenantSelection::Explicit(TenantId::new(id)),
            None => TenantSelection::FirstAvailable,
        };
        let approval_chain = match get(ENV_APPROVAL_STEPS) {
            Some(raw) => parse_approval_steps(&raw)?,
            None => defaults.approval_chain,
        };
        let document_date = get(ENV_DOCUMENT_DATE)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    HarnessError::Config(format!("{ENV_DOCUMENT_DATE}=`{raw}`: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            base_url,
            credentials,
            tenant_selection,
            approval_chain,
            document_date,
        })
    }

    pub fn document_date(&self) -> NaiveDate {
        self.document_date
            .unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Parses a comma separated list of approval step indices, e.g. `0,1`.
pub fn parse_approval_steps(raw: &str) -> Result<ApprovalChain, HarnessError> {
    let indices = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| HarnessError::Config(format!("invalid approval step `{s}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    ApprovalChain::from_indices(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = HarnessConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.credentials, Credentials::new(DEFAULT_EMAIL, DEFAULT_PASSWORD));
        assert_eq!(cfg.tenant_selection, TenantSelection::FirstAvailable);
        assert_eq!(cfg.approval_chain.indices(), vec![0]);
        assert!(cfg.document_date.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = HarnessConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://erp.example.test/api"),
            (ENV_EMAIL, "ops@example.test"),
            (ENV_PASSWORD, "hunter2"),
            (ENV_TENANT_ID, "tenant-42"),
            (ENV_APPROVAL_STEPS, "0, 1,2"),
            (ENV_DOCUMENT_DATE, "2026-01-24"),
        ]))
        .unwrap();
        assert_eq!(cfg.base_url, "https://erp.example.test/api");
        assert_eq!(cfg.credentials.email, "ops@example.test");
        assert_eq!(
            cfg.tenant_selection,
            TenantSelection::Explicit(TenantId::new("tenant-42"))
        );
        assert_eq!(cfg.approval_chain.indices(), vec![0, 1, 2]);
        assert_eq!(cfg.document_date(), NaiveDate::from_ymd_opt(2026, 1, 24).unwrap());
    }

    #[test]
    fn blank_tenant_means_first_available() {
        let cfg = HarnessConfig::from_lookup(lookup(&[(ENV_TENANT_ID, "  ")])).unwrap();
        assert_eq!(cfg.tenant_selection, TenantSelection::FirstAvailable);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let steps = HarnessConfig::from_lookup(lookup(&[(ENV_APPROVAL_STEPS, "0,x")]));
        assert!(matches!(steps, Err(HarnessError::Config(_))));

        let empty_chain = parse_approval_steps(" , ");
        assert!(matches!(empty_chain, Err(HarnessError::Config(_))));

        let date = HarnessConfig::from_lookup(lookup(&[(ENV_DOCUMENT_DATE, "24/01/2026")]));
        assert!(matches!(date, Err(HarnessError::Config(_))));
    }

    #[test]
    fn password_is_not_printed() {
        let creds = Credentials::new("a@b.c", "s3cret");
        let shown = format!("{creds:?}");
        assert!(shown.contains("a@b.c"));
        assert!(!shown.contains("s3cret"));
    }
}
