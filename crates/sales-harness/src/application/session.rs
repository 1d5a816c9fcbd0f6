use sales_types::domain::tenant::{SetActiveTenantRequest, TenantId};
use sales_types::ports::api_transport::{ApiRequest, ApiResponse, ApiTransport};
use serde_json::Value;

use crate::config::{Credentials, TenantSelection};
use crate::errors::HarnessError;

/// Stamped on every request once a tenant is selected, next to the server's
/// `active_tenant` cookie.
pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub status: u16,
}

/// Authenticated channel bound to one tenant. Owned by a single run.
pub struct Session<T: ApiTransport> {
    transport: T,
    authenticated: bool,
    tenant: Option<TenantId>,
}

impl<T: ApiTransport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            authenticated: false,
            tenant: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HarnessError> {
        let request = match &self.tenant {
            Some(tenant) => request.header(TENANT_HEADER, tenant.as_str()),
            None => request,
        };
        Ok(self.transport.send(request).await?)
    }

    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<AuthResult, HarnessError> {
        let res = self
            .send(ApiRequest::post("auth/login").json(credentials)?)
            .await?;
        if !res.is_one_of(&[200, 201]) {
            return Err(HarnessError::Auth {
                status: res.status,
                body: res.body,
            });
        }
        self.authenticated = true;
        tracing::info!(email = %credentials.email, status = res.status, "logged in");
        Ok(AuthResult { status: res.status })
    }

    /// Picks the tenant every later call runs under.
    ///
    /// With `FirstAvailable` the server's current active tenant wins; only when
    /// there is none is the first listed membership activated. Calling this
    /// again without outside changes yields the same tenant.
    pub async fn resolve_active_tenant(
        &mut self,
        selection: &TenantSelection,
    ) -> Result<TenantId, HarnessError> {
        let tenant = match selection {
            TenantSelection::Explicit(id) => self.activate_explicit(id).await?,
            TenantSelection::FirstAvailable => match self.read_active_tenant().await? {
                Some(id) => {
                    tracing::info!(tenant = %id, "reusing active tenant");
                    id
                }
                None => self.activate_first_listed().await?,
            },
        };
        self.tenant = Some(tenant.clone());
        Ok(tenant)
    }

    async fn read_active_tenant(&self) -> Result<Option<TenantId>, HarnessError> {
        let res = self.send(ApiRequest::get("me/tenants/active")).await?;
        if res.status != 200 {
            tracing::debug!(status = res.status, "no readable active tenant");
            return Ok(None);
        }
        let id = res
            .json_value()
            .ok()
            .and_then(|body| {
                body.pointer("/data/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|id| !id.is_empty());
        Ok(id.map(TenantId::new))
    }

    async fn activate_first_listed(&self) -> Result<TenantId, HarnessError> {
        let res = self.send(ApiRequest::get("me/tenants")).await?;
        let body = res.json_value().ok();
        let memberships = body
            .as_ref()
            .and_then(|b| b.get("data"))
            .and_then(Value::as_array);
        let first = match memberships {
            Some(list) if !list.is_empty() => &list[0],
            _ => {
                return Err(HarnessError::NoTenant(format!(
                    "unexpected tenants data (status {}): {}",
                    res.status, res.body
                )))
            }
        };
        let id = first
            .pointer("/tenant/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(TenantId::new)
            .ok_or_else(|| {
                HarnessError::NoTenant(format!("could not find id in tenant data: {first}"))
            })?;

        let body = SetActiveTenantRequest {
            tenant_id: id.clone(),
        };
        let set = self
            .send(ApiRequest::post("me/tenants/active").json(&body)?)
            .await?;
        // The set call's status is not part of the contract; later calls fail loudly if it did not stick.
        tracing::info!(tenant = %id, status = set.status, "activated first listed tenant");
        Ok(id)
    }

    async fn activate_explicit(&self, id: &TenantId) -> Result<TenantId, HarnessError> {
        let body = SetActiveTenantRequest {
            tenant_id: id.clone(),
        };
        let res = self
            .send(ApiRequest::post("me/tenants/active").json(&body)?)
            .await?;
        if !(200..300).contains(&res.status) {
            return Err(HarnessError::NoTenant(format!(
                "tenant {id} rejected with status {}: {}",
                res.status, res.body
            )));
        }
        tracing::info!(tenant = %id, "activated configured tenant");
        Ok(id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_fake::{InMemorySalesServer, DEMO_EMAIL, DEMO_PASSWORD};
    use sales_types::ports::api_transport::Method;

    fn creds() -> Credentials {
        Credentials::new(DEMO_EMAIL, DEMO_PASSWORD)
    }

    fn two_tenants() -> sales_fake::InMemorySalesServerBuilder {
        InMemorySalesServer::builder()
            .tenant("tenant-a", "Alpha Gym")
            .tenant("tenant-b", "Beta Gym")
    }

    fn count(server: &InMemorySalesServer, request: &str) -> usize {
        server.requests().iter().filter(|r| *r == request).count()
    }

    #[tokio::test]
    async fn bad_credentials_are_an_auth_error() {
        let mut session = Session::new(InMemorySalesServer::seeded());
        let err = session
            .authenticate(&Credentials::new(DEMO_EMAIL, "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Auth { status: 401, .. }));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn falls_back_to_first_listed_tenant() {
        let server = two_tenants().build();
        let mut session = Session::new(server.clone());
        session.authenticate(&creds()).await.unwrap();

        let tenant = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap();

        assert_eq!(tenant, TenantId::new("tenant-a"));
        assert_eq!(session.tenant(), Some(&tenant));
        assert_eq!(server.active_tenant(), Some(tenant));
        assert_eq!(count(&server, "GET me/tenants"), 1);
        assert_eq!(count(&server, "POST me/tenants/active"), 1);
    }

    #[tokio::test]
    async fn reuses_already_active_tenant() {
        let server = two_tenants().active_tenant("tenant-b").build();
        let mut session = Session::new(server.clone());
        session.authenticate(&creds()).await.unwrap();

        let tenant = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap();

        assert_eq!(tenant, TenantId::new("tenant-b"));
        assert_eq!(count(&server, "GET me/tenants"), 0);
        assert_eq!(count(&server, "POST me/tenants/active"), 0);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let server = two_tenants().build();
        let mut session = Session::new(server.clone());
        session.authenticate(&creds()).await.unwrap();

        let first = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap();
        let second = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap();

        assert_eq!(first, second);
        // the second call takes the already-active branch
        assert_eq!(count(&server, "GET me/tenants"), 1);
    }

    #[tokio::test]
    async fn no_memberships_is_a_tenant_error() {
        let mut session = Session::new(InMemorySalesServer::builder().build());
        session.authenticate(&creds()).await.unwrap();
        let err = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NoTenant(_)));
        assert!(session.tenant().is_none());
    }

    #[tokio::test]
    async fn malformed_memberships_are_a_tenant_error() {
        let server = InMemorySalesServer::seeded();
        server.fail_on(Method::Get, "me/tenants", 200, r#"{"data": {"unexpected": true}}"#);
        let mut session = Session::new(server);
        session.authenticate(&creds()).await.unwrap();
        let err = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected tenants data"));
    }

    #[tokio::test]
    async fn membership_without_tenant_id_is_a_tenant_error() {
        let server = InMemorySalesServer::seeded();
        server.fail_on(Method::Get, "me/tenants", 200, r#"{"data": [{"role": {}}]}"#);
        let mut session = Session::new(server);
        session.authenticate(&creds()).await.unwrap();
        let err = session
            .resolve_active_tenant(&TenantSelection::FirstAvailable)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("could not find id"));
    }

    #[tokio::test]
    async fn explicit_tenant_is_activated_and_checked() {
        let server = two_tenants().build();
        let mut session = Session::new(server.clone());
        session.authenticate(&creds()).await.unwrap();

        let tenant = session
            .resolve_active_tenant(&TenantSelection::Explicit("tenant-b".into()))
            .await
            .unwrap();
        assert_eq!(tenant, TenantId::new("tenant-b"));
        assert_eq!(server.active_tenant(), Some(tenant));
        assert_eq!(count(&server, "GET me/tenants/active"), 0);

        let err = session
            .resolve_active_tenant(&TenantSelection::Explicit("tenant-zz".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NoTenant(_)));
    }
}
