use sales_types::domain::fixture::{CustomerRef, ItemRef, Page};
use sales_types::ports::api_transport::{ApiRequest, ApiTransport};
use serde::de::DeserializeOwned;

use super::session::Session;
use crate::errors::HarnessError;

/// Pre-existing records the scenarios build documents around.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixtures {
    pub customer: CustomerRef,
    pub item: ItemRef,
}

pub struct FixtureResolver<'a, T: ApiTransport> {
    session: &'a Session<T>,
}

impl<'a, T: ApiTransport> FixtureResolver<'a, T> {
    pub fn new(session: &'a Session<T>) -> Self {
        Self { session }
    }

    pub async fn find_any_customer(&self) -> Result<CustomerRef, HarnessError> {
        self.first_of(ApiRequest::get("people").query("type", "CUSTOMER"), "customer")
            .await
    }

    pub async fn find_any_item(&self) -> Result<ItemRef, HarnessError> {
        self.first_of(ApiRequest::get("catalog/items"), "item")
            .await
    }

    pub async fn resolve(&self) -> Result<Fixtures, HarnessError> {
        let customer = self.find_any_customer().await?;
        let item = self.find_any_item().await?;
        tracing::info!(customer = %customer.id, item = %item.id, price = item.price, "fixtures resolved");
        Ok(Fixtures { customer, item })
    }

    /// First entry of a paginated collection, in server order.
    async fn first_of<F: DeserializeOwned>(
        &self,
        request: ApiRequest,
        fixture: &'static str,
    ) -> Result<F, HarnessError> {
        let res = self.session.send(request).await?;
        if res.status != 200 {
            return Err(HarnessError::Lookup {
                step: format!("find {fixture}"),
                status: res.status,
                body: res.body,
            });
        }
        let page: Page<F> = res
            .data()
            .map_err(|e| HarnessError::decode(format!("find {fixture}"), e))?;
        page.items
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::NoFixture {
                fixture,
                detail: format!("empty collection: {}", res.body),
            })
    }
}
