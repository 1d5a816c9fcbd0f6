//! The three end-to-end flows and the run that strings them together.
//!
//! Login, tenant selection and fixture lookup run once; each scenario then
//! builds its own documents so it can run alone.

use chrono::{Days, NaiveDate};
use sales_types::domain::amount;
use sales_types::domain::document::{
    DocumentDraft, DocumentKind, DocumentPatch, LineInput, TaxPricingMode,
};
use sales_types::domain::tenant::TenantId;
use sales_types::ports::api_transport::ApiTransport;
use std::fmt;
use std::str::FromStr;

use super::fixtures::{FixtureResolver, Fixtures};
use super::lifecycle::{ApprovalChain, Derivation, LifecycleDriver, TrackedDocument, Transition};
use super::session::Session;
use crate::config::HarnessConfig;
use crate::errors::HarnessError;
use crate::reporter::Reporter;

const ORDER_QUANTITY: f64 = 2.0;
const ORDER_DISCOUNT_PERCENT: f64 = 10.0;
const INVOICE_QUANTITY: f64 = 5.0;
const CREDIT_QUANTITY: f64 = 1.0;
const INVOICE_TERM_DAYS: u64 = 31;
const CREDIT_NOTE_REASON: &str = "Damage credit";
/// Sent with every approval step that has no notes of its own.
pub const APPROVAL_NOTES: &str = "Approved by sales-smoke";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    Order,
    Invoice,
    CreditNote,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Order, Scenario::Invoice, Scenario::CreditNote];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Order => "order",
            Scenario::Invoice => "invoice",
            Scenario::CreditNote => "credit-note",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarnessError::Config(format!("unknown scenario `{s}`")))
    }
}

/// Inputs every scenario shares.
#[derive(Debug, Clone)]
pub struct ScenarioPlan<'a> {
    pub fixtures: &'a Fixtures,
    pub approval_chain: &'a ApprovalChain,
    pub document_date: NaiveDate,
}

impl ScenarioPlan<'_> {
    fn line(&self, quantity: f64, discount_percent: f64) -> LineInput {
        LineInput {
            item_id: self.fixtures.item.id.clone(),
            quantity,
            unit_price: self.fixtures.item.price,
            discount_percent,
        }
    }

    pub fn order_draft(&self) -> DocumentDraft {
        DocumentDraft {
            document_date: self.document_date,
            due_date: None,
            delivery_date: Some(self.document_date + Days::new(1)),
            person_id: self.fixtures.customer.id.clone(),
            tax_pricing_mode: TaxPricingMode::Inclusive,
            items: vec![self.line(ORDER_QUANTITY, ORDER_DISCOUNT_PERCENT)],
            notes: Some("Sales order smoke test".into()),
        }
    }

    pub fn invoice_draft(&self) -> DocumentDraft {
        DocumentDraft {
            document_date: self.document_date,
            due_date: Some(self.document_date + Days::new(INVOICE_TERM_DAYS)),
            delivery_date: None,
            person_id: self.fixtures.customer.id.clone(),
            tax_pricing_mode: TaxPricingMode::Exclusive,
            items: vec![self.line(INVOICE_QUANTITY, 0.0)],
            notes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub documents: Vec<TrackedDocument>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tenant: TenantId,
    pub fixtures: Fixtures,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl RunSummary {
    pub fn documents(&self) -> impl Iterator<Item = &TrackedDocument> {
        self.outcomes.iter().flat_map(|o| o.documents.iter())
    }
}

/// Order: create, submit, approve, convert to an invoice.
pub async fn order_flow<T: ApiTransport>(
    driver: &LifecycleDriver<'_, T>,
    plan: &ScenarioPlan<'_>,
) -> Result<Vec<TrackedDocument>, HarnessError> {
    let reporter = driver.reporter();

    reporter.begin("Testing Sales Order Creation");
    let mut order = driver.create(DocumentKind::Order, &plan.order_draft()).await?;
    reporter.pass(format!(
        "Order created successfully. ID: {}, Number: {}",
        order.id(),
        order.number()
    ));

    reporter.begin("Testing Sales Order Submission");
    driver.transition(&mut order, &Transition::Submit).await?;
    reporter.pass(format!("Order submitted. Status: {}", order.status()));

    reporter.begin("Testing Sales Order Approval");
    driver.approve_chain(&mut order, plan.approval_chain).await?;
    reporter.pass(format!("Order approved. Status: {}", order.status()));

    reporter.begin("Testing Order to Invoice Conversion");
    let invoice = driver.derive(&order, &Derivation::ConvertToInvoice).await?;
    reporter.pass(format!(
        "Invoice created from order. ID: {}, Number: {}",
        invoice.id(),
        invoice.number()
    ));

    Ok(vec![order, invoice])
}

/// Invoice: create, find it again, then submit, approve and post.
pub async fn invoice_flow<T: ApiTransport>(
    driver: &LifecycleDriver<'_, T>,
    plan: &ScenarioPlan<'_>,
) -> Result<Vec<TrackedDocument>, HarnessError> {
    let reporter = driver.reporter();

    reporter.begin("Testing Invoice Creation");
    let draft = plan.invoice_draft();
    let mut invoice = driver.create(DocumentKind::Invoice, &draft).await?;
    check_exclusive_total(&invoice, draft.net_subtotal())?;
    reporter.pass(format!(
        "Invoice created successfully. ID: {}, Number: {}",
        invoice.id(),
        invoice.number()
    ));

    reporter.begin("Testing List Invoices");
    driver.confirm_listed(&invoice).await?;
    reporter.pass(format!("Found invoice {} in list.", invoice.number()));

    reporter.begin("Testing Get Invoice Detail");
    let detail = driver.confirm_detail(&invoice).await?;
    reporter.pass(format!("Retrieved invoice detail: {}", detail.number));

    reporter.begin("Testing Invoice Submission");
    driver.transition(&mut invoice, &Transition::Submit).await?;
    reporter.pass(format!("Invoice submitted. Status: {}", invoice.status()));

    reporter.begin("Testing Invoice Approval");
    driver.approve_chain(&mut invoice, plan.approval_chain).await?;
    reporter.pass(format!("Invoice approved. Status: {}", invoice.status()));

    reporter.begin("Testing Invoice Posting");
    driver.transition(&mut invoice, &Transition::Post).await?;
    reporter.pass(format!("Invoice posted. Status: {}", invoice.status()));

    Ok(vec![invoice])
}

/// Credit note: post a base invoice, derive a credit note, shrink it, then
/// submit, approve and post it.
pub async fn credit_note_flow<T: ApiTransport>(
    driver: &LifecycleDriver<'_, T>,
    plan: &ScenarioPlan<'_>,
) -> Result<Vec<TrackedDocument>, HarnessError> {
    let reporter = driver.reporter();

    reporter.begin("Preparing Posted Invoice");
    let mut invoice = driver
        .create(DocumentKind::Invoice, &plan.invoice_draft())
        .await?;
    driver.transition(&mut invoice, &Transition::Submit).await?;
    driver.approve_chain(&mut invoice, plan.approval_chain).await?;
    driver.transition(&mut invoice, &Transition::Post).await?;
    reporter.pass(format!(
        "Base invoice {} is {}.",
        invoice.number(),
        invoice.status()
    ));

    reporter.begin("Testing Credit Note Creation");
    let derivation = Derivation::CreditNote {
        notes: Some(CREDIT_NOTE_REASON.into()),
    };
    let mut credit_note = driver.derive(&invoice, &derivation).await?;
    reporter.pass(format!(
        "Credit note created. ID: {}, Number: {}",
        credit_note.id(),
        credit_note.number()
    ));

    reporter.begin("Testing Credit Note Update");
    let first = credit_note.document.lines().first().cloned().ok_or_else(|| {
        HarnessError::Invariant(format!("{} has no lines to reduce", credit_note.number()))
    })?;
    if first.quantity <= CREDIT_QUANTITY {
        return Err(HarnessError::Invariant(format!(
            "{} first line already has quantity {}",
            credit_note.number(),
            first.quantity
        )));
    }
    let patch = DocumentPatch {
        items: vec![LineInput::from_item(&first, CREDIT_QUANTITY)],
    };
    let before = credit_note.document.total;
    driver.update(&mut credit_note, &patch).await?;
    let reduced = credit_note.document.total;
    reporter.progress(format!(
        "Total reduced from {} to {}.",
        show_amount(before),
        show_amount(reduced)
    ));
    // same lines again: the total must hold
    driver.update(&mut credit_note, &patch).await?;
    reporter.pass(format!(
        "Re-applied update kept total at {}.",
        show_amount(credit_note.document.total)
    ));

    reporter.begin("Testing Credit Note Submission");
    driver.transition(&mut credit_note, &Transition::Submit).await?;
    reporter.pass(format!("Credit note submitted. Status: {}", credit_note.status()));

    reporter.begin("Testing Credit Note Approval");
    driver
        .approve_chain(&mut credit_note, plan.approval_chain)
        .await?;
    reporter.pass(format!("Credit note approved. Status: {}", credit_note.status()));

    reporter.begin("Testing Credit Note Posting");
    driver.transition(&mut credit_note, &Transition::Post).await?;
    reporter.pass(format!("Credit note posted. Status: {}", credit_note.status()));

    Ok(vec![invoice, credit_note])
}

/// Tax-exclusive totals can only add to the net lines.
fn check_exclusive_total(invoice: &TrackedDocument, net_subtotal: f64) -> Result<(), HarnessError> {
    let total = invoice.document.total.ok_or_else(|| {
        HarnessError::Invariant(format!("{} {} has no total", invoice.kind, invoice.number()))
    })?;
    if total + amount::EPSILON < net_subtotal {
        return Err(HarnessError::Invariant(format!(
            "{} {} total {total:.2} is below its net lines {net_subtotal:.2}",
            invoice.kind,
            invoice.number()
        )));
    }
    Ok(())
}

fn show_amount(total: Option<f64>) -> String {
    total.map_or_else(|| "?".to_string(), |t| format!("{t:.2}"))
}

/// One pass over the server: login, tenant, fixtures, then the scenarios in
/// order. The first failure ends the run.
pub struct SmokeRun<T: ApiTransport> {
    session: Session<T>,
    config: HarnessConfig,
    reporter: Reporter,
}

impl<T: ApiTransport> SmokeRun<T> {
    pub fn new(transport: T, config: HarnessConfig, reporter: Reporter) -> Self {
        Self {
            session: Session::new(transport),
            config,
            reporter,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Runs `scenarios`, or all of them when empty. A failure is reported
    /// against the step that was open before it is returned.
    pub async fn execute(&mut self, scenarios: &[Scenario]) -> Result<RunSummary, HarnessError> {
        match self.run(scenarios).await {
            Ok(summary) => {
                self.reporter
                    .progress(format!("\nAll tests passed: {}", self.reporter.summary()));
                Ok(summary)
            }
            Err(err) => {
                self.reporter.fail(&err);
                Err(err)
            }
        }
    }

    async fn run(&mut self, scenarios: &[Scenario]) -> Result<RunSummary, HarnessError> {
        let scenarios = if scenarios.is_empty() {
            &Scenario::ALL[..]
        } else {
            scenarios
        };
        tracing::info!(base_url = %self.config.base_url, scenarios = ?scenarios, "starting smoke run");

        self.reporter.begin("Login");
        self.reporter.progress("Logging in...");
        self.session.authenticate(&self.config.credentials).await?;
        self.reporter.pass("Login successful.");

        self.reporter.begin("Tenant Selection");
        let tenant = self
            .session
            .resolve_active_tenant(&self.config.tenant_selection)
            .await?;
        self.reporter.pass(format!("Active Tenant ID: {tenant}"));

        let reporter = &self.reporter;
        reporter.begin("Fixture Lookup");
        let fixtures = FixtureResolver::new(&self.session).resolve().await?;
        reporter.pass(format!(
            "Customer ID: {}, Item ID: {}, Price: {}",
            fixtures.customer.id, fixtures.item.id, fixtures.item.price
        ));

        let driver = LifecycleDriver::new(&self.session, reporter);
        let approval_chain = self.config.approval_chain.clone().with_notes(APPROVAL_NOTES);
        let plan = ScenarioPlan {
            fixtures: &fixtures,
            approval_chain: &approval_chain,
            document_date: self.config.document_date(),
        };
        let mut outcomes = Vec::with_capacity(scenarios.len());
        for &scenario in scenarios {
            let documents = match scenario {
                Scenario::Order => order_flow(&driver, &plan).await?,
                Scenario::Invoice => invoice_flow(&driver, &plan).await?,
                Scenario::CreditNote => credit_note_flow(&driver, &plan).await?,
            };
            tracing::info!(%scenario, documents = documents.len(), "scenario passed");
            outcomes.push(ScenarioOutcome {
                scenario,
                documents,
            });
        }

        Ok(RunSummary {
            tenant,
            fixtures,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_types::domain::fixture::{CustomerRef, ItemRef};

    fn fixtures() -> Fixtures {
        Fixtures {
            customer: CustomerRef {
                id: "cust-1".into(),
                full_name: None,
            },
            item: ItemRef {
                id: "item-1".into(),
                name: None,
                price: 150.0,
            },
        }
    }

    #[test]
    fn scenario_names_parse_back() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert_eq!(" Credit-Note ".parse::<Scenario>().unwrap(), Scenario::CreditNote);
        assert!(matches!(
            "refund".parse::<Scenario>(),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn drafts_carry_dates_and_pricing() {
        let fixtures = fixtures();
        let chain = ApprovalChain::default();
        let plan = ScenarioPlan {
            fixtures: &fixtures,
            approval_chain: &chain,
            document_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        };

        let order = plan.order_draft();
        assert_eq!(order.delivery_date, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(order.tax_pricing_mode, TaxPricingMode::Inclusive);
        assert!(amount::approx_eq(order.net_subtotal(), 270.0));

        let invoice = plan.invoice_draft();
        assert_eq!(invoice.due_date, NaiveDate::from_ymd_opt(2026, 3, 3));
        assert_eq!(invoice.tax_pricing_mode, TaxPricingMode::Exclusive);
        assert_eq!(invoice.items[0].quantity, INVOICE_QUANTITY);
        assert!(amount::approx_eq(invoice.net_subtotal(), 750.0));
    }
}
