use sales_types::domain::amount;
use sales_types::domain::document::{
    Document, DocumentDraft, DocumentItem, DocumentKind, DocumentPatch, DocumentStatus,
};
use sales_types::domain::fixture::Page;
use sales_types::ports::api_transport::{ApiRequest, ApiResponse, ApiTransport};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::cmp::Ordering;

use super::session::Session;
use crate::errors::HarnessError;
use crate::reporter::Reporter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStep {
    pub index: u32,
    pub notes: Option<String>,
}

impl ApprovalStep {
    pub fn new(index: u32) -> Self {
        Self { index, notes: None }
    }
}

/// Ordered approval steps a document walks from SUBMITTED to APPROVED.
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalChain {
    steps: Vec<ApprovalStep>,
}

impl ApprovalChain {
    pub fn new(steps: Vec<ApprovalStep>) -> Result<Self, HarnessError> {
        if steps.is_empty() {
            return Err(HarnessError::Config(
                "approval chain needs at least one step".into(),
            ));
        }
        Ok(Self { steps })
    }

    pub fn from_indices(indices: &[u32]) -> Result<Self, HarnessError> {
        Self::new(indices.iter().copied().map(ApprovalStep::new).collect())
    }

    /// The single-level workflow the server ships with.
    pub fn single_step() -> Self {
        Self {
            steps: vec![ApprovalStep::new(0)],
        }
    }

    /// Attaches `notes` to every step that has none.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        let notes = notes.into();
        for step in &mut self.steps {
            if step.notes.is_none() {
                step.notes = Some(notes.clone());
            }
        }
        self
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn indices(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.index).collect()
    }
}

impl Default for ApprovalChain {
    fn default() -> Self {
        Self::single_step()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Submit,
    Approve(ApprovalStep),
    Post,
}

impl Transition {
    pub fn name(&self) -> String {
        match self {
            Transition::Submit => "submit".into(),
            Transition::Approve(step) => format!("approve step {}", step.index),
            Transition::Post => "post".into(),
        }
    }

    /// Least advanced status the document may report once the call succeeded.
    pub fn minimum_status(&self) -> DocumentStatus {
        match self {
            Transition::Submit | Transition::Approve(_) => DocumentStatus::Submitted,
            Transition::Post => DocumentStatus::Posted,
        }
    }

    fn request(&self, kind: DocumentKind, id: &str) -> Result<ApiRequest, HarnessError> {
        let base = kind.document_path(id);
        let request = match self {
            Transition::Submit => ApiRequest::post(format!("{base}/submit")),
            Transition::Approve(step) => {
                let body = match &step.notes {
                    Some(notes) => json!({ "notes": notes }),
                    None => json!({}),
                };
                ApiRequest::post(format!("{base}/approve/{}", step.index)).json(&body)?
            }
            Transition::Post => ApiRequest::post(format!("{base}/post")),
        };
        Ok(request)
    }
}

/// Server-side creation of one document from another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    ConvertToInvoice,
    CreditNote { notes: Option<String> },
}

impl Derivation {
    pub fn name(&self) -> &'static str {
        match self {
            Derivation::ConvertToInvoice => "convert to invoice",
            Derivation::CreditNote { .. } => "create credit note",
        }
    }

    pub fn source_kind(&self) -> DocumentKind {
        match self {
            Derivation::ConvertToInvoice => DocumentKind::Order,
            Derivation::CreditNote { .. } => DocumentKind::Invoice,
        }
    }

    pub fn target_kind(&self) -> DocumentKind {
        match self {
            Derivation::ConvertToInvoice => DocumentKind::Invoice,
            Derivation::CreditNote { .. } => DocumentKind::CreditNote,
        }
    }

    /// Source status the server insists on before deriving.
    pub fn required_source_status(&self) -> DocumentStatus {
        match self {
            Derivation::ConvertToInvoice => DocumentStatus::Approved,
            Derivation::CreditNote { .. } => DocumentStatus::Posted,
        }
    }

    fn request(&self, source_id: &str) -> Result<ApiRequest, HarnessError> {
        let base = self.source_kind().document_path(source_id);
        let request = match self {
            Derivation::ConvertToInvoice => ApiRequest::post(format!("{base}/convert")),
            Derivation::CreditNote { notes } => {
                let body = match notes {
                    Some(notes) => json!({ "notes": notes }),
                    None => json!({}),
                };
                ApiRequest::post(format!("{base}/credit-notes")).json(&body)?
            }
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<DocumentStatus>,
    pub search: Option<String>,
}

/// Statuses observed for one document, oldest first.
///
/// Forward-path statuses must never move backwards. Unrecognised statuses
/// are kept but not ranked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTrail {
    observed: Vec<DocumentStatus>,
}

impl StatusTrail {
    pub fn record(&mut self, status: DocumentStatus) -> Result<(), HarnessError> {
        if status.is_off_path() {
            return Err(HarnessError::Invariant(format!(
                "document left the forward path with status {status} (trail: {})",
                self.render()
            )));
        }
        if let (Some(next), Some(highest)) = (status.stage(), self.highest_stage()) {
            if next < highest {
                return Err(HarnessError::Invariant(format!(
                    "status regressed to {status} (trail: {})",
                    self.render()
                )));
            }
        }
        self.observed.push(status);
        Ok(())
    }

    pub fn observed(&self) -> &[DocumentStatus] {
        &self.observed
    }

    pub fn last(&self) -> Option<DocumentStatus> {
        self.observed.last().copied()
    }

    fn highest_stage(&self) -> Option<u8> {
        self.observed.iter().filter_map(|s| s.stage()).max()
    }

    pub fn render(&self) -> String {
        self.observed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// A document the run created, with every status it was seen in.
#[derive(Debug, Clone)]
pub struct TrackedDocument {
    pub kind: DocumentKind,
    pub document: Document,
    trail: StatusTrail,
}

impl TrackedDocument {
    fn start(kind: DocumentKind, document: Document) -> Result<Self, HarnessError> {
        let mut trail = StatusTrail::default();
        trail.record(document.status)?;
        Ok(Self {
            kind,
            document,
            trail,
        })
    }

    /// Replaces the local echo with a fresher server copy. Lines and number
    /// survive when the new copy omits them.
    fn absorb(&mut self, mut next: Document) -> Result<(), HarnessError> {
        if next.id != self.document.id {
            return Err(HarnessError::Invariant(format!(
                "expected {} {} but the server answered with {}",
                self.kind, self.document.id, next.id
            )));
        }
        self.trail.record(next.status)?;
        if next.items.is_none() {
            next.items = self.document.items.take();
        }
        if next.number.is_empty() {
            next.number = std::mem::take(&mut self.document.number);
        }
        self.document = next;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn number(&self) -> &str {
        &self.document.number
    }

    pub fn status(&self) -> DocumentStatus {
        self.document.status
    }

    pub fn trail(&self) -> &StatusTrail {
        &self.trail
    }
}

/// Drives documents through create, update, transitions and derivations,
/// checking every response before the next call goes out.
pub struct LifecycleDriver<'a, T: ApiTransport> {
    session: &'a Session<T>,
    reporter: &'a Reporter,
}

impl<'a, T: ApiTransport> LifecycleDriver<'a, T> {
    pub fn new(session: &'a Session<T>, reporter: &'a Reporter) -> Self {
        Self { session, reporter }
    }

    pub fn reporter(&self) -> &Reporter {
        self.reporter
    }

    pub async fn create(
        &self,
        kind: DocumentKind,
        draft: &DocumentDraft,
    ) -> Result<TrackedDocument, HarnessError> {
        let request = ApiRequest::post(kind.collection_path()).json(draft)?;
        let res = self.session.send(request).await?;
        if res.status != 201 {
            return Err(HarnessError::Creation {
                kind,
                status: res.status,
                body: res.body,
            });
        }
        let document: Document = decode(&res, format!("create {kind}"))?;
        require_number(kind, &document)?;
        ensure_exactly(kind, "create", &document, DocumentStatus::Draft)?;
        tracing::info!(%kind, document_id = %document.id, number = %document.number, "document created");
        TrackedDocument::start(kind, document)
    }

    /// Replaces the lines of a draft and checks that the total moved the way
    /// the new lines say it should.
    pub async fn update(
        &self,
        doc: &mut TrackedDocument,
        patch: &DocumentPatch,
    ) -> Result<(), HarnessError> {
        let kind = doc.kind;
        let before_net = doc.document.net_amount();
        let before_total = doc.document.total;

        let request = ApiRequest::put(kind.document_path(doc.id())).json(patch)?;
        let res = self.session.send(request).await?;
        if res.status != 200 {
            return Err(HarnessError::Update {
                kind,
                status: res.status,
                body: res.body,
            });
        }
        let mut updated: Document = decode(&res, format!("update {kind}"))?;
        // the local lines predate the patch
        if updated.items.is_none() {
            let detail = self.get_detail(kind, doc.id()).await?;
            updated.total = updated.total.or(detail.total);
            updated.items = Some(
                detail
                    .items
                    .unwrap_or_else(|| patch.items.iter().map(DocumentItem::from).collect()),
            );
        }
        let after_total = updated.total;
        doc.absorb(updated)?;
        verify_total_change(kind, before_net, patch.net_amount(), before_total, after_total)?;
        tracing::info!(%kind, document_id = %doc.id(), total = ?doc.document.total, "document updated");
        Ok(())
    }

    pub async fn transition(
        &self,
        doc: &mut TrackedDocument,
        transition: &Transition,
    ) -> Result<(), HarnessError> {
        let kind = doc.kind;
        let res = self
            .session
            .send(transition.request(kind, doc.id())?)
            .await?;
        if res.status != 201 {
            return Err(HarnessError::Transition {
                kind,
                transition: transition.name(),
                status: res.status,
                body: res.body,
            });
        }
        let next: Document = decode(&res, format!("{} {kind}", transition.name()))?;
        doc.absorb(next)?;
        ensure_reached(kind, &transition.name(), &doc.document, transition.minimum_status())?;
        tracing::info!(
            %kind,
            document_id = %doc.id(),
            transition = %transition.name(),
            status = %doc.status(),
            "transition applied"
        );
        Ok(())
    }

    /// Walks every step in order; the document must end APPROVED.
    pub async fn approve_chain(
        &self,
        doc: &mut TrackedDocument,
        chain: &ApprovalChain,
    ) -> Result<(), HarnessError> {
        for step in chain.steps() {
            self.transition(doc, &Transition::Approve(step.clone()))
                .await?;
            self.reporter
                .progress(format!("Approval step {} -> {}", step.index, doc.status()));
        }
        ensure_exactly(doc.kind, "approval chain", &doc.document, DocumentStatus::Approved)
    }

    pub async fn derive(
        &self,
        source: &TrackedDocument,
        derivation: &Derivation,
    ) -> Result<TrackedDocument, HarnessError> {
        if source.kind != derivation.source_kind() {
            return Err(HarnessError::Invariant(format!(
                "cannot {} from a {}",
                derivation.name(),
                source.kind
            )));
        }
        let required = derivation.required_source_status();
        if let (Some(actual), Some(needed)) = (source.status().stage(), required.stage()) {
            if actual < needed {
                return Err(HarnessError::Invariant(format!(
                    "{} {} is {}; {} needs {required}",
                    source.kind,
                    source.number(),
                    source.status(),
                    derivation.name()
                )));
            }
        }

        let target = derivation.target_kind();
        let res = self
            .session
            .send(derivation.request(source.id())?)
            .await?;
        if res.status != 201 {
            return Err(HarnessError::Creation {
                kind: target,
                status: res.status,
                body: res.body,
            });
        }
        let document: Document = decode(&res, derivation.name())?;
        require_number(target, &document)?;
        ensure_exactly(target, derivation.name(), &document, DocumentStatus::Draft)?;
        let mut derived = TrackedDocument::start(target, document)?;
        self.verify_cloned_lines(source, &mut derived).await?;
        tracing::info!(
            source = %source.number(),
            derived = %derived.number(),
            derivation = derivation.name(),
            "document derived"
        );
        Ok(derived)
    }

    async fn verify_cloned_lines(
        &self,
        source: &TrackedDocument,
        derived: &mut TrackedDocument,
    ) -> Result<(), HarnessError> {
        let expected = match source.document.item_count() {
            Some(count) => count,
            None => self
                .get_detail(source.kind, source.id())
                .await?
                .lines()
                .len(),
        };
        if derived.document.items.is_none() {
            let detail = self.get_detail(derived.kind, derived.id()).await?;
            derived.absorb(detail)?;
        }
        let actual = derived.document.lines().len();
        if actual != expected {
            return Err(HarnessError::Invariant(format!(
                "{} {} has {actual} line(s), {} {} has {expected}",
                derived.kind,
                derived.number(),
                source.kind,
                source.number()
            )));
        }
        self.reporter.progress("Items cloned successfully.");
        Ok(())
    }

    pub async fn list(
        &self,
        kind: DocumentKind,
        filter: &ListFilter,
    ) -> Result<Vec<Document>, HarnessError> {
        let mut request = ApiRequest::get(kind.collection_path());
        if let Some(status) = filter.status {
            request = request.query("status", status.as_str());
        }
        if let Some(search) = &filter.search {
            request = request.query("search", search.as_str());
        }
        let res = self.session.send(request).await?;
        if res.status != 200 {
            return Err(HarnessError::Lookup {
                step: format!("list {kind}"),
                status: res.status,
                body: res.body,
            });
        }
        let page: Page<Document> = decode(&res, format!("list {kind}"))?;
        Ok(page.items)
    }

    pub async fn get_detail(&self, kind: DocumentKind, id: &str) -> Result<Document, HarnessError> {
        let res = self.session.send(ApiRequest::get(kind.document_path(id))).await?;
        if res.status != 200 {
            return Err(HarnessError::Lookup {
                step: format!("get {kind} {id}"),
                status: res.status,
                body: res.body,
            });
        }
        let document: Document = decode(&res, format!("get {kind}"))?;
        if document.id != id {
            return Err(HarnessError::Invariant(format!(
                "asked for {kind} {id}, got {}",
                document.id
            )));
        }
        Ok(document)
    }

    /// The document shows up when listing by its status and number.
    pub async fn confirm_listed(&self, doc: &TrackedDocument) -> Result<(), HarnessError> {
        let filter = ListFilter {
            status: Some(doc.status()).filter(|s| *s != DocumentStatus::Unknown),
            search: Some(doc.number().to_string()),
        };
        let found = self.list(doc.kind, &filter).await?;
        let Some(first) = found.first() else {
            return Err(HarnessError::Invariant(format!(
                "{} {} not found in list",
                doc.kind,
                doc.number()
            )));
        };
        if !found
            .iter()
            .any(|d| d.number == doc.number() && d.id == doc.id())
        {
            return Err(HarnessError::Invariant(format!(
                "list returned {} instead of {} {}",
                first.number,
                doc.kind,
                doc.number()
            )));
        }
        Ok(())
    }

    /// Detail by id agrees with what creation returned.
    pub async fn confirm_detail(&self, doc: &TrackedDocument) -> Result<Document, HarnessError> {
        let detail = self.get_detail(doc.kind, doc.id()).await?;
        if detail.number != doc.number() {
            return Err(HarnessError::Invariant(format!(
                "{} {} reads back with number {}, created as {}",
                doc.kind,
                doc.id(),
                detail.number,
                doc.number()
            )));
        }
        Ok(detail)
    }
}

fn decode<D: DeserializeOwned>(res: &ApiResponse, step: impl Into<String>) -> Result<D, HarnessError> {
    res.data().map_err(|e| HarnessError::decode(step, e))
}

fn require_number(kind: DocumentKind, document: &Document) -> Result<(), HarnessError> {
    if document.number.trim().is_empty() {
        return Err(HarnessError::Invariant(format!(
            "{kind} {} has no document number",
            document.id
        )));
    }
    Ok(())
}

/// Statuses the server did not name are let through with a warning.
fn ensure_exactly(
    kind: DocumentKind,
    step: &str,
    document: &Document,
    expected: DocumentStatus,
) -> Result<(), HarnessError> {
    match document.status {
        status if status == expected => Ok(()),
        DocumentStatus::Unknown => {
            tracing::warn!(%kind, document_id = %document.id, step, %expected, "status not recognised");
            Ok(())
        }
        status => Err(HarnessError::Invariant(format!(
            "{kind} {} is {status} after {step}, expected {expected}",
            document.id
        ))),
    }
}

fn ensure_reached(
    kind: DocumentKind,
    step: &str,
    document: &Document,
    minimum: DocumentStatus,
) -> Result<(), HarnessError> {
    match (document.status.stage(), minimum.stage()) {
        (Some(actual), Some(needed)) if actual >= needed => Ok(()),
        _ if document.status == DocumentStatus::Unknown => {
            tracing::warn!(%kind, document_id = %document.id, step, %minimum, "status not recognised");
            Ok(())
        }
        _ => Err(HarnessError::Invariant(format!(
            "{kind} {} is {} after {step}, expected at least {minimum}",
            document.id, document.status
        ))),
    }
}

fn direction(from: f64, to: f64) -> Ordering {
    if amount::approx_eq(from, to) {
        Ordering::Equal
    } else if to < from {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Lines with a lower net amount must lower the total, equal lines keep it.
fn verify_total_change(
    kind: DocumentKind,
    before_net: f64,
    patched_net: f64,
    before_total: Option<f64>,
    after_total: Option<f64>,
) -> Result<(), HarnessError> {
    let (Some(before), Some(after)) = (before_total, after_total) else {
        return Err(HarnessError::Invariant(format!(
            "{kind} total missing around update (before {before_total:?}, after {after_total:?})"
        )));
    };
    if direction(before_net, patched_net) != direction(before, after) {
        return Err(HarnessError::Invariant(format!(
            "{kind} total went from {before:.2} to {after:.2} while the lines went from {before_net:.2} to {patched_net:.2}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(status: DocumentStatus) -> Document {
        Document {
            id: "d1".into(),
            number: "INV-0001".into(),
            status,
            items: None,
            subtotal: None,
            total: None,
        }
    }

    #[test]
    fn chain_needs_a_step() {
        assert!(matches!(
            ApprovalChain::from_indices(&[]),
            Err(HarnessError::Config(_))
        ));
        assert_eq!(ApprovalChain::default().indices(), vec![0]);
        let chain = ApprovalChain::from_indices(&[0, 1]).unwrap().with_notes("ok");
        assert!(chain.steps().iter().all(|s| s.notes.as_deref() == Some("ok")));
    }

    #[test]
    fn transition_requests_target_the_document() {
        let submit = Transition::Submit
            .request(DocumentKind::Order, "o1")
            .unwrap();
        assert_eq!(submit.path, "sales/orders/o1/submit");
        assert!(submit.body.is_none());

        let approve = Transition::Approve(ApprovalStep {
            index: 1,
            notes: Some("fine".into()),
        })
        .request(DocumentKind::Invoice, "i1")
        .unwrap();
        assert_eq!(approve.path, "sales/invoices/i1/approve/1");
        assert_eq!(approve.body, Some(json!({ "notes": "fine" })));

        let credit = Derivation::CreditNote { notes: None }.request("i1").unwrap();
        assert_eq!(credit.path, "sales/invoices/i1/credit-notes");
        let convert = Derivation::ConvertToInvoice.request("o1").unwrap();
        assert_eq!(convert.path, "sales/orders/o1/convert");
    }

    #[test]
    fn trail_rejects_regression_and_off_path() {
        let mut trail = StatusTrail::default();
        trail.record(DocumentStatus::Draft).unwrap();
        trail.record(DocumentStatus::Submitted).unwrap();
        trail.record(DocumentStatus::Submitted).unwrap();
        trail.record(DocumentStatus::Unknown).unwrap();
        trail.record(DocumentStatus::Approved).unwrap();

        let err = trail.record(DocumentStatus::Draft).unwrap_err();
        assert!(err.to_string().contains("regressed to DRAFT"));
        assert_eq!(
            trail.render(),
            "DRAFT -> SUBMITTED -> SUBMITTED -> UNKNOWN -> APPROVED"
        );

        let err = trail.record(DocumentStatus::Rejected).unwrap_err();
        assert!(matches!(err, HarnessError::Invariant(_)));
        assert_eq!(trail.last(), Some(DocumentStatus::Approved));
    }

    #[test]
    fn absorb_keeps_lines_missing_from_transition_responses() {
        let mut created = document(DocumentStatus::Draft);
        created.items = Some(vec![serde_json::from_value(json!({
            "itemId": "i1", "quantity": 1, "unitPrice": 10
        }))
        .unwrap()]);
        let mut tracked = TrackedDocument::start(DocumentKind::Invoice, created).unwrap();

        let mut submitted = document(DocumentStatus::Submitted);
        submitted.number = String::new();
        tracked.absorb(submitted).unwrap();
        assert_eq!(tracked.document.item_count(), Some(1));
        assert_eq!(tracked.number(), "INV-0001");

        let mut other = document(DocumentStatus::Approved);
        other.id = "d2".into();
        assert!(tracked.absorb(other).is_err());
    }

    #[test]
    fn status_checks_tolerate_unknown() {
        let kind = DocumentKind::Invoice;
        assert!(ensure_exactly(kind, "create", &document(DocumentStatus::Unknown), DocumentStatus::Draft).is_ok());
        assert!(ensure_exactly(kind, "create", &document(DocumentStatus::Submitted), DocumentStatus::Draft).is_err());
        assert!(ensure_reached(kind, "submit", &document(DocumentStatus::Approved), DocumentStatus::Submitted).is_ok());
        assert!(ensure_reached(kind, "post", &document(DocumentStatus::Approved), DocumentStatus::Posted).is_err());
    }

    #[test]
    fn total_must_follow_the_lines() {
        let kind = DocumentKind::CreditNote;
        // 5 x 150 down to 1 x 150, 10% tax on top
        assert!(verify_total_change(kind, 750.0, 150.0, Some(825.0), Some(165.0)).is_ok());
        assert!(verify_total_change(kind, 750.0, 150.0, Some(825.0), Some(825.0)).is_err());
        // same lines again
        assert!(verify_total_change(kind, 150.0, 150.0, Some(165.0), Some(165.001)).is_ok());
        assert!(verify_total_change(kind, 150.0, 150.0, Some(165.0), Some(150.0)).is_err());
        assert!(verify_total_change(kind, 150.0, 300.0, Some(165.0), Some(330.0)).is_ok());
        assert!(verify_total_change(kind, 150.0, 150.0, None, Some(165.0)).is_err());
    }
}
