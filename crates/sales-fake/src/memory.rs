use async_trait::async_trait;
use dashmap::DashMap;
use sales_types::domain::document::{
    DocumentDraft, DocumentKind, DocumentPatch, DocumentStatus, LineInput, TaxPricingMode,
};
use sales_types::domain::fixture::{CustomerRef, ItemRef};
use sales_types::domain::tenant::{SetActiveTenantRequest, TenantId};
use sales_types::ports::api_transport::{
    ApiRequest, ApiResponse, ApiTransport, Method, TransportError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const DEMO_EMAIL: &str = "admin@gym.com";
pub const DEMO_PASSWORD: &str = "password123";

const TAX_RATE: f64 = 0.10;
const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone)]
struct TenantSeed {
    id: TenantId,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredLine {
    item_id: String,
    item_name: Option<String>,
    quantity: f64,
    unit_price: f64,
    discount_percent: f64,
}

impl StoredLine {
    fn net(&self) -> f64 {
        self.quantity * self.unit_price * (1.0 - self.discount_percent / 100.0)
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    kind: DocumentKind,
    number: String,
    status: DocumentStatus,
    person_id: String,
    tax_mode: TaxPricingMode,
    lines: Vec<StoredLine>,
    approvals_done: u32,
    approval_notes: Vec<String>,
    notes: Option<String>,
    source_id: Option<String>,
}

#[derive(Debug, Clone)]
enum QuirkEffect {
    Fail { status: u16, body: String },
    ReportStatus(DocumentStatus),
    OmitItems,
    IgnoreWrite,
}

#[derive(Debug, Clone)]
struct Quirk {
    method: Method,
    path_contains: String,
    effect: QuirkEffect,
}

impl Quirk {
    fn matches(&self, request: &ApiRequest) -> bool {
        self.method == request.method && request.path.contains(&self.path_contains)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    logged_in: bool,
    active_tenant: Option<TenantId>,
}

struct Inner {
    email: String,
    password: String,
    tenants: Vec<TenantSeed>,
    customers: Vec<CustomerRef>,
    items: Vec<ItemRef>,
    approval_levels: u32,
    drop_cloned_lines: bool,
    session: Mutex<SessionState>,
    documents: DashMap<String, StoredDocument>,
    sequences: DashMap<DocumentKind, u32>,
    quirks: Mutex<Vec<Quirk>>,
    requests: Mutex<Vec<String>>,
}

/// Single-session emulation of the sales API. Cloning shares state, so a test
/// can keep a handle while the harness owns another.
#[derive(Clone)]
pub struct InMemorySalesServer {
    inner: Arc<Inner>,
}

pub struct InMemorySalesServerBuilder {
    email: String,
    password: String,
    tenants: Vec<TenantSeed>,
    customers: Vec<CustomerRef>,
    items: Vec<ItemRef>,
    approval_levels: u32,
    drop_cloned_lines: bool,
    active_tenant: Option<TenantId>,
}

impl InMemorySalesServerBuilder {
    pub fn credentials(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.email = email.into();
        self.password = password.into();
        self
    }

    pub fn tenant(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.tenants.push(TenantSeed {
            id: TenantId::new(id),
            name: name.into(),
        });
        self
    }

    /// Pretends an earlier session already picked this tenant.
    pub fn active_tenant(mut self, id: impl Into<String>) -> Self {
        self.active_tenant = Some(TenantId::new(id));
        self
    }

    pub fn customer(mut self, id: impl Into<String>, full_name: impl Into<String>) -> Self {
        self.customers.push(CustomerRef {
            id: id.into(),
            full_name: Some(full_name.into()),
        });
        self
    }

    pub fn item(mut self, id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        self.items.push(ItemRef {
            id: id.into(),
            name: Some(name.into()),
            price,
        });
        self
    }

    /// Number of approval steps a submitted document needs; 0 approves on submit.
    pub fn approval_levels(mut self, levels: u32) -> Self {
        self.approval_levels = levels;
        self
    }

    /// Credit notes come back without the invoice's lines.
    pub fn drop_cloned_lines(mut self) -> Self {
        self.drop_cloned_lines = true;
        self
    }

    pub fn build(self) -> InMemorySalesServer {
        InMemorySalesServer {
            inner: Arc::new(Inner {
                email: self.email,
                password: self.password,
                tenants: self.tenants,
                customers: self.customers,
                items: self.items,
                approval_levels: self.approval_levels,
                drop_cloned_lines: self.drop_cloned_lines,
                session: Mutex::new(SessionState {
                    logged_in: false,
                    active_tenant: self.active_tenant,
                }),
                documents: DashMap::new(),
                sequences: DashMap::new(),
                quirks: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn decimal(value: f64) -> String {
    format!("{value:.2}")
}

fn envelope(status: u16, data: Value) -> ApiResponse {
    ApiResponse::json(status, &json!({ "data": data }))
}

fn error(status: u16, message: &str) -> ApiResponse {
    ApiResponse::json(status, &json!({ "statusCode": status, "message": message }))
}

fn not_found() -> ApiResponse {
    error(404, "Not Found")
}

fn invalid_transition() -> ApiResponse {
    error(400, "Invalid status transition")
}

impl InMemorySalesServer {
    pub fn builder() -> InMemorySalesServerBuilder {
        InMemorySalesServerBuilder {
            email: DEMO_EMAIL.into(),
            password: DEMO_PASSWORD.into(),
            tenants: Vec::new(),
            customers: Vec::new(),
            items: Vec::new(),
            approval_levels: 1,
            drop_cloned_lines: false,
            active_tenant: None,
        }
    }

    /// Demo tenant, one customer, one catalog item, single-step approval.
    pub fn seeded() -> Self {
        Self::builder()
            .tenant("tenant-demo", "Demo Gym")
            .customer("cust-1", "Jane Member")
            .item("item-1", "Day Pass", 150.0)
            .build()
    }

    /// Answers matching requests with `status`/`body` instead of handling them.
    pub fn fail_on(
        &self,
        method: Method,
        path_contains: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) {
        lock(&self.inner.quirks).push(Quirk {
            method,
            path_contains: path_contains.into(),
            effect: QuirkEffect::Fail {
                status,
                body: body.into(),
            },
        });
    }

    /// Handles matching requests normally but reports `status` in the response.
    pub fn report_status_on(
        &self,
        method: Method,
        path_contains: impl Into<String>,
        status: DocumentStatus,
    ) {
        lock(&self.inner.quirks).push(Quirk {
            method,
            path_contains: path_contains.into(),
            effect: QuirkEffect::ReportStatus(status),
        });
    }

    /// Handles matching requests normally but leaves `items` out of the response.
    pub fn omit_items_on(&self, method: Method, path_contains: impl Into<String>) {
        lock(&self.inner.quirks).push(Quirk {
            method,
            path_contains: path_contains.into(),
            effect: QuirkEffect::OmitItems,
        });
    }

    /// Accepts matching writes to a document without applying them and
    /// answers with the document as stored.
    pub fn ignore_writes_on(&self, method: Method, path_contains: impl Into<String>) {
        lock(&self.inner.quirks).push(Quirk {
            method,
            path_contains: path_contains.into(),
            effect: QuirkEffect::IgnoreWrite,
        });
    }

    /// `"METHOD path"` for every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.inner.requests).clone()
    }

    pub fn active_tenant(&self) -> Option<TenantId> {
        lock(&self.inner.session).active_tenant.clone()
    }

    pub fn document_status(&self, id: &str) -> Option<DocumentStatus> {
        self.inner.documents.get(id).map(|doc| doc.status)
    }

    /// Notes sent with each approval step of a document, in order.
    pub fn approval_notes(&self, id: &str) -> Vec<String> {
        self.inner
            .documents
            .get(id)
            .map(|doc| doc.approval_notes.clone())
            .unwrap_or_default()
    }

    pub fn document_count(&self, kind: DocumentKind) -> usize {
        self.inner
            .documents
            .iter()
            .filter(|doc| doc.kind == kind)
            .count()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if let (Method::Post, ["auth", "login"]) = (request.method, segments.as_slice()) {
            return self.login(request);
        }
        if !lock(&self.inner.session).logged_in {
            return error(401, "Unauthorized");
        }

        match (request.method, segments.as_slice()) {
            (Method::Get, ["me", "tenants", "active"]) => self.get_active_tenant(),
            (Method::Post, ["me", "tenants", "active"]) => self.set_active_tenant(request),
            (Method::Get, ["me", "tenants"]) => self.list_tenants(),
            _ => {
                if self.tenant_scope(request).is_none() {
                    return error(403, "No active tenant selected");
                }
                self.handle_scoped(request, &segments)
            }
        }
    }

    fn handle_scoped(&self, request: &ApiRequest, segments: &[&str]) -> ApiResponse {
        match (request.method, segments) {
            (Method::Get, ["people"]) => {
                let customers = if request.query_value("type") == Some("CUSTOMER") {
                    self.inner.customers.clone()
                } else {
                    Vec::new()
                };
                let total = customers.len();
                envelope(200, json!({ "items": customers, "total": total }))
            }
            (Method::Get, ["catalog", "items"]) => {
                let items: Vec<Value> = self
                    .inner
                    .items
                    .iter()
                    .map(|it| json!({ "id": it.id, "name": it.name, "price": decimal(it.price) }))
                    .collect();
                let total = items.len();
                envelope(200, json!({ "items": items, "total": total }))
            }
            (Method::Post, ["sales", "orders", id, "convert"]) => self.convert_order(id),
            (Method::Post, ["sales", "invoices", id, "credit-notes"]) => {
                self.create_credit_note(id, request)
            }
            (method, ["sales", collection, rest @ ..]) => {
                let Some(kind) = DocumentKind::from_collection(collection) else {
                    return not_found();
                };
                match (method, rest) {
                    (Method::Post, []) if kind != DocumentKind::CreditNote => {
                        self.create(kind, request)
                    }
                    (Method::Get, []) => self.list(kind, request),
                    (Method::Get, [id]) => self.detail(kind, id),
                    (Method::Put, [id]) => self.update(kind, id, request),
                    (Method::Post, [id, "submit"]) => self.submit(kind, id),
                    (Method::Post, [id, "approve", step]) => {
                        self.approve(kind, id, step, request)
                    }
                    (Method::Post, [id, "post"]) if kind != DocumentKind::Order => {
                        self.post(kind, id)
                    }
                    _ => not_found(),
                }
            }
            _ => not_found(),
        }
    }

    fn login(&self, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let email = body.get("email").and_then(Value::as_str);
        let password = body.get("password").and_then(Value::as_str);
        if email != Some(self.inner.email.as_str()) || password != Some(self.inner.password.as_str())
        {
            return error(401, "Invalid credentials");
        }
        lock(&self.inner.session).logged_in = true;
        envelope(201, json!({ "user": { "email": self.inner.email } }))
    }

    fn find_tenant(&self, id: &TenantId) -> Option<&TenantSeed> {
        self.inner.tenants.iter().find(|t| &t.id == id)
    }

    fn get_active_tenant(&self) -> ApiResponse {
        let active = lock(&self.inner.session).active_tenant.clone();
        match active.as_ref().and_then(|id| self.find_tenant(id)) {
            Some(tenant) => envelope(200, json!({ "id": tenant.id, "name": tenant.name })),
            None => envelope(200, Value::Null),
        }
    }

    fn list_tenants(&self) -> ApiResponse {
        let memberships: Vec<Value> = self
            .inner
            .tenants
            .iter()
            .map(|t| json!({ "tenant": { "id": t.id, "name": t.name }, "role": { "name": "Owner" } }))
            .collect();
        envelope(200, Value::Array(memberships))
    }

    fn set_active_tenant(&self, request: &ApiRequest) -> ApiResponse {
        let parsed = request
            .body
            .clone()
            .map(serde_json::from_value::<SetActiveTenantRequest>);
        let Some(Ok(SetActiveTenantRequest { tenant_id })) = parsed else {
            return error(400, "tenantId is required");
        };
        if self.find_tenant(&tenant_id).is_none() {
            return error(403, "You do not have access to this tenant");
        }
        lock(&self.inner.session).active_tenant = Some(tenant_id);
        envelope(200, json!({ "message": "Active tenant set successfully" }))
    }

    fn tenant_scope(&self, request: &ApiRequest) -> Option<TenantId> {
        let from_header = request
            .header_value(TENANT_HEADER)
            .map(TenantId::from)
            .filter(|id| self.find_tenant(id).is_some());
        from_header.or_else(|| lock(&self.inner.session).active_tenant.clone())
    }

    fn next_number(&self, kind: DocumentKind) -> String {
        let mut seq = self.inner.sequences.entry(kind).or_insert(0);
        *seq += 1;
        let prefix = match kind {
            DocumentKind::Order => "SO",
            DocumentKind::Invoice => "INV",
            DocumentKind::CreditNote => "CN",
        };
        format!("{prefix}-{:04}", *seq)
    }

    fn validate_lines(&self, lines: &[LineInput]) -> Result<Vec<StoredLine>, ApiResponse> {
        if lines.is_empty() {
            return Err(error(400, "items must not be empty"));
        }
        lines
            .iter()
            .map(|line| {
                let Some(item) = self.inner.items.iter().find(|it| it.id == line.item_id) else {
                    return Err(error(400, "Item not found"));
                };
                if line.quantity <= 0.0 {
                    return Err(error(400, "quantity must be positive"));
                }
                Ok(StoredLine {
                    item_id: line.item_id.clone(),
                    item_name: item.name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    discount_percent: line.discount_percent,
                })
            })
            .collect()
    }

    fn create(&self, kind: DocumentKind, request: &ApiRequest) -> ApiResponse {
        let parsed = request
            .body
            .clone()
            .map(serde_json::from_value::<DocumentDraft>);
        let draft = match parsed {
            Some(Ok(draft)) => draft,
            Some(Err(e)) => return error(400, &e.to_string()),
            None => return error(400, "body required"),
        };
        if !self.inner.customers.iter().any(|c| c.id == draft.person_id) {
            return error(400, "Person not found");
        }
        let lines = match self.validate_lines(&draft.items) {
            Ok(lines) => lines,
            Err(res) => return res,
        };
        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            kind,
            number: self.next_number(kind),
            status: DocumentStatus::Draft,
            person_id: draft.person_id,
            tax_mode: draft.tax_pricing_mode,
            lines,
            approvals_done: 0,
            approval_notes: Vec::new(),
            notes: draft.notes,
            source_id: None,
        };
        let body = render(&doc, true);
        self.inner.documents.insert(doc.id.clone(), doc);
        envelope(201, body)
    }

    fn list(&self, kind: DocumentKind, request: &ApiRequest) -> ApiResponse {
        let status = request
            .query_value("status")
            .map(|s| serde_json::from_value::<DocumentStatus>(Value::String(s.to_string())));
        let status = match status {
            Some(Ok(status)) => Some(status),
            Some(Err(_)) => return error(400, "invalid status filter"),
            None => None,
        };
        let search = request.query_value("search").unwrap_or("");

        let mut matches: Vec<StoredDocument> = self
            .inner
            .documents
            .iter()
            .filter(|doc| doc.kind == kind)
            .filter(|doc| status.map_or(true, |s| doc.status == s))
            .filter(|doc| doc.number.contains(search))
            .map(|doc| doc.value().clone())
            .collect();
        matches.sort_by(|a, b| a.number.cmp(&b.number));
        let items: Vec<Value> = matches.iter().map(|doc| render(doc, false)).collect();
        let total = items.len();
        envelope(200, json!({ "items": items, "total": total }))
    }

    fn detail(&self, kind: DocumentKind, id: &str) -> ApiResponse {
        match self.inner.documents.get(id) {
            Some(doc) if doc.kind == kind => envelope(200, render(&doc, true)),
            _ => not_found(),
        }
    }

    /// Applies `change` to a stored document of `kind` and renders the result.
    fn mutate<F>(&self, kind: DocumentKind, id: &str, status: u16, change: F) -> ApiResponse
    where
        F: FnOnce(&mut StoredDocument) -> Result<(), ApiResponse>,
    {
        let Some(mut doc) = self.inner.documents.get_mut(id) else {
            return not_found();
        };
        if doc.kind != kind {
            return not_found();
        }
        match change(&mut doc) {
            Ok(()) => envelope(status, render(&doc, true)),
            Err(res) => res,
        }
    }

    fn update(&self, kind: DocumentKind, id: &str, request: &ApiRequest) -> ApiResponse {
        let parsed = request
            .body
            .clone()
            .map(serde_json::from_value::<DocumentPatch>);
        let patch = match parsed {
            Some(Ok(patch)) => patch,
            Some(Err(e)) => return error(400, &e.to_string()),
            None => return error(400, "body required"),
        };
        let lines = match self.validate_lines(&patch.items) {
            Ok(lines) => lines,
            Err(res) => return res,
        };
        self.mutate(kind, id, 200, |doc| {
            if doc.status != DocumentStatus::Draft {
                return Err(error(400, "Only draft documents can be edited"));
            }
            doc.lines = lines;
            Ok(())
        })
    }

    fn submit(&self, kind: DocumentKind, id: &str) -> ApiResponse {
        let levels = self.inner.approval_levels;
        self.mutate(kind, id, 201, |doc| {
            if doc.status != DocumentStatus::Draft {
                return Err(invalid_transition());
            }
            doc.approvals_done = 0;
            doc.approval_notes.clear();
            doc.status = if levels == 0 {
                DocumentStatus::Approved
            } else {
                DocumentStatus::Submitted
            };
            Ok(())
        })
    }

    fn approve(&self, kind: DocumentKind, id: &str, step: &str, request: &ApiRequest) -> ApiResponse {
        let Ok(step) = step.parse::<u32>() else {
            return error(400, "stepIndex must be an integer");
        };
        let notes = request
            .body
            .as_ref()
            .and_then(|b| b.get("notes"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let levels = self.inner.approval_levels;
        self.mutate(kind, id, 201, |doc| {
            if doc.status != DocumentStatus::Submitted {
                return Err(invalid_transition());
            }
            if step != doc.approvals_done {
                return Err(error(400, &format!("Approval step {step} is not pending")));
            }
            doc.approvals_done += 1;
            doc.approval_notes.extend(notes);
            if doc.approvals_done >= levels {
                doc.status = DocumentStatus::Approved;
            }
            Ok(())
        })
    }

    fn post(&self, kind: DocumentKind, id: &str) -> ApiResponse {
        self.mutate(kind, id, 201, |doc| {
            if doc.status != DocumentStatus::Approved {
                return Err(invalid_transition());
            }
            doc.status = DocumentStatus::Posted;
            Ok(())
        })
    }

    fn derive_from(
        &self,
        source_kind: DocumentKind,
        source_id: &str,
        allowed: &[DocumentStatus],
        target: DocumentKind,
        notes: Option<String>,
        rejection: &str,
    ) -> ApiResponse {
        let source = match self.inner.documents.get(source_id) {
            Some(doc) if doc.kind == source_kind => doc.value().clone(),
            _ => return not_found(),
        };
        if !allowed.contains(&source.status) {
            return error(400, rejection);
        }
        let lines = if target == DocumentKind::CreditNote && self.inner.drop_cloned_lines {
            Vec::new()
        } else {
            source.lines.clone()
        };
        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            kind: target,
            number: self.next_number(target),
            status: DocumentStatus::Draft,
            person_id: source.person_id.clone(),
            tax_mode: source.tax_mode,
            lines,
            approvals_done: 0,
            approval_notes: Vec::new(),
            notes: notes.or_else(|| Some(format!("Created from {}", source.number))),
            source_id: Some(source.id.clone()),
        };
        let body = render(&doc, true);
        self.inner.documents.insert(doc.id.clone(), doc);
        envelope(201, body)
    }

    fn convert_order(&self, id: &str) -> ApiResponse {
        self.derive_from(
            DocumentKind::Order,
            id,
            &[DocumentStatus::Approved, DocumentStatus::Posted],
            DocumentKind::Invoice,
            None,
            "Only approved orders can be converted",
        )
    }

    fn create_credit_note(&self, id: &str, request: &ApiRequest) -> ApiResponse {
        let notes = request
            .body
            .as_ref()
            .and_then(|b| b.get("notes"))
            .and_then(Value::as_str)
            .map(str::to_string);
        self.derive_from(
            DocumentKind::Invoice,
            id,
            &[DocumentStatus::Posted],
            DocumentKind::CreditNote,
            notes,
            "Credit Note can only be created from a POSTED Invoice",
        )
    }

    fn apply_quirks(&self, request: &ApiRequest) -> Option<QuirkEffect> {
        lock(&self.inner.quirks)
            .iter()
            .find(|q| q.matches(request))
            .map(|q| q.effect.clone())
    }
}

fn render(doc: &StoredDocument, with_items: bool) -> Value {
    let net: f64 = doc.lines.iter().map(StoredLine::net).sum();
    let (subtotal, tax, total) = match doc.tax_mode {
        TaxPricingMode::Exclusive => (net, net * TAX_RATE, net * (1.0 + TAX_RATE)),
        TaxPricingMode::Inclusive => {
            let subtotal = net / (1.0 + TAX_RATE);
            (subtotal, net - subtotal, net)
        }
    };
    let mut body = json!({
        "id": doc.id,
        "number": doc.number,
        "status": doc.status,
        "personId": doc.person_id,
        "taxPricingMode": doc.tax_mode,
        "notes": doc.notes,
        "sourceDocumentId": doc.source_id,
        "subtotal": decimal(subtotal),
        "taxTotal": decimal(tax),
        "total": decimal(total),
    });
    if with_items {
        let items: Vec<Value> = doc
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                json!({
                    "id": format!("{}-{}", doc.id, i + 1),
                    "itemId": line.item_id,
                    "itemName": line.item_name,
                    "quantity": decimal(line.quantity),
                    "unitPrice": decimal(line.unit_price),
                    "discountPercent": line.discount_percent,
                    "discountAmount": decimal(line.quantity * line.unit_price - line.net()),
                    "lineTotal": decimal(line.net()),
                })
            })
            .collect();
        body["items"] = Value::Array(items);
    }
    body
}

/// Rewrites the `data` object of a successful envelope.
fn edit_data<F>(response: ApiResponse, edit: F) -> ApiResponse
where
    F: FnOnce(&mut serde_json::Map<String, Value>),
{
    let Ok(mut body) = response.json_value() else {
        return response;
    };
    match body.get_mut("data").and_then(Value::as_object_mut) {
        Some(data) => {
            edit(data);
            ApiResponse::json(response.status, &body)
        }
        None => response,
    }
}

#[async_trait]
impl ApiTransport for InMemorySalesServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        lock(&self.inner.requests).push(format!("{} {}", request.method, request.path));
        match self.apply_quirks(&request) {
            Some(QuirkEffect::Fail { status, body }) => Ok(ApiResponse::new(status, body)),
            Some(QuirkEffect::ReportStatus(status)) => Ok(edit_data(self.handle(&request), |data| {
                data.insert("status".into(), json!(status));
            })),
            Some(QuirkEffect::OmitItems) => Ok(edit_data(self.handle(&request), |data| {
                data.remove("items");
            })),
            Some(QuirkEffect::IgnoreWrite) => {
                let read = ApiRequest {
                    method: Method::Get,
                    body: None,
                    ..request
                };
                Ok(self.handle(&read))
            }
            None => Ok(self.handle(&request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn logged_in(server: &InMemorySalesServer) {
        let res = server
            .send(
                ApiRequest::post("auth/login")
                    .json(&json!({ "email": DEMO_EMAIL, "password": DEMO_PASSWORD }))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status, 201);
        let res = server
            .send(
                ApiRequest::post("me/tenants/active")
                    .json(&json!({ "tenantId": "tenant-demo" }))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status, 200);
    }

    fn invoice_body(quantity: f64) -> Value {
        json!({
            "documentDate": "2026-01-24",
            "dueDate": "2026-02-24",
            "personId": "cust-1",
            "taxPricingMode": "EXCLUSIVE",
            "items": [{ "itemId": "item-1", "quantity": quantity, "unitPrice": 150.0, "discountPercent": 0.0 }]
        })
    }

    #[tokio::test]
    async fn requires_login_before_anything_else() {
        let server = InMemorySalesServer::seeded();
        let res = server.send(ApiRequest::get("me/tenants")).await.unwrap();
        assert_eq!(res.status, 401);

        let bad = server
            .send(
                ApiRequest::post("auth/login")
                    .json(&json!({ "email": DEMO_EMAIL, "password": "nope" }))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status, 401);
    }

    #[tokio::test]
    async fn business_routes_need_a_tenant() {
        let server = InMemorySalesServer::seeded();
        server
            .send(
                ApiRequest::post("auth/login")
                    .json(&json!({ "email": DEMO_EMAIL, "password": DEMO_PASSWORD }))
                    .unwrap(),
            )
            .await
            .unwrap();
        let res = server.send(ApiRequest::get("catalog/items")).await.unwrap();
        assert_eq!(res.status, 403);

        let scoped = server
            .send(ApiRequest::get("catalog/items").header(TENANT_HEADER, "tenant-demo"))
            .await
            .unwrap();
        assert_eq!(scoped.status, 200);
    }

    #[tokio::test]
    async fn invoice_lifecycle_and_totals() {
        let server = InMemorySalesServer::seeded();
        logged_in(&server).await;

        let created = server
            .send(ApiRequest::post("sales/invoices").json(&invoice_body(5.0)).unwrap())
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        let data: Value = created.data().unwrap();
        assert_eq!(data["number"], "INV-0001");
        assert_eq!(data["status"], "DRAFT");
        assert_eq!(data["total"], "825.00");
        let id = data["id"].as_str().unwrap().to_string();

        let early_post = server
            .send(ApiRequest::post(format!("sales/invoices/{id}/post")))
            .await
            .unwrap();
        assert_eq!(early_post.status, 400);

        for path in ["submit", "approve/0", "post"] {
            let res = server
                .send(ApiRequest::post(format!("sales/invoices/{id}/{path}")))
                .await
                .unwrap();
            assert_eq!(res.status, 201, "{path}: {}", res.body);
        }
        assert_eq!(server.document_status(&id), Some(DocumentStatus::Posted));
    }

    #[tokio::test]
    async fn multi_level_approval_requires_steps_in_order() {
        let server = InMemorySalesServer::builder()
            .tenant("tenant-demo", "Demo Gym")
            .customer("cust-1", "Jane Member")
            .item("item-1", "Day Pass", 150.0)
            .approval_levels(2)
            .build();
        logged_in(&server).await;
        let created = server
            .send(ApiRequest::post("sales/invoices").json(&invoice_body(1.0)).unwrap())
            .await
            .unwrap();
        let id = created.data::<Value>().unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        server
            .send(ApiRequest::post(format!("sales/invoices/{id}/submit")))
            .await
            .unwrap();

        let skipped = server
            .send(ApiRequest::post(format!("sales/invoices/{id}/approve/1")))
            .await
            .unwrap();
        assert_eq!(skipped.status, 400);

        server
            .send(ApiRequest::post(format!("sales/invoices/{id}/approve/0")))
            .await
            .unwrap();
        assert_eq!(server.document_status(&id), Some(DocumentStatus::Submitted));
        server
            .send(ApiRequest::post(format!("sales/invoices/{id}/approve/1")))
            .await
            .unwrap();
        assert_eq!(server.document_status(&id), Some(DocumentStatus::Approved));
    }

    #[tokio::test]
    async fn shaping_quirks_keep_stored_state_honest() {
        let server = InMemorySalesServer::seeded();
        logged_in(&server).await;
        let created = server
            .send(ApiRequest::post("sales/invoices").json(&invoice_body(5.0)).unwrap())
            .await
            .unwrap();
        let id = created.data::<Value>().unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        let path = format!("sales/invoices/{id}");

        server.ignore_writes_on(Method::Put, "sales/invoices");
        let res = server
            .send(ApiRequest::put(path.clone()).json(&json!({ "items": [] })).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.data::<Value>().unwrap()["total"], "825.00");

        server.omit_items_on(Method::Post, "/submit");
        let submitted = server
            .send(ApiRequest::post(format!("{path}/submit")))
            .await
            .unwrap();
        let data: Value = submitted.data().unwrap();
        assert_eq!(data["status"], "SUBMITTED");
        assert!(data.get("items").is_none());

        server
            .send(
                ApiRequest::post(format!("{path}/approve/0"))
                    .json(&json!({ "notes": "looks fine" }))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(server.approval_notes(&id), vec!["looks fine".to_string()]);
    }

    #[tokio::test]
    async fn quirks_override_responses() {
        let server = InMemorySalesServer::seeded();
        logged_in(&server).await;
        server.fail_on(Method::Get, "catalog", 503, "maintenance");
        let res = server.send(ApiRequest::get("catalog/items")).await.unwrap();
        assert_eq!(res, ApiResponse::new(503, "maintenance"));
        assert_eq!(
            server.requests().last().map(String::as_str),
            Some("GET catalog/items")
        );
    }
}
