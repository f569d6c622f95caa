//! Intent dispatch
//!
//! `BusinessEngine::execute` is the single entry point: it resolves the
//! referenced customer (active-reference, then ring, then database with
//! ranked candidates), dispatches on the typed payload, and folds every
//! failure into an `ExecutionResult` — a session never crashes on a
//! business error.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Tz;
use dukaan_voice_core::{
    format_inr, Customer, CustomerPatch, CustomerRef, ErrorCode, ExecutionResult, Invoice,
    IntentPayload, Language, PaymentMode, ReminderStatus,
};
use dukaan_voice_nlu::{digit_words, ExtractedCommand, NameMatcher};
use dukaan_voice_scheduler::{Mailer, ReminderScheduler, SchedulerError, WhatsAppChannel};
use dukaan_voice_store::{DataServices, StoreError};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::memory::ConversationMemory;

/// Candidates below this need disambiguation when more than one exists.
const RESOLVE_THRESHOLD: f32 = 0.85;

/// Per-session context the engine mutates while executing.
pub struct SessionCtx {
    pub session_id: String,
    pub language: Language,
    /// Channel-level admin policy hook; set by the session transport.
    pub is_admin: bool,
    pub memory: ConversationMemory,
}

impl SessionCtx {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            language: Language::Hindi,
            is_admin: false,
            memory: ConversationMemory::new(),
        }
    }
}

/// The business engine.
pub struct BusinessEngine {
    data: DataServices,
    scheduler: Arc<ReminderScheduler>,
    mailer: Arc<dyn Mailer>,
    whatsapp: Arc<dyn WhatsAppChannel>,
    admin_email: String,
    tz: Tz,
    matcher: NameMatcher,
}

impl BusinessEngine {
    pub fn new(
        data: DataServices,
        scheduler: Arc<ReminderScheduler>,
        mailer: Arc<dyn Mailer>,
        whatsapp: Arc<dyn WhatsAppChannel>,
        admin_email: String,
        tz: Tz,
    ) -> Self {
        Self {
            data,
            scheduler,
            mailer,
            whatsapp,
            admin_email,
            tz,
            matcher: NameMatcher::new(),
        }
    }

    pub fn data(&self) -> &DataServices {
        &self.data
    }

    /// Dispatch one gated command.
    pub async fn execute(&self, command: &ExtractedCommand, ctx: &mut SessionCtx) -> ExecutionResult {
        let result = match &command.payload {
            IntentPayload::CreateInvoice {
                customer,
                items,
                auto_send,
                gst,
            } => {
                self.create_invoice(customer, items, *auto_send, gst.unwrap_or(false), ctx)
                    .await
            }
            IntentPayload::ConfirmInvoice { customer } => self.confirm_invoice(customer, ctx).await,
            IntentPayload::ShowPendingInvoice { customer } => {
                self.show_pending(customer, ctx).await
            }
            IntentPayload::ToggleGst { customer, enable } => {
                self.toggle_gst(customer, *enable, ctx).await
            }
            IntentPayload::CancelInvoice {
                customer,
                cancel_all,
            } => self.cancel_invoice(customer, *cancel_all, ctx).await,
            IntentPayload::CreateReminder {
                customer,
                amount,
                when_text,
                message,
            } => {
                self.create_reminder(customer, *amount, when_text.as_deref(), message.clone(), ctx)
                    .await
            }
            IntentPayload::CancelReminder {
                customer,
                reminder_id,
            } => self.cancel_reminder(customer, *reminder_id, ctx).await,
            IntentPayload::ModifyReminder {
                customer,
                reminder_id,
                patch,
            } => self.modify_reminder(customer, *reminder_id, patch, ctx).await,
            IntentPayload::ListReminders { customer } => self.list_reminders(customer, ctx).await,
            IntentPayload::RecordPayment {
                customer,
                amount,
                mode,
            } => self.record_payment(customer, *amount, *mode, ctx).await,
            IntentPayload::AddCredit {
                customer,
                amount,
                description,
            } => {
                let description = description
                    .clone()
                    .unwrap_or_else(|| command.normalized.clone());
                self.add_credit(customer, *amount, &description, ctx).await
            }
            IntentPayload::CheckBalance { customer } => self.check_balance(customer, ctx).await,
            IntentPayload::CheckStock { product } => self.check_stock(product.as_deref()).await,
            IntentPayload::CreateCustomer { name, phone, patch } => {
                self.create_customer(name.as_deref(), phone.as_deref(), patch, ctx)
                    .await
            }
            IntentPayload::UpdateCustomer { customer, patch } => {
                self.update_customer(customer, patch.clone(), ctx).await
            }
            IntentPayload::UpdateCustomerPhone { customer, phone } => {
                let patch = CustomerPatch {
                    phone: phone.clone(),
                    ..CustomerPatch::default()
                };
                if patch.phone.is_none() {
                    ExecutionResult::fail(
                        ErrorCode::Validation,
                        "Phone number samajh nahi aaya. Dobara boliye.",
                    )
                } else {
                    self.update_customer(customer, patch, ctx).await
                }
            }
            IntentPayload::GetCustomerInfo { customer } => self.customer_info(customer, ctx).await,
            IntentPayload::DeleteCustomerData { customer, otp } => {
                self.delete_customer_data(customer, otp.as_deref(), ctx).await
            }
            IntentPayload::ListCustomerBalances => self.list_balances().await,
            IntentPayload::TotalPendingAmount => self.total_pending().await,
            IntentPayload::DailySummary => self.daily_summary().await,
            IntentPayload::ProvideEmail { email } => self.provide_email(email.as_deref(), ctx).await,
            IntentPayload::SendInvoice {
                customer,
                channel,
                when_text,
            } => {
                self.send_invoice(customer, channel.as_deref(), when_text.as_deref(), ctx)
                    .await
            }
            IntentPayload::StartRecording => {
                ExecutionResult::ok_with("Recording shuru ho gayi.", json!({"recording": true}))
            }
            IntentPayload::StopRecording => {
                ExecutionResult::ok_with("Recording band ho gayi.", json!({"recording": false}))
            }
            // consumed by the gate; reaching here means a bug upstream
            IntentPayload::SwitchLanguage { .. } => ExecutionResult::ok("Language badal di."),
            IntentPayload::Unknown => ExecutionResult::fail(
                ErrorCode::Validation,
                "Samajh nahi aaya, kripya dobara boliye.",
            ),
        };

        if !result.success {
            tracing::debug!(
                session_id = %ctx.session_id,
                intent = %command.intent,
                error = ?result.error,
                "Intent failed"
            );
        }
        result
    }

    // =========================================================================
    // Customer resolution
    // =========================================================================

    /// Resolve a customer reference: active customer for back-references,
    /// then the session ring by fuzzy name, then the database ranked by
    /// exact > phone-substring > fuzzy score. A unique resolve promotes the
    /// customer to active.
    async fn resolve_customer(
        &self,
        reference: &CustomerRef,
        ctx: &mut SessionCtx,
    ) -> Result<Customer, ExecutionResult> {
        let name = match reference {
            CustomerRef::Active | CustomerRef::None => {
                let active = ctx.memory.active_customer().cloned().ok_or_else(|| {
                    ExecutionResult::fail(
                        ErrorCode::CustomerNotFound,
                        "Kaunsa customer? Naam boliye.",
                    )
                })?;
                return match self.data.customers.get(active.id).await {
                    Ok(Some(customer)) => Ok(customer),
                    Ok(None) => Err(ExecutionResult::fail(
                        ErrorCode::CustomerNotFound,
                        format!("{} ab records mein nahi hai.", active.display_name),
                    )),
                    Err(e) => Err(store_failure(e)),
                };
            }
            CustomerRef::Named(name) => name.clone(),
        };

        // ring reuse first: a variant spelling must not become a new person
        if let Some(hit) = ctx.memory.switch_to_customer_by_name(&name) {
            match self.data.customers.get(hit.id).await {
                Ok(Some(customer)) => return Ok(customer),
                Ok(None) => { /* deleted since last mention; fall through to search */ }
                Err(e) => return Err(store_failure(e)),
            }
        }

        let candidates = match self.search_cached(&name).await {
            Ok(candidates) => candidates,
            Err(e) => return Err(store_failure(e)),
        };

        if candidates.is_empty() {
            return Err(ExecutionResult::fail(
                ErrorCode::CustomerNotFound,
                format!("{name} naam ka koi customer nahi mila."),
            ));
        }

        let mut ranked: Vec<(f32, Customer)> = candidates
            .into_iter()
            .map(|c| (self.effective_score(&name, &c), c))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let top_score = ranked[0].0;
        if top_score < RESOLVE_THRESHOLD && ranked.len() > 1 {
            let options: Vec<serde_json::Value> = ranked
                .iter()
                .take(3)
                .map(|(_, c)| {
                    json!({
                        "id": c.id,
                        "name": c.name,
                        "landmark": c.landmark,
                        "phone": c.phone,
                    })
                })
                .collect();
            let names: Vec<String> = ranked
                .iter()
                .take(3)
                .map(|(_, c)| match &c.landmark {
                    Some(landmark) => format!("{} ({landmark})", c.name),
                    None => c.name.clone(),
                })
                .collect();
            return Err(ExecutionResult::fail_with(
                ErrorCode::MultipleCustomers,
                format!("Ek se zyada customer mile: {}. Kaunsa?", names.join(", ")),
                json!({ "candidates": options }),
            ));
        }

        let customer = ranked.into_iter().next().expect("non-empty").1;
        ctx.memory.set_active_customer(customer.id, &customer.name);
        Ok(customer)
    }

    fn effective_score(&self, query: &str, candidate: &Customer) -> f32 {
        if candidate.name.eq_ignore_ascii_case(query.trim())
            || candidate
                .nickname
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(query.trim()))
        {
            return 1.0;
        }

        let digits: String = query.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 4
            && candidate
                .phone
                .as_deref()
                .is_some_and(|p| p.contains(&digits))
        {
            return 0.95;
        }

        let name_score = self
            .matcher
            .score(query, &candidate.name)
            .map(|m| m.score)
            .unwrap_or(0.0);
        let nickname_score = candidate
            .nickname
            .as_deref()
            .and_then(|n| self.matcher.score(query, n))
            .map(|m| m.score)
            .unwrap_or(0.0);
        name_score.max(nickname_score)
    }

    /// Customer search through the two-tier cache.
    async fn search_cached(&self, query: &str) -> Result<Vec<Customer>, StoreError> {
        let key = format!("customer:q:{}", query.trim().to_lowercase());
        if let Some(cached) = self.data.cache.get(&key).await {
            if let Ok(customers) = serde_json::from_str::<Vec<Customer>>(&cached) {
                return Ok(customers);
            }
        }
        let customers = self.data.customers.search(query, 10).await?;
        if let Ok(serialized) = serde_json::to_string(&customers) {
            self.data.cache.put(&key, &serialized).await;
        }
        Ok(customers)
    }

    /// Customer-list snapshot through the cache; any customer write clears
    /// it along with the rest of `customer:*`.
    async fn list_cached(&self) -> Result<Vec<Customer>, StoreError> {
        const KEY: &str = "customer:list";
        if let Some(cached) = self.data.cache.get(KEY).await {
            if let Ok(customers) = serde_json::from_str::<Vec<Customer>>(&cached) {
                return Ok(customers);
            }
        }
        let customers = self.data.customers.list().await?;
        if let Ok(serialized) = serde_json::to_string(&customers) {
            self.data.cache.put(KEY, &serialized).await;
        }
        Ok(customers)
    }

    /// Balance read through the cache. Every ledger write invalidates the
    /// customer's `balance:{id}` key, so a hit is always post-commit.
    async fn cached_balance(&self, customer: &Customer) -> Decimal {
        let key = format!("balance:{}", customer.id);
        if let Some(cached) = self.data.cache.get(&key).await {
            if let Ok(balance) = cached.parse::<Decimal>() {
                return balance;
            }
        }
        self.data.cache.put(&key, &customer.balance.to_string()).await;
        customer.balance
    }

    async fn invalidate_customer_caches(&self, customer_id: Option<Uuid>) {
        self.data.cache.invalidate_prefix("customer:").await;
        if let Some(id) = customer_id {
            self.data.cache.invalidate_prefix(&format!("balance:{id}")).await;
        }
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    async fn create_invoice(
        &self,
        customer: &CustomerRef,
        items: &[dukaan_voice_core::InvoiceItemSpec],
        auto_send: bool,
        gst: bool,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        if items.is_empty() {
            return ExecutionResult::fail(
                ErrorCode::Validation,
                "Bill mein kya kya daalna hai? Item aur quantity boliye.",
            );
        }
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        let new = dukaan_voice_store::NewInvoice {
            customer_id: customer.id,
            session_id: Some(ctx.session_id.clone()),
            lines: items
                .iter()
                .map(|i| dukaan_voice_store::NewInvoiceLine {
                    product: i.product.clone(),
                    quantity: i.quantity,
                    unit: i.unit.clone(),
                })
                .collect(),
            gst,
            auto_confirm: auto_send,
        };

        let invoice = match self.data.invoices.create(new).await {
            Ok(invoice) => invoice,
            Err(e) => return store_failure(e),
        };
        self.invalidate_customer_caches(Some(customer.id)).await;

        let lines = describe_lines(&invoice);
        if auto_send {
            // committed: the send side-effect must not roll anything back
            self.dispatch_invoice_send(&customer, &invoice, "whatsapp").await;
            ExecutionResult::ok_with(
                format!(
                    "{} ka bill ban gaya aur bhej diya: {lines}. Total {}.",
                    customer.name,
                    format_inr(invoice.total)
                ),
                json!({ "invoice": invoice, "sent": true }),
            )
        } else {
            ExecutionResult::ok_with(
                format!(
                    "{} ka draft bill: {lines}. Total {}. Confirm karna hai?",
                    customer.name,
                    format_inr(invoice.total)
                ),
                json!({ "invoice": invoice, "draft": true }),
            )
        }
    }

    async fn confirm_invoice(&self, customer: &CustomerRef, ctx: &mut SessionCtx) -> ExecutionResult {
        let draft = match customer {
            CustomerRef::Named(_) | CustomerRef::Active => {
                let customer = match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => customer,
                    Err(result) => return result,
                };
                match self
                    .data
                    .invoices
                    .draft_for_customer(&ctx.session_id, customer.id)
                    .await
                {
                    Ok(Some(draft)) => draft,
                    Ok(None) => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            format!("{} ka koi draft bill nahi hai.", customer.name),
                        )
                    }
                    Err(e) => return store_failure(e),
                }
            }
            CustomerRef::None => {
                let drafts = match self.data.invoices.drafts_for_session(&ctx.session_id).await {
                    Ok(drafts) => drafts,
                    Err(e) => return store_failure(e),
                };
                match drafts.len() {
                    0 => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            "Koi draft bill pending nahi hai.",
                        )
                    }
                    1 => drafts.into_iter().next().expect("len checked"),
                    _ => {
                        let list = self.draft_listing(&drafts).await;
                        return ExecutionResult::fail_with(
                            ErrorCode::MultiplePendingInvoices,
                            format!("Kai draft bills hain: {list}. Kiska confirm karoon?"),
                            json!({ "drafts": drafts }),
                        );
                    }
                }
            }
        };

        let confirmed = match self.data.invoices.confirm(draft.id).await {
            Ok(confirmed) => confirmed,
            Err(e) => return store_failure(e),
        };

        let name = self
            .data
            .customers
            .get(confirmed.customer_id)
            .await
            .ok()
            .flatten()
            .map(|c| c.name)
            .unwrap_or_else(|| "customer".to_string());

        ExecutionResult::ok_with(
            format!(
                "{name} ka bill confirm ho gaya. Total {}.",
                format_inr(confirmed.total)
            ),
            json!({ "invoice": confirmed }),
        )
    }

    async fn show_pending(&self, customer: &CustomerRef, ctx: &mut SessionCtx) -> ExecutionResult {
        let drafts = match customer {
            CustomerRef::Named(_) | CustomerRef::Active => {
                let customer = match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => customer,
                    Err(result) => return result,
                };
                match self
                    .data
                    .invoices
                    .draft_for_customer(&ctx.session_id, customer.id)
                    .await
                {
                    Ok(draft) => draft.into_iter().collect(),
                    Err(e) => return store_failure(e),
                }
            }
            CustomerRef::None => match self.data.invoices.drafts_for_session(&ctx.session_id).await
            {
                Ok(drafts) => drafts,
                Err(e) => return store_failure(e),
            },
        };

        if drafts.is_empty() {
            return ExecutionResult::ok("Koi draft bill pending nahi hai.");
        }
        let list = self.draft_listing(&drafts).await;
        ExecutionResult::ok_with(
            format!("Pending draft bills: {list}."),
            json!({ "drafts": drafts }),
        )
    }

    async fn draft_listing(&self, drafts: &[Invoice]) -> String {
        let mut parts = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let name = self
                .data
                .customers
                .get(draft.customer_id)
                .await
                .ok()
                .flatten()
                .map(|c| c.name)
                .unwrap_or_else(|| "customer".to_string());
            parts.push(format!("{name} ka {}", format_inr(draft.total)));
        }
        parts.join(", ")
    }

    async fn toggle_gst(
        &self,
        customer: &CustomerRef,
        enable: Option<bool>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let draft = match customer {
            CustomerRef::Named(_) | CustomerRef::Active => {
                let customer = match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => customer,
                    Err(result) => return result,
                };
                match self
                    .data
                    .invoices
                    .draft_for_customer(&ctx.session_id, customer.id)
                    .await
                {
                    Ok(Some(draft)) => draft,
                    Ok(None) => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            format!("{} ka koi draft bill nahi hai.", customer.name),
                        )
                    }
                    Err(e) => return store_failure(e),
                }
            }
            CustomerRef::None => {
                let drafts = match self.data.invoices.drafts_for_session(&ctx.session_id).await {
                    Ok(drafts) => drafts,
                    Err(e) => return store_failure(e),
                };
                match drafts.len() {
                    0 => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            "Koi draft bill nahi hai jispe GST lagayi ja sake.",
                        )
                    }
                    1 => drafts.into_iter().next().expect("len checked"),
                    _ => {
                        return ExecutionResult::fail(
                            ErrorCode::MultiplePendingInvoices,
                            "Kai draft bills hain. Customer ka naam boliye.",
                        )
                    }
                }
            }
        };

        let target = enable.unwrap_or(!draft.gst);
        let updated = match self.data.invoices.set_gst(draft.id, target).await {
            Ok(updated) => updated,
            Err(e) => return store_failure(e),
        };
        self.invalidate_customer_caches(Some(updated.customer_id)).await;

        ExecutionResult::ok_with(
            format!(
                "GST {} kar di. Naya total {}.",
                if target { "on" } else { "off" },
                format_inr(updated.total)
            ),
            json!({ "invoice": updated }),
        )
    }

    async fn cancel_invoice(
        &self,
        customer: &CustomerRef,
        cancel_all: bool,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let resolved = match customer {
            CustomerRef::Named(_) | CustomerRef::Active => {
                match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => Some(customer),
                    Err(result) => return result,
                }
            }
            CustomerRef::None => None,
        };

        if cancel_all {
            let cancelled = match self
                .data
                .invoices
                .cancel_all(
                    resolved.as_ref().map(|c| c.id),
                    resolved.is_none().then_some(ctx.session_id.as_str()),
                )
                .await
            {
                Ok(cancelled) => cancelled,
                Err(e) => return store_failure(e),
            };
            self.invalidate_customer_caches(resolved.as_ref().map(|c| c.id)).await;
            // session-scoped cancel can touch several customers' balances
            for invoice in &cancelled {
                self.data
                    .cache
                    .invalidate_prefix(&format!("balance:{}", invoice.customer_id))
                    .await;
            }
            let total: Decimal = cancelled.iter().map(|i| i.total).sum();
            return ExecutionResult::ok_with(
                format!(
                    "{} bill cancel kar diye, total {} wapas adjust hua.",
                    cancelled.len(),
                    format_inr(total)
                ),
                json!({ "cancelled": cancelled.len() }),
            );
        }

        // single cancel: prefer the session draft, then the latest confirmed
        let target = match &resolved {
            Some(customer) => {
                match self
                    .data
                    .invoices
                    .draft_for_customer(&ctx.session_id, customer.id)
                    .await
                {
                    Ok(Some(draft)) => Some(draft),
                    Ok(None) => match self.data.invoices.latest_confirmed(customer.id).await {
                        Ok(invoice) => invoice,
                        Err(e) => return store_failure(e),
                    },
                    Err(e) => return store_failure(e),
                }
            }
            None => match self.data.invoices.drafts_for_session(&ctx.session_id).await {
                Ok(drafts) => drafts.into_iter().last(),
                Err(e) => return store_failure(e),
            },
        };

        let Some(target) = target else {
            return ExecutionResult::fail(
                ErrorCode::NotFound,
                "Cancel karne ke liye koi bill nahi mila.",
            );
        };

        let cancelled = match self.data.invoices.cancel(target.id).await {
            Ok(cancelled) => cancelled,
            Err(e) => return store_failure(e),
        };
        self.invalidate_customer_caches(Some(cancelled.customer_id)).await;

        ExecutionResult::ok_with(
            format!(
                "Bill cancel kar diya. {} balance se hata diye.",
                format_inr(cancelled.total)
            ),
            json!({ "invoice": cancelled }),
        )
    }

    async fn dispatch_invoice_send(&self, customer: &Customer, invoice: &Invoice, channel: &str) {
        let text = format!(
            "Namaste {}! Aapka bill: {}. Total {}.",
            customer.name,
            describe_lines(invoice),
            format_inr(invoice.total)
        );
        let outcome = match channel {
            "email" => match customer.email.as_deref().filter(|e| !e.is_empty()) {
                Some(email) => self.mailer.send(email, "Aapka bill", &text).await,
                None => Err(SchedulerError::Validation(format!(
                    "{} ka e-mail nahi hai",
                    customer.name
                ))),
            },
            _ => match customer.phone.as_deref().filter(|p| !p.is_empty()) {
                Some(phone) => self.whatsapp.send_message(phone, &text).await,
                None => Err(SchedulerError::Validation(format!(
                    "{} ka phone nahi hai",
                    customer.name
                ))),
            },
        };
        if let Err(e) = outcome {
            tracing::warn!(
                invoice_id = %invoice.id,
                channel,
                error = %e,
                "Invoice send side-effect failed"
            );
        }
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    async fn record_payment(
        &self,
        customer: &CustomerRef,
        amount: Option<Decimal>,
        mode: Option<PaymentMode>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let Some(amount) = amount else {
            return ExecutionResult::fail(ErrorCode::Validation, "Kitna payment aaya? Amount boliye.");
        };
        let Some(mode) = mode else {
            return ExecutionResult::fail(
                ErrorCode::Validation,
                "Payment kaise aaya — cash, UPI ya card?",
            );
        };
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        let balance = match self.data.ledger.record_payment(customer.id, amount, mode).await {
            Ok(balance) => balance,
            Err(e) => return store_failure(e),
        };
        self.invalidate_customer_caches(Some(customer.id)).await;

        ExecutionResult::ok_with(
            format!(
                "{} ka {} payment record ho gaya. Naya balance {} hai.",
                customer.name,
                format_inr(amount),
                format_inr(balance)
            ),
            json!({
                "customerId": customer.id,
                "name": customer.name,
                "amount": amount,
                "mode": mode.as_str(),
                "balance": balance,
            }),
        )
    }

    async fn add_credit(
        &self,
        customer: &CustomerRef,
        amount: Option<Decimal>,
        description: &str,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let Some(amount) = amount else {
            return ExecutionResult::fail(ErrorCode::Validation, "Kitna likhna hai? Amount boliye.");
        };
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        let balance = match self.data.ledger.add_credit(customer.id, amount, description).await {
            Ok(balance) => balance,
            Err(e) => return store_failure(e),
        };
        self.invalidate_customer_caches(Some(customer.id)).await;

        ExecutionResult::ok_with(
            format!(
                "{} ko {} add kar diya. Total {} hai.",
                customer.name,
                format_inr(amount),
                format_inr(balance)
            ),
            json!({
                "customerId": customer.id,
                "name": customer.name,
                "amount": amount,
                "balance": balance,
            }),
        )
    }

    async fn check_balance(&self, customer: &CustomerRef, ctx: &mut SessionCtx) -> ExecutionResult {
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };
        let balance = self.cached_balance(&customer).await;
        ExecutionResult::ok_with(
            format!("{} ka balance {} hai.", customer.name, format_inr(balance)),
            json!({
                "customerId": customer.id,
                "name": customer.name,
                "balance": balance,
            }),
        )
    }

    async fn list_balances(&self) -> ExecutionResult {
        let customers = match self.list_cached().await {
            Ok(customers) => customers,
            Err(e) => return store_failure(e),
        };
        let mut owing: Vec<&Customer> = customers
            .iter()
            .filter(|c| c.balance != Decimal::ZERO)
            .collect();
        owing.sort_by(|a, b| b.balance.cmp(&a.balance));

        if owing.is_empty() {
            return ExecutionResult::ok("Kisi ka balance pending nahi hai.");
        }

        let listing: Vec<String> = owing
            .iter()
            .take(5)
            .map(|c| format!("{} {}", c.name, format_inr(c.balance)))
            .collect();
        let data: Vec<serde_json::Value> = owing
            .iter()
            .map(|c| json!({"id": c.id, "name": c.name, "balance": c.balance}))
            .collect();

        ExecutionResult::ok_with(
            format!("Balances: {}.", listing.join(", ")),
            json!({ "balances": data }),
        )
    }

    async fn total_pending(&self) -> ExecutionResult {
        let total = match self.data.customers.total_outstanding().await {
            Ok(total) => total,
            Err(e) => return store_failure(e),
        };
        ExecutionResult::ok_with(
            format!("Total pending amount {} hai.", format_inr(total)),
            json!({ "totalPending": total }),
        )
    }

    async fn daily_summary(&self) -> ExecutionResult {
        let local_now = Utc::now().with_timezone(&self.tz);
        let day_start = local_now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid");
        let from = match self.tz.from_local_datetime(&day_start).earliest() {
            Some(from) => from.with_timezone(&Utc),
            None => Utc::now() - Duration::hours(24),
        };
        let to = from + Duration::days(1);

        let summary = match self.data.ledger.daily_summary(from, to).await {
            Ok(summary) => summary,
            Err(e) => return store_failure(e),
        };

        let modes = if summary.payments_by_mode.is_empty() {
            String::new()
        } else {
            let parts: Vec<String> = summary
                .payments_by_mode
                .iter()
                .map(|(mode, amount)| format!("{mode} {}", format_inr(*amount)))
                .collect();
            format!(" ({})", parts.join(", "))
        };

        ExecutionResult::ok_with(
            format!(
                "Aaj ki sale {} ({} bill), payment aaya {}{modes}, pending {}.",
                format_inr(summary.total_sales),
                summary.invoice_count,
                format_inr(summary.total_payments),
                format_inr(summary.pending_amount)
            ),
            serde_json::to_value(&summary).unwrap_or_default(),
        )
    }

    // =========================================================================
    // Products
    // =========================================================================

    async fn check_stock(&self, product: Option<&str>) -> ExecutionResult {
        let Some(name) = product.filter(|p| !p.trim().is_empty()) else {
            return ExecutionResult::fail(ErrorCode::Validation, "Kis cheez ka stock dekhna hai?");
        };
        match self.data.products.find_by_name(name).await {
            Ok(Some(product)) => ExecutionResult::ok_with(
                format!(
                    "{} ka stock {} {} hai.",
                    product.name, product.stock, product.unit
                ),
                json!({
                    "product": product.name,
                    "stock": product.stock,
                    "unit": product.unit,
                    "price": product.price,
                }),
            ),
            Ok(None) => ExecutionResult::fail(
                ErrorCode::NotFound,
                format!("{name} naam ka koi product nahi mila."),
            ),
            Err(e) => store_failure(e),
        }
    }

    // =========================================================================
    // Customers
    // =========================================================================

    async fn create_customer(
        &self,
        name: Option<&str>,
        phone: Option<&str>,
        patch: &CustomerPatch,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return ExecutionResult::fail(ErrorCode::Validation, "Naya customer kis naam se?");
        };

        let mut customer = Customer::new(name.trim());
        customer.phone = phone.map(|p| p.to_string());
        customer.nickname = patch.nickname.clone();
        customer.landmark = patch.landmark.clone();
        customer.area = patch.area.clone();
        customer.city = patch.city.clone();
        customer.email = patch.email.clone();
        customer.gstin = patch.gstin.clone();
        customer.pan = patch.pan.clone();

        match self.data.customers.create(customer).await {
            Ok(customer) => {
                self.invalidate_customer_caches(None).await;
                ctx.memory.set_active_customer(customer.id, &customer.name);
                ExecutionResult::ok_with(
                    format!("{} ko customer list mein jod diya.", customer.name),
                    json!({ "customerId": customer.id, "name": customer.name }),
                )
            }
            Err(StoreError::DuplicatePhone {
                existing_id, name, ..
            }) => ExecutionResult::fail_with(
                ErrorCode::DuplicateFound,
                format!("Is phone number se {name} pehle se registered hai."),
                json!({ "existingId": existing_id, "name": name }),
            ),
            Err(e) => store_failure(e),
        }
    }

    async fn update_customer(
        &self,
        customer: &CustomerRef,
        patch: CustomerPatch,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        if patch.is_empty() {
            return ExecutionResult::fail(ErrorCode::Validation, "Kya update karna hai?");
        }
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        match self.data.customers.update(customer.id, patch).await {
            Ok(updated) => {
                self.invalidate_customer_caches(Some(updated.id)).await;
                ctx.memory.set_active_customer(updated.id, &updated.name);
                ExecutionResult::ok_with(
                    format!("{} ki details update kar di.", updated.name),
                    json!({ "customerId": updated.id, "name": updated.name }),
                )
            }
            Err(StoreError::DuplicatePhone { name, existing_id, .. }) => {
                ExecutionResult::fail_with(
                    ErrorCode::DuplicateFound,
                    format!("Yeh phone number {name} ke paas pehle se hai."),
                    json!({ "existingId": existing_id }),
                )
            }
            Err(e) => store_failure(e),
        }
    }

    async fn customer_info(&self, customer: &CustomerRef, ctx: &mut SessionCtx) -> ExecutionResult {
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        let balance = self.cached_balance(&customer).await;
        let mut parts = vec![format!("balance {}", format_inr(balance))];
        let mut spoken_phone = None;
        if let Some(phone) = customer.phone.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("phone {phone}"));
            spoken_phone = Some(digit_words(phone, ctx.language));
        }
        if let Some(landmark) = customer.landmark.as_deref() {
            parts.push(format!("landmark {landmark}"));
        }
        if let Some(email) = customer.email.as_deref() {
            parts.push(format!("email {email}"));
        }

        ExecutionResult::ok_with(
            format!("{}: {}.", customer.name, parts.join(", ")),
            json!({
                "customerId": customer.id,
                "name": customer.name,
                "phone": customer.phone,
                "phoneSpoken": spoken_phone,
                "balance": balance,
                "landmark": customer.landmark,
                "email": customer.email,
            }),
        )
    }

    async fn delete_customer_data(
        &self,
        customer: &CustomerRef,
        otp: Option<&str>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        if !ctx.is_admin {
            return ExecutionResult::fail(
                ErrorCode::Authentication,
                "Data delete karne ki permission sirf admin ko hai.",
            );
        }
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };

        match otp.filter(|o| !o.is_empty()) {
            None => {
                // phase 1: generate, store with TTL, e-mail the admin
                let code = dukaan_voice_store::generate_otp();
                if let Err(e) = self.data.otp.put(customer.id, &code).await {
                    return store_failure(e);
                }
                if let Err(e) = self
                    .mailer
                    .send(
                        &self.admin_email,
                        "Deletion OTP",
                        &format!(
                            "Deletion OTP for {}: {code} (valid 10 minutes)",
                            customer.name
                        ),
                    )
                    .await
                {
                    return ExecutionResult::fail(
                        ErrorCode::ExternalService,
                        format!("OTP e-mail nahi ja paya: {e}"),
                    );
                }
                ExecutionResult::ok_with(
                    format!("OTP {} par bhej diya hai. OTP bol kar confirm kariye.", self.admin_email),
                    json!({ "status": "OTP_SENT", "customerId": customer.id }),
                )
            }
            Some(code) => {
                // phase 2: verify and cascade in one transaction
                match self.data.otp.verify(customer.id, code).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return ExecutionResult::fail(
                            ErrorCode::InvalidOtp,
                            "OTP galat ya expire ho gaya hai.",
                        )
                    }
                    Err(e) => return store_failure(e),
                }

                // drop queued reminder jobs before the rows disappear
                if let Ok(reminders) = self.data.reminders.list_for_customer(customer.id).await {
                    for reminder in reminders {
                        if reminder.status == ReminderStatus::Pending {
                            let _ = self.scheduler.cancel(reminder.id).await;
                        }
                    }
                }

                let report = match self.data.customers.purge(customer.id).await {
                    Ok(report) => report,
                    Err(e) => return store_failure(e),
                };
                self.invalidate_customer_caches(Some(customer.id)).await;

                ExecutionResult::ok_with(
                    format!("{} ka poora data delete kar diya.", customer.name),
                    serde_json::to_value(&report).unwrap_or_default(),
                )
            }
        }
    }

    async fn provide_email(&self, email: Option<&str>, ctx: &mut SessionCtx) -> ExecutionResult {
        let Some(email) = email.filter(|e| e.contains('@')) else {
            return ExecutionResult::fail(ErrorCode::Validation, "E-mail address samajh nahi aaya.");
        };

        if let Err(e) = self
            .data
            .sessions
            .set_metadata(&ctx.session_id, "email", json!(email))
            .await
        {
            tracing::debug!(error = %e, "Session e-mail metadata write failed");
        }

        if let Some(active) = ctx.memory.active_customer().cloned() {
            let patch = CustomerPatch {
                email: Some(email.to_string()),
                ..CustomerPatch::default()
            };
            match self.data.customers.update(active.id, patch).await {
                Ok(updated) => {
                    self.invalidate_customer_caches(Some(updated.id)).await;
                    return ExecutionResult::ok(format!(
                        "{} ka e-mail {email} save kar diya.",
                        updated.name
                    ));
                }
                Err(e) => return store_failure(e),
            }
        }

        ExecutionResult::ok(format!("E-mail {email} session ke liye save kar diya."))
    }

    async fn send_invoice(
        &self,
        customer: &CustomerRef,
        channel: Option<&str>,
        when_text: Option<&str>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };
        let invoice = match self.data.invoices.latest_confirmed(customer.id).await {
            Ok(Some(invoice)) => invoice,
            Ok(None) => {
                return ExecutionResult::fail(
                    ErrorCode::NotFound,
                    format!("{} ka koi confirmed bill nahi hai.", customer.name),
                )
            }
            Err(e) => return store_failure(e),
        };
        let channel = match channel {
            Some("email") => "email",
            _ => "whatsapp",
        };

        if let Some(when_text) = when_text.filter(|w| !w.trim().is_empty()) {
            let at = self.scheduler.parse_when(when_text);
            let message = format!(
                "Namaste {}! Aapka bill: {}. Total {}.",
                customer.name,
                describe_lines(&invoice),
                format_inr(invoice.total)
            );
            return match self
                .scheduler
                .schedule_send(customer.id, invoice.total, at, vec![channel.to_string()], message)
                .await
            {
                Ok(reminder) => ExecutionResult::ok_with(
                    format!("Bill {channel} se bhejne ka schedule ho gaya."),
                    json!({ "reminderId": reminder.id, "scheduledAt": reminder.scheduled_at }),
                ),
                Err(e) => scheduler_failure(e),
            };
        }

        self.dispatch_invoice_send(&customer, &invoice, channel).await;
        ExecutionResult::ok_with(
            format!("{} ka bill {channel} se bhej diya.", customer.name),
            json!({ "invoiceId": invoice.id, "channel": channel }),
        )
    }

    // =========================================================================
    // Reminders
    // =========================================================================

    async fn create_reminder(
        &self,
        customer: &CustomerRef,
        amount: Option<Decimal>,
        when_text: Option<&str>,
        message: Option<String>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };
        // no amount spoken: remind for the outstanding balance
        let amount = match amount {
            Some(amount) => amount,
            None if customer.balance > Decimal::ZERO => customer.balance,
            None => {
                return ExecutionResult::fail(
                    ErrorCode::Validation,
                    "Kitne amount ka reminder lagana hai?",
                )
            }
        };

        let when = when_text.unwrap_or("1 ghante baad");
        match self.scheduler.schedule(customer.id, amount, when, message).await {
            Ok(reminder) => ExecutionResult::ok_with(
                format!(
                    "{} ko {} ka reminder laga diya ({}).",
                    customer.name,
                    format_inr(amount),
                    reminder
                        .scheduled_at
                        .with_timezone(&self.tz)
                        .format("%d %b, %I:%M %p")
                ),
                json!({ "reminderId": reminder.id, "scheduledAt": reminder.scheduled_at }),
            ),
            Err(e) => scheduler_failure(e),
        }
    }

    async fn cancel_reminder(
        &self,
        customer: &CustomerRef,
        reminder_id: Option<Uuid>,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let reminder_id = match reminder_id {
            Some(id) => id,
            None => {
                let customer = match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => customer,
                    Err(result) => return result,
                };
                match self.scheduler.latest_pending(customer.id).await {
                    Ok(Some(reminder)) => reminder.id,
                    Ok(None) => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            format!("{} ka koi pending reminder nahi hai.", customer.name),
                        )
                    }
                    Err(e) => return scheduler_failure(e),
                }
            }
        };

        match self.scheduler.cancel(reminder_id).await {
            Ok(()) => ExecutionResult::ok("Reminder cancel kar diya."),
            Err(e) => scheduler_failure(e),
        }
    }

    async fn modify_reminder(
        &self,
        customer: &CustomerRef,
        reminder_id: Option<Uuid>,
        patch: &dukaan_voice_core::ReminderPatch,
        ctx: &mut SessionCtx,
    ) -> ExecutionResult {
        let reminder_id = match reminder_id {
            Some(id) => id,
            None => {
                let customer = match self.resolve_customer(customer, ctx).await {
                    Ok(customer) => customer,
                    Err(result) => return result,
                };
                match self.scheduler.latest_pending(customer.id).await {
                    Ok(Some(reminder)) => reminder.id,
                    Ok(None) => {
                        return ExecutionResult::fail(
                            ErrorCode::NotFound,
                            format!("{} ka koi pending reminder nahi hai.", customer.name),
                        )
                    }
                    Err(e) => return scheduler_failure(e),
                }
            }
        };

        match self
            .scheduler
            .modify(
                reminder_id,
                patch.when_text.as_deref(),
                patch.amount,
                patch.message.clone(),
            )
            .await
        {
            Ok(reminder) => ExecutionResult::ok_with(
                format!(
                    "Reminder update kar diya ({}).",
                    reminder
                        .scheduled_at
                        .with_timezone(&self.tz)
                        .format("%d %b, %I:%M %p")
                ),
                json!({ "reminderId": reminder.id, "scheduledAt": reminder.scheduled_at }),
            ),
            Err(e) => scheduler_failure(e),
        }
    }

    async fn list_reminders(&self, customer: &CustomerRef, ctx: &mut SessionCtx) -> ExecutionResult {
        let customer = match self.resolve_customer(customer, ctx).await {
            Ok(customer) => customer,
            Err(result) => return result,
        };
        let reminders = match self.scheduler.list(customer.id).await {
            Ok(reminders) => reminders,
            Err(e) => return scheduler_failure(e),
        };

        let pending: Vec<&dukaan_voice_core::Reminder> = reminders
            .iter()
            .filter(|r| r.status == ReminderStatus::Pending)
            .collect();
        if pending.is_empty() {
            return ExecutionResult::ok(format!(
                "{} ka koi pending reminder nahi hai.",
                customer.name
            ));
        }

        let listing: Vec<String> = pending
            .iter()
            .map(|r| {
                format!(
                    "{} ({})",
                    format_inr(r.amount),
                    r.scheduled_at.with_timezone(&self.tz).format("%d %b %I:%M %p")
                )
            })
            .collect();

        ExecutionResult::ok_with(
            format!("{} ke reminders: {}.", customer.name, listing.join(", ")),
            json!({ "reminders": pending.len() }),
        )
    }
}

fn describe_lines(invoice: &Invoice) -> String {
    invoice
        .items
        .iter()
        .map(|item| {
            format!(
                "{} {} {}",
                item.quantity,
                item.product_name,
                format_inr(item.line_total)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn store_failure(error: StoreError) -> ExecutionResult {
    let code = match &error {
        StoreError::NotFound("customer") => ErrorCode::CustomerNotFound,
        StoreError::NotFound(_) => ErrorCode::NotFound,
        StoreError::DuplicatePhone { .. } => ErrorCode::DuplicateFound,
        StoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
        StoreError::AlreadyCancelled => ErrorCode::AlreadyCancelled,
        StoreError::OpeningBalanceExists { .. } => ErrorCode::OpeningBalanceExists,
        StoreError::Validation(_) => ErrorCode::Validation,
        StoreError::Conflict(_) => ErrorCode::Conflict,
        StoreError::Database(_) => ErrorCode::Database,
        StoreError::Cache(_) => ErrorCode::Database,
    };
    let message = match &error {
        StoreError::InsufficientStock {
            product,
            available,
            requested,
        } => format!("{product} ka stock kam hai: {available} bacha hai, {requested} chahiye."),
        StoreError::AlreadyCancelled => "Yeh bill pehle se cancelled hai.".to_string(),
        StoreError::NotFound("customer") => "Customer records mein nahi mila.".to_string(),
        StoreError::OpeningBalanceExists { existing } => {
            format!("Opening balance pehle se set hai ({}).", format_inr(*existing))
        }
        StoreError::Validation(message) => message.clone(),
        other => format!("Kaam poora nahi hua: {other}"),
    };
    ExecutionResult::fail(code, message)
}

fn scheduler_failure(error: SchedulerError) -> ExecutionResult {
    match error {
        SchedulerError::Store(store) => store_failure(store),
        SchedulerError::Validation(message) => ExecutionResult::fail(ErrorCode::Validation, message),
        SchedulerError::Queue(message) => ExecutionResult::fail(
            ErrorCode::ExternalService,
            format!("Reminder queue mein nahi laga: {message}"),
        ),
        SchedulerError::Delivery(message) => {
            ExecutionResult::fail(ErrorCode::ExternalService, message)
        }
    }
}
