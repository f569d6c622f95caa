//! In-memory data services
//!
//! Default backend when persistence is disabled, and the substrate for
//! hermetic tests. Every multi-entity operation validates fully before it
//! mutates, so a failure mid-operation leaves state untouched — the same
//! atomicity the Postgres transactions give.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dukaan_voice_core::{
    Customer, CustomerPatch, DailySummary, Invoice, InvoiceItem, InvoiceStatus, LedgerEntry,
    LedgerEntryType, PaymentMode, Product, Reminder, ReminderStatus, SessionRecord, SessionStatus,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::traits::{
    CustomerStore, InvoiceStore, LedgerStore, NewInvoice, ProductStore, PurgeReport,
    ReminderStore, SessionStore, GST_RATE_PERCENT,
};
use crate::StoreError;

#[derive(Default)]
struct ShopData {
    customers: HashMap<Uuid, Customer>,
    products: HashMap<Uuid, Product>,
    invoices: HashMap<Uuid, Invoice>,
    ledger: Vec<LedgerEntry>,
    reminders: HashMap<Uuid, Reminder>,
    sessions: HashMap<String, SessionRecord>,
}

/// In-memory store implementing every data-service trait.
#[derive(Default)]
pub struct MemStore {
    data: Mutex<ShopData>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product (development/test bootstrap).
    pub fn seed_product(&self, name: &str, unit: &str, price: Decimal, stock: i64) -> Product {
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            unit: unit.to_string(),
            price,
            stock,
            is_new: false,
        };
        self.data
            .lock()
            .products
            .insert(product.id, product.clone());
        product
    }

    /// Seed a customer (development/test bootstrap).
    pub fn seed_customer(&self, customer: Customer) -> Customer {
        self.data
            .lock()
            .customers
            .insert(customer.id, customer.clone());
        customer
    }

    fn gst_amount(subtotal: Decimal) -> Decimal {
        subtotal * Decimal::from(GST_RATE_PERCENT) / Decimal::from(100)
    }
}

fn phone_conflict(
    data: &ShopData,
    phone: &str,
    exclude: Option<Uuid>,
) -> Option<(Uuid, String)> {
    data.customers
        .values()
        .find(|c| c.phone.as_deref() == Some(phone) && Some(c.id) != exclude)
        .map(|c| (c.id, c.name.clone()))
}

#[async_trait]
impl CustomerStore for MemStore {
    async fn create(&self, customer: Customer) -> Result<Customer, StoreError> {
        let mut data = self.data.lock();
        if let Some(phone) = customer.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some((existing_id, name)) = phone_conflict(&data, phone, None) {
                return Err(StoreError::DuplicatePhone {
                    existing_id,
                    name,
                    phone: phone.to_string(),
                });
            }
        }
        data.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        Ok(self.data.lock().customers.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: CustomerPatch) -> Result<Customer, StoreError> {
        let mut data = self.data.lock();
        if let Some(phone) = patch.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some((existing_id, name)) = phone_conflict(&data, phone, Some(id)) {
                return Err(StoreError::DuplicatePhone {
                    existing_id,
                    name,
                    phone: phone.to_string(),
                });
            }
        }
        let customer = data
            .customers
            .get_mut(&id)
            .ok_or(StoreError::NotFound("customer"))?;

        if let Some(name) = patch.name {
            customer.name = name;
        }
        if let Some(nickname) = patch.nickname {
            customer.nickname = Some(nickname);
        }
        if let Some(landmark) = patch.landmark {
            customer.landmark = Some(landmark);
        }
        if let Some(area) = patch.area {
            customer.area = Some(area);
        }
        if let Some(city) = patch.city {
            customer.city = Some(city);
        }
        if let Some(phone) = patch.phone {
            customer.phone = Some(phone);
        }
        if let Some(email) = patch.email {
            customer.email = Some(email);
        }
        if let Some(gstin) = patch.gstin {
            customer.gstin = Some(gstin);
        }
        if let Some(pan) = patch.pan {
            customer.pan = Some(pan);
        }
        customer.updated_at = Utc::now();
        Ok(customer.clone())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Customer>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.data.lock();
        let mut hits: Vec<Customer> = data
            .customers
            .values()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.nickname
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
                    || c.phone.as_deref().is_some_and(|p| p.contains(&needle))
                    || c.email
                        .as_deref()
                        .is_some_and(|e| e.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list(&self) -> Result<Vec<Customer>, StoreError> {
        let data = self.data.lock();
        let mut all: Vec<Customer> = data.customers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn total_outstanding(&self) -> Result<Decimal, StoreError> {
        let data = self.data.lock();
        Ok(data
            .customers
            .values()
            .filter(|c| c.balance > Decimal::ZERO)
            .map(|c| c.balance)
            .sum())
    }

    async fn purge(&self, id: Uuid) -> Result<PurgeReport, StoreError> {
        let mut data = self.data.lock();
        if !data.customers.contains_key(&id) {
            return Err(StoreError::NotFound("customer"));
        }

        let invoice_ids: Vec<Uuid> = data
            .invoices
            .values()
            .filter(|i| i.customer_id == id)
            .map(|i| i.id)
            .collect();
        for invoice_id in &invoice_ids {
            data.invoices.remove(invoice_id);
        }

        let ledger_before = data.ledger.len();
        data.ledger.retain(|e| e.customer_id != id);
        let ledger_entries = ledger_before - data.ledger.len();

        let reminder_ids: Vec<Uuid> = data
            .reminders
            .values()
            .filter(|r| r.customer_id == id)
            .map(|r| r.id)
            .collect();
        for reminder_id in &reminder_ids {
            data.reminders.remove(reminder_id);
        }

        let mut sessions_touched = 0;
        for session in data.sessions.values_mut() {
            if let Some(map) = session.metadata.as_object_mut() {
                if map.remove("customer_id").is_some() {
                    sessions_touched += 1;
                }
            }
        }

        data.customers.remove(&id);

        Ok(PurgeReport {
            invoices: invoice_ids.len(),
            ledger_entries,
            reminders: reminder_ids.len(),
            sessions_touched,
        })
    }
}

#[async_trait]
impl ProductStore for MemStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Product>, StoreError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .data
            .lock()
            .products
            .values()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let data = self.data.lock();
        let mut all: Vec<Product> = data.products.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

#[async_trait]
impl InvoiceStore for MemStore {
    async fn create(&self, new: NewInvoice) -> Result<Invoice, StoreError> {
        if new.lines.is_empty() {
            return Err(StoreError::Validation("invoice has no items".to_string()));
        }
        for line in &new.lines {
            if line.quantity <= 0 {
                return Err(StoreError::Validation(format!(
                    "quantity for {} must be positive",
                    line.product
                )));
            }
        }

        let mut data = self.data.lock();
        if !data.customers.contains_key(&new.customer_id) {
            return Err(StoreError::NotFound("customer"));
        }

        // Resolve products and validate stock before touching anything.
        // Unknown names become price-zero products flagged new.
        let mut resolved: Vec<(Option<Uuid>, Product, i64)> = Vec::with_capacity(new.lines.len());
        for line in &new.lines {
            let needle = line.product.trim().to_lowercase();
            let existing = data
                .products
                .values()
                .find(|p| p.name.to_lowercase() == needle)
                .cloned();
            match existing {
                Some(product) => {
                    if product.stock < line.quantity {
                        return Err(StoreError::InsufficientStock {
                            product: product.name.clone(),
                            available: product.stock,
                            requested: line.quantity,
                        });
                    }
                    resolved.push((Some(product.id), product, line.quantity));
                }
                None => {
                    let product = Product {
                        id: Uuid::new_v4(),
                        name: line.product.trim().to_string(),
                        unit: line.unit.clone().unwrap_or_else(|| "piece".to_string()),
                        price: Decimal::ZERO,
                        stock: 0,
                        is_new: true,
                    };
                    resolved.push((None, product, line.quantity));
                }
            }
        }

        // All checks passed: apply.
        let invoice_id = Uuid::new_v4();
        let now = Utc::now();
        let mut items = Vec::with_capacity(resolved.len());
        let mut subtotal = Decimal::ZERO;

        for (existing_id, product, quantity) in resolved {
            let product_id = match existing_id {
                Some(id) => {
                    let p = data.products.get_mut(&id).expect("resolved above");
                    p.stock -= quantity;
                    id
                }
                None => {
                    // auto-created products have no stock yet; the
                    // reservation still applies so cancellation restores
                    // symmetrically (negative stock records a backorder)
                    let id = product.id;
                    data.products.insert(id, product.clone());
                    data.products.get_mut(&id).expect("just inserted").stock -= quantity;
                    id
                }
            };
            let line_total = product.price * Decimal::from(quantity);
            subtotal += line_total;
            items.push(InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id,
                product_id,
                product_name: product.name.clone(),
                quantity,
                unit_price: product.price,
                line_total,
            });
        }

        let total = if new.gst {
            subtotal + Self::gst_amount(subtotal)
        } else {
            subtotal
        };

        let invoice = Invoice {
            id: invoice_id,
            customer_id: new.customer_id,
            total,
            status: if new.auto_confirm {
                InvoiceStatus::Confirmed
            } else {
                InvoiceStatus::Draft
            },
            gst: new.gst,
            session_id: new.session_id.clone(),
            items,
            created_at: now,
        };

        data.ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            customer_id: new.customer_id,
            entry_type: LedgerEntryType::Debit,
            amount: total,
            payment_mode: None,
            description: format!("Invoice {invoice_id}"),
            created_at: now,
        });
        let customer = data
            .customers
            .get_mut(&new.customer_id)
            .expect("checked above");
        customer.balance += total;
        customer.updated_at = now;

        data.invoices.insert(invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn confirm(&self, invoice_id: Uuid) -> Result<Invoice, StoreError> {
        let mut data = self.data.lock();
        let invoice = data
            .invoices
            .get_mut(&invoice_id)
            .ok_or(StoreError::NotFound("invoice"))?;
        match invoice.status {
            InvoiceStatus::Cancelled => Err(StoreError::AlreadyCancelled),
            _ => {
                invoice.status = InvoiceStatus::Confirmed;
                Ok(invoice.clone())
            }
        }
    }

    async fn cancel(&self, invoice_id: Uuid) -> Result<Invoice, StoreError> {
        let mut data = self.data.lock();
        cancel_inner(&mut data, invoice_id)
    }

    async fn cancel_all(
        &self,
        customer_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut data = self.data.lock();
        let targets: Vec<Uuid> = data
            .invoices
            .values()
            .filter(|i| i.status != InvoiceStatus::Cancelled)
            .filter(|i| match (customer_id, session_id) {
                (Some(c), _) => i.customer_id == c,
                (None, Some(s)) => i.session_id.as_deref() == Some(s),
                (None, None) => false,
            })
            .map(|i| i.id)
            .collect();

        let mut cancelled = Vec::with_capacity(targets.len());
        for id in targets {
            cancelled.push(cancel_inner(&mut data, id)?);
        }
        Ok(cancelled)
    }

    async fn get(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.data.lock().invoices.get(&invoice_id).cloned())
    }

    async fn drafts_for_session(&self, session_id: &str) -> Result<Vec<Invoice>, StoreError> {
        let data = self.data.lock();
        let mut drafts: Vec<Invoice> = data
            .invoices
            .values()
            .filter(|i| {
                i.status == InvoiceStatus::Draft && i.session_id.as_deref() == Some(session_id)
            })
            .cloned()
            .collect();
        drafts.sort_by_key(|i| i.created_at);
        Ok(drafts)
    }

    async fn draft_for_customer(
        &self,
        session_id: &str,
        customer_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .invoices
            .values()
            .filter(|i| {
                i.status == InvoiceStatus::Draft
                    && i.session_id.as_deref() == Some(session_id)
                    && i.customer_id == customer_id
            })
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn latest_confirmed(&self, customer_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .invoices
            .values()
            .filter(|i| i.status == InvoiceStatus::Confirmed && i.customer_id == customer_id)
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn set_gst(&self, invoice_id: Uuid, enable: bool) -> Result<Invoice, StoreError> {
        let mut data = self.data.lock();
        let invoice = data
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or(StoreError::NotFound("invoice"))?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(StoreError::Conflict(
                "GST can only be toggled on a draft".to_string(),
            ));
        }
        if invoice.gst == enable {
            return Ok(invoice);
        }

        let subtotal: Decimal = invoice.items.iter().map(|i| i.line_total).sum();
        let new_total = if enable {
            subtotal + Self::gst_amount(subtotal)
        } else {
            subtotal
        };
        let delta = new_total - invoice.total;
        let now = Utc::now();

        // adjust ledger and balance by the delta so the invariant holds;
        // the reversal carries no payment mode, like a cancellation credit,
        // so it stays out of the payment aggregates
        if !delta.is_zero() {
            let (entry_type, amount) = if delta > Decimal::ZERO {
                (LedgerEntryType::Debit, delta)
            } else {
                (LedgerEntryType::Credit, -delta)
            };
            data.ledger.push(LedgerEntry {
                id: Uuid::new_v4(),
                customer_id: invoice.customer_id,
                entry_type,
                amount,
                payment_mode: None,
                description: format!("GST adjustment on invoice {invoice_id}"),
                created_at: now,
            });
            if let Some(customer) = data.customers.get_mut(&invoice.customer_id) {
                customer.balance += delta;
                customer.updated_at = now;
            }
        }

        let stored = data.invoices.get_mut(&invoice_id).expect("cloned above");
        stored.gst = enable;
        stored.total = new_total;
        Ok(stored.clone())
    }
}

fn cancel_inner(data: &mut ShopData, invoice_id: Uuid) -> Result<Invoice, StoreError> {
    let invoice = data
        .invoices
        .get(&invoice_id)
        .cloned()
        .ok_or(StoreError::NotFound("invoice"))?;
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(StoreError::AlreadyCancelled);
    }

    let now = Utc::now();
    for item in &invoice.items {
        if let Some(product) = data.products.get_mut(&item.product_id) {
            product.stock += item.quantity;
        }
    }
    data.ledger.push(LedgerEntry {
        id: Uuid::new_v4(),
        customer_id: invoice.customer_id,
        entry_type: LedgerEntryType::Credit,
        amount: invoice.total,
        payment_mode: None,
        description: format!("Cancelled invoice {invoice_id}"),
        created_at: now,
    });
    if let Some(customer) = data.customers.get_mut(&invoice.customer_id) {
        customer.balance -= invoice.total;
        customer.updated_at = now;
    }

    let stored = data.invoices.get_mut(&invoice_id).expect("cloned above");
    stored.status = InvoiceStatus::Cancelled;
    Ok(stored.clone())
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn record_payment(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Validation("amount must be positive".to_string()));
        }
        let mut data = self.data.lock();
        let customer = data
            .customers
            .get_mut(&customer_id)
            .ok_or(StoreError::NotFound("customer"))?;
        customer.balance -= amount;
        customer.updated_at = Utc::now();
        let balance = customer.balance;
        data.ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            customer_id,
            entry_type: LedgerEntryType::Credit,
            amount,
            payment_mode: Some(mode),
            description: format!("Payment received ({})", mode.as_str()),
            created_at: Utc::now(),
        });
        Ok(balance)
    }

    async fn add_credit(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Validation("amount must be positive".to_string()));
        }
        if description.trim().is_empty() {
            return Err(StoreError::Validation(
                "credit entries need a description".to_string(),
            ));
        }
        let mut data = self.data.lock();
        let customer = data
            .customers
            .get_mut(&customer_id)
            .ok_or(StoreError::NotFound("customer"))?;
        customer.balance += amount;
        customer.updated_at = Utc::now();
        let balance = customer.balance;
        data.ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            customer_id,
            entry_type: LedgerEntryType::Debit,
            amount,
            payment_mode: None,
            description: description.trim().to_string(),
            created_at: Utc::now(),
        });
        Ok(balance)
    }

    async fn set_opening_balance(
        &self,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Validation("amount must be positive".to_string()));
        }
        let mut data = self.data.lock();
        if let Some(existing) = data
            .ledger
            .iter()
            .find(|e| e.customer_id == customer_id && e.entry_type == LedgerEntryType::OpeningBalance)
        {
            return Err(StoreError::OpeningBalanceExists {
                existing: existing.amount,
            });
        }
        let customer = data
            .customers
            .get_mut(&customer_id)
            .ok_or(StoreError::NotFound("customer"))?;
        customer.balance += amount;
        customer.updated_at = Utc::now();
        let balance = customer.balance;
        data.ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            customer_id,
            entry_type: LedgerEntryType::OpeningBalance,
            amount,
            payment_mode: None,
            description: "Opening balance".to_string(),
            created_at: Utc::now(),
        });
        Ok(balance)
    }

    async fn entries(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let data = self.data.lock();
        let mut entries: Vec<LedgerEntry> = data
            .ledger
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn daily_summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DailySummary, StoreError> {
        let data = self.data.lock();

        let confirmed: Vec<&Invoice> = data
            .invoices
            .values()
            .filter(|i| {
                i.status == InvoiceStatus::Confirmed
                    && i.created_at >= from
                    && i.created_at < to
            })
            .collect();
        let total_sales: Decimal = confirmed.iter().map(|i| i.total).sum();

        let mut by_mode: HashMap<String, Decimal> = HashMap::new();
        let mut total_payments = Decimal::ZERO;
        for entry in data.ledger.iter().filter(|e| {
            e.entry_type == LedgerEntryType::Credit
                && e.payment_mode.is_some()
                && e.created_at >= from
                && e.created_at < to
        }) {
            total_payments += entry.amount;
            let mode = entry.payment_mode.expect("filtered above").as_str();
            *by_mode.entry(mode.to_string()).or_default() += entry.amount;
        }

        let mut payments_by_mode: Vec<(String, Decimal)> = by_mode.into_iter().collect();
        payments_by_mode.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(DailySummary {
            total_sales,
            total_payments,
            payments_by_mode,
            pending_amount: total_sales - total_payments,
            invoice_count: confirmed.len() as i64,
        })
    }
}

#[async_trait]
impl ReminderStore for MemStore {
    async fn insert(&self, reminder: Reminder) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        if !data.customers.contains_key(&reminder.customer_id) {
            return Err(StoreError::NotFound("customer"));
        }
        data.reminders.insert(reminder.id, reminder);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, StoreError> {
        Ok(self.data.lock().reminders.get(&id).cloned())
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        let reminder = data
            .reminders
            .get_mut(&id)
            .ok_or(StoreError::NotFound("reminder"))?;
        if reminder.status == ReminderStatus::Sent {
            return Ok(()); // idempotent
        }
        reminder.status = ReminderStatus::Sent;
        reminder.sent_at = Some(at);
        reminder.last_attempt_at = Some(at);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Reminder, StoreError> {
        let mut data = self.data.lock();
        let reminder = data
            .reminders
            .get_mut(&id)
            .ok_or(StoreError::NotFound("reminder"))?;
        reminder.status = ReminderStatus::Failed;
        reminder.retry_count += 1;
        reminder.last_attempt_at = Some(at);
        Ok(reminder.clone())
    }

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        let reminder = data
            .reminders
            .get_mut(&id)
            .ok_or(StoreError::NotFound("reminder"))?;
        reminder.status = ReminderStatus::Cancelled;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        amount: Option<Decimal>,
        message: Option<String>,
    ) -> Result<Reminder, StoreError> {
        let mut data = self.data.lock();
        let reminder = data
            .reminders
            .get_mut(&id)
            .ok_or(StoreError::NotFound("reminder"))?;
        reminder.scheduled_at = scheduled_at;
        reminder.status = ReminderStatus::Pending;
        if let Some(amount) = amount {
            reminder.amount = amount;
            reminder.notes = amount.to_string();
        }
        if let Some(message) = message {
            reminder.message = message;
        }
        Ok(reminder.clone())
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Reminder>, StoreError> {
        let data = self.data.lock();
        let mut list: Vec<Reminder> = data
            .reminders
            .values()
            .filter(|r| r.customer_id == customer_id)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.scheduled_at);
        Ok(list)
    }

    async fn latest_pending(&self, customer_id: Uuid) -> Result<Option<Reminder>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .reminders
            .values()
            .filter(|r| r.customer_id == customer_id && r.status == ReminderStatus::Pending)
            .max_by_key(|r| r.created_at)
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemStore {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.data.lock().sessions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn end(&self, id: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        if let Some(session) = data.sessions.get_mut(id) {
            session.status = SessionStatus::Ended;
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_metadata(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        let session = data
            .sessions
            .get_mut(id)
            .ok_or(StoreError::NotFound("session"))?;
        if let Some(map) = session.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        } else {
            session.metadata = serde_json::json!({ key: value });
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.data.lock().sessions.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NewInvoiceLine;

    fn customer(name: &str) -> Customer {
        Customer::new(name)
    }

    async fn ledger_balance(store: &MemStore, id: Uuid) -> Decimal {
        let entries = LedgerStore::entries(store, id).await.unwrap();
        entries
            .iter()
            .map(|e| match e.entry_type {
                LedgerEntryType::Debit | LedgerEntryType::OpeningBalance => e.amount,
                LedgerEntryType::Credit => -e.amount,
            })
            .sum()
    }

    #[tokio::test]
    async fn invoice_moves_stock_ledger_and_balance() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Rahul"));
        store.seed_product("chawal", "kg", Decimal::from(50), 10);

        let invoice = InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: Some("s1".to_string()),
                lines: vec![NewInvoiceLine {
                    product: "chawal".to_string(),
                    quantity: 2,
                    unit: Some("kg".to_string()),
                }],
                gst: false,
                auto_confirm: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.total, Decimal::from(100));

        let product = ProductStore::find_by_name(&store, "chawal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.stock, 8);

        let refreshed = CustomerStore::get(&store, c.id).await.unwrap().unwrap();
        assert_eq!(refreshed.balance, Decimal::from(100));
        assert_eq!(ledger_balance(&store, c.id).await, refreshed.balance);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_state_untouched() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Rahul"));
        store.seed_product("chawal", "kg", Decimal::from(50), 10);
        store.seed_product("cheeni", "kg", Decimal::from(40), 1);

        // second line fails; first line's reservation must not survive
        let err = InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: None,
                lines: vec![
                    NewInvoiceLine {
                        product: "chawal".to_string(),
                        quantity: 2,
                        unit: None,
                    },
                    NewInvoiceLine {
                        product: "cheeni".to_string(),
                        quantity: 5,
                        unit: None,
                    },
                ],
                gst: false,
                auto_confirm: false,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::InsufficientStock { .. }));
        let chawal = ProductStore::find_by_name(&store, "chawal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chawal.stock, 10);
        let refreshed = CustomerStore::get(&store, c.id).await.unwrap().unwrap();
        assert_eq!(refreshed.balance, Decimal::ZERO);
        assert!(LedgerStore::entries(&store, c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_product_auto_created_at_zero() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Mohan"));

        let invoice = InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: None,
                lines: vec![NewInvoiceLine {
                    product: "imported makhana".to_string(),
                    quantity: 3,
                    unit: Some("packet".to_string()),
                }],
                gst: false,
                auto_confirm: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(invoice.total, Decimal::ZERO);
        let product = ProductStore::find_by_name(&store, "imported makhana")
            .await
            .unwrap()
            .unwrap();
        assert!(product.is_new);
        assert_eq!(product.price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn cancel_restores_everything() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Rahul"));
        store.seed_product("chawal", "kg", Decimal::from(50), 10);

        let invoice = InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: None,
                lines: vec![NewInvoiceLine {
                    product: "chawal".to_string(),
                    quantity: 4,
                    unit: None,
                }],
                gst: false,
                auto_confirm: false,
            },
        )
        .await
        .unwrap();

        InvoiceStore::cancel(&store, invoice.id).await.unwrap();

        let product = ProductStore::find_by_name(&store, "chawal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.stock, 10);
        let refreshed = CustomerStore::get(&store, c.id).await.unwrap().unwrap();
        assert_eq!(refreshed.balance, Decimal::ZERO);
        assert_eq!(ledger_balance(&store, c.id).await, Decimal::ZERO);

        // cancelling again is a conflict
        let err = InvoiceStore::cancel(&store, invoice.id).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyCancelled));
    }

    #[tokio::test]
    async fn payment_then_credit_is_identity() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Bharat"));
        LedgerStore::set_opening_balance(&store, c.id, Decimal::from(500))
            .await
            .unwrap();

        let after_payment = LedgerStore::record_payment(&store, c.id, Decimal::from(200), PaymentMode::Upi)
            .await
            .unwrap();
        assert_eq!(after_payment, Decimal::from(300));

        let after_credit = LedgerStore::add_credit(&store, c.id, Decimal::from(200), "udhaar")
            .await
            .unwrap();
        assert_eq!(after_credit, Decimal::from(500));
        assert_eq!(ledger_balance(&store, c.id).await, Decimal::from(500));
    }

    #[tokio::test]
    async fn opening_balance_at_most_once() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Suresh"));
        LedgerStore::set_opening_balance(&store, c.id, Decimal::from(100))
            .await
            .unwrap();
        let err = LedgerStore::set_opening_balance(&store, c.id, Decimal::from(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OpeningBalanceExists { .. }));
    }

    #[tokio::test]
    async fn duplicate_phone_rejected() {
        let store = MemStore::new();
        let mut a = customer("Rahul");
        a.phone = Some("9876543210".to_string());
        let a = CustomerStore::create(&store, a).await.unwrap();

        let mut b = customer("Rahul Verma");
        b.phone = Some("9876543210".to_string());
        let err = CustomerStore::create(&store, b).await.unwrap_err();
        match err {
            StoreError::DuplicatePhone { existing_id, .. } => assert_eq!(existing_id, a.id),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn purge_removes_all_children() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Suresh"));
        store.seed_product("chawal", "kg", Decimal::from(50), 10);
        InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: None,
                lines: vec![NewInvoiceLine {
                    product: "chawal".to_string(),
                    quantity: 1,
                    unit: None,
                }],
                gst: false,
                auto_confirm: true,
            },
        )
        .await
        .unwrap();

        let report = CustomerStore::purge(&store, c.id).await.unwrap();
        assert_eq!(report.invoices, 1);
        assert!(report.ledger_entries >= 1);
        assert!(CustomerStore::get(&store, c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gst_toggle_reversal_is_not_a_payment() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Rahul"));
        store.seed_product("chawal", "kg", Decimal::from(100), 10);

        let invoice = InvoiceStore::create(
            &store,
            NewInvoice {
                customer_id: c.id,
                session_id: Some("s1".to_string()),
                lines: vec![NewInvoiceLine {
                    product: "chawal".to_string(),
                    quantity: 2,
                    unit: None,
                }],
                gst: true,
                auto_confirm: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(invoice.total, Decimal::from(236)); // 200 + 18% GST

        let updated = InvoiceStore::set_gst(&store, invoice.id, false).await.unwrap();
        assert_eq!(updated.total, Decimal::from(200));
        assert_eq!(ledger_balance(&store, c.id).await, Decimal::from(200));

        // the reversal credit carries no mode and never reaches the
        // payment aggregates
        let now = Utc::now();
        let summary = LedgerStore::daily_summary(
            &store,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        )
        .await
        .unwrap();
        assert_eq!(summary.total_payments, Decimal::ZERO);
        assert!(summary.payments_by_mode.is_empty());
    }

    #[tokio::test]
    async fn daily_summary_empty_is_zero() {
        let store = MemStore::new();
        let now = Utc::now();
        let summary = LedgerStore::daily_summary(&store, now - chrono::Duration::hours(12), now)
            .await
            .unwrap();
        assert_eq!(summary.total_sales, Decimal::ZERO);
        assert_eq!(summary.invoice_count, 0);
        assert!(summary.payments_by_mode.is_empty());
    }

    #[tokio::test]
    async fn mark_sent_is_idempotent() {
        let store = MemStore::new();
        let c = store.seed_customer(customer("Bharat"));
        let reminder = Reminder {
            id: Uuid::new_v4(),
            customer_id: c.id,
            amount: Decimal::from(500),
            scheduled_at: Utc::now(),
            channels: vec!["whatsapp".to_string(), "email".to_string()],
            message: "payment due".to_string(),
            notes: "500".to_string(),
            status: ReminderStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            sent_at: None,
            created_at: Utc::now(),
        };
        ReminderStore::insert(&store, reminder.clone()).await.unwrap();

        let first = Utc::now();
        ReminderStore::mark_sent(&store, reminder.id, first).await.unwrap();
        ReminderStore::mark_sent(&store, reminder.id, first + chrono::Duration::hours(1))
            .await
            .unwrap();

        let stored = ReminderStore::get(&store, reminder.id).await.unwrap().unwrap();
        assert_eq!(stored.sent_at, Some(first));
        assert_eq!(stored.status, ReminderStatus::Sent);
    }
}
