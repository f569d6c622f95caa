//! Postgres data services
//!
//! sqlx with runtime-bound queries; one `BEGIN`/`COMMIT` per intent. Schema
//! bootstrap is idempotent (`CREATE TABLE IF NOT EXISTS` plus the latency
//! indexes on customer name/phone/email and the per-customer time-ordered
//! child tables).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dukaan_voice_core::{
    Customer, CustomerPatch, DailySummary, Invoice, InvoiceItem, InvoiceStatus, LedgerEntry,
    LedgerEntryType, PaymentMode, Product, Reminder, ReminderStatus, SessionRecord, SessionStatus,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::traits::{
    CustomerStore, InvoiceStore, LedgerStore, NewInvoice, ProductStore, PurgeReport,
    ReminderStore, SessionStore, GST_RATE_PERCENT,
};
use crate::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    nickname TEXT,
    landmark TEXT,
    area TEXT,
    city TEXT,
    phone TEXT,
    email TEXT,
    gstin TEXT,
    pan TEXT,
    balance NUMERIC NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_customers_name ON customers (lower(name));
CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers (phone);
CREATE INDEX IF NOT EXISTS idx_customers_email ON customers (email);

CREATE TABLE IF NOT EXISTS products (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    unit TEXT NOT NULL,
    price NUMERIC NOT NULL DEFAULT 0,
    stock BIGINT NOT NULL DEFAULT 0,
    is_new BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_products_name ON products (lower(name));

CREATE TABLE IF NOT EXISTS invoices (
    id UUID PRIMARY KEY,
    customer_id UUID NOT NULL,
    total NUMERIC NOT NULL,
    status TEXT NOT NULL,
    gst BOOLEAN NOT NULL DEFAULT FALSE,
    session_id TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices (customer_id, created_at);
CREATE INDEX IF NOT EXISTS idx_invoices_session ON invoices (session_id) WHERE status = 'DRAFT';

CREATE TABLE IF NOT EXISTS invoice_items (
    id UUID PRIMARY KEY,
    invoice_id UUID NOT NULL,
    product_id UUID NOT NULL,
    product_name TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    unit_price NUMERIC NOT NULL,
    line_total NUMERIC NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_invoice_items_invoice ON invoice_items (invoice_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id UUID PRIMARY KEY,
    customer_id UUID NOT NULL,
    entry_type TEXT NOT NULL,
    amount NUMERIC NOT NULL CHECK (amount > 0),
    payment_mode TEXT,
    description TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ledger_customer ON ledger_entries (customer_id, created_at);

CREATE TABLE IF NOT EXISTS reminders (
    id UUID PRIMARY KEY,
    customer_id UUID NOT NULL,
    amount NUMERIC NOT NULL,
    scheduled_at TIMESTAMPTZ NOT NULL,
    channels TEXT[] NOT NULL,
    message TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    retry_count INT NOT NULL DEFAULT 0,
    last_attempt_at TIMESTAMPTZ,
    sent_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reminders_customer ON reminders (customer_id, scheduled_at);

CREATE TABLE IF NOT EXISTS conversation_sessions (
    id TEXT PRIMARY KEY,
    started_at TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    status TEXT NOT NULL,
    language TEXT NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
);
"#;

/// Postgres store implementing every data-service trait.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema ensured");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_customer(row: &PgRow) -> Result<Customer, sqlx::Error> {
    Ok(Customer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        nickname: row.try_get("nickname")?,
        landmark: row.try_get("landmark")?,
        area: row.try_get("area")?,
        city: row.try_get("city")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        gstin: row.try_get("gstin")?,
        pan: row.try_get("pan")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_product(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        unit: row.try_get("unit")?,
        price: row.try_get("price")?,
        stock: row.try_get("stock")?,
        is_new: row.try_get("is_new")?,
    })
}

fn row_to_invoice(row: &PgRow) -> Result<Invoice, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Invoice {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        total: row.try_get("total")?,
        status: InvoiceStatus::parse(&status).unwrap_or(InvoiceStatus::Draft),
        gst: row.try_get("gst")?,
        session_id: row.try_get("session_id")?,
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<InvoiceItem, sqlx::Error> {
    Ok(InvoiceItem {
        id: row.try_get("id")?,
        invoice_id: row.try_get("invoice_id")?,
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        quantity: row.try_get("quantity")?,
        unit_price: row.try_get("unit_price")?,
        line_total: row.try_get("line_total")?,
    })
}

fn row_to_ledger(row: &PgRow) -> Result<LedgerEntry, sqlx::Error> {
    let entry_type: String = row.try_get("entry_type")?;
    let mode: Option<String> = row.try_get("payment_mode")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        entry_type: LedgerEntryType::parse(&entry_type).unwrap_or(LedgerEntryType::Debit),
        amount: row.try_get("amount")?,
        payment_mode: mode.as_deref().and_then(PaymentMode::parse),
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_reminder(row: &PgRow) -> Result<Reminder, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Reminder {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        amount: row.try_get("amount")?,
        scheduled_at: row.try_get("scheduled_at")?,
        channels: row.try_get("channels")?,
        message: row.try_get("message")?,
        notes: row.try_get("notes")?,
        status: ReminderStatus::parse(&status).unwrap_or(ReminderStatus::Pending),
        retry_count: row.try_get("retry_count")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl PgStore {
    async fn load_items(&self, invoice: &mut Invoice) -> Result<(), StoreError> {
        let rows = sqlx::query("SELECT * FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice.id)
            .fetch_all(&self.pool)
            .await?;
        invoice.items = rows
            .iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    async fn load_invoices(&self, rows: Vec<PgRow>) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut invoice = row_to_invoice(row)?;
            self.load_items(&mut invoice).await?;
            invoices.push(invoice);
        }
        Ok(invoices)
    }

    async fn phone_conflict(
        &self,
        phone: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<(Uuid, String)>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM customers WHERE phone = $1 AND ($2::uuid IS NULL OR id <> $2) LIMIT 1")
            .bind(phone)
            .bind(exclude)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some((row.try_get("id")?, row.try_get("name")?)),
            None => None,
        })
    }
}

/// Append a ledger entry and move the customer balance inside an open
/// transaction. Every money-moving operation funnels through here.
async fn apply_ledger(
    tx: &mut Transaction<'_, Postgres>,
    customer_id: Uuid,
    entry_type: LedgerEntryType,
    amount: Decimal,
    mode: Option<PaymentMode>,
    description: &str,
) -> Result<Decimal, StoreError> {
    sqlx::query(
        "INSERT INTO ledger_entries (id, customer_id, entry_type, amount, payment_mode, description, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(customer_id)
    .bind(entry_type.as_str())
    .bind(amount)
    .bind(mode.map(|m| m.as_str()))
    .bind(description)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    let delta = match entry_type {
        LedgerEntryType::Debit | LedgerEntryType::OpeningBalance => amount,
        LedgerEntryType::Credit => -amount,
    };

    let row = sqlx::query(
        "UPDATE customers SET balance = balance + $2, updated_at = $3 WHERE id = $1 RETURNING balance",
    )
    .bind(customer_id)
    .bind(delta)
    .bind(Utc::now())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::NotFound("customer"))?;

    Ok(row.try_get("balance")?)
}

#[async_trait]
impl CustomerStore for PgStore {
    async fn create(&self, customer: Customer) -> Result<Customer, StoreError> {
        if let Some(phone) = customer.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some((existing_id, name)) = self.phone_conflict(phone, None).await? {
                return Err(StoreError::DuplicatePhone {
                    existing_id,
                    name,
                    phone: phone.to_string(),
                });
            }
        }
        sqlx::query(
            "INSERT INTO customers (id, name, nickname, landmark, area, city, phone, email, gstin, pan, balance, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(&customer.nickname)
        .bind(&customer.landmark)
        .bind(&customer.area)
        .bind(&customer.city)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(&customer.gstin)
        .bind(&customer.pan)
        .bind(customer.balance)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(customer)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row_to_customer(&row)?),
            None => None,
        })
    }

    async fn update(&self, id: Uuid, patch: CustomerPatch) -> Result<Customer, StoreError> {
        if let Some(phone) = patch.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some((existing_id, name)) = self.phone_conflict(phone, Some(id)).await? {
                return Err(StoreError::DuplicatePhone {
                    existing_id,
                    name,
                    phone: phone.to_string(),
                });
            }
        }
        let row = sqlx::query(
            "UPDATE customers SET
                name = COALESCE($2, name),
                nickname = COALESCE($3, nickname),
                landmark = COALESCE($4, landmark),
                area = COALESCE($5, area),
                city = COALESCE($6, city),
                phone = COALESCE($7, phone),
                email = COALESCE($8, email),
                gstin = COALESCE($9, gstin),
                pan = COALESCE($10, pan),
                updated_at = $11
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.nickname)
        .bind(patch.landmark)
        .bind(patch.area)
        .bind(patch.city)
        .bind(patch.phone)
        .bind(patch.email)
        .bind(patch.gstin)
        .bind(patch.pan)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("customer"))?;
        Ok(row_to_customer(&row)?)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Customer>, StoreError> {
        let needle = format!("%{}%", query.trim().to_lowercase());
        if needle == "%%" {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM customers
             WHERE lower(name) LIKE $1
                OR lower(coalesce(nickname, '')) LIKE $1
                OR coalesce(phone, '') LIKE $1
                OR lower(coalesce(email, '')) LIKE $1
             ORDER BY name
             LIMIT $2",
        )
        .bind(&needle)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_customer(r).map_err(StoreError::from))
            .collect()
    }

    async fn list(&self) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query("SELECT * FROM customers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| row_to_customer(r).map_err(StoreError::from))
            .collect()
    }

    async fn total_outstanding(&self) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(balance), 0) AS total FROM customers WHERE balance > 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total")?)
    }

    async fn purge(&self, id: Uuid) -> Result<PurgeReport, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("customer"));
        }

        sqlx::query(
            "DELETE FROM invoice_items WHERE invoice_id IN (SELECT id FROM invoices WHERE customer_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let invoices = sqlx::query("DELETE FROM invoices WHERE customer_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let ledger = sqlx::query("DELETE FROM ledger_entries WHERE customer_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let reminders = sqlx::query("DELETE FROM reminders WHERE customer_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let sessions = sqlx::query(
            "UPDATE conversation_sessions SET metadata = metadata - 'customer_id'
             WHERE metadata->>'customer_id' = $1",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(PurgeReport {
            invoices: invoices.rows_affected() as usize,
            ledger_entries: ledger.rows_affected() as usize,
            reminders: reminders.rows_affected() as usize,
            sessions_touched: sessions.rows_affected() as usize,
        })
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT * FROM products WHERE lower(name) = lower($1)")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row_to_product(&row)?),
            None => None,
        })
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query("SELECT * FROM products ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| row_to_product(r).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
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

        let mut tx = self.pool.begin().await?;
        let invoice_id = Uuid::new_v4();
        let now = Utc::now();
        let mut items = Vec::with_capacity(new.lines.len());
        let mut subtotal = Decimal::ZERO;

        for line in &new.lines {
            // lock the product row for the stock reservation
            let row = sqlx::query("SELECT * FROM products WHERE lower(name) = lower($1) FOR UPDATE")
                .bind(line.product.trim())
                .fetch_optional(&mut *tx)
                .await?;

            let product = match row {
                Some(row) => {
                    let product = row_to_product(&row)?;
                    if product.stock < line.quantity {
                        // rollback on drop
                        return Err(StoreError::InsufficientStock {
                            product: product.name,
                            available: product.stock,
                            requested: line.quantity,
                        });
                    }
                    sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1")
                        .bind(product.id)
                        .bind(line.quantity)
                        .execute(&mut *tx)
                        .await?;
                    product
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
                    sqlx::query(
                        "INSERT INTO products (id, name, unit, price, stock, is_new)
                         VALUES ($1, $2, $3, $4, $5, TRUE)",
                    )
                    .bind(product.id)
                    .bind(&product.name)
                    .bind(&product.unit)
                    .bind(product.price)
                    .bind(product.stock)
                    .execute(&mut *tx)
                    .await?;
                    // reservation applies to auto-created products too, so a
                    // later cancellation restores stock symmetrically
                    sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1")
                        .bind(product.id)
                        .bind(line.quantity)
                        .execute(&mut *tx)
                        .await?;
                    product
                }
            };

            let line_total = product.price * Decimal::from(line.quantity);
            subtotal += line_total;
            let item = InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id,
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: line.quantity,
                unit_price: product.price,
                line_total,
            };
            sqlx::query(
                "INSERT INTO invoice_items (id, invoice_id, product_id, product_name, quantity, unit_price, line_total)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id)
            .bind(item.invoice_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .execute(&mut *tx)
            .await?;
            items.push(item);
        }

        let total = if new.gst {
            subtotal + subtotal * Decimal::from(GST_RATE_PERCENT) / Decimal::from(100)
        } else {
            subtotal
        };
        let status = if new.auto_confirm {
            InvoiceStatus::Confirmed
        } else {
            InvoiceStatus::Draft
        };

        sqlx::query(
            "INSERT INTO invoices (id, customer_id, total, status, gst, session_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(invoice_id)
        .bind(new.customer_id)
        .bind(total)
        .bind(status.as_str())
        .bind(new.gst)
        .bind(&new.session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        apply_ledger(
            &mut tx,
            new.customer_id,
            LedgerEntryType::Debit,
            total,
            None,
            &format!("Invoice {invoice_id}"),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice_id,
            customer_id = %new.customer_id,
            total = %total,
            status = status.as_str(),
            "Invoice created"
        );

        Ok(Invoice {
            id: invoice_id,
            customer_id: new.customer_id,
            total,
            status,
            gst: new.gst,
            session_id: new.session_id,
            items,
            created_at: now,
        })
    }

    async fn confirm(&self, invoice_id: Uuid) -> Result<Invoice, StoreError> {
        let row = sqlx::query(
            "UPDATE invoices SET status = 'CONFIRMED' WHERE id = $1 AND status <> 'CANCELLED' RETURNING *",
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        let mut invoice = match row {
            Some(row) => row_to_invoice(&row)?,
            None => {
                // distinguish missing from cancelled
                return match InvoiceStore::get(self, invoice_id).await? {
                    Some(_) => Err(StoreError::AlreadyCancelled),
                    None => Err(StoreError::NotFound("invoice")),
                };
            }
        };
        self.load_items(&mut invoice).await?;
        Ok(invoice)
    }

    async fn cancel(&self, invoice_id: Uuid) -> Result<Invoice, StoreError> {
        let mut tx = self.pool.begin().await?;
        let invoice = cancel_in_tx(&mut tx, invoice_id).await?;
        tx.commit().await?;
        Ok(invoice)
    }

    async fn cancel_all(
        &self,
        customer_id: Option<Uuid>,
        session_id: Option<&str>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let rows = match (customer_id, session_id) {
            (Some(customer), _) => {
                sqlx::query("SELECT id FROM invoices WHERE customer_id = $1 AND status <> 'CANCELLED'")
                    .bind(customer)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(session)) => {
                sqlx::query("SELECT id FROM invoices WHERE session_id = $1 AND status <> 'CANCELLED'")
                    .bind(session)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => Vec::new(),
        };

        let mut tx = self.pool.begin().await?;
        let mut cancelled = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            cancelled.push(cancel_in_tx(&mut tx, id).await?);
        }
        tx.commit().await?;
        Ok(cancelled)
    }

    async fn get(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut invoice = row_to_invoice(&row)?;
                self.load_items(&mut invoice).await?;
                Ok(Some(invoice))
            }
            None => Ok(None),
        }
    }

    async fn drafts_for_session(&self, session_id: &str) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM invoices WHERE session_id = $1 AND status = 'DRAFT' ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        self.load_invoices(rows).await
    }

    async fn draft_for_customer(
        &self,
        session_id: &str,
        customer_id: Uuid,
    ) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM invoices
             WHERE session_id = $1 AND customer_id = $2 AND status = 'DRAFT'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let mut invoice = row_to_invoice(&row)?;
                self.load_items(&mut invoice).await?;
                Ok(Some(invoice))
            }
            None => Ok(None),
        }
    }

    async fn latest_confirmed(&self, customer_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM invoices
             WHERE customer_id = $1 AND status = 'CONFIRMED'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let mut invoice = row_to_invoice(&row)?;
                self.load_items(&mut invoice).await?;
                Ok(Some(invoice))
            }
            None => Ok(None),
        }
    }

    async fn set_gst(&self, invoice_id: Uuid, enable: bool) -> Result<Invoice, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("invoice"))?;
        let invoice = row_to_invoice(&row)?;

        if invoice.status != InvoiceStatus::Draft {
            return Err(StoreError::Conflict(
                "GST can only be toggled on a draft".to_string(),
            ));
        }
        if invoice.gst == enable {
            drop(tx);
            return InvoiceStore::get(self, invoice_id)
                .await?
                .ok_or(StoreError::NotFound("invoice"));
        }

        let subtotal_row = sqlx::query(
            "SELECT COALESCE(SUM(line_total), 0) AS subtotal FROM invoice_items WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await?;
        let subtotal: Decimal = subtotal_row.try_get("subtotal")?;

        let new_total = if enable {
            subtotal + subtotal * Decimal::from(GST_RATE_PERCENT) / Decimal::from(100)
        } else {
            subtotal
        };
        let delta = new_total - invoice.total;

        sqlx::query("UPDATE invoices SET gst = $2, total = $3 WHERE id = $1")
            .bind(invoice_id)
            .bind(enable)
            .bind(new_total)
            .execute(&mut *tx)
            .await?;

        // modeless reversal, like a cancellation credit: it must not count
        // as a payment in the daily aggregates
        if !delta.is_zero() {
            let (entry_type, amount) = if delta > Decimal::ZERO {
                (LedgerEntryType::Debit, delta)
            } else {
                (LedgerEntryType::Credit, -delta)
            };
            apply_ledger(
                &mut tx,
                invoice.customer_id,
                entry_type,
                amount,
                None,
                &format!("GST adjustment on invoice {invoice_id}"),
            )
            .await?;
        }

        tx.commit().await?;
        InvoiceStore::get(self, invoice_id)
            .await?
            .ok_or(StoreError::NotFound("invoice"))
    }
}

async fn cancel_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<Invoice, StoreError> {
    let row = sqlx::query("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound("invoice"))?;
    let mut invoice = row_to_invoice(&row)?;
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(StoreError::AlreadyCancelled);
    }

    let item_rows = sqlx::query("SELECT * FROM invoice_items WHERE invoice_id = $1")
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await?;
    let items: Vec<InvoiceItem> = item_rows
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;

    for item in &items {
        sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut **tx)
            .await?;
    }

    sqlx::query("UPDATE invoices SET status = 'CANCELLED' WHERE id = $1")
        .bind(invoice_id)
        .execute(&mut **tx)
        .await?;

    apply_ledger(
        tx,
        invoice.customer_id,
        LedgerEntryType::Credit,
        invoice.total,
        None,
        &format!("Cancelled invoice {invoice_id}"),
    )
    .await?;

    invoice.status = InvoiceStatus::Cancelled;
    invoice.items = items;
    Ok(invoice)
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn record_payment(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        mode: PaymentMode,
    ) -> Result<Decimal, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Validation("amount must be positive".to_string()));
        }
        let mut tx = self.pool.begin().await?;
        let balance = apply_ledger(
            &mut tx,
            customer_id,
            LedgerEntryType::Credit,
            amount,
            Some(mode),
            &format!("Payment received ({})", mode.as_str()),
        )
        .await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let balance = apply_ledger(
            &mut tx,
            customer_id,
            LedgerEntryType::Debit,
            amount,
            None,
            description.trim(),
        )
        .await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT amount FROM ledger_entries WHERE customer_id = $1 AND entry_type = 'OPENING_BALANCE' LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Err(StoreError::OpeningBalanceExists {
                existing: row.try_get("amount")?,
            });
        }
        let balance = apply_ledger(
            &mut tx,
            customer_id,
            LedgerEntryType::OpeningBalance,
            amount,
            None,
            "Opening balance",
        )
        .await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn entries(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE customer_id = $1 ORDER BY created_at",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_ledger(r).map_err(StoreError::from))
            .collect()
    }

    async fn daily_summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DailySummary, StoreError> {
        let sales_row = sqlx::query(
            "SELECT COALESCE(SUM(total), 0) AS total_sales, COUNT(*) AS invoice_count
             FROM invoices
             WHERE status = 'CONFIRMED' AND created_at >= $1 AND created_at < $2",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        let total_sales: Decimal = sales_row.try_get("total_sales")?;
        let invoice_count: i64 = sales_row.try_get("invoice_count")?;

        let payment_rows = sqlx::query(
            "SELECT payment_mode, COALESCE(SUM(amount), 0) AS amount
             FROM ledger_entries
             WHERE entry_type = 'CREDIT' AND payment_mode IS NOT NULL
               AND created_at >= $1 AND created_at < $2
             GROUP BY payment_mode
             ORDER BY payment_mode",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut payments_by_mode = Vec::with_capacity(payment_rows.len());
        let mut total_payments = Decimal::ZERO;
        for row in &payment_rows {
            let mode: String = row.try_get("payment_mode")?;
            let amount: Decimal = row.try_get("amount")?;
            total_payments += amount;
            payments_by_mode.push((mode, amount));
        }

        Ok(DailySummary {
            total_sales,
            total_payments,
            payments_by_mode,
            pending_amount: total_sales - total_payments,
            invoice_count,
        })
    }
}

#[async_trait]
impl ReminderStore for PgStore {
    async fn insert(&self, reminder: Reminder) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reminders (id, customer_id, amount, scheduled_at, channels, message, notes, status, retry_count, last_attempt_at, sent_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(reminder.id)
        .bind(reminder.customer_id)
        .bind(reminder.amount)
        .bind(reminder.scheduled_at)
        .bind(&reminder.channels)
        .bind(&reminder.message)
        .bind(&reminder.notes)
        .bind(reminder.status.as_str())
        .bind(reminder.retry_count)
        .bind(reminder.last_attempt_at)
        .bind(reminder.sent_at)
        .bind(reminder.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, StoreError> {
        let row = sqlx::query("SELECT * FROM reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row_to_reminder(&row)?),
            None => None,
        })
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        // idempotent: an already-sent row keeps its original sent_at
        let result = sqlx::query(
            "UPDATE reminders SET status = 'sent', sent_at = $2, last_attempt_at = $2
             WHERE id = $1 AND status <> 'sent'",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && ReminderStore::get(self, id).await?.is_none() {
            return Err(StoreError::NotFound("reminder"));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Reminder, StoreError> {
        let row = sqlx::query(
            "UPDATE reminders SET status = 'failed', retry_count = retry_count + 1, last_attempt_at = $2
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("reminder"))?;
        Ok(row_to_reminder(&row)?)
    }

    async fn cancel(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE reminders SET status = 'cancelled' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("reminder"));
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        amount: Option<Decimal>,
        message: Option<String>,
    ) -> Result<Reminder, StoreError> {
        let row = sqlx::query(
            "UPDATE reminders SET
                scheduled_at = $2,
                status = 'pending',
                amount = COALESCE($3, amount),
                notes = COALESCE($3::text, notes),
                message = COALESCE($4, message)
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(scheduled_at)
        .bind(amount)
        .bind(message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("reminder"))?;
        Ok(row_to_reminder(&row)?)
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Reminder>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM reminders WHERE customer_id = $1 ORDER BY scheduled_at",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_reminder(r).map_err(StoreError::from))
            .collect()
    }

    async fn latest_pending(&self, customer_id: Uuid) -> Result<Option<Reminder>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM reminders WHERE customer_id = $1 AND status = 'pending'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row_to_reminder(&row)?),
            None => None,
        })
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_sessions (id, started_at, ended_at, status, language, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, language = EXCLUDED.language",
        )
        .bind(&record.id)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(match record.status {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        })
        .bind(&record.language)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE conversation_sessions SET status = 'ended', ended_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_metadata(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE conversation_sessions SET metadata = metadata || jsonb_build_object($2::text, $3::jsonb) WHERE id = $1",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("session"));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversation_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Some(SessionRecord {
                    id: row.try_get("id")?,
                    started_at: row.try_get("started_at")?,
                    ended_at: row.try_get("ended_at")?,
                    status: if status == "ended" {
                        SessionStatus::Ended
                    } else {
                        SessionStatus::Active
                    },
                    language: row.try_get("language")?,
                    metadata: row.try_get("metadata")?,
                })
            }
            None => None,
        })
    }
}
