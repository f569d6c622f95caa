//! End-to-end command-pipeline scenarios against the in-memory services.
//!
//! These drive the confirmation gate and the business engine exactly the way
//! the session manager does, with a scripted extractor output per turn.

use std::sync::Arc;

use dukaan_voice_core::{Customer, ErrorCode, Intent, Language, LedgerEntryType};
use dukaan_voice_engine::{BusinessEngine, ConfirmOutcome, ConfirmationGate, GateDecision, SessionCtx};
use dukaan_voice_nlu::{build_payload, ExtractedCommand};
use dukaan_voice_scheduler::JobQueue;
use dukaan_voice_scheduler::{
    InMemoryJobQueue, LogWhatsApp, Mailer, ReminderScheduler, SchedulerError,
};
use dukaan_voice_store::{DataServices, LedgerStore, MemStore};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), SchedulerError> {
        self.sent.lock().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<MemStore>,
    queue: Arc<InMemoryJobQueue>,
    mailer: Arc<RecordingMailer>,
    engine: BusinessEngine,
    gate: ConfirmationGate,
    ctx: SessionCtx,
}

fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let mailer = Arc::new(RecordingMailer::new());

    let data = DataServices {
        customers: store.clone(),
        products: store.clone(),
        invoices: store.clone(),
        ledger: store.clone(),
        reminders: store.clone(),
        sessions: store.clone(),
        otp: Arc::new(dukaan_voice_store::MemOtpStore::new()),
        cache: Arc::new(dukaan_voice_store::TieredCache::local_only(
            100,
            std::time::Duration::from_secs(300),
        )),
    };
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        store.clone(),
        queue.clone(),
        chrono_tz::Asia::Kolkata,
    ));
    let engine = BusinessEngine::new(
        data,
        scheduler,
        mailer.clone(),
        Arc::new(LogWhatsApp),
        "admin@shop.test".to_string(),
        chrono_tz::Asia::Kolkata,
    );

    let mut ctx = SessionCtx::new("test-session");
    ctx.is_admin = true;

    Harness {
        store,
        queue,
        mailer,
        engine,
        gate: ConfirmationGate::new(),
        ctx,
    }
}

fn command(intent: Intent, confidence: f32, entities: serde_json::Value, raw: &str) -> ExtractedCommand {
    let payload = build_payload(intent, &entities, raw);
    ExtractedCommand {
        normalized: raw.to_string(),
        intent,
        confidence,
        entities,
        payload,
    }
}

fn seed_customer(store: &MemStore, name: &str, phone: &str) -> Customer {
    let mut customer = Customer::new(name);
    customer.phone = Some(phone.to_string());
    store.seed_customer(customer)
}

async fn ledger_balance(store: &MemStore, id: Uuid) -> Decimal {
    LedgerStore::entries(store, id)
        .await
        .unwrap()
        .iter()
        .map(|e| match e.entry_type {
            LedgerEntryType::Debit | LedgerEntryType::OpeningBalance => e.amount,
            LedgerEntryType::Credit => -e.amount,
        })
        .sum()
}

async fn assert_ledger_invariant(store: &Arc<MemStore>, id: Uuid) {
    use dukaan_voice_store::CustomerStore;
    let customer = CustomerStore::get(&**store, id).await.unwrap().unwrap();
    assert_eq!(
        customer.balance,
        ledger_balance(store, id).await,
        "ledger invariant broken for {}",
        customer.name
    );
}

// Scenario 1: balance query, then a pronominal add with auto-execution.
#[tokio::test]
async fn add_credit_with_pronoun_carry_over() {
    let mut h = harness();
    let bharat = seed_customer(&h.store, "Bharat", "9876500001");
    LedgerStore::set_opening_balance(&*h.store, bharat.id, Decimal::from(500))
        .await
        .unwrap();

    // Turn 1: "Bharat ka balance"
    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Bharat"}),
        "Bharat ka balance",
    );
    let GateDecision::Execute(cmd) = h.gate.decide(cmd, Language::Hindi) else {
        panic!("expected auto-execute");
    };
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success);
    assert!(result.message.contains("₹500"), "got: {}", result.message);
    assert_eq!(h.ctx.memory.active_customer().unwrap().id, bharat.id);

    // Turn 2: "usko 300 add karo" — resolves via the active customer
    let cmd = command(
        Intent::AddCredit,
        0.94,
        json!({"amount": 300}),
        "usko 300 add karo",
    );
    let GateDecision::Execute(cmd) = h.gate.decide(cmd, Language::Hindi) else {
        panic!("expected auto-execute: confidence 0.94, amount under the limit");
    };
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("Bharat"));
    assert!(result.message.contains("₹300"));
    assert!(result.message.contains("₹800"));

    assert_ledger_invariant(&h.store, bharat.id).await;
}

// Scenario 2: amounts above ₹5000 confirm; yes executes, no cancels.
#[tokio::test]
async fn large_amount_confirmation_flow() {
    let mut h = harness();
    let rahul = seed_customer(&h.store, "Rahul", "9876500002");

    let cmd = command(
        Intent::AddCredit,
        0.95,
        json!({"customer": "Rahul", "amount": 12000}),
        "Rahul ko 12000 add karo",
    );
    let decision = h.gate.decide(cmd, Language::Hindi);
    let GateDecision::Confirm { prompt } = decision else {
        panic!("expected confirmation for a large amount");
    };
    assert!(prompt.contains("Rahul"));
    assert!(prompt.contains("₹12000"));
    assert!(prompt.contains("Haan ya nahi?"));

    // "haan" releases and executes
    let outcome = h.gate.interpret("haan", Language::Hindi).unwrap();
    let ConfirmOutcome::Proceed(released) = outcome else {
        panic!("expected proceed on haan");
    };
    let result = h.engine.execute(&released, &mut h.ctx).await;
    assert!(result.success);
    assert!(result.message.contains("₹12000"));
    assert_ledger_invariant(&h.store, rahul.id).await;

    // a second large command answered "nahi" leaves the balance untouched
    let cmd = command(
        Intent::AddCredit,
        0.95,
        json!({"customer": "Rahul", "amount": 9000}),
        "Rahul ko 9000 add karo",
    );
    assert!(matches!(
        h.gate.decide(cmd, Language::Hindi),
        GateDecision::Confirm { .. }
    ));
    let outcome = h.gate.interpret("nahi", Language::Hindi).unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Cancelled { .. }));

    use dukaan_voice_store::CustomerStore;
    let refreshed = CustomerStore::get(&*h.store, rahul.id).await.unwrap().unwrap();
    assert_eq!(refreshed.balance, Decimal::from(12000));
}

// Scenario 3: two-phase OTP-gated deletion.
#[tokio::test]
async fn two_phase_delete_cascades() {
    let mut h = harness();
    let suresh = seed_customer(&h.store, "Suresh", "9876500003");
    LedgerStore::set_opening_balance(&*h.store, suresh.id, Decimal::from(700))
        .await
        .unwrap();

    // Phase 1: no OTP yet
    let cmd = command(
        Intent::DeleteCustomerData,
        0.95,
        json!({"customer": "Suresh"}),
        "Suresh ka data delete karo",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success);
    assert!(result.message.contains("admin@shop.test"));
    assert_eq!(result.data.as_ref().unwrap()["status"], "OTP_SENT");

    // the OTP went to the admin inbox
    let sent = h.mailer.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    let otp = sent[0]
        .1
        .split_whitespace()
        .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
        .expect("mail body carries the 6-digit code")
        .to_string();

    // a wrong OTP is refused
    let cmd = command(
        Intent::DeleteCustomerData,
        0.95,
        json!({"customer": "Suresh", "otp": "000000"}),
        "OTP zero zero zero zero zero zero",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::InvalidOtp));

    let cmd = command(
        Intent::DeleteCustomerData,
        0.95,
        json!({"customer": "Suresh", "otp": otp}),
        "OTP confirm",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);

    // subsequent CHECK_BALANCE finds nothing
    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Suresh"}),
        "Suresh ka balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::CustomerNotFound));
}

// Scenario 4: draft invoice, then spoken confirmation.
#[tokio::test]
async fn draft_then_confirm_invoice() {
    let mut h = harness();
    let rahul = seed_customer(&h.store, "Rahul", "9876500004");
    h.store.seed_product("chawal", "kg", Decimal::from(50), 100);
    h.store.seed_product("biscuit", "packet", Decimal::from(20), 50);

    let cmd = command(
        Intent::CreateInvoice,
        0.92,
        json!({
            "customer": "Rahul",
            "items": [
                {"product": "chawal", "quantity": 2, "unit": "kg"},
                {"product": "biscuit", "quantity": 3, "unit": "packet"}
            ]
        }),
        "Rahul ke liye 2 kg chawal aur 3 packet biscuit ka bill banao",
    );
    let GateDecision::Execute(cmd) = h.gate.decide(cmd, Language::Hindi) else {
        panic!("expected auto-execute");
    };
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("draft bill"));
    assert!(result.message.contains("₹160"));
    assert!(result.message.contains("Confirm karna hai?"));

    // stock and ledger moved at draft time to avoid double reservation
    use dukaan_voice_store::{CustomerStore, ProductStore};
    let chawal = ProductStore::find_by_name(&*h.store, "chawal").await.unwrap().unwrap();
    assert_eq!(chawal.stock, 98);
    let refreshed = CustomerStore::get(&*h.store, rahul.id).await.unwrap().unwrap();
    assert_eq!(refreshed.balance, Decimal::from(160));

    // "haan" → CONFIRM_INVOICE, no further ledger movement
    let cmd = command(Intent::ConfirmInvoice, 0.95, json!({}), "haan confirm karo");
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);

    let refreshed = CustomerStore::get(&*h.store, rahul.id).await.unwrap().unwrap();
    assert_eq!(refreshed.balance, Decimal::from(160));
    assert_ledger_invariant(&h.store, rahul.id).await;
}

// Scenario 5: two drafts for different customers need disambiguation.
#[tokio::test]
async fn multi_draft_disambiguation() {
    let mut h = harness();
    seed_customer(&h.store, "Rahul", "9876500005");
    seed_customer(&h.store, "Mohan", "9876500006");
    h.store.seed_product("chawal", "kg", Decimal::from(50), 100);

    for name in ["Rahul", "Mohan"] {
        let cmd = command(
            Intent::CreateInvoice,
            0.92,
            json!({"customer": name, "items": [{"product": "chawal", "quantity": 1}]}),
            "bill banao",
        );
        let result = h.engine.execute(&cmd, &mut h.ctx).await;
        assert!(result.success, "{}", result.message);
    }

    // bare "confirm karo": the server lists both drafts
    let cmd = command(Intent::ConfirmInvoice, 0.95, json!({}), "confirm karo");
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::MultiplePendingInvoices));
    assert!(result.message.contains("Rahul"));
    assert!(result.message.contains("Mohan"));

    // "Rahul ka confirm karo" confirms Rahul's; Mohan's stays a draft
    let cmd = command(
        Intent::ConfirmInvoice,
        0.95,
        json!({"customer": "Rahul"}),
        "Rahul ka confirm karo",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);

    let drafts = dukaan_voice_store::InvoiceStore::drafts_for_session(&*h.store, "test-session")
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
    use dukaan_voice_store::CustomerStore;
    let remaining = CustomerStore::get(&*h.store, drafts[0].customer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.name, "Mohan");
}

// Scenario 6: language switch short-circuits; later replies keep Latin names.
#[tokio::test]
async fn language_switch_mid_session() {
    let mut h = harness();
    seed_customer(&h.store, "Rahul", "9876500007");

    let cmd = command(
        Intent::SwitchLanguage,
        0.9,
        json!({"language": "tamil"}),
        "switch to Tamil",
    );
    let decision = h.gate.decide(cmd, Language::Hindi);
    let GateDecision::SwitchLanguage { language, ack } = decision else {
        panic!("expected language switch");
    };
    assert_eq!(language, Language::Tamil);
    assert!(!ack.is_empty());
    h.ctx.language = language;

    // customer names and amounts stay Latin in the new language
    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Rahul"}),
        "Rahul balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success);
    assert!(result.message.contains("Rahul"));
    assert!(result.message.contains('₹'));
}

// Round-trip law: draft + cancel restores stock and balance exactly.
#[tokio::test]
async fn draft_cancel_round_trip() {
    let mut h = harness();
    let rahul = seed_customer(&h.store, "Rahul", "9876500008");
    h.store.seed_product("chawal", "kg", Decimal::from(50), 10);

    let cmd = command(
        Intent::CreateInvoice,
        0.92,
        json!({"customer": "Rahul", "items": [{"product": "chawal", "quantity": 4}]}),
        "bill banao",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success);

    let cmd = command(
        Intent::CancelInvoice,
        0.95,
        json!({"customer": "Rahul"}),
        "Rahul ka bill cancel karo",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);

    use dukaan_voice_store::{CustomerStore, ProductStore};
    let chawal = ProductStore::find_by_name(&*h.store, "chawal").await.unwrap().unwrap();
    assert_eq!(chawal.stock, 10);
    let refreshed = CustomerStore::get(&*h.store, rahul.id).await.unwrap().unwrap();
    assert_eq!(refreshed.balance, Decimal::ZERO);
    assert_ledger_invariant(&h.store, rahul.id).await;
}

// Reminder round trip: schedule leaves one job, cancel leaves none.
#[tokio::test]
async fn reminder_schedule_cancel_round_trip() {
    let mut h = harness();
    seed_customer(&h.store, "Bharat", "9876500009");

    let cmd = command(
        Intent::CreateReminder,
        0.92,
        json!({"customer": "Bharat", "amount": 500, "when": "kal 7 baje"}),
        "Bharat ko kal 7 baje 500 ka reminder",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(h.queue.pending_len().await.unwrap(), 1);

    let cmd = command(
        Intent::CancelReminder,
        0.95,
        json!({"customer": "Bharat"}),
        "Bharat ka reminder cancel karo",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(h.queue.pending_len().await.unwrap(), 0);
}

// Resolution: fuzzy variants reuse the ring; unknown names fail cleanly.
#[tokio::test]
async fn fuzzy_resolution_and_disambiguation() {
    let mut h = harness();
    seed_customer(&h.store, "Bharat", "9876500010");

    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Bharat"}),
        "Bharat ka balance",
    );
    assert!(h.engine.execute(&cmd, &mut h.ctx).await.success);

    // "Bharath" must not become a second person
    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Bharath"}),
        "Bharath ka balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(h.ctx.memory.ring().len(), 1);

    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Kishore"}),
        "Kishore ka balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::CustomerNotFound));
}

// Cached balance reads never survive a ledger write.
#[tokio::test]
async fn balance_cache_invalidated_by_writes() {
    let mut h = harness();
    let bharat = seed_customer(&h.store, "Bharat", "9876500013");
    LedgerStore::set_opening_balance(&*h.store, bharat.id, Decimal::from(500))
        .await
        .unwrap();

    // first read populates balance:{id}
    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Bharat"}),
        "Bharat ka balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.message.contains("₹500"), "got: {}", result.message);

    // a write invalidates it; the next read must see the new balance
    let cmd = command(
        Intent::AddCredit,
        0.94,
        json!({"customer": "Bharat", "amount": 100}),
        "Bharat ko 100 add karo",
    );
    assert!(h.engine.execute(&cmd, &mut h.ctx).await.success);

    let cmd = command(
        Intent::CheckBalance,
        0.95,
        json!({"customer": "Bharat"}),
        "Bharat ka balance",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.message.contains("₹600"), "got: {}", result.message);

    // the list snapshot is customer:* too, so it also reflects the write
    let cmd = command(Intent::ListCustomerBalances, 0.95, json!({}), "sabka balance batao");
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success);
    assert!(result.message.contains("₹600"), "got: {}", result.message);
}

// Non-admin callers cannot reach the deletion path at all.
#[tokio::test]
async fn delete_requires_admin() {
    let mut h = harness();
    h.ctx.is_admin = false;
    seed_customer(&h.store, "Suresh", "9876500011");

    let cmd = command(
        Intent::DeleteCustomerData,
        0.95,
        json!({"customer": "Suresh"}),
        "Suresh ka data delete karo",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::Authentication));
    assert!(h.mailer.sent.lock().is_empty());
}

// Payment mode is mandatory for RECORD_PAYMENT.
#[tokio::test]
async fn payment_requires_mode() {
    let mut h = harness();
    seed_customer(&h.store, "Mohan", "9876500012");

    let cmd = command(
        Intent::RecordPayment,
        0.95,
        json!({"customer": "Mohan", "amount": 200}),
        "Mohan ne 200 diye",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert_eq!(result.error, Some(ErrorCode::Validation));

    let cmd = command(
        Intent::RecordPayment,
        0.95,
        json!({"customer": "Mohan", "amount": 200, "paymentMode": "upi"}),
        "Mohan ne 200 diye upi se",
    );
    let result = h.engine.execute(&cmd, &mut h.ctx).await;
    assert!(result.success, "{}", result.message);
}
