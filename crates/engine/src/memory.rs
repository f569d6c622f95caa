//! Conversation memory
//!
//! Two bounded structures per session: the turn ring (last 20 user/assistant
//! messages, oldest evicted) and the customer ring (last 10 referenced
//! customers, least-recently-mentioned evicted). The most recently
//! referenced customer is the *active* customer and resolves pronominal
//! references; the one before it is the *previous* customer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dukaan_voice_core::Intent;
use dukaan_voice_nlu::{NameMatcher, DEFAULT_MATCH_THRESHOLD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Turn ring capacity.
pub const MAX_TURNS: usize = 20;

/// Customer ring capacity.
pub const MAX_CUSTOMERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub intent: Option<Intent>,
    pub at: DateTime<Utc>,
}

/// A customer the session has referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionedCustomer {
    pub id: Uuid,
    pub display_name: String,
}

/// Bounded per-session conversation memory.
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    /// Most-recently-mentioned first.
    customers: Vec<MentionedCustomer>,
    matcher: NameMatcher,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self {
            turns: VecDeque::with_capacity(MAX_TURNS),
            customers: Vec::with_capacity(MAX_CUSTOMERS),
            matcher: NameMatcher::new(),
        }
    }

    pub fn add_user_message(&mut self, text: &str, intent: Option<Intent>) {
        self.push_turn(Turn {
            role: TurnRole::User,
            text: text.to_string(),
            intent,
            at: Utc::now(),
        });
    }

    pub fn add_assistant_message(&mut self, text: &str) {
        self.push_turn(Turn {
            role: TurnRole::Assistant,
            text: text.to_string(),
            intent: None,
            at: Utc::now(),
        });
    }

    fn push_turn(&mut self, turn: Turn) {
        if self.turns.len() == MAX_TURNS {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Promote a customer to active. A mention of a name that fuzzily
    /// matches an existing ring entry collapses onto it instead of creating
    /// a duplicate; the ring evicts its least-recently-mentioned entry at
    /// capacity.
    pub fn set_active_customer(&mut self, id: Uuid, display_name: &str) {
        if let Some(pos) = self.customers.iter().position(|c| c.id == id) {
            let mut entry = self.customers.remove(pos);
            // keep the freshest spelling the operator used
            entry.display_name = display_name.to_string();
            self.customers.insert(0, entry);
            return;
        }

        self.customers.insert(
            0,
            MentionedCustomer {
                id,
                display_name: display_name.to_string(),
            },
        );
        self.customers.truncate(MAX_CUSTOMERS);
    }

    /// The active (most recently referenced) customer.
    pub fn active_customer(&self) -> Option<&MentionedCustomer> {
        self.customers.first()
    }

    /// The customer referenced just before the active one.
    pub fn previous_customer(&self) -> Option<&MentionedCustomer> {
        self.customers.get(1)
    }

    /// Make the previous customer active again ("pichla customer").
    pub fn switch_to_previous(&mut self) -> Option<&MentionedCustomer> {
        if self.customers.len() < 2 {
            return None;
        }
        self.customers.swap(0, 1);
        self.customers.first()
    }

    /// Reuse a ring entry by fuzzy name before going to the database.
    pub fn switch_to_customer_by_name(&mut self, query: &str) -> Option<MentionedCustomer> {
        let (pos, _) = self
            .customers
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                self.matcher
                    .matches(query, &c.display_name, DEFAULT_MATCH_THRESHOLD)
                    .map(|m| (i, m.score))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        let entry = self.customers.remove(pos);
        self.customers.insert(0, entry);
        self.customers.first().cloned()
    }

    /// Everyone currently in the ring, most recent first.
    pub fn ring(&self) -> &[MentionedCustomer] {
        &self.customers
    }

    /// Formatted context for prompt injection. Flags the active customer
    /// distinctly from earlier mentions.
    pub fn formatted_context(&self, last_k: usize) -> String {
        let mut out = String::new();

        if let Some(active) = self.active_customer() {
            out.push_str(&format!("Active customer: {}\n", active.display_name));
        }
        if self.customers.len() > 1 {
            let others: Vec<&str> = self.customers[1..]
                .iter()
                .map(|c| c.display_name.as_str())
                .collect();
            out.push_str(&format!("Previously discussed: {}\n", others.join(", ")));
        }

        let skip = self.turns.len().saturating_sub(last_k);
        for turn in self.turns.iter().skip(skip) {
            let speaker = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            out.push_str(&format!("{speaker}: {}\n", turn.text));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_with(names: &[&str]) -> ConversationMemory {
        let mut memory = ConversationMemory::new();
        for name in names {
            memory.set_active_customer(Uuid::new_v4(), name);
        }
        memory
    }

    #[test]
    fn turn_ring_evicts_oldest() {
        let mut memory = ConversationMemory::new();
        for i in 0..25 {
            memory.add_user_message(&format!("message {i}"), None);
        }
        assert_eq!(memory.turn_count(), MAX_TURNS);
        assert_eq!(memory.turns().next().unwrap().text, "message 5");
    }

    #[test]
    fn customer_ring_evicts_least_recent() {
        let memory = mem_with(&[
            "c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9", "c10",
        ]);
        assert_eq!(memory.ring().len(), MAX_CUSTOMERS);
        assert_eq!(memory.active_customer().unwrap().display_name, "c10");
        // c0 fell off
        assert!(!memory.ring().iter().any(|c| c.display_name == "c0"));
    }

    #[test]
    fn active_and_previous_track_mentions() {
        let mut memory = ConversationMemory::new();
        let rahul = Uuid::new_v4();
        let mohan = Uuid::new_v4();
        memory.set_active_customer(rahul, "Rahul");
        memory.set_active_customer(mohan, "Mohan");

        assert_eq!(memory.active_customer().unwrap().id, mohan);
        assert_eq!(memory.previous_customer().unwrap().id, rahul);

        memory.switch_to_previous();
        assert_eq!(memory.active_customer().unwrap().id, rahul);
        assert_eq!(memory.previous_customer().unwrap().id, mohan);
    }

    #[test]
    fn remention_promotes_without_duplicating() {
        let mut memory = ConversationMemory::new();
        let rahul = Uuid::new_v4();
        memory.set_active_customer(rahul, "Rahul");
        memory.set_active_customer(Uuid::new_v4(), "Mohan");
        memory.set_active_customer(rahul, "Rahul bhai");

        assert_eq!(memory.ring().len(), 2);
        assert_eq!(memory.active_customer().unwrap().id, rahul);
        assert_eq!(memory.active_customer().unwrap().display_name, "Rahul bhai");
    }

    #[test]
    fn fuzzy_switch_reuses_ring_entry() {
        let mut memory = ConversationMemory::new();
        let bharat = Uuid::new_v4();
        memory.set_active_customer(bharat, "Bharat");
        memory.set_active_customer(Uuid::new_v4(), "Mohan");

        // "Bharath" is a phonetic variant, not a new customer
        let hit = memory.switch_to_customer_by_name("Bharath").unwrap();
        assert_eq!(hit.id, bharat);
        assert_eq!(memory.active_customer().unwrap().id, bharat);

        // an unrelated name finds nothing
        assert!(memory.switch_to_customer_by_name("Suresh").is_none());
    }

    #[test]
    fn context_flags_active_customer() {
        let mut memory = ConversationMemory::new();
        memory.set_active_customer(Uuid::new_v4(), "Rahul");
        memory.set_active_customer(Uuid::new_v4(), "Mohan");
        memory.add_user_message("Mohan ka balance", Some(Intent::CheckBalance));
        memory.add_assistant_message("Mohan ka balance ₹500 hai.");

        let context = memory.formatted_context(10);
        assert!(context.contains("Active customer: Mohan"));
        assert!(context.contains("Previously discussed: Rahul"));
        assert!(context.contains("User: Mohan ka balance"));
    }

    #[test]
    fn sessions_do_not_share_memory() {
        let mut a = ConversationMemory::new();
        let mut b = ConversationMemory::new();
        a.add_user_message("only in a", None);
        b.add_user_message("only in b", None);
        assert!(!a.formatted_context(10).contains("only in b"));
        assert!(!b.formatted_context(10).contains("only in a"));
    }
}
