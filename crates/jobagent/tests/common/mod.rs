#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jobagent::broker::{MemoryBroker, TaskBroker};
use jobagent::dispatcher::{Dispatcher, DispatcherSettings};
use jobagent::external::{
    DocumentStore, RoleDetails, RoleScraper, StaticDocumentStore, StaticScraper,
};
use jobagent::hitl::HitlController;
use jobagent::notify::{MemorySmsGateway, SmsGateway};
use jobagent::security::CredentialCipher;
use jobagent::store::{ApplicationStore, MemoryStore, NewRole};

pub const USER_NUMBER: &str = "+15550001111";

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub hitl: HitlController,
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub sms: Arc<MemorySmsGateway>,
    pub scraper: Arc<StaticScraper>,
    pub cipher: CredentialCipher,
    pub profile_id: i64,
    pub role_id: i64,
}

pub fn test_cipher() -> CredentialCipher {
    CredentialCipher::from_bytes([7u8; 32])
}

/// Memory-backed dispatcher with one profile, one role and stored
/// credentials for the role's host.
pub async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let sms = Arc::new(MemorySmsGateway::new(USER_NUMBER));
    let scraper = Arc::new(StaticScraper::new());
    let cipher = test_cipher();

    let profile_id = store
        .upsert_profile(
            "Staff engineer, distributed systems",
            "Ten years building event-driven backends.",
        )
        .await
        .unwrap();

    for (key, value) in [
        ("name", "Ada Lovelace"),
        ("first_name", "Ada"),
        ("last_name", "Lovelace"),
        ("email", "ada@example.com"),
        ("phone", USER_NUMBER),
        ("experience_years", "10"),
        ("salary_expectation", "$170,000"),
        ("availability", "Two weeks notice"),
    ] {
        store.set_preference(profile_id, key, value).await.unwrap();
    }

    let (role, _) = store
        .upsert_role(NewRole {
            title: "Senior Backend Engineer".into(),
            description: "Own the order pipeline.".into(),
            posting_url: "https://boards.example.com/jobs/42".into(),
            company_name: "Acme Corp".into(),
            location: Some("Remote".into()),
            requirements: None,
            salary_range: None,
        })
        .await
        .unwrap();

    let encrypted = cipher.encrypt("hunter2").unwrap();
    store
        .store_credential(profile_id, "boards.example.com", "ada@example.com", &encrypted)
        .await
        .unwrap();

    let store_dyn: Arc<dyn ApplicationStore> = store.clone();
    let broker_dyn: Arc<dyn TaskBroker> = broker.clone();
    let sms_dyn: Arc<dyn SmsGateway> = sms.clone();
    let documents: Arc<dyn DocumentStore> = Arc::new(StaticDocumentStore);
    let scraper_dyn: Arc<dyn RoleScraper> = scraper.clone();

    let dispatcher = Arc::new(Dispatcher::new(
        store_dyn,
        broker_dyn,
        sms_dyn,
        documents,
        scraper_dyn,
        cipher.clone(),
        DispatcherSettings {
            attempts_cap: 3,
            stale_after: Duration::from_secs(600),
            consume_block: Duration::from_millis(50),
        },
    ));
    let hitl = HitlController::new(dispatcher.clone());

    Harness {
        dispatcher,
        hitl,
        store,
        broker,
        sms,
        scraper,
        cipher,
        profile_id,
        role_id: role.id,
    }
}

#[allow(dead_code)]
pub fn sample_posting() -> RoleDetails {
    RoleDetails {
        title: "Platform Engineer".into(),
        company_name: "Initech".into(),
        description: Some("Keep the printers in line.".into()),
        location: Some("Austin, TX".into()),
        requirements: None,
        salary_range: Some("$140,000 - $160,000".into()),
        skills: vec!["Rust".into(), "Postgres".into()],
    }
}
