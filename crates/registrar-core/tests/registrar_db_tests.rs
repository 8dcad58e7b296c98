//! Tests for the registrar database with in-process storage
//! These tests go through the public facade only, the way the proxy uses it

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rvoip_registrar_core::{
    BindRequest, ContactRegisteredListener, ContactSpec, ExtendedContact, FetchOutcome,
    RegistrarConfig, RegistrarDb, RegistrarError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create_db(max_contacts: usize) -> RegistrarDb {
    init_tracing();
    let config = RegistrarConfig {
        max_contacts,
        ..Default::default()
    };
    RegistrarDb::internal(config).expect("Failed to create registrar")
}

fn register(aor: &str, contact: &str, call_id: &str, cseq: u32) -> BindRequest {
    BindRequest::new(aor, call_id, cseq, 3600).with_contact(ContactSpec::new(contact))
}

fn contact_uris(outcome: &FetchOutcome) -> Vec<String> {
    let mut uris: Vec<String> = outcome
        .record()
        .map(|r| r.contacts().iter().map(|c| c.sip_uri.clone()).collect())
        .unwrap_or_default();
    uris.sort();
    uris
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl ContactRegisteredListener for Recorder {
    fn on_contact_registered(&self, key: &str, contact: &ExtendedContact) {
        self.seen.lock().push((key.to_string(), contact.unique_id.clone()));
    }
}

#[tokio::test]
async fn test_bind_then_fetch() {
    let db = create_db(10);

    let outcome = db
        .bind(&register("sip:alice@example.com", "sip:alice@192.0.2.4:5060", "call-1", 1))
        .await;
    assert!(outcome.is_found());

    let fetched = db.fetch("sip:alice@example.com", false, false).await;
    assert_eq!(contact_uris(&fetched), vec!["sip:alice@192.0.2.4:5060"]);
    assert_eq!(fetched.record().map(|r| r.key().to_string()), Some("alice@example.com".to_string()));

    assert!(matches!(db.fetch("sip:bob@example.com", false, false).await, FetchOutcome::NotFound));
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_refreshed() {
    let db = create_db(2);
    let start = Utc::now();

    for (i, call_id) in ["call-1", "call-2", "call-3"].iter().enumerate() {
        let contact = format!("sip:alice@10.0.0.{}", i + 1);
        let outcome = db
            .bind_at(
                &register("sip:alice@example.com", &contact, call_id, 1),
                start + Duration::seconds(i as i64),
            )
            .await;
        assert!(outcome.is_found(), "bind {} should succeed", i);
    }

    let fetched = db.fetch("sip:alice@example.com", false, false).await;
    assert_eq!(
        contact_uris(&fetched),
        vec!["sip:alice@10.0.0.2", "sip:alice@10.0.0.3"]
    );
}

#[tokio::test]
async fn test_single_request_over_capacity_is_an_error() {
    let db = create_db(2);
    let request = BindRequest::new("sip:alice@example.com", "call-1", 1, 3600)
        .with_contact(ContactSpec::new("sip:alice@10.0.0.1"))
        .with_contact(ContactSpec::new("sip:alice@10.0.0.2"))
        .with_contact(ContactSpec::new("sip:alice@10.0.0.3"));

    assert!(db.check_contact_count(&request).is_err());
    match db.bind(&request).await {
        FetchOutcome::Error(RegistrarError::TooManyContacts { aor, count, max }) => {
            assert_eq!(aor, "sip:alice@example.com");
            assert_eq!(count, 3);
            assert_eq!(max, 2);
        }
        other => panic!("expected TooManyContacts, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refresh_and_out_of_order_register() {
    let db = create_db(10);
    let aor = "sip:alice@example.com";

    assert!(db.bind(&register(aor, "sip:alice@10.0.0.1", "call-1", 5)).await.is_found());

    // Retransmission of an older REGISTER of the same dialog
    let stale = db.bind(&register(aor, "sip:alice@10.0.0.9", "call-1", 4)).await;
    assert!(matches!(stale, FetchOutcome::Invalid(_)));

    // Newer REGISTER of the same dialog replaces the earlier contact
    let refreshed = db.bind(&register(aor, "sip:alice@10.0.0.2", "call-1", 6)).await;
    assert_eq!(contact_uris(&refreshed), vec!["sip:alice@10.0.0.2"]);
}

#[tokio::test]
async fn test_unregister_with_zero_expire() {
    let db = create_db(10);
    let aor = "sip:alice@example.com";

    db.bind(&register(aor, "sip:alice@10.0.0.1", "call-1", 1)).await;
    db.bind(&register(aor, "sip:alice@10.0.0.2", "call-2", 1)).await;

    let request = BindRequest::new(aor, "call-2", 2, 3600)
        .with_contact(ContactSpec::new("sip:alice@10.0.0.2").with_expires(0));
    let outcome = db.bind(&request).await;
    assert_eq!(contact_uris(&outcome), vec!["sip:alice@10.0.0.1"]);

    let wildcard = BindRequest::new(aor, "call-1", 2, 0).with_contact(ContactSpec::new("*"));
    assert!(matches!(db.bind(&wildcard).await, FetchOutcome::NotFound));
    assert!(matches!(db.fetch(aor, false, false).await, FetchOutcome::NotFound));
}

#[tokio::test]
async fn test_clear_respects_cseq() {
    let db = create_db(10);
    let aor = "sip:alice@example.com";
    db.bind(&register(aor, "sip:alice@10.0.0.1", "call-1", 5)).await;

    let stale = db.clear(aor, "call-1", Some(3)).await;
    assert!(matches!(stale, FetchOutcome::Invalid(_)));
    assert!(db.fetch(aor, false, false).await.is_found());

    assert!(matches!(db.clear(aor, "call-1", None).await, FetchOutcome::NotFound));
    assert!(matches!(db.fetch(aor, false, false).await, FetchOutcome::NotFound));
}

#[tokio::test]
async fn test_fetch_including_domains() {
    let db = create_db(10);
    db.bind(&register("sip:alice@example.com", "sip:alice@10.0.0.1", "call-1", 1)).await;
    db.bind(&register("sip:example.com", "sip:gateway@10.0.0.254", "call-2", 1)).await;

    let user_only = db.fetch("sip:alice@example.com", false, false).await;
    assert_eq!(contact_uris(&user_only), vec!["sip:alice@10.0.0.1"]);

    let with_domain = db.fetch("sip:alice@example.com", true, false).await;
    assert_eq!(
        contact_uris(&with_domain),
        vec!["sip:alice@10.0.0.1", "sip:gateway@10.0.0.254"]
    );
    assert_eq!(with_domain.record().map(|r| r.key().to_string()), Some("alice@example.com".to_string()));

    // A user without bindings still reaches the domain registration
    let carol = db.fetch("sip:carol@example.com", true, false).await;
    assert_eq!(contact_uris(&carol), vec!["sip:gateway@10.0.0.254"]);
}

#[tokio::test]
async fn test_global_domain_merges_hosts() {
    let config = RegistrarConfig {
        use_global_domain: true,
        ..Default::default()
    };
    let db = RegistrarDb::internal(config).unwrap();

    db.bind(&register("sip:alice@example.com", "sip:alice@10.0.0.1", "call-1", 1)).await;
    let other_host = db.fetch("sip:alice@example.org", false, false).await;
    assert_eq!(contact_uris(&other_host), vec!["sip:alice@10.0.0.1"]);
    assert_eq!(other_host.record().map(|r| r.key().to_string()), Some("alice@merged".to_string()));
}

#[tokio::test]
async fn test_fetch_list_keeps_order() {
    let db = create_db(10);
    db.bind(&register("sip:bob@example.com", "sip:bob@10.0.0.2", "call-1", 1)).await;

    let outcomes = db
        .fetch_list(&["sip:alice@example.com", "sip:bob@example.com", "garbage"])
        .await;
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], FetchOutcome::NotFound));
    assert!(outcomes[1].is_found());
    assert!(matches!(outcomes[2], FetchOutcome::Invalid(_)));
}

#[tokio::test]
async fn test_listener_notified_on_device_registration() {
    let db = create_db(10);
    let recorder = Arc::new(Recorder::default());
    db.subscribe("alice@example.com", recorder.clone());

    let request = BindRequest::new("sip:alice@example.com", "call-1", 1, 3600).with_contact(
        ContactSpec::new("sip:alice@10.0.0.1")
            .with_instance_id("<urn:uuid:00000000-0000-1000-8000-AABBCCDDEEFF>"),
    );
    assert!(db.bind(&request).await.is_found());

    // No device identity, nobody to wake up
    db.bind(&register("sip:alice@example.com", "sip:alice@10.0.0.2", "call-2", 1)).await;

    {
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "alice@example.com");
        assert_eq!(
            seen[0].1.as_deref(),
            Some("urn:uuid:00000000-0000-1000-8000-AABBCCDDEEFF")
        );
    }

    let called = db
        .notify_contact_listener("alice@example.com", "urn:uuid:00000000-0000-1000-8000-AABBCCDDEEFF")
        .await;
    assert_eq!(called, 1);
    assert_eq!(recorder.seen.lock().len(), 2);
    assert_eq!(db.notify_contact_listener("alice@example.com", "unknown").await, 0);

    assert!(db.unsubscribe("alice@example.com"));
    let before = recorder.seen.lock().len();
    let refresh = BindRequest::new("sip:alice@example.com", "call-1", 2, 3600).with_contact(
        ContactSpec::new("sip:alice@10.0.0.1")
            .with_instance_id("<urn:uuid:00000000-0000-1000-8000-AABBCCDDEEFF>"),
    );
    assert!(db.bind(&refresh).await.is_found());
    assert_eq!(recorder.seen.lock().len(), before);
}

#[tokio::test]
async fn test_alias_registered_through_bind_is_followed() {
    let config = RegistrarConfig {
        max_recursion_steps: 1,
        ..Default::default()
    };
    let db = RegistrarDb::internal(config).unwrap();

    db.bind(&register("sip:bob@example.com", "sip:bob@10.0.0.2", "call-1", 1)).await;
    let alias = BindRequest::new("sip:alice@example.com", "call-2", 1, 3600)
        .with_contact(ContactSpec::new("sip:bob@example.com"))
        .as_alias();
    assert!(db.bind(&alias).await.is_found());

    let direct = db.fetch("sip:alice@example.com", false, false).await;
    assert_eq!(contact_uris(&direct), vec!["sip:bob@example.com"]);

    let resolved = db.fetch("sip:alice@example.com", false, true).await;
    assert_eq!(
        contact_uris(&resolved),
        vec!["sip:bob@10.0.0.2", "sip:bob@example.com"]
    );
}

#[tokio::test]
async fn test_local_actives_follow_preferred_route() {
    let config = RegistrarConfig {
        preferred_route: Some("sip:edge.example.com".to_string()),
        ..Default::default()
    };
    let db = RegistrarDb::internal(config).unwrap();

    let through_us = register("sip:alice@example.com", "sip:alice@10.0.0.1", "call-1", 1)
        .with_path(vec!["<sip:edge.example.com;lr>".to_string()]);
    db.bind(&through_us).await;

    let elsewhere = register("sip:bob@example.com", "sip:bob@10.0.0.2", "call-2", 1)
        .with_path(vec!["<sip:other-edge.example.com;lr>".to_string()]);
    db.bind(&elsewhere).await;

    assert_eq!(db.count_local_actives(), 1);
    assert!(db.local_reg_expire().get("alice@example.com").is_some());

    db.clear("sip:alice@example.com", "call-9", None).await;
    assert_eq!(db.count_local_actives(), 0);
}

#[tokio::test]
async fn test_purge_expired_bindings() {
    let db = create_db(10);
    let past = Utc::now() - Duration::seconds(120);

    let short = BindRequest::new("sip:alice@example.com", "call-1", 1, 60)
        .with_contact(ContactSpec::new("sip:alice@10.0.0.1"));
    assert!(db.bind_at(&short, past).await.is_found());
    assert_eq!(db.count_local_actives(), 1);

    assert_eq!(db.purge_expired(Utc::now()).await, 1);
    assert_eq!(db.count_local_actives(), 0);
    assert!(matches!(db.fetch("sip:alice@example.com", false, false).await, FetchOutcome::NotFound));
}

#[tokio::test]
async fn test_expiry_sweeper_runs_and_stops() {
    let config = RegistrarConfig {
        expiry_check_interval: 1,
        ..Default::default()
    };
    let db = Arc::new(RegistrarDb::internal(config).unwrap());

    let past = Utc::now() - Duration::seconds(120);
    let short = BindRequest::new("sip:alice@example.com", "call-1", 1, 60)
        .with_contact(ContactSpec::new("sip:alice@10.0.0.1"));
    db.bind_at(&short, past).await;
    assert_eq!(db.count_local_actives(), 1);

    let sweeper = db.start_expiry_sweeper();
    // The first tick fires immediately
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert_eq!(db.count_local_actives(), 0);

    sweeper.stop().await;
}
