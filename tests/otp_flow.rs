#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Full sign-in flows wired over the in-memory store and mocked gateway
//! plus directory, from code request to issued token.

use chrono::{Duration, Utc};
use serde_json::json;
use sezamo::{
    directory::Principal,
    otp::{
        code, ratelimit::rate_key, Channel, IssueRequest, OtpConfig, OtpError, OtpService,
        ProfileChange, ProfileIdentity, ProfileSynchronizer,
    },
    store::{MemoryStore, RecordKind},
    testing::{MockDeliverer, MockDirectory},
};
use std::sync::Arc;

struct Harness {
    store: MemoryStore,
    deliverer: Arc<MockDeliverer>,
    directory: Arc<MockDirectory>,
    service: OtpService<MemoryStore>,
}

fn harness(config: OtpConfig) -> Harness {
    let store = MemoryStore::new();
    let deliverer = Arc::new(MockDeliverer::new());
    let directory = Arc::new(MockDirectory::new());
    let service = OtpService::new(
        store.clone(),
        deliverer.clone(),
        directory.clone(),
        directory.clone(),
        config,
    );
    Harness {
        store,
        deliverer,
        directory,
        service,
    }
}

fn phone_request(number: &str) -> IssueRequest {
    IssueRequest {
        channel: Some(Channel::Sms),
        phone_number: Some(number.to_string()),
        email: None,
    }
}

fn email_request(address: &str) -> IssueRequest {
    IssueRequest {
        channel: Some(Channel::Email),
        phone_number: None,
        email: Some(address.to_string()),
    }
}

#[tokio::test]
async fn signs_in_a_new_phone_user_end_to_end() {
    let h = harness(OtpConfig::new().with_default_calling_code("227"));

    let issued = h.service.request_code(phone_request("90 12 34 56")).await.unwrap();
    assert_eq!(issued.channel, Channel::Sms);
    assert_eq!(issued.masked_target, "+***3456");
    assert_eq!(issued.expires_in_secs, 300);
    assert_eq!(issued.resend_after_secs, 30);

    // The code travels only through the gateway.
    let sent = h.deliverer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, "+22790123456");
    assert_eq!(sent[0].code.len(), 6);
    assert!(sent[0].code.chars().all(|c| c.is_ascii_digit()));

    let code = h.deliverer.last_code().unwrap();
    let outcome = h.service.verify_code(&issued.challenge_id, &code).await.unwrap();
    assert_eq!(outcome.uid, "uid-1");
    assert_eq!(outcome.custom_token, "token-uid-1");
    assert!(outcome.is_new_user);
    assert_eq!(outcome.channel, Channel::Sms);

    // Directory identity was created with the normalized number.
    let principals = h.directory.principals();
    assert_eq!(principals.len(), 1);
    assert_eq!(principals[0].phone_number.as_deref(), Some("+22790123456"));
    assert!(!principals[0].email_verified);

    // Profile document landed under the uid with the defaults.
    let profile = h.store.get(RecordKind::Profiles, "uid-1").unwrap();
    assert_eq!(profile["phoneNumber"], "+22790123456");
    assert_eq!(profile["role"], "customer");
    assert_eq!(profile["status"], "active");
    assert_eq!(profile["isMerchant"], false);
    assert_eq!(profile["freeUsageCount"], 0);

    // Challenge reached its terminal state.
    let challenge = h
        .store
        .get(RecordKind::Challenges, &issued.challenge_id)
        .unwrap();
    assert_eq!(challenge["status"], "verified");
}

#[tokio::test]
async fn email_sign_in_reuses_and_verifies_an_existing_identity() {
    let h = harness(OtpConfig::new());
    h.directory.seed(Principal {
        uid: "uid-7".to_string(),
        phone_number: None,
        email: Some("ada@example.com".to_string()),
        email_verified: false,
    });

    let issued = h
        .service
        .request_code(email_request("Ada@Example.com"))
        .await
        .unwrap();
    assert_eq!(issued.channel, Channel::Email);
    assert_eq!(issued.masked_target, "ad***@example.com");

    let code = h.deliverer.last_code().unwrap();
    let outcome = h.service.verify_code(&issued.challenge_id, &code).await.unwrap();
    assert_eq!(outcome.uid, "uid-7");
    assert!(!outcome.is_new_user);

    // Proving inbox ownership upgraded the directory record.
    assert!(h.directory.principal("uid-7").unwrap().email_verified);

    let profile = h.store.get(RecordKind::Profiles, "uid-7").unwrap();
    assert_eq!(profile["email"], "ada@example.com");
    assert!(profile.get("phoneNumber").is_none());
}

#[tokio::test]
async fn concurrent_verifies_release_exactly_one_success() {
    let h = harness(OtpConfig::new().with_default_calling_code("227"));

    let issued = h.service.request_code(phone_request("90123456")).await.unwrap();
    let code = h.deliverer.last_code().unwrap();

    let service = Arc::new(h.service);
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        let id = issued.challenge_id.clone();
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            service.verify_code(&id, &code).await
        }));
    }

    let mut successes = 0;
    let mut preconditions = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                successes += 1;
                assert_eq!(outcome.uid, "uid-1");
            }
            Err(OtpError::FailedPrecondition(_)) => preconditions += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(preconditions, 7);

    // Exactly one provisioning round despite eight racers.
    assert_eq!(h.directory.principals().len(), 1);
    assert_eq!(h.directory.issued().len(), 1);
}

#[tokio::test]
async fn wrong_codes_burn_the_attempt_budget_then_lock() {
    let h = harness(OtpConfig::new().with_default_calling_code("227"));

    let issued = h.service.request_code(phone_request("90123456")).await.unwrap();
    let code = h.deliverer.last_code().unwrap();
    let wrong = if code == "000000" { "999999" } else { "000000" };

    for _ in 0..4 {
        let err = h
            .service
            .verify_code(&issued.challenge_id, wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, OtpError::InvalidArgument(_)));
    }

    // The fifth wrong attempt spends the last of the budget and locks.
    let err = h
        .service
        .verify_code(&issued.challenge_id, wrong)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OtpError::ResourceExhausted {
            retry_after_secs: None,
            ..
        }
    ));

    let challenge = h
        .store
        .get(RecordKind::Challenges, &issued.challenge_id)
        .unwrap();
    assert_eq!(challenge["status"], "locked");

    // Even the right code is refused now.
    let err = h
        .service
        .verify_code(&issued.challenge_id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, OtpError::FailedPrecondition(_)));
}

#[tokio::test]
async fn expired_challenges_refuse_even_the_right_code() {
    let h = harness(OtpConfig::new());

    let id = "01JC0000000000000000000EXP";
    let code = "042617";
    let (salt, code_hash) = code::hash(id, code);
    let now = Utc::now();
    h.store.seed(
        RecordKind::Challenges,
        id,
        json!({
            "id": id,
            "channel": "sms",
            "target": "+22790123456",
            "codeHash": code_hash,
            "salt": salt,
            "status": "pending",
            "attempts": 0,
            "maxAttempts": 5,
            "expiresAt": now - Duration::seconds(1),
            "createdAt": now - Duration::seconds(301),
            "updatedAt": now - Duration::seconds(301),
        }),
    );

    let err = h.service.verify_code(id, code).await.unwrap_err();
    assert!(matches!(err, OtpError::DeadlineExceeded));

    // Expiry is recorded on the document, not just reported.
    let challenge = h.store.get(RecordKind::Challenges, id).unwrap();
    assert_eq!(challenge["status"], "expired");

    let err = h.service.verify_code(id, code).await.unwrap_err();
    assert!(matches!(err, OtpError::FailedPrecondition(_)));
}

#[tokio::test]
async fn rate_window_blocks_the_sixth_code_until_the_lock_lapses() {
    let h = harness(OtpConfig::new().with_default_calling_code("227"));

    for _ in 0..5 {
        h.service.request_code(phone_request("90123456")).await.unwrap();
    }
    assert_eq!(h.deliverer.sent().len(), 5);

    let err = h
        .service
        .request_code(phone_request("90123456"))
        .await
        .unwrap_err();
    match err {
        OtpError::ResourceExhausted {
            retry_after_secs, ..
        } => assert_eq!(retry_after_secs, Some(1800)),
        other => panic!("unexpected error: {other:?}"),
    }
    // Nothing went out for the blocked request.
    assert_eq!(h.deliverer.sent().len(), 5);

    // Spacing inside the number must not open a second budget.
    let err = h
        .service
        .request_code(phone_request("+227 90 12 34 56"))
        .await
        .unwrap_err();
    assert!(matches!(err, OtpError::ResourceExhausted { .. }));

    // Rewind the record as if the lockout and the window had lapsed.
    let key = rate_key(Channel::Sms, "+22790123456");
    let mut record = h.store.get(RecordKind::RateLimits, &key).unwrap();
    let past = Utc::now() - Duration::seconds(1);
    let stale = Utc::now() - Duration::seconds(601);
    record["blockedUntil"] = json!(past);
    record["windowStartedAt"] = json!(stale);
    h.store.seed(RecordKind::RateLimits, &key, record);

    let issued = h.service.request_code(phone_request("90123456")).await.unwrap();
    assert_eq!(issued.channel, Channel::Sms);
    assert_eq!(h.deliverer.sent().len(), 6);
}

#[tokio::test]
async fn profile_backfill_is_idempotent() {
    let store = MemoryStore::new();
    let profiles = ProfileSynchronizer::new(store.clone());

    let phone = ProfileIdentity {
        phone_number: Some("+22790123456".to_string()),
        email: None,
    };
    let email = ProfileIdentity {
        phone_number: None,
        email: Some("ada@example.com".to_string()),
    };

    assert_eq!(
        profiles.ensure("uid-1", &phone).await.unwrap(),
        ProfileChange::Created
    );
    assert_eq!(
        profiles.ensure("uid-1", &email).await.unwrap(),
        ProfileChange::Updated
    );

    // A second pass over both identities changes nothing.
    assert_eq!(
        profiles.ensure("uid-1", &phone).await.unwrap(),
        ProfileChange::Unchanged
    );
    assert_eq!(
        profiles.ensure("uid-1", &email).await.unwrap(),
        ProfileChange::Unchanged
    );

    let profile = store.get(RecordKind::Profiles, "uid-1").unwrap();
    assert_eq!(profile["phoneNumber"], "+22790123456");
    assert_eq!(profile["email"], "ada@example.com");
}

#[tokio::test]
async fn provisioning_failure_still_spends_the_code() {
    let h = harness(OtpConfig::new().with_default_calling_code("227"));

    let issued = h.service.request_code(phone_request("90123456")).await.unwrap();
    let code = h.deliverer.last_code().unwrap();

    h.directory.set_fail_lookups(true);
    let err = h
        .service
        .verify_code(&issued.challenge_id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, OtpError::Internal(_)));

    // The code matched before the directory call, so the challenge is spent.
    let challenge = h
        .store
        .get(RecordKind::Challenges, &issued.challenge_id)
        .unwrap();
    assert_eq!(challenge["status"], "verified");

    h.directory.set_fail_lookups(false);
    let err = h
        .service
        .verify_code(&issued.challenge_id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, OtpError::FailedPrecondition(_)));
}
