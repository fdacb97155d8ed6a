mod common;

use std::time::Duration;

use common::Harness;
use music_board::backend::{Backend, Credentials};
use music_board::{Error, FetchOptions, FilterOp};
use serde_json::json;
use tokio::time::timeout;

const EMAIL: &str = "drummer@band.test";
const PASSWORD: &str = "paradiddle";

#[tokio::test]
async fn sign_in_publishes_the_user() {
    let harness = Harness::new();
    let client = &harness.client;
    client.sign_up(EMAIL, PASSWORD).await.unwrap();
    let mut watcher = client.watch_user();

    let response = client.sign_in(EMAIL, PASSWORD).await.unwrap();

    let user = response.user.unwrap();
    assert_eq!(user.email.as_deref(), Some(EMAIL));
    assert!(client.is_authenticated());
    assert_eq!(client.user(), Some(user.clone()));
    assert!(watcher.has_changed().unwrap());
    assert_eq!(*watcher.borrow_and_update(), Some(user));
    assert_eq!(client.last_error(), None);
}

#[tokio::test]
async fn sign_up_leaves_the_shared_user_to_the_listener() {
    let harness = Harness::new();
    let response = harness.client.sign_up(EMAIL, PASSWORD).await.unwrap();

    assert!(response.session.is_some());
    assert!(!harness.client.is_authenticated());
}

#[tokio::test]
async fn bad_credentials_are_returned_and_recorded() {
    let harness = Harness::new();
    let client = &harness.client;
    client.sign_up(EMAIL, PASSWORD).await.unwrap();

    let err = client.sign_in(EMAIL, "wrong-password").await.unwrap_err();

    assert!(matches!(err, Error::Auth { .. }));
    assert_eq!(err.to_string(), "Invalid login credentials");
    assert_eq!(client.last_error().as_deref(), Some("Invalid login credentials"));
    assert_eq!(client.user(), None);
    assert!(!client.is_busy());
}

#[tokio::test]
async fn get_current_user_swallows_failures() {
    let harness = Harness::new();
    harness.backend.break_auth();

    assert_eq!(harness.client.get_current_user().await, None);
    assert_eq!(
        harness.client.last_error().as_deref(),
        Some("Auth service unreachable")
    );
    assert_eq!(harness.client.in_flight(), 0);
}

#[tokio::test]
async fn sign_out_failure_is_recorded_not_returned() {
    let harness = Harness::new();
    let client = &harness.client;
    client.sign_up(EMAIL, PASSWORD).await.unwrap();
    client.sign_in(EMAIL, PASSWORD).await.unwrap();

    harness.backend.break_auth();
    client.sign_out().await;

    assert_eq!(client.last_error().as_deref(), Some("Auth service unreachable"));
    assert!(client.is_authenticated());

    harness.backend.heal();
    client.sign_out().await;
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn auth_listener_follows_backend_events() {
    let harness = Harness::new();
    let client = &harness.client;
    let subscription = client.init_auth();
    assert!(subscription.is_active());
    let mut watcher = client.watch_user();

    harness
        .backend
        .sign_up(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();
    let signed_in = timeout(
        Duration::from_secs(2),
        watcher.wait_for(|user| user.is_some()),
    )
    .await
    .expect("listener saw sign-in")
    .unwrap()
    .clone();
    assert_eq!(signed_in.unwrap().email.as_deref(), Some(EMAIL));

    harness.backend.sign_out().await.unwrap();
    timeout(
        Duration::from_secs(2),
        watcher.wait_for(|user| user.is_none()),
    )
    .await
    .expect("listener saw sign-out")
    .unwrap();

    subscription.unsubscribe();
}

#[tokio::test]
async fn auth_listener_probes_the_existing_session() {
    let harness = Harness::new();
    harness
        .backend
        .sign_up(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();

    let _subscription = harness.client.init_auth();
    let mut watcher = harness.client.watch_user();
    timeout(
        Duration::from_secs(2),
        watcher.wait_for(|user| user.is_some()),
    )
    .await
    .expect("probe found the session")
    .unwrap();
}

#[tokio::test]
async fn dropped_subscription_stops_listening() {
    let harness = Harness::new();
    let subscription = harness.client.init_auth();
    tokio::task::yield_now().await;
    drop(subscription);

    harness
        .backend
        .sign_up(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.client.user(), None);
}

#[tokio::test]
async fn table_operations_round_trip_through_the_backend() {
    let harness = Harness::new();
    let client = &harness.client;

    let inserted = client
        .insert_data(
            "songs",
            &json!({"title": "Anthem", "artist": "Us", "duration": "4:00", "key": "D", "bpm": 90}),
        )
        .await
        .unwrap();
    let id = inserted[0]["id"].as_i64().unwrap();

    let updated = client
        .update_data("songs", id, &json!({"bpm": 96}))
        .await
        .unwrap();
    assert_eq!(updated[0]["bpm"], json!(96));
    assert_eq!(updated[0]["title"], json!("Anthem"));

    let rows = client
        .fetch_data(
            "songs",
            &FetchOptions::new()
                .select("id, title")
                .filter("bpm", FilterOp::Gt, json!(95)),
        )
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"id": id, "title": "Anthem"})]);

    assert!(client.delete_data("songs", id).await.unwrap());
    assert!(client.delete_data("songs", id).await.unwrap());
    let remaining = client.fetch_data("songs", &FetchOptions::new()).await.unwrap();
    assert!(remaining.is_empty());
    assert!(!client.is_busy());
}

#[tokio::test]
async fn failures_are_recorded_and_cleared_by_the_next_call() {
    let harness = Harness::new();
    let client = &harness.client;

    harness.backend.break_table("setlists");
    let err = client
        .fetch_data("setlists", &FetchOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "setlists is unavailable");
    assert_eq!(client.last_error().as_deref(), Some("setlists is unavailable"));
    assert_eq!(client.in_flight(), 0);

    harness.backend.heal();
    client.fetch_data("setlists", &FetchOptions::new()).await.unwrap();
    assert_eq!(client.last_error(), None);

    client.fetch_data("setlists", &FetchOptions::new().select("nope")).await.unwrap_err();
    assert!(client.last_error().is_some());
    client.clear_error();
    assert_eq!(client.last_error(), None);
}

#[tokio::test]
async fn concurrent_calls_keep_the_busy_counter_balanced() {
    let harness = Harness::new();
    let client = &harness.client;
    harness.backend.break_table("songs");

    let options = FetchOptions::new();
    let (songs, setlists) = futures::join!(
        client.fetch_data("songs", &options),
        client.fetch_data("setlists", &options),
    );

    assert!(songs.is_err());
    assert!(setlists.is_ok());
    assert_eq!(client.in_flight(), 0);
    assert_eq!(harness.backend.select_calls(), 2);
}
