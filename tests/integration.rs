use std::sync::{Arc, Mutex};

use xcc_client::{DeviceKey, Event, XccClient};

/// Run with: XCC_HOST=192.168.0.50 cargo test --test integration -- --ignored
/// Optional XCC_USER / XCC_PASS, both default to `xcc`.
fn client_from_env(events: Arc<Mutex<Vec<Event>>>) -> XccClient {
    let host = std::env::var("XCC_HOST").expect("XCC_HOST must be set");
    let user = std::env::var("XCC_USER").unwrap_or_else(|_| "xcc".into());
    let pass = std::env::var("XCC_PASS").unwrap_or_else(|_| "xcc".into());
    XccClient::builder(host)
        .credentials(user, pass)
        .on_event(move |event| {
            events.lock().unwrap().push(event.clone());
        })
        .build()
        .expect("client should build")
}

#[tokio::test]
#[ignore]
async fn refresh_against_real_controller() {
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let mut client = client_from_env(events.clone());

    let entities = client.refresh().await.expect("first refresh failed");
    assert!(!entities.is_empty(), "controller should expose entities");
    assert!(
        entities.values().any(|e| e.device == DeviceKey::UnitStatus),
        "STAVJED pages are always present"
    );

    let added = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::EntityAdded { .. }))
        .count();
    assert_eq!(added, client.entities().len());

    client.refresh().await.expect("second refresh failed");
    assert!(client.pages().is_some());
    assert!(client.descriptors().is_some());
    client.shutdown();
}
