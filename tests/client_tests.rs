use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xcc_client::{
    password_hash, AuthError, DeviceKey, EntityKind, EntityState, Error, Event, FetchError, PageSet,
    SessionManager, WriteError, XccClient, XccClientBuilder,
};

const COOKIE: &str = "SoftPLC=abc123";

const LOGIN_PAGE: &str =
    r#"<?xml version="1.0" encoding="utf-8"?><LOGIN><USER VALUE=""/><PASS VALUE=""/></LOGIN>"#;

const INDEX_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?><PAGE><INPUT P="VERZE" VALUE="1"/></PAGE>"#;

const TUV_DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<page>
  <row text="Požadovaná teplota" text_en="Requested temperature">
    <number prop="TUVPOZADOVANA" min="30" max="60" step="0.5" unit="°C"/>
  </row>
  <row>
    <switch prop="TUV-POVOLENI" text="Povolení" text_en="Enable"/>
  </row>
</page>"#;

fn tuv_data(requested: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<PAGE>
  <INPUT P="TUVPOZADOVANA" NAME="__R1_REAL_.1f" VALUE="{requested}"/>
  <INPUT P="TUV-POVOLENI" NAME="__R2.0_BOOL_i" VALUE="1"/>
  <INPUT P="TUVTEPLOTA" NAME="__R3_REAL_.1f" VALUE="51.5"/>
</PAGE>"#
    )
}

async fn mount_login(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/LOGIN.XML"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "SoftPLC=abc123; path=/")
                .set_body_string(LOGIN_PAGE),
        )
        .expect(expected)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/RPC/WEBSES/create.asp"))
        .and(header("Cookie", COOKIE))
        .and(body_string_contains("USER=xcc"))
        .and(body_string_contains(format!("PASS={}", password_hash("abc123", "xcc"))))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_tuv_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/tuv1.xml"))
        .and(header("Cookie", COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(TUV_DESCRIPTOR))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .and(header("Cookie", COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
        .mount(server)
        .await;
}

fn host_of(server: &MockServer) -> String {
    let addr = server.address();
    format!("{}:{}", addr.ip(), addr.port())
}

fn builder(server: &MockServer) -> XccClientBuilder {
    XccClient::builder(host_of(server))
        .request_delay(Duration::ZERO)
        .login_backoff(Duration::from_millis(1))
        .timeout(Duration::from_secs(2))
}

fn tuv_pages() -> PageSet {
    PageSet {
        descriptor_pages: vec!["tuv1.xml".into()],
        data_pages: vec!["TUV11.XML".into()],
    }
}

#[tokio::test]
async fn login_sends_hashed_password() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    let client = builder(&server).build().unwrap();
    let session = client.ensure_session().await.expect("login should succeed");
    assert_eq!(session.cookie, "abc123");

    // Second call reuses the in-memory session.
    client.ensure_session().await.unwrap();
    assert_eq!(client.session_manager().session(client.host()), Some(session));
}

#[tokio::test]
async fn rejected_credentials_are_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/LOGIN.XML"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "SoftPLC=abc123")
                .set_body_string(LOGIN_PAGE),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/RPC/WEBSES/create.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let err = client.ensure_session().await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::Rejected { .. })), "got {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn connection_limit_backs_off_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/LOGIN.XML"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Maximum number of connections reached"),
        )
        .expect(4)
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let err = client.ensure_session().await.unwrap_err();
    assert!(
        matches!(err, Error::Auth(AuthError::ConnectionLimit { attempts: 4 })),
        "got {err:?}"
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn connection_limit_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/LOGIN.XML"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Maximum number of connections reached"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_login(&server, 1).await;

    let client = builder(&server).build().unwrap();
    assert_eq!(client.ensure_session().await.unwrap().cookie, "abc123");
}

#[tokio::test]
async fn expired_session_relogs_once_and_retries() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let body = client.fetch_page("TUV11.XML").await.expect("retry should succeed");
    assert!(body.contains("TUVPOZADOVANA"));
}

#[tokio::test]
async fn login_page_after_renewal_is_reauth_failure() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(2)
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let err = client.fetch_page("TUV11.XML").await.unwrap_err();
    assert!(
        matches!(err, Error::Fetch(FetchError::ReauthFailed { ref page }) if page == "TUV11.XML"),
        "got {err:?}"
    );
    assert!(client.session_manager().session(client.host()).is_none());
}

#[tokio::test]
async fn http_error_status_is_reported_with_page() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/MISSING1.XML"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let err = client.fetch_page("MISSING1.XML").await.unwrap_err();
    assert!(
        matches!(err, Error::Fetch(FetchError::Http { status: 404, .. })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn slow_page_times_out_as_retryable() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(tuv_data("48.0"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = builder(&server)
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let err = client.fetch_page("TUV11.XML").await.unwrap_err();
    assert!(matches!(err, Error::Fetch(FetchError::Timeout { .. })), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn cached_cookie_is_reused_without_login() {
    let server = MockServer::start().await;
    mount_login(&server, 0).await;
    Mock::given(method("GET"))
        .and(path("/INDEX.XML"))
        .and(header("Cookie", "SoftPLC=cached1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEX_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .and(header("Cookie", "SoftPLC=cached1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let safe_host = host_of(&server).replace(['.', ':'], "_");
    std::fs::write(
        dir.path().join(format!(".xcc_session_{safe_host}.json")),
        r#"{"SoftPLC": "cached1"}"#,
    )
    .unwrap();

    let client = builder(&server)
        .session_manager(Arc::new(SessionManager::with_cache_dir(dir.path())))
        .build()
        .unwrap();
    client.fetch_page("TUV11.XML").await.expect("cached cookie should work");
}

#[tokio::test]
async fn stale_cached_cookie_falls_back_to_login_and_is_replaced() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/INDEX.XML"))
        .and(header("Cookie", "SoftPLC=old"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let safe_host = host_of(&server).replace(['.', ':'], "_");
    let cache_file = dir.path().join(format!(".xcc_session_{safe_host}.json"));
    std::fs::write(&cache_file, r#"{"SoftPLC": "old"}"#).unwrap();

    let client = builder(&server)
        .session_manager(Arc::new(SessionManager::with_cache_dir(dir.path())))
        .build()
        .unwrap();
    assert_eq!(client.ensure_session().await.unwrap().cookie, "abc123");

    let stored = std::fs::read_to_string(&cache_file).unwrap();
    assert!(stored.contains("abc123"));
}

#[tokio::test]
async fn clients_sharing_a_manager_log_in_once() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/INDEX.XML"))
        .and(header("Cookie", COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEX_PAGE))
        .mount(&server)
        .await;

    let manager = Arc::new(SessionManager::new());
    let a = builder(&server).session_manager(manager.clone()).build().unwrap();
    let b = builder(&server).session_manager(manager.clone()).build().unwrap();

    let (first, second) = tokio::join!(a.ensure_session(), b.ensure_session());
    assert_eq!(first.unwrap().cookie, "abc123");
    assert_eq!(second.unwrap().cookie, "abc123");
}

#[tokio::test]
async fn discovery_probes_candidates_from_page_tree() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    let tree = r#"<?xml version="1.0" encoding="utf-8"?>
<PAGE>
  <F N="1" U="okruh.xml?page=0">
    <INPUTV NAME="__R44907.0_BOOL_i" VALUE="1"/>
    <INPUTN NAME="__R44979_STRING[15]_s" VALUE="Radiátory"/>
  </F>
  <F N="2" U="okruh.xml?page=1">
    <INPUTV NAME="__R47131.0_BOOL_i" VALUE="1"/>
  </F>
  <F N="70" U="biv.xml">
    <INPUTV NAME="__R50000.0_BOOL_i" VALUE="0"/>
  </F>
</PAGE>"#;
    Mock::given(method("GET"))
        .and(path("/main.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tree))
        .mount(&server)
        .await;
    for page in ["/OKRUH10.XML", "/STAVJED1.XML"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
            .mount(&server)
            .await;
    }
    // Too short to be a data page.
    Mock::given(method("GET"))
        .and(path("/NAST1.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<PAGE/>"))
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let pages = client.discover().await.unwrap();
    assert_eq!(pages.descriptor_pages, vec!["okruh.xml", "stavjed.xml", "nast.xml"]);
    assert_eq!(pages.data_pages, vec!["OKRUH10.XML", "STAVJED1.XML"]);
}

#[tokio::test]
async fn discovery_falls_back_to_defaults() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/main.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    assert_eq!(client.discover().await.unwrap(), PageSet::defaults());
}

#[tokio::test]
async fn refresh_builds_entities_and_fires_events() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/tuv1.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TUV_DESCRIPTOR))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("49.5")))
        .mount(&server)
        .await;

    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let snapshots = Arc::new(Mutex::new(0usize));
    let snapshots_clone = snapshots.clone();

    let mut client = builder(&server)
        .pages(tuv_pages())
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .on_snapshot(move |_| *snapshots_clone.lock().unwrap() += 1)
        .build()
        .unwrap();

    let entities = client.refresh().await.expect("refresh should succeed");
    assert_eq!(entities.len(), 3);

    let requested = &entities["xcc_tuvpozadovana"];
    assert_eq!(requested.kind, EntityKind::Number);
    assert_eq!(requested.state, EntityState::Number(48.0));
    assert_eq!(requested.name, "Requested temperature");
    assert_eq!(requested.device, DeviceKey::HotWater);
    assert_eq!(requested.attributes.unit.as_deref(), Some("°C"));

    let enabled = &entities["xcc_tuv_povoleni"];
    assert_eq!(enabled.kind, EntityKind::Switch);
    assert_eq!(enabled.state, EntityState::Bool(true));

    assert_eq!(entities["xcc_tuvteplota"].device, DeviceKey::HiddenSettings);
    assert_eq!(events.lock().unwrap().len(), 3);

    client.refresh().await.unwrap();
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[3],
        Event::StateChanged { id, new: EntityState::Number(n), .. } if id == "xcc_tuvpozadovana" && *n == 49.5
    ));
    assert_eq!(*snapshots.lock().unwrap(), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_entities() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/tuv1.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TUV_DESCRIPTOR))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string(tuv_data("48.0")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut client = builder(&server).pages(tuv_pages()).build().unwrap();
    client.refresh().await.unwrap();

    let err = client.refresh().await.unwrap_err();
    assert!(matches!(err, Error::NoData), "got {err:?}");
    assert_eq!(client.entities().len(), 3);
    assert_eq!(
        client.entity("xcc_tuvpozadovana").unwrap().state,
        EntityState::Number(48.0)
    );
}

#[tokio::test]
async fn write_uses_internal_name_on_data_page() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_tuv_pages(&server).await;
    Mock::given(method("POST"))
        .and(path("/TUV11.XML"))
        .and(header("Cookie", COOKIE))
        .and(body_string_contains("__R1_REAL_.1f=50"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = builder(&server).pages(tuv_pages()).build().unwrap();
    client.refresh().await.unwrap();
    client.set_value("TUVPOZADOVANA", "50").await.expect("write should succeed");
}

#[tokio::test]
async fn rejected_write_falls_back_to_next_form() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_tuv_pages(&server).await;
    Mock::given(method("POST"))
        .and(path("/TUV11.XML"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Error: invalid value"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/TUV11.XML"))
        .and(query_param("__R1_REAL_.1f", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let mut client = builder(&server).pages(tuv_pages()).build().unwrap();
    client.refresh().await.unwrap();
    client.set_value("TUVPOZADOVANA", "50").await.expect("GET form should be accepted");
}

#[tokio::test]
async fn unknown_prop_uses_generic_endpoint() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/set_value"))
        .and(body_string_contains("param=TUVPOZADOVANA"))
        .and(body_string_contains("value=50"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    client.set_value("TUVPOZADOVANA", "50").await.unwrap();
}

#[tokio::test]
async fn write_fails_when_every_form_is_refused() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/set_value"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    let err = client.set_value("TUVPOZADOVANA", "50").await.unwrap_err();
    assert!(
        matches!(err, Error::Write(WriteError::AllEndpointsFailed { attempts: 1, .. })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn write_renews_expired_session_once() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/set_value"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/set_value"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder(&server).build().unwrap();
    client.set_value("TUVPOZADOVANA", "50").await.unwrap();
}
