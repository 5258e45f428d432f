//! PanelClient tests against a wiremock panel.

use std::time::Duration;

use rstest::rstest;
use serde_json::json;
use uuid::Uuid;
use vpnfleet_panel::{
    ClientSpec, PanelApi, PanelClient, PanelEndpoint, PanelError, PanelSession,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> PanelClient {
    PanelClient::new().unwrap()
}

fn session(server: &MockServer) -> PanelSession {
    PanelSession {
        base_url: server.uri(),
        cookie: "3x-ui=abc".to_string(),
    }
}

fn spec() -> ClientSpec {
    ClientSpec {
        uuid: Uuid::new_v4(),
        email: "u7-0001abcd".to_string(),
        traffic_limit_bytes: 10 * 1024 * 1024 * 1024,
        expiry_epoch_millis: 1_900_000_000_000,
        enabled: true,
    }
}

#[tokio::test]
async fn test_authenticate_extracts_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("username=admin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "3x-ui=abc; Path=/; HttpOnly")
                .set_body_json(json!({"success": true, "msg": "ok", "obj": null})),
        )
        .mount(&server)
        .await;

    let endpoint = PanelEndpoint::new(server.uri(), "admin", "secret");
    let session = client().authenticate(&endpoint).await.unwrap();
    assert_eq!(session.cookie, "3x-ui=abc");
    assert_eq!(session.base_url, server.uri());
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "msg": "wrong password", "obj": null})),
        )
        .mount(&server)
        .await;

    let endpoint = PanelEndpoint::new(server.uri(), "admin", "bad");
    let err = client().authenticate(&endpoint).await.unwrap_err();
    assert!(matches!(err, PanelError::AuthRejected));
}

#[rstest]
#[case(200, json!({"success": true, "obj": {"maintenance": false}}), false)]
#[case(200, json!({"success": true, "obj": {"maintenance": true}}), true)]
#[case(503, json!({}), true)]
#[case(500, json!({}), false)]
#[tokio::test]
async fn test_health_probe_reachable(
    #[case] status: u16,
    #[case] body: serde_json::Value,
    #[case] maintenance: bool,
) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;

    let endpoint = PanelEndpoint::new(server.uri(), "admin", "admin");
    let report = client().health_probe(&endpoint).await.unwrap();
    assert_eq!(report.maintenance, maintenance);
}

#[tokio::test]
async fn test_slow_health_answer_is_waited_for() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let endpoint = PanelEndpoint::new(server.uri(), "admin", "admin");
    let client = client();

    // The caller's deadline decides, not the client.
    let short = tokio::time::timeout(Duration::from_millis(100), client.health_probe(&endpoint)).await;
    assert!(short.is_err());

    let report = tokio::time::timeout(Duration::from_secs(2), client.health_probe(&endpoint))
        .await
        .expect("answer within the longer deadline")
        .unwrap();
    assert!(!report.maintenance);
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = PanelEndpoint::new(format!("http://{addr}"), "admin", "admin");
    let err = client().health_probe(&endpoint).await.unwrap_err();
    assert!(err.is_unreachable());
}

#[tokio::test]
async fn test_fetch_stats() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/status"))
        .and(header("cookie", "3x-ui=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "msg": "",
            "obj": {
                "cpu": 41.5,
                "mem": {"current": 1024, "total": 4096},
                "disk": {"current": 2048, "total": 8192},
                "uptime": 86400,
                "netTraffic": {"sent": 100, "recv": 200}
            }
        })))
        .mount(&server)
        .await;

    let stats = client().fetch_stats(&session(&server)).await.unwrap();
    assert_eq!(stats.cpu_percent, 41.5);
    assert_eq!(stats.mem_used, 1024);
    assert_eq!(stats.disk_total, 8192);
    assert_eq!(stats.traffic_up + stats.traffic_down, 300);
}

#[tokio::test]
async fn test_fetch_stats_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let err = client().fetch_stats(&session(&server)).await.unwrap_err();
    assert!(matches!(err, PanelError::Malformed(_)));
}

#[tokio::test]
async fn test_fetch_stats_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/status"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client().fetch_stats(&session(&server)).await.unwrap_err();
    assert!(matches!(err, PanelError::AuthRejected));
}

#[tokio::test]
async fn test_add_client_sends_settings_string() {
    let server = MockServer::start().await;
    let client_spec = spec();
    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/addClient"))
        .and(body_string_contains("\\\"email\\\":\\\"u7-0001abcd\\\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "msg": "added"})))
        .expect(1)
        .mount(&server)
        .await;

    client()
        .add_client(&session(&server), 3, &client_spec)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_add_client_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/addClient"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": false, "msg": "Duplicate email"})),
        )
        .mount(&server)
        .await;

    let err = client()
        .add_client(&session(&server), 3, &spec())
        .await
        .unwrap_err();
    match err {
        PanelError::Rejected { message } => assert_eq!(message, "Duplicate email"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_client_uses_uuid_path() {
    let server = MockServer::start().await;
    let client_spec = spec();
    Mock::given(method("POST"))
        .and(path(format!("/panel/api/inbounds/3/delClient/{}", client_spec.uuid)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    client()
        .delete_client(&session(&server), 3, &client_spec.key())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_client_traffic_missing_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/getClientTraffics/u7-0001abcd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "obj": null})))
        .mount(&server)
        .await;

    let err = client()
        .client_traffic(&session(&server), 3, "u7-0001abcd")
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::Rejected { .. }));
}

#[tokio::test]
async fn test_list_clients_joins_stats() {
    let server = MockServer::start().await;
    let uuid = Uuid::new_v4();
    let settings = json!({
        "clients": [
            {"id": uuid.to_string(), "email": "a", "enable": true, "totalGB": 0, "expiryTime": 0},
            {"id": "not-a-uuid", "email": "b", "enable": false}
        ]
    })
    .to_string();
    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/get/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "obj": {
                "id": 3,
                "settings": settings,
                "clientStats": [{"email": "a", "up": 5, "down": 6}]
            }
        })))
        .mount(&server)
        .await;

    let clients = client().list_clients(&session(&server), 3).await.unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0].uuid, Some(uuid));
    assert_eq!(clients[0].traffic.total(), 11);
    assert_eq!(clients[1].uuid, None);
    assert!(!clients[1].enabled);
    assert_eq!(clients[1].traffic.total(), 0);
}
