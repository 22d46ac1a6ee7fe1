//! Integration tests for url actions using wiremock.

use std::sync::Arc;

use led_panel_bridge::dispatch::{send_http, HttpRequest};
use led_panel_bridge::{ButtonMapping, HttpMethod, LedPanel, NoDevices, PanelConfig, PanelError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod send {
    use super::*;

    #[tokio::test]
    async fn get_request_discards_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scene/evening"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok, lots of text"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = HttpRequest {
            url: format!("{}/scene/evening", mock_server.uri()),
            method: HttpMethod::Get,
            body: None,
        };
        let status = send_http(&reqwest::Client::new(), &request).await.unwrap();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn post_json_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"button":3}"#))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = HttpRequest {
            url: format!("{}/hook", mock_server.uri()),
            method: HttpMethod::Post,
            body: Some(r#"{"button":3}"#.to_string()),
        };
        let status = send_http(&reqwest::Client::new(), &request).await.unwrap();
        assert_eq!(status, 204);
    }

    #[tokio::test]
    async fn post_plain_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "text/plain"))
            .and(body_string("toggle"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = HttpRequest {
            url: mock_server.uri(),
            method: HttpMethod::Post,
            body: Some("toggle".to_string()),
        };
        send_http(&reqwest::Client::new(), &request).await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let request = HttpRequest {
            url: mock_server.uri(),
            method: HttpMethod::Get,
            body: None,
        };
        let err = send_http(&reqwest::Client::new(), &request).await.unwrap_err();
        assert!(matches!(err, PanelError::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let request = HttpRequest {
            url: "http://127.0.0.1:9/nothing".to_string(),
            method: HttpMethod::Get,
            body: None,
        };
        let err = send_http(&reqwest::Client::new(), &request).await.unwrap_err();
        assert!(matches!(err, PanelError::Http(_)));
    }
}

mod panel {
    use super::*;

    #[tokio::test]
    async fn button_press_fires_mapped_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/doorbell"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = PanelConfig::builder()
            .ip("127.0.0.1")
            .port(port)
            .keepalive_interval_ms(0)
            .button_mapping(ButtonMapping::url(
                5,
                "red",
                &format!("{}/doorbell", mock_server.uri()),
                HttpMethod::Post,
                Some("ring"),
            ))
            .build();
        let mut panel = LedPanel::start(config, Arc::new(NoDevices));

        let (mut stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        stream
            .write_all(
                b"led=255000000\r{\"events\":[{\"label\":\"Key 5\",\"state\":1}]}\r{\"events\":[{\"label\":\"Key 5\",\"state\":0}]}\r",
            )
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..100 {
            received = mock_server.received_requests().await.unwrap_or_default();
            if !received.is_empty() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, b"ring");

        panel.shutdown().await.unwrap();
    }
}
