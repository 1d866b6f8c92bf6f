use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use hackaplan_core::testutil::wait_for_terminal;

use crate::integration::common::{HACKATHON, TestApp, json_body, post_lookup, setup_test_app};

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Text frames as JSON, up to the server's close frame.
async fn read_until_close(socket: &mut Socket) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("socket stayed open");
        match frame {
            Some(Ok(Message::Text(text))) => {
                frames.push(serde_json::from_str(&text).unwrap());
            }
            Some(Ok(Message::Close(_))) => return frames,
            Some(Ok(_)) => {}
            None => panic!("connection dropped without a close frame"),
            Some(Err(err)) => panic!("socket error: {err}"),
        }
    }
}

async fn create(app: &TestApp) -> Uuid {
    let response = app.send(post_lookup(HACKATHON, "198.51.100.7")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["lookup_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

async fn polled_events(app: &TestApp, id: Uuid) -> Vec<serde_json::Value> {
    let response = app
        .send(Request::get(format!("/lookups/{id}")).body(Body::empty()).unwrap())
        .await;
    json_body(response).await["progress_events"]
        .as_array()
        .unwrap()
        .clone()
}

#[tokio::test]
async fn socket_pushes_the_polled_log_then_closes() {
    let app = setup_test_app().await;
    let addr = app.serve().await;
    let id = create(&app).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/lookups/{id}/ws"))
        .await
        .unwrap();
    let pushed = read_until_close(&mut socket).await;

    wait_for_terminal(&app.db.lookup_repo(), id).await;
    let polled = polled_events(&app, id).await;

    assert_eq!(pushed, polled);
    assert_eq!(pushed.first().unwrap()["event_type"], "queued");
    assert_eq!(pushed.last().unwrap()["event_type"], "completed");

    app.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn socket_for_finished_lookup_replays_and_closes() {
    let app = setup_test_app().await;
    let addr = app.serve().await;
    let id = create(&app).await;
    wait_for_terminal(&app.db.lookup_repo(), id).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/lookups/{id}/ws"))
        .await
        .unwrap();
    let replayed = read_until_close(&mut socket).await;

    assert_eq!(replayed, polled_events(&app, id).await);
    assert_eq!(replayed.last().unwrap()["event_type"], "completed");

    app.scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn socket_handshake_for_unknown_lookup_is_404() {
    let app = setup_test_app().await;
    let addr = app.serve().await;

    for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let err = connect_async(format!("ws://{addr}/lookups/{id}/ws"))
            .await
            .unwrap_err();
        match err {
            WsError::Http(response) => assert_eq!(response.status().as_u16(), 404, "{id}"),
            other => panic!("expected an HTTP rejection for {id}, got {other}"),
        }
    }
}
