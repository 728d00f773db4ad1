//! End-to-End-Tests ueber WebSocket, wie sie ein Browser-Client nutzt

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use treffpunkt_core::ClientId;
use treffpunkt_protocol::{Envelope, FehlerGrund, NachrichtenTyp};
use treffpunkt_signaling::{SignalingConfig, SignalingState, WebSocketServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn server_starten(config: SignalingConfig) -> (SocketAddr, watch::Sender<bool>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("treffpunkt_signaling=debug")
        .with_test_writer()
        .try_init();
    let state = SignalingState::neu(config);
    let server = WebSocketServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    (addr, shutdown_tx)
}

async fn empfangen(client: &mut Client) -> Envelope {
    loop {
        let nachricht = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout beim Empfangen")
            .expect("Verbindung beendet")
            .expect("WebSocket-Fehler");
        match nachricht {
            Message::Text(text) => return serde_json::from_str(&text).expect("Envelope erwartet"),
            Message::Binary(daten) => return serde_json::from_slice(&daten).expect("Envelope erwartet"),
            _ => continue,
        }
    }
}

async fn senden(client: &mut Client, wert: serde_json::Value) {
    client.send(Message::Text(wert.to_string())).await.unwrap();
}

async fn verbinden(addr: SocketAddr) -> (Client, ClientId) {
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    let begruessung = empfangen(&mut client).await;
    assert_eq!(begruessung.typ, NachrichtenTyp::ClientId);
    let id = begruessung.id.expect("ID erwartet");
    (client, id)
}

#[tokio::test]
async fn offer_und_answer_ueber_websocket() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(addr).await;
    let (mut b, id_b) = verbinden(addr).await;

    senden(
        &mut a,
        json!({ "type": "offer", "to": id_b.as_str(), "payload": { "sdp": "o" } }),
    )
    .await;
    let offer = empfangen(&mut b).await;
    assert_eq!(offer.typ, NachrichtenTyp::Offer);
    assert_eq!(offer.from, Some(id_a.clone()));

    senden(
        &mut b,
        json!({ "type": "answer", "to": id_a.as_str(), "payload": { "sdp": "a" } }),
    )
    .await;
    let answer = empfangen(&mut a).await;
    assert_eq!(answer.typ, NachrichtenTyp::Answer);
    assert_eq!(answer.payload, Some(json!({ "sdp": "a" })));
}

#[tokio::test]
async fn gefaelschter_absender_wird_ueberschrieben() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(addr).await;
    let (mut b, id_b) = verbinden(addr).await;

    senden(
        &mut a,
        json!({ "type": "offer", "from": "jemand-anders", "to": id_b.as_str(), "payload": {} }),
    )
    .await;
    let offer = empfangen(&mut b).await;
    assert_eq!(offer.from, Some(id_a));
}

#[tokio::test]
async fn discovery_ohne_ziel_erreicht_alle_anderen() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(addr).await;
    let (mut b, _) = verbinden(addr).await;
    let (mut c, _) = verbinden(addr).await;

    senden(&mut a, json!({ "type": "offer", "payload": { "hallo": true } })).await;
    for client in [&mut b, &mut c] {
        let offer = empfangen(client).await;
        assert_eq!(offer.typ, NachrichtenTyp::Offer);
        assert_eq!(offer.from, Some(id_a.clone()));
        assert_eq!(offer.to, None);
    }
}

#[tokio::test]
async fn unbekannter_typ_wird_abgelehnt() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, _) = verbinden(addr).await;

    senden(&mut a, json!({ "type": "teleport" })).await;
    let fehler = empfangen(&mut a).await;
    assert_eq!(fehler.fehler_grund(), Some(FehlerGrund::UnknownType));
}

#[tokio::test]
async fn close_frame_fuehrt_zu_bye() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(addr).await;
    let (mut b, id_b) = verbinden(addr).await;

    senden(&mut a, json!({ "type": "offer", "to": id_b.as_str(), "payload": {} })).await;
    empfangen(&mut b).await;

    a.close(None).await.unwrap();
    let bye = empfangen(&mut b).await;
    assert_eq!(bye, Envelope::bye(id_a, id_b));
}

#[tokio::test]
async fn ws_pings_halten_verbindung_offen() {
    let config = SignalingConfig {
        verbindungs_timeout: Some(Duration::from_millis(300)),
        ..SignalingConfig::default()
    };
    let (addr, _shutdown) = server_starten(config).await;
    let (mut a, _) = verbinden(addr).await;

    for _ in 0..10 {
        a.send(Message::Ping(b"da".to_vec())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    senden(&mut a, json!({ "type": "list-peers" })).await;
    let liste = empfangen(&mut a).await;
    assert_eq!(liste.typ, NachrichtenTyp::PeersList);
}

#[tokio::test]
async fn stiller_ws_client_wird_nach_timeout_getrennt() {
    let config = SignalingConfig {
        verbindungs_timeout: Some(Duration::from_millis(200)),
        ..SignalingConfig::default()
    };
    let (addr, _shutdown) = server_starten(config).await;
    let (mut a, _) = verbinden(addr).await;

    let beendet = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match a.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(beendet);
}

#[tokio::test]
async fn ohne_timeout_bleibt_stille_verbindung_offen() {
    let (addr, _shutdown) = server_starten(SignalingConfig::default()).await;
    let (mut a, _) = verbinden(addr).await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    senden(&mut a, json!({ "type": "list-peers" })).await;
    let liste = empfangen(&mut a).await;
    assert_eq!(liste.typ, NachrichtenTyp::PeersList);
}
