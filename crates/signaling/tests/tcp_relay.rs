//! End-to-End-Tests ueber echte TCP-Verbindungen

use bytes::{BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use treffpunkt_core::ClientId;
use treffpunkt_protocol::{Envelope, FehlerGrund, FrameCodec, NachrichtenTyp};
use treffpunkt_signaling::{SignalingConfig, SignalingServer, SignalingState};

type Client = Framed<TcpStream, FrameCodec>;

struct Testserver {
    addr: SocketAddr,
    state: Arc<SignalingState>,
    _shutdown_tx: watch::Sender<bool>,
}

async fn server_starten(config: SignalingConfig) -> Testserver {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("treffpunkt_signaling=debug")
        .with_test_writer()
        .try_init();
    let state = SignalingState::neu(config);
    let server = SignalingServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    Testserver {
        addr,
        state,
        _shutdown_tx: shutdown_tx,
    }
}

async fn empfangen(client: &mut Client) -> Envelope {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Timeout beim Empfangen")
        .expect("Verbindung beendet")
        .expect("Lesefehler");
    serde_json::from_slice(&frame).expect("Envelope erwartet")
}

async fn verbinden(addr: SocketAddr) -> (Client, ClientId) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Framed::new(stream, FrameCodec::new());
    let begruessung = empfangen(&mut client).await;
    assert_eq!(begruessung.typ, NachrichtenTyp::ClientId);
    let id = begruessung.id.expect("ID erwartet");
    (client, id)
}

fn list_peers() -> Envelope {
    Envelope {
        typ: NachrichtenTyp::ListPeers,
        from: None,
        to: None,
        id: None,
        payload: None,
    }
}

async fn ist_beendet(client: &mut Client) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_secs(5), client.next()).await,
        Ok(None) | Ok(Some(Err(_)))
    )
}

#[tokio::test]
async fn vollstaendige_aushandlung_ueber_tcp() {
    let server = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(server.addr).await;
    let (mut b, id_b) = verbinden(server.addr).await;
    assert_ne!(id_a, id_b);

    a.send(list_peers()).await.unwrap();
    let liste = empfangen(&mut a).await;
    assert_eq!(liste.peers(), Some(vec![id_b.clone()]));

    let sdp = json!({ "sdp": "v=0 offer" });
    a.send(Envelope::an_peer(NachrichtenTyp::Offer, id_b.clone(), Some(sdp.clone())))
        .await
        .unwrap();
    let offer = empfangen(&mut b).await;
    assert_eq!(offer.typ, NachrichtenTyp::Offer);
    assert_eq!(offer.from, Some(id_a.clone()));
    assert_eq!(offer.payload, Some(sdp));

    b.send(Envelope::an_peer(
        NachrichtenTyp::Answer,
        id_a.clone(),
        Some(json!({ "sdp": "v=0 answer" })),
    ))
    .await
    .unwrap();
    let answer = empfangen(&mut a).await;
    assert_eq!(answer.typ, NachrichtenTyp::Answer);
    assert_eq!(answer.from, Some(id_b.clone()));

    a.send(Envelope::an_peer(
        NachrichtenTyp::IceCandidate,
        id_b.clone(),
        Some(json!({ "candidate": "c1" })),
    ))
    .await
    .unwrap();
    let kandidat = empfangen(&mut b).await;
    assert_eq!(kandidat.typ, NachrichtenTyp::IceCandidate);
    assert_eq!(kandidat.payload, Some(json!({ "candidate": "c1" })));
    assert_eq!(server.state.session_anzahl(), 1);
}

#[tokio::test]
async fn trennung_schickt_bye_an_peer() {
    let server = server_starten(SignalingConfig::default()).await;
    let (mut a, id_a) = verbinden(server.addr).await;
    let (mut b, id_b) = verbinden(server.addr).await;

    a.send(Envelope::an_peer(NachrichtenTyp::Offer, id_b.clone(), Some(json!({}))))
        .await
        .unwrap();
    empfangen(&mut b).await;

    drop(a);
    let bye = empfangen(&mut b).await;
    assert_eq!(bye, Envelope::bye(id_a.clone(), id_b.clone()));

    // Der getrennte Client ist kein gueltiges Ziel mehr
    b.send(Envelope::an_peer(NachrichtenTyp::Answer, id_a, Some(json!({}))))
        .await
        .unwrap();
    let fehler = empfangen(&mut b).await;
    assert_eq!(fehler.fehler_grund(), Some(FehlerGrund::UnknownTarget));
}

#[tokio::test]
async fn kaputtes_json_haelt_verbindung_offen() {
    let server = server_starten(SignalingConfig::default()).await;
    let (mut a, _) = verbinden(server.addr).await;

    let roh = b"{ kein json";
    let mut frame = BytesMut::new();
    frame.put_u32(roh.len() as u32);
    frame.put_slice(roh);
    a.get_mut().write_all(&frame).await.unwrap();

    let fehler = empfangen(&mut a).await;
    assert_eq!(fehler.fehler_grund(), Some(FehlerGrund::BadJson));

    a.send(list_peers()).await.unwrap();
    let liste = empfangen(&mut a).await;
    assert_eq!(liste.peers(), Some(vec![]));
}

#[tokio::test]
async fn unbekanntes_ziel_wird_gemeldet() {
    let server = server_starten(SignalingConfig::default()).await;
    let (mut a, _) = verbinden(server.addr).await;

    a.send(Envelope::an_peer(
        NachrichtenTyp::Offer,
        ClientId::from("niemand"),
        Some(json!({})),
    ))
    .await
    .unwrap();
    let fehler = empfangen(&mut a).await;
    assert_eq!(fehler.fehler_grund(), Some(FehlerGrund::UnknownTarget));
    assert_eq!(server.state.session_anzahl(), 0);
}

#[tokio::test]
async fn volle_registry_schliesst_neue_verbindung() {
    let config = SignalingConfig {
        max_clients: 1,
        ..SignalingConfig::default()
    };
    let server = server_starten(config).await;
    let (_a, _) = verbinden(server.addr).await;

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut zweiter = Framed::new(stream, FrameCodec::new());
    assert!(ist_beendet(&mut zweiter).await);
    assert_eq!(server.state.client_anzahl(), 1);
}

#[tokio::test]
async fn zu_grosser_frame_trennt_verbindung() {
    let config = SignalingConfig {
        max_frame_groesse: 64,
        ..SignalingConfig::default()
    };
    let server = server_starten(config).await;
    let (mut a, _) = verbinden(server.addr).await;

    let mut frame = BytesMut::new();
    frame.put_u32(1024);
    a.get_mut().write_all(&frame).await.unwrap();

    assert!(ist_beendet(&mut a).await);
}

#[tokio::test]
async fn stiller_client_wird_nach_timeout_getrennt() {
    let config = SignalingConfig {
        verbindungs_timeout: Some(Duration::from_millis(200)),
        ..SignalingConfig::default()
    };
    let server = server_starten(config).await;
    let (mut a, _) = verbinden(server.addr).await;

    assert!(ist_beendet(&mut a).await);
    assert_eq!(server.state.client_anzahl(), 0);
}
