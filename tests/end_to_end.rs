use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use iec104_link::{
    async_trait, Apci, Apdu, Asdu, ClientOption, Cot, HandlerResult, Handler, Iec104Client,
    Iec104Codec, Iec104Error, Iec104Event, InformationElement, InformationObject, Ioa,
    LinkConfig, LinkHandle, LinkState, NoopHandler, Quality, ReconnectRule, Server, TypeId,
    UFunction,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::codec::Framed;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn loopback() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, format!(":{}", port))
}

/// Raw peer for one connection: optionally confirms STARTDT, never acknowledges data.
fn station(listener: TcpListener, confirm_startdt: bool) -> mpsc::UnboundedReceiver<Apdu> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, Iec104Codec::new());
        while let Some(Ok(apdu)) = frames.next().await {
            if confirm_startdt && apdu.apci == Apci::u_frame(UFunction::StartDtAct) {
                frames
                    .send(Apdu::u_frame(UFunction::StartDtCon))
                    .await
                    .unwrap();
            }
            if tx.send(apdu).is_err() {
                break;
            }
        }
    });
    rx
}

#[test]
fn scenario_a_single_point_round_trip() {
    let asdu = Asdu::new(
        TypeId::SinglePoint,
        Cot::Spontaneous,
        1,
        false,
        vec![InformationObject::new(
            Ioa(0x000001),
            InformationElement::SinglePoint {
                value: true,
                quality: Quality::Good,
            },
        )],
    );

    let bytes = asdu.encode().unwrap();
    assert_eq!(
        &bytes[..],
        &[0x01, 0x01, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01]
    );

    let decoded = Asdu::decode(&bytes).unwrap();
    assert_eq!(decoded, asdu);
    assert_eq!(decoded.type_id(), TypeId::SinglePoint);
    assert_eq!(decoded.cot(), Cot::Spontaneous);
    assert_eq!(decoded.objects[0].ioa, Ioa(1));
    assert_eq!(
        decoded.objects[0].element,
        InformationElement::SinglePoint {
            value: true,
            quality: Quality::Good
        }
    );
}

/// Counts interrogations and answers each with confirmation and termination.
#[derive(Default)]
struct Station {
    interrogations: AtomicUsize,
}

#[async_trait]
impl Handler for Station {
    async fn general_interrogation(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        self.interrogations.fetch_add(1, Ordering::SeqCst);
        link.send_asdu(&asdu.mirror(Cot::ActivationConfirm)).await?;
        link.send_asdu(&asdu.mirror(Cot::ActivationTermination))
            .await?;
        Ok(())
    }
}

/// Forwards the cause of every interrogation ASDU the client receives.
struct Master {
    causes: mpsc::UnboundedSender<Cot>,
}

#[async_trait]
impl Handler for Master {
    async fn general_interrogation(&self, asdu: &Asdu, _: &LinkHandle) -> HandlerResult {
        self.causes.send(asdu.cot())?;
        Ok(())
    }
}

#[tokio::test]
async fn scenario_b_general_interrogation_reaches_server_handler_once() {
    let station = Arc::new(Station::default());
    let server = Server::new("127.0.0.1:0", station.clone());
    let (listener, address) = loopback().await;
    tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener).await }
    });

    let (causes_tx, mut causes) = mpsc::unbounded_channel();
    let option = ClientOption::new(&address, Arc::new(Master { causes: causes_tx })).unwrap();
    let mut client = Iec104Client::new(option);
    let mut events = client.subscribe().unwrap();

    assert_ok!(client.connect().await);
    assert_eq!(client.state(), LinkState::StartedDt);
    client.general_interrogation(1).await.unwrap();

    let con = timeout(WAIT, causes.recv()).await.unwrap().unwrap();
    let term = timeout(WAIT, causes.recv()).await.unwrap().unwrap();
    assert_eq!(con, Cot::ActivationConfirm);
    assert_eq!(term, Cot::ActivationTermination);
    assert_eq!(station.interrogations.load(Ordering::SeqCst), 1);

    client.close().await.unwrap();
    assert_eq!(events.recv().await, Some(Iec104Event::Connected));
    assert_eq!(events.recv().await, Some(Iec104Event::DataTransferStarted));
    assert_eq!(station.interrogations.load(Ordering::SeqCst), 1);
    server.shutdown();
}

#[tokio::test]
async fn scenario_c_silent_peer_triggers_bounded_reconnects() {
    let (listener, address) = loopback().await;
    let accepts = Arc::new(AtomicUsize::new(0));

    // first connection confirms STARTDT and then goes quiet; later ones never answer
    tokio::spawn({
        let accepts = accepts.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                let first = accepts.fetch_add(1, Ordering::SeqCst) == 0;
                tokio::spawn(async move {
                    let mut frames = Framed::new(stream, Iec104Codec::new());
                    while let Some(Ok(apdu)) = frames.next().await {
                        if first && apdu.apci == Apci::u_frame(UFunction::StartDtAct) {
                            let _ = frames.send(Apdu::u_frame(UFunction::StartDtCon)).await;
                        }
                    }
                });
            }
        }
    });

    let interval = Duration::from_millis(100);
    let option = ClientOption::new(&address, Arc::new(NoopHandler))
        .unwrap()
        .link_config(
            LinkConfig::new()
                .t1(Duration::from_millis(200))
                .t3(Duration::from_millis(300)),
        )
        .reconnect(ReconnectRule::new(2, interval.as_millis() as i64));
    let mut client = Iec104Client::new(option);
    let mut events = client.subscribe().unwrap();
    client.connect().await.unwrap();

    let mut seen = Vec::new();
    let mut disconnected_at = None;
    let finished_at = loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        let now = Instant::now();
        if event == Iec104Event::Disconnected && disconnected_at.is_none() {
            disconnected_at = Some(now);
        }
        let done = matches!(event, Iec104Event::ReconnectFailed { .. });
        seen.push(event);
        if done {
            break now;
        }
    };

    assert_eq!(
        seen,
        vec![
            Iec104Event::Connected,
            Iec104Event::DataTransferStarted,
            Iec104Event::Disconnected,
            Iec104Event::Reconnecting { attempt: 1 },
            Iec104Event::Reconnecting { attempt: 2 },
            Iec104Event::ReconnectFailed { attempts: 2 },
        ]
    );
    assert!(matches!(
        client.wait().await,
        Err(Iec104Error::RetriesExhausted(2))
    ));
    assert_eq!(accepts.load(Ordering::SeqCst), 3);
    assert!(finished_at - disconnected_at.unwrap() >= interval * 2);
    assert_eq!(client.state(), LinkState::Disconnected);
}

/// Confirms STARTDT on the first connection only and closes it shortly after.
/// Later connections read STARTDT act and hang up, or stay silent.
fn flaky_station(listener: TcpListener, hang_up_later: bool) -> Arc<AtomicUsize> {
    let accepts = Arc::new(AtomicUsize::new(0));
    tokio::spawn({
        let accepts = accepts.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                let first = accepts.fetch_add(1, Ordering::SeqCst) == 0;
                tokio::spawn(async move {
                    let mut frames = Framed::new(stream, Iec104Codec::new());
                    if first {
                        if let Some(Ok(_)) = frames.next().await {
                            let _ = frames.send(Apdu::u_frame(UFunction::StartDtCon)).await;
                        }
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    } else if hang_up_later {
                        let _ = frames.next().await;
                    } else {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                });
            }
        }
    });
    accepts
}

async fn collect_until_failed(events: &mut mpsc::Receiver<Iec104Event>) -> Vec<Iec104Event> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        let done = matches!(event, Iec104Event::ReconnectFailed { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn peer_hanging_up_before_startdt_con_uses_every_retry() {
    let (listener, address) = loopback().await;
    let accepts = flaky_station(listener, true);

    let option = ClientOption::new(&address, Arc::new(NoopHandler))
        .unwrap()
        .reconnect(ReconnectRule::new(3, 50));
    let mut client = Iec104Client::new(option);
    let mut events = client.subscribe().unwrap();
    client.connect().await.unwrap();

    assert_eq!(
        collect_until_failed(&mut events).await,
        vec![
            Iec104Event::Connected,
            Iec104Event::DataTransferStarted,
            Iec104Event::Disconnected,
            Iec104Event::Reconnecting { attempt: 1 },
            Iec104Event::Reconnecting { attempt: 2 },
            Iec104Event::Reconnecting { attempt: 3 },
            Iec104Event::ReconnectFailed { attempts: 3 },
        ]
    );
    assert!(matches!(
        client.wait().await,
        Err(Iec104Error::RetriesExhausted(3))
    ));
    assert_eq!(accepts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn state_reports_connecting_during_redial() {
    let (listener, address) = loopback().await;
    let _accepts = flaky_station(listener, false);

    let option = ClientOption::new(&address, Arc::new(NoopHandler))
        .unwrap()
        .connect_timeout(Duration::from_millis(300))
        .reconnect(ReconnectRule::new(1, 50));
    let mut client = Iec104Client::new(option);
    let mut events = client.subscribe().unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.state(), LinkState::StartedDt);

    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if event == (Iec104Event::Reconnecting { attempt: 1 }) {
            break;
        }
    }
    assert_eq!(client.state(), LinkState::Connecting);
    assert!(client.link().is_none());

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, Iec104Event::ReconnectFailed { attempts: 1 });
    assert_eq!(client.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn no_i_frame_before_startdt_confirmation() {
    let (listener, address) = loopback().await;
    let mut frames = station(listener, true);

    let option = ClientOption::new(&address, Arc::new(NoopHandler))
        .unwrap()
        .on_connect(|_| async { Ok(()) });
    let mut client = Iec104Client::new(option);
    client.connect().await.unwrap();

    assert_eq!(client.state(), LinkState::StoppedDt);
    let err = assert_err!(client.general_interrogation(1).await);
    assert!(matches!(err, Iec104Error::NotConnected));

    assert_ok!(client.start_dt().await);
    assert_ok!(client.general_interrogation(1).await);

    let first = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(first.apci, Apci::u_frame(UFunction::StartDtAct));
    let second = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert!(second.apci.is_i_frame());
    assert_eq!(second.decode_asdu().unwrap(), Asdu::general_interrogation(1));
}

#[tokio::test]
async fn sends_block_once_k_frames_are_unacknowledged() {
    let (listener, address) = loopback().await;
    let mut frames = station(listener, true);

    let option = ClientOption::new(&address, Arc::new(NoopHandler))
        .unwrap()
        .link_config(LinkConfig::new().k(2).w(2));
    let mut client = Iec104Client::new(option);
    client.connect().await.unwrap();
    let link = client.link().unwrap();

    assert_ok!(link.test_command(1).await);
    assert_ok!(link.test_command(1).await);
    assert!(matches!(
        link.send_asdu_timeout(&Asdu::test_command(1), Duration::from_millis(300))
            .await,
        Err(Iec104Error::SendTimeout)
    ));

    let mut i_frames = 0;
    while let Ok(Some(apdu)) = timeout(Duration::from_millis(100), frames.recv()).await {
        if apdu.apci.is_i_frame() {
            i_frames += 1;
        }
    }
    assert_eq!(i_frames, 2);
    assert!(client.is_connected());
}
