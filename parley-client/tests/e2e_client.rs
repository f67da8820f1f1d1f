use std::time::Duration;

use parley_client::{ClientConfig, Controller, EntryBody, Phase, UiEvent};
use parley_relay::{AppState, build_router};
use tokio::{net::TcpListener, sync::mpsc, sync::oneshot, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let address = listener.local_addr().expect("read local addr");
    let app = build_router(AppState::new());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    (format!("ws://{address}/ws"), shutdown_tx)
}

async fn pump_until(controller: &mut Controller, what: &str, done: impl Fn(&Controller) -> bool) {
    let waited = timeout(WAIT, async {
        while !done(&*controller) {
            controller.pump().await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn has_entry(controller: &Controller, body: &EntryBody) -> bool {
    controller
        .state()
        .feed()
        .iter()
        .any(|entry| &entry.body == body)
}

/// Connect, set a name and wait until the relay lists it.
async fn join(url: &str, name: &str) -> (Controller, mpsc::UnboundedReceiver<UiEvent>) {
    let config = ClientConfig::new(url)
        .expect("config")
        .with_loading_clear_delay(Duration::from_millis(100));
    join_with(config, name).await
}

async fn join_with(
    config: ClientConfig,
    name: &str,
) -> (Controller, mpsc::UnboundedReceiver<UiEvent>) {
    let (mut controller, ui_rx) = Controller::new(config);
    controller.connect();
    pump_until(&mut controller, "name prompt", |c| c.state().awaiting_name()).await;
    assert!(controller.set_name(name).expect("set name"));

    let listed = name.to_owned();
    pump_until(&mut controller, "own name in members", move |c| {
        c.state().members().contains(&listed)
    })
    .await;
    (controller, ui_rx)
}

#[tokio::test]
async fn two_members_chat_through_the_relay() {
    let (url, shutdown_tx) = start_relay().await;
    let (mut alice, _alice_ui) = join(&url, "alice").await;
    let (mut bob, _bob_ui) = join(&url, "bob").await;

    pump_until(&mut alice, "bob listed", |c| c.state().members().len() == 2).await;
    assert_eq!(alice.state().members(), ["alice", "bob"]);
    let joined = EntryBody::System("bob has joined the chat".to_owned());
    pump_until(&mut alice, "join notice", |c| has_entry(c, &joined)).await;

    alice.send_public("hello room").expect("send public");
    let expected = EntryBody::Public("alice: hello room".to_owned());
    pump_until(&mut bob, "public message", |c| has_entry(c, &expected)).await;
    pump_until(&mut alice, "own echo", |c| has_entry(c, &expected)).await;

    bob.send_private("just you", "alice").expect("send private");
    let private = EntryBody::Private("bob -> alice: just you".to_owned());
    pump_until(&mut alice, "private message", |c| has_entry(c, &private)).await;
    pump_until(&mut bob, "private echo", |c| has_entry(c, &private)).await;

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn media_shared_through_the_relay_is_saved() {
    let (url, shutdown_tx) = start_relay().await;
    let media_dir = tempfile::tempdir().expect("tempdir");
    let (mut alice, _alice_ui) = join(&url, "alice").await;
    let bob_config = ClientConfig::new(&url)
        .expect("config")
        .with_media_dir(media_dir.path().to_path_buf());
    let (mut bob, _bob_ui) = join_with(bob_config, "bob").await;

    let fixtures = tempfile::tempdir().expect("tempdir");
    let path = fixtures.path().join("notes.txt");
    std::fs::write(&path, b"meeting at noon").expect("write fixture");
    alice.send_media(path).expect("start media read");
    timeout(WAIT, alice.pump()).await.expect("media read");

    pump_until(&mut bob, "media entry", |c| {
        c.state()
            .feed()
            .iter()
            .any(|entry| matches!(entry.body, EntryBody::Media(_)))
    })
    .await;

    let saved = bob
        .state()
        .feed()
        .iter()
        .find_map(|entry| match &entry.body {
            EntryBody::Media(media) => media.saved_to.clone(),
            _ => None,
        })
        .expect("media saved");
    assert_eq!(saved, media_dir.path().join("notes.txt"));
    assert_eq!(
        std::fs::read(saved).expect("read saved"),
        b"meeting at noon"
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn leaving_resets_state_and_updates_the_room() {
    let (url, shutdown_tx) = start_relay().await;
    let (mut alice, _alice_ui) = join(&url, "alice").await;
    let (mut bob, _bob_ui) = join(&url, "bob").await;
    pump_until(&mut alice, "bob listed", |c| c.state().members().len() == 2).await;

    assert!(bob.disconnect());
    assert!(bob.state().is_loading());
    pump_until(&mut bob, "bob closed", |c| {
        c.state().phase() == Phase::Unconnected
    })
    .await;
    assert!(bob.state().members().is_empty());
    assert!(bob.state().feed().is_empty());
    pump_until(&mut bob, "loading cleared", |c| !c.state().is_loading()).await;

    pump_until(&mut alice, "bob gone", |c| c.state().members().len() == 1).await;
    assert_eq!(alice.state().members(), ["alice"]);
    let left = EntryBody::System("bob has left the chat".to_owned());
    pump_until(&mut alice, "left notice", |c| has_entry(c, &left)).await;

    // The name is free again once bob's socket is gone.
    assert!(bob.connect());
    pump_until(&mut bob, "name prompt", |c| c.state().awaiting_name()).await;
    bob.set_name("bob").expect("rejoin");
    pump_until(&mut bob, "rejoined", |c| c.state().members().len() == 2).await;

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn controller_shutdown_closes_its_socket() {
    let (url, shutdown_tx) = start_relay().await;
    let (mut alice, _alice_ui) = join(&url, "alice").await;
    let (mut bob, _bob_ui) = join(&url, "bob").await;
    pump_until(&mut alice, "bob listed", |c| c.state().members().len() == 2).await;

    timeout(WAIT, bob.shutdown()).await.expect("bob shut down");

    pump_until(&mut alice, "bob gone", |c| c.state().members().len() == 1).await;
    assert_eq!(alice.state().members(), ["alice"]);

    let _ = shutdown_tx.send(());
}
