//! Device sync engine against a scripted radio
//!
//! Each test scripts a small radio with fixed answers for every node the
//! engine reads, then drives the engine through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fsapi::{Connection, ConnectionState, FsapiClient, WireValue, ValueType};
use fsapi_transport::testing::{xml, Scripted, ScriptedTransport};
use radio_state::{
    names, Action, DeviceEvent, DeviceSyncEngine, EngineOptions, Lifecycle, PropertyValue,
    StateError,
};

const MODES: &str = "LIST_GET_NEXT/netremote.sys.caps.validmodes/-1";

fn fallback(transport: &ScriptedTransport, node: &str, value_type: &str, raw: &str) {
    transport.set_fallback(&format!("GET/{}", node), Scripted::Body(xml::value(value_type, raw)));
}

/// A radio at 10.0.0.5 answering session "42", powered on, volume 4, mode IR
fn scripted_radio() -> Arc<ScriptedTransport> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_xml("CREATE_SESSION", xml::session("42"));

    fallback(&transport, "netremote.sys.info.radioid", "c8_array", "0022610A1B2C");
    fallback(&transport, "netremote.sys.info.friendlyname", "c8_array", "Kitchen");
    fallback(&transport, "netremote.sys.caps.volumesteps", "u8", "33");
    fallback(&transport, "netremote.sys.caps.fmfreqrange.lower", "u32", "87500");
    fallback(&transport, "netremote.sys.caps.fmfreqrange.upper", "u32", "108000");
    fallback(&transport, "netremote.sys.caps.fmfreqrange.stepsize", "u32", "50");
    transport.set_fallback(
        MODES,
        Scripted::Body(xml::items(
            &[
                xml::mode_item(0, "IR", true, "Internet radio"),
                xml::mode_item(1, "Spotify", true, "Spotify"),
                xml::mode_item(2, "FM", true, "FM"),
            ],
            true,
        )),
    );

    fallback(&transport, "netremote.sys.power", "u8", "1");
    fallback(&transport, "netremote.play.status", "u8", "2");
    fallback(&transport, "netremote.sys.audio.mute", "u8", "0");
    fallback(&transport, "netremote.play.repeat", "u8", "0");
    fallback(&transport, "netremote.play.shuffle", "u8", "0");
    fallback(&transport, "netremote.sys.audio.volume", "u8", "4");
    fallback(&transport, "netremote.sys.mode", "u32", "0");
    fallback(&transport, "netremote.play.frequency", "u32", "98100");
    fallback(&transport, "netremote.play.info.name", "c8_array", "Radio Paradise");
    fallback(&transport, "netremote.play.info.text", "c8_array", "Eclectic mix");
    fallback(&transport, "netremote.play.info.artist", "c8_array", "");
    fallback(&transport, "netremote.play.info.album", "c8_array", "");
    fallback(&transport, "netremote.play.info.graphicuri", "c8_array", "http://img/cover.png");
    transport.set_fallback(
        "GET/netremote.spotify.username",
        Scripted::Body(xml::status("FS_NODE_DOES_NOT_EXIST")),
    );
    transport.set_fallback("SET/netremote.sys.power", Scripted::Body(xml::ok()));
    transport.set_fallback("SET/netremote.sys.audio.volume", Scripted::Body(xml::ok()));
    transport.set_fallback("SET/netremote.play.control", Scripted::Body(xml::ok()));

    transport
}

async fn start(transport: &Arc<ScriptedTransport>) -> DeviceSyncEngine {
    let connection = Arc::new(Connection::new(FsapiClient::new(
        transport.clone(),
        "10.0.0.5",
        "1234",
    )));
    let engine = DeviceSyncEngine::start(connection, EngineOptions::default())
        .await
        .unwrap();

    let mut lifecycle = engine.watch_lifecycle();
    tokio::time::timeout(Duration::from_secs(5), lifecycle.wait_for(|l| *l == Lifecycle::Live))
        .await
        .expect("engine did not go live")
        .unwrap();

    engine
}

/// Start without waiting for the first refresh
async fn launch(transport: &Arc<ScriptedTransport>) -> DeviceSyncEngine {
    let connection = Arc::new(Connection::new(FsapiClient::new(
        transport.clone(),
        "10.0.0.5",
        "1234",
    )));
    DeviceSyncEngine::start(connection, EngineOptions::default())
        .await
        .unwrap()
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn changes(entries: &[(&str, &str)]) -> BTreeMap<String, WireValue> {
    entries
        .iter()
        .map(|(node, raw)| (node.to_string(), WireValue::new(ValueType::U8, *raw)))
        .collect()
}

#[tokio::test]
async fn refresh_populates_all_properties() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    assert_eq!(engine.capabilities().device_id(), "frontier-silicon-0022610A1B2C");
    assert_eq!(engine.capabilities().friendly_name.as_deref(), Some("Kitchen"));

    let get = |key: &str| engine.get_property(key).unwrap();
    assert_eq!(get("netremote.sys.power"), Some(PropertyValue::Bool(true)));
    assert_eq!(get(names::PLAYING), Some(PropertyValue::Bool(true)));
    assert_eq!(get(names::VOLUME), Some(PropertyValue::Int(4)));
    assert_eq!(get(names::MODE), Some(PropertyValue::Text("Internet radio".into())));
    assert_eq!(get(names::FREQUENCY), Some(PropertyValue::Float(98.1)));
    assert_eq!(
        get(names::INFO),
        Some(PropertyValue::Text("Radio Paradise\nEclectic mix\n".into()))
    );
    assert_eq!(get(names::COVER), Some(PropertyValue::Text("http://img/cover.png".into())));
    assert_eq!(get(names::SPOTIFY_USER), None);

    // The cover is read once, together with info
    assert_eq!(transport.count("GET/netremote.play.info.graphicuri"), 1);

    // Session established once; every request carried it
    assert_eq!(transport.count("CREATE_SESSION"), 1);
    assert!(transport
        .requests()
        .iter()
        .skip(1)
        .all(|r| r.param("sid") == Some("42")));
}

#[tokio::test]
async fn local_write_and_remote_notification_derive_muted() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    let applied = engine
        .set_property("netremote.sys.audio.volume", PropertyValue::Int(10))
        .await
        .unwrap();
    assert_eq!(applied, PropertyValue::Int(10));
    assert_eq!(engine.get_property(names::VOLUME).unwrap(), Some(PropertyValue::Int(10)));
    assert_eq!(engine.get_property(names::MUTED).unwrap(), Some(PropertyValue::Bool(false)));

    engine
        .dispatch_notifications(changes(&[("netremote.sys.audio.volume", "0")]))
        .await
        .unwrap();

    assert_eq!(engine.get_property(names::VOLUME).unwrap(), Some(PropertyValue::Int(0)));
    assert_eq!(engine.get_property(names::MUTED).unwrap(), Some(PropertyValue::Bool(true)));

    // Only the caller's write reached the device
    assert_eq!(transport.count("SET/"), 1);
    assert_eq!(transport.requests().iter().filter(|r| r.param("value") == Some("10")).count(), 1);
}

#[tokio::test]
async fn volume_write_is_clamped() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    let applied = engine
        .set_property(names::VOLUME, PropertyValue::Int(99))
        .await
        .unwrap();

    assert_eq!(applied, PropertyValue::Int(32));
    let set = transport
        .requests()
        .into_iter()
        .find(|r| r.path == "SET/netremote.sys.audio.volume")
        .unwrap();
    assert_eq!(set.param("value"), Some("32"));
}

#[tokio::test]
async fn failed_write_keeps_optimistic_value() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    transport.push("SET/netremote.sys.power", Scripted::Body(xml::status("FS_NODE_BLOCKED")));

    let result = engine
        .set_property(names::POWER, PropertyValue::Bool(false))
        .await;

    assert!(matches!(result, Err(StateError::Api(_))));
    assert_eq!(engine.get_property(names::POWER).unwrap(), Some(PropertyValue::Bool(false)));
    assert_eq!(engine.connection().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn notification_loop_applies_changes() {
    let transport = scripted_radio();
    transport.push_xml("GET_NOTIFIES", xml::timeout());
    transport.push_xml("GET_NOTIFIES", xml::timeout());
    transport.push_xml(
        "GET_NOTIFIES",
        xml::notify(&[
            ("netremote.sys.audio.volume", "u8", "7"),
            ("netremote.sys.clock.localtime", "c8_array", "12:00"),
        ]),
    );

    let engine = start(&transport).await;

    eventually(|| engine.get_property(names::VOLUME).unwrap() == Some(PropertyValue::Int(7))).await;

    // Two timeouts, one batch, then the hanging poll
    eventually(|| transport.count("GET_NOTIFIES") == 4).await;
    assert_eq!(transport.count("CREATE_SESSION"), 1);
    assert_eq!(engine.connection().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn play_status_notification_powers_on() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    engine
        .dispatch_notifications(changes(&[("netremote.play.status", "3")]))
        .await
        .unwrap();
    assert_eq!(engine.get_property(names::PLAYING).unwrap(), Some(PropertyValue::Bool(false)));

    engine
        .set_property(names::POWER, PropertyValue::Bool(false))
        .await
        .unwrap();
    engine
        .dispatch_notifications(changes(&[("netremote.play.status", "2")]))
        .await
        .unwrap();
    assert_eq!(engine.get_property(names::PLAYING).unwrap(), Some(PropertyValue::Bool(true)));
    assert_eq!(engine.get_property(names::POWER).unwrap(), Some(PropertyValue::Bool(true)));
}

#[tokio::test]
async fn info_notification_refetches_composite() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    transport.push_xml("GET/netremote.play.info.name", xml::value("c8_array", "BBC Radio 3"));
    transport.push_xml("GET/netremote.play.info.text", xml::value("c8_array", ""));
    transport.push_xml("GET/netremote.play.info.artist", xml::value("c8_array", "Bach"));
    transport.push_xml("GET/netremote.play.info.album", xml::value("c8_array", "Partitas"));

    let before = transport.count("GET/netremote.play.info.graphicuri");
    engine
        .dispatch_notifications(changes(&[
            ("netremote.play.info.name", "BBC Radio 3"),
            ("netremote.play.info.text", ""),
        ]))
        .await
        .unwrap();

    assert_eq!(
        engine.get_property(names::INFO).unwrap(),
        Some(PropertyValue::Text("BBC Radio 3\nArtist: Bach\nAlbum: Partitas\n".into()))
    );
    // One refetch for both notified fields, followed by the cover
    assert_eq!(transport.count("GET/netremote.play.info.graphicuri"), before + 1);
}

#[tokio::test]
async fn unknown_mode_is_exposed() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    engine
        .dispatch_notifications(changes(&[("netremote.sys.mode", "12")]))
        .await
        .unwrap();

    assert_eq!(
        engine.get_property(names::MODE).unwrap(),
        Some(PropertyValue::Text("unknown-#12".into()))
    );
    assert!(engine
        .store()
        .options(names::MODE)
        .unwrap()
        .contains(&"unknown-#12".to_string()));
}

#[tokio::test]
async fn actions_write_play_control() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    engine.invoke_action(Action::Next).await.unwrap();
    engine.invoke_action(Action::Previous).await.unwrap();

    let values: Vec<_> = transport
        .requests()
        .into_iter()
        .filter(|r| r.path == "SET/netremote.play.control")
        .filter_map(|r| r.param("value").map(str::to_string))
        .collect();
    assert_eq!(values, vec!["3", "4"]);
}

#[tokio::test]
async fn poll_failure_reconnects_and_refreshes() {
    let transport = scripted_radio();
    transport.push("GET_NOTIFIES", Scripted::NetworkFailure);
    transport.push_xml("CREATE_SESSION", xml::session("43"));

    let engine = start(&transport).await;

    eventually(|| transport.count("CREATE_SESSION") == 2).await;
    // A second refresh follows the new session
    eventually(|| transport.count("GET/netremote.sys.power") == 2).await;
    assert_eq!(engine.connection().client().session_id().as_deref(), Some("43"));
    assert_eq!(engine.connection().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn poll_failure_with_failed_reconnect_goes_quiet() {
    let transport = scripted_radio();
    transport.push("GET_NOTIFIES", Scripted::NetworkFailure);
    transport.push("CREATE_SESSION", Scripted::NetworkFailure);

    let engine = launch(&transport).await;

    eventually(|| engine.lifecycle() == Lifecycle::Disconnected).await;
    assert_eq!(engine.connection().state(), ConnectionState::Disconnected);
    assert_eq!(transport.count("CREATE_SESSION"), 2);
    assert_eq!(transport.count("GET_NOTIFIES"), 1);

    // Nothing reaches the device until a liveness probe revives it
    let calls = transport.requests().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.requests().len(), calls);

    assert!(engine
        .set_property(names::VOLUME, PropertyValue::Int(3))
        .await
        .is_err());
    assert_eq!(transport.requests().len(), calls);
}

#[tokio::test]
async fn repeated_poll_failures_stop_after_one_reconnect() {
    let transport = scripted_radio();
    transport.set_fallback("CREATE_SESSION", Scripted::Body(xml::session("99")));
    transport.set_fallback("GET_NOTIFIES", Scripted::Body(xml::status("FS_FAIL")));

    let engine = launch(&transport).await;

    eventually(|| engine.lifecycle() == Lifecycle::Disconnected).await;
    assert_eq!(engine.connection().state(), ConnectionState::Disconnected);
    assert_eq!(transport.count("CREATE_SESSION"), 2);
    assert_eq!(transport.count("GET_NOTIFIES"), 2);

    let calls = transport.requests().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.requests().len(), calls);

    // A liveness probe grants one more reconnect, then the device is down again
    engine.revive().await.unwrap();
    eventually(|| {
        transport.count("CREATE_SESSION") == 4
            && engine.connection().state() == ConnectionState::Disconnected
    })
    .await;

    let calls = transport.requests().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.requests().len(), calls);
    assert_eq!(transport.count("GET_NOTIFIES"), 4);
}

#[tokio::test]
async fn connectivity_events_and_revive() {
    let transport = scripted_radio();
    let engine = start(&transport).await;
    let mut events = engine.subscribe();

    // The write fails, the reconnect fails: device is down
    transport.push("SET/netremote.sys.audio.volume", Scripted::NetworkFailure);
    transport.push("CREATE_SESSION", Scripted::NetworkFailure);
    assert!(engine.set_property(names::VOLUME, PropertyValue::Int(5)).await.is_err());
    assert_eq!(engine.connection().state(), ConnectionState::Disconnected);

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                DeviceEvent::ConnectivityChanged { connected } => break connected,
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(!event);

    transport.push_xml("CREATE_SESSION", xml::session("44"));
    engine.revive().await.unwrap();
    let mut lifecycle = engine.watch_lifecycle();
    tokio::time::timeout(Duration::from_secs(5), lifecycle.wait_for(|l| *l == Lifecycle::Live))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.connection().epoch(), 2);
}

#[tokio::test]
async fn stopped_engine_is_inert() {
    let transport = scripted_radio();
    let engine = start(&transport).await;

    engine.stop();
    let calls = transport.requests().len();

    assert_eq!(engine.lifecycle(), Lifecycle::Stopped);
    assert!(matches!(
        engine.set_property(names::VOLUME, PropertyValue::Int(3)).await,
        Err(StateError::Stopped)
    ));
    assert!(matches!(
        engine.invoke_action(Action::Next).await,
        Err(StateError::Stopped)
    ));
    assert!(matches!(engine.revive().await, Err(StateError::Stopped)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.requests().len(), calls);
}
