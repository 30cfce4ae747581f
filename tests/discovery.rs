use cgateweb::channels::Channels;
use cgateweb::connection::pool::Pool;
use cgateweb::discovery::{DiscoverRequest, Engine};
use cgateweb::mqtt::ChannelData;
use cgateweb::queue::ThrottledQueue;
use cgateweb::settings::{Discovery, Mqtt, Pool as PoolConfig, Settings, SettingsWrapper};
use cgateweb::stats::BridgeStats;

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn test_settings(port: u16) -> SettingsWrapper {
    SettingsWrapper::from_settings(Settings {
        cgate_host: "127.0.0.1".to_string(),
        cgate_command_port: port,
        cgate_event_port: port,
        cgate_project: "PROJECT".to_string(),
        mqtt: Mqtt {
            broker: "127.0.0.1:1883".to_string(),
            username: None,
            password: None,
            client_id: "test".to_string(),
            retain_reads: true,
        },
        message_interval_ms: 10,
        pool: PoolConfig {
            size: 1,
            health_check_interval_ms: 30_000,
            keep_alive_interval_ms: 60_000,
            connection_timeout_ms: 2_000,
            max_retries: 3,
        },
        get_all_on_start: false,
        get_all_period_secs: None,
        get_all_net_app: None,
        discovery: Discovery {
            enabled: true,
            prefix: "homeassistant".to_string(),
            networks: vec![254],
            cover_app_id: Some(203),
            switch_app_id: None,
            relay_app_id: None,
            pir_app_id: None,
            label_file: None,
            period_secs: None,
        },
        loglevel: "info".to_string(),
    })
}

/// Drives a full discovery walk: a `DiscoverRequest` triggers `TREEXML`,
/// a fake C-Gate server replies with an attribute-encoded tree spanning the
/// Lighting application and a configured Cover application, and both groups
/// come out the other end as retained Home-Assistant config messages.
#[tokio::test]
async fn walking_a_network_publishes_one_retained_config_per_group() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let xml = r#"<Network Address="254"><Application Address="56"><Group Address="4" Name="Kitchen Light"/></Application><Application Address="203"><Group Address="1" Name="Lounge Blind"/></Application></Network>"#;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();

        writer.write_all(format!("343-{}\n", xml).as_bytes()).await.unwrap();
        writer.write_all(b"343 \n").await.unwrap();

        request_line.trim_end().to_string()
    });

    let channels = Channels::new();
    let stats = BridgeStats::shared();
    let settings = test_settings(addr.port());

    let pool = Pool::new(
        addr.ip().to_string(),
        addr.port(),
        1,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        channels.clone(),
        stats.clone(),
    );
    pool.start().await.unwrap();

    let queue = ThrottledQueue::new(Duration::from_millis(10), pool.clone(), stats.clone());
    let dispatch = tokio::spawn(queue.clone().run(channels.clone()));

    let engine = Engine::new(settings, channels.clone(), queue, stats);
    let mut to_mqtt = channels.to_mqtt.subscribe();
    let engine_task = tokio::spawn(engine.run());

    // Give the engine's run loop a chance to subscribe to `discover` before
    // sending: a broadcast send only reaches receivers subscribed by then.
    tokio::time::sleep(Duration::from_millis(20)).await;
    channels.discover.send(DiscoverRequest::All).unwrap();

    let request_line = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    assert_eq!(request_line, "TREEXML 254");

    let mut configs = Vec::new();
    for _ in 0..2 {
        match tokio::time::timeout(Duration::from_secs(2), to_mqtt.recv()).await.unwrap().unwrap() {
            ChannelData::Message(message) => configs.push(message),
            ChannelData::Shutdown => panic!("unexpected shutdown on to_mqtt"),
        }
    }

    let light = configs
        .iter()
        .find(|m| m.topic == "homeassistant/light/cgateweb_254_56_4/config")
        .expect("lighting group published as a light");
    assert!(light.retain);
    assert!(light.payload.contains("Kitchen Light"));
    assert!(light.payload.contains("brightness_command_topic"));

    let cover = configs
        .iter()
        .find(|m| m.topic == "homeassistant/cover/cgateweb_254_203_1/config")
        .expect("application 203 group published as a cover per the configured override");
    assert!(cover.retain);
    assert!(cover.payload.contains("Lounge Blind"));

    dispatch.abort();
    engine_task.abort();
}

/// A second `DiscoverRequest` for a network already mid-walk is coalesced:
/// only one `TREEXML` request is ever sent to C-Gate.
#[tokio::test]
async fn concurrent_requests_for_the_same_network_are_coalesced() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let xml = r#"<Network Address="254"><Application Address="56"><Group Address="4" Name="Kitchen Light"/></Application></Network>"#;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut first_request = String::new();
        reader.read_line(&mut first_request).await.unwrap();

        writer.write_all(format!("343-{}\n", xml).as_bytes()).await.unwrap();
        writer.write_all(b"343 \n").await.unwrap();

        // If a second request were sent, it would arrive here; give it a
        // short window to (not) show up.
        let mut second_request = String::new();
        let second = tokio::time::timeout(Duration::from_millis(300), reader.read_line(&mut second_request)).await;

        (first_request.trim_end().to_string(), second.is_ok())
    });

    let channels = Channels::new();
    let stats = BridgeStats::shared();
    let settings = test_settings(addr.port());

    let pool = Pool::new(
        addr.ip().to_string(),
        addr.port(),
        1,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        channels.clone(),
        stats.clone(),
    );
    pool.start().await.unwrap();

    let queue = ThrottledQueue::new(Duration::from_millis(10), pool.clone(), stats.clone());
    let dispatch = tokio::spawn(queue.clone().run(channels.clone()));

    let engine = Engine::new(settings, channels.clone(), queue, stats);
    let engine_task = tokio::spawn(engine.run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    channels.discover.send(DiscoverRequest::Network(254)).unwrap();
    channels.discover.send(DiscoverRequest::Network(254)).unwrap();

    let (request_line, got_second) = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    assert_eq!(request_line, "TREEXML 254");
    assert!(!got_second, "coalesced request should not have issued a second TREEXML");

    dispatch.abort();
    engine_task.abort();
}
