//! Example: a session talking to the reference peer over loopback
//!
//! Starts a simulated device on an ephemeral port, discovers it, sends a few
//! commands and prints the protocol counters.
//!
//! Run with: `cargo run --example loopback`

use miio_protocol::config::{MiioConfig, PeerConfig, SessionConfig};
use miio_protocol::protocol::message::Params;
use miio_protocol::utils::{global_metrics, logging::init_logging};
use miio_protocol::{DeviceSession, MiioError, ReferencePeer};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = MiioConfig::default_with_overrides(|c| {
        c.peer = PeerConfig {
            address: "127.0.0.1:0".into(),
            ..PeerConfig::default()
        };
    });
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let peer = ReferencePeer::bind(&config.peer).await?;
    peer.register("get_prop", |cmd| {
        let names = cmd.params.to_value()?;
        let values: Vec<_> = names
            .as_array()?
            .iter()
            .map(|name| match name.as_str() {
                Some("power") => json!("on"),
                Some("temperature") => json!(21.5),
                _ => json!(null),
            })
            .collect();
        Some(json!(values))
    })?;
    let peer = peer.spawn()?;

    let session_config = SessionConfig {
        address: Some(peer.addr().ip().to_string()),
        port: peer.addr().port(),
        timeout: Duration::from_millis(250),
        ..SessionConfig::default()
    };
    let mut session = DeviceSession::new(&session_config).await?;

    let info = session.info().await?;
    println!("model: {}  mac: {:?}", info.model, info.mac);

    let reply = session
        .send("get_prop", Params::from(vec![json!("power"), json!("temperature")]))
        .await?;
    println!("get_prop #{} -> {:?}", reply.id, reply.result);

    // One lost datagram is absorbed by a retransmission of the same frame
    peer.drop_next(1);
    let reply = session.send("get_prop", Params::from(vec![json!("power")])).await?;
    println!("get_prop #{} -> {:?} (after loss)", reply.id, reply.result);

    match session.send("set_power", Params::from(vec![json!("off")])).await {
        Err(MiioError::UnknownMethod) => println!("set_power -> unknown method"),
        other => println!("set_power -> {other:?}"),
    }

    global_metrics().log_metrics();
    peer.shutdown().await?;
    Ok(())
}
