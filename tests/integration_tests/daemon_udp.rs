// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The daemon's control surface over a real datagram socket: registration,
//! DIF properties, RIB queries, and resilience to malformed datagrams.

use std::{sync::Arc, time::Duration};

use rina_control_rs::{
    cfg::config::Config,
    daemon::IpcpDaemon,
    models::{
        app_registration::{
            AppGetDifPropertiesRequest, AppRegisterApplicationRequest,
        },
        ipcm::IpcmQueryRibRequest,
        message::{ControlMessage, MessagePayload},
        naming::ApplicationName,
    },
    transport::family::FamilyRegistry,
};
use tokio::{net::UdpSocket, time::timeout};
use tokio_util::sync::CancellationToken;

const DAEMON_ADDR: &str = "127.0.0.1:47311";
const CLIENT_ADDR: &str = "127.0.0.1:47312";
const CLIENT_PORT_ID: u32 = 900;

fn daemon_config() -> Config {
    serde_yaml::from_str(&format!(
        r#"
process:
  ProcessName: "/ipcps/itest"
  ProcessInstance: "1"
  IpcProcessId: 3
dif:
  DifName: "itest.DIF"
  DifType: "normal"
  QosCubes:
    - Id: 1
      Name: "best-effort"
      Bounds:
        AverageBandwidth: 10000000
transport:
  FamilyName: "rina-control"
  LocalAddress: "{DAEMON_ADDR}"
  PeerAddress: "{CLIENT_ADDR}"
  LocalPortId: 101
  IoTimeoutMs: 2000
security:
  PolicySets:
    - "PSOC_authentication-none"
    - "PSOC_authentication-password"
  AuthProfile:
    AuthPolicy:
      Name: "PSOC_authentication-none"
      Version: "1"
timers:
  MplMs: 100
"#
    ))
    .expect("config")
}

struct Client {
    socket: UdpSocket,
    family: u16,
    sequence: u32,
}

impl Client {
    async fn connect(families: &FamilyRegistry) -> Self {
        let socket = UdpSocket::bind(CLIENT_ADDR).await.expect("bind client");
        socket.connect(DAEMON_ADDR).await.expect("connect client");
        Self {
            socket,
            family: families.resolve("rina-control"),
            sequence: 0,
        }
    }

    async fn send(&mut self, payload: MessagePayload) {
        self.sequence += 1;
        let msg = ControlMessage {
            family: self.family,
            source_port_id: CLIENT_PORT_ID,
            dest_port_id: 101,
            source_ipcp_id: 0,
            dest_ipcp_id: 3,
            sequence_number: self.sequence,
            payload,
        };
        let encoded = msg.encode().expect("encode");
        self.socket.send(&encoded).await.expect("send");
    }

    async fn recv(&self) -> ControlMessage {
        let mut buf = vec![0u8; 64 * 1024];
        let len = timeout(Duration::from_secs(5), self.socket.recv(&mut buf))
            .await
            .expect("reply in time")
            .expect("recv");
        ControlMessage::decode(&buf[..len]).expect("decode")
    }
}

#[tokio::test]
async fn daemon_serves_the_control_surface() {
    let cfg = daemon_config();
    cfg.validate().expect("valid config");

    let cancel = CancellationToken::new();
    let families = FamilyRegistry::new();
    let daemon = IpcpDaemon::build(&cfg, &families, cancel.clone())
        .await
        .expect("daemon builds");
    let dispatch = tokio::spawn(Arc::clone(&daemon).run());

    let mut client = Client::connect(&families).await;
    let app = ApplicationName::new("/apps/itest", "1", "", "").expect("name");

    // Register an application and hear back.
    client
        .send(
            AppRegisterApplicationRequest {
                app_name: app.clone(),
                dif_name: ApplicationName::dif("itest.DIF"),
            }
            .into(),
        )
        .await;
    let reply = client.recv().await;
    match reply.payload {
        MessagePayload::AppRegisterApplicationResponse(resp) => {
            assert_eq!(resp.result, 0);
            assert_eq!(resp.app_name, app);
        },
        other => panic!("unexpected reply {other:?}"),
    }

    // A duplicate registration is refused with a negative result.
    client
        .send(
            AppRegisterApplicationRequest {
                app_name: app.clone(),
                dif_name: ApplicationName::dif("itest.DIF"),
            }
            .into(),
        )
        .await;
    let reply = client.recv().await;
    match reply.payload {
        MessagePayload::AppRegisterApplicationResponse(resp) => {
            assert!(resp.result < 0);
            assert!(!resp.error_description.is_empty());
        },
        other => panic!("unexpected reply {other:?}"),
    }

    // A malformed datagram is dropped without killing the dispatch loop.
    client
        .socket
        .send(&[0xde, 0xad, 0xbe, 0xef])
        .await
        .expect("send garbage");

    // DIF properties reflect the provisioned cubes.
    client
        .send(
            AppGetDifPropertiesRequest {
                app_name: app.clone(),
                dif_name: ApplicationName::default(),
            }
            .into(),
        )
        .await;
    let reply = client.recv().await;
    match reply.payload {
        MessagePayload::AppGetDifPropertiesResponse(resp) => {
            assert_eq!(resp.result, 0);
            assert_eq!(resp.dif_properties.len(), 1);
            let props = &resp.dif_properties[0];
            assert_eq!(props.dif_name, ApplicationName::dif("itest.DIF"));
            assert_eq!(props.qos_cubes.len(), 1);
        },
        other => panic!("unexpected reply {other:?}"),
    }

    // The RIB query walks the flow-allocator subtree seeded at startup.
    client
        .send(
            IpcmQueryRibRequest {
                object_class: "qoscube".into(),
                object_name: "/dif/management/flow-allocator/qos-cubes".into(),
                object_instance: 0,
                scope: 1,
                filter: String::new(),
            }
            .into(),
        )
        .await;
    let reply = client.recv().await;
    match reply.payload {
        MessagePayload::IpcmQueryRibResponse(resp) => {
            assert_eq!(resp.result, 0);
            assert!(
                resp.objects
                    .iter()
                    .any(|o| o.object_name.ends_with("/qos-cubes/1"))
            );
        },
        other => panic!("unexpected reply {other:?}"),
    }

    // Sequence numbers on the daemon's replies are strictly monotonic.
    client
        .send(
            AppGetDifPropertiesRequest {
                app_name: app.clone(),
                dif_name: ApplicationName::default(),
            }
            .into(),
        )
        .await;
    let first = client.recv().await;
    client
        .send(
            AppGetDifPropertiesRequest {
                app_name: app,
                dif_name: ApplicationName::default(),
            }
            .into(),
        )
        .await;
    let second = client.recv().await;
    assert!(second.sequence_number > first.sequence_number);

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), dispatch).await;
}
