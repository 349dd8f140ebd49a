//! In-process MQTT 3.1.1 broker that records what a client sends.

use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{self, ConnAck, ConnectReturnCode, Packet, PingResp, PubAck, Publish, SubAck, SubscribeReasonCode};
use rumqttc::QoS;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const MAX_PACKET: usize = 16 * 1024 * 1024;

/// What a connected client sent
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connect { client_id: String, will: Option<Retained> },
    Subscribe(String),
    Publish(Retained),
    Disconnect,
}

/// Topic, payload and retain flag of a publish or last will
#[derive(Debug, Clone, PartialEq)]
pub struct Retained {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Instructions for one accepted connection
#[derive(Debug)]
pub enum Control {
    /// Deliver a publish to the client
    Publish { topic: String, payload: Vec<u8> },
    /// Drop the socket without a DISCONNECT
    Drop,
}

pub struct FakeBroker {
    port: u16,
    pub seen: mpsc::UnboundedReceiver<Seen>,
    connections: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Control>>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                if conn_tx.send(control_tx).is_err() {
                    return;
                }
                tokio::spawn(serve(tcp, control_rx, seen_tx.clone()));
            }
        });

        Self {
            port,
            seen,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Control channel of the next accepted connection
    pub async fn next_connection(&mut self) -> mpsc::UnboundedSender<Control> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.connections.recv())
            .await
            .expect("no connection within 5s")
            .expect("listener stopped")
    }

    /// Record everything up to and including the first publish on `topic`
    pub async fn seen_until_publish(&mut self, topic: &str) -> Vec<Seen> {
        let mut out = Vec::new();
        loop {
            let seen = tokio::time::timeout(std::time::Duration::from_secs(5), self.seen.recv())
                .await
                .unwrap_or_else(|_| panic!("no publish on {} within 5s, saw {:?}", topic, out))
                .expect("broker stopped");
            let done = matches!(&seen, Seen::Publish(p) if p.topic == topic);
            out.push(seen);
            if done {
                return out;
            }
        }
    }
}

async fn serve(mut tcp: TcpStream, mut control: mpsc::UnboundedReceiver<Control>, seen: mpsc::UnboundedSender<Seen>) {
    let mut inbound = BytesMut::with_capacity(4096);

    loop {
        // Decode every complete packet before reading more
        loop {
            let packet = match v4::read(&mut inbound, MAX_PACKET) {
                Ok(packet) => packet,
                Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => break,
                Err(_) => return,
            };

            let mut reply = BytesMut::new();
            match packet {
                Packet::Connect(connect) => {
                    let will = connect.last_will.map(|will| Retained {
                        topic: will.topic,
                        payload: will.message.to_vec(),
                        retain: will.retain,
                    });
                    let _ = seen.send(Seen::Connect {
                        client_id: connect.client_id,
                        will,
                    });
                    ConnAck::new(ConnectReturnCode::Success, false).write(&mut reply).unwrap();
                }
                Packet::Subscribe(subscribe) => {
                    let codes = subscribe
                        .filters
                        .iter()
                        .map(|filter| {
                            let _ = seen.send(Seen::Subscribe(filter.path.clone()));
                            SubscribeReasonCode::Success(filter.qos)
                        })
                        .collect();
                    SubAck::new(subscribe.pkid, codes).write(&mut reply).unwrap();
                }
                Packet::Publish(publish) => {
                    let _ = seen.send(Seen::Publish(Retained {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    }));
                    if publish.qos == QoS::AtLeastOnce {
                        PubAck::new(publish.pkid).write(&mut reply).unwrap();
                    }
                }
                Packet::PingReq => {
                    PingResp.write(&mut reply).unwrap();
                }
                Packet::Disconnect => {
                    let _ = seen.send(Seen::Disconnect);
                    return;
                }
                _ => {}
            }

            if !reply.is_empty() && tcp.write_all(&reply).await.is_err() {
                return;
            }
        }

        tokio::select! {
            read = tcp.read_buf(&mut inbound) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            instruction = control.recv() => match instruction {
                Some(Control::Publish { topic, payload }) => {
                    let mut frame = BytesMut::new();
                    Publish::new(topic, QoS::AtMostOnce, payload).write(&mut frame).unwrap();
                    if tcp.write_all(&frame).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => return,
            }
        }
    }
}
