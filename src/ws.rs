//! WebSocket endpoint: one connection per canvasser in the field.
//!
//! On upgrade the canvasser joins the roster, immediately when the
//! query string carries a valid coordinate and otherwise on the first
//! valid location ping. Inbound messages are location pings, outbound
//! messages are the channel's event stream.
//! Delivery is best effort. A client that lags far enough to drop
//! events reconciles by polling the HTTP surface.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::{service::WalkService, GeoPoint};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    canvasser_id: String,
    name: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationPing {
    lat: f64,
    lng: f64,
}

pub async fn upgrade(
    State(service): State<WalkService>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, service, query))
}

/// A connection only carries a roster position when the client supplied
/// both coordinates and they are in range. Anything else joins on the
/// first valid location ping instead.
fn initial_point(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    let point = GeoPoint::new(lat?, lng?);
    point.is_valid().then_some(point)
}

async fn handle_socket(socket: WebSocket, service: WalkService, query: WsQuery) {
    let channel = service.channel().clone();
    let canvasser_id = query.canvasser_id;
    let name = query.name.unwrap_or_else(|| canvasser_id.clone());

    let mut events = channel.subscribe();
    let mut joined = false;
    if let Some(initial) = initial_point(query.lat, query.lng) {
        channel.join(&canvasser_id, &name, initial, Utc::now());
        joined = true;
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            log::error!("ws: failed to encode event err={err}");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("ws: canvasser={canvasser_id} lagged, dropped={skipped}");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<LocationPing>(&text) {
                        Ok(ping) => {
                            let at = GeoPoint::new(ping.lat, ping.lng);
                            if at.is_valid() {
                                if joined {
                                    channel.update_location(&canvasser_id, at, Utc::now());
                                } else {
                                    channel.join(&canvasser_id, &name, at, Utc::now());
                                    joined = true;
                                }
                            } else {
                                log::debug!("ws: invalid ping from canvasser={canvasser_id}");
                            }
                        }
                        Err(err) => {
                            log::debug!("ws: unrecognized message from canvasser={canvasser_id} err={err}");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::debug!("ws: read error canvasser={canvasser_id} err={err}");
                    break;
                }
            },
        }
    }

    if joined {
        channel.leave(&canvasser_id, Utc::now());
    }
}
