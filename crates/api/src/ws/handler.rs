use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use roomcast_core::types::{
    ConnectWebRtcTransportRequest, ConsumeRequest, CreatePlainTransportRequest,
    CreateWebRtcTransportRequest, JoinRequest, JoinRoomRequest, ProduceRequest, PullRequest,
    SetConsumerPreferredLayersRequest, SetConsumerPriorityRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::ws::channel::WsChannel;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub peer_id: String,
    pub connection_id: String,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.peer_id, params.connection_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, peer_id: String, connection_id: String) {
    info!(%peer_id, %connection_id, "websocket connected");

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    // The first frame must be a `join` request; everything else bails out
    // with an error and closes the connection without ever registering the
    // peer with the scheduler.
    let Some(Ok(Message::Text(first))) = receiver.next().await else {
        return;
    };

    let joined = match serde_json::from_str::<Envelope>(&first) {
        Ok(envelope) if envelope.kind == "join" => {
            match serde_json::from_value::<JoinRequest>(envelope.data.unwrap_or(Value::Null)) {
                Ok(req) => {
                    let channel: Arc<dyn roomcast_core::ClientChannel> =
                        Arc::new(WsChannel::new(peer_id.clone(), sender.clone()));
                    state
                        .scheduler
                        .join(peer_id.clone(), connection_id.clone(), req, channel)
                        .await
                }
                Err(err) => Err(roomcast_core::SchedulerError::MediaBackendFailure(format!(
                    "invalid join payload: {err}"
                ))),
            }
        }
        _ => Err(roomcast_core::SchedulerError::MediaBackendFailure(
            "first message must be a join request".into(),
        )),
    };

    if let Err(err) = joined {
        let mut guard = sender.lock().await;
        let _ = guard
            .send(Message::text(
                json!({ "type": "error", "message": err.to_string() }).to_string(),
            ))
            .await;
        return;
    }

    state.ws_storage.add(peer_id.clone(), sender.clone());
    {
        let mut guard = sender.lock().await;
        let _ = guard
            .send(Message::text(json!({ "type": "joined", "data": { "peer_id": peer_id } }).to_string()))
            .await;
    }

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, &peer_id, &connection_id, &text).await;
            }
            Ok(Message::Ping(data)) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(%peer_id, %err, "websocket error");
                break;
            }
            _ => {}
        }
    }

    state.ws_storage.remove(&peer_id, &sender);
    if let Err(err) = state.scheduler.leave(&peer_id, &connection_id).await {
        debug!(%peer_id, %err, "leave on disconnect");
    }

    info!(%peer_id, "websocket disconnected");
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

async fn reply_ok(state: &AppState, peer_id: &str, request_id: Option<String>, data: Value) {
    super::dispatcher::send_to_peer(
        &state.ws_storage,
        peer_id,
        &json!({ "type": "result", "request_id": request_id, "data": data }),
    )
    .await;
}

async fn reply_err(state: &AppState, peer_id: &str, request_id: Option<String>, err: impl std::fmt::Display) {
    super::dispatcher::send_to_peer(
        &state.ws_storage,
        peer_id,
        &json!({ "type": "error", "request_id": request_id, "message": err.to_string() }),
    )
    .await;
}

macro_rules! handle {
    ($state:expr, $peer_id:expr, $request_id:expr, $result:expr) => {
        match $result {
            Ok(value) => reply_ok($state, $peer_id, $request_id, serde_json::to_value(value).unwrap_or(Value::Null)).await,
            Err(err) => reply_err($state, $peer_id, $request_id, err).await,
        }
    };
}

async fn handle_client_message(state: &AppState, peer_id: &str, connection_id: &str, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    let data = envelope.data.unwrap_or(Value::Null);
    let request_id = envelope.request_id;
    let peer_id_owned = peer_id.to_string();

    macro_rules! parse_or_bail {
        ($ty:ty) => {
            match serde_json::from_value::<$ty>(data.clone()) {
                Ok(v) => v,
                Err(err) => {
                    reply_err(state, peer_id, request_id, format!("bad payload: {err}")).await;
                    return;
                }
            }
        };
    }

    match envelope.kind.as_str() {
        "joinRoom" => {
            let req: JoinRoomRequest = parse_or_bail!(JoinRoomRequest);
            let result = state.scheduler.join_room(&peer_id_owned, connection_id, req).await;
            match result {
                Ok((snapshot, created)) => {
                    reply_ok(state, peer_id, request_id, json!({ "room": snapshot, "created": created })).await
                }
                Err(err) => reply_err(state, peer_id, request_id, err).await,
            }
        }
        "leaveRoom" => handle!(state, peer_id, request_id, state.scheduler.leave_room(&peer_id_owned, connection_id).await),
        "dismissRoom" => {
            let room_id = data.get("room_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.dismiss_room(&room_id, &peer_id_owned, connection_id).await)
        }
        "kickPeer" => {
            let room_id = data.get("room_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let target = data.get("target_peer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.kick_peer(&room_id, &peer_id_owned, connection_id, &target).await)
        }
        "createSendTransport" => {
            let req: CreateWebRtcTransportRequest = parse_or_bail!(CreateWebRtcTransportRequest);
            match state.scheduler.create_webrtc_transport(&peer_id_owned, connection_id, req).await {
                Ok(transport) => {
                    reply_ok(state, peer_id, request_id, webrtc_transport_payload(&transport)).await
                }
                Err(err) => reply_err(state, peer_id, request_id, err).await,
            }
        }
        "createRecvTransport" => {
            let req: CreateWebRtcTransportRequest = parse_or_bail!(CreateWebRtcTransportRequest);
            match state.scheduler.create_recv_webrtc_transport(&peer_id_owned, connection_id, req).await {
                Ok(transport) => {
                    reply_ok(state, peer_id, request_id, webrtc_transport_payload(&transport)).await
                }
                Err(err) => reply_err(state, peer_id, request_id, err).await,
            }
        }
        "createPlainTransport" => {
            let req: CreatePlainTransportRequest = parse_or_bail!(CreatePlainTransportRequest);
            match state.scheduler.create_plain_transport(&peer_id_owned, connection_id, req).await {
                Ok(transport) => {
                    reply_ok(state, peer_id, request_id, plain_transport_payload(&transport)).await
                }
                Err(err) => reply_err(state, peer_id, request_id, err).await,
            }
        }
        "connectWebRtcTransport" => {
            let req: ConnectWebRtcTransportRequest = parse_or_bail!(ConnectWebRtcTransportRequest);
            handle!(state, peer_id, request_id, state.scheduler.connect_webrtc_transport(&peer_id_owned, connection_id, req).await)
        }
        "pull" => {
            let req: PullRequest = parse_or_bail!(PullRequest);
            handle!(state, peer_id, request_id, state.scheduler.pull(&peer_id_owned, connection_id, req).await)
        }
        "produce" => {
            let req: ProduceRequest = parse_or_bail!(ProduceRequest);
            handle!(state, peer_id, request_id, state.scheduler.produce(&peer_id_owned, connection_id, req).await)
        }
        "consume" => {
            let req: ConsumeRequest = parse_or_bail!(ConsumeRequest);
            handle!(state, peer_id, request_id, state.scheduler.consume(&peer_id_owned, connection_id, req).await)
        }
        "closeProducer" => {
            let producer_id = data.get("producer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.close_producer(&peer_id_owned, connection_id, &producer_id).await)
        }
        "closeProducersWithSources" => {
            let sources: HashSet<String> = data
                .get("sources")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            handle!(state, peer_id, request_id, state.scheduler.close_producers_with_sources(&peer_id_owned, connection_id, sources).await)
        }
        "closeAllProducers" => {
            handle!(state, peer_id, request_id, state.scheduler.close_all_producers(&peer_id_owned, connection_id).await)
        }
        "pauseProducer" => {
            let producer_id = data.get("producer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.pause_producer(&peer_id_owned, connection_id, &producer_id).await)
        }
        "resumeProducer" => {
            let producer_id = data.get("producer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.resume_producer(&peer_id_owned, connection_id, &producer_id).await)
        }
        "closeConsumer" => {
            let consumer_id = data.get("consumer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.close_consumer(&peer_id_owned, connection_id, &consumer_id).await)
        }
        "pauseConsumer" => {
            let consumer_id = data.get("consumer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.pause_consumer(&peer_id_owned, connection_id, &consumer_id).await)
        }
        "resumeConsumer" => {
            let consumer_id = data.get("consumer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.resume_consumer(&peer_id_owned, connection_id, &consumer_id).await)
        }
        "setConsumerPreferredLayers" => {
            let req: SetConsumerPreferredLayersRequest = parse_or_bail!(SetConsumerPreferredLayersRequest);
            handle!(state, peer_id, request_id, state.scheduler.set_consumer_preferred_layers(&peer_id_owned, connection_id, req).await)
        }
        "setConsumerPriority" => {
            let req: SetConsumerPriorityRequest = parse_or_bail!(SetConsumerPriorityRequest);
            handle!(state, peer_id, request_id, state.scheduler.set_consumer_priority(&peer_id_owned, connection_id, req).await)
        }
        "requestConsumerKeyFrame" => {
            let consumer_id = data.get("consumer_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.request_consumer_key_frame(&peer_id_owned, connection_id, &consumer_id).await)
        }
        "restartIce" => {
            let transport_id = data.get("transport_id").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.restart_ice(&peer_id_owned, connection_id, &transport_id).await)
        }
        "setAppData" => {
            let key = data.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
            let value = data.get("value").cloned().unwrap_or(Value::Null);
            handle!(state, peer_id, request_id, state.scheduler.set_app_data(&peer_id_owned, connection_id, key, value).await)
        }
        "unsetAppData" => {
            let key = data.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.unset_app_data(&peer_id_owned, connection_id, &key).await)
        }
        "clearAppData" => {
            handle!(state, peer_id, request_id, state.scheduler.clear_app_data(&peer_id_owned, connection_id).await)
        }
        "setInternalData" => {
            let key = data.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
            let value = data.get("value").cloned().unwrap_or(Value::Null);
            handle!(state, peer_id, request_id, state.scheduler.set_peer_internal_data(&peer_id_owned, connection_id, key, value).await)
        }
        "unsetInternalData" => {
            let key = data.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
            handle!(state, peer_id, request_id, state.scheduler.unset_peer_internal_data(&peer_id_owned, connection_id, &key).await)
        }
        "clearInternalData" => {
            handle!(state, peer_id, request_id, state.scheduler.clear_peer_internal_data(&peer_id_owned, connection_id).await)
        }
        "getInternalData" => {
            handle!(state, peer_id, request_id, state.scheduler.get_peer_internal_data(&peer_id_owned, connection_id).await)
        }
        "getPeerRole" => {
            handle!(state, peer_id, request_id, state.scheduler.get_peer_role(&peer_id_owned, connection_id).await)
        }
        "getOtherPeerIds" => {
            let role = data.get("role").and_then(Value::as_str).map(str::to_string);
            handle!(state, peer_id, request_id, state.scheduler.get_other_peer_ids(&peer_id_owned, connection_id, role.as_deref()).await)
        }
        "getOtherPeers" => {
            let role = data.get("role").and_then(Value::as_str).map(str::to_string);
            handle!(state, peer_id, request_id, state.scheduler.get_other_peers(&peer_id_owned, connection_id, role.as_deref()).await)
        }
        "getExistingProducers" => {
            handle!(state, peer_id, request_id, state.scheduler.existing_producers_for(&peer_id_owned, connection_id).await)
        }
        "ping" => reply_ok(state, peer_id, request_id, json!("pong")).await,
        other => {
            debug!(%peer_id, msg_type = other, "unknown WS message type");
        }
    }
}

fn webrtc_transport_payload(transport: &mediasoup::webrtc_transport::WebRtcTransport) -> Value {
    use mediasoup::transport::Transport;
    json!({
        "id": transport.id().to_string(),
        "ice_parameters": transport.ice_parameters(),
        "ice_candidates": transport.ice_candidates(),
        "dtls_parameters": transport.dtls_parameters(),
    })
}

fn plain_transport_payload(transport: &mediasoup::plain_transport::PlainTransport) -> Value {
    use mediasoup::transport::Transport;
    json!({ "id": transport.id().to_string() })
}
