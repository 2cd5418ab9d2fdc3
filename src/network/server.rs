use crate::consensus::{ConsensusPeer, Message, PeerStatus};
use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{debug, info};

type PeerData = web::Data<Arc<ConsensusPeer>>;

fn faulty() -> HttpResponse {
    HttpResponse::InternalServerError().body("faulty")
}

/// Runs the broadcast on the runtime so the handler can answer right away.
fn spawn_broadcast(peer: &PeerData, message: Message) {
    let peer = Arc::clone(peer.get_ref());
    tokio::spawn(async move {
        let report = peer.broadcast(message).await;
        debug!(
            peer = peer.id(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast finished"
        );
    });
}

async fn status(peer: PeerData) -> impl Responder {
    match peer.status() {
        PeerStatus::Live => HttpResponse::Ok().body("live"),
        PeerStatus::Faulty => faulty(),
    }
}

async fn receive_message(msg: web::Json<Message>, peer: PeerData) -> impl Responder {
    let msg = msg.into_inner();
    if msg.round == 0 {
        return HttpResponse::BadRequest().body("round must be at least 1");
    }
    match peer.handle(&msg) {
        Ok(Some(outgoing)) => {
            spawn_broadcast(&peer, outgoing);
            HttpResponse::Ok().body("message")
        }
        Ok(None) => HttpResponse::Ok().body("message"),
        Err(_) => faulty(),
    }
}

async fn start(peer: PeerData) -> impl Responder {
    match peer.start() {
        Ok(Some(proposal)) => {
            spawn_broadcast(&peer, proposal);
            HttpResponse::Ok().body("started")
        }
        Ok(None) => HttpResponse::Ok().body("started"),
        Err(_) => faulty(),
    }
}

async fn stop(peer: PeerData) -> impl Responder {
    peer.stop();
    HttpResponse::Ok().body("stopped")
}

async fn get_state(peer: PeerData) -> impl Responder {
    HttpResponse::Ok().json(peer.state())
}

/// Registers the peer endpoints. Expects `web::Data<Arc<ConsensusPeer>>`
/// in the app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status))
        .route("/message", web::post().to(receive_message))
        .route("/start", web::get().to(start))
        .route("/stop", web::get().to(stop))
        .route("/getState", web::get().to(get_state));
}

/// Builds the server on an already bound listener.
pub fn build_server(
    peer: Arc<ConsensusPeer>,
    listener: TcpListener,
    workers: usize,
) -> std::io::Result<Server> {
    let addr = listener.local_addr()?;
    let peer_data = web::Data::new(peer);
    info!(peer = peer_data.id(), %addr, "starting HTTP server");

    let server = HttpServer::new(move || App::new().app_data(peer_data.clone()).configure(routes))
        .workers(workers.max(1))
        .listen(listener)?
        .run();
    Ok(server)
}

/// Binds `host:port` and serves until shutdown.
pub async fn start_server(
    peer: Arc<ConsensusPeer>,
    host: &str,
    port: u16,
    workers: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port))?;
    build_server(peer, listener, workers)?.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::coin::ScriptedCoin;
    use crate::consensus::{ConsensusNode, NodeSnapshot, ProtocolParams, Transport, Value};
    use crate::error::TransportError;
    use actix_web::{body, http::StatusCode, test};
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn deliver(&self, _target: usize, _message: Message) -> Result<(), TransportError> {
            Ok(())
        }

        fn peer_count(&self) -> usize {
            4
        }
    }

    fn peer(faulty: bool) -> Arc<ConsensusPeer> {
        peer_with(ProtocolParams::new(4, 1), faulty)
    }

    fn peer_with(params: ProtocolParams, faulty: bool) -> Arc<ConsensusPeer> {
        let node = ConsensusNode::new(
            0,
            params,
            faulty,
            Box::new(ScriptedCoin::always(Value::Zero)),
        );
        Arc::new(ConsensusPeer::new(node, Value::One, Arc::new(NullTransport)))
    }

    #[actix_web::test]
    async fn test_live_peer_endpoints() {
        let peer = peer(false);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(peer.clone()))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/status").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body::to_bytes(resp.into_body()).await.unwrap(), "live");

        let resp = test::call_service(&app, test::TestRequest::get().uri("/start").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/message")
            .set_json(Message::propose(1, Value::One))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let state: NodeSnapshot = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/getState").to_request(),
        )
        .await;
        assert_eq!(state.round, Some(1));
        assert_eq!(state.value, Some(Value::One));
        assert_eq!(state.decided, Some(false));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/stop").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/message")
            .set_json(Message::propose(1, Value::One))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_faulty_peer_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(peer(true)))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/status").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/start").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let state: NodeSnapshot = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/getState").to_request(),
        )
        .await;
        assert_eq!(state, NodeSnapshot::default());
    }

    #[actix_web::test]
    async fn test_rejects_malformed_messages() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(peer(false)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/message")
            .set_json(serde_json::json!({"round": 0, "value": 1, "phase": "VOTE"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/message")
            .set_json(serde_json::json!({"round": 1, "value": 7, "phase": "VOTE"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_votes_on_last_round_leave_state_intact() {
        let peer = peer_with(ProtocolParams::new(9, 3), false);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(peer.clone()))
                .configure(routes),
        )
        .await;
        test::call_service(&app, test::TestRequest::get().uri("/start").to_request()).await;

        for bit in [0, 0, 0, 1, 1, 1] {
            let req = test::TestRequest::post()
                .uri("/message")
                .set_json(serde_json::json!({"round": u64::MAX, "value": bit, "phase": "VOTE"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let state: NodeSnapshot = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/getState").to_request(),
        )
        .await;
        assert_eq!(state.round, Some(1));
        assert_eq!(state.decided, Some(false));
    }
}
