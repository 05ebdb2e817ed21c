//! Inbound HTTP requests on one bind address.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{debug, error, trace, warn};
use upnp_model::{
    StreamConnection, StreamRequestMessage, StreamResponseMessage, UpnpHeaders, UpnpRequestMethod,
};
use url::Url;
use warp::http::header::{HeaderMap, HeaderName, HeaderValue};
use warp::http::{Method, Response, StatusCode};
use warp::Filter;

use crate::error::{InitializationError, TransportError};
use crate::router::Router;
use crate::spi::{ProtocolFactory, StreamServer, UpnpStream};
use crate::stream::StreamProcessor;

struct Bound {
    local_address: SocketAddr,
    router: Arc<dyn Router>,
}

/// HTTP server handing every request to the router as a [`UpnpStream`].
///
/// The listener is bound in `init` so a port conflict surfaces before the
/// router starts anything. `run` serves on its own tokio runtime until
/// `stop` is called.
pub struct WarpStreamServer {
    listen_port: u16,
    response_timeout: Duration,
    bound: Option<Bound>,
    listener: Mutex<Option<TcpListener>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    stopped: AtomicBool,
}

impl WarpStreamServer {
    pub fn new(listen_port: u16, response_timeout: Duration) -> Self {
        Self {
            listen_port,
            response_timeout,
            bound: None,
            listener: Mutex::new(None),
            shutdown: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.bound.as_ref().map(|b| b.local_address)
    }

    async fn serve(
        listener: TcpListener,
        local_address: SocketAddr,
        router: Arc<dyn Router>,
        response_timeout: Duration,
        shutdown: oneshot::Receiver<()>,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::from_std(listener)?;

        let query = warp::query::raw().or(warp::any().map(String::new)).unify();
        let routes = warp::method()
            .and(warp::path::full())
            .and(query)
            .and(warp::addr::remote())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .and_then(
                move |method: Method,
                      path: warp::path::FullPath,
                      query: String,
                      remote: Option<SocketAddr>,
                      headers: HeaderMap,
                      body: Bytes| {
                    let router = Arc::clone(&router);
                    async move {
                        let request =
                            to_request(local_address, &method, path.as_str(), &query, &headers, body);
                        let reply = match request {
                            Some(mut request) => {
                                request.connection = Some(StreamConnection {
                                    remote_address: remote,
                                    local_address,
                                });
                                dispatch(router, request, response_timeout).await
                            }
                            None => status_reply(StatusCode::BAD_REQUEST),
                        };
                        Ok::<_, warp::Rejection>(reply)
                    }
                },
            );

        debug!("Stream server listening on: {}", local_address);
        warp::serve(routes)
            .serve_incoming_with_graceful_shutdown(TcpListenerStream::new(listener), async move {
                let _ = shutdown.await;
            })
            .await;
        debug!("Stream server on {} stopped", local_address);
        Ok(())
    }
}

fn to_request(
    local_address: SocketAddr,
    method: &Method,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Option<StreamRequestMessage> {
    let mut uri = Url::parse(&format!("http://{}", local_address)).ok()?.join(path).ok()?;
    if !query.is_empty() {
        uri.set_query(Some(query));
    }

    let mut request = StreamRequestMessage::new(UpnpRequestMethod::from_http_name(method.as_str()), uri);
    let mut upnp_headers = UpnpHeaders::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => upnp_headers.add(name.as_str(), value),
            Err(_) => trace!("Ignoring non-text header: {}", name),
        }
    }
    request.headers = upnp_headers;
    request.body = body;
    Some(request)
}

async fn dispatch(
    router: Arc<dyn Router>,
    request: StreamRequestMessage,
    response_timeout: Duration,
) -> Response<Vec<u8>> {
    let (responder, response) = oneshot::channel();
    let stream = ServerUpnpStream {
        request,
        protocol_factory: Arc::clone(router.protocol_factory()),
        responder,
    };
    router.received_stream(Box::new(stream));

    match tokio::time::timeout(response_timeout, response).await {
        Ok(Ok(Some(response))) => to_reply(response),
        Ok(Ok(None)) => status_reply(StatusCode::NOT_FOUND),
        Ok(Err(_)) => {
            debug!("Stream was dropped without a response");
            status_reply(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            warn!("No response within {:?}", response_timeout);
            status_reply(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status_reply(status: StatusCode) -> Response<Vec<u8>> {
    let mut reply = Response::new(Vec::new());
    *reply.status_mut() = status;
    reply
}

fn to_reply(response: StreamResponseMessage) -> Response<Vec<u8>> {
    let mut reply = Response::new(response.body.to_vec());
    *reply.status_mut() =
        StatusCode::from_u16(response.response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in response.headers.iter() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                reply.headers_mut().append(name, value);
            }
            _ => warn!("Dropping invalid response header: {}", name),
        }
    }
    reply
}

/// A received HTTP request waiting for its protocol to run.
struct ServerUpnpStream {
    request: StreamRequestMessage,
    protocol_factory: Arc<dyn ProtocolFactory>,
    responder: oneshot::Sender<Option<StreamResponseMessage>>,
}

impl UpnpStream for ServerUpnpStream {
    fn run(self: Box<Self>) {
        let ServerUpnpStream {
            request,
            protocol_factory,
            responder,
        } = *self;

        let mut processor = StreamProcessor::new(protocol_factory);
        let response = processor.process(request);
        match responder.send(response.clone()) {
            Ok(()) => {
                if let Some(response) = &response {
                    processor.response_sent(response);
                }
            }
            Err(_) => {
                warn!("Connection gone before the response could be sent");
                processor.response_exception(&TransportError::Interrupted);
            }
        }
    }
}

impl StreamServer for WarpStreamServer {
    fn init(&mut self, bind_address: IpAddr, router: Arc<dyn Router>) -> Result<(), InitializationError> {
        let address = SocketAddr::new(bind_address, self.listen_port);
        debug!("Binding stream server to: {}", address);
        let listener = TcpListener::bind(address)
            .map_err(|e| InitializationError::from_bind("StreamServer", address.to_string(), e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| InitializationError::other("StreamServer", e.to_string()))?;
        let local_address = listener
            .local_addr()
            .map_err(|e| InitializationError::other("StreamServer", e.to_string()))?;

        *self.listener.lock() = Some(listener);
        self.bound = Some(Bound { local_address, router });
        Ok(())
    }

    fn port(&self) -> u16 {
        self.local_address().map(|a| a.port()).unwrap_or(self.listen_port)
    }

    fn run(&self) {
        let Some(bound) = self.bound.as_ref() else {
            warn!("Stream server was not initialized");
            return;
        };
        let Some(listener) = self.listener.lock().take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut shutdown = self.shutdown.lock();
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            *shutdown = Some(shutdown_tx);
        }

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("upnp-stream-server")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to create runtime for stream server on {}: {}", bound.local_address, e);
                return;
            }
        };

        let served = runtime.block_on(Self::serve(
            listener,
            bound.local_address,
            Arc::clone(&bound.router),
            self.response_timeout,
            shutdown_rx,
        ));
        if let Err(e) = served {
            error!("Stream server on {} failed: {}", bound.local_address, e);
        }
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.listener.lock().take();
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        Ok(())
    }
}

impl std::fmt::Debug for WarpStreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarpStreamServer")
            .field("local_address", &self.local_address())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
