//! Fake transports and protocols for router tests.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use parking_lot::Mutex;
use upnp_model::{
    IncomingDatagramMessage, OutgoingDatagramMessage, StreamRequestMessage, StreamResponseMessage,
    UpnpOperation, UpnpRequestMethod, UpnpResponse,
};
use upnp_transport::{
    DefaultDatagramProcessor, Executor, InitializationError, NetworkAddressFactory,
    NetworkInterface, ProtocolCreationError, ProtocolFactory, ReceivingAsync, ReceivingSync,
    Router, Task, TransportError, UpnpServiceConfiguration,
};
use upnp_transport::{
    DatagramIo, DatagramProcessor, MulticastReceiver, StaticNetworkAddressFactory, StreamClient,
    StreamServer,
};

mock! {
    pub Client {}

    impl StreamClient for Client {
        fn send_request(
            &self,
            request: &StreamRequestMessage,
        ) -> Result<Option<StreamResponseMessage>, TransportError>;

        fn stop(&self) -> Result<(), TransportError>;
    }
}

/// Ordered record of what the fakes did.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Runs tasks on the submitting thread.
#[derive(Default)]
pub struct InlineExecutor {
    pub submitted: Mutex<usize>,
}

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<(), TransportError> {
        *self.submitted.lock() += 1;
        task();
        Ok(())
    }
}

pub struct FakeMulticastReceiver {
    log: EventLog,
    interface: String,
}

impl MulticastReceiver for FakeMulticastReceiver {
    fn init(
        &mut self,
        interface: &NetworkInterface,
        _router: Arc<dyn Router>,
        _address_factory: Arc<dyn NetworkAddressFactory>,
        _processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError> {
        self.interface = interface.name.clone();
        self.log.lock().push(format!("init multicast {}", self.interface));
        Ok(())
    }

    fn run(&self) {
        self.log.lock().push(format!("run multicast {}", self.interface));
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.log.lock().push(format!("stop multicast {}", self.interface));
        Ok(())
    }
}

pub struct FakeDatagramIo {
    log: EventLog,
    address: Option<IpAddr>,
    pub sent: Arc<Mutex<Vec<(IpAddr, SocketAddr, Vec<u8>)>>>,
}

impl DatagramIo for FakeDatagramIo {
    fn init(
        &mut self,
        bind_address: IpAddr,
        _bind_port: u16,
        _router: Arc<dyn Router>,
        _processor: Arc<dyn DatagramProcessor>,
    ) -> Result<(), InitializationError> {
        self.address = Some(bind_address);
        self.log.lock().push(format!("init datagram {}", bind_address));
        Ok(())
    }

    fn run(&self) {}

    fn stop(&self) -> Result<(), TransportError> {
        self.log.lock().push(format!("stop datagram {}", display(self.address)));
        Ok(())
    }

    fn send(&self, message: &OutgoingDatagramMessage) {
        if let Some(address) = self.address {
            self.sent.lock().push((address, message.destination, message.body.to_vec()));
        }
    }

    fn send_packet(&self, data: &[u8], destination: SocketAddr) {
        if let Some(address) = self.address {
            self.sent.lock().push((address, destination, data.to_vec()));
        }
    }
}

pub struct FakeStreamServer {
    log: EventLog,
    address: Option<IpAddr>,
    port: u16,
    taken: Vec<IpAddr>,
    failing_stop: bool,
}

impl StreamServer for FakeStreamServer {
    fn init(&mut self, bind_address: IpAddr, _router: Arc<dyn Router>) -> Result<(), InitializationError> {
        if self.taken.contains(&bind_address) {
            self.log.lock().push(format!("bind conflict {}", bind_address));
            return Err(InitializationError::from_bind(
                "StreamServer",
                bind_address.to_string(),
                std::io::Error::from(std::io::ErrorKind::AddrInUse),
            ));
        }
        self.address = Some(bind_address);
        self.log.lock().push(format!("init server {}", bind_address));
        Ok(())
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn run(&self) {}

    fn stop(&self) -> Result<(), TransportError> {
        self.log.lock().push(format!("stop server {}", display(self.address)));
        if self.failing_stop {
            return Err(TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, "socket already closed")));
        }
        Ok(())
    }
}

fn display(address: Option<IpAddr>) -> String {
    address.map(|a| a.to_string()).unwrap_or_default()
}

/// Stream client answering nothing, logging its stop.
struct SilentClient {
    log: EventLog,
}

impl StreamClient for SilentClient {
    fn send_request(
        &self,
        _request: &StreamRequestMessage,
    ) -> Result<Option<StreamResponseMessage>, TransportError> {
        Ok(None)
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.log.lock().push("stop client".to_string());
        Ok(())
    }
}

/// Configuration creating fakes over a fixed set of interfaces.
pub struct FakeConfiguration {
    pub log: EventLog,
    pub interfaces: Vec<NetworkInterface>,
    pub taken_addresses: Vec<IpAddr>,
    pub failing_server_stop: bool,
    pub fail_client_creation: bool,
    pub clients: Mutex<Vec<Box<dyn StreamClient>>>,
    pub sent: Arc<Mutex<Vec<(IpAddr, SocketAddr, Vec<u8>)>>>,
    pub loops: Arc<InlineExecutor>,
    pub protocols: Arc<InlineExecutor>,
    pub lock_timeout: Duration,
}

impl FakeConfiguration {
    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self {
            log: EventLog::default(),
            interfaces,
            taken_addresses: Vec::new(),
            failing_server_stop: false,
            fail_client_creation: false,
            clients: Mutex::new(Vec::new()),
            sent: Arc::default(),
            loops: Arc::default(),
            protocols: Arc::default(),
            lock_timeout: Duration::from_millis(200),
        }
    }

    pub fn with_taken_address(mut self, address: &str) -> Self {
        self.taken_addresses.push(address.parse().unwrap());
        self
    }

    pub fn with_client(self, client: impl StreamClient + 'static) -> Self {
        self.clients.lock().push(Box::new(client));
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl UpnpServiceConfiguration for FakeConfiguration {
    fn create_network_address_factory(&self) -> Result<Arc<dyn NetworkAddressFactory>, InitializationError> {
        Ok(Arc::new(StaticNetworkAddressFactory::new(self.interfaces.clone())))
    }

    fn create_multicast_receiver(
        &self,
        _address_factory: &dyn NetworkAddressFactory,
    ) -> Option<Box<dyn MulticastReceiver>> {
        Some(Box::new(FakeMulticastReceiver {
            log: Arc::clone(&self.log),
            interface: String::new(),
        }))
    }

    fn create_datagram_io(&self, _address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn DatagramIo>> {
        Some(Box::new(FakeDatagramIo {
            log: Arc::clone(&self.log),
            address: None,
            sent: Arc::clone(&self.sent),
        }))
    }

    fn create_stream_server(&self, _address_factory: &dyn NetworkAddressFactory) -> Option<Box<dyn StreamServer>> {
        Some(Box::new(FakeStreamServer {
            log: Arc::clone(&self.log),
            address: None,
            port: 8080,
            taken: self.taken_addresses.clone(),
            failing_stop: self.failing_server_stop,
        }))
    }

    fn create_stream_client(&self) -> Result<Box<dyn StreamClient>, InitializationError> {
        if self.fail_client_creation {
            return Err(InitializationError::other("StreamClient", "no TLS backend"));
        }
        let client = self.clients.lock().pop();
        Ok(client.unwrap_or_else(|| {
            Box::new(SilentClient {
                log: Arc::clone(&self.log),
            })
        }))
    }

    fn datagram_processor(&self) -> Arc<dyn DatagramProcessor> {
        Arc::new(DefaultDatagramProcessor)
    }

    fn multicast_receiver_executor(&self) -> Arc<dyn Executor> {
        self.loops.clone()
    }

    fn datagram_io_executor(&self) -> Arc<dyn Executor> {
        self.loops.clone()
    }

    fn stream_server_executor(&self) -> Arc<dyn Executor> {
        self.loops.clone()
    }

    fn sync_protocol_executor(&self) -> Arc<dyn Executor> {
        self.protocols.clone()
    }

    fn async_protocol_executor(&self) -> Arc<dyn Executor> {
        self.protocols.clone()
    }

    fn router_lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Protocol factory recording what it handled.
///
/// Search requests get an async protocol, notifications are filtered and
/// stream requests are echoed back.
#[derive(Default)]
pub struct RecordingProtocols {
    pub handled: Arc<Mutex<Vec<String>>>,
}

struct RecordSearch {
    handled: Arc<Mutex<Vec<String>>>,
    source: SocketAddr,
}

impl ReceivingAsync for RecordSearch {
    fn run(self: Box<Self>) {
        self.handled.lock().push(format!("search from {}", self.source));
    }
}

struct Echo {
    request: StreamRequestMessage,
}

impl ReceivingSync for Echo {
    fn execute(&mut self) -> Option<StreamResponseMessage> {
        Some(
            StreamResponseMessage::new(UpnpResponse::ok())
                .with_header("Content-Type", "text/plain")
                .with_body(format!("{} {}", self.request.method, self.request.body_string())),
        )
    }
}

impl ProtocolFactory for RecordingProtocols {
    fn create_receiving_async(
        &self,
        message: IncomingDatagramMessage,
    ) -> Result<Option<Box<dyn ReceivingAsync>>, ProtocolCreationError> {
        match &message.operation {
            UpnpOperation::Request(request) if request.method == UpnpRequestMethod::MSearch => {
                Ok(Some(Box::new(RecordSearch {
                    handled: Arc::clone(&self.handled),
                    source: message.source_address,
                })))
            }
            UpnpOperation::Request(_) => Ok(None),
            UpnpOperation::Response(_) => Err(ProtocolCreationError("unexpected response".to_string())),
        }
    }

    fn create_receiving_sync(
        &self,
        request: StreamRequestMessage,
    ) -> Result<Box<dyn ReceivingSync>, ProtocolCreationError> {
        self.handled.lock().push(format!("stream {}", request.uri.path()));
        Ok(Box::new(Echo { request }))
    }
}

pub fn interface(name: &str, address: &str) -> NetworkInterface {
    NetworkInterface::new(name).with_address(address.parse().unwrap(), 24)
}

pub fn search_datagram(source: &str) -> IncomingDatagramMessage {
    let data = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nST: ssdp:all\r\n\r\n";
    DefaultDatagramProcessor
        .read("192.168.1.10".parse().unwrap(), source.parse().unwrap(), data)
        .unwrap()
}

pub fn notify_datagram(source: &str) -> IncomingDatagramMessage {
    let data = b"NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\nNTS: ssdp:alive\r\n\r\n";
    DefaultDatagramProcessor
        .read("192.168.1.10".parse().unwrap(), source.parse().unwrap(), data)
        .unwrap()
}
