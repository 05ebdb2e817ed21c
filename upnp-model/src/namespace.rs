//! Local URL paths of hosted devices and services.

use url::Url;

use crate::meta::Service;
use crate::network::NetworkAddress;

const DEVICE: &str = "/dev";
const SERVICE: &str = "/svc";
const CONTROL: &str = "/action";
const EVENTS: &str = "/event";
const CALLBACK_FILE: &str = "/cb";

/// Builds paths such as `/dev/<udn>/svc/<namespace>/<id>/event/cb` under an
/// optional base path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    base_path: String,
}

impl Namespace {
    pub fn new(base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn service_path<S: Service + ?Sized>(&self, service: &S) -> String {
        format!(
            "{}{}/{}{}/{}/{}",
            self.base_path,
            DEVICE,
            service.udn().identifier_string(),
            SERVICE,
            service.service_id().namespace(),
            service.service_id().id()
        )
    }

    pub fn control_path<S: Service + ?Sized>(&self, service: &S) -> String {
        format!("{}{}", self.service_path(service), CONTROL)
    }

    pub fn event_subscription_path<S: Service + ?Sized>(&self, service: &S) -> String {
        format!("{}{}", self.service_path(service), EVENTS)
    }

    pub fn event_callback_path<S: Service + ?Sized>(&self, service: &S) -> String {
        format!("{}{}{}", self.service_path(service), EVENTS, CALLBACK_FILE)
    }

    /// Absolute callback URL on one of the local stream servers.
    pub fn event_callback_url<S: Service + ?Sized>(
        &self,
        address: &NetworkAddress,
        service: &S,
    ) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "http://{}{}",
            address.socket_addr(),
            self.event_callback_path(service)
        ))
    }

    /// Whether an inbound request path is a GENA callback.
    pub fn is_event_callback_path(&self, path: &str) -> bool {
        path.starts_with(&self.base_path)
            && path.contains(SERVICE)
            && path.ends_with(&format!("{}{}", EVENTS, CALLBACK_FILE))
    }
}
