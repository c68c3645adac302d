use std::net::IpAddr;

/// Wi-Fi association as seen by the runtime. Bring-up happens before boot;
/// the runtime only reports it.
pub trait NetworkLink: Send {
    fn is_connected(&self) -> bool;
    fn ssid(&self) -> &str;
    fn ip_address(&self) -> Option<IpAddr>;
}

/// Link whose state is fixed at boot, for hosts where the network is managed
/// by the operating system.
#[derive(Debug, Clone)]
pub struct StaticLink {
    ssid: String,
    ip: Option<IpAddr>,
}

impl StaticLink {
    pub fn new(ssid: impl Into<String>, ip: Option<IpAddr>) -> Self {
        Self {
            ssid: ssid.into(),
            ip,
        }
    }
}

impl NetworkLink for StaticLink {
    fn is_connected(&self) -> bool {
        self.ip.is_some()
    }

    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn ip_address(&self) -> Option<IpAddr> {
        self.ip
    }
}
