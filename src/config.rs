use std::net::IpAddr;

use anyhow::{anyhow, Result};

#[derive(Clone)]
pub struct WsPort(u16);

#[derive(Clone)]
pub struct WcPort(u16);

#[derive(Clone)]
pub struct WsWallclockEnable(bool);

#[derive(Clone)]
pub struct ControllerAllowList(Vec<IpAddr>);

#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub ws_port: WsPort,
    pub wc_port: WcPort,
    pub advertise_addr: String,
    pub ws_wallclock: WsWallclockEnable,
    pub controller_allow: ControllerAllowList,
}

impl Config {
    pub fn new() -> Result<Self> {
        let ws_port: WsPort = default_env("WS_PORT", "7681").try_into()?;
        let wc_port: WcPort = default_env("WC_PORT", "6677").try_into()?;

        // Must match the address clients will actually see; cannot be 0.0.0.0.
        let advertise_addr = default_env("ADVERTISE_ADDR", "127.0.0.1");

        let ws_wallclock: WsWallclockEnable = default_env("WS_WALLCLOCK", "false").try_into()?;

        let controller_allow: ControllerAllowList =
            default_env("PROXY_LISTEN_ON", "127.0.0.1").try_into()?;

        Ok(Self {
            version: version()?,
            ws_port,
            wc_port,
            advertise_addr,
            ws_wallclock,
            controller_allow,
        })
    }
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or(default_value.to_string())
}

pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(anyhow!("one of GIT_HASH or CARGO_PKG_VERSION must be set"))
}

impl TryFrom<String> for WsPort {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse::<u16>().map(Self).map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing WS_PORT into u16 failed"))
        })
    }
}

impl AsRef<u16> for WsPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for WcPort {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse::<u16>().map(Self).map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing WC_PORT into u16 failed"))
        })
    }
}

impl AsRef<u16> for WcPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for WsWallclockEnable {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.parse::<bool>().map_err(|err| {
            anyhow::Error::new(err).context(anyhow!("parsing WS_WALLCLOCK into bool failed"))
        })?;
        Ok(Self(value))
    }
}

impl AsRef<bool> for WsWallclockEnable {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for ControllerAllowList {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let addrs = value
            .split(';')
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.trim().parse::<IpAddr>().map_err(|err| {
                    anyhow::Error::new(err)
                        .context(anyhow!("parsing PROXY_LISTEN_ON entry {} failed", part))
                })
            })
            .collect::<Result<Vec<IpAddr>>>()?;
        Ok(Self(addrs))
    }
}

impl AsRef<Vec<IpAddr>> for ControllerAllowList {
    fn as_ref(&self) -> &Vec<IpAddr> {
        &self.0
    }
}
