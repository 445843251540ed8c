//! Helpers for probing the host and parsing `nmcli` / `ip` output

use regex::Regex;
use std::path::Path;
use std::process::Command;

/// One row of `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device: String,
    pub kind: String,
    pub state: String,
    pub connection: Option<String>,
}

impl DeviceStatus {
    pub fn is_connected_wifi(&self) -> bool {
        self.kind == "wifi" && self.state == "connected"
    }
}

/// An IPv4 address assigned to an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    pub address: String,
}

/// Check whether a command can be executed at all
pub fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check whether any network interface exposes wireless extensions
pub fn has_wireless_interface() -> bool {
    has_wireless_interface_in(Path::new("/sys/class/net"))
}

/// Same as [`has_wireless_interface`], over a sysfs-style interface directory
pub fn has_wireless_interface_in(net_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(net_dir) else {
        return false;
    };
    entries
        .flatten()
        .any(|entry| entry.path().join("wireless").exists())
}

/// Split a terse nmcli line on unescaped ':' and unescape `\:` / `\\`
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device status`
pub fn parse_device_status(output: &str) -> Vec<DeviceStatus> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = split_terse(line).into_iter();
            let device = fields.next()?;
            let kind = fields.next()?;
            let state = fields.next()?;
            let connection = fields.next().filter(|c| !c.is_empty() && c != "--");
            Some(DeviceStatus {
                device,
                kind,
                state,
                connection,
            })
        })
        .collect()
}

/// Parse `ip -4 -o addr show`
pub fn parse_ipv4_addresses(output: &str) -> Vec<InterfaceAddress> {
    let Ok(re) = Regex::new(r"^\d+:\s+(\S+?)(?:@\S+)?\s+inet\s+(\d{1,3}(?:\.\d{1,3}){3})/") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(InterfaceAddress {
                interface: caps.get(1)?.as_str().to_string(),
                address: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Interface names an access point typically runs on
pub fn looks_like_hotspot_interface(name: &str) -> bool {
    name != "lo" && ["ap", "wlan", "hotspot"].iter().any(|hint| name.contains(hint))
}

/// First address on an interface that looks like it hosts the access point
pub fn pick_hotspot_ipv4(addresses: &[InterfaceAddress]) -> Option<String> {
    addresses
        .iter()
        .find(|a| looks_like_hotspot_interface(&a.interface))
        .map(|a| a.address.clone())
}

/// Drop one pair of surrounding double quotes, as some platforms report them
pub fn strip_quotes(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}
