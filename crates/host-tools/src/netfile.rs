//! Identity allocation backed by a libvirt network definition.
//!
//! Every node gets a static DHCP entry inside the network's `<dhcp>` block:
//!
//! ```text
//! <host mac="52:54:00:00:01:0b" name="node-011" ip="192.168.122.21"/>
//! ```
//!
//! The file is shared by every node of a run and is only ever rewritten
//! under the allocator's mutex.

use crate::error::HostToolError;
use async_trait::async_trait;
use convergence::{CollaboratorError, IdentityAllocator, NodeNetConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const MAC_PREFIX: &str = "52:54:00:00:01";
const SUBNET: [u8; 3] = [192, 168, 122];
const HOST_OFFSET: u8 = 10;

/// One `<host/>` entry of the network definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// `name` attribute
    pub name: String,
    /// `mac` attribute
    pub mac: String,
    /// `ip` attribute
    pub ip: IpAddr,
}

impl HostEntry {
    /// Entry allocated to node `index`
    pub fn for_index(hostname: &str, index: u32) -> Result<Self, HostToolError> {
        let host = u8::try_from(index)
            .ok()
            .and_then(|octet| octet.checked_add(HOST_OFFSET))
            .filter(|h| *h < 255)
            .ok_or(HostToolError::IndexOutOfRange(index))?;
        Ok(Self {
            name: hostname.to_string(),
            mac: format!("{MAC_PREFIX}:{index:02x}"),
            ip: IpAddr::V4(Ipv4Addr::new(SUBNET[0], SUBNET[1], SUBNET[2], host)),
        })
    }

    /// XML element for this entry
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!("<host mac=\"{}\" name=\"{}\" ip=\"{}\"/>", self.mac, self.name, self.ip)
    }
}

impl From<HostEntry> for NodeNetConfig {
    fn from(entry: HostEntry) -> Self {
        Self {
            hostname: entry.name,
            mac: entry.mac,
            ip: entry.ip,
        }
    }
}

/// Parse every `<host .../>` entry of a network definition.
///
/// Accepts single and double quoted attributes. Entries without a name, MAC
/// or valid IP are reported as errors.
pub fn parse_hosts(path: &Path, xml: &str) -> Result<Vec<HostEntry>, HostToolError> {
    let invalid = |reason: String| HostToolError::NetworkFile {
        path: path.to_path_buf(),
        reason,
    };

    let mut hosts = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<host ") {
        let tail = &rest[start..];
        let end = tail
            .find('>')
            .ok_or_else(|| invalid("unterminated <host> element".to_string()))?;
        let element = &tail[..end];
        let name = attribute(element, "name").ok_or_else(|| invalid(format!("no name in {element}")))?;
        let mac = attribute(element, "mac").ok_or_else(|| invalid(format!("no mac in {element}")))?;
        let ip = attribute(element, "ip")
            .and_then(|ip| ip.parse().ok())
            .ok_or_else(|| invalid(format!("no valid ip in {element}")))?;
        hosts.push(HostEntry {
            name: name.to_string(),
            mac: mac.to_string(),
            ip,
        });
        rest = &tail[end..];
    }
    Ok(hosts)
}

fn attribute<'a>(element: &'a str, key: &str) -> Option<&'a str> {
    let mut search = element;
    loop {
        let at = search.find(key)?;
        let before_ok = at == 0 || search[..at].ends_with(char::is_whitespace);
        let after = &search[at + key.len()..];
        if before_ok {
            if let Some(value) = after.strip_prefix('=') {
                let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
                let value = &value[1..];
                return value.find(quote).map(|close| &value[..close]);
            }
        }
        search = after;
    }
}

/// Insert `entry` before `</dhcp>`, matching the indentation of sibling entries.
pub fn insert_host(path: &Path, xml: &str, entry: &HostEntry) -> Result<String, HostToolError> {
    let close = xml.find("</dhcp>").ok_or_else(|| HostToolError::NetworkFile {
        path: path.to_path_buf(),
        reason: "no </dhcp> element".to_string(),
    })?;
    let line_start = xml[..close].rfind('\n').map_or(0, |i| i + 1);
    let indent = &xml[line_start..close];
    let (child_indent, insert_at) = if indent.trim().is_empty() {
        (format!("{indent}  "), line_start)
    } else {
        (String::new(), close)
    };
    let mut out = String::with_capacity(xml.len() + 80);
    out.push_str(&xml[..insert_at]);
    out.push_str(&child_indent);
    out.push_str(&entry.to_xml());
    if insert_at == line_start {
        out.push('\n');
    }
    out.push_str(&xml[insert_at..]);
    Ok(out)
}

/// Allocates node identities in a libvirt network XML file.
#[derive(Debug, Clone)]
pub struct NetFileAllocator {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl NetFileAllocator {
    /// Allocator over the network definition at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the network definition
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add `hostname` unless it is already declared
    pub async fn add_host(&self, hostname: &str, index: u32) -> Result<HostEntry, HostToolError> {
        let _guard = self.lock.lock().await;
        let xml = tokio::fs::read_to_string(&self.path).await?;

        if let Some(existing) = parse_hosts(&self.path, &xml)?.into_iter().find(|h| h.name == hostname) {
            debug!(%hostname, mac = %existing.mac, "Host already declared");
            return Ok(existing);
        }

        let entry = HostEntry::for_index(hostname, index)?;
        let updated = insert_host(&self.path, &xml, &entry)?;
        let tmp = self.path.with_extension("xml.tmp");
        tokio::fs::write(&tmp, updated).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        info!(%hostname, mac = %entry.mac, ip = %entry.ip, file = %self.path.display(), "Host declared");
        Ok(entry)
    }

    /// Find the entry of `hostname`
    pub async fn find_host(&self, hostname: &str) -> Result<HostEntry, HostToolError> {
        let _guard = self.lock.lock().await;
        let xml = tokio::fs::read_to_string(&self.path).await?;
        parse_hosts(&self.path, &xml)?
            .into_iter()
            .find(|h| h.name == hostname)
            .ok_or_else(|| HostToolError::NodeNotFound(hostname.to_string()))
    }
}

#[async_trait]
impl IdentityAllocator for NetFileAllocator {
    fn hostname_for(&self, root: &str, index: u32) -> String {
        format!("{root}-{index:03}")
    }

    async fn register_node(&self, hostname: &str, index: u32) -> Result<(), CollaboratorError> {
        self.add_host(hostname, index).await?;
        Ok(())
    }

    async fn lookup(&self, hostname: &str) -> Result<NodeNetConfig, CollaboratorError> {
        Ok(self.find_host(hostname).await?.into())
    }
}
