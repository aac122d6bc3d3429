use serde::Deserialize;
use std::process::Command;
use tracing::debug;

use crate::host::{HostError, HostResult, LinkHost, LinkInfo, LinkKind, RouteEntry};

/// [`LinkHost`] backed by the iproute2 `ip` binary.
pub struct IpCommand {
    program: String,
}

impl IpCommand {
    pub fn new() -> Self {
        Self {
            program: "ip".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs `ip` and returns stdout. Failures naming `subject` are classified
    /// into `AlreadyExists`/`NotFound` from the tool's diagnostic.
    fn run(&self, subject: &str, args: &[&str]) -> HostResult<Vec<u8>> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Running: {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| HostError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(subject, command, stderr))
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_failure(subject: &str, command: String, stderr: String) -> HostError {
    if stderr.contains("File exists") || stderr.contains("Device or resource busy") {
        HostError::AlreadyExists(subject.to_string())
    } else if stderr.contains("Cannot find device") || stderr.contains("does not exist") {
        HostError::NotFound(subject.to_string())
    } else {
        HostError::CommandFailed { command, stderr }
    }
}

impl LinkHost for IpCommand {
    fn add_link(&self, name: &str, kind: &LinkKind) -> HostResult<()> {
        match kind {
            LinkKind::Tap => self.run(name, &["tuntap", "add", "dev", name, "mode", "tap"])?,
            LinkKind::Tun => self.run(name, &["tuntap", "add", "dev", name, "mode", "tun"])?,
            LinkKind::Bridge => self.run(name, &["link", "add", "name", name, "type", "bridge"])?,
            LinkKind::Other(other) => {
                self.run(name, &["link", "add", "name", name, "type", other])?
            }
        };
        Ok(())
    }

    fn add_address(&self, name: &str, cidr: &str) -> HostResult<()> {
        self.run(cidr, &["addr", "add", cidr, "dev", name])?;
        Ok(())
    }

    fn set_master(&self, name: &str, master: &str) -> HostResult<()> {
        self.run(name, &["link", "set", "dev", name, "master", master])?;
        Ok(())
    }

    fn set_up(&self, name: &str) -> HostResult<()> {
        self.run(name, &["link", "set", "dev", name, "up"])?;
        Ok(())
    }

    fn link(&self, name: &str) -> HostResult<LinkInfo> {
        let stdout = self.run(name, &["-j", "-d", "link", "show", "dev", name])?;
        parse_link(name, &stdout)
    }

    fn delete_link(&self, name: &str) -> HostResult<()> {
        self.run(name, &["link", "delete", "dev", name])?;
        Ok(())
    }

    fn routes_v4(&self) -> HostResult<Vec<RouteEntry>> {
        let stdout = self.run("route", &["-j", "-4", "route", "show"])?;
        parse_routes(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    address: Option<String>,
    master: Option<String>,
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    info_kind: Option<String>,
    info_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IpRoute {
    #[serde(default)]
    dst: Option<String>,
    dev: Option<String>,
    gateway: Option<String>,
}

fn link_kind(info: Option<&IpLinkInfo>) -> LinkKind {
    let Some(info) = info else {
        return LinkKind::Other("device".to_string());
    };

    match info.info_kind.as_deref() {
        Some("bridge") => LinkKind::Bridge,
        Some("tun") => {
            let mode = info
                .info_data
                .as_ref()
                .and_then(|data| data.get("type"))
                .and_then(|mode| mode.as_str());
            if mode == Some("tap") {
                LinkKind::Tap
            } else {
                LinkKind::Tun
            }
        }
        Some(other) => LinkKind::Other(other.to_string()),
        None => LinkKind::Other("device".to_string()),
    }
}

pub(crate) fn parse_link(name: &str, stdout: &[u8]) -> HostResult<LinkInfo> {
    let links: Vec<IpLink> = serde_json::from_slice(stdout).map_err(|e| HostError::Parse {
        command: format!("ip -j -d link show dev {name}"),
        cause: e.to_string(),
    })?;

    let link = links
        .into_iter()
        .find(|link| link.ifname == name)
        .ok_or_else(|| HostError::NotFound(name.to_string()))?;

    Ok(LinkInfo {
        kind: link_kind(link.linkinfo.as_ref()),
        up: link.flags.iter().any(|flag| flag == "UP"),
        mac: link.address.filter(|mac| !mac.is_empty()),
        master: link.master,
        name: link.ifname,
    })
}

pub(crate) fn parse_routes(stdout: &[u8]) -> HostResult<Vec<RouteEntry>> {
    // `ip -j` prints nothing at all for an empty table.
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    let routes: Vec<IpRoute> = serde_json::from_slice(stdout).map_err(|e| HostError::Parse {
        command: "ip -j -4 route show".to_string(),
        cause: e.to_string(),
    })?;

    Ok(routes
        .into_iter()
        .map(|route| RouteEntry {
            destination: route.dst.filter(|dst| dst != "default"),
            device: route.dev,
            gateway: route.gateway,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAP_JSON: &str = r#"[{"ifindex":7,"ifname":"tap-ts-3f9a1c","flags":["NO-CARRIER","BROADCAST","MULTICAST","UP"],"mtu":1500,"qdisc":"fq_codel","master":"br-ts-8b2e40","operstate":"DOWN","linkmode":"DEFAULT","group":"default","txqlen":1000,"link_type":"ether","address":"5e:1c:9a:3b:02:7d","broadcast":"ff:ff:ff:ff:ff:ff","promiscuity":1,"linkinfo":{"info_kind":"tun","info_data":{"type":"tap","pi":false,"vnet_hdr":false,"persist":true},"info_slave_kind":"bridge"}}]"#;

    const BRIDGE_JSON: &str = r#"[{"ifindex":6,"ifname":"br-ts-8b2e40","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],"mtu":1500,"operstate":"UP","link_type":"ether","address":"62:8d:11:0c:4a:f3","linkinfo":{"info_kind":"bridge","info_data":{"forward_delay":1500,"stp_state":0}}}]"#;

    const ROUTES_JSON: &str = r#"[{"dst":"default","gateway":"192.168.1.1","dev":"enp3s0","protocol":"dhcp","metric":100,"flags":[]},{"dst":"172.23.0.0/24","dev":"br-ts-8b2e40","protocol":"kernel","scope":"link","prefsrc":"172.23.0.1","flags":[]}]"#;

    #[test]
    fn test_parse_tap_link() {
        let link = parse_link("tap-ts-3f9a1c", TAP_JSON.as_bytes()).unwrap();
        assert_eq!(link.kind, LinkKind::Tap);
        assert_eq!(link.mac.as_deref(), Some("5e:1c:9a:3b:02:7d"));
        assert_eq!(link.master.as_deref(), Some("br-ts-8b2e40"));
        assert!(link.up);
    }

    #[test]
    fn test_parse_bridge_link() {
        let link = parse_link("br-ts-8b2e40", BRIDGE_JSON.as_bytes()).unwrap();
        assert_eq!(link.kind, LinkKind::Bridge);
        assert!(link.master.is_none());
    }

    #[test]
    fn test_parse_tun_and_plain_links() {
        let tun = TAP_JSON.replace(r#""type":"tap""#, r#""type":"tun""#);
        let link = parse_link("tap-ts-3f9a1c", tun.as_bytes()).unwrap();
        assert_eq!(link.kind, LinkKind::Tun);

        let plain = r#"[{"ifname":"eth0","flags":["UP"],"address":"52:54:00:12:34:56"}]"#;
        let link = parse_link("eth0", plain.as_bytes()).unwrap();
        assert_eq!(link.kind, LinkKind::Other("device".to_string()));
    }

    #[test]
    fn test_parse_link_rejects_garbage() {
        assert!(matches!(
            parse_link("eth0", b"Device \"eth0\" does not exist."),
            Err(HostError::Parse { .. })
        ));
        assert!(matches!(
            parse_link("eth0", BRIDGE_JSON.as_bytes()),
            Err(HostError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_routes_marks_default() {
        let routes = parse_routes(ROUTES_JSON.as_bytes()).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes[0].is_default());
        assert_eq!(routes[0].device.as_deref(), Some("enp3s0"));
        assert_eq!(routes[1].destination.as_deref(), Some("172.23.0.0/24"));
    }

    #[test]
    fn test_parse_empty_route_table() {
        assert!(parse_routes(b"").unwrap().is_empty());
        assert!(parse_routes(b"[]\n").unwrap().is_empty());
    }

    #[test]
    fn test_classify_failure() {
        let exists = classify_failure(
            "br0",
            "ip link add name br0 type bridge".to_string(),
            "RTNETLINK answers: File exists".to_string(),
        );
        assert!(matches!(exists, HostError::AlreadyExists(_)));

        let missing = classify_failure(
            "br0",
            "ip link set dev br0 up".to_string(),
            "Cannot find device \"br0\"".to_string(),
        );
        assert!(matches!(missing, HostError::NotFound(_)));

        let denied = classify_failure(
            "br0",
            "ip link add name br0 type bridge".to_string(),
            "RTNETLINK answers: Operation not permitted".to_string(),
        );
        assert!(matches!(denied, HostError::CommandFailed { .. }));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let ip = IpCommand::with_program("/nonexistent/ip");
        assert!(matches!(ip.routes_v4(), Err(HostError::Spawn { .. })));
    }
}
