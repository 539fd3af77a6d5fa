use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use super::Route;

/// One line that failed to parse. Carries enough context for the caller to
/// decide whether it's fatal (a malformed static directive on first load)
/// or merely logged and skipped (everything else).
#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub line_no: usize,
    pub line: String,
    pub message: String,
    pub is_static: bool,
}

/// Everything a single config-file parse produces. Static fields are
/// `Option` because a reload doesn't apply them even if present (statics
/// don't change live); the caller decides what to do with them.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub addr: Option<Ipv4Net>,
    pub port: Option<u16>,
    pub host: Option<Ipv4Addr>,
    pub mtu: Option<u16>,
    pub bind: Option<bool>,
    pub tokens: HashMap<String, Ipv4Addr>,
    pub expose: Option<String>,
    pub routes: Vec<Route>,
    pub intents: HashMap<String, bool>,
    pub hosts: Vec<u8>,
}

/// Parses the line-oriented directive grammar described in the config
/// store's §4.1 grammar table. Never fails outright: malformed lines are
/// collected as warnings and skipped so that the rest of the file still
/// applies.
pub fn parse(content: &str) -> (ParsedConfig, Vec<ParseWarning>) {
    let mut cfg = ParsedConfig::default();
    let mut warnings = Vec::new();

    let mut lines = content.lines().enumerate().peekable();
    while let Some((idx, raw_line)) = lines.next() {
        let line_no = idx + 1;
        let line = raw_line.trim_start();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();

        let mut warn = |message: String, is_static: bool| ParseWarning {
            line_no,
            line: raw_line.to_string(),
            message,
            is_static,
        };

        match directive {
            "addr" => match rest.parse::<Ipv4Net>() {
                Ok(net) => cfg.addr = Some(net),
                Err(e) => warnings.push(warn(format!("invalid addr '{rest}': {e}"), true)),
            },
            "port" => match rest.parse::<u16>() {
                Ok(p) => cfg.port = Some(p),
                Err(e) => warnings.push(warn(format!("invalid port '{rest}': {e}"), true)),
            },
            "host" => match rest.parse::<Ipv4Addr>() {
                Ok(h) => cfg.host = Some(h),
                Err(e) => warnings.push(warn(format!("invalid host '{rest}': {e}"), true)),
            },
            "mtu" => match rest.parse::<u16>() {
                Ok(m) => cfg.mtu = Some(m),
                Err(e) => warnings.push(warn(format!("invalid mtu '{rest}': {e}"), true)),
            },
            "bind" => {
                if rest.is_empty() {
                    cfg.bind = Some(true);
                } else {
                    match parse_bool(rest) {
                        Some(b) => cfg.bind = Some(b),
                        None => warnings.push(warn(format!("invalid bind value '{rest}'"), true)),
                    }
                }
            }
            "token" => {
                let mut tok = rest.split_whitespace();
                match (tok.next(), tok.next()) {
                    (Some(name), Some(ip)) => match ip.parse::<Ipv4Addr>() {
                        Ok(ip) => {
                            cfg.tokens.insert(name.to_string(), ip);
                        }
                        Err(e) => warnings.push(warn(format!("invalid token ip '{ip}': {e}"), true)),
                    },
                    _ => warnings.push(warn(format!("malformed token directive '{rest}'"), true)),
                }
            }
            "expose" => {
                if rest.is_empty() {
                    warnings.push(warn("expose requires a host:port argument".to_string(), true));
                } else {
                    cfg.expose = Some(rest.to_string());
                }
            }
            "route" => match parse_route(rest) {
                Ok(route) => cfg.routes.push(route),
                Err(e) => warnings.push(warn(e, false)),
            },
            "iptables" => match parse_intent(rest) {
                Ok((key, value)) => {
                    cfg.intents.insert(key, value);
                }
                Err(e) => warnings.push(warn(e, false)),
            },
            "hosts" => {
                let mut block = Vec::new();
                loop {
                    match lines.next() {
                        Some((_, block_line)) if block_line.trim() == "end" => break,
                        Some((_, block_line)) => {
                            block.extend_from_slice(block_line.as_bytes());
                            block.push(b'\n');
                        }
                        None => {
                            warnings.push(warn("unterminated hosts block (missing 'end')".to_string(), false));
                            break;
                        }
                    }
                }
                cfg.hosts.extend_from_slice(&block);
            }
            other => warnings.push(warn(format!("unknown directive '{other}'"), false)),
        }
    }

    (cfg, warnings)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_route(rest: &str) -> Result<Route, String> {
    let mut parts = rest.split_whitespace();
    let cidr = parts.next().ok_or_else(|| "route directive requires a CIDR argument".to_string())?;
    let subnet: Ipv4Net = cidr.parse().map_err(|e| format!("invalid route CIDR '{cidr}': {e}"))?;
    let expose = matches!(parts.next(), Some("expose"));
    Ok(Route { subnet, expose })
}

/// An intent argument is two subnet addresses joined by a single `+` or
/// `-`, e.g. `10.0.1.0+10.0.2.0`. The whole string (sign included) is the
/// map key; the sign also determines the stored boolean (`+` => true,
/// connect; `-` => false, disconnect).
fn parse_intent(rest: &str) -> Result<(String, bool), String> {
    if rest.is_empty() {
        return Err("iptables directive requires an A+B or A-B argument".to_string());
    }
    match rest.find(['+', '-']) {
        Some(i) => Ok((rest.to_string(), rest.as_bytes()[i] == b'+')),
        None => Err(format!("iptables argument '{rest}' has no '+' or '-' separator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_directives() {
        let (cfg, warnings) = parse("addr 192.168.251.1/24\nport 1234\nhost 0.0.0.0\nmtu 1300\nbind\n");
        assert!(warnings.is_empty());
        assert_eq!(cfg.addr.unwrap().to_string(), "192.168.251.1/24");
        assert_eq!(cfg.port, Some(1234));
        assert_eq!(cfg.host, Some("0.0.0.0".parse().unwrap()));
        assert_eq!(cfg.mtu, Some(1300));
        assert_eq!(cfg.bind, Some(true));
    }

    #[test]
    fn parses_route_and_intent() {
        let (cfg, warnings) = parse("route 172.17.0.0/16 expose\niptables 10.0.1.0+10.0.2.0\niptables 10.0.3.0-10.0.4.0\n");
        assert!(warnings.is_empty());
        assert_eq!(cfg.routes.len(), 1);
        assert!(cfg.routes[0].expose);
        assert_eq!(cfg.intents.get("10.0.1.0+10.0.2.0"), Some(&true));
        assert_eq!(cfg.intents.get("10.0.3.0-10.0.4.0"), Some(&false));
    }

    #[test]
    fn parses_hosts_block() {
        let (cfg, warnings) = parse("hosts\n1.1.1.1 a\n2.2.2.2 b\nend\n");
        assert!(warnings.is_empty());
        assert_eq!(cfg.hosts, b"1.1.1.1 a\n2.2.2.2 b\n".to_vec());
    }

    #[test]
    fn skips_malformed_lines_but_keeps_valid_ones() {
        let (cfg, warnings) = parse("route not-a-cidr\nroute 172.18.0.0/16\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(cfg.routes.len(), 1);
        assert_eq!(cfg.routes[0].subnet.to_string(), "172.18.0.0/16");
    }

    #[test]
    fn flags_malformed_static_directive_as_static() {
        let (_, warnings) = parse("addr not-a-cidr\n");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].is_static);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let (cfg, warnings) = parse("# a comment\n\n   # indented comment\nport 42\n");
        assert!(warnings.is_empty());
        assert_eq!(cfg.port, Some(42));
    }
}
