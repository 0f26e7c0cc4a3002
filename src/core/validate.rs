//! Document validation
//!
//! [`validate`] walks the untyped document tree once and either returns a
//! typed [`ConfigDocument`] or every [`ValidationIssue`] it found. It never
//! stops at the first problem, and it has no side effects.

use crate::core::document::{
    Action, ConfigDocument, ConsoleFormat, DefaultPolicies, FileFormat, FirewallSpec,
    InterfaceSpec, Ipv4Mode, Ipv6Mode, LogFiles, LoggingSpec, Protocol, ProtocolMatch, Protocols,
    RouteSpec, RuleSpec, SystemSpec,
};
use crate::core::error::ValidationIssue;
use crate::core::ports::PortSpec;
use crate::validators::{validate_domain, validate_interface, validate_timezone};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Subsystem names accepted under `logging.modules`
pub const LOG_MODULES: [&str; 5] = ["network", "dns", "routing", "firewall", "nat"];

/// Validates a document tree.
///
/// # Errors
///
/// Returns every violation found, in document order.
pub fn validate(tree: &Value) -> Result<ConfigDocument, Vec<ValidationIssue>> {
    let mut v = Validator::default();

    let root = match tree {
        Value::Object(map) => map,
        Value::Null => return Ok(ConfigDocument::default()),
        other => {
            v.issue("", format!("document root must be a mapping, found {}", kind(other)));
            return Err(v.issues);
        }
    };

    let system = root.get("system").and_then(|s| v.system(s));
    let interfaces = root
        .get("interfaces")
        .map(|i| v.interfaces(i))
        .unwrap_or_default();
    let routes = root
        .get("routing")
        .map(|r| v.routing(r))
        .unwrap_or_default();
    let firewall = root.get("firewall").and_then(|f| v.firewall(f, &interfaces));
    let logging = root
        .get("logging")
        .map(|l| v.logging(l))
        .unwrap_or_default();

    if v.issues.is_empty() {
        Ok(ConfigDocument {
            system,
            interfaces,
            routes,
            firewall,
            logging,
        })
    } else {
        Err(v.issues)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Parses a CIDR address, accepting host bits (`192.168.1.10/24`)
fn parse_network(text: &str) -> Result<IpNetwork, String> {
    IpNetwork::from_str(text.trim()).map_err(|e| format!("'{text}' is not a valid network: {e}"))
}

fn parse_level(text: &str) -> Option<tracing::Level> {
    match text.to_ascii_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "error" | "critical" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

#[derive(Default)]
struct Validator {
    issues: Vec<ValidationIssue>,
}

impl Validator {
    fn issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(path, message));
    }

    fn object<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.issue(path, format!("must be a mapping, found {}", kind(other)));
                None
            }
        }
    }

    fn string<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a str> {
        match value {
            Value::String(s) => Some(s.as_str()),
            other => {
                self.issue(path, format!("must be a string, found {}", kind(other)));
                None
            }
        }
    }

    /// Required non-empty string field
    fn required_string<'a>(
        &mut self,
        map: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a str> {
        let field = format!("{path}.{key}");
        match map.get(key) {
            None | Some(Value::Null) => {
                self.issue(field, "is required");
                None
            }
            Some(value) => {
                let s = self.string(&field, value)?;
                if s.trim().is_empty() {
                    self.issue(field, "cannot be empty");
                    None
                } else {
                    Some(s)
                }
            }
        }
    }

    fn boolean(&mut self, map: &Map<String, Value>, path: &str, key: &str) -> bool {
        match map.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                self.issue(
                    format!("{path}.{key}"),
                    format!("must be true or false, found {}", kind(other)),
                );
                false
            }
        }
    }

    fn system(&mut self, value: &Value) -> Option<SystemSpec> {
        let map = self.object("system", value)?;

        let hostname = self.required_string(map, "system", "hostname").and_then(|h| {
            match validate_domain(h) {
                Ok(()) => Some(h.to_string()),
                Err(e) => {
                    self.issue("system.hostname", e);
                    None
                }
            }
        });

        let domain = map.get("domain").and_then(|d| {
            let d = self.string("system.domain", d)?;
            match validate_domain(d) {
                Ok(()) => Some(d.to_string()),
                Err(e) => {
                    self.issue("system.domain", e);
                    None
                }
            }
        });

        let timezone = map.get("timezone").and_then(|tz| {
            let tz = self.string("system.timezone", tz)?;
            match validate_timezone(tz) {
                Ok(()) => Some(tz.to_string()),
                Err(e) => {
                    self.issue("system.timezone", e);
                    None
                }
            }
        });

        let dns_servers = match map.get("dns_servers") {
            None => Vec::new(),
            Some(Value::Array(items)) if items.is_empty() => {
                self.issue("system.dns_servers", "must list at least one server");
                Vec::new()
            }
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let path = format!("system.dns_servers[{i}]");
                    let text = self.string(&path, item)?;
                    match IpAddr::from_str(text.trim()) {
                        Ok(addr) => Some(addr),
                        Err(_) => {
                            self.issue(path, format!("'{text}' is not an IP address"));
                            None
                        }
                    }
                })
                .collect(),
            Some(other) => {
                self.issue(
                    "system.dns_servers",
                    format!("must be a list of addresses, found {}", kind(other)),
                );
                Vec::new()
            }
        };

        Some(SystemSpec {
            hostname: hostname?,
            domain,
            timezone,
            dns_servers,
        })
    }

    fn interfaces(&mut self, value: &Value) -> IndexMap<String, InterfaceSpec> {
        let mut out = IndexMap::new();
        let Some(map) = self.object("interfaces", value) else {
            return out;
        };

        for (name, spec) in map {
            let path = format!("interfaces.{name}");
            if let Err(e) = validate_interface(name) {
                self.issue(&path, e);
            }
            if let Some(spec) = self.interface(&path, name, spec) {
                out.insert(name.clone(), spec);
            }
        }
        out
    }

    fn interface(&mut self, path: &str, name: &str, value: &Value) -> Option<InterfaceSpec> {
        // `lo: {}` and `lo:` (null) both declare an interface with nothing to do
        if value.is_null() {
            return Some(InterfaceSpec::default());
        }
        let map = self.object(path, value)?;

        let ipv4 = map.get("ipv4").and_then(|v| {
            let field = format!("{path}.ipv4");
            let text = self.string(&field, v)?;
            if text.eq_ignore_ascii_case("dhcp") {
                return Some(Ipv4Mode::Dhcp);
            }
            match parse_network(text) {
                Ok(net) if net.is_ipv4() => Some(Ipv4Mode::Static(net)),
                Ok(_) => {
                    self.issue(field, format!("'{text}' is not an IPv4 address"));
                    None
                }
                Err(e) => {
                    self.issue(field, e);
                    None
                }
            }
        });

        let ipv6 = map.get("ipv6").and_then(|v| {
            let field = format!("{path}.ipv6");
            let text = self.string(&field, v)?;
            if text.eq_ignore_ascii_case("auto") {
                return Some(Ipv6Mode::Auto);
            }
            match parse_network(text) {
                Ok(net) if net.is_ipv6() => Some(Ipv6Mode::Static(net)),
                Ok(_) => {
                    self.issue(field, format!("'{text}' is not an IPv6 address"));
                    None
                }
                Err(e) => {
                    self.issue(field, e);
                    None
                }
            }
        });

        let masquerading = self.boolean(map, path, "masquerading");

        let sources_path = format!("{path}.masquerade_sources");
        let masquerade_sources: Vec<IpNetwork> = match map.get("masquerade_sources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let item_path = format!("{sources_path}[{i}]");
                    let text = self.string(&item_path, item)?;
                    match parse_network(text) {
                        Ok(net) if net.is_ipv4() => Some(net),
                        Ok(_) => {
                            self.issue(item_path, format!("'{text}' is not an IPv4 network"));
                            None
                        }
                        Err(e) => {
                            self.issue(item_path, e);
                            None
                        }
                    }
                })
                .collect(),
            Some(other) => {
                self.issue(
                    &sources_path,
                    format!("must be a list of networks, found {}", kind(other)),
                );
                Vec::new()
            }
        };

        let sources_declared = map
            .get("masquerade_sources")
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty());
        if masquerading && !sources_declared {
            self.issue(
                sources_path,
                format!("interface '{name}' has masquerading enabled but no masquerade_sources"),
            );
        }

        Some(InterfaceSpec {
            ipv4,
            ipv6,
            masquerading,
            masquerade_sources,
        })
    }

    fn routing(&mut self, value: &Value) -> Vec<RouteSpec> {
        let Some(map) = self.object("routing", value) else {
            return Vec::new();
        };
        let Some(routes) = map.get("static") else {
            return Vec::new();
        };
        let Value::Array(items) = routes else {
            self.issue(
                "routing.static",
                format!("must be a list of routes, found {}", kind(routes)),
            );
            return Vec::new();
        };

        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.route(&format!("routing.static[{i}]"), item))
            .collect()
    }

    fn route(&mut self, path: &str, value: &Value) -> Option<RouteSpec> {
        let map = self.object(path, value)?;

        let to = self
            .required_string(map, path, "to")
            .and_then(|t| match parse_network(t) {
                Ok(net) => Some(net),
                Err(e) => {
                    self.issue(format!("{path}.to"), e);
                    None
                }
            });

        let via = map.get("via").and_then(|v| {
            let field = format!("{path}.via");
            let text = self.string(&field, v)?;
            match IpAddr::from_str(text.trim()) {
                Ok(addr) => Some(addr),
                Err(_) => {
                    self.issue(field, format!("'{text}' is not an IP address"));
                    None
                }
            }
        });

        let interface = map.get("interface").and_then(|v| {
            let field = format!("{path}.interface");
            let text = self.string(&field, v)?;
            match validate_interface(text) {
                Ok(()) => Some(text.to_string()),
                Err(e) => {
                    self.issue(field, e);
                    None
                }
            }
        });

        if !map.contains_key("via") && !map.contains_key("interface") {
            self.issue(path, "a route needs 'via', 'interface', or both");
        }

        let metric = map.get("metric").and_then(|m| {
            let value = m.as_u64().and_then(|n| u32::try_from(n).ok());
            if value.is_none() {
                self.issue(
                    format!("{path}.metric"),
                    format!("must be a non-negative integer, found {m}"),
                );
            }
            value
        });

        Some(RouteSpec {
            to: to?,
            via,
            interface,
            metric,
        })
    }

    fn action(&mut self, path: &str, value: &Value) -> Option<Action> {
        let text = self.string(path, value)?;
        match Action::from_str(text.trim()) {
            Ok(action) => Some(action),
            Err(_) => {
                self.issue(
                    path,
                    format!("'{text}' is not one of accept, drop, reject"),
                );
                None
            }
        }
    }

    fn firewall(
        &mut self,
        value: &Value,
        interfaces: &IndexMap<String, InterfaceSpec>,
    ) -> Option<FirewallSpec> {
        let map = self.object("firewall", value)?;
        // An empty section declares nothing to manage, same as no section
        if map.is_empty() {
            return None;
        }

        let mut default = DefaultPolicies::default();
        if let Some(policies) = map.get("default")
            && let Some(policies) = self.object("firewall.default", policies)
        {
            for (chain, policy) in policies {
                let path = format!("firewall.default.{chain}");
                let slot = match chain.as_str() {
                    "input" => &mut default.input,
                    "forward" => &mut default.forward,
                    "output" => &mut default.output,
                    _ => {
                        self.issue(path, "unknown chain (expected input, forward or output)");
                        continue;
                    }
                };
                if let Some(action) = self.action(&path, policy) {
                    *slot = action;
                }
            }
        }

        let stateful = self.boolean(map, "firewall", "stateful");

        let rules = match map.get("rules") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| self.rule(i, item, interfaces))
                .collect(),
            Some(other) => {
                self.issue(
                    "firewall.rules",
                    format!("must be a list of rules, found {}", kind(other)),
                );
                Vec::new()
            }
        };

        Some(FirewallSpec {
            default,
            stateful,
            rules,
        })
    }

    fn rule(
        &mut self,
        index: usize,
        value: &Value,
        interfaces: &IndexMap<String, InterfaceSpec>,
    ) -> Option<RuleSpec> {
        let path = format!("firewall.rules[{index}]");
        let map = self.object(&path, value)?;

        let name = self.required_string(map, &path, "name");

        let endpoint = |v: &mut Self, key: &str| {
            let iface = v.required_string(map, &path, key)?;
            if interfaces.contains_key(iface) {
                Some(iface.to_string())
            } else {
                v.issue(
                    format!("{path}.{key}"),
                    format!("interface '{iface}' is not declared under interfaces"),
                );
                None
            }
        };
        let from = endpoint(self, "from");
        let to = endpoint(self, "to");

        let action = match map.get("action") {
            None | Some(Value::Null) => {
                self.issue(format!("{path}.action"), "is required");
                None
            }
            Some(a) => self.action(&format!("{path}.action"), a),
        };

        let protocols = self.protocols(&path, map.get("protocols"));

        Some(RuleSpec {
            name: name?.to_string(),
            from: from?,
            to: to?,
            action: action?,
            protocols: protocols?,
        })
    }

    fn protocols(&mut self, rule_path: &str, value: Option<&Value>) -> Option<Protocols> {
        let path = format!("{rule_path}.protocols");
        match value {
            None | Some(Value::Null) => Some(Protocols::Any),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("any") => Some(Protocols::Any),
            Some(Value::String(s)) => {
                self.issue(path, format!("'{s}' is not allowed (use 'any' or a mapping)"));
                None
            }
            Some(Value::Object(map)) if map.is_empty() => {
                self.issue(path, "must declare at least one protocol");
                None
            }
            Some(Value::Object(map)) => {
                let before = self.issues.len();
                let mut matches = Vec::with_capacity(map.len());
                for (key, ports) in map {
                    let field = format!("{path}.{key}");
                    let Ok(protocol) = Protocol::from_str(key) else {
                        self.issue(field, format!("unknown protocol '{key}' (expected tcp, udp or icmp)"));
                        continue;
                    };
                    if !protocol.has_ports() {
                        matches.push(ProtocolMatch {
                            protocol,
                            ports: None,
                        });
                        continue;
                    }
                    match PortSpec::from_value(ports) {
                        Ok(spec) => matches.push(ProtocolMatch {
                            protocol,
                            ports: Some(spec),
                        }),
                        Err(e) => self.issue(field, e),
                    }
                }
                (self.issues.len() == before).then_some(Protocols::Match(matches))
            }
            Some(other) => {
                self.issue(path, format!("must be 'any' or a mapping, found {}", kind(other)));
                None
            }
        }
    }

    fn logging(&mut self, value: &Value) -> LoggingSpec {
        let mut spec = LoggingSpec::default();
        let Some(map) = self.object("logging", value) else {
            return spec;
        };

        let level = |v: &mut Self, path: &str, value: &Value| {
            let text = v.string(path, value)?;
            let level = parse_level(text);
            if level.is_none() {
                v.issue(path, format!("'{text}' is not a log level"));
            }
            level
        };

        spec.level = map.get("level").and_then(|l| level(self, "logging.level", l));
        spec.debug = self.boolean(map, "logging", "debug");

        if let Some(modules) = map.get("modules")
            && let Some(modules) = self.object("logging.modules", modules)
        {
            for (module, value) in modules {
                let path = format!("logging.modules.{module}");
                if !LOG_MODULES.contains(&module.as_str()) {
                    self.issue(path, format!("unknown module (expected one of {})", LOG_MODULES.join(", ")));
                    continue;
                }
                if let Some(l) = level(self, &path, value) {
                    spec.modules.insert(module.clone(), l);
                }
            }
        }

        if let Some(formats) = map.get("formats")
            && let Some(formats) = self.object("logging.formats", formats)
        {
            if let Some(console) = formats.get("console")
                && let Some(text) = self.string("logging.formats.console", console)
            {
                match ConsoleFormat::from_str(text) {
                    Ok(f) => spec.console = f,
                    Err(_) => self.issue(
                        "logging.formats.console",
                        format!("'{text}' is not one of minimal, simple, detailed"),
                    ),
                }
            }
            if let Some(file) = formats.get("file")
                && let Some(text) = self.string("logging.formats.file", file)
            {
                match FileFormat::from_str(text) {
                    Ok(f) => spec.file_format = f,
                    Err(_) => self.issue(
                        "logging.formats.file",
                        format!("'{text}' is not one of json, simple, detailed"),
                    ),
                }
            }
        }

        if let Some(files) = map.get("files")
            && let Some(files) = self.object("logging.files", files)
        {
            let path_of = |v: &mut Self, key: &str| {
                let value = files.get(key)?;
                let text = v.string(&format!("logging.files.{key}"), value)?;
                Some(PathBuf::from(text))
            };
            spec.files = LogFiles {
                application: path_of(self, "application"),
                error: path_of(self, "error"),
                debug: path_of(self, "debug"),
                audit: path_of(self, "audit"),
            };
        }

        spec
    }
}
