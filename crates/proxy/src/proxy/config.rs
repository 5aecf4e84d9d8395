//! JSON configuration.
//!
//! The configuration lists every proxy once. Proxies refer to each other by name (default
//! backend, switching rules, `setbe` filters), so they are built depth-first: a proxy is
//! built after every proxy it references, and references forming a cycle are rejected.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::from_json(r#"{
//!     "proxies": [
//!         { "id": "app", "servers": [{ "id": "s1", "cookie": "A" }] },
//!         { "id": "www", "options": ["httpclose"], "default_backend": "app" }
//!     ]
//! }"#)?;
//! let fe = registry.get("www").unwrap();
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use regex::bytes::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info};
use triomphe::Arc;

use crate::pipeline::acl::{Acl, IntRange};
use crate::protocol::ConfigError;
use crate::protocol::fixed::{ErrorMessages, HttpErr};
use crate::protocol::header::CaptureHeader;
use crate::proxy::{
    Action, AppSessionConfig, AppSessionStore, CAPTURE_LEN, CondPolicy, Conditional, CookieCapture, CookieConfig,
    ForwardHeader, HdrExp, Ipv4Net, Proxy, ProxyOptions, RedirectKind, RedirectRule, Server, SwitchingRule, Timeouts,
    UriAuth, UrlParam,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub proxies: Vec<ProxyConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionName {
    Httpclose,
    Forceclose,
    Checkcache,
    Persist,
    HttpProxy,
    Httplog,
    AcceptInvalidHttpRequest,
    AcceptInvalidHttpResponse,
}

impl OptionName {
    fn flag(self) -> ProxyOptions {
        match self {
            OptionName::Httpclose => ProxyOptions::HTTP_CLOSE,
            OptionName::Forceclose => ProxyOptions::FORCE_CLOSE,
            OptionName::Checkcache => ProxyOptions::CHK_CACHE,
            OptionName::Persist => ProxyOptions::PERSIST,
            OptionName::HttpProxy => ProxyOptions::HTTP_PROXY,
            OptionName::Httplog => ProxyOptions::HTTP_LOG,
            OptionName::AcceptInvalidHttpRequest => ProxyOptions::ACCEPT_INVALID_REQ,
            OptionName::AcceptInvalidHttpResponse => ProxyOptions::ACCEPT_INVALID_RESP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieMode {
    Rewrite,
    Insert,
    Indirect,
    Prefix,
    Nocache,
    Postonly,
}

impl CookieMode {
    fn flag(self) -> ProxyOptions {
        match self {
            CookieMode::Rewrite => ProxyOptions::COOK_RW,
            CookieMode::Insert => ProxyOptions::COOK_INS,
            CookieMode::Indirect => ProxyOptions::COOK_IND,
            CookieMode::Prefix => ProxyOptions::COOK_PFX,
            CookieMode::Nocache => ProxyOptions::COOK_NOC,
            CookieMode::Postonly => ProxyOptions::COOK_POST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieSection {
    pub name: String,
    #[serde(default)]
    pub modes: Vec<CookieMode>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSessionSection {
    pub name: String,
    pub len: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub name: String,
    #[serde(default = "default_capture_len")]
    pub len: usize,
}

fn default_capture_len() -> usize {
    CAPTURE_LEN
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    pub header: Option<String>,
    pub except: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlParamConfig {
    pub name: String,
    #[serde(default)]
    pub post_limit: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub http_request_ms: Option<u64>,
    pub tarpit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    pub uri: String,
    pub realm: Option<String>,
    /// `user:password` pairs
    #[serde(default)]
    pub users: Vec<String>,
    pub refresh_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub cookie: Option<String>,
    pub address: Option<SocketAddr>,
    /// redirect prefix answered instead of forwarding requests
    pub redirect: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Allow,
    Deny,
    Tarpit,
    Pass,
    Replace,
    Remove,
    Setbe,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub pattern: String,
    pub action: FilterAction,
    #[serde(default)]
    pub ignore_case: bool,
    pub replacement: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKindConfig {
    Location,
    Prefix,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    pub kind: RedirectKindConfig,
    pub target: String,
    #[serde(default = "default_redirect_code")]
    pub code: u16,
    pub cookie: Option<String>,
    #[serde(default)]
    pub drop_query: bool,
    pub cond: Option<CondConfig>,
}

fn default_redirect_code() -> u16 {
    302
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchingConfig {
    pub backend: String,
    pub cond: CondConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CondConfig {
    #[serde(default)]
    pub unless: bool,
    pub acl: AclConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct IntRangeConfig {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl From<IntRangeConfig> for IntRange {
    fn from(range: IntRangeConfig) -> Self {
        IntRange::new(range.min.unwrap_or(i64::MIN), range.max.unwrap_or(i64::MAX))
    }
}

/// A condition, tagged by the sample it fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "fetch", rename_all = "snake_case")]
pub enum AclConfig {
    Method { values: Vec<String> },
    ReqVer { values: Vec<String> },
    RespVer { values: Vec<String> },
    Status { ranges: Vec<IntRangeConfig> },
    Url { values: Vec<String> },
    UrlBeg { values: Vec<String> },
    UrlEnd { values: Vec<String> },
    UrlSub { values: Vec<String> },
    UrlReg { pattern: String },
    PathBeg { values: Vec<String> },
    PathEnd { values: Vec<String> },
    Hdr { name: String, values: Vec<String> },
    HdrBeg { name: String, values: Vec<String> },
    HdrSub { name: String, values: Vec<String> },
    HdrCnt { name: String, ranges: Vec<IntRangeConfig> },
    AlwaysTrue,
    AlwaysFalse,
    Not { acl: Box<AclConfig> },
    All { acls: Vec<AclConfig> },
    Any { acls: Vec<AclConfig> },
}

fn to_bytes(values: Vec<String>) -> Vec<Bytes> {
    values.into_iter().map(Bytes::from).collect()
}

fn to_methods(values: Vec<String>) -> Result<Vec<Bytes>, ConfigError> {
    for value in &values {
        http::Method::from_bytes(value.as_bytes())
            .map_err(|e| ConfigError::InvalidValue { field: "method", reason: format!("{value}: {e}") })?;
    }
    Ok(to_bytes(values))
}

fn to_ranges(ranges: Vec<IntRangeConfig>) -> Vec<IntRange> {
    ranges.into_iter().map(IntRange::from).collect()
}

impl AclConfig {
    pub fn build(self) -> Result<Acl, ConfigError> {
        Ok(match self {
            AclConfig::Method { values } => Acl::Method(to_methods(values)?),
            AclConfig::ReqVer { values } => Acl::ReqVer(to_bytes(values)),
            AclConfig::RespVer { values } => Acl::RespVer(to_bytes(values)),
            AclConfig::Status { ranges } => Acl::Status(to_ranges(ranges)),
            AclConfig::Url { values } => Acl::Url(to_bytes(values)),
            AclConfig::UrlBeg { values } => Acl::UrlBeg(to_bytes(values)),
            AclConfig::UrlEnd { values } => Acl::UrlEnd(to_bytes(values)),
            AclConfig::UrlSub { values } => Acl::UrlSub(to_bytes(values)),
            AclConfig::UrlReg { pattern } => Acl::UrlReg(Regex::new(&pattern)?),
            AclConfig::PathBeg { values } => Acl::PathBeg(to_bytes(values)),
            AclConfig::PathEnd { values } => Acl::PathEnd(to_bytes(values)),
            AclConfig::Hdr { name, values } => Acl::Hdr(Bytes::from(name), to_bytes(values)),
            AclConfig::HdrBeg { name, values } => Acl::HdrBeg(Bytes::from(name), to_bytes(values)),
            AclConfig::HdrSub { name, values } => Acl::HdrSub(Bytes::from(name), to_bytes(values)),
            AclConfig::HdrCnt { name, ranges } => Acl::HdrCnt(Bytes::from(name), to_ranges(ranges)),
            AclConfig::AlwaysTrue => Acl::AlwaysTrue,
            AclConfig::AlwaysFalse => Acl::AlwaysFalse,
            AclConfig::Not { acl } => Acl::Not(Box::new(acl.build()?)),
            AclConfig::All { acls } => Acl::All(acls.into_iter().map(AclConfig::build).collect::<Result<_, _>>()?),
            AclConfig::Any { acls } => Acl::Any(acls.into_iter().map(AclConfig::build).collect::<Result<_, _>>()?),
        })
    }
}

impl CondConfig {
    pub fn build(self) -> Result<Conditional, ConfigError> {
        let policy = if self.unless { CondPolicy::Unless } else { CondPolicy::If };
        Ok(Conditional::new(policy, Box::new(self.acl.build()?)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub id: String,
    #[serde(default)]
    pub options: Vec<OptionName>,
    pub monitor_uri: Option<String>,
    #[serde(default)]
    pub monitor_fail: Vec<CondConfig>,
    #[serde(default)]
    pub block: Vec<CondConfig>,
    #[serde(default)]
    pub reqexp: Vec<FilterConfig>,
    #[serde(default)]
    pub rspexp: Vec<FilterConfig>,
    #[serde(default)]
    pub reqadd: Vec<String>,
    #[serde(default)]
    pub rspadd: Vec<String>,
    pub stats: Option<StatsConfig>,
    #[serde(default)]
    pub redirects: Vec<RedirectConfig>,
    #[serde(default)]
    pub use_backend: Vec<SwitchingConfig>,
    pub default_backend: Option<String>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    pub cookie: Option<CookieSection>,
    pub appsession: Option<AppSessionSection>,
    pub capture_cookie: Option<CaptureConfig>,
    #[serde(default)]
    pub capture_request_headers: Vec<CaptureConfig>,
    #[serde(default)]
    pub capture_response_headers: Vec<CaptureConfig>,
    pub forwardfor: Option<ForwardConfig>,
    pub originalto: Option<ForwardConfig>,
    pub url_param: Option<UrlParamConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// error responses keyed by status code
    #[serde(default)]
    pub errorfiles: HashMap<HttpErr, String>,
}

impl ProxyConfig {
    /// Names of the proxies this one must be built after.
    fn references(&self) -> impl Iterator<Item = &str> {
        self.default_backend
            .as_deref()
            .into_iter()
            .chain(self.use_backend.iter().map(|rule| rule.backend.as_str()))
            .chain(self.reqexp.iter().filter_map(|f| f.backend.as_deref()))
    }
}

/// Proxies built from a configuration, by name.
#[derive(Debug, Default)]
pub struct Registry {
    proxies: HashMap<String, Arc<Proxy>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Registry {
    /// Parses `json` and builds every proxy it declares.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for malformed JSON, duplicate or unknown proxy names,
    /// reference cycles, invalid patterns and invalid networks.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let root: RootConfig = serde_json::from_str(json)?;
        Self::build(root.proxies)
    }

    pub fn build(configs: Vec<ProxyConfig>) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::with_capacity(configs.len());
        for config in configs {
            let id = config.id.clone();
            if by_name.insert(id.clone(), config).is_some() {
                return Err(ConfigError::DuplicateProxy { name: id });
            }
        }

        let mut registry = Registry::default();
        let mut marks = HashMap::with_capacity(by_name.len());
        let mut names: Vec<&String> = by_name.keys().collect();
        names.sort();
        for name in names {
            registry.visit(name, &by_name, &mut marks)?;
        }

        info!(proxies = registry.proxies.len(), "configuration loaded");
        Ok(registry)
    }

    fn visit<'a>(
        &mut self,
        name: &'a str,
        configs: &'a HashMap<String, ProxyConfig>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), ConfigError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(ConfigError::CyclicBackend { name: name.to_owned() }),
            None => {}
        }

        let config = configs.get(name).ok_or_else(|| ConfigError::unknown_backend(name))?;
        marks.insert(name, Mark::Visiting);
        for reference in config.references() {
            self.visit(reference, configs, marks)?;
        }

        let proxy = self.build_proxy(config.clone())?;
        debug!(proxy = name, "proxy built");
        self.proxies.insert(name.to_owned(), Arc::new(proxy));
        marks.insert(name, Mark::Done);
        Ok(())
    }

    fn backend(&self, name: &str) -> Result<Arc<Proxy>, ConfigError> {
        self.proxies.get(name).cloned().ok_or_else(|| ConfigError::unknown_backend(name))
    }

    fn build_proxy(&self, config: ProxyConfig) -> Result<Proxy, ConfigError> {
        let mut proxy = Proxy::new(config.id);

        for option in config.options {
            proxy.options.insert(option.flag());
        }

        proxy.monitor_uri = config.monitor_uri.map(Bytes::from);
        proxy.monitor_fail = config.monitor_fail.into_iter().map(CondConfig::build).collect::<Result<_, _>>()?;
        proxy.block = config.block.into_iter().map(CondConfig::build).collect::<Result<_, _>>()?;
        proxy.req_exp = config.reqexp.into_iter().map(|f| self.build_filter(f)).collect::<Result<_, _>>()?;
        proxy.rsp_exp = config.rspexp.into_iter().map(|f| self.build_filter(f)).collect::<Result<_, _>>()?;
        proxy.req_add = config.reqadd.into_iter().map(Bytes::from).collect();
        proxy.rsp_add = config.rspadd.into_iter().map(Bytes::from).collect();

        if let Some(stats) = config.stats {
            let mut auth = UriAuth::new(stats.uri);
            if let Some(realm) = stats.realm {
                auth.realm = realm;
            }
            for pair in &stats.users {
                let (user, password) =
                    pair.split_once(':').ok_or_else(|| ConfigError::invalid_value("stats.users", pair))?;
                auth.add_user(user, password);
            }
            auth.refresh = stats.refresh_ms.map(Duration::from_millis);
            proxy.uri_auth = Some(auth);
        }

        for redirect in config.redirects {
            if !matches!(redirect.code, 301..=303) {
                return Err(ConfigError::invalid_value("redirects.code", redirect.code));
            }
            proxy.redirect_rules.push(RedirectRule {
                cond: redirect.cond.map(CondConfig::build).transpose()?,
                kind: match redirect.kind {
                    RedirectKindConfig::Location => RedirectKind::Location,
                    RedirectKindConfig::Prefix => RedirectKind::Prefix,
                },
                target: Bytes::from(redirect.target),
                code: redirect.code,
                cookie: redirect.cookie.map(Bytes::from),
                drop_query: redirect.drop_query,
            });
        }

        for rule in config.use_backend {
            let backend = self.backend(&rule.backend)?;
            proxy.switching_rules.push(SwitchingRule { cond: rule.cond.build()?, backend });
        }
        proxy.default_backend = config.default_backend.as_deref().map(|name| self.backend(name)).transpose()?;

        for srv in config.servers {
            let server = Server {
                cookie: srv.cookie.map(Bytes::from),
                addr: srv.address,
                redirect_prefix: srv.redirect.map(Bytes::from),
                ..Server::new(srv.id)
            };
            server.set_running(!srv.disabled);
            proxy.servers.push(Arc::new(server));
        }

        if let Some(cookie) = config.cookie {
            for mode in cookie.modes {
                proxy.options.insert(mode.flag());
            }
            proxy.cookie = Some(CookieConfig { name: Bytes::from(cookie.name), domain: cookie.domain.map(Bytes::from) });
        }

        if let Some(app) = config.appsession {
            let ttl = app.timeout_ms.map(Duration::from_millis);
            proxy.timeouts.appsession = ttl;
            proxy.appsession =
                Some(AppSessionConfig { name: Bytes::from(app.name), len: app.len, store: AppSessionStore::new(ttl) });
        }

        proxy.capture_cookie = config.capture_cookie.map(|c| CookieCapture { name: Bytes::from(c.name), len: c.len });
        proxy.req_captures =
            config.capture_request_headers.into_iter().map(|c| CaptureHeader { name: c.name, len: c.len }).collect();
        proxy.rsp_captures =
            config.capture_response_headers.into_iter().map(|c| CaptureHeader { name: c.name, len: c.len }).collect();

        proxy.fwdfor = config.forwardfor.map(|f| build_forward(f, "X-Forwarded-For")).transpose()?;
        proxy.orgto = config.originalto.map(|f| build_forward(f, "X-Original-To")).transpose()?;
        proxy.url_param = config.url_param.map(|p| UrlParam { name: Bytes::from(p.name), post_limit: p.post_limit });

        proxy.timeouts = Timeouts {
            http_request: config.timeouts.http_request_ms.map(Duration::from_millis),
            tarpit: config.timeouts.tarpit_ms.map(Duration::from_millis),
            ..proxy.timeouts
        };

        let mut errors = ErrorMessages::default();
        for (err, message) in config.errorfiles {
            errors.set(err, Bytes::from(message));
        }
        proxy.errors = errors;

        Ok(proxy)
    }

    fn build_filter(&self, filter: FilterConfig) -> Result<HdrExp, ConfigError> {
        let regex = RegexBuilder::new(&filter.pattern).case_insensitive(filter.ignore_case).build()?;
        let action = match filter.action {
            FilterAction::Allow => Action::Allow,
            FilterAction::Deny => Action::Deny,
            FilterAction::Tarpit => Action::Tarpit,
            FilterAction::Pass => Action::Pass,
            FilterAction::Remove => Action::Remove,
            FilterAction::Replace => {
                let replacement =
                    filter.replacement.ok_or_else(|| ConfigError::invalid_value("replacement", "missing"))?;
                Action::Replace(Bytes::from(replacement))
            }
            FilterAction::Setbe => {
                let name = filter.backend.ok_or_else(|| ConfigError::invalid_value("backend", "missing"))?;
                Action::SetBackend(self.backend(&name)?)
            }
        };
        Ok(HdrExp::new(regex, action))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Proxy>> {
        self.proxies.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

fn build_forward(config: ForwardConfig, default_header: &str) -> Result<ForwardHeader, ConfigError> {
    Ok(ForwardHeader {
        header: config.header.unwrap_or_else(|| default_header.to_owned()),
        except: config.except.as_deref().map(str::parse::<Ipv4Net>).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_build_references() {
        let registry = Registry::from_json(indoc! {r#"
        {
            "proxies": [
                {
                    "id": "www",
                    "options": ["httpclose", "accept-invalid-http-request"],
                    "default_backend": "app",
                    "use_backend": [
                        { "backend": "static", "cond": { "acl": { "fetch": "path_beg", "values": ["/img/"] } } }
                    ],
                    "forwardfor": { "except": "10.0.0.0/8" },
                    "errorfiles": { "503": "HTTP/1.0 503 Busy\r\n\r\n" }
                },
                {
                    "id": "app",
                    "cookie": { "name": "SERVERID", "modes": ["insert", "indirect"] },
                    "servers": [
                        { "id": "s1", "cookie": "A", "address": "10.0.1.1:80" },
                        { "id": "s2", "cookie": "B", "disabled": true }
                    ]
                },
                { "id": "static" }
            ]
        }
        "#})
        .unwrap();

        assert_eq!(registry.len(), 3);
        let www = registry.get("www").unwrap();
        let app = registry.get("app").unwrap();

        assert!(www.options.contains(ProxyOptions::HTTP_CLOSE | ProxyOptions::ACCEPT_INVALID_REQ));
        assert!(Arc::ptr_eq(www.default_backend.as_ref().unwrap(), &app));
        assert_eq!(www.switching_rules.len(), 1);
        assert_eq!(www.fwdfor.as_ref().unwrap().header, "X-Forwarded-For");
        assert_eq!(www.errors.get(HttpErr::Unavailable).map(|b| b.len()), Some(21));

        assert!(app.options.contains(ProxyOptions::COOK_INS | ProxyOptions::COOK_IND));
        assert!(app.servers[0].is_running());
        assert!(!app.servers[1].is_running());
    }

    #[test]
    fn test_unknown_backend() {
        let err = Registry::from_json(r#"{ "proxies": [ { "id": "www", "default_backend": "nope" } ] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend { name } if name == "nope"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Registry::from_json(indoc! {r#"
        {
            "proxies": [
                { "id": "a", "default_backend": "b" },
                { "id": "b", "reqexp": [ { "pattern": "^GET", "action": "setbe", "backend": "a" } ] }
            ]
        }
        "#})
        .unwrap_err();
        assert!(matches!(err, ConfigError::CyclicBackend { .. }));
    }

    #[test]
    fn test_duplicate_and_invalid() {
        let err = Registry::from_json(r#"{ "proxies": [ { "id": "a" }, { "id": "a" } ] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProxy { .. }));

        let err = Registry::from_json(r#"{ "proxies": [ { "id": "a", "reqexp": [ { "pattern": "(", "action": "deny" } ] } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));

        let err = Registry::from_json(r#"{ "proxies": [ { "id": "a", "forwardfor": { "except": "1.2.3.4/40" } } ] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNetwork { .. }));

        let err = Registry::from_json(indoc! {r#"
        {
            "proxies": [
                {
                    "id": "a",
                    "block": [ { "acl": { "fetch": "method", "values": ["GE T"] } } ]
                }
            ]
        }
        "#})
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "method", .. }));

        assert!(matches!(Registry::from_json("{"), Err(ConfigError::Json { .. })));
    }

    #[test]
    fn test_stats_users() {
        let registry = Registry::from_json(
            r#"{ "proxies": [ { "id": "a", "stats": { "uri": "/st", "users": ["admin:secret"], "refresh_ms": 5000 } } ] }"#,
        )
        .unwrap();
        let auth = registry.get("a").unwrap().uri_auth.clone().unwrap();
        assert_eq!(auth.users, vec![String::from("YWRtaW46c2VjcmV0")]);
        assert_eq!(auth.refresh, Some(Duration::from_secs(5)));
        assert_eq!(auth.realm, "Statistics");
    }
}
