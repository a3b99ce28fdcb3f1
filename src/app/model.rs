//! Built-in configuration model bound when no declarations file is given.

use std::time::Duration;

use indexmap::IndexMap;
use treebind_core::ConfigEnum as _;
use treebind_macros::{ConfigEnum, Configured};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ConfigEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[config(rename = "warn")]
    Warning,
    Error,
}

#[derive(Debug, Configured)]
pub struct Domain {
    #[attribute(default = "info")]
    pub log_level: LogLevel,
    #[element("server")]
    pub servers: IndexMap<String, Server>,
    #[element("property")]
    pub properties: Vec<Property>,
}

#[derive(Debug, Configured)]
#[configured(key = "name")]
pub struct Server {
    pub name: String,
    #[attribute(default = "30s")]
    pub request_timeout: Duration,
    /// Name of a shared config this server inherits from.
    #[attribute(leaf)]
    pub config_ref: Option<String>,
    #[element("listener")]
    pub listeners: IndexMap<String, Listener>,
}

#[derive(Debug, Configured)]
#[configured(key = "name")]
pub struct Listener {
    pub name: String,
    #[attribute(default = "8080")]
    pub port: i32,
    pub address: Option<String>,
    #[attribute(default = "false")]
    pub secure: bool,
}

#[derive(Debug, Configured)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Domain {
    /// Log what was bound, one event per server and listener.
    pub fn summarize(&self) {
        tracing::info!(
            log_level = self.log_level.variant(),
            servers = self.servers.len(),
            properties = self.properties.len(),
            "bound domain"
        );
        for (key, server) in &self.servers {
            tracing::debug!(
                server = %key,
                name = %server.name,
                request_timeout = ?server.request_timeout,
                config_ref = ?server.config_ref,
                listeners = server.listeners.len(),
                "server"
            );
            for listener in server.listeners.values() {
                tracing::debug!(
                    server = %key,
                    listener = %listener.name,
                    port = listener.port,
                    address = ?listener.address,
                    secure = listener.secure,
                    "listener"
                );
            }
        }
        for property in &self.properties {
            tracing::debug!(name = %property.name, value = %property.value, "property");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treebind_core::{BindingErrorKind, Configured, Node, Registry};

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder.register_tree::<Domain>().unwrap();
        builder.build().unwrap()
    }

    fn listener(name: &str) -> Node {
        Node::new("listener").with_attribute("name", name)
    }

    #[test]
    fn declarations_follow_the_fields() {
        let declaration = Server::declaration();
        assert_eq!(declaration.element, "server");
        assert_eq!(
            declaration.rules,
            [
                "target=Server",
                "@name=datatype:String",
                "@request-timeout=datatype:Duration",
                "@request-timeout=default:30s",
                "@config-ref=datatype:String",
                "@config-ref=optional",
                "@config-ref=leaf",
                "<listener>=collection:Listener",
                "key=@name",
            ]
        );
        assert_eq!(Domain::enums().len(), 1);
    }

    #[test]
    fn binds_the_domain_tree() {
        let tree = Node::new("domain")
            .with_attribute("log-level", "warn")
            .with_child(
                Node::new("server")
                    .with_attribute("name", "web")
                    .with_attribute("config-ref", "shared")
                    .with_children([
                        listener("http"),
                        listener("https")
                            .with_attribute("port", "8443")
                            .with_attribute("secure", "yes"),
                    ]),
            )
            .with_child(
                Node::new("server")
                    .with_attribute("name", "admin")
                    .with_attribute("request-timeout", "2m"),
            )
            .with_child(
                Node::new("property")
                    .with_attribute("name", "region")
                    .with_attribute("value", "eu"),
            );

        let domain: Domain = registry().bind_as(&tree).unwrap();
        assert_eq!(domain.log_level, LogLevel::Warning);
        assert_eq!(domain.servers.keys().collect::<Vec<_>>(), ["web", "admin"]);

        let web = &domain.servers["web"];
        assert_eq!(web.request_timeout, Duration::from_secs(30));
        assert_eq!(web.config_ref.as_deref(), Some("shared"));
        assert_eq!(web.listeners["http"].port, 8080);
        assert!(!web.listeners["http"].secure);
        assert!(web.listeners["https"].secure);
        assert_eq!(web.listeners["https"].address, None);

        let admin = &domain.servers["admin"];
        assert_eq!(admin.request_timeout, Duration::from_secs(120));
        assert_eq!(admin.config_ref, None);
        assert!(admin.listeners.is_empty());

        assert_eq!(domain.properties.len(), 1);
        assert_eq!(domain.properties[0].value, "eu");
    }

    #[test]
    fn duplicate_listener_names_fail_with_their_path() {
        let tree = Node::new("domain").with_child(
            Node::new("server")
                .with_attribute("name", "web")
                .with_children([listener("http"), listener("http")]),
        );
        let err = registry().bind(&tree).unwrap_err();
        assert_eq!(err.path.to_string(), "domain/server[web]");
        assert_eq!(
            err.kind,
            BindingErrorKind::DuplicateKey {
                element: "listener".into(),
                key: "http".into(),
            }
        );
    }

    #[test]
    fn unknown_log_level_is_a_coercion_error() {
        let tree = Node::new("domain").with_attribute("log-level", "loud");
        let err = registry().bind(&tree).unwrap_err();
        assert!(matches!(err.kind, BindingErrorKind::Coercion { .. }), "{err}");
    }
}
