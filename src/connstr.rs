//! Connection descriptors.
//!
//! Two textual forms are accepted:
//!
//! ```text
//! driver:host:port:database:username:password[:(serverCert:clientCert:clientKey)]
//! {"driver": "...", "host": "...", "port": 5432, "name": "...", "username": "...", "password": "..."}
//! ```
//!
//! In the colon form the password takes everything after the fifth colon, so
//! it may itself contain colons. An empty port means the driver default.
//! A trailing `:(a:b:c)` after the password field is always read as TLS
//! material, so a password cannot end in such a group.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

const PEM_MARKER: &str = "-----BEGIN";

/// Where a certificate or key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertSource {
    Pem(String),
    Path(PathBuf),
}

impl CertSource {
    /// PEM text when the value starts with `-----BEGIN`, a file path otherwise.
    pub fn from_value(value: &str) -> Self {
        if value.trim_start().starts_with(PEM_MARKER) {
            CertSource::Pem(value.to_string())
        } else {
            CertSource::Path(PathBuf::from(value))
        }
    }

    pub fn load(&self) -> Result<Vec<u8>> {
        match self {
            CertSource::Pem(text) => Ok(text.as_bytes().to_vec()),
            CertSource::Path(path) => Ok(std::fs::read(path)?),
        }
    }

    fn to_value(&self) -> String {
        match self {
            CertSource::Pem(text) => text.clone(),
            CertSource::Path(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub server_cert: Option<CertSource>,
    pub client_cert: Option<CertSource>,
    pub client_key: Option<CertSource>,
}

impl TlsMaterial {
    fn from_parts(server: &str, client: &str, key: &str) -> Option<Self> {
        let source = |v: &str| (!v.is_empty()).then(|| CertSource::from_value(v));
        let tls = Self {
            server_cert: source(server),
            client_cert: source(client),
            client_key: source(key),
        };
        (tls != Self::default()).then_some(tls)
    }
}

/// Identifies one logical database connection.
///
/// Equal descriptors share a pooled connection. `Hash` covers only the
/// endpoint and identity (host, port, database, username).
#[derive(Clone, PartialEq, Eq)]
pub struct ConnDesc {
    pub driver: String,
    pub host: String,
    /// 0 selects the driver's default port.
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tls: Option<TlsMaterial>,
}

impl ConnDesc {
    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Parse either descriptor form.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.starts_with('{') {
            Self::parse_json(text)
        } else {
            Self::parse_colon(text)
        }
    }

    fn parse_colon(text: &str) -> Result<Self> {
        let (body, tls) = split_tls_suffix(text)?;

        let mut parts = body.splitn(6, ':');
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| Error::InvalidConnDesc(format!("missing {} in '{}'", what, body)))
        };
        let driver = next("driver")?;
        let host = next("host")?;
        let port = next("port")?;
        let database = next("database")?;
        let username = next("username")?;
        let password = next("password").unwrap_or("");

        if driver.is_empty() {
            return Err(Error::InvalidConnDesc("driver name is empty".into()));
        }
        let mut desc = Self::new(driver, host, parse_port(port)?, database, username, password);
        desc.tls = tls;
        Ok(desc)
    }

    fn parse_json(text: &str) -> Result<Self> {
        let raw: JsonDesc = serde_json::from_str(text)
            .map_err(|e| Error::InvalidConnDesc(format!("JSON descriptor: {}", e)))?;
        let port = match raw.port {
            JsonPort::Number(n) => u16::try_from(n)
                .map_err(|_| Error::InvalidConnDesc(format!("port {} out of range", n)))?,
            JsonPort::Text(s) => parse_port(&s)?,
        };
        let mut desc = Self::new(
            raw.driver,
            raw.host,
            port,
            raw.name,
            raw.username,
            raw.password,
        );
        desc.tls = TlsMaterial::from_parts(
            raw.server_cert.as_deref().unwrap_or(""),
            raw.client_cert.as_deref().unwrap_or(""),
            raw.client_key.as_deref().unwrap_or(""),
        );
        Ok(desc)
    }

    /// Colon form, including the password.
    pub fn to_conn_string(&self) -> String {
        let port = if self.port == 0 {
            String::new()
        } else {
            self.port.to_string()
        };
        let mut s = format!(
            "{}:{}:{}:{}:{}:{}",
            self.driver, self.host, port, self.database, self.username, self.password
        );
        if let Some(tls) = &self.tls {
            let value = |c: &Option<CertSource>| c.as_ref().map(CertSource::to_value).unwrap_or_default();
            s.push_str(&format!(
                ":({}:{}:{})",
                value(&tls.server_cert),
                value(&tls.client_cert),
                value(&tls.client_key)
            ));
        }
        s
    }
}

impl FromStr for ConnDesc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Hash for ConnDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.database.hash(state);
        self.username.hash(state);
    }
}

impl fmt::Display for ConnDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:***",
            self.driver, self.host, self.port, self.database, self.username
        )
    }
}

impl fmt::Debug for ConnDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnDesc")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Split off a trailing `:(server:client:key)` group. The group only counts
/// when it follows the password field.
fn split_tls_suffix(text: &str) -> Result<(&str, Option<TlsMaterial>)> {
    if !text.ends_with(')') {
        return Ok((text, None));
    }
    let Some(open) = text.rfind(":(") else {
        return Ok((text, None));
    };
    if text[..open].matches(':').count() < 5 {
        return Ok((text, None));
    }
    let inner = &text[open + 2..text.len() - 1];
    let parts: Vec<&str> = inner.split(':').collect();
    let [server, client, key] = parts.as_slice() else {
        return Err(Error::InvalidConnDesc(format!(
            "TLS group needs three fields, got {}",
            parts.len()
        )));
    };
    Ok((&text[..open], TlsMaterial::from_parts(server, client, key)))
}

fn parse_port(text: &str) -> Result<u16> {
    if text.is_empty() {
        return Ok(0);
    }
    text.parse()
        .map_err(|_| Error::InvalidConnDesc(format!("invalid port '{}'", text)))
}

#[derive(Deserialize)]
struct JsonDesc {
    driver: String,
    host: String,
    port: JsonPort,
    name: String,
    username: String,
    password: String,
    #[serde(default)]
    server_cert: Option<String>,
    #[serde(default)]
    client_cert: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPort {
    Number(u64),
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(desc: &ConnDesc) -> u64 {
        let mut h = DefaultHasher::new();
        desc.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_password_keeps_colons() {
        let desc = ConnDesc::parse("postgres:localhost:5432:mydb:user:p@ss:w0rd").unwrap();
        assert_eq!(desc.driver, "postgres");
        assert_eq!(desc.host, "localhost");
        assert_eq!(desc.port, 5432);
        assert_eq!(desc.database, "mydb");
        assert_eq!(desc.username, "user");
        assert_eq!(desc.password, "p@ss:w0rd");
        assert!(desc.tls.is_none());
    }

    #[test]
    fn test_empty_port_and_password() {
        let desc = ConnDesc::parse("sqlite:::/tmp/app.db:").unwrap();
        assert_eq!(desc.port, 0);
        assert_eq!(desc.database, "/tmp/app.db");
        assert_eq!(desc.password, "");

        assert!(ConnDesc::parse("postgres:h:x:db:u:p").is_err());
        assert!(ConnDesc::parse("postgres:h:5432").is_err());
    }

    #[test]
    fn test_tls_suffix() {
        let desc =
            ConnDesc::parse("postgres:db.local:5432:app:svc:s3:cr:et:(/etc/ca.pem::)").unwrap();
        assert_eq!(desc.password, "s3:cr:et");
        let tls = desc.tls.as_ref().unwrap();
        assert_eq!(
            tls.server_cert,
            Some(CertSource::Path(PathBuf::from("/etc/ca.pem")))
        );
        assert_eq!(tls.client_cert, None);

        let again = ConnDesc::parse(&desc.to_conn_string()).unwrap();
        assert_eq!(again, desc);

        assert!(ConnDesc::parse("postgres:h:1:d:u:p:(a:b)").is_err());
    }

    #[test]
    fn test_group_in_password_field_is_not_tls() {
        let desc = ConnDesc::parse("postgres:h:1:d:u:(a:b:c)").unwrap();
        assert_eq!(desc.username, "u");
        assert_eq!(desc.password, "(a:b:c)");
        assert!(desc.tls.is_none());

        let desc = ConnDesc::parse("postgres:h:1:d:u::(a.pem::)").unwrap();
        assert_eq!(desc.password, "");
        assert_eq!(
            desc.tls.unwrap().server_cert,
            Some(CertSource::Path(PathBuf::from("a.pem")))
        );
    }

    #[test]
    fn test_json_form() {
        let desc = ConnDesc::parse(
            r#"{"driver":"postgres","host":"h","port":"6543","name":"db","username":"u","password":"p:w"}"#,
        )
        .unwrap();
        assert_eq!(desc.port, 6543);
        assert_eq!(desc.database, "db");
        assert_eq!(desc.password, "p:w");

        let desc = ConnDesc::parse(
            r#"{"driver":"postgres","host":"h","port":5432,"name":"db","username":"u","password":"",
                "server_cert":"-----BEGIN CERTIFICATE-----\nabc"}"#,
        )
        .unwrap();
        assert_eq!(desc.port, 5432);
        assert!(matches!(
            desc.tls.unwrap().server_cert,
            Some(CertSource::Pem(_))
        ));

        assert!(ConnDesc::parse(r#"{"driver":"postgres","host":"h"}"#).is_err());
    }

    #[test]
    fn test_hash_ignores_password_and_display_masks_it() {
        let a = ConnDesc::new("postgres", "h", 5432, "db", "u", "one");
        let b = ConnDesc::new("postgres", "h", 5432, "db", "u", "two");
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "postgres:h:5432:db:u:***");
        assert!(!format!("{:?}", a).contains("one"));
    }
}
