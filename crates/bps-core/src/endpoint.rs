//! Connection URLs: `scheme://host[:port][,host2:port2,...]/path?key=value&...`
//!
//! The scheme selects a registered backend; everything else is backend
//! configuration. Backends read the query keys they understand and ignore
//! the rest.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix of every generated client ID.
pub const CLIENT_ID_PREFIX: &str = "bps-";

/// Generate a globally unique client/consumer ID.
///
/// The result is `bps-` followed by 32 lowercase hex digits, so it only ever
/// contains `[0-9A-Za-z_-]`.
pub fn gen_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// A parsed connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    hosts: Vec<String>,
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self> {
        let Some((scheme, rest)) = input.split_once("://") else {
            let url = Url::parse(input)?;
            return Ok(Self { url, hosts: Vec::new() });
        };

        let end = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(end);
        let (userinfo, hostlist) = match authority.rsplit_once('@') {
            Some((user, hosts)) => (Some(user), hosts),
            None => (None, authority),
        };

        if !hostlist.contains(',') {
            let url = Url::parse(input)?;
            let hosts = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) if !host.is_empty() => vec![format!("{host}:{port}")],
                (Some(host), None) if !host.is_empty() => vec![host.to_string()],
                _ => Vec::new(),
            };
            return Ok(Self { url, hosts });
        }

        // The url crate rejects comma-separated authorities; parse the first
        // host and keep the full list on the side.
        let hosts: Vec<String> = hostlist
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        let first = hosts.first().map(String::as_str).unwrap_or_default();
        let rebuilt = match userinfo {
            Some(user) => format!("{scheme}://{user}@{first}{tail}"),
            None => format!("{scheme}://{first}{tail}"),
        };
        let url = Url::parse(&rebuilt)?;
        Ok(Self { url, hosts })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Every `host[:port]` entry of the authority, in URL order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Host and path joined into a filesystem path (`file:///tmp/x` is
    /// `/tmp/x`, `file://rel/dir` is `rel/dir`).
    pub fn local_path(&self) -> PathBuf {
        match self.host() {
            None => self
                .url
                .to_file_path()
                .unwrap_or_else(|_| PathBuf::from(self.url.path())),
            Some(host) => PathBuf::from(host).join(self.url.path().trim_start_matches('/')),
        }
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Boolean query parameter; empty, `0`, `f…` and `n…` values are false.
    pub fn query_flag(&self, key: &str) -> Option<bool> {
        self.query(key).map(|v| is_true_value(&v))
    }

    pub fn query_parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.query(key) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|e| Error::config(format!("query parameter {key}={v:?}: {e}"))),
        }
    }

    /// `client_id` from the query, or a freshly generated one.
    pub fn client_id(&self) -> String {
        self.query("client_id")
            .filter(|id| !id.is_empty())
            .unwrap_or_else(gen_client_id)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn is_true_value(v: &str) -> bool {
    !matches!(v.chars().next(), None | Some('0' | 'f' | 'F' | 'n' | 'N'))
}
