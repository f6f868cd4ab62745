//! Clone URL parsing and canonicalization.
//!
//! Hosted URLs come in several spellings for the same repository:
//! `https://github.com/owner/repo`, `git@github.com:owner/repo.git`,
//! `ssh://git@github.com/owner/repo`. Everything that needs to compare
//! remotes goes through [`RepositoryUrl`].

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ReconcileError;

static SCHEME_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*)://(?:(?P<user>[^@/]*)@)?(?P<host>[^/:]*)(?::(?P<port>\d+))?(?P<path>/.*)?$",
    )
    .expect("scheme URL pattern is valid")
});

// `user@host:path`. Single-letter hosts are drive letters, not hosts.
static SCP_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<user>[^@/]+)@)?(?P<host>[^:/\\]{2,}):(?P<path>[^\\].*)$")
        .expect("scp URL pattern is valid")
});

/// How a URL reaches the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Http,
    Https,
    Ssh,
    Git,
    File,
    Other,
}

/// A parsed clone URL. Keeps the original text for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryUrl {
    raw: String,
    kind: UrlKind,
    host: Option<String>,
    port: Option<u16>,
    owner: Option<String>,
    name: Option<String>,
}

impl RepositoryUrl {
    pub fn parse(input: &str) -> Result<Self, ReconcileError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ReconcileError::InvalidUrl("empty URL".to_string()));
        }

        if let Some(caps) = SCHEME_URL.captures(raw) {
            let scheme = caps["scheme"].to_ascii_lowercase();
            let kind = match scheme.as_str() {
                "http" => UrlKind::Http,
                "https" => UrlKind::Https,
                "ssh" | "git+ssh" | "ssh+git" => UrlKind::Ssh,
                "git" => UrlKind::Git,
                "file" => UrlKind::File,
                _ => UrlKind::Other,
            };
            let path = caps.name("path").map(|m| m.as_str()).unwrap_or("");
            let host = caps
                .name("host")
                .map(|m| m.as_str().to_string())
                .filter(|h| !h.is_empty());
            if kind != UrlKind::File && host.is_none() {
                return Err(ReconcileError::InvalidUrl(raw.to_string()));
            }
            let port = caps.name("port").and_then(|m| m.as_str().parse().ok());
            let (owner, name) = owner_and_name(path);
            return Ok(Self {
                raw: raw.to_string(),
                kind,
                host,
                port,
                owner,
                name,
            });
        }

        if let Some(caps) = SCP_URL.captures(raw) {
            let (owner, name) = owner_and_name(&caps["path"]);
            return Ok(Self {
                raw: raw.to_string(),
                kind: UrlKind::Ssh,
                host: Some(caps["host"].to_string()),
                port: None,
                owner,
                name,
            });
        }

        let (owner, name) = owner_and_name(raw);
        Ok(Self {
            raw: raw.to_string(),
            kind: UrlKind::File,
            host: None,
            port: None,
            owner,
            name,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> UrlKind {
        self.kind
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn repository_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `owner/name`, when both are known.
    pub fn name_with_owner(&self) -> Option<String> {
        match (self.owner(), self.repository_name()) {
            (Some(owner), Some(name)) => Some(format!("{}/{}", owner, name)),
            _ => None,
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self.kind, UrlKind::Http | UrlKind::Https)
    }

    fn is_hosted(&self) -> bool {
        !matches!(self.kind, UrlKind::File | UrlKind::Other)
            && self.host.is_some()
            && self.owner.is_some()
            && self.name.is_some()
    }

    /// Canonical web form of the repository.
    ///
    /// SSH and git URLs become `https://host/owner/name`; HTTP(S) URLs keep
    /// their scheme and port. Local URLs are returned unchanged.
    pub fn to_repository_url(&self) -> String {
        let (Some(host), Some(owner), Some(name)) = (self.host(), self.owner(), self.repository_name())
        else {
            return self.raw.clone();
        };
        if !self.is_hosted() {
            return self.raw.clone();
        }

        let scheme = if self.kind == UrlKind::Http { "http" } else { "https" };
        match (self.is_http(), self.port) {
            (true, Some(port)) => format!("{}://{}:{}/{}/{}", scheme, host, port, owner, name),
            _ => format!("{}://{}/{}/{}", scheme, host, owner, name),
        }
    }

    /// Whether both URLs name the same repository, ignoring case, scheme,
    /// transport and a trailing `.git`.
    pub fn same_repository(&self, other: &RepositoryUrl) -> bool {
        self.comparison_key() == other.comparison_key()
    }

    fn comparison_key(&self) -> String {
        if self.is_hosted() {
            format!(
                "{}/{}/{}",
                self.host().unwrap_or_default(),
                self.owner().unwrap_or_default(),
                self.repository_name().unwrap_or_default()
            )
            .to_lowercase()
        } else {
            strip_git_suffix(self.raw.trim_end_matches(['/', '\\'])).to_lowercase()
        }
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for RepositoryUrl {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_git_suffix(segment: &str) -> &str {
    segment.strip_suffix(".git").unwrap_or(segment)
}

fn owner_and_name(path: &str) -> (Option<String>, Option<String>) {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    let name = segments
        .last()
        .map(|s| strip_git_suffix(s))
        .filter(|s| !s.is_empty())
        .map(String::from);
    let owner = if segments.len() >= 2 {
        Some(segments[segments.len() - 2].to_string())
    } else {
        None
    };
    (owner, name)
}
