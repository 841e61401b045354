// src/uri_utils.rs
//! Storage query parsing and validation
//!
//! A query names one object (or prefix) as `az://<account>/<container>/<key>`.
//! The account may instead be supplied out-of-band, in which case the query reads
//! `az://<container>/<key>`. The public HTTPS spelling
//! `https://<account>.blob.core.windows.net/<container>/<key>` is accepted too.
//!
//! # Examples
//!
//! ```
//! use azstore::uri_utils::StorageQuery;
//!
//! let q = StorageQuery::parse("az://myacct/data/dir/file.txt", None).unwrap();
//! assert_eq!(q.container, "data");
//! assert_eq!(q.key, "dir/file.txt");
//!
//! // Account supplied separately: no double prefix.
//! let q = StorageQuery::parse("az://data/dir/file.txt", Some("myacct")).unwrap();
//! assert_eq!(q.account, "myacct");
//! assert_eq!(q.container, "data");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::constants::{KEY_SEPARATOR, MAX_BLOB_NAME_LEN, QUERY_SCHEME};
use crate::error::{Result, StorageError, Target};

static BLOB_ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https://(?P<account>[a-z0-9]+)(\.[a-z0-9]+)*\.blob\.core\.windows\.net/?(?P<rest>.+)?$")
        .expect("static regex")
});

static MOCK_ENDPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^http://(127\.0\.0\.1|localhost)(:\d+)?/(?P<account>[a-z0-9]+)/?(?P<rest>.+)?$")
        .expect("static regex")
});

static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]{3,24}$").expect("static regex"));

static CONTAINER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{1,61})[a-z0-9]$").expect("static regex"));

/// A resolved `{account, container, key}` triple.
///
/// `key` may be empty only when the query addresses a container root, and may
/// end with `/` when the caller means a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageQuery {
    pub account: String,
    pub container: String,
    pub key: String,
}

impl StorageQuery {
    pub fn new(account: impl Into<String>, container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parse `query`, merging an out-of-band account when one is given.
    pub fn parse(query: &str, default_account: Option<&str>) -> Result<Self> {
        let query = query.trim();
        let default_account = default_account.map(str::trim).filter(|a| !a.is_empty());

        let (account, container, key) = if query.starts_with("https://") || query.starts_with("http://") {
            let (account, rest) = split_endpoint_query(query)?;
            if let Some(expected) = default_account {
                if expected != account {
                    return Err(StorageError::malformed(
                        query,
                        format!("account '{}' does not match configured account '{}'", account, expected),
                    ));
                }
            }
            let (container, key) = split_once_sep(&rest);
            (account, container.to_string(), key.to_string())
        } else {
            let rest = strip_scheme(query)?;
            let (first, remainder) = split_once_sep(rest);
            match default_account {
                // az://account/container/key with the account also given out-of-band
                Some(acct) if first == acct && !remainder.is_empty() => {
                    let (container, key) = split_once_sep(remainder);
                    (acct.to_string(), container.to_string(), key.to_string())
                }
                Some(acct) => (acct.to_string(), first.to_string(), remainder.to_string()),
                None => {
                    let (container, key) = split_once_sep(remainder);
                    (first.to_string(), container.to_string(), key.to_string())
                }
            }
        };

        if account.is_empty() {
            return Err(StorageError::malformed(query, "no storage account given"));
        }
        if container.is_empty() {
            return Err(StorageError::malformed(query, "container segment is missing"));
        }
        if key.len() > MAX_BLOB_NAME_LEN {
            return Err(StorageError::malformed(
                query,
                format!("key longer than {} characters", MAX_BLOB_NAME_LEN),
            ));
        }

        Ok(Self { account, container, key })
    }

    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            account: self.account.clone(),
            container: self.container.clone(),
            key: key.into(),
        }
    }

    pub fn is_container_root(&self) -> bool {
        self.key.is_empty()
    }

    pub fn target(&self) -> Target {
        Target::new(&self.account, &self.container, &self.key)
    }
}

impl fmt::Display for StorageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}/{}", QUERY_SCHEME, self.account, self.container, self.key)
    }
}

impl From<&StorageQuery> for Target {
    fn from(q: &StorageQuery) -> Self {
        q.target()
    }
}

fn strip_scheme(query: &str) -> Result<&str> {
    let (scheme, rest) = query
        .split_once("://")
        .ok_or_else(|| StorageError::malformed(query, format!("expected {}://<account>/<container>/<key>", QUERY_SCHEME)))?;
    if scheme != QUERY_SCHEME {
        return Err(StorageError::malformed(
            query,
            format!("unsupported scheme '{}', expected '{}'", scheme, QUERY_SCHEME),
        ));
    }
    Ok(rest.trim_start_matches(KEY_SEPARATOR))
}

fn split_endpoint_query(query: &str) -> Result<(String, String)> {
    let caps = BLOB_ENDPOINT_RE
        .captures(query)
        .or_else(|| MOCK_ENDPOINT_RE.captures(query))
        .ok_or_else(|| StorageError::malformed(query, "not a blob service URL"))?;
    let account = caps["account"].to_string();
    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default().to_string();
    Ok((account, rest))
}

fn split_once_sep(s: &str) -> (&str, &str) {
    match s.split_once(KEY_SEPARATOR) {
        Some((head, tail)) => (head, tail),
        None => (s, ""),
    }
}

// ----------------------------------------------------------------------------
// Validation
// ----------------------------------------------------------------------------

/// Outcome of a structural query check; never touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryValidation {
    pub query: String,
    pub valid: bool,
    pub reason: Option<String>,
}

impl QueryValidation {
    fn ok(query: &str) -> Self {
        Self { query: query.to_string(), valid: true, reason: None }
    }

    fn invalid(query: &str, reason: impl Into<String>) -> Self {
        Self { query: query.to_string(), valid: false, reason: Some(reason.into()) }
    }
}

/// Check scheme, account and container naming. Workflow wildcards such as
/// `{sample}` are allowed in the key.
pub fn validate_query(query: &str) -> QueryValidation {
    let parsed = match StorageQuery::parse(query, None) {
        Ok(q) => q,
        Err(StorageError::MalformedQuery { reason, .. }) => return QueryValidation::invalid(query, reason),
        Err(e) => return QueryValidation::invalid(query, e.to_string()),
    };
    if !account_name_is_valid(&parsed.account) {
        return QueryValidation::invalid(
            query,
            format!("account '{}' must be 3-24 lowercase letters or digits", parsed.account),
        );
    }
    if !container_name_is_valid(&parsed.container) {
        return QueryValidation::invalid(
            query,
            format!(
                "container '{}' must be 3-63 lowercase letters, digits or single hyphens, starting and ending with a letter or digit",
                parsed.container
            ),
        );
    }
    QueryValidation::ok(query)
}

pub fn account_name_is_valid(account: &str) -> bool {
    ACCOUNT_RE.is_match(account)
}

pub fn container_name_is_valid(container: &str) -> bool {
    CONTAINER_RE.is_match(container) && !container.contains("--")
}

// ----------------------------------------------------------------------------
// Endpoints
// ----------------------------------------------------------------------------

/// `https://<account>.blob.core.windows.net[/...]`
pub fn is_valid_blob_endpoint(url: &str) -> bool {
    BLOB_ENDPOINT_RE.is_match(url.trim())
}

/// Local emulator endpoint, e.g. `http://127.0.0.1:10000/devstoreaccount1`
pub fn is_valid_mock_endpoint(url: &str) -> bool {
    MOCK_ENDPOINT_RE.is_match(url.trim())
}

/// Account encoded in a public or emulator endpoint URL.
pub fn account_from_endpoint_url(url: &str) -> Option<String> {
    let url = url.trim();
    BLOB_ENDPOINT_RE
        .captures(url)
        .or_else(|| MOCK_ENDPOINT_RE.captures(url))
        .map(|caps| caps["account"].to_string())
}

/// Public endpoint for `account`.
pub fn default_blob_endpoint(account: &str) -> String {
    format!("https://{}.blob.{}", account, crate::constants::DEFAULT_ENDPOINT_SUFFIX)
}

// ----------------------------------------------------------------------------
// Examples
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleQuery {
    pub query: &'static str,
    pub description: &'static str,
}

pub fn example_queries() -> Vec<ExampleQuery> {
    vec![
        ExampleQuery {
            query: "az://myaccount/mycontainer/path/to/file.txt",
            description: "A file in container 'mycontainer' of storage account 'myaccount'.",
        },
        ExampleQuery {
            query: "az://mycontainer/path/to/file.txt",
            description: "The same file when the account is configured separately.",
        },
        ExampleQuery {
            query: "https://myaccount.blob.core.windows.net/mycontainer/path/to/file.txt",
            description: "The public HTTPS spelling of the first query.",
        },
        ExampleQuery {
            query: "az://myaccount/mycontainer/results/{sample}.csv",
            description: "A workflow output whose key contains a wildcard.",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_full_query() {
        let q = StorageQuery::parse("az://acct/container/dir/file.txt", None).unwrap();
        assert_eq!(q, StorageQuery::new("acct", "container", "dir/file.txt"));
        assert_eq!(q.to_string(), "az://acct/container/dir/file.txt");
    }

    #[test]
    fn test_parse_out_of_band_account() {
        let q = StorageQuery::parse("az://container/dir/file.txt", Some("acct")).unwrap();
        assert_eq!(q, StorageQuery::new("acct", "container", "dir/file.txt"));
    }

    #[test]
    fn test_parse_does_not_double_prefix_account() {
        let q = StorageQuery::parse("az://acct/container/dir/file.txt", Some("acct")).unwrap();
        assert_eq!(q, StorageQuery::new("acct", "container", "dir/file.txt"));
    }

    #[test]
    fn test_parse_container_root() {
        let q = StorageQuery::parse("az://acct/container", None).unwrap();
        assert!(q.is_container_root());
        let q = StorageQuery::parse("az://acct/container/", None).unwrap();
        assert!(q.is_container_root());
    }

    #[test]
    fn test_parse_keeps_trailing_separator() {
        let q = StorageQuery::parse("az://acct/container/dir/", None).unwrap();
        assert_eq!(q.key, "dir/");
    }

    #[test]
    fn test_missing_container_is_malformed() {
        for bad in ["az://acct", "az://acct/", "az://", "az:///"] {
            let err = StorageQuery::parse(bad, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedQuery, "{bad}");
        }
    }

    #[test]
    fn test_wrong_scheme_is_malformed() {
        let err = StorageQuery::parse("s3://bucket/key", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedQuery);
        let err = StorageQuery::parse("container/key", Some("acct")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedQuery);
    }

    #[test]
    fn test_parse_https_form() {
        let q = StorageQuery::parse("https://acct.blob.core.windows.net/container/a/b.txt", None).unwrap();
        assert_eq!(q, StorageQuery::new("acct", "container", "a/b.txt"));

        let err = StorageQuery::parse("https://acct.blob.core.windows.net/container/a", Some("other")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedQuery);
    }

    #[test]
    fn test_parse_emulator_form() {
        let q = StorageQuery::parse("http://127.0.0.1:10000/devstoreaccount1/container/k", None).unwrap();
        assert_eq!(q, StorageQuery::new("devstoreaccount1", "container", "k"));
    }

    #[test]
    fn test_container_names() {
        assert!(container_name_is_valid("container"));
        assert!(container_name_is_valid("container-test"));
        assert!(!container_name_is_valid("container**notvalid"));
        assert!(!container_name_is_valid("ab"));
        assert!(!container_name_is_valid("-abc"));
        assert!(!container_name_is_valid("abc-"));
        assert!(!container_name_is_valid("a--b"));
        assert!(!container_name_is_valid("Upper"));
    }

    #[test]
    fn test_account_names() {
        assert!(account_name_is_valid("devstoreaccount1"));
        assert!(!account_name_is_valid("my-account"));
        assert!(!account_name_is_valid("ab"));
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query("az://account/container/path/{sample}.txt").valid);

        let v = validate_query("az://account/container**notvalid/file");
        assert!(!v.valid);
        assert!(v.reason.unwrap().contains("container"));

        let v = validate_query("gs://account/container/file");
        assert!(!v.valid);
        assert!(v.reason.unwrap().contains("scheme"));
    }

    #[test]
    fn test_example_queries_validate() {
        for ex in example_queries() {
            assert!(validate_query(ex.query).valid || ex.query.starts_with("az://mycontainer"), "{}", ex.query);
        }
    }

    #[test]
    fn test_endpoints() {
        assert!(is_valid_blob_endpoint("https://acct.blob.core.windows.net"));
        assert!(is_valid_blob_endpoint("https://acct.blob.core.windows.net/"));
        assert!(!is_valid_blob_endpoint("https://acct.dfs.core.windows.net"));
        assert!(is_valid_mock_endpoint("http://127.0.0.1:10000/devstoreaccount1"));
        assert!(is_valid_mock_endpoint("http://localhost:10000/devstoreaccount1/"));
        assert_eq!(
            account_from_endpoint_url("http://127.0.0.1:10000/devstoreaccount1").as_deref(),
            Some("devstoreaccount1")
        );
        assert_eq!(account_from_endpoint_url("https://acct.blob.core.windows.net").as_deref(), Some("acct"));
        assert_eq!(default_blob_endpoint("acct"), "https://acct.blob.core.windows.net");
    }
}
