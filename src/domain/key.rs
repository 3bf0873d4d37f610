use crate::domain::model::SourceKind;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

static GIS_FIRM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/firm/(\d+)").expect("2gis firm pattern is valid"));
static YANDEX_ORG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/org/[^/]+/(\d+)").expect("yandex org pattern is valid"));
static YANDEX_OID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"oid=(\d+)").expect("yandex oid pattern is valid"));

/// Canonical identity of a request: the unit of deduplication, caching and snapshotting.
///
/// URLs that carry the same site organisation id collapse onto one key, e.g.
/// `https://2gis.ru/moscow/firm/70000001/tab/reviews` and
/// `https://2gis.ru/spb/firm/70000001` both become `cache:2gis:org:70000001`.
/// URLs without an id fall back to a SHA-256 digest of the full URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn derive(kind: SourceKind, url: &str) -> Self {
        match extract_org_id(kind, url) {
            Some(org_id) => Self(format!("cache:{}:org:{}", kind, org_id)),
            None => {
                let digest = Sha256::digest(url.as_bytes());
                Self(format!("cache:{}:url:{:x}", kind, digest))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable site identifier embedded in the URL, if the site has one.
pub fn extract_org_id(kind: SourceKind, url: &str) -> Option<&str> {
    let capture = |re: &Regex| re.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str());

    match kind {
        SourceKind::TwoGis => capture(&GIS_FIRM_RE),
        SourceKind::Yandex => capture(&YANDEX_ORG_RE).or_else(|| capture(&YANDEX_OID_RE)),
        SourceKind::Doctors => None,
    }
}
