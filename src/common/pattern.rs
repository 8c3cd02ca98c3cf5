use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// A URL pattern as registered by a rule: a path plus the query parameters a request
/// must carry to be matched by it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlPattern {
    path: String,
    query: BTreeMap<String, String>,
}

impl UrlPattern {
    pub fn new<P, I, K, V>(path: P, query: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut pattern = Self::parse(&path.into());
        for (key, value) in query {
            pattern.query.insert(key.into(), value.into());
        }
        pattern
    }

    /// Parses a pattern string of the form `path?query`. Everything after the first `?` is
    /// treated as an `application/x-www-form-urlencoded` query. If a key appears more than
    /// once, the last value wins.
    pub fn parse(raw: &str) -> Self {
        let (path, query) = split_path_and_query(raw);

        let query = query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            path: path.to_string(),
            query,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// The number of query parameters a request is required to carry.
    pub fn specificity(&self) -> usize {
        self.query.len()
    }

    /// Canonical storage key: the path, followed by the percent-encoded query with keys in
    /// sorted order. Two patterns that only differ in query order share the same key.
    pub fn key(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        format!("{}?{}", self.path, encode_query(&self.query))
    }

    /// Returns `true` if every required parameter is present in `query` with exactly the
    /// required value. Additional request parameters are ignored.
    pub fn is_satisfied_by(&self, query: &RequestQuery) -> bool {
        self.query
            .iter()
            .all(|(key, value)| match query.get_all(key) {
                Some([actual]) => actual == value,
                _ => false,
            })
    }
}

impl From<&str> for UrlPattern {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Query parameters of an incoming request. Repeated keys keep all of their values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestQuery(BTreeMap<String, Vec<String>>);

impl RequestQuery {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                params
                    .entry(key.into_owned())
                    .or_default()
                    .push(value.into_owned());
            }
        }

        Self(params)
    }

    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(|values| values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Joins API path segments: `/prefix/resource/action`. The prefix is optional and the
/// action segment is only appended when it is not empty.
pub fn format_path(prefix: Option<&str>, resource: &str, action: &str) -> String {
    let mut path = String::from("/");

    if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
        path.push_str(prefix);
        path.push('/');
    }

    path.push_str(resource);

    if !action.is_empty() {
        path.push('/');
        path.push_str(action);
    }

    path
}

/// Replaces `:name` placeholders in `url` with the supplied values.
pub fn apply_slugs<I, K, V>(url: &str, slugs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut slugs: Vec<(K, V)> = slugs.into_iter().collect();
    // Longer names first, so that `:id` does not clobber the head of `:idx`.
    slugs.sort_by(|(a, _), (b, _)| b.as_ref().len().cmp(&a.as_ref().len()));

    slugs
        .iter()
        .fold(url.to_string(), |url, (placeholder, value)| {
            url.replace(&format!(":{}", placeholder.as_ref()), value.as_ref())
        })
}

/// Percent-encodes query parameters in the order they are supplied.
pub fn encode_query<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

fn split_path_and_query(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    }
}
