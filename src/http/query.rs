//! URL query string and form body parser with percent-decoding.

use memchr::memchr;
use std::{borrow::Cow, collections::HashMap, error, fmt};

/// Query string parser.
///
/// Splits on `&`, then on the first `=`, turns `+` into a space and
/// percent-decodes both halves. Also suited to
/// `application/x-www-form-urlencoded` bodies.
///
/// # Examples
/// ```rust
/// use embed_web::query::Query;
/// use std::collections::HashMap;
///
/// // Parse into Vec (preserves order)
/// let params: Vec<(String, String)> = Query::parse("name=John+Smith&city=K%C3%B6ln", 10).unwrap();
/// assert_eq!(params[0], ("name".to_string(), "John Smith".to_string()));
/// assert_eq!(params[1], ("city".to_string(), "Köln".to_string()));
///
/// // Parse into HashMap (last value wins)
/// let params: HashMap<String, String> = Query::parse("key=1&key=2", 10).unwrap();
/// assert_eq!(params["key"], "2");
///
/// // Handle limits
/// let result = Query::parse::<Vec<(String, String)>>("a=1&b=2", 1);
/// assert!(result.is_err());
/// ```
pub struct Query;

impl Query {
    /// Parses `query` into a new collection.
    ///
    /// A leading `?` is ignored, empty segments (`a=1&&b=2`) are skipped and
    /// a key without `=` gets an empty value.
    #[inline]
    pub fn parse<C: QueryCollector>(query: &str, limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses `query`, appending to an existing collection.
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        query: &str,
        limit: usize,
    ) -> Result<(), Error> {
        let data = query.strip_prefix('?').unwrap_or(query);
        let bytes = data.as_bytes();

        let mut start = 0;
        while start < bytes.len() {
            let end = memchr(b'&', &bytes[start..])
                .map(|pos| start + pos)
                .unwrap_or(bytes.len());

            if end > start {
                if result.length() >= limit {
                    return Err(Error::OverLimit(limit));
                }

                // '&' and '=' are ASCII, so both splits land on char boundaries
                let segment = &data[start..end];
                let (key, value) = match memchr(b'=', segment.as_bytes()) {
                    Some(index) => (&segment[..index], &segment[index + 1..]),
                    None => (segment, ""),
                };

                result.add_param(decode(key)?, decode(value)?);
            }

            start = end + 1;
        }

        Ok(())
    }
}

/// Decodes one query component: `+` is a space, `%XX` is a byte.
pub fn decode(component: &str) -> Result<String, Error> {
    let component: Cow<str> = match component.contains('+') {
        true => Cow::Owned(component.replace('+', " ")),
        false => Cow::Borrowed(component),
    };

    urlencoding::decode(&component)
        .map(Cow::into_owned)
        .map_err(|_| Error::Decoding)
}

/// A collection that parsed query parameters can be added to.
///
/// # Examples
/// ```rust
/// use embed_web::query::{Query, QueryCollector};
///
/// struct Keys(Vec<String>);
///
/// impl QueryCollector for Keys {
///     fn add_param(&mut self, key: String, _: String) {
///         self.0.push(key);
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Keys(Vec::with_capacity(capacity))
///     }
/// }
///
/// let keys: Keys = Query::parse("a=1&b&c=", 8).unwrap();
/// assert_eq!(keys.0, ["a", "b", "c"]);
/// ```
pub trait QueryCollector
where
    Self: Sized,
{
    /// Adds one decoded parameter.
    fn add_param(&mut self, key: String, value: String);

    /// Number of parameters collected so far.
    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

// Preserves parameter order
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Deduplicates parameters (last wins)
impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Query parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// More parameters than the given limit.
    OverLimit(usize),

    /// A percent-encoded sequence did not decode to UTF-8.
    Decoding,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OverLimit(limit) => {
                write!(f, "Query parameter limit exceeded: limit={}", limit)
            }
            Error::Decoding => write!(f, "Query parameter is not valid UTF-8 once decoded"),
        }
    }
}
