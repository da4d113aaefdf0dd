//! Hidden file patterns for the static file fallback.

use regex::Regex;
use std::str::FromStr;

/// Glob alternatives naming paths the static file server pretends do not exist.
///
/// # Grammar
/// ```text
/// pattern = glob *( "|" glob ) [ "$" ]
/// ```
/// | Token | Matches                                  |
/// |-------|------------------------------------------|
/// | `**`  | any run of characters, `/` included      |
/// | `*`   | any run of characters except `/`         |
/// | `?`   | one character other than `/`             |
/// | `[..]`| one character from the set, `[!..]` negates |
///
/// Every other character matches itself. Matches are anchored at both ends,
/// so a trailing `$` changes nothing and is accepted for compatibility.
///
/// A path is hidden when it, or any of its ancestor directories, matches.
/// Hiding `/private` therefore hides `/private/keys/id_rsa` as well.
///
/// ```
/// use embed_web::HiddenPattern;
///
/// let hidden: HiddenPattern = "**/.*|/private|*.bak$".parse().unwrap();
///
/// assert!(hidden.is_hidden("/.git/config"));
/// assert!(hidden.is_hidden("/docs/.env"));
/// assert!(hidden.is_hidden("/private/notes.txt"));
/// assert!(!hidden.is_hidden("/docs/readme.md"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HiddenPattern {
    regex: Option<Regex>,
}

impl HiddenPattern {
    /// Whether `path` or one of its ancestors matches.
    pub fn is_hidden(&self, path: &str) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };

        let path = path.trim_end_matches('/');
        path.match_indices('/')
            .map(|(index, _)| &path[..index])
            .filter(|prefix| !prefix.is_empty())
            .chain(std::iter::once(path))
            .any(|candidate| regex.is_match(candidate))
    }

    /// Whether the exact `path` matches, ignoring ancestors.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.as_ref().is_some_and(|regex| regex.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }
}

impl FromStr for HiddenPattern {
    type Err = regex::Error;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let alternatives: Vec<String> = src
            .split('|')
            .map(str::trim)
            .map(|glob| glob.strip_suffix('$').unwrap_or(glob))
            .filter(|glob| !glob.is_empty())
            .map(glob_to_regex)
            .collect();

        if alternatives.is_empty() {
            return Ok(HiddenPattern::default());
        }

        let regex = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
        Ok(HiddenPattern { regex: Some(regex) })
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' if glob_class(&mut chars, &mut out) => {}
            c => {
                let mut buf = [0; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }

    out
}

// Copies a `[...]` set through to the regex; leaves `chars` untouched and
// returns false when the set is never closed.
fn glob_class(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) -> bool {
    let rest: String = chars.clone().collect();
    let Some(end) = rest.find(']').filter(|end| *end > 0) else {
        return false;
    };

    let set = &rest[..end];
    out.push('[');
    match set.strip_prefix('!') {
        Some(negated) => {
            out.push('^');
            out.push_str(&negated.replace('\\', "\\\\"));
        }
        None => out.push_str(&set.replace('\\', "\\\\")),
    }
    out.push(']');

    for _ in 0..=set.chars().count() {
        chars.next();
    }
    true
}
