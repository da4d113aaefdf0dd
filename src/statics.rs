//! Static file fallback for requests no controller handles.

use crate::{
    access::pattern::HiddenPattern, config::ServerConfig, errors::ErrorKind, Request, Response,
    StatusCode,
};
use std::{
    fmt::{self, Write as _},
    fs, io,
    path::{Path, PathBuf},
};

/// Serves what is left once every controller declined a `GET` or `HEAD`.
///
/// `path` has already been normalized (see [`make_safe_path`]) and checked
/// against the hidden file pattern. Return `false` when nothing exists there;
/// the server then answers `404`.
pub trait StaticFiles: Send + Sync {
    fn serve(&self, path: &str, request: &Request, response: &mut Response) -> bool;
}

/// Serves files below a document root.
///
/// Directories are answered with their first existing index file, with an
/// HTML listing when enabled, or with `403` otherwise. A directory requested
/// without its trailing slash is redirected (`301`) to the slashed form so
/// relative links resolve.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root: PathBuf,
    index_files: Vec<String>,
    listing: bool,
    hidden: HiddenPattern,
}

impl FileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystem {
            root: root.into(),
            index_files: vec!["index.html".into(), "index.htm".into()],
            listing: false,
            hidden: HiddenPattern::default(),
        }
    }

    pub fn index_files(mut self, index_files: Vec<String>) -> Self {
        self.index_files = index_files;
        self
    }

    pub fn directory_listing(mut self, enabled: bool) -> Self {
        self.listing = enabled;
        self
    }

    /// Entries matching `hidden` are left out of listings.
    pub fn hidden(mut self, hidden: HiddenPattern) -> Self {
        self.hidden = hidden;
        self
    }

    /// File server for `config`, or `None` when the document root is empty.
    pub(crate) fn from_config(config: &ServerConfig, hidden: &HiddenPattern) -> Option<Self> {
        if config.document_root.as_os_str().is_empty() {
            return None;
        }

        Some(
            FileSystem::new(&config.document_root)
                .index_files(config.index_files.clone())
                .directory_listing(config.directory_listing)
                .hidden(hidden.clone()),
        )
    }

    fn serve_file(&self, file: &Path, response: &mut Response) {
        match fs::read(file) {
            Ok(bytes) => {
                response
                    .status(StatusCode::Ok)
                    .set_header("Content-Type", mime_type(file))
                    .body(bytes);
            }
            Err(err) => {
                tracing::warn!(file = %file.display(), %err, "cannot read static file");
                ErrorKind::from(err).render(response);
            }
        }
    }

    fn serve_listing(&self, dir: &Path, path: &str, response: &mut Response) -> io::Result<()> {
        let mut names: Vec<(String, bool)> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let is_dir = entry.file_type().ok()?.is_dir();
                Some((name, is_dir))
            })
            .filter(|(name, _)| !self.hidden.is_hidden(&format!("{path}{name}")))
            .collect();
        names.sort();

        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head><title>Index of {0}</title></head>\n\
             <body>\n<h1>Index of {0}</h1>\n<ul>\n",
            HtmlEscaped(path)
        );
        if path != "/" {
            html.push_str("<li><a href=\"../\">../</a></li>\n");
        }
        for (name, is_dir) in &names {
            let slash = if *is_dir { "/" } else { "" };
            let _ = writeln!(
                html,
                "<li><a href=\"{}{slash}\">{}{slash}</a></li>",
                urlencoding::encode(name),
                HtmlEscaped(name)
            );
        }
        html.push_str("</ul>\n</body>\n</html>\n");

        response
            .status(StatusCode::Ok)
            .set_header("Content-Type", "text/html; charset=utf-8")
            .body(html);
        Ok(())
    }
}

impl StaticFiles for FileSystem {
    fn serve(&self, path: &str, request: &Request, response: &mut Response) -> bool {
        let target = self.root.join(path.trim_start_matches('/'));

        let Ok(meta) = fs::metadata(&target) else {
            return false;
        };

        if meta.is_file() {
            self.serve_file(&target, response);
            return true;
        }
        if !meta.is_dir() {
            return false;
        }

        if !path.ends_with('/') {
            let mut location = format!("{}/", urlencoding::encode(path).replace("%2F", "/"));
            if !request.query().is_empty() {
                location.push('?');
                location.push_str(request.query());
            }
            response
                .status(StatusCode::MovedPermanently)
                .set_header("Location", location);
            return true;
        }

        let index = self
            .index_files
            .iter()
            .filter(|name| !self.hidden.is_hidden(&format!("{path}{name}")))
            .map(|name| target.join(name))
            .find(|file| file.is_file());
        if let Some(index) = index {
            self.serve_file(&index, response);
            return true;
        }

        if !self.listing {
            ErrorKind::Forbidden.render(response);
            return true;
        }

        if let Err(err) = self.serve_listing(&target, path, response) {
            tracing::warn!(dir = %target.display(), %err, "cannot list directory");
            ErrorKind::from(err).render(response);
        }
        true
    }
}

/// Normalizes a decoded request path: collapses repeated slashes, drops `.`
/// segments and resolves `..`. Returns `None` if the path would climb above
/// the root. A trailing slash is kept.
pub fn make_safe_path(path: &str) -> Option<String> {
    if !path.starts_with('/') || path.contains('\\') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }

    let mut safe = String::with_capacity(path.len());
    for segment in &segments {
        safe.push('/');
        safe.push_str(segment);
    }

    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if safe.is_empty() || (trailing && !segments.is_empty()) {
        safe.push('/');
    }

    Some(safe)
}

/// `Content-Type` for a file, from its extension.
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt" | "md" | "log") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

struct HtmlEscaped<'a>(&'a str);

impl fmt::Display for HtmlEscaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&#39;")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}
