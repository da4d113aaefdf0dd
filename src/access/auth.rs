//! HTTP Basic authentication ([RFC 7617](https://datatracker.ietf.org/doc/html/rfc7617)).

use crate::{config::ServerConfig, errors::ErrorKind, Request, Response};
use base64::{engine::general_purpose::STANDARD, Engine};

/// Configured credentials and the realm named in challenges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
    realm: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str, realm: &str) -> Self {
        BasicAuth {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        }
    }

    /// Credentials from `config`, or `None` when authentication is off.
    pub(crate) fn from_config(config: &ServerConfig) -> Option<Self> {
        config.requires_basic_authentication().then(|| {
            Self::new(
                &config.basic_auth_username,
                &config.basic_auth_password,
                &config.auth_domain,
            )
        })
    }

    /// Whether the request carries `Authorization: Basic` with the
    /// configured user and password.
    pub fn verify(&self, request: &Request) -> bool {
        request
            .headers()
            .get_all("Authorization")
            .filter_map(decode_credentials)
            .any(|(user, pass)| user == self.username && pass == self.password)
    }

    /// Answers with `401` and a `WWW-Authenticate` challenge for the realm.
    pub fn challenge(&self, response: &mut Response) {
        let realm = self.realm.replace(['"', '\\'], "");
        response.set_header("WWW-Authenticate", format!("Basic realm=\"{realm}\""));
        ErrorKind::Unauthorized.render(response);
    }
}

fn decode_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;

    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};

    fn request(authorization: Option<&str>) -> Request {
        let request = Request::new(Method::Get, "/private").unwrap();
        match authorization {
            Some(value) => request.with_header("Authorization", value),
            None => request,
        }
    }

    fn basic(credentials: &str) -> String {
        format!("Basic {}", STANDARD.encode(credentials))
    }

    #[test]
    fn only_when_both_credentials_are_set() {
        let mut config = ServerConfig {
            basic_auth_username: "admin".into(),
            ..ServerConfig::default()
        };
        assert!(BasicAuth::from_config(&config).is_none());

        config.basic_auth_password = "s3cret".into();
        assert_eq!(
            BasicAuth::from_config(&config),
            Some(BasicAuth::new("admin", "s3cret", "localhost"))
        );
    }

    #[test]
    fn verify() {
        let auth = BasicAuth::new("admin", "pa:ss", "example.org");

        let cases = [
            (None, false),
            (Some(basic("admin:pa:ss")), true),
            (Some(format!("basic {}", STANDARD.encode("admin:pa:ss"))), true),
            (Some(basic("admin:wrong")), false),
            (Some(basic("Admin:pa:ss")), false),
            (Some(basic("admin")), false),
            (Some("Basic !!!not-base64!!!".to_string()), false),
            (Some(format!("Bearer {}", STANDARD.encode("admin:pa:ss"))), false),
        ];

        for (header, expected) in cases {
            assert_eq!(auth.verify(&request(header.as_deref())), expected, "{header:?}");
        }
    }

    #[test]
    fn challenge_names_the_realm() {
        let auth = BasicAuth::new("admin", "secret", "example.org");
        let mut response = Response::new();
        auth.challenge(&mut response);

        assert_eq!(response.status_code(), StatusCode::Unauthorized);
        assert_eq!(
            response.headers().get("www-authenticate"),
            Some("Basic realm=\"example.org\"")
        );
        assert_eq!(response.body_bytes(), ErrorKind::Unauthorized.json().as_bytes());
    }
}
