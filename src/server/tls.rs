use crate::{config::TlsConfig, errors::StartError};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore,
};
use std::{fs::File, io::BufReader, path::Path, sync::Arc};
use tokio_rustls::TlsAcceptor;

/// Builds the acceptor for `config`. With a CA bundle, clients must present
/// a certificate signed by it.
pub(crate) fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, StartError> {
    let certs = load_certs(&config.certificate)?;
    let key = load_key(&config.private_key)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| StartError::Tls(err.to_string()))?;

    let builder = match &config.ca_bundle {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|err| StartError::Tls(format!("{}: {err}", ca.display())))?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|err| StartError::Tls(err.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|err| StartError::Tls(err.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, StartError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| StartError::Tls(format!("{}: {err}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, StartError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| StartError::Tls(format!("{}: {err}", path.display())))?;

    if certs.is_empty() {
        return Err(StartError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, StartError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|err| StartError::Tls(format!("{}: {err}", path.display())))?
        .ok_or_else(|| StartError::Tls(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn rejects_missing_material() {
        let empty = pem("");
        let cases = [
            (Path::new("/nonexistent/cert.pem"), empty.path()),
            (empty.path(), empty.path()),
        ];

        for (certificate, private_key) in cases {
            let config = TlsConfig {
                certificate: certificate.into(),
                private_key: private_key.into(),
                ca_bundle: None,
            };
            assert!(matches!(acceptor(&config), Err(StartError::Tls(_))));
        }
    }

    #[test]
    fn rejects_garbage_pem() {
        let garbage = pem("-----BEGIN CERTIFICATE-----\nnot base64 at all!\n-----END CERTIFICATE-----\n");
        assert!(matches!(load_certs(garbage.path()), Err(StartError::Tls(_))));

        let no_key = pem("just text\n");
        let err = load_key(no_key.path()).unwrap_err();
        assert!(err.to_string().contains("no private key found"), "{err}");
    }
}
