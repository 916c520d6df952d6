//! HTTP Transport Builder: builds the single `reqwest::Client` shared
//! by every worker across every run — DNS override, mTLS, default headers,
//! and connection pool tuning are all applied once, at startup.
//!
//! Certificate verification is never disabled here; a target with a
//! self-signed chain needs a custom root store, not a blanket bypass.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::str::FromStr;

use tracing::{info, warn};

use crate::connection_pool::PoolConfig;
use crate::utils::parse_headers_with_escapes;

/// Configuration for building the shared HTTP client.
#[derive(Default)]
pub struct ClientConfig {
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub pool_config: Option<PoolConfig>,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

pub fn build_client(
    config: &ClientConfig,
) -> Result<ClientBuildResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut client_builder = reqwest::Client::builder();

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("resolve_target_addr is set but empty, no DNS override will be applied");
        }
    }

    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(count = parsed_headers.len(), "configured custom default headers");
    }

    let pool_config = config.pool_config.clone().unwrap_or_default();
    client_builder = pool_config.apply_to_builder(client_builder);
    info!(
        max_idle_per_host = pool_config.max_idle_per_host,
        idle_timeout_secs = pool_config.idle_timeout.as_secs(),
        "connection pool configured"
    );

    let client = client_builder.build()?;

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

fn configure_dns_override(
    mut client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    let parts: Vec<&str> = resolve_str.split(':').collect();
    if parts.len() != 3 {
        return Err(format!(
            "resolve_target_addr ('{}') is not in the expected format 'hostname:ip:port'",
            resolve_str
        )
        .into());
    }

    let hostname_to_override = parts[0].trim();
    let ip_to_resolve_to = parts[1].trim();
    let port_to_connect_to_str = parts[2].trim();

    if hostname_to_override.is_empty() || ip_to_resolve_to.is_empty() || port_to_connect_to_str.is_empty() {
        return Err("resolve_target_addr: hostname, ip, and port parts must all be non-empty".into());
    }

    let port_to_connect_to: u16 = port_to_connect_to_str
        .parse()
        .map_err(|e| format!("invalid port '{}' in resolve_target_addr: {}", port_to_connect_to_str, e))?;

    let socket_addr_str = format!("{}:{}", ip_to_resolve_to, port_to_connect_to);
    let socket_addr: SocketAddr = socket_addr_str
        .parse()
        .map_err(|e| format!("invalid address '{}' in resolve_target_addr: {}", socket_addr_str, e))?;

    client_builder = client_builder.resolve(hostname_to_override, socket_addr);
    info!(host = hostname_to_override, resolves_to = %socket_addr, "DNS override configured");

    Ok(client_builder)
}

fn configure_mtls(
    mut client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let mut cert_file = File::open(cert_path)
                .map_err(|e| format!("failed to open client certificate '{}': {}", cert_path, e))?;
            let mut cert_pem_buf = Vec::new();
            cert_file
                .read_to_end(&mut cert_pem_buf)
                .map_err(|e| format!("failed to read client certificate '{}': {}", cert_path, e))?;

            let mut key_file = File::open(key_path)
                .map_err(|e| format!("failed to open client key '{}': {}", key_path, e))?;
            let mut key_pem_buf = Vec::new();
            key_file
                .read_to_end(&mut key_pem_buf)
                .map_err(|e| format!("failed to read client key '{}': {}", key_path, e))?;

            let mut cert_pem_cursor = std::io::Cursor::new(cert_pem_buf.as_slice());
            let certs_result: Vec<_> = rustls_pemfile::certs(&mut cert_pem_cursor).collect();
            if certs_result.is_empty() {
                return Err(format!("no PEM certificates found in {}", cert_path).into());
            }
            for cert in certs_result {
                cert.map_err(|e| format!("failed to parse certificate PEM from '{}': {}", cert_path, e))?;
            }

            let mut key_pem_cursor = std::io::Cursor::new(key_pem_buf.as_slice());
            let keys_result: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_pem_cursor).collect();
            if keys_result.is_empty() {
                return Err(format!("no PKCS#8 private keys found in '{}'", key_path).into());
            }
            for key in keys_result {
                key.map_err(|e| format!("failed to parse private key from '{}': {}", key_path, e))?;
            }

            let mut combined_pem_buf = Vec::new();
            combined_pem_buf.extend_from_slice(&cert_pem_buf);
            if !cert_pem_buf.ends_with(b"\n") && !key_pem_buf.starts_with(b"\n") {
                combined_pem_buf.push(b'\n');
            }
            combined_pem_buf.extend_from_slice(&key_pem_buf);

            let identity = reqwest::Identity::from_pem(&combined_pem_buf).map_err(|e| {
                format!("failed to build client identity from '{}'/'{}': {}", cert_path, key_path, e)
            })?;

            client_builder = client_builder.identity(identity);
            info!("mTLS client identity configured");
        }
        (Some(_), None) => {
            return Err("client_cert_path is set but client_key_path is missing".into());
        }
        (None, Some(_)) => {
            return Err("client_key_path is set but client_cert_path is missing".into());
        }
        (None, None) => {}
    }

    Ok(client_builder)
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let header_pair_str = header_pair_str.trim();
        if header_pair_str.is_empty() {
            continue;
        }

        let parts: Vec<&str> = header_pair_str.splitn(2, ':').collect();
        if parts.len() != 2 {
            return Err(format!("invalid header format '{}', expected 'Name:Value'", header_pair_str).into());
        }

        let name_str = parts[0].trim();
        let value_str = parts[1].trim();
        if name_str.is_empty() {
            return Err(format!("header name cannot be empty in '{}'", header_pair_str).into());
        }

        let unescaped_value = value_str.replace("\\,", ",");
        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| format!("invalid header name '{}': {}", name_str, e))?;
        let header_value = HeaderValue::from_str(&unescaped_value)
            .map_err(|e| format!("invalid header value for '{}': {}", name_str, e))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
