use std::io;

use async_trait::async_trait;
use base64::Engine;
use serde_yaml::Mapping;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{opt_str_field, port_field, str_field};
use crate::error::Result;
use crate::traits::{OutboundHandle, ProxyStream};
use crate::types::ProxyType;

const MAX_RESPONSE_HEADER: usize = 8 * 1024;

/// HTTP 代理出站 (CONNECT 隧道, 支持 Basic 认证)
pub struct HttpOutbound {
    name: String,
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl HttpOutbound {
    pub fn parse(name: String, config: &Mapping) -> Result<Self> {
        Ok(Self {
            name,
            server: str_field(config, "server")?.to_string(),
            port: port_field(config, "port")?,
            username: opt_str_field(config, "username"),
            password: opt_str_field(config, "password"),
        })
    }

    fn connect_request(&self, host: &str, port: u16) -> String {
        let mut request = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n"
        );
        if let Some(username) = &self.username {
            let credentials = format!("{username}:{}", self.password.as_deref().unwrap_or_default());
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
        }
        request.push_str("\r\n");
        request
    }
}

#[async_trait]
impl OutboundHandle for HttpOutbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Http
    }

    async fn dial(&self, host: &str, port: u16) -> io::Result<ProxyStream> {
        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;
        stream
            .write_all(self.connect_request(host, port).as_bytes())
            .await?;

        // Read up to the end of the response header; the tunnel payload
        // only starts after "\r\n\r\n".
        let mut header = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !header.ends_with(b"\r\n\r\n") {
            if header.len() >= MAX_RESPONSE_HEADER {
                return Err(proto_err("response header too large".to_string()));
            }
            stream.read_exact(&mut byte).await?;
            header.push(byte[0]);
        }

        let status_line = String::from_utf8_lossy(&header);
        let code = status_line.split_whitespace().nth(1).unwrap_or_default();
        if code != "200" {
            return Err(proto_err(format!(
                "connect rejected: {}",
                status_line.lines().next().unwrap_or_default()
            )));
        }

        Ok(ProxyStream::new(stream))
    }
}

fn proto_err(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("http proxy: {message}"))
}
