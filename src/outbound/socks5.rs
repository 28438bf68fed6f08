use std::io;

use async_trait::async_trait;
use serde_yaml::Mapping;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{opt_str_field, port_field, str_field};
use crate::error::Result;
use crate::traits::{OutboundHandle, ProxyStream};
use crate::types::ProxyType;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NONE: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 出站 (CONNECT, 支持用户名密码认证)
pub struct Socks5Outbound {
    name: String,
    server: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl Socks5Outbound {
    pub fn parse(name: String, config: &Mapping) -> Result<Self> {
        Ok(Self {
            name,
            server: str_field(config, "server")?.to_string(),
            port: port_field(config, "port")?,
            username: opt_str_field(config, "username"),
            password: opt_str_field(config, "password"),
        })
    }

    async fn handshake(&self, stream: &mut TcpStream) -> io::Result<()> {
        let method = if self.username.is_some() {
            METHOD_USER_PASS
        } else {
            METHOD_NONE
        };
        stream.write_all(&[SOCKS_VERSION, 1, method]).await?;

        let mut choice = [0u8; 2];
        stream.read_exact(&mut choice).await?;
        if choice[0] != SOCKS_VERSION || choice[1] != method {
            return Err(proto_err(format!(
                "server refused auth method {method:#04x}"
            )));
        }

        if method == METHOD_USER_PASS {
            self.authenticate(stream).await?;
        }
        Ok(())
    }

    /// RFC 1929 username/password subnegotiation.
    async fn authenticate(&self, stream: &mut TcpStream) -> io::Result<()> {
        let user = self.username.as_deref().unwrap_or_default().as_bytes();
        let pass = self.password.as_deref().unwrap_or_default().as_bytes();
        if user.len() > 255 || pass.len() > 255 {
            return Err(proto_err("username/password too long".to_string()));
        }

        let mut req = Vec::with_capacity(3 + user.len() + pass.len());
        req.push(0x01);
        req.push(user.len() as u8);
        req.extend_from_slice(user);
        req.push(pass.len() as u8);
        req.extend_from_slice(pass);
        stream.write_all(&req).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[1] != 0x00 {
            return Err(proto_err("authentication rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundHandle for Socks5Outbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        ProxyType::Socks5
    }

    async fn dial(&self, host: &str, port: u16) -> io::Result<ProxyStream> {
        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;
        self.handshake(&mut stream).await?;

        let host_bytes = host.as_bytes();
        if host_bytes.len() > 255 {
            return Err(proto_err(format!("hostname too long: {host}")));
        }
        let mut req = Vec::with_capacity(7 + host_bytes.len());
        req.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
        req.push(host_bytes.len() as u8);
        req.extend_from_slice(host_bytes);
        req.extend_from_slice(&port.to_be_bytes());
        stream.write_all(&req).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            return Err(proto_err(format!("connect rejected, code {:#04x}", head[1])));
        }

        // drain the bound address so the tunnel starts at the payload
        let addr_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize
            }
            other => return Err(proto_err(format!("unknown address type {other:#04x}"))),
        };
        let mut rest = vec![0u8; addr_len + 2];
        stream.read_exact(&mut rest).await?;

        Ok(ProxyStream::new(stream))
    }
}

fn proto_err(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("socks5: {message}"))
}
