//! The SOCKS5 (RFC 1928) destination handshake.
//!
//! Only what proxy clients actually need is supported: no authentication and
//! the CONNECT command. The decoded destination is returned as a
//! `host:port`-style pair for the address table lookup.

use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

#[derive(Debug, thiserror::Error)]
pub(crate) enum SocksError {
    #[error("unsupported SOCKS version {0:#04x}")]
    Version(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    #[error("unsupported command {0:#04x}")]
    Command(u8),

    #[error("unsupported address type {0:#04x}")]
    AddressType(u8),

    #[error("destination is not valid UTF-8")]
    BadDomain,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Performs the server side of the handshake and returns the requested
/// destination.
///
/// The success reply is written before returning so the caller can start
/// relaying immediately; failure paths write the matching reply code where
/// the protocol provides one.
pub(crate) async fn decode<C>(io: &mut C) -> Result<(String, u16), SocksError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    io.read_exact(&mut greeting).await?;
    if greeting[0] != VERSION {
        return Err(SocksError::Version(greeting[0]));
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    io.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        io.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
        return Err(SocksError::NoAcceptableAuth);
    }
    io.write_all(&[VERSION, METHOD_NO_AUTH]).await?;

    let mut request = [0u8; 4];
    io.read_exact(&mut request).await?;
    if request[0] != VERSION {
        return Err(SocksError::Version(request[0]));
    }
    if request[1] != CMD_CONNECT {
        reply(io, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(SocksError::Command(request[1]));
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            io.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            io.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            io.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            io.read_exact(&mut domain).await?;
            String::from_utf8(domain).map_err(|_| SocksError::BadDomain)?
        }
        atyp => {
            reply(io, REPLY_ADDRESS_NOT_SUPPORTED).await?;
            return Err(SocksError::AddressType(atyp));
        }
    };

    let mut port = [0u8; 2];
    io.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    reply(io, REPLY_SUCCEEDED).await?;
    Ok((host, port))
}

/// Writes a reply with an all-zero bound address.
async fn reply<C>(io: &mut C, code: u8) -> std::io::Result<()>
where
    C: AsyncWrite + Unpin,
{
    io.write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
}
