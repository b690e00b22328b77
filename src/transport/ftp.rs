use super::{entry_name, ArchiveTransport};
use crate::error::{IngestError, Result};
use crate::source::Mirror;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

static PASSIVE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)").expect("Invalid regex pattern")
});

const FILE_UNAVAILABLE: u32 = 550;

/// Anonymous passive-mode FTP. One control session per call.
pub struct FtpTransport {
    timeout: Duration,
}

impl FtpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn bounded<T>(&self, mirror: &Mirror, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| {
                IngestError::transport(
                    &mirror.name,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })?
    }
}

struct FtpSession {
    control: BufReader<TcpStream>,
    peer: IpAddr,
    root: String,
    mirror: String,
}

impl FtpSession {
    async fn open(mirror: &Mirror) -> Result<Self> {
        let url = Url::parse(&mirror.base_address)
            .map_err(|e| IngestError::transport(&mirror.name, format!("bad ftp address: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| IngestError::transport(&mirror.name, "ftp address has no host"))?;
        let port = url.port_or_known_default().unwrap_or(21);
        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?.ip();
        let mut session = Self {
            control: BufReader::new(stream),
            peer,
            root: url.path().trim_end_matches('/').to_string(),
            mirror: mirror.name.clone(),
        };

        session.expect_reply(&[220]).await?;
        let (code, _) = session.command("USER anonymous").await?;
        if code == 331 {
            session.command_expect("PASS anonymous@", &[230]).await?;
        } else if code != 230 {
            return Err(session.unexpected("USER", code));
        }
        session.command_expect("TYPE I", &[200]).await?;
        Ok(session)
    }

    fn path(&self, relative: &str) -> String {
        format!("{}/{}", self.root, relative.trim_start_matches('/'))
    }

    fn unexpected(&self, command: &str, code: u32) -> IngestError {
        IngestError::transport(&self.mirror, format!("{command} answered {code}"))
    }

    /// Reads one (possibly multi-line) reply.
    async fn reply(&mut self) -> Result<(u32, String)> {
        let mut line = String::new();
        if self.control.read_line(&mut line).await? == 0 {
            return Err(IngestError::transport(&self.mirror, "control connection closed"));
        }
        let code: u32 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| IngestError::transport(&self.mirror, format!("bad reply: {line:?}")))?;
        let mut text = line.clone();
        if line.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                line.clear();
                if self.control.read_line(&mut line).await? == 0 {
                    return Err(IngestError::transport(&self.mirror, "reply truncated"));
                }
                text.push_str(&line);
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }
        Ok((code, text))
    }

    async fn expect_reply(&mut self, accepted: &[u32]) -> Result<String> {
        let (code, text) = self.reply().await?;
        if accepted.contains(&code) {
            Ok(text)
        } else {
            Err(self.unexpected("greeting", code))
        }
    }

    async fn command(&mut self, command: &str) -> Result<(u32, String)> {
        let stream = self.control.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        self.reply().await
    }

    async fn command_expect(&mut self, command: &str, accepted: &[u32]) -> Result<String> {
        let (code, text) = self.command(command).await?;
        if accepted.contains(&code) {
            Ok(text)
        } else {
            let verb = command.split_whitespace().next().unwrap_or(command);
            Err(self.unexpected(verb, code))
        }
    }

    async fn passive(&mut self) -> Result<TcpStream> {
        let text = self.command_expect("PASV", &[227]).await?;
        let port = passive_port(&text)
            .ok_or_else(|| IngestError::transport(&self.mirror, "unparseable PASV reply"))?;
        // The advertised address is often a private one behind NAT; reuse the
        // control peer instead.
        Ok(TcpStream::connect(SocketAddr::new(self.peer, port)).await?)
    }

    /// Runs a data-channel command. `None` when the server reports the path
    /// as unavailable.
    async fn transfer(&mut self, command: &str) -> Result<Option<Vec<u8>>> {
        let mut data = self.passive().await?;
        let (code, _) = self.command(command).await?;
        if code == FILE_UNAVAILABLE {
            return Ok(None);
        }
        if code != 125 && code != 150 {
            return Err(self.unexpected(command, code));
        }
        let mut payload = Vec::new();
        data.read_to_end(&mut payload).await?;
        drop(data);
        let (code, _) = self.reply().await?;
        if code != 226 && code != 250 {
            return Err(self.unexpected(command, code));
        }
        Ok(Some(payload))
    }

    async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            debug!("FTP QUIT failed on {}: {}", self.mirror, e);
        }
    }
}

/// Data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn passive_port(reply: &str) -> Option<u16> {
    let caps = PASSIVE_PATTERN.captures(reply)?;
    let octet = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u8>().ok());
    Some(u16::from(octet(5)?) * 256 + u16::from(octet(6)?))
}

#[async_trait]
impl ArchiveTransport for FtpTransport {
    #[instrument(skip(self, mirror), fields(mirror = %mirror.name))]
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>> {
        self.bounded(mirror, async {
            let mut session = FtpSession::open(mirror).await?;
            let target = session.path(path);
            let listing = session.transfer(&format!("NLST {target}")).await?;
            session.quit().await;
            let names: Vec<String> = listing
                .map(|bytes| {
                    String::from_utf8_lossy(&bytes)
                        .lines()
                        .filter_map(entry_name)
                        .collect()
                })
                .unwrap_or_default();
            Ok(names)
        })
        .await
    }

    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool> {
        self.bounded(mirror, async {
            let mut session = FtpSession::open(mirror).await?;
            let target = session.path(path);
            let (code, _) = session.command(&format!("SIZE {target}")).await?;
            session.quit().await;
            match code {
                213 => Ok(true),
                FILE_UNAVAILABLE => Ok(false),
                other => Err(IngestError::transport(
                    &mirror.name,
                    format!("SIZE answered {other}"),
                )),
            }
        })
        .await
    }

    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>> {
        self.bounded(mirror, async {
            let mut session = FtpSession::open(mirror).await?;
            let target = session.path(path);
            let payload = session.transfer(&format!("RETR {target}")).await?;
            session.quit().await;
            payload.ok_or_else(|| {
                IngestError::transport(&mirror.name, format!("{target} not available"))
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Protocol;
    use tokio::net::TcpListener;

    /// Single-connection FTP server scripted for one RETR.
    async fn serve_retr(listener: TcpListener, data: TcpListener, payload: &'static [u8]) {
        let (control, _) = listener.accept().await.unwrap();
        let mut control = BufReader::new(control);
        let data_port = data.local_addr().unwrap().port();
        control.get_mut().write_all(b"220-Welcome\r\n220 ready\r\n").await.unwrap();
        let mut line = String::new();
        loop {
            line.clear();
            if control.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let reply = match line.split_whitespace().next().unwrap_or("") {
                "USER" => "331 password please\r\n".to_string(),
                "PASS" => "230 logged in\r\n".to_string(),
                "TYPE" => "200 binary\r\n".to_string(),
                "PASV" => format!(
                    "227 Entering Passive Mode (10,0,0,1,{},{})\r\n",
                    data_port / 256,
                    data_port % 256
                ),
                "RETR" => {
                    control.get_mut().write_all(b"150 opening\r\n").await.unwrap();
                    let (mut stream, _) = data.accept().await.unwrap();
                    stream.write_all(payload).await.unwrap();
                    drop(stream);
                    "226 done\r\n".to_string()
                }
                "QUIT" => {
                    control.get_mut().write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 not implemented\r\n".to_string(),
            };
            control.get_mut().write_all(reply.as_bytes()).await.unwrap();
        }
    }

    #[test]
    fn passive_reply_gives_port() {
        assert_eq!(
            passive_port("227 Entering Passive Mode (192,168,1,2,195,80)"),
            Some(195 * 256 + 80)
        );
        assert_eq!(passive_port("227 Entering Passive Mode (1,2,3,4,999,1)"), None);
        assert_eq!(passive_port("500 nope"), None);
    }

    #[tokio::test]
    async fn retrieves_file_over_passive_connection() {
        let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = control.local_addr().unwrap().port();
        let server = tokio::spawn(serve_retr(control, data, b"CDF\x01payload"));

        let mirror = Mirror::new(
            "local ftp",
            format!("ftp://127.0.0.1:{port}/ifremer/argo"),
            Protocol::Ftp,
        );
        let transport = FtpTransport::new(Duration::from_secs(5));
        let bytes = transport.fetch(&mirror, "dac/aoml/1/1_meta.nc").await.unwrap();
        assert_eq!(bytes, b"CDF\x01payload");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mirror = Mirror::new("gone", format!("ftp://127.0.0.1:{port}/argo"), Protocol::Ftp);
        let transport = FtpTransport::new(Duration::from_secs(2));
        assert!(transport.list(&mirror, "dac/").await.is_err());
    }
}
