use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::Client;
use std::fmt;
use std::net::TcpStream;
use std::str::FromStr;
use tracing::debug;

#[cfg(feature = "native-tls")]
use native_tls::TlsConnector;

/// The port IMAP over implicit TLS listens on.
pub const IMAPS_PORT: u16 = 993;

/// How the byte stream to a server is secured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// TLS on [`IMAPS_PORT`], plaintext everywhere else.
    #[default]
    Auto,
    /// TLS from the first byte.
    Tls,
    /// Plaintext greeting, then `STARTTLS`.
    StartTls,
    /// No encryption at all.
    Plaintext,
}

impl ConnectionMode {
    /// The mode `Auto` stands for on the given port; any other mode is returned as is.
    pub fn resolve(self, port: u16) -> ConnectionMode {
        match self {
            ConnectionMode::Auto if port == IMAPS_PORT => ConnectionMode::Tls,
            ConnectionMode::Auto => ConnectionMode::Plaintext,
            mode => mode,
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ConnectionMode::Auto),
            "tls" | "ssl" => Ok(ConnectionMode::Tls),
            "starttls" => Ok(ConnectionMode::StartTls),
            "plaintext" | "plain" => Ok(ConnectionMode::Plaintext),
            _ => Err(Error::Config(format!("unknown connection mode {:?}", s))),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ConnectionMode::Auto => "auto",
            ConnectionMode::Tls => "tls",
            ConnectionMode::StartTls => "starttls",
            ConnectionMode::Plaintext => "plaintext",
        };
        f.write_str(s)
    }
}

/// A convenience builder for [`Client`] structs over plain or encrypted transports.
///
/// The client it yields has already read the server greeting, and is therefore ready for
/// [`Client::login`]:
/// ```no_run
/// # use imapcopy::{ClientBuilder, ConnectionMode};
/// # fn main() -> Result<(), imapcopy::Error> {
/// let mut client = ClientBuilder::new("imap.example.com", 993).connect()?;
/// client.login("user", "secret")?;
///
/// let mut local = ClientBuilder::new("localhost", 143)
///     .mode(ConnectionMode::StartTls)
///     .connect()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder<D>
where
    D: AsRef<str>,
{
    domain: D,
    port: u16,
    mode: ConnectionMode,
}

impl<D> ClientBuilder<D>
where
    D: AsRef<str>,
{
    /// Make a new `ClientBuilder` using the given domain and port.
    pub fn new(domain: D, port: u16) -> Self {
        ClientBuilder {
            domain,
            port,
            mode: ConnectionMode::Auto,
        }
    }

    /// Secure the connection as given instead of guessing from the port.
    pub fn mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Open the connection and read the greeting.
    pub fn connect(&self) -> Result<Client<Connection>> {
        let domain = self.domain.as_ref();
        let mode = self.mode.resolve(self.port);
        debug!("connecting to {}:{} ({})", domain, self.port, mode);

        let tcp = TcpStream::connect((domain, self.port))?;
        match mode {
            ConnectionMode::Plaintext | ConnectionMode::Auto => {
                let mut client = Client::new(Box::new(tcp) as Connection);
                client.read_greeting()?;
                Ok(client)
            }
            ConnectionMode::Tls => {
                let mut client = Client::new(self.handshake(tcp)?);
                client.read_greeting()?;
                Ok(client)
            }
            ConnectionMode::StartTls => {
                let mut client = Client::new(tcp);
                client.read_greeting()?;
                client.run_command_and_check_ok("STARTTLS")?;
                let state = client.state().clone();
                let tcp = client.into_inner()?;
                // the greeting is not repeated after the handshake
                Ok(Client::new(self.handshake(tcp)?).with_state(state))
            }
        }
    }

    #[cfg(feature = "native-tls")]
    fn handshake(&self, tcp: TcpStream) -> Result<Connection> {
        let ssl_conn = TlsConnector::builder().build()?;
        let tls = TlsConnector::connect(&ssl_conn, self.domain.as_ref(), tcp)?;
        Ok(Box::new(tls))
    }

    #[cfg(not(feature = "native-tls"))]
    fn handshake(&self, _tcp: TcpStream) -> Result<Connection> {
        Err(Error::Tls(
            "TLS requested, but imapcopy was built without the native-tls feature".to_string(),
        ))
    }
}
