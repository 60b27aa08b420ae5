//! Chooses the worker's stream: inherited stdio, or an outbound connection
//! back to the parent's loopback listener when a `host:port` argument is
//! given (the counterpart to the parent's socket-mode transport bootstrap).

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

pub async fn connect(addr: Option<&str>) -> std::io::Result<(BoxedRead, BoxedWrite)> {
    match addr {
        None => {
            let stdin = tokio::io::stdin();
            let stdout = tokio::io::stdout();
            Ok((Box::new(stdin), Box::new(stdout)))
        }
        Some(addr) => {
            let stream = TcpStream::connect(addr).await?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
    }
}
