//! Implementation of [Prober] for TCP.

use crate::address::{self, Address};
use crate::probe::Prober;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Considers a backend alive if a TCP connection to it can be established.
///
/// The connection is dropped as soon as it exists. Name resolution happens
/// as part of the connect, so an unresolvable host is reported like any
/// other connection failure.
pub struct TcpProber {}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &Address) -> Result<(), address::Error> {
        let stream = TcpStream::connect(address.as_str()).await?;
        drop(stream);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_backend_is_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(listener.local_addr().unwrap());

        TcpProber {}.probe(&address).await.expect("listener should accept");
    }

    #[tokio::test]
    async fn closed_port_fails() {
        // Grab a free port, then stop listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(listener.local_addr().unwrap());
        drop(listener);

        let err = TcpProber {}.probe(&address).await.unwrap_err();
        assert!(matches!(err, address::Error::Io(_)), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_address_fails() {
        let err = TcpProber {}
            .probe(&Address::new("not an address"))
            .await
            .unwrap_err();
        assert!(matches!(err, address::Error::Io(_)), "{err:?}");
    }
}
