//! Bidirectional byte pipe between a client and a backend.
//!
//! Both directions run as joined futures in the caller's task. EOF on one
//! side shuts down the write half of the other; a copy error in either
//! direction ends both.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transferred {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

pub async fn pipe<C, B>(client: C, backend: B) -> io::Result<Transferred>
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut backend_rx, mut backend_tx) = tokio::io::split(backend);

    let upstream = async {
        let n = tokio::io::copy(&mut client_rx, &mut backend_tx).await?;
        // The peer may already be gone; a failed half-close is not a copy error.
        let _ = backend_tx.shutdown().await;
        Ok::<_, io::Error>(n)
    };
    let downstream = async {
        let n = tokio::io::copy(&mut backend_rx, &mut client_tx).await?;
        let _ = client_tx.shutdown().await;
        Ok::<_, io::Error>(n)
    };

    let (client_to_backend, backend_to_client) = tokio::try_join!(upstream, downstream)?;
    Ok(Transferred {
        client_to_backend,
        backend_to_client,
    })
}
