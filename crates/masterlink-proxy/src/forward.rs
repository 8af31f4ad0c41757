//! One-directional byte forwarding.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy `source` into `destination` until `source` ends, then close
/// `destination`'s write side.
///
/// The destination is shut down whether the copy ended cleanly or with an
/// error. The source is only read from; dropping a read half leaves the
/// socket open. There is no cancellation channel: the forwarder stops when
/// its sockets close or its task is aborted.
pub async fn forward<R, W>(mut source: R, mut destination: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut source, &mut destination).await;
    let _ = destination.shutdown().await;
    copied
}
