use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::async_stream::AsyncStream;

/// Copies bytes in both directions between `a` and `b` until both flows
/// finish, then shuts both write halves down.
///
/// The two directions run as independent tasks and may progress at
/// different rates. End-of-stream is not an error; the first non-EOF copy
/// error is returned and any further one is logged.
pub async fn relay(a: Box<dyn AsyncStream>, b: Box<dyn AsyncStream>) -> std::io::Result<()> {
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let (err_tx, mut err_rx) = mpsc::channel::<std::io::Error>(2);

    let a_to_b_tx = err_tx.clone();
    let a_to_b = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut a_read, &mut b_write).await {
            let _ = a_to_b_tx.try_send(e);
        }
        let _ = b_write.shutdown().await;
    });

    let b_to_a = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut b_read, &mut a_write).await {
            let _ = err_tx.try_send(e);
        }
        let _ = a_write.shutdown().await;
    });

    let _ = tokio::join!(a_to_b, b_to_a);

    // Both senders are gone once the copy tasks finish, so this drains and
    // terminates.
    let mut first_error = None;
    while let Some(e) = err_rx.recv().await {
        if first_error.is_none() {
            first_error = Some(e);
        } else {
            debug!("additional relay error: {}", e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
