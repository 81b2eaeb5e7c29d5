//! Expect-continue negotiation.
//!
//! When a request head announces `Expect: 100-continue`, the connection puts
//! a [`ContinueToken`] into the request extensions. The handler may invoke it
//! before reading the body to make the connection emit the interim status;
//! clients that negotiated the expectation hold the body back until then.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// One-shot trigger for the interim `100 Continue` response.
///
/// Invoking it more than once, or after the body already started streaming,
/// has no effect.
#[derive(Debug, Clone)]
pub struct ContinueToken {
    granted: Arc<AtomicBool>,
    signal: mpsc::Sender<()>,
}

impl ContinueToken {
    /// Asks the connection to write the interim status frame.
    pub fn request_continue(&self) {
        if !self.granted.swap(true, Ordering::AcqRel) {
            // the connection may already be gone, which is fine
            let _ = self.signal.try_send(());
        }
    }
}

/// Creates the token plus the receiving end the connection listens on.
pub(crate) fn continue_pair() -> (ContinueToken, mpsc::Receiver<()>) {
    let (signal, listener) = mpsc::channel(1);
    (ContinueToken { granted: Arc::new(AtomicBool::new(false)), signal }, listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_invocation_is_a_no_op() {
        let (token, mut listener) = continue_pair();

        token.request_continue();
        token.request_continue();

        assert!(listener.recv().await.is_some());
        assert!(listener.try_recv().is_err());
    }

    #[tokio::test]
    async fn clones_share_the_one_shot() {
        let (token, mut listener) = continue_pair();

        token.clone().request_continue();
        token.request_continue();

        assert!(listener.recv().await.is_some());
        assert!(listener.try_recv().is_err());
    }
}
