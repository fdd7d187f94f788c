use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Opens a connection handle. Implemented by the MongoDB connector and by test doubles.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle>;
}

type ConnectAttempt<H> = Shared<BoxFuture<'static, Result<H, Arc<anyhow::Error>>>>;

/// Process-wide lazily connected handle.
///
/// The first caller starts the connect step and every caller arriving while
/// it is in flight awaits that same attempt, whatever its outcome. A failed
/// attempt is dropped once it resolves, so the next call tries again.
pub struct ConnectionProvider<C: Connector> {
    connector: Arc<C>,
    attempt: Mutex<Option<ConnectAttempt<C::Handle>>>,
    connected: AtomicBool,
}

impl<C: Connector> ConnectionProvider<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            attempt: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub async fn get_connection(&self) -> Result<C::Handle> {
        let attempt = {
            let mut slot = self.attempt.lock().await;
            match slot.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let connector = self.connector.clone();
                    let attempt = async move { connector.connect().await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        match attempt.clone().await {
            Ok(handle) => {
                self.connected.store(true, Ordering::Release);
                Ok(handle)
            }
            Err(e) => {
                let mut slot = self.attempt.lock().await;
                if slot.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
                    *slot = None;
                }
                Err(anyhow!("{:#}", e))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
