//! TCP binding of the lock protocol
//!
//! Clients open one connection per call, write a `Request` line and read a
//! `Response` line. Servers answer every line they receive until the peer
//! hangs up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::wire::{Request, Response, decode_line, encode_line};
use super::{CoordinatorEndpoint, ProtocolError, ProtocolResult, SiteEndpoint};
use crate::coordinator::Coordinator;
use crate::domain::transaction::{Operation, SiteId, Transaction};

/// Turns a decoded request into a response
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Accept connections until `shutdown` is cancelled
pub async fn serve<H>(
    listener: TcpListener,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> ProtocolResult<()>
where
    H: RequestHandler + ?Sized,
{
    let address = listener.local_addr()?;
    info!(%address, "Listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(%address, "Listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handler).await {
                        let broken_pipe = matches!(
                            &e,
                            ProtocolError::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe
                        );
                        if !broken_pipe {
                            warn!(%peer, error = %e, "Connection error");
                        }
                    }
                });
            }
        }
    }
}

async fn handle_connection<H>(mut stream: TcpStream, handler: Arc<H>) -> ProtocolResult<()>
where
    H: RequestHandler + ?Sized,
{
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_line::<Request>(&line) {
            Ok(request) => {
                debug!(request = request.name(), "Handling request");
                handler.handle(request).await
            }
            Err(e) => Response::error(&e),
        };
        writer.write_all(&encode_line(&response)?).await?;
    }
    Ok(())
}

/// One request/response exchange bounded by `timeout`
async fn call(address: &str, timeout: Duration, request: &Request) -> ProtocolResult<Response> {
    let exchange = async {
        let mut stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| ProtocolError::Connect {
                    address: address.to_string(),
                    message: e.to_string(),
                })?;
        stream.write_all(&encode_line(request)?).await?;

        let mut line = String::new();
        let read = BufReader::new(&mut stream).read_line(&mut line).await?;
        if read == 0 {
            return Err(ProtocolError::Malformed(format!(
                "{} closed the connection without answering '{}'",
                address,
                request.name()
            )));
        }
        decode_line::<Response>(&line)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ProtocolError::Timeout {
            operation: request.name().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??
        .into_result()
}

fn unexpected(request: &Request, response: Response) -> ProtocolError {
    ProtocolError::UnexpectedResponse {
        operation: request.name().to_string(),
        response: format!("{:?}", response),
    }
}

async fn expect_ack(address: &str, timeout: Duration, request: Request) -> ProtocolResult<()> {
    match call(address, timeout, &request).await? {
        Response::Ack => Ok(()),
        other => Err(unexpected(&request, other)),
    }
}

/// Site-side handle on a remote coordinator
#[derive(Debug, Clone)]
pub struct TcpCoordinatorClient {
    address: String,
    timeout: Duration,
}

impl TcpCoordinatorClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Tell the coordinator where `site_id` accepts notifications
    pub async fn bind_site(
        &self,
        site_id: SiteId,
        address: impl Into<String>,
    ) -> ProtocolResult<()> {
        let request = Request::BindSite {
            site_id,
            address: address.into(),
        };
        expect_ack(&self.address, self.timeout, request).await
    }
}

#[async_trait]
impl CoordinatorEndpoint for TcpCoordinatorClient {
    async fn register_site(&self) -> ProtocolResult<SiteId> {
        let request = Request::RegisterSite;
        match call(&self.address, self.timeout, &request).await? {
            Response::SiteId { site_id } => Ok(site_id),
            other => Err(unexpected(&request, other)),
        }
    }

    async fn request_lock(&self, operation: &Operation) -> ProtocolResult<bool> {
        let request = Request::RequestLock {
            operation: operation.clone(),
        };
        match call(&self.address, self.timeout, &request).await? {
            Response::Granted { granted } => Ok(granted),
            other => Err(unexpected(&request, other)),
        }
    }

    async fn release_lock(&self, transaction: &Transaction) -> ProtocolResult<()> {
        let request = Request::ReleaseLock {
            transaction_id: transaction.id(),
        };
        expect_ack(&self.address, self.timeout, request).await
    }
}

/// Coordinator-side handle on a remote site
#[derive(Debug, Clone)]
pub struct TcpSiteClient {
    address: String,
    timeout: Duration,
}

impl TcpSiteClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl SiteEndpoint for TcpSiteClient {
    async fn abort(&self) -> ProtocolResult<()> {
        expect_ack(&self.address, self.timeout, Request::Abort).await
    }

    async fn unblock(&self) -> ProtocolResult<()> {
        expect_ack(&self.address, self.timeout, Request::Unblock).await
    }

    async fn write(&self) -> ProtocolResult<()> {
        expect_ack(&self.address, self.timeout, Request::Write).await
    }
}

fn not_served(request: &Request, by: &str) -> Response {
    Response::error(&ProtocolError::Malformed(format!(
        "'{}' is not served by the {}",
        request.name(),
        by
    )))
}

/// Serves coordinator requests; bound sites are reached over TCP
#[derive(Debug, Clone)]
pub struct CoordinatorHandler {
    coordinator: Arc<Coordinator>,
    site_timeout: Duration,
}

impl CoordinatorHandler {
    pub fn new(coordinator: Arc<Coordinator>, site_timeout: Duration) -> Self {
        Self {
            coordinator,
            site_timeout,
        }
    }
}

#[async_trait]
impl RequestHandler for CoordinatorHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::RegisterSite => Response::SiteId {
                site_id: self.coordinator.register_site().await,
            },
            Request::BindSite { site_id, address } => {
                let client = Arc::new(TcpSiteClient::new(address.clone(), self.site_timeout));
                match self.coordinator.bind_site(site_id, client).await {
                    Ok(()) => {
                        info!(site_id, %address, "Site bound");
                        Response::Ack
                    }
                    Err(e) => Response::error(&e),
                }
            }
            Request::RequestLock { operation } => Response::Granted {
                granted: self.coordinator.request_lock(&operation).await,
            },
            Request::ReleaseLock { transaction_id } => {
                self.coordinator.release_transaction(transaction_id).await;
                Response::Ack
            }
            other @ (Request::Abort | Request::Unblock | Request::Write) => {
                not_served(&other, "coordinator")
            }
        }
    }
}

/// Serves coordinator notifications for a local site
pub struct SiteHandler {
    endpoint: Arc<dyn SiteEndpoint>,
}

impl SiteHandler {
    pub fn new(endpoint: Arc<dyn SiteEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl RequestHandler for SiteHandler {
    async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Abort => self.endpoint.abort().await,
            Request::Unblock => self.endpoint.unblock().await,
            Request::Write => self.endpoint.write().await,
            other => return not_served(&other, "site"),
        };
        match result {
            Ok(()) => Response::Ack,
            Err(e) => Response::error(&e),
        }
    }
}
