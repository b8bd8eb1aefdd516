//! Connection server
//!
//! Per connection: `AwaitingRequest -> Processing -> Responding -> AwaitingRequest`
//! until the peer closes (`Closed`). Every request yields exactly one response;
//! only protocol faults end a connection early.

use crate::channel::Channel;
use crate::protocol::{
    AssetPayload, BatchPayload, ExecuteRequest, GenerateRequest, ProtocolError, Request, Response,
    TeardownPayload, TeardownRequest,
};
use crate::DaemonError;
use asset_pipeline_core::{
    AssetResult, ChainReport, DispatchConsumer, Dispatcher, Frame, PreparedProcessor,
    ProcessorError,
};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Carry out one request
pub async fn handle_request(dispatcher: &Dispatcher, request: Request) -> Response {
    match request {
        Request::Execute(request) => execute(dispatcher, request).await,
        Request::Generate(request) => generate(dispatcher, request)
            .await
            .unwrap_or_else(|e| Response::error(&e, None)),
        Request::Teardown(request) => teardown(dispatcher, request).await,
    }
}

async fn teardown(dispatcher: &Dispatcher, request: TeardownRequest) -> Response {
    let TeardownRequest { reference } = request;
    match dispatcher.teardown(&reference).await {
        Ok(torn_down) => Response::Teardown(TeardownPayload {
            class_name: reference.class_name,
            torn_down,
        }),
        Err(e) => {
            error!("Teardown of {} failed: {}", reference.class_name, e);
            Response::error(&e, None)
        }
    }
}

async fn execute(dispatcher: &Dispatcher, request: ExecuteRequest) -> Response {
    let ExecuteRequest {
        reference,
        mut asset,
    } = request;

    let prepared = match dispatcher.instance(&reference).await {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Rejected {} for asset {}: {}", reference.class_name, asset.id(), e);
            return Response::error(&e, Some(asset.id()));
        }
    };

    let mut report = ChainReport::default();
    report.record(dispatcher.process(&prepared, &mut Frame::new(&mut asset)).await);
    Response::Asset(AssetPayload::from(AssetResult { asset, report }))
}

async fn generate(dispatcher: &Dispatcher, request: GenerateRequest) -> Result<Response, ProcessorError> {
    let descriptor = dispatcher.registry().resolve_generator(&request.reference)?;
    let generator = descriptor.instantiate(&request.reference.args, dispatcher.context())?;

    let mut chain: Vec<PreparedProcessor> = Vec::with_capacity(request.execute.len());
    for reference in &request.execute {
        chain.push(dispatcher.instance(reference).await?);
    }

    let start = Instant::now();
    let mut consumer =
        DispatchConsumer::new(dispatcher, &chain).with_file_types(&request.settings.file_types)?;
    let delivered = generator.generate(&mut consumer).await?;

    let assets: Vec<AssetPayload> = consumer
        .into_results()
        .into_iter()
        .map(AssetPayload::from)
        .collect();
    info!(
        "{} delivered {} assets, {} processed in {:.3}s",
        descriptor.class_ref,
        delivered,
        assets.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(Response::Batch(BatchPayload {
        count: assets.len(),
        assets,
    }))
}

/// Serve requests on one channel until the peer closes it
///
/// Returns the number of requests answered.
pub async fn serve_connection<R, W>(
    dispatcher: &Dispatcher,
    mut channel: Channel<R, W>,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut answered = 0;
    loop {
        debug!("Connection state: AwaitingRequest");
        let Some(exchange) = channel.recv().await? else {
            debug!("Connection state: Closed");
            return Ok(answered);
        };

        debug!("Connection state: Processing");
        let (request, responder) = exchange.split();
        let response = handle_request(dispatcher, request).await;

        debug!("Connection state: Responding");
        responder.respond(&response).await?;
        answered += 1;
    }
}

/// TCP front end of the daemon
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    keep_listening: bool,
}

impl Server {
    pub async fn bind(addr: &str, dispatcher: Dispatcher, keep_listening: bool) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            keep_listening,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections one at a time
    ///
    /// Returns after the first connection closes unless `keep_listening` is
    /// set. A protocol fault is returned as an error and stops the server.
    /// Kept processor instances are torn down before returning.
    pub async fn run(self) -> Result<(), DaemonError> {
        info!("Listening on {}", self.local_addr()?);
        let result = self.accept_loop().await;
        let retired = self.dispatcher.teardown_all().await;
        debug!("Tore down {} processor instances", retired);
        result
    }

    async fn accept_loop(&self) -> Result<(), DaemonError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("Accepted connection from {}", peer);

            let (reader, writer) = stream.into_split();
            match serve_connection(&self.dispatcher, Channel::new(reader, writer)).await {
                Ok(answered) => info!("Connection from {} closed after {} requests", peer, answered),
                Err(e) => {
                    error!("Protocol fault on connection from {}: {}", peer, e);
                    return Err(e.into());
                }
            }

            if !self.keep_listening {
                return Ok(());
            }
        }
    }
}
