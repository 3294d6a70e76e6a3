//! Data socket to annotate frame streams of native clients.
//!
//! Every TCP connection carries length-delimited, bincode-encoded `ProtoMsg`s and gets its own
//! processor. Each `Frame` is answered with the annotated frame or an `Error` message.
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use common::protocol::{ProtoMsg, MAX_MESSAGE_BYTES};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::session::{process_frame, AppState};

/// Bind the data socket and serve connections in a background task.
///
/// Returns the bound address, which differs from `addr` when binding to port 0.
pub async fn spawn_data_socket(
    state: Arc<AppState>,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    let local_addr = listener.local_addr()?;
    log::info!("Data socket listening on {}", &local_addr);

    Ok((
        local_addr,
        tokio::spawn(async move {
            loop {
                let (socket, _peer_addr) = listener.accept().await?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_incoming(state, socket).await {
                        log::warn!("Data socket connection failed: {e}");
                    }
                });
            }
        }),
    ))
}

/// Wait for the data socket task and log how it ended.
pub async fn watch_data_socket(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(Ok(())) => {
            log::warn!("Data socket stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            log::error!("Data socket failed: {e}");
            Err(e)
        }
        Err(e) => {
            log::error!("Data socket task aborted: {e}");
            Err(e.into())
        }
    }
}

/// Codec shared by the server and its clients.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_MESSAGE_BYTES)
        .new_codec()
}

async fn handle_incoming(state: Arc<AppState>, stream: TcpStream) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let mut transport = Framed::new(stream, frame_codec());
    let mut processor = state.new_processor();
    let params = processor.params();

    while let Some(data) = transport.next().await {
        let data = data?;

        let reply = match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::ConnectReq(channel)) => {
                log::info!("{}: Streaming channel {}", &addr, &channel);
                None
            }
            Ok(ProtoMsg::Frame(frame)) => {
                let (returned, result) = process_frame(processor, frame).await?;
                processor = returned;
                match result {
                    Ok(annotated) => Some(ProtoMsg::Frame(annotated)),
                    Err(e) => Some(ProtoMsg::Error(e.to_string())),
                }
            }
            Ok(ProtoMsg::SetParams(msg)) => match params.apply(&msg) {
                Ok(()) => {
                    log::debug!("{}: Parameters updated to {:?}", &addr, &msg);
                    None
                }
                Err(e) => Some(ProtoMsg::Error(e.to_string())),
            },
            Ok(ProtoMsg::Error(msg)) => {
                log::warn!("{}: Client reported error: {}", &addr, &msg);
                None
            }
            Err(e) => Some(ProtoMsg::Error(format!("malformed message: {e}"))),
        };

        if let Some(reply) = reply {
            transport.send(Bytes::from(reply.serialize()?)).await?;
        }
    }

    log::info!(
        "{}: TCP connection closed after {} frames",
        &addr,
        processor.frames_processed()
    );

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_watch_reports_accept_failure() {
        let handle = tokio::spawn(async { Err(anyhow::anyhow!("accept failed")) });

        let result = watch_data_socket(handle).await;

        assert_eq!(result.map_err(|e| e.to_string()), Err("accept failed".to_owned()));
    }

    #[tokio::test]
    async fn test_watch_reports_panicked_task() {
        let handle: JoinHandle<Result<()>> = tokio::spawn(async { panic!("listener gone") });

        assert!(watch_data_socket(handle).await.is_err());
    }
}
