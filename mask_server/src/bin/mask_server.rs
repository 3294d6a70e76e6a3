//! Mask server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use mask_server::{
    categories::CategoryIndex,
    data_socket::{spawn_data_socket, watch_data_socket},
    endpoints::router,
    meter::spawn_meter_logger,
    nn::{BoxLayout, ModelConfig, OnnxDetector, OutputNames},
    session::AppState,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the HTTP server serving the page and the WebSocket
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the TCP data socket for native senders
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Directory containing the exported detection model
    #[clap(long, default_value = "models/face_mask")]
    model_dir: PathBuf,

    /// File name of the ONNX model inside the model directory
    #[clap(long, default_value = "model.onnx")]
    model_file: String,

    /// Width of the model input
    #[clap(long, default_value_t = 640)]
    input_width: u32,

    /// Height of the model input
    #[clap(long, default_value_t = 480)]
    input_height: u32,

    /// Coordinate order of the boxes emitted by the model
    #[clap(long, value_enum, default_value_t = BoxLayout::Yxyx)]
    box_layout: BoxLayout,

    /// JSON file with `[{"id": .., "name": ..}]` categories replacing the face mask classes
    #[clap(long)]
    categories_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let categories = match &args.categories_file {
        Some(path) => CategoryIndex::from_json_file(path)?,
        None => CategoryIndex::default(),
    };
    log::info!(
        "Using categories {:?}",
        categories.iter().map(|c| &c.name).collect::<Vec<_>>()
    );

    // Load the model once, every connection shares it
    let config = ModelConfig {
        model_dir: args.model_dir,
        model_file: args.model_file,
        input_width: args.input_width,
        input_height: args.input_height,
        box_layout: args.box_layout,
        output_names: OutputNames::default(),
    };
    let detector = OnnxDetector::load(&config).context("failed to initialize model")?;
    let state = Arc::new(AppState::new(Arc::new(detector), categories));

    // Create socket to receive frame streams from native senders
    let (_, data_socket) = spawn_data_socket(Arc::clone(&state), &args.socket_address).await?;
    tokio::spawn(watch_data_socket(data_socket));

    spawn_meter_logger();

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", &addr);
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .await?;

    Ok(())
}
