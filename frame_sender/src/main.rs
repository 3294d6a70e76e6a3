//! Sends image files through the data socket and stores the annotated frames.
//!
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use common::protocol::{ParamsMsg, PixelFormat, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::{SinkExt, StreamExt};
use mask_server::{codec, data_socket::frame_codec};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the data socket of the mask server
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Channel name announced to the server
    #[clap(long, default_value = "frame_sender")]
    channel: String,

    /// Minimum score of a drawn detection
    #[clap(long)]
    confidence_threshold: Option<f32>,

    /// Maximum number of drawn detections per frame
    #[clap(long)]
    max_boxes: Option<u32>,

    /// Directory to store the annotated images in
    #[clap(long, default_value = ".")]
    output_dir: PathBuf,

    /// Pixel layout used on the wire
    #[clap(long, value_enum, default_value_t = WireFormat::Bgr24)]
    format: WireFormat,

    /// Images to annotate
    #[clap(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum WireFormat {
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
}

impl From<WireFormat> for PixelFormat {
    fn from(format: WireFormat) -> Self {
        match format {
            WireFormat::Rgb24 => PixelFormat::Rgb24,
            WireFormat::Bgr24 => PixelFormat::Bgr24,
            WireFormat::Rgba => PixelFormat::Rgba,
            WireFormat::Bgra => PixelFormat::Bgra,
        }
    }
}

type Transport = Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Launching frame sender for channel {}", &args.channel);

    let stream = TcpStream::connect(&args.address)
        .await
        .with_context(|| format!("failed to connect to {}", &args.address))?;
    log::info!("Connected to {}", &args.address);

    // Wrap stream in transport handler with length-delimited codec
    let mut transport = Framed::new(stream, frame_codec());

    send(&mut transport, &ProtoMsg::ConnectReq(args.channel.clone())).await?;

    let params = ParamsMsg {
        confidence_threshold: args.confidence_threshold,
        max_boxes: args.max_boxes,
    };
    if params != ParamsMsg::default() {
        send(&mut transport, &ProtoMsg::SetParams(params)).await?;
    }

    std::fs::create_dir_all(&args.output_dir)?;

    for (seq, input) in args.inputs.iter().enumerate() {
        let image = image::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?
            .to_rgb8();
        let frame = codec::encode(image, args.format.into(), seq as u64)?;
        send(&mut transport, &ProtoMsg::Frame(frame)).await?;

        match receive(&mut transport).await? {
            ProtoMsg::Frame(annotated) => {
                let target = output_path(&args.output_dir, input);
                codec::decode(&annotated)?.save(&target)?;
                log::info!("{} -> {}", input.display(), target.display());
            }
            ProtoMsg::Error(msg) => log::error!("{}: {}", input.display(), msg),
            other => bail!("unexpected reply {:?}", other),
        }
    }

    Ok(())
}

async fn send(transport: &mut Transport, msg: &ProtoMsg) -> Result<()> {
    transport.send(Bytes::from(msg.serialize()?)).await?;
    Ok(())
}

async fn receive(transport: &mut Transport) -> Result<ProtoMsg> {
    match transport.next().await {
        Some(data) => Ok(ProtoMsg::deserialize(&data?)?),
        None => bail!("server closed the connection"),
    }
}

fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_owned());
    output_dir.join(format!("{stem}_annotated.png"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("out"), Path::new("pics/group.jpg")),
            PathBuf::from("out/group_annotated.png")
        );
    }
}
