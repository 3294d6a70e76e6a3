//! Protocol definition for the data socket and the browser frame channel.
//!
//! Frames travel bincode-encoded (little endian, fixed-width integers). A bare
//! `VideoFrame` is laid out as
//! `seq: u64 | width: u32 | height: u32 | format: u32 | len: u64 | data`,
//! which is what the browser page writes and reads by hand.
use serde::{Deserialize, Serialize};

/// Upper bound for one length-delimited message on the data socket.
pub const MAX_MESSAGE_BYTES: usize = 32 * 1024 * 1024;

/// Pixel layout of a `VideoFrame` buffer.
#[derive(Debug, Clone, Copy, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Yuyv422,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for planar/subsampled ones.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Yuyv422 | PixelFormat::Nv12 => None,
        }
    }
}

/// One raw video frame as exchanged with a client.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoFrame {
    /// Client-assigned sequence number, echoed back on the annotated frame.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(seq: u64, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            seq,
            width,
            height,
            format,
            data,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}

/// Parameter update sent by a UI control. Absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Serialize)]
pub struct ParamsMsg {
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub max_boxes: Option<u32>,
}

/// Definition of protocol messages on the data socket.
#[derive(Debug, Deserialize, Serialize)]
pub enum ProtoMsg {
    ConnectReq(String),
    Frame(VideoFrame),
    SetParams(ParamsMsg),
    Error(String),
}

impl ProtoMsg {
    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}
