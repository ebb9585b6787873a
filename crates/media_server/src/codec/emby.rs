use super::mediabrowser::{Dialect, TranscodingInfo};
use super::normalize::is_hw_accelerated;
use crate::models::ServerType;

pub struct Emby;

impl Dialect for Emby {
    const SERVER_TYPE: ServerType = ServerType::Emby;
    const API_PREFIX: &'static str = "/emby";

    /// Emby splits decoder and encoder, either as booleans or as accelerator names.
    fn hw_acceleration(info: &TranscodingInfo) -> (bool, bool) {
        let decode = info.video_decoder_is_hardware.unwrap_or(false)
            || is_hw_accelerated(info.video_decoder_hw_accel.as_deref());
        let encode = info.video_encoder_is_hardware.unwrap_or(false)
            || is_hw_accelerated(info.video_encoder_hw_accel.as_deref());
        (decode, encode)
    }
}
