use super::mediabrowser::{Dialect, TranscodingInfo};
use super::normalize::is_hw_accelerated;
use crate::models::ServerType;

pub struct Jellyfin;

impl Dialect for Jellyfin {
    const SERVER_TYPE: ServerType = ServerType::Jellyfin;
    const API_PREFIX: &'static str = "";

    /// Jellyfin reports one acceleration type for the whole pipeline.
    fn hw_acceleration(info: &TranscodingInfo) -> (bool, bool) {
        let hw = is_hw_accelerated(info.hardware_acceleration_type.as_deref());
        (hw, hw)
    }
}
