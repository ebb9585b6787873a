//! Vendor payload codecs. No network access happens in here.

pub mod emby;
pub mod jellyfin;
pub mod mediabrowser;
pub mod normalize;
pub mod plex;
mod xml;
