//! `BondyBird` AV API Functions
//!
//! Call-ins for application code. Every function validates its parameters, wraps the request
//! in an [`Envelope`](crate::event::Envelope) and queues it for the processor task (see
//! [`crate::processor`]). Nothing waits for the core: results arrive later as
//! [`AvEvent`](crate::AvEvent) notifications through the platform's
//! [`AppCallback`](crate::AppCallback).
//!
//! # Usage
//!
//! ```rust,no_run
//! use bondybird_av::api;
//! use bondybird_av::a2dp::SepType;
//! use bondybird_av::{AvChannel, BluetoothAddress, Features, StreamHandle};
//!
//! api::enable(Features::RC_TARGET | Features::RC_CONTROLLER).unwrap();
//! api::register(AvChannel::Audio, SepType::Source, "Audio Source", 1, None).unwrap();
//!
//! // Once `AvEvent::Registered` reported the handle:
//! let handle = StreamHandle::from_raw(0x41);
//! let peer = BluetoothAddress::from_hex("00:1A:7D:DA:71:13").unwrap();
//! api::open(handle, peer, true, 0).unwrap();
//! ```

use crate::a2dp::{SepType, StreamConfig};
use crate::constants::{MAX_SEPS, OBEX_MIN_MTU, avdt_error};
use crate::event::{
    Blob, ConfigResult, CoverArtData, CoverArtGet, EventData, EventSender, EventTag,
    ImageDescriptor, ImageHandle, KeyState, MediaDataCallback, OpenRequest, ProtectData,
    RcCommand, RcEvent, ReconfigRequest, Registration, StopRequest, StreamEvent, SystemEvent,
    VendorMessage,
};
use crate::registry::{ServiceName, StreamHandle};
use crate::{API_CHANNEL, AvChannel, AvError, BluetoothAddress, Features};
use heapless::Vec;

fn post(tag: impl Into<EventTag>, handle: u8, data: EventData) -> Result<(), AvError> {
    if EventSender::new(&API_CHANNEL).post(tag, handle, data) {
        Ok(())
    } else {
        Err(AvError::QueueFull)
    }
}

fn post_stream(handle: StreamHandle, event: StreamEvent, data: EventData) -> Result<(), AvError> {
    if handle.index().is_none() || handle.channel().is_none() {
        return Err(AvError::NoSuchHandle);
    }
    post(event, handle.raw(), data)
}

fn check_peer(peer: &BluetoothAddress) -> Result<(), AvError> {
    if peer.is_zero() {
        Err(AvError::InvalidParameter)
    } else {
        Ok(())
    }
}

/// Enable the AV core with a feature set
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn enable(features: Features) -> Result<(), AvError> {
    post(SystemEvent::Enable, 0, EventData::Enable(features))
}

/// Disable the AV core: close every RC channel and deregister every stream
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn disable() -> Result<(), AvError> {
    post(SystemEvent::Disable, 0, EventData::None)
}

/// Register a stream; the handle is reported by `AvEvent::Registered`
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if the service name is too long, or
/// [`AvError::QueueFull`] if the request queue is full.
pub fn register(
    channel: AvChannel,
    tsep: SepType,
    service_name: &str,
    app_id: u8,
    media_callback: Option<MediaDataCallback>,
) -> Result<(), AvError> {
    let service_name =
        ServiceName::try_from(service_name).map_err(|()| AvError::InvalidParameter)?;
    let registration = Registration {
        channel,
        tsep,
        service_name,
        app_id,
        media_callback,
    };
    post(SystemEvent::Register, 0, EventData::Register(registration))
}

/// Deregister a stream, closing it first if needed
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn deregister(handle: StreamHandle) -> Result<(), AvError> {
    if handle.index().is_none() {
        return Err(AvError::NoSuchHandle);
    }
    post(SystemEvent::Deregister, handle.raw(), EventData::None)
}

/// Open a stream to a peer
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] for the zero address, [`AvError::NoSuchHandle`] for a
/// malformed handle, or [`AvError::QueueFull`].
pub fn open(
    handle: StreamHandle,
    peer: BluetoothAddress,
    use_rc: bool,
    sec_mask: u8,
) -> Result<(), AvError> {
    check_peer(&peer)?;
    let open = OpenRequest::new(peer, use_rc, sec_mask);
    post_stream(handle, StreamEvent::ApOpen, EventData::Open(open))
}

/// Close a stream
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn close(handle: StreamHandle) -> Result<(), AvError> {
    post_stream(handle, StreamEvent::ApClose, EventData::None)
}

/// Drop the signaling link to a peer, closing all of its streams
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] for the zero address, or [`AvError::QueueFull`].
pub fn disconnect(peer: BluetoothAddress) -> Result<(), AvError> {
    check_peer(&peer)?;
    post(SystemEvent::Disconnect, 0, EventData::Peer(peer))
}

/// Start streaming
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn start(handle: StreamHandle) -> Result<(), AvError> {
    post_stream(handle, StreamEvent::ApStart, EventData::None)
}

/// Stop the media path, optionally suspending the stream
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn stop(handle: StreamHandle, suspend: bool, flush: bool) -> Result<(), AvError> {
    let stop = StopRequest { suspend, flush };
    post_stream(handle, StreamEvent::ApStop, EventData::Stop(stop))
}

/// Change the codec configuration of an open stream
///
/// With `suspend` set and the same remote endpoint, the stream is suspended and reconfigured
/// in place; otherwise the transport is closed and reopened with the new configuration.
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, [`AvError::InvalidParameter`]
/// for an endpoint index out of range, or [`AvError::QueueFull`].
pub fn reconfigure(
    handle: StreamHandle,
    config: StreamConfig,
    suspend: bool,
    sep_info_idx: u8,
) -> Result<(), AvError> {
    if usize::from(sep_info_idx) >= MAX_SEPS {
        return Err(AvError::InvalidParameter);
    }
    let request = ReconfigRequest {
        config,
        suspend,
        sep_info_idx,
    };
    post_stream(handle, StreamEvent::ApiReconfig, EventData::Reconfig(request))
}

/// Send a content protection request
///
/// # Errors
///
/// Returns [`AvError::NoResources`] if `data` does not fit a payload, [`AvError::NoSuchHandle`]
/// for a malformed handle, or [`AvError::QueueFull`].
pub fn protect_req(handle: StreamHandle, data: &[u8]) -> Result<(), AvError> {
    let protect = ProtectData {
        label: 0,
        err_code: 0,
        data: Blob::from_slice(data)?,
    };
    post_stream(handle, StreamEvent::ApiProtectReq, EventData::Protect(protect))
}

/// Answer a content protection request from the peer
///
/// # Errors
///
/// Returns [`AvError::NoResources`] if `data` does not fit a payload, [`AvError::NoSuchHandle`]
/// for a malformed handle, or [`AvError::QueueFull`].
pub fn protect_rsp(
    handle: StreamHandle,
    label: u8,
    err_code: u8,
    data: &[u8],
) -> Result<(), AvError> {
    let protect = ProtectData {
        label,
        err_code,
        data: Blob::from_slice(data)?,
    };
    post_stream(handle, StreamEvent::ApiProtectRsp, EventData::Protect(protect))
}

/// Send a pass-through command
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn remote_cmd(rc_handle: u8, label: u8, op_id: u8, key_state: KeyState) -> Result<(), AvError> {
    let command = RcCommand {
        label,
        op_id,
        key_state,
    };
    post(RcEvent::ApiRemoteCmd, rc_handle, EventData::RcCommand(command))
}

fn vendor(
    event: RcEvent,
    rc_handle: u8,
    label: u8,
    code: u8,
    company_id: u32,
    data: &[u8],
) -> Result<(), AvError> {
    let message = VendorMessage {
        label,
        code,
        company_id,
        data: Blob::from_slice(data)?,
    };
    post(event, rc_handle, EventData::Vendor(message))
}

/// Send a vendor dependent command
///
/// # Errors
///
/// Returns [`AvError::NoResources`] if `data` does not fit a payload, or
/// [`AvError::QueueFull`].
pub fn vendor_cmd(
    rc_handle: u8,
    label: u8,
    code: u8,
    company_id: u32,
    data: &[u8],
) -> Result<(), AvError> {
    vendor(RcEvent::ApiVendorCmd, rc_handle, label, code, company_id, data)
}

/// Answer a vendor dependent command
///
/// # Errors
///
/// Returns [`AvError::NoResources`] if `data` does not fit a payload, or
/// [`AvError::QueueFull`].
pub fn vendor_rsp(
    rc_handle: u8,
    label: u8,
    code: u8,
    company_id: u32,
    data: &[u8],
) -> Result<(), AvError> {
    vendor(RcEvent::ApiVendorRsp, rc_handle, label, code, company_id, data)
}

/// Send a metadata response, or a metadata command when `code` is a command type
///
/// # Errors
///
/// Returns [`AvError::NoResources`] if `data` does not fit a payload, or
/// [`AvError::QueueFull`].
pub fn meta_rsp(rc_handle: u8, label: u8, code: u8, data: &[u8]) -> Result<(), AvError> {
    vendor(
        RcEvent::ApiMetaRsp,
        rc_handle,
        label,
        code,
        crate::constants::avrc::CO_METADATA,
        data,
    )
}

/// Open AVRCP alongside an open stream
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn open_rc(handle: StreamHandle) -> Result<(), AvError> {
    post_stream(handle, StreamEvent::ApiRcOpen, EventData::None)
}

/// Close an RC channel
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn close_rc(rc_handle: u8) -> Result<(), AvError> {
    post(RcEvent::ApiClose, rc_handle, EventData::None)
}

/// Set the delay a sink stream reports to the peer, in 1/10 milliseconds
///
/// # Errors
///
/// Returns [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn set_delay_value(handle: StreamHandle, delay: u16) -> Result<(), AvError> {
    post_stream(handle, StreamEvent::ApiSetDelayValue, EventData::Delay(delay))
}

/// Source media is ready on a channel
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn notify_data_ready(channel: AvChannel) -> Result<(), AvError> {
    post(SystemEvent::DataReady, 0, EventData::Channel(channel))
}

/// Answer `MediaCallout::set_config` for an incoming configuration
///
/// `seids` lists further peer endpoints worth querying for capabilities; `reconfig_needed`
/// asks for a suspend right after the peer starts the stream.
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if `seids` is longer than `MAX_SEPS`,
/// [`AvError::NoSuchHandle`] for a malformed handle, or [`AvError::QueueFull`].
pub fn notify_config_result(
    handle: StreamHandle,
    accepted: bool,
    category: u8,
    seids: &[u8],
    reconfig_needed: bool,
) -> Result<(), AvError> {
    let result = ConfigResult {
        err_code: if accepted { 0 } else { avdt_error::UNSUP_CFG },
        category,
        seids: Vec::from_slice(seids).map_err(|()| AvError::InvalidParameter)?,
        recfg_needed: reconfig_needed,
    };
    let event = if accepted {
        StreamEvent::CiSetconfigOk
    } else {
        StreamEvent::CiSetconfigFail
    };
    post_stream(handle, event, EventData::ConfigResult(result))
}

/// Open a cover-art session on a connected RC channel
///
/// `mtu` is the OBEX packet size offered to the peer; 0 picks
/// [`COVER_ART_OBEX_MTU`](crate::constants::COVER_ART_OBEX_MTU).
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if `mtu` is below the OBEX minimum of 255 bytes,
/// or [`AvError::QueueFull`].
pub fn cover_art_open(rc_handle: u8, mtu: u16) -> Result<(), AvError> {
    if mtu != 0 && mtu < OBEX_MIN_MTU {
        return Err(AvError::InvalidParameter);
    }
    let open = CoverArtData::Open { mtu };
    post(RcEvent::CaOpen, rc_handle, EventData::CoverArt(open))
}

/// Close a cover-art session
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the request queue is full.
pub fn cover_art_close(rc_handle: u8) -> Result<(), AvError> {
    post(RcEvent::CaClose, rc_handle, EventData::None)
}

fn cover_art_get(rc_handle: u8, image_handle: &str, kind: CoverArtGet) -> Result<(), AvError> {
    let image_handle =
        ImageHandle::try_from(image_handle).map_err(|()| AvError::InvalidParameter)?;
    let get = CoverArtData::Get { image_handle, kind };
    post(RcEvent::CaGet, rc_handle, EventData::CoverArt(get))
}

/// Request the image properties object of an image handle
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if `image_handle` is longer than seven characters,
/// or [`AvError::QueueFull`].
pub fn cover_art_get_image_properties(rc_handle: u8, image_handle: &str) -> Result<(), AvError> {
    cover_art_get(rc_handle, image_handle, CoverArtGet::ImageProperties)
}

/// Request an image in the encoding and size named by `descriptor`
///
/// An empty descriptor lets the peer pick its native format.
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if `image_handle` is longer than seven characters,
/// [`AvError::NoResources`] if the descriptor does not fit, or [`AvError::QueueFull`].
pub fn cover_art_get_image(
    rc_handle: u8,
    image_handle: &str,
    descriptor: &[u8],
) -> Result<(), AvError> {
    let descriptor = ImageDescriptor::from_slice(descriptor).map_err(|()| AvError::NoResources)?;
    cover_art_get(rc_handle, image_handle, CoverArtGet::Image { descriptor })
}

/// Request the linked thumbnail of an image handle
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if `image_handle` is longer than seven characters,
/// or [`AvError::QueueFull`].
pub fn cover_art_get_linked_thumbnail(rc_handle: u8, image_handle: &str) -> Result<(), AvError> {
    cover_art_get(rc_handle, image_handle, CoverArtGet::LinkedThumbnail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAX_IMAGE_DESCRIPTOR_LEN, MAX_PAYLOAD_LEN};

    // Only rejected calls here: accepted ones would fill the shared queue that the processor
    // test drains.

    #[test]
    fn test_open_rejects_zero_address() {
        let handle = StreamHandle::from_raw(0x41);
        assert_eq!(
            open(handle, BluetoothAddress::ZERO, false, 0),
            Err(AvError::InvalidParameter)
        );
        assert_eq!(disconnect(BluetoothAddress::ZERO), Err(AvError::InvalidParameter));
    }

    #[test]
    fn test_malformed_stream_handle() {
        assert_eq!(deregister(StreamHandle::from_raw(0x40)), Err(AvError::NoSuchHandle));
        assert_eq!(start(StreamHandle::from_raw(0x0F)), Err(AvError::NoSuchHandle));
        // Slot bits valid, channel bits missing.
        assert_eq!(close(StreamHandle::from_raw(0x01)), Err(AvError::NoSuchHandle));
    }

    #[test]
    fn test_register_service_name_too_long() {
        let name = "A service name far longer than thirty-two bytes";
        assert_eq!(
            register(AvChannel::Audio, SepType::Source, name, 1, None),
            Err(AvError::InvalidParameter)
        );
    }

    #[test]
    fn test_payload_limits() {
        let handle = StreamHandle::from_raw(0x41);
        let data = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(protect_req(handle, &data), Err(AvError::NoResources));
        assert_eq!(vendor_cmd(0, 1, 0, 0x1958, &data), Err(AvError::NoResources));
        assert_eq!(
            notify_config_result(handle, true, 0, &[1; MAX_SEPS + 1], false),
            Err(AvError::InvalidParameter)
        );
        assert_eq!(
            reconfigure(handle, StreamConfig::default(), true, MAX_SEPS as u8),
            Err(AvError::InvalidParameter)
        );
    }

    #[test]
    fn test_cover_art_parameters() {
        assert_eq!(
            cover_art_get_image_properties(0, "12345678"),
            Err(AvError::InvalidParameter)
        );
        assert_eq!(
            cover_art_get_linked_thumbnail(0, "12345678"),
            Err(AvError::InvalidParameter)
        );
        let descriptor = [b' '; MAX_IMAGE_DESCRIPTOR_LEN + 1];
        assert_eq!(
            cover_art_get_image(0, "1000001", &descriptor),
            Err(AvError::NoResources)
        );
        assert_eq!(cover_art_open(0, OBEX_MIN_MTU - 1), Err(AvError::InvalidParameter));
    }
}
