use serde::{Deserialize, Serialize};

pub const ABS_SEND_TIME_URI: &str =
    "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const SDES_MID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
pub const SDES_RTP_STREAM_ID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,
}

fn default_clock_rate() -> u32 {
    90000
}

impl Default for RtpParameters {
    fn default() -> Self {
        Self {
            mid: None,
            encodings: Vec::new(),
            header_extensions: Vec::new(),
            rtcp: RtcpParameters::default(),
            clock_rate: default_clock_rate(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    pub ssrc: u32,
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub rtx: Option<RtxParameters>,
    #[serde(default)]
    pub fec: Option<FecParameters>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtxParameters {
    pub ssrc: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FecParameters {
    pub ssrc: u32,
    #[serde(default)]
    pub mechanism: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u8,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RtcpParameters {
    #[serde(default)]
    pub cname: Option<String>,
}

/// Transport-level RTP header extension ids. A zero id means the extension
/// is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderExtensionIds {
    pub abs_send_time: u8,
    pub mid: u8,
    pub rid: u8,
}

impl HeaderExtensionIds {
    pub fn from_parameters(parameters: &RtpParameters) -> Self {
        let mut ids = HeaderExtensionIds::default();
        for extension in &parameters.header_extensions {
            match extension.uri.as_str() {
                ABS_SEND_TIME_URI => ids.abs_send_time = extension.id,
                SDES_MID_URI => ids.mid = extension.id,
                SDES_RTP_STREAM_ID_URI => ids.rid = extension.id,
                _ => {}
            }
        }
        ids
    }

    /// Non-zero ids from `other` overwrite ours. A set id is never reset
    /// back to zero.
    pub fn merge(&mut self, other: &HeaderExtensionIds) {
        if other.abs_send_time != 0 {
            self.abs_send_time = other.abs_send_time;
        }
        if other.mid != 0 {
            self.mid = other.mid;
        }
        if other.rid != 0 {
            self.rid = other.rid;
        }
    }
}

impl RtpParameters {
    /// Primary SSRCs declared by the encodings, in declaration order.
    pub fn media_ssrcs(&self) -> impl Iterator<Item = u32> + '_ {
        self.encodings.iter().map(|encoding| encoding.ssrc)
    }
}
