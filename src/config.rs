use crate::rtcp;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Upper bound for a serialized RTCP compound packet. Compounds above
    /// this size are dropped, never truncated.
    pub rtcp_buffer_size: usize,
    pub max_rtcp_video_interval_ms: u64,
    pub max_rtcp_audio_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rtcp_buffer_size: rtcp::BUFFER_SIZE,
            max_rtcp_video_interval_ms: rtcp::MAX_VIDEO_INTERVAL_MS,
            max_rtcp_audio_interval_ms: rtcp::MAX_AUDIO_INTERVAL_MS,
        }
    }
}
