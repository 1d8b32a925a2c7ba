use std::collections::HashMap;

use crate::error::{Error, ProducerErrorKind};
use crate::producer::Producer;

/// SSRC to producer-id table used to resolve inbound RTP and RTCP sender
/// reports to their source. Mutated only by the owning transport.
#[derive(Debug, Default)]
pub struct RtpListener {
    ssrc_table: HashMap<u32, String>,
}

impl RtpListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every primary SSRC the producer declares. Fails without
    /// touching the table if any of them is already taken.
    pub fn add_producer(&mut self, producer: &Producer) -> Result<(), Error> {
        for ssrc in producer.rtp_parameters().media_ssrcs() {
            if self.ssrc_table.contains_key(&ssrc) {
                return Err(Error::new_producer(
                    format!("ssrc {} already exists in RTP listener", ssrc),
                    ProducerErrorKind::SsrcAlreadyInUseError,
                ));
            }
        }

        for ssrc in producer.rtp_parameters().media_ssrcs() {
            self.ssrc_table.insert(ssrc, producer.id().to_string());
        }

        Ok(())
    }

    pub fn remove_producer(&mut self, producer: &Producer) {
        for ssrc in producer.rtp_parameters().media_ssrcs() {
            self.ssrc_table.remove(&ssrc);
        }
    }

    pub fn get_producer_id(&self, ssrc: u32) -> Option<&String> {
        self.ssrc_table.get(&ssrc)
    }

    pub fn is_empty(&self) -> bool {
        self.ssrc_table.is_empty()
    }

    pub fn clear(&mut self) {
        self.ssrc_table.clear();
    }
}
