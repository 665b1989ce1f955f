/// Counters kept by the session loop, readable through the session handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    frames_sent: u64,
    text_turns_sent: u64,
    inbound_audio_frames: u64,
    ring_dropped: u64,
    not_connected_failures: u64,
    flushed_frames: u64,
    reconnect_attempts: u64,
    reconnects: u64,
    credential_rotations: u64,
}

impl SessionStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub(crate) fn text_sent(&mut self) {
        self.text_turns_sent += 1;
    }

    pub(crate) fn audio_received(&mut self) {
        self.inbound_audio_frames += 1;
    }

    pub(crate) fn ring_overflowed(&mut self) {
        self.ring_dropped += 1;
    }

    pub(crate) fn send_failed(&mut self) {
        self.not_connected_failures += 1;
    }

    pub(crate) fn flushed(&mut self, frames: usize) {
        self.flushed_frames += frames as u64;
    }

    pub(crate) fn reconnect_attempted(&mut self) {
        self.reconnect_attempts += 1;
    }

    pub(crate) fn reconnected(&mut self) {
        self.reconnects += 1;
    }

    pub(crate) fn credential_rotated(&mut self) {
        self.credential_rotations += 1;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn text_turns_sent(&self) -> u64 {
        self.text_turns_sent
    }

    pub fn inbound_audio_frames(&self) -> u64 {
        self.inbound_audio_frames
    }

    /// Captured frames lost because the reconnect ring overflowed.
    pub fn ring_dropped(&self) -> u64 {
        self.ring_dropped
    }

    pub fn not_connected_failures(&self) -> u64 {
        self.not_connected_failures
    }

    pub fn flushed_frames(&self) -> u64 {
        self.flushed_frames
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn credential_rotations(&self) -> u64 {
        self.credential_rotations
    }
}
