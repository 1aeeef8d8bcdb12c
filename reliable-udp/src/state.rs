//! Connection teardown state.
//!
//! A session has no named states.  It tracks four independent end-of-stream
//! conditions and is destroyed the moment all of them hold:
//!
//! ```text
//!   peer_eof    peer's EOF marker received in order
//!   input_eof   local input exhausted, our EOF marker sent
//!   all_acked   everything we sent (EOF marker included) acknowledged
//!   output_eof  peer's EOF delivered to the local output
//! ```

/// The four-flag shutdown vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shutdown {
    pub peer_eof: bool,
    pub input_eof: bool,
    pub all_acked: bool,
    pub output_eof: bool,
}

impl Shutdown {
    /// `true` once the session may be torn down.
    pub fn is_complete(&self) -> bool {
        self.peer_eof && self.input_eof && self.all_acked && self.output_eof
    }
}

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flag = |set: bool| if set { '1' } else { '0' };
        write!(
            f,
            "peer_eof={} input_eof={} all_acked={} output_eof={}",
            flag(self.peer_eof),
            flag(self.input_eof),
            flag(self.all_acked),
            flag(self.output_eof)
        )
    }
}
