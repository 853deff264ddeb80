//! The small set of named failure modes callers are expected to match on.
//! Everything below section-parsing (malformed bytes, truncated descriptors)
//! stays as contextual `anyhow::Error` and is folded into [`ProcessError::Parse`];
//! only conditions the processor's own control flow branches on get a variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("section failed to parse: {0}")]
    Parse(#[from] anyhow::Error),

    #[error("channel not resolved for original_network_id={original_network_id} transport_stream_id={transport_stream_id} service_id={service_id}")]
    ChannelNotFound {
        original_network_id: u16,
        transport_stream_id: u16,
        service_id: u16,
    },

    #[error("channel store lock not acquired within the bounded wait")]
    ChannelLockTimeout,

    #[error("schedule store lock not acquired within the bounded wait")]
    ScheduleLockTimeout,

    #[error("wall clock not yet set, deferring section")]
    ClockNotSet,

    #[error("table id {0:#x} is not in the tracked EIT range")]
    UntrackedTable(u8),
}
