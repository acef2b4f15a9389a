use std::net::SocketAddr;
use std::time::Instant;

/// Lifecycle event delivered by the transport for one call.
///
/// `at: None` means the transport had no timestamp and the handler uses "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
	/// Request headers written; one per transport attempt.
	OutHeader {
		at: Option<Instant>,
		remote_addr: Option<SocketAddr>,
		local_addr: Option<SocketAddr>,
	},
	OutPayload {
		at: Option<Instant>,
	},
	InHeader {
		at: Option<Instant>,
	},
	InPayload {
		at: Option<Instant>,
	},
	End {
		at: Option<Instant>,
	},
}

impl CallEvent {
	pub const fn out_header(remote_addr: Option<SocketAddr>, local_addr: Option<SocketAddr>) -> Self {
		Self::OutHeader {
			at: None,
			remote_addr,
			local_addr,
		}
	}

	pub const fn out_payload() -> Self {
		Self::OutPayload { at: None }
	}

	pub const fn in_header() -> Self {
		Self::InHeader { at: None }
	}

	pub const fn in_payload() -> Self {
		Self::InPayload { at: None }
	}

	pub const fn end() -> Self {
		Self::End { at: None }
	}

	/// Same event, stamped with an explicit transport timestamp.
	#[must_use]
	pub const fn at(self, instant: Instant) -> Self {
		match self {
			Self::OutHeader { remote_addr, local_addr, .. } => Self::OutHeader {
				at: Some(instant),
				remote_addr,
				local_addr,
			},
			Self::OutPayload { .. } => Self::OutPayload { at: Some(instant) },
			Self::InHeader { .. } => Self::InHeader { at: Some(instant) },
			Self::InPayload { .. } => Self::InPayload { at: Some(instant) },
			Self::End { .. } => Self::End { at: Some(instant) },
		}
	}

	pub const fn timestamp(&self) -> Option<Instant> {
		match *self {
			Self::OutHeader { at, .. } | Self::OutPayload { at } | Self::InHeader { at } | Self::InPayload { at } | Self::End { at } => at,
		}
	}

	pub const fn name(&self) -> &'static str {
		match self {
			Self::OutHeader { .. } => "out_header",
			Self::OutPayload { .. } => "out_payload",
			Self::InHeader { .. } => "in_header",
			Self::InPayload { .. } => "in_payload",
			Self::End { .. } => "end",
		}
	}
}
