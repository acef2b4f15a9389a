//! Line framing: one request per line, `SAY <text>` or `CHAT <n> <text>`.
//! `SAY` is answered with one line; `CHAT` with `n` lines followed by `END`.

use crate::error::{Error, Result};
use std::fmt;

pub const STREAM_END: &str = "END";
pub const MAX_CHAT_REPLIES: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
	Say(String),
	Chat { count: u32, text: String },
}

impl Request {
	pub fn parse(line: &str) -> Result<Self> {
		let line = line.trim_end_matches(['\r', '\n']);
		let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

		match verb {
			"SAY" => Ok(Self::Say(rest.to_string())),
			"CHAT" => {
				let (count, text) = rest.split_once(' ').unwrap_or((rest, ""));
				let count: u32 = count.parse().map_err(|_| Error::Protocol(format!("bad CHAT count {count:?}")))?;
				if count > MAX_CHAT_REPLIES {
					return Err(Error::Protocol(format!("CHAT count {count} exceeds {MAX_CHAT_REPLIES}")));
				}
				Ok(Self::Chat { count, text: text.to_string() })
			}
			other => Err(Error::Protocol(format!("unknown verb {other:?}"))),
		}
	}
}

impl fmt::Display for Request {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Say(text) => writeln!(f, "SAY {text}"),
			Self::Chat { count, text } => writeln!(f, "CHAT {count} {text}"),
		}
	}
}
