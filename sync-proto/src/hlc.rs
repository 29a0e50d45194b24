use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

// Length of the fixed-width time component, e.g. `1970-01-01T00:00:00.000Z`.
const TIME_LEN: usize = 24;

/// `(physical millis, logical counter, node id)`, totally ordered by that tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hlc {
	physical_millis: u64,
	counter: u16,
	node_id: Uuid,
}

impl Hlc {
	#[must_use]
	pub fn zero(node_id: Uuid) -> Self {
		Self {
			physical_millis: 0,
			counter: 0,
			node_id,
		}
	}

	#[must_use]
	pub fn new(physical_millis: u64, counter: u16, node_id: Uuid) -> Self {
		Self {
			physical_millis,
			counter,
			node_id,
		}
	}

	#[must_use]
	pub fn physical_millis(&self) -> u64 {
		self.physical_millis
	}

	#[must_use]
	pub fn counter(&self) -> u16 {
		self.counter
	}

	#[must_use]
	pub fn node_id(&self) -> Uuid {
		self.node_id
	}

	/// Rewrites the node id, keeping the physical and logical time.
	#[must_use]
	pub fn with_node_id(self, node_id: Uuid) -> Self {
		Self { node_id, ..self }
	}

	/// Not part of the wire protocol. Lets a `StoreAdapter` mint a fresh
	/// HLC for a local write without re-deriving the advance rule itself.
	#[must_use]
	pub fn next(&self, node_id: Uuid, now_millis: u64) -> Self {
		if now_millis > self.physical_millis {
			Self {
				physical_millis: now_millis,
				counter: 0,
				node_id,
			}
		} else {
			Self {
				physical_millis: self.physical_millis,
				counter: self
					.counter
					.checked_add(1)
					.expect("HLC logical counter overflowed u16 within one millisecond"),
				node_id,
			}
		}
	}
}

impl PartialOrd for Hlc {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Hlc {
	fn cmp(&self, other: &Self) -> Ordering {
		(self.physical_millis, self.counter, self.node_id)
			.cmp(&(other.physical_millis, other.counter, other.node_id))
	}
}

#[derive(Debug, Error)]
pub enum HlcParseError {
	#[error(
		"malformed HLC string {0:?}: expected `<iso8601-millis>-<4-hex-counter>-<node-id>`"
	)]
	Malformed(String),
	#[error("invalid HLC timestamp: {0}")]
	InvalidTime(#[from] chrono::ParseError),
	#[error("invalid HLC counter: {0}")]
	InvalidCounter(#[from] std::num::ParseIntError),
	#[error("invalid HLC node id: {0}")]
	InvalidNodeId(#[from] uuid::Error),
}

impl fmt::Display for Hlc {
	// `<ISO-8601 millis UTC>-<4-hex counter>-<node-id>`.
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let dt = Utc
			.timestamp_millis_opt(i64::try_from(self.physical_millis).unwrap_or(i64::MAX))
			.single()
			.unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));

		write!(
			f,
			"{}-{:04x}-{}",
			dt.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
			self.counter,
			self.node_id
		)
	}
}

impl FromStr for Hlc {
	type Err = HlcParseError;

	// Fixed-width slicing, not split on '-': node id is itself a UUID and
	// contains hyphens, so rsplit would misparse it.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let malformed = || HlcParseError::Malformed(s.to_string());

		if s.len() < TIME_LEN + 1 + 4 + 1 + 1 {
			return Err(malformed());
		}

		let (time_part, rest) = s.split_at(TIME_LEN);
		let rest = rest.strip_prefix('-').ok_or_else(malformed)?;

		if rest.len() < 4 + 1 + 1 {
			return Err(malformed());
		}

		let (counter_part, rest) = rest.split_at(4);
		let node_part = rest.strip_prefix('-').ok_or_else(malformed)?;

		let dt: DateTime<Utc> = DateTime::parse_from_rfc3339(time_part)?.with_timezone(&Utc);
		let counter = u16::from_str_radix(counter_part, 16)?;
		let node_id = Uuid::parse_str(node_part)?;

		Ok(Self {
			physical_millis: dt.timestamp_millis().max(0) as u64,
			counter,
			node_id,
		})
	}
}

impl Serialize for Hlc {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Hlc {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
